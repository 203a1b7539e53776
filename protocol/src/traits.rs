use bytes::Bytes;

use crate::types::{CommandType, DateTimeValue, Frame, ProtocolError};

/// `ParseProtocol` trait 定义了从字节流中解析协议帧的接口.
///
/// 解析器在多次调用之间保留未完成的帧, 因此同一帧的字节可以分散在任意多个数据块中.
pub trait ParseProtocol {
    /// 处理一个新到达的数据块, 返回其中完成的所有帧.
    ///
    /// # 返回
    /// 至少完成一帧时返回 `Some(frames)`; 否则返回 `None`, 表示需要更多数据.
    fn parse_protocol_frame(&mut self, chunk: &[u8]) -> Option<Vec<Frame>>;
}

/// 帧生成器 trait, 用于将命令类型和参数转换成可发送的字节帧.
pub trait FrameGenerator {
    /// 根据命令类型和可选参数创建一个完整的、可供发送的字节帧.
    ///
    /// # 返回
    /// 成功时返回完整的帧; 参数超过 65535 字节时返回 `ProtocolError::ArgumentTooLarge`.
    fn create_frame(&self, command: CommandType, args: Option<&[u8]>)
    -> Result<Bytes, ProtocolError>;
}

/// 设备响应的回调接口.
///
/// 宿主程序按需实现其中的通知, 未实现的通知默认忽略.
/// 回调可能在读取链路的任务中被调用, 因此实现需要是 `Send + Sync`.
pub trait SensorCallback: Send + Sync {
    /// 设备上报的采样数据, 原样交给宿主解析.
    fn received_data(&self, _data: &[u8]) {}

    /// 设备上报的日志.
    fn received_log(&self, _log: &[u8]) {}

    /// 读取配置的应答, 配置的格式由宿主定义.
    fn read_configuration(&self, _configuration: &[u8]) {}

    /// 写入配置的应答.
    fn write_configuration(&self) {}

    /// 读取设备时钟的应答.
    fn read_date_time(&self, _value: DateTimeValue) {}

    /// 设置设备时钟的应答.
    fn write_date_time(&self) {}

    /// 读取电池状态的应答.
    fn battery_status(&self, _value: u32) {}

    /// 设备拒绝了命令 `original`, 并给出错误码.
    fn command_failed(&self, _original: CommandType, _error_code: u8) {}
}
