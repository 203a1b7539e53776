use async_trait::async_trait;
use bytes::BufMut;

use crate::error::TransportError;

/// `AsyncFrameWriter` trait 定义了链路写入侧的能力.
///
/// 除了写入一个完整数据帧之外, 写入侧还负责在发送命令之前丢弃尚未读取的输入,
/// 避免把设备之前的输出误认为是新命令的响应.
#[async_trait]
pub trait AsyncFrameWriter {
    /// 异步地将一个完整的数据帧写入到底层链路.
    ///
    /// # 返回
    /// * `Ok(usize)`: 写入成功, 返回写入的字节数.
    /// * `Err(TransportError::Timeout)`: 在写超时时间内没有完成写入.
    async fn write_frame(&mut self, frame: &[u8]) -> Result<usize, TransportError>;

    /// 丢弃链路上已经到达但还没有被读取的所有字节.
    async fn discard_pending_input(&mut self) -> Result<(), TransportError>;

    /// 关闭链路. 关闭之后的写入都会返回 `TransportError::Closed`.
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// `AsyncFrameReader` trait 定义了链路读取侧的能力.
///
/// 它只负责把到达的字节追加到缓冲区中, 帧边界的识别由协议层的解码器完成.
#[async_trait]
pub trait AsyncFrameReader {
    /// 异步地从底层链路读取数据, 并将其追加到 `buf` 缓冲区中.
    ///
    /// # 返回
    /// * `Ok(n)` 且 `n > 0`: 读取到 `n` 个字节.
    /// * `Ok(0)`: 链路已经关闭 (EOF).
    /// * `Err(TransportError::Timeout)`: 读超时时间内没有数据到达, 链路仍然可用.
    async fn read_frame<B>(&mut self, buf: &mut B) -> Result<usize, TransportError>
    where
        B: BufMut + ?Sized + Send;
}

/// `AsyncStreamSplit` trait 定义了一种将链路分解为读取和写入组件的标准方式.
pub trait AsyncStreamSplit {
    /// 链路的读取器部分, 应实现 `AsyncFrameReader`.
    type Reader;

    /// 链路的写入器部分, 应实现 `AsyncFrameWriter`.
    type Writer;

    /// 消耗链路对象本身, 并返回其分离的、拥有所有权的读取器和写入器.
    fn into_split(self) -> (Self::Reader, Self::Writer);
}
