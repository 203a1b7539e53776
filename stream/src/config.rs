use std::time::Duration;

pub use tokio_serial::{DataBits, Parity, StopBits};

/// 链路读写与建立连接的超时设置.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkTimeouts {
    /// 单次读取等待数据的最长时间, 超时只表示链路空闲.
    pub read: Duration,
    /// 单帧写入的最长时间.
    pub write: Duration,
    /// 建立 TCP 连接的最长时间.
    pub connect: Duration,
}

impl Default for LinkTimeouts {
    fn default() -> Self {
        Self {
            read: Duration::from_millis(100),
            write: Duration::from_millis(1000),
            connect: Duration::from_secs(3),
        }
    }
}

/// 打开串口所需的参数.
///
/// 默认值为设备固件使用的 115200 8N1.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialSettings {
    /// 串口设备路径, 例如 `/dev/ttyUSB0` 或 `COM3`.
    pub path: String,
    pub baud_rate: u32,
    pub parity: Parity,
    pub data_bits: DataBits,
    pub stop_bits: StopBits,
    pub timeouts: LinkTimeouts,
}

impl SerialSettings {
    /// 默认波特率.
    pub const DEFAULT_BAUD_RATE: u32 = 115_200;

    /// 使用默认参数创建指定端口的设置.
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            baud_rate: Self::DEFAULT_BAUD_RATE,
            parity: Parity::None,
            data_bits: DataBits::Eight,
            stop_bits: StopBits::One,
            timeouts: LinkTimeouts::default(),
        }
    }

    pub fn baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }

    pub fn timeouts(mut self, timeouts: LinkTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }
}
