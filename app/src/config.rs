use clap::{ArgGroup, Parser, ValueEnum};
use protocol::ResyncPolicy;
use std::time::Duration;
use stream::config::{LinkTimeouts, SerialSettings};

/// sensorlink: 通过串口或 TCP 与传感器设备通信.
#[derive(Parser, Debug)]
#[command(name = "sensorlink", version, about)]
#[command(group(ArgGroup::new("link").required(true).args(["serial", "tcp"])))]
pub struct Cli {
    /// 串口设备路径, 例如 /dev/ttyUSB0.
    #[arg(long)]
    pub serial: Option<String>,

    /// 串口服务器地址, 例如 192.168.1.103:5006.
    #[arg(long)]
    pub tcp: Option<String>,

    /// 串口波特率.
    #[arg(long, default_value_t = SerialSettings::DEFAULT_BAUD_RATE)]
    pub baud: u32,

    /// 读超时 (毫秒), 超时只表示链路空闲.
    #[arg(long, default_value_t = 100)]
    pub read_timeout_ms: u64,

    /// 写超时 (毫秒).
    #[arg(long, default_value_t = 1000)]
    pub write_timeout_ms: u64,

    /// 遇到无法识别的字节时的重新同步方式.
    #[arg(long, value_enum, default_value_t = Resync::DropChunk)]
    pub resync: Resync,

    /// 连接建立后依次发送的命令, 可以重复.
    #[arg(long = "send", value_enum)]
    pub commands: Vec<OutboundCommand>,

    /// 连接建立后先用本机时间设置设备时钟.
    #[arg(long)]
    pub sync_clock: bool,
}

/// 链路目标.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkTarget {
    Serial(SerialSettings),
    Tcp(String),
}

impl Cli {
    pub fn timeouts(&self) -> LinkTimeouts {
        LinkTimeouts {
            read: Duration::from_millis(self.read_timeout_ms),
            write: Duration::from_millis(self.write_timeout_ms),
            ..Default::default()
        }
    }

    pub fn link_target(&self) -> LinkTarget {
        match (&self.serial, &self.tcp) {
            (Some(path), _) => LinkTarget::Serial(
                SerialSettings::new(path.as_str())
                    .baud_rate(self.baud)
                    .timeouts(self.timeouts()),
            ),
            (None, Some(addr)) => LinkTarget::Tcp(addr.clone()),
            // clap 保证两者至少有一个
            (None, None) => LinkTarget::Tcp(String::new()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Resync {
    /// 丢弃数据块中剩余的字节.
    DropChunk,
    /// 从下一个字节开始重新寻找帧头.
    Rescan,
}

impl From<Resync> for ResyncPolicy {
    fn from(value: Resync) -> Self {
        match value {
            Resync::DropChunk => ResyncPolicy::DropChunk,
            Resync::Rescan => ResyncPolicy::Rescan,
        }
    }
}

/// 可以从命令行发送的无参数命令.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutboundCommand {
    ShowYourself,
    ReadDateTime,
    ReadConfiguration,
    ReadBatteryStatus,
    StartSendData,
    StopSendData,
    StartSendLog,
    StopSendLog,
    GetData,
}
