use bytes::Bytes;
use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};
use std::fmt;
use thiserror::Error;

/// 每一帧开头的同步字节 `'*'`.
pub const MAGIC_BYTE: u8 = b'*';
/// 帧头长度: 同步字节 + 类型 + 2 字节长度.
pub const HEADER_LEN: usize = 4;

/// 收发双方共用的命令类型.
///
/// 主机发送的请求和设备回复的帧都使用同一套编码.
/// 无法识别的字节值统一映射为 `Unknown`.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash, Default)]
#[repr(u8)]
pub enum CommandType {
    /// 肯定应答
    Ack = 0,
    /// 否定应答
    Nack = 1,
    ReadConfiguration = 2,
    WriteConfiguration = 3,
    ReadDateTime = 4,
    WriteDateTime = 5,
    ReadBatteryStatus = 6,
    /// 让设备通过指示灯等方式标识自己
    ShowYourself = 7,
    /// 停止自动发送采样数据
    StopSendData = 8,
    /// 恢复自动发送采样数据
    StartSendData = 9,
    StopSendLog = 10,
    StartSendLog = 11,
    /// 主动查询一次采样数据
    GetData = 12,
    /// 设备上报的采样数据
    SendData = 50,
    /// 设备上报的日志
    SendLog = 51,
    #[default]
    Unknown = 0xFF,
}

impl From<u8> for CommandType {
    fn from(value: u8) -> Self {
        match value {
            0 => Self::Ack,
            1 => Self::Nack,
            2 => Self::ReadConfiguration,
            3 => Self::WriteConfiguration,
            4 => Self::ReadDateTime,
            5 => Self::WriteDateTime,
            6 => Self::ReadBatteryStatus,
            7 => Self::ShowYourself,
            8 => Self::StopSendData,
            9 => Self::StartSendData,
            10 => Self::StopSendLog,
            11 => Self::StartSendLog,
            12 => Self::GetData,
            50 => Self::SendData,
            51 => Self::SendLog,
            _ => Self::Unknown,
        }
    }
}

impl From<CommandType> for u8 {
    fn from(value: CommandType) -> Self {
        value as u8
    }
}

impl fmt::Display for CommandType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// 一个完整的协议帧.
///
/// `payload.len()` 总是等于 `length`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub frame_type: CommandType,
    pub length: u16,
    pub payload: Bytes,
}

impl Frame {
    /// 对 `Ack`/`Nack` 帧, 返回它所应答的原始命令 (负载的第一个字节).
    pub fn original(&self) -> Option<CommandType> {
        match self.frame_type {
            CommandType::Ack | CommandType::Nack => self.payload.first().map(|&b| b.into()),
            _ => None,
        }
    }

    /// 负载中原始命令字节之后的部分.
    pub fn argument(&self) -> &[u8] {
        self.payload.get(1..).unwrap_or_default()
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} len={}", self.frame_type, self.length)?;
        if let Some(original) = self.original() {
            write!(f, " original={}", original)?;
        }
        write!(f, " payload={:02X?}", self.payload.as_ref())
    }
}

/// 设备时钟的日期时间.
///
/// 字段都是设备上报的原始值, 不做日历合法性检查;
/// 需要合法日期时可以转换为 [`NaiveDateTime`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DateTimeValue {
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
}

impl fmt::Display for DateTimeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
            self.year, self.month, self.day, self.hour, self.minute, self.second
        )
    }
}

impl TryFrom<DateTimeValue> for NaiveDateTime {
    type Error = ProtocolError;

    fn try_from(value: DateTimeValue) -> Result<Self, Self::Error> {
        NaiveDate::from_ymd_opt(value.year.into(), value.month.into(), value.day.into())
            .and_then(|date| {
                date.and_hms_opt(value.hour.into(), value.minute.into(), value.second.into())
            })
            .ok_or(ProtocolError::InvalidDateTime(value))
    }
}

impl TryFrom<NaiveDateTime> for DateTimeValue {
    type Error = ProtocolError;

    fn try_from(value: NaiveDateTime) -> Result<Self, Self::Error> {
        let year =
            u16::try_from(value.year()).map_err(|_| ProtocolError::YearOutOfRange(value.year()))?;
        // chrono 保证以下字段都在各自的取值范围内
        Ok(Self {
            year,
            month: value.month() as u8,
            day: value.day() as u8,
            hour: value.hour() as u8,
            minute: value.minute() as u8,
            second: value.second() as u8,
        })
    }
}

/// 设备使用的星期编码: 星期日为 0, 星期六为 6.
pub fn day_of_week(value: &NaiveDateTime) -> u8 {
    value.weekday().num_days_from_sunday() as u8
}

/// 协议编解码过程中的错误.
///
/// 这些错误都表示调用者违反了接口约定, 会同步返回给调用者, 不会被静默修正.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("命令参数过长: {len} 字节, 最多 65535 字节")]
    ArgumentTooLarge { len: usize },
    #[error("负载长度不符: 至少需要 {expected} 字节, 实际 {actual} 字节")]
    PayloadLengthMismatch { expected: usize, actual: usize },
    #[error("星期编码无效: {0}, 取值范围 0..=6")]
    InvalidDayOfWeek(u8),
    #[error("日期时间无效: {0}")]
    InvalidDateTime(DateTimeValue),
    #[error("年份 {0} 无法用 16 位无符号数表示")]
    YearOutOfRange(i32),
}
