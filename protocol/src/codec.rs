//! 固定布局负载的编解码.
//!
//! 设备协议中的多字节整数全部是大端序; [`ByteOrder::Little`] 只用于本地的其他用途.

use bytes::{Buf, BufMut, BytesMut};

use crate::types::{DateTimeValue, ProtocolError};

/// 读取时钟应答中日期时间的最小长度: 年(2) 月 日 时 分.
pub const DATE_TIME_MIN_LEN: usize = 6;
/// 完整日期时间的长度: 年(2) 月 日 时 分 秒.
pub const DATE_TIME_LEN: usize = 7;
/// 设置时钟命令的参数长度: 完整日期时间 + 星期.
pub const DATE_TIME_WRITE_LEN: usize = DATE_TIME_LEN + 1;

/// 多字节整数的字节序.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ByteOrder {
    #[default]
    Big,
    Little,
}

fn ensure_len(bytes: &[u8], expected: usize) -> Result<(), ProtocolError> {
    if bytes.len() < expected {
        return Err(ProtocolError::PayloadLengthMismatch {
            expected,
            actual: bytes.len(),
        });
    }
    Ok(())
}

pub fn read_u16(bytes: &[u8], order: ByteOrder) -> Result<u16, ProtocolError> {
    ensure_len(bytes, 2)?;
    let mut buf = bytes;
    Ok(match order {
        ByteOrder::Big => buf.get_u16(),
        ByteOrder::Little => buf.get_u16_le(),
    })
}

pub fn read_u32(bytes: &[u8], order: ByteOrder) -> Result<u32, ProtocolError> {
    ensure_len(bytes, 4)?;
    let mut buf = bytes;
    Ok(match order {
        ByteOrder::Big => buf.get_u32(),
        ByteOrder::Little => buf.get_u32_le(),
    })
}

pub fn write_u16(buf: &mut BytesMut, value: u16, order: ByteOrder) {
    match order {
        ByteOrder::Big => buf.put_u16(value),
        ByteOrder::Little => buf.put_u16_le(value),
    }
}

pub fn write_u32(buf: &mut BytesMut, value: u32, order: ByteOrder) {
    match order {
        ByteOrder::Big => buf.put_u32(value),
        ByteOrder::Little => buf.put_u32_le(value),
    }
}

/// 读取前 4 个字节的大端序 `u32`, 多余的字节被忽略.
pub fn decode_u32_be(bytes: &[u8]) -> Result<u32, ProtocolError> {
    read_u32(bytes, ByteOrder::Big)
}

/// 解码设备上报的日期时间.
///
/// 秒字段缺失时按 0 处理, 超出 7 字节的部分被忽略.
pub fn decode_date_time(bytes: &[u8]) -> Result<DateTimeValue, ProtocolError> {
    ensure_len(bytes, DATE_TIME_MIN_LEN)?;
    let mut buf = bytes;
    Ok(DateTimeValue {
        year: buf.get_u16(),
        month: buf.get_u8(),
        day: buf.get_u8(),
        hour: buf.get_u8(),
        minute: buf.get_u8(),
        second: buf.first().copied().unwrap_or(0),
    })
}

/// 编码设置时钟命令的参数: 年(2) 月 日 时 分 秒 星期.
///
/// `day_of_week` 以星期日为 0.
pub fn encode_date_time_for_write(
    value: &DateTimeValue,
    day_of_week: u8,
) -> Result<[u8; DATE_TIME_WRITE_LEN], ProtocolError> {
    if day_of_week > 6 {
        return Err(ProtocolError::InvalidDayOfWeek(day_of_week));
    }
    let mut buf = BytesMut::with_capacity(DATE_TIME_WRITE_LEN);
    write_u16(&mut buf, value.year, ByteOrder::Big);
    buf.put_slice(&[
        value.month,
        value.day,
        value.hour,
        value.minute,
        value.second,
        day_of_week,
    ]);

    let mut out = [0u8; DATE_TIME_WRITE_LEN];
    out.copy_from_slice(&buf);
    Ok(out)
}
