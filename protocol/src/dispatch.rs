use tracing::debug;

use crate::{
    codec::{decode_date_time, decode_u32_be},
    traits::SensorCallback,
    types::{CommandType, Frame, ProtocolError},
};

/// 根据帧的类型通知回调接口.
///
/// `Ack`/`Nack` 帧通过负载的第一个字节找到它们所应答的命令.
/// 未知类型的帧和未定义处理方式的应答被忽略.
///
/// # 返回
/// 应答负载短于对应命令所需的长度时返回 `ProtocolError::PayloadLengthMismatch`,
/// 此时不会调用任何回调.
pub fn dispatch<S>(frame: &Frame, sink: &S) -> Result<(), ProtocolError>
where
    S: SensorCallback + ?Sized,
{
    match frame.frame_type {
        CommandType::SendData => sink.received_data(&frame.payload),
        CommandType::SendLog => sink.received_log(&frame.payload),
        CommandType::Ack => dispatch_ack(frame, sink)?,
        CommandType::Nack => {
            let original = original_of(frame)?;
            let error_code = *frame.argument().first().ok_or(
                ProtocolError::PayloadLengthMismatch {
                    expected: 2,
                    actual: frame.payload.len(),
                },
            )?;
            sink.command_failed(original, error_code);
        }
        other => debug!("忽略类型为 {} 的帧", other),
    }
    Ok(())
}

fn original_of(frame: &Frame) -> Result<CommandType, ProtocolError> {
    frame.original().ok_or(ProtocolError::PayloadLengthMismatch {
        expected: 1,
        actual: 0,
    })
}

fn dispatch_ack<S>(frame: &Frame, sink: &S) -> Result<(), ProtocolError>
where
    S: SensorCallback + ?Sized,
{
    let argument = frame.argument();
    match original_of(frame)? {
        CommandType::ReadConfiguration => sink.read_configuration(argument),
        CommandType::WriteConfiguration => sink.write_configuration(),
        CommandType::ReadDateTime => sink.read_date_time(decode_date_time(argument)?),
        CommandType::WriteDateTime => sink.write_date_time(),
        CommandType::ReadBatteryStatus => sink.battery_status(decode_u32_be(argument)?),
        other => debug!("忽略对 {} 的应答", other),
    }
    Ok(())
}
