use bytes::{BufMut, Bytes, BytesMut};
use tracing::trace;

use crate::{
    traits::FrameGenerator,
    types::{CommandType, HEADER_LEN, MAGIC_BYTE, ProtocolError},
};

/// `FrameEncoder` 把命令类型和参数序列化为 `[*][类型][长度高][长度低][参数...]`.
///
/// 这个结构体是无状态的.
#[derive(Debug, Default, Clone, Copy)]
pub struct FrameEncoder;

impl FrameEncoder {
    /// 长度字段能表示的最大参数长度.
    pub const MAX_ARGUMENT_LEN: usize = u16::MAX as usize;
}

impl FrameGenerator for FrameEncoder {
    fn create_frame(
        &self,
        command: CommandType,
        args: Option<&[u8]>,
    ) -> Result<Bytes, ProtocolError> {
        let data = args.unwrap_or_default();
        let data_len = u16::try_from(data.len())
            .map_err(|_| ProtocolError::ArgumentTooLarge { len: data.len() })?;

        let mut buf = BytesMut::with_capacity(HEADER_LEN + data.len());
        buf.put_u8(MAGIC_BYTE);
        buf.put_u8(command.into());
        buf.put_u16(data_len);
        buf.put_slice(data);

        trace!("Frame Created: {:02X?}", buf.as_ref());
        Ok(buf.freeze())
    }
}

/// 使用 [`FrameEncoder`] 编码一个命令帧.
pub fn encode(command: CommandType, args: Option<&[u8]>) -> Result<Bytes, ProtocolError> {
    FrameEncoder.create_frame(command, args)
}
