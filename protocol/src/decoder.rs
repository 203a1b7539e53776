//! 增量式帧解码器.
//!
//! 数据块可以在任意位置切分帧, 解码器在数据块之间保留未完成的帧.
//! 遇到不是同步字节的帧起始字节时, 按 [`ResyncPolicy`] 重新同步.

use bytes::{BufMut, BytesMut};
use std::iter::FusedIterator;
use tracing::{debug, trace};

use crate::{
    traits::ParseProtocol,
    types::{CommandType, Frame, HEADER_LEN, MAGIC_BYTE},
};

/// 帧起始字节不是同步字节时的处理方式.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResyncPolicy {
    /// 丢弃当前数据块中剩余的所有字节, 期望下一个数据块从帧边界开始.
    #[default]
    DropChunk,
    /// 只丢弃出错的字节, 在当前数据块中继续寻找同步字节.
    Rescan,
}

/// 正在累积中的帧.
///
/// `bytes_consumed` 记录已经放入的帧头与负载字节数:
/// 0 等待同步字节, 1 等待类型, 2 等待长度高字节, 3 等待长度低字节, 之后为负载.
#[derive(Debug, Default)]
struct PartialFrame {
    frame_type: CommandType,
    length: u16,
    payload: BytesMut,
    bytes_consumed: usize,
}

/// 放入一个字节之后的结果.
enum Step {
    Pending,
    Complete(Frame),
    /// 帧起始字节不是同步字节.
    Desync,
    /// 字节超出了声明的负载长度, 只会发生在零长度帧上.
    Overflow,
}

impl PartialFrame {
    fn push(&mut self, byte: u8) -> Step {
        match self.bytes_consumed {
            0 if byte != MAGIC_BYTE => return Step::Desync,
            0 => {}
            1 => self.frame_type = byte.into(),
            2 => self.length = u16::from(byte) << 8,
            3 => {
                self.length |= u16::from(byte);
                self.payload = BytesMut::with_capacity(self.length.into());
            }
            _ if self.payload.len() >= usize::from(self.length) => return Step::Overflow,
            _ => self.payload.put_u8(byte),
        }
        self.bytes_consumed += 1;

        // 零长度的帧永远不会在这里完成
        if self.length > 0
            && self.bytes_consumed >= HEADER_LEN
            && self.bytes_consumed - HEADER_LEN == usize::from(self.length)
        {
            let done = std::mem::take(self);
            return Step::Complete(Frame {
                frame_type: done.frame_type,
                length: done.length,
                payload: done.payload.freeze(),
            });
        }
        Step::Pending
    }
}

/// `FrameDecoder` 从任意切分的数据块中重建完整的帧.
///
/// 每个连接拥有自己的解码器, 未完成的帧只属于这一个连接.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    partial: PartialFrame,
    policy: ResyncPolicy,
    desyncs: u64,
}

impl FrameDecoder {
    pub fn new(policy: ResyncPolicy) -> Self {
        Self {
            policy,
            ..Default::default()
        }
    }

    pub fn policy(&self) -> ResyncPolicy {
        self.policy
    }

    /// 处理一个数据块, 返回一个按需解码的帧迭代器.
    ///
    /// 数据块中的字节只在迭代器被推进时才会处理;
    /// 迭代器被提前丢弃时, 尚未处理的字节不会再被处理.
    pub fn feed<'a>(&'a mut self, chunk: &'a [u8]) -> Frames<'a> {
        Frames {
            decoder: self,
            chunk,
            pos: 0,
        }
    }

    /// 丢弃正在累积的帧, 从下一个同步字节重新开始.
    pub fn reset(&mut self) {
        if !self.is_idle() {
            debug!(
                consumed = self.partial.bytes_consumed,
                "丢弃未完成的帧 {}", self.partial.frame_type
            );
        }
        self.partial = PartialFrame::default();
    }

    /// 当前没有未完成的帧.
    pub fn is_idle(&self) -> bool {
        self.partial.bytes_consumed == 0
    }

    /// 发生帧同步错误的累计次数.
    pub fn desync_count(&self) -> u64 {
        self.desyncs
    }
}

impl ParseProtocol for FrameDecoder {
    fn parse_protocol_frame(&mut self, chunk: &[u8]) -> Option<Vec<Frame>> {
        let frames: Vec<Frame> = self.feed(chunk).collect();
        if frames.is_empty() { None } else { Some(frames) }
    }
}

/// [`FrameDecoder::feed`] 返回的帧迭代器.
pub struct Frames<'a> {
    decoder: &'a mut FrameDecoder,
    chunk: &'a [u8],
    pos: usize,
}

impl Iterator for Frames<'_> {
    type Item = Frame;

    fn next(&mut self) -> Option<Frame> {
        while let Some(&byte) = self.chunk.get(self.pos) {
            self.pos += 1;
            match self.decoder.partial.push(byte) {
                Step::Pending => {}
                Step::Complete(frame) => {
                    debug!(%frame, "收到完整帧");
                    return Some(frame);
                }
                Step::Desync => {
                    self.decoder.desyncs += 1;
                    match self.decoder.policy {
                        ResyncPolicy::DropChunk => {
                            let dropped = self.chunk.len() - self.pos + 1;
                            debug!(byte, dropped, "帧同步字节不匹配, 丢弃数据块剩余部分");
                            self.pos = self.chunk.len();
                            return None;
                        }
                        ResyncPolicy::Rescan => trace!(byte, "帧同步字节不匹配, 丢弃该字节"),
                    }
                }
                Step::Overflow => {
                    debug!("零长度帧无法完成, 丢弃帧头");
                    self.decoder.partial = PartialFrame::default();
                    // 当前字节作为下一帧的起始重新处理
                    self.pos -= 1;
                }
            }
        }
        None
    }
}

impl FusedIterator for Frames<'_> {}
