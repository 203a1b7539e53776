//! `stream` 提供与设备之间的字节流链路.
//!
//! 链路本身不理解协议帧, 它只负责读写原始字节、丢弃未读取的输入以及关闭连接.
//! 协议层通过 [`traits`] 中定义的 trait 使用链路.

pub mod client;
pub mod config;
pub mod error;
pub mod serial;
pub mod traits;
