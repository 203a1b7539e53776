//! 传感器设备的线路协议: 帧的编码, 解码, 负载编解码与响应分发.

pub mod codec;
pub mod connection;
pub mod decoder;
pub mod dispatch;
pub mod encoder;
pub mod traits;
pub mod types;

pub use connection::{ConnectionError, DeviceConnection};
pub use decoder::{FrameDecoder, ResyncPolicy};
pub use encoder::FrameEncoder;
pub use traits::SensorCallback;
pub use types::{CommandType, DateTimeValue, Frame, ProtocolError};
