use async_trait::async_trait;
use bytes::BufMut;
use std::{io, net::SocketAddr, sync::Arc};
use tokio::{
    net::{TcpSocket, TcpStream},
    time,
};
use tracing::{debug, info, instrument, trace};

use crate::{
    config::LinkTimeouts,
    error::TransportError,
    traits::{AsyncFrameReader, AsyncFrameWriter, AsyncStreamSplit},
};

/// 单次读取使用的临时缓冲区大小.
const READ_CHUNK_LEN: usize = 1024;

/// `TcpLink` 管理一条到串口透传服务器的 TCP 链路.
///
/// 读取器和写入器共享同一个套接字, 因此写入侧可以在发送命令之前
/// 直接清空套接字中尚未被读取的数据, 而不需要等待读取侧.
pub struct TcpLink {
    stream: Arc<TcpStream>,
    timeouts: LinkTimeouts,
}

/// TCP 链路的读取半部.
pub struct TcpReader {
    stream: Arc<TcpStream>,
    read_timeout: std::time::Duration,
}

/// TCP 链路的写入半部.
pub struct TcpWriter {
    stream: Arc<TcpStream>,
    write_timeout: std::time::Duration,
    closed: bool,
}

impl AsyncStreamSplit for TcpLink {
    type Reader = TcpReader;
    type Writer = TcpWriter;

    fn into_split(self) -> (Self::Reader, Self::Writer) {
        (
            TcpReader {
                stream: Arc::clone(&self.stream),
                read_timeout: self.timeouts.read,
            },
            TcpWriter {
                stream: self.stream,
                write_timeout: self.timeouts.write,
                closed: false,
            },
        )
    }
}

#[async_trait]
impl AsyncFrameWriter for TcpWriter {
    async fn write_frame(&mut self, buf: &[u8]) -> Result<usize, TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        let stream = &self.stream;
        let write = async {
            let mut written = 0;
            while written < buf.len() {
                stream.writable().await?;
                match stream.try_write(&buf[written..]) {
                    Ok(n) => written += n,
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
                    Err(e) => return Err(e),
                }
            }
            Ok::<_, io::Error>(written)
        };
        let len = time::timeout(self.write_timeout, write)
            .await
            .map_err(|_| TransportError::Timeout)??;
        trace!("发送帧: {:02X?}", buf);
        Ok(len)
    }

    async fn discard_pending_input(&mut self) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        let mut scratch = [0u8; READ_CHUNK_LEN];
        let mut discarded = 0;
        loop {
            match self.stream.try_read(&mut scratch) {
                Ok(0) => break,
                Ok(n) => discarded += n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(e.into()),
            }
        }
        if discarded > 0 {
            debug!(discarded, "丢弃未读取的输入");
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.closed = true;
        Ok(())
    }
}

#[async_trait]
impl AsyncFrameReader for TcpReader {
    async fn read_frame<B>(&mut self, buf: &mut B) -> Result<usize, TransportError>
    where
        B: BufMut + ?Sized + Send,
    {
        let stream = &self.stream;
        let mut scratch = [0u8; READ_CHUNK_LEN];
        let read = async {
            loop {
                stream.readable().await?;
                match stream.try_read(&mut scratch) {
                    Ok(n) => return Ok::<_, io::Error>(n),
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
                    Err(e) => return Err(e),
                }
            }
        };
        let len = time::timeout(self.read_timeout, read)
            .await
            .map_err(|_| TransportError::Timeout)??;
        buf.put_slice(&scratch[..len]);
        trace!("接收到的数据: {:02X?}", &scratch[..len]);
        Ok(len)
    }
}

/// 建立一个到指定地址的TCP连接.
///
/// # 参数
/// * `addr`: 串口透传服务器的地址 (例如 "192.168.1.103:5006").
/// * `timeouts`: 连接、读取与写入的超时时间.
///
/// # 返回值
/// 连接成功时返回 `TcpLink`; 地址无法解析、连接超时或连接失败时返回 `TransportError`.
#[instrument(skip(addr, timeouts))]
pub async fn connect(
    addr: impl AsRef<str>,
    timeouts: LinkTimeouts,
) -> Result<TcpLink, TransportError> {
    let target = addr.as_ref().to_string();
    let open_error = |source: io::Error| TransportError::Open {
        target: target.clone(),
        source,
    };

    let remote_addr = target
        .parse::<SocketAddr>()
        .map_err(|e| open_error(io::Error::new(io::ErrorKind::InvalidInput, e)))?;

    let socket = TcpSocket::new_v4().map_err(open_error)?;
    // 禁用Nagle算法,减少延迟
    socket.set_nodelay(true).map_err(open_error)?;
    socket.set_reuseaddr(true).map_err(open_error)?;

    let stream = time::timeout(timeouts.connect, socket.connect(remote_addr))
        .await
        .map_err(|_| open_error(io::ErrorKind::TimedOut.into()))?
        .map_err(open_error)?;

    info!("tcp连接到{}", target);
    Ok(TcpLink {
        stream: Arc::new(stream),
        timeouts,
    })
}
