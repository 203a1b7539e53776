//! 基于 `tokio-serial` 的串口链路.
//!
//! 串口句柄由一个独立的驱动任务独占. 写入侧的丢弃与写入请求和读取操作
//! 在同一个任务中依次执行, 因此 "先清空输入缓冲区再写入" 的顺序不会被打断.
//!
//! 驱动任务读到的数据块带有丢弃代数. 每次丢弃请求使代数加一,
//! 读取半部跳过代数较旧的数据块, 这样已经转发但还没有被读取的旧输出也会被丢弃.

use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use std::{
    io,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    sync::{mpsc, oneshot},
    time,
};
use tokio_serial::{ClearBuffer, SerialPort, SerialPortBuilderExt, SerialStream};
use tracing::{debug, info, instrument, trace, warn};

use crate::{
    config::{LinkTimeouts, SerialSettings},
    error::TransportError,
    traits::{AsyncFrameReader, AsyncFrameWriter, AsyncStreamSplit},
};

/// 驱动任务读取缓冲区的初始容量.
const READ_CAPACITY: usize = 1024;
/// 请求通道的容量.
const CHANNEL_CAPACITY: usize = 32;

/// 写入侧发往驱动任务的请求.
enum SerialRequest {
    Discard(oneshot::Sender<Result<(), TransportError>>),
    Write(Bytes, oneshot::Sender<Result<usize, TransportError>>),
    Close,
}

/// 驱动任务转发给读取半部的数据块.
struct Inbound {
    /// 读到这块数据时的丢弃代数.
    epoch: u64,
    chunk: io::Result<Bytes>,
}

/// 可以清空操作系统输入缓冲区的端口.
trait ClearInput {
    fn clear_input(&self) -> io::Result<()>;
}

impl ClearInput for SerialStream {
    fn clear_input(&self) -> io::Result<()> {
        self.clear(ClearBuffer::Input).map_err(io::Error::from)
    }
}

/// 一个已经打开的串口链路.
pub struct SerialLink {
    reader: SerialReader,
    writer: SerialWriter,
}

/// 串口链路的读取半部, 接收驱动任务转发的数据块.
pub struct SerialReader {
    inbound: mpsc::UnboundedReceiver<Inbound>,
    epoch: Arc<AtomicU64>,
    read_timeout: Duration,
}

/// 串口链路的写入半部, 把请求交给驱动任务执行.
///
/// 写超时由驱动任务执行, 因此超时返回的写入不会在之后悄悄完成.
pub struct SerialWriter {
    requests: mpsc::Sender<SerialRequest>,
}

impl AsyncStreamSplit for SerialLink {
    type Reader = SerialReader;
    type Writer = SerialWriter;

    fn into_split(self) -> (Self::Reader, Self::Writer) {
        (self.reader, self.writer)
    }
}

/// 打开串口并启动驱动任务.
///
/// 必须在 tokio 运行时中调用.
#[instrument(skip(settings), fields(path = %settings.path, baud = settings.baud_rate))]
pub fn open(settings: &SerialSettings) -> Result<SerialLink, TransportError> {
    let port = tokio_serial::new(settings.path.as_str(), settings.baud_rate)
        .parity(settings.parity)
        .data_bits(settings.data_bits)
        .stop_bits(settings.stop_bits)
        .timeout(settings.timeouts.write)
        .open_native_async()
        .map_err(|e| TransportError::Open {
            target: settings.path.clone(),
            source: e.into(),
        })?;
    info!("串口 {} 已打开", settings.path);

    Ok(spawn_driver(port, settings.timeouts))
}

fn spawn_driver<P>(port: P, timeouts: LinkTimeouts) -> SerialLink
where
    P: AsyncRead + AsyncWrite + ClearInput + Unpin + Send + 'static,
{
    let (request_tx, request_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    let epoch = Arc::new(AtomicU64::new(0));
    tokio::spawn(drive(
        port,
        request_rx,
        inbound_tx,
        Arc::clone(&epoch),
        timeouts.write,
    ));

    SerialLink {
        reader: SerialReader {
            inbound: inbound_rx,
            epoch,
            read_timeout: timeouts.read,
        },
        writer: SerialWriter {
            requests: request_tx,
        },
    }
}

/// 驱动任务: 独占串口, 交替处理写入侧的请求和到达的数据.
///
/// 转发数据块从不等待读取半部, 因此请求总能在写超时内得到应答.
async fn drive<P>(
    mut port: P,
    mut requests: mpsc::Receiver<SerialRequest>,
    inbound: mpsc::UnboundedSender<Inbound>,
    epoch: Arc<AtomicU64>,
    write_timeout: Duration,
) where
    P: AsyncRead + AsyncWrite + ClearInput + Unpin,
{
    let mut buf = BytesMut::with_capacity(READ_CAPACITY);
    loop {
        tokio::select! {
            request = requests.recv() => match request {
                Some(SerialRequest::Discard(reply)) => {
                    buf.clear();
                    epoch.fetch_add(1, Ordering::AcqRel);
                    let ret = port.clear_input().map_err(TransportError::from);
                    let _ = reply.send(ret);
                }
                Some(SerialRequest::Write(frame, reply)) => {
                    let ret = match time::timeout(write_timeout, port.write_all(&frame)).await {
                        Ok(written) => written.map(|_| frame.len()).map_err(TransportError::from),
                        Err(_) => {
                            warn!(len = frame.len(), "串口写入超时");
                            Err(TransportError::Timeout)
                        }
                    };
                    let _ = reply.send(ret);
                }
                Some(SerialRequest::Close) | None => break,
            },
            read = port.read_buf(&mut buf) => {
                let chunk = match read {
                    Ok(0) => break,
                    Ok(_) => Ok(buf.split().freeze()),
                    Err(e) => {
                        warn!("串口读取失败: {}", e);
                        Err(e)
                    }
                };
                let failed = chunk.is_err();
                let current = epoch.load(Ordering::Acquire);
                if inbound.send(Inbound { epoch: current, chunk }).is_err() || failed {
                    break;
                }
            },
        }
    }
    debug!("串口驱动任务退出");
}

impl SerialWriter {
    /// 把请求交给驱动任务并等待结果.
    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<Result<T, TransportError>>) -> SerialRequest,
    ) -> Result<T, TransportError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.requests
            .send(build(reply_tx))
            .await
            .map_err(|_| TransportError::Closed)?;
        reply_rx.await.map_err(|_| TransportError::Closed)?
    }
}

#[async_trait]
impl AsyncFrameWriter for SerialWriter {
    async fn write_frame(&mut self, frame: &[u8]) -> Result<usize, TransportError> {
        let payload = Bytes::copy_from_slice(frame);
        let len = self
            .request(|reply| SerialRequest::Write(payload, reply))
            .await?;
        trace!("发送帧: {:02X?}", frame);
        Ok(len)
    }

    async fn discard_pending_input(&mut self) -> Result<(), TransportError> {
        self.request(SerialRequest::Discard).await
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        // 驱动任务已经退出时通道会关闭, 此时链路本身就已关闭.
        let _ = self.requests.send(SerialRequest::Close).await;
        Ok(())
    }
}

impl SerialReader {
    /// 接收下一个不早于最近一次丢弃的数据块.
    async fn next_current(&mut self) -> Option<io::Result<Bytes>> {
        loop {
            let Inbound { epoch, chunk } = self.inbound.recv().await?;
            match chunk {
                Ok(stale) if epoch < self.epoch.load(Ordering::Acquire) => {
                    debug!(len = stale.len(), "丢弃清空之前读取的数据");
                }
                chunk => return Some(chunk),
            }
        }
    }
}

#[async_trait]
impl AsyncFrameReader for SerialReader {
    async fn read_frame<B>(&mut self, buf: &mut B) -> Result<usize, TransportError>
    where
        B: BufMut + ?Sized + Send,
    {
        match time::timeout(self.read_timeout, self.next_current()).await {
            Err(_) => Err(TransportError::Timeout),
            Ok(None) => Ok(0),
            Ok(Some(Err(e))) => Err(e.into()),
            Ok(Some(Ok(chunk))) => {
                trace!("接收到的数据: {:02X?}", chunk.as_ref());
                buf.put_slice(&chunk);
                Ok(chunk.len())
            }
        }
    }
}
