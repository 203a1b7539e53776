//! 与单个设备之间的连接.
//!
//! 解码器状态和写入侧被同一把锁保护: 发送命令时 "丢弃未读输入再写入" 的过程
//! 不会与数据块的处理交错, 数据块的处理也不会看到被清空一半的状态.

use bytes::BytesMut;
use chrono::NaiveDateTime;
use std::sync::Arc;
use stream::{
    error::TransportError,
    traits::{AsyncFrameReader, AsyncFrameWriter},
};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::{
    codec::encode_date_time_for_write,
    decoder::{FrameDecoder, ResyncPolicy},
    dispatch::dispatch,
    encoder::FrameEncoder,
    traits::{FrameGenerator, SensorCallback},
    types::{CommandType, DateTimeValue, Frame, ProtocolError, day_of_week},
};

/// 读取循环使用的缓冲区初始容量.
const READ_CAPACITY: usize = 1024;

/// 发送命令时可能发生的错误.
#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// 被锁保护的连接状态.
struct Link<W> {
    decoder: FrameDecoder,
    /// 连接关闭后为 `None`.
    writer: Option<W>,
}

/// `DeviceConnection` 负责向设备发送命令, 并把设备的响应分发给回调接口.
///
/// 同一时刻最多只有一条命令在等待应答; 应答与请求的对应关系完全来自设备回显的原始命令.
pub struct DeviceConnection<W, S: ?Sized> {
    link: Mutex<Link<W>>,
    /// 保证各个数据块的帧按解码顺序整块分发.
    delivery: Mutex<()>,
    sink: Arc<S>,
    encoder: FrameEncoder,
}

impl<W, S> DeviceConnection<W, S>
where
    W: AsyncFrameWriter + Send,
    S: SensorCallback + ?Sized,
{
    pub fn new(writer: W, sink: Arc<S>, policy: ResyncPolicy) -> Self {
        Self {
            link: Mutex::new(Link {
                decoder: FrameDecoder::new(policy),
                writer: Some(writer),
            }),
            delivery: Mutex::new(()),
            sink,
            encoder: FrameEncoder,
        }
    }

    pub async fn is_open(&self) -> bool {
        self.link.lock().await.writer.is_some()
    }

    /// 解码器发生帧同步错误的累计次数.
    pub async fn desync_count(&self) -> u64 {
        self.link.lock().await.decoder.desync_count()
    }

    /// 发送一条命令.
    ///
    /// 写入之前先丢弃链路上尚未读取的输入. 返回值只表示发送是否成功,
    /// 设备的应答通过回调接口送达.
    #[instrument(skip(self, args), err)]
    pub async fn send_command(
        &self,
        command: CommandType,
        args: Option<&[u8]>,
    ) -> Result<(), ConnectionError> {
        let frame = self.encoder.create_frame(command, args)?;

        let mut link = self.link.lock().await;
        let writer = link.writer.as_mut().ok_or(TransportError::Closed)?;
        writer.discard_pending_input().await?;
        writer.write_frame(&frame).await?;

        debug!(
            "Sent command {}, length {}. Argument: {:02X?}",
            command,
            frame.len() - crate::types::HEADER_LEN,
            args.unwrap_or_default()
        );
        Ok(())
    }

    /// 处理链路送达的一个数据块, 返回分发的帧数.
    ///
    /// 帧在持有锁时解码, 在释放锁之后分发, 因此回调中可以继续发送命令.
    /// 并发调用时, 每个数据块的帧整块分发, 不会与其他数据块的回调交错.
    /// 回调中不能再调用本方法. 连接关闭后到达的数据块被忽略.
    pub async fn process_incoming_chunk(&self, chunk: &[u8]) -> usize {
        let (frames, _delivery) = {
            let mut link = self.link.lock().await;
            if link.writer.is_none() {
                debug!(len = chunk.len(), "连接已关闭, 忽略数据块");
                return 0;
            }
            let frames: Vec<Frame> = link.decoder.feed(chunk).collect();
            // 释放连接锁之前取得分发顺序
            (frames, self.delivery.lock().await)
        };

        for frame in &frames {
            if let Err(e) = dispatch(frame, self.sink.as_ref()) {
                warn!(%frame, "无法分发帧: {}", e);
            }
        }
        frames.len()
    }

    /// 读取循环: 持续从链路读取数据并处理, 直到链路关闭或出错.
    ///
    /// 读超时只表示链路空闲. 循环结束时连接被关闭.
    #[instrument(skip(self, reader), err)]
    pub async fn pump<R>(&self, reader: &mut R) -> Result<(), TransportError>
    where
        R: AsyncFrameReader + Send,
    {
        let mut buf = BytesMut::with_capacity(READ_CAPACITY);
        loop {
            match reader.read_frame(&mut buf).await {
                Ok(0) => {
                    info!("链路已关闭");
                    return self.close().await;
                }
                Ok(_) => {
                    let chunk = buf.split();
                    self.process_incoming_chunk(&chunk).await;
                }
                Err(TransportError::Timeout) => {}
                Err(e) => {
                    warn!("读取链路失败: {}", e);
                    self.close().await?;
                    return Err(e);
                }
            }
            if !self.is_open().await {
                return Ok(());
            }
        }
    }

    /// 关闭连接. 未完成的帧被丢弃, 之后的发送都会失败.
    pub async fn close(&self) -> Result<(), TransportError> {
        let mut link = self.link.lock().await;
        link.decoder.reset();
        match link.writer.take() {
            Some(mut writer) => writer.close().await,
            None => Ok(()),
        }
    }

    pub async fn get_date_time(&self) -> Result<(), ConnectionError> {
        self.send_command(CommandType::ReadDateTime, None).await
    }

    /// 设置设备时钟, `day_of_week` 以星期日为 0.
    pub async fn set_date_time(
        &self,
        value: DateTimeValue,
        day_of_week: u8,
    ) -> Result<(), ConnectionError> {
        let args = encode_date_time_for_write(&value, day_of_week)?;
        self.send_command(CommandType::WriteDateTime, Some(&args)).await
    }

    /// 用本地时间设置设备时钟, 星期由日期计算.
    pub async fn set_date_time_from(&self, value: NaiveDateTime) -> Result<(), ConnectionError> {
        let date_time = DateTimeValue::try_from(value)?;
        self.set_date_time(date_time, day_of_week(&value)).await
    }

    pub async fn read_configuration(&self) -> Result<(), ConnectionError> {
        self.send_command(CommandType::ReadConfiguration, None).await
    }

    pub async fn write_configuration(&self, configuration: &[u8]) -> Result<(), ConnectionError> {
        self.send_command(CommandType::WriteConfiguration, Some(configuration)).await
    }

    pub async fn read_battery_status(&self) -> Result<(), ConnectionError> {
        self.send_command(CommandType::ReadBatteryStatus, None).await
    }

    pub async fn stop_send_data(&self) -> Result<(), ConnectionError> {
        self.send_command(CommandType::StopSendData, None).await
    }

    pub async fn start_send_data(&self) -> Result<(), ConnectionError> {
        self.send_command(CommandType::StartSendData, None).await
    }

    pub async fn stop_send_log(&self) -> Result<(), ConnectionError> {
        self.send_command(CommandType::StopSendLog, None).await
    }

    pub async fn start_send_log(&self) -> Result<(), ConnectionError> {
        self.send_command(CommandType::StartSendLog, None).await
    }

    pub async fn show_yourself(&self) -> Result<(), ConnectionError> {
        self.send_command(CommandType::ShowYourself, None).await
    }

    pub async fn get_sample_data(&self) -> Result<(), ConnectionError> {
        self.send_command(CommandType::GetData, None).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::encode;
    use async_trait::async_trait;
    use bytes::BufMut;
    use std::{collections::VecDeque, io, sync::Mutex as StdMutex};

    #[derive(Debug, Clone, PartialEq)]
    enum Op {
        Discard,
        Write(Vec<u8>),
        Close,
    }

    /// 记录所有写入侧操作的链路.
    #[derive(Clone, Default)]
    struct RecordingWriter {
        ops: Arc<StdMutex<Vec<Op>>>,
        fail_writes: bool,
        yield_inside: bool,
    }

    impl RecordingWriter {
        fn ops(&self) -> Vec<Op> {
            self.ops.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl AsyncFrameWriter for RecordingWriter {
        async fn write_frame(&mut self, frame: &[u8]) -> Result<usize, TransportError> {
            if self.yield_inside {
                tokio::task::yield_now().await;
            }
            if self.fail_writes {
                return Err(TransportError::Timeout);
            }
            self.ops.lock().unwrap().push(Op::Write(frame.to_vec()));
            Ok(frame.len())
        }

        async fn discard_pending_input(&mut self) -> Result<(), TransportError> {
            self.ops.lock().unwrap().push(Op::Discard);
            if self.yield_inside {
                tokio::task::yield_now().await;
            }
            Ok(())
        }

        async fn close(&mut self) -> Result<(), TransportError> {
            self.ops.lock().unwrap().push(Op::Close);
            Ok(())
        }
    }

    /// 按脚本返回数据块的读取器, 脚本结束后返回 EOF.
    struct ScriptedReader {
        script: VecDeque<Result<Vec<u8>, TransportError>>,
    }

    impl ScriptedReader {
        fn new(script: Vec<Result<Vec<u8>, TransportError>>) -> Self {
            Self {
                script: script.into(),
            }
        }
    }

    #[async_trait]
    impl AsyncFrameReader for ScriptedReader {
        async fn read_frame<B>(&mut self, buf: &mut B) -> Result<usize, TransportError>
        where
            B: BufMut + ?Sized + Send,
        {
            match self.script.pop_front() {
                None => Ok(0),
                Some(Ok(chunk)) => {
                    buf.put_slice(&chunk);
                    Ok(chunk.len())
                }
                Some(Err(e)) => Err(e),
            }
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        data: StdMutex<Vec<Vec<u8>>>,
        dates: StdMutex<Vec<DateTimeValue>>,
        failures: StdMutex<Vec<(CommandType, u8)>>,
    }

    impl SensorCallback for RecordingSink {
        fn received_data(&self, data: &[u8]) {
            self.data.lock().unwrap().push(data.to_vec());
        }
        fn read_date_time(&self, value: DateTimeValue) {
            self.dates.lock().unwrap().push(value);
        }
        fn command_failed(&self, original: CommandType, error_code: u8) {
            self.failures.lock().unwrap().push((original, error_code));
        }
    }

    fn connection(
        writer: RecordingWriter,
    ) -> (
        DeviceConnection<RecordingWriter, RecordingSink>,
        Arc<RecordingSink>,
    ) {
        let sink = Arc::new(RecordingSink::default());
        let conn = DeviceConnection::new(writer, Arc::clone(&sink), ResyncPolicy::default());
        (conn, sink)
    }

    #[tokio::test]
    async fn test_send_command_discards_input_before_writing() {
        let writer = RecordingWriter::default();
        let (conn, _sink) = connection(writer.clone());

        conn.show_yourself().await.unwrap();
        conn.write_configuration(&[0x01, 0x02]).await.unwrap();

        assert_eq!(
            writer.ops(),
            vec![
                Op::Discard,
                Op::Write(vec![0x2A, 0x07, 0x00, 0x00]),
                Op::Discard,
                Op::Write(vec![0x2A, 0x03, 0x00, 0x02, 0x01, 0x02]),
            ]
        );
    }

    #[tokio::test]
    async fn test_outbound_command_surface() {
        let writer = RecordingWriter::default();
        let (conn, _sink) = connection(writer.clone());

        conn.get_date_time().await.unwrap();
        conn.read_configuration().await.unwrap();
        conn.read_battery_status().await.unwrap();
        conn.stop_send_data().await.unwrap();
        conn.start_send_data().await.unwrap();
        conn.stop_send_log().await.unwrap();
        conn.start_send_log().await.unwrap();
        conn.get_sample_data().await.unwrap();

        let written: Vec<u8> = writer
            .ops()
            .into_iter()
            .filter_map(|op| match op {
                Op::Write(frame) => Some(frame[1]),
                _ => None,
            })
            .collect();
        assert_eq!(written, vec![4, 2, 6, 8, 9, 10, 11, 12]);
    }

    #[tokio::test]
    async fn test_set_date_time_sends_day_of_week() {
        let writer = RecordingWriter::default();
        let (conn, _sink) = connection(writer.clone());

        let value = NaiveDateTime::parse_from_str("2024-03-17 08:09:10", "%Y-%m-%d %H:%M:%S")
            .unwrap();
        conn.set_date_time_from(value).await.unwrap();

        assert_eq!(
            writer.ops().last(),
            Some(&Op::Write(vec![
                0x2A, 0x05, 0x00, 0x08, 0x07, 0xE8, 0x03, 0x11, 0x08, 0x09, 0x0A, 0x00,
            ]))
        );
    }

    #[tokio::test]
    async fn test_transport_failure_is_returned() {
        let writer = RecordingWriter {
            fail_writes: true,
            ..Default::default()
        };
        let (conn, _sink) = connection(writer);
        let ret = conn.get_date_time().await;
        assert!(matches!(
            ret,
            Err(ConnectionError::Transport(TransportError::Timeout))
        ));
    }

    #[tokio::test]
    async fn test_oversized_argument_is_not_written() {
        let writer = RecordingWriter::default();
        let (conn, _sink) = connection(writer.clone());
        let config = vec![0u8; 70_000];
        let ret = conn.write_configuration(&config).await;
        assert!(matches!(
            ret,
            Err(ConnectionError::Protocol(ProtocolError::ArgumentTooLarge {
                len: 70_000
            }))
        ));
        assert!(writer.ops().is_empty());
    }

    #[tokio::test]
    async fn test_process_incoming_chunks_dispatches_frames() {
        let (conn, sink) = connection(RecordingWriter::default());
        let bytes = [
            0x2A, 0x00, 0x00, 0x07, 0x04, 0x07, 0xE8, 0x03, 0x0F, 0x0C, 0x1E, // 时钟应答
            0x2A, 0x01, 0x00, 0x02, 0x03, 0x05, // 写配置失败
        ];

        assert_eq!(conn.process_incoming_chunk(&bytes[..6]).await, 0);
        assert_eq!(conn.process_incoming_chunk(&bytes[6..]).await, 2);

        assert_eq!(sink.dates.lock().unwrap()[0].year, 2024);
        assert_eq!(
            *sink.failures.lock().unwrap(),
            vec![(CommandType::WriteConfiguration, 5)]
        );
    }

    #[tokio::test]
    async fn test_malformed_ack_does_not_stop_processing() {
        let (conn, sink) = connection(RecordingWriter::default());
        let bytes = [
            0x2A, 0x01, 0x00, 0x01, 0x03, // 缺少错误码的 Nack
            0x2A, 0x32, 0x00, 0x01, 0x09,
        ];
        assert_eq!(conn.process_incoming_chunk(&bytes).await, 2);
        assert!(sink.failures.lock().unwrap().is_empty());
        assert_eq!(*sink.data.lock().unwrap(), vec![vec![0x09]]);
    }

    #[tokio::test]
    async fn test_close_discards_partial_frame_and_is_terminal() {
        let writer = RecordingWriter::default();
        let (conn, sink) = connection(writer.clone());
        let frame = encode(CommandType::SendData, Some(&[1u8, 2, 3][..])).unwrap();

        conn.process_incoming_chunk(&frame[..5]).await;
        conn.close().await.unwrap();
        assert!(!conn.is_open().await);

        assert_eq!(conn.process_incoming_chunk(&frame[5..]).await, 0);
        assert!(sink.data.lock().unwrap().is_empty());

        let ret = conn.show_yourself().await;
        assert!(matches!(
            ret,
            Err(ConnectionError::Transport(TransportError::Closed))
        ));
        assert_eq!(writer.ops(), vec![Op::Close]);
    }

    #[tokio::test]
    async fn test_pump_reads_until_eof() {
        let writer = RecordingWriter::default();
        let (conn, sink) = connection(writer.clone());
        let frame = encode(CommandType::SendData, Some(&[4u8, 5, 6][..])).unwrap();
        let mut reader = ScriptedReader::new(vec![
            Ok(frame[..3].to_vec()),
            Err(TransportError::Timeout),
            Ok(frame[3..].to_vec()),
        ]);

        conn.pump(&mut reader).await.unwrap();

        assert_eq!(*sink.data.lock().unwrap(), vec![vec![4, 5, 6]]);
        assert!(!conn.is_open().await);
        assert_eq!(writer.ops(), vec![Op::Close]);
    }

    #[tokio::test]
    async fn test_pump_returns_transport_error() {
        let (conn, _sink) = connection(RecordingWriter::default());
        let mut reader = ScriptedReader::new(vec![Err(TransportError::Io(io::Error::other(
            "device unplugged",
        )))]);

        let ret = conn.pump(&mut reader).await;
        assert!(matches!(ret, Err(TransportError::Io(_))));
        assert!(!conn.is_open().await);
    }

    #[tokio::test]
    async fn test_desync_count_is_observable() {
        let (conn, _sink) = connection(RecordingWriter::default());
        conn.process_incoming_chunk(&[0x00, 0x2A]).await;
        assert_eq!(conn.desync_count().await, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_chunks_are_delivered_whole() {
        const CHUNKS: usize = 200;

        let (conn, sink) = connection(RecordingWriter::default());
        let conn = Arc::new(conn);

        // 每个数据块包含两帧完整的采样数据, 负载为同一个标记字节
        let feeders: Vec<_> = [1u8, 2]
            .into_iter()
            .map(|mark| {
                let conn = Arc::clone(&conn);
                tokio::spawn(async move {
                    let frame = encode(CommandType::SendData, Some(&[mark][..])).unwrap();
                    let chunk = [frame.as_ref(), frame.as_ref()].concat();
                    for _ in 0..CHUNKS {
                        assert_eq!(conn.process_incoming_chunk(&chunk).await, 2);
                        tokio::task::yield_now().await;
                    }
                })
            })
            .collect();
        for feeder in feeders {
            feeder.await.unwrap();
        }

        let data = sink.data.lock().unwrap();
        assert_eq!(data.len(), CHUNKS * 4);
        for pair in data.chunks(2) {
            assert_eq!(pair[0], pair[1]);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_send_and_receive_never_tears_frames() {
        const FRAMES: usize = 300;
        const SENDERS: usize = 4;
        const SENDS_PER_TASK: usize = 100;

        let writer = RecordingWriter {
            yield_inside: true,
            ..Default::default()
        };
        let (conn, sink) = connection(writer.clone());
        let conn = Arc::new(conn);

        // 每帧的负载由同一个字节重复组成, 字节值等于负载长度
        let mut stream = vec![];
        for i in 0..FRAMES {
            let len = i % 200 + 1;
            let payload = vec![len as u8; len];
            let bytes = encode(CommandType::SendData, Some(payload.as_slice())).unwrap();
            stream.extend_from_slice(&bytes);
        }

        let feeder = {
            let conn = Arc::clone(&conn);
            tokio::spawn(async move {
                let mut rest = stream.as_slice();
                let mut step = 1;
                while !rest.is_empty() {
                    let (chunk, tail) = rest.split_at(step.min(rest.len()));
                    conn.process_incoming_chunk(chunk).await;
                    tokio::task::yield_now().await;
                    rest = tail;
                    step = step % 13 + 1;
                }
            })
        };

        let senders: Vec<_> = (0..SENDERS)
            .map(|_| {
                let conn = Arc::clone(&conn);
                tokio::spawn(async move {
                    for _ in 0..SENDS_PER_TASK {
                        conn.get_sample_data().await.unwrap();
                    }
                })
            })
            .collect();

        feeder.await.unwrap();
        for sender in senders {
            sender.await.unwrap();
        }

        let data = sink.data.lock().unwrap();
        assert_eq!(data.len(), FRAMES);
        for (i, payload) in data.iter().enumerate() {
            let len = i % 200 + 1;
            assert_eq!(payload.len(), len);
            assert!(payload.iter().all(|&b| b as usize == len));
        }

        let ops = writer.ops();
        assert_eq!(ops.len(), SENDERS * SENDS_PER_TASK * 2);
        for pair in ops.chunks(2) {
            assert_eq!(pair[0], Op::Discard);
            assert_eq!(pair[1], Op::Write(vec![0x2A, 0x0C, 0x00, 0x00]));
        }
    }
}
