use chrono::Local;
use color_eyre::eyre::Result;
use protocol::{DeviceConnection, ResyncPolicy};
use std::sync::Arc;
use stream::{
    client::connect,
    error::TransportError,
    serial,
    traits::{AsyncFrameReader, AsyncFrameWriter, AsyncStreamSplit},
};
use tokio::task::JoinHandle;
use tracing::{info, instrument};

use crate::{
    config::{Cli, LinkTarget, OutboundCommand},
    sink::LoggingSink,
};

/// SensorApp 管理一条设备连接的生命周期.
///
/// 读取循环运行在独立的任务中, 主任务负责发送命令并等待退出信号.
pub struct SensorApp<W> {
    connection: Arc<DeviceConnection<W, LoggingSink>>,
    pump: JoinHandle<Result<(), TransportError>>,
}

impl<W> SensorApp<W>
where
    W: AsyncFrameWriter + Send + 'static,
{
    /// 分离链路的读写两侧, 并启动读取循环.
    pub fn start<L>(link: L, policy: ResyncPolicy) -> Self
    where
        L: AsyncStreamSplit<Writer = W>,
        L::Reader: AsyncFrameReader + Send + 'static,
    {
        let (mut reader, writer) = link.into_split();
        let connection = Arc::new(DeviceConnection::new(
            writer,
            Arc::new(LoggingSink),
            policy,
        ));
        let pump = {
            let connection = Arc::clone(&connection);
            tokio::spawn(async move { connection.pump(&mut reader).await })
        };
        Self { connection, pump }
    }

    /// 发送命令后等待, 直到链路关闭或收到中断信号.
    #[instrument(skip(self), err)]
    pub async fn run(mut self, commands: &[OutboundCommand], sync_clock: bool) -> Result<()> {
        if sync_clock {
            let now = Local::now().naive_local();
            self.connection.set_date_time_from(now).await?;
        }
        for command in commands {
            self.send(*command).await?;
        }

        tokio::select! {
            ret = tokio::signal::ctrl_c() => {
                ret?;
                info!("收到中断信号, 关闭连接");
            }
            ret = &mut self.pump => {
                ret??;
            }
        }

        self.connection.close().await?;
        info!(desyncs = self.connection.desync_count().await, "连接已关闭");
        Ok(())
    }

    async fn send(&self, command: OutboundCommand) -> Result<()> {
        let conn = &self.connection;
        match command {
            OutboundCommand::ShowYourself => conn.show_yourself().await,
            OutboundCommand::ReadDateTime => conn.get_date_time().await,
            OutboundCommand::ReadConfiguration => conn.read_configuration().await,
            OutboundCommand::ReadBatteryStatus => conn.read_battery_status().await,
            OutboundCommand::StartSendData => conn.start_send_data().await,
            OutboundCommand::StopSendData => conn.stop_send_data().await,
            OutboundCommand::StartSendLog => conn.start_send_log().await,
            OutboundCommand::StopSendLog => conn.stop_send_log().await,
            OutboundCommand::GetData => conn.get_sample_data().await,
        }?;
        Ok(())
    }
}

/// 按命令行参数建立链路并运行应用.
#[instrument(skip(cli), err)]
pub async fn run(cli: Cli) -> Result<()> {
    let policy = ResyncPolicy::from(cli.resync);
    match cli.link_target() {
        LinkTarget::Tcp(addr) => {
            let link = connect(&addr, cli.timeouts()).await?;
            info!(%addr, "已连接");
            SensorApp::start(link, policy)
                .run(&cli.commands, cli.sync_clock)
                .await
        }
        LinkTarget::Serial(settings) => {
            let link = serial::open(&settings)?;
            info!(path = %settings.path, baud = settings.baud_rate, "串口已打开");
            SensorApp::start(link, policy)
                .run(&cli.commands, cli.sync_clock)
                .await
        }
    }
}
