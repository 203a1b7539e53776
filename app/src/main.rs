use app::{app::run, config::Cli};
use clap::Parser;
use color_eyre::Result;
use tracing_appender::{non_blocking, rolling};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

#[tokio::main]
async fn main() -> Result<()> {
    // 安装 color_eyre 错误处理
    color_eyre::install()?;
    let cli = Cli::parse();

    // -- 文件日志 --
    let file_appender = rolling::daily("logs", "sensorlink_log");
    let (non_blocking_writer, _guard) = non_blocking(file_appender);
    let file_layer = fmt::layer()
        .with_writer(non_blocking_writer)
        .with_ansi(false)
        .with_span_events(FmtSpan::CLOSE);

    // -- 控制台日志 --
    // 设置了 CONSOLE_LOG 时同时输出到终端
    let console_layer = std::env::var("CONSOLE_LOG")
        .is_ok()
        .then(|| fmt::layer().with_writer(std::io::stdout).with_ansi(true));

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("INFO")))
        .with(ErrorLayer::default())
        .with(file_layer)
        .with(console_layer)
        .init();

    run(cli).await
}
