use protocol::{CommandType, DateTimeValue, SensorCallback};
use tracing::{info, warn};

/// 把设备的所有响应写入日志的回调实现.
///
/// 采样数据和设备日志使用独立的 target, 可以通过 `RUST_LOG` 单独过滤.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingSink;

impl SensorCallback for LoggingSink {
    fn received_data(&self, data: &[u8]) {
        info!(target: "sensorlink::sample", len = data.len(), "{:02X?}", data);
    }

    fn received_log(&self, log: &[u8]) {
        info!(target: "sensorlink::device_log", "{}", String::from_utf8_lossy(log));
    }

    fn read_configuration(&self, configuration: &[u8]) {
        info!(len = configuration.len(), "设备配置: {:02X?}", configuration);
    }

    fn write_configuration(&self) {
        info!("设备配置已写入");
    }

    fn read_date_time(&self, value: DateTimeValue) {
        info!("设备时钟: {}", value);
    }

    fn write_date_time(&self) {
        info!("设备时钟已设置");
    }

    fn battery_status(&self, value: u32) {
        info!(battery = value, "电池状态");
    }

    fn command_failed(&self, original: CommandType, error_code: u8) {
        warn!(%original, error_code, "设备拒绝了命令");
    }
}
