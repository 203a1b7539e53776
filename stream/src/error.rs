use thiserror::Error;

/// 链路层可能发生的错误.
///
/// 这些错误会原样返回给发起操作的调用者, 链路层不做任何重试.
#[derive(Error, Debug)]
pub enum TransportError {
    /// 打开链路失败, 例如端口不存在、端口被占用或地址无法解析.
    #[error("打开链路 {target} 失败: {source}")]
    Open {
        target: String,
        #[source]
        source: std::io::Error,
    },
    /// 读写操作在设定的超时时间内没有完成.
    #[error("链路读写超时")]
    Timeout,
    /// 链路已经被关闭, 不能再进行读写.
    #[error("链路已关闭")]
    Closed,
    #[error("链路 I/O 错误: {0}")]
    Io(#[from] std::io::Error),
}
