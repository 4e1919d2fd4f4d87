//! 可观测性：日志初始化
//!
//! 默认 info 级别，可通过 RUST_LOG 覆盖（如 `RUST_LOG=bee_code=debug`）。

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// 安装全局 tracing 订阅者；重复调用时静默忽略（测试中多次初始化）
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .try_init();
}
