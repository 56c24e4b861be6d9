pub mod api;
pub mod core;

/// 安装 env_logger（可重复调用），级别由 RUST_LOG 控制，缺省 info
pub fn init_logging() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .try_init();
}
