/// Install the global logger. `RUST_LOG`, when set, overrides `level`.
pub fn init(level: &str) {
    let mut builder = env_logger::Builder::new();
    builder.parse_filters(level);
    if let Ok(filters) = std::env::var("RUST_LOG") {
        builder.parse_filters(&filters);
    }
    builder.format_timestamp_millis();
    if builder.try_init().is_err() {
        log::debug!("Logger already installed");
    }
}
