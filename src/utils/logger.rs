use chrono::Local;
use env_logger::{Builder, Env};
use std::io::Write;

/// Initialise the global logger. Level defaults to `info` and follows `RUST_LOG` when set.
pub fn setup_logger() {
    let mut builder = Builder::from_env(Env::default().default_filter_or("info"));
    builder.format(|buf, record| {
        writeln!(
            buf,
            "{} [{}] {}: {}",
            Local::now().format("%Y-%m-%dT%H:%M:%S%.3f"),
            record.level(),
            record.target(),
            record.args()
        )
    });
    // A second call (tests, embedding) keeps the first logger.
    let _ = builder.try_init();
}
