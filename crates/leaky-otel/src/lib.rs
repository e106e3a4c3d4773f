use once_cell::sync::OnceCell;
use tracing_subscriber::{
    fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
    EnvFilter,
};

static FILE_GUARD: OnceCell<tracing_appender::non_blocking::WorkerGuard> = OnceCell::new();

/// Install the global subscriber: stderr console output filtered by
/// `RUST_LOG` (default `info`), plus a rolling file log when `LEAKY_LOG_ROLL=1`.
///
/// Safe to call more than once; later calls are no-ops.
pub fn init() {
    init_with_default("info");
}

pub fn init_with_default(default_directive: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));
    let console = fmt::layer()
        .with_writer(std::io::stderr)
        .with_filter(filter);
    let registry = tracing_subscriber::registry().with(console);

    if matches!(leaky_core::env_flag("LEAKY_LOG_ROLL"), Ok(Some(true))) {
        let settings = RollSettings::from_env();
        if std::fs::create_dir_all(&settings.dir).is_err() {
            eprintln!("failed to create log directory {}", settings.dir);
        }
        let writer = match settings.rotation.as_str() {
            "hourly" => tracing_appender::rolling::hourly(&settings.dir, &settings.prefix),
            "minutely" => tracing_appender::rolling::minutely(&settings.dir, &settings.prefix),
            _ => tracing_appender::rolling::daily(&settings.dir, &settings.prefix),
        };
        let (nb, guard) = tracing_appender::non_blocking(writer);
        let _ = FILE_GUARD.set(guard);
        let file_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(default_directive));
        let file_layer = fmt::layer()
            .with_ansi(false)
            .with_writer(nb)
            .with_filter(file_filter);
        let _ = registry.with(file_layer).try_init();
    } else {
        let _ = registry.try_init();
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct RollSettings {
    dir: String,
    prefix: String,
    rotation: String,
}

impl RollSettings {
    fn from_env() -> Self {
        Self {
            dir: std::env::var("LEAKY_LOG_DIR").unwrap_or_else(|_| "logs".to_string()),
            prefix: std::env::var("LEAKY_LOG_PREFIX").unwrap_or_else(|_| "leaky".into()),
            rotation: std::env::var("LEAKY_LOG_ROTATION")
                .unwrap_or_else(|_| "daily".into())
                .to_ascii_lowercase(),
        }
    }
}
