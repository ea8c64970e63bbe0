use tracing_subscriber::{
    fmt::{self, time::ChronoUtc},
    prelude::*,
    EnvFilter,
};

/// Default filter when `RUST_LOG` is not set
pub const DEFAULT_FILTER: &str = "remotefn=debug,warn";

/// Initialize console logging. `RUST_LOG` takes precedence over `default_filter`.
pub fn init_logging(default_filter: &str) -> anyhow::Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(default_filter))?;

    let console_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_timer(ChronoUtc::rfc_3339())
        .with_writer(std::io::stderr);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .try_init()?;

    tracing::info!("Logging initialized");
    Ok(())
}

/// Initialize simple console-only logging for tests
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("remotefn=trace,debug")),
        )
        .with_test_writer()
        .try_init();
}
