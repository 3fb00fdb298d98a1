use anyhow::Result;
use tracing_subscriber::{fmt, EnvFilter};

pub fn init(log_level: &str) -> Result<()> {
    let filter =
        EnvFilter::try_new(log_level.to_string()).unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .with_ansi(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}
