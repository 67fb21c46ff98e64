use color_eyre::eyre::Result;

use tracing_error::ErrorLayer;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

/// Installs the global subscriber. Verbosity comes from `RUST_LOG` and
/// falls back to `info`.
pub fn init_tracing() -> Result<()> {
    let fmt_layer = fmt::layer().with_target(false);

    let filter_layer: EnvFilter =
        EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info"))?;

    // ErrorLayer lets eyre reports capture the active span trace
    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .with(ErrorLayer::default())
        .try_init()?;

    Ok(())
}
