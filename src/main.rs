use std::path::PathBuf;
use std::sync::Arc;

use color_eyre::eyre::Result;
use tracing::info;

use avoid_previous_lb::configuration::watch_config;
use avoid_previous_lb::prelude::*;
use avoid_previous_lb::proxy::Service;
use avoid_previous_lb::utils::tracing::init_tracing;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    init_tracing()?;

    // CONFIG_PATH names one file that is both loaded and watched; without
    // it the RUN_MODE/config layers are read once and never reloaded.
    let config_path = std::env::var_os("CONFIG_PATH").map(PathBuf::from);
    let settings = Settings::load(config_path.as_deref())?;
    let supplier = Arc::new(StaticSupplier::new(settings.instance_map()));

    // Only instance lists are hot-reloaded; listeners keep their addresses.
    let _watcher = match config_path {
        Some(path) => {
            info!("Watching {} for instance changes", path.display());
            Some(watch_config(path, supplier.clone())?)
        }
        None => None,
    };

    let selector: Arc<dyn ServiceSelector> = Arc::new(AvoidPreviousRoundRobin::new(
        supplier,
        settings.selector.initial_position,
    ));

    let services = settings
        .services
        .iter()
        .map(|service| {
            Service::new(
                service.name.clone(),
                service.listen_addr,
                selector.clone(),
                settings.retry,
            )
        })
        .collect();

    Server::new(services).run().await?;

    Ok(())
}
