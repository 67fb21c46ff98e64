use config::{Config, ConfigError, File};
use notify::{recommended_watcher, Event, RecommendedWatcher, RecursiveMode, Watcher};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use std::{env, net::SocketAddr};

use tracing::{error, info};

use crate::common::types::ServiceInstance;
use crate::selection_method::InitialPosition;
use crate::supplier::StaticSupplier;

#[derive(Debug, Deserialize)]
pub struct RawSettings {
    pub services: Vec<RawService>,
    #[serde(default)]
    pub selector: SelectorSettings,
    #[serde(default)]
    pub retry: RawRetry,
}

#[derive(Debug, Deserialize)]
pub struct RawService {
    pub name: String,
    pub listen_addr: String,
    #[serde(default)]
    pub instances: Vec<ServiceInstance>,
}

#[derive(Debug, Deserialize, Clone, Copy, Default)]
pub struct SelectorSettings {
    #[serde(default)]
    pub initial_position: InitialPosition,
}

#[derive(Debug, Deserialize)]
pub struct RawRetry {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

fn default_max_attempts() -> u32 {
    2
}

fn default_connect_timeout_ms() -> u64 {
    1000
}

impl Default for RawRetry {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetrySettings {
    /// Total connect attempts per request, the first included.
    pub max_attempts: u32,
    pub connect_timeout: Duration,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            connect_timeout: Duration::from_millis(default_connect_timeout_ms()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServiceSettings {
    pub name: String,
    pub listen_addr: SocketAddr,
    pub instances: Vec<ServiceInstance>,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub services: Vec<ServiceSettings>,
    pub selector: SelectorSettings,
    pub retry: RetrySettings,
}

impl Settings {
    /// Loads `<RUN_MODE>` (optional) and `config` (required in production)
    /// from the working directory.
    pub fn new() -> Result<Self, ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());
        let builder = Config::builder()
            .add_source(File::with_name(&run_mode).required(false))
            .add_source(File::with_name("config").required(run_mode == "production"))
            .build()?;

        Self::from_raw(builder.try_deserialize()?)
    }

    /// Reads `path` when given, otherwise the `RUN_MODE`/`config` layers of
    /// [`Settings::new`]. Only a path-loaded configuration can be handed to
    /// [`watch_config`], so reloads always come from the file that was read
    /// at startup.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::from_file(path),
            None => Self::new(),
        }
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let builder = Config::builder().add_source(File::from(path)).build()?;

        Self::from_raw(builder.try_deserialize()?)
    }

    fn from_raw(raw: RawSettings) -> Result<Self, ConfigError> {
        if raw.retry.max_attempts == 0 {
            return Err(ConfigError::Message(
                "retry.max_attempts must be at least 1".into(),
            ));
        }

        let services = raw
            .services
            .into_iter()
            .map(|service| -> Result<ServiceSettings, ConfigError> {
                let listen_addr = service.listen_addr.parse::<SocketAddr>().map_err(|e| {
                    ConfigError::Message(format!(
                        "Invalid listen address {:?} for service {}: {}",
                        service.listen_addr, service.name, e
                    ))
                })?;
                let instances = service
                    .instances
                    .into_iter()
                    .map(|instance| instance.with_default_service_id(&service.name))
                    .collect();

                Ok(ServiceSettings {
                    name: service.name,
                    listen_addr,
                    instances,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            services,
            selector: raw.selector,
            retry: RetrySettings {
                max_attempts: raw.retry.max_attempts,
                connect_timeout: Duration::from_millis(raw.retry.connect_timeout_ms),
            },
        })
    }

    pub fn instance_map(&self) -> HashMap<String, Vec<ServiceInstance>> {
        self.services
            .iter()
            .map(|service| (service.name.clone(), service.instances.clone()))
            .collect()
    }
}

/// Reloads `path` on every change and publishes its instance lists to
/// `supplier`. Pass the same path given to [`Settings::load`]. A rewrite
/// that fails to load is logged and the current instances stay in place.
/// Dropping the returned watcher stops the reloads.
pub fn watch_config(
    path: impl Into<PathBuf>,
    supplier: Arc<StaticSupplier>,
) -> Result<RecommendedWatcher, notify::Error> {
    let path = path.into();
    let reload_path = path.clone();

    let mut watcher = recommended_watcher(move |res: notify::Result<Event>| match res {
        Ok(event) if event.kind.is_modify() || event.kind.is_create() => {
            match Settings::from_file(&reload_path) {
                Ok(settings) => {
                    info!("Reloaded instances from {}", reload_path.display());
                    supplier.replace(settings.instance_map());
                }
                Err(e) => error!("Error reloading config: {:?}", e),
            }
        }
        Ok(_) => {}
        Err(e) => error!("Watch error: {:?}", e),
    })?;

    watcher.watch(&path, RecursiveMode::NonRecursive)?;

    Ok(watcher)
}
