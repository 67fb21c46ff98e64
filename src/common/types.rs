use std::fmt;
use std::sync::Arc;

use http::uri::{InvalidUri, Uri};
use serde::Deserialize;

/// A single backend endpoint of a logical service.
///
/// Two instances are the same instance when every field matches; that is
/// how the selector recognises the previous attempt's target.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
pub struct ServiceInstance {
    #[serde(default)]
    service_id: String,
    instance_id: String,
    host: String,
    port: u16,
    #[serde(default)]
    secure: bool,
}

impl ServiceInstance {
    pub fn new(
        service_id: impl Into<String>,
        instance_id: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        secure: bool,
    ) -> Self {
        Self {
            service_id: service_id.into(),
            instance_id: instance_id.into(),
            host: host.into(),
            port,
            secure,
        }
    }

    pub fn service_id(&self) -> &str {
        &self.service_id
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn is_secure(&self) -> bool {
        self.secure
    }

    pub fn scheme(&self) -> &'static str {
        if self.secure {
            "https"
        } else {
            "http"
        }
    }

    pub fn uri(&self) -> Result<Uri, InvalidUri> {
        format!("{}://{}:{}", self.scheme(), self.host, self.port).parse()
    }

    /// Instances read from a settings file may omit the service id; they
    /// inherit it from the service they are listed under.
    pub(crate) fn with_default_service_id(mut self, service_id: &str) -> Self {
        if self.service_id.is_empty() {
            self.service_id = service_id.to_owned();
        }
        self
    }
}

impl fmt::Display for ServiceInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}@{}:{}",
            self.service_id, self.instance_id, self.host, self.port
        )
    }
}

/// Per-attempt input to a selection.
///
/// `previous` is absent on a first attempt and carries the instance used by
/// the attempt before on a retry.
#[derive(Debug, Clone)]
pub struct RequestContext {
    service_id: String,
    previous: Option<Arc<ServiceInstance>>,
}

impl RequestContext {
    pub fn new(service_id: impl Into<String>) -> Self {
        Self {
            service_id: service_id.into(),
            previous: None,
        }
    }

    pub fn retry(service_id: impl Into<String>, previous: Arc<ServiceInstance>) -> Self {
        Self::new(service_id).with_previous(Some(previous))
    }

    pub fn with_previous(mut self, previous: Option<Arc<ServiceInstance>>) -> Self {
        self.previous = previous;
        self
    }

    pub fn service_id(&self) -> &str {
        &self.service_id
    }

    pub fn previous(&self) -> Option<&ServiceInstance> {
        self.previous.as_deref()
    }
}

/// Outcome of a selection: an instance, or nothing to call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    Chosen(Arc<ServiceInstance>),
    Empty,
}

impl Selection {
    pub fn is_empty(&self) -> bool {
        matches!(self, Selection::Empty)
    }

    pub fn instance(&self) -> Option<&Arc<ServiceInstance>> {
        match self {
            Selection::Chosen(instance) => Some(instance),
            Selection::Empty => None,
        }
    }

    pub fn into_instance(self) -> Option<Arc<ServiceInstance>> {
        match self {
            Selection::Chosen(instance) => Some(instance),
            Selection::Empty => None,
        }
    }
}
