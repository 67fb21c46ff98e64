//! Client-side round-robin load balancing that steers retries away from
//! the instance the previous attempt used.

pub mod common;
pub mod configuration;
pub mod proxy;
pub mod selection_method;
pub mod supplier;
pub mod utils;

pub mod prelude {
    pub use crate::common::types::{RequestContext, Selection, ServiceInstance};
    pub use crate::configuration::Settings;
    pub use crate::proxy::Server;
    pub use crate::selection_method::{AvoidPreviousRoundRobin, InitialPosition, ServiceSelector};
    pub use crate::supplier::{InstanceSupplier, StaticSupplier};
}
