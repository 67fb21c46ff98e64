use crate::common::types::{RequestContext, Selection};

pub mod avoid_previous;
pub mod round_robin;

pub use avoid_previous::AvoidPreviousRoundRobin;
pub use round_robin::{InitialPosition, RoundRobin};

/// Picks the instance a single request attempt should go to.
pub trait ServiceSelector: Send + Sync {
    fn choose(&self, context: &RequestContext) -> Selection;
}
