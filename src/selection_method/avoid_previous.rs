use tracing::{debug, trace};

use super::round_robin::{InitialPosition, RoundRobin};
use super::ServiceSelector;
use crate::common::types::{RequestContext, Selection};
use crate::supplier::InstanceSupplier;

/// Round-robin selection that steps past the instance used by the previous
/// attempt of the same request.
///
/// When the natural pick equals the previous instance, the next candidate
/// in rotation order is returned instead. Only one step is taken, so with
/// three or more candidates the shift always lands on the immediate
/// successor. A single candidate is returned even if it repeats.
pub struct AvoidPreviousRoundRobin<S> {
    supplier: S,
    rotation: RoundRobin,
}

impl<S: InstanceSupplier> AvoidPreviousRoundRobin<S> {
    pub fn new(supplier: S, initial: InitialPosition) -> Self {
        Self {
            supplier,
            rotation: RoundRobin::new(initial),
        }
    }

    pub fn supplier(&self) -> &S {
        &self.supplier
    }
}

impl<S: InstanceSupplier> ServiceSelector for AvoidPreviousRoundRobin<S> {
    #[tracing::instrument(
        name = "Choose instance",
        level = "debug",
        skip_all,
        fields(service_id = %context.service_id())
    )]
    fn choose(&self, context: &RequestContext) -> Selection {
        let candidates = self.supplier.instances(context.service_id());
        if candidates.is_empty() {
            debug!("No instances available");
            return Selection::Empty;
        }

        let len = candidates.len();
        let mut position = self.rotation.next(context.service_id()) % len;

        if let Some(previous) = context.previous() {
            if len > 1 && *candidates[position] == *previous {
                trace!(%previous, "Natural pick repeats previous instance, stepping forward");
                position = (position + 1) % len;
            }
        }

        let chosen = candidates[position].clone();
        debug!(position, instance = %chosen, "Selected instance");
        self.supplier.selected(&chosen);

        Selection::Chosen(chosen)
    }
}
