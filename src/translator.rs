//! Event translator: turns store notifications into work-queue keys
//!
//! Every notification results in exactly one `add`; collapsing duplicates is the
//! queue's job.

use opentelemetry::KeyValue;
use tracing::{debug, warn};

use crate::crd::Kubexpose;
use crate::informer::{ResourceEvent, ResourceEventHandler};
use crate::metrics;
use crate::queue::WorkQueue;
use crate::store::object_key;

/// Pushes the key of every Kubexpose event onto the work queue
pub struct EventTranslator {
    queue: WorkQueue<String>,
}

impl EventTranslator {
    /// Create a translator feeding `queue`
    pub fn new(queue: WorkQueue<String>) -> Self {
        Self { queue }
    }
}

impl ResourceEventHandler<Kubexpose> for EventTranslator {
    fn on_event(&self, event: ResourceEvent<Kubexpose>) {
        let kind = event.kind();
        metrics::EVENTS_TOTAL.add(1, &[KeyValue::new("kind", kind)]);

        let Some(key) = object_key(event.object().as_ref()) else {
            warn!(event = kind, "Dropping Kubexpose event without a name");
            return;
        };

        debug!(key = %key, event = kind, "Kubexpose event");
        self.queue.add(key);
    }
}
