//! Computation of the number of pilots to submit in a cycle.
//!
//! Everything in this module is synchronous and performs no I/O: stages only look at the
//! snapshots handed to them in a [`SchedulingContext`].
pub mod pipeline;
pub mod policy;

use std::fmt::{Display, Formatter};

use crate::config::QueueConfig;
use crate::status::snapshot::{BatchSnapshot, WmsSnapshot};
use crate::status::{CanonicalState, ServiceStatus, StateCounts};

/// Inputs of a single scheduling decision.
///
/// A missing snapshot means that the backend was never polled successfully or that its
/// latest snapshot is too old to be trusted.
pub struct SchedulingContext<'a> {
    pub queue: &'a QueueConfig,
    pub wms: Option<&'a WmsSnapshot>,
    pub batch: Option<&'a BatchSnapshot>,
    pub cycle: u64,
}

impl<'a> SchedulingContext<'a> {
    pub fn new(
        queue: &'a QueueConfig,
        wms: Option<&'a WmsSnapshot>,
        batch: Option<&'a BatchSnapshot>,
        cycle: u64,
    ) -> Self {
        Self {
            queue,
            wms,
            batch,
            cycle,
        }
    }

    /// Pilots of this queue in the batch system.
    pub fn queue_pilots(&self) -> Option<StateCounts> {
        self.batch
            .map(|batch| batch.queue(&self.queue.batch_queue))
    }

    /// Pilots of every queue served by the batch backend.
    pub fn backend_pilots(&self) -> Option<StateCounts> {
        self.batch.map(|batch| batch.total())
    }

    pub fn pending_pilots(&self) -> Option<u64> {
        self.queue_pilots()
            .map(|pilots| pilots.get(CanonicalState::Pending))
    }

    /// Jobs of the queue's site that are waiting for a pilot.
    /// `None` if the WMS snapshot is missing or it does not know the site.
    pub fn ready_jobs(&self) -> Option<u64> {
        let site = self.wms?.site(&self.queue.site)?;
        Some(site.jobs.get(CanonicalState::Ready))
    }

    /// Status of the site combined with its cloud.
    /// `None` if the WMS snapshot is missing or it does not know the site.
    pub fn site_status(&self) -> Option<ServiceStatus> {
        self.wms?
            .operational_status(&self.queue.site, self.queue.cloud.as_deref())
    }
}

/// Outcome of a scheduling pipeline.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Decision {
    pub count: u64,
    /// One message per stage that was executed.
    pub trace: Vec<String>,
}

impl Decision {
    /// Decision made without running the pipeline.
    pub fn short_circuit(count: u64, reason: String) -> Self {
        Self {
            count,
            trace: vec![reason],
        }
    }
}

impl Display for Decision {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} [{}]", self.count, self.trace.join("; "))
    }
}
