//! Grouping of raw backend records and their translation into canonical states.
use crate::Map;
use crate::status::{CanonicalState, StateCounts};

/// Number of records per raw status code.
pub type RawHistogram = Map<String, u64>;

/// Raw status histograms of a batch backend, keyed by queue.
pub type BatchAggregate = Map<String, RawHistogram>;

#[derive(Debug, Default)]
pub struct RawSite {
    pub cloud: Option<String>,
    pub status: Option<String>,
    pub jobs: RawHistogram,
}

/// Raw job statistics of a WMS, keyed by site, together with raw cloud statuses.
#[derive(Debug, Default)]
pub struct WmsAggregate {
    pub sites: Map<String, RawSite>,
    pub clouds: Map<String, String>,
}

/// A single job or pilot as reported by a backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
    /// Value of the queue-correlation field, `None` if the record does not have it.
    pub queue: Option<String>,
    pub status: String,
}

impl RawRecord {
    pub fn new(queue: Option<String>, status: impl Into<String>) -> Self {
        Self {
            queue,
            status: status.into(),
        }
    }
}

/// Groups records by queue and counts occurrences of each raw status code.
///
/// Records without the queue-correlation field belong to somebody else sharing the same
/// backend and are skipped.
pub fn aggregate_records<I: IntoIterator<Item = RawRecord>>(records: I) -> BatchAggregate {
    let mut aggregate = BatchAggregate::default();
    let mut foreign = 0;
    for record in records {
        match record.queue {
            Some(queue) if !queue.is_empty() => {
                *aggregate
                    .entry(queue)
                    .or_default()
                    .entry(record.status)
                    .or_default() += 1;
            }
            _ => foreign += 1,
        }
    }
    if foreign > 0 {
        log::trace!("Skipped {foreign} record(s) without a queue-correlation field");
    }
    aggregate
}

/// Backend specific table that translates raw status codes to canonical states.
#[derive(Debug, Clone, Copy)]
pub struct StateMapping {
    name: &'static str,
    table: &'static [(&'static str, CanonicalState)],
}

impl StateMapping {
    pub const fn new(name: &'static str, table: &'static [(&'static str, CanonicalState)]) -> Self {
        Self { name, table }
    }

    pub fn map(&self, raw: &str) -> Option<CanonicalState> {
        self.table
            .iter()
            .find(|(code, _)| *code == raw)
            .map(|(_, state)| *state)
    }

    /// Translates a raw histogram. Unknown codes are logged and left out.
    pub fn apply(&self, histogram: &RawHistogram) -> StateCounts {
        let mut counts = StateCounts::default();
        for (raw, count) in histogram {
            match self.map(raw) {
                Some(state) => counts.add(state, *count),
                None => log::debug!(
                    "Ignoring {count} record(s) with unknown {} status `{raw}`",
                    self.name
                ),
            }
        }
        counts
    }
}

/// HTCondor `JobStatus` codes.
pub const CONDOR_STATES: StateMapping = StateMapping::new(
    "HTCondor",
    &[
        ("0", CanonicalState::Pending),
        ("1", CanonicalState::Pending),
        ("2", CanonicalState::Running),
        ("3", CanonicalState::Done),
        ("4", CanonicalState::Done),
        ("5", CanonicalState::Suspended),
        ("6", CanonicalState::Running),
        ("7", CanonicalState::Suspended),
    ],
);

/// PBS `job_state` letters.
pub const PBS_STATES: StateMapping = StateMapping::new(
    "PBS",
    &[
        ("Q", CanonicalState::Pending),
        ("W", CanonicalState::Pending),
        ("T", CanonicalState::Pending),
        ("H", CanonicalState::Suspended),
        ("S", CanonicalState::Suspended),
        ("U", CanonicalState::Suspended),
        ("R", CanonicalState::Running),
        ("E", CanonicalState::Running),
        ("B", CanonicalState::Running),
        ("F", CanonicalState::Done),
        ("X", CanonicalState::Done),
    ],
);

/// Slurm job states as printed by `squeue --format=%T`.
pub const SLURM_STATES: StateMapping = StateMapping::new(
    "Slurm",
    &[
        ("PENDING", CanonicalState::Pending),
        ("CONFIGURING", CanonicalState::Pending),
        ("REQUEUED", CanonicalState::Pending),
        ("RUNNING", CanonicalState::Running),
        ("COMPLETING", CanonicalState::Running),
        ("SUSPENDED", CanonicalState::Suspended),
        ("STOPPED", CanonicalState::Suspended),
        ("COMPLETED", CanonicalState::Done),
        ("CANCELLED", CanonicalState::Done),
        ("FAILED", CanonicalState::Done),
        ("TIMEOUT", CanonicalState::Done),
        ("NODE_FAIL", CanonicalState::Done),
        ("PREEMPTED", CanonicalState::Done),
        ("OUT_OF_MEMORY", CanonicalState::Done),
    ],
);

/// PanDA job states.
pub const PANDA_STATES: StateMapping = StateMapping::new(
    "PanDA",
    &[
        ("defined", CanonicalState::Pending),
        ("assigned", CanonicalState::Pending),
        ("waiting", CanonicalState::Pending),
        ("activated", CanonicalState::Ready),
        ("sent", CanonicalState::Running),
        ("starting", CanonicalState::Running),
        ("running", CanonicalState::Running),
        ("holding", CanonicalState::Running),
        ("transferring", CanonicalState::Running),
        ("merging", CanonicalState::Running),
        ("finished", CanonicalState::Done),
        ("failed", CanonicalState::Failed),
        ("cancelled", CanonicalState::Failed),
        ("closed", CanonicalState::Failed),
    ],
);

#[cfg(test)]
mod tests {
    use super::{CONDOR_STATES, RawHistogram, RawRecord, aggregate_records};
    use crate::status::CanonicalState;

    fn record(queue: Option<&str>, status: &str) -> RawRecord {
        RawRecord::new(queue.map(|q| q.to_string()), status)
    }

    #[test]
    fn aggregate_groups_by_queue() {
        let aggregate = aggregate_records(vec![
            record(Some("A"), "1"),
            record(Some("A"), "1"),
            record(Some("A"), "2"),
            record(Some("B"), "5"),
        ]);
        assert_eq!(aggregate.len(), 2);
        assert_eq!(aggregate["A"]["1"], 2);
        assert_eq!(aggregate["A"]["2"], 1);
        assert_eq!(aggregate["B"]["5"], 1);
    }

    #[test]
    fn aggregate_skips_foreign_records() {
        let aggregate = aggregate_records(vec![
            record(None, "1"),
            record(Some(""), "2"),
            record(Some("A"), "2"),
        ]);
        assert_eq!(aggregate.len(), 1);
        assert_eq!(aggregate["A"].values().sum::<u64>(), 1);
    }

    #[test]
    fn condor_mapping() {
        let histogram: RawHistogram = [("0", 1), ("1", 2), ("2", 3), ("3", 1), ("4", 1), ("5", 4)]
            .into_iter()
            .map(|(code, count)| (code.to_string(), count))
            .collect();
        let counts = CONDOR_STATES.apply(&histogram);
        assert_eq!(counts.get(CanonicalState::Pending), 3);
        assert_eq!(counts.get(CanonicalState::Running), 3);
        assert_eq!(counts.get(CanonicalState::Done), 2);
        assert_eq!(counts.get(CanonicalState::Suspended), 4);
    }

    #[test]
    fn unknown_codes_are_ignored() {
        let histogram: RawHistogram = [("42".to_string(), 7), ("2".to_string(), 1)]
            .into_iter()
            .collect();
        let counts = CONDOR_STATES.apply(&histogram);
        assert_eq!(counts.get(CanonicalState::Running), 1);
        assert_eq!(counts.in_flight(), 1);
    }
}
