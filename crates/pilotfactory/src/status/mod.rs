//! Status vocabulary shared by pollers and scheduling policies.
//!
//! Every backend-specific status code is mapped into a [`CanonicalState`] before any policy
//! looks at it, so that policies never have to know which batch system or WMS they talk to.
pub mod cache;
pub mod snapshot;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CanonicalState {
    Pending,
    Running,
    Suspended,
    Done,
    Ready,
    Failed,
}

impl CanonicalState {
    pub const ALL: [CanonicalState; 6] = [
        CanonicalState::Pending,
        CanonicalState::Running,
        CanonicalState::Suspended,
        CanonicalState::Done,
        CanonicalState::Ready,
        CanonicalState::Failed,
    ];

    fn index(self) -> usize {
        match self {
            CanonicalState::Pending => 0,
            CanonicalState::Running => 1,
            CanonicalState::Suspended => 2,
            CanonicalState::Done => 3,
            CanonicalState::Ready => 4,
            CanonicalState::Failed => 5,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CanonicalState::Pending => "pending",
            CanonicalState::Running => "running",
            CanonicalState::Suspended => "suspended",
            CanonicalState::Done => "done",
            CanonicalState::Ready => "ready",
            CanonicalState::Failed => "failed",
        }
    }
}

impl Display for CanonicalState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Number of jobs (or pilots) in each canonical state.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct StateCounts([u64; CanonicalState::ALL.len()]);

impl StateCounts {
    #[inline]
    pub fn get(&self, state: CanonicalState) -> u64 {
        self.0[state.index()]
    }

    #[inline]
    pub fn add(&mut self, state: CanonicalState, count: u64) {
        let slot = &mut self.0[state.index()];
        *slot = slot.saturating_add(count);
    }

    pub fn merge(&mut self, other: &StateCounts) {
        for state in CanonicalState::ALL {
            self.add(state, other.get(state));
        }
    }

    /// Pilots that are either waiting in the batch queue or already running.
    pub fn in_flight(&self) -> u64 {
        self.get(CanonicalState::Pending)
            .saturating_add(self.get(CanonicalState::Running))
    }

    pub fn is_empty(&self) -> bool {
        self.0.iter().all(|&count| count == 0)
    }
}

impl FromIterator<(CanonicalState, u64)> for StateCounts {
    fn from_iter<T: IntoIterator<Item = (CanonicalState, u64)>>(iter: T) -> Self {
        let mut counts = StateCounts::default();
        for (state, count) in iter {
            counts.add(state, count);
        }
        counts
    }
}

impl Display for StateCounts {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let mut first = true;
        for state in CanonicalState::ALL {
            let count = self.get(state);
            if count > 0 {
                if !first {
                    f.write_str(", ")?;
                }
                write!(f, "{state}={count}")?;
                first = false;
            }
        }
        if first {
            f.write_str("empty")?;
        }
        Ok(())
    }
}

/// Operational status of a WMS site or cloud.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    Online,
    Offline,
    Test,
    Error,
}

impl ServiceStatus {
    /// Maps a raw status string reported by the WMS.
    /// Unknown values are treated as errors, so that no pilots are sent to a site in an
    /// unexpected state.
    pub fn from_raw(raw: &str) -> ServiceStatus {
        match raw.trim().to_ascii_lowercase().as_str() {
            "online" => ServiceStatus::Online,
            "offline" | "brokeroff" => ServiceStatus::Offline,
            "test" => ServiceStatus::Test,
            "error" => ServiceStatus::Error,
            other => {
                log::debug!("Unknown WMS service status `{other}`, treating it as error");
                ServiceStatus::Error
            }
        }
    }

    /// Offline and failing services must not receive demand-based submissions.
    pub fn is_down(self) -> bool {
        matches!(self, ServiceStatus::Offline | ServiceStatus::Error)
    }

    fn severity(self) -> u8 {
        match self {
            ServiceStatus::Online => 0,
            ServiceStatus::Test => 1,
            ServiceStatus::Offline => 2,
            ServiceStatus::Error => 3,
        }
    }

    /// Combines the status of a site with the status of its cloud.
    pub fn worst(self, other: ServiceStatus) -> ServiceStatus {
        if other.severity() > self.severity() {
            other
        } else {
            self
        }
    }
}

impl Display for ServiceStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ServiceStatus::Online => "online",
            ServiceStatus::Offline => "offline",
            ServiceStatus::Test => "test",
            ServiceStatus::Error => "error",
        })
    }
}

/// Identifies one physical backend (a batch scheduler or a WMS endpoint).
///
/// Two queues whose backends have the same kind and the same connection parameters share the
/// identity, and therefore a single poller and a single cached snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BackendIdentity {
    kind: String,
    params: BTreeMap<String, String>,
}

impl BackendIdentity {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            params: Default::default(),
        }
    }

    /// Builds the identity from connection parameters.
    /// Surrounding whitespace of values is ignored.
    pub fn from_params(kind: &str, params: &BTreeMap<String, String>) -> Self {
        let mut identity = Self::new(kind);
        for (key, value) in params {
            identity = identity.with_param(key, value);
        }
        identity
    }

    pub fn with_param(mut self, key: impl Into<String>, value: &str) -> Self {
        self.params.insert(key.into(), value.trim().to_string());
        self
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn params(&self) -> &BTreeMap<String, String> {
        &self.params
    }
}

impl Display for BackendIdentity {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.kind)?;
        if self.params.is_empty() {
            return Ok(());
        }
        f.write_str("[")?;
        for (index, (key, value)) in self.params.iter().enumerate() {
            if index > 0 {
                f.write_str(",")?;
            }
            write!(f, "{key}={value}")?;
        }
        f.write_str("]")
    }
}

#[cfg(test)]
mod tests {
    use super::{BackendIdentity, CanonicalState, ServiceStatus, StateCounts};
    use std::collections::BTreeMap;

    #[test]
    fn identity_ignores_parameter_order() {
        let a: BTreeMap<String, String> = [("pool", "gk01"), ("schedd", "s1")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let b: BTreeMap<String, String> = [("schedd", "s1 "), ("pool", "gk01")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let id_a = BackendIdentity::from_params("condor", &a);
        assert_eq!(id_a, BackendIdentity::from_params("condor", &b));
        assert_ne!(id_a, BackendIdentity::from_params("pbs", &b));
        assert_eq!(id_a.to_string(), "condor[pool=gk01,schedd=s1]");
    }

    #[test]
    fn identity_does_not_mix_up_separators_in_values() {
        let joined: BTreeMap<String, String> = [("a".to_string(), "1,b=2".to_string())]
            .into_iter()
            .collect();
        let split: BTreeMap<String, String> = [("a", "1"), ("b", "2")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        assert_ne!(
            BackendIdentity::from_params("condor", &joined),
            BackendIdentity::from_params("condor", &split)
        );
        assert_eq!(
            BackendIdentity::new("condor")
                .with_param("a", "1")
                .with_param("b", "2"),
            BackendIdentity::from_params("condor", &split)
        );
    }

    #[test]
    fn state_counts_in_flight() {
        let counts: StateCounts = [
            (CanonicalState::Pending, 10),
            (CanonicalState::Running, 5),
            (CanonicalState::Done, 100),
            (CanonicalState::Pending, 1),
        ]
        .into_iter()
        .collect();
        assert_eq!(counts.get(CanonicalState::Pending), 11);
        assert_eq!(counts.in_flight(), 16);
        assert_eq!(counts.to_string(), "pending=11, running=5, done=100");
        assert_eq!(StateCounts::default().to_string(), "empty");
    }

    #[test]
    fn service_status_parse() {
        assert_eq!(ServiceStatus::from_raw("Online"), ServiceStatus::Online);
        assert_eq!(ServiceStatus::from_raw("brokeroff"), ServiceStatus::Offline);
        assert_eq!(ServiceStatus::from_raw("test"), ServiceStatus::Test);
        assert_eq!(ServiceStatus::from_raw("weird"), ServiceStatus::Error);
    }

    #[test]
    fn service_status_worst() {
        assert_eq!(
            ServiceStatus::Online.worst(ServiceStatus::Test),
            ServiceStatus::Test
        );
        assert_eq!(
            ServiceStatus::Offline.worst(ServiceStatus::Test),
            ServiceStatus::Offline
        );
        assert!(ServiceStatus::Error.is_down());
        assert!(!ServiceStatus::Test.is_down());
    }
}
