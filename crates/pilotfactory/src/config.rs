//! Factory configuration.
//!
//! The TOML file is deserialized into raw structures first and then validated into the typed
//! [`FactoryConfig`], with every default resolved. A file that cannot be parsed is an error;
//! a single queue that fails validation is only reported in [`FactoryConfig::invalid`] and
//! does not prevent other queues from running.
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use crate::common::error::{PfError, config_error};
use crate::common::utils::time::deserialize_human_duration_opt;
use crate::plugins::PluginRegistry;
use crate::poller::PollerSettings;
use crate::schedule::policy::{DEFAULT_POLICIES, PolicyKind};
use crate::status::BackendIdentity;
use crate::{Map, Set};

pub const DEFAULT_CYCLE_INTERVAL: Duration = Duration::from_secs(6 * 60);
pub const DEFAULT_SUBMIT_TIMEOUT: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(60);
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_TEST_QUOTA: u64 = 1;

/// Environment variable that can be used instead of `--config`.
pub const CONFIG_ENV: &str = "PILOTFACTORY_CONFIG";

/// Keys of a WMS backend that select the site instead of identifying the backend.
const WMS_SELECTION_KEYS: [&str; 2] = ["site", "cloud"];
/// Keys of a batch backend that select the queue instead of identifying the backend.
const BATCH_SELECTION_KEYS: [&str; 1] = ["queue"];

#[derive(Debug, Clone, PartialEq)]
pub struct FactorySettings {
    pub cycle_interval: Duration,
    pub submit_timeout: Duration,
    pub shutdown_timeout: Duration,
    /// Reread the configuration file periodically.
    pub reload_interval: Option<Duration>,
}

impl Default for FactorySettings {
    fn default() -> Self {
        Self {
            cycle_interval: DEFAULT_CYCLE_INTERVAL,
            submit_timeout: DEFAULT_SUBMIT_TIMEOUT,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            reload_interval: None,
        }
    }
}

/// Polling cadence of one backend kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    pub interval: Duration,
    pub timeout: Duration,
    /// Snapshots older than this are treated as missing. Zero disables the check.
    pub max_age: Duration,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            timeout: DEFAULT_POLL_TIMEOUT,
            max_age: DEFAULT_MAX_AGE,
        }
    }
}

impl PollSettings {
    pub fn poller(&self) -> PollerSettings {
        PollerSettings {
            interval: self.interval,
            timeout: self.timeout,
        }
    }
}

/// Kind and connection parameters of a backend (WMS, batch system or submitter).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendParams {
    pub kind: String,
    pub params: BTreeMap<String, String>,
}

impl BackendParams {
    pub fn new(kind: impl Into<String>, params: BTreeMap<String, String>) -> Self {
        Self {
            kind: kind.into(),
            params,
        }
    }

    pub fn from_pairs(kind: &str, pairs: &[(&str, &str)]) -> Self {
        let params = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        Self::new(kind, params)
    }

    /// Backends with equal kind and parameters share a single poller.
    pub fn identity(&self) -> BackendIdentity {
        BackendIdentity::from_params(&self.kind, &self.params)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(|value| value.as_str())
    }

    pub fn require(&self, key: &str) -> anyhow::Result<&str> {
        self.get(key).ok_or_else(|| {
            anyhow::anyhow!("Missing parameter `{key}` of backend kind `{}`", self.kind)
        })
    }
}

/// Limits and defaults used by scheduling stages.
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyConfig {
    /// Used whenever the demand cannot be computed.
    pub default_count: u64,
    pub min_per_cycle: Option<u64>,
    pub max_per_cycle: Option<u64>,
    /// Ceiling of pending + running pilots of the queue.
    pub max_in_flight: Option<u64>,
    /// Floor of pending pilots of the queue.
    pub min_pending: Option<u64>,
    /// Ceiling of pending + running pilots of all queues of the batch backend.
    pub max_per_backend: Option<u64>,
    /// Without demand, submit only every k-th cycle.
    pub idle_suppression: Option<u64>,
    /// Treat the queue as if its site was in test mode.
    pub test_mode: bool,
    pub test_quota: u64,
    pub offline_quota: u64,
    pub scale: Option<f64>,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            default_count: 0,
            min_per_cycle: None,
            max_per_cycle: None,
            max_in_flight: None,
            min_pending: None,
            max_per_backend: None,
            idle_suppression: None,
            test_mode: false,
            test_quota: DEFAULT_TEST_QUOTA,
            offline_quota: 0,
            scale: None,
        }
    }
}

/// Validated configuration of a single logical queue.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueConfig {
    pub name: String,
    pub enabled: bool,
    pub wms: BackendParams,
    /// Site of the queue in the WMS.
    pub site: String,
    /// Overrides the cloud reported by the WMS for the site.
    pub cloud: Option<String>,
    pub wms_poll: PollSettings,
    pub batch: BackendParams,
    /// Value of the queue-correlation field of pilots in the batch system.
    pub batch_queue: String,
    pub batch_poll: PollSettings,
    pub submitter: BackendParams,
    pub policies: Vec<PolicyKind>,
    pub policy: PolicyConfig,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidQueue {
    pub name: String,
    pub reason: String,
}

impl Display for InvalidQueue {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "queue {}: {}", self.name, self.reason)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FactoryConfig {
    pub settings: FactorySettings,
    pub queues: Vec<QueueConfig>,
    pub invalid: Vec<InvalidQueue>,
}

impl FactoryConfig {
    pub fn load(path: &Path, plugins: &PluginRegistry) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|error| {
            PfError::ConfigurationError(format!(
                "Cannot read configuration file {}: {error}",
                path.display()
            ))
        })?;
        Self::parse(&content, plugins)
    }

    pub fn parse(content: &str, plugins: &PluginRegistry) -> crate::Result<Self> {
        let raw: RawConfig = toml::from_str(content)?;
        let settings = raw.factory.resolve()?;

        let mut poll = Map::default();
        for (kind, section) in raw.poll {
            let settings = section.resolve().map_err(|error| {
                PfError::ConfigurationError(format!("[poll.{kind}]: {error}"))
            })?;
            poll.insert(kind, settings);
        }

        let mut queues = Vec::with_capacity(raw.queue.len());
        let mut invalid = vec![];
        let mut names = Set::default();
        for (index, value) in raw.queue.into_iter().enumerate() {
            let name = value
                .get("name")
                .and_then(|name| name.as_str())
                .map(|name| name.to_string())
                .unwrap_or_else(|| format!("#{}", index + 1));
            let result = validate_queue(value, &poll, plugins).and_then(|queue| {
                if names.insert(queue.name.clone()) {
                    Ok(queue)
                } else {
                    config_error("duplicate queue name")
                }
            });
            match result {
                Ok(queue) => queues.push(queue),
                Err(error) => invalid.push(InvalidQueue {
                    name,
                    reason: error.to_string(),
                }),
            }
        }
        Ok(Self {
            settings,
            queues,
            invalid,
        })
    }
}

#[derive(Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    #[serde(default)]
    factory: RawFactorySection,
    #[serde(default)]
    poll: BTreeMap<String, RawPollSection>,
    #[serde(default)]
    queue: Vec<toml::Value>,
}

#[derive(Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct RawFactorySection {
    #[serde(default, deserialize_with = "deserialize_human_duration_opt")]
    cycle_interval: Option<Duration>,
    #[serde(default, deserialize_with = "deserialize_human_duration_opt")]
    submit_timeout: Option<Duration>,
    #[serde(default, deserialize_with = "deserialize_human_duration_opt")]
    shutdown_timeout: Option<Duration>,
    #[serde(default, deserialize_with = "deserialize_human_duration_opt")]
    reload_interval: Option<Duration>,
}

impl RawFactorySection {
    fn resolve(self) -> crate::Result<FactorySettings> {
        let defaults = FactorySettings::default();
        let settings = FactorySettings {
            cycle_interval: self.cycle_interval.unwrap_or(defaults.cycle_interval),
            submit_timeout: self.submit_timeout.unwrap_or(defaults.submit_timeout),
            shutdown_timeout: self.shutdown_timeout.unwrap_or(defaults.shutdown_timeout),
            reload_interval: self.reload_interval,
        };
        if settings.cycle_interval.is_zero() {
            return config_error("[factory]: cycle_interval has to be positive");
        }
        if settings.reload_interval.is_some_and(|interval| interval.is_zero()) {
            return config_error("[factory]: reload_interval has to be positive");
        }
        Ok(settings)
    }
}

#[derive(Deserialize, Default, Clone)]
#[serde(deny_unknown_fields)]
struct RawPollSection {
    #[serde(default, deserialize_with = "deserialize_human_duration_opt")]
    interval: Option<Duration>,
    #[serde(default, deserialize_with = "deserialize_human_duration_opt")]
    timeout: Option<Duration>,
    #[serde(default, deserialize_with = "deserialize_human_duration_opt")]
    max_age: Option<Duration>,
}

impl RawPollSection {
    fn resolve(self) -> Result<PollSettings, String> {
        let defaults = PollSettings::default();
        let settings = PollSettings {
            interval: self.interval.unwrap_or(defaults.interval),
            timeout: self.timeout.unwrap_or(defaults.timeout),
            max_age: self.max_age.unwrap_or(defaults.max_age),
        };
        if settings.interval.is_zero() || settings.timeout.is_zero() {
            return Err("interval and timeout have to be positive".to_string());
        }
        Ok(settings)
    }
}

/// Scalar value of a backend parameter. All of them are kept as strings.
#[derive(Deserialize)]
#[serde(untagged)]
enum ParamValue {
    String(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
}

impl Display for ParamValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ParamValue::String(value) => f.write_str(value),
            ParamValue::Integer(value) => write!(f, "{value}"),
            ParamValue::Float(value) => write!(f, "{value}"),
            ParamValue::Boolean(value) => write!(f, "{value}"),
        }
    }
}

#[derive(Deserialize)]
struct RawBackend {
    kind: String,
    #[serde(flatten)]
    params: BTreeMap<String, ParamValue>,
}

impl RawBackend {
    /// Splits the parameters into connection parameters and the given selection keys.
    fn split(self, selection_keys: &[&str]) -> (BackendParams, BTreeMap<String, String>) {
        let mut connection = BTreeMap::new();
        let mut selection = BTreeMap::new();
        for (key, value) in self.params {
            let value = value.to_string();
            if selection_keys.contains(&key.as_str()) {
                selection.insert(key, value);
            } else {
                connection.insert(key, value);
            }
        }
        (BackendParams::new(self.kind, connection), selection)
    }
}

fn default_true() -> bool {
    true
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawQueue {
    name: String,
    #[serde(default = "default_true")]
    enabled: bool,
    wms: RawBackend,
    batch: RawBackend,
    submitter: RawBackend,
    policies: Option<Vec<String>>,
    #[serde(default)]
    default_count: u64,
    min_per_cycle: Option<u64>,
    max_per_cycle: Option<u64>,
    max_in_flight: Option<u64>,
    min_pending: Option<u64>,
    max_per_backend: Option<u64>,
    idle_suppression: Option<u64>,
    #[serde(default)]
    test_mode: bool,
    test_quota: Option<u64>,
    #[serde(default)]
    offline_quota: u64,
    scale: Option<f64>,
    #[serde(default, deserialize_with = "deserialize_human_duration_opt")]
    wms_max_age: Option<Duration>,
    #[serde(default, deserialize_with = "deserialize_human_duration_opt")]
    batch_max_age: Option<Duration>,
}

fn validate_queue(
    value: toml::Value,
    poll: &Map<String, PollSettings>,
    plugins: &PluginRegistry,
) -> crate::Result<QueueConfig> {
    let raw: RawQueue = value
        .try_into()
        .map_err(|error: toml::de::Error| PfError::ConfigurationError(error.to_string()))?;

    let name = raw.name.trim().to_string();
    if name.is_empty() {
        return config_error("queue name cannot be empty");
    }

    if !plugins.has_wms_source(&raw.wms.kind) {
        return config_error(format!("unknown WMS kind `{}`", raw.wms.kind));
    }
    if !plugins.has_batch_source(&raw.batch.kind) {
        return config_error(format!("unknown batch system kind `{}`", raw.batch.kind));
    }
    if !plugins.has_submitter(&raw.submitter.kind) {
        return config_error(format!("unknown submitter kind `{}`", raw.submitter.kind));
    }

    let policies = match raw.policies {
        Some(names) => names
            .iter()
            .map(|name| PolicyKind::from_str(name))
            .collect::<crate::Result<Vec<_>>>()?,
        None => DEFAULT_POLICIES.to_vec(),
    };

    if let (Some(min), Some(max)) = (raw.min_per_cycle, raw.max_per_cycle) {
        if min > max {
            return config_error(format!(
                "min_per_cycle ({min}) is larger than max_per_cycle ({max})"
            ));
        }
    }
    if raw.idle_suppression == Some(0) {
        return config_error("idle_suppression has to be at least 1");
    }
    if let Some(scale) = raw.scale {
        if !scale.is_finite() || scale < 0.0 {
            return config_error(format!("invalid scale factor {scale}"));
        }
    }

    let (wms, mut wms_selection) = raw.wms.split(&WMS_SELECTION_KEYS);
    let (batch, mut batch_selection) = raw.batch.split(&BATCH_SELECTION_KEYS);
    let (submitter, _) = raw.submitter.split(&[]);

    let mut wms_poll = poll.get(&wms.kind).copied().unwrap_or_default();
    if let Some(max_age) = raw.wms_max_age {
        wms_poll.max_age = max_age;
    }
    let mut batch_poll = poll.get(&batch.kind).copied().unwrap_or_default();
    if let Some(max_age) = raw.batch_max_age {
        batch_poll.max_age = max_age;
    }

    Ok(QueueConfig {
        site: wms_selection.remove("site").unwrap_or_else(|| name.clone()),
        cloud: wms_selection.remove("cloud"),
        batch_queue: batch_selection
            .remove("queue")
            .unwrap_or_else(|| name.clone()),
        name,
        enabled: raw.enabled,
        wms,
        wms_poll,
        batch,
        batch_poll,
        submitter,
        policies,
        policy: PolicyConfig {
            default_count: raw.default_count,
            min_per_cycle: raw.min_per_cycle,
            max_per_cycle: raw.max_per_cycle,
            max_in_flight: raw.max_in_flight,
            min_pending: raw.min_pending,
            max_per_backend: raw.max_per_backend,
            idle_suppression: raw.idle_suppression,
            test_mode: raw.test_mode,
            test_quota: raw.test_quota.unwrap_or(DEFAULT_TEST_QUOTA),
            offline_quota: raw.offline_quota,
            scale: raw.scale,
        },
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use std::time::Duration;

    use derive_builder::Builder;

    use super::{
        BackendParams, DEFAULT_MAX_AGE, FactoryConfig, PolicyConfig, PollSettings, QueueConfig,
    };
    use crate::plugins::PluginRegistry;
    use crate::schedule::policy::{DEFAULT_POLICIES, PolicyKind};

    // Queue definitions for tests
    #[derive(Builder)]
    #[builder(pattern = "owned", build_fn(name = "finish"))]
    pub struct TestQueue {
        #[builder(default = "\"SITE_A\".to_string()", setter(into))]
        name: String,
        #[builder(default = "BackendParams::from_pairs(\"test-wms\", &[])")]
        wms: BackendParams,
        #[builder(default)]
        cloud: Option<String>,
        #[builder(default = "BackendParams::from_pairs(\"test-batch\", &[])")]
        batch: BackendParams,
        #[builder(default = "BackendParams::from_pairs(\"log\", &[])")]
        submitter: BackendParams,
        #[builder(default = "DEFAULT_POLICIES.to_vec()")]
        policies: Vec<PolicyKind>,
        #[builder(default)]
        default_count: u64,
        #[builder(default)]
        min_per_cycle: Option<u64>,
        #[builder(default)]
        max_per_cycle: Option<u64>,
        #[builder(default)]
        max_in_flight: Option<u64>,
        #[builder(default)]
        min_pending: Option<u64>,
        #[builder(default)]
        max_per_backend: Option<u64>,
        #[builder(default)]
        idle_suppression: Option<u64>,
        #[builder(default)]
        test_mode: bool,
        #[builder(default = "1")]
        test_quota: u64,
        #[builder(default)]
        offline_quota: u64,
        #[builder(default)]
        scale: Option<f64>,
        #[builder(default = "Duration::ZERO")]
        max_age: Duration,
    }

    impl TestQueueBuilder {
        pub fn build(self) -> QueueConfig {
            let queue = self.finish().unwrap();
            let poll = PollSettings {
                interval: Duration::from_secs(1),
                timeout: Duration::from_secs(1),
                max_age: queue.max_age,
            };
            QueueConfig {
                site: queue.name.clone(),
                batch_queue: queue.name.clone(),
                name: queue.name,
                enabled: true,
                wms: queue.wms,
                cloud: queue.cloud,
                wms_poll: poll,
                batch: queue.batch,
                batch_poll: poll,
                submitter: queue.submitter,
                policies: queue.policies,
                policy: PolicyConfig {
                    default_count: queue.default_count,
                    min_per_cycle: queue.min_per_cycle,
                    max_per_cycle: queue.max_per_cycle,
                    max_in_flight: queue.max_in_flight,
                    min_pending: queue.min_pending,
                    max_per_backend: queue.max_per_backend,
                    idle_suppression: queue.idle_suppression,
                    test_mode: queue.test_mode,
                    test_quota: queue.test_quota,
                    offline_quota: queue.offline_quota,
                    scale: queue.scale,
                },
            }
        }
    }

    fn parse(content: &str) -> FactoryConfig {
        FactoryConfig::parse(content, &PluginRegistry::with_defaults()).unwrap()
    }

    const FULL: &str = r#"
[factory]
cycle_interval = "2m"
submit_timeout = "30s"
reload_interval = "30m"

[poll.condor]
interval = "45s"
max_age = "3m"

[[queue]]
name = "BNL_PROD"
wms = { kind = "panda", url = "https://wms.example/stats", site = "BNL", cloud = "US" }
batch = { kind = "condor", pool = "gk01", port = 9618, queue = "BNL_PROD_Q" }
submitter = { kind = "command", command = "submit-pilots {queue} {count}" }
policies = ["activated", "site_gate", "max_in_flight"]
default_count = 2
max_in_flight = 100
batch_max_age = "10m"

[[queue]]
name = "CERN"
enabled = false
wms = { kind = "panda", url = "https://wms.example/stats" }
batch = { kind = "condor", port = 9618, pool = "gk01" }
submitter = { kind = "log" }
"#;

    #[test]
    fn parse_full_config() {
        let config = parse(FULL);
        assert!(config.invalid.is_empty());
        assert_eq!(config.settings.cycle_interval, Duration::from_secs(120));
        assert_eq!(config.settings.submit_timeout, Duration::from_secs(30));
        assert_eq!(config.settings.reload_interval, Some(Duration::from_secs(1800)));
        assert_eq!(config.queues.len(), 2);

        let bnl = &config.queues[0];
        assert_eq!(bnl.site, "BNL");
        assert_eq!(bnl.cloud.as_deref(), Some("US"));
        assert_eq!(bnl.batch_queue, "BNL_PROD_Q");
        assert_eq!(bnl.batch.get("port"), Some("9618"));
        assert_eq!(bnl.batch.get("queue"), None);
        assert_eq!(
            bnl.policies,
            vec![
                PolicyKind::ActivatedDemand,
                PolicyKind::SiteOrCloudGate,
                PolicyKind::MaxInFlight
            ]
        );
        assert_eq!(bnl.policy.default_count, 2);
        assert_eq!(bnl.policy.max_in_flight, Some(100));
        assert_eq!(bnl.policy.test_quota, 1);
        assert_eq!(bnl.batch_poll.interval, Duration::from_secs(45));
        assert_eq!(bnl.batch_poll.max_age, Duration::from_secs(600));
        assert_eq!(bnl.wms_poll, PollSettings::default());

        let cern = &config.queues[1];
        assert!(!cern.enabled);
        assert_eq!(cern.site, "CERN");
        assert_eq!(cern.batch_queue, "CERN");
        assert_eq!(cern.policies, DEFAULT_POLICIES.to_vec());
        assert_eq!(cern.batch_poll.max_age, Duration::from_secs(180));
        assert_eq!(cern.wms_poll.max_age, DEFAULT_MAX_AGE);
    }

    #[test]
    fn selection_keys_do_not_change_identity() {
        let config = parse(FULL);
        assert_eq!(
            config.queues[0].batch.identity(),
            config.queues[1].batch.identity()
        );
        assert_eq!(
            config.queues[0].wms.identity(),
            config.queues[1].wms.identity()
        );
    }

    #[test]
    fn empty_config() {
        let config = parse("");
        assert!(config.queues.is_empty());
        assert_eq!(config.settings.cycle_interval, super::DEFAULT_CYCLE_INTERVAL);
    }

    #[test]
    fn unparseable_file_is_error() {
        let plugins = PluginRegistry::with_defaults();
        assert!(FactoryConfig::parse("[factory", &plugins).is_err());
        assert!(FactoryConfig::parse("[factory]\ncycle_interval = \"soon\"", &plugins).is_err());
        assert!(FactoryConfig::parse("[unknown]\na = 1", &plugins).is_err());
    }

    #[test]
    fn invalid_queue_is_excluded() {
        let config = parse(
            r#"
[[queue]]
name = "GOOD"
wms = { kind = "panda", url = "https://wms.example" }
batch = { kind = "slurm" }
submitter = { kind = "log" }

[[queue]]
name = "BAD_POLICY"
wms = { kind = "panda", url = "https://wms.example" }
batch = { kind = "slurm" }
submitter = { kind = "log" }
policies = ["activated", "teleport"]

[[queue]]
name = "BAD_BATCH"
wms = { kind = "panda", url = "https://wms.example" }
batch = { kind = "lsf" }
submitter = { kind = "log" }

[[queue]]
name = "BAD_BOUNDS"
wms = { kind = "panda", url = "https://wms.example" }
batch = { kind = "slurm" }
submitter = { kind = "log" }
min_per_cycle = 10
max_per_cycle = 5

[[queue]]
name = "GOOD"
wms = { kind = "panda", url = "https://wms.example" }
batch = { kind = "slurm" }
submitter = { kind = "log" }

[[queue]]
wms = { kind = "panda", url = "https://wms.example" }
"#,
        );
        assert_eq!(config.queues.len(), 1);
        assert_eq!(config.queues[0].name, "GOOD");

        let invalid: Vec<(&str, &str)> = config
            .invalid
            .iter()
            .map(|queue| (queue.name.as_str(), queue.reason.as_str()))
            .collect();
        assert_eq!(invalid.len(), 5);
        assert_eq!(invalid[0].0, "BAD_POLICY");
        assert!(invalid[0].1.contains("teleport"));
        assert_eq!(invalid[1].0, "BAD_BATCH");
        assert!(invalid[1].1.contains("lsf"));
        assert_eq!(invalid[2].0, "BAD_BOUNDS");
        assert_eq!(invalid[3].0, "GOOD");
        assert!(invalid[3].1.contains("duplicate"));
        assert_eq!(invalid[4].0, "#6");
    }

    #[test]
    fn zero_idle_suppression_is_invalid() {
        let config = parse(
            r#"
[[queue]]
name = "A"
wms = { kind = "panda", url = "https://wms.example" }
batch = { kind = "slurm" }
submitter = { kind = "log" }
idle_suppression = 0
"#,
        );
        assert!(config.queues.is_empty());
        assert_eq!(config.invalid.len(), 1);
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::TempDir::with_prefix("pf").unwrap();
        let path = dir.path().join("factory.toml");
        std::fs::write(&path, FULL).unwrap();
        let config = FactoryConfig::load(&path, &PluginRegistry::with_defaults()).unwrap();
        assert_eq!(config.queues.len(), 2);

        assert!(
            FactoryConfig::load(&dir.path().join("missing.toml"), &PluginRegistry::default())
                .is_err()
        );
    }
}
