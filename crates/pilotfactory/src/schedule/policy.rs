use std::fmt::{Display, Formatter};
use std::str::FromStr;

use crate::common::error::config_error;
use crate::schedule::SchedulingContext;
use crate::status::ServiceStatus;

/// Result of a single stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageOutcome {
    pub count: u64,
    pub reason: String,
}

impl StageOutcome {
    fn new(count: u64, reason: impl Into<String>) -> Self {
        Self {
            count,
            reason: reason.into(),
        }
    }

    fn unchanged(count: u64) -> Self {
        Self::new(count, "unchanged")
    }
}

/// One step of a scheduling pipeline.
///
/// Stages receive the count proposed by the previous stage and return an adjusted one.
/// They must not fail on missing snapshots; they fall back to the configured defaults instead.
pub trait PolicyStage: Send + Sync {
    fn name(&self) -> &'static str;

    fn apply(&self, ctx: &SchedulingContext, proposed: u64) -> StageOutcome;
}

/// Names of the available stages, as used in the configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PolicyKind {
    ActivatedDemand,
    MaxInFlight,
    MinPending,
    PerCycleBounds,
    MaxPerBackend,
    SiteOrCloudGate,
    CycleSuppression,
    Scale,
    Fixed,
}

/// Stage order used when a queue does not configure one. Ceilings come before floors.
pub const DEFAULT_POLICIES: [PolicyKind; 7] = [
    PolicyKind::ActivatedDemand,
    PolicyKind::SiteOrCloudGate,
    PolicyKind::CycleSuppression,
    PolicyKind::MaxInFlight,
    PolicyKind::MaxPerBackend,
    PolicyKind::MinPending,
    PolicyKind::PerCycleBounds,
];

impl PolicyKind {
    pub const ALL: [PolicyKind; 9] = [
        PolicyKind::ActivatedDemand,
        PolicyKind::MaxInFlight,
        PolicyKind::MinPending,
        PolicyKind::PerCycleBounds,
        PolicyKind::MaxPerBackend,
        PolicyKind::SiteOrCloudGate,
        PolicyKind::CycleSuppression,
        PolicyKind::Scale,
        PolicyKind::Fixed,
    ];

    pub fn name(self) -> &'static str {
        match self {
            PolicyKind::ActivatedDemand => "activated",
            PolicyKind::MaxInFlight => "max_in_flight",
            PolicyKind::MinPending => "min_pending",
            PolicyKind::PerCycleBounds => "per_cycle",
            PolicyKind::MaxPerBackend => "max_per_backend",
            PolicyKind::SiteOrCloudGate => "site_gate",
            PolicyKind::CycleSuppression => "cycle_suppression",
            PolicyKind::Scale => "scale",
            PolicyKind::Fixed => "fixed",
        }
    }

    pub fn create_stage(self) -> Box<dyn PolicyStage> {
        match self {
            PolicyKind::ActivatedDemand => Box::new(ActivatedDemand),
            PolicyKind::MaxInFlight => Box::new(MaxInFlight),
            PolicyKind::MinPending => Box::new(MinPending),
            PolicyKind::PerCycleBounds => Box::new(PerCycleBounds),
            PolicyKind::MaxPerBackend => Box::new(MaxPerBackend),
            PolicyKind::SiteOrCloudGate => Box::new(SiteOrCloudGate),
            PolicyKind::CycleSuppression => Box::new(CycleSuppression),
            PolicyKind::Scale => Box::new(Scale),
            PolicyKind::Fixed => Box::new(Fixed),
        }
    }
}

impl FromStr for PolicyKind {
    type Err = crate::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let value = value.trim();
        match PolicyKind::ALL.iter().find(|kind| kind.name() == value) {
            Some(kind) => Ok(*kind),
            None => config_error(format!(
                "unknown policy `{value}`, expected one of: {}",
                PolicyKind::ALL
                    .iter()
                    .map(|kind| kind.name())
                    .collect::<Vec<_>>()
                    .join(", ")
            )),
        }
    }
}

impl Display for PolicyKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Submits one pilot for every job waiting in the WMS that is not yet covered by a pending
/// pilot.
pub struct ActivatedDemand;

impl PolicyStage for ActivatedDemand {
    fn name(&self) -> &'static str {
        PolicyKind::ActivatedDemand.name()
    }

    fn apply(&self, ctx: &SchedulingContext, _proposed: u64) -> StageOutcome {
        let default = ctx.queue.policy.default_count;
        if ctx.wms.is_none() {
            return StageOutcome::new(default, "WMS status missing, using default");
        }
        let Some(pending) = ctx.pending_pilots() else {
            return StageOutcome::new(default, "batch status missing, using default");
        };
        match ctx.site_status() {
            None => StageOutcome::new(default, "site unknown to the WMS, using default"),
            Some(status) if status.is_down() => {
                StageOutcome::new(default, format!("site is {status}, using default"))
            }
            Some(_) => {
                let ready = ctx.ready_jobs().unwrap_or(0);
                StageOutcome::new(
                    ready.saturating_sub(pending),
                    format!("ready={ready}, pending={pending}"),
                )
            }
        }
    }
}

/// Caps pending + running pilots of the queue.
pub struct MaxInFlight;

impl PolicyStage for MaxInFlight {
    fn name(&self) -> &'static str {
        PolicyKind::MaxInFlight.name()
    }

    fn apply(&self, ctx: &SchedulingContext, proposed: u64) -> StageOutcome {
        let Some(ceiling) = ctx.queue.policy.max_in_flight else {
            return StageOutcome::unchanged(proposed);
        };
        match ctx.queue_pilots() {
            Some(pilots) => {
                let in_flight = pilots.in_flight();
                StageOutcome::new(
                    proposed.min(ceiling.saturating_sub(in_flight)),
                    format!("ceiling={ceiling}, in_flight={in_flight}"),
                )
            }
            None => StageOutcome::new(
                proposed.min(ctx.queue.policy.default_count),
                "batch status missing, capped by default",
            ),
        }
    }
}

/// Keeps at least the configured number of pilots pending.
pub struct MinPending;

impl PolicyStage for MinPending {
    fn name(&self) -> &'static str {
        PolicyKind::MinPending.name()
    }

    fn apply(&self, ctx: &SchedulingContext, proposed: u64) -> StageOutcome {
        let Some(floor) = ctx.queue.policy.min_pending else {
            return StageOutcome::unchanged(proposed);
        };
        match ctx.pending_pilots() {
            Some(pending) => StageOutcome::new(
                proposed.max(floor.saturating_sub(pending)),
                format!("floor={floor}, pending={pending}"),
            ),
            None => StageOutcome::new(proposed, "batch status missing, unchanged"),
        }
    }
}

pub struct PerCycleBounds;

impl PolicyStage for PerCycleBounds {
    fn name(&self) -> &'static str {
        PolicyKind::PerCycleBounds.name()
    }

    fn apply(&self, ctx: &SchedulingContext, proposed: u64) -> StageOutcome {
        let policy = &ctx.queue.policy;
        let mut count = proposed;
        if let Some(max) = policy.max_per_cycle {
            count = count.min(max);
        }
        // Minimum goes last, so it wins over an inconsistent maximum
        if let Some(min) = policy.min_per_cycle {
            count = count.max(min);
        }
        StageOutcome::new(
            count,
            format!(
                "bounds=[{}, {}]",
                policy.min_per_cycle.unwrap_or(0),
                policy
                    .max_per_cycle
                    .map(|max| max.to_string())
                    .unwrap_or_else(|| "-".to_string())
            ),
        )
    }
}

/// Caps pending + running pilots of all queues sharing the batch backend.
pub struct MaxPerBackend;

impl PolicyStage for MaxPerBackend {
    fn name(&self) -> &'static str {
        PolicyKind::MaxPerBackend.name()
    }

    fn apply(&self, ctx: &SchedulingContext, proposed: u64) -> StageOutcome {
        let Some(ceiling) = ctx.queue.policy.max_per_backend else {
            return StageOutcome::unchanged(proposed);
        };
        match ctx.backend_pilots() {
            Some(pilots) => {
                let total = pilots.in_flight();
                StageOutcome::new(
                    proposed.min(ceiling.saturating_sub(total)),
                    format!("ceiling={ceiling}, backend_total={total}"),
                )
            }
            None => StageOutcome::new(
                proposed.min(ctx.queue.policy.default_count),
                "batch status missing, capped by default",
            ),
        }
    }
}

/// Overrides the demand for sites that are not fully online.
pub struct SiteOrCloudGate;

impl PolicyStage for SiteOrCloudGate {
    fn name(&self) -> &'static str {
        PolicyKind::SiteOrCloudGate.name()
    }

    fn apply(&self, ctx: &SchedulingContext, proposed: u64) -> StageOutcome {
        let policy = &ctx.queue.policy;
        let status = match ctx.site_status() {
            _ if policy.test_mode => Some(ServiceStatus::Test),
            status => status,
        };
        match status {
            Some(status @ (ServiceStatus::Offline | ServiceStatus::Error)) => StageOutcome::new(
                policy.offline_quota,
                format!("site is {status}, offline quota"),
            ),
            Some(ServiceStatus::Test) => {
                let pending = ctx.pending_pilots().unwrap_or(0);
                StageOutcome::new(
                    policy.test_quota.saturating_sub(pending),
                    format!("test mode, quota={}, pending={pending}", policy.test_quota),
                )
            }
            Some(ServiceStatus::Online) | None => StageOutcome::unchanged(proposed),
        }
    }
}

/// Without demand, lets pilots through only in every k-th cycle.
pub struct CycleSuppression;

impl PolicyStage for CycleSuppression {
    fn name(&self) -> &'static str {
        PolicyKind::CycleSuppression.name()
    }

    fn apply(&self, ctx: &SchedulingContext, proposed: u64) -> StageOutcome {
        let policy = &ctx.queue.policy;
        let modulus = match policy.idle_suppression {
            Some(modulus) if modulus > 1 => modulus,
            _ => return StageOutcome::unchanged(proposed),
        };
        if ctx.wms.is_none() {
            return StageOutcome::new(proposed, "WMS status missing, unchanged");
        }
        if ctx.ready_jobs().unwrap_or(0) > 0 {
            return StageOutcome::unchanged(proposed);
        }
        if ctx.cycle % modulus == 0 {
            StageOutcome::new(
                proposed.max(policy.default_count),
                format!("no demand, cycle {} allowed", ctx.cycle),
            )
        } else {
            StageOutcome::new(0, format!("no demand, cycle {} suppressed", ctx.cycle))
        }
    }
}

/// Multiplies the proposal by a constant factor, rounding down.
pub struct Scale;

impl PolicyStage for Scale {
    fn name(&self) -> &'static str {
        PolicyKind::Scale.name()
    }

    fn apply(&self, ctx: &SchedulingContext, proposed: u64) -> StageOutcome {
        match ctx.queue.policy.scale {
            Some(factor) => {
                let scaled = (proposed as f64 * factor).floor().max(0.0) as u64;
                StageOutcome::new(scaled, format!("factor={factor}"))
            }
            None => StageOutcome::unchanged(proposed),
        }
    }
}

/// Always proposes the default count.
pub struct Fixed;

impl PolicyStage for Fixed {
    fn name(&self) -> &'static str {
        PolicyKind::Fixed.name()
    }

    fn apply(&self, ctx: &SchedulingContext, _proposed: u64) -> StageOutcome {
        StageOutcome::new(ctx.queue.policy.default_count, "fixed default")
    }
}
