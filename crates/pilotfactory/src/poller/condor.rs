//! HTCondor batch status through `condor_q -json`.
use std::future::Future;
use std::pin::Pin;

use anyhow::Context;
use bstr::ByteSlice;
use serde_json::Value;

use crate::common::command::run_command;
use crate::config::BackendParams;
use crate::poller::aggregate::{
    BatchAggregate, CONDOR_STATES, RawRecord, StateMapping, aggregate_records,
};
use crate::poller::{PollResult, StatusSource};
use crate::status::snapshot::BatchSnapshot;

/// Job attribute carrying the queue name when none is configured.
pub const DEFAULT_QUEUE_ATTRIBUTE: &str = "PilotFactoryQueue";

pub struct CondorSource {
    pool: Option<String>,
    schedd: Option<String>,
    queue_attribute: String,
    constraint: Option<String>,
}

impl CondorSource {
    pub fn new(params: &BackendParams) -> PollResult<Self> {
        let queue_attribute = params
            .get("queue_attribute")
            .unwrap_or(DEFAULT_QUEUE_ATTRIBUTE)
            .to_string();
        if queue_attribute.is_empty() || queue_attribute.contains(char::is_whitespace) {
            anyhow::bail!("Invalid HTCondor queue attribute `{queue_attribute}`");
        }
        Ok(Self {
            pool: params.get("pool").map(|p| p.to_string()),
            schedd: params.get("schedd").map(|s| s.to_string()),
            queue_attribute,
            constraint: params.get("constraint").map(|c| c.to_string()),
        })
    }

    fn arguments(&self) -> Vec<String> {
        let mut arguments = vec!["condor_q".to_string()];
        if let Some(pool) = &self.pool {
            arguments.extend(["-pool".to_string(), pool.clone()]);
        }
        if let Some(schedd) = &self.schedd {
            arguments.extend(["-name".to_string(), schedd.clone()]);
        }
        arguments.push("-allusers".to_string());
        if let Some(constraint) = &self.constraint {
            arguments.extend(["-constraint".to_string(), constraint.clone()]);
        }
        arguments.extend([
            "-json".to_string(),
            "-attributes".to_string(),
            format!("{},JobStatus", self.queue_attribute),
        ]);
        arguments
    }
}

impl StatusSource<BatchSnapshot> for CondorSource {
    fn query(&self) -> Pin<Box<dyn Future<Output = PollResult<Vec<u8>>> + Send + '_>> {
        let arguments = self.arguments();
        Box::pin(async move { run_command(&arguments).await })
    }

    fn parse(&self, raw: &[u8]) -> PollResult<BatchAggregate> {
        parse_condor_q(raw, &self.queue_attribute)
    }

    fn state_mapping(&self) -> &StateMapping {
        &CONDOR_STATES
    }
}

/// `condor_q -json` prints nothing at all when there are no jobs.
fn parse_condor_q(raw: &[u8], queue_attribute: &str) -> PollResult<BatchAggregate> {
    if raw.trim().is_empty() {
        return Ok(BatchAggregate::default());
    }
    let jobs: Vec<Value> =
        serde_json::from_slice(raw).context("Cannot parse condor_q JSON output")?;

    let mut records = Vec::with_capacity(jobs.len());
    for job in jobs {
        let status = job
            .get("JobStatus")
            .and_then(|status| status.as_u64())
            .with_context(|| format!("Job without a numeric JobStatus: {job}"))?;
        let queue = job
            .get(queue_attribute)
            .and_then(|queue| queue.as_str())
            .map(|queue| queue.to_string());
        records.push(RawRecord::new(queue, status.to_string()));
    }
    Ok(aggregate_records(records))
}
