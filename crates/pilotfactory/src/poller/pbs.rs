//! PBS Pro batch status through `qstat -f -F json`.
use std::future::Future;
use std::pin::Pin;

use anyhow::Context;
use bstr::ByteSlice;
use serde_json::Value;

use crate::common::command::run_command;
use crate::config::BackendParams;
use crate::poller::aggregate::{
    BatchAggregate, PBS_STATES, RawRecord, StateMapping, aggregate_records,
};
use crate::poller::{PollResult, StatusSource};
use crate::status::snapshot::BatchSnapshot;

/// Environment variable (inside `Variable_List`) carrying the queue name.
pub const DEFAULT_QUEUE_VARIABLE: &str = "PF_QUEUE";

pub struct PbsSource {
    server: Option<String>,
    queue_variable: String,
}

impl PbsSource {
    pub fn new(params: &BackendParams) -> PollResult<Self> {
        Ok(Self {
            server: params.get("server").map(|s| s.to_string()),
            queue_variable: params
                .get("queue_variable")
                .unwrap_or(DEFAULT_QUEUE_VARIABLE)
                .to_string(),
        })
    }

    fn arguments(&self) -> Vec<String> {
        let mut arguments = vec![
            "qstat".to_string(),
            "-f".to_string(),
            "-F".to_string(),
            "json".to_string(),
        ];
        if let Some(server) = &self.server {
            arguments.push(format!("@{server}"));
        }
        arguments
    }
}

impl StatusSource<BatchSnapshot> for PbsSource {
    fn query(&self) -> Pin<Box<dyn Future<Output = PollResult<Vec<u8>>> + Send + '_>> {
        let arguments = self.arguments();
        Box::pin(async move { run_command(&arguments).await })
    }

    fn parse(&self, raw: &[u8]) -> PollResult<BatchAggregate> {
        parse_qstat(raw, &self.queue_variable)
    }

    fn state_mapping(&self) -> &StateMapping {
        &PBS_STATES
    }
}

/// The `Jobs` key is missing altogether when the server has no jobs.
fn parse_qstat(raw: &[u8], queue_variable: &str) -> PollResult<BatchAggregate> {
    // qstat escapes some characters incorrectly, replace invalid UTF-8 before parsing
    let text = raw.to_str_lossy();
    let data: Value = serde_json::from_str(&text).context("Cannot parse qstat JSON output")?;
    let root = data
        .as_object()
        .context("qstat output is not a JSON object")?;

    let Some(jobs) = root.get("Jobs") else {
        return Ok(BatchAggregate::default());
    };
    let jobs = jobs
        .as_object()
        .context("`Jobs` in qstat output is not an object")?;

    let mut records = Vec::with_capacity(jobs.len());
    for (id, job) in jobs {
        let status = job
            .get("job_state")
            .and_then(|state| state.as_str())
            .with_context(|| format!("Job {id} has no job_state"))?;
        let queue = job
            .get("Variable_List")
            .and_then(|variables| variables.get(queue_variable))
            .and_then(|queue| queue.as_str())
            .map(|queue| queue.to_string());
        records.push(RawRecord::new(queue, status));
    }
    Ok(aggregate_records(records))
}
