//! Slurm batch status through `squeue`.
//!
//! Pilots are expected to carry their queue name in the job comment (`sbatch --comment`).
use std::future::Future;
use std::pin::Pin;

use anyhow::Context;

use crate::common::command::run_command;
use crate::config::BackendParams;
use crate::poller::aggregate::{
    BatchAggregate, RawRecord, SLURM_STATES, StateMapping, aggregate_records,
};
use crate::poller::{PollResult, StatusSource};
use crate::status::snapshot::BatchSnapshot;

const SEPARATOR: char = '|';

pub struct SlurmSource {
    cluster: Option<String>,
    user: Option<String>,
}

impl SlurmSource {
    pub fn new(params: &BackendParams) -> PollResult<Self> {
        Ok(Self {
            cluster: params.get("cluster").map(|c| c.to_string()),
            user: params.get("user").map(|u| u.to_string()),
        })
    }

    fn arguments(&self) -> Vec<String> {
        let mut arguments = vec![
            "squeue".to_string(),
            "--noheader".to_string(),
            format!("--format=%k{SEPARATOR}%T"),
        ];
        if let Some(cluster) = &self.cluster {
            arguments.push(format!("--clusters={cluster}"));
        }
        if let Some(user) = &self.user {
            arguments.push(format!("--user={user}"));
        }
        arguments
    }
}

impl StatusSource<BatchSnapshot> for SlurmSource {
    fn query(&self) -> Pin<Box<dyn Future<Output = PollResult<Vec<u8>>> + Send + '_>> {
        let arguments = self.arguments();
        Box::pin(async move { run_command(&arguments).await })
    }

    fn parse(&self, raw: &[u8]) -> PollResult<BatchAggregate> {
        parse_squeue(raw)
    }

    fn state_mapping(&self) -> &StateMapping {
        &SLURM_STATES
    }
}

fn parse_squeue(raw: &[u8]) -> PollResult<BatchAggregate> {
    let text = std::str::from_utf8(raw).context("squeue output is not valid UTF-8")?;
    let mut records = vec![];
    for line in text.lines() {
        let line = line.trim();
        // With --clusters, squeue prints a `CLUSTER: name` banner
        if line.is_empty() || line.starts_with("CLUSTER:") {
            continue;
        }
        let (comment, state) = line
            .rsplit_once(SEPARATOR)
            .with_context(|| format!("Unexpected squeue line `{line}`"))?;
        let queue = match comment.trim() {
            "" | "(null)" => None,
            comment => Some(comment.to_string()),
        };
        records.push(RawRecord::new(queue, state.trim()));
    }
    Ok(aggregate_records(records))
}

#[cfg(test)]
mod tests {
    use super::{SlurmSource, parse_squeue};
    use crate::config::BackendParams;
    use crate::poller::aggregate::SLURM_STATES;
    use crate::status::CanonicalState;

    #[test]
    fn parse_jobs() {
        let output = "CERN_T0|PENDING\nCERN_T0|RUNNING\nCERN_T0|COMPLETING\n(null)|RUNNING\n|PENDING\nmy|comment|SUSPENDED\n";
        let aggregate = parse_squeue(output.as_bytes()).unwrap();
        assert_eq!(aggregate.len(), 2);

        let counts = SLURM_STATES.apply(&aggregate["CERN_T0"]);
        assert_eq!(counts.get(CanonicalState::Pending), 1);
        assert_eq!(counts.get(CanonicalState::Running), 2);
        assert_eq!(aggregate["my|comment"]["SUSPENDED"], 1);
    }

    #[test]
    fn parse_cluster_banner() {
        let output = "CLUSTER: main\nQ|RUNNING\n";
        assert_eq!(parse_squeue(output.as_bytes()).unwrap()["Q"]["RUNNING"], 1);
    }

    #[test]
    fn parse_malformed_line() {
        assert!(parse_squeue(b"squeue: error: Invalid user").is_err());
    }

    #[test]
    fn command_arguments() {
        let params = BackendParams::from_pairs("slurm", &[("cluster", "main")]);
        let source = SlurmSource::new(&params).unwrap();
        assert_eq!(
            source.arguments(),
            vec!["squeue", "--noheader", "--format=%k|%T", "--clusters=main"]
        );
    }
}
