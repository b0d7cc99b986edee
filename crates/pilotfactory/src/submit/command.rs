use std::future::Future;
use std::pin::Pin;

use anyhow::Context;
use bstr::ByteSlice;

use crate::common::command::run_command;
use crate::config::{BackendParams, QueueConfig};
use crate::submit::{SubmissionReceipt, SubmitResult, Submitter};

/// Runs an external program for every submission.
///
/// The `command` parameter is split on whitespace; `{queue}`, `{site}`, `{batch_queue}` and
/// `{count}` placeholders are replaced in every argument. The first line of stdout is kept as
/// the receipt detail.
pub struct CommandSubmitter {
    template: Vec<String>,
}

impl CommandSubmitter {
    pub fn new(params: &BackendParams) -> SubmitResult<Self> {
        let template: Vec<String> = params
            .require("command")?
            .split_whitespace()
            .map(|arg| arg.to_string())
            .collect();
        if template.is_empty() {
            anyhow::bail!("Submission command cannot be empty");
        }
        Ok(Self { template })
    }

    fn arguments(&self, queue: &QueueConfig, count: u64) -> Vec<String> {
        let count = count.to_string();
        self.template
            .iter()
            .map(|arg| {
                arg.replace("{queue}", &queue.name)
                    .replace("{site}", &queue.site)
                    .replace("{batch_queue}", &queue.batch_queue)
                    .replace("{count}", &count)
            })
            .collect()
    }
}

impl Submitter for CommandSubmitter {
    fn submit(
        &self,
        queue: &QueueConfig,
        count: u64,
    ) -> Pin<Box<dyn Future<Output = SubmitResult<SubmissionReceipt>> + Send>> {
        let arguments = self.arguments(queue, count);
        let name = queue.name.clone();
        Box::pin(async move {
            let stdout = run_command(&arguments)
                .await
                .with_context(|| format!("Submission of {count} pilot(s) for {name} failed"))?;
            let detail = stdout
                .lines()
                .map(|line| line.to_str_lossy().trim().to_string())
                .find(|line| !line.is_empty());
            Ok(SubmissionReceipt {
                submitted: count,
                detail,
            })
        })
    }
}
