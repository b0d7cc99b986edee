use std::future::Future;
use std::pin::Pin;

use crate::config::{BackendParams, QueueConfig};
use crate::submit::{SubmissionReceipt, SubmitResult, Submitter};

/// Dry run: only logs what would be submitted.
pub struct DryRunSubmitter;

impl DryRunSubmitter {
    pub fn new(_params: &BackendParams) -> SubmitResult<Self> {
        Ok(Self)
    }
}

impl Submitter for DryRunSubmitter {
    fn submit(
        &self,
        queue: &QueueConfig,
        count: u64,
    ) -> Pin<Box<dyn Future<Output = SubmitResult<SubmissionReceipt>> + Send>> {
        log::info!(
            "Dry run: would submit {count} pilot(s) to {} for queue {}",
            queue.batch.identity(),
            queue.name
        );
        Box::pin(async move {
            Ok(SubmissionReceipt {
                submitted: count,
                detail: Some("dry run".to_string()),
            })
        })
    }
}
