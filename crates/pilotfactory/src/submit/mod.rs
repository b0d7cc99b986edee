//! Submission of pilots into a batch system.
pub mod command;
pub mod dry_run;

use std::fmt::{Display, Formatter};
use std::future::Future;
use std::pin::Pin;

use crate::config::QueueConfig;

pub type SubmitResult<T> = anyhow::Result<T>;

/// Acknowledgement of a successful submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionReceipt {
    pub submitted: u64,
    /// Backend specific description, e.g. a cluster id.
    pub detail: Option<String>,
}

impl Display for SubmissionReceipt {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.detail {
            Some(detail) => write!(f, "{} pilot(s) ({detail})", self.submitted),
            None => write!(f, "{} pilot(s)", self.submitted),
        }
    }
}

/// Hands pilots over to a batch system. The count is always positive.
pub trait Submitter: Send + Sync {
    fn submit(
        &self,
        queue: &QueueConfig,
        count: u64,
    ) -> Pin<Box<dyn Future<Output = SubmitResult<SubmissionReceipt>> + Send>>;
}
