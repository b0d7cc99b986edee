//! Pilot factory: keeps batch queues supplied with pilot jobs in proportion to the work
//! waiting in a workload management system (WMS).
//!
//! Status of every distinct backend is polled by exactly one background [`poller::Poller`],
//! which publishes immutable snapshots into a shared [`status::cache::SnapshotCache`].
//! Once per cycle, the [`factory::scheduler::Scheduler`] asks every queue controller to read
//! the latest snapshots, run its policy pipeline and submit the resulting number of pilots.
pub mod common;
pub mod config;
pub mod factory;
pub mod plugins;
pub mod poller;
pub mod schedule;
pub mod status;
pub mod submit;

pub type Error = crate::common::error::PfError;
pub type Result<T> = std::result::Result<T, Error>;

pub use crate::common::data_structures::{Map, Set};

pub const PF_VERSION: &str = env!("CARGO_PKG_VERSION");
