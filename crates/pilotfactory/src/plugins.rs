//! Name to constructor maps of status sources and submitters.
//!
//! The maps are filled once at start-up. Configuration validation rejects kinds that are not
//! registered, so constructors are only ever looked up for known names.
use std::sync::Arc;

use crate::Map;
use crate::config::BackendParams;
use crate::poller::condor::CondorSource;
use crate::poller::panda::PandaSource;
use crate::poller::pbs::PbsSource;
use crate::poller::slurm::SlurmSource;
use crate::poller::{PollResult, StatusSource};
use crate::status::snapshot::{BatchSnapshot, WmsSnapshot};
use crate::submit::command::CommandSubmitter;
use crate::submit::dry_run::DryRunSubmitter;
use crate::submit::{SubmitResult, Submitter};

pub type SourceConstructor<S> =
    Arc<dyn Fn(&BackendParams) -> PollResult<Box<dyn StatusSource<S>>> + Send + Sync>;
pub type SubmitterConstructor =
    Arc<dyn Fn(&BackendParams) -> SubmitResult<Arc<dyn Submitter>> + Send + Sync>;

#[derive(Default, Clone)]
pub struct PluginRegistry {
    wms_sources: Map<String, SourceConstructor<WmsSnapshot>>,
    batch_sources: Map<String, SourceConstructor<BatchSnapshot>>,
    submitters: Map<String, SubmitterConstructor>,
}

impl PluginRegistry {
    /// Registry with every built-in backend.
    pub fn with_defaults() -> Self {
        let mut registry = Self::default();
        registry.register_wms_source("panda", |params| Ok(Box::new(PandaSource::new(params)?)));
        registry
            .register_batch_source("condor", |params| Ok(Box::new(CondorSource::new(params)?)));
        registry.register_batch_source("pbs", |params| Ok(Box::new(PbsSource::new(params)?)));
        registry.register_batch_source("slurm", |params| Ok(Box::new(SlurmSource::new(params)?)));
        registry.register_submitter("command", |params| {
            Ok(Arc::new(CommandSubmitter::new(params)?))
        });
        registry.register_submitter("log", |params| Ok(Arc::new(DryRunSubmitter::new(params)?)));
        registry
    }

    pub fn register_wms_source<F>(&mut self, kind: &str, constructor: F)
    where
        F: Fn(&BackendParams) -> PollResult<Box<dyn StatusSource<WmsSnapshot>>>
            + Send
            + Sync
            + 'static,
    {
        self.wms_sources
            .insert(kind.to_string(), Arc::new(constructor));
    }

    pub fn register_batch_source<F>(&mut self, kind: &str, constructor: F)
    where
        F: Fn(&BackendParams) -> PollResult<Box<dyn StatusSource<BatchSnapshot>>>
            + Send
            + Sync
            + 'static,
    {
        self.batch_sources
            .insert(kind.to_string(), Arc::new(constructor));
    }

    pub fn register_submitter<F>(&mut self, kind: &str, constructor: F)
    where
        F: Fn(&BackendParams) -> SubmitResult<Arc<dyn Submitter>> + Send + Sync + 'static,
    {
        self.submitters.insert(kind.to_string(), Arc::new(constructor));
    }

    pub fn has_wms_source(&self, kind: &str) -> bool {
        self.wms_sources.contains_key(kind)
    }

    pub fn has_batch_source(&self, kind: &str) -> bool {
        self.batch_sources.contains_key(kind)
    }

    pub fn has_submitter(&self, kind: &str) -> bool {
        self.submitters.contains_key(kind)
    }

    pub fn create_wms_source(
        &self,
        params: &BackendParams,
    ) -> PollResult<Box<dyn StatusSource<WmsSnapshot>>> {
        let constructor = self
            .wms_sources
            .get(&params.kind)
            .ok_or_else(|| anyhow::anyhow!("Unknown WMS kind `{}`", params.kind))?;
        constructor(params)
    }

    pub fn create_batch_source(
        &self,
        params: &BackendParams,
    ) -> PollResult<Box<dyn StatusSource<BatchSnapshot>>> {
        let constructor = self
            .batch_sources
            .get(&params.kind)
            .ok_or_else(|| anyhow::anyhow!("Unknown batch system kind `{}`", params.kind))?;
        constructor(params)
    }

    pub fn create_submitter(&self, params: &BackendParams) -> SubmitResult<Arc<dyn Submitter>> {
        let constructor = self
            .submitters
            .get(&params.kind)
            .ok_or_else(|| anyhow::anyhow!("Unknown submitter kind `{}`", params.kind))?;
        constructor(params)
    }
}
