use crate::schedule::policy::{PolicyKind, PolicyStage};
use crate::schedule::{Decision, SchedulingContext};

/// Ordered chain of policy stages. The first stage is seeded with zero.
pub struct SchedulingPipeline {
    stages: Vec<Box<dyn PolicyStage>>,
}

impl SchedulingPipeline {
    pub fn new(stages: Vec<Box<dyn PolicyStage>>) -> Self {
        Self { stages }
    }

    pub fn from_kinds(kinds: &[PolicyKind]) -> Self {
        Self::new(kinds.iter().map(|kind| kind.create_stage()).collect())
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|stage| stage.name()).collect()
    }

    pub fn run(&self, ctx: &SchedulingContext) -> Decision {
        let mut count = 0;
        let mut trace = Vec::with_capacity(self.stages.len());
        for stage in &self.stages {
            let outcome = stage.apply(ctx, count);
            trace.push(format!(
                "{}: {count} -> {} ({})",
                stage.name(),
                outcome.count,
                outcome.reason
            ));
            count = outcome.count;
        }
        Decision { count, trace }
    }
}
