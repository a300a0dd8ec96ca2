use crate::error::{CoreError, Result};

/// `Created → Open → Running → Closing → Closed`. Operators may only mutate
/// handler state while the pipeline is `Open` or `Running`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Created,
    Open,
    Running,
    Closing,
    Closed,
}

impl PipelineState {
    pub fn can_transition_to(self, next: PipelineState) -> bool {
        use PipelineState::*;
        matches!(
            (self, next),
            (Created, Open) | (Open, Running) | (Running, Closing) | (Closing, Closed)
                | (Open, Closing) // allow closing an empty/never-started pipeline
        )
    }

    pub fn can_mutate(self) -> bool {
        matches!(self, PipelineState::Open | PipelineState::Running)
    }
}

pub fn validate_transition(current: PipelineState, next: PipelineState) -> Result<()> {
    if current.can_transition_to(next) {
        Ok(())
    } else {
        Err(CoreError::InvalidState(format!(
            "cannot transition pipeline from {current:?} to {next:?}"
        )))
    }
}
