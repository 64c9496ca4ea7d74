#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum RcfaError {
    #[error("precondition failed: situational context MUST be complete before extending the chain")]
    Precondition,
    #[error("root cause is locked: the causal chain is read-only")]
    RootCauseLocked,
    #[error("incomplete step: the last step MUST have a correct hypothesis with non-empty text")]
    IncompleteStep,
    #[error("hypothesis is not marked correct and cannot become the root cause")]
    NotCorrect,
    #[error("not found: {0}")]
    NotFound(String),
    #[error("validation error: {0}")]
    Validation(String),
    #[error("encoding error: {0}")]
    Encoding(String),
}

impl RcfaError {
    pub(crate) fn step_not_found(step: usize, len: usize) -> Self {
        Self::NotFound(format!("step {step} (chain has {len} steps)"))
    }

    pub(crate) fn hypothesis_not_found(step: usize, hypothesis: usize, len: usize) -> Self {
        Self::NotFound(format!(
            "hypothesis {hypothesis} in step {step} (step has {len} hypotheses)"
        ))
    }
}
