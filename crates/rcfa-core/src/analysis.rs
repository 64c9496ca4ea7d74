use crate::chain::CausalChain;
use crate::change::AnalysisChange;
use crate::context::{ContextField, SituationalContext};
use crate::error::RcfaError;
use crate::ledger::{Action, ActionLedger};
use crate::record::ProblemId;

/// Everything one editing session works on: the situational context, the
/// causal chain, the countermeasure and the action ledger of a problem.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Analysis {
    problem_id: ProblemId,
    context: SituationalContext,
    chain: CausalChain,
    root_cause_text: String,
    countermeasure: String,
    ledger: ActionLedger,
}

impl Analysis {
    #[must_use]
    pub fn new(problem_id: ProblemId) -> Self {
        Self {
            problem_id,
            context: SituationalContext::new(),
            chain: CausalChain::new(),
            root_cause_text: String::new(),
            countermeasure: String::new(),
            ledger: ActionLedger::new(problem_id),
        }
    }

    pub(crate) fn from_parts(
        problem_id: ProblemId,
        context: SituationalContext,
        chain: CausalChain,
        root_cause_text: String,
        countermeasure: String,
        ledger: ActionLedger,
    ) -> Self {
        Self { problem_id, context, chain, root_cause_text, countermeasure, ledger }
    }

    #[must_use]
    pub fn problem_id(&self) -> ProblemId {
        self.problem_id
    }

    #[must_use]
    pub fn context(&self) -> &SituationalContext {
        &self.context
    }

    #[must_use]
    pub fn chain(&self) -> &CausalChain {
        &self.chain
    }

    #[must_use]
    pub fn countermeasure(&self) -> &str {
        &self.countermeasure
    }

    #[must_use]
    pub fn ledger(&self) -> &ActionLedger {
        &self.ledger
    }

    /// The root cause as it should be mirrored onto the record: the locked
    /// hypothesis when there is one, otherwise whatever was typed directly.
    #[must_use]
    pub fn root_cause(&self) -> &str {
        match self.chain.root_cause() {
            Some(root) => root.answer.text(),
            None => &self.root_cause_text,
        }
    }

    pub fn set_context(&mut self, field: ContextField, value: impl Into<String>) -> AnalysisChange {
        self.context.set(field, value);
        AnalysisChange::ContextFieldSet { field }
    }

    /// # Errors
    /// See [`CausalChain::add_step`].
    pub fn add_step(&mut self) -> Result<AnalysisChange, RcfaError> {
        self.chain.add_step(&self.context)
    }

    /// # Errors
    /// See [`CausalChain::remove_step`].
    pub fn remove_step(&mut self, index: usize) -> Result<AnalysisChange, RcfaError> {
        self.chain.remove_step(index)
    }

    /// # Errors
    /// See [`CausalChain::update_question`].
    pub fn update_question(
        &mut self,
        step: usize,
        text: impl Into<String>,
    ) -> Result<AnalysisChange, RcfaError> {
        self.chain.update_question(step, text)
    }

    /// # Errors
    /// See [`CausalChain::add_hypothesis`].
    pub fn add_hypothesis(&mut self, step: usize) -> Result<AnalysisChange, RcfaError> {
        self.chain.add_hypothesis(step)
    }

    /// # Errors
    /// See [`CausalChain::remove_hypothesis`].
    pub fn remove_hypothesis(
        &mut self,
        step: usize,
        hypothesis: usize,
    ) -> Result<AnalysisChange, RcfaError> {
        self.chain.remove_hypothesis(step, hypothesis)
    }

    /// # Errors
    /// See [`CausalChain::update_hypothesis_text`].
    pub fn update_hypothesis_text(
        &mut self,
        step: usize,
        hypothesis: usize,
        text: impl Into<String>,
    ) -> Result<AnalysisChange, RcfaError> {
        self.chain.update_hypothesis_text(step, hypothesis, text)
    }

    /// # Errors
    /// See [`CausalChain::set_correct_hypothesis`].
    pub fn set_correct_hypothesis(
        &mut self,
        step: usize,
        hypothesis: usize,
    ) -> Result<AnalysisChange, RcfaError> {
        self.chain.set_correct_hypothesis(step, hypothesis)
    }

    /// Lock the root cause and mirror its text.
    ///
    /// # Errors
    /// See [`CausalChain::set_root_cause`].
    pub fn set_root_cause(
        &mut self,
        step: usize,
        hypothesis: usize,
    ) -> Result<AnalysisChange, RcfaError> {
        let change = self.chain.set_root_cause(step, hypothesis)?;
        if let Some(root) = self.chain.root_cause() {
            self.root_cause_text = root.answer.text().to_string();
        }
        Ok(change)
    }

    /// Free-text root cause, used while no hypothesis is locked.
    ///
    /// # Errors
    /// Returns [`RcfaError::RootCauseLocked`] once a hypothesis is locked.
    pub fn set_root_cause_text(
        &mut self,
        text: impl Into<String>,
    ) -> Result<AnalysisChange, RcfaError> {
        if self.chain.is_locked() {
            return Err(RcfaError::RootCauseLocked);
        }
        self.root_cause_text = text.into();
        Ok(AnalysisChange::RootCauseTextUpdated)
    }

    /// The countermeasure stays editable after the chain is locked.
    pub fn set_countermeasure(&mut self, text: impl Into<String>) -> AnalysisChange {
        self.countermeasure = text.into();
        AnalysisChange::CountermeasureUpdated
    }

    /// Record an action persisted elsewhere so the ledger reflects it.
    pub fn record_action(&mut self, action: Action) -> AnalysisChange {
        let change = AnalysisChange::ActionRecorded { action_id: action.id, status: action.status };
        self.ledger.upsert(action);
        change
    }
}
