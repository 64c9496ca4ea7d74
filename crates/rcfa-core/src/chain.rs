use serde::{Deserialize, Serialize};

use crate::change::AnalysisChange;
use crate::context::SituationalContext;
use crate::error::RcfaError;

/// One candidate answer to a step's question.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Hypothesis {
    #[serde(default)]
    text: String,
    #[serde(default)]
    is_correct: bool,
    #[serde(default)]
    is_root_cause: bool,
}

impl Hypothesis {
    fn blank(is_correct: bool) -> Self {
        Self { text: String::new(), is_correct, is_root_cause: false }
    }

    pub(crate) fn correct_with_text(text: impl Into<String>) -> Self {
        Self { text: text.into(), is_correct: true, is_root_cause: false }
    }

    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    #[must_use]
    pub fn is_correct(&self) -> bool {
        self.is_correct
    }

    #[must_use]
    pub fn is_root_cause(&self) -> bool {
        self.is_root_cause
    }
}

/// A single "why" level.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct Step {
    #[serde(default)]
    question: String,
    #[serde(rename = "answers", alias = "hypotheses", default)]
    hypotheses: Vec<Hypothesis>,
}

impl Step {
    fn seeded(question: String) -> Self {
        Self { question, hypotheses: vec![Hypothesis::blank(true)] }
    }

    pub(crate) fn with_hypotheses(
        question: impl Into<String>,
        hypotheses: Vec<Hypothesis>,
    ) -> Self {
        Self { question: question.into(), hypotheses }
    }

    #[must_use]
    pub fn question(&self) -> &str {
        &self.question
    }

    #[must_use]
    pub fn hypotheses(&self) -> &[Hypothesis] {
        &self.hypotheses
    }

    #[must_use]
    pub fn correct_index(&self) -> Option<usize> {
        self.hypotheses.iter().position(Hypothesis::is_correct)
    }

    #[must_use]
    pub fn correct_hypothesis(&self) -> Option<&Hypothesis> {
        self.hypotheses.iter().find(|hypothesis| hypothesis.is_correct)
    }

    fn root_cause_index(&self) -> Option<usize> {
        self.hypotheses.iter().position(Hypothesis::is_root_cause)
    }
}

impl Default for Step {
    fn default() -> Self {
        Self::seeded(String::new())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChainState {
    Building,
    Locked,
}

/// Position and content of the locked root cause.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct RootCauseRef<'a> {
    pub step: usize,
    pub hypothesis: usize,
    pub answer: &'a Hypothesis,
}

/// Ordered sequence of investigation steps.
///
/// The operations below are the only way to mutate a chain. Each one checks
/// every precondition before touching state, so a rejected edit leaves the
/// chain exactly as it was.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(transparent)]
pub struct CausalChain {
    steps: Vec<Step>,
}

impl Default for CausalChain {
    fn default() -> Self {
        Self::new()
    }
}

impl CausalChain {
    /// A chain with one blank step whose sole hypothesis is implicitly correct.
    #[must_use]
    pub fn new() -> Self {
        Self { steps: vec![Step::default()] }
    }

    #[must_use]
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    #[must_use]
    pub fn step(&self, index: usize) -> Option<&Step> {
        self.steps.get(index)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    #[must_use]
    pub fn state(&self) -> ChainState {
        if self.root_cause().is_some() {
            ChainState::Locked
        } else {
            ChainState::Building
        }
    }

    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.state() == ChainState::Locked
    }

    #[must_use]
    pub fn root_cause(&self) -> Option<RootCauseRef<'_>> {
        self.steps.iter().enumerate().find_map(|(step, entry)| {
            entry.root_cause_index().map(|hypothesis| RootCauseRef {
                step,
                hypothesis,
                answer: &entry.hypotheses[hypothesis],
            })
        })
    }

    /// Append a step seeded from the last step's correct answer.
    ///
    /// # Errors
    /// [`RcfaError::Precondition`] when the context is incomplete,
    /// [`RcfaError::RootCauseLocked`] once a root cause exists, and
    /// [`RcfaError::IncompleteStep`] when the last step has no correct
    /// hypothesis or its text is empty.
    pub fn add_step(&mut self, context: &SituationalContext) -> Result<AnalysisChange, RcfaError> {
        let missing = context.missing_fields();
        if !missing.is_empty() {
            tracing::debug!(?missing, "step not added, context incomplete");
            return Err(RcfaError::Precondition);
        }
        self.ensure_building()?;

        let seed = self
            .steps
            .last()
            .and_then(Step::correct_hypothesis)
            .map(Hypothesis::text)
            .filter(|text| !text.is_empty())
            .ok_or(RcfaError::IncompleteStep)?
            .to_string();

        self.steps.push(Step::seeded(seed));
        let step = self.steps.len() - 1;
        tracing::debug!(step, "causal chain extended");
        Ok(AnalysisChange::StepAdded { step })
    }

    /// Remove the step at `index` together with every later step.
    ///
    /// Removing step 0 resets the chain to its single initial step.
    ///
    /// # Errors
    /// [`RcfaError::RootCauseLocked`] once locked, [`RcfaError::NotFound`]
    /// for an out-of-range index.
    pub fn remove_step(&mut self, index: usize) -> Result<AnalysisChange, RcfaError> {
        self.ensure_building()?;
        self.check_step(index)?;

        let removed = self.steps.len() - index;
        self.steps.truncate(index);
        if self.steps.is_empty() {
            self.steps.push(Step::default());
        }
        tracing::debug!(from = index, removed, "causal chain truncated");
        Ok(AnalysisChange::StepsRemoved { from: index, removed })
    }

    /// Overwrite a step's question. No propagation.
    ///
    /// # Errors
    /// [`RcfaError::RootCauseLocked`] once locked, [`RcfaError::NotFound`]
    /// for an out-of-range index.
    pub fn update_question(
        &mut self,
        step: usize,
        text: impl Into<String>,
    ) -> Result<AnalysisChange, RcfaError> {
        self.ensure_building()?;
        self.check_step(step)?;

        self.steps[step].question = text.into();
        tracing::debug!(step, "question updated");
        Ok(AnalysisChange::QuestionUpdated { step })
    }

    /// Append a blank, not-correct hypothesis to a step.
    ///
    /// # Errors
    /// [`RcfaError::RootCauseLocked`] once locked, [`RcfaError::NotFound`]
    /// for an out-of-range index.
    pub fn add_hypothesis(&mut self, step: usize) -> Result<AnalysisChange, RcfaError> {
        self.ensure_building()?;
        self.check_step(step)?;

        let hypotheses = &mut self.steps[step].hypotheses;
        hypotheses.push(Hypothesis::blank(false));
        let hypothesis = hypotheses.len() - 1;
        tracing::debug!(step, hypothesis, "hypothesis added");
        Ok(AnalysisChange::HypothesisAdded { step, hypothesis })
    }

    /// Remove a hypothesis. Removing the correct one leaves the step without
    /// a correct hypothesis until another is selected.
    ///
    /// # Errors
    /// [`RcfaError::RootCauseLocked`] once locked, [`RcfaError::NotFound`]
    /// for out-of-range indices, and [`RcfaError::Validation`] when the
    /// hypothesis is the last one of its step.
    pub fn remove_hypothesis(
        &mut self,
        step: usize,
        hypothesis: usize,
    ) -> Result<AnalysisChange, RcfaError> {
        self.ensure_building()?;
        self.check_hypothesis(step, hypothesis)?;
        if self.steps[step].hypotheses.len() == 1 {
            return Err(RcfaError::Validation(
                "a step MUST keep at least one hypothesis".to_string(),
            ));
        }

        let removed = self.steps[step].hypotheses.remove(hypothesis);
        tracing::debug!(step, hypothesis, was_correct = removed.is_correct, "hypothesis removed");
        Ok(AnalysisChange::HypothesisRemoved { step, hypothesis, was_correct: removed.is_correct })
    }

    /// Overwrite a hypothesis' text. When it is the correct one, the next
    /// step's question follows it.
    ///
    /// # Errors
    /// [`RcfaError::RootCauseLocked`] once locked, [`RcfaError::NotFound`]
    /// for out-of-range indices.
    pub fn update_hypothesis_text(
        &mut self,
        step: usize,
        hypothesis: usize,
        text: impl Into<String>,
    ) -> Result<AnalysisChange, RcfaError> {
        self.ensure_building()?;
        self.check_hypothesis(step, hypothesis)?;

        let text = text.into();
        let propagated =
            self.steps[step].hypotheses[hypothesis].is_correct && self.steps.len() > step + 1;
        if propagated {
            self.steps[step + 1].question.clone_from(&text);
        }
        self.steps[step].hypotheses[hypothesis].text = text;
        tracing::debug!(step, hypothesis, propagated, "hypothesis text updated");
        Ok(AnalysisChange::HypothesisTextUpdated { step, hypothesis, propagated })
    }

    /// Make exactly one hypothesis of a step correct and copy its text into
    /// the following step's question.
    ///
    /// # Errors
    /// [`RcfaError::RootCauseLocked`] once locked, [`RcfaError::NotFound`]
    /// for out-of-range indices.
    pub fn set_correct_hypothesis(
        &mut self,
        step: usize,
        hypothesis: usize,
    ) -> Result<AnalysisChange, RcfaError> {
        self.ensure_building()?;
        self.check_hypothesis(step, hypothesis)?;

        for (index, candidate) in self.steps[step].hypotheses.iter_mut().enumerate() {
            candidate.is_correct = index == hypothesis;
            if index != hypothesis {
                candidate.is_root_cause = false;
            }
        }

        let propagated = self.steps.len() > step + 1;
        if propagated {
            let text = self.steps[step].hypotheses[hypothesis].text.clone();
            self.steps[step + 1].question = text;
        }
        tracing::debug!(step, hypothesis, propagated, "correct hypothesis set");
        Ok(AnalysisChange::CorrectHypothesisSet { step, hypothesis, propagated })
    }

    /// Lock a correct hypothesis as the verified root cause and drop every
    /// step after it. There is no way back to `Building`.
    ///
    /// # Errors
    /// [`RcfaError::RootCauseLocked`] when already locked,
    /// [`RcfaError::NotFound`] for out-of-range indices and
    /// [`RcfaError::NotCorrect`] when the target is not the step's correct
    /// hypothesis.
    pub fn set_root_cause(
        &mut self,
        step: usize,
        hypothesis: usize,
    ) -> Result<AnalysisChange, RcfaError> {
        self.ensure_building()?;
        self.check_hypothesis(step, hypothesis)?;
        if !self.steps[step].hypotheses[hypothesis].is_correct {
            return Err(RcfaError::NotCorrect);
        }

        for candidate in self.steps.iter_mut().flat_map(|entry| entry.hypotheses.iter_mut()) {
            candidate.is_root_cause = false;
        }
        let target = &mut self.steps[step].hypotheses[hypothesis];
        target.is_root_cause = true;
        target.is_correct = true;

        let truncated = self.steps.len() - (step + 1);
        self.steps.truncate(step + 1);
        tracing::info!(step, hypothesis, truncated, "root cause locked");
        Ok(AnalysisChange::RootCauseLocked { step, hypothesis, truncated })
    }

    fn ensure_building(&self) -> Result<(), RcfaError> {
        if self.is_locked() {
            return Err(RcfaError::RootCauseLocked);
        }
        Ok(())
    }

    fn check_step(&self, step: usize) -> Result<(), RcfaError> {
        if step >= self.steps.len() {
            return Err(RcfaError::step_not_found(step, self.steps.len()));
        }
        Ok(())
    }

    fn check_hypothesis(&self, step: usize, hypothesis: usize) -> Result<(), RcfaError> {
        self.check_step(step)?;
        let len = self.steps[step].hypotheses.len();
        if hypothesis >= len {
            return Err(RcfaError::hypothesis_not_found(step, hypothesis, len));
        }
        Ok(())
    }

    /// Check every structural invariant of the chain.
    ///
    /// # Errors
    /// Returns [`RcfaError::Validation`] naming the first violated invariant.
    pub fn validate(&self) -> Result<(), RcfaError> {
        if self.steps.is_empty() {
            return Err(RcfaError::Validation("chain MUST contain at least one step".to_string()));
        }

        let mut root_cause_step = None;
        for (index, step) in self.steps.iter().enumerate() {
            if step.hypotheses.is_empty() {
                return Err(RcfaError::Validation(format!(
                    "step {index} MUST contain at least one hypothesis"
                )));
            }
            if step.hypotheses.iter().filter(|hypothesis| hypothesis.is_correct).count() > 1 {
                return Err(RcfaError::Validation(format!(
                    "step {index} MUST have at most one correct hypothesis"
                )));
            }
            for hypothesis in &step.hypotheses {
                if hypothesis.is_root_cause && !hypothesis.is_correct {
                    return Err(RcfaError::Validation(format!(
                        "root cause in step {index} MUST also be correct"
                    )));
                }
                if hypothesis.is_root_cause {
                    if root_cause_step.is_some() {
                        return Err(RcfaError::Validation(
                            "chain MUST have at most one root cause".to_string(),
                        ));
                    }
                    root_cause_step = Some(index);
                }
            }
        }

        if let Some(index) = root_cause_step {
            if index + 1 != self.steps.len() {
                return Err(RcfaError::Validation(format!(
                    "no step MAY follow the root cause in step {index}"
                )));
            }
        }

        Ok(())
    }

    /// Build a chain from stored steps, repairing anything that breaks the
    /// invariants. Returns the notes describing each repair.
    pub(crate) fn from_stored_steps(stored: Vec<Step>) -> (Self, Vec<String>) {
        let mut repairs = Vec::new();
        if stored.is_empty() {
            return (Self::new(), repairs);
        }

        let mut steps = Vec::with_capacity(stored.len());
        let mut locked = false;
        let stored_len = stored.len();
        for (index, mut step) in stored.into_iter().enumerate() {
            if locked {
                repairs.push(format!(
                    "dropped {} step(s) following the root cause",
                    stored_len - index
                ));
                break;
            }

            if step.hypotheses.is_empty() {
                step.hypotheses.push(Hypothesis::blank(true));
                repairs.push(format!("step {index} had no hypotheses; added a blank one"));
            }

            for hypothesis in &mut step.hypotheses {
                if hypothesis.is_root_cause && !hypothesis.is_correct {
                    hypothesis.is_correct = true;
                    repairs.push(format!("step {index} root cause promoted to correct"));
                }
            }

            let mut seen_root_cause = false;
            for hypothesis in &mut step.hypotheses {
                if hypothesis.is_root_cause {
                    if seen_root_cause {
                        hypothesis.is_root_cause = false;
                        repairs.push(format!("step {index} extra root cause cleared"));
                    }
                    seen_root_cause = true;
                }
            }

            let keep_correct = step
                .root_cause_index()
                .or_else(|| step.correct_index());
            for (position, hypothesis) in step.hypotheses.iter_mut().enumerate() {
                if hypothesis.is_correct && Some(position) != keep_correct {
                    hypothesis.is_correct = false;
                    repairs.push(format!("step {index} extra correct hypothesis cleared"));
                }
            }

            locked = seen_root_cause;
            steps.push(step);
        }

        (Self { steps }, repairs)
    }
}
