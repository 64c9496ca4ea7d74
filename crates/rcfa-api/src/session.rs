use rcfa_core::{
    decode, encode, Action, Analysis, AnalysisChange, ContextField, DecodeReport, ProblemId,
    ProblemPatch, ProblemRecord, ProblemStatus, RcfaError,
};
use sha2::{Digest, Sha256};

type Listener = Box<dyn Fn(&AnalysisChange) + Send + Sync>;

/// One editor's working copy of a problem's analysis.
///
/// Every successful edit is forwarded to the subscribed listeners. Nothing
/// reaches storage until [`crate::RcfaApi::commit`].
pub struct AnalysisSession {
    analysis: Analysis,
    report: DecodeReport,
    status: ProblemStatus,
    saved_digest: String,
    listeners: Vec<Listener>,
}

impl std::fmt::Debug for AnalysisSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnalysisSession")
            .field("problem_id", &self.analysis.problem_id())
            .field("status", &self.status)
            .field("listeners", &self.listeners.len())
            .finish_non_exhaustive()
    }
}

fn patch_digest(patch: &ProblemPatch) -> Result<String, RcfaError> {
    let bytes = serde_json::to_vec(patch)
        .map_err(|err| RcfaError::Encoding(format!("patch digest: {err}")))?;
    Ok(format!("{:x}", Sha256::digest(&bytes)))
}

impl AnalysisSession {
    /// Start a session from a stored record. Malformed blobs never fail here;
    /// inspect [`Self::report`] to see what was recovered.
    ///
    /// # Errors
    /// Returns [`RcfaError::Encoding`] when the decoded analysis cannot be re-encoded.
    pub fn from_record(record: &ProblemRecord) -> Result<Self, RcfaError> {
        let decoded = decode(record);
        let saved_digest = patch_digest(&encode(&decoded.analysis)?)?;
        Ok(Self {
            analysis: decoded.analysis,
            report: decoded.report,
            status: record.status,
            saved_digest,
            listeners: Vec::new(),
        })
    }

    #[must_use]
    pub fn problem_id(&self) -> ProblemId {
        self.analysis.problem_id()
    }

    #[must_use]
    pub fn analysis(&self) -> &Analysis {
        &self.analysis
    }

    #[must_use]
    pub fn report(&self) -> &DecodeReport {
        &self.report
    }

    /// Problem status as of the last load, commit or action change.
    #[must_use]
    pub fn status(&self) -> ProblemStatus {
        self.status
    }

    pub fn subscribe(&mut self, listener: impl Fn(&AnalysisChange) + Send + Sync + 'static) {
        self.listeners.push(Box::new(listener));
    }

    /// Whether the analysis differs from what was last loaded or committed.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        match encode(&self.analysis).and_then(|patch| patch_digest(&patch)) {
            Ok(digest) => digest != self.saved_digest,
            Err(_) => true,
        }
    }

    pub(crate) fn mark_saved(
        &mut self,
        patch: &ProblemPatch,
        status: ProblemStatus,
    ) -> Result<(), RcfaError> {
        self.saved_digest = patch_digest(patch)?;
        self.status = status;
        Ok(())
    }

    pub(crate) fn apply_stored_action(&mut self, action: Action, status: ProblemStatus) {
        self.status = status;
        let change = self.analysis.record_action(action);
        self.emit(&change);
    }

    fn emit(&self, change: &AnalysisChange) {
        tracing::debug!(
            problem_id = %self.analysis.problem_id(),
            propagated = change.propagated(),
            ?change,
            "analysis changed"
        );
        for listener in &self.listeners {
            listener(change);
        }
    }

    fn forward(
        &mut self,
        edit: impl FnOnce(&mut Analysis) -> Result<AnalysisChange, RcfaError>,
    ) -> Result<AnalysisChange, RcfaError> {
        let change = edit(&mut self.analysis)?;
        self.emit(&change);
        Ok(change)
    }

    pub fn set_context(&mut self, field: ContextField, value: impl Into<String>) -> AnalysisChange {
        let change = self.analysis.set_context(field, value);
        self.emit(&change);
        change
    }

    /// # Errors
    /// See [`Analysis::add_step`].
    pub fn add_step(&mut self) -> Result<AnalysisChange, RcfaError> {
        self.forward(Analysis::add_step)
    }

    /// # Errors
    /// See [`Analysis::remove_step`].
    pub fn remove_step(&mut self, index: usize) -> Result<AnalysisChange, RcfaError> {
        self.forward(|analysis| analysis.remove_step(index))
    }

    /// # Errors
    /// See [`Analysis::update_question`].
    pub fn update_question(
        &mut self,
        step: usize,
        text: impl Into<String>,
    ) -> Result<AnalysisChange, RcfaError> {
        self.forward(|analysis| analysis.update_question(step, text))
    }

    /// # Errors
    /// See [`Analysis::add_hypothesis`].
    pub fn add_hypothesis(&mut self, step: usize) -> Result<AnalysisChange, RcfaError> {
        self.forward(|analysis| analysis.add_hypothesis(step))
    }

    /// # Errors
    /// See [`Analysis::remove_hypothesis`].
    pub fn remove_hypothesis(
        &mut self,
        step: usize,
        hypothesis: usize,
    ) -> Result<AnalysisChange, RcfaError> {
        self.forward(|analysis| analysis.remove_hypothesis(step, hypothesis))
    }

    /// # Errors
    /// See [`Analysis::update_hypothesis_text`].
    pub fn update_hypothesis_text(
        &mut self,
        step: usize,
        hypothesis: usize,
        text: impl Into<String>,
    ) -> Result<AnalysisChange, RcfaError> {
        self.forward(|analysis| analysis.update_hypothesis_text(step, hypothesis, text))
    }

    /// # Errors
    /// See [`Analysis::set_correct_hypothesis`].
    pub fn set_correct_hypothesis(
        &mut self,
        step: usize,
        hypothesis: usize,
    ) -> Result<AnalysisChange, RcfaError> {
        self.forward(|analysis| analysis.set_correct_hypothesis(step, hypothesis))
    }

    /// # Errors
    /// See [`Analysis::set_root_cause`].
    pub fn set_root_cause(
        &mut self,
        step: usize,
        hypothesis: usize,
    ) -> Result<AnalysisChange, RcfaError> {
        self.forward(|analysis| analysis.set_root_cause(step, hypothesis))
    }

    /// # Errors
    /// See [`Analysis::set_root_cause_text`].
    pub fn set_root_cause_text(
        &mut self,
        text: impl Into<String>,
    ) -> Result<AnalysisChange, RcfaError> {
        self.forward(|analysis| analysis.set_root_cause_text(text))
    }

    pub fn set_countermeasure(&mut self, text: impl Into<String>) -> AnalysisChange {
        let change = self.analysis.set_countermeasure(text);
        self.emit(&change);
        change
    }
}
