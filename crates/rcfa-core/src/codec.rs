use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::analysis::Analysis;
use crate::chain::{CausalChain, Hypothesis, Step};
use crate::context::{normalize_when, ContextField, SituationalContext};
use crate::error::RcfaError;
use crate::ledger::ActionLedger;
use crate::record::{ProblemPatch, ProblemRecord};

/// Question given to the single step recovered from a free-text `five_whys`.
pub const LEGACY_NOTE_QUESTION: &str = "Original Note";

#[derive(Serialize)]
struct FiveWOneHWire<'a> {
    who: &'a str,
    what: &'a str,
    #[serde(rename = "where")]
    where_: &'a str,
    when: &'a str,
    why: &'a str,
    how: &'a str,
}

/// What `decode` had to do to make sense of a record.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Eq, PartialEq)]
pub struct DecodeReport {
    /// `rcfa_analysis` was not a JSON object; its raw text became `what`.
    pub degraded_context: bool,
    /// `five_whys` was not a JSON step array; its raw text became a note step.
    pub degraded_chain: bool,
    pub notes: Vec<String>,
}

impl DecodeReport {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        !self.degraded_context && !self.degraded_chain && self.notes.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct Decoded {
    pub analysis: Analysis,
    pub report: DecodeReport,
}

fn non_empty(value: Option<&String>) -> Option<&str> {
    value.map(String::as_str).filter(|text| !text.is_empty())
}

fn decode_context(record: &ProblemRecord, report: &mut DecodeReport) -> SituationalContext {
    let mut context = SituationalContext::new();
    context.set(ContextField::FunctionFailure, record.function_failure.clone().unwrap_or_default());
    context.set(ContextField::FailureMode, record.failure_mode.clone().unwrap_or_default());

    let Some(raw) = non_empty(record.rcfa_analysis.as_ref()) else {
        return context;
    };

    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => {
            for field in ContextField::FIVE_W_ONE_H {
                let Some(value) = map.get(field.as_str()) else {
                    continue;
                };
                match value.as_str() {
                    Some(text) if field == ContextField::When => {
                        context.set(field, normalize_when(text));
                    }
                    Some(text) => context.set(field, text),
                    None if value.is_null() => {}
                    None => report.notes.push(format!("ignored non-string `{field}` value")),
                }
            }
        }
        _ => {
            report.degraded_context = true;
            context.set(ContextField::What, raw);
        }
    }
    context
}

fn legacy_note_chain(raw: &str) -> CausalChain {
    let (chain, _) = CausalChain::from_stored_steps(vec![Step::with_hypotheses(
        LEGACY_NOTE_QUESTION,
        vec![Hypothesis::correct_with_text(raw)],
    )]);
    chain
}

fn decode_chain(record: &ProblemRecord, report: &mut DecodeReport) -> CausalChain {
    let Some(raw) = non_empty(record.five_whys.as_ref()) else {
        return CausalChain::new();
    };

    let value = match serde_json::from_str::<Value>(raw) {
        Ok(value) => value,
        Err(_) => {
            report.degraded_chain = true;
            return legacy_note_chain(raw);
        }
    };

    if !value.is_array() {
        report.notes.push("five_whys is JSON but not a step array; started a fresh chain".into());
        return CausalChain::new();
    }

    match serde_json::from_value::<Vec<Step>>(value) {
        Ok(steps) if steps.is_empty() => {
            report.notes.push("five_whys held no steps; started a fresh chain".to_string());
            CausalChain::new()
        }
        Ok(steps) => {
            let (chain, repairs) = CausalChain::from_stored_steps(steps);
            report.notes.extend(repairs);
            chain
        }
        Err(_) => {
            report.degraded_chain = true;
            legacy_note_chain(raw)
        }
    }
}

/// Rebuild an [`Analysis`] from a stored record.
///
/// Never fails: malformed or legacy blobs fall back to a degraded
/// representation, and broken chain invariants are repaired. Both are
/// listed in the returned [`DecodeReport`].
#[must_use]
pub fn decode(record: &ProblemRecord) -> Decoded {
    let mut report = DecodeReport::default();
    let context = decode_context(record, &mut report);
    let chain = decode_chain(record, &mut report);
    let analysis = Analysis::from_parts(
        record.id,
        context,
        chain,
        record.root_cause.clone().unwrap_or_default(),
        record.countermeasure.clone().unwrap_or_default(),
        ActionLedger::from_actions(record.id, record.actions.clone()),
    );

    if !report.is_clean() {
        tracing::warn!(
            problem_id = %record.id,
            degraded_context = report.degraded_context,
            degraded_chain = report.degraded_chain,
            repairs = report.notes.len(),
            "problem record decoded with fallbacks"
        );
    }

    Decoded { analysis, report }
}

/// Serialize an analysis into the fields written back to the record.
///
/// # Errors
/// Returns [`RcfaError::Encoding`] when JSON serialization fails.
pub fn encode(analysis: &Analysis) -> Result<ProblemPatch, RcfaError> {
    let context = analysis.context();
    let five_w_one_h = FiveWOneHWire {
        who: context.get(ContextField::Who),
        what: context.get(ContextField::What),
        where_: context.get(ContextField::Where),
        when: context.get(ContextField::When),
        why: context.get(ContextField::Why),
        how: context.get(ContextField::How),
    };

    let rcfa_analysis = serde_json::to_string(&five_w_one_h)
        .map_err(|err| RcfaError::Encoding(format!("situational context: {err}")))?;
    let five_whys = serde_json::to_string(analysis.chain().steps())
        .map_err(|err| RcfaError::Encoding(format!("causal chain: {err}")))?;

    Ok(ProblemPatch {
        root_cause: Some(analysis.root_cause().to_string()),
        rcfa_analysis: Some(rcfa_analysis),
        five_whys: Some(five_whys),
        countermeasure: Some(analysis.countermeasure().to_string()),
        function_failure: Some(context.get(ContextField::FunctionFailure).to_string()),
        failure_mode: Some(context.get(ContextField::FailureMode).to_string()),
    })
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use time::macros::datetime;
    use time::OffsetDateTime;

    use super::*;
    use crate::change::AnalysisChange;
    use crate::ledger::{Action, ActionStatus, NewAction};

    fn fixture_time() -> OffsetDateTime {
        datetime!(2024-05-01 09:00 UTC)
    }

    fn record_with(rcfa_analysis: Option<&str>, five_whys: Option<&str>) -> ProblemRecord {
        let mut record = ProblemRecord::new("Pump outage", None, fixture_time());
        record.rcfa_analysis = rcfa_analysis.map(str::to_string);
        record.five_whys = five_whys.map(str::to_string);
        record
    }

    fn ok<T>(result: Result<T, RcfaError>) -> T {
        match result {
            Ok(value) => value,
            Err(err) => panic!("operation should succeed: {err}"),
        }
    }

    fn round_trip(analysis: &Analysis) -> Decoded {
        let patch = ok(encode(analysis));
        let mut record = ProblemRecord::new("Pump outage", None, fixture_time());
        record.id = analysis.problem_id();
        record.apply_patch(&patch);
        record.actions = analysis.ledger().actions().to_vec();
        decode(&record)
    }

    #[test]
    fn empty_record_decodes_to_fresh_analysis() {
        let record = record_with(None, None);
        let decoded = decode(&record);
        assert!(decoded.report.is_clean());
        assert_eq!(decoded.analysis, Analysis::new(record.id));
    }

    #[test]
    fn encode_uses_flat_context_and_answers_wire_format() {
        let mut analysis = Analysis::new(crate::record::ProblemId::new());
        analysis.set_context(ContextField::Where, "Boiler room");
        analysis.set_context(ContextField::FailureMode, "Pressure loss");
        let patch = ok(encode(&analysis));

        assert_eq!(
            patch.rcfa_analysis.as_deref(),
            Some(r#"{"who":"","what":"","where":"Boiler room","when":"","why":"","how":""}"#)
        );
        assert_eq!(
            patch.five_whys.as_deref(),
            Some(r#"[{"question":"","answers":[{"text":"","isCorrect":true,"isRootCause":false}]}]"#)
        );
        assert_eq!(patch.failure_mode.as_deref(), Some("Pressure loss"));
        assert_eq!(patch.root_cause.as_deref(), Some(""));
    }

    #[test]
    fn malformed_context_becomes_what() {
        let record = record_with(Some("Pump failed during night shift"), None);
        let decoded = decode(&record);
        assert!(decoded.report.degraded_context);
        assert_eq!(
            decoded.analysis.context().get(ContextField::What),
            "Pump failed during night shift"
        );
        assert_eq!(decoded.analysis.context().get(ContextField::Who), "");
    }

    #[test]
    fn non_object_context_json_becomes_what() {
        let decoded = decode(&record_with(Some("42"), None));
        assert!(decoded.report.degraded_context);
        assert_eq!(decoded.analysis.context().get(ContextField::What), "42");
    }

    #[test]
    fn stored_when_timestamp_is_reduced_to_date() {
        let decoded = decode(&record_with(
            Some(r#"{"who":"Ops","when":"2024-03-01T08:15:00.000Z"}"#),
            None,
        ));
        assert!(decoded.report.is_clean());
        assert_eq!(decoded.analysis.context().get(ContextField::When), "2024-03-01");
        assert_eq!(decoded.analysis.context().get(ContextField::Who), "Ops");
    }

    #[test]
    fn free_text_when_survives_round_trip_and_keeps_context_ready() {
        let mut analysis = Analysis::new(crate::record::ProblemId::new());
        for field in ContextField::ALL {
            analysis.set_context(field, format!("{field} value"));
        }
        analysis.set_context(ContextField::When, "Tuesday night shift");
        ok(analysis.update_hypothesis_text(0, 0, "Pump tripped"));

        let mut decoded = round_trip(&analysis);
        assert!(decoded.report.is_clean());
        assert_eq!(decoded.analysis.context().get(ContextField::When), "Tuesday night shift");
        assert!(decoded.analysis.context().is_ready());
        assert_eq!(decoded.analysis.add_step(), Ok(AnalysisChange::StepAdded { step: 1 }));
    }

    #[test]
    fn malformed_chain_becomes_original_note_step() {
        let decoded = decode(&record_with(None, Some("Operator forgot to open valve")));
        assert!(decoded.report.degraded_chain);
        let chain = decoded.analysis.chain();
        assert_eq!(chain.len(), 1);
        assert_eq!(chain.steps()[0].question(), LEGACY_NOTE_QUESTION);
        let hypothesis = &chain.steps()[0].hypotheses()[0];
        assert_eq!(hypothesis.text(), "Operator forgot to open valve");
        assert!(hypothesis.is_correct());
        assert!(!hypothesis.is_root_cause());
    }

    #[test]
    fn array_of_non_steps_is_treated_as_legacy_text() {
        let decoded = decode(&record_with(None, Some("[1, 2, 3]")));
        assert!(decoded.report.degraded_chain);
        assert_eq!(decoded.analysis.chain().steps()[0].hypotheses()[0].text(), "[1, 2, 3]");
    }

    #[test]
    fn non_array_chain_json_starts_fresh_chain() {
        let decoded = decode(&record_with(None, Some(r#"{"question":"x"}"#)));
        assert!(!decoded.report.degraded_chain);
        assert_eq!(decoded.report.notes.len(), 1);
        assert_eq!(decoded.analysis.chain(), &CausalChain::new());
    }

    #[test]
    fn empty_chain_array_starts_fresh_chain() {
        let decoded = decode(&record_with(None, Some("[]")));
        assert_eq!(decoded.analysis.chain(), &CausalChain::new());
    }

    #[test]
    fn hypotheses_key_is_accepted_on_decode() {
        let decoded = decode(&record_with(
            None,
            Some(r#"[{"question":"Why?","hypotheses":[{"text":"A","isCorrect":true}]}]"#),
        ));
        assert!(decoded.report.is_clean());
        let step = &decoded.analysis.chain().steps()[0];
        assert_eq!(step.question(), "Why?");
        assert_eq!(step.hypotheses()[0].text(), "A");
        assert!(step.hypotheses()[0].is_correct());
    }

    #[test]
    fn stored_chain_with_steps_after_root_cause_is_truncated() {
        let decoded = decode(&record_with(
            None,
            Some(
                r#"[
                    {"question":"q0","answers":[{"text":"A","isCorrect":true,"isRootCause":true}]},
                    {"question":"A","answers":[{"text":"B","isCorrect":true,"isRootCause":false}]}
                ]"#,
            ),
        ));
        assert!(!decoded.report.is_clean());
        assert_eq!(decoded.analysis.chain().len(), 1);
        assert!(decoded.analysis.chain().is_locked());
        assert_eq!(decoded.analysis.root_cause(), "A");
    }

    #[test]
    fn freeform_root_cause_survives_when_nothing_is_locked() {
        let mut record = record_with(None, None);
        record.root_cause = Some("Suspected corrosion".to_string());
        let decoded = decode(&record);
        assert_eq!(decoded.analysis.root_cause(), "Suspected corrosion");
        assert_eq!(
            ok(encode(&decoded.analysis)).root_cause.as_deref(),
            Some("Suspected corrosion")
        );
    }

    #[test]
    fn locked_analysis_round_trips_with_ledger() {
        let mut analysis = Analysis::new(crate::record::ProblemId::new());
        for field in ContextField::ALL {
            analysis.set_context(field, format!("{field} value"));
        }
        ok(analysis.update_hypothesis_text(0, 0, "Pump tripped"));
        ok(analysis.add_hypothesis(0));
        ok(analysis.update_hypothesis_text(0, 1, "Power dip"));
        ok(analysis.add_step());
        ok(analysis.update_hypothesis_text(1, 0, "Seal worn"));
        ok(analysis.set_root_cause(1, 0));
        analysis.set_countermeasure("Quarterly seal inspection");
        let mut action = ok(Action::pending(
            analysis.problem_id(),
            NewAction {
                description: "Replace seal".to_string(),
                assignee_id: "user-7".to_string(),
                due_date: None,
            },
            fixture_time(),
        ));
        analysis.record_action(action.clone());
        ok(action.transition(ActionStatus::Completed));
        analysis.record_action(action);

        let decoded = round_trip(&analysis);
        assert!(decoded.report.is_clean());
        assert_eq!(decoded.analysis, analysis);
    }

    #[derive(Debug, Clone)]
    enum Op {
        SetContext(usize, String),
        AddStep,
        RemoveStep(usize),
        UpdateQuestion(usize, String),
        AddHypothesis(usize),
        RemoveHypothesis(usize, usize),
        UpdateText(usize, usize, String),
        SetCorrect(usize, usize),
        SetRootCause(usize, usize),
        SetRootCauseText(String),
        SetCountermeasure(String),
    }

    fn text() -> impl Strategy<Value = String> {
        "[a-zA-Z ]{0,8}"
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            1 => ((0..8_usize), text()).prop_map(|(field, value)| Op::SetContext(field, value)),
            3 => Just(Op::AddStep),
            1 => (0..4_usize).prop_map(Op::RemoveStep),
            1 => ((0..4_usize), text()).prop_map(|(step, value)| Op::UpdateQuestion(step, value)),
            2 => (0..4_usize).prop_map(Op::AddHypothesis),
            1 => ((0..4_usize), (0..3_usize))
                .prop_map(|(step, index)| Op::RemoveHypothesis(step, index)),
            3 => ((0..4_usize), (0..3_usize), text())
                .prop_map(|(step, index, value)| Op::UpdateText(step, index, value)),
            2 => ((0..4_usize), (0..3_usize)).prop_map(|(step, index)| Op::SetCorrect(step, index)),
            1 => ((0..4_usize), (0..3_usize))
                .prop_map(|(step, index)| Op::SetRootCause(step, index)),
            1 => (any::<bool>(), text()).prop_map(|(root_cause, value)| {
                if root_cause {
                    Op::SetRootCauseText(value)
                } else {
                    Op::SetCountermeasure(value)
                }
            }),
        ]
    }

    fn apply(analysis: &mut Analysis, op: Op) -> Result<(), RcfaError> {
        match op {
            Op::SetContext(field, value) => {
                analysis.set_context(ContextField::ALL[field], value);
            }
            Op::AddStep => {
                analysis.add_step()?;
            }
            Op::RemoveStep(index) => {
                analysis.remove_step(index)?;
            }
            Op::UpdateQuestion(step, value) => {
                analysis.update_question(step, value)?;
            }
            Op::AddHypothesis(step) => {
                analysis.add_hypothesis(step)?;
            }
            Op::RemoveHypothesis(step, index) => {
                analysis.remove_hypothesis(step, index)?;
            }
            Op::UpdateText(step, index, value) => {
                analysis.update_hypothesis_text(step, index, value)?;
            }
            Op::SetCorrect(step, index) => {
                analysis.set_correct_hypothesis(step, index)?;
            }
            Op::SetRootCause(step, index) => {
                analysis.set_root_cause(step, index)?;
            }
            Op::SetRootCauseText(value) => {
                analysis.set_root_cause_text(value)?;
            }
            Op::SetCountermeasure(value) => {
                analysis.set_countermeasure(value);
            }
        }
        Ok(())
    }

    fn ready_analysis(leave_empty: Option<usize>) -> Analysis {
        let mut analysis = Analysis::new(crate::record::ProblemId::new());
        for (index, field) in ContextField::ALL.into_iter().enumerate() {
            if Some(index) != leave_empty {
                analysis.set_context(field, format!("{field} value"));
            }
        }
        analysis
    }

    proptest! {
        #[test]
        fn property_edits_preserve_invariants_and_fail_atomically(
            leave_empty in proptest::option::weighted(0.2, 0..8_usize),
            ops in proptest::collection::vec(op(), 0..40),
        ) {
            let mut analysis = ready_analysis(leave_empty);
            for op in ops {
                let before = analysis.clone();
                let was_locked = analysis.chain().is_locked();
                if apply(&mut analysis, op).is_err() {
                    prop_assert_eq!(&analysis, &before);
                }
                prop_assert!(analysis.chain().validate().is_ok());
                if was_locked {
                    prop_assert_eq!(analysis.chain(), before.chain());
                }
            }
        }

        #[test]
        fn property_encode_then_decode_reproduces_analysis(
            ops in proptest::collection::vec(op(), 0..40),
        ) {
            let mut analysis = ready_analysis(None);
            for op in ops {
                let _ = apply(&mut analysis, op);
            }
            let decoded = round_trip(&analysis);
            prop_assert!(decoded.report.is_clean());
            prop_assert_eq!(&decoded.analysis, &analysis);
        }
    }
}
