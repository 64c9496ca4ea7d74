use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use time::macros::format_description;
use time::Date;

/// One of the eight situational fields gating the causal chain.
///
/// The first six are the 5W+1H keys stored in the `rcfa_analysis` blob; the
/// last two are the failure definition and travel as their own record fields.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ContextField {
    Who,
    What,
    Where,
    When,
    Why,
    How,
    FunctionFailure,
    FailureMode,
}

impl ContextField {
    pub const ALL: [Self; 8] = [
        Self::Who,
        Self::What,
        Self::Where,
        Self::When,
        Self::Why,
        Self::How,
        Self::FunctionFailure,
        Self::FailureMode,
    ];

    pub const FIVE_W_ONE_H: [Self; 6] = [
        Self::Who,
        Self::What,
        Self::Where,
        Self::When,
        Self::Why,
        Self::How,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Who => "who",
            Self::What => "what",
            Self::Where => "where",
            Self::When => "when",
            Self::Why => "why",
            Self::How => "how",
            Self::FunctionFailure => "function_failure",
            Self::FailureMode => "failure_mode",
        }
    }
}

impl Display for ContextField {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 5W+1H situational analysis plus the failure definition.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Eq, PartialEq)]
pub struct SituationalContext {
    who: String,
    what: String,
    #[serde(rename = "where")]
    where_: String,
    when: String,
    why: String,
    how: String,
    function_failure: String,
    failure_mode: String,
}

impl SituationalContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, field: ContextField) -> &str {
        match field {
            ContextField::Who => &self.who,
            ContextField::What => &self.what,
            ContextField::Where => &self.where_,
            ContextField::When => &self.when,
            ContextField::Why => &self.why,
            ContextField::How => &self.how,
            ContextField::FunctionFailure => &self.function_failure,
            ContextField::FailureMode => &self.failure_mode,
        }
    }

    pub fn set(&mut self, field: ContextField, value: impl Into<String>) {
        let slot = match field {
            ContextField::Who => &mut self.who,
            ContextField::What => &mut self.what,
            ContextField::Where => &mut self.where_,
            ContextField::When => &mut self.when,
            ContextField::Why => &mut self.why,
            ContextField::How => &mut self.how,
            ContextField::FunctionFailure => &mut self.function_failure,
            ContextField::FailureMode => &mut self.failure_mode,
        };
        *slot = value.into();
    }

    /// True when all eight fields are non-empty.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        ContextField::ALL.iter().all(|field| !self.get(*field).is_empty())
    }

    #[must_use]
    pub fn missing_fields(&self) -> Vec<ContextField> {
        ContextField::ALL
            .into_iter()
            .filter(|field| self.get(*field).is_empty())
            .collect()
    }
}

/// Reduce a stored `when` timestamp to its calendar-date portion.
///
/// Older records carry full timestamps (`2024-03-01T08:15:00Z`); the editor
/// works with plain dates. Anything that does not start with a
/// `YYYY-MM-DD` date followed by `T` is free text and kept as-is.
#[must_use]
pub fn normalize_when(value: &str) -> String {
    let date_format = format_description!("[year]-[month]-[day]");
    match value.split_once('T') {
        Some((date, _)) if Date::parse(date, &date_format).is_ok() => date.to_string(),
        _ => value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled_context() -> SituationalContext {
        let mut context = SituationalContext::new();
        for field in ContextField::ALL {
            context.set(field, format!("{field} value"));
        }
        context
    }

    #[test]
    fn fresh_context_is_not_ready_and_reports_every_field_missing() {
        let context = SituationalContext::new();
        assert!(!context.is_ready());
        assert_eq!(context.missing_fields(), ContextField::ALL.to_vec());
    }

    #[test]
    fn context_is_ready_only_when_all_eight_fields_are_filled() {
        let context = filled_context();
        assert!(context.is_ready());
        assert!(context.missing_fields().is_empty());
    }

    #[test]
    fn context_with_empty_how_is_not_ready() {
        let mut context = filled_context();
        context.set(ContextField::How, "");
        assert!(!context.is_ready());
        assert_eq!(context.missing_fields(), vec![ContextField::How]);
    }

    #[test]
    fn context_with_empty_failure_mode_is_not_ready() {
        let mut context = filled_context();
        context.set(ContextField::FailureMode, String::new());
        assert!(!context.is_ready());
    }

    #[test]
    fn set_overwrites_previous_value() {
        let mut context = SituationalContext::new();
        context.set(ContextField::Where, "pump house");
        context.set(ContextField::Where, "boiler room");
        assert_eq!(context.get(ContextField::Where), "boiler room");
    }

    #[test]
    fn field_names_match_stored_keys() {
        let names = ContextField::ALL.map(ContextField::as_str);
        assert_eq!(
            names,
            ["who", "what", "where", "when", "why", "how", "function_failure", "failure_mode"]
        );
    }

    #[test]
    fn normalize_when_strips_time_portion() {
        assert_eq!(normalize_when("2024-03-01T08:15:00Z"), "2024-03-01");
        assert_eq!(normalize_when("2024-03-01"), "2024-03-01");
        assert_eq!(normalize_when(""), "");
    }

    #[test]
    fn normalize_when_keeps_free_text_containing_t() {
        assert_eq!(normalize_when("Tuesday night shift"), "Tuesday night shift");
        assert_eq!(normalize_when("During startup Test run"), "During startup Test run");
        assert_eq!(normalize_when("2024-13-01T08:15"), "2024-13-01T08:15");
        assert_eq!(normalize_when("shiftT2"), "shiftT2");
    }
}
