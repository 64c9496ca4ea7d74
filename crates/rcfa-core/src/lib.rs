//! Root-cause failure analysis engine: situational context, the causal
//! "why" chain, the action ledger, and their mapping onto a stored problem
//! record.

mod analysis;
mod chain;
mod change;
mod codec;
mod context;
mod error;
mod ledger;
mod record;

pub use analysis::Analysis;
pub use chain::{CausalChain, ChainState, Hypothesis, RootCauseRef, Step};
pub use change::AnalysisChange;
pub use codec::{decode, encode, DecodeReport, Decoded, LEGACY_NOTE_QUESTION};
pub use context::{normalize_when, ContextField, SituationalContext};
pub use error::RcfaError;
pub use ledger::{Action, ActionId, ActionLedger, ActionStatus, NewAction};
pub use record::{ProblemId, ProblemPatch, ProblemRecord, ProblemStatus};
