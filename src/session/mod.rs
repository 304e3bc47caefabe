//! Token reconciliation between the credential store and the UI surface.
//!
//! Each [`SessionOrchestrator::reconcile`] pass issues at most one navigation,
//! and the per-project [`InjectionSession`] caps how many passes may navigate
//! before the loop breaker leaves the UI alone.

mod orchestrator;
mod surface;
mod validator;

pub use orchestrator::{
    InjectionSession, ReconcileOutcome, SessionOrchestrator, SessionSettings,
    REASON_LOGGED_OUT, REASON_TOKEN_INJECTION_FAILED, REASON_TOKEN_INVALID_OR_MISSING,
};
pub use surface::{HeadlessSurface, InjectionOutcome, UiSurface};
pub use validator::{HttpTokenValidator, TokenValidator, ValidationOutcome};
