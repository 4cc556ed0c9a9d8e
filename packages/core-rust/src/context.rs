use crate::types::Principal;

/// Caller-side context attached to every invocation request.
/// Carries identity for authorization and a trace id for log correlation.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    /// Authenticated principal, if the caller is authenticated.
    pub principal: Option<Principal>,
    /// Distributed trace identifier propagated by the calling protocol layer.
    pub trace_id: Option<String>,
}

impl RequestContext {
    #[must_use]
    pub fn anonymous() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn authenticated(principal: Principal) -> Self {
        Self {
            principal: Some(principal),
            trace_id: None,
        }
    }
}
