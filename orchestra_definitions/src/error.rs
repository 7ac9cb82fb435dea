/// The control plane's shared error taxonomy.
///
/// Every component surfaces one of these kinds, either directly
/// (`Err(OrchestraErrorKind::NotFound(id))?`) or as context wrapping a lower
/// level cause (`.context(OrchestraErrorKind::UpstreamFailure(..))?`, the
/// same idiom `vault.rs`/`grafana.rs` use with their own per-module kinds).
/// The HTTP facade and the gateway both collapse a kind down to a status
/// code with `status_code()` to build the `{"detail": "..."}` envelope.
use failure::Context;

#[derive(Clone, Eq, PartialEq, Debug, Fail)]
pub enum OrchestraErrorKind {
    #[fail(display = "request or recipe malformed: {}", _0)]
    ValidationError(String),

    #[fail(display = "recipe '{}' not found", _0)]
    RecipeNotFound(String),

    #[fail(display = "'{}' not found", _0)]
    NotFound(String),

    #[fail(display = "illegal transition for '{}': {} -> {}", _0, _1, _2)]
    InvalidTransition(String, String, String),

    #[fail(display = "service '{}' is not ready yet", _0)]
    NotReady(String),

    #[fail(display = "tunnel to {} is unreachable", _0)]
    TunnelFailure(String),

    #[fail(display = "scheduler token expired")]
    AuthExpired,

    #[fail(display = "upstream returned {}: {}", _0, _1)]
    UpstreamFailure(u16, String),

    #[fail(display = "deadline exceeded after {}ms", _0)]
    Timeout(u64),

    #[fail(display = "all replicas in group '{}' are down", _0)]
    AllReplicasDown(String),
}

impl OrchestraErrorKind {
    /// The HTTP status code this error kind maps to, per spec section 7.
    pub fn status_code(&self) -> u16 {
        use self::OrchestraErrorKind::*;
        match *self {
            ValidationError(_) => 400,
            RecipeNotFound(_) => 404,
            NotFound(_) => 404,
            InvalidTransition(..) => 409,
            NotReady(_) => 409,
            TunnelFailure(_) => 502,
            AuthExpired => 401,
            UpstreamFailure(..) => 502,
            Timeout(_) => 504,
            AllReplicasDown(_) => 503,
        }
    }
}

/// Walk a `failure::Error`'s causal chain looking for an `OrchestraErrorKind`,
/// whether it was returned bare or wrapped via `.context(..)`.
///
/// Used at the outermost handler (the facade and the gateway) to decide the
/// HTTP status; anything that isn't one of ours falls back to 500.
pub fn find_kind(err: &::failure::Error) -> Option<OrchestraErrorKind> {
    if let Some(k) = err.downcast_ref::<OrchestraErrorKind>() {
        return Some(k.clone());
    }
    if let Some(ctx) = err.downcast_ref::<Context<OrchestraErrorKind>>() {
        return Some(ctx.get_context().clone());
    }
    None
}
