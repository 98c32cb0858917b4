//! The per-run context handed to hooks, services and resources.

use std::sync::{Arc, OnceLock};

use tokio_util::sync::CancellationToken;

use crate::error::StackError;
use crate::mode::{Mode, ServiceModes};

/// Cause reported when a context is cancelled without an explicit cause.
pub const CANCELED: &str = "context canceled";

/// Cancellation signal plus per-call options for one orchestration run.
///
/// Clones share the same cancellation state. The first recorded cause wins.
///
/// # Example
///
/// ```rust
/// use devstack::{Context, Mode, ServiceModes};
///
/// let mut modes = ServiceModes::new();
/// modes.set("api", Mode::Debug);
/// let ctx = Context::new().with_service_modes(modes);
///
/// assert_eq!(ctx.service_mode("api"), (Mode::Debug, true));
/// assert_eq!(ctx.service_mode("web"), (Mode::Default, false));
///
/// ctx.cancel_with_cause("interrupted");
/// assert_eq!(ctx.cause().as_deref(), Some("interrupted"));
/// ```
#[derive(Debug, Clone, Default)]
pub struct Context {
    token: CancellationToken,
    cause: Arc<OnceLock<String>>,
    modes: Arc<ServiceModes>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap an existing token, e.g. one cancelled by a signal handler.
    pub fn from_token(token: CancellationToken) -> Self {
        Self {
            token,
            ..Self::default()
        }
    }

    /// Attach per-call service mode overrides.
    pub fn with_service_modes(mut self, modes: ServiceModes) -> Self {
        self.modes = Arc::new(modes);
        self
    }

    /// A context sharing this one's cancellation, whose modes fall back to
    /// `base` for services without a per-call override.
    pub(crate) fn inheriting_modes(&self, base: &ServiceModes) -> Self {
        let mut modes = (*self.modes).clone();
        modes.inherit(base);
        Self {
            token: self.token.clone(),
            cause: Arc::clone(&self.cause),
            modes: Arc::new(modes),
        }
    }

    /// The mode for `service`, and whether it was set explicitly.
    pub fn service_mode(&self, service: &str) -> (Mode, bool) {
        match self.modes.get(service) {
            Some(mode) => (mode, true),
            None => (Mode::Default, false),
        }
    }

    pub fn service_modes(&self) -> &ServiceModes {
        &self.modes
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn cancel(&self) {
        self.cancel_with_cause(CANCELED);
    }

    pub fn cancel_with_cause(&self, cause: impl Into<String>) {
        let _ = self.cause.set(cause.into());
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Completes once the context is cancelled.
    pub async fn cancelled(&self) {
        self.token.cancelled().await;
    }

    /// The recorded cause, if cancelled.
    pub fn cause(&self) -> Option<String> {
        if !self.is_cancelled() {
            return None;
        }
        Some(
            self.cause
                .get()
                .cloned()
                .unwrap_or_else(|| CANCELED.to_string()),
        )
    }

    /// The cancellation as an error, if cancelled.
    pub fn err(&self) -> Option<StackError> {
        self.cause().map(|cause| StackError::Cancelled { cause })
    }
}
