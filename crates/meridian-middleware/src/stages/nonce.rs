//! Script nonce injection.
//!
//! Development builds do not send a content security policy, but the page
//! renderer still tags its inline scripts with a nonce so the markup is the
//! same in both modes. This stage issues that nonce.

use uuid::Uuid;

use crate::context::RequestContext;
use crate::stage::{BoxFuture, Next, Stage, StageKind, StageResult};
use crate::types::Request;

/// Issues a fresh UUID v4 nonce for every request.
#[derive(Debug, Clone, Default)]
pub struct NonceInjector {
    _private: (),
}

impl NonceInjector {
    /// Creates the injector.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

/// Generates a nonce value.
#[must_use]
pub fn generate_nonce() -> String {
    Uuid::new_v4().to_string()
}

impl Stage for NonceInjector {
    fn kind(&self) -> StageKind {
        StageKind::NonceInjector
    }

    fn handle<'a>(
        &'a self,
        ctx: &'a mut RequestContext,
        request: Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, StageResult> {
        Box::pin(async move {
            ctx.set_nonce(generate_nonce());
            next.run(ctx, request).await
        })
    }
}
