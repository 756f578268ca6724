//! Middleware chain runtime. Each stage of the auth pipeline (spec §4.3) is
//! a `Handler`; `Chain::run` walks the list in order the way the original
//! server's `next()`/`next(error)`/`next(false)` callback chain did, but as
//! a plain returned enum rather than a callback invoked by the handler
//! itself — a handler physically cannot call "next" twice.

use async_trait::async_trait;
use axum::response::Response;

use crate::error::AppError;
use crate::middleware::request_context::RequestContext;

/// What a handler decided to do with the request.
pub enum HandlerOutcome {
    /// Continue to the next handler in the chain.
    Next,
    /// Short-circuit the chain and return this response as-is (the
    /// original's `next(false)`: stop, but not an error).
    Stop(Response),
    /// Short-circuit the chain with an error response.
    Fail(AppError),
}

#[async_trait]
pub trait Handler: Send + Sync {
    fn name(&self) -> &'static str;
    async fn handle(&self, ctx: &mut RequestContext) -> HandlerOutcome;
}

pub struct Chain {
    handlers: Vec<Box<dyn Handler>>,
}

impl Chain {
    pub fn new(handlers: Vec<Box<dyn Handler>>) -> Self {
        Self { handlers }
    }

    /// Runs every handler until one does not return `Next`. Returns `Ok(())`
    /// if every handler ran to completion, or the response/error that
    /// ended the chain early.
    pub async fn run(&self, ctx: &mut RequestContext) -> Result<(), ChainEnd> {
        for handler in &self.handlers {
            match handler.handle(ctx).await {
                HandlerOutcome::Next => continue,
                HandlerOutcome::Stop(response) => {
                    tracing::debug!(handler = handler.name(), "chain stopped");
                    return Err(ChainEnd::Stopped(response));
                }
                HandlerOutcome::Fail(err) => {
                    tracing::debug!(handler = handler.name(), error = %err, "chain failed");
                    return Err(ChainEnd::Failed(err));
                }
            }
        }
        Ok(())
    }
}

pub enum ChainEnd {
    Stopped(Response),
    Failed(AppError),
}
