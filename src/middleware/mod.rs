pub mod chain;
pub mod extractor;
pub mod request_context;

pub use chain::{Chain, Handler, HandlerOutcome};
pub use extractor::AuthenticatedRequest;
pub use request_context::RequestContext;
