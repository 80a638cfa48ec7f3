//! HTTP route handlers.

pub mod allocations;
pub mod batches;
pub mod health;
pub mod metrics;

use std::sync::Arc;

use service::MessageBus;
use store::AllocationsView;

/// Shared application state accessible from all handlers.
pub struct AppState {
    pub bus: MessageBus,
    pub allocations: Arc<dyn AllocationsView>,
}
