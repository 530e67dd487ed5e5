use std::sync::Arc;

use crate::db::JobStore;
use crate::services::{intake::IntakeService, queue::WorkQueue};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn JobStore>,
    pub queue: Arc<dyn WorkQueue>,
    pub intake: IntakeService,
}

impl AppState {
    pub fn new(store: Arc<dyn JobStore>, queue: Arc<dyn WorkQueue>) -> Self {
        Self {
            intake: IntakeService::new(store.clone(), queue.clone()),
            store,
            queue,
        }
    }
}
