use sqlx::PgPool;
use std::sync::Arc;

use crate::services::{queue::PassQueue, storage::ObjectStore, tokens::TokenVerifier};

/// Shared state passed to all route handlers and the worker loop.
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub storage: Arc<ObjectStore>,
    pub queue: Arc<PassQueue>,
    pub tokens: Arc<TokenVerifier>,
}

impl AppState {
    pub fn new(db: PgPool, storage: ObjectStore, queue: PassQueue, tokens: TokenVerifier) -> Self {
        Self {
            db,
            storage: Arc::new(storage),
            queue: Arc::new(queue),
            tokens: Arc::new(tokens),
        }
    }
}
