use crate::tokens::TokenRing;
use cachegate_service::CacheService;
use std::sync::Arc;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<CacheService>,
    pub tokens: Arc<TokenRing>,
    pub password: Arc<str>,
}

impl AppState {
    pub fn new(service: Arc<CacheService>, tokens: Arc<TokenRing>, password: &str) -> Self {
        Self {
            service,
            tokens,
            password: Arc::from(password),
        }
    }
}
