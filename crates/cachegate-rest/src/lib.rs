//! HTTP gateway for cachegate.

pub mod error;
pub mod handlers;
pub mod middleware;
pub mod rest;
pub mod state;
pub mod telemetry;
pub mod tokens;

pub use error::{ApiError, ApiResult};
pub use rest::build_router;
pub use state::AppState;
pub use tokens::TokenRing;
