pub mod admin;
pub mod cache;
pub mod health;
pub mod session;

pub use admin::{evict, migrate, migrate_status, sync_data};
pub use cache::{delete_entry, get_entry, set_entry, update_entry};
pub use health::health;
pub use session::{login, test_connection, update_token};

use crate::error::{ApiError, ApiResult};
use serde_json::Value;

pub(crate) fn parse_json(field: &'static str, raw: &str) -> ApiResult<Value> {
    serde_json::from_str(raw).map_err(|e| ApiError::MalformedJson {
        field,
        message: e.to_string(),
    })
}
