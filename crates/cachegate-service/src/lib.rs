//! Cache orchestration for cachegate: the controller, the sync, eviction
//! and migration engines, and the document language they evaluate.

pub mod aggregation;
pub mod controller;
pub mod document;
pub mod eviction_engine;
pub mod filter;
pub mod guard;
pub mod migration_engine;
pub mod patch;
pub mod retry;
pub mod service;
pub mod sync_engine;

pub use aggregation::Pipeline;
pub use controller::CacheController;
pub use eviction_engine::{resolve_budget, EvictionEngine, EvictionReport};
pub use filter::Filter;
pub use migration_engine::{
    MigrationEngine, MigrationMode, MigrationPhase, MigrationProgress, MigrationReport,
};
pub use patch::apply_patch;
pub use service::CacheService;
pub use sync_engine::{SyncEngine, SyncReport};
