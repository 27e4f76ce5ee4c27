// Core types, errors, and the buy-lock store
pub mod core;

// Shared retry/backoff utilities
pub mod util;

// Engine configuration
pub mod config;

// Ledger feed ingestion and pool-creation parsing
pub mod ingest;

// Token metadata enrichment
pub mod enrich;

// Per-user filter evaluation
pub mod scout;

// Trade execution (swap router, signing, bundle relay)
pub mod strike;

// Durable positions and exit monitoring
pub mod position;

// Notification fan-out
pub mod transport;

// User directory seam
pub mod users;

// Event fan-out wiring
pub mod orchestrator;

// Re-export commonly used types for convenience
pub use self::core::error::ExecutionError;
pub use self::core::types::{
    CloseReason, NotificationEvent, PoolEvent, Position, PositionStatus, TokenRecord, UserConfig,
};
