pub mod context;
pub mod engine;
pub mod message;
pub mod metrics;
pub mod redis_storage;
pub mod router;
pub mod scheduler;
pub mod storage;
