pub mod context;
pub mod engine;
pub mod identifier;
pub mod net;
pub mod or_join;
pub mod storage;
pub mod redis_storage;
