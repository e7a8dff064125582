pub mod actions;
pub mod compiler;
pub mod dsl;
pub mod error;
pub mod expr;
pub mod nodes;
pub mod runtime;

pub use error::{EngineError, EngineResult};
