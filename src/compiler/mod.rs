pub mod core;
pub mod expander;
pub mod exporter;
pub mod loader;
pub mod verifier;
