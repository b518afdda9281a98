//! Builders to construct dispatch components from configuration.

#[cfg(not(target_arch = "wasm32"))]
pub mod dispatcher_builder;

#[cfg(not(target_arch = "wasm32"))]
pub use dispatcher_builder::{build_dispatcher, Dispatcher};
