//! WASM bindings for RichSync
//!
//! This module provides JavaScript-friendly bindings for the richtext sync engine.

pub mod bindings;
pub mod utils;

// Re-export main types
pub use bindings::{between, present, WasmDocument, WasmSession};
