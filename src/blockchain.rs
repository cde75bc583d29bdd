// Thin re-export module: implementation is in `blockchain/core.rs`, split into
// chain construction, account state and verification.

pub mod core;
pub use core::*;
