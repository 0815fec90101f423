//! Configuration constants
//!
//! Compile-time defaults and upstream URLs. Runtime settings live in
//! [`crate::core::settings`].

pub mod defaults;
pub mod urls;
