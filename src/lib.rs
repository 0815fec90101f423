//! Reposmith - private multi-ecosystem package repository builder
//!
//! Turns package definition files into apt, Homebrew Cask, Conda and
//! Chocolatey artifacts and assembles the signed indexes each client expects.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`cli`] - Command-line interface parsing and output formatting
//! - [`core`] - Business logic: definitions, interpreter, packagers, assembler
//! - [`infra`] - Infrastructure layer (network, filesystem, processes, signing)
//! - [`config`] - Constants
//! - [`error`] - Error types and handling

pub mod cli;
pub mod config;
pub mod core;
pub mod error;
pub mod infra;
