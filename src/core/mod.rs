//! Core business logic
//!
//! Everything that decides *what* happens to a repository. Talking to the
//! network, spawning tools and signing belong in [`crate::infra`].
//!
//! # Submodules
//!
//! - [`definition`] - Definition grammar, parsing and per-kind validation
//! - [`scope`] - Variable scope and `$VAR` substitution
//! - [`version`] - Version resolution (literal, `re:`, `gh:`)
//! - [`fetch`] - Download commands and private-store copies
//! - [`transform`] - File transforms in the working directory
//! - [`interpreter`] - Runs one definition end to end
//! - [`debian`] - Sandboxed Debian-from-scratch packaging
//! - [`cask`], [`conda`], [`choco`] - Ecosystem packagers
//! - [`assembler`] - Per-ecosystem index generation and signing
//! - [`builder`] - Worker pool, locks and the build report
//! - [`reload`] - Feed server restart
//! - [`layout`] - On-disk repository layout and artifact naming
//! - [`settings`] - `reposmith.toml`

pub mod assembler;
pub mod builder;
pub mod cask;
pub mod choco;
pub mod conda;
pub mod context;
pub mod debian;
pub mod definition;
pub mod fetch;
pub mod interpreter;
pub mod layout;
pub mod reload;
pub mod scope;
pub mod settings;
pub mod transform;
pub mod version;
