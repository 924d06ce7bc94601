//! # ccforge - parallel C/C++ build orchestration
//!
//! ccforge builds multi-project C/C++ workspaces described by a `ccf.toml`
//! manifest. It decides what is stale, packs sources into chunks, prepares
//! precompiled headers, and compiles and links projects in dependency order
//! on bounded worker pools.
//!
//! ## Quick Start
//!
//! ```bash
//! # Build every project for the default targets
//! ccf build
//!
//! # Rebuild one project and what it depends on
//! ccf rebuild --project app --target release
//! ```
//!
//! ## Module Organization
//!
//! - [`graph`] - Dependency reconciliation and build order
//! - [`staleness`] / [`headers`] / [`cache`] - Incremental rebuild decisions
//! - [`chunk`] / [`precompile`] - Compile unit planning
//! - [`build`] - Compile and link scheduling
//! - [`toolchain`] - Compiler and linker back ends

/// Compile and link scheduling.
pub mod build;

/// Shared mtime/content-hash cache and the on-disk hash store.
pub mod cache;

/// Chunking of sources into merged compile units.
pub mod chunk;

/// Manifest parsing (`ccf.toml`).
pub mod config;

/// Compiler and linker messages.
pub mod diagnostic;

/// Typed errors.
pub mod error;

/// Project dependency graph.
pub mod graph;

/// Include scanning and transitive header resolution.
pub mod headers;

/// Precompiled header superheaders.
pub mod precompile;

/// Project model, state machines and manifest expansion.
pub mod project;

/// Recompile decisions.
pub mod staleness;

/// Toolchain detection and command construction.
pub mod toolchain;

/// Progress output and summary tables.
pub mod ui;
