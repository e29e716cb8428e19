//! Compile-time instrumentation for directed greybox fuzzing.
//!
//! Given a module of low-level IR, the pass rewrites it so the resulting
//! binary emits an edge-coverage and comparison trace for the fuzzer, and
//! terminates early on paths that can no longer reach a sink of interest.
//! The same source compiles in two modes, `fast` for production fuzzing
//! and `track` for constraint collection, and stable instruction ids keep
//! the two builds' comparison ids aligned.
//!
//! The pieces, bottom up: [`ir`] is the module/function/instruction
//! representation; [`flowgraph`] and [`callgraph`] are the graphs over it;
//! [`reachability`] classifies blocks by sink/source reachability;
//! [`instrument`] does the rewriting; [`terminate`] cuts edges that leave
//! the interesting region; [`cfg_export`] writes the comparison graph that
//! track mode hands to the fuzzer.

#![warn(missing_docs)]

pub mod abilist;
pub mod callgraph;
pub mod cfg_export;
pub mod config;
pub mod cursor;
pub mod flowgraph;
pub mod ids;
pub mod instrument;
pub mod ir;
pub mod reachability;
pub mod runtime;
pub mod terminate;
pub mod unreachable;

mod result;

pub use crate::abilist::CategoryList;
pub use crate::config::{Config, Mode};
pub use crate::instrument::{instrument_module, instrument_module_with, PassSummary};
pub use crate::result::{PassError, PassResult};

/// Version number of this crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
