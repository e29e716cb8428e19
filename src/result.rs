//! Result and error types for the pass.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::abilist::CategoryListError;
use crate::config::ConfigError;

/// An error that aborts the pass. Structural oddities in the input module
/// are never errors; the pass instruments less instead.
#[derive(Debug, Error)]
pub enum PassError {
    /// The module has no identifier to hash ids and seeds from.
    #[error("module has no name")]
    MissingModuleName,

    /// A configuration value was out of range.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A category list file could not be read.
    #[error(transparent)]
    CategoryList(#[from] CategoryListError),

    /// The comparison CFG could not be written.
    #[error("failed to write control-flow graph {path}: {source}")]
    CfgWrite {
        /// The output path.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },
}

/// A convenient alias for pass results.
pub type PassResult<T> = Result<T, PassError>;
