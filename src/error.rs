//! Error types for the bundler core.
//!
//! Structural errors (graph invariant violations, unsupported refs, malformed
//! packages) propagate immediately. Unresolved import refs are *not* errors:
//! they are recorded per module and surfaced through the missing report.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BundleError {
    /// A live module already exists for the file.
    #[error("module already exists: '{0}'")]
    ModuleExists(PathBuf),

    /// Lookup of a module that was never added to the graph.
    #[error("module not found: '{0}'")]
    ModuleNotFound(PathBuf),

    /// Absolute import refs are rejected; imports resolve relative to the
    /// owning package or through declared dependencies.
    #[error("unsupported import '{ref_}' from '{file}'")]
    UnsupportedImport { file: PathBuf, ref_: String },

    /// A package directory exists but has no readable `package.json`.
    #[error("package must contain a 'package.json' file: '{0}'")]
    PackageMetadataMissing(PathBuf),

    /// The package manifest could not be parsed.
    #[error("invalid package manifest: '{path}'")]
    PackageMetadataInvalid {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// Patching requires a prior successful from-scratch compile.
    #[error("cannot patch a bundle before it has been compiled")]
    PatchBeforeCompile,

    /// The entry file could not be resolved at bundle creation.
    #[error("missing entry module for platform '{platform}'")]
    NoEntryModule { platform: String },

    /// A transform plugin failed while compiling one module.
    #[error("plugin '{plugin}' failed to transform '{path}': {message}")]
    Transform {
        plugin: String,
        path: PathBuf,
        message: String,
    },

    #[error("IO error when reading `{0}`")]
    Io(PathBuf, #[source] std::io::Error),
}

pub type Result<T> = std::result::Result<T, BundleError>;

impl BundleError {
    pub fn unsupported_import(file: impl Into<PathBuf>, ref_: impl Into<String>) -> Self {
        Self::UnsupportedImport {
            file: file.into(),
            ref_: ref_.into(),
        }
    }

    pub fn transform(
        plugin: impl Into<String>,
        path: impl Into<PathBuf>,
        message: impl Into<String>,
    ) -> Self {
        Self::Transform {
            plugin: plugin.into(),
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io(path.into(), source)
    }

    /// True when resolution should keep searching instead of aborting,
    /// e.g. a dependency directory without a manifest.
    pub fn is_package_not_found(&self) -> bool {
        matches!(self, Self::PackageMetadataMissing(_))
    }
}
