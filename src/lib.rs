//! bindle: an incremental JavaScript module bundler.
//!
//! A bundle is compiled from scratch once, then kept up to date by
//! patching the emitted payload in place: changed modules are re-emitted
//! at their old position, deleted ones are spliced out (cascading into
//! dependencies nothing else imports), and new ones are appended before
//! the bootstrap. Unresolved imports are data, not errors: they are
//! reported per build and fail loudly at runtime through the require shim.

pub mod bundle;
pub mod bundler;
pub mod config;
pub mod crawl;
pub mod error;
pub mod file;
pub mod logger;
pub mod package;
pub mod parse;
pub mod plugin;
pub mod project;
pub mod resolve;

pub use bundle::{Bundle, IdentMode, MissingReport, ModuleId, ModuleStatus, ReadConfig, StopToken};
pub use bundler::Bundler;
pub use config::Config;
pub use crawl::CrawlFilter;
pub use error::{BundleError, Result};
pub use file::{FileId, PackageId, Platform};
pub use parse::{ImportParser, ParserRegistry};
pub use plugin::{PluginRegistry, TransformContext, TransformPlugin};
pub use project::Project;
