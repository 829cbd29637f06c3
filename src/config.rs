//! Project configuration, read from `bindle.toml` at the project root.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, ensure};
use educe::Educe;
use serde::Deserialize;

use crate::crawl::{CrawlFilter, glob_regex};
use crate::file::Platform;

#[derive(Debug, Clone, Deserialize, Educe)]
#[educe(Default)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Entry file relative to the project root; the package `main` field
    /// when unset.
    pub entry: Option<String>,

    /// File types that take part in bundling, with the leading dot.
    #[educe(Default(expression = default_file_types()))]
    pub file_types: Vec<String>,

    /// Glob patterns excluded from crawling, e.g. `*.test.js`.
    pub exclude: Vec<String>,

    #[educe(Default(expression = String::from("web")))]
    pub platform: String,

    /// Development build: debuggable module identifiers, `__DEV__ = true`.
    #[educe(Default = true)]
    pub dev: bool,

    /// Where the payload is written; `bundle.js` under the root when unset.
    pub output: Option<PathBuf>,

    /// Globals compiled into the prelude as JSON values.
    pub globals: BTreeMap<String, serde_json::Value>,

    /// Scripts inlined into the prelude, relative to the root.
    pub polyfills: Vec<PathBuf>,
}

fn default_file_types() -> Vec<String> {
    vec![".js".to_string(), ".json".to_string()]
}

impl Config {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config '{}'", path.display()))?;
        let config: Self = toml::from_str(&text)
            .with_context(|| format!("invalid config '{}'", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        ensure!(
            Platform::parse(&self.platform).is_some(),
            "unknown platform '{}' (expected android, ios or web)",
            self.platform
        );
        for ty in &self.file_types {
            ensure!(
                ty.starts_with('.') && ty.len() > 1,
                "file type '{ty}' must start with a dot"
            );
        }
        Ok(())
    }

    pub fn platform(&self) -> Platform {
        Platform::parse(&self.platform).unwrap_or(Platform::Web)
    }

    pub fn filter(&self) -> CrawlFilter {
        CrawlFilter::new(self.file_types.clone(), glob_regex(&self.exclude))
    }

    pub fn output_path(&self, root: &Path) -> PathBuf {
        match &self.output {
            Some(path) if path.is_absolute() => path.clone(),
            Some(path) => root.join(path),
            None => root.join("bundle.js"),
        }
    }

    /// Polyfill paths resolved against the root.
    pub fn polyfill_paths(&self, root: &Path) -> Vec<PathBuf> {
        self.polyfills
            .iter()
            .map(|p| {
                if p.is_absolute() {
                    p.clone()
                } else {
                    root.join(p)
                }
            })
            .collect()
    }
}
