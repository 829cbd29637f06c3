//! Transform plugin interface and registry.
//!
//! Plugins are capability objects selected by the current module type and
//! applied in descending priority until the type reaches a fixed point
//! (a type that maps to itself). Real transpilers (Sass, TypeScript, Babel)
//! plug in from the outside; the crate only ships a JSON plugin.

use std::path::Path;
use std::sync::Arc;

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::error::{BundleError, Result};

/// Context handed to a transform invocation.
pub struct TransformContext<'a> {
    pub path: &'a Path,
    /// Current module type, possibly already rewritten by an earlier plugin.
    pub file_type: &'a str,
    pub dev: bool,
}

/// A per-file-type transform hook.
///
/// `transform` consumes and returns the module body; `output_type` reports
/// the type the body has after transformation (`None` means unchanged).
pub trait TransformPlugin: Send + Sync {
    fn name(&self) -> &'static str;

    /// File types this plugin claims, with the leading dot.
    fn file_types(&self) -> &[&'static str];

    /// Higher priority plugins run first.
    fn priority(&self) -> i32 {
        0
    }

    fn output_type(&self, _file_type: &str) -> Option<&'static str> {
        None
    }

    fn transform(&self, body: String, cx: &TransformContext<'_>) -> Result<String>;
}

/// Priority-ordered plugin registry keyed by file type.
#[derive(Default)]
pub struct PluginRegistry {
    by_type: FxHashMap<String, SmallVec<[Arc<dyn TransformPlugin>; 2]>>,
}

impl PluginRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Registry with the stock JSON plugin.
    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        registry.add(Arc::new(JsonPlugin));
        registry
    }

    pub fn add(&mut self, plugin: Arc<dyn TransformPlugin>) {
        for &file_type in plugin.file_types() {
            let plugins = self.by_type.entry(file_type.to_string()).or_default();
            let at = plugins
                .iter()
                .position(|p| plugin.priority() > p.priority())
                .unwrap_or(plugins.len());
            plugins.insert(at, plugin.clone());
        }
    }

    pub fn plugins_for(&self, file_type: &str) -> &[Arc<dyn TransformPlugin>] {
        self.by_type.get(file_type).map_or(&[], |p| p.as_slice())
    }

    /// Run the body through matching plugins until its type stabilizes.
    ///
    /// Returns the final type. Each pass applies every plugin registered for
    /// the current type; a type change restarts the pass with the new type.
    pub fn apply(
        &self,
        path: &Path,
        mut file_type: String,
        body: &mut String,
        dev: bool,
    ) -> Result<String> {
        loop {
            let plugins = self.plugins_for(&file_type);
            if plugins.is_empty() {
                return Ok(file_type);
            }
            let mut next_type = None;
            for plugin in plugins {
                let cx = TransformContext {
                    path,
                    file_type: &file_type,
                    dev,
                };
                *body = plugin.transform(std::mem::take(body), &cx)?;
                if let Some(output) = plugin.output_type(&file_type)
                    && output != file_type
                {
                    next_type = Some(output.to_string());
                    break;
                }
            }
            match next_type {
                Some(ty) => file_type = ty,
                None => return Ok(file_type),
            }
        }
    }
}

// =============================================================================
// Built-in Plugins
// =============================================================================

/// Converts `.json` files into CommonJS modules.
pub struct JsonPlugin;

impl TransformPlugin for JsonPlugin {
    fn name(&self) -> &'static str {
        "json"
    }

    fn file_types(&self) -> &[&'static str] {
        &[".json"]
    }

    fn output_type(&self, _file_type: &str) -> Option<&'static str> {
        Some(".js")
    }

    fn transform(&self, body: String, cx: &TransformContext<'_>) -> Result<String> {
        let value: serde_json::Value = serde_json::from_str(&body)
            .map_err(|e| BundleError::transform(self.name(), cx.path, e.to_string()))?;
        Ok(format!("module.exports = {value};\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    struct Upper;
    impl TransformPlugin for Upper {
        fn name(&self) -> &'static str {
            "upper"
        }
        fn file_types(&self) -> &[&'static str] {
            &[".js"]
        }
        fn transform(&self, body: String, _cx: &TransformContext<'_>) -> Result<String> {
            Ok(body.to_uppercase())
        }
    }

    struct Late;
    impl TransformPlugin for Late {
        fn name(&self) -> &'static str {
            "late"
        }
        fn file_types(&self) -> &[&'static str] {
            &[".js"]
        }
        fn priority(&self) -> i32 {
            -10
        }
        fn transform(&self, body: String, _cx: &TransformContext<'_>) -> Result<String> {
            Ok(format!("{body}!"))
        }
    }

    #[test]
    fn test_json_reaches_js_fixed_point() {
        let registry = PluginRegistry::with_builtins();
        let path = PathBuf::from("/app/data.json");
        let mut body = r#"{"answer": 42}"#.to_string();
        let ty = registry
            .apply(&path, ".json".into(), &mut body, false)
            .unwrap();
        assert_eq!(ty, ".js");
        assert_eq!(body, "module.exports = {\"answer\":42};\n");
    }

    #[test]
    fn test_invalid_json_is_transform_error() {
        let registry = PluginRegistry::with_builtins();
        let path = PathBuf::from("/app/bad.json");
        let mut body = "{nope".to_string();
        let err = registry
            .apply(&path, ".json".into(), &mut body, false)
            .unwrap_err();
        assert!(matches!(err, BundleError::Transform { .. }));
    }

    #[test]
    fn test_priority_order() {
        let mut registry = PluginRegistry::empty();
        registry.add(Arc::new(Late));
        registry.add(Arc::new(Upper));

        let path = PathBuf::from("/app/a.js");
        let mut body = "hi".to_string();
        let ty = registry.apply(&path, ".js".into(), &mut body, false).unwrap();
        assert_eq!(ty, ".js");
        // Upper (priority 0) runs before Late (priority -10).
        assert_eq!(body, "HI!");
    }

    #[test]
    fn test_unclaimed_type_untouched() {
        let registry = PluginRegistry::with_builtins();
        let path = PathBuf::from("/app/a.css");
        let mut body = "a { color: red }".to_string();
        let ty = registry.apply(&path, ".css".into(), &mut body, false).unwrap();
        assert_eq!(ty, ".css");
        assert_eq!(body, "a { color: red }");
    }
}
