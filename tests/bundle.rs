//! End-to-end bundling scenarios through the public API.

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tempfile::TempDir;

use bindle::crawl::glob_regex;
use bindle::{
    BundleError, Bundler, CrawlFilter, ParserRegistry, Platform, PluginRegistry, Project,
    ReadConfig,
};

fn write_file(root: &Path, rel: &str, body: &str) {
    let path = root.join(rel);
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).unwrap();
    }
    fs::write(path, body).unwrap();
}

fn app(files: &[(&str, &str)]) -> TempDir {
    let tmp = TempDir::new().unwrap();
    write_file(
        tmp.path(),
        "package.json",
        r#"{"name":"app","version":"1.0.0","main":"index.js"}"#,
    );
    for (rel, body) in files {
        write_file(tmp.path(), rel, body);
    }
    tmp
}

fn project(root: &Path) -> Project {
    Project::new(
        Arc::new(Bundler::new()),
        Arc::new(PluginRegistry::with_builtins()),
        Arc::new(ParserRegistry::with_builtins()),
        root.to_path_buf(),
        CrawlFilter::new(vec![".js".into(), ".json".into()], glob_regex(&[])),
    )
    .unwrap()
}

#[tokio::test]
async fn test_compile_payload_shape() {
    let tmp = app(&[
        ("index.js", "var a = require('./a');\n"),
        ("a.js", "module.exports = 'a';\n"),
    ]);
    let project = project(tmp.path());
    let bundle = project.bundle(None, Platform::Web, true).unwrap();

    let payload = bundle.read(&ReadConfig::default()).await.unwrap();
    assert!(payload.starts_with("(function() {\n  var __DEV__ = true;\n"));
    assert!(payload.contains("__d(\"app\", function(module, exports) {"));
    assert!(payload.contains("__d(\"app/a.js\", function(module, exports) {"));
    assert!(payload.contains("require('app/a.js')"));
    assert!(payload.ends_with("\n  require(\"app\");\n})()"));
    assert_eq!(bundle.module_count().await, 2);
}

#[tokio::test]
async fn test_patch_matches_fresh_compile() {
    let tmp = app(&[
        ("index.js", "require('./a');\nrequire('./b');\n"),
        ("a.js", "module.exports = 1;\n"),
        ("b.js", "module.exports = 2;\n"),
    ]);
    let project = project(tmp.path());
    let bundle = project.bundle(None, Platform::Web, true).unwrap();
    bundle.read(&ReadConfig::default()).await.unwrap();

    // Content-only edit, same length not required.
    write_file(tmp.path(), "a.js", "module.exports = 'one hundred';\n");
    assert!(project.reload_file(&tmp.path().join("a.js")));
    let patched = bundle.read(&ReadConfig::default()).await.unwrap();

    let fresh = fresh_compile(tmp.path()).await;
    assert_eq!(patched, fresh);
}

async fn fresh_compile(root: &Path) -> String {
    let project = project(root);
    let bundle = project.bundle(None, Platform::Web, true).unwrap();
    bundle.read(&ReadConfig::default()).await.unwrap()
}

#[tokio::test]
async fn test_removing_import_cascades() {
    let tmp = app(&[
        ("index.js", "require('./a');\n"),
        ("a.js", "require('./b');\n"),
        ("b.js", "module.exports = 2;\n"),
    ]);
    let project = project(tmp.path());
    let bundle = project.bundle(None, Platform::Web, true).unwrap();
    bundle.read(&ReadConfig::default()).await.unwrap();
    assert_eq!(bundle.module_count().await, 3);

    // Dropping the only ref to `a` also removes `b`.
    write_file(tmp.path(), "index.js", "module.exports = 0;\n");
    project.reload_file(&tmp.path().join("index.js"));
    let payload = bundle.read(&ReadConfig::default()).await.unwrap();
    assert_eq!(bundle.module_count().await, 1);
    assert!(!payload.contains("__d(\"app/a.js\""));
    assert!(!payload.contains("__d(\"app/b.js\""));

    // Re-adding the import revives the chain.
    write_file(tmp.path(), "index.js", "require('./a');\n");
    project.reload_file(&tmp.path().join("index.js"));
    let payload = bundle.read(&ReadConfig::default()).await.unwrap();
    assert_eq!(bundle.module_count().await, 3);
    assert!(payload.contains("__d(\"app/a.js\""));
    assert!(payload.contains("__d(\"app/b.js\""));
    assert_eq!(payload, fresh_compile(tmp.path()).await);
}

#[tokio::test]
async fn test_cycle_survives_unrelated_delete() {
    let tmp = app(&[
        ("index.js", "require('./a');\nrequire('./x');\n"),
        ("a.js", "require('./b');\n"),
        ("b.js", "require('./a');\nmodule.exports = 2;\n"),
        ("x.js", "module.exports = 'x';\n"),
    ]);
    let project = project(tmp.path());
    let bundle = project.bundle(None, Platform::Web, true).unwrap();
    bundle.read(&ReadConfig::default()).await.unwrap();
    assert_eq!(bundle.module_count().await, 4);

    write_file(tmp.path(), "index.js", "require('./a');\n");
    project.reload_file(&tmp.path().join("index.js"));
    let payload = bundle.read(&ReadConfig::default()).await.unwrap();
    // The a<->b cycle is still reachable; only x goes.
    assert_eq!(bundle.module_count().await, 3);
    assert!(payload.contains("__d(\"app/a.js\""));
    assert!(!payload.contains("__d(\"app/x.js\""));
}

#[tokio::test]
async fn test_deleted_file_reported_missing_then_recovers() {
    let tmp = app(&[
        ("index.js", "require('./gone');\n"),
        ("gone.js", "module.exports = 1;\n"),
    ]);
    let project = project(tmp.path());
    let bundle = project.bundle(None, Platform::Web, true).unwrap();
    bundle.read(&ReadConfig::default()).await.unwrap();
    assert!(bundle.missing_imports().await.is_empty());

    let path = tmp.path().join("gone.js");
    fs::remove_file(&path).unwrap();
    assert!(project.delete_file(&path));
    let payload = bundle.read(&ReadConfig::default()).await.unwrap();
    assert_eq!(bundle.module_count().await, 1);
    // The consumer keeps the raw ref, which the shim rejects at runtime.
    assert!(payload.contains("require('./gone')"));
    let missing = bundle.missing_imports().await;
    assert_eq!(missing.len(), 1);
    assert_eq!(missing[0].1, vec!["./gone".to_string()]);

    // The file comes back: the retry resolves it and the report clears.
    write_file(tmp.path(), "gone.js", "module.exports = 1;\n");
    project.reload_file(&path);
    let payload = bundle.read(&ReadConfig::default()).await.unwrap();
    assert_eq!(bundle.module_count().await, 2);
    assert!(payload.contains("__d(\"app/gone.js\""));
    assert!(bundle.missing_imports().await.is_empty());
}

#[tokio::test]
async fn test_missing_hook_fires() {
    let tmp = app(&[("index.js", "require('no-such-pkg');\n")]);
    let project = project(tmp.path());
    let bundle = project.bundle(None, Platform::Web, true).unwrap();

    let fired = Arc::new(AtomicUsize::new(0));
    let seen = fired.clone();
    bundle.on_missing(move |report| {
        assert_eq!(report[0].1, vec!["no-such-pkg".to_string()]);
        seen.fetch_add(1, Ordering::SeqCst);
    });

    bundle.read(&ReadConfig::default()).await.unwrap();
    assert_eq!(fired.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_dependency_package_resolution() {
    let tmp = app(&[
        ("index.js", "var pad = require('pad');\nrequire('pad/extra');\n"),
        (
            "node_modules/pad/package.json",
            r#"{"name":"pad","version":"2.1.0","main":"lib/pad.js"}"#,
        ),
        ("node_modules/pad/lib/pad.js", "module.exports = function() {};\n"),
        ("node_modules/pad/extra.js", "module.exports = 0;\n"),
    ]);
    // The app package must declare the dependency.
    write_file(
        tmp.path(),
        "package.json",
        r#"{"name":"app","version":"1.0.0","main":"index.js","dependencies":{"pad":"^2.0.0"}}"#,
    );
    let project = project(tmp.path());
    let bundle = project.bundle(None, Platform::Web, true).unwrap();

    let payload = bundle.read(&ReadConfig::default()).await.unwrap();
    assert_eq!(bundle.module_count().await, 3);
    assert!(payload.contains("__d(\"pad/lib/pad.js\""));
    assert!(payload.contains("__d(\"pad/extra.js\""));
    assert!(payload.contains("require('pad/lib/pad.js')"));
}

#[tokio::test]
async fn test_json_module() {
    let tmp = app(&[
        ("index.js", "var data = require('./data.json');\n"),
        ("data.json", r#"{"answer": 42}"#),
    ]);
    let project = project(tmp.path());
    let bundle = project.bundle(None, Platform::Web, true).unwrap();

    let payload = bundle.read(&ReadConfig::default()).await.unwrap();
    assert!(payload.contains("__d(\"app/data.json\""));
    assert!(payload.contains("module.exports = {\"answer\":42};"));
}

#[tokio::test]
async fn test_failed_patch_recovers_with_fresh_compile() {
    let tmp = app(&[
        ("index.js", "var data = require('./data.json');\n"),
        ("data.json", r#"{"ok": true}"#),
    ]);
    let project = project(tmp.path());
    let bundle = project.bundle(None, Platform::Web, true).unwrap();
    bundle.read(&ReadConfig::default()).await.unwrap();

    // A broken edit fails the patch.
    write_file(tmp.path(), "data.json", "{nope");
    project.reload_file(&tmp.path().join("data.json"));
    assert!(bundle.read(&ReadConfig::default()).await.is_err());

    // Fixing the file builds cleanly; the failed patch must not have eaten
    // the previous payload or left stale offsets behind.
    write_file(tmp.path(), "data.json", r#"{"ok": false}"#);
    project.reload_file(&tmp.path().join("data.json"));
    let payload = bundle.read(&ReadConfig::default()).await.unwrap();
    assert!(payload.contains("module.exports = {\"ok\":false};"));
    assert_eq!(payload, fresh_compile(tmp.path()).await);
}

#[tokio::test]
async fn test_duplicate_refs_to_one_module_survive_dropping_one() {
    let tmp = app(&[
        ("index.js", "require('./a');\nrequire('./a.js');\n"),
        ("a.js", "module.exports = 1;\n"),
    ]);
    let project = project(tmp.path());
    let bundle = project.bundle(None, Platform::Web, true).unwrap();
    bundle.read(&ReadConfig::default()).await.unwrap();
    assert_eq!(bundle.module_count().await, 2);

    // Both refs resolve to the same module; dropping one keeps it alive.
    write_file(tmp.path(), "index.js", "require('./a.js');\n");
    project.reload_file(&tmp.path().join("index.js"));
    let payload = bundle.read(&ReadConfig::default()).await.unwrap();
    assert_eq!(bundle.module_count().await, 2);
    assert!(payload.contains("__d(\"app/a.js\""));
    assert_eq!(payload, fresh_compile(tmp.path()).await);
}

#[tokio::test]
async fn test_add_module_and_module_id() {
    let tmp = app(&[
        ("index.js", "module.exports = 1;\n"),
        ("extra.js", "module.exports = 2;\n"),
    ]);
    let project = project(tmp.path());
    let bundle = project.bundle(None, Platform::Web, true).unwrap();
    bundle.read(&ReadConfig::default()).await.unwrap();

    let entry = bundle.entry_file();
    assert!(matches!(
        bundle.add_module(entry).await,
        Err(BundleError::ModuleExists(_))
    ));
    assert!(bundle.module_id(entry).await.is_ok());

    // A crawled but unimported file has no module until added explicitly.
    let extra = project
        .bundler()
        .get_file(&tmp.path().join("extra.js"))
        .unwrap();
    assert!(matches!(
        bundle.module_id(extra).await,
        Err(BundleError::ModuleNotFound(_))
    ));
    let added = bundle.add_module(extra).await.unwrap();
    assert_eq!(bundle.module_id(extra).await.unwrap(), added);
    assert!(matches!(
        bundle.add_module(extra).await,
        Err(BundleError::ModuleExists(_))
    ));
}

#[tokio::test]
async fn test_globals_and_release_flavor() {
    let tmp = app(&[("index.js", "module.exports = 1;\n")]);
    let project = project(tmp.path());
    let bundle = project.bundle(None, Platform::Web, false).unwrap();

    let mut cfg = ReadConfig::default();
    cfg.globals
        .insert("API_URL".to_string(), serde_json::json!("https://x.test"));
    let payload = bundle.read(&cfg).await.unwrap();
    assert!(payload.contains("var __DEV__ = false;\n"));
    assert!(payload.contains("var API_URL = \"https://x.test\";\n"));
    // Release bundles use terse numeric identifiers.
    assert!(payload.contains("__d(0, function(module, exports) {"));
    assert!(payload.ends_with("\n  require(0);\n})()"));
}

#[tokio::test]
async fn test_concurrent_reads_share_one_build() {
    let tmp = app(&[
        ("index.js", "require('./a');\n"),
        ("a.js", "module.exports = 1;\n"),
    ]);
    let project = project(tmp.path());
    let bundle = project.bundle(None, Platform::Web, true).unwrap();

    let (a, b) = tokio::join!(
        {
            let bundle = bundle.clone();
            async move { bundle.read(&ReadConfig::default()).await }
        },
        {
            let bundle = bundle.clone();
            async move { bundle.read(&ReadConfig::default()).await }
        },
    );
    let a = a.unwrap();
    let b = b.unwrap();
    assert_eq!(a, b);
    assert!(!a.is_empty());
}

#[tokio::test]
async fn test_unchanged_read_returns_cached_payload() {
    let tmp = app(&[("index.js", "module.exports = 1;\n")]);
    let project = project(tmp.path());
    let bundle = project.bundle(None, Platform::Web, true).unwrap();

    let first = bundle.read(&ReadConfig::default()).await.unwrap();
    let second = bundle.read(&ReadConfig::default()).await.unwrap();
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_stop_token_cancels_and_recovers() {
    let tmp = app(&[("index.js", "module.exports = 1;\n")]);
    let project = project(tmp.path());
    let bundle = project.bundle(None, Platform::Web, true).unwrap();

    let cfg = ReadConfig::default();
    cfg.stop.stop();
    let payload = bundle.read(&cfg).await.unwrap();
    assert!(payload.is_empty());

    // The token was reset with the graph; the next read compiles fully.
    let payload = bundle.read(&cfg).await.unwrap();
    assert!(payload.contains("__d(\"app\""));
    assert_eq!(bundle.module_count().await, 1);
}

#[tokio::test]
async fn test_platform_variant_selection() {
    let tmp = app(&[
        ("index.js", "require('./view');\n"),
        ("view.js", "module.exports = 'generic';\n"),
        ("view.ios.js", "module.exports = 'ios';\n"),
    ]);
    let project = project(tmp.path());

    let ios = project.bundle(None, Platform::Ios, true).unwrap();
    let payload = ios.read(&ReadConfig::default()).await.unwrap();
    assert!(payload.contains("'ios'"));
    assert!(!payload.contains("'generic'"));

    let web = project.bundle(None, Platform::Web, true).unwrap();
    let payload = web.read(&ReadConfig::default()).await.unwrap();
    assert!(payload.contains("'generic'"));
}
