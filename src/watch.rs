//! Watch mode: rebuild the bundle when files change.
//!
//! Filesystem events are debounced into small batches, fanned out to the
//! project as reload/delete events, and followed by one `read` that
//! patches the payload. Ctrl-C stops the running build cooperatively and
//! exits the loop.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use notify::{RecursiveMode, Watcher};

use bindle::{Config, StopToken, log};

use crate::{open_project, read_config};

const DEBOUNCE: Duration = Duration::from_millis(50);

pub fn run(root: PathBuf, config: &'static Config) -> Result<()> {
    let runtime = tokio::runtime::Runtime::new()?;
    let project = open_project(&root, config)?;
    let bundle = project.bundle(config.entry.as_deref(), config.platform(), config.dev)?;

    let stop = StopToken::new();
    let read_cfg = read_config(&root, config, stop.clone());
    let output = config.output_path(&root);

    let payload = runtime.block_on(bundle.read(&read_cfg))?;
    std::fs::write(&output, &payload)
        .with_context(|| format!("failed to write '{}'", output.display()))?;
    log!("watch"; "initial build: {} ({} bytes)", output.display(), payload.len());

    let quit = Arc::new(AtomicBool::new(false));
    {
        let quit = quit.clone();
        let stop = stop.clone();
        ctrlc::set_handler(move || {
            stop.stop();
            quit.store(true, Ordering::SeqCst);
        })
        .context("failed to install ctrl-c handler")?;
    }

    let (tx, rx) = mpsc::channel::<PathBuf>();
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
        if let Ok(event) = res {
            for path in event.paths {
                tx.send(path).ok();
            }
        }
    })
    .context("failed to create watcher")?;
    watcher
        .watch(&root, RecursiveMode::Recursive)
        .with_context(|| format!("failed to watch '{}'", root.display()))?;
    log!("watch"; "watching {}", root.display());

    while !quit.load(Ordering::SeqCst) {
        let first = match rx.recv_timeout(Duration::from_millis(200)) {
            Ok(path) => path,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };
        let mut paths = vec![first];
        let deadline = Instant::now() + DEBOUNCE;
        while let Ok(path) = rx.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
            paths.push(path);
        }
        paths.sort();
        paths.dedup();

        let mut hit = false;
        for path in paths {
            if path == output {
                continue; // our own write
            }
            if path.is_file() {
                hit |= project.reload_file(&path);
            } else if !path.exists() {
                hit |= project.delete_file(&path);
            }
        }
        if !hit {
            continue;
        }

        match runtime.block_on(bundle.read(&read_cfg)) {
            Ok(payload) if payload.is_empty() => {} // cancelled
            Ok(payload) => {
                if let Err(e) = std::fs::write(&output, &payload) {
                    log!("error"; "failed to write '{}': {e}", output.display());
                } else {
                    log!("watch"; "rebuilt {} ({} bytes)", output.display(), payload.len());
                }
            }
            Err(e) => log!("error"; "{e:#}"),
        }
    }

    log!("watch"; "stopped");
    Ok(())
}
