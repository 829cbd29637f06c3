mod cli;
mod watch;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;

use bindle::{Bundler, Config, ParserRegistry, PluginRegistry, Project, ReadConfig, StopToken, log};

use crate::cli::{Cli, Command};

fn main() -> Result<()> {
    let cli = Cli::parse();
    let root = cli
        .root
        .canonicalize()
        .with_context(|| format!("invalid project root '{}'", cli.root.display()))?;
    let config_path = if cli.config.is_absolute() {
        cli.config.clone()
    } else {
        root.join(&cli.config)
    };
    let mut config = if config_path.exists() {
        Config::load(&config_path)?
    } else {
        Config::default()
    };
    let (Command::Build(args) | Command::Watch(args)) = &cli.command;
    args.apply(&mut config);
    config.validate()?;

    // Lives for the whole process.
    let config: &'static Config = Box::leak(Box::new(config));

    match cli.command {
        Command::Build(_) => {
            let runtime = tokio::runtime::Runtime::new()?;
            runtime.block_on(build_once(&root, config))
        }
        Command::Watch(_) => watch::run(root, config),
    }
}

fn open_project(root: &Path, config: &Config) -> Result<Project> {
    Ok(Project::new(
        Arc::new(Bundler::new()),
        Arc::new(PluginRegistry::with_builtins()),
        Arc::new(ParserRegistry::with_builtins()),
        root.to_path_buf(),
        config.filter(),
    )?)
}

fn read_config(root: &Path, config: &Config, stop: StopToken) -> ReadConfig {
    ReadConfig {
        globals: config.globals.clone(),
        polyfills: config.polyfill_paths(root),
        stop,
    }
}

async fn build_once(root: &Path, config: &'static Config) -> Result<()> {
    let project = open_project(root, config)?;
    let bundle = project.bundle(config.entry.as_deref(), config.platform(), config.dev)?;
    let payload = bundle
        .read(&read_config(root, config, StopToken::new()))
        .await?;

    let output = config.output_path(root);
    std::fs::write(&output, &payload)
        .with_context(|| format!("failed to write '{}'", output.display()))?;
    log!("build"; "wrote {} ({} bytes)", output.display(), payload.len());
    Ok(())
}
