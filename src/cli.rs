//! Command line interface.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use bindle::Config;

#[derive(Parser)]
#[command(name = "bindle", version, about = "Incremental JavaScript module bundler")]
pub struct Cli {
    /// Project root directory.
    #[arg(long, global = true, default_value = ".")]
    pub root: PathBuf,

    /// Config file, relative to the root.
    #[arg(long, global = true, default_value = "bindle.toml")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Compile the bundle once and write it to the output file.
    Build(BuildArgs),
    /// Build, then watch the project and patch the bundle on changes.
    Watch(BuildArgs),
}

#[derive(Args, Clone)]
pub struct BuildArgs {
    /// Entry file relative to the root; the package main when omitted.
    #[arg(long)]
    pub entry: Option<String>,

    /// Target platform: android, ios or web.
    #[arg(long)]
    pub platform: Option<String>,

    /// Production build: terse identifiers, `__DEV__ = false`.
    #[arg(long)]
    pub release: bool,

    /// Output file for the payload.
    #[arg(long, short)]
    pub output: Option<PathBuf>,
}

impl BuildArgs {
    /// Command line flags win over the config file.
    pub fn apply(&self, config: &mut Config) {
        if let Some(entry) = &self.entry {
            config.entry = Some(entry.clone());
        }
        if let Some(platform) = &self.platform {
            config.platform = platform.clone();
        }
        if self.release {
            config.dev = false;
        }
        if let Some(output) = &self.output {
            config.output = Some(output.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_build() {
        let cli = Cli::parse_from(["bindle", "build", "--entry", "src/app.js", "--release"]);
        let Command::Build(args) = &cli.command else {
            panic!("expected build");
        };
        assert_eq!(args.entry.as_deref(), Some("src/app.js"));
        assert!(args.release);

        let mut config = Config::default();
        args.apply(&mut config);
        assert_eq!(config.entry.as_deref(), Some("src/app.js"));
        assert!(!config.dev);
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::parse_from(["bindle", "watch", "--root", "/tmp/app"]);
        assert_eq!(cli.root, PathBuf::from("/tmp/app"));
        assert!(matches!(cli.command, Command::Watch(_)));
    }
}
