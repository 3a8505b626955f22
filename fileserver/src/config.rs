use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::Level;

use crate::tools::{Tool, Toolbox};

/// Command line / environment configuration for the server binary.
#[derive(Debug, Clone, Parser)]
#[command(name = "fileserver", about = "Read-only HTTP browser over a directory tree")]
pub struct Config {
    /// Directory to serve.
    #[arg(env = "FILESERVER_ROOT")]
    pub root: PathBuf,

    /// Interface to bind; empty binds all interfaces.
    #[arg(long, env = "FILESERVER_HOST", default_value = "")]
    pub host: String,

    #[arg(long, env = "FILESERVER_PORT", default_value_t = 60000)]
    pub port: u16,

    /// Program that describes a file's type.
    #[arg(long, env = "FILESERVER_CLASSIFIER", default_value = "file")]
    pub classifier: String,

    /// Archive tool understanding `l` and `x -o<dir>`.
    #[arg(long, env = "FILESERVER_ARCHIVER", default_value = "7z")]
    pub archiver: String,

    #[arg(long, env = "FILESERVER_LOG", default_value = "info")]
    pub log_level: Level,
}

impl Config {
    /// The root must exist and be a directory.
    pub fn validate(&self) -> Result<()> {
        let meta = std::fs::metadata(&self.root)
            .with_context(|| format!("cannot stat root {}", self.root.display()))?;
        if !meta.is_dir() {
            bail!("{} is not a directory", self.root.display());
        }
        Ok(())
    }

    pub fn toolbox(&self) -> Toolbox {
        Toolbox {
            classifier: Tool::new(self.classifier.clone()),
            archiver: Tool::new(self.archiver.clone()),
        }
    }
}
