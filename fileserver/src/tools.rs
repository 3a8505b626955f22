use std::{
    ffi::OsString,
    path::{Path, PathBuf},
    process::Stdio,
};
use tempfile::TempDir;
use tokio::{io::AsyncReadExt, process::Command};
use tracing::debug;

use crate::error::ServerError;
use crate::resolve::join_within;

const SCRATCH_PREFIX: &str = "fileserver-extract";

/// A host program plus any leading arguments it always receives.
#[derive(Debug, Clone)]
pub struct Tool {
    pub program: String,
    pub args: Vec<OsString>,
}

impl Tool {
    pub fn new(program: impl Into<String>) -> Self {
        Tool {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    fn command(&self, extra: &[OsString]) -> Command {
        debug!("spawning {} {:?} {:?}", self.program, self.args, extra);
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .args(extra)
            .stdin(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        cmd
    }

    /// Runs the tool to completion and returns everything it printed.
    /// The exit status is not inspected.
    async fn capture(&self, extra: &[OsString]) -> Result<String, ServerError> {
        let mut child = self
            .command(extra)
            .stdout(Stdio::piped())
            .spawn()
            .map_err(|source| ServerError::ToolUnavailable {
                program: self.program.clone(),
                source,
            })?;

        let mut output = Vec::new();
        if let Some(mut stdout) = child.stdout.take() {
            stdout
                .read_to_end(&mut output)
                .await
                .map_err(|source| ServerError::ToolIo {
                    program: self.program.clone(),
                    source,
                })?;
        }

        let status = child.wait().await.map_err(|source| ServerError::ToolIo {
            program: self.program.clone(),
            source,
        })?;
        debug!("{} exited with {}", self.program, status);

        Ok(String::from_utf8_lossy(&output).into_owned())
    }

    /// Runs the tool to completion, discarding its output.
    async fn run(&self, extra: &[OsString]) -> Result<(), ServerError> {
        let status = self
            .command(extra)
            .stdout(Stdio::null())
            .status()
            .await
            .map_err(|source| ServerError::ToolUnavailable {
                program: self.program.clone(),
                source,
            })?;
        debug!("{} exited with {}", self.program, status);
        Ok(())
    }
}

/// An archive member written to a scratch directory. The directory is
/// removed when this value is dropped.
#[derive(Debug)]
pub struct Extracted {
    pub path: PathBuf,
    pub scratch: TempDir,
}

/// The classifier and archive tool used by the dispatcher.
#[derive(Debug, Clone)]
pub struct Toolbox {
    pub classifier: Tool,
    pub archiver: Tool,
}

impl Default for Toolbox {
    fn default() -> Self {
        Toolbox {
            classifier: Tool::new("file"),
            archiver: Tool::new("7z"),
        }
    }
}

impl Toolbox {
    /// Human-readable description of `path`, verbatim.
    pub async fn classify(&self, path: &Path) -> Result<String, ServerError> {
        self.classifier.capture(&[path.into()]).await
    }

    /// Tabular listing of the archive at `path`.
    pub async fn archive_list(&self, path: &Path) -> Result<String, ServerError> {
        self.archiver.capture(&["l".into(), path.into()]).await
    }

    /// Extracts `member` from `archive` into a fresh scratch directory.
    /// The returned path may not exist if the tool failed.
    pub async fn archive_extract(
        &self,
        archive: &Path,
        member: &str,
    ) -> Result<Extracted, ServerError> {
        let scratch = tempfile::Builder::new()
            .prefix(SCRATCH_PREFIX)
            .tempdir()
            .map_err(ServerError::Scratch)?;
        let path = join_within(scratch.path(), member)?;

        let mut out_flag = OsString::from("-o");
        out_flag.push(scratch.path());

        self.archiver
            .run(&["x".into(), archive.into(), out_flag, member.into()])
            .await?;

        Ok(Extracted { path, scratch })
    }
}
