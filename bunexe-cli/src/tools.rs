//! External programs invoked around extraction and patching.

use std::ffi::OsString;
use std::io;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Time a pretty-printer may take for a single module.
pub const BEAUTIFY_TIMEOUT: Duration = Duration::from_secs(30);

/// Number of times code signing is attempted before giving up.
pub const CODESIGN_ATTEMPTS: usize = 3;

/// An error running an external program.
#[derive(Debug, Error)]
pub enum ToolError {
    /// The program is not installed.
    #[error("{program} was not found")]
    NotFound { program: String },

    /// The program did not finish in time and was killed.
    #[error("{program} timed out after {}s", .timeout.as_secs())]
    TimedOut { program: String, timeout: Duration },

    /// The program exited unsuccessfully.
    #[error("{program} failed with {status}: {stderr}")]
    Failed {
        program: String,
        status: ExitStatus,
        stderr: String,
    },

    /// Communicating with the program failed.
    #[error("failed to run {program}")]
    Io {
        program: String,
        #[source]
        source: io::Error,
    },
}

impl ToolError {
    fn spawn(program: &str, source: io::Error) -> Self {
        let program = program.to_owned();
        if source.kind() == io::ErrorKind::NotFound {
            ToolError::NotFound { program }
        } else {
            ToolError::Io { program, source }
        }
    }
}

/// Pretty-prints script sources by piping them through an external formatter.
#[derive(Clone, Debug)]
pub struct Beautifier {
    /// The formatter to run.
    pub program: String,
    /// Arguments making the formatter read stdin and write stdout.
    pub args: Vec<String>,
    /// Time after which the formatter is killed.
    pub timeout: Duration,
}

impl Default for Beautifier {
    fn default() -> Self {
        Beautifier {
            program: "js-beautify".into(),
            args: vec!["-".into()],
            timeout: BEAUTIFY_TIMEOUT,
        }
    }
}

impl Beautifier {
    /// Returns the formatted version of `source`.
    pub async fn beautify(&self, source: &[u8]) -> Result<Vec<u8>, ToolError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ToolError::spawn(&self.program, e))?;

        let stdin = child.stdin.take();
        let write = async move {
            match stdin {
                Some(mut stdin) => stdin.write_all(source).await,
                None => Ok(()),
            }
        };

        // Dropping the child on timeout kills it.
        let run = async { tokio::join!(write, child.wait_with_output()) };
        let (written, output) = tokio::time::timeout(self.timeout, run)
            .await
            .map_err(|_| ToolError::TimedOut {
                program: self.program.clone(),
                timeout: self.timeout,
            })?;

        let output = output.map_err(|source| ToolError::Io {
            program: self.program.clone(),
            source,
        })?;

        if !output.status.success() {
            return Err(ToolError::Failed {
                program: self.program.clone(),
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
            });
        }

        written.map_err(|source| ToolError::Io {
            program: self.program.clone(),
            source,
        })?;

        Ok(output.stdout)
    }
}

/// Re-signs executables after their contents changed.
#[derive(Clone, Debug)]
pub struct Codesign {
    /// The signing program.
    pub program: String,
    /// Arguments preceding the path of the executable.
    pub args: Vec<String>,
    /// Number of attempts before giving up.
    pub attempts: usize,
}

impl Default for Codesign {
    fn default() -> Self {
        Codesign {
            program: "codesign".into(),
            args: vec!["--sign".into(), "-".into(), "--force".into()],
            attempts: CODESIGN_ATTEMPTS,
        }
    }
}

impl Codesign {
    /// Signs the executable at `path`, retrying immediately on failure.
    pub async fn sign(&self, path: &Path) -> Result<(), ToolError> {
        let mut attempt = 1;
        loop {
            match self.sign_once(path).await {
                Ok(()) => return Ok(()),
                Err(error) if attempt < self.attempts => {
                    tracing::warn!(attempt, %error, "code signing failed, retrying");
                    attempt += 1;
                }
                Err(error) => return Err(error),
            }
        }
    }

    async fn sign_once(&self, path: &Path) -> Result<(), ToolError> {
        let output = Command::new(&self.program)
            .args(&self.args)
            .arg(OsString::from(path))
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| ToolError::spawn(&self.program, e))?;

        if output.status.success() {
            Ok(())
        } else {
            Err(ToolError::Failed {
                program: self.program.clone(),
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
            })
        }
    }
}
