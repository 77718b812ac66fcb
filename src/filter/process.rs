use super::description::CustomFilterDescription;
use crate::error::{IngestError, Result};
use log::{debug, warn};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::time::timeout;

/// Standard streams of a freshly spawned child.
#[derive(Debug)]
pub struct ChildPipes {
    pub stdin: ChildStdin,
    pub stdout: ChildStdout,
    pub stderr: ChildStderr,
}

/// Owns a filter's child process. Dropping the handle kills the child.
#[derive(Debug)]
pub struct ChildProcessHandle {
    name: String,
    child: Child,
}

impl ChildProcessHandle {
    /// Starts the description's command with all three standard streams piped,
    /// without a shell, in the description's base directory.
    pub fn spawn(description: &CustomFilterDescription) -> Result<(Self, ChildPipes)> {
        let args = description.command_args()?;
        let (program, rest) = args.split_first().ok_or_else(|| {
            IngestError::Config(format!("filter {} has an empty command", description.name))
        })?;

        let mut command = Command::new(program);
        command
            .args(rest)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if !description.base_path.as_os_str().is_empty() {
            command.current_dir(&description.base_path);
        }

        let mut child = command
            .spawn()
            .map_err(|e| IngestError::Process(format!("cannot start {}: {}", program, e)))?;
        let missing =
            || IngestError::Process(format!("{}: standard streams not captured", program));
        let pipes = ChildPipes {
            stdin: child.stdin.take().ok_or_else(missing)?,
            stdout: child.stdout.take().ok_or_else(missing)?,
            stderr: child.stderr.take().ok_or_else(missing)?,
        };
        debug!("{}: started {} (pid {:?})", description.name, program, child.id());
        Ok((
            Self {
                name: description.name.clone(),
                child,
            },
            pipes,
        ))
    }

    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Gives the child `exit_wait` to exit on its own, then kills it.
    /// Returns the exit status when one could be collected.
    pub async fn terminate(mut self, exit_wait: Duration) -> Option<ExitStatus> {
        match timeout(exit_wait, self.child.wait()).await {
            Ok(Ok(status)) => {
                debug!("{}: child exited with {}", self.name, status);
                return Some(status);
            }
            Ok(Err(err)) => debug!("{}: wait failed: {}", self.name, err),
            Err(_) => warn!("{}: child did not exit within {:?}, killing it", self.name, exit_wait),
        }

        if let Err(err) = self.child.start_kill() {
            debug!("{}: kill failed: {}", self.name, err);
        }
        match timeout(exit_wait, self.child.wait()).await {
            Ok(Ok(status)) => Some(status),
            Ok(Err(err)) => {
                debug!("{}: wait after kill failed: {}", self.name, err);
                None
            }
            Err(_) => {
                warn!("{}: child still running after kill", self.name);
                None
            }
        }
    }
}
