use std::process::{Command, Stdio};
use tracing::{debug, info, warn};

use crate::config::EditorProject;
use crate::error::EditorError;

#[derive(Debug, Default)]
pub struct EditorReport {
    pub succeeded: usize,
    pub failures: Vec<EditorError>,
}

impl EditorReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Runs one shell command to completion, logging whatever it printed.
pub fn run_command(command: &str) -> Result<(), EditorError> {
    let output = shell(command)
        .stdin(Stdio::null())
        .output()
        .map_err(|source| EditorError::Spawn {
            command: command.to_string(),
            source,
        })?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    if !stdout.trim().is_empty() {
        debug!(command, stdout = %stdout.trim(), "command output");
    }
    if !stderr.trim().is_empty() {
        debug!(command, stderr = %stderr.trim(), "command error output");
    }

    if output.status.success() {
        Ok(())
    } else {
        Err(EditorError::Status {
            command: command.to_string(),
            status: output.status,
        })
    }
}

/// Runs the project's commands in order. A failing command is logged and
/// the rest still run.
pub fn open_project(project: &EditorProject) -> EditorReport {
    info!(project = %project.name, commands = project.commands.len(), "opening editor project");
    let mut report = EditorReport::default();

    for command in &project.commands {
        match run_command(command) {
            Ok(()) => report.succeeded += 1,
            Err(e) => {
                warn!(project = %project.name, error = %e, "editor command failed");
                report.failures.push(e);
            }
        }
    }
    report
}

#[cfg(unix)]
fn shell(command: &str) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(command);
    cmd
}

#[cfg(not(unix))]
fn shell(command: &str) -> Command {
    let mut cmd = Command::new("cmd");
    cmd.arg("/C").arg(command);
    cmd
}
