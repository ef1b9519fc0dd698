use std::fmt;
use std::process::Command;

use async_trait::async_trait;
use log::trace;

use crate::error::{RunError, SamplingError};

pub mod docker;
pub use docker::{CliLister, ContainerRecord, EngineLister, ImageRecord};

/// Kinds of local resources the refresher keeps an eye on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Containers,
    Images,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 2] = [ResourceKind::Containers, ResourceKind::Images];

    /// The listing command, one resource per output line.
    pub fn list_command(self, docker_bin: &str) -> String {
        match self {
            ResourceKind::Containers => format!(
                "{} ps -a --format \"{{{{.ID}}}} {{{{.Names}}}} {{{{.Image}}}} {{{{.Status}}}}\"",
                docker_bin
            ),
            ResourceKind::Images => format!(
                "{} images --filter \"dangling=false\" --format \"{{{{.ID}}}} {{{{.Repository}}}} {{{{.Tag}}}}\"",
                docker_bin
            ),
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceKind::Containers => f.write_str("containers"),
            ResourceKind::Images => f.write_str("images"),
        }
    }
}

/// Runs a shell command line and returns its standard output.
pub trait CommandRunner: Send + Sync {
    fn run(&self, command: &str) -> Result<String, RunError>;
}

/// [`CommandRunner`] going through the platform shell.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShellRunner;

impl CommandRunner for ShellRunner {
    fn run(&self, command: &str) -> Result<String, RunError> {
        trace!(">> {}", command);
        let output = shell(command).output().map_err(|source| RunError::Spawn {
            command: command.to_string(),
            source,
        })?;

        if !output.status.success() {
            return Err(RunError::Failed {
                command: command.to_string(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        String::from_utf8(output.stdout).map_err(|_| RunError::Encoding {
            command: command.to_string(),
        })
    }
}

#[cfg(windows)]
fn shell(command: &str) -> Command {
    let mut cmd = Command::new("cmd");
    cmd.args(["/C", command]);
    cmd
}

#[cfg(not(windows))]
fn shell(command: &str) -> Command {
    let mut cmd = Command::new("sh");
    cmd.args(["-c", command]);
    cmd
}

/// Narrow listing adapter the polling core samples through.
#[async_trait]
pub trait ResourceLister: Send + Sync {
    /// Current resources of `kind`, one line per resource.
    async fn list_resource_lines(&self, kind: ResourceKind) -> Result<Vec<String>, SamplingError>;
}
