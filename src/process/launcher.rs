use crate::config::{ExecMode, ProcessSpec};
use crate::error::{Result, WardenError};
use std::process::Stdio;
use tokio::process::{Child, Command};

/// Environment variable carrying the 0-based instance index
pub const ENV_INSTANCE: &str = "WARDEN_INSTANCE";

/// Environment variable carrying the group size in cluster mode
///
/// Children that bind a listening socket are expected to use SO_REUSEPORT so
/// the instances share inbound traffic; warden only provides the numbers.
pub const ENV_CLUSTER_SIZE: &str = "WARDEN_CLUSTER_SIZE";

/// Handles returned when launching an instance
#[derive(Debug)]
pub struct LaunchedChild {
    /// The child process handle; ownership passes to a reaper task
    pub child: Child,

    /// Process ID assigned by the OS
    pub pid: u32,
}

/// Launch one instance of a process spec
///
/// Builds a tokio Command from the spec (arguments, working directory,
/// environment) plus the per-instance variables, with stdout/stderr piped
/// for log capture.
pub async fn launch(spec: &ProcessSpec, index: usize) -> Result<LaunchedChild> {
    // Validate that the script exists before trying to execute it
    if !spec.script.exists() {
        return Err(WardenError::Launch(format!(
            "Executable does not exist: {}",
            spec.script.display()
        )));
    }

    let mut command = Command::new(&spec.script);

    if !spec.args.is_empty() {
        command.args(&spec.args);
    }

    if let Some(ref cwd) = spec.cwd {
        command.current_dir(cwd);
    }

    for (key, value) in &spec.env {
        command.env(key, value);
    }

    command.env(ENV_INSTANCE, index.to_string());
    if spec.exec_mode == ExecMode::Cluster {
        command.env(ENV_CLUSTER_SIZE, spec.instances.to_string());
    }

    // Capture stdout and stderr as pipes for log routing
    command.stdout(Stdio::piped());
    command.stderr(Stdio::piped());

    let child = command.spawn().map_err(|e| {
        WardenError::Launch(format!("Failed to spawn process '{}': {}", spec.name, e))
    })?;

    let pid = child.id().ok_or_else(|| {
        WardenError::Launch(format!("Failed to get PID for process '{}'", spec.name))
    })?;

    Ok(LaunchedChild { child, pid })
}
