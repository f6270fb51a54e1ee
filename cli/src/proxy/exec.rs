//! Carrying out the authority's verdict.

use std::process::ExitStatus;

use chaperone_wire::{environ, Action, Command, IpcId};

use crate::config;
use crate::error::{Error, Result};

/// Execute the action and return the exit code the proxy must propagate.
///
/// The command executed is always the one carried by the action; the
/// authority may have substituted something else for what was submitted.
pub async fn dispatch(action: Action, id: IpcId) -> Result<i64> {
    match action {
        Action::Drop => Ok(0),
        Action::Wrap(command) => {
            tracing::info!(executable = %command.executable, args = ?command.args, "wrapping");
            spawn_and_wait(&command).await
        }
        Action::Inject(mut command) => {
            let proxy = std::env::current_exe()?;
            let shim = config::shim_artifact(&proxy)?;
            environ::inject(
                &mut command.env,
                id,
                &proxy.to_string_lossy(),
                &shim.to_string_lossy(),
            );
            tracing::info!(executable = %command.executable, args = ?command.args, "injecting");
            spawn_and_wait(&command).await
        }
    }
}

async fn spawn_and_wait(command: &Command) -> Result<i64> {
    let mut child = tokio::process::Command::new(&command.executable);
    child.args(&command.args);
    if !command.cwd.is_empty() {
        child.current_dir(&command.cwd);
    }
    child.env_clear();
    for entry in &command.env {
        if let Some((key, value)) = entry.split_once('=') {
            child.env(key, value);
        }
    }

    let status = child
        .status()
        .await
        .map_err(|e| Error::Spawn {
            executable: command.executable.clone(),
            reason: e.to_string(),
        })?;
    Ok(exit_code(status))
}

/// Collapse an exit status to the code the caller's caller would observe;
/// signal deaths map to the conventional 128+N.
pub fn exit_code(status: ExitStatus) -> i64 {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + i64::from(signal);
        }
    }
    status.code().map(i64::from).unwrap_or(-1)
}
