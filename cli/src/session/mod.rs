//! The session controller: owns the listener, launches the traced root, and
//! supervises the whole tree's connections until the root exits.

use std::path::PathBuf;
use std::process::Stdio;

use chaperone_wire::{IpcId, ROOT_PARENT};
use tokio::process::Child;
use tokio::task::JoinSet;

use crate::config;
use crate::error::{Error, Result};
use crate::ipc::server;
use crate::ipc::transport::{self, Endpoint};
use crate::proxy::exec::exit_code;
use crate::service::Service;

/// What a finished session reports.
///
/// Connection failures never replace the root's exit code (that code is
/// what the user ultimately observes), so the two travel side by side.
#[derive(Debug)]
pub struct SessionOutcome {
    pub exit_code: i64,
    pub client_failures: Vec<String>,
}

pub struct Session {
    endpoint: Endpoint,
    proxy: PathBuf,
}

impl Session {
    pub fn new(endpoint: Endpoint, proxy: PathBuf) -> Self {
        Self { endpoint, proxy }
    }

    /// Run `shell` under interception until the whole traced tree retires.
    ///
    /// `factory` builds one decision authority per accepted connection,
    /// keyed by the identity the session assigns to it. The root proxy is
    /// the only process spawned here; everything below it is spawned by
    /// proxies acting on verdicts.
    pub async fn run<F>(&self, shell: &[String], mut factory: F) -> Result<SessionOutcome>
    where
        F: FnMut(IpcId) -> Box<dyn Service + 'static>,
    {
        if shell.is_empty() {
            return Err(Error::InvalidInvocation {
                reason: "nothing to run".into(),
            });
        }

        let mut listener = transport::bind(&self.endpoint).await.map_err(|e| Error::Ipc {
            reason: format!("failed to bind session endpoint: {e}"),
        })?;
        let mut root = self.spawn_root(shell)?;

        let mut clients: JoinSet<Result<()>> = JoinSet::new();
        let mut next_id: IpcId = 1;

        // Accept until the root proxy exits; its exit ends the acceptor, so
        // a pending accept resolves by cancellation rather than hanging.
        let status = loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok(stream) => {
                        let service = factory(next_id);
                        tracing::info!(id = next_id, "accepted proxy connection");
                        clients.spawn(server::serve_connection(service, stream));
                        next_id += 1;
                    }
                    Err(e) => {
                        tracing::warn!("accept failed: {e}");
                    }
                },
                waited = root.wait() => {
                    break waited.map_err(|e| Error::Spawn {
                        executable: self.proxy.display().to_string(),
                        reason: e.to_string(),
                    })?;
                }
            }
        };
        drop(listener);

        // Connections accepted before the cutoff run to their natural end.
        let mut client_failures = Vec::new();
        while let Some(joined) = clients.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(err)) => client_failures.push(err.to_string()),
                Err(err) => client_failures.push(format!("connection task panicked: {err}")),
            }
        }
        if !client_failures.is_empty() {
            tracing::error!(
                count = client_failures.len(),
                "connection task(s) failed:\n{}",
                client_failures.join("\n")
            );
        }

        Ok(SessionOutcome {
            exit_code: exit_code(status),
            client_failures,
        })
    }

    fn spawn_root(&self, shell: &[String]) -> Result<Child> {
        tracing::info!(proxy = %self.proxy.display(), command = ?shell, "launching traced root");
        let mut command = tokio::process::Command::new(&self.proxy);
        command
            .arg("-p")
            .arg(ROOT_PARENT.to_string())
            .arg("--exec")
            .arg(&shell[0])
            .arg("--")
            .args(shell)
            .env(config::ENV_ENDPOINT, endpoint_value(&self.endpoint))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        command.spawn().map_err(|e| Error::Spawn {
            executable: self.proxy.display().to_string(),
            reason: e.to_string(),
        })
    }
}

#[cfg(unix)]
fn endpoint_value(endpoint: &Endpoint) -> std::ffi::OsString {
    endpoint.as_os_str().to_os_string()
}

#[cfg(windows)]
fn endpoint_value(endpoint: &Endpoint) -> std::ffi::OsString {
    endpoint.clone().into()
}
