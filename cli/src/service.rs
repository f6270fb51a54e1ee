//! The decision authority seam.

use async_trait::async_trait;
use chaperone_wire::{Action, Command, IpcId};

use crate::error::Result;

/// Capability interface of the decision authority.
///
/// One instance is bound to exactly one proxy connection for its lifetime:
/// built when the connection is accepted, dropped when its request loop
/// ends. Errors propagate to the owning connection task only.
#[async_trait]
pub trait Service: Send {
    /// Register a connection whose launching proxy had `parent_id`, and
    /// return the identity assigned to it.
    async fn create(&mut self, parent_id: IpcId) -> Result<IpcId>;

    /// Decide what to do with one intercepted command.
    async fn make_decision(&mut self, command: Command) -> Result<Action>;

    /// The verdict has been carried out with this exit code.
    async fn finish(&mut self, exit_code: i64) -> Result<()>;

    /// The proxy failed for a reason unrelated to the executed command.
    async fn report_error(&mut self, parent_id: IpcId, message: String) -> Result<()>;
}

/// The built-in authority: log every intercepted command and keep tracing.
///
/// Returns `Inject` so descendants stay covered, or `Wrap` when observing
/// the root command alone is enough.
pub struct TraceService {
    id: IpcId,
    wrap_only: bool,
}

impl TraceService {
    pub fn new(id: IpcId, wrap_only: bool) -> Self {
        Self { id, wrap_only }
    }
}

#[async_trait]
impl Service for TraceService {
    async fn create(&mut self, parent_id: IpcId) -> Result<IpcId> {
        tracing::debug!(id = self.id, parent_id, "proxy registered");
        Ok(self.id)
    }

    async fn make_decision(&mut self, command: Command) -> Result<Action> {
        tracing::info!(
            id = self.id,
            cwd = %command.cwd,
            executable = %command.executable,
            args = ?command.args,
            "intercepted"
        );
        if self.wrap_only {
            Ok(Action::Wrap(command))
        } else {
            Ok(Action::Inject(command))
        }
    }

    async fn finish(&mut self, exit_code: i64) -> Result<()> {
        tracing::debug!(id = self.id, exit_code, "command finished");
        Ok(())
    }

    async fn report_error(&mut self, parent_id: IpcId, message: String) -> Result<()> {
        tracing::error!(id = self.id, parent_id, %message, "proxy reported failure");
        Ok(())
    }
}
