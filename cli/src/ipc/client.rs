//! Proxy-side protocol exchange.
//!
//! One client lives exactly as long as one proxy instance. Every exchange is
//! strictly sequential: a request is written in full, then its response (if
//! the request has one) is read in full.

use chaperone_wire::codec::{asynch, to_bytes, Encode};
use chaperone_wire::{Action, Command, IpcId, Request};
use tokio::io::AsyncWriteExt;

use crate::error::{Error, Result};
use crate::ipc::transport::{self, ClientStream, Endpoint};

pub struct Client {
    stream: ClientStream,
}

impl Client {
    /// Connect to the session. Failure is fatal to the calling proxy; there
    /// is no retry.
    pub async fn connect(endpoint: &Endpoint) -> Result<Self> {
        let stream = transport::connect(endpoint)
            .await
            .map_err(|e| Error::Ipc {
                reason: format!("connect to session endpoint failed: {e}"),
            })?;
        Ok(Self { stream })
    }

    /// Register with the session and receive this connection's identity.
    pub async fn create(&mut self, parent_id: IpcId) -> Result<IpcId> {
        let mut message = to_bytes(&Request::Create);
        parent_id.encode(&mut message);
        self.send(&message, "CREATE").await?;
        Ok(asynch::read_id(&mut self.stream).await?)
    }

    /// Submit the intercepted command and receive the authority's verdict.
    pub async fn make_decision(&mut self, command: &Command) -> Result<Action> {
        let mut message = to_bytes(&Request::MakeDecision);
        command.encode(&mut message);
        self.send(&message, "MAKE_DECISION").await?;
        Ok(asynch::read_action(&mut self.stream).await?)
    }

    /// Report the executed command's exit code. No response payload.
    pub async fn finish(&mut self, exit_code: i64) -> Result<()> {
        let mut message = to_bytes(&Request::Finish);
        exit_code.encode(&mut message);
        self.send(&message, "FINISH").await
    }

    /// Report a failure the proxy could not attribute to the executed
    /// command. No response payload.
    pub async fn report_error(&mut self, parent_id: IpcId, message: &str) -> Result<()> {
        let mut buf = to_bytes(&Request::ReportError);
        parent_id.encode(&mut buf);
        message.encode(&mut buf);
        self.send(&buf, "REPORT_ERROR").await
    }

    async fn send(&mut self, bytes: &[u8], what: &str) -> Result<()> {
        self.stream
            .write_all(bytes)
            .await
            .map_err(|e| Error::Ipc {
                reason: format!("failed to send {what}: {e}"),
            })
    }
}
