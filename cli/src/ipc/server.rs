//! Session-side request loop, one per accepted connection.

use chaperone_wire::codec::{asynch, to_bytes};
use chaperone_wire::Request;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Error, Result};
use crate::service::Service;

/// Drive one connection until its peer disconnects.
///
/// Clean EOF at a request boundary is the normal end of a connection (the
/// proxy exits after FINISH). EOF inside a message, an unknown request tag,
/// or any read/write failure ends this connection with an error; sibling
/// connections are unaffected.
pub async fn serve_connection<S>(mut service: Box<dyn Service>, mut stream: S) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    loop {
        let mut tag = [0u8; 1];
        match stream.read_exact(&mut tag).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(()),
            Err(e) => {
                return Err(Error::Ipc {
                    reason: format!("request read failed: {e}"),
                })
            }
        }
        let request = Request::from_tag(tag[0]).ok_or(Error::Protocol {
            reason: format!("unknown request tag {}", tag[0]),
        })?;

        match request {
            Request::Create => {
                let parent_id = asynch::read_id(&mut stream).await?;
                let id = service.create(parent_id).await?;
                respond(&mut stream, &to_bytes(&id), "CREATE").await?;
            }
            Request::MakeDecision => {
                let command = asynch::read_command(&mut stream).await?;
                let action = service.make_decision(command).await?;
                respond(&mut stream, &to_bytes(&action), "MAKE_DECISION").await?;
            }
            Request::Finish => {
                let exit_code = asynch::read_i64(&mut stream).await?;
                service.finish(exit_code).await?;
            }
            Request::ReportError => {
                let parent_id = asynch::read_id(&mut stream).await?;
                let message = asynch::read_string(&mut stream).await?;
                service.report_error(parent_id, message).await?;
            }
        }
    }
}

async fn respond<S>(stream: &mut S, bytes: &[u8], what: &str) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    stream.write_all(bytes).await.map_err(|e| Error::Ipc {
        reason: format!("failed to send {what} response: {e}"),
    })
}
