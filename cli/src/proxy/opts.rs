//! The proxy's invocation grammar.
//!
//! `chaperone-proxy -p <parent id> --exec <path> -- <args...>`
//!
//! The token where `--` belongs doubles as the shim's failure channel: if it
//! is anything other than a literal `--`, its value is an error message from
//! the shim, not a command to execute.

use chaperone_wire::IpcId;

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyOptions {
    pub parent_id: IpcId,
    pub executable: String,
    pub payload: Payload,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// Everything after the literal `--`, starting with the original argv[0].
    Args(Vec<String>),
    /// The shim could not rewrite the call and sent its diagnostic instead.
    ShimError(String),
}

pub fn parse(args: &[String]) -> Result<ProxyOptions> {
    let mut parent_id = None;
    let mut executable = String::new();
    let mut payload = Payload::Args(Vec::new());

    let mut tokens = args.iter();
    while let Some(token) = tokens.next() {
        match token.as_str() {
            "-p" => {
                let value = tokens.next().ok_or_else(|| missing_value("-p"))?;
                parent_id = Some(value.parse::<IpcId>().map_err(|_| Error::InvalidInvocation {
                    reason: format!("-p expects an integer id, got {value:?}"),
                })?);
            }
            "--exec" => {
                executable = tokens.next().ok_or_else(|| missing_value("--exec"))?.clone();
            }
            "--" => {
                payload = Payload::Args(tokens.cloned().collect());
                break;
            }
            other => {
                payload = Payload::ShimError(other.to_string());
                break;
            }
        }
    }

    Ok(ProxyOptions {
        parent_id: parent_id.ok_or_else(|| Error::InvalidInvocation {
            reason: "missing -p <parent id>".into(),
        })?,
        executable,
        payload,
    })
}

fn missing_value(flag: &str) -> Error {
    Error::InvalidInvocation {
        reason: format!("missing value for {flag}"),
    }
}
