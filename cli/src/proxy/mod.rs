//! The single-shot relay between an intercepted call and the session.
//!
//! One proxy instance handles exactly one intercepted process creation:
//! CREATE → MAKE_DECISION → execute the verdict → FINISH, propagating the
//! executed command's exit code as its own. Anything that breaks that chain
//! is reported best-effort through REPORT_ERROR and turns into the
//! distinguished failure exit code.

pub mod exec;
pub mod opts;

use chaperone_wire::{environ, Command, IpcId, ROOT_PARENT};

use crate::config;
use crate::error::{Error, Result};
use crate::ipc::transport::Endpoint;
use crate::ipc::Client;
use opts::Payload;

/// Run the proxy flow for one invocation; never panics, always yields the
/// process exit code.
pub async fn run(args: &[String]) -> i32 {
    let endpoint = config::endpoint();
    match try_run(&endpoint, args).await {
        Ok(code) => code as i32,
        Err(err) => {
            tracing::error!(args = ?args, "proxy failed: {err}");
            let parent_id = opts::parse(args)
                .map(|o| o.parent_id)
                .unwrap_or(ROOT_PARENT);
            report_failure(&endpoint, parent_id, &err).await;
            config::PROXY_FAILURE_CODE
        }
    }
}

async fn try_run(endpoint: &Endpoint, args: &[String]) -> Result<i64> {
    let options = opts::parse(args)?;

    let mut client = Client::connect(endpoint).await?;
    let id = client.create(options.parent_id).await?;
    tracing::info!(id, parent_id = options.parent_id, "registered with session");

    let argv = match options.payload {
        Payload::Args(argv) => argv,
        Payload::ShimError(message) => return Err(Error::Shim { message }),
    };
    let command = capture_command(options.executable, argv)?;

    let action = client.make_decision(&command).await?;
    let code = exec::dispatch(action, id).await?;

    client.finish(code).await?;
    Ok(code)
}

/// Assemble the intercepted command from this invocation and the process
/// state the shim handed over.
///
/// The environment is captured fresh and stripped of interception
/// bookkeeping, so the authority evaluates the environment the traced
/// program actually intended for its child. The payload repeats the
/// executable as argv[0]; `Command.args` carries only what follows it.
fn capture_command(executable: String, payload: Vec<String>) -> Result<Command> {
    let cwd = std::env::current_dir()?;
    let mut env: Vec<String> = std::env::vars()
        .map(|(key, value)| format!("{key}={value}"))
        .collect();
    environ::strip(&mut env);

    let args = if payload.is_empty() {
        payload
    } else {
        payload[1..].to_vec()
    };

    Ok(Command {
        cwd: cwd.to_string_lossy().into_owned(),
        executable,
        args,
        env,
    })
}

/// Best-effort failure report on a fresh connection; a failed report is
/// swallowed, there is nobody left to tell.
async fn report_failure(endpoint: &Endpoint, parent_id: IpcId, error: &Error) {
    let Ok(mut client) = Client::connect(endpoint).await else {
        return;
    };
    let _ = client.report_error(parent_id, &error.to_string()).await;
}
