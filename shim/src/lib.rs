//! Interception payload loaded into every traced process.
//!
//! A constructor runs before the traced program's own code: it captures the
//! marker state the launching proxy planted (connection id, proxy path) and
//! then scrubs that state from the process environment, so the program
//! observes exactly the environment it would have had untraced. From then on
//! every recognized process-creation entry point is rewritten into an
//! invocation of the proxy carrying the original call's metadata.
//!
//! Interception coverage is a correctness property: when the payload cannot
//! do its job it fails the call loudly instead of quietly running the
//! program untraced.

pub mod cmdline;

#[cfg(unix)]
pub mod unix;

#[cfg(windows)]
pub mod windows;

use chaperone_wire::environ;

/// Remove interception bookkeeping from this process's environment.
///
/// Runs once at activation, before any user code. The traced program, and
/// any child it spawns through an unrecognized channel, sees no trace of the
/// markers or of the shim's own preload segment.
pub(crate) fn scrub_environment() {
    std::env::remove_var(environ::KEY_IPC_ID);
    std::env::remove_var(environ::KEY_PROXY_PATH);

    if let Ok(value) = std::env::var(environ::KEY_PRELOAD) {
        let mut entries = vec![format!("{}={}", environ::KEY_PRELOAD, value)];
        environ::strip(&mut entries);
        match entries.pop() {
            Some(entry) => {
                std::env::set_var(environ::KEY_PRELOAD, &entry[environ::KEY_PRELOAD.len() + 1..])
            }
            None => std::env::remove_var(environ::KEY_PRELOAD),
        }
    }
}

/// Rewritten argv for an intercepted call: route through the proxy, carrying
/// the original program and argv behind the `--` separator.
pub(crate) fn proxy_argv(
    proxy_path: &str,
    id: chaperone_wire::IpcId,
    program: &str,
    argv: &[String],
) -> Vec<String> {
    let mut rewritten = Vec::with_capacity(argv.len() + 6);
    rewritten.push(proxy_path.to_string());
    rewritten.push("-p".to_string());
    rewritten.push(id.to_string());
    rewritten.push("--exec".to_string());
    rewritten.push(program.to_string());
    rewritten.push("--".to_string());
    rewritten.extend_from_slice(argv);
    rewritten
}
