//! Command-line rewriting for the Windows detour.
//!
//! Windows process creation takes a single command-line string, so the
//! rewrite happens at the string level: prefix the proxy invocation, keep
//! the original line intact behind the `--` separator, and clear the
//! application name so the loader resolves the new first token.

/// First token of a command line, honoring a quoted program path.
pub fn application_name(command_line: &str) -> &str {
    let trimmed = command_line.trim_start();
    if let Some(rest) = trimmed.strip_prefix('"') {
        match rest.find('"') {
            Some(end) => &rest[..end],
            None => rest,
        }
    } else {
        match trimmed.find(' ') {
            Some(end) => &trimmed[..end],
            None => trimmed,
        }
    }
}

/// The rewritten line that routes this call through the proxy.
///
/// `application` is the caller-supplied application name, when there was
/// one; otherwise it is recovered from the command line itself.
pub fn rewrite(
    proxy_path: &str,
    id: chaperone_wire::IpcId,
    application: Option<&str>,
    command_line: &str,
) -> String {
    let app = match application {
        Some(name) if !name.is_empty() => name,
        _ => application_name(command_line),
    };
    format!("\"{proxy_path}\" -p {id} --exec {app} -- {command_line}")
}
