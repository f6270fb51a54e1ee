//! The single-shot relay. Invoked by the session (for the root) or by the
//! shim inside a traced process (for everything else); never invoked by
//! hand.
//!
//! usage: chaperone-proxy -p <parent id> --exec <path> -- <args...>

use std::sync::Arc;

use chaperone::{config, proxy};

/// The proxy stands in for the traced program, so its inherited stdio is not
/// ours to write to: log to a file under the state directory, or not at all.
fn init_logging() {
    let path = config::proxy_log_path();
    if let Some(dir) = path.parent() {
        if std::fs::create_dir_all(dir).is_err() {
            return;
        }
    }
    let Ok(file) = std::fs::OpenOptions::new().create(true).append(true).open(&path) else {
        return;
    };
    let _ = tracing_subscriber::fmt()
        .with_writer(Arc::new(file))
        .with_ansi(false)
        .with_max_level(tracing::Level::INFO)
        .try_init();
}

#[tokio::main]
async fn main() {
    init_logging();
    let args: Vec<String> = std::env::args().skip(1).collect();
    let code = proxy::run(&args).await;
    std::process::exit(code);
}
