//! End-to-end session scenarios against the real proxy binary.

#![cfg(unix)]

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tempfile::TempDir;

use chaperone::config;
use chaperone::error::Result as ChResult;
use chaperone::ipc::{serve_connection, transport};
use chaperone::service::Service;
use chaperone::session::Session;
use chaperone_wire::{Action, Command, IpcId};

// ---------------------------------------------------------------------------
// Recording decision authority
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
enum Event {
    Create { parent_id: IpcId, assigned: IpcId },
    Decide { executable: String, args: Vec<String> },
    Finish { exit_code: i64 },
    Error { parent_id: IpcId, message: String },
}

type EventLog = Arc<Mutex<Vec<Event>>>;

struct Recording {
    id: IpcId,
    verdict: fn(Command) -> Action,
    events: EventLog,
}

impl Recording {
    fn boxed(id: IpcId, verdict: fn(Command) -> Action, events: &EventLog) -> Box<dyn Service> {
        Box::new(Recording {
            id,
            verdict,
            events: events.clone(),
        })
    }
}

#[async_trait]
impl Service for Recording {
    async fn create(&mut self, parent_id: IpcId) -> ChResult<IpcId> {
        self.events.lock().unwrap().push(Event::Create {
            parent_id,
            assigned: self.id,
        });
        Ok(self.id)
    }

    async fn make_decision(&mut self, command: Command) -> ChResult<Action> {
        self.events.lock().unwrap().push(Event::Decide {
            executable: command.executable.clone(),
            args: command.args.clone(),
        });
        Ok((self.verdict)(command))
    }

    async fn finish(&mut self, exit_code: i64) -> ChResult<()> {
        self.events
            .lock()
            .unwrap()
            .push(Event::Finish { exit_code });
        Ok(())
    }

    async fn report_error(&mut self, parent_id: IpcId, message: String) -> ChResult<()> {
        self.events
            .lock()
            .unwrap()
            .push(Event::Error { parent_id, message });
        Ok(())
    }
}

fn wrap(command: Command) -> Action {
    Action::Wrap(command)
}

fn drop_it(_command: Command) -> Action {
    Action::Drop
}

fn inject(command: Command) -> Action {
    Action::Inject(command)
}

fn proxy_bin() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_chaperone-proxy"))
}

fn shell(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

// ---------------------------------------------------------------------------
// Wrap / drop semantics
// ---------------------------------------------------------------------------

#[tokio::test]
async fn wrap_scenario_echo_hello_world() {
    let tmp = TempDir::new().unwrap();
    let events: EventLog = Arc::new(Mutex::new(Vec::new()));

    let session = Session::new(tmp.path().join("s.sock"), proxy_bin());
    let log = events.clone();
    let outcome = session
        .run(&shell(&["echo", "Hello, World!"]), move |id| {
            Recording::boxed(id, wrap, &log)
        })
        .await
        .unwrap();

    assert_eq!(outcome.exit_code, 0);
    assert!(outcome.client_failures.is_empty());

    let log = events.lock().unwrap();
    assert_eq!(
        *log,
        vec![
            Event::Create {
                parent_id: 0,
                assigned: 1
            },
            Event::Decide {
                executable: "echo".into(),
                args: vec!["Hello, World!".into()]
            },
            Event::Finish { exit_code: 0 },
        ]
    );
}

#[tokio::test]
async fn wrap_propagates_the_child_exit_code() {
    let tmp = TempDir::new().unwrap();
    let events: EventLog = Arc::new(Mutex::new(Vec::new()));

    let session = Session::new(tmp.path().join("s.sock"), proxy_bin());
    let log = events.clone();
    let outcome = session
        .run(&shell(&["sh", "-c", "exit 7"]), move |id| {
            Recording::boxed(id, wrap, &log)
        })
        .await
        .unwrap();

    assert_eq!(outcome.exit_code, 7);
    let log = events.lock().unwrap();
    assert!(log.contains(&Event::Finish { exit_code: 7 }));
}

#[tokio::test]
async fn drop_exits_zero_without_spawning() {
    let tmp = TempDir::new().unwrap();
    let events: EventLog = Arc::new(Mutex::new(Vec::new()));
    let marker = tmp.path().join("should-not-exist");

    let session = Session::new(tmp.path().join("s.sock"), proxy_bin());
    let log = events.clone();
    let outcome = session
        .run(
            &shell(&["touch", marker.to_str().unwrap()]),
            move |id| Recording::boxed(id, drop_it, &log),
        )
        .await
        .unwrap();

    assert_eq!(outcome.exit_code, 0);
    assert!(!marker.exists(), "dropped command must not run");
    let log = events.lock().unwrap();
    assert!(log.contains(&Event::Finish { exit_code: 0 }));
}

// ---------------------------------------------------------------------------
// Tree structure: nested CREATEs carry the parent's id
// ---------------------------------------------------------------------------

#[tokio::test]
async fn nested_proxy_reports_its_parent_id() {
    let tmp = TempDir::new().unwrap();
    let events: EventLog = Arc::new(Mutex::new(Vec::new()));

    // The wrapped "program" is itself a proxy invocation claiming the root's
    // id as parent, exactly what the shim would produce inside a traced
    // child.
    let proxy = proxy_bin();
    let session = Session::new(tmp.path().join("s.sock"), proxy.clone());
    let log = events.clone();
    let outcome = session
        .run(
            &shell(&[
                proxy.to_str().unwrap(),
                "-p",
                "1",
                "--exec",
                "echo",
                "--",
                "echo",
                "nested",
            ]),
            move |id| Recording::boxed(id, wrap, &log),
        )
        .await
        .unwrap();

    assert_eq!(outcome.exit_code, 0);
    assert!(outcome.client_failures.is_empty());

    let log = events.lock().unwrap();
    assert_eq!(
        log.first(),
        Some(&Event::Create {
            parent_id: 0,
            assigned: 1
        })
    );
    assert!(log.contains(&Event::Create {
        parent_id: 1,
        assigned: 2
    }));
    assert!(log.contains(&Event::Decide {
        executable: "echo".into(),
        args: vec!["nested".into()]
    }));
}

// ---------------------------------------------------------------------------
// Inject: full interception through the preloaded shim
// ---------------------------------------------------------------------------

#[tokio::test]
async fn inject_traces_the_grandchild() {
    let shim = proxy_bin()
        .parent()
        .unwrap()
        .join(chaperone_wire::environ::SHIM_FILE_NAME);
    if !shim.exists() {
        eprintln!("skipping: shim artifact not built at {}", shim.display());
        return;
    }

    let tmp = TempDir::new().unwrap();
    let events: EventLog = Arc::new(Mutex::new(Vec::new()));

    let session = Session::new(tmp.path().join("s.sock"), proxy_bin());
    let log = events.clone();
    let outcome = session
        .run(&shell(&["sh", "-c", "/bin/true"]), move |id| {
            Recording::boxed(id, inject, &log)
        })
        .await
        .unwrap();

    assert_eq!(outcome.exit_code, 0);
    assert!(outcome.client_failures.is_empty());

    let log = events.lock().unwrap();
    assert!(log.contains(&Event::Create {
        parent_id: 0,
        assigned: 1
    }));
    // The shell's exec of /bin/true arrived as a second, nested connection.
    assert!(log.contains(&Event::Create {
        parent_id: 1,
        assigned: 2
    }));
    assert!(log
        .iter()
        .any(|e| matches!(e, Event::Decide { executable, .. } if executable == "/bin/true")));
}

// ---------------------------------------------------------------------------
// Failure reporting
// ---------------------------------------------------------------------------

#[tokio::test]
async fn malformed_invocation_reports_error_and_exits_nonzero() {
    let tmp = TempDir::new().unwrap();
    let socket_path = tmp.path().join("s.sock");
    let events: EventLog = Arc::new(Mutex::new(Vec::new()));

    let mut listener = transport::bind(&socket_path).await.unwrap();
    let log = events.clone();
    let server = tokio::spawn(async move {
        let mut next_id: IpcId = 1;
        while let Ok(stream) = listener.accept().await {
            let service = Recording::boxed(next_id, wrap, &log);
            next_id += 1;
            tokio::spawn(serve_connection(service, stream));
        }
    });

    let status = tokio::process::Command::new(proxy_bin())
        .args(["-p", "0", "--exec", "/bin/true", "this is not a separator"])
        .env(config::ENV_ENDPOINT, &socket_path)
        .status()
        .await
        .unwrap();

    assert_eq!(status.code(), Some(config::PROXY_FAILURE_CODE));

    // The report travels on its own connection; give it a moment to land.
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        {
            let log = events.lock().unwrap();
            if log.iter().any(|e| {
                matches!(e, Event::Error { parent_id: 0, message } if message.contains("this is not a separator"))
            }) {
                break;
            }
        }
        assert!(Instant::now() < deadline, "REPORT_ERROR never arrived");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    server.abort();
}

#[tokio::test]
async fn connection_failure_is_fatal_to_the_proxy() {
    let tmp = TempDir::new().unwrap();
    let status = tokio::process::Command::new(proxy_bin())
        .args(["-p", "0", "--exec", "echo", "--", "echo", "hi"])
        .env(config::ENV_ENDPOINT, tmp.path().join("absent.sock"))
        .status()
        .await
        .unwrap();

    assert_eq!(status.code(), Some(config::PROXY_FAILURE_CODE));
}
