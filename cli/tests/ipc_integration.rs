//! Integration tests for IPC: dispatch loop, client exchange, wire layout.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use chaperone::error::{Error, Result as ChResult};
use chaperone::ipc::transport;
use chaperone::ipc::{serve_connection, Client};
use chaperone::service::Service;
use chaperone_wire::codec::{to_bytes, Encode};
use chaperone_wire::{Action, Command, IpcId, Request};

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

fn wrap_verdict(command: Command) -> Action {
    Action::Wrap(command)
}

fn drop_verdict(_command: Command) -> Action {
    Action::Drop
}

// ---------------------------------------------------------------------------
// Dispatch loop over an in-memory stream
// ---------------------------------------------------------------------------

#[tokio::test]
async fn dispatch_loop_full_exchange() {
    let (server_side, mut client_side) = tokio::io::duplex(4096);
    let events: EventLog = Arc::new(Mutex::new(Vec::new()));

    let service = Recording::boxed(7, wrap_verdict, &events);
    let server = tokio::spawn(serve_connection(service, server_side));

    // CREATE
    let mut message = to_bytes(&Request::Create);
    0i32.encode(&mut message);
    client_side.write_all(&message).await.unwrap();
    let mut id_buf = [0u8; 4];
    client_side.read_exact(&mut id_buf).await.unwrap();
    assert_eq!(i32::from_le_bytes(id_buf), 7);

    // MAKE_DECISION
    let command = Command {
        cwd: "/tmp".into(),
        executable: "/bin/echo".into(),
        args: vec!["hello".into()],
        env: vec!["PATH=/bin".into()],
    };
    let mut message = to_bytes(&Request::MakeDecision);
    command.encode(&mut message);
    client_side.write_all(&message).await.unwrap();

    let expected = to_bytes(&Action::Wrap(command));
    let mut action_buf = vec![0u8; expected.len()];
    client_side.read_exact(&mut action_buf).await.unwrap();
    assert_eq!(action_buf, expected);

    // FINISH, then clean disconnect
    let mut message = to_bytes(&Request::Finish);
    0i64.encode(&mut message);
    client_side.write_all(&message).await.unwrap();
    drop(client_side);

    server.await.unwrap().unwrap();

    let log = events.lock().unwrap();
    assert_eq!(
        *log,
        vec![
            Event::Create {
                parent_id: 0,
                assigned: 7
            },
            Event::Decide {
                executable: "/bin/echo".into(),
                args: vec!["hello".into()]
            },
            Event::Finish { exit_code: 0 },
        ]
    );
}

#[tokio::test]
async fn dispatch_loop_report_error_has_no_response() {
    let (server_side, mut client_side) = tokio::io::duplex(4096);
    let events: EventLog = Arc::new(Mutex::new(Vec::new()));

    let service = Recording::boxed(1, wrap_verdict, &events);
    let server = tokio::spawn(serve_connection(service, server_side));

    let mut message = to_bytes(&Request::ReportError);
    5i32.encode(&mut message);
    "shim exploded".encode(&mut message);
    client_side.write_all(&message).await.unwrap();
    drop(client_side);

    server.await.unwrap().unwrap();

    let log = events.lock().unwrap();
    assert_eq!(
        *log,
        vec![Event::Error {
            parent_id: 5,
            message: "shim exploded".into()
        }]
    );
}

#[tokio::test]
async fn unknown_request_tag_is_fatal_to_the_connection() {
    let (server_side, mut client_side) = tokio::io::duplex(64);
    let events: EventLog = Arc::new(Mutex::new(Vec::new()));

    let service = Recording::boxed(1, wrap_verdict, &events);
    let server = tokio::spawn(serve_connection(service, server_side));

    client_side.write_all(&[0xff]).await.unwrap();

    let err = server.await.unwrap().unwrap_err();
    assert!(matches!(err, Error::Protocol { .. }));
}

#[tokio::test]
async fn eof_inside_a_message_is_an_error() {
    let (server_side, mut client_side) = tokio::io::duplex(64);
    let events: EventLog = Arc::new(Mutex::new(Vec::new()));

    let service = Recording::boxed(1, wrap_verdict, &events);
    let server = tokio::spawn(serve_connection(service, server_side));

    // A CREATE tag with only half of the parent id behind it.
    let mut message = to_bytes(&Request::Create);
    message.extend_from_slice(&[0x01, 0x02]);
    client_side.write_all(&message).await.unwrap();
    drop(client_side);

    assert!(server.await.unwrap().is_err());
}

#[tokio::test]
async fn immediate_disconnect_is_a_clean_end() {
    let (server_side, client_side) = tokio::io::duplex(64);
    let events: EventLog = Arc::new(Mutex::new(Vec::new()));

    let service = Recording::boxed(1, wrap_verdict, &events);
    let server = tokio::spawn(serve_connection(service, server_side));

    drop(client_side);

    server.await.unwrap().unwrap();
    assert!(events.lock().unwrap().is_empty());
}

// ---------------------------------------------------------------------------
// Client/server over the real transport
// ---------------------------------------------------------------------------

#[cfg(unix)]
#[tokio::test]
async fn client_exchange_over_unix_socket() {
    let tmp = TempDir::new().unwrap();
    let socket_path = tmp.path().join("ipc.sock");
    let events: EventLog = Arc::new(Mutex::new(Vec::new()));

    let mut listener = transport::bind(&socket_path).await.unwrap();
    let server_events = events.clone();
    let server = tokio::spawn(async move {
        let stream = listener.accept().await.unwrap();
        serve_connection(Recording::boxed(3, drop_verdict, &server_events), stream)
            .await
            .unwrap();
    });

    let mut client = Client::connect(&socket_path).await.unwrap();
    let id = client.create(0).await.unwrap();
    assert_eq!(id, 3);

    let command = Command {
        cwd: "/".into(),
        executable: "/usr/bin/make".into(),
        args: vec!["-j4".into()],
        env: vec![],
    };
    let action = client.make_decision(&command).await.unwrap();
    assert_eq!(action, Action::Drop);

    client.finish(0).await.unwrap();
    drop(client);

    server.await.unwrap();

    let log = events.lock().unwrap();
    assert_eq!(log.len(), 3);
}

#[cfg(unix)]
#[tokio::test]
async fn connect_to_absent_endpoint_fails() {
    let tmp = TempDir::new().unwrap();
    let socket_path = tmp.path().join("nobody-home.sock");
    let result = Client::connect(&socket_path).await;
    assert!(matches!(result, Err(Error::Ipc { .. })));
}

#[cfg(unix)]
#[tokio::test]
async fn bind_clears_a_stale_socket() {
    let tmp = TempDir::new().unwrap();
    let socket_path = tmp.path().join("stale.sock");

    // A leftover from a previous run.
    drop(transport::bind(&socket_path).await.unwrap());
    std::fs::write(&socket_path, b"").unwrap();

    let listener = transport::bind(&socket_path).await;
    assert!(listener.is_ok());
}
