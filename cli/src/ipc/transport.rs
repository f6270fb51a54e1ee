//! Platform transport: Unix domain socket or Windows named pipe.
//!
//! One well-known endpoint per session, single-tenant. The listener is owned
//! by the session controller; dropping it stops further connections.

pub use sys::{bind, connect, ClientStream, Endpoint, Listener, ServerStream};

#[cfg(unix)]
mod sys {
    use std::io;
    use std::path::PathBuf;

    use tokio::net::{UnixListener, UnixStream};

    pub type Endpoint = PathBuf;
    pub type ServerStream = UnixStream;
    pub type ClientStream = UnixStream;

    pub struct Listener {
        inner: UnixListener,
        path: PathBuf,
    }

    /// Bind the endpoint, clearing any stale socket left by a previous run.
    pub async fn bind(endpoint: &Endpoint) -> io::Result<Listener> {
        if endpoint.exists() {
            std::fs::remove_file(endpoint)?;
        }
        if let Some(parent) = endpoint.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let inner = UnixListener::bind(endpoint)?;
        Ok(Listener {
            inner,
            path: endpoint.clone(),
        })
    }

    impl Listener {
        pub async fn accept(&mut self) -> io::Result<ServerStream> {
            let (stream, _addr) = self.inner.accept().await?;
            Ok(stream)
        }
    }

    impl Drop for Listener {
        fn drop(&mut self) {
            let _ = std::fs::remove_file(&self.path);
        }
    }

    pub async fn connect(endpoint: &Endpoint) -> io::Result<ClientStream> {
        UnixStream::connect(endpoint).await
    }
}

#[cfg(windows)]
mod sys {
    use std::io;

    use tokio::net::windows::named_pipe::{ClientOptions, NamedPipeClient, NamedPipeServer, ServerOptions};

    pub type Endpoint = String;
    pub type ServerStream = NamedPipeServer;
    pub type ClientStream = NamedPipeClient;

    pub struct Listener {
        endpoint: String,
        next: NamedPipeServer,
    }

    /// Create the first pipe instance. Named pipes have no stale on-disk
    /// state to clear.
    pub async fn bind(endpoint: &Endpoint) -> io::Result<Listener> {
        let next = ServerOptions::new()
            .first_pipe_instance(true)
            .create(endpoint)?;
        Ok(Listener {
            endpoint: endpoint.clone(),
            next,
        })
    }

    impl Listener {
        pub async fn accept(&mut self) -> io::Result<ServerStream> {
            self.next.connect().await?;
            let fresh = ServerOptions::new().create(&self.endpoint)?;
            Ok(std::mem::replace(&mut self.next, fresh))
        }
    }

    pub async fn connect(endpoint: &Endpoint) -> io::Result<ClientStream> {
        ClientOptions::new().open(endpoint)
    }
}
