//! TCP server: one thread per connection.

use std::collections::BTreeMap;
use std::io::{BufReader, BufWriter, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use bytes::BytesMut;
use tracing::{debug, error, info, warn};

use crate::common::{Error, Result};
use crate::engine::Database;
use crate::net::config::ServerConfig;
use crate::net::database::{RawReader, ServerDatabase};
use crate::net::protocol::{read_frame, read_handshake, write_frame, Request, Response};
use crate::types::{HistorianKey, HistorianValue};

/// How long the accept loop sleeps when no connection is pending.
const ACCEPT_POLL: Duration = Duration::from_millis(20);

type Catalog = BTreeMap<String, Arc<dyn ServerDatabase>>;

/// Stops a running [`Server`] from another thread.
#[derive(Debug, Clone, Default)]
pub struct ShutdownHandle(Arc<AtomicBool>);

impl ShutdownHandle {
    pub fn shutdown(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_shutdown(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// A historian server.
///
/// Each accepted connection gets its own thread. Connections share the
/// databases; each [`Database`] does its own writer serialization, so a
/// write on one connection never blocks reads on another.
pub struct Server {
    config: ServerConfig,
    listener: TcpListener,
    databases: Arc<Catalog>,
    shutdown: ShutdownHandle,
}

impl Server {
    /// Open every configured database with historian keys and values and
    /// bind the listening socket.
    pub fn bind(config: ServerConfig) -> Result<Self> {
        config.validate()?;
        let mut databases: Vec<Arc<dyn ServerDatabase>> = Vec::new();
        for db_config in &config.databases {
            let db = Database::<HistorianKey, HistorianValue>::open(db_config.clone())?;
            databases.push(Arc::new(db));
        }
        Self::bind_with(config, databases)
    }

    /// Bind the listening socket and serve `databases`.
    ///
    /// `config.databases` is ignored; the given databases are served as-is.
    pub fn bind_with(config: ServerConfig, databases: Vec<Arc<dyn ServerDatabase>>) -> Result<Self> {
        if config.read_batch_size == 0 {
            return Err(Error::InvalidConfiguration(
                "read_batch_size must be at least 1".to_string(),
            ));
        }
        let mut catalog = Catalog::new();
        for db in databases {
            let name = db.name().to_string();
            if catalog.insert(name.clone(), db).is_some() {
                return Err(Error::InvalidConfiguration(format!(
                    "database '{}' is served twice",
                    name
                )));
            }
        }

        let listener = TcpListener::bind(config.socket_addr()?)?;
        info!(
            addr = %listener.local_addr()?,
            databases = catalog.len(),
            read_only = config.read_only,
            "historian server listening"
        );
        Ok(Self {
            config,
            listener,
            databases: Arc::new(catalog),
            shutdown: ShutdownHandle::default(),
        })
    }

    /// Address actually bound.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Names of the served databases.
    pub fn database_names(&self) -> Vec<String> {
        self.databases.keys().cloned().collect()
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Accept connections until shut down, then commit and close every
    /// database.
    pub fn run(self) -> Result<()> {
        self.listener.set_nonblocking(true)?;
        let mut next_id = 0u64;

        while !self.shutdown.is_shutdown() {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    next_id += 1;
                    info!(id = next_id, %peer, "accepted connection");
                    let session = Session {
                        id: next_id,
                        peer,
                        stream,
                        databases: Arc::clone(&self.databases),
                        server_read_only: self.config.read_only,
                        batch_size: self.config.read_batch_size,
                    };
                    thread::Builder::new()
                        .name(format!("historian-conn-{}", next_id))
                        .spawn(move || session.run())?;
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => thread::sleep(ACCEPT_POLL),
                Err(e) => warn!(error = %e, "accept failed"),
            }
        }

        info!("historian server shutting down");
        for db in self.databases.values() {
            if let Err(e) = db.hard_commit() {
                error!(name = db.name(), error = %e, "final commit failed");
            }
            db.close();
        }
        Ok(())
    }

    /// Run on a background thread.
    pub fn spawn(self) -> Result<ServerHandle> {
        let addr = self.local_addr()?;
        let shutdown = self.shutdown_handle();
        let thread = thread::Builder::new()
            .name("historian-accept".to_string())
            .spawn(move || self.run())?;
        Ok(ServerHandle {
            addr,
            shutdown,
            thread: Some(thread),
        })
    }
}

/// A server running on a background thread. Dropping it shuts it down.
pub struct ServerHandle {
    addr: SocketAddr,
    shutdown: ShutdownHandle,
    thread: Option<JoinHandle<Result<()>>>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stop accepting, close the databases and wait for the accept loop.
    pub fn shutdown(mut self) -> Result<()> {
        self.stop()
    }

    fn stop(&mut self) -> Result<()> {
        self.shutdown.shutdown();
        match self.thread.take() {
            Some(thread) => thread
                .join()
                .map_err(|_| Error::Server("accept thread panicked".to_string()))?,
            None => Ok(()),
        }
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!(error = %e, "server did not stop cleanly");
        }
    }
}

// ============================================================================
// Connections
// ============================================================================

/// What the socket reader thread hands the session.
enum Incoming {
    Request(Request),
    /// A well-framed request that did not decode.
    Malformed(String),
    /// The stream can no longer be trusted.
    Failed(Error),
    Closed,
}

/// Whether the session continues after a request.
#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

struct Session {
    id: u64,
    peer: SocketAddr,
    stream: TcpStream,
    databases: Arc<Catalog>,
    server_read_only: bool,
    batch_size: usize,
}

impl Session {
    fn run(self) {
        let (id, peer) = (self.id, self.peer);
        let socket = self.stream.try_clone();
        match self.serve() {
            Ok(()) => info!(id, %peer, "connection closed"),
            Err(e) => warn!(id, %peer, error = %e, "connection dropped"),
        }
        // Wakes the reader thread if it is still blocked on the socket.
        if let Ok(socket) = socket {
            let _ = socket.shutdown(Shutdown::Both);
        }
    }

    fn serve(self) -> Result<()> {
        self.stream.set_nonblocking(false)?;
        self.stream.set_nodelay(true)?;
        let mut reader = BufReader::new(self.stream.try_clone()?);
        let mut writer = BufWriter::new(self.stream.try_clone()?);

        let Some(client_read_only) = read_handshake(&mut reader)? else {
            send(&mut writer, &Response::UnknownProtocol)?;
            return Err(Error::protocol("unknown protocol magic"));
        };
        if self.server_read_only && !client_read_only {
            warn!(id = self.id, peer = %self.peer, "read-write session refused by read-only server");
            return send(&mut writer, &Response::AuthenticationFailed);
        }
        write_frame(&mut writer, &Response::KnownProtocol.encode())?;
        send(&mut writer, &Response::ConnectedToRoot)?;

        let inbox = spawn_reader(reader, self.id)?;
        let mut connection = Connection {
            id: self.id,
            writer,
            inbox,
            databases: self.databases,
            read_only: client_read_only || self.server_read_only,
            batch_size: self.batch_size,
            database: None,
        };
        let result = connection.serve();
        if let Err(e) = &result {
            if matches!(e, Error::Protocol(_)) {
                let _ = send(&mut connection.writer, &Response::Error(e.to_string()));
            }
        }
        result
    }
}

fn send<W: Write>(writer: &mut W, response: &Response) -> Result<()> {
    write_frame(writer, &response.encode())?;
    writer.flush()?;
    Ok(())
}

fn spawn_reader(mut reader: BufReader<TcpStream>, id: u64) -> Result<Receiver<Incoming>> {
    let (tx, rx) = mpsc::channel();
    thread::Builder::new()
        .name(format!("historian-read-{}", id))
        .spawn(move || loop {
            let incoming = match read_frame(&mut reader) {
                Ok(Some((code, payload))) => match Request::decode(code, payload) {
                    Ok(request) => Incoming::Request(request),
                    Err(e) => Incoming::Malformed(e.to_string()),
                },
                Ok(None) => Incoming::Closed,
                Err(e) => Incoming::Failed(e),
            };
            let last = matches!(incoming, Incoming::Closed | Incoming::Failed(_));
            if tx.send(incoming).is_err() || last {
                break;
            }
        })?;
    Ok(rx)
}

/// A session past the handshake.
struct Connection {
    id: u64,
    writer: BufWriter<TcpStream>,
    inbox: Receiver<Incoming>,
    databases: Arc<Catalog>,
    read_only: bool,
    batch_size: usize,
    database: Option<Arc<dyn ServerDatabase>>,
}

impl Connection {
    fn serve(&mut self) -> Result<()> {
        loop {
            let request = match self.inbox.recv() {
                Ok(Incoming::Request(request)) => request,
                Ok(Incoming::Malformed(message)) => {
                    warn!(id = self.id, %message, "malformed request");
                    self.reply(Response::Error(message))?;
                    continue;
                }
                Ok(Incoming::Failed(e)) => return Err(e),
                Ok(Incoming::Closed) | Err(_) => return Ok(()),
            };
            if self.dispatch(request)? == Flow::Stop {
                return Ok(());
            }
        }
    }

    fn reply(&mut self, response: Response) -> Result<()> {
        send(&mut self.writer, &response)
    }

    fn reply_error(&mut self, error: &Error) -> Result<()> {
        if error.is_fatal() {
            error!(id = self.id, error = %error, "database reported corruption");
        }
        self.reply(Response::Error(error.to_string()))
    }

    fn dispatch(&mut self, request: Request) -> Result<Flow> {
        debug!(id = self.id, command = ?request.command(), "request");
        match request {
            Request::ListDatabases => {
                let infos = self.databases.values().map(|db| db.info()).collect();
                self.reply(Response::ListOfDatabases(infos))?;
            }
            Request::ConnectToDatabase {
                name,
                key_type,
                value_type,
            } => {
                let response = match self.databases.get(&name) {
                    None => Response::DatabaseDoesNotExist(name),
                    Some(db) if db.key_type() != key_type => Response::DatabaseKeyUnknown(db.key_type()),
                    Some(db) if db.value_type() != value_type => {
                        Response::DatabaseValueUnknown(db.value_type())
                    }
                    Some(db) => {
                        info!(id = self.id, name = db.name(), "client opened database");
                        self.database = Some(Arc::clone(db));
                        Response::SuccessfullyConnectedToDatabase
                    }
                };
                self.reply(response)?;
            }
            Request::Write { count, records } => {
                let result = self
                    .writable()
                    .and_then(|db| db.write_raw(count, &records));
                match result {
                    Ok(inserted) => self.reply(Response::WriteAccepted(inserted))?,
                    Err(e) => self.reply_error(&e)?,
                }
            }
            Request::HardCommit => match self.writable().and_then(|db| db.hard_commit()) {
                Ok(()) => self.reply(Response::CommitComplete)?,
                Err(e) => self.reply_error(&e)?,
            },
            Request::Read { start, stop } => {
                let reader = self.selected().and_then(|db| db.read_raw(&start, &stop));
                match reader {
                    Ok(reader) => return self.stream_read(reader),
                    Err(e) => self.reply_error(&e)?,
                }
            }
            Request::CancelRead => {
                // The read already ended before the cancel arrived.
                debug!(id = self.id, "cancel with no read in progress");
            }
            Request::DisconnectDatabase => {
                self.database = None;
                self.reply(Response::DatabaseDisconnected)?;
            }
            Request::Disconnect => {
                self.reply(Response::GoodBye)?;
                return Ok(Flow::Stop);
            }
        }
        Ok(Flow::Continue)
    }

    fn selected(&self) -> Result<Arc<dyn ServerDatabase>> {
        self.database
            .clone()
            .ok_or_else(|| Error::Server("no database selected".to_string()))
    }

    fn writable(&self) -> Result<Arc<dyn ServerDatabase>> {
        if self.read_only {
            return Err(Error::ReadOnlySession);
        }
        self.selected()
    }

    /// Send the read in batches, checking for a cancel between batches.
    fn stream_read(&mut self, mut reader: Box<dyn RawReader>) -> Result<Flow> {
        let mut buf = BytesMut::new();
        let mut batches = 0u64;
        loop {
            match self.inbox.try_recv() {
                Ok(Incoming::Request(Request::CancelRead)) => {
                    debug!(id = self.id, batches, "read cancelled");
                    self.reply(Response::ReadCancelled)?;
                    return Ok(Flow::Continue);
                }
                Ok(Incoming::Request(other)) => {
                    return Err(Error::protocol(format!(
                        "{:?} received while a read is streaming",
                        other.command()
                    )));
                }
                Ok(Incoming::Malformed(message)) => return Err(Error::protocol(message)),
                Ok(Incoming::Failed(e)) => return Err(e),
                Ok(Incoming::Closed) | Err(TryRecvError::Disconnected) => return Ok(Flow::Stop),
                Err(TryRecvError::Empty) => {}
            }

            buf.clear();
            match reader.next_batch(self.batch_size, &mut buf) {
                Ok(0) => {
                    debug!(id = self.id, batches, "read complete");
                    self.reply(Response::ReadComplete)?;
                    return Ok(Flow::Continue);
                }
                Ok(count) => {
                    batches += 1;
                    let records = buf.split().freeze();
                    self.reply(Response::ReadBatch {
                        count: count as u32,
                        records,
                    })?;
                }
                Err(e) => {
                    self.reply_error(&e)?;
                    return Ok(Flow::Continue);
                }
            }
        }
    }
}
