//! Blocking client.

use std::collections::VecDeque;
use std::io::{BufReader, BufWriter, Write};
use std::marker::PhantomData;
use std::net::{Shutdown, TcpStream};

use bytes::{BufMut, BytesMut};
use tracing::{debug, info, warn};

use crate::common::{Error, Result};
use crate::net::config::DEFAULT_PORT;
use crate::net::protocol::{
    encode_handshake, read_frame, write_frame, DatabaseInfo, Request, Response,
};
use crate::types::TreeType;

/// Where and how to connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientOptions {
    pub address: String,
    pub port: u16,
    /// Ask for a session that can only read.
    pub read_only: bool,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            address: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            read_only: false,
        }
    }
}

impl ClientOptions {
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Self {
            address: address.into(),
            port,
            read_only: false,
        }
    }

    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }
}

/// A connection to a historian server.
///
/// At most one database is open per connection at a time; opening one
/// borrows the client mutably until the handle is dropped or disconnected.
pub struct Client {
    stream: TcpStream,
    reader: BufReader<TcpStream>,
    writer: BufWriter<TcpStream>,
    read_only: bool,
    closed: bool,
}

impl Client {
    /// Connect and complete the handshake.
    pub fn connect(options: &ClientOptions) -> Result<Self> {
        let stream = TcpStream::connect((options.address.as_str(), options.port))?;
        stream.set_nodelay(true)?;
        let mut client = Self {
            reader: BufReader::new(stream.try_clone()?),
            writer: BufWriter::new(stream.try_clone()?),
            stream,
            read_only: options.read_only,
            closed: false,
        };

        if let Err(e) = client.handshake(options.read_only) {
            client.closed = true;
            return Err(e);
        }
        info!(
            address = %options.address,
            port = options.port,
            read_only = options.read_only,
            "connected to historian"
        );
        Ok(client)
    }

    fn handshake(&mut self, read_only: bool) -> Result<()> {
        self.writer.write_all(&encode_handshake(read_only))?;
        self.writer.flush()?;
        match self.receive()? {
            Response::KnownProtocol => {}
            Response::UnknownProtocol => {
                return Err(Error::protocol("server does not speak this protocol"))
            }
            Response::AuthenticationFailed => return Err(Error::ReadOnlySession),
            other => return Err(unexpected(&other)),
        }
        match self.receive()? {
            Response::ConnectedToRoot => Ok(()),
            other => Err(unexpected(&other)),
        }
    }

    /// True if the session was opened read-only.
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    fn send(&mut self, request: &Request) -> Result<()> {
        if self.closed {
            return Err(Error::Closed);
        }
        write_frame(&mut self.writer, &request.encode())?;
        self.writer.flush()?;
        Ok(())
    }

    fn receive(&mut self) -> Result<Response> {
        match read_frame(&mut self.reader)? {
            Some((code, payload)) => Response::decode(code, payload),
            None => {
                self.closed = true;
                Err(Error::Closed)
            }
        }
    }

    fn call(&mut self, request: &Request) -> Result<Response> {
        self.send(request)?;
        match self.receive()? {
            Response::Error(message) => Err(Error::Server(message)),
            response => Ok(response),
        }
    }

    /// Databases the server offers.
    pub fn list_databases(&mut self) -> Result<Vec<DatabaseInfo>> {
        match self.call(&Request::ListDatabases)? {
            Response::ListOfDatabases(infos) => Ok(infos),
            other => Err(unexpected(&other)),
        }
    }

    /// Open a database whose records are `K`/`V`.
    pub fn get_database<K: TreeType, V: TreeType>(
        &mut self,
        name: &str,
    ) -> Result<ClientDatabase<'_, K, V>> {
        let request = Request::ConnectToDatabase {
            name: name.to_string(),
            key_type: K::TYPE_ID,
            value_type: V::TYPE_ID,
        };
        match self.call(&request)? {
            Response::SuccessfullyConnectedToDatabase => {}
            Response::DatabaseDoesNotExist(name) => return Err(Error::DatabaseNotFound(name)),
            Response::DatabaseKeyUnknown(found) => {
                return Err(Error::TypeMismatch {
                    expected: K::TYPE_ID,
                    found,
                })
            }
            Response::DatabaseValueUnknown(found) => {
                return Err(Error::TypeMismatch {
                    expected: V::TYPE_ID,
                    found,
                })
            }
            other => return Err(unexpected(&other)),
        }
        debug!(name, "opened remote database");
        Ok(ClientDatabase {
            client: self,
            name: name.to_string(),
            disconnected: false,
            _marker: PhantomData,
        })
    }

    /// Say goodbye and close the connection.
    pub fn disconnect(mut self) -> Result<()> {
        self.close()
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        let result = match self.call(&Request::Disconnect) {
            Ok(Response::GoodBye) => Ok(()),
            Ok(other) => Err(unexpected(&other)),
            Err(e) => Err(e),
        };
        self.closed = true;
        let _ = self.stream.shutdown(Shutdown::Both);
        result
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            debug!(error = %e, "disconnect on drop failed");
        }
    }
}

fn unexpected(response: &Response) -> Error {
    Error::protocol(format!("unexpected response {:?}", response.code()))
}

/// An open database on a [`Client`].
pub struct ClientDatabase<'a, K, V> {
    client: &'a mut Client,
    name: String,
    disconnected: bool,
    _marker: PhantomData<fn() -> (K, V)>,
}

impl<'a, K: TreeType, V: TreeType> ClientDatabase<'a, K, V> {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Insert one record. Returns `false` if the key already existed.
    pub fn write(&mut self, key: K, value: V) -> Result<bool> {
        Ok(self.write_batch([(key, value)])? == 1)
    }

    /// Insert records in one request. Returns how many were new.
    pub fn write_batch<I>(&mut self, records: I) -> Result<u32>
    where
        I: IntoIterator<Item = (K, V)>,
    {
        let record_size = K::SIZE + V::SIZE;
        let mut buf = BytesMut::new();
        let mut count = 0u32;
        for (key, value) in records {
            let at = buf.len();
            buf.put_bytes(0, record_size);
            key.write_bytes(&mut buf[at..at + K::SIZE]);
            value.write_bytes(&mut buf[at + K::SIZE..at + record_size]);
            count += 1;
        }
        let request = Request::Write {
            count,
            records: buf.freeze(),
        };
        match self.client.call(&request)? {
            Response::WriteAccepted(inserted) => Ok(inserted),
            other => Err(unexpected(&other)),
        }
    }

    /// Make every accepted write durable on the server.
    pub fn hard_commit(&mut self) -> Result<()> {
        match self.client.call(&Request::HardCommit)? {
            Response::CommitComplete => Ok(()),
            other => Err(unexpected(&other)),
        }
    }

    /// Stream records with `start <= key < stop`.
    ///
    /// Records arrive in batches as the server scans. Dropping the reader
    /// early cancels the rest of the read.
    pub fn read(&mut self, start: &K, stop: &K) -> Result<ClientReader<'_, K, V>> {
        let mut start_bytes = vec![0u8; K::SIZE];
        start.write_bytes(&mut start_bytes);
        let mut stop_bytes = vec![0u8; K::SIZE];
        stop.write_bytes(&mut stop_bytes);
        self.client.send(&Request::Read {
            start: start_bytes.into(),
            stop: stop_bytes.into(),
        })?;
        Ok(ClientReader {
            client: &mut *self.client,
            pending: VecDeque::new(),
            finished: false,
            cancelled: false,
            _marker: PhantomData,
        })
    }

    /// Close the database on the server. The connection stays open.
    pub fn disconnect(mut self) -> Result<()> {
        self.close()
    }

    fn close(&mut self) -> Result<()> {
        if self.disconnected {
            return Ok(());
        }
        self.disconnected = true;
        match self.client.call(&Request::DisconnectDatabase)? {
            Response::DatabaseDisconnected => Ok(()),
            other => Err(unexpected(&other)),
        }
    }
}

impl<K, V> Drop for ClientDatabase<'_, K, V> {
    fn drop(&mut self) {
        if !self.disconnected && !self.client.closed {
            self.disconnected = true;
            let result = self
                .client
                .send(&Request::DisconnectDatabase)
                .and_then(|()| self.client.receive());
            if let Err(e) = result {
                debug!(error = %e, "database disconnect on drop failed");
            }
        }
    }
}

/// Records of a remote read, pulled batch by batch.
pub struct ClientReader<'a, K, V> {
    client: &'a mut Client,
    pending: VecDeque<(K, V)>,
    finished: bool,
    cancelled: bool,
    _marker: PhantomData<fn() -> (K, V)>,
}

impl<K: TreeType, V: TreeType> ClientReader<'_, K, V> {
    /// Stop the read. Batches already in flight are discarded.
    pub fn cancel(&mut self) -> Result<()> {
        self.pending.clear();
        if self.finished {
            return Ok(());
        }
        self.cancelled = true;
        self.finished = true;
        drain_cancelled(self.client)
    }

    /// True once the read was cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    fn fill(&mut self) -> Result<()> {
        match self.client.receive()? {
            Response::ReadBatch { count, records } => {
                let record_size = K::SIZE + V::SIZE;
                if records.len() != count as usize * record_size {
                    return Err(Error::protocol(format!(
                        "batch of {} records carries {} bytes",
                        count,
                        records.len()
                    )));
                }
                for record in records.chunks_exact(record_size) {
                    let (key, value) = record.split_at(K::SIZE);
                    self.pending.push_back((K::from_bytes(key), V::from_bytes(value)));
                }
                Ok(())
            }
            Response::ReadComplete | Response::ReadCancelled => {
                self.finished = true;
                Ok(())
            }
            Response::Error(message) => {
                self.finished = true;
                Err(Error::Server(message))
            }
            other => {
                self.finished = true;
                Err(unexpected(&other))
            }
        }
    }
}

impl<K: TreeType, V: TreeType> Iterator for ClientReader<'_, K, V> {
    type Item = Result<(K, V)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(record) = self.pending.pop_front() {
                return Some(Ok(record));
            }
            if self.finished {
                return None;
            }
            if let Err(e) = self.fill() {
                self.finished = true;
                return Some(Err(e));
            }
        }
    }
}

impl<K, V> Drop for ClientReader<'_, K, V> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        // Without this the next response on the connection would be a
        // stale batch.
        if let Err(e) = drain_cancelled(self.client) {
            warn!(error = %e, "cancelling read on drop failed");
            self.client.closed = true;
        }
    }
}

fn drain_cancelled(client: &mut Client) -> Result<()> {
    client.send(&Request::CancelRead)?;
    loop {
        match client.receive()? {
            Response::ReadBatch { .. } => {}
            Response::ReadComplete | Response::ReadCancelled | Response::Error(_) => return Ok(()),
            other => return Err(unexpected(&other)),
        }
    }
}
