//! A connection to one backend node.
//!
//! A [`Connection`] owns at most one socket at a time. Connecting walks the
//! configured node list in random order, authenticates, selects the database
//! and asks the node for its `ROLE`. Write commands are only sent to a node
//! that reported itself as master; when asked to prefer a master, a
//! connection that lands on a replica follows the master address the replica
//! reports.
//!
//! Every operation takes `&mut self` and waits for the reply before
//! returning, so one connection carries one command at a time. Nothing here
//! is synchronised; a connection must not be shared between tasks.

use std::future::Future;
use std::io;
use std::time::Duration;

use bytes::BytesMut;
use rand::seq::SliceRandom;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{lookup_host, TcpSocket, TcpStream};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::command::Command;
use crate::config::{ConnectOptions, NodeAddr};
use crate::resp::{FrameScanner, RespError, RespValue};

/// Replication role a node reported through `ROLE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Master,
    Replica,
    Unknown,
}

#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("protocol error: {0}")]
    Protocol(#[from] RespError),
    #[error("connection closed by peer")]
    ConnectionClosed,
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("not connected")]
    NotConnected,
    #[error("authentication failed: {0}")]
    AuthFailed(String),
    #[error("SELECT {db} failed: {reason}")]
    SelectFailed { db: u32, reason: String },
    #[error("write command {0} refused on a non-master connection")]
    ReadOnly(String),
    #[error("master {0} never became available")]
    MasterUnavailable(String),
    #[error("no reachable node: {0}")]
    NoReachableNode(String),
    #[error("{0}")]
    Reply(String),
}

impl ConnectionError {
    /// Errors after which a reconnect followed by one retry may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ConnectionError::Io(_)
                | ConnectionError::Protocol(_)
                | ConnectionError::ConnectionClosed
                | ConnectionError::Timeout(_)
                | ConnectionError::NotConnected
                | ConnectionError::ReadOnly(_)
        )
    }

    /// Errors that leave the stream in an unknown state.
    fn closes_socket(&self) -> bool {
        matches!(
            self,
            ConnectionError::Io(_)
                | ConnectionError::Protocol(_)
                | ConnectionError::ConnectionClosed
                | ConnectionError::Timeout(_)
        )
    }
}

/// Result of `EXEC`.
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionReply {
    pub replies: Vec<RespValue>,
    /// False when any sub-reply is null, an error, or an integer `<= 0`.
    ///
    /// This is a heuristic: commands such as `DEL` on a missing key
    /// legitimately return 0 and still count as a failure here.
    pub success: bool,
}

impl TransactionReply {
    fn from_exec(reply: RespValue) -> Self {
        match reply {
            RespValue::Array(replies) => {
                let success = replies.iter().all(sub_reply_succeeded);
                Self { replies, success }
            }
            RespValue::Null | RespValue::NullArray => Self {
                replies: Vec::new(),
                success: false,
            },
            other => Self {
                success: sub_reply_succeeded(&other),
                replies: vec![other],
            },
        }
    }
}

fn sub_reply_succeeded(reply: &RespValue) -> bool {
    match reply {
        RespValue::Null | RespValue::NullArray | RespValue::Error(_) => false,
        RespValue::Integer(n) => *n > 0,
        _ => true,
    }
}

pub struct Connection {
    nodes: Vec<NodeAddr>,
    options: ConnectOptions,
    stream: Option<TcpStream>,
    peer: Option<NodeAddr>,
    role: Role,
    read_buf: BytesMut,
    write_buf: BytesMut,
    in_transaction: bool,
    queued: usize,
    last_error: Option<String>,
}

impl Connection {
    /// Creates a disconnected connection for the given nodes.
    pub fn new(nodes: Vec<NodeAddr>, options: ConnectOptions) -> Self {
        let read_buf = BytesMut::with_capacity(options.read_buffer_size);
        Self {
            nodes,
            options,
            stream: None,
            peer: None,
            role: Role::Unknown,
            read_buf,
            write_buf: BytesMut::with_capacity(1024),
            in_transaction: false,
            queued: 0,
            last_error: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// The node the socket is currently open to.
    pub fn peer(&self) -> Option<&NodeAddr> {
        self.peer.as_ref()
    }

    pub fn nodes(&self) -> &[NodeAddr] {
        &self.nodes
    }

    pub fn options(&self) -> &ConnectOptions {
        &self.options
    }

    pub fn in_transaction(&self) -> bool {
        self.in_transaction
    }

    /// Commands queued since `MULTI`.
    pub fn queued(&self) -> usize {
        self.queued
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Connects to one of the configured nodes.
    ///
    /// Nodes are tried in random order. If every node fails, the whole list is
    /// tried again up to `retry` more times, `retry_delay` apart. The error of
    /// the last attempt is returned.
    pub async fn connect(&mut self, prefer_master: bool) -> Result<(), ConnectionError> {
        self.close();

        if self.nodes.is_empty() {
            let error = ConnectionError::NoReachableNode("no nodes configured".to_string());
            self.last_error = Some(error.to_string());
            return Err(error);
        }

        let mut last_error = None;
        for pass in 0..=self.options.retry {
            if pass > 0 {
                sleep(self.options.retry_delay).await;
            }

            let mut nodes = self.nodes.clone();
            nodes.shuffle(&mut rand::thread_rng());

            for node in &nodes {
                match self.connect_node(node, prefer_master).await {
                    Ok(()) => {
                        info!(host = %node.0, port = node.1, role = ?self.role, "connected");
                        self.last_error = None;
                        return Ok(());
                    }
                    Err(e) => {
                        warn!(host = %node.0, port = node.1, error = %e, "node connection failed");
                        last_error = Some(e);
                    }
                }
            }
        }

        let error = last_error
            .unwrap_or_else(|| ConnectionError::NoReachableNode("no node answered".to_string()));
        self.last_error = Some(error.to_string());
        Err(error)
    }

    /// Closes the socket and resets connection state.
    pub fn close(&mut self) {
        if let Some(peer) = self.peer.take() {
            debug!(host = %peer.0, port = peer.1, "closing connection");
        }
        self.stream = None;
        self.role = Role::Unknown;
        self.in_transaction = false;
        self.queued = 0;
        self.read_buf.clear();
        self.write_buf.clear();
    }

    /// Sends `command` and returns its reply.
    ///
    /// Write commands are refused with [`ConnectionError::ReadOnly`] before
    /// anything is written unless the node is a master.
    pub async fn execute(&mut self, command: &Command) -> Result<RespValue, ConnectionError> {
        if self.stream.is_none() {
            return Err(ConnectionError::NotConnected);
        }

        if command.is_write() && self.role != Role::Master {
            let error = ConnectionError::ReadOnly(command.verb().to_string());
            self.last_error = Some(error.to_string());
            return Err(error);
        }

        let result = self.request(command).await;

        match command.verb() {
            "MULTI" => {
                if result.is_ok() {
                    self.in_transaction = true;
                    self.queued = 0;
                }
            }
            "EXEC" | "DISCARD" => {
                self.in_transaction = false;
                self.queued = 0;
            }
            _ => {
                if self.in_transaction && result.is_ok() {
                    self.queued += 1;
                }
            }
        }

        result
    }

    /// [`execute`](Self::execute) with one reconnect-and-retry.
    ///
    /// When the command fails with a retryable error and reconnecting is
    /// allowed, the connection reconnects (preferring a master for write
    /// commands) and sends the command exactly once more. No retry happens
    /// inside a transaction.
    pub async fn call(&mut self, command: &Command) -> Result<RespValue, ConnectionError> {
        let in_transaction = self.in_transaction;

        match self.execute(command).await {
            Err(e) if e.is_retryable() && self.options.allow_reconnect && !in_transaction => {
                let prefer_master =
                    command.is_write() || matches!(e, ConnectionError::ReadOnly(_));
                warn!(
                    command = %command.verb(),
                    error = %e,
                    prefer_master,
                    "command failed, reconnecting"
                );
                self.connect(prefer_master).await?;
                self.execute(command).await
            }
            other => other,
        }
    }

    /// Starts a transaction. Later commands are still sent one by one and the
    /// node answers each with `QUEUED`.
    pub async fn multi(&mut self) -> Result<(), ConnectionError> {
        self.execute(&Command::new("MULTI", Vec::new())).await?;
        Ok(())
    }

    pub async fn exec(&mut self) -> Result<TransactionReply, ConnectionError> {
        let reply = self.execute(&Command::new("EXEC", Vec::new())).await?;
        Ok(TransactionReply::from_exec(reply))
    }

    pub async fn discard(&mut self) -> Result<(), ConnectionError> {
        self.execute(&Command::new("DISCARD", Vec::new())).await?;
        Ok(())
    }

    /// Checks that the node still answers.
    pub async fn ping(&mut self) -> Result<(), ConnectionError> {
        match self.request(&Command::new("PING", Vec::new())).await? {
            RespValue::SimpleString(s) if s == "PONG" => Ok(()),
            other => Err(ConnectionError::Reply(format!(
                "unexpected PING reply {:?}",
                other
            ))),
        }
    }

    async fn connect_node(
        &mut self,
        node: &NodeAddr,
        prefer_master: bool,
    ) -> Result<(), ConnectionError> {
        self.open(node).await?;

        let master = match self.detect_role().await {
            Ok(master) => master,
            Err(e) => {
                self.close();
                return Err(e);
            }
        };

        if !prefer_master || self.role == Role::Master {
            return Ok(());
        }

        match master {
            Some(master) => self.follow_master(&master).await,
            None => {
                self.close();
                Err(ConnectionError::MasterUnavailable(format!(
                    "{}:{} (node reports no master)",
                    node.0, node.1
                )))
            }
        }
    }

    /// Polls the reported master until it answers as master.
    async fn follow_master(&mut self, master: &NodeAddr) -> Result<(), ConnectionError> {
        info!(host = %master.0, port = master.1, "landed on a replica, following its master");

        let attempts = self.options.master_poll_attempts;
        for attempt in 1..=attempts {
            match self.open(master).await {
                Ok(()) => match self.detect_role().await {
                    Ok(_) if self.role == Role::Master => return Ok(()),
                    Ok(_) => debug!(attempt, role = ?self.role, "reported master is not master"),
                    Err(e) => debug!(attempt, error = %e, "ROLE against reported master failed"),
                },
                Err(e) => debug!(attempt, error = %e, "reported master unreachable"),
            }

            if attempt < attempts {
                sleep(self.options.master_poll_interval).await;
            }
        }

        self.close();
        Err(ConnectionError::MasterUnavailable(format!(
            "{}:{}",
            master.0, master.1
        )))
    }

    /// Opens a socket to `node` and runs AUTH and SELECT.
    async fn open(&mut self, node: &NodeAddr) -> Result<(), ConnectionError> {
        self.close();

        let keepalive = self.options.persistent;
        let stream = with_timeout(self.options.connect_timeout, dial(node, keepalive)).await?;
        self.stream = Some(stream);
        self.peer = Some(node.clone());

        if let Err(e) = self.handshake().await {
            self.close();
            return Err(e);
        }

        Ok(())
    }

    async fn handshake(&mut self) -> Result<(), ConnectionError> {
        if let Some(password) = self.options.auth_pass.clone() {
            match self.request(&Command::new("AUTH", vec![password.into()])).await {
                Ok(RespValue::Ok) => debug!("AUTH accepted"),
                Ok(other) => {
                    return Err(ConnectionError::AuthFailed(format!(
                        "unexpected reply {:?}",
                        other
                    )))
                }
                Err(ConnectionError::Reply(reason)) => {
                    return Err(ConnectionError::AuthFailed(reason))
                }
                Err(e) => return Err(e),
            }
        }

        let db = self.options.db;
        match self.request(&Command::new("SELECT", vec![db.into()])).await {
            Ok(RespValue::Ok) => Ok(()),
            Ok(other) => Err(ConnectionError::SelectFailed {
                db,
                reason: format!("unexpected reply {:?}", other),
            }),
            Err(ConnectionError::Reply(reason)) => Err(ConnectionError::SelectFailed { db, reason }),
            Err(e) => Err(e),
        }
    }

    /// Sends `ROLE` and records the answer. Returns the master address a
    /// replica reports.
    async fn detect_role(&mut self) -> Result<Option<NodeAddr>, ConnectionError> {
        let reply = match self.request(&Command::new("ROLE", Vec::new())).await {
            Ok(reply) => reply,
            Err(ConnectionError::Reply(reason)) => {
                debug!(reason = %reason, "ROLE rejected, role unknown");
                self.role = Role::Unknown;
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        let (role, master) = parse_role(reply);
        self.role = role;
        Ok(master)
    }

    /// One request/reply exchange bounded by the read/write timeout.
    ///
    /// A top-level error reply becomes [`ConnectionError::Reply`]. I/O and
    /// framing failures close the socket.
    async fn request(&mut self, command: &Command) -> Result<RespValue, ConnectionError> {
        let limit = self.options.rw_timeout;
        let result = with_timeout(limit, self.round_trip(command)).await;

        let error = match result {
            Ok(RespValue::Error(message)) => ConnectionError::Reply(message),
            Ok(reply) => return Ok(reply),
            Err(e) => e,
        };

        if error.closes_socket() {
            self.close();
        }
        self.last_error = Some(error.to_string());
        Err(error)
    }

    async fn round_trip(&mut self, command: &Command) -> Result<RespValue, ConnectionError> {
        let stream = self.stream.as_mut().ok_or(ConnectionError::NotConnected)?;

        self.write_buf.clear();
        command.encode(&mut self.write_buf);
        stream.write_all(&self.write_buf).await?;
        stream.flush().await?;

        read_reply(stream, &mut self.read_buf, self.options.read_buffer_size).await
    }
}

/// Reads from `stream` until `buf` holds one complete reply. Each read asks
/// for at most `chunk` bytes.
async fn read_reply(
    stream: &mut TcpStream,
    buf: &mut BytesMut,
    chunk: usize,
) -> Result<RespValue, ConnectionError> {
    let mut scanner = FrameScanner::new();

    loop {
        if let Some(frame_len) = scanner.scan(&buf[..])? {
            if let Some((value, consumed)) = RespValue::parse(&buf[..frame_len])? {
                let _ = buf.split_to(consumed);
                return Ok(value);
            }
        }

        buf.reserve(chunk);
        let n = (&mut *stream).take(chunk as u64).read_buf(buf).await?;
        if n == 0 {
            return Err(ConnectionError::ConnectionClosed);
        }
    }
}

async fn dial(node: &NodeAddr, keepalive: bool) -> Result<TcpStream, ConnectionError> {
    let mut last_error = None;

    for addr in lookup_host((node.0.as_str(), node.1)).await? {
        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        socket.set_keepalive(keepalive)?;

        match socket.connect(addr).await {
            Ok(stream) => {
                stream.set_nodelay(true)?;
                return Ok(stream);
            }
            Err(e) => last_error = Some(e),
        }
    }

    Err(ConnectionError::Io(last_error.unwrap_or_else(|| {
        io::Error::new(io::ErrorKind::NotFound, "host resolved to no addresses")
    })))
}

async fn with_timeout<T, F>(limit: Option<Duration>, future: F) -> Result<T, ConnectionError>
where
    F: Future<Output = Result<T, ConnectionError>>,
{
    match limit {
        Some(limit) => tokio::time::timeout(limit, future)
            .await
            .map_err(|_| ConnectionError::Timeout(limit))?,
        None => future.await,
    }
}

/// Interprets a `ROLE` reply: `["master", ...]` or
/// `["slave", host, port, state, offset]`.
fn parse_role(reply: RespValue) -> (Role, Option<NodeAddr>) {
    let Some(items) = reply.into_array() else {
        return (Role::Unknown, None);
    };

    match items.first().and_then(RespValue::as_str) {
        Some("master") => (Role::Master, None),
        Some("slave") | Some("replica") => {
            let host = items.get(1).and_then(RespValue::as_str).map(str::to_string);
            let port = items.get(2).and_then(|value| match value {
                RespValue::Integer(n) => u16::try_from(*n).ok(),
                other => other.as_str().and_then(|s| s.parse().ok()),
            });
            (Role::Replica, host.zip(port))
        }
        _ => (Role::Unknown, None),
    }
}
