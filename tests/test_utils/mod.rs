#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::BytesMut;
use redis_shard::{ConnectOptions, NodeAddr, RedisConfig, RespValue};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

/// What a mock node does with one command.
pub enum MockReply {
    Bytes(Vec<u8>),
    /// Drop the client socket without answering.
    Close,
    /// Never answer, keep the socket open.
    Silent,
}

pub fn raw(reply: &str) -> MockReply {
    MockReply::Bytes(reply.as_bytes().to_vec())
}

pub fn bulk(data: &str) -> MockReply {
    raw(&format!("${}\r\n{}\r\n", data.len(), data))
}

type Responder = Arc<dyn Fn(&[String]) -> MockReply + Send + Sync>;

/// A RESP node on 127.0.0.1 that records every command it receives and
/// answers through a scripted responder.
pub struct MockNode {
    pub addr: SocketAddr,
    received: Arc<Mutex<Vec<Vec<String>>>>,
    accepted: Arc<AtomicUsize>,
    handle: JoinHandle<()>,
}

impl MockNode {
    pub async fn start<F>(responder: F) -> Self
    where
        F: Fn(&[String]) -> MockReply + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let received = Arc::new(Mutex::new(Vec::new()));
        let accepted = Arc::new(AtomicUsize::new(0));
        let responder: Responder = Arc::new(responder);

        let handle = {
            let received = Arc::clone(&received);
            let accepted = Arc::clone(&accepted);
            tokio::spawn(async move {
                while let Ok((stream, _)) = listener.accept().await {
                    accepted.fetch_add(1, Ordering::SeqCst);
                    tokio::spawn(serve(stream, Arc::clone(&responder), Arc::clone(&received)));
                }
            })
        };

        Self {
            addr,
            received,
            accepted,
            handle,
        }
    }

    /// A master answering with [`master_reply`].
    pub async fn master() -> Self {
        Self::start(master_reply).await
    }

    /// A replica reporting `master` as its master.
    pub async fn replica_of(master: SocketAddr) -> Self {
        Self::start(move |command| replica_reply(master, command)).await
    }

    /// A master backed by an in-memory keyspace.
    pub async fn key_value(store: Arc<Mutex<HashMap<String, String>>>) -> Self {
        Self::start(move |command| key_value_reply(&store, command)).await
    }

    pub fn node(&self) -> NodeAddr {
        ("127.0.0.1".to_string(), self.addr.port())
    }

    pub fn commands(&self) -> Vec<Vec<String>> {
        self.received.lock().unwrap().clone()
    }

    /// Received commands other than the connection handshake.
    pub fn data_commands(&self) -> Vec<Vec<String>> {
        self.commands()
            .into_iter()
            .filter(|command| {
                !matches!(
                    command.first().map(String::as_str),
                    Some("AUTH" | "SELECT" | "ROLE" | "PING")
                )
            })
            .collect()
    }

    pub fn count(&self, verb: &str) -> usize {
        self.commands()
            .iter()
            .filter(|command| command.first().map(String::as_str) == Some(verb))
            .count()
    }

    /// Number of client connections accepted so far.
    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }
}

impl Drop for MockNode {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn serve(
    mut stream: TcpStream,
    responder: Responder,
    received: Arc<Mutex<Vec<Vec<String>>>>,
) {
    let mut buf = BytesMut::with_capacity(1024);

    loop {
        match stream.read_buf(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(_) => {}
        }

        while let Ok(Some((value, consumed))) = RespValue::parse(&buf[..]) {
            let _ = buf.split_to(consumed);

            let command: Vec<String> = value
                .into_array()
                .unwrap_or_default()
                .iter()
                .map(|part| part.as_str().unwrap_or_default().to_string())
                .collect();
            received.lock().unwrap().push(command.clone());

            match responder(&command) {
                MockReply::Bytes(reply) => {
                    if stream.write_all(&reply).await.is_err() {
                        return;
                    }
                }
                MockReply::Close => return,
                MockReply::Silent => {}
            }
        }
    }
}

pub fn master_reply(command: &[String]) -> MockReply {
    match command.first().map(String::as_str).unwrap_or_default() {
        "ROLE" => raw("*3\r\n$6\r\nmaster\r\n:0\r\n*0\r\n"),
        "PING" => raw("+PONG\r\n"),
        // echo the key back so tests can see where a read landed
        "GET" => bulk(command.get(1).map(String::as_str).unwrap_or_default()),
        "DEL" | "UNLINK" => raw(&format!(":{}\r\n", command.len() - 1)),
        "SETNX" | "EXPIRE" | "INCR" | "EXISTS" | "SADD" => raw(":1\r\n"),
        "TTL" => raw(":-1\r\n"),
        "KEYS" => raw("*2\r\n$8\r\n{user}:1\r\n$8\r\n{user}:2\r\n"),
        "EXEC" => raw("*0\r\n"),
        _ => raw("+OK\r\n"),
    }
}

pub fn replica_reply(master: SocketAddr, command: &[String]) -> MockReply {
    match command.first().map(String::as_str) {
        Some("ROLE") => raw(&format!(
            "*5\r\n$5\r\nslave\r\n$9\r\n127.0.0.1\r\n:{}\r\n$9\r\nconnected\r\n:0\r\n",
            master.port()
        )),
        _ => master_reply(command),
    }
}

fn key_value_reply(store: &Mutex<HashMap<String, String>>, command: &[String]) -> MockReply {
    let mut store = store.lock().unwrap();
    let arg = |i: usize| command.get(i).cloned().unwrap_or_default();

    match command.first().map(String::as_str).unwrap_or_default() {
        "GET" => match store.get(&arg(1)) {
            Some(value) => bulk(value),
            None => raw("$-1\r\n"),
        },
        "SET" => {
            store.insert(arg(1), arg(2));
            raw("+OK\r\n")
        }
        "SETNX" => {
            if store.contains_key(&arg(1)) {
                raw(":0\r\n")
            } else {
                store.insert(arg(1), arg(2));
                raw(":1\r\n")
            }
        }
        "EXPIRE" => raw(if store.contains_key(&arg(1)) { ":1\r\n" } else { ":0\r\n" }),
        "DEL" => {
            let removed = command[1..]
                .iter()
                .filter(|key| store.remove(*key).is_some())
                .count();
            raw(&format!(":{}\r\n", removed))
        }
        _ => master_reply(command),
    }
}

/// An address nothing listens on.
pub async fn dead_node() -> NodeAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    ("127.0.0.1".to_string(), port)
}

/// Connection options with short timeouts and no extra retry passes.
pub fn fast_options() -> ConnectOptions {
    ConnectOptions {
        connect_timeout: Some(Duration::from_secs(1)),
        rw_timeout: Some(Duration::from_secs(1)),
        retry: 0,
        retry_delay: Duration::from_millis(10),
        master_poll_attempts: 3,
        master_poll_interval: Duration::from_millis(10),
        ..ConnectOptions::default()
    }
}

/// One shard per node with the same short timeouts as [`fast_options`].
pub fn fast_config(nodes: Vec<NodeAddr>) -> RedisConfig {
    RedisConfig {
        timeout: 1,
        rw_timeout: 1,
        retry: 0,
        retry_delay_ms: 10,
        master_poll_attempts: 3,
        master_poll_interval_ms: 10,
        ..RedisConfig::with_shards(nodes)
    }
}
