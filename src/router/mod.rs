//! Client-side sharding across independent nodes.
//!
//! The [`ShardRouter`] owns one lazily created [`Connection`] per shard. A
//! command is routed by its first argument: the key's hash tag (or the whole
//! key) plus the configured post hash and any pending temp hash is run
//! through `crc32 mod N`. A shard that cannot be reached is reported as an
//! error; commands are never redirected to another shard.
//!
//! ```no_run
//! use redis_shard::{RedisConfig, ShardRouter};
//!
//! # async fn example() -> Result<(), redis_shard::ShardError> {
//! let config = RedisConfig::with_shards(vec![
//!     ("10.0.0.1".to_string(), 6379),
//!     ("10.0.0.2".to_string(), 6379),
//! ]);
//! let mut router = ShardRouter::new(config);
//! router.set("user:42", "alice").await?;
//! let name = router.get("user:42").await?;
//! # Ok(())
//! # }
//! ```

mod commands;
mod profiler;

pub use profiler::{Profiler, TracingProfiler, PROFILE_CATEGORY};

use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap};
use std::time::Instant;

use thiserror::Error;
use tracing::debug;

use crate::command::{flatten, Arg, Command};
use crate::config::{ConnectOptions, NodeAddr, RedisConfig};
use crate::connection::{Connection, ConnectionError};
use crate::hash::{has_hash_tag, hash_tag, shard_index};
use crate::resp::RespValue;

#[derive(Error, Debug)]
pub enum ShardError {
    #[error("redis client is disabled")]
    Disabled,
    #[error("command {0} cannot be routed to a shard")]
    RestrictedCommand(String),
    #[error("no node configured for shard {0}")]
    ShardUnavailable(usize),
    #[error("KEYS pattern {0:?} has no hash tag")]
    UntaggedKeyScan(String),
    #[error("unexpected reply {0}")]
    UnexpectedReply(String),
    #[error(transparent)]
    Connection(#[from] ConnectionError),
}

pub struct ShardRouter {
    config: RedisConfig,
    options: ConnectOptions,
    connections: HashMap<usize, Connection>,
    parked: HashMap<usize, Connection>,
    temp_hash: String,
    profiler: Box<dyn Profiler>,
}

impl ShardRouter {
    pub fn new(config: RedisConfig) -> Self {
        let options = config.connect_options();
        Self {
            config,
            options,
            connections: HashMap::new(),
            parked: HashMap::new(),
            temp_hash: String::new(),
            profiler: Box::new(TracingProfiler),
        }
    }

    /// Replaces the profiler that receives one record per routed command.
    pub fn with_profiler(mut self, profiler: impl Profiler + 'static) -> Self {
        self.profiler = Box::new(profiler);
        self
    }

    pub fn config(&self) -> &RedisConfig {
        &self.config
    }

    pub fn shard_count(&self) -> usize {
        self.config.shard_count()
    }

    /// Sets the suffix appended to every hash key.
    pub fn set_post_hash(&mut self, post_hash: impl Into<String>) {
        self.config.post_hash = post_hash.into();
    }

    /// Sets a suffix appended to the hash key of the next routed command
    /// only.
    pub fn set_temp_hash(&mut self, temp_hash: impl Into<String>) {
        self.temp_hash = temp_hash.into();
    }

    pub fn temp_hash(&self) -> &str {
        &self.temp_hash
    }

    /// Whether a connection for `index` has been created.
    pub fn has_connection(&self, index: usize) -> bool {
        self.connections.contains_key(&index)
    }

    /// The shard `key` maps to with the current post hash, ignoring any
    /// pending temp hash.
    pub fn shard_for_key(&self, key: &[u8]) -> usize {
        let input = hash_input(key, self.config.post_hash.as_bytes());
        shard_index(&input, self.shard_count())
    }

    /// Sends an arbitrary command to the shard owning its first argument.
    ///
    /// `DEL` and `UNLINK` are split per shard (see [`del`](Self::del)) and
    /// `KEYS` is checked as in [`keys`](Self::keys). Restricted commands are
    /// refused without opening a socket.
    pub async fn dispatch(
        &mut self,
        verb: &str,
        args: Vec<Arg>,
    ) -> Result<RespValue, ShardError> {
        if !self.config.enable {
            return Err(ShardError::Disabled);
        }

        let command = Command::new(verb, args);
        if command.is_restricted() {
            debug!(command = %command.verb(), "refusing to route restricted command");
            return Err(ShardError::RestrictedCommand(command.verb().to_string()));
        }

        match command.verb() {
            "DEL" | "UNLINK" => {
                let removed = self.fan_out(&command).await?;
                return Ok(RespValue::Integer(removed));
            }
            "KEYS" => {
                let pattern = command.first_key().map(|p| p.to_vec()).unwrap_or_default();
                if !has_hash_tag(&pattern) {
                    return Err(ShardError::UntaggedKeyScan(
                        String::from_utf8_lossy(&pattern).into_owned(),
                    ));
                }
            }
            _ => {}
        }

        let suffix = self.take_suffix();
        let key = command.first_key().map(|k| k.to_vec()).unwrap_or_default();
        let index = shard_index(&hash_input(&key, &suffix), self.shard_count());

        self.route(index, &command).await
    }

    /// Deletes `keys`, sending one `DEL` per shard holding any of them.
    /// Returns the total number of keys removed.
    pub async fn del(&mut self, keys: Vec<Arg>) -> Result<i64, ShardError> {
        match self.dispatch("DEL", keys).await? {
            RespValue::Integer(removed) => Ok(removed),
            other => Err(ShardError::UnexpectedReply(format!("{:?}", other))),
        }
    }

    /// Lists keys matching `pattern`. The pattern must carry a hash tag so the
    /// scan stays on one shard.
    pub async fn keys(&mut self, pattern: impl Into<Arg>) -> Result<RespValue, ShardError> {
        self.dispatch("KEYS", vec![pattern.into()]).await
    }

    /// The connection for shard `index`, created and connected on first use.
    ///
    /// This is how commands the router refuses (transactions, `PING`,
    /// `SCAN`, ...) are sent to a particular shard.
    pub async fn connection(&mut self, index: usize) -> Result<&mut Connection, ShardError> {
        if !self.config.enable {
            return Err(ShardError::Disabled);
        }

        let nodes = match self.config.instance.get(index) {
            Some(nodes) if !nodes.is_empty() => nodes,
            _ => return Err(ShardError::ShardUnavailable(index)),
        };

        match self.connections.entry(index) {
            Entry::Occupied(entry) => {
                let connection = entry.into_mut();
                if !connection.is_connected() && self.options.allow_reconnect {
                    connection.connect(false).await?;
                }
                Ok(connection)
            }
            Entry::Vacant(entry) => {
                let connection = match self.parked.remove(&index) {
                    Some(mut parked) => match parked.ping().await {
                        Ok(()) => {
                            debug!(shard = index, "reusing persistent connection");
                            parked
                        }
                        Err(e) => {
                            debug!(shard = index, error = %e, "parked connection is stale");
                            open_connection(nodes, &self.options).await?
                        }
                    },
                    None => open_connection(nodes, &self.options).await?,
                };
                Ok(entry.insert(connection))
            }
        }
    }

    /// The connection for the shard `key` maps to.
    pub async fn connection_for_key(
        &mut self,
        key: impl AsRef<[u8]>,
    ) -> Result<&mut Connection, ShardError> {
        let index = self.shard_for_key(key.as_ref());
        self.connection(index).await
    }

    /// Drops every connection and the pending temp hash.
    ///
    /// With `persistent` set, connected sockets outside a transaction are
    /// kept aside and reused the next time their shard is needed.
    pub fn restate(&mut self) {
        self.temp_hash.clear();

        for (index, mut connection) in self.connections.drain() {
            if self.options.persistent && connection.is_connected() && !connection.in_transaction()
            {
                debug!(shard = index, "parking persistent connection");
                self.parked.insert(index, connection);
            } else {
                connection.close();
            }
        }
    }

    /// Post hash plus the one-shot temp hash, which is cleared.
    fn take_suffix(&mut self) -> Vec<u8> {
        let mut suffix = self.config.post_hash.as_bytes().to_vec();
        suffix.extend_from_slice(std::mem::take(&mut self.temp_hash).as_bytes());
        suffix
    }

    async fn fan_out(&mut self, command: &Command) -> Result<i64, ShardError> {
        let suffix = self.take_suffix();
        let shard_count = self.shard_count();

        let mut groups: BTreeMap<usize, Vec<Arg>> = BTreeMap::new();
        for key in flatten(command.args()) {
            let index = shard_index(&hash_input(key, &suffix), shard_count);
            groups
                .entry(index)
                .or_default()
                .push(Arg::Bulk(key.clone()));
        }

        let mut removed = 0;
        for (index, keys) in groups {
            let reply = self.route(index, &Command::new(command.verb(), keys)).await?;
            removed += reply
                .as_integer()
                .ok_or_else(|| ShardError::UnexpectedReply(format!("{:?}", reply)))?;
        }

        Ok(removed)
    }

    async fn route(&mut self, index: usize, command: &Command) -> Result<RespValue, ShardError> {
        let started = Instant::now();

        let result = match self.connection(index).await {
            Ok(connection) => connection.call(command).await.map_err(ShardError::from),
            Err(e) => Err(e),
        };

        self.profiler
            .record(PROFILE_CATEGORY, started.elapsed(), &command.describe());

        result
    }
}

fn hash_input(key: &[u8], suffix: &[u8]) -> Vec<u8> {
    let mut input = hash_tag(key).to_vec();
    input.extend_from_slice(suffix);
    input
}

async fn open_connection(
    nodes: &[NodeAddr],
    options: &ConnectOptions,
) -> Result<Connection, ShardError> {
    let mut connection = Connection::new(nodes.to_vec(), options.clone());
    connection.connect(false).await?;
    Ok(connection)
}
