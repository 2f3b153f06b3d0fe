//! A sharded Redis client speaking RESP2.
//!
//! Keys are spread over independent Redis nodes on the client side:
//!
//! - [`resp`] decodes replies and [`command`] encodes requests.
//! - [`connection`] owns one socket to one node, including the AUTH/SELECT
//!   handshake, master discovery through `ROLE`, reconnects and
//!   `MULTI`/`EXEC`.
//! - [`router`] maps keys to shards with `crc32 mod N` (honouring `{hash tags}`)
//!   and lazily opens one connection per shard.
//! - [`lock`] is a small distributed lock built on the router.
//!
//! All I/O runs on Tokio. A router and its connections are owned by a single
//! task and handle one command at a time.

pub mod cli;
pub mod command;
pub mod config;
pub mod connection;
pub mod hash;
pub mod lock;
pub mod resp;
pub mod router;

pub use command::{Arg, Command};
pub use config::{ConfigError, ConnectOptions, NodeAddr, RedisConfig};
pub use connection::{Connection, ConnectionError, Role, TransactionReply};
pub use lock::ShardLock;
pub use resp::{RespError, RespValue};
pub use router::{Profiler, ShardError, ShardRouter, TracingProfiler};
