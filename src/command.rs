//! Commands as they are sent to a node.
//!
//! A [`Command`] is a verb plus an ordered list of [`Arg`]s. Arguments may
//! nest; on the wire they are flattened depth-first into a single RESP array
//! of bulk strings, so the array header counts scalars, not top-level
//! arguments.

use bytes::{BufMut, Bytes, BytesMut};

use crate::resp::put_bulk;

/// A single command argument: either one scalar or a nested list.
#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    Bulk(Bytes),
    Nested(Vec<Arg>),
}

impl Arg {
    /// Returns the first scalar reachable from this argument.
    pub fn first_scalar(&self) -> Option<&Bytes> {
        let mut current = self;
        loop {
            match current {
                Arg::Bulk(data) => return Some(data),
                Arg::Nested(items) => current = items.first()?,
            }
        }
    }

    /// Short human-readable form used in profiling records.
    pub fn describe(&self) -> String {
        match self {
            Arg::Bulk(data) => String::from_utf8_lossy(data).into_owned(),
            Arg::Nested(_) => "array".to_string(),
        }
    }
}

impl From<&str> for Arg {
    fn from(value: &str) -> Self {
        Arg::Bulk(Bytes::copy_from_slice(value.as_bytes()))
    }
}

impl From<String> for Arg {
    fn from(value: String) -> Self {
        Arg::Bulk(Bytes::from(value))
    }
}

impl From<&String> for Arg {
    fn from(value: &String) -> Self {
        Arg::from(value.as_str())
    }
}

impl From<&[u8]> for Arg {
    fn from(value: &[u8]) -> Self {
        Arg::Bulk(Bytes::copy_from_slice(value))
    }
}

impl From<Bytes> for Arg {
    fn from(value: Bytes) -> Self {
        Arg::Bulk(value)
    }
}

macro_rules! arg_from_number {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Arg {
                fn from(value: $ty) -> Self {
                    Arg::Bulk(Bytes::from(value.to_string()))
                }
            }
        )*
    };
}

arg_from_number!(i32, i64, u32, u64, usize, f64);

impl<T: Into<Arg>> From<Vec<T>> for Arg {
    fn from(values: Vec<T>) -> Self {
        Arg::Nested(values.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Arg>> FromIterator<T> for Arg {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Arg::Nested(iter.into_iter().map(Into::into).collect())
    }
}

/// Flattens `args` depth-first into their scalars.
///
/// Uses an explicit stack of iterators so deeply nested input cannot exhaust
/// the call stack.
pub fn flatten(args: &[Arg]) -> Vec<&Bytes> {
    let mut scalars = Vec::new();
    let mut stack = vec![args.iter()];

    while let Some(top) = stack.last_mut() {
        match top.next() {
            Some(Arg::Bulk(data)) => scalars.push(data),
            Some(Arg::Nested(items)) => stack.push(items.iter()),
            None => {
                stack.pop();
            }
        }
    }

    scalars
}

/// A verb and its arguments.
///
/// The verb is stored upper-cased; matching against the verb tables is
/// case-insensitive.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    verb: String,
    args: Vec<Arg>,
}

impl Command {
    pub fn new(verb: &str, args: Vec<Arg>) -> Self {
        Self {
            verb: verb.to_ascii_uppercase(),
            args,
        }
    }

    pub fn verb(&self) -> &str {
        &self.verb
    }

    pub fn args(&self) -> &[Arg] {
        &self.args
    }

    /// The raw bytes of the key the command addresses, if any.
    pub fn first_key(&self) -> Option<&Bytes> {
        self.args.first().and_then(Arg::first_scalar)
    }

    /// Number of scalars that will be sent, verb included.
    pub fn wire_len(&self) -> usize {
        1 + flatten(&self.args).len()
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        let scalars = flatten(&self.args);
        buf.put_slice(format!("*{}\r\n", scalars.len() + 1).as_bytes());
        put_bulk(buf, self.verb.as_bytes());
        for scalar in scalars {
            put_bulk(buf, scalar);
        }
    }

    pub fn is_write(&self) -> bool {
        is_write_command(&self.verb)
    }

    pub fn is_restricted(&self) -> bool {
        is_restricted_command(&self.verb)
    }

    /// `VERB arg arg ...` with nested arguments summarised by type.
    pub fn describe(&self) -> String {
        let mut text = self.verb.clone();
        for arg in &self.args {
            text.push(' ');
            text.push_str(&arg.describe());
        }
        text
    }
}

/// Verbs that never modify the keyspace and may run against a replica.
const READ_ONLY_COMMANDS: &[&str] = &[
    "GET", "MGET", "GETRANGE", "STRLEN", "EXISTS", "TYPE", "TTL", "PTTL", "KEYS", "SCAN",
    "RANDOMKEY", "DUMP", "HGET", "HMGET", "HGETALL", "HKEYS", "HVALS", "HLEN", "HEXISTS",
    "HSTRLEN", "HSCAN", "LRANGE", "LLEN", "LINDEX", "LPOS", "SMEMBERS", "SCARD", "SISMEMBER",
    "SMISMEMBER", "SRANDMEMBER", "SSCAN", "SUNION", "SINTER", "SDIFF", "ZRANGE",
    "ZRANGEBYSCORE", "ZRANGEBYLEX", "ZREVRANGE", "ZREVRANGEBYSCORE", "ZREVRANGEBYLEX",
    "ZCARD", "ZSCORE", "ZMSCORE", "ZCOUNT", "ZLEXCOUNT", "ZRANK", "ZREVRANK", "ZSCAN",
    "BITCOUNT", "BITPOS", "GETBIT", "PFCOUNT", "GEOPOS", "GEODIST", "GEOHASH", "XRANGE",
    "XREVRANGE", "XLEN", "XREAD", "OBJECT", "PING", "ECHO", "INFO", "ROLE", "TIME", "DBSIZE",
    "AUTH", "SELECT", "QUIT", "MULTI", "EXEC", "DISCARD", "WATCH", "UNWATCH",
];

/// Verbs the shard router refuses to route. They must be sent on a specific
/// connection.
const RESTRICTED_COMMANDS: &[&str] = &[
    "PING", "ECHO", "AUTH", "SELECT", "QUIT", "SAVE", "BGSAVE", "BGREWRITEAOF", "LASTSAVE",
    "SHUTDOWN", "SCAN", "SSCAN", "HSCAN", "ZSCAN", "CONFIG", "FLUSHALL", "FLUSHDB", "DBSIZE",
    "INFO", "MONITOR", "DEBUG", "SYNC", "PSYNC", "SLAVEOF", "REPLICAOF", "CLUSTER", "CLIENT",
    "RANDOMKEY", "MOVE", "SWAPDB", "MIGRATE", "MULTI", "EXEC", "DISCARD", "WATCH", "UNWATCH",
    "ROLE", "SCRIPT", "SLOWLOG", "SUBSCRIBE", "PSUBSCRIBE",
];

/// True for every verb not known to be read-only.
pub fn is_write_command(verb: &str) -> bool {
    !contains_verb(READ_ONLY_COMMANDS, verb)
}

pub fn is_restricted_command(verb: &str) -> bool {
    contains_verb(RESTRICTED_COMMANDS, verb)
}

fn contains_verb(table: &[&str], verb: &str) -> bool {
    table.iter().any(|entry| entry.eq_ignore_ascii_case(verb))
}
