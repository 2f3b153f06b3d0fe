//! Typed shortcuts over [`ShardRouter::dispatch`].

use crate::command::Arg;
use crate::resp::RespValue;

use super::{ShardError, ShardRouter};

macro_rules! shard_commands {
    ($($(#[$meta:meta])* $name:ident => $verb:literal ($($arg:ident),+);)*) => {
        impl ShardRouter {
            $(
                $(#[$meta])*
                pub async fn $name(
                    &mut self,
                    $($arg: impl Into<Arg>),+
                ) -> Result<RespValue, ShardError> {
                    self.dispatch($verb, vec![$($arg.into()),+]).await
                }
            )*
        }
    };
}

shard_commands! {
    get => "GET" (key);
    set => "SET" (key, value);
    setex => "SETEX" (key, seconds, value);
    /// Replies `1` when the key was set, `0` when it already existed.
    setnx => "SETNX" (key, value);
    getset => "GETSET" (key, value);
    incr => "INCR" (key);
    incrby => "INCRBY" (key, increment);
    decr => "DECR" (key);
    expire => "EXPIRE" (key, seconds);
    ttl => "TTL" (key);
    exists => "EXISTS" (key);
    hget => "HGET" (key, field);
    hset => "HSET" (key, field, value);
    hdel => "HDEL" (key, field);
    hgetall => "HGETALL" (key);
    hincrby => "HINCRBY" (key, field, increment);
    lpush => "LPUSH" (key, value);
    rpush => "RPUSH" (key, value);
    lpop => "LPOP" (key);
    rpop => "RPOP" (key);
    llen => "LLEN" (key);
    lrange => "LRANGE" (key, start, stop);
    sadd => "SADD" (key, member);
    srem => "SREM" (key, member);
    smembers => "SMEMBERS" (key);
    sismember => "SISMEMBER" (key, member);
    zadd => "ZADD" (key, score, member);
    zrem => "ZREM" (key, member);
    zscore => "ZSCORE" (key, member);
    zrange => "ZRANGE" (key, start, stop);
    zcard => "ZCARD" (key);
}
