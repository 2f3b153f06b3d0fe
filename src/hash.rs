//! Key to shard mapping.
//!
//! A key containing a non-empty `{tag}` hashes on the tag alone, so keys
//! sharing a tag always land on the same shard.

/// Returns the part of `key` that participates in hashing.
pub fn hash_tag(key: &[u8]) -> &[u8] {
    let Some(open) = key.iter().position(|&b| b == b'{') else {
        return key;
    };

    let after = &key[open + 1..];
    match after.iter().position(|&b| b == b'}') {
        Some(close) if close > 0 => &after[..close],
        _ => key,
    }
}

pub fn has_hash_tag(key: &[u8]) -> bool {
    hash_tag(key).len() != key.len()
}

/// `crc32(hash_key) mod shard_count`.
///
/// An empty hash key or a shard count of zero maps to shard 0.
pub fn shard_index(hash_key: &[u8], shard_count: usize) -> usize {
    if hash_key.is_empty() || shard_count == 0 {
        return 0;
    }

    let checksum = crc32fast::hash(hash_key);
    (checksum % shard_count as u32) as usize
}
