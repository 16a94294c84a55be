use crate::membership::types::ShardId;

use rapidhash::v3::rapidhash_v3;

/// Maps a key to its shard, in `[1, num_shards]`.
///
/// Client and every server must agree on this function for the same
/// `(key, num_shards)`: changing the hash or the modulus moves every key of an
/// existing deployment. Relies on rapidhash V3 with the default seed and
/// secrets, whose output is portable across platforms and releases.
pub fn shard_for_key(key: &str, num_shards: u32) -> ShardId {
    let num_shards = u64::from(num_shards.max(1));
    (rapidhash_v3(key.as_bytes()) % num_shards) as ShardId + 1
}
