use std::sync::OnceLock;

use crate::merkle::{leaf_hash, node_hash, sha256};
use crate::types::{Hash, MAP_DEPTH};

/// Bit `depth` of a hashed key, most significant bit of the first byte first.
/// `true` means the key descends into the right subtree at that depth.
pub fn key_bit(key_hash: &Hash, depth: usize) -> bool {
    (key_hash[depth / 8] >> (7 - (depth % 8))) & 1 == 1
}

/// Position of `key` in the map: one direction per tree level, root first.
pub fn map_key_path(key: &[u8]) -> [bool; MAP_DEPTH] {
    let h = sha256(key);
    let mut path = [false; MAP_DEPTH];
    for (depth, bit) in path.iter_mut().enumerate() {
        *bit = key_bit(&h, depth);
    }
    path
}

/// Hashes of empty subtrees, indexed by depth.
///
/// Entry `MAP_DEPTH` is the leaf hash of an empty value, the sentinel used for
/// keys that were never set or have been deleted. Entry 0 is the root of an
/// empty map.
pub fn default_hashes() -> &'static [Hash; MAP_DEPTH + 1] {
    static DEFAULTS: OnceLock<[Hash; MAP_DEPTH + 1]> = OnceLock::new();
    DEFAULTS.get_or_init(|| {
        let mut defaults = [[0u8; 32]; MAP_DEPTH + 1];
        defaults[MAP_DEPTH] = leaf_hash(b"");
        for depth in (0..MAP_DEPTH).rev() {
            defaults[depth] = node_hash(&defaults[depth + 1], &defaults[depth + 1]);
        }
        defaults
    })
}

/// Root hash of a map with no keys.
pub fn empty_map_root() -> Hash {
    default_hashes()[0]
}
