use std::num::IntErrorKind::{NegOverflow, PosOverflow};

use crate::error::{Error, ProofKind, Result};
use crate::merkle::node_hash;
use crate::path::{default_hashes, map_key_path};
use crate::types::{MapInclusionProof, MapTreeHead, MAP_DEPTH};

impl MapInclusionProof {
    /// Verify that this proof's value is what the map holds for its key under
    /// `head`.
    ///
    /// Rebuilds the root from the leaf upwards, one level per key bit, filling
    /// empty audit path slots with the default subtree hash for that level. A
    /// key that was never set proves its absence the same way, starting from
    /// the empty leaf.
    ///
    /// Does not compare `self.tree_size` with the head; callers pinning a
    /// proof to a head must do that.
    pub fn verify(&self, head: &MapTreeHead) -> Result<()> {
        if self.audit_path.len() != MAP_DEPTH {
            return Err(Error::VerificationFailed(ProofKind::MapInclusion));
        }

        let key_path = map_key_path(&self.key);
        let defaults = default_hashes();
        let mut t = self.value.leaf_hash()?;

        for depth in (0..MAP_DEPTH).rev() {
            let sibling: &[u8] = match self.audit_path[depth].len() {
                0 => &defaults[depth + 1],
                32 => &self.audit_path[depth],
                _ => return Err(Error::VerificationFailed(ProofKind::MapInclusion)),
            };
            t = if key_path[depth] {
                node_hash(sibling, &t)
            } else {
                node_hash(&t, sibling)
            };
        }

        if t != head.root_hash {
            return Err(Error::VerificationFailed(ProofKind::MapInclusion));
        }
        Ok(())
    }
}

/// Parse the audit path carried alongside a map value.
///
/// Each header value is a comma separated list of `index/hex` tokens. Tokens
/// without a `/` are skipped, integer indices outside `0..256` are ignored and
/// a repeated index overwrites the earlier one.
pub fn parse_audit_path<S: AsRef<str>>(header_values: &[S]) -> Result<Vec<Vec<u8>>> {
    let mut path = vec![Vec::new(); MAP_DEPTH];
    for value in header_values {
        for token in value.as_ref().split(',') {
            let Some((index, digest)) = token.split_once('/') else {
                continue;
            };
            let index = index.trim();
            let index = match index.parse::<i128>() {
                Ok(i) => usize::try_from(i).ok().filter(|i| *i < MAP_DEPTH),
                Err(e) if matches!(e.kind(), PosOverflow | NegOverflow) => None,
                Err(_) => return Err(Error::Decode(format!("bad audit path index: {index:?}"))),
            };
            let bytes = hex::decode(digest.trim())?;
            if let Some(index) = index {
                path[index] = bytes;
            }
        }
    }
    Ok(path)
}

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;
    use crate::builder::MapBuilder;
    use crate::entry::EntryFormat;
    use crate::merkle::{leaf_hash, sha256};
    use crate::path::empty_map_root;
    use crate::types::{Hash, LogTreeHead, HEAD};
    use proptest::prelude::*;

    const EMPTY_ROOT: &str = "c6689f10812a0980976d9533d83875282166159567ec35155716c1413af53d6a";
    // {"alice": "1"}
    const ALICE_ROOT: &str = "6ca677e26109e969bf7dde0aa13cefb58ac7b913550f542af15cdf85d3ad4c20";
    // {"alice": "1"} with key bits read least significant first
    const ALICE_ROOT_LSB: &str = "8b77b86d378f342155e8fd1e092b20eb71c4063792422ca06e6ce49933ee4691";
    // {"alice": "1", "bob": "2"}
    const ALICE_BOB_ROOT: &str = "cb4dbdc2a06576398e9e9b4c5e39c3731fd96a055c97c6a4f2397fafc41ca122";

    fn hash_from_hex(s: &str) -> Hash {
        hex::decode(s).unwrap().try_into().unwrap()
    }

    fn head_with_root(root: &str) -> MapTreeHead {
        MapTreeHead {
            root_hash: hash_from_hex(root),
            mutation_log_tree_head: LogTreeHead::new(1, [0u8; 32]),
        }
    }

    fn sample_map() -> MapBuilder {
        let mut map = MapBuilder::new();
        map.set(b"alice", EntryFormat::Raw.decode(b"1"));
        map.set(b"bob", EntryFormat::Raw.decode(b"2"));
        map.set(b"carol", EntryFormat::Json.decode(br#"{"role": "admin"}"#));
        for i in 0..20 {
            let value = EntryFormat::Raw.decode(format!("v{i}").as_bytes());
            map.set(format!("key-{i}").as_bytes(), value);
        }
        map
    }

    fn head_of(map: &MapBuilder) -> MapTreeHead {
        map.tree_head(LogTreeHead::new(23, [0u8; 32])).unwrap()
    }

    #[test]
    fn test_verify_present_keys() {
        let map = sample_map();
        let head = head_of(&map);
        let keys: [&[u8]; 4] = [b"alice", b"bob", b"carol", b"key-7"];
        for key in keys {
            map.proof(key, 23).unwrap().verify(&head).unwrap();
        }
    }

    #[test]
    fn test_verify_absent_key() {
        let map = sample_map();
        let head = head_of(&map);
        let proof = map.proof(b"mallory", 23).unwrap();
        assert!(proof.value.is_empty());
        proof.verify(&head).unwrap();
    }

    #[test]
    fn test_absent_claim_for_present_key_fails() {
        let map = sample_map();
        let head = head_of(&map);
        let mut proof = map.proof(b"alice", 23).unwrap();
        proof.value = EntryFormat::Raw.decode(b"");
        assert!(proof.verify(&head).is_err());
    }

    #[test]
    fn test_alice_scenario() {
        let mut map = MapBuilder::new();
        map.set(b"alice", EntryFormat::Raw.decode(b"1"));
        let head = map.tree_head(LogTreeHead::new(1, [3u8; 32])).unwrap();

        let proof = map.proof(b"alice", HEAD).unwrap();
        assert_eq!(proof.value.data(), b"1");
        assert_eq!(proof.audit_path.len(), 256);
        proof.verify(&head).unwrap();

        for byte in 0..32 {
            let mut corrupted = head;
            corrupted.root_hash[byte] ^= 0x01;
            assert!(matches!(
                proof.verify(&corrupted),
                Err(Error::VerificationFailed(ProofKind::MapInclusion))
            ));
        }
    }

    #[test]
    fn test_pinned_empty_and_single_key_roots() {
        // Empty subtree hashes by height, leaf level first
        let mut empty = leaf_hash(b"");
        let mut by_height = vec![empty];
        for _ in 0..MAP_DEPTH {
            empty = node_hash(&empty, &empty);
            by_height.push(empty);
        }
        assert_eq!(hex::encode(empty), EMPTY_ROOT);
        assert_eq!(empty_map_root(), hash_from_hex(EMPTY_ROOT));

        // Fold "alice" up to the root, first key byte's top bit at the root
        let key_hash = sha256(b"alice");
        let mut t = leaf_hash(b"1");
        for depth in (0..MAP_DEPTH).rev() {
            let sibling = by_height[MAP_DEPTH - depth - 1];
            let right = key_hash[depth / 8] & (0x80 >> (depth % 8)) != 0;
            t = if right { node_hash(&sibling, &t) } else { node_hash(&t, &sibling) };
        }
        assert_eq!(hex::encode(t), ALICE_ROOT);

        let proof = MapInclusionProof {
            value: EntryFormat::Raw.decode(b"1"),
            tree_size: 1,
            audit_path: vec![Vec::new(); MAP_DEPTH],
            key: b"alice".to_vec(),
        };
        proof.verify(&head_with_root(ALICE_ROOT)).unwrap();
        assert!(proof.verify(&head_with_root(ALICE_ROOT_LSB)).is_err());
    }

    #[test]
    fn test_pinned_two_key_root() {
        let mut map = MapBuilder::new();
        map.set(b"alice", EntryFormat::Raw.decode(b"1"));
        map.set(b"bob", EntryFormat::Raw.decode(b"2"));
        assert_eq!(hex::encode(map.root().unwrap()), ALICE_BOB_ROOT);

        let head = head_with_root(ALICE_BOB_ROOT);
        map.proof(b"alice", 2).unwrap().verify(&head).unwrap();
        map.proof(b"bob", 2).unwrap().verify(&head).unwrap();
        map.proof(b"carol", 2).unwrap().verify(&head).unwrap();
    }

    #[test]
    fn test_wrong_path_length_fails() {
        let map = sample_map();
        let head = head_of(&map);
        let mut proof = map.proof(b"alice", 23).unwrap();
        proof.audit_path.pop();
        assert!(proof.verify(&head).is_err());
    }

    #[test]
    fn test_odd_sized_entry_fails() {
        let map = sample_map();
        let head = head_of(&map);
        let mut proof = map.proof(b"alice", 23).unwrap();
        proof.audit_path[200] = vec![0u8; 31];
        assert!(matches!(
            proof.verify(&head),
            Err(Error::VerificationFailed(ProofKind::MapInclusion))
        ));
    }

    #[test]
    fn test_parse_audit_path() {
        let a = hex::encode([0xaau8; 32]);
        let b = hex::encode([0xbbu8; 32]);
        let headers = vec![format!("3/{a}, 255/{b}"), format!(" 3 / {b} ,junk,300/{a}")];
        let path = parse_audit_path(headers.as_slice()).unwrap();
        assert_eq!(path.len(), 256);
        assert_eq!(path[3], vec![0xbbu8; 32]);
        assert_eq!(path[255], vec![0xbbu8; 32]);
        assert_eq!(path.iter().filter(|p| !p.is_empty()).count(), 2);
    }

    #[test]
    fn test_parse_audit_path_no_header() {
        let path = parse_audit_path::<String>(&[]).unwrap();
        assert!(path.iter().all(|p| p.is_empty()));
    }

    #[test]
    fn test_parse_audit_path_rejects_bad_tokens() {
        assert!(matches!(parse_audit_path(&["x/00"]), Err(Error::Decode(_))));
        assert!(matches!(parse_audit_path(&["1.5/00"]), Err(Error::Decode(_))));
        assert!(matches!(parse_audit_path(&["4/zz"]), Err(Error::Decode(_))));
    }

    #[test]
    fn test_parse_audit_path_skips_out_of_range_indices() {
        let digest = hex::encode([0xccu8; 32]);
        let headers = vec![
            format!("-1/{digest}"),
            format!("256/{digest}"),
            format!("99999999999999999999999/{digest}"),
            format!("-999999999999999999999999999999999999999999/{digest}"),
            format!("7/{digest}"),
        ];
        let path = parse_audit_path(headers.as_slice()).unwrap();
        assert_eq!(path[7], vec![0xccu8; 32]);
        assert_eq!(path.iter().filter(|p| !p.is_empty()).count(), 1);
    }

    #[test]
    fn test_header_round_trip_verifies() {
        let map = sample_map();
        let head = head_of(&map);
        let proof = map.proof(b"bob", 23).unwrap();
        let header = proof
            .audit_path
            .iter()
            .enumerate()
            .filter(|(_, p)| !p.is_empty())
            .map(|(i, p)| format!("{i}/{}", hex::encode(p)))
            .collect::<Vec<_>>()
            .join(",");
        let parsed =
            MapInclusionProof { audit_path: parse_audit_path(&[header]).unwrap(), ..proof };
        parsed.verify(&head).unwrap();
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn prop_any_bit_flip_in_path_fails(bit in 0usize..256) {
            let map = sample_map();
            let head = head_of(&map);
            let proof = map.proof(b"alice", 23).unwrap();
            let filled: Vec<usize> =
                (0..256).filter(|i| !proof.audit_path[*i].is_empty()).collect();
            prop_assume!(!filled.is_empty());

            let level = filled[bit % filled.len()];
            let mut tampered = proof.clone();
            tampered.audit_path[level][bit / 8 % 32] ^= 1 << (bit % 8);
            prop_assert!(tampered.verify(&head).is_err());
        }

        #[test]
        fn prop_any_bit_flip_in_value_or_root_fails(byte in 0usize..32, bit in 0u8..8) {
            let map = sample_map();
            let head = head_of(&map);
            let proof = map.proof(b"key-3", 23).unwrap();

            let mut value = proof.value.data().to_vec();
            let i = byte % value.len();
            value[i] ^= 1 << bit;
            let tampered =
                MapInclusionProof { value: EntryFormat::Raw.decode(&value), ..proof.clone() };
            prop_assert!(tampered.verify(&head).is_err());

            let mut bad_head = head;
            bad_head.root_hash[byte] ^= 1 << bit;
            prop_assert!(proof.verify(&bad_head).is_err());
        }

        #[test]
        fn prop_default_slot_filled_with_junk_fails(level in 0usize..256) {
            let mut map = MapBuilder::new();
            map.set(b"solo", EntryFormat::Raw.decode(b"x"));
            let head = map.tree_head(LogTreeHead::new(1, [0u8; 32])).unwrap();
            let mut proof = map.proof(b"solo", 1).unwrap();
            proof.audit_path[level] = vec![0x42; 32];
            prop_assert!(proof.verify(&head).is_err());
        }
    }
}
