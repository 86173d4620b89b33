//! Synthetic blobs and their versioned hashes.
//!
//! A [`BlobId`] fully determines the blob content, its 48-byte commitment
//! and proof, and therefore its versioned hash. Nothing here talks to a KZG
//! library: the commitments are deterministic placeholders, which is enough
//! for every shape and ordering check the harness performs.

use std::fmt;

use alloy_primitives::{keccak256, Bytes, FixedBytes, B256};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use strum::{Display, EnumIter};

use crate::config::{BLOB_COMMITMENT_VERSION_KZG, BYTES_PER_BLOB};

/// 48-byte KZG commitment or proof
pub type Bytes48 = FixedBytes<48>;

/// Identifier of a synthetic blob, stable for the lifetime of a scenario
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct BlobId(pub u64);

impl fmt::Display for BlobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "blob#{}", self.0)
    }
}

impl From<u64> for BlobId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl BlobId {
    pub fn next(&self) -> Self {
        Self(self.0.saturating_add(1))
    }

    /// Blob payload: the id in the low bytes of every field element, with
    /// the top byte left zero so each element stays below the field modulus.
    pub fn blob(&self) -> Bytes {
        let mut data = vec![0u8; BYTES_PER_BLOB];
        let id = self.0.to_be_bytes();
        for element in data.chunks_exact_mut(32) {
            element[24..].copy_from_slice(&id);
        }
        data.into()
    }

    pub fn commitment(&self) -> Bytes48 {
        let seed = keccak256(self.0.to_be_bytes());
        let tail = keccak256(seed);
        let mut out = [0u8; 48];
        out[..32].copy_from_slice(seed.as_slice());
        out[32..].copy_from_slice(&tail[..16]);
        FixedBytes(out)
    }

    pub fn proof(&self) -> Bytes48 {
        let commitment = self.commitment();
        let seed = keccak256(commitment);
        let mut out = [0u8; 48];
        out[..32].copy_from_slice(seed.as_slice());
        out[32..].copy_from_slice(&commitment[..16]);
        FixedBytes(out)
    }

    pub fn versioned_hash(&self) -> B256 {
        kzg_to_versioned_hash(self.commitment().as_slice())
    }

    pub fn versioned_hash_with_version(&self, version: u8) -> B256 {
        let mut hash = self.versioned_hash();
        hash[0] = version;
        hash
    }
}

/// `sha256(commitment)` with the first byte replaced by the KZG version
pub fn kzg_to_versioned_hash(commitment: &[u8]) -> B256 {
    let mut hash: [u8; 32] = Sha256::digest(commitment).into();
    hash[0] = BLOB_COMMITMENT_VERSION_KZG;
    B256::from(hash)
}

/// Ids in `[start, end)`
pub fn blob_list(start: u64, end: u64) -> Vec<BlobId> {
    (start..end).map(BlobId).collect()
}

/// Ids from `start` to `end` inclusive, walking down when `start > end`
pub fn blob_list_by_index(start: u64, end: u64) -> Vec<BlobId> {
    if start <= end {
        (start..=end).map(BlobId).collect()
    } else {
        (end..=start).rev().map(BlobId).collect()
    }
}

/// An explicit versioned-hash list to send alongside a payload.
///
/// `blobs: None` is sent as JSON `null`; `hash_versions[i]`, when present,
/// replaces the version byte of entry `i`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct VersionedHashes {
    pub blobs: Option<Vec<BlobId>>,
    #[serde(default)]
    pub hash_versions: Vec<u8>,
}

impl VersionedHashes {
    pub fn from_blobs(blobs: Vec<BlobId>) -> Self {
        Self {
            blobs: Some(blobs),
            hash_versions: Vec::new(),
        }
    }

    pub fn nil() -> Self {
        Self::default()
    }

    pub fn with_versions(mut self, versions: Vec<u8>) -> Self {
        self.hash_versions = versions;
        self
    }

    pub fn hashes(&self) -> Option<Vec<B256>> {
        self.blobs.as_ref().map(|blobs| {
            blobs
                .iter()
                .enumerate()
                .map(|(i, id)| {
                    let version = self
                        .hash_versions
                        .get(i)
                        .copied()
                        .unwrap_or(BLOB_COMMITMENT_VERSION_KZG);
                    id.versioned_hash_with_version(version)
                })
                .collect()
        })
    }
}

/// Deliberate damage done to a correct versioned-hash list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter, Serialize, Deserialize)]
pub enum HashCorruption {
    /// Last entry dropped
    Missing,
    /// Next unused id appended
    Extra,
    /// Last entry rotated to the front
    OutOfOrder,
    /// Last entry repeated
    Duplicated,
    /// Last entry replaced by the next unused id
    Incorrect,
    /// Second entry carries version 0x02
    WrongVersion,
    /// List sent as `null`
    Nil,
    /// List sent as `[]`
    Empty,
    /// `[blob#0]` regardless of the payload content
    NonEmptyOnNoBlobs,
}

impl HashCorruption {
    pub fn apply(self, correct: &[BlobId]) -> VersionedHashes {
        let next_unused = correct
            .iter()
            .max()
            .map(BlobId::next)
            .unwrap_or_default();

        let mut blobs = correct.to_vec();
        let mut hash_versions = Vec::new();
        match self {
            Self::Missing => {
                blobs.pop();
            }
            Self::Extra => blobs.push(next_unused),
            Self::OutOfOrder => {
                if let Some(last) = blobs.pop() {
                    blobs.insert(0, last);
                }
            }
            Self::Duplicated => {
                if let Some(last) = blobs.last().copied() {
                    blobs.push(last);
                }
            }
            Self::Incorrect => {
                if let Some(last) = blobs.last_mut() {
                    *last = next_unused;
                }
            }
            Self::WrongVersion => {
                hash_versions = vec![BLOB_COMMITMENT_VERSION_KZG, BLOB_COMMITMENT_VERSION_KZG + 1];
            }
            Self::Nil => return VersionedHashes::nil(),
            Self::Empty => blobs.clear(),
            Self::NonEmptyOnNoBlobs => blobs = vec![BlobId(0)],
        }

        VersionedHashes {
            blobs: Some(blobs),
            hash_versions,
        }
    }

    /// Whether the corrupted list actually differs from the correct one.
    ///
    /// Rotation of a single entry, or a wrong version on a list shorter than
    /// two entries, leaves the list untouched.
    pub fn changes(self, correct: &[BlobId]) -> bool {
        VersionedHashes::from_blobs(correct.to_vec()).hashes() != self.apply(correct).hashes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn test_versioned_hash_has_kzg_version() {
        for id in 0..16u64 {
            let hash = BlobId(id).versioned_hash();
            assert_eq!(hash[0], BLOB_COMMITMENT_VERSION_KZG);
        }
        assert_ne!(BlobId(0).versioned_hash(), BlobId(1).versioned_hash());
        assert_eq!(BlobId(5).versioned_hash(), BlobId(5).versioned_hash());
    }

    #[test]
    fn test_versioned_hash_is_sha256_of_commitment() {
        let commitment = BlobId(3).commitment();
        let digest: [u8; 32] = Sha256::digest(commitment.as_slice()).into();
        let hash = BlobId(3).versioned_hash();
        assert_eq!(&hash[1..], &digest[1..]);
    }

    #[test]
    fn test_blob_lists() {
        assert_eq!(blob_list(0, 3), vec![BlobId(0), BlobId(1), BlobId(2)]);
        assert!(blob_list(2, 2).is_empty());
        assert_eq!(
            blob_list_by_index(2, 0),
            vec![BlobId(2), BlobId(1), BlobId(0)]
        );
        assert_eq!(blob_list_by_index(1, 2), vec![BlobId(1), BlobId(2)]);
    }

    #[test]
    fn test_corruptions_of_three_blobs() {
        let correct = blob_list(0, 3);
        let ids = |c: HashCorruption| c.apply(&correct).blobs;

        assert_eq!(ids(HashCorruption::Missing), Some(blob_list(0, 2)));
        assert_eq!(ids(HashCorruption::Extra), Some(blob_list(0, 4)));
        assert_eq!(
            ids(HashCorruption::OutOfOrder),
            Some(vec![BlobId(2), BlobId(0), BlobId(1)])
        );
        assert_eq!(
            ids(HashCorruption::Duplicated),
            Some(vec![BlobId(0), BlobId(1), BlobId(2), BlobId(2)])
        );
        assert_eq!(
            ids(HashCorruption::Incorrect),
            Some(vec![BlobId(0), BlobId(1), BlobId(3)])
        );
        assert_eq!(ids(HashCorruption::Nil), None);
        assert_eq!(ids(HashCorruption::Empty), Some(vec![]));
        assert_eq!(ids(HashCorruption::NonEmptyOnNoBlobs), Some(vec![BlobId(0)]));

        let wrong_version = HashCorruption::WrongVersion.apply(&correct);
        let hashes = wrong_version.hashes().unwrap();
        assert_eq!(hashes[0], BlobId(0).versioned_hash());
        assert_eq!(hashes[1][0], 0x02);
        assert_eq!(hashes[2], BlobId(2).versioned_hash());
    }

    #[test]
    fn test_every_corruption_changes_a_three_blob_list() {
        let correct = blob_list(0, 3);
        for corruption in HashCorruption::iter() {
            assert!(corruption.changes(&correct), "{corruption} left the list intact");
        }
    }

    #[test]
    fn test_single_entry_rotation_is_a_no_op() {
        let single = vec![BlobId(7)];
        assert_eq!(
            HashCorruption::OutOfOrder.apply(&single).blobs,
            Some(single.clone())
        );
        assert!(!HashCorruption::OutOfOrder.changes(&single));
        assert!(!HashCorruption::WrongVersion.changes(&single));
        assert!(HashCorruption::Missing.changes(&single));
    }

    #[test]
    fn test_corruption_does_not_touch_input() {
        let correct = blob_list(0, 3);
        let before = correct.clone();
        for corruption in HashCorruption::iter() {
            let _ = corruption.apply(&correct);
        }
        assert_eq!(correct, before);
    }

    proptest::proptest! {
        #[test]
        fn prop_corruptions_never_preserve_lists_of_two_or_more(start in 0u64..1_000, len in 2u64..12) {
            let correct = blob_list(start, start + len);
            for corruption in HashCorruption::iter() {
                proptest::prop_assert!(corruption.changes(&correct), "{} left {:?} intact", corruption, correct);
            }
        }
    }
}
