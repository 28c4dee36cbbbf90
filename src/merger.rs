//! Reassembly of multi-packet characteristic payloads.
//!
//! BLE notifications are limited by the ATT MTU, so a logical message often
//! arrives as several packets. A [`DataMerger`] decides, per characteristic,
//! when the accumulated bytes form a complete message; the
//! [`MergeRegistry`] owns the per-characteristic buffers and applies the
//! configured merger to each incoming chunk.
//!
//! Without a merger configured, every chunk is forwarded as a complete
//! payload on its own. A validation failure discards the buffer and is
//! reported to the client as invalid data rather than silently dropped,
//! so protocol errors stay visible.

use bytes::Bytes;
use std::collections::HashMap;
use tracing::{debug, trace};
use uuid::Uuid;

/// Verdict of a [`DataMerger`] over the accumulated bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeDecision {
    /// More chunks are needed.
    Incomplete,
    /// The accumulated bytes form exactly one complete message.
    Complete,
    /// The accumulated bytes can never form a valid message.
    Invalid,
}

/// Outcome of supplying a chunk to the [`MergeRegistry`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeResult {
    /// The message is still accumulating; nothing to deliver.
    Incomplete,
    /// A complete logical payload.
    Complete(Bytes),
    /// Validation failed; carries the raw accumulation for error reporting.
    /// The buffer for the characteristic has been discarded.
    Invalid(Bytes),
}

/// Completion predicate for multi-packet messages on one characteristic.
///
/// `assess` is called after each chunk has been appended, with the full
/// accumulation and the zero-based index of the chunk that just arrived.
/// Implementations may keep their own state; it is reset implicitly because
/// a fresh message always starts at `chunk_index == 0`.
pub trait DataMerger: Send {
    /// Decide whether the accumulated bytes form a complete message.
    fn assess(&mut self, accumulated: &[u8], chunk_index: usize) -> MergeDecision;
}

/// Merger for messages of a fixed, out-of-band known size.
#[derive(Debug, Clone)]
pub struct FixedLengthMerger {
    expected: usize,
}

impl FixedLengthMerger {
    /// Messages are complete at exactly `expected` bytes.
    pub fn new(expected: usize) -> Self {
        Self { expected }
    }
}

impl DataMerger for FixedLengthMerger {
    fn assess(&mut self, accumulated: &[u8], _chunk_index: usize) -> MergeDecision {
        match accumulated.len().cmp(&self.expected) {
            std::cmp::Ordering::Less => MergeDecision::Incomplete,
            std::cmp::Ordering::Equal => MergeDecision::Complete,
            std::cmp::Ordering::Greater => MergeDecision::Invalid,
        }
    }
}

/// Merger for messages that declare their own length in a leading header.
///
/// The declared length counts the bytes after the header.
#[derive(Debug, Clone)]
pub struct LengthPrefixMerger {
    header_len: usize,
}

impl LengthPrefixMerger {
    /// Single-byte length header.
    pub fn u8() -> Self {
        Self { header_len: 1 }
    }

    /// Two-byte little-endian length header.
    pub fn u16_le() -> Self {
        Self { header_len: 2 }
    }

    fn declared_len(&self, accumulated: &[u8]) -> Option<usize> {
        if accumulated.len() < self.header_len {
            return None;
        }
        let len = match self.header_len {
            1 => accumulated[0] as usize,
            _ => u16::from_le_bytes([accumulated[0], accumulated[1]]) as usize,
        };
        Some(len + self.header_len)
    }
}

impl DataMerger for LengthPrefixMerger {
    fn assess(&mut self, accumulated: &[u8], _chunk_index: usize) -> MergeDecision {
        let Some(expected) = self.declared_len(accumulated) else {
            // Header not complete yet.
            return MergeDecision::Incomplete;
        };
        match accumulated.len().cmp(&expected) {
            std::cmp::Ordering::Less => MergeDecision::Incomplete,
            std::cmp::Ordering::Equal => MergeDecision::Complete,
            std::cmp::Ordering::Greater => MergeDecision::Invalid,
        }
    }
}

/// Per-characteristic accumulation state.
#[derive(Default)]
struct MergeBuffer {
    data: Vec<u8>,
    chunks: usize,
}

/// Owns the configured mergers and the partial buffers for one session.
///
/// Buffers never outlive the connection: the session clears the registry
/// on every teardown.
#[derive(Default)]
pub struct MergeRegistry {
    mergers: HashMap<Uuid, Box<dyn DataMerger>>,
    buffers: HashMap<Uuid, MergeBuffer>,
}

impl MergeRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configure a merger for a characteristic, replacing any previous one.
    /// Any partial buffer for the characteristic is discarded.
    pub fn set_merger(&mut self, characteristic: Uuid, merger: Box<dyn DataMerger>) {
        self.buffers.remove(&characteristic);
        self.mergers.insert(characteristic, merger);
    }

    /// Remove the merger for a characteristic, reverting to pass-through.
    pub fn remove_merger(&mut self, characteristic: Uuid) {
        self.buffers.remove(&characteristic);
        self.mergers.remove(&characteristic);
    }

    /// Feed one incoming chunk for a characteristic.
    pub fn supply(&mut self, characteristic: Uuid, chunk: &[u8]) -> MergeResult {
        let Some(merger) = self.mergers.get_mut(&characteristic) else {
            // No merger configured: a single packet is a complete message.
            trace!(%characteristic, len = chunk.len(), "pass-through chunk");
            return MergeResult::Complete(Bytes::copy_from_slice(chunk));
        };

        let buffer = self.buffers.entry(characteristic).or_default();
        let chunk_index = buffer.chunks;
        buffer.data.extend_from_slice(chunk);
        buffer.chunks += 1;

        match merger.assess(&buffer.data, chunk_index) {
            MergeDecision::Incomplete => {
                trace!(
                    %characteristic,
                    accumulated = buffer.data.len(),
                    chunks = buffer.chunks,
                    "message incomplete"
                );
                MergeResult::Incomplete
            }
            MergeDecision::Complete => {
                let buffer = self.buffers.remove(&characteristic).unwrap_or_default();
                debug!(
                    %characteristic,
                    len = buffer.data.len(),
                    chunks = buffer.chunks,
                    "message merged"
                );
                MergeResult::Complete(Bytes::from(buffer.data))
            }
            MergeDecision::Invalid => {
                let buffer = self.buffers.remove(&characteristic).unwrap_or_default();
                debug!(
                    %characteristic,
                    len = buffer.data.len(),
                    "merge validation failed, discarding buffer"
                );
                MergeResult::Invalid(Bytes::from(buffer.data))
            }
        }
    }

    /// Discard all partial buffers. Called on disconnect; configured
    /// mergers survive for the next connection cycle.
    pub fn clear_buffers(&mut self) {
        self.buffers.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const CHAR: Uuid = Uuid::from_u128(0x1234);

    #[test]
    fn test_pass_through_without_merger() {
        let mut registry = MergeRegistry::new();
        assert_eq!(
            registry.supply(CHAR, &[1, 2, 3]),
            MergeResult::Complete(Bytes::from_static(&[1, 2, 3]))
        );
        // Every chunk stands alone.
        assert_eq!(
            registry.supply(CHAR, &[4]),
            MergeResult::Complete(Bytes::from_static(&[4]))
        );
    }

    #[test]
    fn test_three_chunk_round_trip() {
        let mut registry = MergeRegistry::new();
        registry.set_merger(CHAR, Box::new(FixedLengthMerger::new(6)));

        assert_eq!(registry.supply(CHAR, &[1, 2]), MergeResult::Incomplete);
        assert_eq!(registry.supply(CHAR, &[3, 4]), MergeResult::Incomplete);
        assert_eq!(
            registry.supply(CHAR, &[5, 6]),
            MergeResult::Complete(Bytes::from_static(&[1, 2, 3, 4, 5, 6]))
        );
    }

    #[test]
    fn test_overflow_is_invalid_and_discards_buffer() {
        let mut registry = MergeRegistry::new();
        registry.set_merger(CHAR, Box::new(FixedLengthMerger::new(3)));

        assert_eq!(registry.supply(CHAR, &[1, 2]), MergeResult::Incomplete);
        assert_eq!(
            registry.supply(CHAR, &[3, 4]),
            MergeResult::Invalid(Bytes::from_static(&[1, 2, 3, 4]))
        );
        // The buffer was discarded; accumulation starts over.
        assert_eq!(registry.supply(CHAR, &[9, 9]), MergeResult::Incomplete);
        assert_eq!(
            registry.supply(CHAR, &[9]),
            MergeResult::Complete(Bytes::from_static(&[9, 9, 9]))
        );
    }

    #[test]
    fn test_length_prefix_u8() {
        let mut registry = MergeRegistry::new();
        registry.set_merger(CHAR, Box::new(LengthPrefixMerger::u8()));

        // Declared payload of 3 bytes after the header.
        assert_eq!(registry.supply(CHAR, &[3, 0xaa]), MergeResult::Incomplete);
        assert_eq!(
            registry.supply(CHAR, &[0xbb, 0xcc]),
            MergeResult::Complete(Bytes::from_static(&[3, 0xaa, 0xbb, 0xcc]))
        );
    }

    #[test]
    fn test_length_prefix_u16_header_split_across_chunks() {
        let mut registry = MergeRegistry::new();
        registry.set_merger(CHAR, Box::new(LengthPrefixMerger::u16_le()));

        assert_eq!(registry.supply(CHAR, &[2]), MergeResult::Incomplete);
        assert_eq!(registry.supply(CHAR, &[0]), MergeResult::Incomplete);
        assert_eq!(
            registry.supply(CHAR, &[7, 8]),
            MergeResult::Complete(Bytes::from_static(&[2, 0, 7, 8]))
        );
    }

    #[test]
    fn test_length_prefix_overflow_is_invalid() {
        let mut registry = MergeRegistry::new();
        registry.set_merger(CHAR, Box::new(LengthPrefixMerger::u8()));

        assert_eq!(
            registry.supply(CHAR, &[1, 0xaa, 0xbb]),
            MergeResult::Invalid(Bytes::from_static(&[1, 0xaa, 0xbb]))
        );
    }

    #[test]
    fn test_clear_buffers_drops_partial_state() {
        let mut registry = MergeRegistry::new();
        registry.set_merger(CHAR, Box::new(FixedLengthMerger::new(4)));

        assert_eq!(registry.supply(CHAR, &[1, 2, 3]), MergeResult::Incomplete);
        registry.clear_buffers();
        // After a clear, the next chunk starts a fresh message.
        assert_eq!(
            registry.supply(CHAR, &[1, 2, 3, 4]),
            MergeResult::Complete(Bytes::from_static(&[1, 2, 3, 4]))
        );
    }

    #[test]
    fn test_characteristics_are_independent() {
        let other: Uuid = Uuid::from_u128(0x5678);
        let mut registry = MergeRegistry::new();
        registry.set_merger(CHAR, Box::new(FixedLengthMerger::new(2)));
        registry.set_merger(other, Box::new(FixedLengthMerger::new(2)));

        assert_eq!(registry.supply(CHAR, &[1]), MergeResult::Incomplete);
        assert_eq!(registry.supply(other, &[9]), MergeResult::Incomplete);
        assert_eq!(
            registry.supply(CHAR, &[2]),
            MergeResult::Complete(Bytes::from_static(&[1, 2]))
        );
        assert_eq!(
            registry.supply(other, &[8]),
            MergeResult::Complete(Bytes::from_static(&[9, 8]))
        );
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            /// Any payload split into arbitrary chunks merges back to the
            /// original, with exactly one Complete at the end.
            #[test]
            fn fixed_length_reassembles_any_split(
                payload in proptest::collection::vec(any::<u8>(), 1..128),
                cuts in proptest::collection::vec(any::<proptest::sample::Index>(), 0..6),
            ) {
                let mut boundaries: Vec<usize> =
                    cuts.iter().map(|i| i.index(payload.len())).collect();
                boundaries.push(0);
                boundaries.push(payload.len());
                boundaries.sort_unstable();
                boundaries.dedup();

                let mut registry = MergeRegistry::new();
                registry.set_merger(CHAR, Box::new(FixedLengthMerger::new(payload.len())));

                let mut completes = 0;
                for window in boundaries.windows(2) {
                    let chunk = &payload[window[0]..window[1]];
                    match registry.supply(CHAR, chunk) {
                        MergeResult::Complete(merged) => {
                            completes += 1;
                            prop_assert_eq!(&merged[..], &payload[..]);
                        }
                        MergeResult::Incomplete => {}
                        MergeResult::Invalid(_) => prop_assert!(false, "unexpected invalid"),
                    }
                }
                prop_assert_eq!(completes, 1);
            }
        }
    }
}
