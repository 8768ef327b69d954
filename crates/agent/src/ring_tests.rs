// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use proptest::prelude::*;

use super::*;

fn seqs(read: &ReplayRead) -> Vec<u64> {
    read.chunks.iter().map(|c| c.sequence).collect()
}

#[test]
fn sequences_start_at_one_and_increase() {
    let mut ring = OutputRing::new(1024, 16);
    assert_eq!(ring.write(b"a", false), 1);
    assert_eq!(ring.write(b"b", false), 2);
    assert_eq!(ring.write(b"c", false), 3);
    assert_eq!(ring.current_sequence(), 3);
    assert_eq!(ring.oldest_sequence(), 1);
}

#[test]
fn write_copies_input() {
    let mut ring = OutputRing::new(1024, 16);
    let mut data = b"mutate me".to_vec();
    ring.write(&data, false);
    data[0] = b'X';
    assert_eq!(ring.read_from(1).chunks[0].data, b"mutate me");
}

// Replay-with-loss scenario: 64-byte cap, three 32-byte chunks; the third
// write evicts the first, and a read from seq 1 reports the gap.
#[test]
fn eviction_and_clamped_replay() {
    let mut ring = OutputRing::new(64, 100);
    assert_eq!(ring.write(&[b'A'; 32], false), 1);
    assert_eq!(ring.write(&[b'B'; 32], false), 2);
    assert_eq!(ring.total_bytes(), 64);

    assert_eq!(ring.write(&[b'C'; 32], false), 3);
    assert_eq!(ring.oldest_sequence(), 2);
    assert_eq!(ring.total_bytes(), 64);

    let read = ring.read_from(1);
    assert_eq!(seqs(&read), vec![2, 3]);
    assert!(read.data_lost);

    let read = ring.read_from(2);
    assert_eq!(seqs(&read), vec![2, 3]);
    assert!(!read.data_lost);
}

#[test]
fn chunk_cap_evicts() {
    let mut ring = OutputRing::new(1024 * 1024, 3);
    for _ in 0..5 {
        ring.write(b"x", false);
    }
    assert_eq!(ring.chunk_count(), 3);
    assert_eq!(ring.oldest_sequence(), 3);
    assert_eq!(seqs(&ring.read_from(1)), vec![3, 4, 5]);
}

#[test]
fn read_range_inclusive() {
    let mut ring = OutputRing::new(1024, 16);
    for _ in 0..5 {
        ring.write(b"x", false);
    }
    let got: Vec<u64> = ring.read_range(2, 4).iter().map(|c| c.sequence).collect();
    assert_eq!(got, vec![2, 3, 4]);
}

#[test]
fn latest_bytes_trims_partial_chunk_from_front() {
    let mut ring = OutputRing::new(1024, 16);
    ring.write(b"hello ", false);
    ring.write(b"world", false);

    assert_eq!(ring.latest_bytes(8), b"lo world");
    assert_eq!(ring.latest_bytes(5), b"world");
    assert_eq!(ring.latest_bytes(64), b"hello world");
    assert_eq!(ring.latest_bytes(0), b"");
}

#[test]
fn sequence_availability() {
    let mut ring = OutputRing::new(2, 16);
    ring.write(b"a", false);
    ring.write(b"b", false);
    ring.write(b"c", false); // evicts seq 1

    assert!(!ring.is_sequence_available(0));
    assert!(!ring.is_sequence_available(1));
    assert!(ring.is_sequence_available(2));
    assert!(ring.is_sequence_available(3));
    assert!(!ring.is_sequence_available(4));
}

#[test]
fn empty_ring_reads() {
    let ring = OutputRing::default();
    assert_eq!(ring.current_sequence(), 0);
    assert_eq!(ring.oldest_sequence(), 1);
    let read = ring.read_from(1);
    assert!(read.chunks.is_empty());
    assert!(!read.data_lost);
    assert!(ring.latest_bytes(16).is_empty());
}

proptest! {
    // total_bytes and chunk_count stay within caps after any write sequence,
    // and sequences are strictly increasing.
    #[test]
    fn caps_hold_and_sequences_increase(
        writes in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..64), 1..64),
        max_bytes in 1usize..256,
        max_chunks in 1usize..16,
    ) {
        let mut ring = OutputRing::new(max_bytes, max_chunks);
        let mut last_seq = 0u64;
        for data in &writes {
            let seq = ring.write(data, false);
            prop_assert!(seq > last_seq);
            last_seq = seq;
            prop_assert!(ring.chunk_count() <= max_chunks);
            prop_assert!(ring.total_bytes() <= max_bytes);
        }
    }

    // read_from(seq) returns exactly the retained chunks with sequence >= seq.
    #[test]
    fn replay_is_exact(
        count in 1usize..32,
        from in 1u64..40,
    ) {
        let mut ring = OutputRing::new(1024 * 1024, 1024);
        for i in 0..count {
            ring.write(&[i as u8], false);
        }
        let read = ring.read_from(from);
        let expected: Vec<u64> = (from.max(1)..=count as u64).collect();
        prop_assert_eq!(seqs(&read), expected);
        prop_assert!(!read.data_lost);
    }
}
