// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Parsing must not depend on how the bytes were split.

use proptest::prelude::*;
use std::sync::OnceLock;

use crate::reader::{CollectingListener, ReplayReader};
use crate::tests::support::*;

struct Fixture {
    bytes: Vec<u8>,
    public_key: String,
    ticks: Vec<(u32, Vec<u8>)>,
}

fn fixture() -> &'static Fixture {
    static FIXTURE: OnceLock<Fixture> = OnceLock::new();
    FIXTURE.get_or_init(|| {
        let recorded = record_to_memory(&TestRecording::new(7, 24).with_ticks_per_chunk(4));
        let bytes = recorded.file.contents();
        let mut reader =
            ReplayReader::with_verifying_key(CollectingListener::default(), &recorded.public_key, true, 0);
        reader.add_data(&bytes).unwrap();
        let ticks = reader.listener().ticks.clone();
        Fixture {
            bytes,
            public_key: recorded.public_key,
            ticks,
        }
    })
}

fn split_at_sizes<'a>(bytes: &'a [u8], sizes: &[usize]) -> Vec<&'a [u8]> {
    let mut fragments = Vec::new();
    let mut pos = 0;
    let mut sizes = sizes.iter().cycle();
    while pos < bytes.len() {
        let size = sizes.next().copied().unwrap_or(1).max(1);
        let end = (pos + size).min(bytes.len());
        fragments.push(&bytes[pos..end]);
        pos = end;
    }
    fragments
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn any_split_yields_the_same_ticks(sizes in prop::collection::vec(1usize..300, 1..16)) {
        let fixture = fixture();
        let mut reader =
            ReplayReader::with_verifying_key(CollectingListener::default(), &fixture.public_key, true, 0);
        for fragment in split_at_sizes(&fixture.bytes, &sizes) {
            prop_assert!(reader.add_data(fragment).is_ok());
        }
        prop_assert_eq!(&reader.listener().ticks, &fixture.ticks);
        prop_assert_eq!(reader.num_bytes_read(), fixture.bytes.len());
        prop_assert_eq!(reader.verified_to_position(), fixture.bytes.len());
        prop_assert!(reader.pending().is_empty());
    }

    #[test]
    fn corruption_is_caught_under_any_split(
        sizes in prop::collection::vec(1usize..300, 1..8),
        offset in 0usize..10_000,
    ) {
        let fixture = fixture();
        let mut bytes = fixture.bytes.clone();
        let layout = file_layout(&bytes);
        // Stay inside chunk payloads so framing still parses.
        let chunk = &layout.chunks[offset % layout.chunks.len()];
        let payload_start = chunk.start + 4;
        let payload_len = chunk.end - layout.signature_length - payload_start;
        let target = payload_start + offset % payload_len;
        bytes[target] ^= 0x5A;

        let mut reader =
            ReplayReader::with_verifying_key(CollectingListener::default(), &fixture.public_key, true, 0);
        let failed = split_at_sizes(&bytes, &sizes)
            .into_iter()
            .any(|fragment| reader.add_data(fragment).is_err());
        prop_assert!(failed);
        prop_assert!(reader.num_ticks_read() < fixture.ticks.len() as u32);
    }
}

#[test]
fn test_byte_at_a_time() {
    let fixture = fixture();
    let mut reader =
        ReplayReader::with_verifying_key(CollectingListener::default(), &fixture.public_key, true, 0);
    for byte in &fixture.bytes {
        reader.add_data(std::slice::from_ref(byte)).unwrap();
    }
    assert_eq!(reader.listener().ticks, fixture.ticks);
    assert_eq!(reader.num_bytes_added(), fixture.bytes.len());
}
