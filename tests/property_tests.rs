//! Property-based tests for merging and occupancy tracking
//!
//! Properties covered:
//! 1. Merging keeps every retained event and emits them in time order
//! 2. Equal timestamps are emitted in source order
//! 3. Truncation drops exactly the events before the latest first event
//! 4. Core occupancy stays consistent under arbitrary migrations
//! 5. Rendering is a pure function of the block

use coretrace::event::Event;
use coretrace::merge::{ExhaustionPolicy, MergeConfig, StartPolicy, StreamMerger};
use coretrace::occupancy::CoreOccupancyState;
use coretrace::render::{Block, SnapshotRenderer, Stamp};
use proptest::prelude::*;

/// Sorted integer-valued timestamps keep float comparisons exact
fn sorted_stream(tag: usize) -> impl Strategy<Value = Vec<Event>> {
    prop::collection::vec(0u32..500, 0..20).prop_map(move |mut times| {
        times.sort_unstable();
        times
            .into_iter()
            .enumerate()
            .map(|(i, t)| Event::new(f64::from(t), 0.0, format!("{}:{}", tag, i)))
            .collect()
    })
}

fn streams() -> impl Strategy<Value = Vec<Vec<Event>>> {
    (1usize..6).prop_flat_map(|n| (0..n).map(sorted_stream).collect::<Vec<_>>())
}

fn source_of(event: &Event) -> usize {
    event
        .message
        .split(':')
        .next()
        .and_then(|tag| tag.parse().ok())
        .unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn prop_retentive_merge_is_total_and_ordered(streams in streams()) {
        let total: usize = streams.iter().map(Vec::len).sum();
        let merger = StreamMerger::new(MergeConfig {
            start: StartPolicy::Retentive,
            exhaustion: ExhaustionPolicy::Drain,
        });
        let (_, merged) = merger.merge(streams);

        prop_assert_eq!(merged.len(), total);
        for pair in merged.windows(2) {
            prop_assert!(pair[0].timestamp_ns <= pair[1].timestamp_ns);
            prop_assert!(pair[1].delta_ns >= 0.0);
        }
    }

    #[test]
    fn prop_ties_keep_source_order(streams in streams()) {
        let (_, merged) = StreamMerger::default().merge(streams);

        for pair in merged.windows(2) {
            if pair[0].timestamp_ns == pair[1].timestamp_ns
                && source_of(&pair[0]) != source_of(&pair[1])
            {
                prop_assert!(source_of(&pair[0]) < source_of(&pair[1]));
            }
        }
    }

    #[test]
    fn prop_truncation_drops_only_early_events(streams in streams()) {
        let latest_first = streams
            .iter()
            .filter_map(|s| s.first().map(|e| e.timestamp_ns))
            .fold(f64::NEG_INFINITY, f64::max);
        let expected: usize = streams
            .iter()
            .map(|s| s.iter().filter(|e| e.timestamp_ns >= latest_first).count())
            .sum();

        let (start, merged) = StreamMerger::default().merge(streams);

        prop_assert_eq!(merged.len(), expected);
        if !merged.is_empty() {
            prop_assert_eq!(start, latest_first);
            prop_assert_eq!(merged[0].timestamp_ns, 0.0);
            prop_assert!(merged.iter().all(|e| e.timestamp_ns >= 0.0));
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn prop_occupancy_stays_consistent(
        moves in prop::collection::vec((0usize..6, 0usize..8, any::<bool>()), 0..60),
    ) {
        let mut state = CoreOccupancyState::new(8).unwrap();
        for (thread, core, retire) in moves {
            let name = format!("w{}", thread);
            if retire {
                state.retire(&name);
            } else {
                state.place(&name, core).unwrap();
            }
            prop_assert!(state.is_consistent());
            prop_assert!(state.threads_on(core).iter().filter(|t| **t == name).count() <= 1);
        }
    }

    #[test]
    fn prop_place_out_of_range_is_rejected(core in 8usize..64) {
        let mut state = CoreOccupancyState::new(8).unwrap();
        prop_assert!(state.place("w0", core).is_err());
        prop_assert!(state.is_consistent());
    }

    #[test]
    fn prop_render_is_deterministic(
        names in prop::collection::vec(("[a-z][a-z0-9]{0,7}", 0usize..4), 0..10),
        timestamp in 0.0f64..1e9,
    ) {
        let mut cores = vec![Vec::new(); 4];
        for (name, core) in &names {
            cores[*core].push(name.clone());
        }
        let renderer = SnapshotRenderer::new(4).unwrap();
        let block = Block::Occupancy {
            stamp: Stamp { timestamp_ns: timestamp, delta_ns: 0.0 },
            cores: cores.clone(),
        };

        let text = renderer.render(&block);
        prop_assert_eq!(&text, &renderer.render(&block));

        let busiest = cores.iter().map(Vec::len).max().unwrap_or(0).max(1);
        prop_assert_eq!(text.lines().count(), busiest + 1);
    }
}
