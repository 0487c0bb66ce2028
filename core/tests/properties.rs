//! Property tests for grouping and the flow control policy.

#![allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect

use notiflow_core::flow_control::{evaluate, FlowControlConfig, WindowStats};
use notiflow_core::{group, DateTime, Record, Utc};
use proptest::prelude::*;
use std::collections::HashMap;

fn record_strategy() -> impl Strategy<Value = Record> {
    (
        prop::option::of(prop::sample::select(vec!["a", "b", "c", "d"])),
        prop::collection::vec((prop::sample::select(vec!["x", "y", "z"]), 0i64..100), 0..4),
    )
        .prop_map(|(id, traits)| {
            let mut record = id.map_or_else(Record::anonymous, |id| Record::new(id));
            for (key, value) in traits {
                record = record.with_trait(key, value);
            }
            record
        })
}

proptest! {
    #[test]
    fn ungrouped_preserves_order_and_count(records in prop::collection::vec(record_strategy(), 0..20)) {
        let out = group(records.clone(), false);
        prop_assert_eq!(out, records);
    }

    #[test]
    fn grouped_emits_one_record_per_entity(records in prop::collection::vec(record_strategy(), 0..20)) {
        let out = group(records.clone(), true);

        let anonymous = records.iter().filter(|r| r.entity_id().is_none()).count();
        let mut ids: Vec<_> = records.iter().filter_map(Record::entity_id).collect();
        ids.sort_unstable();
        ids.dedup();

        prop_assert_eq!(out.len(), anonymous + ids.len());
    }

    #[test]
    fn grouped_applies_last_write_wins(records in prop::collection::vec(record_strategy(), 0..20)) {
        let mut expected: HashMap<String, serde_json::Map<String, serde_json::Value>> = HashMap::new();
        for record in &records {
            if let Some(id) = record.entity_id() {
                expected
                    .entry(id.to_string())
                    .or_default()
                    .extend(record.traits.clone());
            }
        }

        for record in group(records, true) {
            if let Some(id) = record.entity_id() {
                prop_assert_eq!(&record.traits, &expected[id]);
            }
        }
    }

    #[test]
    fn grouped_follows_last_occurrence_order(records in prop::collection::vec(record_strategy(), 0..20)) {
        let mut last: HashMap<&str, usize> = HashMap::new();
        for (position, record) in records.iter().enumerate() {
            if let Some(id) = record.entity_id() {
                last.insert(id, position);
            }
        }
        let mut expected_order: Vec<(usize, &str)> = last.iter().map(|(id, pos)| (*pos, *id)).collect();
        expected_order.sort_unstable();

        let grouped = group(records.clone(), true);
        let actual_order: Vec<&str> = grouped.iter().filter_map(Record::entity_id).collect();
        let expected_ids: Vec<&str> = expected_order.into_iter().map(|(_, id)| id).collect();

        prop_assert_eq!(actual_order, expected_ids);
    }

    #[test]
    fn burst_admits_at_most_window_count(count in 1u32..10, burst in 0usize..30, spacing_ms in 0i64..50) {
        let config = FlowControlConfig::builder()
            .window_count(count)
            .window_duration_ms(60_000)
            .build()
            .unwrap();
        let start = DateTime::<Utc>::UNIX_EPOCH;
        let mut stats = WindowStats::new();
        let mut admitted = 0usize;

        for i in 0..burst {
            let now = start + chrono::TimeDelta::milliseconds(spacing_ms * i64::try_from(i).unwrap());
            stats.prune(now, config.window_duration());
            let verdict = evaluate(&config, &stats, now);
            if verdict.proceed {
                stats.record(now);
                admitted += 1;
            } else {
                prop_assert!(verdict.retry_after_ms.unwrap() > 0);
            }
        }

        prop_assert!(admitted <= count as usize);
        prop_assert_eq!(admitted, burst.min(count as usize));
    }
}

#[test]
fn merge_scenario_from_upstream_batch() {
    let records: Vec<Record> = serde_json::from_value(serde_json::json!([
        {"id": "a", "x": 1},
        {"id": "a", "x": 2},
        {"id": "b", "y": 5}
    ]))
    .unwrap();

    let grouped = group(records, true);

    assert_eq!(grouped.len(), 2);
    assert_eq!(grouped[0], Record::new("a").with_trait("x", 2));
    assert_eq!(grouped[1], Record::new("b").with_trait("y", 5));
}
