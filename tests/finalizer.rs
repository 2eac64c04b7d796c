//! Black-box finalizer scenarios: the sampling cap (spec.md §8 scenario 5)
//! and the `max_segments` live-bounding invariant (spec.md §8 property 5),
//! both driven through `Txn`'s public surface.
use serde_json::Value as Json;
use txn_trace_core::app::App;
use txn_trace_core::attributes::AttributeFilterConfig;
use txn_trace_core::config::{TtThreshold, TxnOptions};
use txn_trace_core::txn::Txn;

fn begin(options: TxnOptions) -> Txn {
    let app = App::new("trust", "acct", "app");
    Txn::begin(&app, options, AttributeFilterConfig::new(), 1_000_000_000, 0, false)
}

fn count_nodes(node: &Json) -> usize {
    let children = node[4].as_array().expect("every trace node has a children array");
    1 + children.iter().map(count_nodes).sum::<usize>()
}

#[test]
fn sampling_cap_keeps_only_root_and_longest_sibling() {
    let mut txn = begin(
        TxnOptions::new()
            .with_tt_threshold(TtThreshold::Fixed(0))
            .with_trace_limit(2)
            .with_span_limit(0),
    );
    let root = txn.root();
    // A (5ms), B (3ms), C (1ms) as direct siblings under root, per spec.md's literal tree shape.
    let a = txn.segment_start(1_000_000, Some(root), None, "A");
    let b = txn.segment_start(2_000_000, Some(root), None, "B");
    let c = txn.segment_start(3_000_000, Some(root), None, "C");
    txn.segment_end(c, 4_000_000);
    txn.segment_end(b, 5_000_000);
    txn.segment_end(a, 6_000_000);

    let out = txn.end(9_000_000).unwrap();
    let json: Json = serde_json::from_str(&out.trace_json.unwrap()).unwrap();
    let names = json[1].as_array().unwrap();
    assert_eq!(names.len(), 2, "only root and the longest-surviving segment should ever be named: {names:?}");
    assert_eq!(names[1], "A");

    let real_root = &json[0][3][4][0];
    assert_eq!(count_nodes(real_root), 2, "root plus exactly one surviving child (A); B and C are hoisted away");
}

#[test]
fn max_segments_bound_keeps_the_longest_segments() {
    let mut txn = begin(
        TxnOptions::new()
            .with_tt_threshold(TtThreshold::Fixed(0))
            .with_max_segments(2),
    );
    let root = txn.root();
    // Five direct children of increasing duration; only the longest two (plus root) should survive.
    for (i, dur_ms) in [1u64, 2, 3, 4, 5].into_iter().enumerate() {
        let seg = txn.segment_start((i as u64) * 10, Some(root), None, &format!("S{i}"));
        txn.segment_end(seg, (i as u64) * 10 + dur_ms * 1_000_000);
    }

    let out = txn.end(6_000_000_000).unwrap();
    let json: Json = serde_json::from_str(&out.trace_json.unwrap()).unwrap();
    let real_root = &json[0][3][4][0];
    let surviving_children = real_root[4].as_array().unwrap();
    assert!(
        surviving_children.len() <= 2,
        "max_segments=2 must bound the live segment count to 2 (plus root), got {}",
        surviving_children.len()
    );
}

#[test]
fn proprietary_round_trip_property_6() {
    let app_a = App::new("trust", "acct", "app-a");
    let mut txn_a = Txn::begin(&app_a, TxnOptions::new(), AttributeFilterConfig::new(), 0, 0, false);
    let root_a = txn_a.root();
    let payload = txn_a.create_distributed_trace_payload(Some(root_a), 1_000);

    let app_b = App::new("trust", "acct", "app-b");
    let mut txn_b = Txn::begin(&app_b, TxnOptions::new(), AttributeFilterConfig::new(), 0, 0, false);
    let mut headers = std::collections::HashMap::new();
    headers.insert("newrelic".to_owned(), payload.to_string());
    assert!(txn_b.accept_distributed_trace_payload(&headers, None, 2_000));
}
