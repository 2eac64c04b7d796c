//! Black-box distributed-trace accept/create scenarios (spec.md §8, scenarios 3 & 4),
//! driven entirely through `Txn`'s public surface.
use std::collections::HashMap;
use txn_trace_core::app::App;
use txn_trace_core::attributes::AttributeFilterConfig;
use txn_trace_core::config::TxnOptions;
use txn_trace_core::txn::Txn;

fn begin_txn(trusted_key: &str) -> Txn {
    let app = App::new(trusted_key, "account", "app");
    Txn::begin(&app, TxnOptions::new(), AttributeFilterConfig::new(), 1_000_000_000, 0, false)
}

#[test]
fn w3c_accept_matches_spec_scenario_3() {
    let mut txn = begin_txn("123");
    let mut headers = HashMap::new();
    headers.insert(
        "traceparent".to_owned(),
        "00-74be672b84ddc4e4b28be285632bbc0a-27ddd2d8890283b4-01".to_owned(),
    );
    headers.insert(
        "tracestate".to_owned(),
        "123@nr=0-2-account-app-span-transaction-1-1.1273-1529445826000, am=…".to_owned(),
    );

    assert!(txn.accept_distributed_trace_payload(&headers, None, 1_529_445_826_500));

    let seg = txn.segment_start(10, None, None, "child");
    txn.segment_end(seg, 20);
    let out = txn.end(30).expect("txn_end should produce output");

    let events = out.span_events.expect("sampled transaction should emit span events");
    assert!(!events.is_empty());
    let intrinsics = &events[0].intrinsics;
    assert_eq!(
        intrinsics.get("traceId").and_then(|v| v.as_str()),
        Some("74be672b84ddc4e4b28be285632bbc0a")
    );
    assert_eq!(intrinsics.get("sampled").and_then(|v| v.as_bool()), Some(true));
    assert_eq!(intrinsics.get("priority").and_then(|v| v.as_f64()), Some(1.1273));
}

#[test]
fn proprietary_accept_rejects_untrusted_account() {
    let mut txn = begin_txn("0007");
    let mut headers = HashMap::new();
    headers.insert(
        "newrelic".to_owned(),
        serde_json::json!({
            "v": [0, 1],
            "d": {
                "ac": "9123",
                "ap": "51424",
                "tr": "d6b4ba0c3a712ca",
                "ti": 1482959525577u64,
                "ty": "App",
                "id": "27856f70d3d314b7",
                "tk": "1010",
            }
        })
        .to_string(),
    );

    assert!(!txn.accept_distributed_trace_payload(&headers, None, 1_482_959_526_000));

    let seg = txn.segment_start(10, None, None, "child");
    txn.segment_end(seg, 20);
    let out = txn.end(30).expect("txn_end should produce output");
    assert!(
        out.span_events.is_none(),
        "an untrusted/rejected accept must not leave the transaction sampled"
    );
}

#[test]
fn accept_after_create_is_rejected() {
    let mut txn = begin_txn("123");
    let root = txn.root();
    let _ = txn.create_w3c_traceparent_header(Some(root));

    let mut headers = HashMap::new();
    headers.insert(
        "traceparent".to_owned(),
        "00-74be672b84ddc4e4b28be285632bbc0a-27ddd2d8890283b4-01".to_owned(),
    );
    assert!(!txn.accept_distributed_trace_payload(&headers, None, 0));
}
