use std::path::{Path, PathBuf};

use fundsync_adapters::{load_fixture_payload, transform_payload};
use fundsync_core::FundPayload;

fn fixture_dir(source_id: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("../../fixtures")
        .join(source_id)
        .join("sample")
}

fn assert_matches_snapshot(source_id: &str) {
    let raw = load_fixture_payload(fixture_dir(source_id).join("payload.json")).unwrap();
    let actual = transform_payload(&raw).unwrap();
    let snapshot = std::fs::read_to_string(fixture_dir(source_id).join("snapshot.json")).unwrap();
    let expected: FundPayload = serde_json::from_str(&snapshot).unwrap();
    assert_eq!(actual, expected);
}

#[test]
fn golden_snapshot_complete_feed() {
    assert_matches_snapshot("BYW8RV9");
}

#[test]
fn golden_snapshot_sparse_and_malformed_feed() {
    assert_matches_snapshot("BN0S2V9");
}
