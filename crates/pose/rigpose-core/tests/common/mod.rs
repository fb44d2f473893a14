#![allow(dead_code)]

use rigpose_core::{MotionTracks, Skeleton};

pub fn init_tracing() {
    let default_filter = "rigpose_core=debug";
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| default_filter.to_string());
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

pub fn skeleton(key: &str) -> Skeleton {
    let json = rigpose_test_fixtures::skeletons::json(key).expect("skeleton fixture");
    Skeleton::from_json_str(&json).expect("skeleton fixture should build")
}

pub fn motion(key: &str) -> MotionTracks {
    let json = rigpose_test_fixtures::motions::json(key).expect("motion fixture");
    MotionTracks::from_json_str(&json).expect("motion fixture should parse")
}

pub fn skeleton_from(json: serde_json::Value) -> Skeleton {
    Skeleton::from_json_str(&json.to_string()).expect("inline skeleton should build")
}
