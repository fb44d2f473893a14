mod common;

use rigpose_core::{deform, DeformConfig, DeformRequest, MotionTracks, Skeleton, SkeletonDesc};
use rigpose_test_fixtures::{motions, skeletons};

#[test]
fn every_skeleton_fixture_builds() {
    let mut keys = skeletons::keys();
    keys.sort();
    assert_eq!(keys, ["arm", "face", "leg"]);
    for key in keys {
        let desc: SkeletonDesc = skeletons::load(&key).expect("skeleton fixture");
        let skel = Skeleton::from_desc(&desc).unwrap_or_else(|e| panic!("{key}: {e}"));
        assert_eq!(skel.len(), desc.bones.len());
    }
}

#[test]
fn motion_fixtures_only_name_parts_of_their_skeleton() {
    common::init_tracing();
    for key in motions::keys() {
        let skeleton_key = motions::skeleton_key(&key)
            .expect("motion fixture")
            .unwrap_or_else(|| panic!("{key} records no skeleton"));
        let skel = common::skeleton(&skeleton_key);
        let tracks: MotionTracks = motions::load(&key).expect("motion fixture");

        for name in tracks.bones().keys().chain(tracks.ik().keys()) {
            assert!(skel.index_of(name).is_some(), "{key}: unknown bone {name}");
        }
        for name in tracks.morphs().keys() {
            assert!(skel.morph_index(name).is_some(), "{key}: unknown morph {name}");
        }

        let deltas = deform(&skel, &tracks, &DeformRequest::new(0.0), &DeformConfig::default());
        assert_eq!(deltas.bones.resolved_indices().count(), skel.len(), "{key}");
    }
}
