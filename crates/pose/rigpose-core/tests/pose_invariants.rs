mod common;

use approx::assert_relative_eq;
use nalgebra::{Matrix4, UnitQuaternion, Vector3};
use rigpose_core::{
    deform, BoneKey, BonePose, DeformConfig, DeformPass, DeformRequest, Deformer, MotionTracks,
};

#[test]
fn same_request_twice_is_bit_identical() {
    common::init_tracing();
    let skel = common::skeleton("leg");
    let tracks = common::motion("leg-walk");
    let config = DeformConfig::default();

    for frame in [0.0, 7.5, 20.0] {
        let request = DeformRequest::new(frame);
        let a = deform(&skel, &tracks, &request, &config);
        let b = deform(&skel, &tracks, &request, &config);
        for i in a.bones.resolved_indices() {
            let (x, y) = (a.bones.get(i).unwrap(), b.bones.get(i).unwrap());
            assert_eq!(x.global_matrix, y.global_matrix);
            assert_eq!(x.global_position, y.global_position);
        }
    }
}

#[test]
fn global_is_parent_global_times_unit() {
    common::init_tracing();
    let skel = common::skeleton("leg");
    let tracks = common::motion("leg-walk");
    let deltas = deform(&skel, &tracks, &DeformRequest::new(12.0), &DeformConfig::default());

    for i in deltas.bones.resolved_indices() {
        let delta = deltas.bones.get(i).unwrap();
        let parent = skel
            .bone(i)
            .and_then(|b| b.parent)
            .and_then(|p| deltas.bones.get(p))
            .map_or_else(Matrix4::identity, |p| p.global_matrix);
        assert_relative_eq!(delta.global_matrix, parent * delta.unit_matrix, epsilon = 1e-6);
    }
}

#[test]
fn requested_subset_matches_full_deform() {
    let skel = common::skeleton("leg");
    let tracks = common::motion("leg-walk");
    let config = DeformConfig::default();
    let full = deform(&skel, &tracks, &DeformRequest::new(10.0), &config);
    let partial = deform(
        &skel,
        &tracks,
        &DeformRequest::new(10.0).with_bones(&["ankle"]),
        &config,
    );
    let ankle = skel.index_of("ankle").unwrap();
    assert_relative_eq!(
        partial.bones.get(ankle).unwrap().global_position,
        full.bones.get(ankle).unwrap().global_position,
        epsilon = 1e-9
    );
    assert!(partial.bones.resolved_indices().count() <= full.bones.resolved_indices().count());
}

fn cancelable_rig() -> rigpose_core::Skeleton {
    common::skeleton_from(serde_json::json!({ "bones": [
        { "name": "root" },
        { "name": "waist", "parent": "root", "offset": [0.0, 10.0, 0.0] },
        { "name": "legL", "parent": "waist", "offset": [1.0, -1.0, 0.0] }
    ]}))
}

#[test]
fn cancelable_rotation_does_not_reach_descendants() {
    common::init_tracing();
    let skel = cancelable_rig();
    let config = DeformConfig::default();
    let quarter = UnitQuaternion::from_axis_angle(&Vector3::y_axis(), std::f64::consts::FRAC_PI_2);

    let mut tracks = MotionTracks::new();
    tracks.insert_bone_key("waist", BoneKey::new(0.0).with_cancelable_rotation(quarter));
    let rotated = deform(&skel, &tracks, &DeformRequest::new(0.0), &config);
    let held = deform(&skel, &MotionTracks::new(), &DeformRequest::new(0.0), &config);

    let waist = rotated.bones.get_by_name(&skel, "waist").unwrap();
    assert_relative_eq!(
        waist.global_matrix.fixed_view::<3, 3>(0, 0).into_owned(),
        quarter.to_rotation_matrix().into_inner(),
        epsilon = 1e-12
    );

    let leg = rotated.bones.get_by_name(&skel, "legL").unwrap();
    let leg_held = held.bones.get_by_name(&skel, "legL").unwrap();
    assert_relative_eq!(
        leg.global_matrix.fixed_view::<3, 3>(0, 0).into_owned(),
        leg_held.global_matrix.fixed_view::<3, 3>(0, 0).into_owned(),
        epsilon = 1e-12
    );
}

#[test]
fn after_physics_pass_builds_on_the_before_physics_store() {
    let skel = common::skeleton_from(serde_json::json!({ "bones": [
        { "name": "root" },
        { "name": "head", "parent": "root", "offset": [0.0, 15.0, 0.0] },
        { "name": "hair", "parent": "head", "offset": [0.0, 1.0, 0.0], "after_physics": true }
    ]}));
    let mut tracks = MotionTracks::new();
    tracks.insert_bone_key("head", BoneKey::new(0.0).with_position(Vector3::new(2.0, 0.0, 0.0)));
    let deformer = Deformer::default();

    let before = deform(&skel, &tracks, &DeformRequest::new(0.0), deformer.config());
    assert!(!before.bones.contains(skel.index_of("hair").unwrap()));

    let both = deformer.deform_both_passes(
        &skel,
        &tracks,
        &DeformRequest::new(0.0).with_pass(DeformPass::AfterPhysics),
    );
    let hair = both.bones.get_by_name(&skel, "hair").unwrap();
    assert_relative_eq!(hair.global_position, Vector3::new(2.0, 16.0, 0.0), epsilon = 1e-12);
}

#[test]
fn poses_export_every_resolved_bone() {
    let skel = cancelable_rig();
    let mut tracks = MotionTracks::new();
    tracks.insert_bone_key(
        "waist",
        BoneKey::new(0.0)
            .with_position(Vector3::new(0.0, 0.5, 0.0))
            .with_scale(Vector3::new(1.0, 2.0, 1.0)),
    );
    let deltas = deform(&skel, &tracks, &DeformRequest::new(0.0), &DeformConfig::default());
    let poses = deltas.bones.poses(&skel);
    assert_eq!(poses.len(), 3);

    let waist = poses.iter().find(|p| p.name == "waist").unwrap();
    assert_eq!(waist.position, [0.0, 0.5, 0.0]);
    assert_eq!(waist.scale, [1.0, 2.0, 1.0]);
    assert_eq!(waist.rotation, [0.0, 0.0, 0.0, 1.0]);

    let json = serde_json::to_string(&poses).unwrap();
    let back: Vec<BonePose> = serde_json::from_str(&json).unwrap();
    assert_eq!(back, poses);
}

#[test]
fn translation_effector_scales_through_a_chain() {
    let skel = common::skeleton_from(serde_json::json!({ "bones": [
        { "name": "root" },
        { "name": "mover", "parent": "root", "offset": [0.0, 1.0, 0.0], "translatable": true },
        {
            "name": "half", "parent": "root", "offset": [2.0, 0.0, 0.0],
            "effector": { "source": "mover", "factor": 0.5, "translation": true }
        },
        {
            "name": "quarter", "parent": "root", "offset": [0.0, 0.0, 3.0],
            "effector": { "source": "half", "factor": 0.5, "translation": true }
        }
    ]}));
    let mut tracks = MotionTracks::new();
    tracks.insert_bone_key("mover", BoneKey::new(0.0).with_position(Vector3::new(4.0, 0.0, 0.0)));
    let deltas = deform(&skel, &tracks, &DeformRequest::new(0.0), &DeformConfig::default());

    let half = deltas.bones.get_by_name(&skel, "half").unwrap();
    assert_relative_eq!(half.global_position, Vector3::new(4.0, 0.0, 0.0), epsilon = 1e-12);
    let quarter = deltas.bones.get_by_name(&skel, "quarter").unwrap();
    assert_relative_eq!(quarter.global_position, Vector3::new(1.0, 0.0, 3.0), epsilon = 1e-12);
}

#[test]
fn after_physics_follower_sees_the_ik_folded_morph_once() {
    common::init_tracing();
    let (s, c) = 0.1f64.sin_cos();
    let skel = common::skeleton_from(serde_json::json!({
        "bones": [
            { "name": "root" },
            { "name": "arm", "parent": "root", "offset": [0.0, 1.0, 0.0] },
            { "name": "hand", "parent": "arm", "offset": [1.0, 0.0, 0.0] },
            {
                "name": "armIK", "parent": "root", "offset": [0.0, 2.0, 0.0], "translatable": true,
                "ik": { "target": "hand", "loop_count": 1, "unit_rotation": 4.0, "links": [ { "bone": "arm" } ] }
            },
            {
                "name": "follower", "parent": "root", "offset": [0.0, 0.0, 2.0], "after_physics": true,
                "effector": { "source": "arm", "rotation": true }
            }
        ],
        "morphs": [
            { "name": "lift", "offsets": { "bone": [ { "bone": "arm", "rotation": [0.0, s, 0.0, c] } ] } }
        ]
    }));
    let mut tracks = MotionTracks::new();
    tracks.insert_morph_key("lift", 0.0, 1.0);

    let deltas = Deformer::default().deform_both_passes(&skel, &tracks, &DeformRequest::new(0.0));
    let arm = deltas.bones.get_by_name(&skel, "arm").unwrap();
    assert_eq!(arm.frame_morph_rotation, UnitQuaternion::identity());
    assert!(arm.total_rotation.angle() > 0.2);

    let follower = deltas.bones.get_by_name(&skel, "follower").unwrap();
    let drift = follower.total_rotation.angle_to(&arm.total_rotation);
    assert!(drift < 1e-6, "follower differs from arm by {drift} rad");
}
