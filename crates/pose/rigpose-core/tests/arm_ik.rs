mod common;

use approx::assert_relative_eq;
use nalgebra::Vector3;
use rigpose_core::ik::limits::limited_angles;
use rigpose_core::{deform, ik, BoneKey, DeformConfig, DeformRequest, MotionTracks, Skeleton};

#[test]
fn arm_reaches_goal_with_forearm_inside_its_bend_limit() {
    common::init_tracing();
    let skel = common::skeleton("arm");
    let tracks = common::motion("arm-reach");
    let config = DeformConfig::default();

    let deltas = deform(&skel, &tracks, &DeformRequest::new(0.0), &config);

    let upper_arm = skel.bone_by_name("upperArm").unwrap();
    let goal = upper_arm.bind_position + Vector3::new(2.0, 0.0, 0.0);
    let wrist = deltas.bones.get_by_name(&skel, "wrist").unwrap();
    assert!(
        (wrist.global_position - goal).norm() < 1e-4,
        "wrist {:?} goal {:?}",
        wrist.global_position,
        goal
    );

    let arm_ik = skel.bone_by_name("armIK").unwrap().ik.as_ref().unwrap();
    let limit = arm_ik.links[0].local_limit.unwrap();
    let fore_arm = deltas.bones.get_by_name(&skel, "foreArm").unwrap();
    let angles = limited_angles(&fore_arm.frame_rotation, &limit, None, config.gimbal_limit());
    let bend = angles.z.to_degrees();
    assert!(bend > 1.0 && bend <= 150.0 + 1e-6, "forearm bend {bend}");
    assert!(angles.x.abs() < 1e-6 && angles.y.abs() < 1e-6);
}

#[test]
fn disabled_ik_leaves_the_arm_in_bind_pose() {
    common::init_tracing();
    let skel = common::skeleton("arm");
    let tracks = common::motion("arm-reach");
    let config = DeformConfig::default();
    let bind = skel.bone_by_name("wrist").unwrap().bind_position;

    // the motion switches the IK off at frame 40
    let toggled = deform(&skel, &tracks, &DeformRequest::new(40.0), &config);
    let wrist = toggled.bones.get_by_name(&skel, "wrist").unwrap();
    assert_relative_eq!(wrist.global_position, bind, epsilon = 1e-12);

    let skipped = deform(&skel, &tracks, &DeformRequest::new(0.0).with_ik(false), &config);
    let wrist = skipped.bones.get_by_name(&skel, "wrist").unwrap();
    assert_relative_eq!(wrist.global_position, bind, epsilon = 1e-12);
}

fn single_link_rig(loop_count: usize) -> Skeleton {
    common::skeleton_from(serde_json::json!({ "bones": [
        { "name": "root" },
        { "name": "arm", "parent": "root", "offset": [0.0, 5.0, 0.0] },
        { "name": "hand", "parent": "arm", "offset": [2.0, 0.0, 0.0] },
        {
            "name": "reachIK", "parent": "root", "offset": [2.0, 5.0, 0.0], "translatable": true,
            "ik": { "target": "hand", "loop_count": loop_count, "unit_rotation": 0.5, "links": [ { "bone": "arm" } ] }
        }
    ]}))
}

#[test]
fn single_link_chain_converges_within_budget() {
    common::init_tracing();
    let skel = single_link_rig(20);
    let mut tracks = MotionTracks::new();
    tracks.insert_bone_key(
        "reachIK",
        BoneKey::new(0.0).with_position(Vector3::new(-2.0, 2.0, 0.0)),
    );
    let config = DeformConfig::default();

    let mut deltas = deform(&skel, &tracks, &DeformRequest::new(0.0).with_ik(false), &config);
    let reach_ik = skel.index_of("reachIK").unwrap();
    let outcome = ik::solve(&skel, &mut deltas.bones, reach_ik, &config);

    assert!(outcome.converged, "{outcome:?}");
    assert!(outcome.iterations <= 20);
    assert!(outcome.error < 1e-4);
    let hand = deltas.bones.get_by_name(&skel, "hand").unwrap();
    assert_relative_eq!(hand.global_position, Vector3::new(0.0, 7.0, 0.0), epsilon = 1e-4);
}

#[test]
fn per_iteration_step_is_clamped_by_unit_rotation() {
    let skel = single_link_rig(2);
    let mut tracks = MotionTracks::new();
    tracks.insert_bone_key(
        "reachIK",
        BoneKey::new(0.0).with_position(Vector3::new(-2.0, 2.0, 0.0)),
    );
    let deltas = deform(&skel, &tracks, &DeformRequest::new(0.0), &DeformConfig::default());

    // two iterations of at most 0.5 rad each, well short of the 90 degrees needed
    let arm = deltas.bones.get_by_name(&skel, "arm").unwrap();
    assert_relative_eq!(arm.frame_rotation.angle(), 1.0, epsilon = 1e-9);
    let axis = arm.frame_rotation.axis().unwrap();
    assert_relative_eq!(axis.into_inner(), Vector3::z(), epsilon = 1e-9);
}
