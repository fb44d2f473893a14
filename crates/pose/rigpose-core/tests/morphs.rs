mod common;

use approx::assert_relative_eq;
use nalgebra::{UnitQuaternion, Vector3};
use rigpose_core::{deform, DeformConfig, DeformRequest, MotionTracks};

#[test]
fn zero_ratio_morphs_leave_the_pose_untouched() {
    common::init_tracing();
    let skel = common::skeleton("face");
    let tracks = common::motion("face-nod");
    let config = DeformConfig::default();

    let morphed = deform(&skel, &tracks, &DeformRequest::new(0.0), &config);
    let plain = deform(&skel, &MotionTracks::new(), &DeformRequest::new(0.0), &config);
    for i in plain.bones.resolved_indices() {
        assert_eq!(
            morphed.bones.get(i).unwrap().global_matrix,
            plain.bones.get(i).unwrap().global_matrix
        );
    }
    assert!(morphed.morphs.vertices.is_empty());
    assert_eq!(morphed.morphs.morphed_materials(&skel), skel.materials().to_vec());
}

#[test]
fn bone_morph_rotates_head_and_carries_the_jaw() {
    common::init_tracing();
    let skel = common::skeleton("face");
    let tracks = common::motion("face-nod");
    let config = DeformConfig::default();

    let deltas = deform(&skel, &tracks, &DeformRequest::new(10.0), &config);
    let head = deltas.bones.get_by_name(&skel, "head").unwrap();
    assert_relative_eq!(head.total_rotation.angle(), 30f64.to_radians(), epsilon = 1e-5);
    assert_relative_eq!(head.global_position, Vector3::new(0.0, 15.0, 0.0), epsilon = 1e-12);

    // jaw offset (0, -0.3, -0.4) swung 30 degrees about x by the head, plus the
    // "open" morph translation driven through "talk" at 0.8
    let jaw = deltas.bones.get_by_name(&skel, "jaw").unwrap();
    let swing = UnitQuaternion::from_axis_angle(&Vector3::x_axis(), 30f64.to_radians());
    let expected = Vector3::new(0.0, 15.0, 0.0)
        + swing * (Vector3::new(0.0, -0.3, -0.4) + Vector3::new(0.0, -0.16, 0.0));
    assert_relative_eq!(jaw.global_position, expected, epsilon = 1e-5);
}

#[test]
fn morph_ratio_interpolates_between_keys() {
    let skel = common::skeleton("face");
    let tracks = common::motion("face-nod");
    let deltas = deform(&skel, &tracks, &DeformRequest::new(5.0), &DeformConfig::default());
    let head = deltas.bones.get_by_name(&skel, "head").unwrap();
    assert_relative_eq!(head.total_rotation.angle(), 15f64.to_radians(), epsilon = 1e-5);
}

#[test]
fn group_morph_drives_vertex_children() {
    let skel = common::skeleton("face");
    let tracks = common::motion("face-nod");
    let deltas = deform(&skel, &tracks, &DeformRequest::new(10.0), &DeformConfig::default());

    // talk 0.8 -> puff 0.4
    assert_relative_eq!(deltas.morphs.vertex(3).unwrap().position.x, 0.04, epsilon = 1e-12);
    assert_relative_eq!(deltas.morphs.vertex(4).unwrap().position.x, -0.04, epsilon = 1e-12);
    assert!(deltas.morphs.vertex(0).is_none());

    let jaw = skel.index_of("jaw").unwrap();
    assert_relative_eq!(deltas.morphs.bone(jaw).unwrap().position.y, -0.16, epsilon = 1e-12);
}

#[test]
fn material_morph_multiplies_then_adds() {
    let skel = common::skeleton("face");
    let tracks = common::motion("face-nod");
    let deltas = deform(&skel, &tracks, &DeformRequest::new(10.0), &DeformConfig::default());
    let materials = deltas.morphs.morphed_materials(&skel);

    assert_relative_eq!(materials[0].diffuse[0], 0.8 + 0.2, epsilon = 1e-12);
    assert_relative_eq!(materials[0].diffuse[1], 0.35, epsilon = 1e-12);
    assert_relative_eq!(materials[1].diffuse[0], 0.2, epsilon = 1e-12);
    assert_relative_eq!(materials[1].diffuse[1], 0.1, epsilon = 1e-12);
    assert_relative_eq!(materials[1].edge_size, 1.0, epsilon = 1e-12);
}
