use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rigpose_core::{deform, DeformConfig, DeformRequest, MotionTracks, Skeleton};

fn load(skeleton: &str, motion: &str) -> (Skeleton, MotionTracks) {
    let skel_json = rigpose_test_fixtures::skeletons::json(skeleton).expect("skeleton fixture");
    let motion_json = rigpose_test_fixtures::motions::json(motion).expect("motion fixture");
    (
        Skeleton::from_json_str(&skel_json).expect("skeleton"),
        MotionTracks::from_json_str(&motion_json).expect("motion"),
    )
}

fn bench_deform(c: &mut Criterion) {
    let config = DeformConfig::default();

    for (skeleton, motion) in [("arm", "arm-reach"), ("leg", "leg-walk"), ("face", "face-nod")] {
        let (skel, tracks) = load(skeleton, motion);
        c.bench_function(&format!("deform_{skeleton}"), |b| {
            let mut frame = 0.0f32;
            b.iter(|| {
                frame = (frame + 1.0) % 30.0;
                let deltas = deform(&skel, &tracks, &DeformRequest::new(frame), &config);
                black_box(deltas);
            })
        });
    }

    let (skel, tracks) = load("leg", "leg-walk");
    c.bench_function("deform_leg_single_bone", |b| {
        b.iter(|| {
            let request = DeformRequest::new(12.0).with_bones(&["toe"]);
            black_box(deform(&skel, &tracks, &request, &config));
        })
    });
}

criterion_group!(benches, bench_deform);
criterion_main!(benches);
