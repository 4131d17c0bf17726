use approx::assert_relative_eq;
use fused_kernel::ops::{
    Add, Cast, Crop, Div, Mul, PerThreadRead, PerThreadWrite, Resize, SaturateCast, Sub,
};
use fused_kernel::{
    BatchRead, BinaryBehavior, BlockShape, DispatchConfig, Executor, FusionError,
    IncompleteReadBackBehavior, Node, NodeKind, Pipeline, ReadBehavior, Rect, Size, Tensor,
    UnaryBehavior, WriteBehavior,
};
use rand::{rngs::StdRng, Rng, SeedableRng};

fn coordinates(width: u32, height: u32) -> Tensor<[f32; 2]> {
    Tensor::from_fn(width, height, 1, |x, y, _| [x as f32, y as f32])
}

fn random_plane(width: u32, height: u32, seed: u64) -> Tensor<f32> {
    let mut rng = StdRng::seed_from_u64(seed);
    Tensor::from_fn(width, height, 1, |_, _, _| rng.gen_range(-100.0..100.0))
}

fn assert_planes_eq(a: &Tensor<f32>, b: &Tensor<f32>) {
    for (x, y) in a.to_vec().iter().zip(b.to_vec()) {
        assert_relative_eq!(*x, y, epsilon = 1e-6);
    }
}

#[test]
fn test_crop_resize_mul_over_full_hd() {
    let input = coordinates(1920, 1080);
    let chain = || {
        vec![
            PerThreadRead::<[f32; 2]>::build(input.clone()).unwrap(),
            Crop::build(Rect::new(128, 256, 64, 64)).unwrap(),
            Resize::build(Size::new(16, 16)).unwrap(),
            Mul::<[f32; 2]>::build([3.0, 5.0]).unwrap(),
        ]
    };

    // Handed to the executor as separate nodes.
    let out_args = Tensor::<[f32; 2]>::new_2d(16, 16);
    let mut nodes = chain();
    nodes.push(PerThreadWrite::<[f32; 2]>::build(out_args.clone()).unwrap());
    Executor::run(&DispatchConfig::default(), &nodes).unwrap();

    // Fused incrementally with `then` before dispatch.
    let out_fused = Tensor::<[f32; 2]>::new_2d(16, 16);
    let steps = chain();
    let fused = steps[0].then_all(&steps[1..]).unwrap();
    assert_eq!(fused.kind(), NodeKind::Read);
    Executor::run(
        &DispatchConfig::sequential(),
        &[fused, PerThreadWrite::<[f32; 2]>::build(out_fused.clone()).unwrap()],
    )
    .unwrap();

    for y in 0..16 {
        for x in 0..16 {
            let expected = [(128 + 4 * x) as f32 * 3.0, (256 + 4 * y) as f32 * 5.0];
            assert_eq!(out_args.get(x, y, 0), expected);
            assert_eq!(out_fused.get(x, y, 0), expected);
        }
    }
}

#[test]
fn test_fused_matches_stage_by_stage() {
    let (w, h) = (97, 61);
    let input = random_plane(w, h, 7);

    let fused = Tensor::<f32>::new_2d(w, h);
    Executor::run(
        &DispatchConfig::default(),
        &[
            PerThreadRead::<f32>::build(input.clone()).unwrap(),
            Mul::<f32>::build(1.5).unwrap(),
            Sub::<f32>::build(4.0).unwrap(),
            Div::<f32>::build(2.0).unwrap(),
            PerThreadWrite::<f32>::build(fused.clone()).unwrap(),
        ],
    )
    .unwrap();

    // One dispatch per stage through intermediate tensors.
    let a = Tensor::<f32>::new_2d(w, h);
    let b = Tensor::<f32>::new_2d(w, h);
    let c = Tensor::<f32>::new_2d(w, h);
    let stages: [(Tensor<f32>, Node, Tensor<f32>); 3] = [
        (input, Mul::<f32>::build(1.5).unwrap(), a.clone()),
        (a, Sub::<f32>::build(4.0).unwrap(), b.clone()),
        (b, Div::<f32>::build(2.0).unwrap(), c.clone()),
    ];
    for (src, op, dst) in stages {
        Executor::run(
            &DispatchConfig::sequential(),
            &[
                PerThreadRead::<f32>::build(src).unwrap(),
                op,
                PerThreadWrite::<f32>::build(dst).unwrap(),
            ],
        )
        .unwrap();
    }
    assert_planes_eq(&fused, &c);
}

#[test]
fn test_realizations_agree_on_large_domain() {
    let (w, h) = (512, 300);
    let input = random_plane(w, h, 11);
    let run = |config: DispatchConfig| {
        let out = Tensor::<f32>::new_2d(w, h);
        Executor::run(
            &config,
            &[
                PerThreadRead::<f32>::build(input.clone()).unwrap(),
                Add::<f32>::build(0.25).unwrap(),
                Mul::<f32>::build(-2.0).unwrap(),
                PerThreadWrite::<f32>::build(out.clone()).unwrap(),
            ],
        )
        .unwrap();
        out
    };
    let sequential = run(DispatchConfig::sequential());
    let parallel = run(DispatchConfig::parallel());
    let small_blocks = run(DispatchConfig::parallel().with_block(BlockShape::new(8, 2)));
    let fused = run(DispatchConfig::parallel().with_thread_fusion(true));
    assert_planes_eq(&sequential, &parallel);
    assert_planes_eq(&sequential, &small_blocks);
    assert_planes_eq(&sequential, &fused);
}

#[test]
fn test_thread_fusion_is_transparent() {
    for width in [37, 40, 1, 3] {
        let input = Tensor::<u8>::from_fn(width, 5, 1, |x, y, _| (x * 7 + y) as u8);
        let run = |thread_fusion: bool| {
            let out = Tensor::<u8>::new_2d(width, 5);
            let pipeline = Pipeline::from_chain(&[
                PerThreadRead::<u8>::build(input.clone()).unwrap(),
                Cast::<u8, f32>::build().unwrap(),
                Mul::<f32>::build(0.5).unwrap(),
                SaturateCast::<f32, u8>::build().unwrap(),
                PerThreadWrite::<u8>::build(out.clone()).unwrap(),
            ])
            .unwrap();
            let config = DispatchConfig::sequential().with_thread_fusion(thread_fusion);
            let factor = pipeline.thread_fusion(&config).elems_per_thread();
            pipeline.run(&config);
            (factor, out.plane(0))
        };
        let (k_off, plain) = run(false);
        let (k_on, fused) = run(true);
        assert_eq!(k_off, 1);
        assert_eq!(k_on, 4);
        assert_eq!(plain, fused, "width {width}");
    }
}

#[test]
fn test_construction_errors_name_both_sides() {
    let read = PerThreadRead::<f32>::build(random_plane(4, 4, 1)).unwrap();
    let err = read.then(&read).unwrap_err();
    assert!(matches!(err, FusionError::ReadContinuation { .. }));
    assert!(err.to_string().contains("Read"));

    let err = read.then(&Mul::<u8>::build(1).unwrap()).unwrap_err();
    let message = err.to_string();
    assert!(message.contains("PerThreadRead"), "{message}");
    assert!(message.contains("Mul"), "{message}");
    assert!(message.contains("u8"), "{message}");

    let err = read
        .then(&Crop::build(Rect::new(2, 2, 4, 4)).unwrap())
        .unwrap_err();
    assert!(matches!(err, FusionError::RectOutOfBounds { .. }));
}

#[test]
fn test_mid_write_keeps_intermediate() {
    let input = random_plane(20, 10, 3);
    let mid = Tensor::<f32>::new_2d(20, 10);
    let out = Tensor::<f32>::new_2d(20, 10);
    Executor::run(
        &DispatchConfig::default(),
        &[
            PerThreadRead::<f32>::build(input.clone()).unwrap(),
            Mul::<f32>::build(2.0).unwrap(),
            PerThreadWrite::<f32>::build_mid(mid.clone()).unwrap(),
            Add::<f32>::build(1.0).unwrap(),
            PerThreadWrite::<f32>::build(out.clone()).unwrap(),
        ],
    )
    .unwrap();
    for ((i, m), o) in input.to_vec().iter().zip(mid.to_vec()).zip(out.to_vec()) {
        assert_relative_eq!(m, i * 2.0, epsilon = 1e-6);
        assert_relative_eq!(o, i * 2.0 + 1.0, epsilon = 1e-6);
    }
}

#[test]
fn test_write_must_hold_read_domain() {
    let input = random_plane(8, 2, 5);

    // Rows of 8 would wrap into the next row of a 4x4 plane.
    let small = Tensor::<f32>::new_2d(4, 4);
    let err = Executor::run(
        &DispatchConfig::default(),
        &[
            PerThreadRead::<f32>::build(input.clone()).unwrap(),
            PerThreadWrite::<f32>::build(small.clone()).unwrap(),
        ],
    )
    .unwrap_err();
    assert!(matches!(err, FusionError::WriteOutOfBounds { .. }), "{err}");
    assert!(small.to_vec().iter().all(|&v| v == 0.0));

    let batch =
        BatchRead::build((0..3).map(|_| PerThreadRead::<f32>::build(input.clone()).unwrap()))
            .unwrap();
    let err = Executor::run(
        &DispatchConfig::default(),
        &[
            batch,
            PerThreadWrite::<f32>::build(Tensor::new(8, 2, 2)).unwrap(),
        ],
    )
    .unwrap_err();
    assert!(matches!(err, FusionError::WriteOutOfBounds { .. }), "{err}");
}
