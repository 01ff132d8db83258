use kernel_dispatch::kernels::validate_indices;
use kernel_dispatch::*;
use rand::Rng;

fn random_tensor(shape: &[usize], device: DeviceType) -> Tensor {
    let mut rng = rand::rng();
    let len = shape.iter().product();
    let data = (0..len).map(|_| rng.random_range(-4.0..4.0)).collect();
    Tensor::from_f32(shape.to_vec(), data, device)
}

fn assert_close(actual: &[f32], expected: &[f32], tol: f32) {
    assert_eq!(actual.len(), expected.len());
    for (i, (a, e)) in actual.iter().zip(expected).enumerate() {
        assert!((a - e).abs() <= tol, "element {i}: {a} != {e}");
    }
}

#[test]
fn test_rmsnorm_of_ones() {
    let registry = KernelRegistry::cpu();
    let kernel = registry.resolve_rmsnorm(DeviceType::Cpu).unwrap();

    let input = Tensor::from_f32(vec![4], vec![1.0; 4], DeviceType::Cpu);
    let weight = Tensor::from_f32(vec![4], vec![1.0; 4], DeviceType::Cpu);
    let mut out = Tensor::zeros(DataType::Fp32, vec![4], DeviceType::Cpu);
    kernel.launch(&input, &weight, &mut out, StreamHandle::NULL).unwrap();

    assert_close(out.as_f32().unwrap(), &[1.0; 4], 1e-4);
}

#[test]
fn test_rmsnorm_uses_configured_eps() {
    let config = KernelConfig::cpu_only().with_eps(3.0);
    let registry = KernelRegistry::from_config(&config).unwrap();
    let kernel = registry.resolve_rmsnorm(DeviceType::Cpu).unwrap();

    // mean square 1, so scale = 1 / sqrt(1 + 3)
    let input = Tensor::from_f32(vec![2], vec![1.0, -1.0], DeviceType::Cpu);
    let weight = Tensor::from_f32(vec![2], vec![1.0, 1.0], DeviceType::Cpu);
    let mut out = Tensor::zeros(DataType::Fp32, vec![2], DeviceType::Cpu);
    kernel.launch(&input, &weight, &mut out, StreamHandle::NULL).unwrap();

    assert_close(out.as_f32().unwrap(), &[0.5, -0.5], 1e-6);
}

#[test]
fn test_add_example_and_mismatch() {
    let registry = KernelRegistry::cpu();
    let add = registry.resolve_add(DeviceType::Cpu).unwrap();

    let a = Tensor::from_f32(vec![3], vec![1.0, 2.0, 3.0], DeviceType::Cpu);
    let b = Tensor::from_f32(vec![3], vec![4.0, 5.0, 6.0], DeviceType::Cpu);
    let mut out = Tensor::zeros(DataType::Fp32, vec![3], DeviceType::Cpu);
    add.launch(&a, &b, &mut out, StreamHandle::NULL).unwrap();
    assert_eq!(out.as_f32().unwrap(), &[5.0, 7.0, 9.0]);

    let short = Tensor::from_f32(vec![2], vec![1.0, 1.0], DeviceType::Cpu);
    let err = add.launch(&a, &short, &mut out, StreamHandle::NULL).unwrap_err();
    assert!(matches!(err, KernelError::ShapeMismatch { .. }));
    assert_eq!(out.as_f32().unwrap(), &[5.0, 7.0, 9.0]);
}

#[test]
fn test_add_rejects_wrong_output_shape() {
    let registry = KernelRegistry::cpu();
    let kernel = registry.resolve_add(DeviceType::Cpu).unwrap();
    let a = random_tensor(&[2, 3], DeviceType::Cpu);
    let b = random_tensor(&[2, 3], DeviceType::Cpu);
    let mut out = Tensor::zeros(DataType::Fp32, vec![3, 2], DeviceType::Cpu);

    assert!(matches!(
        kernel.launch(&a, &b, &mut out, StreamHandle::NULL),
        Err(KernelError::ShapeMismatch { arg: "output", .. })
    ));
}

#[test]
fn test_embedding_example() {
    let registry = KernelRegistry::cpu();
    let embed = registry.resolve_embedding(DeviceType::Cpu).unwrap();

    let weight = Tensor::from_f32(
        vec![3, 2],
        vec![0.0, 0.0, 1.0, 1.0, 2.0, 2.0],
        DeviceType::Cpu,
    );
    let tokens = Tensor::from_i32(vec![3], vec![2, 0, 1], DeviceType::Cpu);
    let mut out = Tensor::zeros(DataType::Fp32, vec![3, 2], DeviceType::Cpu);

    validate_indices(&tokens, 3).unwrap();
    embed.launch(&tokens, &weight, &mut out, 3, StreamHandle::NULL).unwrap();

    assert_eq!(out.as_f32().unwrap(), &[2.0, 2.0, 0.0, 0.0, 1.0, 1.0]);
}

#[test]
fn test_embedding_rejects_vocab_disagreeing_with_weight() {
    let registry = KernelRegistry::cpu();
    let embed = registry.resolve_embedding(DeviceType::Cpu).unwrap();

    let weight = Tensor::zeros(DataType::Fp32, vec![3, 2], DeviceType::Cpu);
    let tokens = Tensor::from_i32(vec![1], vec![0], DeviceType::Cpu);
    let mut out = Tensor::zeros(DataType::Fp32, vec![1, 2], DeviceType::Cpu);

    assert!(matches!(
        embed.launch(&tokens, &weight, &mut out, 4, StreamHandle::NULL),
        Err(KernelError::ShapeMismatch { arg: "weight", .. })
    ));
}

#[test]
fn test_validate_indices_catches_bad_tokens() {
    let tokens = Tensor::from_i32(vec![4], vec![0, 1, 7, 2], DeviceType::Cpu);
    let err = validate_indices(&tokens, 5).unwrap_err();
    assert!(matches!(
        err,
        KernelError::IndexOutOfRange {
            index: 7,
            position: 2,
            vocab_size: 5
        }
    ));
}

#[test]
fn test_resolving_twice_is_idempotent() {
    let registry = KernelRegistry::cpu();
    let input = random_tensor(&[5, 16], DeviceType::Cpu);
    let weight = random_tensor(&[16], DeviceType::Cpu);

    let mut first = Tensor::zeros(DataType::Fp32, vec![5, 16], DeviceType::Cpu);
    let mut second = Tensor::zeros(DataType::Fp32, vec![5, 16], DeviceType::Cpu);
    registry
        .resolve_rmsnorm(DeviceType::Cpu)
        .unwrap()
        .launch(&input, &weight, &mut first, StreamHandle::NULL)
        .unwrap();
    registry
        .resolve_rmsnorm(DeviceType::Cpu)
        .unwrap()
        .launch(&input, &weight, &mut second, StreamHandle::NULL)
        .unwrap();

    assert_eq!(first, second);
}

#[test]
fn test_device_isolation() {
    let registry = KernelRegistry::cpu();
    let rmsnorm = registry.resolve_rmsnorm(DeviceType::Cpu).unwrap();

    let input = random_tensor(&[2, 4], DeviceType::Gpu);
    let weight = random_tensor(&[4], DeviceType::Cpu);
    let mut out = Tensor::from_f32(vec![2, 4], vec![7.0; 8], DeviceType::Cpu);

    let err = rmsnorm
        .launch(&input, &weight, &mut out, StreamHandle::NULL)
        .unwrap_err();
    assert!(matches!(
        err,
        KernelError::DeviceMismatch {
            arg: "input",
            expected: DeviceType::Cpu,
            found: DeviceType::Gpu
        }
    ));
    assert_eq!(out.as_f32().unwrap(), &[7.0; 8]);
}

#[test]
fn test_wrong_dtype_is_rejected() {
    let registry = KernelRegistry::cpu();
    let add = registry.resolve_add(DeviceType::Cpu).unwrap();

    let ints = Tensor::from_i32(vec![2], vec![1, 2], DeviceType::Cpu);
    let floats = Tensor::from_f32(vec![2], vec![1.0, 2.0], DeviceType::Cpu);
    let mut out = Tensor::zeros(DataType::Fp32, vec![2], DeviceType::Cpu);

    assert!(matches!(
        add.launch(&ints, &floats, &mut out, StreamHandle::NULL),
        Err(KernelError::DataTypeMismatch {
            arg: "input1",
            expected: DataType::Fp32,
            found: DataType::Int32
        })
    ));
}

#[cfg(feature = "wgpu")]
mod gpu {
    use super::*;

    fn gpu_registry() -> Option<KernelRegistry> {
        let registry = KernelRegistry::from_config(&KernelConfig::new()).unwrap();
        if registry.is_supported(OpKind::Add, DeviceType::Gpu) {
            Some(registry)
        } else {
            eprintln!("no GPU adapter available, skipping");
            None
        }
    }

    fn on(device: DeviceType, t: &Tensor) -> Tensor {
        t.clone().to_device(device)
    }

    #[test]
    fn test_gpu_matches_cpu() {
        let Some(registry) = gpu_registry() else {
            return;
        };
        let stream = StreamHandle::from_raw(1);

        let a = random_tensor(&[3, 33], DeviceType::Cpu);
        let b = random_tensor(&[3, 33], DeviceType::Cpu);
        let w = random_tensor(&[33], DeviceType::Cpu);

        let mut cpu_sum = Tensor::zeros(DataType::Fp32, vec![3, 33], DeviceType::Cpu);
        let mut gpu_sum = Tensor::zeros(DataType::Fp32, vec![3, 33], DeviceType::Gpu);
        registry
            .resolve_add(DeviceType::Cpu)
            .unwrap()
            .launch(&a, &b, &mut cpu_sum, stream)
            .unwrap();
        registry
            .resolve_add(DeviceType::Gpu)
            .unwrap()
            .launch(&on(DeviceType::Gpu, &a), &on(DeviceType::Gpu, &b), &mut gpu_sum, stream)
            .unwrap();
        assert_close(gpu_sum.as_f32().unwrap(), cpu_sum.as_f32().unwrap(), 1e-6);

        let mut cpu_norm = Tensor::zeros(DataType::Fp32, vec![3, 33], DeviceType::Cpu);
        let mut gpu_norm = Tensor::zeros(DataType::Fp32, vec![3, 33], DeviceType::Gpu);
        registry
            .resolve_rmsnorm(DeviceType::Cpu)
            .unwrap()
            .launch(&a, &w, &mut cpu_norm, stream)
            .unwrap();
        registry
            .resolve_rmsnorm(DeviceType::Gpu)
            .unwrap()
            .launch(&on(DeviceType::Gpu, &a), &on(DeviceType::Gpu, &w), &mut gpu_norm, stream)
            .unwrap();
        assert_close(gpu_norm.as_f32().unwrap(), cpu_norm.as_f32().unwrap(), 1e-4);
    }

    #[test]
    fn test_gpu_embedding_zero_fills_out_of_range_rows() {
        let Some(registry) = gpu_registry() else {
            return;
        };
        let embed = registry.resolve_embedding(DeviceType::Gpu).unwrap();

        let weight = Tensor::from_f32(
            vec![3, 2],
            vec![0.0, 0.0, 1.0, 1.0, 2.0, 2.0],
            DeviceType::Gpu,
        );
        let tokens = Tensor::from_i32(vec![4], vec![2, 0, 9, 1], DeviceType::Gpu);
        let mut out = Tensor::from_f32(vec![4, 2], vec![5.0; 8], DeviceType::Gpu);
        embed
            .launch(&tokens, &weight, &mut out, 3, StreamHandle::NULL)
            .unwrap();

        assert_eq!(
            out.as_f32().unwrap(),
            &[2.0, 2.0, 0.0, 0.0, 0.0, 0.0, 1.0, 1.0]
        );
    }

    #[test]
    fn test_gpu_kernel_refuses_cpu_tensors() {
        let Some(registry) = gpu_registry() else {
            return;
        };
        let add = registry.resolve_add(DeviceType::Gpu).unwrap();
        let a = random_tensor(&[4], DeviceType::Cpu);
        let mut out = Tensor::zeros(DataType::Fp32, vec![4], DeviceType::Gpu);

        assert!(matches!(
            add.launch(&a, &a, &mut out, StreamHandle::NULL),
            Err(KernelError::DeviceMismatch { arg: "input1", .. })
        ));
    }
}
