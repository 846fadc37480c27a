//! End-to-end pipeline tests: operator lifecycle, scoped workspace memory,
//! parallel execution, and the weights cache working together

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use cuantizar::{
    allocate_persistent, Buffer, CuantizarError, DataType, GemmInfo, MemoryGroup,
    OutputStageInfo, QuantizationInfo, QuantizedMatMulOperator, RhsPackTransform, Scheduler,
    SlotId, Tensor, TensorDescriptor, TensorPack, WeightsManager,
};

fn quant_u8(shape: Vec<usize>, data: Vec<u8>, zero_point: i32) -> Tensor {
    let q = QuantizationInfo::per_tensor(1.0, zero_point).unwrap();
    Tensor::new(
        TensorDescriptor::quantized(shape, DataType::QAsymmU8, q).locked(),
        Buffer::U8(data),
    )
    .unwrap()
}

/// Full pipeline: configure, allocate persistent + pooled transient
/// workspace, run through a scheduler.
fn run_pipeline(
    lhs: &Tensor,
    rhs: &Tensor,
    bias: Option<&Tensor>,
    info: GemmInfo,
    threads: usize,
) -> Tensor {
    let mut dst_desc = TensorDescriptor::new(vec![], DataType::S32);
    let mut op = QuantizedMatMulOperator::configure(
        lhs.descriptor(),
        rhs.descriptor(),
        bias.map(Tensor::descriptor),
        &mut dst_desc,
        info,
    )
    .unwrap();
    let mut dst = Tensor::zeroed(dst_desc);
    let mut persistent = allocate_persistent(op.workspace());
    let group = MemoryGroup::new();
    let scheduler = Scheduler::new(threads).unwrap();

    let mut scope = group.acquire_scope(op.workspace());
    let mut pack = TensorPack::new();
    pack.bind_const(SlotId::Lhs, lhs);
    pack.bind_const(SlotId::Rhs, rhs);
    if let Some(b) = bias {
        pack.bind_const(SlotId::Bias, b);
    }
    pack.bind(SlotId::Dst, &mut dst);
    for (slot, t) in &mut persistent {
        pack.bind(*slot, t);
    }
    scope.bind_transient(&mut pack);
    op.run(&scheduler, &mut pack).unwrap();
    drop(pack);
    drop(scope);
    dst
}

#[test]
fn test_known_product() {
    let lhs = quant_u8(vec![2, 3], vec![1, 2, 3, 4, 5, 6], 0);
    let rhs = quant_u8(vec![3, 2], vec![1, 0, 0, 1, 1, 1], 0);
    let dst = run_pipeline(&lhs, &rhs, None, GemmInfo::default(), 2);
    assert_eq!(dst.as_i32().unwrap(), &[4, 5, 10, 11]);
}

#[test]
fn test_offsets_against_naive_reference() {
    let (m, k, n) = (3, 4, 2);
    let a: Vec<u8> = vec![9, 1, 4, 7, 2, 8, 5, 3, 6, 0, 2, 9];
    let b: Vec<u8> = vec![1, 5, 2, 6, 3, 7, 4, 8];
    let (a_off, b_off) = (-2, -1);
    let lhs = quant_u8(vec![m, k], a.clone(), a_off);
    let rhs = quant_u8(vec![k, n], b.clone(), b_off);

    let mut expected = vec![0i32; m * n];
    for i in 0..m {
        for c in 0..n {
            for j in 0..k {
                expected[i * n + c] +=
                    (i32::from(a[i * k + j]) + a_off) * (i32::from(b[j * n + c]) + b_off);
            }
        }
    }
    let dst = run_pipeline(&lhs, &rhs, None, GemmInfo::default(), 2);
    assert_eq!(dst.as_i32().unwrap(), expected.as_slice());
}

#[test]
fn test_parallel_run_matches_sequential() {
    // Enough rows to engage the worker pool
    let (m, k, n) = (64, 5, 9);
    let mut rng = StdRng::seed_from_u64(0x5EED);
    let a: Vec<u8> = (0..m * k).map(|_| rng.gen()).collect();
    let b: Vec<u8> = (0..k * n).map(|_| rng.gen()).collect();
    let lhs = quant_u8(vec![m, k], a, -7);
    let rhs = quant_u8(vec![k, n], b, 3);

    let sequential = run_pipeline(&lhs, &rhs, None, GemmInfo::default(), 1);
    let parallel = run_pipeline(&lhs, &rhs, None, GemmInfo::default(), 4);
    assert_eq!(
        sequential.as_i32().unwrap(),
        parallel.as_i32().unwrap()
    );
}

#[test]
fn test_requantize_saturates_to_upper_bound() {
    // acc = 1000, multiplier 0.5, offset 10, bounds [0, 255] -> 255
    let lhs = quant_u8(vec![1, 1], vec![50], 0);
    let rhs = quant_u8(vec![1, 1], vec![20], 0);
    let info = GemmInfo::with_output_stage(OutputStageInfo::quantize_down_float(
        0.5,
        10,
        0,
        255,
        DataType::QAsymmU8,
    ));
    let dst = run_pipeline(&lhs, &rhs, None, info, 1);
    assert_eq!(dst.as_u8().unwrap(), &[255]);
}

#[test]
fn test_bias_folds_before_requantization() {
    // acc = 100, bias = 50, multiplier 0.5, offset 10 -> 85
    let lhs = quant_u8(vec![1, 1], vec![10], 0);
    let rhs = quant_u8(vec![1, 1], vec![10], 0);
    let bias = Tensor::new(
        TensorDescriptor::new(vec![1], DataType::S32).locked(),
        Buffer::I32(vec![50]),
    )
    .unwrap();
    let info = GemmInfo::with_output_stage(OutputStageInfo::quantize_down_float(
        0.5,
        10,
        0,
        255,
        DataType::QAsymmU8,
    ));
    let dst = run_pipeline(&lhs, &rhs, Some(&bias), info, 1);
    assert_eq!(dst.as_u8().unwrap(), &[85]);
}

#[test]
fn test_fused_bounded_relu() {
    // Clamp [0, 6] acts as ReLU6 with no separate activation pass
    let lhs = quant_u8(vec![1, 2], vec![1, 1], 0);
    let rhs = quant_u8(vec![2, 3], vec![0, 4, 9, 0, 0, 0], 0);
    let info = GemmInfo::with_output_stage(OutputStageInfo::quantize_down(
        1,
        0,
        0,
        0,
        6,
        DataType::QAsymmU8,
    ));
    let dst = run_pipeline(&lhs, &rhs, None, info, 1);
    assert_eq!(dst.as_u8().unwrap(), &[0, 4, 6]);
}

#[test]
fn test_s16_output_fixed_point() {
    // 0.5 in Q31, accumulators scaled and narrowed into i16
    let lhs = quant_u8(vec![1, 2], vec![100, 100], 0);
    let rhs = quant_u8(vec![2, 1], vec![200, 200], 0);
    let info = GemmInfo::with_output_stage(OutputStageInfo::quantize_down_fixed_point(
        1 << 30,
        0,
        0,
        -32768,
        32767,
        DataType::QSymmS16,
    ));
    let dst = run_pipeline(&lhs, &rhs, None, info, 1);
    // (100*200 + 100*200) * 0.5 = 20000
    assert_eq!(dst.as_i16().unwrap(), &[20000]);
}

#[test]
fn test_f32_output_dequantizes() {
    let lhs = quant_u8(vec![1, 2], vec![3, 4], 0);
    let rhs = quant_u8(vec![2, 1], vec![2, 2], 0);
    let info = GemmInfo::with_output_stage(OutputStageInfo::quantize_down_float(
        0.25,
        0,
        0,
        0,
        DataType::F32,
    ));
    let dst = run_pipeline(&lhs, &rhs, None, info, 1);
    // (3*2 + 4*2) * 0.25 = 3.5
    let out = dst.as_f32().unwrap();
    assert!((out[0] - 3.5).abs() < 1e-6);
}

#[test]
fn test_dynamic_zero_point_applies_next_run() {
    let data = vec![10u8, 20];
    let lhs = Tensor::new(
        TensorDescriptor::quantized(
            vec![1, 2],
            DataType::QAsymmU8,
            QuantizationInfo::per_tensor(1.0, 0).unwrap(),
        )
        .locked()
        .dynamic(),
        Buffer::U8(data),
    )
    .unwrap();
    let rhs = quant_u8(vec![2, 1], vec![1, 1], 0);

    let mut dst_desc = TensorDescriptor::new(vec![], DataType::S32);
    let mut op = QuantizedMatMulOperator::configure(
        lhs.descriptor(),
        rhs.descriptor(),
        None,
        &mut dst_desc,
        GemmInfo::default(),
    )
    .unwrap();
    let mut dst = Tensor::zeroed(dst_desc);
    let mut scratch: Vec<(SlotId, Tensor)> = op
        .workspace()
        .iter()
        .map(|r| (r.slot, Tensor::zeroed(r.descriptor.clone())))
        .collect();
    let scheduler = Scheduler::new(1).unwrap();

    let mut run = |lhs: &Tensor, dst: &mut Tensor, scratch: &mut Vec<(SlotId, Tensor)>| {
        let mut pack = TensorPack::new();
        pack.bind_const(SlotId::Lhs, lhs);
        pack.bind_const(SlotId::Rhs, &rhs);
        pack.bind(SlotId::Dst, dst);
        for (slot, t) in scratch.iter_mut() {
            pack.bind(*slot, t);
        }
        op.run(&scheduler, &mut pack).unwrap();
    };

    run(&lhs, &mut dst, &mut scratch);
    assert_eq!(dst.as_i32().unwrap(), &[30]);

    // Updating the dynamic descriptor shifts the effective inputs by -5
    let mut shifted = lhs.clone();
    shifted
        .descriptor_mut()
        .set_quantization(QuantizationInfo::per_tensor(1.0, -5).unwrap())
        .unwrap();
    run(&shifted, &mut dst, &mut scratch);
    assert_eq!(dst.as_i32().unwrap(), &[20]);
}

#[test]
fn test_memory_group_reuses_scratch_across_runs() {
    let lhs = quant_u8(vec![4, 3], (0..12).collect(), -1);
    let rhs = quant_u8(vec![3, 5], (0..15).collect(), 1);
    let mut dst_desc = TensorDescriptor::new(vec![], DataType::S32);
    let mut op = QuantizedMatMulOperator::configure(
        lhs.descriptor(),
        rhs.descriptor(),
        None,
        &mut dst_desc,
        GemmInfo::default(),
    )
    .unwrap();
    let mut dst = Tensor::zeroed(dst_desc);
    let group = MemoryGroup::new();
    let scheduler = Scheduler::new(1).unwrap();

    let mut first: Vec<i32> = vec![];
    for pass in 0..3 {
        let mut scope = group.acquire_scope(op.workspace());
        let mut pack = TensorPack::new();
        pack.bind_const(SlotId::Lhs, &lhs);
        pack.bind_const(SlotId::Rhs, &rhs);
        pack.bind(SlotId::Dst, &mut dst);
        scope.bind_transient(&mut pack);
        op.run(&scheduler, &mut pack).unwrap();
        drop(pack);
        drop(scope);
        if pass == 0 {
            first = dst.as_i32().unwrap().to_vec();
        } else {
            assert_eq!(dst.as_i32().unwrap(), first.as_slice());
        }
    }
    // Buffers went back to the pool after every pass
    assert!(group.pooled_buffers() > 0);
}

#[test]
fn test_weights_manager_shares_packed_rhs() {
    let mgr = Arc::new(WeightsManager::new());
    let weights = quant_u8(vec![4, 6], (0..24).collect(), 0);
    let id = mgr.manage(weights, None).unwrap();

    // Two consumers acquire the same packed layout
    let w1 = mgr.acquire(id, &RhsPackTransform).unwrap();
    let w2 = mgr.acquire(id, &RhsPackTransform).unwrap();
    assert!(Arc::ptr_eq(&w1, &w2));

    mgr.mark_as_unused(id).unwrap();
    assert!(mgr.is_managed(id));
    // Registration + two acquisitions: the last release frees
    mgr.release(id).unwrap();
    mgr.release(id).unwrap();
    assert!(mgr.is_managed(id));
    mgr.release(id).unwrap();
    assert!(!mgr.is_managed(id));

    // Released handles are rejected afterwards
    assert!(matches!(
        mgr.run(id, &RhsPackTransform).unwrap_err(),
        CuantizarError::UnmanagedTensor { .. }
    ));
}

#[test]
fn test_lifecycle_missing_workspace_is_reported() {
    let lhs = quant_u8(vec![2, 2], vec![1, 2, 3, 4], 0);
    let rhs = quant_u8(vec![2, 2], vec![1, 0, 0, 1], 0);
    let mut dst_desc = TensorDescriptor::new(vec![], DataType::S32);
    let mut op = QuantizedMatMulOperator::configure(
        lhs.descriptor(),
        rhs.descriptor(),
        None,
        &mut dst_desc,
        GemmInfo::default(),
    )
    .unwrap();
    let mut dst = Tensor::zeroed(dst_desc);
    let scheduler = Scheduler::new(1).unwrap();

    let mut pack = TensorPack::new();
    pack.bind_const(SlotId::Lhs, &lhs);
    pack.bind_const(SlotId::Rhs, &rhs);
    pack.bind(SlotId::Dst, &mut dst);
    assert!(matches!(
        op.run(&scheduler, &mut pack).unwrap_err(),
        CuantizarError::MissingWorkspace { .. }
    ));
}
