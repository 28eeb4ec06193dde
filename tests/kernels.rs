use approx::assert_abs_diff_eq;

use backprop_kernels::backend::ThreadingType;
use backprop_kernels::ops::dispatch::kernels_for;
use backprop_kernels::ops::{neuron_error, HiddenLayer, WeightUpdate};

/// Deterministic values in `[-1, 1)`.
fn values(seed: u32, len: usize) -> Vec<f32> {
    let mut state = seed.wrapping_mul(747_796_405).wrapping_add(2_891_336_453);
    (0..len)
        .map(|_| {
            state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
            (state >> 8) as f32 / (1u32 << 23) as f32 - 1.0
        })
        .collect()
}

#[test]
fn cpu_and_gpu_layer_errors_agree() {
    let cpu = kernels_for(ThreadingType::Cpu, 3).unwrap();
    let gpu = kernels_for(ThreadingType::Gpu, 3).unwrap();

    for af_type in 0..=6u8 {
        let weighted_sum = values(1, 17);
        let next_weights = values(2, 17 * 5);
        let next_error = values(3, 5);
        let layer = HiddenLayer {
            weighted_sum: &weighted_sum,
            af_type,
            next_weights: &next_weights,
            next_error: &next_error,
        };

        let a = cpu.layer_error(&layer);
        let b = gpu.layer_error(&layer);
        assert_eq!(a.len(), 17);
        assert_eq!(b.len(), 17);
        for gid in 0..17 {
            assert_abs_diff_eq!(a[gid], b[gid], epsilon = 1e-5);
            assert_abs_diff_eq!(a[gid], neuron_error(&layer, gid), epsilon = 1e-6);
        }
    }
}

#[test]
fn cpu_and_gpu_weight_updates_agree() {
    let cpu = kernels_for(ThreadingType::Cpu, 4).unwrap();
    let gpu = kernels_for(ThreadingType::Gpu, 4).unwrap();

    let error = values(4, 9);
    let input = values(5, 6);
    let start_weights = values(6, 9 * 6);
    let start_bias = values(7, 9);

    let mut cpu_weights = start_weights.clone();
    let mut cpu_bias = start_bias.clone();
    cpu.update_weights(WeightUpdate {
        weights: &mut cpu_weights,
        bias_weights: &mut cpu_bias,
        error: &error,
        input: &input,
        learning_rate: 0.3,
    });

    let mut gpu_weights = start_weights.clone();
    let mut gpu_bias = start_bias.clone();
    gpu.update_weights(WeightUpdate {
        weights: &mut gpu_weights,
        bias_weights: &mut gpu_bias,
        error: &error,
        input: &input,
        learning_rate: 0.3,
    });

    for (i, (a, b)) in cpu_weights.iter().zip(&gpu_weights).enumerate() {
        assert_abs_diff_eq!(*a, *b, epsilon = 1e-6);
        let (gid, prev) = (i / 6, i % 6);
        let expected = start_weights[i] + error[gid] * input[prev] * 0.3;
        assert_abs_diff_eq!(*a, expected, epsilon = 1e-6);
    }
    for (gid, (a, b)) in cpu_bias.iter().zip(&gpu_bias).enumerate() {
        assert_abs_diff_eq!(*a, *b, epsilon = 1e-6);
        assert_abs_diff_eq!(*a, start_bias[gid] + error[gid] * 0.3, epsilon = 1e-6);
    }
}

#[test]
fn worker_count_does_not_change_results() {
    let one = kernels_for(ThreadingType::Cpu, 1).unwrap();
    let many = kernels_for(ThreadingType::Cpu, 8).unwrap();

    let weighted_sum = values(8, 31);
    let next_weights = values(9, 31 * 4);
    let next_error = values(10, 4);
    let layer = HiddenLayer {
        weighted_sum: &weighted_sum,
        af_type: 5,
        next_weights: &next_weights,
        next_error: &next_error,
    };

    assert_eq!(one.layer_error(&layer), many.layer_error(&layer));
}

#[test]
fn extreme_sums_agree_across_modes() {
    let cpu = kernels_for(ThreadingType::Cpu, 2).unwrap();
    let gpu = kernels_for(ThreadingType::Gpu, 2).unwrap();

    let weighted_sum = [-1000.0, -100.0, -90.0, -50.0, 50.0, 90.0, 100.0, 1000.0];
    let next_weights = values(11, 8 * 3);
    let next_error = values(12, 3);

    for af_type in 1..=6u8 {
        let layer = HiddenLayer {
            weighted_sum: &weighted_sum,
            af_type,
            next_weights: &next_weights,
            next_error: &next_error,
        };
        let a = cpu.layer_error(&layer);
        let b = gpu.layer_error(&layer);
        for gid in 0..weighted_sum.len() {
            assert!(a[gid].is_finite() && b[gid].is_finite(), "af_type {af_type} gid {gid}");
            assert_abs_diff_eq!(a[gid], b[gid], epsilon = 1e-5);
        }
    }
}
