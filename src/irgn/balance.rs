//! Rescaling of the unknowns between Gauss-Newton steps
//!
//! [`balance`] equalizes the Jacobian rows of all unknowns by moving scale
//! between the estimate and the model's `uk_scale`; the physical parameter
//! `x·uk_scale` and the signal derivative `J/uk_scale` stay unchanged.
//! [`gradient_ratio`] weights the finite-difference gradient of every
//! unknown so that the regularization acts on comparable magnitudes.

use crate::model::Model;
use crate::utils::gradient::{grad_inplace, SlabGeometry};
use crate::utils::simd_ops::norm_sqr;
use crate::volume::Volume;

/// Target norm of the balanced Jacobian, split evenly over the unknowns
const JACOBIAN_NORM: f64 = 1e3;
/// Target norm of the gradient weights of the H1 group
const RATIO_NORM: f64 = 1e3;

/// Norm of each unknown's Jacobian row over scans and voxels
///
/// `jac` is slice-major with channel `u * scans + n`.
pub fn jacobian_norms(jac: &Volume, unknowns: usize, scans: usize) -> Vec<f64> {
    let block = jac.shape().plane();
    let mut acc = vec![0.0f64; unknowns];
    for (idx, chunk) in jac.as_slice().chunks(block).enumerate() {
        let u = (idx % (unknowns * scans)) / scans;
        acc[u] += norm_sqr(chunk);
    }
    acc.into_iter().map(f64::sqrt).collect()
}

/// Multiply every block of unknown `u` of a slice-major volume by `factor(u)`
fn scale_unknowns(vol: &mut Volume, channels: usize, group: usize, factor: impl Fn(usize) -> f32) {
    let block = vol.shape().plane() * vol.shape().comps;
    for (idx, chunk) in vol.as_mut_slice().chunks_mut(block).enumerate() {
        let f = factor((idx % channels) / group);
        for v in chunk.iter_mut() {
            *v *= f;
        }
    }
}

/// Rebalance the Jacobian rows to norm `1000/sqrt(unknowns)`
///
/// Updates the model's constraints and `uk_scale`, and rescales the
/// slice-major estimate `x` and Jacobian `jac` consistently. Returns the
/// applied per-unknown factors (non-finite factors are replaced by 1).
pub fn balance(model: &mut dyn Model, x: &mut Volume, jac: &mut Volume, scans: usize) -> Vec<f32> {
    let unknowns = model.unknowns();
    let norms = jacobian_norms(jac, unknowns, scans);
    log::debug!("jacobian norms before balancing: {:?}", norms);

    let scales: Vec<f32> = norms
        .iter()
        .map(|&n| {
            let s = (JACOBIAN_NORM / (unknowns as f64).sqrt() / n) as f32;
            if s.is_finite() {
                s
            } else {
                1.0
            }
        })
        .collect();

    let mut x_factor = vec![1.0f32; unknowns];
    let mut jac_factor = vec![1.0f32; unknowns];
    for (u, &scale) in scales.iter().enumerate() {
        model.constraints_mut()[u].update(scale);
        let old = model.uk_scale()[u];
        let new = old * scale;
        model.uk_scale_mut()[u] = new;
        x_factor[u] = old / new;
        jac_factor[u] = new / old;
    }

    scale_unknowns(x, unknowns, 1, |u| x_factor[u]);
    scale_unknowns(jac, unknowns * scans, scans, |u| jac_factor[u]);
    scales
}

/// Per-unknown gradient weights for the estimate `x` (slice-major)
///
/// `1/‖∇x_u‖`, normalized to `1000/sqrt(slices)` over the TV/TGV group and
/// to `1000` over the H1 group.
pub fn gradient_ratio(x: &Volume, unknowns_tgv: usize, dz: f32) -> Vec<f32> {
    let shape = x.shape();
    let unknowns = shape.channels;
    let mut grad = Volume::zeros(shape.with_comps(3));
    grad_inplace(
        grad.as_mut_slice(),
        x.as_slice(),
        shape,
        &SlabGeometry::whole(shape.slices, dz),
        &vec![1.0; unknowns],
    );

    let mut norms = vec![0.0f64; unknowns];
    for (idx, chunk) in grad.as_slice().chunks(shape.plane() * 3).enumerate() {
        norms[idx % unknowns] += norm_sqr(chunk);
    }
    let inv: Vec<f64> = norms
        .iter()
        .map(|n| {
            let s = 1.0 / n.sqrt();
            if s.is_finite() {
                s
            } else {
                1.0
            }
        })
        .collect();

    let split = unknowns_tgv.min(unknowns);
    let group_norm = |group: &[f64]| group.iter().map(|s| s * s).sum::<f64>().sqrt();
    let tgv_sum = group_norm(&inv[..split]) / (1000.0 / (shape.slices as f64).sqrt());
    let h1_sum = group_norm(&inv[split..]) / RATIO_NORM;

    inv.iter()
        .enumerate()
        .map(|(u, &s)| {
            let r = (s / if u < split { tgv_sum } else { h1_sum }) as f32;
            if r.is_finite() {
                r
            } else {
                1.0
            }
        })
        .collect()
}
