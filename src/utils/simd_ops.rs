//! SIMD-accelerated reductions over complex buffers
//!
//! The primal-dual line search and the objective evaluation reduce large
//! complex chunks every iteration. When the `simd` feature is enabled the
//! inner loops run on 128-bit lanes (f32x4, two complex values per lane);
//! the running sum is flushed to f64 every block so long volumes do not lose
//! precision.
//!
//! All operations have scalar fallbacks when SIMD is disabled.

use num_complex::Complex64;

use crate::volume::Cpx;

#[cfg(feature = "simd")]
use wide::f32x4;

/// SIMD lane width in f32 (4 for f32x4)
#[cfg(feature = "simd")]
pub const SIMD_WIDTH: usize = 4;

#[cfg(not(feature = "simd"))]
pub const SIMD_WIDTH: usize = 1;

/// f32 values accumulated in a lane before flushing to f64
#[cfg(feature = "simd")]
const FLUSH_BLOCK: usize = 1024;

/// View a complex buffer as interleaved `[re, im, re, im, ...]`
#[cfg(feature = "simd")]
#[inline]
fn as_f32(a: &[Cpx]) -> &[f32] {
    // SAFETY: Complex<f32> is #[repr(C)] { re, im }, so a slice of n complex
    // values has the layout of 2n contiguous f32 values.
    unsafe { std::slice::from_raw_parts(a.as_ptr() as *const f32, a.len() * 2) }
}

// ============================================================================
// Norms
// ============================================================================

/// Squared Euclidean norm: sum(|a[i]|^2)
#[cfg(feature = "simd")]
pub fn norm_sqr(a: &[Cpx]) -> f64 {
    let a = as_f32(a);
    let mut total = 0.0f64;

    for block in a.chunks(FLUSH_BLOCK) {
        let chunks = block.len() / SIMD_WIDTH;
        let mut sum = f32x4::ZERO;
        for i in 0..chunks {
            let idx = i * SIMD_WIDTH;
            let va = f32x4::from(&block[idx..idx + SIMD_WIDTH]);
            sum += va * va;
        }
        total += sum.reduce_add() as f64;
        for &v in &block[chunks * SIMD_WIDTH..] {
            total += (v as f64) * (v as f64);
        }
    }

    total
}

#[cfg(not(feature = "simd"))]
pub fn norm_sqr(a: &[Cpx]) -> f64 {
    a.iter().map(|v| (v.re as f64).powi(2) + (v.im as f64).powi(2)).sum()
}

/// Squared norm of a difference: sum(|a[i] - b[i]|^2)
#[cfg(feature = "simd")]
pub fn diff_norm_sqr(a: &[Cpx], b: &[Cpx]) -> f64 {
    debug_assert_eq!(a.len(), b.len());
    let (a, b) = (as_f32(a), as_f32(b));
    let mut total = 0.0f64;

    for (ba, bb) in a.chunks(FLUSH_BLOCK).zip(b.chunks(FLUSH_BLOCK)) {
        let chunks = ba.len() / SIMD_WIDTH;
        let mut sum = f32x4::ZERO;
        for i in 0..chunks {
            let idx = i * SIMD_WIDTH;
            let d = f32x4::from(&ba[idx..idx + SIMD_WIDTH]) - f32x4::from(&bb[idx..idx + SIMD_WIDTH]);
            sum += d * d;
        }
        total += sum.reduce_add() as f64;
        for (&x, &y) in ba[chunks * SIMD_WIDTH..].iter().zip(bb[chunks * SIMD_WIDTH..].iter()) {
            let d = (x - y) as f64;
            total += d * d;
        }
    }

    total
}

#[cfg(not(feature = "simd"))]
pub fn diff_norm_sqr(a: &[Cpx], b: &[Cpx]) -> f64 {
    debug_assert_eq!(a.len(), b.len());
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let dr = (x.re - y.re) as f64;
            let di = (x.im - y.im) as f64;
            dr * dr + di * di
        })
        .sum()
}

// ============================================================================
// Inner Products
// ============================================================================

/// Complex inner product: sum(conj(a[i]) * b[i])
pub fn dot_conj(a: &[Cpx], b: &[Cpx]) -> Complex64 {
    debug_assert_eq!(a.len(), b.len());
    let mut re = 0.0f64;
    let mut im = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        let (xr, xi) = (x.re as f64, x.im as f64);
        let (yr, yi) = (y.re as f64, y.im as f64);
        re += xr * yr + xi * yi;
        im += xr * yi - xi * yr;
    }
    Complex64::new(re, im)
}

/// Real part of the complex inner product, Re(sum(conj(a[i]) * b[i]))
#[cfg(feature = "simd")]
pub fn dot_re(a: &[Cpx], b: &[Cpx]) -> f64 {
    debug_assert_eq!(a.len(), b.len());
    let (a, b) = (as_f32(a), as_f32(b));
    let mut total = 0.0f64;

    for (ba, bb) in a.chunks(FLUSH_BLOCK).zip(b.chunks(FLUSH_BLOCK)) {
        let chunks = ba.len() / SIMD_WIDTH;
        let mut sum = f32x4::ZERO;
        for i in 0..chunks {
            let idx = i * SIMD_WIDTH;
            sum += f32x4::from(&ba[idx..idx + SIMD_WIDTH]) * f32x4::from(&bb[idx..idx + SIMD_WIDTH]);
        }
        total += sum.reduce_add() as f64;
        for (&x, &y) in ba[chunks * SIMD_WIDTH..].iter().zip(bb[chunks * SIMD_WIDTH..].iter()) {
            total += (x as f64) * (y as f64);
        }
    }

    total
}

#[cfg(not(feature = "simd"))]
pub fn dot_re(a: &[Cpx], b: &[Cpx]) -> f64 {
    dot_conj(a, b).re
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer(n: usize, phase: f32) -> Vec<Cpx> {
        (0..n).map(|i| Cpx::new((i as f32 * 0.37 + phase).sin(), (i as f32 * 0.11 - phase).cos())).collect()
    }

    #[test]
    fn test_norm_sqr() {
        let a = buffer(2051, 0.3);

        let result = norm_sqr(&a);
        let expected: f64 = a.iter().map(|v| v.norm_sqr() as f64).sum();

        assert!((result - expected).abs() / expected < 1e-6, "norm_sqr {} vs {}", result, expected);
    }

    #[test]
    fn test_diff_norm_sqr() {
        let a = buffer(1037, 0.1);
        let b = buffer(1037, 0.7);

        let result = diff_norm_sqr(&a, &b);
        let expected: f64 = a.iter().zip(b.iter()).map(|(x, y)| (x - y).norm_sqr() as f64).sum();

        assert!((result - expected).abs() / expected < 1e-6);
        assert_eq!(diff_norm_sqr(&a, &a), 0.0);
    }

    #[test]
    fn test_dot_conj_matches_real_part() {
        let a = buffer(513, 0.2);
        let b = buffer(513, 1.4);

        let full = dot_conj(&a, &b);
        let re = dot_re(&a, &b);
        assert!((full.re - re).abs() < 1e-6 * full.re.abs().max(1.0));

        let self_dot = dot_conj(&a, &a);
        assert!(self_dot.im.abs() < 1e-9);
        assert!((self_dot.re - norm_sqr(&a)).abs() < 1e-6 * self_dot.re);
    }
}
