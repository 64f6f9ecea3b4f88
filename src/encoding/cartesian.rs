//! Cartesian k-space encoding
//!
//! `d[s, n, c] = M_n · F(C[s, c] · I[s, n])` with `F` the centred
//! orthonormal 2D FFT and `M_n` the binary (or weighted) sampling mask of
//! scan `n`. The adjoint sums the coil images back:
//! `I[s, n] = Σ_c conj(C[s, c]) · F⁻¹(M_n · d[s, n, c])`.

use super::Encoding;
use crate::error::{ReconError, Result};
use crate::fft::{Fft2dPlan, Fft2dScratch};
use crate::volume::{Cpx, ZERO};

pub struct Cartesian {
    scans: usize,
    coils: usize,
    /// Sampling weights, `(scans, rows, cols)`
    mask: Vec<f32>,
    plan: Fft2dPlan,
}

impl Cartesian {
    pub fn new(scans: usize, coils: usize, rows: usize, cols: usize, mask: Vec<f32>) -> Result<Self> {
        if scans == 0 || coils == 0 {
            return Err(ReconError::Config("cartesian encoding needs at least one scan and one coil".into()));
        }
        if mask.len() != scans * rows * cols {
            return Err(ReconError::Shape(format!(
                "sampling mask has {} entries, expected {} scans of {}x{}",
                mask.len(),
                scans,
                rows,
                cols
            )));
        }
        Ok(Self { scans, coils, mask, plan: Fft2dPlan::new(rows, cols) })
    }

    /// Fully sampled encoding
    pub fn fully_sampled(scans: usize, coils: usize, rows: usize, cols: usize) -> Self {
        Self { scans, coils, mask: vec![1.0; scans * rows * cols], plan: Fft2dPlan::new(rows, cols) }
    }

    #[inline]
    fn plane(&self) -> usize {
        self.plan.rows() * self.plan.cols()
    }

    fn scan_mask(&self, n: usize) -> &[f32] {
        let plane = self.plane();
        &self.mask[n * plane..(n + 1) * plane]
    }

    /// Fourier transform of one coil image into `out`
    pub(crate) fn encode_plane(&self, out: &mut [Cpx], scan: usize, ws: &mut Fft2dScratch) {
        self.plan.fft2c(out, ws);
        for (v, &m) in out.iter_mut().zip(self.scan_mask(scan)) {
            *v *= m;
        }
    }

    /// Masked inverse Fourier transform of one coil k-space plane, in place
    pub(crate) fn decode_plane(&self, buf: &mut [Cpx], scan: usize, ws: &mut Fft2dScratch) {
        for (v, &m) in buf.iter_mut().zip(self.scan_mask(scan)) {
            *v *= m;
        }
        self.plan.ifft2c(buf, ws);
    }

    pub(crate) fn scratch(&self) -> Fft2dScratch {
        self.plan.scratch()
    }
}

impl Encoding for Cartesian {
    fn scans(&self) -> usize {
        self.scans
    }

    fn coils(&self) -> usize {
        self.coils
    }

    fn rows(&self) -> usize {
        self.plan.rows()
    }

    fn cols(&self) -> usize {
        self.plan.cols()
    }

    fn forward(&self, out: &mut [Cpx], img: &[Cpx], coils: &[Cpx], slices: usize) {
        let (ns, nc, plane) = (self.scans, self.coils, self.plane());
        let mut ws = self.scratch();

        for s in 0..slices {
            for n in 0..ns {
                let image = &img[(s * ns + n) * plane..(s * ns + n + 1) * plane];
                for c in 0..nc {
                    let sens = &coils[(s * nc + c) * plane..(s * nc + c + 1) * plane];
                    let start = ((s * ns + n) * nc + c) * plane;
                    let target = &mut out[start..start + plane];
                    for ((t, &i), &w) in target.iter_mut().zip(image).zip(sens) {
                        *t = i * w;
                    }
                    self.encode_plane(target, n, &mut ws);
                }
            }
        }
    }

    fn adjoint(&self, out: &mut [Cpx], data: &[Cpx], coils: &[Cpx], slices: usize) {
        let (ns, nc, plane) = (self.scans, self.coils, self.plane());
        let mut ws = self.scratch();
        let mut buf = vec![ZERO; plane];

        for s in 0..slices {
            for n in 0..ns {
                let image = &mut out[(s * ns + n) * plane..(s * ns + n + 1) * plane];
                image.fill(ZERO);
                for c in 0..nc {
                    let start = ((s * ns + n) * nc + c) * plane;
                    buf.copy_from_slice(&data[start..start + plane]);
                    self.decode_plane(&mut buf, n, &mut ws);
                    let sens = &coils[(s * nc + c) * plane..(s * nc + c + 1) * plane];
                    for ((i, &b), &w) in image.iter_mut().zip(&buf).zip(sens) {
                        *i += w.conj() * b;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::tests::{assert_adjoint, random};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    #[test]
    fn test_cartesian_adjoint() {
        let (scans, coils, rows, cols, slices) = (2, 3, 6, 4, 2);
        let mut rng = StdRng::seed_from_u64(7);
        let mask = (0..scans * rows * cols).map(|_| if rng.gen_bool(0.5) { 1.0 } else { 0.0 }).collect();
        let enc = Cartesian::new(scans, coils, rows, cols, mask).unwrap();
        let sens = random(slices * coils * rows * cols, 3);

        assert_adjoint(&enc, &sens, slices);
    }

    #[test]
    fn test_fully_sampled_single_coil_preserves_energy() {
        let enc = Cartesian::fully_sampled(1, 1, 4, 4);
        let img = random(16, 1);
        let ones = vec![Cpx::new(1.0, 0.0); 16];
        let mut k = vec![ZERO; 16];
        let mut back = vec![ZERO; 16];

        enc.forward(&mut k, &img, &ones, 1);
        enc.adjoint(&mut back, &k, &ones, 1);

        for (a, b) in back.iter().zip(&img) {
            assert!((a - b).norm() < 1e-5);
        }
    }

    #[test]
    fn test_mask_size_is_checked() {
        assert!(matches!(Cartesian::new(2, 1, 4, 4, vec![1.0; 16]), Err(ReconError::Shape(_))));
    }
}
