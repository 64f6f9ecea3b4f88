//! Simultaneous multi-slice (multiband) encoding
//!
//! `mb` physical slices are excited together and land in one slab of the
//! measured data. Physical slice `p = s + b·NSlab` is band `b` of slab `s`
//! and is shifted cyclically along the phase-encoding (row) axis by
//! `b·shift` rows before the bands are summed (CAIPI-style FOV shift).
//! Folding mixes slices that are far apart, so this encoding only runs on
//! whole volumes and never inside a slice-chunked stream.

use super::{Cartesian, Encoding};
use crate::error::{ReconError, Result};
use crate::fft::roll2d;
use crate::volume::{Cpx, Shape, Volume, ZERO};

pub struct Sms {
    mb: usize,
    shift: usize,
    cartesian: Cartesian,
}

impl Sms {
    pub fn new(mb: usize, shift: usize, cartesian: Cartesian) -> Result<Self> {
        if mb == 0 {
            return Err(ReconError::Config("multiband factor must be at least 1".into()));
        }
        Ok(Self { mb, shift, cartesian })
    }

    pub fn mb(&self) -> usize {
        self.mb
    }

    pub fn scans(&self) -> usize {
        self.cartesian.scans()
    }

    pub fn coils(&self) -> usize {
        self.cartesian.coils()
    }

    /// Number of slabs for `slices` physical slices
    pub fn slabs(&self, slices: usize) -> Result<usize> {
        if slices % self.mb != 0 {
            return Err(ReconError::Config(format!(
                "{} slices cannot be folded with multiband factor {}",
                slices, self.mb
            )));
        }
        Ok(slices / self.mb)
    }

    /// Shape of the folded data for images of shape `img`
    pub fn data_shape(&self, img: Shape) -> Result<Shape> {
        Ok(Shape::new(self.slabs(img.slices)?, self.scans() * self.coils(), img.rows, img.cols, 1))
    }

    fn rows_shift(&self, band: usize, rows: usize) -> usize {
        (band * self.shift) % rows.max(1)
    }

    fn check(&self, img: Shape, coils: Shape, data: Shape) -> Result<()> {
        let expected_img = Shape::new(coils.slices, self.scans(), self.cartesian.rows(), self.cartesian.cols(), 1);
        let expected_coils = Shape::new(img.slices, self.coils(), img.rows, img.cols, 1);
        if img != expected_img || coils != expected_coils || data != self.data_shape(img)? {
            return Err(ReconError::Shape(format!(
                "sms encoding got images {:?}, coils {:?}, data {:?}",
                img, coils, data
            )));
        }
        Ok(())
    }

    /// Fold physical slices into slabs and encode
    pub fn forward(&self, out: &mut Volume, img: &Volume, coils: &Volume) -> Result<()> {
        self.check(img.shape(), coils.shape(), out.shape())?;
        let (ns, nc) = (self.scans(), self.coils());
        let (rows, cols) = (img.shape().rows, img.shape().cols);
        let plane = rows * cols;
        let slabs = out.shape().slices;

        let mut ws = self.cartesian.scratch();
        let mut band = vec![ZERO; plane];
        let mut buf = vec![ZERO; plane];

        for s in 0..slabs {
            for n in 0..ns {
                for c in 0..nc {
                    let start = ((s * ns + n) * nc + c) * plane;
                    let target = &mut out.as_mut_slice()[start..start + plane];
                    target.fill(ZERO);
                    for b in 0..self.mb {
                        let p = s + b * slabs;
                        for ((t, &i), &w) in band.iter_mut().zip(img.channel(p, n)).zip(coils.channel(p, c)) {
                            *t = i * w;
                        }
                        roll2d(&mut band, &mut buf, rows, cols, self.rows_shift(b, rows), 0);
                        for (t, &v) in target.iter_mut().zip(&band) {
                            *t += v;
                        }
                    }
                    self.cartesian.encode_plane(target, n, &mut ws);
                }
            }
        }
        Ok(())
    }

    /// Adjoint of [`Sms::forward`]: unfold slabs into physical slices
    pub fn adjoint(&self, out: &mut Volume, data: &Volume, coils: &Volume) -> Result<()> {
        self.check(out.shape(), coils.shape(), data.shape())?;
        let (ns, nc) = (self.scans(), self.coils());
        let (rows, cols) = (out.shape().rows, out.shape().cols);
        let plane = rows * cols;
        let slabs = data.shape().slices;

        let mut ws = self.cartesian.scratch();
        let mut decoded = vec![ZERO; plane];
        let mut band = vec![ZERO; plane];
        let mut buf = vec![ZERO; plane];
        out.fill(ZERO);

        for s in 0..slabs {
            for n in 0..ns {
                for c in 0..nc {
                    decoded.copy_from_slice(data.channel(s, n * nc + c));
                    self.cartesian.decode_plane(&mut decoded, n, &mut ws);
                    for b in 0..self.mb {
                        let p = s + b * slabs;
                        band.copy_from_slice(&decoded);
                        let back = (rows - self.rows_shift(b, rows)) % rows.max(1);
                        roll2d(&mut band, &mut buf, rows, cols, back, 0);

                        let start = (p * ns + n) * plane;
                        let sens = coils.channel(p, c);
                        let image = &mut out.as_mut_slice()[start..start + plane];
                        for ((i, &v), &w) in image.iter_mut().zip(&band).zip(sens) {
                            *i += w.conj() * v;
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::tests::random;
    use crate::utils::simd_ops::dot_conj;

    fn setup() -> (Sms, Shape, Volume) {
        let (scans, coils, rows, cols) = (2, 2, 6, 4);
        let mut mask = vec![1.0; scans * rows * cols];
        for (i, m) in mask.iter_mut().enumerate() {
            if i % 3 == 1 {
                *m = 0.0;
            }
        }
        let cartesian = Cartesian::new(scans, coils, rows, cols, mask).unwrap();
        let sms = Sms::new(2, 2, cartesian).unwrap();
        let img = Shape::new(4, scans, rows, cols, 1);
        let sens = Volume::from_vec(Shape::new(4, coils, rows, cols, 1), random(4 * coils * rows * cols, 9)).unwrap();
        (sms, img, sens)
    }

    #[test]
    fn test_sms_adjoint() {
        let (sms, img_shape, sens) = setup();
        let data_shape = sms.data_shape(img_shape).unwrap();
        assert_eq!(data_shape.slices, 2);

        let x = Volume::from_vec(img_shape, random(img_shape.len(), 1)).unwrap();
        let y = Volume::from_vec(data_shape, random(data_shape.len(), 2)).unwrap();
        let mut ex = Volume::zeros(data_shape);
        let mut ehy = Volume::zeros(img_shape);
        sms.forward(&mut ex, &x, &sens).unwrap();
        sms.adjoint(&mut ehy, &y, &sens).unwrap();

        let lhs = dot_conj(ex.as_slice(), y.as_slice());
        let rhs = dot_conj(x.as_slice(), ehy.as_slice());
        let rel_err = (lhs - rhs).norm() / (lhs.norm() + rhs.norm() + 1e-10);
        assert!(rel_err < 1e-4, "Adjoint property failed: lhs={}, rhs={}, rel_err={}", lhs, rhs, rel_err);
    }

    #[test]
    fn test_single_band_matches_cartesian() {
        let cartesian = Cartesian::fully_sampled(1, 1, 4, 4);
        let reference = Cartesian::fully_sampled(1, 1, 4, 4);
        let sms = Sms::new(1, 3, cartesian).unwrap();
        let shape = Shape::new(2, 1, 4, 4, 1);
        let x = Volume::from_vec(shape, random(shape.len(), 4)).unwrap();
        let ones = Volume::filled(shape, Cpx::new(1.0, 0.0));

        let mut folded = Volume::zeros(sms.data_shape(shape).unwrap());
        sms.forward(&mut folded, &x, &ones).unwrap();
        let mut plain = vec![ZERO; shape.len()];
        reference.forward(&mut plain, x.as_slice(), ones.as_slice(), 2);

        for (a, b) in folded.as_slice().iter().zip(&plain) {
            assert!((a - b).norm() < 1e-5);
        }
    }

    #[test]
    fn test_indivisible_slices_rejected() {
        let (sms, _, _) = setup();
        assert!(sms.slabs(3).is_err());
    }
}
