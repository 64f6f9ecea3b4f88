//! Dense complex volumes
//!
//! All volumes handed to the streaming operators are stored slice-major:
//! `index = ((((s * channels + c) * rows + y) * cols + x) * comps + k)`.
//! A run of consecutive slices is therefore one contiguous range, which is
//! what the chunked pipelines gather and scatter. Model-facing volumes use
//! the same container with the two outer axes swapped (unknown-major); see
//! [`Volume::swap_outer_axes`].

use num_complex::Complex32;

use crate::error::{ReconError, Result};

/// Working precision (single precision complex)
pub type Cpx = Complex32;

pub const ZERO: Cpx = Complex32 { re: 0.0, im: 0.0 };

/// Extent of a volume along its five axes
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Shape {
    pub slices: usize,
    pub channels: usize,
    pub rows: usize,
    pub cols: usize,
    /// Per-voxel components (1 for images, 3 for gradients, 6 for symmetric tensors)
    pub comps: usize,
}

impl Shape {
    pub const fn new(slices: usize, channels: usize, rows: usize, cols: usize, comps: usize) -> Self {
        Self { slices, channels, rows, cols, comps }
    }

    /// Number of elements in one slice
    #[inline]
    pub fn slice_len(&self) -> usize {
        self.channels * self.rows * self.cols * self.comps
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.slices * self.slice_len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn with_slices(&self, slices: usize) -> Self {
        Self { slices, ..*self }
    }

    pub fn with_comps(&self, comps: usize) -> Self {
        Self { comps, ..*self }
    }

    /// Number of pixels in one 2D image
    #[inline]
    pub fn plane(&self) -> usize {
        self.rows * self.cols
    }
}

/// Dense complex array with an explicit [`Shape`]
#[derive(Clone, Debug, PartialEq)]
pub struct Volume {
    shape: Shape,
    data: Vec<Cpx>,
}

impl Volume {
    pub fn zeros(shape: Shape) -> Self {
        Self { shape, data: vec![ZERO; shape.len()] }
    }

    pub fn filled(shape: Shape, value: Cpx) -> Self {
        Self { shape, data: vec![value; shape.len()] }
    }

    pub fn from_vec(shape: Shape, data: Vec<Cpx>) -> Result<Self> {
        if data.len() != shape.len() {
            return Err(ReconError::Shape(format!(
                "{} elements do not fit shape {:?} ({} elements)",
                data.len(),
                shape,
                shape.len()
            )));
        }
        Ok(Self { shape, data })
    }

    /// Build a real-valued volume (imaginary parts zero)
    pub fn from_real(shape: Shape, values: &[f32]) -> Result<Self> {
        Self::from_vec(shape, values.iter().map(|&v| Cpx::new(v, 0.0)).collect())
    }

    #[inline]
    pub fn shape(&self) -> Shape {
        self.shape
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[inline]
    pub fn as_slice(&self) -> &[Cpx] {
        &self.data
    }

    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [Cpx] {
        &mut self.data
    }

    pub fn into_vec(self) -> Vec<Cpx> {
        self.data
    }

    /// Flat index of element (s, c, y, x, k)
    #[inline]
    pub fn index(&self, s: usize, c: usize, y: usize, x: usize, k: usize) -> usize {
        let sh = &self.shape;
        (((s * sh.channels + c) * sh.rows + y) * sh.cols + x) * sh.comps + k
    }

    #[inline]
    pub fn get(&self, s: usize, c: usize, y: usize, x: usize, k: usize) -> Cpx {
        self.data[self.index(s, c, y, x, k)]
    }

    #[inline]
    pub fn set(&mut self, s: usize, c: usize, y: usize, x: usize, k: usize, value: Cpx) {
        let idx = self.index(s, c, y, x, k);
        self.data[idx] = value;
    }

    /// Contiguous data of slices `lo..hi`
    pub fn slices(&self, lo: usize, hi: usize) -> &[Cpx] {
        let n = self.shape.slice_len();
        &self.data[lo * n..hi * n]
    }

    pub fn slices_mut(&mut self, lo: usize, hi: usize) -> &mut [Cpx] {
        let n = self.shape.slice_len();
        &mut self.data[lo * n..hi * n]
    }

    /// Contiguous data of one channel (unknown) of the outer axis `s`
    pub fn channel(&self, s: usize, c: usize) -> &[Cpx] {
        let n = self.shape.plane() * self.shape.comps;
        let start = (s * self.shape.channels + c) * n;
        &self.data[start..start + n]
    }

    pub fn fill(&mut self, value: Cpx) {
        self.data.iter_mut().for_each(|v| *v = value);
    }

    pub fn copy_from(&mut self, other: &Volume) -> Result<()> {
        if self.shape != other.shape {
            return Err(ReconError::Shape(format!(
                "cannot copy {:?} into {:?}",
                other.shape, self.shape
            )));
        }
        self.data.copy_from_slice(&other.data);
        Ok(())
    }

    /// Squared Euclidean norm, accumulated in double precision
    pub fn norm_sqr(&self) -> f64 {
        crate::utils::simd_ops::norm_sqr(&self.data)
    }

    pub fn norm(&self) -> f64 {
        self.norm_sqr().sqrt()
    }

    /// Replace NaN/Inf entries by zero; returns the number of replaced entries
    pub fn sanitize(&mut self) -> usize {
        let mut replaced = 0;
        for v in self.data.iter_mut() {
            if !v.re.is_finite() || !v.im.is_finite() {
                *v = ZERO;
                replaced += 1;
            }
        }
        replaced
    }

    /// `self - other`, element-wise
    pub fn sub(&self, other: &Volume) -> Result<Volume> {
        self.zip_with(other, |a, b| a - b)
    }

    /// `self + other`, element-wise
    pub fn add(&self, other: &Volume) -> Result<Volume> {
        self.zip_with(other, |a, b| a + b)
    }

    fn zip_with(&self, other: &Volume, f: impl Fn(Cpx, Cpx) -> Cpx) -> Result<Volume> {
        if self.shape != other.shape {
            return Err(ReconError::Shape(format!(
                "element-wise operation on {:?} and {:?}",
                self.shape, other.shape
            )));
        }
        let data = self.data.iter().zip(other.data.iter()).map(|(&a, &b)| f(a, b)).collect();
        Ok(Volume { shape: self.shape, data })
    }

    /// Transpose the two outer axes: `(a, b, rows, cols, comps) -> (b, a, rows, cols, comps)`
    ///
    /// Converts between the model-facing unknown-major layout and the
    /// slice-major layout used by the streaming operators.
    pub fn swap_outer_axes(&self) -> Volume {
        let sh = self.shape;
        let inner = sh.plane() * sh.comps;
        let swapped = Shape::new(sh.channels, sh.slices, sh.rows, sh.cols, sh.comps);
        let mut out = Volume::zeros(swapped);

        for a in 0..sh.slices {
            for b in 0..sh.channels {
                let src = (a * sh.channels + b) * inner;
                let dst = (b * sh.slices + a) * inner;
                out.data[dst..dst + inner].copy_from_slice(&self.data[src..src + inner]);
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_swap_outer_axes_roundtrip() {
        let shape = Shape::new(2, 3, 2, 2, 1);
        let data: Vec<Cpx> = (0..shape.len()).map(|i| Cpx::new(i as f32, -(i as f32))).collect();
        let vol = Volume::from_vec(shape, data).unwrap();

        let swapped = vol.swap_outer_axes();
        assert_eq!(swapped.shape(), Shape::new(3, 2, 2, 2, 1));
        assert_eq!(swapped.get(2, 1, 1, 0, 0), vol.get(1, 2, 1, 0, 0));
        assert_eq!(swapped.swap_outer_axes(), vol);
    }

    #[test]
    fn test_sanitize_replaces_non_finite() {
        let shape = Shape::new(1, 1, 1, 4, 1);
        let mut vol = Volume::from_vec(
            shape,
            vec![
                Cpx::new(1.0, 0.0),
                Cpx::new(f32::NAN, 0.0),
                Cpx::new(0.0, f32::INFINITY),
                Cpx::new(2.0, 3.0),
            ],
        )
        .unwrap();

        assert_eq!(vol.sanitize(), 2);
        assert_eq!(vol.as_slice()[1], ZERO);
        assert_eq!(vol.as_slice()[2], ZERO);
        assert_eq!(vol.as_slice()[3], Cpx::new(2.0, 3.0));
    }

    #[test]
    fn test_from_vec_rejects_wrong_length() {
        let shape = Shape::new(2, 1, 2, 2, 1);
        assert!(Volume::from_vec(shape, vec![ZERO; 3]).is_err());
    }

    #[test]
    fn test_slices_are_contiguous() {
        let shape = Shape::new(4, 2, 1, 1, 3);
        let data: Vec<Cpx> = (0..shape.len()).map(|i| Cpx::new(i as f32, 0.0)).collect();
        let vol = Volume::from_vec(shape, data).unwrap();

        let chunk = vol.slices(1, 3);
        assert_eq!(chunk.len(), 2 * shape.slice_len());
        assert_eq!(chunk[0], vol.get(1, 0, 0, 0, 0));
    }
}
