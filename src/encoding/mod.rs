//! Data encodings
//!
//! An [`Encoding`] maps per-scan images of a run of slices to measured
//! data and back. Images are laid out `(slices, scans, rows, cols)`, coil
//! sensitivities `(slices, coils, rows, cols)` and data
//! `(slices, scans * coils, rows, cols)` with channel `n * coils + c`.
//!
//! - [`ImageSpace`]: identity, one virtual coil
//! - [`Cartesian`]: coil weighting, centred orthonormal 2D FFT, sampling mask
//! - [`Sms`]: Cartesian encoding of multiband slabs (whole-volume only)

pub mod cartesian;
pub mod sms;

pub use cartesian::Cartesian;
pub use sms::Sms;

use crate::volume::Cpx;

/// Per-slice encoding operator
pub trait Encoding: Send + Sync {
    fn scans(&self) -> usize;

    fn coils(&self) -> usize;

    fn rows(&self) -> usize;

    fn cols(&self) -> usize;

    /// `out[s, n*NC + c] = E(img[s, n], coils[s, c])` for `slices` consecutive slices
    fn forward(&self, out: &mut [Cpx], img: &[Cpx], coils: &[Cpx], slices: usize);

    /// Adjoint of [`Encoding::forward`] with respect to the image
    fn adjoint(&self, out: &mut [Cpx], data: &[Cpx], coils: &[Cpx], slices: usize);
}

/// Data that already lives in image space
pub struct ImageSpace {
    scans: usize,
    rows: usize,
    cols: usize,
}

impl ImageSpace {
    pub fn new(scans: usize, rows: usize, cols: usize) -> Self {
        Self { scans, rows, cols }
    }
}

impl Encoding for ImageSpace {
    fn scans(&self) -> usize {
        self.scans
    }

    fn coils(&self) -> usize {
        1
    }

    fn rows(&self) -> usize {
        self.rows
    }

    fn cols(&self) -> usize {
        self.cols
    }

    fn forward(&self, out: &mut [Cpx], img: &[Cpx], _coils: &[Cpx], slices: usize) {
        let n = slices * self.scans * self.rows * self.cols;
        out[..n].copy_from_slice(&img[..n]);
    }

    fn adjoint(&self, out: &mut [Cpx], data: &[Cpx], _coils: &[Cpx], slices: usize) {
        let n = slices * self.scans * self.rows * self.cols;
        out[..n].copy_from_slice(&data[..n]);
    }
}
