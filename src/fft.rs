//! FFT wrapper for 2D transforms using rustfft
//!
//! Per-slice Cartesian encoding needs a centred, orthonormal 2D FFT on
//! row-major images (`index = y * cols + x`). Plans are immutable and shared
//! between worker threads; each caller brings its own [`Fft2dScratch`].

use num_complex::Complex32;
use rustfft::{Fft, FftDirection, FftPlanner};
use std::sync::Arc;

const CZERO: Complex32 = Complex32 { re: 0.0, im: 0.0 };

/// Cached 2D FFT plans for one image size
pub struct Fft2dPlan {
    rows: usize,
    cols: usize,
    fft_x: Arc<dyn Fft<f32>>,
    fft_y: Arc<dyn Fft<f32>>,
    ifft_x: Arc<dyn Fft<f32>>,
    ifft_y: Arc<dyn Fft<f32>>,
    scratch_len: usize,
    norm: f32,
}

/// Per-thread scratch buffers for [`Fft2dPlan`]
pub struct Fft2dScratch {
    scratch: Vec<Complex32>,
    column: Vec<Complex32>,
    shifted: Vec<Complex32>,
}

impl Fft2dPlan {
    pub fn new(rows: usize, cols: usize) -> Self {
        let mut planner = FftPlanner::new();

        let fft_x = planner.plan_fft(cols, FftDirection::Forward);
        let fft_y = planner.plan_fft(rows, FftDirection::Forward);
        let ifft_x = planner.plan_fft(cols, FftDirection::Inverse);
        let ifft_y = planner.plan_fft(rows, FftDirection::Inverse);

        let scratch_len = [&fft_x, &fft_y, &ifft_x, &ifft_y]
            .iter()
            .map(|p| p.get_inplace_scratch_len())
            .max()
            .unwrap_or(0);

        Self {
            rows,
            cols,
            fft_x,
            fft_y,
            ifft_x,
            ifft_y,
            scratch_len,
            norm: 1.0 / ((rows * cols) as f32).sqrt(),
        }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn scratch(&self) -> Fft2dScratch {
        Fft2dScratch {
            scratch: vec![CZERO; self.scratch_len],
            column: vec![CZERO; self.rows],
            shifted: vec![CZERO; self.rows * self.cols],
        }
    }

    /// In-place orthonormal forward 2D FFT
    pub fn fft2d(&self, data: &mut [Complex32], ws: &mut Fft2dScratch) {
        self.transform(data, ws, &self.fft_x, &self.fft_y);
    }

    /// In-place orthonormal inverse 2D FFT
    pub fn ifft2d(&self, data: &mut [Complex32], ws: &mut Fft2dScratch) {
        self.transform(data, ws, &self.ifft_x, &self.ifft_y);
    }

    /// Centred forward transform: `fftshift(fft2(ifftshift(x)))`
    pub fn fft2c(&self, data: &mut [Complex32], ws: &mut Fft2dScratch) {
        ifftshift2d(data, &mut ws.shifted, self.rows, self.cols);
        self.fft2d(data, ws);
        fftshift2d(data, &mut ws.shifted, self.rows, self.cols);
    }

    /// Centred inverse transform, the adjoint of [`Fft2dPlan::fft2c`]
    pub fn ifft2c(&self, data: &mut [Complex32], ws: &mut Fft2dScratch) {
        ifftshift2d(data, &mut ws.shifted, self.rows, self.cols);
        self.ifft2d(data, ws);
        fftshift2d(data, &mut ws.shifted, self.rows, self.cols);
    }

    fn transform(
        &self,
        data: &mut [Complex32],
        ws: &mut Fft2dScratch,
        along_x: &Arc<dyn Fft<f32>>,
        along_y: &Arc<dyn Fft<f32>>,
    ) {
        let (rows, cols) = (self.rows, self.cols);
        debug_assert_eq!(data.len(), rows * cols);

        // Rows are contiguous
        for row in data.chunks_exact_mut(cols) {
            along_x.process_with_scratch(row, &mut ws.scratch);
        }

        // Columns are strided
        for i in 0..cols {
            for j in 0..rows {
                ws.column[j] = data[j * cols + i];
            }
            along_y.process_with_scratch(&mut ws.column, &mut ws.scratch);
            for j in 0..rows {
                data[j * cols + i] = ws.column[j];
            }
        }

        for val in data.iter_mut() {
            *val *= self.norm;
        }
    }
}

/// Cyclic shift of a row-major image by `(dy, dx)`
pub fn roll2d(data: &mut [Complex32], buf: &mut [Complex32], rows: usize, cols: usize, dy: usize, dx: usize) {
    let (dy, dx) = (dy % rows.max(1), dx % cols.max(1));
    if dy == 0 && dx == 0 {
        return;
    }
    buf[..rows * cols].copy_from_slice(data);
    for j in 0..rows {
        let jt = (j + dy) % rows;
        for i in 0..cols {
            let it = (i + dx) % cols;
            data[jt * cols + it] = buf[j * cols + i];
        }
    }
}

/// Move the zero frequency to the centre
pub fn fftshift2d(data: &mut [Complex32], buf: &mut [Complex32], rows: usize, cols: usize) {
    roll2d(data, buf, rows, cols, rows / 2, cols / 2);
}

/// Inverse of [`fftshift2d`] (differs for odd sizes)
pub fn ifftshift2d(data: &mut [Complex32], buf: &mut [Complex32], rows: usize, cols: usize) {
    roll2d(data, buf, rows, cols, rows - rows / 2, cols - cols / 2);
}
