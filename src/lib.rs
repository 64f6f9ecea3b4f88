//! qmri-irgn: streamed IRGN primal-dual reconstruction for quantitative MRI
//!
//! Parameter maps are reconstructed from (undersampled) raw data by an
//! iteratively regularized Gauss-Newton loop whose convex sub-problems are
//! solved with a TV or TGV regularized primal-dual algorithm. All operators
//! of the inner iteration run chunk by chunk over the slice axis, pipelined
//! across a pool of worker devices.
//!
//! # Modules
//! - `volume`: dense complex volumes and their shapes
//! - `kernels`: per-chunk compute kernels (gradients, updates, encodings)
//! - `streaming`: slice partitioning, device pool, streamed operators and graphs
//! - `encoding`: image-space, Cartesian and multiband (SMS) encodings
//! - `solver`: primal-dual iteration with line search
//! - `irgn`: Gauss-Newton outer loop, rebalancing and strategy selection
//! - `model`: signal model interface and box constraints
//! - `store`: persistence of Gauss-Newton iterates (memory, NIfTI)
//! - `config`: job configuration
//! - `fft`: centred 2D FFT using rustfft
//! - `utils`: finite differences and SIMD reductions

pub mod config;
pub mod encoding;
pub mod error;
pub mod fft;
pub mod irgn;
pub mod kernels;
pub mod model;
pub mod solver;
pub mod store;
pub mod streaming;
pub mod utils;
pub mod volume;

pub use config::{load_config, IrgnConfig, JobConfig, ReconMode, RegParams, Regularizer, StreamConfig};
pub use error::{ReconError, Result};
pub use irgn::{reconstruct, Acquisition, GnStep, ReconOutcome, SmsSetup};
pub use model::{Constraint, Model};
pub use solver::{SolveReport, Termination};
pub use store::{MemoryStore, NiftiStore, ResultStore};
pub use volume::{Cpx, Shape, Volume};
