//! Numerical building blocks shared by the kernels
//!
//! - Finite-difference operators on slice chunks (gradient, divergence,
//!   symmetrized gradient and its divergence)
//! - SIMD-accelerated reductions (optional, with `simd` feature)

pub mod gradient;
pub mod simd_ops;

pub use gradient::*;
pub use simd_ops::*;
