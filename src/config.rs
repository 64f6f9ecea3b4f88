//! Job configuration
//!
//! A reconstruction job is described by one immutable [`JobConfig`]. The
//! Gauss-Newton loop never mutates it; every step derives a fresh
//! [`RegParams`] snapshot from [`IrgnConfig::reg_params`].

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ReconError, Result};

/// Regularization functional of the TGV-regularized unknowns
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Regularizer {
    /// First-order total variation
    Tv,
    /// Second-order total generalized variation
    Tgv,
}

impl Regularizer {
    /// Dataset name under which the GN iterate `step` is persisted
    pub fn dataset_name(&self, step: usize) -> String {
        match self {
            Regularizer::Tgv => format!("tgv_result_iter_{}", step),
            Regularizer::Tv => format!("tv_result_{}", step),
        }
    }
}

/// Acquisition domain of the measured data
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconMode {
    /// Cartesian k-space with coil sensitivities
    Kspace,
    /// Simultaneous multi-slice k-space (slices folded into slabs)
    KspaceSms,
    /// Data already in image space
    Imagespace,
}

/// IRGN and primal-dual parameters
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IrgnConfig {
    /// Data-fidelity weight
    pub lambd: f32,
    /// First-order regularization weight
    pub gamma: f32,
    pub gamma_dec: f32,
    pub gamma_min: f32,
    /// H1 weight of the non-TGV unknowns
    pub omega: f32,
    pub omega_dec: f32,
    pub omega_min: f32,
    /// Proximal weight of the linearization anchor (relative, see `reg_params`)
    pub delta: f32,
    pub delta_inc: f32,
    pub delta_max: f32,
    /// Relative convergence threshold (PD and GN)
    pub tol: f32,
    /// Stagnation growth factor of the primal-dual gap
    pub stag: f32,
    pub start_iters: usize,
    pub max_iters: usize,
    pub max_gn_it: usize,
    /// Call the model's visualization hook every objective evaluation
    pub display_iterations: bool,
    /// Estimated SNR, multiplied into `lambd` once per job
    pub snr_est: f32,
}

impl Default for IrgnConfig {
    fn default() -> Self {
        Self {
            lambd: 1e2,
            gamma: 1.0,
            gamma_dec: 0.7,
            gamma_min: 0.18,
            omega: 0.0,
            omega_dec: 0.5,
            omega_min: 0.0,
            delta: 1e-1,
            delta_inc: 2.0,
            delta_max: 1e2,
            tol: 5e-3,
            stag: 1e10,
            start_iters: 100,
            max_iters: 300,
            max_gn_it: 13,
            display_iterations: false,
            snr_est: 1.0,
        }
    }
}

/// Regularization parameters of one Gauss-Newton step
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RegParams {
    pub lambd: f32,
    pub gamma: f32,
    pub omega: f32,
    pub delta: f32,
    pub delta_max: f32,
}

impl IrgnConfig {
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("lambd", self.lambd),
            ("delta", self.delta),
            ("delta_max", self.delta_max),
            ("tol", self.tol),
            ("stag", self.stag),
            ("snr_est", self.snr_est),
        ];
        for (name, value) in positive {
            if !(value > 0.0) || !value.is_finite() {
                return Err(ReconError::Config(format!("{} must be positive, got {}", name, value)));
            }
        }
        let non_negative = [
            ("gamma", self.gamma),
            ("gamma_min", self.gamma_min),
            ("omega", self.omega),
            ("omega_min", self.omega_min),
            ("gamma_dec", self.gamma_dec),
            ("omega_dec", self.omega_dec),
            ("delta_inc", self.delta_inc),
        ];
        for (name, value) in non_negative {
            if value < 0.0 || !value.is_finite() {
                return Err(ReconError::Config(format!("{} must be non-negative, got {}", name, value)));
            }
        }
        if self.start_iters == 0 || self.max_iters < self.start_iters {
            return Err(ReconError::Config(format!(
                "iteration budget start_iters={} max_iters={} is invalid",
                self.start_iters, self.max_iters
            )));
        }
        if self.max_gn_it == 0 {
            return Err(ReconError::Config("max_gn_it must be at least 1".into()));
        }
        Ok(())
    }

    /// Regularization snapshot for GN step `step` at an estimate with norm `result_norm`
    ///
    /// `gamma` and `omega` decay geometrically down to their floors, `delta`
    /// grows geometrically up to `delta_max`; both `delta` terms are relative
    /// to the norm of the current estimate.
    pub fn reg_params(&self, step: usize, result_norm: f64) -> RegParams {
        let n = step as i32;
        let gamma = (self.gamma * self.gamma_dec.powi(n)).max(self.gamma_min);
        let omega = (self.omega * self.omega_dec.powi(n)).max(self.omega_min);
        let norm = result_norm as f32;
        let delta_max = self.delta_max / 1e3 * norm;
        let delta = (self.delta / 1e3 * norm * self.delta_inc.powi(n)).min(delta_max);

        RegParams { lambd: self.lambd, gamma, omega, delta, delta_max }
    }
}

/// Slice partitioning of the streaming pipelines
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Slices per chunk
    pub par_slices: usize,
    /// Halo slices on each side of a chunk
    pub overlap: usize,
    /// Number of compute devices (worker threads)
    pub num_dev: usize,
    /// In-flight chunks per device
    pub queues_per_device: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self { par_slices: 1, overlap: 1, num_dev: 1, queues_per_device: 2 }
    }
}

/// Complete description of a reconstruction job
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JobConfig {
    #[serde(default)]
    pub irgn: IrgnConfig,
    #[serde(default)]
    pub stream: StreamConfig,
    pub regularizer: Regularizer,
    pub mode: ReconMode,
    #[serde(default)]
    pub reco_2d: bool,
}

impl JobConfig {
    pub fn new(regularizer: Regularizer, mode: ReconMode) -> Self {
        Self {
            irgn: IrgnConfig::default(),
            stream: StreamConfig::default(),
            regularizer,
            mode,
            reco_2d: false,
        }
    }
}

pub fn load_config(path: &Path) -> Result<JobConfig> {
    let contents = fs::read_to_string(path)?;
    let config: JobConfig = serde_json::from_str(&contents)
        .map_err(|e| ReconError::Config(format!("failed to parse config {}: {e}", path.display())))?;
    config.irgn.validate()?;
    Ok(config)
}
