//! Streamed operators
//!
//! A [`StreamOperator`] binds a per-chunk [`Operator`] to a slice
//! partitioning and a device pool, and declares the full-volume shapes of
//! its output and inputs. Evaluating it with whole volumes runs the chunked
//! pipeline; see [`super::pipeline`].

use std::ops::{Add, AddAssign, Range};
use std::sync::Arc;

use super::chunk::ChunkPlan;
use super::device::DevicePool;
use super::pipeline;
use crate::error::{ReconError, Result};
use crate::kernels::{KernelParams, Operator};
use crate::utils::simd_ops::diff_norm_sqr;
use crate::volume::{Cpx, Shape, Volume};

/// Which change a stage contributes to the line-search certificate
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NormRole {
    /// `‖out - in[0]‖²` is added to `ynorm` (dual variable change)
    Update,
    /// `‖out - in[last]‖²` is added to `lhs` (adjoint image change)
    Adjoint,
}

impl NormRole {
    /// Partial sum over the owned slices `owned` of one chunk
    pub(crate) fn partial(&self, out: &[Cpx], inputs: &[&[Cpx]], slice_len: usize, owned: Range<usize>) -> NormPair {
        let range = owned.start * slice_len..owned.end * slice_len;
        match self {
            NormRole::Update => NormPair {
                lhs: 0.0,
                ynorm: diff_norm_sqr(&out[range.clone()], &inputs[0][range]),
            },
            NormRole::Adjoint => NormPair {
                lhs: diff_norm_sqr(&out[range.clone()], &inputs[inputs.len() - 1][range]),
                ynorm: 0.0,
            },
        }
    }

    /// Input slot holding the reference the change is measured against
    fn reference_slot(&self, arity: usize) -> usize {
        match self {
            NormRole::Update => 0,
            NormRole::Adjoint => arity - 1,
        }
    }
}

/// Squared norms accumulated by `eval_with_norm`
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct NormPair {
    /// Adjoint image change
    pub lhs: f64,
    /// Dual variable change
    pub ynorm: f64,
}

impl Add for NormPair {
    type Output = NormPair;

    fn add(self, other: NormPair) -> NormPair {
        NormPair { lhs: self.lhs + other.lhs, ynorm: self.ynorm + other.ynorm }
    }
}

impl AddAssign for NormPair {
    fn add_assign(&mut self, other: NormPair) {
        self.lhs += other.lhs;
        self.ynorm += other.ynorm;
    }
}

#[derive(Clone)]
pub struct StreamOperator {
    op: Arc<dyn Operator>,
    out_shape: Shape,
    in_shapes: Vec<Shape>,
    norm: Option<NormRole>,
    plan: ChunkPlan,
    pool: Arc<DevicePool>,
}

impl std::fmt::Debug for StreamOperator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamOperator")
            .field("op", &self.op.name())
            .field("out_shape", &self.out_shape)
            .field("in_shapes", &self.in_shapes)
            .field("norm", &self.norm)
            .field("plan", &self.plan)
            .finish_non_exhaustive()
    }
}

impl StreamOperator {
    pub fn new(
        op: Arc<dyn Operator>,
        out_shape: Shape,
        in_shapes: Vec<Shape>,
        plan: ChunkPlan,
        pool: Arc<DevicePool>,
    ) -> Result<Self> {
        if in_shapes.len() != op.arity() {
            return Err(ReconError::Config(format!(
                "operator {} reads {} inputs, {} declared",
                op.name(),
                op.arity(),
                in_shapes.len()
            )));
        }
        let total = plan.total_slices();
        if let Some(bad) = std::iter::once(&out_shape).chain(in_shapes.iter()).find(|s| s.slices != total) {
            return Err(ReconError::Config(format!(
                "operator {} declares a shape with {} slices, the partitioning covers {}",
                op.name(),
                bad.slices,
                total
            )));
        }
        Ok(Self { op, out_shape, in_shapes, norm: None, plan, pool })
    }

    /// Let this stage contribute to `eval_with_norm`
    pub fn with_norm(mut self, role: NormRole) -> Result<Self> {
        if self.in_shapes.is_empty() {
            return Err(ReconError::Config(format!("operator {} has no input to measure against", self.op.name())));
        }
        let slot = role.reference_slot(self.in_shapes.len());
        if self.in_shapes[slot] != self.out_shape {
            return Err(ReconError::Config(format!(
                "norm reference of {} (input {}) has shape {:?}, output is {:?}",
                self.op.name(),
                slot,
                self.in_shapes[slot],
                self.out_shape
            )));
        }
        self.norm = Some(role);
        Ok(self)
    }

    pub fn name(&self) -> &'static str {
        self.op.name()
    }

    pub fn operator(&self) -> &dyn Operator {
        self.op.as_ref()
    }

    pub fn out_shape(&self) -> Shape {
        self.out_shape
    }

    pub fn in_shapes(&self) -> &[Shape] {
        &self.in_shapes
    }

    pub fn norm(&self) -> Option<NormRole> {
        self.norm
    }

    pub fn plan(&self) -> &ChunkPlan {
        &self.plan
    }

    pub fn pool(&self) -> &Arc<DevicePool> {
        &self.pool
    }

    pub fn eval(&self, out: &mut Volume, inputs: &[&Volume], params: &KernelParams) -> Result<()> {
        self.eval_with_norm(out, inputs, params).map(|_| ())
    }

    pub fn eval_with_norm(&self, out: &mut Volume, inputs: &[&Volume], params: &KernelParams) -> Result<NormPair> {
        let slots: Vec<Option<&Volume>> = inputs.iter().map(|v| Some(*v)).collect();
        let stages = std::slice::from_ref(self);
        let connected = pipeline::connection_table(stages, &[]);
        pipeline::run(&self.plan, &self.pool, stages, &connected, false, &mut [out], &[slots.as_slice()], params)
    }
}
