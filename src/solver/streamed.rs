//! Streamed backend for slice-separable encodings
//!
//! Every operator of the iteration runs chunk by chunk. The six graphs are
//! compiled once per job and reused every iteration and every
//! Gauss-Newton step; only the Jacobian and coil volumes change.

use std::sync::Arc;

use super::state::{Layout, PdState};
use super::PdKernels;
use crate::config::Regularizer;
use crate::encoding::Encoding;
use crate::error::{ReconError, Result};
use crate::kernels::{
    AdjointOp, ForwardOp, Gradient, KernelParams, Operator, SymGradient, UpdateKyk2, UpdatePrimal, UpdateR, UpdateV,
    UpdateZ1, UpdateZ2,
};
use crate::streaming::{ChunkPlan, DevicePool, NormPair, NormRole, OperatorGraph, OperatorGraphBuilder, StreamOperator};
use crate::volume::{Shape, Volume};

/// Stage factory bound to one partitioning and device pool
#[derive(Clone)]
pub(crate) struct StageFactory {
    pub plan: ChunkPlan,
    pub pool: Arc<DevicePool>,
}

impl StageFactory {
    pub fn stage(&self, op: impl Operator + 'static, out: Shape, ins: Vec<Shape>) -> Result<StreamOperator> {
        StreamOperator::new(Arc::new(op), out, ins, self.plan, Arc::clone(&self.pool))
    }
}

/// TGV graphs shared by the streamed and the SMS backend
pub(crate) struct TgvGraphs {
    /// `[v, Kyk2] -> v_new`, `-> E v_new` (reverse)
    pub update_primal_2: OperatorGraph,
    /// `[z2, E v_new, E v] -> z2_new`, `[z2_new, z1_new, Kyk2] -> Kyk2_new`
    pub update_dual_2: OperatorGraph,
}

impl TgvGraphs {
    pub fn build(f: &StageFactory, l: &Layout) -> Result<Self> {
        let (g, s) = (l.grad, l.sym);

        let mut b = OperatorGraphBuilder::new().reverse_dir(true);
        b += f.stage(UpdateV, g, vec![g, g])?;
        b += f.stage(SymGradient, s, vec![g])?;
        b.connect_out_to_in(0, 1, 0);
        let update_primal_2 = b.build()?;

        let mut b = OperatorGraphBuilder::new();
        b += f.stage(UpdateZ2, s, vec![s, s, s])?.with_norm(NormRole::Update)?;
        b += f.stage(UpdateKyk2::with_reference(), g, vec![s, g, g])?.with_norm(NormRole::Adjoint)?;
        b.connect_out_to_in(0, 1, 0);
        let update_dual_2 = b.build()?;

        Ok(Self { update_primal_2, update_dual_2 })
    }

    pub fn primal(&self, state: &mut PdState, params: &KernelParams) -> Result<()> {
        let tgv = state.tgv.as_mut().ok_or(ReconError::Unimplemented("TGV update without TGV state"))?;
        let kyk2 = tgv.kyk2.current();
        let (v, v_new) = tgv.v.split();
        let ev_new = tgv.ev.next_mut();
        self.update_primal_2.eval(&mut [v_new, ev_new], &[&[Some(v), Some(kyk2)], &[None]], params)
    }

    /// Expects `z1` already updated (next slot)
    pub fn dual(&self, state: &mut PdState, params: &KernelParams) -> Result<NormPair> {
        let z1_new = state.z1.next();
        let tgv = state.tgv.as_mut().ok_or(ReconError::Unimplemented("TGV update without TGV state"))?;
        let (ev, ev_new) = tgv.ev.both();
        let (z2, z2_new) = tgv.z2.split();
        let (kyk2, kyk2_new) = tgv.kyk2.split();
        self.update_dual_2.eval_with_norm(
            &mut [z2_new, kyk2_new],
            &[&[Some(z2), Some(ev_new), Some(ev)], &[None, Some(z1_new), Some(kyk2)]],
            params,
        )
    }
}

/// Compiled graphs of the streamed backend
pub struct StreamedGraphs {
    /// `A x`, `Kyk1`, `E v` (reverse)
    initial_1: OperatorGraph,
    /// `∇x`, `Kyk2`
    initial_2: OperatorGraph,
    /// primal → gradient → forward
    update_primal_1: OperatorGraph,
    /// `z1`, `r` → adjoint (reverse)
    update_dual_1: OperatorGraph,
    tgv: Option<TgvGraphs>,
}

impl StreamedGraphs {
    pub fn build(
        regularizer: Regularizer,
        layout: &Layout,
        encoding: Arc<dyn Encoding>,
        plan: ChunkPlan,
        pool: Arc<DevicePool>,
    ) -> Result<Self> {
        let f = StageFactory { plan, pool };
        let l = layout;
        let (u, g, s, d, c, j) = (l.unknowns, l.grad, l.sym, l.data, l.coils, l.jac);
        let is_tgv = regularizer == Regularizer::Tgv;

        let mut b = OperatorGraphBuilder::new().reverse_dir(true);
        b += f.stage(ForwardOp::new(encoding.clone()), d, vec![u, c, j])?;
        b += f.stage(AdjointOp::new(encoding.clone()), u, vec![d, g, c, j])?;
        if is_tgv {
            b += f.stage(SymGradient, s, vec![g])?;
        }
        let initial_1 = b.build()?;

        let mut b = OperatorGraphBuilder::new();
        b += f.stage(Gradient, g, vec![u])?;
        if is_tgv {
            b += f.stage(UpdateKyk2::new(), g, vec![s, g])?;
        }
        let initial_2 = b.build()?;

        let mut b = OperatorGraphBuilder::new();
        b += f.stage(UpdatePrimal, u, vec![u, u, u])?;
        b += f.stage(Gradient, g, vec![u])?;
        b += f.stage(ForwardOp::new(encoding.clone()), d, vec![u, c, j])?;
        b.connect_out_to_in(0, 1, 0);
        b.connect_out_to_in(0, 2, 0);
        let update_primal_1 = b.build()?;

        let mut b = OperatorGraphBuilder::new().reverse_dir(true);
        let z1_inputs = if is_tgv { vec![g; 5] } else { vec![g; 3] };
        let z1_op = if is_tgv { UpdateZ1::tgv() } else { UpdateZ1::tv() };
        b += f.stage(z1_op, g, z1_inputs)?.with_norm(NormRole::Update)?;
        b += f.stage(UpdateR, d, vec![d, d, d, d])?.with_norm(NormRole::Update)?;
        b += f.stage(AdjointOp::with_reference(encoding), u, vec![d, g, c, j, u])?.with_norm(NormRole::Adjoint)?;
        b.connect_out_to_in(0, 2, 1);
        b.connect_out_to_in(1, 2, 0);
        let update_dual_1 = b.build()?;

        let tgv = if is_tgv { Some(TgvGraphs::build(&f, l)?) } else { None };

        Ok(Self { initial_1, initial_2, update_primal_1, update_dual_1, tgv })
    }

    /// Bind the per-step Jacobian and coil sensitivities
    pub fn bind<'a>(&'a self, coils: &'a Volume, jac: &'a Volume) -> StreamedKernels<'a> {
        StreamedKernels { graphs: self, coils, jac }
    }
}

/// Streamed backend for one Gauss-Newton step
pub struct StreamedKernels<'a> {
    graphs: &'a StreamedGraphs,
    coils: &'a Volume,
    jac: &'a Volume,
}

impl PdKernels for StreamedKernels<'_> {
    fn warmup(&self, state: &mut PdState, params: &KernelParams) -> Result<()> {
        let g = self.graphs;
        let (coils, jac) = (Some(self.coils), Some(self.jac));
        let x = state.x.current();
        let r = state.r.current();
        let z1 = state.z1.current();

        match state.tgv.as_mut() {
            Some(tgv) => {
                g.initial_1.eval(
                    &mut [state.ax.current_mut(), state.kyk1.current_mut(), tgv.ev.current_mut()],
                    &[&[Some(x), coils, jac], &[Some(r), Some(z1), coils, jac], &[Some(tgv.v.current())]],
                    params,
                )?;
                g.initial_2.eval(
                    &mut [state.gradx.current_mut(), tgv.kyk2.current_mut()],
                    &[&[Some(x)], &[Some(tgv.z2.current()), Some(z1)]],
                    params,
                )
            }
            None => {
                g.initial_1.eval(
                    &mut [state.ax.current_mut(), state.kyk1.current_mut()],
                    &[&[Some(x), coils, jac], &[Some(r), Some(z1), coils, jac]],
                    params,
                )?;
                g.initial_2.eval(&mut [state.gradx.current_mut()], &[&[Some(x)]], params)
            }
        }
    }

    fn primal(&self, state: &mut PdState, params: &KernelParams) -> Result<()> {
        let g = self.graphs;
        {
            let (x, x_new) = state.x.split();
            g.update_primal_1.eval(
                &mut [x_new, state.gradx.next_mut(), state.ax.next_mut()],
                &[&[Some(x), Some(state.kyk1.current()), Some(&state.xk)], &[None], &[None, Some(self.coils), Some(self.jac)]],
                params,
            )?;
        }
        match &g.tgv {
            Some(tgv) => tgv.primal(state, params),
            None => Ok(()),
        }
    }

    fn dual(&self, state: &mut PdState, params: &KernelParams) -> Result<NormPair> {
        let g = self.graphs;
        let mut norms = {
            let (gx, gx_new) = state.gradx.both();
            let (ax, ax_new) = state.ax.both();
            let (z1, z1_new) = state.z1.split();
            let (r, r_new) = state.r.split();
            let (kyk1, kyk1_new) = state.kyk1.split();

            let z1_inputs: Vec<Option<&Volume>> = match &state.tgv {
                Some(tgv) => {
                    let (v, v_new) = tgv.v.both();
                    vec![Some(z1), Some(gx_new), Some(gx), Some(v_new), Some(v)]
                }
                None => vec![Some(z1), Some(gx_new), Some(gx)],
            };

            g.update_dual_1.eval_with_norm(
                &mut [z1_new, r_new, kyk1_new],
                &[
                    z1_inputs.as_slice(),
                    &[Some(r), Some(ax_new), Some(ax), Some(&state.res)],
                    &[None, None, Some(self.coils), Some(self.jac), Some(kyk1)],
                ],
                params,
            )?
        };

        if let Some(tgv) = &g.tgv {
            norms += tgv.dual(state, params)?;
        }
        Ok(norms)
    }
}
