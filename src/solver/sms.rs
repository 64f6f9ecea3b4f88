//! Multiband backend
//!
//! Slice folding couples slices far apart, so the encoding itself runs on
//! whole volumes on the host. Everything before it (image projection,
//! gradients) and after it (back-projection, divergence) is streamed as
//! usual; the data-space update `r` is a pointwise whole-volume update.

use std::sync::Arc;

use parking_lot::Mutex;

use super::state::{Layout, PdState};
use super::streamed::{StageFactory, TgvGraphs};
use super::PdKernels;
use crate::config::Regularizer;
use crate::encoding::Sms;
use crate::error::Result;
use crate::kernels::{
    ChunkContext, Gradient, ImageProjection, KernelParams, KykFromImage, Operator, SymGradient, UpdateKyk2,
    UpdatePrimal, UpdateR, UpdateZ1,
};
use crate::streaming::{ChunkPlan, DevicePool, NormPair, NormRole, OperatorGraph, OperatorGraphBuilder, StreamOperator};
use crate::utils::simd_ops::diff_norm_sqr;
use crate::volume::Volume;

pub struct SmsGraphs {
    /// `J x`, `∇x` and for TGV `E v`
    initial: OperatorGraph,
    /// `Jᴴ img - div z1`
    kyk1: StreamOperator,
    /// `-z1 - div_sym z2`
    kyk2: Option<StreamOperator>,
    /// primal → gradient → image projection
    update_primal_1: OperatorGraph,
    update_z1: StreamOperator,
    /// `Jᴴ img - div z1_new` against the previous `Kyk1`
    update_kyk1: StreamOperator,
    tgv: Option<TgvGraphs>,
    pool: Arc<DevicePool>,
    layout: Layout,
}

impl SmsGraphs {
    /// `layout` must already carry the folded data shape
    pub fn build(regularizer: Regularizer, layout: &Layout, plan: ChunkPlan, pool: Arc<DevicePool>) -> Result<Self> {
        let f = StageFactory { plan, pool: Arc::clone(&pool) };
        let (u, g, s, img, j) = (layout.unknowns, layout.grad, layout.sym, layout.images, layout.jac);
        let is_tgv = regularizer == Regularizer::Tgv;

        let mut b = OperatorGraphBuilder::new();
        b += f.stage(ImageProjection, img, vec![u, j])?;
        b += f.stage(Gradient, g, vec![u])?;
        if is_tgv {
            b += f.stage(SymGradient, s, vec![g])?;
        }
        let initial = b.build()?;

        let kyk1 = f.stage(KykFromImage::new(), u, vec![img, g, j])?;
        let kyk2 = if is_tgv { Some(f.stage(UpdateKyk2::new(), g, vec![s, g])?) } else { None };

        let mut b = OperatorGraphBuilder::new();
        b += f.stage(UpdatePrimal, u, vec![u, u, u])?;
        b += f.stage(Gradient, g, vec![u])?;
        b += f.stage(ImageProjection, img, vec![u, j])?;
        b.connect_out_to_in(0, 1, 0);
        b.connect_out_to_in(0, 2, 0);
        let update_primal_1 = b.build()?;

        let update_z1 = if is_tgv {
            f.stage(UpdateZ1::tgv(), g, vec![g; 5])?
        } else {
            f.stage(UpdateZ1::tv(), g, vec![g; 3])?
        }
        .with_norm(NormRole::Update)?;
        let update_kyk1 = f.stage(KykFromImage::with_reference(), u, vec![img, g, j, u])?.with_norm(NormRole::Adjoint)?;

        let tgv = if is_tgv { Some(TgvGraphs::build(&f, layout)?) } else { None };

        Ok(Self { initial, kyk1, kyk2, update_primal_1, update_z1, update_kyk1, tgv, pool, layout: *layout })
    }

    pub fn bind<'a>(&'a self, sms: &'a Sms, coils: &'a Volume, jac: &'a Volume) -> SmsKernels<'a> {
        SmsKernels { graphs: self, sms, coils, jac, img: Mutex::new(Volume::zeros(self.layout.images)) }
    }
}

/// Multiband backend for one Gauss-Newton step
pub struct SmsKernels<'a> {
    graphs: &'a SmsGraphs,
    sms: &'a Sms,
    coils: &'a Volume,
    jac: &'a Volume,
    /// Per-scan images between the streamed stages and the folding
    img: Mutex<Volume>,
}

impl SmsKernels<'_> {
    /// `r_new` from `r`, `A x_new`, `A x` and the residual, whole volume
    fn update_r(&self, state: &mut PdState, params: &KernelParams) -> NormPair {
        let shape = self.graphs.layout.data;
        let shapes = [shape; 4];
        let constants = self.graphs.pool.constants();
        let ctx = ChunkContext::whole(shape, &shapes, &constants);

        let (ax, ax_new) = state.ax.both();
        let (r, r_new) = state.r.split();
        UpdateR.apply(
            &ctx,
            r_new.as_mut_slice(),
            &[r.as_slice(), ax_new.as_slice(), ax.as_slice(), state.res.as_slice()],
            params,
        );
        NormPair { lhs: 0.0, ynorm: diff_norm_sqr(r_new.as_slice(), r.as_slice()) }
    }
}

impl PdKernels for SmsKernels<'_> {
    fn warmup(&self, state: &mut PdState, params: &KernelParams) -> Result<()> {
        let g = self.graphs;
        let mut img = self.img.lock();
        let x = state.x.current();
        let z1 = state.z1.current();

        match state.tgv.as_mut() {
            Some(tgv) => g.initial.eval(
                &mut [&mut *img, state.gradx.current_mut(), tgv.ev.current_mut()],
                &[&[Some(x), Some(self.jac)], &[Some(x)], &[Some(tgv.v.current())]],
                params,
            )?,
            None => g.initial.eval(
                &mut [&mut *img, state.gradx.current_mut()],
                &[&[Some(x), Some(self.jac)], &[Some(x)]],
                params,
            )?,
        }
        self.sms.forward(state.ax.current_mut(), &*img, self.coils)?;

        self.sms.adjoint(&mut *img, state.r.current(), self.coils)?;
        g.kyk1.eval(state.kyk1.current_mut(), &[&*img, z1, self.jac], params)?;

        if let (Some(kyk2), Some(tgv)) = (&g.kyk2, state.tgv.as_mut()) {
            kyk2.eval(tgv.kyk2.current_mut(), &[tgv.z2.current(), z1], params)?;
        }
        Ok(())
    }

    fn primal(&self, state: &mut PdState, params: &KernelParams) -> Result<()> {
        let g = self.graphs;
        let mut img = self.img.lock();
        {
            let (x, x_new) = state.x.split();
            g.update_primal_1.eval(
                &mut [x_new, state.gradx.next_mut(), &mut *img],
                &[&[Some(x), Some(state.kyk1.current()), Some(&state.xk)], &[None], &[None, Some(self.jac)]],
                params,
            )?;
        }
        self.sms.forward(state.ax.next_mut(), &*img, self.coils)?;

        match &g.tgv {
            Some(tgv) => tgv.primal(state, params),
            None => Ok(()),
        }
    }

    fn dual(&self, state: &mut PdState, params: &KernelParams) -> Result<NormPair> {
        let g = self.graphs;

        let mut norms = {
            let (gx, gx_new) = state.gradx.both();
            let (z1, z1_new) = state.z1.split();
            match &state.tgv {
                Some(tgv) => {
                    let (v, v_new) = tgv.v.both();
                    g.update_z1.eval_with_norm(z1_new, &[z1, gx_new, gx, v_new, v], params)?
                }
                None => g.update_z1.eval_with_norm(z1_new, &[z1, gx_new, gx], params)?,
            }
        };

        norms += self.update_r(state, params);

        {
            let mut img = self.img.lock();
            self.sms.adjoint(&mut *img, state.r.next(), self.coils)?;
            let (kyk1, kyk1_new) = state.kyk1.split();
            norms += g.update_kyk1.eval_with_norm(kyk1_new, &[&*img, state.z1.next(), self.jac, kyk1], params)?;
        }

        if let Some(tgv) = &g.tgv {
            norms += tgv.dual(state, params)?;
        }
        Ok(norms)
    }
}
