//! Multi-stage operator graphs
//!
//! An [`OperatorGraphBuilder`] accumulates streamed stages (`+=` or
//! [`OperatorGraphBuilder::push`]) and output→input links
//! ([`OperatorGraphBuilder::connect_out_to_in`]). [`OperatorGraphBuilder::build`]
//! validates the wiring once and yields an immutable [`OperatorGraph`] that
//! runs all stages chunk by chunk in a single pass.

use std::ops::AddAssign;
use std::sync::Arc;

use super::chunk::ChunkPlan;
use super::device::DevicePool;
use super::pipeline::{self, ConnectionTable};
use super::stream::{NormPair, StreamOperator};
use crate::error::{ReconError, Result};
use crate::kernels::KernelParams;
use crate::volume::Volume;

/// Output of stage `from` feeds input `slot` of stage `to`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Link {
    pub from: usize,
    pub to: usize,
    pub slot: usize,
}

#[derive(Default)]
pub struct OperatorGraphBuilder {
    stages: Vec<StreamOperator>,
    links: Vec<Link>,
    reverse: bool,
}

impl OperatorGraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Traverse chunks from the last to the first
    pub fn reverse_dir(mut self, reverse: bool) -> Self {
        self.reverse = reverse;
        self
    }

    pub fn push(&mut self, stage: StreamOperator) -> &mut Self {
        self.stages.push(stage);
        self
    }

    pub fn connect_out_to_in(&mut self, from: usize, to: usize, slot: usize) -> &mut Self {
        self.links.push(Link { from, to, slot });
        self
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn build(self) -> Result<OperatorGraph> {
        let first = self
            .stages
            .first()
            .ok_or_else(|| ReconError::Config("operator graph has no stages".into()))?;
        let plan = *first.plan();
        let pool = Arc::clone(first.pool());

        for (i, stage) in self.stages.iter().enumerate() {
            if *stage.plan() != plan || !Arc::ptr_eq(stage.pool(), &pool) {
                return Err(ReconError::Config(format!(
                    "stage {} ({}) uses a different slice partitioning or device pool",
                    i,
                    stage.name()
                )));
            }
        }

        for (k, link) in self.links.iter().enumerate() {
            if link.from >= link.to || link.to >= self.stages.len() {
                return Err(ReconError::Config(format!(
                    "link {}: stage {} cannot feed stage {} ({} stages)",
                    k,
                    link.from,
                    link.to,
                    self.stages.len()
                )));
            }
            let target = &self.stages[link.to];
            if link.slot >= target.in_shapes().len() {
                return Err(ReconError::Config(format!(
                    "link {}: stage {} ({}) has no input {}",
                    k,
                    link.to,
                    target.name(),
                    link.slot
                )));
            }
            if self.links[..k].iter().any(|l| l.to == link.to && l.slot == link.slot) {
                return Err(ReconError::Config(format!(
                    "link {}: input {} of stage {} is already connected",
                    k, link.slot, link.to
                )));
            }
            let produced = self.stages[link.from].out_shape();
            let expected = target.in_shapes()[link.slot];
            if produced != expected {
                return Err(ReconError::Config(format!(
                    "link {}: stage {} produces {:?} but input {} of stage {} expects {:?}",
                    k, link.from, produced, link.slot, link.to, expected
                )));
            }
        }

        let connected = pipeline::connection_table(&self.stages, &self.links);
        Ok(OperatorGraph { stages: self.stages, connected, reverse: self.reverse, plan, pool })
    }
}

impl AddAssign<StreamOperator> for OperatorGraphBuilder {
    fn add_assign(&mut self, stage: StreamOperator) {
        self.push(stage);
    }
}

/// Validated, immutable multi-stage pipeline
pub struct OperatorGraph {
    stages: Vec<StreamOperator>,
    connected: ConnectionTable,
    reverse: bool,
    plan: ChunkPlan,
    pool: Arc<DevicePool>,
}

impl OperatorGraph {
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn is_reverse(&self) -> bool {
        self.reverse
    }

    /// Run the graph; `inputs[i][slot]` must be `None` exactly for connected slots
    pub fn eval(&self, outputs: &mut [&mut Volume], inputs: &[&[Option<&Volume>]], params: &KernelParams) -> Result<()> {
        self.eval_with_norm(outputs, inputs, params).map(|_| ())
    }

    pub fn eval_with_norm(
        &self,
        outputs: &mut [&mut Volume],
        inputs: &[&[Option<&Volume>]],
        params: &KernelParams,
    ) -> Result<NormPair> {
        pipeline::run(&self.plan, &self.pool, &self.stages, &self.connected, self.reverse, outputs, inputs, params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StreamConfig;
    use crate::kernels::{Gradient, SymGradient, UpdateV};
    use crate::streaming::device::DeviceConstants;
    use crate::streaming::stream::NormRole;
    use crate::utils::gradient::{symgrad_inplace, SlabGeometry};
    use crate::volume::{Cpx, Shape};

    fn setup(num_dev: usize) -> (ChunkPlan, Arc<DevicePool>) {
        let cfg = StreamConfig { par_slices: 2, overlap: 1, num_dev, queues_per_device: 2 };
        let pool = Arc::new(DevicePool::new(num_dev, 2, DeviceConstants::new(1, 1, 1.0)).unwrap());
        (ChunkPlan::new(8, &cfg).unwrap(), pool)
    }

    fn field(shape: Shape, seed: f32) -> Volume {
        let data = (0..shape.len()).map(|i| Cpx::new((i as f32 * 0.4 + seed).cos(), (i as f32 * 0.13).sin())).collect();
        Volume::from_vec(shape, data).unwrap()
    }

    #[test]
    fn test_connected_stages_match_sequential_evaluation() {
        for num_dev in [1, 2] {
            let (plan, pool) = setup(num_dev);
            let g = Shape::new(8, 1, 3, 4, 3);
            let s = g.with_comps(6);
            let params = KernelParams { tau: 0.5, ..Default::default() };

            let update = StreamOperator::new(Arc::new(UpdateV), g, vec![g, g], plan, pool.clone()).unwrap();
            let symgrad = StreamOperator::new(Arc::new(SymGradient), s, vec![g], plan, pool.clone()).unwrap();

            let mut builder = OperatorGraphBuilder::new().reverse_dir(true);
            builder += update.with_norm(NormRole::Update).unwrap();
            builder += symgrad;
            builder.connect_out_to_in(0, 1, 0);
            let graph = builder.build().unwrap();

            let v = field(g, 0.1);
            let kyk2 = field(g, 0.7);
            let mut v_new = Volume::zeros(g);
            let mut ev = Volume::zeros(s);
            let norms = graph
                .eval_with_norm(&mut [&mut v_new, &mut ev], &[&[Some(&v), Some(&kyk2)], &[None]], &params)
                .unwrap();

            let mut expected = vec![Cpx::new(0.0, 0.0); s.len()];
            symgrad_inplace(&mut expected, v_new.as_slice(), g.with_comps(1), &SlabGeometry::whole(8, 1.0));
            for (a, b) in ev.as_slice().iter().zip(expected.iter()) {
                assert!((a - b).norm() < 1e-6);
            }
            let expected_norm = 0.25 * kyk2.norm_sqr();
            assert!((norms.ynorm - expected_norm).abs() / expected_norm < 1e-5);
        }
    }

    #[test]
    fn test_backward_link_is_rejected() {
        let (plan, pool) = setup(1);
        let u = Shape::new(8, 1, 3, 4, 1);
        let mut builder = OperatorGraphBuilder::new();
        builder += StreamOperator::new(Arc::new(Gradient), u.with_comps(3), vec![u], plan, pool.clone()).unwrap();
        builder += StreamOperator::new(Arc::new(Gradient), u.with_comps(3), vec![u], plan, pool).unwrap();
        builder.connect_out_to_in(1, 0, 0);

        assert!(matches!(builder.build(), Err(ReconError::Config(_))));
    }

    #[test]
    fn test_mismatched_link_shape_is_rejected() {
        let (plan, pool) = setup(1);
        let u = Shape::new(8, 1, 3, 4, 1);
        let mut builder = OperatorGraphBuilder::new();
        builder += StreamOperator::new(Arc::new(Gradient), u.with_comps(3), vec![u], plan, pool.clone()).unwrap();
        builder += StreamOperator::new(Arc::new(Gradient), u.with_comps(3), vec![u], plan, pool).unwrap();
        // gradient output (3 comps) cannot feed an image input
        builder.connect_out_to_in(0, 1, 0);

        assert!(matches!(builder.build(), Err(ReconError::Config(_))));
    }

    #[test]
    fn test_connected_slot_must_be_empty() {
        let (plan, pool) = setup(1);
        let g = Shape::new(8, 1, 3, 4, 3);
        let mut builder = OperatorGraphBuilder::new();
        builder += StreamOperator::new(Arc::new(UpdateV), g, vec![g, g], plan, pool.clone()).unwrap();
        builder += StreamOperator::new(Arc::new(SymGradient), g.with_comps(6), vec![g], plan, pool).unwrap();
        builder.connect_out_to_in(0, 1, 0);
        let graph = builder.build().unwrap();

        let v = field(g, 0.0);
        let mut v_new = Volume::zeros(g);
        let mut ev = Volume::zeros(g.with_comps(6));
        let err = graph
            .eval(&mut [&mut v_new, &mut ev], &[&[Some(&v), Some(&v)], &[Some(&v)]], &KernelParams::default())
            .unwrap_err();
        assert!(matches!(err, ReconError::Shape(_)));
    }
}
