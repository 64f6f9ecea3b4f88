//! Reconstruction strategies
//!
//! A [`ReconStrategy`] bundles everything that depends on the acquisition
//! domain: the data-space shapes, the compiled operator graphs, the
//! transform of model signals into data space and the primal-dual backend.
//! It is chosen once per job from the [`ReconMode`].

use std::sync::Arc;

use crate::config::{JobConfig, ReconMode};
use crate::encoding::{Cartesian, Encoding, ImageSpace, Sms};
use crate::error::{ReconError, Result};
use crate::kernels::{ForwardOp, ImageProjection, KernelParams, TransformOp};
use crate::solver::sms::SmsGraphs;
use crate::solver::streamed::StreamedGraphs;
use crate::solver::{solve_with_progress, Evaluation, Layout, PdSettings, PdState, SolveReport};
use crate::streaming::{ChunkPlan, DevicePool, StreamOperator};
use crate::volume::{Cpx, Shape, Volume};

/// Multiband acquisition parameters
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SmsSetup {
    /// Slices excited together
    pub mb: usize,
    /// Row shift between neighbouring bands
    pub shift: usize,
}

/// Measured data and the acquisition it came from
pub struct Acquisition {
    /// Slice-major `(slices or slabs, scans * coils, rows, cols, 1)`, channel `n * coils + c`
    pub data: Volume,
    /// Coil sensitivities `(slices, coils, rows, cols, 1)`; k-space modes only
    pub coils: Option<Volume>,
    /// Sampling weights `(scans, rows, cols)`; fully sampled if absent
    pub mask: Option<Vec<f32>>,
    pub sms: Option<SmsSetup>,
    /// Weight of the slice-direction differences
    pub dz: f32,
}

impl Acquisition {
    /// Fully sampled image-space data
    pub fn image_space(data: Volume) -> Self {
        Self { data, coils: None, mask: None, sms: None, dz: 1.0 }
    }
}

pub trait ReconStrategy {
    fn layout(&self) -> &Layout;

    /// `T(images)`: per-scan images to data space
    fn transform(&self, images: &Volume) -> Result<Volume>;

    /// `A x = T(J x)`, the linearized forward operator
    fn linearized(&self, x: &Volume, jac: &Volume) -> Result<Volume>;

    /// One primal-dual solve with the Jacobian `jac`
    fn solve(
        &self,
        state: &mut PdState,
        jac: &Volume,
        params: KernelParams,
        settings: &PdSettings,
        progress: &mut dyn FnMut(&Evaluation<'_>),
    ) -> Result<SolveReport>;
}

/// Slice-separable encodings (image space and Cartesian k-space)
pub struct StreamedStrategy {
    layout: Layout,
    graphs: StreamedGraphs,
    transform: StreamOperator,
    forward: StreamOperator,
    coils: Volume,
}

impl StreamedStrategy {
    pub fn new(
        config: &JobConfig,
        layout: Layout,
        encoding: Arc<dyn Encoding>,
        coils: Volume,
        plan: ChunkPlan,
        pool: Arc<DevicePool>,
    ) -> Result<Self> {
        let l = &layout;
        let graphs = StreamedGraphs::build(config.regularizer, l, encoding.clone(), plan, Arc::clone(&pool))?;
        let transform = StreamOperator::new(
            Arc::new(TransformOp::new(encoding.clone())),
            l.data,
            vec![l.images, l.coils],
            plan,
            Arc::clone(&pool),
        )?;
        let forward =
            StreamOperator::new(Arc::new(ForwardOp::new(encoding)), l.data, vec![l.unknowns, l.coils, l.jac], plan, pool)?;
        Ok(Self { layout, graphs, transform, forward, coils })
    }
}

impl ReconStrategy for StreamedStrategy {
    fn layout(&self) -> &Layout {
        &self.layout
    }

    fn transform(&self, images: &Volume) -> Result<Volume> {
        let mut out = Volume::zeros(self.layout.data);
        self.transform.eval(&mut out, &[images, &self.coils], &KernelParams::default())?;
        Ok(out)
    }

    fn linearized(&self, x: &Volume, jac: &Volume) -> Result<Volume> {
        let mut out = Volume::zeros(self.layout.data);
        self.forward.eval(&mut out, &[x, &self.coils, jac], &KernelParams::default())?;
        Ok(out)
    }

    fn solve(
        &self,
        state: &mut PdState,
        jac: &Volume,
        params: KernelParams,
        settings: &PdSettings,
        progress: &mut dyn FnMut(&Evaluation<'_>),
    ) -> Result<SolveReport> {
        let kernels = self.graphs.bind(&self.coils, jac);
        solve_with_progress(&kernels, state, params, settings, |e| progress(e))
    }
}

/// Multiband k-space
pub struct SmsStrategy {
    layout: Layout,
    graphs: SmsGraphs,
    sms: Sms,
    project: StreamOperator,
    coils: Volume,
}

impl SmsStrategy {
    pub fn new(
        config: &JobConfig,
        layout: Layout,
        sms: Sms,
        coils: Volume,
        plan: ChunkPlan,
        pool: Arc<DevicePool>,
    ) -> Result<Self> {
        let graphs = SmsGraphs::build(config.regularizer, &layout, plan, Arc::clone(&pool))?;
        let project = StreamOperator::new(
            Arc::new(ImageProjection),
            layout.images,
            vec![layout.unknowns, layout.jac],
            plan,
            pool,
        )?;
        Ok(Self { layout, graphs, sms, project, coils })
    }
}

impl ReconStrategy for SmsStrategy {
    fn layout(&self) -> &Layout {
        &self.layout
    }

    fn transform(&self, images: &Volume) -> Result<Volume> {
        let mut out = Volume::zeros(self.layout.data);
        self.sms.forward(&mut out, images, &self.coils)?;
        Ok(out)
    }

    fn linearized(&self, x: &Volume, jac: &Volume) -> Result<Volume> {
        let mut img = Volume::zeros(self.layout.images);
        self.project.eval(&mut img, &[x, jac], &KernelParams::default())?;
        self.transform(&img)
    }

    fn solve(
        &self,
        state: &mut PdState,
        jac: &Volume,
        params: KernelParams,
        settings: &PdSettings,
        progress: &mut dyn FnMut(&Evaluation<'_>),
    ) -> Result<SolveReport> {
        let kernels = self.graphs.bind(&self.sms, &self.coils, jac);
        solve_with_progress(&kernels, state, params, settings, |e| progress(e))
    }
}

fn check_shape(name: &str, got: &Volume, expected: Shape) -> Result<()> {
    if got.shape() != expected {
        return Err(ReconError::Shape(format!("{} has shape {:?}, expected {:?}", name, got.shape(), expected)));
    }
    Ok(())
}

/// Select and build the strategy of `config.mode`
///
/// `slices`, `unknowns`, `rows` and `cols` come from the model's initial
/// guess; scans and coils are derived from the data.
pub fn select(
    config: &JobConfig,
    acq: &Acquisition,
    slices: usize,
    unknowns: usize,
    rows: usize,
    cols: usize,
    pool: Arc<DevicePool>,
) -> Result<Box<dyn ReconStrategy>> {
    let plan = ChunkPlan::new(slices, &config.stream)?;
    if config.mode != ReconMode::KspaceSms && acq.sms.is_some() {
        return Err(ReconError::Unimplemented("multiband data outside kspace_sms mode"));
    }

    let sens = match config.mode {
        ReconMode::Imagespace => None,
        _ => Some(
            acq.coils
                .as_ref()
                .ok_or_else(|| ReconError::Config("k-space reconstruction requires coil sensitivities".into()))?,
        ),
    };
    let num_coils = sens.map_or(1, |c| c.shape().channels);
    let channels = acq.data.shape().channels;
    if num_coils == 0 || channels % num_coils != 0 {
        return Err(ReconError::Shape(format!("{} data channels do not split into {} coils", channels, num_coils)));
    }
    let scans = channels / num_coils;
    let layout = Layout::new(slices, unknowns, scans, num_coils, rows, cols);

    let coils = match sens {
        Some(c) => {
            check_shape("coil sensitivities", c, layout.coils)?;
            c.clone()
        }
        None => Volume::filled(layout.coils, Cpx::new(1.0, 0.0)),
    };
    let cartesian = || -> Result<Cartesian> {
        match &acq.mask {
            Some(m) => Cartesian::new(scans, num_coils, rows, cols, m.clone()),
            None => Ok(Cartesian::fully_sampled(scans, num_coils, rows, cols)),
        }
    };

    let strategy: Box<dyn ReconStrategy> = match config.mode {
        ReconMode::Imagespace => {
            check_shape("image-space data", &acq.data, layout.data)?;
            let encoding: Arc<dyn Encoding> = Arc::new(ImageSpace::new(scans, rows, cols));
            Box::new(StreamedStrategy::new(config, layout, encoding, coils, plan, pool)?)
        }
        ReconMode::Kspace => {
            check_shape("k-space data", &acq.data, layout.data)?;
            let encoding: Arc<dyn Encoding> = Arc::new(cartesian()?);
            Box::new(StreamedStrategy::new(config, layout, encoding, coils, plan, pool)?)
        }
        ReconMode::KspaceSms => {
            let setup = acq.sms.ok_or(ReconError::Unimplemented("kspace_sms mode without multiband setup"))?;
            let sms = Sms::new(setup.mb, setup.shift, cartesian()?)?;
            let layout = layout.with_data_slices(sms.slabs(slices)?);
            check_shape("multiband data", &acq.data, layout.data)?;
            Box::new(SmsStrategy::new(config, layout, sms, coils, plan, pool)?)
        }
    };
    log::info!("{:?} reconstruction: {:?}", config.mode, strategy.layout());
    Ok(strategy)
}
