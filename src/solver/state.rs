//! Primal-dual state
//!
//! Every variable the iteration updates lives in a two-slot [`PingPong`]:
//! the kernels read the current slot and write the next one, and a single
//! flip per iteration makes the new values current.

use crate::config::Regularizer;
use crate::error::{ReconError, Result};
use crate::volume::{Shape, Volume};

/// Two buffers of which one is current
#[derive(Clone, Debug)]
pub struct PingPong<T> {
    slots: [T; 2],
    cur: usize,
}

impl<T> PingPong<T> {
    pub fn new(current: T, next: T) -> Self {
        Self { slots: [current, next], cur: 0 }
    }

    #[inline]
    pub fn current(&self) -> &T {
        &self.slots[self.cur]
    }

    #[inline]
    pub fn current_mut(&mut self) -> &mut T {
        &mut self.slots[self.cur]
    }

    #[inline]
    pub fn next(&self) -> &T {
        &self.slots[1 - self.cur]
    }

    #[inline]
    pub fn next_mut(&mut self) -> &mut T {
        &mut self.slots[1 - self.cur]
    }

    /// Current slot for reading and next slot for writing
    pub fn split(&mut self) -> (&T, &mut T) {
        let (a, b) = self.slots.split_at_mut(1);
        if self.cur == 0 {
            (&a[0], &mut b[0])
        } else {
            (&b[0], &mut a[0])
        }
    }

    /// Both slots as `(current, next)`
    pub fn both(&self) -> (&T, &T) {
        (self.current(), self.next())
    }

    #[inline]
    pub fn flip(&mut self) {
        self.cur = 1 - self.cur;
    }

    pub fn into_current(self) -> T {
        let [a, b] = self.slots;
        if self.cur == 0 {
            a
        } else {
            b
        }
    }
}

impl<T: Clone> PingPong<T> {
    /// Both slots initialised with `value`
    pub fn from_clone(value: T) -> Self {
        Self::new(value.clone(), value)
    }
}

/// Slice-major shapes of all volumes one reconstruction works with
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Layout {
    /// Unknowns `(slices, unknowns, rows, cols, 1)`
    pub unknowns: Shape,
    /// Gradients `(slices, unknowns, rows, cols, 3)`
    pub grad: Shape,
    /// Symmetrized gradients `(slices, unknowns, rows, cols, 6)`
    pub sym: Shape,
    /// Per-scan images `(slices, scans, rows, cols, 1)`
    pub images: Shape,
    /// Coil sensitivities `(slices, coils, rows, cols, 1)`
    pub coils: Shape,
    /// Jacobian `(slices, unknowns * scans, rows, cols, 1)`
    pub jac: Shape,
    /// Measured data `(slices or slabs, scans * coils, rows, cols, 1)`
    pub data: Shape,
}

impl Layout {
    pub fn new(slices: usize, unknowns: usize, scans: usize, coils: usize, rows: usize, cols: usize) -> Self {
        let u = Shape::new(slices, unknowns, rows, cols, 1);
        Self {
            unknowns: u,
            grad: u.with_comps(3),
            sym: u.with_comps(6),
            images: Shape::new(slices, scans, rows, cols, 1),
            coils: Shape::new(slices, coils, rows, cols, 1),
            jac: Shape::new(slices, unknowns * scans, rows, cols, 1),
            data: Shape::new(slices, scans * coils, rows, cols, 1),
        }
    }

    /// Same layout with data folded into `slabs` slabs
    pub fn with_data_slices(self, slabs: usize) -> Self {
        Self { data: self.data.with_slices(slabs), ..self }
    }

    pub fn slices(&self) -> usize {
        self.unknowns.slices
    }

    pub fn scans(&self) -> usize {
        self.images.channels
    }
}

/// Dual and auxiliary variables carried from one solve to the next
#[derive(Clone, Debug, PartialEq)]
pub struct WarmStart {
    pub r: Volume,
    pub z1: Volume,
    pub v: Option<Volume>,
    pub z2: Option<Volume>,
}

impl WarmStart {
    pub fn zeros(layout: &Layout, regularizer: Regularizer) -> Self {
        let tgv = regularizer == Regularizer::Tgv;
        Self {
            r: Volume::zeros(layout.data),
            z1: Volume::zeros(layout.grad),
            v: tgv.then(|| Volume::zeros(layout.grad)),
            z2: tgv.then(|| Volume::zeros(layout.sym)),
        }
    }
}

/// Second-order variables of the TGV variant
pub struct TgvState {
    pub v: PingPong<Volume>,
    /// `E v`
    pub ev: PingPong<Volume>,
    /// `-z1 - div_sym z2`
    pub kyk2: PingPong<Volume>,
    pub z2: PingPong<Volume>,
}

/// Full state of one primal-dual solve
pub struct PdState {
    pub x: PingPong<Volume>,
    /// `∇x`
    pub gradx: PingPong<Volume>,
    /// `A x`
    pub ax: PingPong<Volume>,
    /// `Aᴴ r - div z1`
    pub kyk1: PingPong<Volume>,
    pub r: PingPong<Volume>,
    pub z1: PingPong<Volume>,
    pub tgv: Option<TgvState>,
    /// Linearization point
    pub xk: Volume,
    /// Linearized residual
    pub res: Volume,
    pub unknowns_tgv: usize,
}

impl PdState {
    /// Start a solve at `x` (also the linearization point) from a warm start
    pub fn new(layout: &Layout, unknowns_tgv: usize, x: Volume, res: Volume, warm: &WarmStart) -> Result<Self> {
        let check = |name: &str, got: Shape, expected: Shape| -> Result<()> {
            if got != expected {
                return Err(ReconError::Shape(format!("{} has shape {:?}, expected {:?}", name, got, expected)));
            }
            Ok(())
        };
        check("estimate", x.shape(), layout.unknowns)?;
        check("residual", res.shape(), layout.data)?;
        check("warm-start r", warm.r.shape(), layout.data)?;
        check("warm-start z1", warm.z1.shape(), layout.grad)?;

        let tgv = match (&warm.v, &warm.z2) {
            (Some(v), Some(z2)) => {
                check("warm-start v", v.shape(), layout.grad)?;
                check("warm-start z2", z2.shape(), layout.sym)?;
                Some(TgvState {
                    v: PingPong::new(v.clone(), Volume::zeros(layout.grad)),
                    ev: PingPong::from_clone(Volume::zeros(layout.sym)),
                    kyk2: PingPong::from_clone(Volume::zeros(layout.grad)),
                    z2: PingPong::new(z2.clone(), Volume::zeros(layout.sym)),
                })
            }
            _ => None,
        };

        Ok(Self {
            x: PingPong::new(x.clone(), Volume::zeros(layout.unknowns)),
            gradx: PingPong::from_clone(Volume::zeros(layout.grad)),
            ax: PingPong::from_clone(Volume::zeros(layout.data)),
            kyk1: PingPong::from_clone(Volume::zeros(layout.unknowns)),
            r: PingPong::new(warm.r.clone(), Volume::zeros(layout.data)),
            z1: PingPong::new(warm.z1.clone(), Volume::zeros(layout.grad)),
            tgv,
            xk: x,
            res,
            unknowns_tgv,
        })
    }

    pub fn is_tgv(&self) -> bool {
        self.tgv.is_some()
    }

    /// Make all freshly written slots current
    pub fn flip(&mut self) {
        self.x.flip();
        self.gradx.flip();
        self.ax.flip();
        self.kyk1.flip();
        self.r.flip();
        self.z1.flip();
        if let Some(tgv) = self.tgv.as_mut() {
            tgv.v.flip();
            tgv.ev.flip();
            tgv.kyk2.flip();
            tgv.z2.flip();
        }
    }

    /// Copy the current dual and auxiliary variables into `warm`
    pub fn store_warm_start(&self, warm: &mut WarmStart) {
        warm.r = self.r.current().clone();
        warm.z1 = self.z1.current().clone();
        if let Some(tgv) = &self.tgv {
            warm.v = Some(tgv.v.current().clone());
            warm.z2 = Some(tgv.z2.current().clone());
        }
    }
}
