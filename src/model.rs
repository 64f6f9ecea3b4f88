//! Signal model interface
//!
//! The physical signal model (forward projection and its Jacobian) lives
//! outside this crate. The reconstruction only needs the narrow [`Model`]
//! trait plus the per-unknown box constraints and scale factors the model
//! owns.
//!
//! Model-facing volumes are unknown-major:
//! - estimate `(unknowns, slices, rows, cols, 1)`
//! - forward signal `(scans, slices, rows, cols, 1)`
//! - Jacobian `(unknowns * scans, slices, rows, cols, 1)`, channel `u * scans + n`

use serde::{Deserialize, Serialize};

use crate::volume::{Cpx, Volume};

/// Box constraint of one unknown
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Constraint {
    pub min: f32,
    pub max: f32,
    /// Force the unknown to be real-valued
    pub real: bool,
}

impl Constraint {
    pub fn new(min: f32, max: f32, real: bool) -> Self {
        Self { min, max, real }
    }

    pub fn unbounded() -> Self {
        Self { min: f32::NEG_INFINITY, max: f32::INFINITY, real: false }
    }

    /// Follow a rescaling of the unknown by `scale`
    pub fn update(&mut self, scale: f32) {
        self.min /= scale;
        self.max /= scale;
    }

    /// Project one value onto the feasible set
    ///
    /// Real unknowns drop the imaginary part and clamp the real part;
    /// complex unknowns clamp the magnitude and keep the phase.
    #[inline]
    pub fn project(&self, value: Cpx) -> Cpx {
        if self.real {
            return Cpx::new(value.re.max(self.min).min(self.max), 0.0);
        }
        let norm = value.norm();
        if norm == 0.0 {
            return if self.min > 0.0 { Cpx::new(self.min, 0.0) } else { value };
        }
        let clamped = norm.max(self.min).min(self.max);
        if clamped == norm {
            value
        } else {
            value * (clamped / norm)
        }
    }
}

/// Physical signal model of a reconstruction job
pub trait Model {
    /// Number of unknown parameter maps
    fn unknowns(&self) -> usize;

    /// The first `unknowns_tgv` unknowns are TV/TGV regularized, the rest H1
    fn unknowns_tgv(&self) -> usize;

    /// Initial estimate (unknown-major)
    fn guess(&self) -> Volume;

    /// Signal of every scan at estimate `x`
    fn execute_forward(&self, x: &Volume) -> Volume;

    /// Jacobian of the signal at estimate `x`
    fn execute_gradient(&self, x: &Volume) -> Volume;

    fn constraints(&self) -> &[Constraint];

    fn constraints_mut(&mut self) -> &mut [Constraint];

    /// Per-unknown scale between the estimate and the physical parameter
    fn uk_scale(&self) -> &[f32];

    fn uk_scale_mut(&mut self) -> &mut [f32];

    /// Estimate in physical units
    fn rescale(&self, x: &Volume) -> Volume {
        let mut out = x.clone();
        let per_unknown = x.shape().slice_len();
        for (chunk, &scale) in out.as_mut_slice().chunks_mut(per_unknown).zip(self.uk_scale()) {
            for v in chunk.iter_mut() {
                *v *= scale;
            }
        }
        out
    }

    /// Visualization hook, called when iteration display is enabled
    fn plot_unknowns(&self, _x: &Volume) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_real_constraint_pins_to_bounds() {
        let c = Constraint::new(0.5, 2.0, true);

        assert_eq!(c.project(Cpx::new(-3.0, 1.0)), Cpx::new(0.5, 0.0));
        assert_eq!(c.project(Cpx::new(7.0, -2.0)), Cpx::new(2.0, 0.0));
        assert_eq!(c.project(Cpx::new(1.25, 4.0)), Cpx::new(1.25, 0.0));
    }

    #[test]
    fn test_complex_constraint_clamps_magnitude() {
        let c = Constraint::new(1.0, 5.0, false);

        let big = c.project(Cpx::new(6.0, 8.0));
        assert!((big - Cpx::new(3.0, 4.0)).norm() < 1e-6);

        let small = c.project(Cpx::new(0.0, 0.5));
        assert!((small - Cpx::new(0.0, 1.0)).norm() < 1e-6);

        assert_eq!(c.project(Cpx::new(0.0, 0.0)), Cpx::new(1.0, 0.0));
        assert_eq!(c.project(Cpx::new(2.0, 2.0)), Cpx::new(2.0, 2.0));
    }

    #[test]
    fn test_unbounded_is_identity() {
        let c = Constraint::unbounded();
        let v = Cpx::new(-1e6, 3e5);
        assert_eq!(c.project(v), v);
    }

    #[test]
    fn test_update_divides_bounds() {
        let mut c = Constraint::new(2.0, 10.0, true);
        c.update(4.0);
        assert_eq!((c.min, c.max), (0.5, 2.5));

        let mut open = Constraint::unbounded();
        open.update(3.0);
        assert_eq!(open.max, f32::INFINITY);
    }
}
