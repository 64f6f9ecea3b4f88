//! Compute devices and their constant replicas
//!
//! A device is one worker thread of the streaming pipelines. Every device
//! carries its own copy of the per-unknown constants (box constraints and
//! gradient ratio) so kernels never contend on shared state; the host
//! rewrites all replicas between Gauss-Newton steps.

use parking_lot::RwLock;

use crate::error::{ReconError, Result};
use crate::model::Constraint;

/// Per-unknown constants read by the kernels
#[derive(Clone, Debug, PartialEq)]
pub struct DeviceConstants {
    pub constraints: Vec<Constraint>,
    /// Per-unknown weight of the finite-difference gradient
    pub ratio: Vec<f32>,
    /// The first `unknowns_tgv` unknowns are TV/TGV regularized, the rest H1
    pub unknowns_tgv: usize,
    /// Weight of the slice-direction differences
    pub dz: f32,
}

impl DeviceConstants {
    pub fn new(unknowns: usize, unknowns_tgv: usize, dz: f32) -> Self {
        Self {
            constraints: vec![Constraint::unbounded(); unknowns],
            ratio: vec![1.0; unknowns],
            unknowns_tgv: unknowns_tgv.min(unknowns),
            dz,
        }
    }

    #[inline]
    pub fn unknowns(&self) -> usize {
        self.ratio.len()
    }
}

pub struct Device {
    pub id: usize,
    pub constants: RwLock<DeviceConstants>,
}

/// Fixed set of devices shared by every pipeline of a job
pub struct DevicePool {
    devices: Vec<Device>,
    queues_per_device: usize,
}

impl DevicePool {
    pub fn new(num_dev: usize, queues_per_device: usize, constants: DeviceConstants) -> Result<Self> {
        if num_dev == 0 {
            return Err(ReconError::Config("at least one device is required".into()));
        }
        if queues_per_device == 0 {
            return Err(ReconError::Config("queues_per_device must be at least 1".into()));
        }
        let devices = (0..num_dev)
            .map(|id| Device { id, constants: RwLock::new(constants.clone()) })
            .collect();
        Ok(Self { devices, queues_per_device })
    }

    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    pub fn num_dev(&self) -> usize {
        self.devices.len()
    }

    pub fn queues_per_device(&self) -> usize {
        self.queues_per_device
    }

    /// Host-side copy of the constants (all replicas are identical)
    pub fn constants(&self) -> DeviceConstants {
        self.devices[0].constants.read().clone()
    }

    /// Apply `f` to every replica
    pub fn update_constants(&self, f: impl Fn(&mut DeviceConstants)) {
        for device in &self.devices {
            f(&mut device.constants.write());
        }
    }

    pub fn set_constraints(&self, constraints: &[Constraint]) {
        self.update_constants(|c| c.constraints.clone_from_slice(constraints));
    }

    pub fn set_ratio(&self, ratio: &[f32]) {
        self.update_constants(|c| c.ratio.copy_from_slice(ratio));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replicas_stay_in_sync() {
        let pool = DevicePool::new(3, 2, DeviceConstants::new(2, 1, 1.0)).unwrap();

        pool.set_ratio(&[0.5, 2.0]);
        pool.set_constraints(&[Constraint::new(0.0, 1.0, true), Constraint::unbounded()]);

        for device in pool.devices() {
            let c = device.constants.read();
            assert_eq!(c.ratio, vec![0.5, 2.0]);
            assert!(c.constraints[0].real);
            assert_eq!(c.constraints[0].max, 1.0);
        }
    }

    #[test]
    fn test_pool_rejects_zero_devices() {
        assert!(DevicePool::new(0, 2, DeviceConstants::new(1, 1, 1.0)).is_err());
        assert!(DevicePool::new(1, 0, DeviceConstants::new(1, 1, 1.0)).is_err());
    }
}
