use qmri_irgn::encoding::{Cartesian, Encoding, Sms};
use qmri_irgn::{Cpx, Shape, Volume};

use super::linear_model::LinearModel;

/// Piecewise constant maps (unknown-major): unknown 0 splits left/right,
/// unknown 1 top/bottom, further unknowns are flat
pub fn piecewise_truth(unknowns: usize, slices: usize, rows: usize, cols: usize) -> Volume {
    let mut truth = Volume::zeros(Shape::new(unknowns, slices, rows, cols, 1));
    for u in 0..unknowns {
        for s in 0..slices {
            for y in 0..rows {
                for x in 0..cols {
                    let v = match u {
                        0 if x < cols / 2 => 1.0,
                        0 => 2.0,
                        1 if y < rows / 2 => 0.5,
                        1 => 1.5,
                        _ => 1.0,
                    };
                    truth.set(u, s, y, x, 0, Cpx::new(v, 0.0));
                }
            }
        }
    }
    truth
}

/// Per-scan images of `truth`, slice-major
pub fn images(model: &LinearModel, truth: &Volume) -> Volume {
    model.signal_of_physical(truth).swap_outer_axes()
}

/// Smooth, distinct coil sensitivities `(slices, coils, rows, cols, 1)`
pub fn coil_maps(slices: usize, coils: usize, rows: usize, cols: usize) -> Volume {
    let mut maps = Volume::zeros(Shape::new(slices, coils, rows, cols, 1));
    for s in 0..slices {
        for c in 0..coils {
            for y in 0..rows {
                for x in 0..cols {
                    let phase = 0.3 * (c as f32 + 1.0) * (x as f32 / cols as f32) + 0.2 * s as f32;
                    let mag = 0.6 + 0.4 * ((c as f32 + 1.0) * y as f32 / rows as f32 + 0.5 * s as f32).cos().abs();
                    maps.set(s, c, y, x, 0, Cpx::from_polar(mag, phase));
                }
            }
        }
    }
    maps
}

/// Fully sampled Cartesian data of `truth`
pub fn kspace_data(model: &LinearModel, truth: &Volume, coils: &Volume) -> Volume {
    let img = images(model, truth);
    let nc = coils.shape().channels;
    let encoding = Cartesian::fully_sampled(model.scans(), nc, model.rows, model.cols);
    let mut out = Volume::zeros(Shape::new(model.slices, model.scans() * nc, model.rows, model.cols, 1));
    encoding.forward(out.as_mut_slice(), img.as_slice(), coils.as_slice(), model.slices);
    out
}

/// Fully sampled multiband data of `truth`
pub fn sms_data(model: &LinearModel, truth: &Volume, coils: &Volume, mb: usize, shift: usize) -> Volume {
    let img = images(model, truth);
    let nc = coils.shape().channels;
    let sms = Sms::new(mb, shift, Cartesian::fully_sampled(model.scans(), nc, model.rows, model.cols)).unwrap();
    let mut out = Volume::zeros(sms.data_shape(img.shape()).unwrap());
    sms.forward(&mut out, &img, coils).unwrap();
    out
}

/// `‖a - b‖ / ‖b‖`
pub fn relative_error(a: &Volume, b: &Volume) -> f64 {
    a.sub(b).unwrap().norm() / b.norm()
}
