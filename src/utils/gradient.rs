//! Finite-difference operators on complex slice chunks
//!
//! Forward-difference gradient and its negative adjoint (divergence), plus
//! the symmetrized gradient of a vector field and its negative adjoint used
//! by TGV. All operators work on a chunk of consecutive slices that may be
//! part of a larger volume; [`SlabGeometry`] tells them where the chunk sits
//! so that the global volume boundary gets zero boundary conditions while
//! chunk-internal edges are treated as interior (those edge slices are halo
//! and are discarded by the caller).
//!
//! Layout (slice-major): voxel index `v = ((s * unknowns + u) * rows + y) * cols + x`,
//! gradient components at `3 * v + k` ordered `[x, y, z]`, symmetric tensor
//! components at `6 * v + k` ordered `[xx, yy, zz, xy, xz, yz]`.

use crate::volume::{Cpx, Shape, ZERO};

/// Position of a chunk within the full slice axis
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SlabGeometry {
    /// Global index of the chunk's first local slice
    pub first_slice: usize,
    pub total_slices: usize,
    /// Weight of the slice-direction differences
    pub dz: f32,
}

impl SlabGeometry {
    /// Geometry of a whole volume
    pub fn whole(total_slices: usize, dz: f32) -> Self {
        Self { first_slice: 0, total_slices, dz }
    }

    /// True if local slice `s` has a successor inside this chunk and the volume
    #[inline]
    fn has_next(&self, s: usize, local_slices: usize) -> bool {
        s + 1 < local_slices && self.first_slice + s + 1 < self.total_slices
    }

    /// True if local slice `s` is not the global last slice
    #[inline]
    fn before_last(&self, s: usize) -> bool {
        self.first_slice + s + 1 < self.total_slices
    }

    /// True if local slice `s` has a predecessor inside this chunk
    #[inline]
    fn has_prev(&self, s: usize) -> bool {
        s > 0 && self.first_slice + s > 0
    }

    #[inline]
    fn after_first(&self, s: usize) -> bool {
        self.first_slice + s > 0
    }
}

/// Forward difference gradient (in-place)
///
/// Zero at the last index of every axis. The gradient of unknown `u` is
/// multiplied by `ratio[u]`.
///
/// # Arguments
/// * `out` - Gradient, 3 components per voxel (pre-allocated)
/// * `x` - Input chunk
/// * `grid` - Voxel grid of the chunk (`channels` = unknowns)
/// * `geom` - Chunk position
/// * `ratio` - Per-unknown gradient weight
pub fn grad_inplace(out: &mut [Cpx], x: &[Cpx], grid: Shape, geom: &SlabGeometry, ratio: &[f32]) {
    let (ns, nu, ny, nx) = (grid.slices, grid.channels, grid.rows, grid.cols);
    let stride = nu * ny * nx;
    debug_assert_eq!(x.len(), ns * stride);
    debug_assert_eq!(out.len(), 3 * ns * stride);

    for s in 0..ns {
        let z_next = geom.has_next(s, ns);
        for u in 0..nu {
            let r = ratio[u];
            for j in 0..ny {
                for i in 0..nx {
                    let v = ((s * nu + u) * ny + j) * nx + i;
                    let x0 = x[v];

                    let gx = if i + 1 < nx { x[v + 1] - x0 } else { ZERO };
                    let gy = if j + 1 < ny { x[v + nx] - x0 } else { ZERO };
                    let gz = if z_next { (x[v + stride] - x0) * geom.dz } else { ZERO };

                    out[3 * v] = gx * r;
                    out[3 * v + 1] = gy * r;
                    out[3 * v + 2] = gz * r;
                }
            }
        }
    }
}

/// Divergence, the negative adjoint of [`grad_inplace`] (in-place)
///
/// `div p [i] = (i < n-1 ? p[i] : 0) - (i > 0 ? p[i-1] : 0)` per axis.
pub fn div_inplace(out: &mut [Cpx], p: &[Cpx], grid: Shape, geom: &SlabGeometry, ratio: &[f32]) {
    let (ns, nu, ny, nx) = (grid.slices, grid.channels, grid.rows, grid.cols);
    let stride = nu * ny * nx;
    debug_assert_eq!(p.len(), 3 * ns * stride);
    debug_assert_eq!(out.len(), ns * stride);

    for s in 0..ns {
        let z_here = geom.before_last(s);
        let z_prev = geom.has_prev(s);
        for u in 0..nu {
            let r = ratio[u];
            for j in 0..ny {
                for i in 0..nx {
                    let v = ((s * nu + u) * ny + j) * nx + i;

                    let mut dx = if i + 1 < nx { p[3 * v] } else { ZERO };
                    if i > 0 {
                        dx -= p[3 * (v - 1)];
                    }
                    let mut dy = if j + 1 < ny { p[3 * v + 1] } else { ZERO };
                    if j > 0 {
                        dy -= p[3 * (v - nx) + 1];
                    }
                    let mut dz = if z_here { p[3 * v + 2] } else { ZERO };
                    if z_prev {
                        dz -= p[3 * (v - stride) + 2];
                    }

                    out[v] = (dx + dy + dz * geom.dz) * r;
                }
            }
        }
    }
}

// ============================================================================
// Symmetric Gradient (for TGV)
// ============================================================================

/// Symmetrized gradient of a vector field (in-place)
///
/// Uses backward differences, zero at the first index of every axis:
///   q[0] = ∂x wx, q[1] = ∂y wy, q[2] = ∂z wz,
///   q[3] = (∂y wx + ∂x wy) / 2, q[4] = (∂z wx + ∂x wz) / 2, q[5] = (∂z wy + ∂y wz) / 2
pub fn symgrad_inplace(out: &mut [Cpx], w: &[Cpx], grid: Shape, geom: &SlabGeometry) {
    let (ns, nu, ny, nx) = (grid.slices, grid.channels, grid.rows, grid.cols);
    let stride = nu * ny * nx;
    debug_assert_eq!(w.len(), 3 * ns * stride);
    debug_assert_eq!(out.len(), 6 * ns * stride);

    for s in 0..ns {
        let z_prev = geom.has_prev(s);
        for u in 0..nu {
            for j in 0..ny {
                for i in 0..nx {
                    let v = ((s * nu + u) * ny + j) * nx + i;
                    let w0 = &w[3 * v..3 * v + 3];

                    let mut bx = [ZERO; 3];
                    let mut by = [ZERO; 3];
                    let mut bz = [ZERO; 3];
                    for k in 0..3 {
                        if i > 0 {
                            bx[k] = w0[k] - w[3 * (v - 1) + k];
                        }
                        if j > 0 {
                            by[k] = w0[k] - w[3 * (v - nx) + k];
                        }
                        if z_prev {
                            bz[k] = (w0[k] - w[3 * (v - stride) + k]) * geom.dz;
                        }
                    }

                    let q = &mut out[6 * v..6 * v + 6];
                    q[0] = bx[0];
                    q[1] = by[1];
                    q[2] = bz[2];
                    q[3] = (by[0] + bx[1]) * 0.5;
                    q[4] = (bz[0] + bx[2]) * 0.5;
                    q[5] = (bz[1] + by[2]) * 0.5;
                }
            }
        }
    }
}

/// Divergence of a symmetric tensor field, the negative adjoint of
/// [`symgrad_inplace`] under the Frobenius pairing (off-diagonals counted twice)
pub fn symdiv_inplace(out: &mut [Cpx], q: &[Cpx], grid: Shape, geom: &SlabGeometry) {
    let (ns, nu, ny, nx) = (grid.slices, grid.channels, grid.rows, grid.cols);
    let stride = nu * ny * nx;
    debug_assert_eq!(q.len(), 6 * ns * stride);
    debug_assert_eq!(out.len(), 3 * ns * stride);

    for s in 0..ns {
        let z_next = geom.has_next(s, ns);
        let z_here = geom.after_first(s);
        for u in 0..nu {
            for j in 0..ny {
                for i in 0..nx {
                    let v = ((s * nu + u) * ny + j) * nx + i;

                    // F q[j] = (j+1 < n ? q[j+1] : 0) - (j >= 1 ? q[j] : 0)
                    let fx = |k: usize| {
                        let mut d = if i + 1 < nx { q[6 * (v + 1) + k] } else { ZERO };
                        if i >= 1 {
                            d -= q[6 * v + k];
                        }
                        d
                    };
                    let fy = |k: usize| {
                        let mut d = if j + 1 < ny { q[6 * (v + nx) + k] } else { ZERO };
                        if j >= 1 {
                            d -= q[6 * v + k];
                        }
                        d
                    };
                    let fz = |k: usize| {
                        let mut d = if z_next { q[6 * (v + stride) + k] } else { ZERO };
                        if z_here {
                            d -= q[6 * v + k];
                        }
                        d * geom.dz
                    };

                    out[3 * v] = fx(0) + fy(3) + fz(4);
                    out[3 * v + 1] = fx(3) + fy(1) + fz(5);
                    out[3 * v + 2] = fx(4) + fy(5) + fz(2);
                }
            }
        }
    }
}

/// Frobenius norm of one symmetric tensor `[xx, yy, zz, xy, xz, yz]`
#[inline]
pub fn sym_norm_sqr(q: &[Cpx]) -> f32 {
    q[0].norm_sqr() + q[1].norm_sqr() + q[2].norm_sqr()
        + 2.0 * (q[3].norm_sqr() + q[4].norm_sqr() + q[5].norm_sqr())
}
