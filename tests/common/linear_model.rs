use qmri_irgn::{Constraint, Cpx, Model, Shape, Volume};

/// Linear signal model `S_n = Σ_u w[n][u] · x_u · uk_scale[u]`
pub struct LinearModel {
    /// `weights[n][u]`
    pub weights: Vec<Vec<f32>>,
    pub slices: usize,
    pub rows: usize,
    pub cols: usize,
    pub guess_value: f32,
    /// Overrides the flat `guess_value` guess (unknown-major, internal units)
    pub initial: Option<Volume>,
    pub unknowns_tgv: usize,
    pub constraints: Vec<Constraint>,
    pub uk_scale: Vec<f32>,
}

impl LinearModel {
    pub fn new(weights: Vec<Vec<f32>>, slices: usize, rows: usize, cols: usize) -> Self {
        let unknowns = weights[0].len();
        Self {
            weights,
            slices,
            rows,
            cols,
            guess_value: 1.0,
            initial: None,
            unknowns_tgv: unknowns,
            constraints: vec![Constraint::new(-100.0, 100.0, true); unknowns],
            uk_scale: vec![1.0; unknowns],
        }
    }

    pub fn scans(&self) -> usize {
        self.weights.len()
    }

    fn plane(&self) -> usize {
        self.slices * self.rows * self.cols
    }

    /// Signal of physical maps `p` (unknown-major), scan-major output
    pub fn signal_of_physical(&self, p: &Volume) -> Volume {
        let n_vox = self.plane();
        let mut out = Volume::zeros(Shape::new(self.scans(), self.slices, self.rows, self.cols, 1));
        let src = p.as_slice();
        let dst = out.as_mut_slice();
        for (n, w) in self.weights.iter().enumerate() {
            for (u, &wu) in w.iter().enumerate() {
                for i in 0..n_vox {
                    dst[n * n_vox + i] += src[u * n_vox + i] * wu;
                }
            }
        }
        out
    }
}

impl Model for LinearModel {
    fn unknowns(&self) -> usize {
        self.weights[0].len()
    }

    fn unknowns_tgv(&self) -> usize {
        self.unknowns_tgv
    }

    fn guess(&self) -> Volume {
        if let Some(initial) = &self.initial {
            return initial.clone();
        }
        Volume::filled(
            Shape::new(self.unknowns(), self.slices, self.rows, self.cols, 1),
            Cpx::new(self.guess_value, 0.0),
        )
    }

    fn execute_forward(&self, x: &Volume) -> Volume {
        self.signal_of_physical(&self.rescale(x))
    }

    fn execute_gradient(&self, _x: &Volume) -> Volume {
        let (scans, unknowns) = (self.scans(), self.unknowns());
        let mut jac = Volume::zeros(Shape::new(unknowns * scans, self.slices, self.rows, self.cols, 1));
        let n_vox = self.plane();
        for (chunk_idx, chunk) in jac.as_mut_slice().chunks_mut(n_vox).enumerate() {
            let (u, n) = (chunk_idx / scans, chunk_idx % scans);
            let value = Cpx::new(self.weights[n][u] * self.uk_scale[u], 0.0);
            chunk.iter_mut().for_each(|v| *v = value);
        }
        jac
    }

    fn constraints(&self) -> &[Constraint] {
        &self.constraints
    }

    fn constraints_mut(&mut self) -> &mut [Constraint] {
        &mut self.constraints
    }

    fn uk_scale(&self) -> &[f32] {
        &self.uk_scale
    }

    fn uk_scale_mut(&mut self) -> &mut [f32] {
        &mut self.uk_scale
    }
}
