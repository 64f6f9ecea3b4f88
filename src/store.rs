//! Persistence of Gauss-Newton iterates
//!
//! Every accepted iterate is written under its dataset name
//! ([`crate::config::Regularizer::dataset_name`]) together with the
//! objective value of the step. [`NiftiStore`] writes one gzipped NIfTI-1
//! file per dataset with complex64 voxels laid out `(cols, rows, slices,
//! unknowns)`, which is the unknown-major volume order read Fortran-wise.

use std::collections::BTreeMap;
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use nifti::NiftiHeader;

use crate::error::{ReconError, Result};
use crate::volume::{Cpx, Shape, Volume};

/// NIfTI datatype code of complex64
const DT_COMPLEX64: i16 = 32;
const HEADER_LEN: usize = 348;
/// Header plus the empty extension flag
const VOX_OFFSET: usize = 352;
const DESCRIP: std::ops::Range<usize> = 148..228;
const FVAL_PREFIX: &str = "fval=";

/// Sink for reconstructed iterates
pub trait ResultStore {
    /// Persist `volume` (unknown-major, physical units) as dataset `name`
    fn write(&mut self, name: &str, volume: &Volume, fval: f64) -> Result<()>;
}

/// One persisted iterate
#[derive(Clone, Debug, PartialEq)]
pub struct StoredResult {
    pub volume: Volume,
    pub fval: f64,
}

/// Keeps every iterate in memory, in dataset-name order
#[derive(Default)]
pub struct MemoryStore {
    results: BTreeMap<String, StoredResult>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&StoredResult> {
        self.results.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.results.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}

impl ResultStore for MemoryStore {
    fn write(&mut self, name: &str, volume: &Volume, fval: f64) -> Result<()> {
        if self.results.contains_key(name) {
            return Err(ReconError::Config(format!("dataset {} already exists", name)));
        }
        self.results.insert(name.to_string(), StoredResult { volume: volume.clone(), fval });
        Ok(())
    }
}

/// Writes `<dir>/<name>.nii.gz`
pub struct NiftiStore {
    dir: PathBuf,
}

impl NiftiStore {
    /// Store rooted at `dir`, created if missing
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.nii.gz", name))
    }

    /// Load a dataset written by this store
    pub fn read(&self, name: &str) -> Result<StoredResult> {
        read_nifti_gz(&self.path(name))
    }
}

impl ResultStore for NiftiStore {
    fn write(&mut self, name: &str, volume: &Volume, fval: f64) -> Result<()> {
        let path = self.path(name);
        if path.exists() {
            return Err(ReconError::Config(format!("refusing to overwrite {}", path.display())));
        }
        let bytes = encode_nifti_gz(volume, fval)?;
        fs::write(&path, bytes)?;
        log::debug!("wrote {} ({:?}, fval {:.4e})", path.display(), volume.shape(), fval);
        Ok(())
    }
}

fn put_i16(header: &mut [u8], offset: usize, value: i16) {
    header[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}

fn put_f32(header: &mut [u8], offset: usize, value: f32) {
    header[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

/// Uncompressed single-file NIfTI-1 image of an unknown-major volume
fn encode_nifti(volume: &Volume, fval: f64) -> Result<Vec<u8>> {
    let shape = volume.shape();
    if shape.comps != 1 {
        return Err(ReconError::Shape(format!("cannot store vector-valued volume {:?}", shape)));
    }
    let dims = [shape.cols, shape.rows, shape.channels, shape.slices];
    if dims.iter().any(|&d| d > i16::MAX as usize) {
        return Err(ReconError::Shape(format!("volume {:?} exceeds NIfTI-1 dimensions", shape)));
    }

    let mut header = [0u8; HEADER_LEN];
    header[0..4].copy_from_slice(&(HEADER_LEN as i32).to_le_bytes());

    let dim = [4, dims[0] as i16, dims[1] as i16, dims[2] as i16, dims[3] as i16, 1, 1, 1];
    for (i, &d) in dim.iter().enumerate() {
        put_i16(&mut header, 40 + i * 2, d);
    }
    put_i16(&mut header, 70, DT_COMPLEX64);
    put_i16(&mut header, 72, 64);

    for i in 0..8 {
        put_f32(&mut header, 76 + i * 4, 1.0);
    }
    put_f32(&mut header, 108, VOX_OFFSET as f32);
    put_f32(&mut header, 112, 1.0);

    let descrip = format!("{}{:e}", FVAL_PREFIX, fval);
    let n = descrip.len().min(DESCRIP.len() - 1);
    header[DESCRIP.start..DESCRIP.start + n].copy_from_slice(&descrip.as_bytes()[..n]);

    // identity sform
    put_i16(&mut header, 254, 1);
    put_f32(&mut header, 280, 1.0);
    put_f32(&mut header, 300, 1.0);
    put_f32(&mut header, 320, 1.0);

    header[344..348].copy_from_slice(b"n+1\0");

    let mut buffer = Vec::with_capacity(VOX_OFFSET + volume.len() * 8);
    buffer.write_all(&header)?;
    buffer.write_all(&[0u8; 4])?;
    for v in volume.as_slice() {
        buffer.write_all(&v.re.to_le_bytes())?;
        buffer.write_all(&v.im.to_le_bytes())?;
    }
    Ok(buffer)
}

fn encode_nifti_gz(volume: &Volume, fval: f64) -> Result<Vec<u8>> {
    let raw = encode_nifti(volume, fval)?;
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&raw)?;
    Ok(encoder.finish()?)
}

fn parse_fval(descrip: &[u8]) -> Result<f64> {
    let end = descrip.iter().position(|&b| b == 0).unwrap_or(descrip.len());
    let text = String::from_utf8_lossy(&descrip[..end]);
    text.strip_prefix(FVAL_PREFIX)
        .and_then(|v| v.trim().parse::<f64>().ok())
        .ok_or_else(|| ReconError::Format(format!("no objective value in descrip '{}'", text)))
}

fn read_nifti_gz(path: &Path) -> Result<StoredResult> {
    let mut bytes = Vec::new();
    GzDecoder::new(fs::File::open(path)?).read_to_end(&mut bytes)?;
    if bytes.len() < VOX_OFFSET {
        return Err(ReconError::Format(format!("{}: file too small ({} bytes)", path.display(), bytes.len())));
    }

    let header = NiftiHeader::from_reader(&bytes[..])
        .map_err(|e| ReconError::Format(format!("{}: {}", path.display(), e)))?;
    if header.datatype != DT_COMPLEX64 {
        return Err(ReconError::Format(format!(
            "{}: datatype {} is not complex64",
            path.display(),
            header.datatype
        )));
    }

    let dim = header.dim;
    let extent = |i: usize| if (dim[0] as usize) >= i { (dim[i] as usize).max(1) } else { 1 };
    let shape = Shape::new(extent(4), extent(3), extent(2), extent(1), 1);

    let offset = header.vox_offset as usize;
    let payload = bytes
        .get(offset..offset + shape.len() * 8)
        .ok_or_else(|| ReconError::Format(format!("{}: truncated voxel data", path.display())))?;
    let data = payload
        .chunks_exact(8)
        .map(|b| {
            let re = f32::from_le_bytes([b[0], b[1], b[2], b[3]]);
            let im = f32::from_le_bytes([b[4], b[5], b[6], b[7]]);
            Cpx::new(re, im)
        })
        .collect();

    Ok(StoredResult { volume: Volume::from_vec(shape, data)?, fval: parse_fval(&bytes[DESCRIP])? })
}
