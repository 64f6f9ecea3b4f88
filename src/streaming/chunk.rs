//! Slice-axis partitioning
//!
//! The slice axis is split into chunks of `par_slices` owned slices plus up
//! to `overlap` halo slices on each side (clamped at the volume ends).
//! Chunks are assigned to devices round-robin by chunk index.

use std::ops::Range;

use crate::config::StreamConfig;
use crate::error::{ReconError, Result};

/// One unit of streamed work
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Chunk {
    pub index: usize,
    pub device: usize,
    /// Slices whose results this chunk writes back
    pub owned: Range<usize>,
    /// Slices gathered for this chunk (owned plus halo)
    pub span: Range<usize>,
}

impl Chunk {
    #[inline]
    pub fn span_len(&self) -> usize {
        self.span.end - self.span.start
    }

    /// Owned slices relative to the start of the span
    #[inline]
    pub fn local_owned(&self) -> Range<usize> {
        self.owned.start - self.span.start..self.owned.end - self.span.start
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChunkPlan {
    total_slices: usize,
    par_slices: usize,
    overlap: usize,
    num_dev: usize,
}

impl ChunkPlan {
    /// Validate the partitioning of `total_slices` slices
    pub fn new(total_slices: usize, cfg: &StreamConfig) -> Result<Self> {
        if cfg.par_slices == 0 {
            return Err(ReconError::Config("par_slices must be at least 1".into()));
        }
        if cfg.num_dev == 0 {
            return Err(ReconError::Config("num_dev must be at least 1".into()));
        }
        if total_slices % cfg.par_slices != 0 {
            return Err(ReconError::Config(format!(
                "number of slices ({}) is not divisible by par_slices ({})",
                total_slices, cfg.par_slices
            )));
        }
        if total_slices / (cfg.num_dev * cfg.par_slices) < 2 {
            return Err(ReconError::Config(format!(
                "{} slices are too few to pipeline over {} device(s) with par_slices={}; \
                 at least {} are required",
                total_slices,
                cfg.num_dev,
                cfg.par_slices,
                2 * cfg.num_dev * cfg.par_slices
            )));
        }
        // every graph holds a finite-difference stage that reads one neighbour slice
        if cfg.overlap == 0 && total_slices > cfg.par_slices {
            return Err(ReconError::Config(
                "overlap must be at least 1 when the slices are split into several chunks".into(),
            ));
        }

        Ok(Self {
            total_slices,
            par_slices: cfg.par_slices,
            overlap: cfg.overlap,
            num_dev: cfg.num_dev,
        })
    }

    pub fn total_slices(&self) -> usize {
        self.total_slices
    }

    pub fn num_chunks(&self) -> usize {
        self.total_slices / self.par_slices
    }

    pub fn chunk(&self, index: usize) -> Chunk {
        let start = index * self.par_slices;
        let end = start + self.par_slices;
        Chunk {
            index,
            device: index % self.num_dev,
            owned: start..end,
            span: start.saturating_sub(self.overlap)..(end + self.overlap).min(self.total_slices),
        }
    }

    /// Chunk indices in processing order
    pub fn order(&self, reverse: bool) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.num_chunks()).collect();
        if reverse {
            order.reverse();
        }
        order
    }
}
