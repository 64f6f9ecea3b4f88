//! Slice-chunked execution of kernels over a pool of devices
//!
//! - [`chunk`]: slice partitioning with halo and device assignment
//! - [`device`]: devices and their per-unknown constant replicas
//! - [`stream`]: single streamed operators and norm roles
//! - [`graph`]: validated multi-stage graphs with output→input links
//! - `pipeline`: the host/worker transfer loop shared by both

pub mod chunk;
pub mod device;
pub mod graph;
mod pipeline;
pub mod stream;

pub use chunk::{Chunk, ChunkPlan};
pub use device::{Device, DeviceConstants, DevicePool};
pub use graph::{Link, OperatorGraph, OperatorGraphBuilder};
pub use stream::{NormPair, NormRole, StreamOperator};
