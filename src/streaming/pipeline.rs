//! Chunked execution of a list of stages over the device pool
//!
//! The host thread gathers the input slices of each chunk (the transfer),
//! pushes the job into the bounded queue of the chunk's device and, while
//! the queue is full, blocks until the device catches up. Each device
//! worker runs every stage of a chunk in declared order; connected inputs
//! are read from the chunk-local output of the producing stage. Finished
//! chunks come back over a shared channel and only their owned slices are
//! scattered into the full-volume outputs.

use std::thread;

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};

use super::chunk::{Chunk, ChunkPlan};
use super::device::{Device, DevicePool};
use super::graph::Link;
use super::stream::{NormPair, StreamOperator};
use crate::error::{ReconError, Result};
use crate::kernels::{ChunkContext, KernelParams};
use crate::volume::{Cpx, Shape, Volume, ZERO};

/// Source stage of every input slot (`None` if fed from a host volume)
pub(crate) type ConnectionTable = Vec<Vec<Option<usize>>>;

struct ChunkJob {
    chunk: Chunk,
    /// Gathered span of every unconnected input, per stage and slot
    inputs: Vec<Vec<Vec<Cpx>>>,
}

struct ChunkResult {
    chunk: Chunk,
    /// Owned slices of every stage output
    outputs: Vec<Vec<Cpx>>,
    norms: NormPair,
}

pub(crate) fn connection_table(stages: &[StreamOperator], links: &[Link]) -> ConnectionTable {
    let mut table: ConnectionTable = stages.iter().map(|s| vec![None; s.in_shapes().len()]).collect();
    for link in links {
        table[link.to][link.slot] = Some(link.from);
    }
    table
}

/// Run `stages` over all chunks of `plan`
///
/// Returns the norm partials of the stages that carry a norm role, reduced
/// per chunk over owned slices and summed in chunk-index order.
#[allow(clippy::too_many_arguments)]
pub(crate) fn run(
    plan: &ChunkPlan,
    pool: &DevicePool,
    stages: &[StreamOperator],
    connected: &ConnectionTable,
    reverse: bool,
    outputs: &mut [&mut Volume],
    inputs: &[&[Option<&Volume>]],
    params: &KernelParams,
) -> Result<NormPair> {
    validate_buffers(stages, connected, outputs, inputs)?;

    let mut partials = vec![NormPair::default(); plan.num_chunks()];

    thread::scope(|scope| -> Result<()> {
        let (result_tx, result_rx) = unbounded::<ChunkResult>();
        let mut job_txs: Vec<Sender<ChunkJob>> = Vec::with_capacity(pool.num_dev());

        for device in pool.devices() {
            let (job_tx, job_rx) = bounded::<ChunkJob>(pool.queues_per_device());
            job_txs.push(job_tx);
            let result_tx = result_tx.clone();
            scope.spawn(move || worker(device, job_rx, result_tx, stages, connected, params));
        }
        drop(result_tx);

        for index in plan.order(reverse) {
            let job = gather(plan.chunk(index), inputs, connected);

            // Write back whatever finished while the next chunk was gathered
            while let Ok(done) = result_rx.try_recv() {
                scatter(done, outputs, &mut partials);
            }

            let device = job.chunk.device;
            job_txs[device]
                .send(job)
                .map_err(|_| ReconError::Config(format!("device {} stopped accepting work", device)))?;
        }
        drop(job_txs);

        for done in result_rx.iter() {
            scatter(done, outputs, &mut partials);
        }
        Ok(())
    })?;

    Ok(partials.into_iter().fold(NormPair::default(), |acc, p| acc + p))
}

fn worker(
    device: &Device,
    jobs: Receiver<ChunkJob>,
    results: Sender<ChunkResult>,
    stages: &[StreamOperator],
    connected: &ConnectionTable,
    params: &KernelParams,
) {
    for job in jobs.iter() {
        let done = process_chunk(device, job, stages, connected, params);
        if results.send(done).is_err() {
            break;
        }
    }
    log::trace!("device {} drained its queue", device.id);
}

fn process_chunk(
    device: &Device,
    job: ChunkJob,
    stages: &[StreamOperator],
    connected: &ConnectionTable,
    params: &KernelParams,
) -> ChunkResult {
    let constants = device.constants.read();
    let span = job.chunk.span_len();
    let owned = job.chunk.local_owned();

    let mut local: Vec<Vec<Cpx>> = Vec::with_capacity(stages.len());
    let mut norms = NormPair::default();

    for (i, stage) in stages.iter().enumerate() {
        let out_shape = stage.out_shape().with_slices(span);
        let in_shapes: Vec<Shape> = stage.in_shapes().iter().map(|s| s.with_slices(span)).collect();
        let mut out = vec![ZERO; out_shape.len()];
        {
            let ins: Vec<&[Cpx]> = connected[i]
                .iter()
                .enumerate()
                .map(|(slot, source)| match source {
                    Some(from) => local[*from].as_slice(),
                    None => job.inputs[i][slot].as_slice(),
                })
                .collect();

            let ctx = ChunkContext {
                first_slice: job.chunk.span.start,
                total_slices: stage.out_shape().slices,
                out_shape,
                in_shapes: &in_shapes,
                constants: &*constants,
            };
            stage.operator().apply(&ctx, &mut out, &ins, params);

            if let Some(role) = stage.norm() {
                norms += role.partial(&out, &ins, out_shape.slice_len(), owned.clone());
            }
        }
        local.push(out);
    }
    drop(constants);

    let outputs = local
        .into_iter()
        .zip(stages)
        .map(|(buf, stage)| {
            let n = stage.out_shape().slice_len();
            buf[owned.start * n..owned.end * n].to_vec()
        })
        .collect();

    ChunkResult { chunk: job.chunk, outputs, norms }
}

fn gather(chunk: Chunk, inputs: &[&[Option<&Volume>]], connected: &ConnectionTable) -> ChunkJob {
    let gathered = inputs
        .iter()
        .zip(connected)
        .map(|(slots, sources)| {
            slots
                .iter()
                .zip(sources)
                .map(|(volume, source)| match (volume, source) {
                    (Some(v), None) => v.slices(chunk.span.start, chunk.span.end).to_vec(),
                    _ => Vec::new(),
                })
                .collect()
        })
        .collect();

    ChunkJob { chunk, inputs: gathered }
}

fn scatter(done: ChunkResult, outputs: &mut [&mut Volume], partials: &mut [NormPair]) {
    let owned = done.chunk.owned.clone();
    for (out, data) in outputs.iter_mut().zip(done.outputs) {
        out.slices_mut(owned.start, owned.end).copy_from_slice(&data);
    }
    partials[done.chunk.index] = done.norms;
}

fn validate_buffers(
    stages: &[StreamOperator],
    connected: &ConnectionTable,
    outputs: &[&mut Volume],
    inputs: &[&[Option<&Volume>]],
) -> Result<()> {
    if outputs.len() != stages.len() || inputs.len() != stages.len() {
        return Err(ReconError::Shape(format!(
            "{} stages need as many output and input lists, got {} outputs and {} input lists",
            stages.len(),
            outputs.len(),
            inputs.len()
        )));
    }

    for (i, stage) in stages.iter().enumerate() {
        if outputs[i].shape() != stage.out_shape() {
            return Err(ReconError::Shape(format!(
                "output of stage {} ({}) has shape {:?}, expected {:?}",
                i,
                stage.name(),
                outputs[i].shape(),
                stage.out_shape()
            )));
        }
        if inputs[i].len() != stage.in_shapes().len() {
            return Err(ReconError::Shape(format!(
                "stage {} ({}) takes {} inputs, got {}",
                i,
                stage.name(),
                stage.in_shapes().len(),
                inputs[i].len()
            )));
        }
        for (slot, (volume, source)) in inputs[i].iter().zip(&connected[i]).enumerate() {
            match (volume, source) {
                (Some(_), Some(from)) => {
                    return Err(ReconError::Shape(format!(
                        "input {} of stage {} ({}) is fed by stage {} and must be left empty",
                        slot,
                        i,
                        stage.name(),
                        from
                    )))
                }
                (None, None) => {
                    return Err(ReconError::Shape(format!(
                        "input {} of stage {} ({}) is not connected and no volume was given",
                        slot,
                        i,
                        stage.name()
                    )))
                }
                (Some(v), None) if v.shape() != stage.in_shapes()[slot] => {
                    return Err(ReconError::Shape(format!(
                        "input {} of stage {} ({}) has shape {:?}, expected {:?}",
                        slot,
                        i,
                        stage.name(),
                        v.shape(),
                        stage.in_shapes()[slot]
                    )))
                }
                _ => {}
            }
        }
    }
    Ok(())
}
