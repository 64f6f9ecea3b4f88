mod common;

use common::linear_model::LinearModel;
use common::phantom::{coil_maps, images, kspace_data, piecewise_truth};
use qmri_irgn::{
    reconstruct, Acquisition, JobConfig, MemoryStore, ReconError, ReconMode, Regularizer, SmsSetup, StreamConfig,
};

fn setup() -> (LinearModel, Acquisition) {
    let model = LinearModel::new(vec![vec![1.0, 0.5], vec![0.3, 1.0]], 4, 6, 6);
    let truth = piecewise_truth(2, 4, 6, 6);
    let acq = Acquisition::image_space(images(&model, &truth));
    (model, acq)
}

fn run(cfg: &JobConfig, model: &mut LinearModel, acq: &Acquisition) -> ReconError {
    let mut store = MemoryStore::new();
    let err = reconstruct(cfg, model, acq, &mut store).unwrap_err();
    assert!(store.is_empty());
    err
}

#[test]
fn two_dimensional_jobs_are_rejected() {
    let (mut model, acq) = setup();
    let mut cfg = JobConfig::new(Regularizer::Tgv, ReconMode::Imagespace);
    cfg.reco_2d = true;

    assert!(matches!(run(&cfg, &mut model, &acq), ReconError::Unimplemented(_)));
}

#[test]
fn sms_mode_needs_multiband_setup() {
    let (mut model, mut acq) = setup();
    let coils = coil_maps(4, 1, 6, 6);
    acq.data = kspace_data(&model, &piecewise_truth(2, 4, 6, 6), &coils);
    acq.coils = Some(coils);
    let cfg = JobConfig::new(Regularizer::Tv, ReconMode::KspaceSms);

    assert!(matches!(run(&cfg, &mut model, &acq), ReconError::Unimplemented(_)));
}

#[test]
fn multiband_setup_outside_sms_mode() {
    let (mut model, mut acq) = setup();
    acq.sms = Some(SmsSetup { mb: 2, shift: 1 });
    let cfg = JobConfig::new(Regularizer::Tv, ReconMode::Imagespace);

    assert!(matches!(run(&cfg, &mut model, &acq), ReconError::Unimplemented(_)));
}

#[test]
fn kspace_needs_coils() {
    let (mut model, acq) = setup();
    let cfg = JobConfig::new(Regularizer::Tv, ReconMode::Kspace);

    assert!(matches!(run(&cfg, &mut model, &acq), ReconError::Config(_)));
}

#[test]
fn too_few_chunks_per_device() {
    let (mut model, acq) = setup();
    let mut cfg = JobConfig::new(Regularizer::Tv, ReconMode::Imagespace);
    cfg.stream = StreamConfig { num_dev: 4, ..StreamConfig::default() };

    assert!(matches!(run(&cfg, &mut model, &acq), ReconError::Config(_)));
}

#[test]
fn invalid_iteration_budget() {
    let (mut model, acq) = setup();
    let mut cfg = JobConfig::new(Regularizer::Tv, ReconMode::Imagespace);
    cfg.irgn.max_iters = cfg.irgn.start_iters - 1;

    assert!(matches!(run(&cfg, &mut model, &acq), ReconError::Config(_)));
}

#[test]
fn data_shape_must_match_guess() {
    let (mut model, acq) = setup();
    model.slices = 8;
    let cfg = JobConfig::new(Regularizer::Tv, ReconMode::Imagespace);

    assert!(matches!(run(&cfg, &mut model, &acq), ReconError::Shape(_)));
}

#[test]
fn constraint_count_must_match_unknowns() {
    let (mut model, acq) = setup();
    model.constraints.pop();
    let cfg = JobConfig::new(Regularizer::Tv, ReconMode::Imagespace);

    assert!(matches!(run(&cfg, &mut model, &acq), ReconError::Config(_)));
}

#[test]
fn missing_halo_is_rejected() {
    let (mut model, acq) = setup();
    let mut cfg = JobConfig::new(Regularizer::Tv, ReconMode::Imagespace);
    cfg.stream = StreamConfig { overlap: 0, ..StreamConfig::default() };

    assert!(matches!(run(&cfg, &mut model, &acq), ReconError::Config(_)));
}

#[test]
fn zero_initial_guess_is_rejected() {
    let (mut model, acq) = setup();
    model.guess_value = 0.0;
    let mut cfg = JobConfig::new(Regularizer::Tv, ReconMode::Imagespace);
    cfg.irgn.max_gn_it = 1;
    cfg.irgn.start_iters = 10;
    cfg.irgn.max_iters = 10;

    assert!(matches!(run(&cfg, &mut model, &acq), ReconError::Config(_)));
}
