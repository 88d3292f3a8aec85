//! End-to-end tests for the training-run controller on the CPU backend.

use pose_training::{
    checkpoint::CheckpointPaths, execute, ArtifactKind, CpuBackend, LogHistory, PoseSample,
    PoseTrainer, ProgressEvent, ProgressSink, ResumeConfig, RunConfig, RunLogger, TrainingError,
};
use pose_training::trainer::{checkpoint_epoch, train_epoch};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

const JOINTS: usize = 2;

#[derive(Default)]
struct RecordingSink(Mutex<Vec<ProgressEvent>>);

impl RecordingSink {
    fn events(&self) -> Vec<ProgressEvent> {
        self.0.lock().unwrap().clone()
    }

    fn trained_epochs(&self) -> Vec<u32> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                ProgressEvent::EpochStarted { epoch, .. } => Some(epoch),
                _ => None,
            })
            .collect()
    }
}

impl ProgressSink for RecordingSink {
    fn on_event(&self, event: ProgressEvent) {
        self.0.lock().unwrap().push(event);
    }
}

/// Samples whose pose is a fixed linear function of the input.
fn write_dataset(path: &Path, n: usize) {
    let mut out = String::new();
    for i in 0..n {
        let x = [(i as f32 * 0.37).sin(), (i as f32 * 0.11).cos(), 0.5];
        let sample = PoseSample {
            input: x.to_vec(),
            pose: vec![x[0] + 0.2, x[1] - x[0], 0.5 * x[2], x[0] * 0.3],
            visibility: vec![1.0, if i % 3 == 0 { 0.0 } else { 1.0 }],
        };
        out.push_str(&serde_json::to_string(&sample).unwrap());
        out.push('\n');
    }
    std::fs::write(path, out).unwrap();
}

fn config(temp: &TempDir, epochs: u32) -> RunConfig {
    let train = temp.path().join("train.jsonl");
    let val = temp.path().join("val.jsonl");
    if !train.exists() {
        write_dataset(&train, 8);
        write_dataset(&val, 4);
    }
    let mut config = RunConfig::new(train, val, temp.path().join("out"));
    config.joints = JOINTS;
    config.epochs = epochs;
    config.batch_size = 4;
    config.use_visibility = true;
    config
}

fn cpu_trainer() -> (PoseTrainer<CpuBackend>, Arc<RecordingSink>) {
    let sink = Arc::new(RecordingSink::default());
    (PoseTrainer::new(CpuBackend, sink.clone()), sink)
}

fn saved_epochs(trainer: &PoseTrainer<CpuBackend>, out: &Path) -> Vec<u32> {
    let manager = pose_training::CheckpointManager::new(trainer.run_dir(out));
    let entries = manager.list().unwrap();
    assert!(entries.iter().all(|e| e.is_complete()));
    entries.into_iter().map(|e| e.epoch).collect()
}

fn validation_losses(history: &LogHistory) -> Vec<f32> {
    history
        .iter()
        .filter_map(|e| e.as_str().strip_prefix("Validation/Loss: "))
        .map(|v| v.parse().unwrap())
        .collect()
}

#[test]
fn test_hundred_epochs_share_schedules() {
    let temp = TempDir::new().unwrap();
    let (trainer, sink) = cpu_trainer();
    let config = config(&temp, 100);
    let out = config.out.clone();

    let summary = trainer.run(config).unwrap();

    let tens: Vec<u32> = (1..=10).map(|i| i * 10).collect();
    assert_eq!(summary.epochs_run, 100);
    assert_eq!(summary.checkpointed, tens);
    assert_eq!(summary.validated, tens);
    assert_eq!(saved_epochs(&trainer, &out), tens);
    assert_eq!(sink.trained_epochs(), (1..=100).collect::<Vec<_>>());
}

#[test]
fn test_thirty_seven_epochs_diverge() {
    let temp = TempDir::new().unwrap();
    let (trainer, _sink) = cpu_trainer();
    let config = config(&temp, 37);
    let out = config.out.clone();

    let summary = trainer.run(config).unwrap();

    let threes: Vec<u32> = (1..=12).map(|i| i * 3).collect();
    assert_eq!(summary.checkpointed, threes);
    assert_eq!(summary.validated, vec![10, 20, 30]);
    assert_eq!(saved_epochs(&trainer, &out), threes);
}

#[test]
fn test_log_records_stride_and_validation() {
    let temp = TempDir::new().unwrap();
    let (trainer, _sink) = cpu_trainer();
    let mut config = config(&temp, 10);
    config.log_interval = 1;

    let mut ctx = trainer.prepare(config).unwrap();
    execute(&mut ctx).unwrap();

    // Two batches per epoch, each logged, plus one validation line.
    let history = ctx.logger().snapshot();
    assert_eq!(history.len(), 10 * 2 + 1);
    assert!(history.entries()[0].as_str().starts_with("Loss: "));
    assert!(history.last().unwrap().as_str().starts_with("Validation/Loss: "));

    let file = std::fs::read_to_string(ctx.logger().path()).unwrap();
    let lines: Vec<&str> = file.lines().collect();
    let entries: Vec<&str> = history.iter().map(|e| e.as_str()).collect();
    assert_eq!(lines, entries);
}

#[test]
fn test_training_lowers_validation_loss() {
    let temp = TempDir::new().unwrap();
    let (trainer, _sink) = cpu_trainer();

    let mut ctx = trainer.prepare(config(&temp, 30)).unwrap();
    execute(&mut ctx).unwrap();

    let losses = validation_losses(ctx.logger().history());
    assert_eq!(losses.len(), 3);
    assert!(losses[2] < losses[0], "{losses:?}");
}

#[test]
fn test_checkpoint_round_trip_restores_epoch_and_history() {
    let temp = TempDir::new().unwrap();
    let (trainer, _sink) = cpu_trainer();

    let mut ctx = trainer.prepare(config(&temp, 20)).unwrap();
    for epoch in 1..=3 {
        train_epoch(&mut ctx, epoch).unwrap();
    }
    let before = ctx.logger().snapshot();
    let paths = checkpoint_epoch(&mut ctx, 3).unwrap();
    drop(ctx);

    let mut resumed = config(&temp, 20);
    resumed.resume = Some(paths.to_resume());
    let ctx = trainer.prepare(resumed).unwrap();

    assert_eq!(ctx.start_epoch(), 4);
    assert_eq!(ctx.logger().snapshot(), before);
    let file = std::fs::read_to_string(ctx.logger().path()).unwrap();
    assert_eq!(file.lines().count(), before.len());
}

#[test]
fn test_resume_at_41_never_reruns_40() {
    let temp = TempDir::new().unwrap();
    let (first, _sink) = cpu_trainer();
    first.run(config(&temp, 40)).unwrap();
    let paths = CheckpointPaths::for_epoch(&first.run_dir(&temp.path().join("out")), 40);

    let resume_dir = TempDir::new().unwrap();
    let (second, sink) = cpu_trainer();
    let mut resumed = config(&temp, 100);
    resumed.out = resume_dir.path().join("out");
    resumed.resume = Some(paths.to_resume());

    let summary = second.run(resumed).unwrap();

    assert_eq!(summary.start_epoch, 41);
    assert_eq!(summary.epochs_run, 60);
    assert_eq!(sink.trained_epochs().first(), Some(&41));
    assert!(!sink.trained_epochs().contains(&40));
    assert_eq!(summary.checkpointed, (5..=10).map(|i| i * 10).collect::<Vec<_>>());
    assert_eq!(summary.validated, vec![50, 60, 70, 80, 90, 100]);
}

#[test]
fn test_resume_matches_uninterrupted_run() {
    let temp = TempDir::new().unwrap();
    let (trainer, _sink) = cpu_trainer();
    let mut config_a = config(&temp, 20);
    config_a.optimizer = "Adam".to_string();

    let mut full = trainer.prepare(config_a.clone()).unwrap();
    execute(&mut full).unwrap();
    let paths = CheckpointPaths::for_epoch(full.run_dir(), 10);

    let other = TempDir::new().unwrap();
    let mut config_b = config_a;
    config_b.out = other.path().join("out");
    config_b.resume = Some(paths.to_resume());
    let mut resumed = trainer.prepare(config_b).unwrap();
    execute(&mut resumed).unwrap();

    assert_eq!(resumed.model().state_dict(), full.model().state_dict());
    assert_eq!(resumed.optimizer().state_dict(), full.optimizer().state_dict());
    assert_eq!(resumed.logger().snapshot(), full.logger().snapshot());
}

#[test]
fn test_gpu_rejection_creates_no_output() {
    let temp = TempDir::new().unwrap();
    let (trainer, sink) = cpu_trainer();
    let mut config = config(&temp, 10);
    config.gpu = true;
    let out = config.out.clone();

    let err = trainer.prepare(config).unwrap_err();

    assert!(matches!(err, TrainingError::DeviceUnavailable));
    assert!(!out.exists());
    assert!(sink.events().is_empty());
}

#[test]
fn test_validator_reports_first_failure() {
    let temp = TempDir::new().unwrap();
    let (trainer, _sink) = cpu_trainer();
    let missing = |name: &str| temp.path().join(name);

    let mut everything_wrong = RunConfig::new(missing("a.jsonl"), missing("b.jsonl"), missing("out"));
    everything_wrong.gpu = true;
    everything_wrong.optimizer = "RMSprop".to_string();
    everything_wrong.resume = Some(ResumeConfig {
        metadata: missing("epoch-1.iter"),
        model: missing("epoch-1.model"),
        optimizer: missing("epoch-1.state"),
    });
    assert!(matches!(trainer.prepare(everything_wrong.clone()), Err(TrainingError::DeviceUnavailable)));

    everything_wrong.gpu = false;
    match trainer.prepare(everything_wrong.clone()) {
        Err(TrainingError::DatasetNotFound(path)) => assert_eq!(path, missing("a.jsonl")),
        other => panic!("unexpected: {other:?}"),
    }

    let mut datasets_ok = config(&temp, 10);
    datasets_ok.optimizer = everything_wrong.optimizer.clone();
    datasets_ok.resume = everything_wrong.resume.clone();
    assert!(matches!(trainer.prepare(datasets_ok.clone()), Err(TrainingError::UnsupportedOptimizer(_))));

    datasets_ok.optimizer = "Adam".to_string();
    let err = trainer.prepare(datasets_ok).unwrap_err();
    assert!(err.is_not_found());
    assert!(matches!(err, TrainingError::ResumeArtifactNotFound { artifact: ArtifactKind::RunMetadata, .. }));
    assert!(!missing("out").exists());
}

#[test]
fn test_corrupt_checkpoint_leaves_existing_log() {
    let temp = TempDir::new().unwrap();
    let (trainer, _sink) = cpu_trainer();
    let config_a = config(&temp, 10);
    trainer.run(config_a.clone()).unwrap();

    let run_dir = trainer.run_dir(&config_a.out);
    let log_before = std::fs::read_to_string(run_dir.join("log")).unwrap();
    let paths = CheckpointPaths::for_epoch(&run_dir, 5);
    std::fs::write(&paths.optimizer, "{\"method\": \"Adam\"").unwrap();

    let mut resumed = config_a;
    resumed.resume = Some(paths.to_resume());
    let err = trainer.prepare(resumed).unwrap_err();

    assert!(matches!(err, TrainingError::CheckpointCorrupt { .. }));
    assert_eq!(std::fs::read_to_string(run_dir.join("log")).unwrap(), log_before);
}

#[test]
fn test_logger_restore_then_snapshot_is_identity() {
    let temp = TempDir::new().unwrap();
    let history: LogHistory = ["Loss: 3", "Loss: 2", "Validation/Loss: 2.5", "Loss: 1"].into_iter().collect();

    let mut logger = RunLogger::create(temp.path(), Arc::new(RecordingSink::default())).unwrap();
    logger.restore(history.clone()).unwrap();

    assert_eq!(logger.snapshot(), history);
}
