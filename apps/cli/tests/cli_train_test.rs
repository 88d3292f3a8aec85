//! Integration tests for `posetrain train` and `posetrain checkpoints`.

use assert_cmd::Command;
use predicates::prelude::*;
use std::path::Path;
use tempfile::TempDir;

/// Writes a two-joint training set and validation set into `dir`.
fn write_datasets(dir: &Path) {
    let mut lines = String::new();
    for i in 0..6 {
        let x = i as f32 / 6.0;
        lines.push_str(&format!(
            "{{\"input\":[{x},1.0],\"pose\":[{x},0.5,0.1,{x}],\"visibility\":[1.0,1.0]}}\n"
        ));
    }
    std::fs::write(dir.join("train.jsonl"), &lines).unwrap();
    std::fs::write(dir.join("val.jsonl"), &lines).unwrap();
}

fn train_cmd(dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("posetrain").unwrap();
    cmd.current_dir(dir)
        .arg("train")
        .args(["--train", "train.jsonl", "--val", "val.jsonl", "--joints", "2", "--batch-size", "4"]);
    cmd
}

#[test]
fn test_help_lists_subcommands() {
    let mut cmd = Command::cargo_bin("posetrain").unwrap();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("train"))
        .stdout(predicate::str::contains("checkpoints"));
}

#[test]
fn test_train_missing_dataset_fails() {
    let temp = TempDir::new().unwrap();

    let mut cmd = Command::cargo_bin("posetrain").unwrap();
    cmd.current_dir(temp.path())
        .args(["train", "--train", "nope.jsonl", "--val", "nope.jsonl"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("is not found"));

    assert!(!temp.path().join("result").exists());
}

#[test]
fn test_train_unknown_optimizer_fails() {
    let temp = TempDir::new().unwrap();
    write_datasets(temp.path());

    train_cmd(temp.path())
        .args(["--opt", "RMSprop"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("RMSprop is unknown optimization method"));
}

#[test]
fn test_train_gpu_unavailable_fails() {
    let temp = TempDir::new().unwrap();
    write_datasets(temp.path());

    train_cmd(temp.path()).arg("--gpu").assert().failure().stderr(predicate::str::contains("GPU"));
    assert!(!temp.path().join("result").exists());
}

#[test]
fn test_partial_resume_flags_rejected() {
    let temp = TempDir::new().unwrap();
    write_datasets(temp.path());

    train_cmd(temp.path())
        .args(["--resume", "result/cpu/epoch-1.iter"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--resume-model"));
}

#[test]
fn test_train_writes_log_and_checkpoints() {
    let temp = TempDir::new().unwrap();
    write_datasets(temp.path());

    train_cmd(temp.path())
        .args(["--epochs", "10"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Loss: "))
        .stdout(predicate::str::contains("Validation/Loss: "))
        .stdout(predicate::str::contains("Training run complete"));

    let run_dir = temp.path().join("result").join("cpu");
    assert!(run_dir.join("log").is_file());
    for ext in ["iter", "model", "state"] {
        assert!(run_dir.join(format!("epoch-10.{ext}")).is_file());
    }
}

#[test]
fn test_train_json_summary_and_resume() {
    let temp = TempDir::new().unwrap();
    write_datasets(temp.path());

    train_cmd(temp.path())
        .args(["--epochs", "4", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"epochs_run\": 4"))
        .stdout(predicate::str::contains("Loss: ").not());

    train_cmd(temp.path())
        .args([
            "--epochs",
            "6",
            "--json",
            "--resume",
            "result/cpu/epoch-4.iter",
            "--resume-model",
            "result/cpu/epoch-4.model",
            "--resume-opt",
            "result/cpu/epoch-4.state",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"start_epoch\": 5"))
        .stdout(predicate::str::contains("\"epochs_run\": 2"));
}

#[test]
fn test_train_reads_config_file() {
    let temp = TempDir::new().unwrap();
    write_datasets(temp.path());
    std::fs::write(
        temp.path().join("run.toml"),
        "joints = 2\nepochs = 3\nbatch_size = 4\ntrain = \"train.jsonl\"\nval = \"val.jsonl\"\nout = \"runs\"\n",
    )
    .unwrap();

    let mut cmd = Command::cargo_bin("posetrain").unwrap();
    cmd.current_dir(temp.path())
        .args(["train", "--config", "run.toml", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"final_epoch\": 3"));

    assert!(temp.path().join("runs/cpu/epoch-3.iter").is_file());
}

#[test]
fn test_checkpoints_lists_saved_epochs() {
    let temp = TempDir::new().unwrap();
    write_datasets(temp.path());
    train_cmd(temp.path()).args(["--epochs", "3", "--json"]).assert().success();

    let mut cmd = Command::cargo_bin("posetrain").unwrap();
    cmd.current_dir(temp.path())
        .args(["checkpoints", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"epoch\": 3"))
        .stdout(predicate::str::contains("\"complete\": true"));
}

#[test]
fn test_checkpoints_empty_run_dir() {
    let temp = TempDir::new().unwrap();

    let mut cmd = Command::cargo_bin("posetrain").unwrap();
    cmd.current_dir(temp.path())
        .args(["checkpoints", "--out", "missing"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No checkpoints found."));
}

#[test]
fn test_unknown_log_level_rejected() {
    let mut cmd = Command::cargo_bin("posetrain").unwrap();
    cmd.args(["--log-level", "loud", "checkpoints"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid value 'loud'"));
}

#[test]
fn test_no_gpu_flag_overrides_config_file() {
    let temp = TempDir::new().unwrap();
    write_datasets(temp.path());
    std::fs::write(temp.path().join("run.toml"), "gpu = true\nepochs = 1\n").unwrap();

    train_cmd(temp.path())
        .args(["--config", "run.toml", "--json"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("GPU"));

    train_cmd(temp.path())
        .args(["--config", "run.toml", "--no-gpu", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"epochs_run\": 1"));
}
