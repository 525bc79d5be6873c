//! Ctrl-C handling of `retrovibez run`, driven through the real binary.
//!
//! The CLI is started as the leader of its own process group and the
//! interrupt is sent to that whole group, the way a terminal delivers it.

#![cfg(unix)]

use retrovibez_pipeline::{RunManifest, RunStatus};
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::sleep;
use std::time::{Duration, Instant};
use tempfile::TempDir;

const ARTIFACT: &str = r#"{"time":[0.0,1.0,2.0,3.0,4.0],"x":[0,1,2,1,0],"y":[0,1,0,1,0],"dot_product":[1,-1,-1,-1,-1],"reversals":[{"start_time":0.5,"end_time":4.0}]}"#;

struct Fixture {
    _tmp: TempDir,
    dataset: PathBuf,
    config: PathBuf,
    output: PathBuf,
}

fn fixture(engine_script: &str) -> Fixture {
    let tmp = TempDir::new().expect("tempdir");
    let tracks = tmp.path().join("experiment").join("exp1_tracks");
    std::fs::create_dir_all(&tracks).expect("mkdir");
    std::fs::write(tracks.join("track1.mat"), b"MATLAB 5.0").expect("write track");

    let config = tmp.path().join("retrovibez.toml");
    std::fs::write(
        &config,
        format!("[engine]\ncommand = [\"sh\", \"-c\", '''{engine_script}''']\ntimeout_secs = 60\n"),
    )
    .expect("write config");

    Fixture {
        dataset: tmp.path().join("experiment"),
        output: tmp.path().join("out"),
        config,
        _tmp: tmp,
    }
}

fn spawn_cli(fixture: &Fixture) -> Child {
    Command::new(env!("CARGO_BIN_EXE_retrovibez"))
        .arg("--config")
        .arg(&fixture.config)
        .arg("run")
        .arg(&fixture.dataset)
        .arg("--output")
        .arg(&fixture.output)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .process_group(0)
        .spawn()
        .expect("spawn retrovibez")
}

/// Send SIGINT to every process in the group led by `child`.
fn interrupt_group(child: &Child) {
    let status = Command::new("kill")
        .arg("-INT")
        .arg(format!("-{}", child.id()))
        .status()
        .expect("run kill");
    assert!(status.success());
}

fn wait_for(path: &Path) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !path.exists() {
        assert!(Instant::now() < deadline, "{} never appeared", path.display());
        sleep(Duration::from_millis(20));
    }
}

fn wait_exit(child: &mut Child, limit: Duration) -> ExitStatus {
    let deadline = Instant::now() + limit;
    loop {
        if let Some(status) = child.try_wait().expect("try_wait") {
            return status;
        }
        if Instant::now() > deadline {
            let _ = child.kill();
            panic!("retrovibez did not exit within {limit:?}");
        }
        sleep(Duration::from_millis(20));
    }
}

#[test]
fn test_interrupt_lets_running_engine_finish() {
    let fixture = fixture(&format!(
        "sleep 2; printf '%s' '{ARTIFACT}' > \"$RETROVIBEZ_OUTPUT\""
    ));
    let mut child = spawn_cli(&fixture);

    // The track directory is created right before the engine starts.
    wait_for(&fixture.output.join("results").join("track1"));
    sleep(Duration::from_millis(300));
    interrupt_group(&child);

    let status = wait_exit(&mut child, Duration::from_secs(20));
    assert_eq!(status.code(), Some(1));

    let manifest = RunManifest::load(&fixture.output.join("run.json")).expect("manifest");
    assert_eq!(manifest.status, RunStatus::Aborted);
    assert_eq!(manifest.abort.as_ref().map(|a| a.kind.as_str()), Some("cancelled"));
    assert_eq!(manifest.analysis.len(), 1);
    assert!(manifest.analysis[0].status.is_ok(), "{:?}", manifest.analysis[0]);
    assert!(fixture.output.join("results/track1/track_data.json").exists());
}

#[test]
fn test_second_interrupt_abandons_run() {
    let fixture = fixture("sleep 30");
    let mut child = spawn_cli(&fixture);

    wait_for(&fixture.output.join("results").join("track1"));
    sleep(Duration::from_millis(300));
    interrupt_group(&child);
    sleep(Duration::from_millis(300));
    interrupt_group(&child);

    let status = wait_exit(&mut child, Duration::from_secs(10));
    assert_eq!(status.code(), Some(130));
    assert!(!fixture.output.join("run.json").exists());
}
