//! End-to-end pipeline engine tests over real collaborators (in-memory
//! runtime, local manifest source, recording chat transport) — no mocking
//! of the engine itself, in the spirit of the teacher's Chicago-style
//! workflow tests.

use std::sync::Arc;
use std::time::Duration;

use cicd_pilot::engine::PipelineEngine;
use cicd_pilot::executors::ConfirmationRegistry;
use cicd_pilot::logger::StructuredLogger;
use cicd_pilot::manifest_source::{LocalManifestSource, ManifestSource};
use cicd_pilot::notifier::{ChatTransport, NotifierAdapter, RecordingTransport};
use cicd_pilot::registry::sidecar::SidecarStore;
use cicd_pilot::registry::{ChatCoordinates, RunRegistry, RunStatus};
use cicd_pilot::runner::{ContainerRunner, FakeRuntime, ResourceLimits};

struct Harness {
    engine: PipelineEngine,
    #[allow(dead_code)]
    manifest_dir: tempfile::TempDir,
    #[allow(dead_code)]
    log_dir: tempfile::TempDir,
    #[allow(dead_code)]
    sidecar_dir: tempfile::TempDir,
    fake: Arc<FakeRuntime>,
    transport: Arc<RecordingTransport>,
    confirmations: Arc<ConfirmationRegistry>,
}

fn harness() -> Harness {
    let manifest_dir = tempfile::tempdir().unwrap();
    let log_dir = tempfile::tempdir().unwrap();
    let sidecar_dir = tempfile::tempdir().unwrap();

    let fake = Arc::new(FakeRuntime::new());
    let runner = Arc::new(ContainerRunner::new(fake.clone(), ResourceLimits::default()));
    let logger = Arc::new(StructuredLogger::open(log_dir.path().join("run.log")).unwrap());
    let registry = Arc::new(RunRegistry::new());
    let confirmations = Arc::new(ConfirmationRegistry::new());
    let transport = Arc::new(RecordingTransport::new());
    let notifier = Arc::new(NotifierAdapter::new(
        transport.clone() as Arc<dyn ChatTransport>,
        confirmations.clone(),
    ));
    let source: Arc<dyn ManifestSource> = Arc::new(LocalManifestSource::new(manifest_dir.path()));
    let sidecar = Arc::new(SidecarStore::new(sidecar_dir.path()));

    let engine = PipelineEngine::new(
        registry,
        logger,
        runner,
        notifier,
        confirmations.clone(),
        source,
        sidecar,
    );

    Harness { engine, manifest_dir, log_dir, sidecar_dir, fake, transport, confirmations }
}

fn write_manifest(harness: &Harness, name: &str, yaml: &str) {
    std::fs::write(harness.manifest_dir.path().join(name), yaml).unwrap();
}

async fn wait_for_terminal(harness: &Harness, run_id: u64) -> cicd_pilot::registry::Run {
    for _ in 0..200 {
        if let Some(run) = harness.engine.status(run_id).await {
            if run.status.is_terminal() {
                return run;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("run {run_id} did not reach a terminal state in time");
}

#[tokio::test]
async fn sequential_jobs_run_in_order_and_succeed() {
    let harness = harness();
    write_manifest(
        &harness,
        "seq.yaml",
        r#"
name: seq
jobs:
  a:
    image: alpine
    steps:
      - run: "step-a"
  b:
    image: alpine
    steps:
      - run: "step-b"
"#,
    );
    harness.fake.script("step-a", 0, "ok-a");
    harness.fake.script("step-b", 0, "ok-b");

    let run_id = harness.engine.start("seq.yaml", "tester", None).await.unwrap();
    let run = wait_for_terminal(&harness, run_id).await;

    assert_eq!(run.status, RunStatus::Success);
    assert_eq!(run.jobs_completed, 2);
    assert_eq!(run.jobs_failed, 0);
}

#[tokio::test]
async fn a_failing_step_short_circuits_later_jobs() {
    let harness = harness();
    write_manifest(
        &harness,
        "fail.yaml",
        r#"
name: fail
jobs:
  a:
    image: alpine
    steps:
      - run: "boom"
  b:
    image: alpine
    steps:
      - run: "never-runs"
"#,
    );
    harness.fake.script("boom", 1, "explosion");

    let run_id = harness.engine.start("fail.yaml", "tester", None).await.unwrap();
    let run = wait_for_terminal(&harness, run_id).await;

    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(run.jobs_completed, 0);
    assert_eq!(run.jobs_failed, 1);

    let logs = harness.engine.logs(run_id).await.unwrap();
    assert!(!logs.contains("never-runs"));
}

#[tokio::test]
async fn timer_job_completes_after_its_duration() {
    let harness = harness();
    write_manifest(
        &harness,
        "timer.yaml",
        r#"
name: timer_pipeline
jobs:
  wait:
    type: timer
    duration: 0
"#,
    );

    let run_id = harness.engine.start("timer.yaml", "tester", None).await.unwrap();
    let run = wait_for_terminal(&harness, run_id).await;

    assert_eq!(run.status, RunStatus::Success);
}

#[tokio::test]
async fn group_with_non_necessary_failure_still_succeeds() {
    let harness = harness();
    write_manifest(
        &harness,
        "group.yaml",
        r#"
name: group_pipeline
jobs:
  a:
    image: alpine
    steps:
      - run: "ok"
  b:
    image: alpine
    steps:
      - run: "bad"
  g:
    type: job_group
    jobs:
      - a
      - name: b
        is_necessary: false
"#,
    );
    harness.fake.script("ok", 0, "");
    harness.fake.script("bad", 1, "");

    let run_id = harness.engine.start("group.yaml", "tester", None).await.unwrap();
    let run = wait_for_terminal(&harness, run_id).await;

    assert_eq!(run.status, RunStatus::Success);
}

#[tokio::test]
async fn group_with_necessary_failure_cancels_peer_and_fails() {
    let harness = harness();
    write_manifest(
        &harness,
        "group_cancel.yaml",
        r#"
name: group_cancel_pipeline
jobs:
  quick_failure:
    image: alpine
    steps:
      - run: "bad"
  slow_peer:
    type: timer
    duration: 30
  g:
    type: job_group
    jobs:
      - name: quick_failure
        is_necessary: true
      - slow_peer
"#,
    );
    harness.fake.script("bad", 1, "");

    let run_id = harness.engine.start("group_cancel.yaml", "tester", None).await.unwrap();
    let run = wait_for_terminal(&harness, run_id).await;

    assert_eq!(run.status, RunStatus::Failed);
}

#[tokio::test]
async fn confirmation_job_approved_via_callback_lets_run_succeed() {
    let harness = harness();
    write_manifest(
        &harness,
        "confirm.yaml",
        r#"
name: confirm_pipeline
jobs:
  gate:
    type: confirmation
    message: "proceed?"
    timeout: 60
"#,
    );

    let chat = ChatCoordinates { chat_id: 1, message_id: 1 };
    let run_id = harness
        .engine
        .start("confirm.yaml", "tester", Some(chat))
        .await
        .unwrap();

    let callback_data = loop {
        let posts = harness.transport.posts.get(&1);
        if let Some(posts) = posts {
            if let Some((_, Some(buttons))) = posts.iter().find(|(_, b)| b.is_some()) {
                break buttons[0].1.clone();
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    };

    let resolved =
        cicd_pilot::executors::confirmation::route_callback(&callback_data, &harness.confirmations);
    assert!(resolved.is_some());

    let run = wait_for_terminal(&harness, run_id).await;
    assert_eq!(run.status, RunStatus::Success);
}
