mod common;

use chunkbatch::sink::MemoryTable;
use chunkbatch::source::MemorySource;
use chunkbatch::transform::FnTransform;
use chunkbatch::{
    BatchStatus, ExecutionRepository, FileExecutionRepository, InMemoryExecutionRepository, Job,
    JobBuilder, Record, StepBuilder,
};
use common::{FlakySink, ids, records};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

fn import_job(sink: FlakySink, n: i64) -> Job {
    let step = StepBuilder::new("import")
        .source(MemorySource::from_records(records(n)))
        .sink(sink)
        .chunk_size(2)
        .build()
        .unwrap();
    JobBuilder::new("chunkJob").step(step).build().unwrap()
}

#[tokio::test]
async fn restart_after_sink_failure_matches_uninterrupted_run() {
    let baseline_table = MemoryTable::new();
    let baseline = import_job(FlakySink::reliable(baseline_table.clone()), 5)
        .run(&InMemoryExecutionRepository::new(), &CancellationToken::new())
        .await
        .unwrap();

    let repo = InMemoryExecutionRepository::new();
    let table = MemoryTable::new();
    let cancel = CancellationToken::new();

    let first = import_job(FlakySink::new(table.clone(), 2, 1), 5)
        .run(&repo, &cancel)
        .await
        .unwrap();
    assert_eq!(first.status, BatchStatus::Failed);
    assert_eq!(first.write_count, 2);
    assert_eq!(first.restart_position, 2);

    let second = import_job(FlakySink::reliable(table.clone()), 5)
        .run(&repo, &cancel)
        .await
        .unwrap();

    assert_eq!(second.status, BatchStatus::Completed);
    assert_eq!(second.run_id, 2);
    assert_eq!(second.write_count, baseline.write_count);
    assert_eq!(second.read_count, baseline.read_count);
    assert_eq!(ids(&table), ids(&baseline_table));

    let runs = repo.job_executions("chunkJob").await.unwrap();
    assert_eq!(runs.len(), 2);
    assert_eq!(runs[0].status, BatchStatus::Failed);
}

#[tokio::test]
async fn stop_signal_takes_effect_between_chunks() {
    let repo = InMemoryExecutionRepository::new();
    let table = MemoryTable::new();
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    let step = StepBuilder::new("import")
        .source(MemorySource::from_records(records(5)))
        .transform(FnTransform::new(move |r: Record| {
            if r.get_field("id").and_then(Value::as_i64) == Some(3) {
                trigger.cancel();
            }
            Ok(Some(r))
        }))
        .sink(FlakySink::reliable(table.clone()))
        .chunk_size(2)
        .build()
        .unwrap();
    let mut job = JobBuilder::new("chunkJob").step(step).build().unwrap();

    let stopped = job.run(&repo, &cancel).await.unwrap();

    // The chunk being filled when the stop arrived still commits whole.
    assert_eq!(stopped.status, BatchStatus::Stopped);
    assert_eq!(table.chunk_sizes(), vec![2, 2]);
    assert_eq!(stopped.restart_position, 4);

    let resumed = import_job(FlakySink::reliable(table.clone()), 5)
        .run(&repo, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(resumed.status, BatchStatus::Completed);
    assert_eq!(resumed.write_count, 5);
    assert_eq!(ids(&table), vec![1, 2, 3, 4, 5]);
}

#[tokio::test]
async fn completed_steps_are_not_rerun_on_restart() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("executions.jsonl");
    let extract = MemoryTable::new();
    let load = MemoryTable::new();

    let two_steps = |load_sink: FlakySink| {
        JobBuilder::new("pipeline")
            .step(
                StepBuilder::new("extract")
                    .source(MemorySource::from_records(records(3)))
                    .sink(FlakySink::reliable(extract.clone()))
                    .chunk_size(2)
                    .build()
                    .unwrap(),
            )
            .step(
                StepBuilder::new("load")
                    .source(MemorySource::from_records(records(4)))
                    .sink(load_sink)
                    .chunk_size(2)
                    .build()
                    .unwrap(),
            )
            .build()
            .unwrap()
    };

    {
        let repo = FileExecutionRepository::open(&log).unwrap();
        let failed = two_steps(FlakySink::new(load.clone(), 1, 1))
            .run(&repo, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(failed.status, BatchStatus::Failed);
        assert_eq!(extract.len(), 3);
        assert!(load.is_empty());
    }

    // Reopened from disk, as a new process would.
    let repo = FileExecutionRepository::open(&log).unwrap();
    let restarted = two_steps(FlakySink::reliable(load.clone()))
        .run(&repo, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(restarted.status, BatchStatus::Completed);
    assert_eq!(extract.len(), 3);
    assert_eq!(load.len(), 4);
    assert_eq!(restarted.write_count, 7);

    let executed: Vec<String> = repo
        .step_executions(restarted.id)
        .await
        .unwrap()
        .into_iter()
        .map(|s| s.name)
        .collect();
    assert_eq!(executed, vec!["load"]);
}

#[tokio::test]
async fn a_completed_job_starts_fresh() {
    let repo = InMemoryExecutionRepository::new();
    let table = MemoryTable::new();

    for run_id in 1..=2 {
        let execution = import_job(FlakySink::reliable(table.clone()), 3)
            .run(&repo, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(execution.run_id, run_id);
        assert_eq!(execution.write_count, 3);
    }
    assert_eq!(table.len(), 6);
}
