use dive_core::{CsvExtractor, Engine, JoinClause, JoinSpec, JoinType, Repository, Value};
use dive_storage::{task_channel, Storage, TaskWorker};
use pretty_assertions::assert_eq;
use std::sync::Arc;

#[tokio::test(flavor = "current_thread")]
async fn worker_runs_stats_and_join_tasks_after_commit() {
    let storage = Storage::open_in_memory().expect("open storage");
    let (sender, receiver) = task_channel();
    let engine = Arc::new(Engine::new(storage.clone(), sender));
    let worker = TaskWorker::spawn(engine.clone(), receiver);

    let people = engine.create_table("people", None).expect("create table");
    engine
        .extract_table(
            people.id,
            &mut "id,name\n1,Bibek\n3,Sameer\n4,Shreeyash\n".as_bytes(),
            &CsvExtractor::default(),
        )
        .expect("extract people");
    let colors = engine.create_table("colors", None).expect("create table");
    engine
        .extract_table(
            colors.id,
            &mut "id,color\n1,Blue\n3,Red\n3,Pink\n4,Green\n".as_bytes(),
            &CsvExtractor::default(),
        )
        .expect("extract colors");

    let action = engine
        .create_action(people.id, 1, "cast_column", vec!["0".into(), "string".into()])
        .expect("create action");
    let joined = engine
        .create_join(JoinSpec {
            name: "people_colors".to_string(),
            source_table_id: people.id,
            target_table_id: colors.id,
            join_type: JoinType::Inner,
            clauses: vec![JoinClause::equal("0", "0")],
            suffix: None,
        })
        .expect("create join");

    worker.flush().await.expect("flush");
    assert_eq!(worker.completed_count(), 2);
    assert_eq!(worker.failed_count(), 0);

    let stored = storage.get_action(action.id).expect("get action");
    let cache = stored.cached.expect("stats cached by worker");
    assert_eq!(cache.columns[0].column_type, dive_core::ColumnType::String);

    // The join saw the projected (string) id column of `people`; values still
    // match the integer ids of `colors` by text.
    let snapshot = Repository::latest_snapshot(&storage, joined.id)
        .expect("latest")
        .expect("join materialized");
    assert_eq!(snapshot.version, 1);
    assert_eq!(snapshot.rows.len(), 4);
    assert_eq!(snapshot.rows[0].get("0"), &Value::from("1"));

    worker.shutdown().await.expect("shutdown");
}

#[tokio::test(flavor = "current_thread")]
async fn failed_tasks_are_counted_and_the_worker_keeps_going() {
    let storage = Storage::open_in_memory().expect("open storage");
    let (sender, receiver) = task_channel();
    let engine = Arc::new(Engine::new(storage.clone(), sender));
    let worker = TaskWorker::spawn(engine.clone(), receiver);

    let table = engine.create_table("t", None).expect("create table");
    engine
        .extract_table(table.id, &mut "a\n x \n".as_bytes(), &CsvExtractor::default())
        .expect("extract");

    engine.run_task(dive_core::Task::ApplyTable { table_id: table.id }).expect("no-op flush");
    dive_core::TaskQueue::enqueue(
        engine.queue(),
        dive_core::Task::MaterializeJoin { table_id: table.id },
    );
    dive_core::TaskQueue::enqueue(
        engine.queue(),
        dive_core::Task::RecomputeStats {
            action_id: uuid::Uuid::new_v4(),
        },
    );
    engine
        .create_action(table.id, 1, "trim_whitespace", Vec::new())
        .expect("create action");
    dive_core::TaskQueue::enqueue(engine.queue(), dive_core::Task::ApplyTable { table_id: table.id });

    worker.flush().await.expect("flush");
    // The plain table is not a join result and the action id is unknown;
    // the stats pass and the flush still run.
    assert_eq!(worker.failed_count(), 2);
    assert_eq!(worker.completed_count(), 2);
    assert_eq!(
        Repository::latest_snapshot(&storage, table.id)
            .expect("latest")
            .map(|s| s.version),
        Some(2)
    );

    worker.shutdown().await.expect("shutdown");
}
