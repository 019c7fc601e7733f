use dive_core::{
    ActionError, ColumnType, CsvExtractor, DeferredTasks, Engine, EngineConfig, EngineError, InMemoryRepository,
    JoinClause, JoinError, JoinOperation, JoinSpec, JoinType, Repository, RepositoryError, Task, TableProperties,
    Value,
};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use uuid::Uuid;

type TestEngine = Engine<InMemoryRepository, Arc<DeferredTasks>>;

fn engine() -> (TestEngine, Arc<DeferredTasks>) {
    let tasks = Arc::new(DeferredTasks::new());
    (Engine::new(InMemoryRepository::new(), tasks.clone()), tasks)
}

fn seeded(engine: &TestEngine, name: &str, csv: &str) -> Uuid {
    let table = engine.create_table(name, None).expect("create table");
    engine
        .extract_table(table.id, &mut csv.as_bytes(), &CsvExtractor::default())
        .expect("extract table");
    table.id
}

fn run_all(engine: &TestEngine, tasks: &DeferredTasks) {
    for task in tasks.drain() {
        engine.run_task(task).expect("run task");
    }
}

fn params(raw: &[&str]) -> Vec<String> {
    raw.iter().map(|s| s.to_string()).collect()
}

const PEOPLE: &str = "id,name,score\n1, Ana ,2.5\n2,Sam,\n3,Bo,4\n";

#[test]
fn cast_touches_only_the_cast_column_stats() {
    let (engine, tasks) = engine();
    let table = seeded(&engine, "people", PEOPLE);
    let before = engine.project(table).unwrap();

    engine
        .create_action(table, 1, "cast_column", params(&["0", "string"]))
        .unwrap();
    run_all(&engine, &tasks);
    let after = engine.project(table).unwrap();

    assert_eq!(after.pending_actions, 1);
    assert_eq!(after.columns[0].column_type, ColumnType::String);
    assert_eq!(after.column_stats[1], before.column_stats[1]);
    assert_eq!(after.column_stats[2], before.column_stats[2]);
    assert_ne!(after.column_stats[0], before.column_stats[0]);
    assert_eq!(after.rows[0].get("0"), &Value::from("1"));
}

#[test]
fn flush_writes_next_version_and_is_a_no_op_when_repeated() {
    let (engine, tasks) = engine();
    let table = seeded(&engine, "people", PEOPLE);
    engine
        .create_action(table, 1, "trim_whitespace", Vec::new())
        .unwrap();
    engine
        .create_action(table, 2, "fill_null", params(&["2", "0"]))
        .unwrap();
    run_all(&engine, &tasks);
    let projected = engine.project(table).unwrap();

    let snapshot = engine.apply_table(table).unwrap().expect("new snapshot");
    assert_eq!(snapshot.version, 2);
    assert_eq!(snapshot.rows, projected.rows);
    assert_eq!(snapshot.rows[0].get("1"), &Value::from("Ana"));
    assert_eq!(snapshot.rows[1].get("2"), &Value::Float(0.0));

    assert_eq!(engine.apply_table(table).unwrap(), None);
    let state = engine.state(table).unwrap();
    assert_eq!(state.snapshot().map(|s| s.version), Some(2));
    assert!(state.pending().is_empty());
}

#[test]
fn actions_validate_against_the_projected_columns() {
    let (engine, tasks) = engine();
    let table = seeded(&engine, "people", PEOPLE);
    engine
        .create_action(table, 1, "cast_column", params(&["2", "string"]))
        .unwrap();
    run_all(&engine, &tasks);

    // "abc" is a valid replacement once column 2 is projected as a string.
    engine
        .create_action(table, 2, "fill_null", params(&["2", "abc"]))
        .unwrap();

    let err = engine
        .create_action(table, 3, "cast_column", params(&["9", "integer"]))
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::Action(ActionError::UnknownColumn { ref column }) if column == "9"
    ));
    assert_eq!(engine.state(table).unwrap().pending().len(), 2);
}

#[test]
fn unknown_names_and_duplicate_orders_are_rejected() {
    let (engine, _tasks) = engine();
    let table = seeded(&engine, "people", PEOPLE);
    assert!(matches!(
        engine.create_action(table, 1, "random action", Vec::new()),
        Err(EngineError::UnknownAction(_))
    ));
    engine
        .create_action(table, 1, "rename_column", params(&["1", "Who"]))
        .unwrap();
    engine.apply_table(table).unwrap();
    // Applied actions keep their order.
    assert!(matches!(
        engine.create_action(table, 1, "rename_column", params(&["1", "Again"])),
        Err(EngineError::Repository(RepositoryError::Conflict(_)))
    ));
}

#[test]
fn actions_must_follow_the_last_pending_order() {
    let (engine, tasks) = engine();
    let table = seeded(&engine, "people", PEOPLE);
    engine
        .create_action(table, 5, "cast_column", params(&["0", "string"]))
        .unwrap();
    run_all(&engine, &tasks);

    for order in [3, 5] {
        assert!(matches!(
            engine.create_action(table, order, "rename_column", params(&["1", "Who"])),
            Err(EngineError::OutOfOrder { last: 5, .. })
        ));
    }
    assert_eq!(engine.state(table).unwrap().pending().len(), 1);
    assert!(tasks.is_empty());

    engine
        .create_action(table, 6, "rename_column", params(&["1", "Who"]))
        .unwrap();
    run_all(&engine, &tasks);
    let projected = engine.project(table).unwrap();
    let flushed = engine.apply_table(table).unwrap().expect("flushed");
    assert_eq!(projected.columns, flushed.columns);
    assert_eq!(flushed.columns[1].label, "Who");
}

#[test]
fn actions_on_an_empty_table_need_a_snapshot() {
    let (engine, _tasks) = engine();
    let table = engine.create_table("empty", None).unwrap();
    assert!(matches!(
        engine.create_action(table.id, 1, "cast_column", params(&["0", "integer"])),
        Err(EngineError::Action(ActionError::MissingSnapshot))
    ));
    assert_eq!(engine.project(table.id).unwrap().rows.len(), 0);
    assert!(matches!(
        engine.apply_table(table.id),
        Err(EngineError::MissingSnapshot(id)) if id == table.id
    ));
}

#[test]
fn stats_task_is_queued_after_the_action_is_stored() {
    let (engine, tasks) = engine();
    let table = seeded(&engine, "people", PEOPLE);
    let action = engine
        .create_action(table, 1, "cast_column", params(&["0", "float"]))
        .unwrap();
    assert_eq!(tasks.drain(), vec![Task::RecomputeStats { action_id: action.id }]);

    let cache = engine.recompute_stats(action.id).unwrap().expect("cache");
    let stored = engine.repository().get_action(action.id).unwrap();
    assert_eq!(stored.cached, Some(cache.clone()));
    // Retrying stores the same result.
    assert_eq!(engine.recompute_stats(action.id).unwrap(), Some(cache));

    engine.apply_table(table).unwrap();
    assert_eq!(engine.recompute_stats(action.id).unwrap(), None);
}

#[test]
fn projection_until_an_action_ignores_later_ones() {
    let (engine, tasks) = engine();
    let table = seeded(&engine, "people", PEOPLE);
    let first = engine
        .create_action(table, 1, "cast_column", params(&["0", "float"]))
        .unwrap();
    engine
        .create_action(table, 2, "cast_column", params(&["0", "string"]))
        .unwrap();
    run_all(&engine, &tasks);

    let until_first = engine.project_until(first.id).unwrap();
    assert_eq!(until_first.columns[0].column_type, ColumnType::Float);
    assert_eq!(until_first.rows[0].get("0"), &Value::Float(1.0));
    assert_eq!(engine.project(table).unwrap().columns[0].column_type, ColumnType::String);
}

#[test]
fn preview_is_capped_by_config() {
    let engine = Engine::with_config(
        InMemoryRepository::new(),
        DeferredTasks::new(),
        Default::default(),
        EngineConfig {
            preview_rows: 2,
            default_properties: TableProperties::default(),
        },
    );
    let table = engine.create_table("people", None).unwrap();
    engine
        .extract_table(table.id, &mut PEOPLE.as_bytes(), &CsvExtractor::default())
        .unwrap();
    assert_eq!(engine.preview(table.id).unwrap().rows.len(), 2);
    assert_eq!(engine.project(table.id).unwrap().rows.len(), 3);
}

#[test]
fn join_produces_a_new_table_from_current_projections() {
    let (engine, tasks) = engine();
    let source = seeded(&engine, "people", "id,name\n1,Bibek\n3,Sameer\n4,Shreeyash\n");
    let target = seeded(&engine, "colors", "id,color\n1,Blue\n3,Red\n3,Pink\n4,Green\n");

    let joined = engine
        .create_join(JoinSpec {
            name: "people_colors".to_string(),
            source_table_id: source,
            target_table_id: target,
            join_type: JoinType::Inner,
            clauses: vec![JoinClause::equal("0", "0")],
            suffix: Some("_t".to_string()),
        })
        .unwrap();
    assert_eq!(tasks.drain(), vec![Task::MaterializeJoin { table_id: joined.id }]);

    let preview = engine.preview(joined.id).unwrap();
    assert_eq!(preview.version, None);
    assert_eq!(preview.rows.len(), 4);

    let snapshot = engine.materialize_join(joined.id).unwrap();
    assert_eq!(snapshot.version, 1);
    let keys: Vec<&str> = snapshot.columns.iter().map(|c| c.key.as_str()).collect();
    assert_eq!(keys, vec!["0", "1", "0_t", "1_t"]);
    let pairs: Vec<(String, String)> = snapshot
        .rows
        .iter()
        .map(|r| (r.get("1").to_string(), r.get("1_t").to_string()))
        .collect();
    assert_eq!(
        pairs,
        vec![
            ("Bibek".to_string(), "Blue".to_string()),
            ("Sameer".to_string(), "Red".to_string()),
            ("Sameer".to_string(), "Pink".to_string()),
            ("Shreeyash".to_string(), "Green".to_string()),
        ]
    );
    assert_eq!(snapshot.column_stats.len(), 4);

    // Idempotent: the second run returns the stored snapshot.
    assert_eq!(engine.materialize_join(joined.id).unwrap(), snapshot);
}

#[test]
fn unsupported_join_writes_nothing() {
    let (engine, tasks) = engine();
    let source = seeded(&engine, "a", "id\n1\n");
    let target = seeded(&engine, "b", "id\n1\n");
    let spec = JoinSpec {
        name: "bad".to_string(),
        source_table_id: source,
        target_table_id: target,
        join_type: JoinType::Inner,
        clauses: vec![JoinClause {
            operation: JoinOperation::GreaterThan,
            ..JoinClause::equal("0", "0")
        }],
        suffix: None,
    };
    assert!(matches!(
        engine.create_join(spec.clone()),
        Err(EngineError::Join(JoinError::UnsupportedJoin { .. }))
    ));

    let two_clauses = JoinSpec {
        clauses: vec![JoinClause::equal("0", "0"), JoinClause::equal("0", "0")],
        ..spec.clone()
    };
    assert!(matches!(
        engine.create_join(two_clauses),
        Err(EngineError::Join(JoinError::UnsupportedJoin { .. }))
    ));

    let missing_column = JoinSpec {
        clauses: vec![JoinClause::equal("0", "7")],
        ..spec
    };
    assert!(matches!(
        engine.create_join(missing_column),
        Err(EngineError::Join(JoinError::UnknownColumn { side: "target", .. }))
    ));
    assert!(tasks.is_empty());
}

#[test]
fn default_suffix_is_the_target_table_id() {
    let (engine, _tasks) = engine();
    let source = seeded(&engine, "a", "id\n1\n");
    let target = seeded(&engine, "b", "id\n1\n");
    let joined = engine
        .create_join(JoinSpec {
            name: "ab".to_string(),
            source_table_id: source,
            target_table_id: target,
            join_type: JoinType::Inner,
            clauses: vec![JoinClause::equal("0", "0")],
            suffix: None,
        })
        .unwrap();
    let snapshot = engine.materialize_join(joined.id).unwrap();
    assert_eq!(snapshot.columns[1].key, format!("0{target}"));
    assert_eq!(engine.materialize_join(joined.id).unwrap(), snapshot);
    // A seeded table is not a join result, even though it has a snapshot.
    assert!(matches!(
        engine.materialize_join(source),
        Err(EngineError::NotJoined(id)) if id == source
    ));
    let plain = engine.create_table("plain", None).unwrap();
    assert!(matches!(
        engine.materialize_join(plain.id),
        Err(EngineError::NotJoined(id)) if id == plain.id
    ));
}
