use rusqlite::Connection;

pub(crate) fn init(conn: &Connection) -> rusqlite::Result<()> {
    // Ensure foreign keys are enforced (disabled by default in SQLite).
    conn.pragma_update(None, "foreign_keys", "ON")?;

    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS tables (
          id TEXT PRIMARY KEY,
          name TEXT NOT NULL,
          properties JSON NOT NULL,
          joined_from TEXT,
          created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
        );

        -- Rows, columns and stats are stored as JSON documents. A snapshot is
        -- never updated after insert.
        CREATE TABLE IF NOT EXISTS snapshots (
          id TEXT PRIMARY KEY,
          table_id TEXT NOT NULL REFERENCES tables(id),
          version INTEGER NOT NULL CHECK (version > 0),
          data_rows JSON NOT NULL,
          data_columns JSON NOT NULL,
          column_stats JSON NOT NULL,
          created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
          UNIQUE (table_id, version)
        );

        CREATE TABLE IF NOT EXISTS actions (
          id TEXT PRIMARY KEY,
          table_id TEXT NOT NULL REFERENCES tables(id),
          "order" INTEGER NOT NULL,
          name TEXT NOT NULL,
          parameters JSON NOT NULL,
          snapshot_id TEXT REFERENCES snapshots(id),
          UNIQUE (table_id, "order")
        );

        CREATE INDEX IF NOT EXISTS idx_actions_pending ON actions(table_id, snapshot_id, "order");

        CREATE TABLE IF NOT EXISTS joins (
          id TEXT PRIMARY KEY,
          table_id TEXT NOT NULL UNIQUE REFERENCES tables(id),
          source_table_id TEXT NOT NULL REFERENCES tables(id),
          target_table_id TEXT NOT NULL REFERENCES tables(id),
          join_type TEXT NOT NULL,
          clauses JSON NOT NULL,
          suffix TEXT NOT NULL
        );
        "#,
    )?;

    // Databases created before stats caching have no `cached` column.
    ensure_action_columns(conn)?;

    Ok(())
}

fn ensure_action_columns(conn: &Connection) -> rusqlite::Result<()> {
    let mut stmt = conn.prepare("PRAGMA table_info(actions)")?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(1))?;
    let mut existing = std::collections::HashSet::new();
    for name in rows {
        existing.insert(name?);
    }

    if !existing.contains("cached") {
        conn.execute("ALTER TABLE actions ADD COLUMN cached JSON", [])?;
    }

    Ok(())
}
