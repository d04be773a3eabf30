use chrono::{SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension};
use std::path::Path;

pub const DB_FILE: &str = "transport.sqlite3";

/// Timestamp format for every `created_at`/`updated_at` column.
pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE);
    let conn = Connection::open(db_path)?;
    init_schema(&conn)?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS departments(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS staff(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            email TEXT NOT NULL,
            join_date TEXT NOT NULL,
            phone_no TEXT NOT NULL,
            department_id TEXT NOT NULL,
            salary REAL NOT NULL,
            address TEXT NOT NULL,
            gov_id TEXT NOT NULL,
            FOREIGN KEY(department_id) REFERENCES departments(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_staff_department ON staff(department_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS vehicles(
            id TEXT PRIMARY KEY,
            registration_number TEXT NOT NULL UNIQUE,
            vehicle_type TEXT NOT NULL,
            status TEXT NOT NULL,
            current_route_id TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS drivers(
            id TEXT PRIMARY KEY,
            staff_id TEXT NOT NULL,
            license_number TEXT NOT NULL,
            experience INTEGER NOT NULL,
            date_of_birth TEXT NOT NULL,
            license_expiry_date TEXT NOT NULL,
            registration_number TEXT NOT NULL UNIQUE,
            password_hash TEXT NOT NULL,
            assigned_vehicle_id TEXT,
            FOREIGN KEY(staff_id) REFERENCES staff(id),
            FOREIGN KEY(assigned_vehicle_id) REFERENCES vehicles(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_drivers_staff ON drivers(staff_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS vehicle_drivers(
            vehicle_id TEXT NOT NULL,
            driver_id TEXT NOT NULL,
            sort_order INTEGER NOT NULL,
            PRIMARY KEY(vehicle_id, driver_id),
            FOREIGN KEY(vehicle_id) REFERENCES vehicles(id),
            FOREIGN KEY(driver_id) REFERENCES drivers(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_vehicle_drivers_driver ON vehicle_drivers(driver_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS routes(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            vehicle_id TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY(vehicle_id) REFERENCES vehicles(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS route_stops(
            route_id TEXT NOT NULL,
            sequence INTEGER NOT NULL,
            name TEXT NOT NULL,
            lat REAL NOT NULL,
            lng REAL NOT NULL,
            PRIMARY KEY(route_id, sequence),
            FOREIGN KEY(route_id) REFERENCES routes(id)
        )",
        [],
    )?;

    // Stops live in one JSON column so a tracker save is a single-row write.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS vehicle_history(
            id TEXT PRIMARY KEY,
            vehicle_id TEXT NOT NULL,
            route_id TEXT NOT NULL,
            date TEXT NOT NULL,
            stops_json TEXT NOT NULL,
            completed INTEGER NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY(vehicle_id) REFERENCES vehicles(id),
            FOREIGN KEY(route_id) REFERENCES routes(id)
        )",
        [],
    )?;
    // Workspaces created before optimistic saves have no version column.
    ensure_vehicle_history_version(conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_vehicle_history_vehicle_date ON vehicle_history(vehicle_id, date)",
        [],
    )?;

    Ok(())
}

fn ensure_vehicle_history_version(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "vehicle_history", "version")? {
        return Ok(());
    }
    conn.execute(
        "ALTER TABLE vehicle_history ADD COLUMN version INTEGER NOT NULL DEFAULT 1",
        [],
    )?;
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

pub fn settings_get_json(conn: &Connection, key: &str) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value_json FROM settings WHERE key = ?",
            [key],
            |r| r.get(0),
        )
        .optional()?;
    match raw {
        Some(s) => Ok(Some(serde_json::from_str(&s)?)),
        None => Ok(None),
    }
}

pub fn settings_set_json(
    conn: &Connection,
    key: &str,
    value: &serde_json::Value,
) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO settings(key, value_json) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json",
        (key, serde_json::to_string(value)?),
    )?;
    Ok(())
}
