//! SQLite-backed store for clockface.
//!
//! One database file holds employees, their face embeddings (JSON text),
//! weekly shifts and the append-only attendance ledger. The connection sits
//! behind a mutex; every trait method is a single locked section, and
//! multi-statement writes run inside one transaction.

use chrono::{Local, NaiveDate, NaiveDateTime, NaiveTime, Weekday};
use clockface_core::types::{weekday_from_index, weekday_index};
use clockface_core::{
    AttendanceEvent, AttendanceLedger, CheckType, DailyCount, DeletePolicy, Embedding,
    EmbeddingStore, Employee, EmployeeDirectory, EmployeeId, NewAttendanceEvent, NewEmployee,
    Shift, ShiftRegistry, StoreError,
};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;

const SCHEMA_SQL: &str = include_str!("schema.sql");

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6f";
const TIME_OF_DAY_FORMAT: &str = "%H:%M:%S";
const DATE_FORMAT: &str = "%Y-%m-%d";

const EVENT_COLUMNS: &str =
    "id, employee_id, code, name, check_type, score, is_unknown, timestamp, late_minutes, shift_id";

#[derive(Error, Debug)]
pub enum SqliteStoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("embedding encoding: {0}")]
    Json(#[from] serde_json::Error),
    #[error("employee not found: {0}")]
    EmployeeNotFound(EmployeeId),
    #[error("employee code already exists: {0}")]
    DuplicateCode(String),
    #[error("corrupt column {column}: {value}")]
    Corrupt { column: &'static str, value: String },
    #[error("connection mutex poisoned")]
    Poisoned,
}

impl From<SqliteStoreError> for StoreError {
    fn from(err: SqliteStoreError) -> Self {
        match err {
            SqliteStoreError::EmployeeNotFound(id) => StoreError::EmployeeNotFound(id),
            SqliteStoreError::DuplicateCode(code) => StoreError::DuplicateCode(code),
            SqliteStoreError::Corrupt { .. } | SqliteStoreError::Json(_) => {
                StoreError::Corrupt(err.to_string())
            }
            other => StoreError::backend(other),
        }
    }
}

pub struct SqliteStore {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl SqliteStore {
    /// Open or create the database at `path`, creating parent directories.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SqliteStoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA_SQL)?;
        tracing::info!(path = %path.display(), "attendance database opened");
        Ok(Self {
            conn: Mutex::new(conn),
            path: Some(path.to_path_buf()),
        })
    }

    pub fn in_memory() -> Result<Self, SqliteStoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: None,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn with_conn<T>(
        &self,
        f: impl FnOnce(&mut Connection) -> Result<T, SqliteStoreError>,
    ) -> Result<T, StoreError> {
        let mut conn = self.conn.lock().map_err(|_| SqliteStoreError::Poisoned)?;
        Ok(f(&mut *conn)?)
    }
}

fn now_text() -> String {
    Local::now().naive_local().format(TIMESTAMP_FORMAT).to_string()
}

fn employee_exists(conn: &Connection, id: EmployeeId) -> Result<bool, SqliteStoreError> {
    Ok(conn
        .query_row("SELECT 1 FROM employees WHERE id = ?1", [id.0], |_| Ok(()))
        .optional()?
        .is_some())
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}

fn employee_from_row(row: &Row<'_>) -> rusqlite::Result<Employee> {
    Ok(Employee {
        id: EmployeeId(row.get(0)?),
        code: row.get(1)?,
        name: row.get(2)?,
        gender: row.get(3)?,
        active: row.get(4)?,
    })
}

/// Text columns are checked after the row is read so a bad value surfaces
/// as a corrupt record rather than a generic SQLite error.
struct RawEvent {
    id: i64,
    employee_id: Option<i64>,
    code: Option<String>,
    name: Option<String>,
    check_type: String,
    score: f64,
    is_unknown: bool,
    timestamp: String,
    late_minutes: f64,
    shift_id: Option<i64>,
}

impl RawEvent {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            employee_id: row.get(1)?,
            code: row.get(2)?,
            name: row.get(3)?,
            check_type: row.get(4)?,
            score: row.get(5)?,
            is_unknown: row.get(6)?,
            timestamp: row.get(7)?,
            late_minutes: row.get(8)?,
            shift_id: row.get(9)?,
        })
    }

    fn into_event(self) -> Result<AttendanceEvent, SqliteStoreError> {
        let check_type = CheckType::parse(&self.check_type).ok_or(SqliteStoreError::Corrupt {
            column: "check_type",
            value: self.check_type.clone(),
        })?;
        let timestamp = NaiveDateTime::parse_from_str(&self.timestamp, TIMESTAMP_FORMAT)
            .map_err(|_| SqliteStoreError::Corrupt {
                column: "timestamp",
                value: self.timestamp.clone(),
            })?;
        Ok(AttendanceEvent {
            id: self.id,
            employee_id: self.employee_id.map(EmployeeId),
            code: self.code,
            name: self.name,
            check_type,
            score: self.score as f32,
            is_unknown: self.is_unknown,
            timestamp,
            late_minutes: self.late_minutes,
            shift_id: self.shift_id,
        })
    }
}

fn events_from(
    stmt: &mut rusqlite::Statement<'_>,
    params: impl rusqlite::Params,
) -> Result<Vec<AttendanceEvent>, SqliteStoreError> {
    let raw = stmt
        .query_map(params, RawEvent::from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    raw.into_iter().map(RawEvent::into_event).collect()
}

fn parse_time(column: &'static str, value: String) -> Result<NaiveTime, SqliteStoreError> {
    NaiveTime::parse_from_str(&value, TIME_OF_DAY_FORMAT)
        .map_err(|_| SqliteStoreError::Corrupt { column, value })
}

fn shift_from_raw(
    (id, employee_id, weekday, start, end): (i64, i64, i64, String, String),
) -> Result<Shift, SqliteStoreError> {
    let weekday = u8::try_from(weekday)
        .ok()
        .and_then(weekday_from_index)
        .ok_or(SqliteStoreError::Corrupt {
            column: "weekday",
            value: weekday.to_string(),
        })?;
    Ok(Shift {
        id,
        employee_id: EmployeeId(employee_id),
        weekday,
        start: parse_time("start_time", start)?,
        end: parse_time("end_time", end)?,
    })
}

type RawShift = (i64, i64, i64, String, String);

fn raw_shift(row: &Row<'_>) -> rusqlite::Result<RawShift> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
}

impl EmployeeDirectory for SqliteStore {
    fn create_employee(&self, employee: NewEmployee) -> Result<Employee, StoreError> {
        self.with_conn(|conn| {
            let inserted = conn.execute(
                "INSERT INTO employees (code, name, gender, active, created_at) VALUES (?1, ?2, ?3, 1, ?4)",
                params![employee.code, employee.name, employee.gender, now_text()],
            );
            match inserted {
                Ok(_) => {}
                Err(e) if is_unique_violation(&e) => {
                    return Err(SqliteStoreError::DuplicateCode(employee.code))
                }
                Err(e) => return Err(e.into()),
            }
            let id = EmployeeId(conn.last_insert_rowid());
            tracing::debug!(employee = %id, code = %employee.code, "employee row inserted");
            Ok(Employee {
                id,
                code: employee.code,
                name: employee.name,
                gender: employee.gender,
                active: true,
            })
        })
    }

    fn employee(&self, id: EmployeeId) -> Result<Option<Employee>, StoreError> {
        self.with_conn(|conn| {
            Ok(conn
                .query_row(
                    "SELECT id, code, name, gender, active FROM employees WHERE id = ?1",
                    [id.0],
                    employee_from_row,
                )
                .optional()?)
        })
    }

    fn list_employees(&self) -> Result<Vec<Employee>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT id, code, name, gender, active FROM employees ORDER BY code")?;
            let rows = stmt
                .query_map([], employee_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
    }

    fn set_active(&self, id: EmployeeId, active: bool) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE employees SET active = ?1 WHERE id = ?2",
                params![active, id.0],
            )?;
            if changed == 0 {
                return Err(SqliteStoreError::EmployeeNotFound(id));
            }
            Ok(())
        })
    }

    fn delete_employee(&self, id: EmployeeId, policy: DeletePolicy) -> Result<bool, StoreError> {
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            if !employee_exists(&tx, id)? {
                return Ok(false);
            }
            let ledger_rows = match policy {
                DeletePolicy::Cascade => {
                    tx.execute("DELETE FROM attendance_events WHERE employee_id = ?1", [id.0])?
                }
                DeletePolicy::Preserve => tx.execute(
                    "UPDATE attendance_events SET employee_id = NULL, shift_id = NULL WHERE employee_id = ?1",
                    [id.0],
                )?,
            };
            let embeddings = tx.execute("DELETE FROM face_embeddings WHERE employee_id = ?1", [id.0])?;
            let shifts = tx.execute("DELETE FROM shifts WHERE employee_id = ?1", [id.0])?;
            tx.execute("DELETE FROM employees WHERE id = ?1", [id.0])?;
            tx.commit()?;
            tracing::debug!(
                employee = %id,
                ?policy,
                ledger_rows,
                embeddings,
                shifts,
                "employee rows deleted"
            );
            Ok(true)
        })
    }
}

impl EmbeddingStore for SqliteStore {
    fn add_embedding(&self, employee_id: EmployeeId, embedding: &Embedding) -> Result<(), StoreError> {
        let encoded = serde_json::to_string(embedding).map_err(SqliteStoreError::from)?;
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            if !employee_exists(&tx, employee_id)? {
                return Err(SqliteStoreError::EmployeeNotFound(employee_id));
            }
            tx.execute(
                "INSERT INTO face_embeddings (employee_id, vector, created_at) VALUES (?1, ?2, ?3)",
                params![employee_id.0, encoded, now_text()],
            )?;
            tx.commit()?;
            Ok(())
        })
    }

    fn embeddings_for(&self, employee_id: EmployeeId) -> Result<Vec<Embedding>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT vector FROM face_embeddings WHERE employee_id = ?1 ORDER BY id")?;
            let encoded = stmt
                .query_map([employee_id.0], |row| row.get::<_, String>(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            encoded
                .iter()
                .map(|text| serde_json::from_str::<Embedding>(text).map_err(SqliteStoreError::from))
                .collect()
        })
    }

    fn active_embeddings(&self) -> Result<BTreeMap<EmployeeId, Vec<Embedding>>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT f.employee_id, f.vector
                 FROM face_embeddings f
                 JOIN employees e ON e.id = f.employee_id
                 WHERE e.active = 1
                 ORDER BY f.employee_id, f.id",
            )?;
            let rows = stmt
                .query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)))?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            let mut gallery: BTreeMap<EmployeeId, Vec<Embedding>> = BTreeMap::new();
            for (owner, text) in rows {
                gallery
                    .entry(EmployeeId(owner))
                    .or_default()
                    .push(serde_json::from_str(&text)?);
            }
            Ok(gallery)
        })
    }
}

impl ShiftRegistry for SqliteStore {
    fn assign(
        &self,
        employee_id: EmployeeId,
        weekday: Weekday,
        start: NaiveTime,
        end: NaiveTime,
    ) -> Result<Shift, StoreError> {
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            if !employee_exists(&tx, employee_id)? {
                return Err(SqliteStoreError::EmployeeNotFound(employee_id));
            }
            let id: i64 = tx.query_row(
                "INSERT INTO shifts (employee_id, weekday, start_time, end_time)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT (employee_id, weekday)
                 DO UPDATE SET start_time = excluded.start_time, end_time = excluded.end_time
                 RETURNING id",
                params![
                    employee_id.0,
                    weekday_index(weekday),
                    start.format(TIME_OF_DAY_FORMAT).to_string(),
                    end.format(TIME_OF_DAY_FORMAT).to_string(),
                ],
                |row| row.get(0),
            )?;
            tx.commit()?;
            Ok(Shift {
                id,
                employee_id,
                weekday,
                start,
                end,
            })
        })
    }

    fn lookup(&self, employee_id: EmployeeId, weekday: Weekday) -> Result<Option<Shift>, StoreError> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, employee_id, weekday, start_time, end_time
                 FROM shifts WHERE employee_id = ?1 AND weekday = ?2",
                params![employee_id.0, weekday_index(weekday)],
                raw_shift,
            )
            .optional()?
            .map(shift_from_raw)
            .transpose()
        })
    }

    fn list_for(&self, employee_id: EmployeeId) -> Result<Vec<Shift>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, employee_id, weekday, start_time, end_time
                 FROM shifts WHERE employee_id = ?1 ORDER BY weekday",
            )?;
            let raw = stmt
                .query_map([employee_id.0], raw_shift)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            raw.into_iter().map(shift_from_raw).collect()
        })
    }
}

impl AttendanceLedger for SqliteStore {
    fn append(&self, event: NewAttendanceEvent) -> Result<AttendanceEvent, StoreError> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO attendance_events
                 (employee_id, code, name, check_type, score, is_unknown, timestamp, late_minutes, shift_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    event.employee_id.map(|id| id.0),
                    event.code,
                    event.name,
                    event.check_type.as_str(),
                    f64::from(event.score),
                    event.is_unknown,
                    event.timestamp.format(TIMESTAMP_FORMAT).to_string(),
                    event.late_minutes,
                    event.shift_id,
                ],
            )?;
            Ok(AttendanceEvent::from_new(conn.last_insert_rowid(), event))
        })
    }

    fn last_for(&self, employee_id: EmployeeId) -> Result<Option<AttendanceEvent>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {EVENT_COLUMNS} FROM attendance_events
                 WHERE employee_id = ?1 AND is_unknown = 0
                 ORDER BY timestamp DESC, id DESC
                 LIMIT 1"
            ))?;
            Ok(events_from(&mut stmt, [employee_id.0])?.into_iter().next())
        })
    }

    fn history(
        &self,
        employee_id: Option<EmployeeId>,
        limit: usize,
    ) -> Result<Vec<AttendanceEvent>, StoreError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {EVENT_COLUMNS} FROM attendance_events
                 WHERE is_unknown = 0 AND (?1 IS NULL OR employee_id = ?1)
                 ORDER BY timestamp DESC, id DESC
                 LIMIT ?2"
            ))?;
            events_from(&mut stmt, params![employee_id.map(|id| id.0), limit])
        })
    }

    fn daily_counts(&self, since: NaiveDate) -> Result<Vec<DailyCount>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT substr(timestamp, 1, 10) AS day,
                        COUNT(*),
                        SUM(CASE WHEN is_unknown = 0 THEN 1 ELSE 0 END),
                        SUM(CASE WHEN is_unknown = 1 THEN 1 ELSE 0 END)
                 FROM attendance_events
                 WHERE substr(timestamp, 1, 10) >= ?1
                 GROUP BY day
                 ORDER BY day DESC",
            )?;
            let rows = stmt
                .query_map([since.format(DATE_FORMAT).to_string()], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, i64>(3)?,
                    ))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            rows.into_iter()
                .map(|(day, total, known, unknown)| {
                    let date = NaiveDate::parse_from_str(&day, DATE_FORMAT).map_err(|_| {
                        SqliteStoreError::Corrupt {
                            column: "timestamp",
                            value: day.clone(),
                        }
                    })?;
                    Ok(DailyCount {
                        date,
                        total: total as u64,
                        known: known as u64,
                        unknown: unknown as u64,
                    })
                })
                .collect()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn ts(day: u32, h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 6, day)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    fn hm(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn employee(store: &SqliteStore, code: &str) -> Employee {
        store
            .create_employee(NewEmployee {
                code: code.into(),
                name: format!("Name {code}"),
                gender: Some("F".into()),
            })
            .unwrap()
    }

    fn known(e: &Employee, check_type: CheckType, timestamp: NaiveDateTime) -> NewAttendanceEvent {
        NewAttendanceEvent {
            employee_id: Some(e.id),
            code: Some(e.code.clone()),
            name: Some(e.name.clone()),
            check_type,
            score: 0.875,
            is_unknown: false,
            timestamp,
            late_minutes: 1.5,
            shift_id: None,
        }
    }

    #[test]
    fn test_open_creates_file_and_persists() {
        let dir = TempDir::new().expect("failed to create temp dir");
        let path = dir.path().join("nested").join("attendance.db");
        {
            let store = SqliteStore::open(&path).unwrap();
            employee(&store, "E1");
        }
        let store = SqliteStore::open(&path).unwrap();
        assert_eq!(store.path(), Some(path.as_path()));
        assert_eq!(store.list_employees().unwrap().len(), 1);
    }

    #[test]
    fn test_duplicate_code() {
        let store = SqliteStore::in_memory().unwrap();
        employee(&store, "E1");
        let err = store
            .create_employee(NewEmployee { code: "E1".into(), name: "Other".into(), gender: None })
            .unwrap_err();
        assert!(matches!(err, StoreError::DuplicateCode(code) if code == "E1"));
    }

    #[test]
    fn test_embeddings_round_trip_grouped_by_owner() {
        let store = SqliteStore::in_memory().unwrap();
        let a = employee(&store, "A");
        let b = employee(&store, "B");
        let first = Embedding {
            values: vec![0.25, -0.5, 1.0],
            model_version: Some("w600k_r50".into()),
        };
        store.add_embedding(b.id, &Embedding::new(vec![1.0, 0.0, 0.0])).unwrap();
        store.add_embedding(a.id, &first).unwrap();
        store.add_embedding(a.id, &Embedding::new(vec![0.0, 1.0, 0.0])).unwrap();

        let gallery = store.active_embeddings().unwrap();
        assert_eq!(gallery.keys().copied().collect::<Vec<_>>(), vec![a.id, b.id]);
        assert_eq!(gallery[&a.id].len(), 2);
        assert_eq!(gallery[&a.id][0], first);
        assert_eq!(store.embeddings_for(a.id).unwrap().len(), 2);

        store.set_active(b.id, false).unwrap();
        assert!(!store.active_embeddings().unwrap().contains_key(&b.id));
    }

    #[test]
    fn test_embedding_for_missing_employee() {
        let store = SqliteStore::in_memory().unwrap();
        let err = store
            .add_embedding(EmployeeId(7), &Embedding::new(vec![1.0]))
            .unwrap_err();
        assert!(matches!(err, StoreError::EmployeeNotFound(EmployeeId(7))));
    }

    #[test]
    fn test_shift_upsert_keeps_one_row_per_weekday() {
        let store = SqliteStore::in_memory().unwrap();
        let e = employee(&store, "E1");
        let first = store.assign(e.id, Weekday::Fri, hm(9, 0), hm(17, 0)).unwrap();
        let second = store.assign(e.id, Weekday::Fri, hm(10, 30), hm(18, 0)).unwrap();
        store.assign(e.id, Weekday::Mon, hm(8, 0), hm(16, 0)).unwrap();

        assert_eq!(first.id, second.id);
        let friday = store.lookup(e.id, Weekday::Fri).unwrap().unwrap();
        assert_eq!((friday.start, friday.end), (hm(10, 30), hm(18, 0)));
        assert!(store.lookup(e.id, Weekday::Sun).unwrap().is_none());

        let week = store.list_for(e.id).unwrap();
        assert_eq!(week.iter().map(|s| s.weekday).collect::<Vec<_>>(), vec![Weekday::Mon, Weekday::Fri]);
    }

    #[test]
    fn test_shift_for_missing_employee() {
        let store = SqliteStore::in_memory().unwrap();
        let err = store.assign(EmployeeId(3), Weekday::Mon, hm(9, 0), hm(17, 0)).unwrap_err();
        assert!(matches!(err, StoreError::EmployeeNotFound(EmployeeId(3))));
    }

    #[test]
    fn test_append_and_last_for_tie_break() {
        let store = SqliteStore::in_memory().unwrap();
        let e = employee(&store, "E1");
        let first = store.append(known(&e, CheckType::In, ts(3, 9, 0, 0))).unwrap();
        let second = store.append(known(&e, CheckType::Out, ts(3, 9, 0, 0))).unwrap();
        store.append(NewAttendanceEvent::unknown(0.2, ts(3, 9, 1, 0))).unwrap();
        assert!(second.id > first.id);

        let last = store.last_for(e.id).unwrap().unwrap();
        assert_eq!(last, second);
        assert_eq!(last.code.as_deref(), Some("E1"));
        assert!((last.late_minutes - 1.5).abs() < 1e-9);
    }

    #[test]
    fn test_timestamps_keep_sub_second_order() {
        let store = SqliteStore::in_memory().unwrap();
        let e = employee(&store, "E1");
        let later = ts(3, 9, 0, 0) + chrono::Duration::milliseconds(750);
        store.append(known(&e, CheckType::In, later)).unwrap();
        store.append(known(&e, CheckType::Out, ts(3, 9, 0, 0))).unwrap();
        let last = store.last_for(e.id).unwrap().unwrap();
        assert_eq!(last.timestamp, later);
        assert_eq!(last.check_type, CheckType::In);
    }

    #[test]
    fn test_history_filters_and_limits() {
        let store = SqliteStore::in_memory().unwrap();
        let a = employee(&store, "A");
        let b = employee(&store, "B");
        store.append(known(&a, CheckType::In, ts(3, 8, 0, 0))).unwrap();
        store.append(known(&b, CheckType::In, ts(3, 8, 30, 0))).unwrap();
        store.append(NewAttendanceEvent::unknown(-1.0, ts(3, 8, 45, 0))).unwrap();
        store.append(known(&a, CheckType::Out, ts(3, 17, 0, 0))).unwrap();

        let all = store.history(None, 100).unwrap();
        assert_eq!(all.len(), 3);
        assert!(all.iter().all(|e| !e.is_unknown));
        assert_eq!(all[0].timestamp, ts(3, 17, 0, 0));

        let a_only = store.history(Some(a.id), 100).unwrap();
        assert_eq!(a_only.len(), 2);
        assert_eq!(store.history(None, 1).unwrap().len(), 1);
    }

    #[test]
    fn test_daily_counts() {
        let store = SqliteStore::in_memory().unwrap();
        let a = employee(&store, "A");
        store.append(known(&a, CheckType::In, ts(1, 9, 0, 0))).unwrap();
        store.append(known(&a, CheckType::In, ts(3, 9, 0, 0))).unwrap();
        store.append(NewAttendanceEvent::unknown(0.1, ts(3, 23, 59, 59))).unwrap();
        store.append(NewAttendanceEvent::unknown(0.1, ts(4, 0, 0, 1))).unwrap();

        let counts = store.daily_counts(NaiveDate::from_ymd_opt(2024, 6, 3).unwrap()).unwrap();
        assert_eq!(
            counts,
            vec![
                DailyCount { date: NaiveDate::from_ymd_opt(2024, 6, 4).unwrap(), total: 1, known: 0, unknown: 1 },
                DailyCount { date: NaiveDate::from_ymd_opt(2024, 6, 3).unwrap(), total: 2, known: 1, unknown: 1 },
            ]
        );
    }

    #[test]
    fn test_delete_preserve_nulls_references() {
        let store = SqliteStore::in_memory().unwrap();
        let e = employee(&store, "E1");
        store.add_embedding(e.id, &Embedding::new(vec![1.0, 0.0])).unwrap();
        let shift = store.assign(e.id, Weekday::Mon, hm(9, 0), hm(17, 0)).unwrap();
        let mut event = known(&e, CheckType::In, ts(3, 9, 5, 0));
        event.shift_id = Some(shift.id);
        store.append(event).unwrap();

        assert!(store.delete_employee(e.id, DeletePolicy::Preserve).unwrap());
        assert!(store.employee(e.id).unwrap().is_none());
        assert!(store.embeddings_for(e.id).unwrap().is_empty());
        assert!(store.list_for(e.id).unwrap().is_empty());

        let rows = store.history(None, 10).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].employee_id, None);
        assert_eq!(rows[0].shift_id, None);
        assert_eq!(rows[0].name.as_deref(), Some("Name E1"));
        assert!(!store.delete_employee(e.id, DeletePolicy::Preserve).unwrap());
    }

    #[test]
    fn test_delete_cascade_removes_history() {
        let store = SqliteStore::in_memory().unwrap();
        let e = employee(&store, "E1");
        let other = employee(&store, "E2");
        store.append(known(&e, CheckType::In, ts(3, 9, 0, 0))).unwrap();
        store.append(known(&other, CheckType::In, ts(3, 9, 0, 0))).unwrap();

        assert!(store.delete_employee(e.id, DeletePolicy::Cascade).unwrap());
        let rows = store.history(None, 10).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].employee_id, Some(other.id));
    }

    #[test]
    fn test_corrupt_timestamp_is_reported() {
        let store = SqliteStore::in_memory().unwrap();
        let e = employee(&store, "E1");
        store.append(known(&e, CheckType::In, ts(3, 9, 0, 0))).unwrap();
        {
            let conn = store.conn.lock().unwrap();
            conn.execute("UPDATE attendance_events SET timestamp = 'yesterday'", [])
                .unwrap();
        }
        let err = store.last_for(e.id).unwrap_err();
        assert!(matches!(err, StoreError::Corrupt(_)));
    }
}
