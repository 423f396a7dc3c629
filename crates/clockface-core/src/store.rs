//! Contracts for the durable store collaborator.
//!
//! The core never talks to a database directly. A backend implements these
//! four traits; [`crate::memory::MemoryStore`] is the in-process reference,
//! `clockface-store` provides SQLite.

use crate::attendance::DeletePolicy;
use crate::types::{
    AttendanceEvent, DailyCount, Embedding, Employee, EmployeeId, NewAttendanceEvent, NewEmployee,
    Shift,
};
use chrono::{NaiveDate, NaiveTime, Weekday};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("employee not found: {0}")]
    EmployeeNotFound(EmployeeId),
    #[error("employee code already exists: {0}")]
    DuplicateCode(String),
    #[error("corrupt record: {0}")]
    Corrupt(String),
    #[error("store backend: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl StoreError {
    pub fn backend(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        StoreError::Backend(Box::new(err))
    }
}

pub trait EmployeeDirectory {
    fn create_employee(&self, employee: NewEmployee) -> Result<Employee, StoreError>;

    fn employee(&self, id: EmployeeId) -> Result<Option<Employee>, StoreError>;

    /// All employees ordered by code.
    fn list_employees(&self) -> Result<Vec<Employee>, StoreError>;

    fn set_active(&self, id: EmployeeId, active: bool) -> Result<(), StoreError>;

    /// Remove the employee with its embeddings and shifts, treating ledger
    /// rows as `policy` says. Returns `false` if there was no such employee.
    fn delete_employee(&self, id: EmployeeId, policy: DeletePolicy) -> Result<bool, StoreError>;
}

pub trait EmbeddingStore {
    fn add_embedding(&self, employee_id: EmployeeId, embedding: &Embedding) -> Result<(), StoreError>;

    fn embeddings_for(&self, employee_id: EmployeeId) -> Result<Vec<Embedding>, StoreError>;

    /// Every enrolled embedding of every active employee, grouped by owner in
    /// enrollment order.
    fn active_embeddings(&self) -> Result<BTreeMap<EmployeeId, Vec<Embedding>>, StoreError>;
}

/// One shift per employee per weekday.
pub trait ShiftRegistry {
    /// Insert or atomically replace the shift for `(employee_id, weekday)`.
    fn assign(
        &self,
        employee_id: EmployeeId,
        weekday: Weekday,
        start: NaiveTime,
        end: NaiveTime,
    ) -> Result<Shift, StoreError>;

    fn lookup(&self, employee_id: EmployeeId, weekday: Weekday) -> Result<Option<Shift>, StoreError>;

    /// Shifts ordered Monday first.
    fn list_for(&self, employee_id: EmployeeId) -> Result<Vec<Shift>, StoreError>;
}

/// Append-only attendance record.
pub trait AttendanceLedger {
    fn append(&self, event: NewAttendanceEvent) -> Result<AttendanceEvent, StoreError>;

    /// Most recent known event of the employee. Ties on timestamp go to the
    /// later insertion.
    fn last_for(&self, employee_id: EmployeeId) -> Result<Option<AttendanceEvent>, StoreError>;

    /// Known events, newest first.
    fn history(
        &self,
        employee_id: Option<EmployeeId>,
        limit: usize,
    ) -> Result<Vec<AttendanceEvent>, StoreError>;

    /// Per-day totals for days on or after `since`, newest day first.
    fn daily_counts(&self, since: NaiveDate) -> Result<Vec<DailyCount>, StoreError>;
}

/// Everything the attendance service needs from a backend.
pub trait Store: EmployeeDirectory + EmbeddingStore + ShiftRegistry + AttendanceLedger + Send + Sync {}

impl<T> Store for T where T: EmployeeDirectory + EmbeddingStore + ShiftRegistry + AttendanceLedger + Send + Sync {}
