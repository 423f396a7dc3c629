//! In-process store, used by tests and as the reference semantics for
//! database backends.

use crate::attendance::DeletePolicy;
use crate::store::{AttendanceLedger, EmbeddingStore, EmployeeDirectory, ShiftRegistry, StoreError};
use crate::types::{
    weekday_index, AttendanceEvent, DailyCount, Embedding, Employee, EmployeeId,
    NewAttendanceEvent, NewEmployee, Shift,
};
use chrono::{NaiveDate, NaiveTime, Weekday};
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Default)]
struct Inner {
    next_employee: i64,
    next_shift: i64,
    next_event: i64,
    employees: BTreeMap<EmployeeId, Employee>,
    embeddings: Vec<(EmployeeId, Embedding)>,
    shifts: BTreeMap<(EmployeeId, u8), Shift>,
    /// Insertion order doubles as the id order. Ids are never reused.
    events: Vec<AttendanceEvent>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of ledger rows, unknown ones included.
    pub fn event_count(&self) -> usize {
        self.lock().events.len()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl EmployeeDirectory for MemoryStore {
    fn create_employee(&self, employee: NewEmployee) -> Result<Employee, StoreError> {
        let mut inner = self.lock();
        if inner.employees.values().any(|e| e.code == employee.code) {
            return Err(StoreError::DuplicateCode(employee.code));
        }
        inner.next_employee += 1;
        let created = Employee {
            id: EmployeeId(inner.next_employee),
            code: employee.code,
            name: employee.name,
            gender: employee.gender,
            active: true,
        };
        inner.employees.insert(created.id, created.clone());
        Ok(created)
    }

    fn employee(&self, id: EmployeeId) -> Result<Option<Employee>, StoreError> {
        Ok(self.lock().employees.get(&id).cloned())
    }

    fn list_employees(&self) -> Result<Vec<Employee>, StoreError> {
        let mut all: Vec<Employee> = self.lock().employees.values().cloned().collect();
        all.sort_by(|a, b| a.code.cmp(&b.code));
        Ok(all)
    }

    fn set_active(&self, id: EmployeeId, active: bool) -> Result<(), StoreError> {
        let mut inner = self.lock();
        let employee = inner
            .employees
            .get_mut(&id)
            .ok_or(StoreError::EmployeeNotFound(id))?;
        employee.active = active;
        Ok(())
    }

    fn delete_employee(&self, id: EmployeeId, policy: DeletePolicy) -> Result<bool, StoreError> {
        let mut inner = self.lock();
        if inner.employees.remove(&id).is_none() {
            return Ok(false);
        }
        inner.embeddings.retain(|(owner, _)| *owner != id);
        inner.shifts.retain(|(owner, _), _| *owner != id);
        match policy {
            DeletePolicy::Cascade => inner.events.retain(|e| e.employee_id != Some(id)),
            DeletePolicy::Preserve => {
                for event in inner.events.iter_mut().filter(|e| e.employee_id == Some(id)) {
                    event.employee_id = None;
                    event.shift_id = None;
                }
            }
        }
        Ok(true)
    }
}

impl EmbeddingStore for MemoryStore {
    fn add_embedding(&self, employee_id: EmployeeId, embedding: &Embedding) -> Result<(), StoreError> {
        let mut inner = self.lock();
        if !inner.employees.contains_key(&employee_id) {
            return Err(StoreError::EmployeeNotFound(employee_id));
        }
        inner.embeddings.push((employee_id, embedding.clone()));
        Ok(())
    }

    fn embeddings_for(&self, employee_id: EmployeeId) -> Result<Vec<Embedding>, StoreError> {
        Ok(self
            .lock()
            .embeddings
            .iter()
            .filter(|(owner, _)| *owner == employee_id)
            .map(|(_, e)| e.clone())
            .collect())
    }

    fn active_embeddings(&self) -> Result<BTreeMap<EmployeeId, Vec<Embedding>>, StoreError> {
        let inner = self.lock();
        let mut gallery: BTreeMap<EmployeeId, Vec<Embedding>> = BTreeMap::new();
        for (owner, embedding) in &inner.embeddings {
            if inner.employees.get(owner).is_some_and(|e| e.active) {
                gallery.entry(*owner).or_default().push(embedding.clone());
            }
        }
        Ok(gallery)
    }
}

impl ShiftRegistry for MemoryStore {
    fn assign(
        &self,
        employee_id: EmployeeId,
        weekday: Weekday,
        start: NaiveTime,
        end: NaiveTime,
    ) -> Result<Shift, StoreError> {
        let mut inner = self.lock();
        if !inner.employees.contains_key(&employee_id) {
            return Err(StoreError::EmployeeNotFound(employee_id));
        }
        let key = (employee_id, weekday_index(weekday));
        let id = match inner.shifts.get(&key) {
            Some(existing) => existing.id,
            None => {
                inner.next_shift += 1;
                inner.next_shift
            }
        };
        let shift = Shift {
            id,
            employee_id,
            weekday,
            start,
            end,
        };
        inner.shifts.insert(key, shift.clone());
        Ok(shift)
    }

    fn lookup(&self, employee_id: EmployeeId, weekday: Weekday) -> Result<Option<Shift>, StoreError> {
        Ok(self
            .lock()
            .shifts
            .get(&(employee_id, weekday_index(weekday)))
            .cloned())
    }

    fn list_for(&self, employee_id: EmployeeId) -> Result<Vec<Shift>, StoreError> {
        Ok(self
            .lock()
            .shifts
            .range((employee_id, 0)..=(employee_id, 6))
            .map(|(_, s)| s.clone())
            .collect())
    }
}

impl AttendanceLedger for MemoryStore {
    fn append(&self, event: NewAttendanceEvent) -> Result<AttendanceEvent, StoreError> {
        let mut inner = self.lock();
        inner.next_event += 1;
        let stored = AttendanceEvent::from_new(inner.next_event, event);
        inner.events.push(stored.clone());
        Ok(stored)
    }

    fn last_for(&self, employee_id: EmployeeId) -> Result<Option<AttendanceEvent>, StoreError> {
        let inner = self.lock();
        // Forward scan with `>=` keeps the later insertion on equal timestamps.
        let mut last: Option<&AttendanceEvent> = None;
        for event in inner
            .events
            .iter()
            .filter(|e| !e.is_unknown && e.employee_id == Some(employee_id))
        {
            if last.map_or(true, |l| event.timestamp >= l.timestamp) {
                last = Some(event);
            }
        }
        Ok(last.cloned())
    }

    fn history(
        &self,
        employee_id: Option<EmployeeId>,
        limit: usize,
    ) -> Result<Vec<AttendanceEvent>, StoreError> {
        let inner = self.lock();
        let mut known: Vec<AttendanceEvent> = inner
            .events
            .iter()
            .filter(|e| !e.is_unknown)
            .filter(|e| employee_id.map_or(true, |id| e.employee_id == Some(id)))
            .cloned()
            .collect();
        known.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then(b.id.cmp(&a.id)));
        known.truncate(limit);
        Ok(known)
    }

    fn daily_counts(&self, since: NaiveDate) -> Result<Vec<DailyCount>, StoreError> {
        let inner = self.lock();
        let mut days: BTreeMap<NaiveDate, DailyCount> = BTreeMap::new();
        for event in inner.events.iter().filter(|e| e.timestamp.date() >= since) {
            let date = event.timestamp.date();
            let day = days.entry(date).or_insert(DailyCount {
                date,
                total: 0,
                known: 0,
                unknown: 0,
            });
            day.total += 1;
            if event.is_unknown {
                day.unknown += 1;
            } else {
                day.known += 1;
            }
        }
        Ok(days.into_values().rev().collect())
    }
}
