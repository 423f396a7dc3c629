//! Attendance service: matching, the state machine and the store, wired
//! together with explicit dependencies.

use crate::aggregate::aggregate;
use crate::attendance::{self, AttendancePolicy};
use crate::matcher::{ensure_comparable, BestMatch, CosineMatcher, MatchError, Matcher};
use crate::provider::{EmbeddingProvider, ProviderError};
use crate::store::{Store, StoreError};
use crate::types::{
    AttendanceEvent, CheckType, DailyCount, Embedding, Employee, EmployeeId, NewAttendanceEvent,
    NewEmployee, Shift,
};
use chrono::{Datelike, Duration, Local, NaiveDate, NaiveDateTime, NaiveTime, Weekday};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AttendanceError {
    #[error("embedding extraction failed: {0}")]
    EmbeddingExtractionFailed(#[source] ProviderError),
    #[error(transparent)]
    Match(#[from] MatchError),
    #[error("matched employee {0} has no backing record")]
    EmployeeNotFound(EmployeeId),
    #[error("attendance too soon for {name}: wait {remaining_secs}s")]
    AttendanceTooSoon {
        employee_id: EmployeeId,
        name: String,
        remaining_secs: u64,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Coarse classification for mapping failures onto a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The sample was unusable; ask for another scan.
    RetryScan,
    /// Vectors are malformed (zero norm, wrong dimension).
    DataQuality,
    /// The store contradicts itself. Alert-worthy.
    Integrity,
    /// Expected business outcome the caller can wait out.
    TooSoon,
    /// The request referred to something that does not exist or is invalid.
    InvalidInput,
    Storage,
}

impl AttendanceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AttendanceError::EmbeddingExtractionFailed(_) => ErrorKind::RetryScan,
            AttendanceError::Match(_) => ErrorKind::DataQuality,
            AttendanceError::EmployeeNotFound(_) => ErrorKind::Integrity,
            AttendanceError::AttendanceTooSoon { .. } => ErrorKind::TooSoon,
            AttendanceError::Store(StoreError::EmployeeNotFound(_))
            | AttendanceError::Store(StoreError::DuplicateCode(_)) => ErrorKind::InvalidInput,
            AttendanceError::Store(StoreError::Corrupt(_)) => ErrorKind::Integrity,
            AttendanceError::Store(StoreError::Backend(_)) => ErrorKind::Storage,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RecognitionStatus {
    Recorded,
    Unknown,
    TooSoon { remaining_secs: u64 },
}

/// Outcome of one recognition, shaped for the outer application.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecognitionReport {
    pub status: RecognitionStatus,
    pub identity: Option<EmployeeId>,
    pub name: Option<String>,
    pub check_type: Option<CheckType>,
    pub late_minutes: f64,
    pub is_unknown: bool,
    pub score: f32,
    pub message: String,
    pub event_id: Option<i64>,
}

impl RecognitionReport {
    fn from_event(event: &AttendanceEvent) -> Self {
        let (status, message) = if event.is_unknown {
            (RecognitionStatus::Unknown, "Face not recognized".to_string())
        } else {
            (
                RecognitionStatus::Recorded,
                attendance::status_message(event.check_type, event.late_minutes),
            )
        };
        Self {
            status,
            identity: event.employee_id,
            name: event.name.clone(),
            check_type: Some(event.check_type),
            late_minutes: event.late_minutes,
            is_unknown: event.is_unknown,
            score: event.score,
            message,
            event_id: Some(event.id),
        }
    }
}

/// Per-employee mutexes serializing the read-decide-append sequence.
#[derive(Default)]
pub struct EmployeeLocks {
    slots: Mutex<HashMap<EmployeeId, Arc<Mutex<()>>>>,
}

impl EmployeeLocks {
    pub fn slot(&self, id: EmployeeId) -> Arc<Mutex<()>> {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(slots.entry(id).or_default())
    }

    pub fn forget(&self, id: EmployeeId) {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
    }
}

pub struct AttendanceService<S, P> {
    store: Arc<S>,
    provider: P,
    policy: AttendancePolicy,
    matcher: CosineMatcher,
    locks: EmployeeLocks,
}

impl<S: Store, P: EmbeddingProvider> AttendanceService<S, P> {
    pub fn new(store: Arc<S>, provider: P, policy: AttendancePolicy) -> Self {
        Self {
            store,
            provider,
            policy,
            matcher: CosineMatcher,
            locks: EmployeeLocks::default(),
        }
    }

    pub fn policy(&self) -> &AttendancePolicy {
        &self.policy
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Match a probe against representative embeddings built from the
    /// current store contents.
    pub fn identify(&self, probe: &Embedding) -> Result<BestMatch, AttendanceError> {
        let gallery = self
            .store
            .active_embeddings()?
            .into_iter()
            .map(|(id, samples)| Ok((id, aggregate(&samples)?)))
            .collect::<Result<BTreeMap<_, _>, MatchError>>()?;

        let result = self
            .matcher
            .find_best_match(probe, &gallery, self.policy.match_threshold)?;

        tracing::info!(
            best = ?result.employee_id,
            distance = result.distance,
            threshold = self.policy.match_threshold,
            "recognition result"
        );
        Ok(result)
    }

    /// Run the state machine for a matcher result and append the event.
    ///
    /// Fails with [`AttendanceError::AttendanceTooSoon`] without writing
    /// anything when the gap guard rejects the scan.
    pub fn record(&self, result: BestMatch, now: NaiveDateTime) -> Result<AttendanceEvent, AttendanceError> {
        let score = result.similarity();
        let employee_id = match result.employee_id {
            Some(id) if self.policy.accepts(&result) => id,
            _ => {
                let event = self.store.append(NewAttendanceEvent::unknown(score, now))?;
                tracing::warn!(event = event.id, score, "unknown face logged");
                return Ok(event);
            }
        };

        let slot = self.locks.slot(employee_id);
        let _guard = slot.lock().unwrap_or_else(PoisonError::into_inner);

        let Some(employee) = self.store.employee(employee_id)? else {
            tracing::error!(employee = %employee_id, "matcher returned an id with no employee record");
            return Err(AttendanceError::EmployeeNotFound(employee_id));
        };

        let last = self.store.last_for(employee_id)?;
        let shift = match attendance::next_check_type(last.as_ref()) {
            CheckType::In => self.store.lookup(employee_id, now.weekday())?,
            CheckType::Out => None,
        };

        let decided = attendance::decide(&employee, last.as_ref(), shift.as_ref(), score, now, self.policy.min_gap)
            .map_err(|violation| {
                tracing::info!(
                    employee = %employee_id,
                    remaining_secs = violation.remaining_secs,
                    "scan rejected by re-scan gap"
                );
                AttendanceError::AttendanceTooSoon {
                    employee_id,
                    name: employee.name.clone(),
                    remaining_secs: violation.remaining_secs,
                }
            })?;

        let event = self.store.append(decided)?;
        tracing::info!(
            employee = %employee_id,
            code = %employee.code,
            check_type = %event.check_type,
            late_minutes = event.late_minutes,
            "attendance recorded"
        );
        Ok(event)
    }

    /// Identify and record at an explicit time.
    pub fn recognize_at(&self, probe: &Embedding, now: NaiveDateTime) -> Result<RecognitionReport, AttendanceError> {
        let result = self.identify(probe)?;
        match self.record(result, now) {
            Ok(event) => Ok(RecognitionReport::from_event(&event)),
            Err(AttendanceError::AttendanceTooSoon {
                employee_id,
                name,
                remaining_secs,
            }) => Ok(RecognitionReport {
                status: RecognitionStatus::TooSoon { remaining_secs },
                identity: Some(employee_id),
                name: Some(name),
                check_type: None,
                late_minutes: 0.0,
                is_unknown: false,
                score: result.similarity(),
                message: format!("Scanned too soon, wait {remaining_secs}s"),
                event_id: None,
            }),
            Err(e) => Err(e),
        }
    }

    pub fn recognize(&self, probe: &Embedding) -> Result<RecognitionReport, AttendanceError> {
        self.recognize_at(probe, Local::now().naive_local())
    }

    pub fn recognize_image(&self, image: &[u8]) -> Result<RecognitionReport, AttendanceError> {
        let probe = self.extract(image)?;
        self.recognize(&probe)
    }

    /// Store one more sample for an employee.
    pub fn enroll(&self, employee_id: EmployeeId, embedding: &Embedding) -> Result<(), AttendanceError> {
        ensure_comparable(embedding)?;
        if let Some(existing) = self.store.embeddings_for(employee_id)?.first() {
            if existing.dim() != embedding.dim() {
                return Err(MatchError::DimensionMismatch {
                    expected: existing.dim(),
                    found: embedding.dim(),
                }
                .into());
            }
        }
        self.store.add_embedding(employee_id, embedding)?;
        tracing::info!(employee = %employee_id, dim = embedding.dim(), "embedding enrolled");
        Ok(())
    }

    pub fn enroll_image(&self, employee_id: EmployeeId, image: &[u8]) -> Result<(), AttendanceError> {
        let embedding = self.extract(image)?;
        self.enroll(employee_id, &embedding)
    }

    pub fn create_employee(&self, employee: NewEmployee) -> Result<Employee, AttendanceError> {
        let created = self.store.create_employee(employee)?;
        tracing::info!(employee = %created.id, code = %created.code, "employee created");
        Ok(created)
    }

    pub fn employees(&self) -> Result<Vec<Employee>, AttendanceError> {
        Ok(self.store.list_employees()?)
    }

    /// Employees still taking part in matching, ordered by code.
    pub fn active_employees(&self) -> Result<Vec<Employee>, AttendanceError> {
        let mut employees = self.store.list_employees()?;
        employees.retain(|e| e.active);
        Ok(employees)
    }

    pub fn set_active(&self, employee_id: EmployeeId, active: bool) -> Result<(), AttendanceError> {
        self.store.set_active(employee_id, active)?;
        tracing::info!(employee = %employee_id, active, "employee activation changed");
        Ok(())
    }

    /// Hard-delete under the configured [`crate::attendance::DeletePolicy`].
    pub fn delete_employee(&self, employee_id: EmployeeId) -> Result<bool, AttendanceError> {
        let slot = self.locks.slot(employee_id);
        let removed = {
            let _guard = slot.lock().unwrap_or_else(PoisonError::into_inner);
            self.store.delete_employee(employee_id, self.policy.delete_policy)?
        };
        self.locks.forget(employee_id);
        if removed {
            tracing::info!(employee = %employee_id, policy = ?self.policy.delete_policy, "employee deleted");
        }
        Ok(removed)
    }

    pub fn assign_shift(
        &self,
        employee_id: EmployeeId,
        weekday: Weekday,
        start: NaiveTime,
        end: NaiveTime,
    ) -> Result<Shift, AttendanceError> {
        let shift = self.store.assign(employee_id, weekday, start, end)?;
        tracing::info!(employee = %employee_id, ?weekday, %start, %end, "shift assigned");
        Ok(shift)
    }

    pub fn shifts(&self, employee_id: EmployeeId) -> Result<Vec<Shift>, AttendanceError> {
        Ok(self.store.list_for(employee_id)?)
    }

    pub fn history(&self, employee_id: Option<EmployeeId>, limit: usize) -> Result<Vec<AttendanceEvent>, AttendanceError> {
        Ok(self.store.history(employee_id, limit)?)
    }

    /// Per-day counts for `today - window_days ..= today`.
    pub fn daily_summary_at(&self, window_days: u32, today: NaiveDate) -> Result<Vec<DailyCount>, AttendanceError> {
        let since = today - Duration::days(i64::from(window_days));
        Ok(self.store.daily_counts(since)?)
    }

    pub fn daily_summary(&self, window_days: u32) -> Result<Vec<DailyCount>, AttendanceError> {
        self.daily_summary_at(window_days, Local::now().date_naive())
    }

    fn extract(&self, image: &[u8]) -> Result<Embedding, AttendanceError> {
        self.provider.extract(image).map_err(|e| {
            tracing::warn!(error = %e, "embedding extraction failed");
            AttendanceError::EmbeddingExtractionFailed(e)
        })
    }
}
