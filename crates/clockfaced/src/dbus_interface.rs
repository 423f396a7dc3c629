use chrono::NaiveTime;
use clockface_core::types::weekday_from_index;
use clockface_core::{
    AttendanceError, AttendanceService, Embedding, EmbeddingProvider, EmployeeId, ErrorKind,
    NewEmployee,
};
use clockface_store::SqliteStore;
use serde::Serialize;
use std::sync::Arc;
use zbus::interface;

pub const BUS_NAME: &str = "org.clockface.Attendance1";
pub const OBJECT_PATH: &str = "/org/clockface/Attendance1";

pub type Service = AttendanceService<SqliteStore, Arc<dyn EmbeddingProvider>>;

/// D-Bus interface for the clockface attendance daemon.
///
/// Bus name: org.clockface.Attendance1
/// Object path: /org/clockface/Attendance1
///
/// Structured results are returned as JSON strings.
pub struct AttendanceBus {
    service: Arc<Service>,
    history_limit: usize,
    model_loaded: bool,
}

impl AttendanceBus {
    pub fn new(service: Arc<Service>, history_limit: usize, model_loaded: bool) -> Self {
        Self {
            service,
            history_limit,
            model_loaded,
        }
    }

    /// Run a service call on the blocking pool. Store and engine calls block.
    async fn blocking<T, F>(&self, f: F) -> zbus::fdo::Result<T>
    where
        F: FnOnce(&Service) -> Result<T, AttendanceError> + Send + 'static,
        T: Send + 'static,
    {
        let service = Arc::clone(&self.service);
        tokio::task::spawn_blocking(move || f(&service))
            .await
            .map_err(|e| zbus::fdo::Error::Failed(format!("worker task failed: {e}")))?
            .map_err(to_fdo)
    }
}

#[interface(name = "org.clockface.Attendance1")]
impl AttendanceBus {
    /// Identify the face in an encoded image and record attendance.
    async fn recognize(&self, image: Vec<u8>) -> zbus::fdo::Result<String> {
        tracing::info!(bytes = image.len(), "recognize requested");
        let report = self.blocking(move |s| s.recognize_image(&image)).await?;
        to_json(&report)
    }

    /// Same as `Recognize` for a caller that already has an embedding.
    async fn recognize_vector(&self, values: Vec<f64>) -> zbus::fdo::Result<String> {
        tracing::info!(dim = values.len(), "recognize_vector requested");
        let probe = to_embedding(values);
        let report = self.blocking(move |s| s.recognize(&probe)).await?;
        to_json(&report)
    }

    async fn enroll(&self, employee_id: i64, image: Vec<u8>) -> zbus::fdo::Result<()> {
        tracing::info!(employee_id, bytes = image.len(), "enroll requested");
        self.blocking(move |s| s.enroll_image(EmployeeId(employee_id), &image))
            .await
    }

    async fn enroll_vector(&self, employee_id: i64, values: Vec<f64>) -> zbus::fdo::Result<()> {
        tracing::info!(employee_id, dim = values.len(), "enroll_vector requested");
        let embedding = to_embedding(values);
        self.blocking(move |s| s.enroll(EmployeeId(employee_id), &embedding))
            .await
    }

    /// Register an employee. An empty gender is stored as absent.
    async fn create_employee(
        &self,
        code: String,
        name: String,
        gender: String,
    ) -> zbus::fdo::Result<String> {
        if code.trim().is_empty() || name.trim().is_empty() {
            return Err(zbus::fdo::Error::InvalidArgs(
                "code and name must not be empty".into(),
            ));
        }
        tracing::info!(code = %code, "create_employee requested");
        let new = NewEmployee {
            code,
            name,
            gender: Some(gender).filter(|g| !g.trim().is_empty()),
        };
        let employee = self.blocking(move |s| s.create_employee(new)).await?;
        to_json(&employee)
    }

    /// With `active_only`, deactivated employees are left out.
    async fn list_employees(&self, active_only: bool) -> zbus::fdo::Result<String> {
        let employees = self
            .blocking(move |s| {
                if active_only {
                    s.active_employees()
                } else {
                    s.employees()
                }
            })
            .await?;
        to_json(&employees)
    }

    async fn set_active(&self, employee_id: i64, active: bool) -> zbus::fdo::Result<()> {
        tracing::info!(employee_id, active, "set_active requested");
        self.blocking(move |s| s.set_active(EmployeeId(employee_id), active))
            .await
    }

    /// Returns false when no such employee existed.
    async fn delete_employee(&self, employee_id: i64) -> zbus::fdo::Result<bool> {
        tracing::info!(employee_id, "delete_employee requested");
        self.blocking(move |s| s.delete_employee(EmployeeId(employee_id)))
            .await
    }

    /// Weekday is 0 = Monday .. 6 = Sunday; times are `HH:MM` or `HH:MM:SS`.
    async fn assign_shift(
        &self,
        employee_id: i64,
        weekday: u8,
        start: String,
        end: String,
    ) -> zbus::fdo::Result<String> {
        let day = weekday_from_index(weekday).ok_or_else(|| {
            zbus::fdo::Error::InvalidArgs(format!("weekday must be 0..=6, got {weekday}"))
        })?;
        let start = parse_time_of_day(&start)?;
        let end = parse_time_of_day(&end)?;
        tracing::info!(employee_id, weekday, %start, %end, "assign_shift requested");
        let shift = self
            .blocking(move |s| s.assign_shift(EmployeeId(employee_id), day, start, end))
            .await?;
        to_json(&shift)
    }

    async fn list_shifts(&self, employee_id: i64) -> zbus::fdo::Result<String> {
        let shifts = self
            .blocking(move |s| s.shifts(EmployeeId(employee_id)))
            .await?;
        to_json(&shifts)
    }

    /// Newest events first. `employee_id <= 0` means everyone, `limit == 0`
    /// means the configured default.
    async fn history(&self, employee_id: i64, limit: u32) -> zbus::fdo::Result<String> {
        let filter = (employee_id > 0).then_some(EmployeeId(employee_id));
        let limit = match limit {
            0 => self.history_limit,
            n => n as usize,
        };
        let events = self.blocking(move |s| s.history(filter, limit)).await?;
        to_json(&events)
    }

    /// Counts for `today - window_days ..= today`; 0 means today only.
    async fn daily_summary(&self, window_days: u32) -> zbus::fdo::Result<String> {
        let counts = self
            .blocking(move |s| s.daily_summary(window_days))
            .await?;
        to_json(&counts)
    }

    /// Return daemon status information.
    async fn status(&self) -> zbus::fdo::Result<String> {
        let employees = self.blocking(|s| s.employees()).await?;
        let policy = self.service.policy();
        Ok(serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "model_loaded": self.model_loaded,
            "database": self.service.store().path().map(|p| p.display().to_string()),
            "match_threshold": policy.match_threshold,
            "min_gap_secs": policy.min_gap.num_seconds(),
            "delete_policy": policy.delete_policy,
            "employees": employees.len(),
            "active_employees": employees.iter().filter(|e| e.active).count(),
        })
        .to_string())
    }
}

fn to_embedding(values: Vec<f64>) -> Embedding {
    Embedding::new(values.into_iter().map(|v| v as f32).collect())
}

fn to_json<T: Serialize>(value: &T) -> zbus::fdo::Result<String> {
    serde_json::to_string(value).map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
}

fn parse_time_of_day(raw: &str) -> zbus::fdo::Result<NaiveTime> {
    let raw = raw.trim();
    NaiveTime::parse_from_str(raw, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M"))
        .map_err(|_| zbus::fdo::Error::InvalidArgs(format!("invalid time of day: {raw}")))
}

/// Caller mistakes become `InvalidArgs`; everything else is `Failed`.
fn to_fdo(err: AttendanceError) -> zbus::fdo::Error {
    let message = err.to_string();
    match err.kind() {
        ErrorKind::RetryScan | ErrorKind::DataQuality | ErrorKind::InvalidInput | ErrorKind::TooSoon => {
            tracing::info!(error = %message, "request rejected");
            zbus::fdo::Error::InvalidArgs(message)
        }
        ErrorKind::Integrity => {
            tracing::error!(error = %message, "store integrity violation");
            zbus::fdo::Error::Failed(message)
        }
        ErrorKind::Storage => {
            tracing::error!(error = %message, "storage failure");
            zbus::fdo::Error::Failed(message)
        }
    }
}
