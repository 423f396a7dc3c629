use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Weekday};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Database identifier of an enrolled employee.
///
/// Ordered so that galleries keyed by it iterate deterministically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EmployeeId(pub i64);

impl fmt::Display for EmployeeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Face embedding vector (typically 512-dimensional for ArcFace).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Model version that produced this embedding (e.g., "w600k_r50").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_version: Option<String>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self {
            values,
            model_version: None,
        }
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// Euclidean norm, accumulated in f64.
    pub fn norm(&self) -> f64 {
        self.values
            .iter()
            .map(|v| f64::from(*v) * f64::from(*v))
            .sum::<f64>()
            .sqrt()
    }

    /// True when no component is NaN or infinite.
    pub fn is_finite(&self) -> bool {
        self.values.iter().all(|v| v.is_finite())
    }
}

impl From<Vec<f32>> for Embedding {
    fn from(values: Vec<f32>) -> Self {
        Self::new(values)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Employee {
    pub id: EmployeeId,
    pub code: String,
    pub name: String,
    pub gender: Option<String>,
    pub active: bool,
}

/// Payload for creating an employee; the store assigns the id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewEmployee {
    pub code: String,
    pub name: String,
    pub gender: Option<String>,
}

/// One scheduled shift for an employee on a given weekday.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shift {
    pub id: i64,
    pub employee_id: EmployeeId,
    /// 0 = Monday .. 6 = Sunday.
    #[serde(with = "weekday_index")]
    pub weekday: Weekday,
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl Shift {
    /// Scheduled start of this shift on the calendar day of `at`.
    pub fn start_on(&self, at: NaiveDateTime) -> NaiveDateTime {
        at.date().and_time(self.start)
    }
}

/// Map a 0-based index (0 = Monday) to a weekday.
pub fn weekday_from_index(index: u8) -> Option<Weekday> {
    match index {
        0 => Some(Weekday::Mon),
        1 => Some(Weekday::Tue),
        2 => Some(Weekday::Wed),
        3 => Some(Weekday::Thu),
        4 => Some(Weekday::Fri),
        5 => Some(Weekday::Sat),
        6 => Some(Weekday::Sun),
        _ => None,
    }
}

/// 0-based index of a weekday (0 = Monday).
pub fn weekday_index(weekday: Weekday) -> u8 {
    weekday.num_days_from_monday() as u8
}

mod weekday_index {
    use chrono::Weekday;
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(weekday: &Weekday, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u8(super::weekday_index(*weekday))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Weekday, D::Error> {
        let index = u8::deserialize(d)?;
        super::weekday_from_index(index)
            .ok_or_else(|| de::Error::custom(format!("weekday index out of range: {index}")))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CheckType {
    In,
    Out,
}

impl CheckType {
    pub fn as_str(self) -> &'static str {
        match self {
            CheckType::In => "IN",
            CheckType::Out => "OUT",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "IN" => Some(CheckType::In),
            "OUT" => Some(CheckType::Out),
            _ => None,
        }
    }
}

impl fmt::Display for CheckType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An attendance event before the ledger has assigned it an id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewAttendanceEvent {
    /// `None` for unrecognized faces.
    pub employee_id: Option<EmployeeId>,
    /// Code snapshot taken at write time.
    pub code: Option<String>,
    /// Name snapshot taken at write time.
    pub name: Option<String>,
    pub check_type: CheckType,
    /// Similarity (`1 - distance`) of the best candidate.
    pub score: f32,
    pub is_unknown: bool,
    pub timestamp: NaiveDateTime,
    pub late_minutes: f64,
    pub shift_id: Option<i64>,
}

impl NewAttendanceEvent {
    /// An unrecognized scan. No gap or lateness bookkeeping applies.
    pub fn unknown(score: f32, timestamp: NaiveDateTime) -> Self {
        Self {
            employee_id: None,
            code: None,
            name: None,
            check_type: CheckType::In,
            score,
            is_unknown: true,
            timestamp,
            late_minutes: 0.0,
            shift_id: None,
        }
    }
}

/// A stored, immutable ledger entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceEvent {
    pub id: i64,
    pub employee_id: Option<EmployeeId>,
    pub code: Option<String>,
    pub name: Option<String>,
    pub check_type: CheckType,
    pub score: f32,
    pub is_unknown: bool,
    pub timestamp: NaiveDateTime,
    pub late_minutes: f64,
    pub shift_id: Option<i64>,
}

impl AttendanceEvent {
    pub fn from_new(id: i64, event: NewAttendanceEvent) -> Self {
        Self {
            id,
            employee_id: event.employee_id,
            code: event.code,
            name: event.name,
            check_type: event.check_type,
            score: event.score,
            is_unknown: event.is_unknown,
            timestamp: event.timestamp,
            late_minutes: event.late_minutes,
            shift_id: event.shift_id,
        }
    }
}

/// Known/unknown event totals for one calendar day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyCount {
    pub date: NaiveDate,
    pub total: u64,
    pub known: u64,
    pub unknown: u64,
}
