//! Per-employee attendance state machine.
//!
//! The state of an employee is never stored; it is derived from the tail of
//! the ledger:
//!
//! | last event | next accepted scan |
//! |------------|--------------------|
//! | none       | IN                 |
//! | IN         | OUT                |
//! | OUT        | IN                 |
//!
//! The minimum re-scan gap guards every transition. Everything in here is
//! a pure function of its inputs; the service supplies the ledger tail and
//! the shift and holds the per-employee lock around the whole decision.

use crate::matcher::BestMatch;
use crate::types::{AttendanceEvent, CheckType, Employee, NewAttendanceEvent, Shift};
use chrono::{Duration, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// What happens to ledger rows when an employee is hard-deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeletePolicy {
    /// Keep the rows with their code/name snapshot; the employee and shift
    /// references become null.
    #[default]
    #[serde(alias = "preserve_history")]
    Preserve,
    /// Delete the employee's rows along with everything else.
    #[serde(alias = "cascade_history")]
    Cascade,
}

impl DeletePolicy {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "preserve" | "preserve_history" => Some(DeletePolicy::Preserve),
            "cascade" | "cascade_history" => Some(DeletePolicy::Cascade),
            _ => None,
        }
    }
}

/// Business rules applied to every recognition.
#[derive(Debug, Clone, PartialEq)]
pub struct AttendancePolicy {
    /// Cosine distance a match must stay strictly below. The similarity
    /// shown to users is `1 - distance` of the best candidate; no separate
    /// similarity threshold exists.
    pub match_threshold: f32,
    /// Minimum time between two recorded events of the same employee.
    pub min_gap: Duration,
    pub delete_policy: DeletePolicy,
}

impl Default for AttendancePolicy {
    fn default() -> Self {
        Self {
            match_threshold: 0.40,
            min_gap: Duration::seconds(30),
            delete_policy: DeletePolicy::Preserve,
        }
    }
}

impl AttendancePolicy {
    /// Whether a matcher result identifies someone under this policy.
    pub fn accepts(&self, result: &BestMatch) -> bool {
        result.employee_id.is_some() && result.distance < self.match_threshold
    }
}

/// A scan arrived before the minimum gap elapsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GapViolation {
    /// Whole seconds left to wait, rounded up, at least 1.
    pub remaining_secs: u64,
}

/// Reject `now` if it falls inside the gap after `last`.
///
/// A `now` earlier than the last event (clock moved backwards) is treated as
/// inside the gap and reports the full gap as remaining.
pub fn check_gap(
    last: Option<&AttendanceEvent>,
    now: NaiveDateTime,
    min_gap: Duration,
) -> Result<(), GapViolation> {
    let Some(last) = last else {
        return Ok(());
    };
    let elapsed = now - last.timestamp;
    if elapsed >= min_gap {
        return Ok(());
    }

    let remaining = if elapsed < Duration::zero() {
        min_gap
    } else {
        min_gap - elapsed
    };
    let millis = remaining.num_milliseconds().max(1) as u64;
    Err(GapViolation {
        remaining_secs: millis.div_ceil(1000),
    })
}

/// IN after IN flips to OUT; anything else starts a new IN.
pub fn next_check_type(last: Option<&AttendanceEvent>) -> CheckType {
    match last {
        Some(event) if event.check_type == CheckType::In => CheckType::Out,
        _ => CheckType::In,
    }
}

/// Minutes past the scheduled start on the day of `now`, floored at zero.
pub fn late_minutes(shift: &Shift, now: NaiveDateTime) -> f64 {
    let diff = now - shift.start_on(now);
    (diff.num_milliseconds() as f64 / 60_000.0).max(0.0)
}

/// Decide the event an accepted scan produces.
///
/// `shift` is the employee's shift for `now`'s weekday and is only consulted
/// for IN events.
pub fn decide(
    employee: &Employee,
    last: Option<&AttendanceEvent>,
    shift: Option<&Shift>,
    score: f32,
    now: NaiveDateTime,
    min_gap: Duration,
) -> Result<NewAttendanceEvent, GapViolation> {
    check_gap(last, now, min_gap)?;

    let check_type = next_check_type(last);
    let (late, shift_id) = match (check_type, shift) {
        (CheckType::In, Some(shift)) => (late_minutes(shift, now), Some(shift.id)),
        _ => (0.0, None),
    };

    Ok(NewAttendanceEvent {
        employee_id: Some(employee.id),
        code: Some(employee.code.clone()),
        name: Some(employee.name.clone()),
        check_type,
        score,
        is_unknown: false,
        timestamp: now,
        late_minutes: late,
        shift_id,
    })
}

/// Human-readable status, e.g. `"Checked IN - late 5 min"`.
pub fn status_message(check_type: CheckType, late_minutes: f64) -> String {
    match check_type {
        CheckType::In if late_minutes > 0.0 => {
            format!("Checked IN - late {:.0} min", late_minutes.ceil())
        }
        CheckType::In => "Checked IN - on time".to_string(),
        CheckType::Out => "Checked OUT".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EmployeeId;
    use chrono::{NaiveDate, NaiveTime, Weekday};

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        // 2024-06-03 is a Monday.
        NaiveDate::from_ymd_opt(2024, 6, 3)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    fn employee() -> Employee {
        Employee {
            id: EmployeeId(1),
            code: "E001".into(),
            name: "Ada".into(),
            gender: None,
            active: true,
        }
    }

    fn event(check_type: CheckType, timestamp: NaiveDateTime) -> AttendanceEvent {
        AttendanceEvent {
            id: 1,
            employee_id: Some(EmployeeId(1)),
            code: Some("E001".into()),
            name: Some("Ada".into()),
            check_type,
            score: 0.9,
            is_unknown: false,
            timestamp,
            late_minutes: 0.0,
            shift_id: None,
        }
    }

    fn nine_to_five() -> Shift {
        Shift {
            id: 11,
            employee_id: EmployeeId(1),
            weekday: Weekday::Mon,
            start: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            end: NaiveTime::from_hms_opt(17, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_toggle_transitions() {
        let t = at(9, 0, 0);
        assert_eq!(next_check_type(None), CheckType::In);
        assert_eq!(next_check_type(Some(&event(CheckType::In, t))), CheckType::Out);
        assert_eq!(next_check_type(Some(&event(CheckType::Out, t))), CheckType::In);
    }

    #[test]
    fn test_gap_rejects_with_remaining_seconds() {
        let last = event(CheckType::In, at(9, 0, 0));
        let gap = Duration::seconds(30);
        assert_eq!(
            check_gap(Some(&last), at(9, 0, 10), gap),
            Err(GapViolation { remaining_secs: 20 })
        );
        assert_eq!(check_gap(Some(&last), at(9, 0, 30), gap), Ok(()));
        assert_eq!(check_gap(Some(&last), at(9, 0, 31), gap), Ok(()));
    }

    #[test]
    fn test_gap_rounds_remaining_up() {
        let last = event(CheckType::In, at(9, 0, 0));
        let now = at(9, 0, 29) + Duration::milliseconds(500);
        assert_eq!(
            check_gap(Some(&last), now, Duration::seconds(30)),
            Err(GapViolation { remaining_secs: 1 })
        );
    }

    #[test]
    fn test_gap_clock_moved_backwards() {
        let last = event(CheckType::In, at(9, 0, 0));
        assert_eq!(
            check_gap(Some(&last), at(8, 59, 0), Duration::seconds(30)),
            Err(GapViolation { remaining_secs: 30 })
        );
    }

    #[test]
    fn test_no_history_passes_gap() {
        assert_eq!(check_gap(None, at(9, 0, 0), Duration::seconds(30)), Ok(()));
    }

    #[test]
    fn test_late_minutes() {
        let shift = nine_to_five();
        assert!((late_minutes(&shift, at(9, 5, 0)) - 5.0).abs() < 1e-9);
        assert_eq!(late_minutes(&shift, at(8, 55, 0)), 0.0);
        assert_eq!(late_minutes(&shift, at(9, 0, 0)), 0.0);
        assert!((late_minutes(&shift, at(9, 0, 30)) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_decide_in_with_shift() {
        let shift = nine_to_five();
        let ev = decide(&employee(), None, Some(&shift), 0.8, at(9, 5, 0), Duration::seconds(30)).unwrap();
        assert_eq!(ev.check_type, CheckType::In);
        assert!((ev.late_minutes - 5.0).abs() < 1e-9);
        assert_eq!(ev.shift_id, Some(11));
        assert_eq!(ev.code.as_deref(), Some("E001"));
        assert!(!ev.is_unknown);
    }

    #[test]
    fn test_decide_out_ignores_shift() {
        let shift = nine_to_five();
        let last = event(CheckType::In, at(9, 0, 0));
        let ev = decide(&employee(), Some(&last), Some(&shift), 0.8, at(17, 30, 0), Duration::seconds(30)).unwrap();
        assert_eq!(ev.check_type, CheckType::Out);
        assert_eq!(ev.late_minutes, 0.0);
        assert_eq!(ev.shift_id, None);
    }

    #[test]
    fn test_decide_without_shift_is_on_time() {
        let ev = decide(&employee(), None, None, 0.8, at(11, 0, 0), Duration::seconds(30)).unwrap();
        assert_eq!(ev.late_minutes, 0.0);
        assert_eq!(ev.shift_id, None);
    }

    #[test]
    fn test_policy_accepts_uses_single_threshold() {
        let policy = AttendancePolicy::default();
        let hit = BestMatch { employee_id: Some(EmployeeId(1)), distance: 0.39 };
        let far = BestMatch { employee_id: Some(EmployeeId(1)), distance: 0.45 };
        let none = BestMatch { employee_id: None, distance: 0.1 };
        assert!(policy.accepts(&hit));
        assert!(!policy.accepts(&far));
        assert!(!policy.accepts(&none));
    }

    #[test]
    fn test_status_message() {
        assert_eq!(status_message(CheckType::In, 0.0), "Checked IN - on time");
        assert_eq!(status_message(CheckType::In, 5.0), "Checked IN - late 5 min");
        assert_eq!(status_message(CheckType::In, 0.2), "Checked IN - late 1 min");
        assert_eq!(status_message(CheckType::Out, 0.0), "Checked OUT");
    }

    #[test]
    fn test_delete_policy_parse() {
        assert_eq!(DeletePolicy::parse("cascade"), Some(DeletePolicy::Cascade));
        assert_eq!(DeletePolicy::parse(" Preserve "), Some(DeletePolicy::Preserve));
        assert_eq!(DeletePolicy::parse("drop"), None);
    }
}
