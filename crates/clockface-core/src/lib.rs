//! Face-matching attendance engine.
//!
//! Matches probe embeddings against per-employee representative vectors and
//! turns accepted matches into IN/OUT ledger events, guarded by a re-scan gap
//! and scored for lateness against a weekly shift schedule.

pub mod aggregate;
pub mod arcface;
pub mod attendance;
pub mod matcher;
pub mod memory;
pub mod provider;
pub mod service;
pub mod store;
pub mod types;

pub use aggregate::aggregate;
pub use attendance::{AttendancePolicy, DeletePolicy};
pub use matcher::{cosine_distance, ensure_comparable, BestMatch, CosineMatcher, MatchError, Matcher};
pub use provider::{EmbeddingProvider, ProviderError};
pub use service::{AttendanceError, AttendanceService, ErrorKind, RecognitionReport, RecognitionStatus};
pub use store::{AttendanceLedger, EmbeddingStore, EmployeeDirectory, ShiftRegistry, Store, StoreError};
pub use types::{
    AttendanceEvent, CheckType, DailyCount, Embedding, Employee, EmployeeId, NewAttendanceEvent,
    NewEmployee, Shift,
};

/// Default directory for ONNX model files.
pub fn default_model_dir() -> std::path::PathBuf {
    std::path::PathBuf::from("/usr/share/clockface/models")
}
