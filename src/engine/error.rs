use ulid::Ulid;

use crate::validate::ValidationFailure;

#[derive(Debug)]
pub enum EngineError {
    NotFound(Ulid),
    AlreadyExists(Ulid),
    InvalidConfig(&'static str),
    BadRequest(&'static str),
    /// Input failed one or more admissibility rules.
    Rejected(ValidationFailure),
    /// Airfield still holds timeslots or reservations.
    NotEmpty(Ulid),
    /// Change would leave reservations outside any available timeslot.
    WouldOrphan {
        timeslot: Ulid,
        reservations: Vec<Ulid>,
    },
    LimitExceeded(&'static str),
    WalError(String),
}

impl EngineError {
    /// Stable machine-readable code, one per outcome the caller must tell apart.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::NotFound(_) => "not_found",
            EngineError::AlreadyExists(_) => "already_exists",
            EngineError::InvalidConfig(_) => "invalid_config",
            EngineError::BadRequest(_) => "bad_request",
            EngineError::Rejected(f) if f.capacity_exceeded() => "capacity_exceeded",
            EngineError::Rejected(_) => "invalid",
            EngineError::NotEmpty(_) => "not_empty",
            EngineError::WouldOrphan { .. } => "would_orphan",
            EngineError::LimitExceeded(_) => "limit_exceeded",
            EngineError::WalError(_) => "internal",
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::InvalidConfig(msg) => write!(f, "invalid configuration: {msg}"),
            EngineError::BadRequest(msg) => write!(f, "bad request: {msg}"),
            EngineError::Rejected(failure) => write!(f, "rejected: {failure}"),
            EngineError::NotEmpty(id) => {
                write!(f, "cannot delete airfield {id}: it still has timeslots or reservations")
            }
            EngineError::WouldOrphan {
                timeslot,
                reservations,
            } => write!(
                f,
                "timeslot {timeslot} still holds {} reservation(s)",
                reservations.len()
            ),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<ValidationFailure> for EngineError {
    fn from(failure: ValidationFailure) -> Self {
        EngineError::Rejected(failure)
    }
}
