use ulid::Ulid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// Start date after end date.
    InvalidInterval,
    InvalidRequest(String),
    UnknownItem(String),
    /// No rate tier defined for the item.
    PricingUnavailable(String),
    Unavailable {
        item: String,
        reason: String,
    },
    NotFound(Ulid),
    AlreadyExists(String),
    /// Serialized unit already held by the named reference.
    Conflict(String),
    CapacityExceeded {
        item: String,
        requested: u32,
        free: u32,
    },
    LimitExceeded(&'static str),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::InvalidInterval => {
                write!(f, "invalid interval: start date is after end date")
            }
            EngineError::InvalidRequest(msg) => write!(f, "invalid request: {msg}"),
            EngineError::UnknownItem(code) => write!(f, "unknown item: {code}"),
            EngineError::PricingUnavailable(code) => {
                write!(f, "pricing unavailable: no rate defined for {code}")
            }
            EngineError::Unavailable { item, reason } => write!(f, "{item} unavailable: {reason}"),
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::AlreadyExists(key) => write!(f, "already exists: {key}"),
            EngineError::Conflict(reference) => {
                write!(f, "conflict with reservation for {reference}")
            }
            EngineError::CapacityExceeded {
                item,
                requested,
                free,
            } => write!(f, "capacity exceeded for {item}: requested {requested}, free {free}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
        }
    }
}

impl std::error::Error for EngineError {}
