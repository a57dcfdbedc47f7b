//! Challenge status derivation.
//!
//! Only "completed" is ever persisted (per student, on submission). Expiry
//! depends on the clock, so both the per-student and the overall status are
//! derived at read time from the deadline, the submissions and `now`.

use std::fmt;

use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Pendiente,
    Completado,
    Vencido,
}

impl Status {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pendiente => "pendiente",
            Self::Completado => "completado",
            Self::Vencido => "vencido",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn expired(deadline: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    deadline.is_some_and(|d| d < now)
}

/// Status of one student's entry.
pub fn entry_status(
    completed: bool,
    deadline: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Status {
    if completed {
        Status::Completado
    } else if expired(deadline, now) {
        Status::Vencido
    } else {
        Status::Pendiente
    }
}

/// Overall status of a challenge from its entries' completion flags.
///
/// Every entry completed (vacuously true for an empty roster) wins over the
/// deadline.
pub fn general_status(
    completions: impl IntoIterator<Item = bool>,
    deadline: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Status {
    if completions.into_iter().all(|done| done) {
        Status::Completado
    } else if expired(deadline, now) {
        Status::Vencido
    } else {
        Status::Pendiente
    }
}
