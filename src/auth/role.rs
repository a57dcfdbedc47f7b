use std::fmt;
use std::str::FromStr;

/// Account role. Stored verbatim in `users.role` and sent on the wire with
/// the same capitalised spelling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum Role {
    Admin,
    Maestro,
    Alumno,
}

impl Role {
    /// Roles an administrator may hand out through the admin API.
    /// Students only come in through self-registration.
    pub fn is_staff(self) -> bool {
        matches!(self, Self::Admin | Self::Maestro)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Admin => "Admin",
            Self::Maestro => "Maestro",
            Self::Alumno => "Alumno",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Admin" => Ok(Self::Admin),
            "Maestro" => Ok(Self::Maestro),
            "Alumno" => Ok(Self::Alumno),
            other => anyhow::bail!("unknown role: {other}"),
        }
    }
}
