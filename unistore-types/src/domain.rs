use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The logical ownership group of an entity type.
///
/// Every entity type is registered to exactly one domain at startup.
/// `Primary` is served by the document store, `Auxiliary` by the
/// relational store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    Primary,
    Auxiliary,
}

impl Domain {
    /// Both domains, in a stable order.
    pub const ALL: [Domain; 2] = [Domain::Primary, Domain::Auxiliary];

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Domain::Primary => "primary",
            Domain::Auxiliary => "auxiliary",
        }
    }

    /// Returns the opposite domain.
    #[must_use]
    pub const fn other(&self) -> Domain {
        match self {
            Domain::Primary => Domain::Auxiliary,
            Domain::Auxiliary => Domain::Primary,
        }
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Domain {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "primary" => Ok(Domain::Primary),
            "auxiliary" => Ok(Domain::Auxiliary),
            other => Err(crate::Error::UnknownDomain(other.to_string())),
        }
    }
}
