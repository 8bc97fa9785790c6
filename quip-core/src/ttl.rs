use crate::error::QuipError;
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The closed set of lifetimes an entry may be created with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Ttl {
    OneHour,
    OneDay,
    ThreeDays,
    OneWeek,
}

impl Ttl {
    pub const ALL: [Ttl; 4] = [Ttl::OneHour, Ttl::OneDay, Ttl::ThreeDays, Ttl::OneWeek];

    pub fn as_str(&self) -> &'static str {
        match self {
            Ttl::OneHour => "1h",
            Ttl::OneDay => "24h",
            Ttl::ThreeDays => "72h",
            Ttl::OneWeek => "168h",
        }
    }

    pub fn duration(&self) -> Duration {
        match self {
            Ttl::OneHour => Duration::hours(1),
            Ttl::OneDay => Duration::hours(24),
            Ttl::ThreeDays => Duration::hours(72),
            Ttl::OneWeek => Duration::hours(168),
        }
    }
}

impl FromStr for Ttl {
    type Err = QuipError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ttl::ALL
            .into_iter()
            .find(|ttl| ttl.as_str() == s.trim())
            .ok_or_else(|| {
                QuipError::InvalidTtl(format!(
                    "'{}' is not one of 1h, 24h, 72h, 168h",
                    s
                ))
            })
    }
}

impl TryFrom<String> for Ttl {
    type Error = QuipError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Ttl> for String {
    fn from(ttl: Ttl) -> Self {
        ttl.as_str().to_string()
    }
}

impl fmt::Display for Ttl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
