#[cfg(feature = "sea-orm")]
use sea_orm::prelude::StringLen;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::content_status::ParseStatusError;

/// Status of a piece commitment. A piece becomes `committed` once a provider accepted a deal for it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(
    feature = "sea-orm",
    derive(sea_orm::DeriveActiveEnum, sea_orm::EnumIter),
    sea_orm(rs_type = "String", db_type = "String(StringLen::None)")
)]
#[serde(rename_all = "lowercase")]
pub enum CommitmentStatus {
    #[default]
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "open"))]
    Open,
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "committed"))]
    Committed,
}

impl CommitmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Committed => "committed",
        }
    }
}

impl fmt::Display for CommitmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CommitmentStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(Self::Open),
            "committed" => Ok(Self::Committed),
            _ => Err(ParseStatusError {
                invalid: s.to_string(),
                expected: &["open", "committed"],
            }),
        }
    }
}

/// How piece bytes reach the provider.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(
    feature = "sea-orm",
    derive(sea_orm::DeriveActiveEnum, sea_orm::EnumIter),
    sea_orm(rs_type = "String", db_type = "String(StringLen::None)")
)]
pub enum ConnectionMode {
    /// The node pushes the bytes over a transfer channel (online).
    #[default]
    #[serde(rename = "e2e", alias = "online")]
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "e2e"))]
    E2e,
    /// The provider imports previously shipped data (offline).
    #[serde(rename = "import", alias = "offline")]
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "import"))]
    Import,
}

impl ConnectionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::E2e => "e2e",
            Self::Import => "import",
        }
    }

    pub fn is_offline(&self) -> bool {
        matches!(self, Self::Import)
    }
}

impl fmt::Display for ConnectionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConnectionMode {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "e2e" | "online" => Ok(Self::E2e),
            "import" | "offline" => Ok(Self::Import),
            _ => Err(ParseStatusError {
                invalid: s.to_string(),
                expected: &["e2e", "online", "import", "offline"],
            }),
        }
    }
}
