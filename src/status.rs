//! Status and classification vocabulary. The set of codes is owned by the
//! ingestion/reference layer; only successful rows are eligible for gap
//! detection.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SwapStatus {
    Success,
    Failed,
    Pending,
}

impl SwapStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Pending => "pending",
        }
    }
}

impl fmt::Display for SwapStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("{0:?} is not a known status code")]
pub struct ParseStatusError(String);

impl FromStr for SwapStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(Self::Success),
            "failed" => Ok(Self::Failed),
            "pending" => Ok(Self::Pending),
            other => Err(ParseStatusError(other.to_string())),
        }
    }
}

/// Externally-owned vs contract classification for canonical addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressKind {
    Eoa,
    Contract,
}

impl AddressKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Eoa => "eoa",
            Self::Contract => "contract",
        }
    }
}

impl fmt::Display for AddressKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("{0:?} is not a known address kind")]
pub struct ParseAddressKindError(String);

impl FromStr for AddressKind {
    type Err = ParseAddressKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "eoa" => Ok(Self::Eoa),
            "contract" => Ok(Self::Contract),
            other => Err(ParseAddressKindError(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips() {
        for status in [SwapStatus::Success, SwapStatus::Failed, SwapStatus::Pending] {
            assert_eq!(status.as_str().parse::<SwapStatus>().unwrap(), status);
        }
    }

    #[test]
    fn unknown_status_is_rejected() {
        assert!("reverted".parse::<SwapStatus>().is_err());
    }

    #[test]
    fn kind_round_trips() {
        assert_eq!("eoa".parse::<AddressKind>().unwrap(), AddressKind::Eoa);
        assert_eq!(
            "contract".parse::<AddressKind>().unwrap(),
            AddressKind::Contract
        );
        assert!("multisig".parse::<AddressKind>().is_err());
    }
}
