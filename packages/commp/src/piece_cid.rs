use std::fmt;
use std::str::FromStr;

use cid::Cid;
use multihash::Multihash;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::CommpError;
use crate::tree::Commitment;

/// Multicodec for an unsealed piece commitment.
pub const FIL_COMMITMENT_UNSEALED: u64 = 0xf101;
/// Multihash code for truncated, padded SHA-256 Merkle roots.
pub const SHA2_256_TRUNC254_PADDED: u64 = 0x1012;

/// Content address of a padded piece, as understood by storage providers.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PieceCid {
    inner: Cid,
}

impl PieceCid {
    pub fn from_commitment(commitment: &Commitment) -> Result<Self, CommpError> {
        let hash = Multihash::<64>::wrap(SHA2_256_TRUNC254_PADDED, commitment)
            .map_err(|e| CommpError::InvalidPieceCid(e.to_string()))?;
        Ok(Self {
            inner: Cid::new_v1(FIL_COMMITMENT_UNSEALED, hash),
        })
    }

    /// Parse and check that the CID really is a piece commitment.
    pub fn parse(s: &str) -> Result<Self, CommpError> {
        let cid = Cid::from_str(s).map_err(|e| CommpError::InvalidPieceCid(e.to_string()))?;
        Self::try_from(cid)
    }

    pub fn commitment(&self) -> Commitment {
        let mut out = [0u8; 32];
        out.copy_from_slice(self.inner.hash().digest());
        out
    }

    pub fn cid(&self) -> &Cid {
        &self.inner
    }
}

impl TryFrom<Cid> for PieceCid {
    type Error = CommpError;

    fn try_from(cid: Cid) -> Result<Self, Self::Error> {
        if cid.codec() != FIL_COMMITMENT_UNSEALED {
            return Err(CommpError::InvalidPieceCid(format!(
                "unexpected codec {:#x}",
                cid.codec()
            )));
        }
        let hash = cid.hash();
        if hash.code() != SHA2_256_TRUNC254_PADDED || hash.digest().len() != 32 {
            return Err(CommpError::InvalidPieceCid(format!(
                "unexpected multihash {:#x}/{}",
                hash.code(),
                hash.digest().len()
            )));
        }
        Ok(Self { inner: cid })
    }
}

impl FromStr for PieceCid {
    type Err = CommpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for PieceCid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.inner)
    }
}

impl fmt::Debug for PieceCid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PieceCid({})", self.inner)
    }
}

impl Serialize for PieceCid {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.inner.to_string())
    }
}

impl<'de> Deserialize<'de> for PieceCid {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}
