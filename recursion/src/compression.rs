//! Zstd-compressed bincode encoding of recursion state

use crate::error::GuardError;
use crate::error::Result;
use serde::Deserialize;
use serde::Serialize;
use serde::de::DeserializeOwned;

/// Zstd level used for checkpoint payloads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionLevel {
    /// Level 1
    Fast,
    /// Level 3, the Zstd default
    #[default]
    Balanced,
    /// Level 9
    Maximum,
    /// Explicit level, clamped to 1..=22
    Custom(i32),
}

impl CompressionLevel {
    pub fn zstd_level(self) -> i32 {
        match self {
            Self::Fast => 1,
            Self::Balanced => 3,
            Self::Maximum => 9,
            Self::Custom(level) => level.clamp(1, 22),
        }
    }
}

/// Serializes recursion state with bincode and compresses it with Zstd.
///
/// For every state `s` whose type round-trips through bincode,
/// `decompress(compress(s)) == s`.
#[derive(Debug, Clone, Copy, Default)]
pub struct StateCompressor {
    level: CompressionLevel,
}

impl StateCompressor {
    pub const fn new(level: CompressionLevel) -> Self {
        Self { level }
    }

    pub const fn level(&self) -> CompressionLevel {
        self.level
    }

    pub fn compress<T: Serialize + ?Sized>(&self, state: &T) -> Result<Vec<u8>> {
        let encoded = bincode::serde::encode_to_vec(state, bincode::config::standard())?;
        zstd::stream::encode_all(encoded.as_slice(), self.level.zstd_level())
            .map_err(|e| GuardError::Compression(format!("zstd encode: {e}")))
    }

    pub fn decompress<T: DeserializeOwned>(&self, payload: &[u8]) -> Result<T> {
        let encoded = zstd::stream::decode_all(payload)
            .map_err(|e| GuardError::Compression(format!("zstd decode: {e}")))?;

        let (state, read) =
            bincode::serde::decode_from_slice(&encoded, bincode::config::standard())?;
        if read != encoded.len() {
            return Err(GuardError::Compression(format!(
                "{} trailing bytes after state",
                encoded.len() - read
            )));
        }
        Ok(state)
    }
}
