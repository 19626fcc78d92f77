//! Persistent threshold settings
//!
//! The controller persists two `u16` values under fixed keys. Platforms
//! provide a [`SettingsStore`]; stores that keep everything in one blob (the
//! SD card file on the device) use [`SettingsRecord`] as the on-media format.

use core::fmt::Debug;

use serde::{Deserialize, Serialize};
use thiserror_no_std::Error;

pub const LIGHT_THRESHOLD_KEY: &str = "light_th";
pub const MOISTURE_THRESHOLD_KEY: &str = "moist_th";

/// Blocking key-value storage for `u16` settings.
pub trait SettingsStore {
    type Error: Debug;

    /// `Ok(None)` if the key was never written.
    fn get_u16(&mut self, key: &str) -> Result<Option<u16>, Self::Error>;

    /// Durably store `value`; returns only after the write completed.
    fn set_u16(&mut self, key: &str, value: u16) -> Result<(), Self::Error>;
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingsError {
    #[error("unknown settings key")]
    UnknownKey,
    #[error("settings record does not fit the buffer")]
    Encode,
    #[error("settings record is corrupt")]
    Decode,
}

/// All persisted settings, serialized with postcard.
#[derive(Serialize, Deserialize, Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SettingsRecord {
    pub light_th: Option<u16>,
    pub moist_th: Option<u16>,
}

impl SettingsRecord {
    /// Upper bound of the encoded size (two optional varint `u16`s).
    pub const MAX_ENCODED_LEN: usize = 8;

    pub fn get(&self, key: &str) -> Result<Option<u16>, SettingsError> {
        match key {
            LIGHT_THRESHOLD_KEY => Ok(self.light_th),
            MOISTURE_THRESHOLD_KEY => Ok(self.moist_th),
            _ => Err(SettingsError::UnknownKey),
        }
    }

    pub fn set(&mut self, key: &str, value: u16) -> Result<(), SettingsError> {
        match key {
            LIGHT_THRESHOLD_KEY => self.light_th = Some(value),
            MOISTURE_THRESHOLD_KEY => self.moist_th = Some(value),
            _ => return Err(SettingsError::UnknownKey),
        }
        Ok(())
    }

    pub fn encode<'b>(&self, buf: &'b mut [u8]) -> Result<&'b mut [u8], SettingsError> {
        postcard::to_slice(self, buf).map_err(|_| SettingsError::Encode)
    }

    /// Decode a record. An empty slice (fresh file) is an empty record.
    pub fn decode(bytes: &[u8]) -> Result<Self, SettingsError> {
        if bytes.is_empty() {
            return Ok(Self::default());
        }
        postcard::from_bytes(bytes).map_err(|_| SettingsError::Decode)
    }
}
