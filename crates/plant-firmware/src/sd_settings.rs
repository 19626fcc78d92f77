use embedded_sdmmc::{Mode, SdCard, SdCardError, TimeSource, Timestamp, VolumeIdx, VolumeManager};
use log::info;
use plant_core::settings::{SettingsError, SettingsRecord, SettingsStore};
use thiserror_no_std::Error;

const SETTINGS_FILE: &str = "settings.bin";

#[derive(Error, Debug)]
pub enum SdSettingsError {
    #[error("SD card: {0:?}")]
    Card(embedded_sdmmc::Error<SdCardError>),
    #[error("settings record: {0}")]
    Record(#[from] SettingsError),
}

impl From<embedded_sdmmc::Error<SdCardError>> for SdSettingsError {
    fn from(value: embedded_sdmmc::Error<SdCardError>) -> Self {
        Self::Card(value)
    }
}

/// The controller has no wall clock; files are stamped with the FAT epoch.
pub struct FixedTime;

impl TimeSource for FixedTime {
    fn get_timestamp(&self) -> Timestamp {
        Timestamp {
            year_since_1970: 10,
            zero_indexed_month: 0,
            zero_indexed_day: 0,
            hours: 0,
            minutes: 0,
            seconds: 0,
        }
    }
}

/// Threshold settings kept in one postcard-encoded record on the SD card.
///
/// The record is read once and cached; every write rewrites the whole file
/// before the cache is updated, so a failed write leaves both unchanged.
/// Card operations are blocking.
pub struct SdSettingsStore<S, D, T>
where
    S: embedded_hal::spi::SpiDevice<u8>,
    D: embedded_hal::delay::DelayNs,
    T: TimeSource,
{
    volume_mgr: VolumeManager<SdCard<S, D>, T, 4, 4, 1>,
    cached: Option<SettingsRecord>,
}

impl<S, D, T> SdSettingsStore<S, D, T>
where
    S: embedded_hal::spi::SpiDevice<u8>,
    D: embedded_hal::delay::DelayNs,
    T: TimeSource,
{
    pub fn new(sd_card: SdCard<S, D>, ts: T) -> Self {
        Self {
            volume_mgr: VolumeManager::new(sd_card, ts),
            cached: None,
        }
    }

    fn record(&mut self) -> Result<SettingsRecord, SdSettingsError> {
        if let Some(record) = self.cached {
            return Ok(record);
        }
        let record = self.read_record()?;
        info!("Loaded settings from {}: {:?}", SETTINGS_FILE, record);
        self.cached = Some(record);
        Ok(record)
    }

    fn read_record(&self) -> Result<SettingsRecord, SdSettingsError> {
        let volume0 = self.volume_mgr.open_volume(VolumeIdx(0))?;
        let root_dir = volume0.open_root_dir()?;

        let file = match root_dir.open_file_in_dir(SETTINGS_FILE, Mode::ReadOnly) {
            Ok(file) => file,
            // Never written yet
            Err(embedded_sdmmc::Error::NotFound) => return Ok(SettingsRecord::default()),
            Err(e) => return Err(e.into()),
        };

        let mut buffer = [0u8; SettingsRecord::MAX_ENCODED_LEN];
        let mut len = 0;
        while len < buffer.len() {
            let bytes_read = file.read(&mut buffer[len..])?;
            if bytes_read == 0 {
                break; // EOF
            }
            len += bytes_read;
        }

        file.close()?;
        root_dir.close()?;
        volume0.close()?;

        Ok(SettingsRecord::decode(&buffer[..len])?)
    }

    fn write_record(&self, record: &SettingsRecord) -> Result<(), SdSettingsError> {
        let mut buffer = [0u8; SettingsRecord::MAX_ENCODED_LEN];
        let encoded = record.encode(&mut buffer)?;

        let volume0 = self.volume_mgr.open_volume(VolumeIdx(0))?;
        let root_dir = volume0.open_root_dir()?;
        let file = root_dir.open_file_in_dir(SETTINGS_FILE, Mode::ReadWriteCreateOrTruncate)?;

        file.write(encoded)?;

        // Closing flushes the directory entry; only then is the value durable.
        file.close()?;
        root_dir.close()?;
        volume0.close()?;

        Ok(())
    }
}

impl<S, D, T> SettingsStore for SdSettingsStore<S, D, T>
where
    S: embedded_hal::spi::SpiDevice<u8>,
    D: embedded_hal::delay::DelayNs,
    T: TimeSource,
{
    type Error = SdSettingsError;

    fn get_u16(&mut self, key: &str) -> Result<Option<u16>, SdSettingsError> {
        Ok(self.record()?.get(key)?)
    }

    fn set_u16(&mut self, key: &str, value: u16) -> Result<(), SdSettingsError> {
        let mut record = self.record()?;
        record.set(key, value)?;
        self.write_record(&record)?;
        self.cached = Some(record);
        Ok(())
    }
}
