//! System vitals: SoC temperature and free disk space.

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use timelapse_core::health::HealthReading;

/// Default sysfs thermal zone on Raspberry Pi boards.
pub const DEFAULT_THERMAL_ZONE: &str = "/sys/class/thermal/thermal_zone0/temp";

#[derive(Debug, thiserror::Error)]
pub enum VitalsError {
    #[error("no vitals could be read")]
    Unavailable,
    #[error("vitals task failed: {0}")]
    Task(String),
}

#[async_trait]
pub trait VitalsSource: Send + Sync {
    /// Read every sensor once. Individual sensors may be missing from the
    /// reading; an error means nothing could be read at all.
    async fn read(&self) -> Result<HealthReading, VitalsError>;
}

/// Vitals from sysfs and `statvfs`.
#[derive(Debug, Clone)]
pub struct SysfsVitals {
    thermal_zone: PathBuf,
    disk_path: PathBuf,
}

impl SysfsVitals {
    /// `disk_path` is the directory whose filesystem is checked for space.
    pub fn new(thermal_zone: impl Into<PathBuf>, disk_path: impl Into<PathBuf>) -> Self {
        Self {
            thermal_zone: thermal_zone.into(),
            disk_path: disk_path.into(),
        }
    }
}

#[async_trait]
impl VitalsSource for SysfsVitals {
    async fn read(&self) -> Result<HealthReading, VitalsError> {
        let zone = self.thermal_zone.clone();
        let disk = self.disk_path.clone();

        let reading = tokio::task::spawn_blocking(move || {
            let temperature_celsius = read_temperature(&zone)
                .map_err(|e| tracing::debug!(path = %zone.display(), error = %e, "Temperature read failed"))
                .ok();
            let free_disk_bytes = free_disk_bytes(&disk)
                .map_err(|e| tracing::debug!(path = %disk.display(), error = %e, "Disk stats read failed"))
                .ok();
            HealthReading {
                temperature_celsius,
                free_disk_bytes,
                timestamp: Utc::now(),
            }
        })
        .await
        .map_err(|e| VitalsError::Task(e.to_string()))?;

        if reading.temperature_celsius.is_none() && reading.free_disk_bytes.is_none() {
            return Err(VitalsError::Unavailable);
        }
        Ok(reading)
    }
}

/// Parse a sysfs thermal zone file (millidegrees Celsius).
fn read_temperature(path: &Path) -> io::Result<f64> {
    let raw = std::fs::read_to_string(path)?;
    let millidegrees: f64 = raw
        .trim()
        .parse()
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    Ok(millidegrees / 1000.0)
}

/// Bytes available to unprivileged users on the filesystem holding `path`.
#[cfg(unix)]
fn free_disk_bytes(path: &Path) -> io::Result<u64> {
    use std::ffi::CString;
    use std::mem::MaybeUninit;
    use std::os::unix::ffi::OsStrExt;

    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    let mut stat = MaybeUninit::<libc::statvfs>::uninit();

    // Safety: `c_path` is a valid NUL-terminated string and `stat` points
    // to writable memory of the right size.
    let ret = unsafe { libc::statvfs(c_path.as_ptr(), stat.as_mut_ptr()) };
    if ret != 0 {
        return Err(io::Error::last_os_error());
    }

    // Safety: statvfs returned 0, so the struct is initialised.
    let stat = unsafe { stat.assume_init() };
    Ok(stat.f_bavail as u64 * stat.f_frsize as u64)
}

#[cfg(not(unix))]
fn free_disk_bytes(_path: &Path) -> io::Result<u64> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "disk statistics require a unix platform",
    ))
}
