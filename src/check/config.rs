//! Probe configuration and interface validation

use std::path::Path;
use std::time::Duration;

use super::error::{CheckError, CheckResult};

/// Default deadline for one probe leg
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Probe configuration
///
/// Both interface names are required and must be up when the prober is
/// created; a router whose uplink or tunnel device is missing cannot make
/// meaningful verdicts, so this is fatal at startup.
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    /// Interface carrying direct (possibly censored) traffic
    pub direct_dev: String,
    /// Interface carrying tunneled traffic
    pub vpn_dev: String,
    /// Deadline per probe leg
    pub timeout: Duration,
    /// Repeat a positive verdict once and only confirm on agreement
    pub double_check: bool,
}

impl ProbeConfig {
    /// Create a config for the two interfaces with default timing
    #[must_use]
    pub fn new(direct_dev: impl Into<String>, vpn_dev: impl Into<String>) -> Self {
        Self {
            direct_dev: direct_dev.into(),
            vpn_dev: vpn_dev.into(),
            timeout: DEFAULT_PROBE_TIMEOUT,
            double_check: true,
        }
    }

    /// Override the per-leg deadline
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Enable or disable the confirmation probe
    #[must_use]
    pub fn with_double_check(mut self, double_check: bool) -> Self {
        self.double_check = double_check;
        self
    }

    /// Validate that both interfaces exist and are up
    ///
    /// # Errors
    ///
    /// Returns [`CheckError::Device`] naming the offending interface.
    pub fn validate(&self) -> CheckResult<()> {
        if self.direct_dev.is_empty() {
            return Err(CheckError::device("", "direct device must be set"));
        }
        check_device(&self.direct_dev)?;

        if self.vpn_dev.is_empty() {
            return Err(CheckError::device("", "vpn device must be set"));
        }
        check_device(&self.vpn_dev)?;

        Ok(())
    }
}

/// Verify that a named interface exists and is administratively up
fn check_device(device: &str) -> CheckResult<()> {
    let flags_path = Path::new("/sys/class/net").join(device).join("flags");
    let raw = std::fs::read_to_string(&flags_path)
        .map_err(|_| CheckError::device(device, "interface not found"))?;

    let raw = raw.trim();
    let flags = u32::from_str_radix(raw.trim_start_matches("0x"), 16)
        .map_err(|_| CheckError::device(device, format!("unreadable flags {raw:?}")))?;

    #[allow(clippy::cast_sign_loss)]
    if flags & libc::IFF_UP as u32 == 0 {
        return Err(CheckError::device(device, "interface is not up"));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_devices_rejected() {
        let cfg = ProbeConfig::new("", "tun0");
        assert!(cfg.validate().is_err());

        let cfg = ProbeConfig::new("eth0", "");
        // fails either on the empty vpn device or on a missing eth0,
        // both are validation failures
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn missing_device_rejected() {
        let cfg = ProbeConfig::new("definitely-not-a-device-0", "also-not-one-1");
        let err = cfg.validate().unwrap_err();
        assert!(matches!(err, CheckError::Device { .. }));
    }

    #[test]
    fn loopback_is_up() {
        // lo exists and is up on any Linux host running these tests
        assert!(check_device("lo").is_ok());
    }

    #[test]
    fn defaults() {
        let cfg = ProbeConfig::new("eth0", "tun0");
        assert_eq!(cfg.timeout, Duration::from_secs(2));
        assert!(cfg.double_check);
    }
}
