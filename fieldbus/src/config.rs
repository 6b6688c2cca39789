//! Network manager configuration.

use core::time::Duration;

/// Tunables for one network manager instance.
///
/// All configuration is in-process; there are no environment variables and
/// no persisted state.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// How long an address claim listens for contending claims before the
    /// claimed address is considered settled.
    pub address_claim_contention_window: Duration,
    /// Width of the sliding window the busload estimate covers.
    pub busload_sample_window: Duration,
    /// How often the busload accumulator is pushed into the history ring.
    pub busload_update_interval: Duration,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        NetworkConfig {
            address_claim_contention_window: Duration::from_millis(250),
            busload_sample_window: Duration::from_secs(10),
            busload_update_interval: Duration::from_millis(100),
        }
    }
}

impl NetworkConfig {
    /// Reject zero-width windows or a sample window shorter than the update
    /// interval.
    #[allow(clippy::result_unit_err)]
    pub fn validate(&self) -> Result<(), ()> {
        if self.address_claim_contention_window.is_zero() {
            return Err(());
        }
        if self.busload_update_interval.is_zero()
            || self.busload_sample_window < self.busload_update_interval
        {
            return Err(());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(NetworkConfig::default().validate().is_ok());
    }

    #[test]
    fn sample_window_must_cover_update_interval() {
        let config = NetworkConfig {
            busload_sample_window: Duration::from_millis(50),
            busload_update_interval: Duration::from_millis(100),
            ..NetworkConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
