//! Environment-driven service configuration
//!
//! Every service reads the log location, topic, service id and instance id
//! from the environment. The instance id feeds the identifier generator
//! and must fit its 10-bit field; an out-of-range value is a startup
//! error, not something to clamp silently.

use std::path::PathBuf;

use thiserror::Error;

/// Largest instance id representable in the identifier layout.
const MAX_INSTANCE_ID: i64 = 1023;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{var}: {value:?} is not a valid integer")]
    InvalidInteger { var: &'static str, value: String },

    #[error("SBL_INSTANCE_ID must be between 0 and {MAX_INSTANCE_ID}, got {0}")]
    InstanceIdOutOfRange(i64),
}

/// Runtime configuration shared by every service role.
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    /// Directory holding the journal file.
    pub log_dir: PathBuf,
    /// Topic name; becomes the journal file name.
    pub topic: String,
    /// Service role identifier carried on `ServiceStart`.
    pub service_id: String,
    /// Instance id for the identifier generator (0..=1023).
    pub instance_id: i64,
}

impl LedgerConfig {
    /// Load from `SBL_LOG_DIR`, `SBL_LOG_TOPIC`, `SBL_SERVICE_ID` and
    /// `SBL_INSTANCE_ID`, with local-development defaults for everything
    /// but the instance id range.
    pub fn from_env() -> Result<Self, ConfigError> {
        let log_dir = PathBuf::from(env_or("SBL_LOG_DIR", "./data"));
        let topic = env_or("SBL_LOG_TOPIC", "sbl-ledger");
        let service_id = env_or("SBL_SERVICE_ID", "oms");

        let raw = env_or("SBL_INSTANCE_ID", "0");
        let instance_id = raw.parse::<i64>().map_err(|_| ConfigError::InvalidInteger {
            var: "SBL_INSTANCE_ID",
            value: raw,
        })?;
        if !(0..=MAX_INSTANCE_ID).contains(&instance_id) {
            return Err(ConfigError::InstanceIdOutOfRange(instance_id));
        }

        Ok(Self {
            log_dir,
            topic,
            service_id,
            instance_id,
        })
    }

    /// Path of the journal file backing the event log.
    pub fn journal_path(&self) -> PathBuf {
        self.log_dir.join(format!("{}.log", self.topic))
    }
}

fn env_or(var: &str, default: &str) -> String {
    match std::env::var(var) {
        Ok(value) if !value.is_empty() => value,
        _ => default.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Env vars are process-global; serialize the tests that touch them.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn clear_env() {
        for var in [
            "SBL_LOG_DIR",
            "SBL_LOG_TOPIC",
            "SBL_SERVICE_ID",
            "SBL_INSTANCE_ID",
        ] {
            std::env::remove_var(var);
        }
    }

    #[test]
    fn test_defaults() {
        let _lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        clear_env();

        let cfg = LedgerConfig::from_env().unwrap();
        assert_eq!(cfg.topic, "sbl-ledger");
        assert_eq!(cfg.service_id, "oms");
        assert_eq!(cfg.instance_id, 0);
        assert_eq!(cfg.journal_path(), PathBuf::from("./data/sbl-ledger.log"));
    }

    #[test]
    fn test_env_overrides() {
        let _lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        clear_env();
        std::env::set_var("SBL_LOG_DIR", "/var/lib/sbl");
        std::env::set_var("SBL_LOG_TOPIC", "sbl-uat");
        std::env::set_var("SBL_SERVICE_ID", "clearing");
        std::env::set_var("SBL_INSTANCE_ID", "12");

        let cfg = LedgerConfig::from_env().unwrap();
        assert_eq!(cfg.log_dir, PathBuf::from("/var/lib/sbl"));
        assert_eq!(cfg.service_id, "clearing");
        assert_eq!(cfg.instance_id, 12);
        assert_eq!(cfg.journal_path(), PathBuf::from("/var/lib/sbl/sbl-uat.log"));

        clear_env();
    }

    #[test]
    fn test_instance_id_out_of_range() {
        let _lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        clear_env();
        std::env::set_var("SBL_INSTANCE_ID", "1024");

        assert!(matches!(
            LedgerConfig::from_env(),
            Err(ConfigError::InstanceIdOutOfRange(1024))
        ));
        clear_env();
    }

    #[test]
    fn test_instance_id_not_an_integer() {
        let _lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        clear_env();
        std::env::set_var("SBL_INSTANCE_ID", "abc");

        assert!(matches!(
            LedgerConfig::from_env(),
            Err(ConfigError::InvalidInteger { .. })
        ));
        clear_env();
    }
}
