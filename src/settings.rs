use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{
    activity::ActivityTracking,
    policy::{PolicyConfig, DEFAULT_FORCE_RESET_SECS, DEFAULT_INACTIVITY_SECS},
    swap::DEFAULT_LOCK_TIMEOUT_SECS,
};

pub const DEFAULT_SCHEDULER_INTERVAL_SECS: u64 = 60;
const COORDINATION_DB_NAME: &str = "demo_coordination.sqlite3";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DemoSettings {
    pub demo_mode_enabled: bool,
    pub inactivity_threshold_secs: u64,
    pub force_reset_ceiling_secs: u64,
    pub scheduler_interval_secs: u64,
    pub swap_lock_timeout_secs: u64,
    pub live_db_path: PathBuf,
    pub clean_db_path: PathBuf,
    /// Runtime state (the coordination database). Must sit outside the live
    /// datastore so it survives being wiped.
    pub state_dir: PathBuf,
    pub track_authenticated_sessions: bool,
    pub listen_addr: String,
    /// Bearer token required by `POST /demo/reset`. Manual resets over HTTP
    /// are refused while unset.
    pub operator_token: Option<String>,
}

impl Default for DemoSettings {
    fn default() -> Self {
        Self {
            demo_mode_enabled: false,
            inactivity_threshold_secs: DEFAULT_INACTIVITY_SECS,
            force_reset_ceiling_secs: DEFAULT_FORCE_RESET_SECS,
            scheduler_interval_secs: DEFAULT_SCHEDULER_INTERVAL_SECS,
            swap_lock_timeout_secs: DEFAULT_LOCK_TIMEOUT_SECS,
            live_db_path: PathBuf::from("db_demo.sqlite3"),
            clean_db_path: PathBuf::from("db_demo_clean.sqlite3"),
            state_dir: PathBuf::from("demo_state"),
            track_authenticated_sessions: false,
            listen_addr: "127.0.0.1:8080".into(),
            operator_token: None,
        }
    }
}

impl DemoSettings {
    /// Load from a JSON file (defaults when it does not exist), then apply
    /// environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let settings = match path {
            Some(path) if path.exists() => {
                let contents = fs::read_to_string(path)
                    .with_context(|| format!("Failed to read settings from {}", path.display()))?;
                serde_json::from_str(&contents)
                    .with_context(|| format!("Failed to parse settings in {}", path.display()))?
            }
            _ => Self::default(),
        };
        Ok(settings.with_overrides(|name| std::env::var(name).ok()))
    }

    /// Apply `DEMO_*` overrides from `lookup` (normally the process env).
    pub fn with_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("DEMO_MODE") {
            self.demo_mode_enabled = parse_flag(&value);
        }
        if let Some(secs) = lookup("DEMO_INACTIVITY_SECS").and_then(|v| v.trim().parse().ok()) {
            self.inactivity_threshold_secs = secs;
        }
        if let Some(secs) = lookup("DEMO_FORCE_RESET_SECS").and_then(|v| v.trim().parse().ok()) {
            self.force_reset_ceiling_secs = secs;
        }
        if let Some(secs) =
            lookup("DEMO_SCHEDULER_INTERVAL_SECS").and_then(|v| v.trim().parse().ok())
        {
            self.scheduler_interval_secs = secs;
        }
        if let Some(token) = lookup("DEMO_OPERATOR_TOKEN") {
            let token = token.trim().to_string();
            self.operator_token = (!token.is_empty()).then_some(token);
        }
        self
    }

    /// Hard errors for settings that cannot work at all; soft problems come
    /// back as warnings for the caller to log.
    pub fn validate(&self) -> Result<Vec<String>> {
        if self.scheduler_interval_secs == 0 {
            bail!("scheduler_interval_secs must be greater than zero");
        }
        if self.live_db_path == self.clean_db_path {
            bail!(
                "live_db_path and clean_db_path both point at {}",
                self.live_db_path.display()
            );
        }
        if self.coordination_db_path() == self.live_db_path {
            bail!("coordination database must not be the live datastore");
        }

        let mut warnings = Vec::new();
        if !self.policy().is_valid() {
            warnings.push(format!(
                "force_reset_ceiling_secs ({}) must exceed a non-zero inactivity_threshold_secs ({}); automatic resets are disabled",
                self.force_reset_ceiling_secs, self.inactivity_threshold_secs
            ));
        }
        if self.scheduler_interval_secs > self.inactivity_threshold_secs {
            warnings.push(format!(
                "scheduler_interval_secs ({}) exceeds inactivity_threshold_secs ({}); resets will lag",
                self.scheduler_interval_secs, self.inactivity_threshold_secs
            ));
        }
        Ok(warnings)
    }

    pub fn policy(&self) -> PolicyConfig {
        PolicyConfig::from_secs(self.inactivity_threshold_secs, self.force_reset_ceiling_secs)
    }

    pub fn scheduler_interval(&self) -> Duration {
        Duration::from_secs(self.scheduler_interval_secs)
    }

    pub fn swap_lock_timeout(&self) -> Duration {
        Duration::from_secs(self.swap_lock_timeout_secs)
    }

    pub fn activity_tracking(&self) -> ActivityTracking {
        if self.track_authenticated_sessions {
            ActivityTracking::MutationsAndSessions
        } else {
            ActivityTracking::MutationsOnly
        }
    }

    pub fn coordination_db_path(&self) -> PathBuf {
        self.state_dir.join(COORDINATION_DB_NAME)
    }
}

fn parse_flag(value: &str) -> bool {
    let value = value.trim();
    value == "1" || value.eq_ignore_ascii_case("true")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn defaults_are_disabled_and_valid() {
        let settings = DemoSettings::default();
        assert!(!settings.demo_mode_enabled);
        assert!(settings.policy().is_valid());
        assert!(settings.validate().unwrap().is_empty());
        assert_eq!(
            settings.coordination_db_path(),
            PathBuf::from("demo_state/demo_coordination.sqlite3")
        );
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("demo.json");
        fs::write(
            &path,
            r#"{ "demo_mode_enabled": true, "inactivity_threshold_secs": 300 }"#,
        )
        .unwrap();

        let settings: DemoSettings =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert!(settings.demo_mode_enabled);
        assert_eq!(settings.inactivity_threshold_secs, 300);
        assert_eq!(settings.force_reset_ceiling_secs, DEFAULT_FORCE_RESET_SECS);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("demo.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(DemoSettings::load(Some(&path)).is_err());
    }

    #[test]
    fn env_overrides_apply() {
        let settings = DemoSettings::default().with_overrides(env(&[
            ("DEMO_MODE", "TRUE"),
            ("DEMO_INACTIVITY_SECS", "120"),
            ("DEMO_FORCE_RESET_SECS", " 900 "),
            ("DEMO_SCHEDULER_INTERVAL_SECS", "15"),
            ("DEMO_OPERATOR_TOKEN", "s3cret"),
        ]));
        assert!(settings.demo_mode_enabled);
        assert_eq!(settings.policy(), PolicyConfig::from_secs(120, 900));
        assert_eq!(settings.scheduler_interval(), Duration::from_secs(15));
        assert_eq!(settings.operator_token.as_deref(), Some("s3cret"));
    }

    #[test]
    fn unparsable_env_values_are_ignored() {
        let settings = DemoSettings::default().with_overrides(env(&[
            ("DEMO_MODE", "yes please"),
            ("DEMO_INACTIVITY_SECS", "ten minutes"),
            ("DEMO_OPERATOR_TOKEN", "   "),
        ]));
        assert!(!settings.demo_mode_enabled);
        assert_eq!(settings.inactivity_threshold_secs, DEFAULT_INACTIVITY_SECS);
        assert_eq!(settings.operator_token, None);
    }

    #[test]
    fn inverted_thresholds_warn_instead_of_failing() {
        let settings = DemoSettings {
            inactivity_threshold_secs: 1800,
            force_reset_ceiling_secs: 600,
            ..DemoSettings::default()
        };
        let warnings = settings.validate().unwrap();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("automatic resets are disabled"));
    }

    #[test]
    fn impossible_settings_are_rejected() {
        let zero_interval = DemoSettings {
            scheduler_interval_secs: 0,
            ..DemoSettings::default()
        };
        assert!(zero_interval.validate().is_err());

        let same_paths = DemoSettings {
            clean_db_path: PathBuf::from("db_demo.sqlite3"),
            ..DemoSettings::default()
        };
        assert!(same_paths.validate().is_err());
    }

    #[test]
    fn session_tracking_flag_selects_mode() {
        let settings = DemoSettings {
            track_authenticated_sessions: true,
            ..DemoSettings::default()
        };
        assert_eq!(
            settings.activity_tracking(),
            ActivityTracking::MutationsAndSessions
        );
    }
}
