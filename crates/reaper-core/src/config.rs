use crate::classifier::{TriggerPolicy, DEFAULT_MARKER_LABEL};
use crate::error::{ReaperError, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// DispatchConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Upper bound on concurrently running deletes.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Attempts per delete, including the first one.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    /// How long in-flight deletes may run after a stop request.
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
}

fn default_workers() -> usize {
    4
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_backoff_ms() -> u64 {
    200
}

fn default_max_backoff_ms() -> u64 {
    5_000
}

fn default_shutdown_grace_secs() -> u64 {
    10
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
        }
    }
}

impl DispatchConfig {
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    /// Delay before retry number `retry` (0-based): doubles each time,
    /// capped at `max_backoff`.
    pub fn backoff_for(&self, retry: u32) -> Duration {
        let factor = 2u64.saturating_pow(retry);
        let ms = self
            .initial_backoff_ms
            .saturating_mul(factor)
            .min(self.max_backoff_ms);
        Duration::from_millis(ms)
    }
}

// ---------------------------------------------------------------------------
// ReaperConfig (top-level)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReaperConfig {
    #[serde(default = "default_marker_label")]
    pub marker_label: String,
    /// Namespace to watch; `None` watches all namespaces.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// Server-side label selector narrowing the watch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label_selector: Option<String>,
    #[serde(default)]
    pub trigger: TriggerPolicy,
    #[serde(default = "default_sync_timeout_secs")]
    pub sync_timeout_secs: u64,
    #[serde(default = "default_resync_backoff_ms")]
    pub resync_backoff_ms: u64,
    #[serde(default)]
    pub dispatch: DispatchConfig,
}

fn default_marker_label() -> String {
    DEFAULT_MARKER_LABEL.to_string()
}

fn default_sync_timeout_secs() -> u64 {
    60
}

fn default_resync_backoff_ms() -> u64 {
    1_000
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            marker_label: default_marker_label(),
            namespace: None,
            label_selector: None,
            trigger: TriggerPolicy::default(),
            sync_timeout_secs: default_sync_timeout_secs(),
            resync_backoff_ms: default_resync_backoff_ms(),
            dispatch: DispatchConfig::default(),
        }
    }
}

impl ReaperConfig {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(ReaperError::ConfigNotFound(path.display().to_string()));
        }
        let data = std::fs::read_to_string(path)?;
        let cfg: ReaperConfig = serde_yaml::from_str(&data)?;
        tracing::debug!(path = %path.display(), "loaded config");
        Ok(cfg)
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn sync_timeout(&self) -> Duration {
        Duration::from_secs(self.sync_timeout_secs)
    }

    pub fn resync_backoff(&self) -> Duration {
        Duration::from_millis(self.resync_backoff_ms)
    }

    /// Like [`validate`](Self::validate), but fails on the first
    /// error-level finding.
    pub fn ensure_valid(&self) -> Result<()> {
        match self
            .validate()
            .into_iter()
            .find(|w| w.level == WarnLevel::Error)
        {
            Some(w) => Err(ReaperError::InvalidConfig(w.message)),
            None => Ok(()),
        }
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        if let Err(e) = validate_label_key(&self.marker_label) {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: e.to_string(),
            });
        }

        if let Some(ns) = &self.namespace {
            if ns.trim().is_empty() {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Error,
                    message: "namespace is set but empty; omit it to watch all namespaces"
                        .to_string(),
                });
            }
        }

        if self.sync_timeout_secs == 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "sync_timeout_secs must be greater than 0".to_string(),
            });
        }

        if self.dispatch.workers == 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "dispatch.workers must be at least 1".to_string(),
            });
        }

        if self.dispatch.max_attempts == 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "dispatch.max_attempts must be at least 1".to_string(),
            });
        }

        if self.dispatch.initial_backoff_ms > self.dispatch.max_backoff_ms {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: format!(
                    "dispatch.initial_backoff_ms ({}) exceeds dispatch.max_backoff_ms ({}); \
                     every retry will wait max_backoff_ms",
                    self.dispatch.initial_backoff_ms, self.dispatch.max_backoff_ms
                ),
            });
        }

        if self.dispatch.max_attempts > 20 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: format!(
                    "dispatch.max_attempts={} (>20 is unusual)",
                    self.dispatch.max_attempts
                ),
            });
        }

        if let Some(selector) = &self.label_selector {
            if selector.contains(&format!("!{}", self.marker_label)) {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Warning,
                    message: format!(
                        "label_selector excludes the marker label '{}'; \
                         marked pods will never be observed",
                        self.marker_label
                    ),
                });
            }
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// Label key validation
// ---------------------------------------------------------------------------

static LABEL_NAME_RE: OnceLock<Regex> = OnceLock::new();
static LABEL_PREFIX_RE: OnceLock<Regex> = OnceLock::new();

fn label_name_re() -> &'static Regex {
    LABEL_NAME_RE
        .get_or_init(|| Regex::new(r"^[A-Za-z0-9]([-A-Za-z0-9_.]*[A-Za-z0-9])?$").unwrap())
}

fn label_prefix_re() -> &'static Regex {
    LABEL_PREFIX_RE.get_or_init(|| {
        Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?(\.[a-z0-9]([-a-z0-9]*[a-z0-9])?)*$").unwrap()
    })
}

/// Check a label key against the `[prefix/]name` syntax.
pub fn validate_label_key(key: &str) -> Result<()> {
    let (prefix, name) = match key.split_once('/') {
        Some((prefix, name)) => (Some(prefix), name),
        None => (None, key),
    };

    let name_ok = !name.is_empty() && name.len() <= 63 && label_name_re().is_match(name);
    let prefix_ok = prefix
        .map(|p| !p.is_empty() && p.len() <= 253 && label_prefix_re().is_match(p))
        .unwrap_or(true);

    if name_ok && prefix_ok {
        Ok(())
    } else {
        Err(ReaperError::InvalidLabelKey(key.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn defaults_watch_all_namespaces_for_delete_pod() {
        let cfg = ReaperConfig::default();
        assert_eq!(cfg.marker_label, "delete-pod");
        assert_eq!(cfg.trigger, TriggerPolicy::Level);
        assert!(cfg.namespace.is_none());
        assert_eq!(cfg.sync_timeout(), Duration::from_secs(60));
        assert!(cfg.validate().is_empty());
    }

    #[test]
    fn empty_file_yields_defaults() {
        let cfg: ReaperConfig = serde_yaml::from_str("{}").unwrap();
        assert_eq!(cfg, ReaperConfig::default());
    }

    #[test]
    fn load_reads_partial_yaml() {
        let mut f = NamedTempFile::new().unwrap();
        writeln!(
            f,
            "marker_label: example.com/reap\nnamespace: batch\ntrigger: edge\ndispatch:\n  workers: 2"
        )
        .unwrap();

        let cfg = ReaperConfig::load(f.path()).unwrap();
        assert_eq!(cfg.marker_label, "example.com/reap");
        assert_eq!(cfg.namespace.as_deref(), Some("batch"));
        assert_eq!(cfg.trigger, TriggerPolicy::Edge);
        assert_eq!(cfg.dispatch.workers, 2);
        assert_eq!(cfg.dispatch.max_attempts, 5);
    }

    #[test]
    fn load_missing_file_is_config_not_found() {
        let err = ReaperConfig::load(Path::new("/nonexistent/reaper.yaml")).unwrap_err();
        assert!(matches!(err, ReaperError::ConfigNotFound(_)));
    }

    #[test]
    fn load_rejects_unknown_trigger() {
        let mut f = NamedTempFile::new().unwrap();
        writeln!(f, "trigger: sometimes").unwrap();
        assert!(matches!(
            ReaperConfig::load(f.path()).unwrap_err(),
            ReaperError::Yaml(_)
        ));
    }

    #[test]
    fn yaml_roundtrip_preserves_values() {
        let cfg = ReaperConfig {
            namespace: Some("jobs".into()),
            trigger: TriggerPolicy::Edge,
            ..Default::default()
        };
        let back: ReaperConfig = serde_yaml::from_str(&cfg.to_yaml().unwrap()).unwrap();
        assert_eq!(back, cfg);
    }

    #[test]
    fn zero_workers_is_an_error() {
        let mut cfg = ReaperConfig::default();
        cfg.dispatch.workers = 0;
        let warnings = cfg.validate();
        assert!(warnings
            .iter()
            .any(|w| w.level == WarnLevel::Error && w.message.contains("workers")));
        assert!(matches!(
            cfg.ensure_valid(),
            Err(ReaperError::InvalidConfig(_))
        ));
    }

    #[test]
    fn inverted_backoff_is_a_warning_only() {
        let mut cfg = ReaperConfig::default();
        cfg.dispatch.initial_backoff_ms = 10_000;
        let warnings = cfg.validate();
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].level, WarnLevel::Warning);
        assert!(cfg.ensure_valid().is_ok());
    }

    #[test]
    fn selector_excluding_marker_is_flagged() {
        let cfg = ReaperConfig {
            label_selector: Some("!delete-pod".into()),
            ..Default::default()
        };
        assert!(cfg
            .validate()
            .iter()
            .any(|w| w.message.contains("never be observed")));
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let d = DispatchConfig {
            initial_backoff_ms: 100,
            max_backoff_ms: 350,
            ..Default::default()
        };
        assert_eq!(d.backoff_for(0), Duration::from_millis(100));
        assert_eq!(d.backoff_for(1), Duration::from_millis(200));
        assert_eq!(d.backoff_for(2), Duration::from_millis(350));
        assert_eq!(d.backoff_for(40), Duration::from_millis(350));
    }

    #[test]
    fn label_keys() {
        assert!(validate_label_key("delete-pod").is_ok());
        assert!(validate_label_key("example.com/delete-pod").is_ok());
        assert!(validate_label_key("a").is_ok());
        assert!(validate_label_key("").is_err());
        assert!(validate_label_key("-bad").is_err());
        assert!(validate_label_key("Bad.Prefix/name").is_err());
        assert!(validate_label_key("/name").is_err());
        assert!(validate_label_key(&"x".repeat(64)).is_err());
    }
}
