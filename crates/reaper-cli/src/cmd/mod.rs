pub mod config;
pub mod run;

use anyhow::Context;
use reaper_core::classifier::TriggerPolicy;
use reaper_core::config::ReaperConfig;
use std::path::Path;

/// Command-line values that take precedence over the config file.
#[derive(Debug, Default)]
pub struct Overrides {
    pub namespace: Option<String>,
    pub marker_label: Option<String>,
    pub trigger: Option<TriggerPolicy>,
}

impl Overrides {
    fn apply(self, config: &mut ReaperConfig) {
        if let Some(ns) = self.namespace {
            config.namespace = Some(ns);
        }
        if let Some(marker) = self.marker_label {
            config.marker_label = marker;
        }
        if let Some(trigger) = self.trigger {
            config.trigger = trigger;
        }
    }
}

/// Load `path` (or the defaults when absent) and apply `overrides`.
pub fn load_config(path: Option<&Path>, overrides: Overrides) -> anyhow::Result<ReaperConfig> {
    let mut config = match path {
        Some(path) => ReaperConfig::load(path).context("failed to load config")?,
        None => ReaperConfig::default(),
    };
    overrides.apply(&mut config);
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overrides_replace_file_values() {
        let mut config = ReaperConfig {
            namespace: Some("from-file".into()),
            ..ReaperConfig::default()
        };
        Overrides {
            namespace: Some("from-flag".into()),
            marker_label: Some("reap-me".into()),
            trigger: Some(TriggerPolicy::Edge),
        }
        .apply(&mut config);

        assert_eq!(config.namespace.as_deref(), Some("from-flag"));
        assert_eq!(config.marker_label, "reap-me");
        assert_eq!(config.trigger, TriggerPolicy::Edge);
    }

    #[test]
    fn empty_overrides_keep_file_values() {
        let mut config = ReaperConfig {
            namespace: Some("from-file".into()),
            ..ReaperConfig::default()
        };
        Overrides::default().apply(&mut config);
        assert_eq!(config.namespace.as_deref(), Some("from-file"));
        assert_eq!(config.marker_label, "delete-pod");
    }
}
