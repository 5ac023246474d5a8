use super::{load_config, Overrides};
use crate::output::print_json;
use reaper_core::config::{ReaperConfig, WarnLevel};
use std::path::Path;

// ---------------------------------------------------------------------------
// check-config
// ---------------------------------------------------------------------------

pub fn check(path: Option<&Path>, overrides: Overrides, json: bool) -> anyhow::Result<()> {
    let config = load_config(path, overrides)?;
    let warnings = config.validate();

    if json {
        let value = serde_json::json!({
            "config": config,
            "warnings": warnings,
        });
        print_json(&value)?;
    } else if warnings.is_empty() {
        println!("Config is valid. No warnings.");
    } else {
        for w in &warnings {
            let prefix = match w.level {
                WarnLevel::Warning => "warning",
                WarnLevel::Error => "error",
            };
            println!("[{prefix}] {}", w.message);
        }
    }

    if warnings.iter().any(|w| w.level == WarnLevel::Error) {
        anyhow::bail!("config validation found errors");
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// default-config
// ---------------------------------------------------------------------------

pub fn print_default(json: bool) -> anyhow::Result<()> {
    let config = ReaperConfig::default();
    if json {
        print_json(&config)?;
    } else {
        print!("{}", config.to_yaml()?);
    }
    Ok(())
}
