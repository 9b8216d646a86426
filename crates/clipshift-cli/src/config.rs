// crates/clipshift-cli/src/config.rs
//
// Loads PipelineConfig from an optional TOML file, then applies the
// CLIPSHIFT_FFMPEG / CLIPSHIFT_FFPROBE overrides.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

use clipshift_core::PipelineConfig;

pub fn load(path: Option<&Path>) -> Result<PipelineConfig> {
    let base = match path {
        Some(p) => {
            let text = fs::read_to_string(p)
                .with_context(|| format!("reading config {}", p.display()))?;
            let config = parse(&text).with_context(|| format!("parsing config {}", p.display()))?;
            log::debug!("[config] loaded {}", p.display());
            config
        }
        None => PipelineConfig::default(),
    };
    Ok(base.with_env_overrides())
}

fn parse(text: &str) -> Result<PipelineConfig> {
    Ok(toml::from_str(text)?)
}
