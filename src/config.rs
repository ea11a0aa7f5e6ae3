use crate::types::Config;
use anyhow::{bail, Context, Result};
use std::fs;

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let contents =
            fs::read_to_string(path).with_context(|| format!("reading config file {path}"))?;
        let config: Config = serde_yaml::from_str(&contents)
            .with_context(|| format!("parsing config file {path}"))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.stream.url.is_empty() {
            bail!("stream.url must not be empty");
        }
        if !(0.0..=1.0).contains(&self.detector.confidence_threshold) {
            bail!(
                "detector.confidence_threshold must be in [0, 1], got {}",
                self.detector.confidence_threshold
            );
        }
        if self.tracker.max_distance <= 0.0 {
            bail!("tracker.max_distance must be positive");
        }
        if self.events.duration_secs <= 0.0 {
            bail!("events.duration_secs must be positive");
        }
        if self.persistence.queue_capacity == 0 {
            bail!("persistence.queue_capacity must be at least 1");
        }
        Ok(())
    }
}
