//! Loads run configurations from JSON files or textual descriptors.

use crate::error::SimError;
use cmh_core::SimulationConfig;
use std::path::Path;
use tracing::debug;

/// Reads a [`SimulationConfig`] from a JSON file and validates it.
pub fn load_config(path: impl AsRef<Path>) -> Result<SimulationConfig, SimError> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)?;
    let config = parse_config(&text)?;
    debug!(
        "Loaded {} participant(s) from {}",
        config.participants.len(),
        path.display()
    );
    Ok(config)
}

/// Parses and validates a JSON run configuration.
pub fn parse_config(text: &str) -> Result<SimulationConfig, SimError> {
    let config: SimulationConfig = serde_json::from_str(text)?;
    // Surface registry errors here rather than at run time
    cmh_core::Registry::from_descriptors(&config.participants)?;
    Ok(config)
}
