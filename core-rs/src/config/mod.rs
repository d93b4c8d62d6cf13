/**
 * config
 * Engine settings and policy documents (YAML)
 *
 * Engine settings format:
 * ```yaml
 * maxConditionNodes: 1024
 * avatar: "0x00000000000000000000000000000000000000aa"
 * decoder:
 *   maxDepth: 64
 *   maxArrayLength: 4096
 *   maxDecodedNodes: 65536
 * ```
 *
 * Every key is optional; missing keys take the defaults above.
 */

pub mod policy;

pub use policy::{
    function_selector, FunctionEntry, PolicyFile, PolicyMetadata, RoleEntry, TargetEntry,
};

use crate::decoder::DecoderLimits;
use crate::errors::{Result, RolesError};
use crate::topology::tree::DEFAULT_MAX_CONDITION_NODES;
use alloy_primitives::Address;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Engine-wide settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    pub decoder: DecoderLimits,
    /// Largest condition tree accepted at submit time
    pub max_condition_nodes: usize,
    /// Account `EqualToAvatar` compares against
    pub avatar: Address,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            decoder: DecoderLimits::default(),
            max_condition_nodes: DEFAULT_MAX_CONDITION_NODES,
            avatar: Address::ZERO,
        }
    }
}

impl EngineConfig {
    /// Load engine settings from a YAML file
    ///
    /// # Arguments
    /// * `path` - Path to the settings file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: EngineConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject ceilings that would make every check fail
    pub fn validate(&self) -> Result<()> {
        if self.max_condition_nodes == 0 {
            return Err(RolesError::InvalidPolicy(
                "maxConditionNodes must be at least 1".to_string(),
            ));
        }
        if self.decoder.max_depth == 0 || self.decoder.max_decoded_nodes == 0 {
            return Err(RolesError::InvalidPolicy(
                "decoder.maxDepth and decoder.maxDecodedNodes must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        fs::write(path.as_ref(), yaml)?;
        Ok(())
    }
}
