use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use strata_mem::ByteOrder;

/// Options fixed for the lifetime of an [`crate::Environment`].
///
/// ```toml
/// byte_order = "little"
/// runtime_safety = true
/// address_size = 4
///
/// [memory]
/// base_address = 4096
/// initial_size = 65536
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvOptions {
    /// Byte order of the loaded module.
    #[serde(default)]
    pub byte_order: Endian,

    /// Reject out-of-range integer writes instead of truncating them.
    #[serde(default = "default_runtime_safety")]
    pub runtime_safety: bool,

    /// Width of an address in foreign memory, 4 or 8 bytes.
    #[serde(default = "default_address_size")]
    pub address_size: usize,

    #[serde(default)]
    pub memory: MemoryOptions,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Endian {
    #[default]
    Little,
    Big,
}

impl From<Endian> for ByteOrder {
    fn from(endian: Endian) -> Self {
        match endian {
            Endian::Little => ByteOrder::Little,
            Endian::Big => ByteOrder::Big,
        }
    }
}

/// Settings of the linear memory backing fixed allocations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryOptions {
    #[serde(default = "default_base_address")]
    pub base_address: usize,

    #[serde(default)]
    pub initial_size: usize,

    #[serde(default = "default_max_size")]
    pub max_size: usize,

    /// Place constructed objects inside the linear memory so that they are
    /// addressable without shadow copies.
    #[serde(default)]
    pub resident: bool,
}

impl Default for MemoryOptions {
    fn default() -> Self {
        MemoryOptions {
            base_address: default_base_address(),
            initial_size: 0,
            max_size: default_max_size(),
            resident: false,
        }
    }
}

impl Default for EnvOptions {
    fn default() -> Self {
        EnvOptions {
            byte_order: Endian::Little,
            runtime_safety: default_runtime_safety(),
            address_size: default_address_size(),
            memory: MemoryOptions::default(),
        }
    }
}

pub fn default_runtime_safety() -> bool {
    true
}

pub fn default_address_size() -> usize {
    4
}

pub fn default_base_address() -> usize {
    0x1000
}

pub fn default_max_size() -> usize {
    16 * 1024 * 1024
}

impl EnvOptions {
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let options: EnvOptions = toml::from_str(source)?;
        options.validate()?;
        Ok(options)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        log::debug!("loading environment options from {}", path.display());
        let source = std::fs::read_to_string(path)?;
        Self::from_toml_str(&source)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !matches!(self.address_size, 4 | 8) {
            return Err(ConfigError::Unsupported {
                field: "address_size",
                value: self.address_size.to_string(),
            });
        }
        if self.memory.base_address == 0 {
            return Err(ConfigError::Unsupported {
                field: "memory.base_address",
                value: "0".to_string(),
            });
        }
        Ok(())
    }

    pub fn byte_order(&self) -> ByteOrder {
        self.byte_order.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_document() {
        let options = EnvOptions::from_toml_str("").unwrap();
        assert_eq!(options, EnvOptions::default());
        assert_eq!(options.address_size, 4);
        assert!(options.runtime_safety);
    }

    #[test]
    fn test_partial_document() {
        let options = EnvOptions::from_toml_str(
            r#"
            byte_order = "big"
            address_size = 8

            [memory]
            resident = true
            "#,
        )
        .unwrap();
        assert_eq!(options.byte_order(), ByteOrder::Big);
        assert_eq!(options.address_size, 8);
        assert!(options.memory.resident);
        assert_eq!(options.memory.base_address, 0x1000);
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(matches!(
            EnvOptions::from_toml_str("address_size = 2"),
            Err(ConfigError::Unsupported { field: "address_size", .. })
        ));
        assert!(matches!(EnvOptions::from_toml_str("byte_order = \"middle\""), Err(ConfigError::Parse(_))));
    }
}
