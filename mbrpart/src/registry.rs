// SPDX-License-Identifier: MIT

//! Hierarchical configuration store: the engine's view of the registry.
//! Reads serve the firmware map and driver-name lookup; writes record
//! mount points under `SYSTEM\MountedDevices`.

use core::fmt;
use std::collections::BTreeMap;

/// Error type for configuration store operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegError {
    NotFound,
    WrongType,
    Other(&'static str),
}

impl RegError {
    pub fn msg(&self) -> &'static str {
        match self {
            RegError::NotFound => "Key or value not found",
            RegError::WrongType => "Unexpected value type",
            RegError::Other(msg) => msg,
        }
    }
}

impl fmt::Display for RegError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.msg())?;
        Ok(())
    }
}

pub type RegResult<T = ()> = Result<T, RegError>;

/// Root of the firmware disk hierarchy.
pub const FIRMWARE_ADAPTER_ROOT: &str = r"HARDWARE\DESCRIPTION\System\MultifunctionAdapter";

/// Key whose `Configuration Data` carries the Int13 drive parameters.
pub const SYSTEM_CONFIG_KEY: &str = r"HARDWARE\DESCRIPTION\System";

/// Device map root for SCSI port driver names.
pub const SCSI_DEVICEMAP_ROOT: &str = r"HARDWARE\DEVICEMAP\Scsi";

/// Mount-point values live here.
pub const MOUNTED_DEVICES_KEY: &str = r"SYSTEM\MountedDevices";

pub const CONFIGURATION_DATA_VALUE: &str = "Configuration Data";
pub const IDENTIFIER_VALUE: &str = "Identifier";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegValue {
    Str(String),
    Binary(Vec<u8>),
}

pub trait RegStore {
    fn key_exists(&self, path: &str) -> bool;
    fn read_string(&self, path: &str, value: &str) -> RegResult<String>;
    fn read_binary(&self, path: &str, value: &str) -> RegResult<Vec<u8>>;
    fn write_binary(&mut self, path: &str, value: &str, data: &[u8]) -> RegResult<()>;
}

/// In-memory store. Key paths compare case-insensitively, as the real
/// store does.
#[derive(Debug, Default, Clone)]
pub struct MemRegistry {
    keys: BTreeMap<String, BTreeMap<String, RegValue>>,
}

fn norm(path: &str) -> String {
    path.to_ascii_lowercase()
}

impl MemRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_key(&mut self, path: &str) {
        self.keys.entry(norm(path)).or_default();
    }

    pub fn set_string(&mut self, path: &str, value: &str, data: &str) {
        self.keys
            .entry(norm(path))
            .or_default()
            .insert(norm(value), RegValue::Str(data.to_string()));
    }

    pub fn set_binary(&mut self, path: &str, value: &str, data: Vec<u8>) {
        self.keys
            .entry(norm(path))
            .or_default()
            .insert(norm(value), RegValue::Binary(data));
    }

    /// Values of one key, in insertion-independent (sorted) order.
    pub fn values(&self, path: &str) -> Vec<(String, RegValue)> {
        self.keys
            .get(&norm(path))
            .map(|vals| vals.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default()
    }
}

impl RegStore for MemRegistry {
    fn key_exists(&self, path: &str) -> bool {
        self.keys.contains_key(&norm(path))
    }

    fn read_string(&self, path: &str, value: &str) -> RegResult<String> {
        match self.keys.get(&norm(path)).and_then(|v| v.get(&norm(value))) {
            Some(RegValue::Str(s)) => Ok(s.clone()),
            Some(_) => Err(RegError::WrongType),
            None => Err(RegError::NotFound),
        }
    }

    fn read_binary(&self, path: &str, value: &str) -> RegResult<Vec<u8>> {
        match self.keys.get(&norm(path)).and_then(|v| v.get(&norm(value))) {
            Some(RegValue::Binary(b)) => Ok(b.clone()),
            Some(_) => Err(RegError::WrongType),
            None => Err(RegError::NotFound),
        }
    }

    fn write_binary(&mut self, path: &str, value: &str, data: &[u8]) -> RegResult<()> {
        self.set_binary(path, value, data.to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn case_insensitive_lookup() {
        let mut reg = MemRegistry::new();
        reg.set_string(r"SYSTEM\Test", "Driver", "atapi");

        assert!(reg.key_exists(r"system\test"));
        assert_eq!(reg.read_string(r"SyStEm\TeSt", "dRiVeR").unwrap(), "atapi");
    }

    #[test]
    fn type_mismatch() {
        let mut reg = MemRegistry::new();
        reg.set_binary("a", "v", vec![1, 2, 3]);
        assert_eq!(reg.read_string("a", "v"), Err(RegError::WrongType));
        assert_eq!(reg.read_binary("a", "v").unwrap(), vec![1, 2, 3]);
        assert_eq!(reg.read_binary("a", "missing"), Err(RegError::NotFound));
    }

    #[test]
    fn write_binary_creates_key() {
        let mut reg = MemRegistry::new();
        reg.write_binary(MOUNTED_DEVICES_KEY, r"\DosDevices\C:", &[0u8; 12])
            .unwrap();
        assert!(reg.key_exists(MOUNTED_DEVICES_KEY));
        assert_eq!(reg.values(MOUNTED_DEVICES_KEY).len(), 1);
    }
}
