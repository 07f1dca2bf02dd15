// SPDX-License-Identifier: MIT

//! Partition plan files: a TOML sequence of editing operations applied
//! to the scanned disk set.

use serde::{Deserialize, Deserializer};
use std::fs;
use std::path::Path;

#[derive(Debug, Deserialize)]
pub struct Plan {
    #[serde(rename = "op", default)]
    pub ops: Vec<PlanOp>,
}

#[derive(Debug, Deserialize, PartialEq, Clone)]
#[serde(tag = "action", rename_all = "kebab-case")]
pub enum PlanOp {
    /// Create a partition in the first free region of a disk.
    Create {
        disk: u32,
        #[serde(default)]
        size: Option<Size>,
        #[serde(default)]
        logical: bool,
    },
    /// Create the extended container in the first free primary region.
    CreateExtended {
        disk: u32,
        #[serde(default)]
        size: Option<Size>,
    },
    /// Delete a partition by its partition number.
    Delete { disk: u32, partition: u32 },
    /// Make a partition the active (bootable) one.
    SetActive { disk: u32, partition: u32 },
}

impl Plan {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)?;
        let plan: Plan = toml::from_str(&content)?;
        plan.validate()?;
        Ok(plan)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.ops.is_empty() {
            anyhow::bail!("Plan contains no operations");
        }
        for (i, op) in self.ops.iter().enumerate() {
            match op {
                PlanOp::Delete { partition, .. } | PlanOp::SetActive { partition, .. } => {
                    if *partition == 0 {
                        anyhow::bail!(
                            "Op #{i}: partition number 0 addresses the whole disk; use 1 and up"
                        );
                    }
                }
                PlanOp::Create { .. } | PlanOp::CreateExtended { .. } => {}
            }
        }
        Ok(())
    }
}

/// Requested partition size: everything the region holds, or a byte count
/// given as `512M`, `4G`, `128K`.
#[derive(Debug, PartialEq, Clone, Copy)]
pub enum Size {
    All,
    Bytes(u64),
}

impl Size {
    /// The byte count the editor expects; zero means the whole region.
    pub fn request_bytes(self) -> u64 {
        match self {
            Size::All => 0,
            Size::Bytes(bytes) => bytes,
        }
    }
}

impl<'de> Deserialize<'de> for Size {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct SizeVisitor;

        impl<'de> serde::de::Visitor<'de> for SizeVisitor {
            type Value = Size;

            fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                f.write_str("a size string like '512M', '4G', '128K' or 'all'")
            }

            fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                parse_size_bytes(value).map(Size::Bytes).or_else(|_| {
                    if value.trim().eq_ignore_ascii_case("all") {
                        Ok(Size::All)
                    } else {
                        Err(E::custom(format!(
                            "Invalid size format '{value}'. Use K, M or G suffix, or 'all'."
                        )))
                    }
                })
            }
        }

        deserializer.deserialize_str(SizeVisitor)
    }
}

impl std::fmt::Display for Size {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Size::All => write!(f, "all"),
            Size::Bytes(bytes) => write!(f, "{bytes} B"),
        }
    }
}

fn parse_size_bytes(size: &str) -> anyhow::Result<u64> {
    let lower = size.trim().to_lowercase();

    if let Some(num) = lower.strip_suffix('k') {
        Ok(num.trim().parse::<u64>()? * 1024)
    } else if let Some(num) = lower.strip_suffix('m') {
        Ok(num.trim().parse::<u64>()? * 1024 * 1024)
    } else if let Some(num) = lower.strip_suffix('g') {
        Ok(num.trim().parse::<u64>()? * 1024 * 1024 * 1024)
    } else {
        anyhow::bail!("Unknown size format '{}'", size);
    }
}
