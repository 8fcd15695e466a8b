use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use crate::core::{Error, Result};
use crate::protocol::{MAX_DATA_LEN, MAX_UNIVERSE};

fn default_channels() -> usize {
    MAX_DATA_LEN
}

/// Kind-specific part of a manifest entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DeviceKind {
    /// One byte, non-zero while pressed
    Button,
    /// Two bytes, big-endian reading
    Analog,
    /// Opaque payload
    Raw,
    Fixture {
        /// Derived from the name when absent
        #[serde(default)]
        universe: Option<u16>,
        #[serde(default = "default_channels")]
        channels: usize,
    },
}

impl DeviceKind {
    pub fn is_sensor(&self) -> bool {
        !matches!(self, DeviceKind::Fixture { .. })
    }
}

/// One device attached to a node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceSpec {
    pub name: String,
    #[serde(flatten)]
    pub kind: DeviceKind,
    /// Muted sensors track sequence numbers but fire no events
    #[serde(default)]
    pub muted: bool,
}

/// Devices by node name, as found in `device_manifest.json`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceManifest {
    pub nodes: BTreeMap<String, Vec<DeviceSpec>>,
}

impl DeviceManifest {
    /// Parses and validates a JSON manifest
    pub fn from_json_str(s: &str) -> Result<Self> {
        let manifest: DeviceManifest = serde_json::from_str(s)?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Loads and validates a JSON manifest file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::manifest(format!("Failed to read {}: {}", path.display(), e)))?;
        Self::from_json_str(&text)
    }

    /// Checks names are unique and fixture parameters are in range
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for (node, spec) in self.devices() {
            if spec.name.is_empty() || !spec.name.is_ascii() || spec.name.contains('\0') {
                return Err(Error::manifest(format!(
                    "Invalid device name {:?} on node '{}'",
                    spec.name, node
                )));
            }
            if !seen.insert(spec.name.as_str()) {
                return Err(Error::manifest(format!("Duplicate device name '{}'", spec.name)));
            }
            if let DeviceKind::Fixture { universe, channels } = &spec.kind {
                if universe.map_or(false, |u| u > MAX_UNIVERSE) {
                    return Err(Error::manifest(format!(
                        "Fixture '{}' universe exceeds {}",
                        spec.name, MAX_UNIVERSE
                    )));
                }
                if *channels == 0 || *channels > MAX_DATA_LEN {
                    return Err(Error::manifest(format!(
                        "Fixture '{}' must have 1 to {} channels",
                        spec.name, MAX_DATA_LEN
                    )));
                }
            }
        }
        Ok(())
    }

    /// All devices with the name of their node
    pub fn devices(&self) -> impl Iterator<Item = (&str, &DeviceSpec)> {
        self.nodes
            .iter()
            .flat_map(|(node, specs)| specs.iter().map(move |spec| (node.as_str(), spec)))
    }
}

/// Stable 15-bit universe for a fixture without an explicit one
///
/// Low 15 bits of the SHA-1 digest of the name, the same value node
/// firmware computes, so both sides agree without configuration.
pub fn derive_universe(name: &str) -> u16 {
    let digest = Sha1::digest(name.as_bytes());
    u16::from_be_bytes([digest[18], digest[19]]) & MAX_UNIVERSE
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANIFEST: &str = r#"{
        "esp-stage": [
            {"name": "button_1", "kind": "button"},
            {"name": "fader_1", "kind": "analog", "muted": true},
            {"name": "par_1", "kind": "fixture", "universe": 7, "channels": 4}
        ],
        "esp-bar": [
            {"name": "rfid", "kind": "raw"},
            {"name": "strip", "kind": "fixture"}
        ]
    }"#;

    #[test]
    fn test_parse_manifest() {
        let manifest = DeviceManifest::from_json_str(MANIFEST).unwrap();
        assert_eq!(manifest.nodes.len(), 2);
        assert_eq!(manifest.devices().count(), 5);

        let stage = &manifest.nodes["esp-stage"];
        assert_eq!(stage[0].kind, DeviceKind::Button);
        assert!(stage[1].muted);
        assert_eq!(
            stage[2].kind,
            DeviceKind::Fixture { universe: Some(7), channels: 4 }
        );

        let strip = &manifest.nodes["esp-bar"][1];
        assert_eq!(strip.kind, DeviceKind::Fixture { universe: None, channels: 512 });
        assert!(!strip.kind.is_sensor());
    }

    #[test]
    fn test_invalid_manifests() {
        let duplicate = r#"{"a": [{"name": "x", "kind": "raw"}], "b": [{"name": "x", "kind": "button"}]}"#;
        assert!(matches!(DeviceManifest::from_json_str(duplicate), Err(Error::Manifest(_))));

        let universe = r#"{"a": [{"name": "x", "kind": "fixture", "universe": 40000}]}"#;
        assert!(matches!(DeviceManifest::from_json_str(universe), Err(Error::Manifest(_))));

        let channels = r#"{"a": [{"name": "x", "kind": "fixture", "channels": 0}]}"#;
        assert!(matches!(DeviceManifest::from_json_str(channels), Err(Error::Manifest(_))));

        let kind = r#"{"a": [{"name": "x", "kind": "laser"}]}"#;
        assert!(matches!(DeviceManifest::from_json_str(kind), Err(Error::Manifest(_))));
    }

    #[test]
    fn test_derive_universe() {
        assert_eq!(derive_universe("strip"), 16877);
        assert_eq!(derive_universe("par_1"), 8581);
        assert_eq!(derive_universe("Button1"), 11469);
    }
}
