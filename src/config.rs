//! CLI-surface configuration (spec §6), deserializable from TOML.
//!
//! `ToolOptions` is the landing spot for a future command-line layer;
//! argument parsing itself is out of scope (spec.md §1 Non-goals).

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::initdisk::InitdiskOptions;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    List,
    Copy,
    Erase,
    Rename,
    Format,
    Build,
    Clear,
    Label,
    WriteProtect,
    NoWriteProtect,
    Send,
    Receive,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOptions {
    pub image_path: PathBuf,
    pub operation: Operation,
    #[serde(default)]
    pub pattern: String,
    #[serde(default)]
    pub ascii_conversion: bool,
    #[serde(default)]
    pub owner_id_filter: Option<u8>,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub initdisk: Option<InitdiskOptions>,
}

impl ToolOptions {
    pub fn from_toml_str(text: &str) -> crate::error::Result<ToolOptions> {
        toml::from_str(text)
            .map_err(|e| crate::error::OasisError::InvalidArgument(format!("invalid config: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_copy_operation() {
        let text = r#"
            image_path = "disk.img"
            operation = "copy"
            pattern = "*.TXT"
            ascii_conversion = true
        "#;
        let options = ToolOptions::from_toml_str(text).unwrap();
        assert_eq!(options.operation, Operation::Copy);
        assert_eq!(options.pattern, "*.TXT");
        assert!(options.ascii_conversion);
        assert!(options.initdisk.is_none());
    }

    #[test]
    fn parses_a_build_operation_with_geometry() {
        let text = r#"
            image_path = "disk.img"
            operation = "build"
            label = "VOL1"

            [initdisk]
            heads = 1
            tracks_per_surface = 77
            sectors_per_track = 26
            sector_increment = 1
            track_skew = 0
            dir_size = 64
        "#;
        let options = ToolOptions::from_toml_str(text).unwrap();
        assert_eq!(options.operation, Operation::Build);
        let geometry = options.initdisk.unwrap();
        assert_eq!(geometry.tracks_per_surface, 77);
        assert_eq!(geometry.sectors_per_track, 26);
    }

    #[test]
    fn rejects_malformed_toml() {
        assert!(ToolOptions::from_toml_str("not valid toml =").is_err());
    }
}
