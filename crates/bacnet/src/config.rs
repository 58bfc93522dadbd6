//! JSON configuration of the whole pipeline.
//!
//! Every field has a default, so `{}` is a valid config and files only need
//! to carry what they change.

use std::{fs, path::Path, path::PathBuf};

use bacnet_network::StoreParams;
use bacnet_segment::{ContourParams, OverlapParams};
use bacnet_tiling::TileParams;
use serde::{Deserialize, Serialize};

use crate::detector::DarknetConfig;

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config {}", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub tiling: TileParams,
    pub overlap: OverlapParams,
    pub contour: ContourParams,
    pub store: StoreParams,
    /// Drop the instrument info bar at the bottom of micrographs.
    pub strip_info_bar: bool,
    /// Where detector crops are written. A temporary directory when unset.
    pub crop_dir: Option<PathBuf>,
    pub darknet: DarknetConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            tiling: TileParams::default(),
            overlap: OverlapParams::default(),
            contour: ContourParams::default(),
            store: StoreParams::default(),
            strip_info_bar: true,
            crop_dir: None,
            darknet: DarknetConfig::default(),
        }
    }
}

impl PipelineConfig {
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::Json {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self).map_err(|source| ConfigError::Json {
            path: path.to_path_buf(),
            source,
        })?;
        fs::write(path, json).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_object_is_the_default_config() {
        let cfg: PipelineConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg, PipelineConfig::default());
        assert_eq!(cfg.tiling.tile_size, 416);
        assert_eq!(cfg.overlap.tolerance, 10);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let cfg: PipelineConfig = serde_json::from_str(
            r#"{"tiling": {"overlap_factor": 2}, "strip_info_bar": false,
                "darknet": {"binary": "/opt/darknet/darknet"}}"#,
        )
        .unwrap();
        assert_eq!(cfg.tiling.tile_size, 416);
        assert_eq!(cfg.tiling.overlap_factor, 2);
        assert!(!cfg.strip_info_bar);
        assert_eq!(cfg.darknet.binary, PathBuf::from("/opt/darknet/darknet"));
        assert_eq!(cfg.darknet.weights, DarknetConfig::default().weights);
    }

    #[test]
    fn file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let cfg = PipelineConfig {
            crop_dir: Some(PathBuf::from(".crops")),
            ..PipelineConfig::default()
        };
        cfg.write_json(&path).unwrap();
        assert_eq!(PipelineConfig::load_json(&path).unwrap(), cfg);
        assert!(matches!(
            PipelineConfig::load_json(dir.path().join("missing.json")),
            Err(ConfigError::Io { .. })
        ));
    }
}
