use anyhow::Result;
use serde::Deserialize;
use std::fs;
use std::path::Path;

use crate::normalize::NormalizationParams;

#[derive(Debug, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub normalize: NormalizationParams,
    #[serde(default)]
    pub stream: StreamConfig,
}

/// ストリーミング側の設定（ベンチ・上位レイヤー向け）
#[derive(Debug, Deserialize, Clone)]
pub struct StreamConfig {
    /// フレームあたりの想定ランドマーク数
    #[serde(default = "default_landmark_count")]
    pub landmark_count: usize,
    /// キャプチャ側の駆動レート
    #[serde(default = "default_target_fps")]
    pub target_fps: u32,
}

fn default_landmark_count() -> usize {
    468
}

fn default_target_fps() -> u32 {
    30
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            landmark_count: default_landmark_count(),
            target_fps: default_target_fps(),
        }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// 読めなければデフォルト設定で続行する
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        Self::load(path).unwrap_or_default()
    }
}
