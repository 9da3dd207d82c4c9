//! アプリケーション設定管理モジュール
//!
//! 計算デバイス、モデル、前処理、テスト画像の設定をJSON形式で保存・読み込みします。

use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::preprocess::{ColorAdjust, PreprocessOptions, DEFAULT_THRESHOLD};

/// 計算デバイスの種類
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum DeviceType {
    /// NdArray (CPU) バックエンド
    #[default]
    Cpu,
    /// WGPU (GPU) バックエンド
    Wgpu,
}

impl std::fmt::Display for DeviceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceType::Wgpu => write!(f, "WGPU (GPU)"),
            DeviceType::Cpu => write!(f, "CPU (NdArray)"),
        }
    }
}

/// モデル設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSettings {
    /// 使用するモデルアセット（tar.gz）のパス
    pub model_path: String,
    /// 推論ワーカースレッド数（1以上）
    pub num_threads: usize,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            model_path: "models/digits.tar.gz".to_string(),
            num_threads: 1,
        }
    }
}

/// 前処理設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreprocessSettings {
    /// 反転＋しきい値による二値化を行うか
    pub binarize: bool,
    /// 二値化しきい値（反転後の輝度がこれ未満なら黒）
    pub threshold: u8,
    /// コントラスト 0..10（1が等倍）
    pub contrast: f32,
    /// 明るさ -255..255（0が無調整）
    pub brightness: f32,
    /// センサーの向き（度、90の倍数）
    pub orientation: i32,
}

impl Default for PreprocessSettings {
    fn default() -> Self {
        Self {
            binarize: false,
            threshold: DEFAULT_THRESHOLD,
            contrast: 1.0,
            brightness: 0.0,
            orientation: 0,
        }
    }
}

impl PreprocessSettings {
    /// 前処理オプションに変換（正規化方式はモデル側で決まるのでここでは扱わない）
    pub fn to_options(&self) -> PreprocessOptions {
        let mut options = PreprocessOptions::default().with_color_adjust(ColorAdjust {
            contrast: self.contrast,
            brightness: self.brightness,
        });
        if self.binarize {
            options = options.with_binarize(self.threshold);
        }
        options
    }
}

/// アプリケーション設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// 計算デバイスの種類
    pub device_type: DeviceType,
    /// モデル設定
    pub model: ModelSettings,
    /// 前処理設定
    #[serde(default)]
    pub preprocess: PreprocessSettings,
    /// 同梱テスト画像
    #[serde(default = "default_samples")]
    pub samples: Vec<String>,
    /// 最後に分類した画像のパス
    pub last_image_path: Option<String>,
}

fn default_samples() -> Vec<String> {
    ["Digit1b.png", "Digit7b.png", "Digit8b.png"]
        .iter()
        .map(|name| format!("assets/{}", name))
        .collect()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            device_type: DeviceType::default(),
            model: ModelSettings::default(),
            preprocess: PreprocessSettings::default(),
            samples: default_samples(),
            last_image_path: None,
        }
    }
}

impl AppConfig {
    /// 設定ファイルのデフォルトパス
    pub fn default_path() -> PathBuf {
        PathBuf::from("config.json")
    }

    /// 設定を読み込む
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: AppConfig = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// 指定パスから設定を読み込む、存在しない・壊れている場合はデフォルト設定を返す
    pub fn load_or_default_from<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        if !path.exists() {
            info!("設定ファイルが存在しません。デフォルト設定を使用します");
            return Self::default();
        }

        match Self::load(path) {
            Ok(config) => {
                info!("設定ファイルを読み込みました: {}", path.display());
                config
            }
            Err(e) => {
                warn!(
                    "設定ファイルの読み込みに失敗しました ({}): {}。デフォルト設定を使用します",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// デフォルトパスから設定を読み込む
    pub fn load_or_default() -> Self {
        Self::load_or_default_from(Self::default_path())
    }

    /// 設定を保存する
    pub fn save<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// 値の妥当性チェック
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.model.num_threads == 0 {
            anyhow::bail!("num_threads は1以上を指定してください");
        }
        if self.preprocess.orientation % 90 != 0 {
            anyhow::bail!("orientation は90の倍数で指定してください: {}", self.preprocess.orientation);
        }
        ColorAdjust {
            contrast: self.preprocess.contrast,
            brightness: self.preprocess.brightness,
        }
        .validate()
    }

    /// 最後に分類した画像のパスを更新
    pub fn update_last_image_path<P: AsRef<Path>>(&mut self, path: P) {
        self.last_image_path = Some(path.as_ref().to_string_lossy().to_string());
    }

    /// 設定情報を表示
    pub fn display(&self) {
        println!("=== アプリケーション設定 ===");
        println!("計算デバイス: {}", self.device_type);
        println!("モデルパス: {}", self.model.model_path);
        println!("推論スレッド数: {}", self.model.num_threads);
        println!("\n--- 前処理設定 ---");
        println!("二値化: {} (しきい値 {})", self.preprocess.binarize, self.preprocess.threshold);
        println!("コントラスト: {}", self.preprocess.contrast);
        println!("明るさ: {}", self.preprocess.brightness);
        println!("向き: {}度", self.preprocess.orientation);
        println!("\n--- テスト画像 ---");
        for sample in &self.samples {
            println!("  {}", sample);
        }

        if let Some(ref image) = self.last_image_path {
            println!("\n最後に分類した画像: {}", image);
        }
        println!("========================\n");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.device_type, DeviceType::Cpu);
        assert_eq!(config.model.num_threads, 1);
        assert_eq!(config.preprocess.threshold, 120);
        assert_eq!(config.samples.len(), 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_serialize_deserialize() {
        let config = AppConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let deserialized: AppConfig = serde_json::from_str(&json).unwrap();

        assert_eq!(config.device_type, deserialized.device_type);
        assert_eq!(config.model.model_path, deserialized.model.model_path);
        assert_eq!(config.samples, deserialized.samples);
    }

    #[test]
    fn test_missing_sections_use_defaults() {
        let json = r#"{
            "device_type": "Wgpu",
            "model": { "model_path": "m.tar.gz", "num_threads": 4 },
            "last_image_path": null
        }"#;
        let config: AppConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.device_type, DeviceType::Wgpu);
        assert_eq!(config.model.num_threads, 4);
        assert!(!config.preprocess.binarize);
        assert_eq!(config.samples, default_samples());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let mut config = AppConfig::default();
        config.preprocess.binarize = true;
        config.update_last_image_path("photos/seven.jpg");
        config.save(&path).unwrap();

        let loaded = AppConfig::load(&path).unwrap();
        assert!(loaded.preprocess.binarize);
        assert_eq!(loaded.last_image_path.as_deref(), Some("photos/seven.jpg"));
    }

    #[test]
    fn test_broken_file_falls_back_to_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ not json").unwrap();
        let config = AppConfig::load_or_default_from(&path);
        assert_eq!(config.model.model_path, ModelSettings::default().model_path);
    }

    #[test]
    fn test_validate() {
        let mut config = AppConfig::default();
        config.model.num_threads = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.preprocess.orientation = 45;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_to_options() {
        let mut settings = PreprocessSettings::default();
        assert_eq!(settings.to_options(), PreprocessOptions::default());

        settings.binarize = true;
        settings.contrast = 2.0;
        let options = settings.to_options();
        assert_eq!(options.binarize_threshold, Some(120));
        assert_eq!(options.color_adjust.unwrap().contrast, 2.0);
    }

    #[test]
    fn test_device_type_display() {
        assert_eq!(format!("{}", DeviceType::Wgpu), "WGPU (GPU)");
        assert_eq!(format!("{}", DeviceType::Cpu), "CPU (NdArray)");
    }
}
