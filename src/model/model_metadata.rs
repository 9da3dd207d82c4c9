//! モデルメタデータの定義
//!
//! tar.gz形式のモデルアセットに同梱され、推論時の入力形状・ラベル・正規化方式を宣言します。
//!
//! ## 前提
//! - ラベル順はモデル出力の並びと一致していること
//! - 正規化方式は学習時と同じであること（異なっていてもエラーにはならず、結果だけが狂う）

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::classifier::ScoreTransform;
use crate::preprocess::Normalization;
use crate::types::{TensorShape, DIGIT_LABELS};

/// 同梱モデルのアーキテクチャ名
pub const DIGIT_NET_ARCHITECTURE: &str = "digit_net";

fn default_architecture() -> String {
    DIGIT_NET_ARCHITECTURE.to_string()
}

/// モデルメタデータ
///
/// tar.gz形式で保存される情報：
/// - metadata.json: このメタデータ（JSON形式）
/// - model.bin: モデルの重み（バイナリ）
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelMetadata {
    /// クラスラベル（モデル出力と同じ順序）
    /// 例: ["0", "1", ..., "9"]
    pub labels: Vec<String>,

    /// モデル入力の幅（ピクセル）
    pub input_width: u32,

    /// モデル入力の高さ（ピクセル）
    pub input_height: u32,

    /// モデル入力のチャネル数（1 または 3）
    pub input_channels: u32,

    /// 学習時の正規化方式
    #[serde(default)]
    pub normalization: Normalization,

    /// 出力スコアの後処理
    #[serde(default)]
    pub score_transform: ScoreTransform,

    /// 重みのアーキテクチャ
    #[serde(default = "default_architecture")]
    pub architecture: String,

    /// アセット作成時刻（ISO8601形式）
    pub packed_at: String,
}

impl ModelMetadata {
    /// 新しいメタデータを作成
    pub fn new(
        labels: Vec<String>,
        input_width: u32,
        input_height: u32,
        input_channels: u32,
        normalization: Normalization,
        score_transform: ScoreTransform,
    ) -> Self {
        let packed_at = chrono::Local::now().to_rfc3339();

        Self {
            labels,
            input_width,
            input_height,
            input_channels,
            normalization,
            score_transform,
            architecture: default_architecture(),
            packed_at,
        }
    }

    /// 数字0〜9用の正方形モデル
    pub fn digits(size: u32, channels: u32) -> Self {
        Self::new(
            DIGIT_LABELS.iter().map(|s| s.to_string()).collect(),
            size,
            size,
            channels,
            Normalization::UnitRange,
            ScoreTransform::Identity,
        )
    }

    /// 入力形状
    pub fn input_shape(&self) -> TensorShape {
        TensorShape::new(self.input_height, self.input_width, self.input_channels)
    }

    /// 内容の整合性チェック
    pub fn validate(&self) -> Result<()> {
        if self.labels.is_empty() {
            anyhow::bail!("labels is empty");
        }
        if self.input_width == 0 || self.input_height == 0 {
            anyhow::bail!(
                "invalid input size: {}x{}",
                self.input_width,
                self.input_height
            );
        }
        if self.input_channels != 1 && self.input_channels != 3 {
            anyhow::bail!("unsupported channel count: {}", self.input_channels);
        }
        self.normalization.validate()?;
        Ok(())
    }

    /// メタデータをJSON文字列に変換
    pub fn to_json_string(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize metadata to JSON")
    }

    /// JSON文字列からメタデータを生成
    pub fn from_json_string(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Failed to deserialize metadata from JSON")
    }
}
