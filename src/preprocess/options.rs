//! 前処理の設定値

use serde::{Deserialize, Serialize};

/// 二値化しきい値の既定値（反転後の輝度がこれ未満なら黒にする）
pub const DEFAULT_THRESHOLD: u8 = 120;

/// 画素値の正規化方式
///
/// モデル学習時と同じ方式でなければ、エラーにならないまま推論結果が狂います。
/// そのためモデルアセットのメタデータで宣言します。
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Normalization {
    /// v / 255 で [0, 1] に写す
    UnitRange,
    /// (v - mean) / std
    MeanStd { mean: f32, std: f32 },
}

impl Default for Normalization {
    fn default() -> Self {
        Normalization::UnitRange
    }
}

impl Normalization {
    /// 0〜255 の輝度を正規化
    pub fn apply(&self, value: f32) -> f32 {
        match *self {
            Normalization::UnitRange => value / 255.0,
            Normalization::MeanStd { mean, std } => (value - mean) / std,
        }
    }

    /// 正規化後の値域 (0に対応する値, 255に対応する値)
    pub fn value_range(&self) -> (f32, f32) {
        (self.apply(0.0), self.apply(255.0))
    }

    /// 設定値の妥当性チェック
    pub fn validate(&self) -> anyhow::Result<()> {
        if let Normalization::MeanStd { mean, std } = *self {
            if !mean.is_finite() || !std.is_finite() || std == 0.0 {
                anyhow::bail!("正規化パラメータが不正です: mean={}, std={}", mean, std);
            }
        }
        Ok(())
    }
}

impl std::fmt::Display for Normalization {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Normalization::UnitRange => write!(f, "[0, 1]"),
            Normalization::MeanStd { mean, std } => write!(f, "mean={}, std={}", mean, std),
        }
    }
}

/// コントラスト・明るさ調整（RGB各チャネルに同じ係数を掛ける）
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ColorAdjust {
    /// 0..10、1が等倍
    pub contrast: f32,
    /// -255..255、0が無調整
    pub brightness: f32,
}

impl Default for ColorAdjust {
    fn default() -> Self {
        Self {
            contrast: 1.0,
            brightness: 0.0,
        }
    }
}

impl ColorAdjust {
    /// 無調整かどうか
    pub fn is_identity(&self) -> bool {
        self.contrast == 1.0 && self.brightness == 0.0
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if !(0.0..=10.0).contains(&self.contrast) {
            anyhow::bail!("コントラストは0〜10で指定してください: {}", self.contrast);
        }
        if !(-255.0..=255.0).contains(&self.brightness) {
            anyhow::bail!("明るさは-255〜255で指定してください: {}", self.brightness);
        }
        Ok(())
    }
}

/// 前処理オプション
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PreprocessOptions {
    /// 正規化方式
    pub normalization: Normalization,
    /// 二値化しきい値（Noneなら二値化しない）
    pub binarize_threshold: Option<u8>,
    /// コントラスト調整（Noneなら調整しない）
    pub color_adjust: Option<ColorAdjust>,
}

impl PreprocessOptions {
    pub fn with_normalization(mut self, normalization: Normalization) -> Self {
        self.normalization = normalization;
        self
    }

    pub fn with_binarize(mut self, threshold: u8) -> Self {
        self.binarize_threshold = Some(threshold);
        self
    }

    pub fn with_color_adjust(mut self, adjust: ColorAdjust) -> Self {
        self.color_adjust = if adjust.is_identity() { None } else { Some(adjust) };
        self
    }
}
