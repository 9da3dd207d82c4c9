use base64::{engine::general_purpose, Engine as _};
use image::{GrayImage, Luma};
use serde::{Deserialize, Serialize};

use crate::error::ClassifierError;

/// 標準のラベル（数字0〜9）
pub const DIGIT_LABELS: [&str; 10] = ["0", "1", "2", "3", "4", "5", "6", "7", "8", "9"];

/// テンソルの形状 (高さ, 幅, チャネル数)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TensorShape {
    pub height: u32,
    pub width: u32,
    pub channels: u32, // 1: グレースケール, 3: グレーをRGBに複製
}

impl TensorShape {
    pub fn new(height: u32, width: u32, channels: u32) -> Self {
        Self { height, width, channels }
    }

    /// 要素数
    pub fn len(&self) -> usize {
        self.height as usize * self.width as usize * self.channels as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Display for TensorShape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}x{}", self.height, self.width, self.channels)
    }
}

/// センサーの向き（90度単位）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Orientation {
    #[default]
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}

impl Orientation {
    /// 角度から変換する
    ///
    /// 90の倍数のみ受け付け、0〜359の範囲に正規化します（-90 → 270, 360 → 0）。
    pub fn from_degrees(degrees: i32) -> Result<Self, ClassifierError> {
        if degrees % 90 != 0 {
            return Err(ClassifierError::InvalidArgument(format!(
                "向きは90の倍数で指定してください: {}",
                degrees
            )));
        }
        Ok(match degrees.rem_euclid(360) {
            0 => Orientation::Deg0,
            90 => Orientation::Deg90,
            180 => Orientation::Deg180,
            _ => Orientation::Deg270,
        })
    }

    /// 反時計回りの1/4回転数
    pub fn quarter_turns(self) -> u32 {
        match self {
            Orientation::Deg0 => 0,
            Orientation::Deg90 => 1,
            Orientation::Deg180 => 2,
            Orientation::Deg270 => 3,
        }
    }

    pub fn degrees(self) -> i32 {
        self.quarter_turns() as i32 * 90
    }
}

/// モデルに入力する前処理済みテンソル
///
/// 値はHWC順（行優先、チャネルが最内側）で格納されます。
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedTensor {
    shape: TensorShape,
    data: Vec<f32>,
}

impl PreparedTensor {
    /// 形状とデータから作成
    pub fn new(shape: TensorShape, data: Vec<f32>) -> Result<Self, ClassifierError> {
        if data.len() != shape.len() {
            return Err(ClassifierError::InvalidArgument(format!(
                "テンソルの要素数が形状と一致しません: {} (期待: {} = {})",
                data.len(),
                shape.len(),
                shape
            )));
        }
        Ok(Self { shape, data })
    }

    pub fn shape(&self) -> TensorShape {
        self.shape
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    /// (y, x, c) の値を取得
    pub fn get(&self, y: u32, x: u32, c: u32) -> Option<f32> {
        if y >= self.shape.height || x >= self.shape.width || c >= self.shape.channels {
            return None;
        }
        let idx = ((y * self.shape.width + x) * self.shape.channels + c) as usize;
        self.data.get(idx).copied()
    }

    /// CHW順に並べ替えたデータ（畳み込みモデル向け）
    pub fn to_chw(&self) -> Vec<f32> {
        let TensorShape { height, width, channels } = self.shape;
        let mut out = Vec::with_capacity(self.data.len());
        for c in 0..channels {
            for y in 0..height {
                for x in 0..width {
                    let idx = ((y * width + x) * channels + c) as usize;
                    out.push(self.data[idx]);
                }
            }
        }
        out
    }

    /// 表示用のグレースケール画像に戻す
    ///
    /// 値の範囲 `[low, high]` を 0〜255 に線形に写し、範囲外はクリップします。
    /// チャネルが複数ある場合は先頭チャネルを使います。
    pub fn to_gray_image(&self, low: f32, high: f32) -> GrayImage {
        let span = if (high - low).abs() > f32::EPSILON { high - low } else { 1.0 };
        let mut img = GrayImage::new(self.shape.width, self.shape.height);
        for y in 0..self.shape.height {
            for x in 0..self.shape.width {
                let v = self.get(y, x, 0).unwrap_or(low);
                let c = ((v - low) / span * 255.0).round().clamp(0.0, 255.0) as u8;
                img.put_pixel(x, y, Luma([c]));
            }
        }
        img
    }
}

/// 分類結果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Prediction {
    pub label: String,
    pub score: f32,

    /// モデルに入力したテンソル（診断表示用、任意）
    #[serde(skip)]
    pub tensor: Option<PreparedTensor>,

    /// テンソルの値域（表示用の逆変換に使う）
    #[serde(skip)]
    pub value_range: (f32, f32),
}

impl Prediction {
    pub fn new(label: impl Into<String>, score: f32) -> Self {
        Self {
            label: label.into(),
            score,
            tensor: None,
            value_range: (0.0, 1.0),
        }
    }

    /// 診断用のテンソルを添付
    pub fn with_tensor(mut self, tensor: PreparedTensor, value_range: (f32, f32)) -> Self {
        self.tensor = Some(tensor);
        self.value_range = value_range;
        self
    }

    /// モデル入力をグレースケール画像として取得
    pub fn preview_image(&self) -> Option<GrayImage> {
        let (low, high) = self.value_range;
        self.tensor.as_ref().map(|t| t.to_gray_image(low, high))
    }

    /// モデル入力をPNGのdata URLとして取得（表示側に渡す用）
    pub fn preview_data_url(&self) -> anyhow::Result<Option<String>> {
        use image::ImageEncoder;

        let Some(img) = self.preview_image() else {
            return Ok(None);
        };

        let mut png_data = Vec::new();
        let encoder = image::codecs::png::PngEncoder::new(&mut png_data);
        encoder.write_image(
            img.as_raw(),
            img.width(),
            img.height(),
            image::ExtendedColorType::L8,
        )?;

        let base64_data = general_purpose::STANDARD.encode(&png_data);
        Ok(Some(format!("data:image/png;base64,{}", base64_data)))
    }
}

impl std::fmt::Display for Prediction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}:{:.6}]", self.label, self.score)
    }
}
