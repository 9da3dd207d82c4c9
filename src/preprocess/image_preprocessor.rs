//! 撮影画像をモデル入力テンソルに変換する前処理
//!
//! 処理順:
//! 1. 中央を正方形に切り出し（短辺に合わせる）
//! 2. モデル入力サイズへ最近傍補間でリサイズ
//! 3. センサーの向きに合わせて反時計回りに回転
//! 4. コントラスト・明るさ調整（任意）
//! 5. グレースケール化（RGBの単純平均）
//! 6. 反転＋しきい値による二値化（任意）
//! 7. 正規化、必要ならグレー値を3チャネルに複製

use image::{imageops, DynamicImage, GenericImageView, Rgb, RgbImage};
use log::{debug, info};

use crate::error::ClassifierError;
use crate::preprocess::options::{ColorAdjust, PreprocessOptions};
use crate::types::{Orientation, PreparedTensor, TensorShape};

/// 画像前処理器
///
/// モデルの入力形状は生成時に固定され、出力テンソルは常にその形状になります。
#[derive(Debug, Clone)]
pub struct ImagePreprocessor {
    shape: TensorShape,
    options: PreprocessOptions,
}

impl ImagePreprocessor {
    /// 入力形状とオプションから作成
    pub fn new(shape: TensorShape, options: PreprocessOptions) -> Result<Self, ClassifierError> {
        if shape.width == 0 || shape.height == 0 {
            return Err(ClassifierError::InvalidArgument(format!(
                "モデル入力サイズが不正です: {}",
                shape
            )));
        }
        if shape.channels != 1 && shape.channels != 3 {
            return Err(ClassifierError::InvalidArgument(format!(
                "チャネル数は1または3のみ対応しています: {}",
                shape.channels
            )));
        }
        options
            .normalization
            .validate()
            .map_err(|e| ClassifierError::InvalidArgument(e.to_string()))?;
        if let Some(adjust) = &options.color_adjust {
            adjust
                .validate()
                .map_err(|e| ClassifierError::InvalidArgument(e.to_string()))?;
        }

        Ok(Self { shape, options })
    }

    pub fn shape(&self) -> TensorShape {
        self.shape
    }

    pub fn options(&self) -> &PreprocessOptions {
        &self.options
    }

    /// 画像を前処理する（向きは度数で指定）
    pub fn prepare(
        &self,
        image: &DynamicImage,
        orientation_degrees: i32,
    ) -> Result<PreparedTensor, ClassifierError> {
        let orientation = Orientation::from_degrees(orientation_degrees)?;
        self.prepare_with(image, orientation)
    }

    /// 画像を前処理する
    pub fn prepare_with(
        &self,
        image: &DynamicImage,
        orientation: Orientation,
    ) -> Result<PreparedTensor, ClassifierError> {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Err(ClassifierError::InvalidArgument(format!(
                "画像サイズが不正です: {}x{}",
                width, height
            )));
        }

        info!("画像読み込み: {}x{}", width, height);
        debug!(
            "変換先: {}x{} (チャネル {}), 向き {}度",
            self.shape.width,
            self.shape.height,
            self.shape.channels,
            orientation.degrees()
        );

        let rgb = image.to_rgb8();
        let cropped = center_crop_square(&rgb);

        // 奇数回の回転では縦横が入れ替わるので、回転後に宣言どおりの形状になるよう先に入れ替えておく
        let turns = orientation.quarter_turns();
        let (resize_w, resize_h) = if turns % 2 == 1 {
            (self.shape.height, self.shape.width)
        } else {
            (self.shape.width, self.shape.height)
        };
        let resized = resize_nearest(&cropped, resize_w, resize_h);
        let mut rotated = rotate_quarter_turns(&resized, turns);

        if let Some(adjust) = &self.options.color_adjust {
            apply_color_adjust(&mut rotated, adjust);
        }

        let tensor = self.to_tensor(&rotated)?;
        debug!("テンソル変換完了: {}", tensor.shape());
        Ok(tensor)
    }

    /// 回転済みRGB画像をグレースケール化・正規化してテンソルにする
    fn to_tensor(&self, img: &RgbImage) -> Result<PreparedTensor, ClassifierError> {
        let channels = self.shape.channels as usize;
        let mut data = Vec::with_capacity(self.shape.len());

        for y in 0..img.height() {
            for x in 0..img.width() {
                let gray = gray_average(img.get_pixel(x, y));
                // 二値化は整数の輝度で行う（小数部は切り捨て）
                let gray = match self.options.binarize_threshold {
                    Some(threshold) => binarize(gray as u8, threshold) as f32,
                    None => gray,
                };
                let value = self.options.normalization.apply(gray);
                data.extend(std::iter::repeat(value).take(channels));
            }
        }

        PreparedTensor::new(self.shape, data)
    }
}

/// 短辺に合わせて中央を正方形に切り出す
pub fn center_crop_square(img: &RgbImage) -> RgbImage {
    let (width, height) = img.dimensions();
    let side = width.min(height);
    if width == height {
        return img.clone();
    }
    let x = (width - side) / 2;
    let y = (height - side) / 2;
    imageops::crop_imm(img, x, y, side, side).to_image()
}

/// 最近傍補間でリサイズ
///
/// 出力画素の中心に最も近い入力画素をそのまま使います。
/// 細いペン跡がぼけないよう補間は行いません。
pub fn resize_nearest(img: &RgbImage, width: u32, height: u32) -> RgbImage {
    let (src_w, src_h) = img.dimensions();
    if (src_w, src_h) == (width, height) {
        return img.clone();
    }

    let scale_x = src_w as f64 / width as f64;
    let scale_y = src_h as f64 / height as f64;

    RgbImage::from_fn(width, height, |x, y| {
        let sx = (((x as f64 + 0.5) * scale_x) as u32).min(src_w - 1);
        let sy = (((y as f64 + 0.5) * scale_y) as u32).min(src_h - 1);
        *img.get_pixel(sx, sy)
    })
}

/// 反時計回りに quarter_turns × 90度 回転
pub fn rotate_quarter_turns(img: &RgbImage, quarter_turns: u32) -> RgbImage {
    match quarter_turns % 4 {
        0 => img.clone(),
        // image の rotate は時計回りなので、反時計回り90度 = 時計回り270度
        1 => imageops::rotate270(img),
        2 => imageops::rotate180(img),
        _ => imageops::rotate90(img),
    }
}

/// コントラスト・明るさ調整（v * contrast + brightness を 0〜255 にクリップ）
pub fn apply_color_adjust(img: &mut RgbImage, adjust: &ColorAdjust) {
    for pixel in img.pixels_mut() {
        for channel in pixel.0.iter_mut() {
            let v = *channel as f32 * adjust.contrast + adjust.brightness;
            *channel = v.round().clamp(0.0, 255.0) as u8;
        }
    }
}

/// RGBの単純平均によるグレー値（0.0〜255.0、丸めない）
pub fn gray_average(pixel: &Rgb<u8>) -> f32 {
    let [r, g, b] = pixel.0;
    (r as f32 + g as f32 + b as f32) / 3.0
}

/// 輝度を反転し、しきい値未満を黒にする
///
/// 白い紙に黒いインクで書かれた数字を「明るい線」として扱うための処理です。
pub fn binarize(gray: u8, threshold: u8) -> u8 {
    let inverted = 255 - gray;
    if inverted < threshold {
        0
    } else {
        inverted
    }
}
