//! 分類対象の画像の取得（ファイル・同梱テスト画像）

use anyhow::{Context, Result};
use image::{DynamicImage, GenericImageView};
use log::info;
use rand::seq::SliceRandom;
use rand::Rng;
use std::path::{Path, PathBuf};

/// 画像ファイルを読み込む
pub fn load_image(path: &Path) -> Result<DynamicImage> {
    let img = image::open(path).context(format!("Failed to open image: {}", path.display()))?;
    let (width, height) = img.dimensions();
    info!("画像を読み込みました: {} ({}x{})", path.display(), width, height);
    Ok(img)
}

/// 同梱テスト画像から1枚をランダムに選ぶ
pub fn pick_sample<'a, R: Rng + ?Sized>(samples: &'a [String], rng: &mut R) -> Option<&'a str> {
    samples.choose(rng).map(String::as_str)
}

/// 対応する画像拡張子か
fn is_image_file(path: &Path) -> bool {
    path.extension()
        .map(|ext| {
            let ext = ext.to_string_lossy().to_lowercase();
            ext == "png" || ext == "jpg" || ext == "jpeg"
        })
        .unwrap_or(false)
}

/// ディレクトリ直下の画像ファイルをパス順に列挙
pub fn collect_images(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut paths = Vec::new();
    for entry in std::fs::read_dir(dir).context(format!("Failed to read directory: {}", dir.display()))? {
        let path = entry?.path();
        if path.is_file() && is_image_file(&path) {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}
