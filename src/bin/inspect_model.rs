//! モデルアセットの確認用バイナリ
//!
//! メタデータの表示と、読み込んだモデルで1回推論できるかを確認します。

use digit_classifier_lib::model::{load_metadata, print_metadata_info, AppConfig, InferenceConfig};
use std::path::{Path, PathBuf};

fn main() {
    println!("=== Digit Classifier Model Check ===\n");

    // コマンドライン引数を取得
    let args: Vec<String> = std::env::args().collect();
    let model_path = if args.len() > 1 {
        PathBuf::from(&args[1])
    } else {
        PathBuf::from(AppConfig::load_or_default().model.model_path)
    };

    println!("Test 1: モデルメタデータ読み込み");
    let ok = check_metadata(&model_path);

    println!("\n{}\n", "=".repeat(50));

    println!("Test 2: 推論エンジン初期化");
    if ok {
        check_inference(&model_path);
    } else {
        println!("  メタデータが読み込めないためスキップします");
    }
}

fn check_metadata(model_path: &Path) -> bool {
    match load_metadata(model_path) {
        Ok(metadata) => {
            println!("✓ モデルメタデータ読み込み成功:");
            print_metadata_info(&metadata);
            InferenceConfig::from_metadata(&metadata).print_info();
            true
        }
        Err(e) => {
            eprintln!("✗ エラー: {:#}", e);
            false
        }
    }
}

#[cfg(feature = "ml")]
fn check_inference(model_path: &Path) {
    use digit_classifier_lib::model::DeviceType;
    use digit_classifier_lib::{Classifier, ClassifierOptions};
    use image::{DynamicImage, GrayImage, Luma};

    let mut classifier = match Classifier::load(model_path, DeviceType::Cpu, ClassifierOptions::default()) {
        Ok(classifier) => classifier,
        Err(e) => {
            eprintln!("✗ エラー: {}", e);
            return;
        }
    };
    println!("✓ 推論エンジン初期化成功 (入力 {})", classifier.input_shape());

    // 白地に黒い縦線
    let img = DynamicImage::ImageLuma8(GrayImage::from_fn(64, 64, |x, _| {
        if (28..36).contains(&x) { Luma([0]) } else { Luma([255]) }
    }));
    match classifier.recognize(&img, 0) {
        Ok(prediction) => println!("✓ 推論成功: {}", prediction),
        Err(e) => eprintln!("✗ エラー: {}", e),
    }
    classifier.close();
}

#[cfg(not(feature = "ml"))]
fn check_inference(_model_path: &Path) {
    println!("  `ml` フィーチャーが無効のためスキップします");
}
