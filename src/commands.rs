//! CLIから呼び出す分類コマンド

#[cfg(feature = "ml")]
use anyhow::{Context, Result};
#[cfg(feature = "ml")]
use log::{info, warn};
#[cfg(feature = "ml")]
use serde::Serialize;
#[cfg(feature = "ml")]
use std::path::{Path, PathBuf};

#[cfg(feature = "ml")]
use crate::classifier::{Classifier, ClassifierOptions, ScoreTransform};
#[cfg(feature = "ml")]
use crate::image_source::{collect_images, load_image, pick_sample};
#[cfg(feature = "ml")]
use crate::ml::init_model_binary;
#[cfg(feature = "ml")]
use crate::model::{save_model_with_metadata, AppConfig, ModelMetadata};
#[cfg(feature = "ml")]
use crate::types::Prediction;

/// 1枚分の分類結果（JSON出力用）
#[cfg(feature = "ml")]
#[derive(Debug, Clone, Serialize)]
pub struct ClassificationOutput {
    pub image: String,
    pub label: String,
    pub score: f32,
    /// モデル入力のPNG data URL
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preview: Option<String>,
}

/// バッチ分類のCSV行
#[cfg(feature = "ml")]
#[derive(Debug, Clone, Serialize)]
pub struct BatchRecord {
    pub path: String,
    pub label: String,
    pub score: Option<f32>,
    pub error: String,
}

/// 設定に従って分類器を開く
#[cfg(feature = "ml")]
pub fn open_classifier(config: &AppConfig) -> Result<Classifier> {
    config.validate()?;
    let options = ClassifierOptions {
        num_threads: config.model.num_threads,
        preprocess: config.preprocess.to_options(),
    };
    let classifier = Classifier::load(&config.model.model_path, config.device_type, options)
        .context("推論エンジンの初期化エラー")?;
    Ok(classifier)
}

/// 1枚の画像を分類する
///
/// `preview_path` を指定すると、モデルに入力したテンソルをPNGとして保存します。
#[cfg(feature = "ml")]
pub fn classify_image(
    classifier: &mut Classifier,
    image_path: &Path,
    orientation: i32,
    preview_path: Option<&Path>,
) -> Result<Prediction> {
    let img = load_image(image_path)?;
    let prediction = classifier
        .recognize(&img, orientation)
        .context(format!("分類エラー: {}", image_path.display()))?;
    info!("分類結果: {} {}", image_path.display(), prediction);

    if let Some(preview_path) = preview_path {
        if let Some(preview) = prediction.preview_image() {
            preview
                .save(preview_path)
                .context(format!("プレビュー画像の保存エラー: {}", preview_path.display()))?;
            info!("モデル入力画像を保存しました: {}", preview_path.display());
        }
    }

    Ok(prediction)
}

/// 分類結果を出力用の形に変換
#[cfg(feature = "ml")]
pub fn to_output(image_path: &Path, prediction: &Prediction, with_preview: bool) -> Result<ClassificationOutput> {
    let preview = if with_preview {
        prediction.preview_data_url()?
    } else {
        None
    };
    Ok(ClassificationOutput {
        image: image_path.display().to_string(),
        label: prediction.label.clone(),
        score: prediction.score,
        preview,
    })
}

/// 分類結果を表示
#[cfg(feature = "ml")]
pub fn print_prediction(image_path: &Path, prediction: &Prediction, json: bool) -> Result<()> {
    if json {
        let output = to_output(image_path, prediction, true)?;
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        println!("画像: {}", image_path.display());
        println!("Probability: {}", prediction);
    }
    Ok(())
}

/// 同梱テスト画像からランダムに1枚選ぶ
///
/// 存在しないファイルは候補から外します。
#[cfg(feature = "ml")]
pub fn choose_sample(config: &AppConfig) -> Result<PathBuf> {
    let available: Vec<String> = config
        .samples
        .iter()
        .filter(|sample| {
            let exists = Path::new(sample.as_str()).is_file();
            if !exists {
                warn!("テスト画像が見つかりません: {}", sample);
            }
            exists
        })
        .cloned()
        .collect();

    let mut rng = rand::thread_rng();
    let sample = pick_sample(&available, &mut rng)
        .ok_or_else(|| anyhow::anyhow!("テスト画像が見つかりません"))?;
    info!("テスト画像を選択しました: {}", sample);
    Ok(PathBuf::from(sample))
}

/// ディレクトリ内の画像をすべて分類してCSVに書き出す
///
/// 個々の画像の失敗はCSVのerror列に記録して処理を続けます。
/// 分類器が解放済みなど、続行できないエラーの場合は中断します。
#[cfg(feature = "ml")]
pub fn classify_batch(
    classifier: &mut Classifier,
    image_dir: &Path,
    output_csv_path: &Path,
    orientation: i32,
) -> Result<usize> {
    let paths = collect_images(image_dir)?;
    if paths.is_empty() {
        anyhow::bail!("画像が見つかりません: {}", image_dir.display());
    }

    let mut csv_writer = csv::Writer::from_path(output_csv_path)
        .context(format!("CSV作成エラー: {}", output_csv_path.display()))?;

    let mut classified = 0;
    for path in &paths {
        let result = load_image(path).and_then(|img| {
            classifier
                .recognize(&img, orientation)
                .map_err(anyhow::Error::new)
        });

        let record = match result {
            Ok(prediction) => {
                classified += 1;
                BatchRecord {
                    path: path.display().to_string(),
                    label: prediction.label,
                    score: Some(prediction.score),
                    error: String::new(),
                }
            }
            Err(e) if classifier.is_closed() => return Err(e),
            Err(e) => {
                warn!("分類に失敗しました: {}: {:#}", path.display(), e);
                BatchRecord {
                    path: path.display().to_string(),
                    label: String::new(),
                    score: None,
                    error: format!("{:#}", e),
                }
            }
        };
        csv_writer
            .serialize(&record)
            .context("CSV書き込みエラー")?;
    }

    csv_writer.flush().context("CSVフラッシュエラー")?;
    info!(
        "バッチ分類完了: {}/{}枚 -> {}",
        classified,
        paths.len(),
        output_csv_path.display()
    );
    Ok(classified)
}

/// 初期化したままの重みでモデルアセットを作る（動作確認用）
#[cfg(feature = "ml")]
pub fn init_model_asset(output_path: &Path, size: u32, channels: u32) -> Result<PathBuf> {
    let mut metadata = ModelMetadata::digits(size, channels);
    // 同梱CNNの出力はロジットなので確率に変換する
    metadata.score_transform = ScoreTransform::Softmax;
    metadata.validate()?;

    let model_binary = init_model_binary(&metadata)?;
    save_model_with_metadata(output_path, &metadata, &model_binary)
}

#[cfg(all(test, feature = "ml"))]
mod tests {
    use super::*;
    use crate::model::DeviceType;
    use image::{Rgb, RgbImage};

    fn setup(dir: &Path) -> AppConfig {
        let model_path = init_model_asset(&dir.join("digits.tar.gz"), 28, 1).unwrap();
        let mut config = AppConfig::default();
        config.device_type = DeviceType::Cpu;
        config.model.model_path = model_path.to_string_lossy().to_string();
        config
    }

    fn write_digit(path: &Path) {
        RgbImage::from_fn(40, 30, |x, _| {
            if x == 20 { Rgb([0, 0, 0]) } else { Rgb([255, 255, 255]) }
        })
        .save(path)
        .unwrap();
    }

    #[test]
    fn test_classify_image_with_preview() {
        let dir = tempfile::tempdir().unwrap();
        let config = setup(dir.path());
        let mut classifier = open_classifier(&config).unwrap();

        let image_path = dir.path().join("digit.png");
        let preview_path = dir.path().join("preview.png");
        write_digit(&image_path);

        let prediction = classify_image(&mut classifier, &image_path, 0, Some(&preview_path)).unwrap();
        assert!(classifier.labels().contains(&prediction.label));

        let preview = image::open(&preview_path).unwrap();
        assert_eq!((preview.width(), preview.height()), (28, 28));

        let output = to_output(&image_path, &prediction, true).unwrap();
        assert!(output.preview.unwrap().starts_with("data:image/png;base64,"));
    }

    #[test]
    fn test_classify_batch_writes_csv() {
        let dir = tempfile::tempdir().unwrap();
        let config = setup(dir.path());
        let mut classifier = open_classifier(&config).unwrap();

        let images = dir.path().join("images");
        std::fs::create_dir(&images).unwrap();
        write_digit(&images.join("one.png"));
        write_digit(&images.join("two.png"));
        // 拡張子だけの壊れた画像
        std::fs::write(images.join("broken.jpg"), b"not an image").unwrap();

        let report = dir.path().join("report.csv");
        let classified = classify_batch(&mut classifier, &images, &report, 0).unwrap();
        assert_eq!(classified, 2);

        let mut reader = csv::Reader::from_path(&report).unwrap();
        let headers = reader.headers().unwrap().clone();
        assert_eq!(headers.iter().collect::<Vec<_>>(), vec!["path", "label", "score", "error"]);
        let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 3);
        // パス順: broken.jpg, one.png, two.png
        assert!(!rows[0][3].is_empty());
        assert!(rows[1][3].is_empty());
    }

    #[test]
    fn test_classify_batch_after_close() {
        let dir = tempfile::tempdir().unwrap();
        let config = setup(dir.path());
        let mut classifier = open_classifier(&config).unwrap();
        classifier.close();

        let images = dir.path().join("images");
        std::fs::create_dir(&images).unwrap();
        write_digit(&images.join("one.png"));

        assert!(classify_batch(&mut classifier, &images, &dir.path().join("r.csv"), 0).is_err());
    }

    #[test]
    fn test_bundled_samples_exist() {
        let config = AppConfig::default();
        for sample in &config.samples {
            assert!(Path::new(sample).is_file(), "missing sample: {}", sample);
        }
        let chosen = choose_sample(&config).unwrap();
        assert!(config.samples.iter().any(|s| Path::new(s) == chosen));
    }

    #[test]
    fn test_choose_sample_skips_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let existing = dir.path().join("digit.png");
        write_digit(&existing);

        let mut config = AppConfig::default();
        config.samples = vec![
            dir.path().join("missing.png").to_string_lossy().to_string(),
            existing.to_string_lossy().to_string(),
        ];
        for _ in 0..5 {
            assert_eq!(choose_sample(&config).unwrap(), existing);
        }

        config.samples.truncate(1);
        assert!(choose_sample(&config).is_err());
        config.samples.clear();
        assert!(choose_sample(&config).is_err());
    }

    #[test]
    fn test_classify_bundled_sample() {
        let dir = tempfile::tempdir().unwrap();
        let config = setup(dir.path());
        let mut classifier = open_classifier(&config).unwrap();

        let sample = choose_sample(&config).unwrap();
        let prediction = classify_image(&mut classifier, &sample, 0, None).unwrap();
        assert!(classifier.labels().contains(&prediction.label));
        assert!(prediction.score > 0.0 && prediction.score <= 1.0);
    }
}
