//! 手書き数字の分類器
//!
//! 読み込み済みモデルを専有するリソースです。明示的に生成し、`close` で解放します。
//! 解放後の呼び出しは `InvalidState` になります。

use image::DynamicImage;
use log::{debug, info};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

use crate::classifier::postprocess::{top_label, ScoreTransform};
use crate::classifier::runner::ModelRunner;
use crate::error::ClassifierError;
use crate::model::InferenceConfig;
use crate::preprocess::{ImagePreprocessor, PreprocessOptions};
use crate::types::{Orientation, PreparedTensor, Prediction, TensorShape};

/// 分類器の生成オプション
#[derive(Debug, Clone)]
pub struct ClassifierOptions {
    /// 推論ワーカースレッド数（1以上）
    pub num_threads: usize,
    /// 前処理オプション（正規化方式はモデルの宣言で上書きされる）
    pub preprocess: PreprocessOptions,
}

impl Default for ClassifierOptions {
    fn default() -> Self {
        Self {
            num_threads: 1,
            preprocess: PreprocessOptions::default(),
        }
    }
}

/// 画像分類器
pub struct Classifier {
    runner: Option<Box<dyn ModelRunner>>,
    preprocessor: ImagePreprocessor,
    labels: Vec<String>,
    score_transform: ScoreTransform,
    pool: rayon::ThreadPool,
}

impl std::fmt::Debug for Classifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Classifier")
            .field("input_shape", &self.preprocessor.shape())
            .field("labels", &self.labels)
            .field("score_transform", &self.score_transform)
            .field("num_threads", &self.pool.current_num_threads())
            .field("closed", &self.runner.is_none())
            .finish()
    }
}

impl Classifier {
    /// 推論エンジンと推論設定から分類器を作成
    ///
    /// モデルの入力形状・クラス数が推論設定と一致しない場合は `AssetLoadFailed` を返します。
    pub fn new(
        runner: Box<dyn ModelRunner>,
        config: &InferenceConfig,
        options: ClassifierOptions,
    ) -> Result<Self, ClassifierError> {
        if options.num_threads == 0 {
            return Err(ClassifierError::InvalidArgument(
                "スレッド数は1以上を指定してください".to_string(),
            ));
        }

        let runner_shape = runner.input_shape();
        if runner_shape != config.input_shape {
            return Err(ClassifierError::AssetLoadFailed(format!(
                "モデルの入力形状がメタデータと一致しません: {} (メタデータ: {})",
                runner_shape, config.input_shape
            )));
        }
        if runner.num_classes() != config.num_classes() {
            return Err(ClassifierError::AssetLoadFailed(format!(
                "モデルのクラス数がラベル数と一致しません: {} (ラベル: {})",
                runner.num_classes(),
                config.num_classes()
            )));
        }

        let preprocess = options.preprocess.with_normalization(config.normalization);
        let preprocessor = ImagePreprocessor::new(config.input_shape, preprocess)?;

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(options.num_threads)
            .thread_name(|i| format!("digit-infer-{}", i))
            .build()
            .map_err(|e| ClassifierError::InvalidArgument(format!("スレッドプールの作成に失敗しました: {}", e)))?;

        info!(
            "分類器を初期化しました: 入力 {}, クラス数 {}, スレッド数 {}",
            config.input_shape,
            config.num_classes(),
            options.num_threads
        );

        Ok(Self {
            runner: Some(runner),
            preprocessor,
            labels: config.labels.clone(),
            score_transform: config.score_transform,
            pool,
        })
    }

    /// モデル入力形状
    pub fn input_shape(&self) -> TensorShape {
        self.preprocessor.shape()
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn num_threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    pub fn is_closed(&self) -> bool {
        self.runner.is_none()
    }

    /// 画像をモデル入力テンソルに変換
    pub fn prepare(
        &self,
        image: &DynamicImage,
        orientation_degrees: i32,
    ) -> Result<PreparedTensor, ClassifierError> {
        self.ensure_open()?;
        self.preprocessor.prepare(image, orientation_degrees)
    }

    /// 前処理済みテンソルを分類
    pub fn classify(&mut self, tensor: &PreparedTensor) -> Result<Prediction, ClassifierError> {
        self.ensure_open()?;

        if tensor.shape() != self.input_shape() {
            return Err(ClassifierError::InvalidArgument(format!(
                "テンソルの形状がモデル入力と一致しません: {} (期待: {})",
                tensor.shape(),
                self.input_shape()
            )));
        }

        let raw_scores = self.run_model(tensor)?;
        let scores = self.score_transform.apply(&raw_scores);
        let (label, score) = top_label(&self.labels, &scores)?;
        debug!("分類結果: label={}, score={}", label, score);

        Ok(Prediction::new(label, score))
    }

    /// 画像の前処理から分類までをまとめて行い、入力テンソルを結果に添付する
    pub fn recognize(
        &mut self,
        image: &DynamicImage,
        orientation_degrees: i32,
    ) -> Result<Prediction, ClassifierError> {
        let orientation = Orientation::from_degrees(orientation_degrees)?;
        self.recognize_with(image, orientation)
    }

    /// `recognize` の向き指定版
    pub fn recognize_with(
        &mut self,
        image: &DynamicImage,
        orientation: Orientation,
    ) -> Result<Prediction, ClassifierError> {
        self.ensure_open()?;
        let tensor = self.preprocessor.prepare_with(image, orientation)?;
        let prediction = self.classify(&tensor)?;
        let value_range = self.preprocessor.options().normalization.value_range();
        Ok(prediction.with_tensor(tensor, value_range))
    }

    /// モデルを解放する（2回目以降は何もしない）
    pub fn close(&mut self) {
        if self.runner.take().is_some() {
            info!("分類器を解放しました");
        }
    }

    fn ensure_open(&self) -> Result<(), ClassifierError> {
        if self.runner.is_none() {
            return Err(ClassifierError::InvalidState);
        }
        Ok(())
    }

    /// ワーカースレッド上でモデルを実行
    ///
    /// 推論エンジンがpanicしても推論エンジンは手元に戻し、`InferenceFailed` として返します。
    fn run_model(&mut self, tensor: &PreparedTensor) -> Result<Vec<f32>, ClassifierError> {
        let runner = self.runner.take().ok_or(ClassifierError::InvalidState)?;
        let input = tensor.clone();

        let (runner, result) = self.pool.install(move || {
            let result = panic::catch_unwind(AssertUnwindSafe(|| runner.run(&input)));
            (runner, result)
        });
        self.runner = Some(runner);

        match result {
            Ok(result) => result.map_err(ClassifierError::inference),
            Err(payload) => Err(ClassifierError::InferenceFailed(format!(
                "推論エンジンが異常終了しました: {}",
                panic_message(payload.as_ref())
            ))),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "unknown panic"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ModelMetadata;
    use crate::preprocess::DEFAULT_THRESHOLD;
    use image::{Rgb, RgbImage};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// 決まったスコアを返すテスト用エンジン
    struct FixedRunner {
        shape: TensorShape,
        scores: Vec<f32>,
        calls: Arc<AtomicUsize>,
    }

    impl ModelRunner for FixedRunner {
        fn input_shape(&self) -> TensorShape {
            self.shape
        }

        fn num_classes(&self) -> usize {
            10
        }

        fn run(&self, _tensor: &PreparedTensor) -> anyhow::Result<Vec<f32>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.scores.clone())
        }
    }

    /// 画素の平均輝度で「数字」を決めるテスト用エンジン
    struct BrightnessRunner;

    impl ModelRunner for BrightnessRunner {
        fn input_shape(&self) -> TensorShape {
            TensorShape::new(28, 28, 1)
        }

        fn num_classes(&self) -> usize {
            10
        }

        fn run(&self, tensor: &PreparedTensor) -> anyhow::Result<Vec<f32>> {
            let data = tensor.as_slice();
            let mean = data.iter().sum::<f32>() / data.len() as f32;
            let digit = ((mean * 9.0).round() as usize).min(9);
            let mut scores = vec![0.0; 10];
            scores[digit] = 1.0;
            Ok(scores)
        }
    }

    struct FailingRunner;

    impl ModelRunner for FailingRunner {
        fn input_shape(&self) -> TensorShape {
            TensorShape::new(28, 28, 1)
        }

        fn num_classes(&self) -> usize {
            10
        }

        fn run(&self, _tensor: &PreparedTensor) -> anyhow::Result<Vec<f32>> {
            anyhow::bail!("interpreter crashed")
        }
    }

    struct PanickingRunner;

    impl ModelRunner for PanickingRunner {
        fn input_shape(&self) -> TensorShape {
            TensorShape::new(28, 28, 1)
        }

        fn num_classes(&self) -> usize {
            10
        }

        fn run(&self, _tensor: &PreparedTensor) -> anyhow::Result<Vec<f32>> {
            panic!("engine aborted")
        }
    }

    fn digit_config() -> InferenceConfig {
        InferenceConfig::from_metadata(&ModelMetadata::digits(28, 1))
    }

    fn fixed_classifier(scores: Vec<f32>) -> (Classifier, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let runner = FixedRunner {
            shape: TensorShape::new(28, 28, 1),
            scores,
            calls: calls.clone(),
        };
        let classifier =
            Classifier::new(Box::new(runner), &digit_config(), ClassifierOptions::default()).unwrap();
        (classifier, calls)
    }

    fn blank_tensor() -> PreparedTensor {
        PreparedTensor::new(TensorShape::new(28, 28, 1), vec![0.0; 28 * 28]).unwrap()
    }

    fn photo(value: u8) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_pixel(64, 48, Rgb([value, value, value])))
    }

    #[test]
    fn test_classify_selects_argmax() {
        let (mut classifier, calls) =
            fixed_classifier(vec![0.1, 0.05, 0.3, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]);
        let prediction = classifier.classify(&blank_tensor()).unwrap();
        assert_eq!(prediction.label, "2");
        assert_eq!(prediction.score, 0.3);
        assert!(prediction.tensor.is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_classify_tie_break() {
        let mut scores = vec![0.0; 10];
        scores[3] = 0.5;
        scores[7] = 0.5;
        let (mut classifier, _) = fixed_classifier(scores);
        assert_eq!(classifier.classify(&blank_tensor()).unwrap().label, "3");
    }

    #[test]
    fn test_classify_is_deterministic() {
        let mut classifier = Classifier::new(
            Box::new(BrightnessRunner),
            &digit_config(),
            ClassifierOptions::default(),
        )
        .unwrap();
        let tensor = classifier.prepare(&photo(200), 0).unwrap();
        let first = classifier.classify(&tensor).unwrap();
        for _ in 0..5 {
            assert_eq!(classifier.classify(&tensor).unwrap(), first);
        }
    }

    #[test]
    fn test_recognize_attaches_tensor() {
        let mut classifier = Classifier::new(
            Box::new(BrightnessRunner),
            &digit_config(),
            ClassifierOptions::default(),
        )
        .unwrap();
        let prediction = classifier.recognize(&photo(255), 90).unwrap();
        assert_eq!(prediction.label, "9");
        assert_eq!(prediction.score, 1.0);

        let tensor = prediction.tensor.as_ref().unwrap();
        assert_eq!(tensor.shape(), TensorShape::new(28, 28, 1));
        let preview = prediction.preview_image().unwrap();
        assert_eq!(preview.dimensions(), (28, 28));
        assert!(preview.pixels().all(|p| p[0] == 255));
    }

    #[test]
    fn test_binarize_option_is_applied() {
        let options = ClassifierOptions {
            num_threads: 2,
            preprocess: PreprocessOptions::default().with_binarize(DEFAULT_THRESHOLD),
        };
        let mut classifier =
            Classifier::new(Box::new(BrightnessRunner), &digit_config(), options).unwrap();
        assert_eq!(classifier.num_threads(), 2);
        // 白い紙は反転すると0 → "0"、黒いインクは255 → "9"
        assert_eq!(classifier.recognize(&photo(250), 0).unwrap().label, "0");
        assert_eq!(classifier.recognize(&photo(0), 0).unwrap().label, "9");
    }

    #[test]
    fn test_close_then_classify_fails() {
        let (mut classifier, calls) = fixed_classifier(vec![0.1; 10]);
        classifier.close();
        assert!(classifier.is_closed());
        assert_eq!(classifier.classify(&blank_tensor()), Err(ClassifierError::InvalidState));
        assert_eq!(classifier.recognize(&photo(0), 0), Err(ClassifierError::InvalidState));
        assert_eq!(classifier.prepare(&photo(0), 0), Err(ClassifierError::InvalidState));
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        // 2回目の解放は何もしない
        classifier.close();
        assert!(classifier.is_closed());
    }

    #[test]
    fn test_inference_failure_is_surfaced() {
        let mut classifier = Classifier::new(
            Box::new(FailingRunner),
            &digit_config(),
            ClassifierOptions::default(),
        )
        .unwrap();
        match classifier.classify(&blank_tensor()) {
            Err(ClassifierError::InferenceFailed(msg)) => assert!(msg.contains("interpreter crashed")),
            other => panic!("unexpected result: {:?}", other),
        }
        // 失敗後もインスタンスは使える状態のまま
        assert!(!classifier.is_closed());
    }

    #[test]
    fn test_engine_panic_keeps_classifier_open() {
        let mut classifier = Classifier::new(
            Box::new(PanickingRunner),
            &digit_config(),
            ClassifierOptions::default(),
        )
        .unwrap();
        for _ in 0..2 {
            match classifier.classify(&blank_tensor()) {
                Err(ClassifierError::InferenceFailed(msg)) => assert!(msg.contains("engine aborted")),
                other => panic!("unexpected result: {:?}", other),
            }
            assert!(!classifier.is_closed());
        }
        classifier.close();
        assert_eq!(classifier.classify(&blank_tensor()).unwrap_err(), ClassifierError::InvalidState);
    }

    #[test]
    fn test_wrong_score_length() {
        let (mut classifier, _) = fixed_classifier(vec![0.5; 3]);
        assert!(matches!(
            classifier.classify(&blank_tensor()),
            Err(ClassifierError::InferenceFailed(_))
        ));
    }

    #[test]
    fn test_wrong_tensor_shape() {
        let (mut classifier, calls) = fixed_classifier(vec![0.1; 10]);
        let tensor = PreparedTensor::new(TensorShape::new(14, 14, 1), vec![0.0; 196]).unwrap();
        assert!(matches!(
            classifier.classify(&tensor),
            Err(ClassifierError::InvalidArgument(_))
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_invalid_orientation() {
        let (mut classifier, _) = fixed_classifier(vec![0.1; 10]);
        assert!(matches!(
            classifier.recognize(&photo(0), 45),
            Err(ClassifierError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_construction_checks() {
        let zero_threads = ClassifierOptions {
            num_threads: 0,
            ..ClassifierOptions::default()
        };
        assert!(matches!(
            Classifier::new(Box::new(BrightnessRunner), &digit_config(), zero_threads),
            Err(ClassifierError::InvalidArgument(_))
        ));

        let mut mismatched = digit_config();
        mismatched.labels.pop();
        assert!(matches!(
            Classifier::new(Box::new(BrightnessRunner), &mismatched, ClassifierOptions::default()),
            Err(ClassifierError::AssetLoadFailed(_))
        ));

        let other_shape = InferenceConfig::from_metadata(&ModelMetadata::digits(32, 1));
        assert!(matches!(
            Classifier::new(Box::new(BrightnessRunner), &other_shape, ClassifierOptions::default()),
            Err(ClassifierError::AssetLoadFailed(_))
        ));
    }

    #[test]
    fn test_softmax_transform() {
        let calls = Arc::new(AtomicUsize::new(0));
        let runner = FixedRunner {
            shape: TensorShape::new(28, 28, 1),
            scores: vec![0.0, 0.0, 0.0, 0.0, 0.0, 2.0, 0.0, 0.0, 0.0, 0.0],
            calls,
        };
        let mut config = digit_config();
        config.score_transform = ScoreTransform::Softmax;
        let mut classifier =
            Classifier::new(Box::new(runner), &config, ClassifierOptions::default()).unwrap();
        let prediction = classifier.classify(&blank_tensor()).unwrap();
        assert_eq!(prediction.label, "5");
        assert!(prediction.score > 0.0 && prediction.score < 1.0);
    }
}
