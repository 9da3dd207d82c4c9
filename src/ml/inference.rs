//! Burnによるモデル推論

#[cfg(feature = "ml")]
use anyhow::{Context, Result};
#[cfg(feature = "ml")]
use std::path::Path;
#[cfg(feature = "ml")]
use burn::{
    backend::Wgpu,
    module::Module,
    record::{BinBytesRecorder, FullPrecisionSettings, Recorder},
    tensor::{backend::Backend, Tensor},
};
#[cfg(feature = "ml")]
use burn_ndarray::{NdArray, NdArrayDevice};
#[cfg(feature = "ml")]
use burn_wgpu::WgpuDevice;
#[cfg(feature = "ml")]
use log::info;

#[cfg(feature = "ml")]
use crate::classifier::{Classifier, ClassifierOptions, ModelRunner};
#[cfg(feature = "ml")]
use crate::error::ClassifierError;
#[cfg(feature = "ml")]
use crate::ml::{DigitNet, ModelConfig};
#[cfg(feature = "ml")]
use crate::model::{load_model_with_metadata, DeviceType, InferenceConfig, ModelMetadata, DIGIT_NET_ARCHITECTURE};
#[cfg(feature = "ml")]
use crate::types::{PreparedTensor, TensorShape};

/// Burnで同梱CNNを実行する推論エンジン
#[cfg(feature = "ml")]
pub struct BurnRunner<B: Backend> {
    model: DigitNet<B>,
    device: B::Device,
    shape: TensorShape,
    num_classes: usize,
}

#[cfg(feature = "ml")]
impl<B: Backend> BurnRunner<B> {
    /// メタデータと重みバイナリから推論エンジンを作る
    pub fn from_bytes(metadata: &ModelMetadata, model_binary: Vec<u8>, device: B::Device) -> Result<Self> {
        if metadata.architecture != DIGIT_NET_ARCHITECTURE {
            anyhow::bail!("未対応のアーキテクチャです: {}", metadata.architecture);
        }

        let model_config = ModelConfig::from_metadata(metadata);
        let model = model_config.init::<B>(&device)?;

        // モデルの重みを復元
        let recorder = BinBytesRecorder::<FullPrecisionSettings>::default();
        let record = Recorder::<B>::load(&recorder, model_binary, &device)
            .map_err(|e| anyhow::anyhow!("モデル重みの読み込みエラー: {:?}", e))?;
        let model = model.load_record(record);

        Ok(Self {
            model,
            device,
            shape: metadata.input_shape(),
            num_classes: metadata.labels.len(),
        })
    }
}

#[cfg(feature = "ml")]
impl<B: Backend> ModelRunner for BurnRunner<B> {
    fn input_shape(&self) -> TensorShape {
        self.shape
    }

    fn num_classes(&self) -> usize {
        self.num_classes
    }

    fn run(&self, tensor: &PreparedTensor) -> Result<Vec<f32>> {
        let TensorShape { height, width, channels } = tensor.shape();

        // HWC -> [1, C, H, W]
        let input = Tensor::<B, 1>::from_floats(tensor.to_chw().as_slice(), &self.device)
            .reshape([1, channels as usize, height as usize, width as usize]);

        let output = self.model.forward(input);

        output
            .into_data()
            .to_vec::<f32>()
            .map_err(|e| anyhow::anyhow!("推論結果の取得エラー: {:?}", e))
    }
}

/// 指定デバイスの推論エンジンを作る
#[cfg(feature = "ml")]
pub fn create_runner(
    device_type: DeviceType,
    metadata: &ModelMetadata,
    model_binary: Vec<u8>,
) -> Result<Box<dyn ModelRunner>> {
    let runner: Box<dyn ModelRunner> = match device_type {
        DeviceType::Cpu => Box::new(BurnRunner::<NdArray<f32>>::from_bytes(
            metadata,
            model_binary,
            NdArrayDevice::default(),
        )?),
        DeviceType::Wgpu => Box::new(BurnRunner::<Wgpu>::from_bytes(
            metadata,
            model_binary,
            WgpuDevice::default(),
        )?),
    };
    Ok(runner)
}

/// 初期化したままの重みでモデルアセット用のバイナリを作る
///
/// 学習は行わないため推論結果に意味はありません。パイプラインの動作確認用です。
#[cfg(feature = "ml")]
pub fn init_model_binary(metadata: &ModelMetadata) -> Result<Vec<u8>> {
    let device = NdArrayDevice::default();
    let model = ModelConfig::from_metadata(metadata).init::<NdArray<f32>>(&device)?;
    let recorder = BinBytesRecorder::<FullPrecisionSettings>::default();
    Recorder::<NdArray<f32>>::record(&recorder, model.into_record(), ())
        .map_err(|e| anyhow::anyhow!("モデル重みの書き出しエラー: {:?}", e))
}

#[cfg(feature = "ml")]
impl Classifier {
    /// モデルアセットを読み込んで分類器を作る
    ///
    /// アセットの読み込み・重みの復元に失敗した場合は `AssetLoadFailed` を返します。
    pub fn load<P: AsRef<Path>>(
        model_path: P,
        device_type: DeviceType,
        options: ClassifierOptions,
    ) -> Result<Self, ClassifierError> {
        let model_path = model_path.as_ref();
        info!("モデルを読み込みます: {} ({})", model_path.display(), device_type);

        let (metadata, model_binary) = load_model_with_metadata(model_path)
            .with_context(|| format!("Failed to load model asset: {}", model_path.display()))
            .map_err(ClassifierError::asset)?;

        let runner = create_runner(device_type, &metadata, model_binary).map_err(ClassifierError::asset)?;
        Classifier::new(runner, &InferenceConfig::from_metadata(&metadata), options)
    }
}
