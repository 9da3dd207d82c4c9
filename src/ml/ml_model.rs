//! 同梱モデルの定義
//!
//! 手書き数字分類用のCNNと、その構成をメタデータから組み立てる設定を提供します。

#[cfg(feature = "ml")]
use burn::{
    config::Config,
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{MaxPool2d, MaxPool2dConfig},
        Linear, LinearConfig, Relu,
    },
    tensor::{backend::Backend, Tensor},
};

#[cfg(feature = "ml")]
use crate::model::ModelMetadata;

/// 最終畳み込み層のチャネル数
#[cfg(feature = "ml")]
const FINAL_CHANNELS: usize = 64;

/// モデル設定
#[cfg(feature = "ml")]
#[derive(Config, Debug)]
pub struct ModelConfig {
    /// 分類クラス数
    pub num_classes: usize,
    /// 入力チャネル数（1 または 3）
    #[config(default = 1)]
    pub input_channels: usize,
    /// 入力画像の高さ
    #[config(default = 28)]
    pub input_height: usize,
    /// 入力画像の幅
    #[config(default = 28)]
    pub input_width: usize,
}

#[cfg(feature = "ml")]
impl ModelConfig {
    /// メタデータの宣言から設定を作る
    pub fn from_metadata(metadata: &ModelMetadata) -> Self {
        Self {
            num_classes: metadata.labels.len(),
            input_channels: metadata.input_channels as usize,
            input_height: metadata.input_height as usize,
            input_width: metadata.input_width as usize,
        }
    }

    /// 1辺の特徴マップサイズ
    ///
    /// Conv (3x3, no padding) で -2、Pool (2x2) で 1/2（切り捨て）:
    /// conv1 → pool1 → conv2 → pool2 → conv3
    fn feature_size(size: usize) -> usize {
        let after_pool1 = size.saturating_sub(2) / 2;
        let after_pool2 = after_pool1.saturating_sub(2) / 2;
        after_pool2.saturating_sub(2)
    }

    /// 平坦化後の特徴次元
    pub fn feature_dim(&self) -> usize {
        FINAL_CHANNELS * Self::feature_size(self.input_height) * Self::feature_size(self.input_width)
    }

    /// モデルを初期化
    pub fn init<B: Backend>(&self, device: &B::Device) -> anyhow::Result<DigitNet<B>> {
        let d = self.feature_dim();
        if d == 0 {
            anyhow::bail!(
                "入力サイズが小さすぎます: {}x{} (最小18x18が必要)",
                self.input_width,
                self.input_height
            );
        }
        let d_half = d / 2;
        log::debug!(
            "[Model] 入力 {}x{}x{}, 特徴次元 {}, FC {} -> {} -> {}",
            self.input_height,
            self.input_width,
            self.input_channels,
            d,
            d,
            d_half,
            self.num_classes
        );

        Ok(DigitNet {
            conv1: Conv2dConfig::new([self.input_channels, 16], [3, 3])
                .with_stride([1, 1])
                .init(device),
            pool1: MaxPool2dConfig::new([2, 2]).init(),
            conv2: Conv2dConfig::new([16, 32], [3, 3])
                .with_stride([1, 1])
                .init(device),
            pool2: MaxPool2dConfig::new([2, 2]).init(),
            conv3: Conv2dConfig::new([32, FINAL_CHANNELS], [3, 3])
                .with_stride([1, 1])
                .init(device),
            fc1: LinearConfig::new(d, d_half).init(device),
            fc2: LinearConfig::new(d_half, self.num_classes).init(device),
            activation: Relu::new(),
        })
    }
}

/// 手書き数字分類用CNN
///
/// # アーキテクチャ
/// - {Conv 3x3 + ReLU + MaxPool 2x2} x 2層
/// - Conv 3x3 + ReLU
/// - Flatten
/// - FC: d -> d/2 + ReLU
/// - FC: d/2 -> num_classes（ロジット）
#[cfg(feature = "ml")]
#[derive(Module, Debug)]
pub struct DigitNet<B: Backend> {
    conv1: Conv2d<B>,  // in -> 16
    pool1: MaxPool2d,
    conv2: Conv2d<B>,  // 16 -> 32
    pool2: MaxPool2d,
    conv3: Conv2d<B>,  // 32 -> 64

    fc1: Linear<B>,    // d -> d/2
    fc2: Linear<B>,    // d/2 -> num_classes

    activation: Relu,
}

#[cfg(feature = "ml")]
impl<B: Backend> DigitNet<B> {
    /// 順伝播
    ///
    /// # 引数
    /// - `images`: バッチ画像 [batch_size, channels, height, width]
    ///
    /// # 戻り値
    /// - クラスごとのロジット [batch_size, num_classes]
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let [batch_size, _, _, _] = images.dims();

        let x = self.conv1.forward(images);
        let x = self.activation.forward(x);
        let x = self.pool1.forward(x);

        let x = self.conv2.forward(x);
        let x = self.activation.forward(x);
        let x = self.pool2.forward(x);

        let x = self.conv3.forward(x);
        let x = self.activation.forward(x);

        let [_, c, h, w] = x.dims();
        let x = x.reshape([batch_size, c * h * w]);

        let x = self.fc1.forward(x);
        let x = self.activation.forward(x);
        self.fc2.forward(x)
    }
}
