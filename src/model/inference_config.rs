//! モデルメタデータから推論に必要な情報を取り出す

use crate::classifier::ScoreTransform;
use crate::model::model_metadata::ModelMetadata;
use crate::preprocess::Normalization;
use crate::types::TensorShape;

/// 推論設定
///
/// 分類器の生成時に一度だけ決まり、インスタンスの寿命の間は変わりません。
#[derive(Debug, Clone, PartialEq)]
pub struct InferenceConfig {
    /// クラスラベル（モデル出力と同じ順序）
    pub labels: Vec<String>,

    /// モデル入力形状
    pub input_shape: TensorShape,

    /// 学習時の正規化方式
    pub normalization: Normalization,

    /// 出力スコアの後処理
    pub score_transform: ScoreTransform,
}

impl InferenceConfig {
    /// メタデータからInferenceConfigを作成
    pub fn from_metadata(metadata: &ModelMetadata) -> Self {
        Self {
            labels: metadata.labels.clone(),
            input_shape: metadata.input_shape(),
            normalization: metadata.normalization,
            score_transform: metadata.score_transform,
        }
    }

    /// クラス数
    pub fn num_classes(&self) -> usize {
        self.labels.len()
    }

    /// 設定情報を表示
    pub fn print_info(&self) {
        println!("\n=== 推論設定 ===");
        println!("ラベル: {}", self.labels.join(", "));
        println!("クラス数: {}", self.num_classes());
        println!("入力形状: {}", self.input_shape);
        println!("正規化: {}", self.normalization);
        println!("スコア後処理: {}", self.score_transform);
        println!("==================");
    }
}
