//! 推論エンジンの抽象化

use crate::types::{PreparedTensor, TensorShape};

/// 学習済みモデルの実行部
///
/// 分類器は実際のエンジン（Burnなど）を知らず、この trait 越しにスコアを受け取ります。
/// 分類器のワーカースレッドへ移して実行するため `Send` が必要です。
pub trait ModelRunner: Send {
    /// モデルが宣言している入力形状
    fn input_shape(&self) -> TensorShape;

    /// 出力クラス数
    fn num_classes(&self) -> usize;

    /// テンソルを入力してクラスごとのスコアを返す
    fn run(&self, tensor: &PreparedTensor) -> anyhow::Result<Vec<f32>>;
}
