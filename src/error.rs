//! 分類器のエラー定義

use thiserror::Error;

/// 前処理・推論で発生するエラー
///
/// 呼び出し側が種類ごとに処理を分けられるよう、すべて同期的に返します。
/// 自動リトライは行いません。
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ClassifierError {
    /// モデルアセットが存在しない・読めない・内容が矛盾している
    #[error("モデルアセットの読み込みに失敗しました: {0}")]
    AssetLoadFailed(String),

    /// 不正な向き、空の画像、形状の合わない入力など
    #[error("不正な引数: {0}")]
    InvalidArgument(String),

    /// 推論エンジンがエラーを返した、またはスコアが使えない
    #[error("推論に失敗しました: {0}")]
    InferenceFailed(String),

    /// 解放済みの分類器を使おうとした
    #[error("分類器は既に解放されています")]
    InvalidState,
}

impl ClassifierError {
    /// anyhowのエラーチェーンをまとめてAssetLoadFailedに変換
    pub fn asset(err: anyhow::Error) -> Self {
        ClassifierError::AssetLoadFailed(format!("{:#}", err))
    }

    /// anyhowのエラーチェーンをまとめてInferenceFailedに変換
    pub fn inference(err: anyhow::Error) -> Self {
        ClassifierError::InferenceFailed(format!("{:#}", err))
    }
}
