//! スコアの後処理と最大スコアの選択

use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::ClassifierError;

/// 推論結果のスコアに掛ける変換
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ScoreTransform {
    /// モデルの出力をそのまま使う
    #[default]
    Identity,
    /// ロジットを確率に変換する
    Softmax,
}

impl ScoreTransform {
    pub fn apply(&self, scores: &[f32]) -> Vec<f32> {
        match self {
            ScoreTransform::Identity => scores.to_vec(),
            ScoreTransform::Softmax => softmax(scores),
        }
    }
}

impl std::fmt::Display for ScoreTransform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScoreTransform::Identity => write!(f, "identity"),
            ScoreTransform::Softmax => write!(f, "softmax"),
        }
    }
}

/// ソフトマックス
///
/// NaNはNaNのまま残します。最大値が無限大の場合は極限値を返します
/// （+infのクラスで確率を等分、すべて-infなら一様）。
fn softmax(scores: &[f32]) -> Vec<f32> {
    let max = scores
        .iter()
        .copied()
        .filter(|s| !s.is_nan())
        .fold(f32::NEG_INFINITY, f32::max);
    if max.is_infinite() {
        let count = scores.iter().filter(|&&s| s == max).count() as f32;
        return scores
            .iter()
            .map(|&s| {
                if s.is_nan() {
                    f32::NAN
                } else if s == max {
                    1.0 / count
                } else {
                    0.0
                }
            })
            .collect();
    }
    let exps: Vec<f32> = scores.iter().map(|s| (s - max).exp()).collect();
    let sum: f32 = exps.iter().filter(|e| !e.is_nan()).sum();
    exps.into_iter().map(|e| e / sum).collect()
}

/// 最大スコアのインデックスとスコアを返す
///
/// ラベル順に走査し、厳密に大きい場合のみ更新するため、同点なら先に現れた方が選ばれます。
/// NaNは無視し、すべてNaN（または空）ならInferenceFailedを返します。
pub fn select_top(scores: &[f32]) -> Result<(usize, f32), ClassifierError> {
    let mut best: Option<(usize, f32)> = None;

    for (index, &score) in scores.iter().enumerate() {
        if score.is_nan() {
            continue;
        }
        match best {
            Some((_, best_score)) if score <= best_score => {}
            _ => best = Some((index, score)),
        }
    }

    best.ok_or_else(|| {
        ClassifierError::InferenceFailed("有効なスコアがありません".to_string())
    })
}

/// ラベルとスコアを対応付けて最大のものを返す
pub fn top_label<'a>(labels: &'a [String], scores: &[f32]) -> Result<(&'a str, f32), ClassifierError> {
    if labels.len() != scores.len() {
        return Err(ClassifierError::InferenceFailed(format!(
            "スコア数がラベル数と一致しません: {} (期待: {})",
            scores.len(),
            labels.len()
        )));
    }

    for (label, score) in labels.iter().zip(scores) {
        debug!("スコア label={}, score={}", label, score);
    }

    let (index, score) = select_top(scores)?;
    Ok((labels[index].as_str(), score))
}
