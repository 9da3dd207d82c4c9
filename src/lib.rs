pub mod error;
pub mod types;
pub mod image_source;

// 前処理・分類器・モデルアセット
pub mod preprocess;
pub mod classifier;
pub mod model;
#[cfg(feature = "ml")]
pub mod ml;

// CLI
pub mod commands;
#[cfg(feature = "ml")]
pub mod cli;

pub use classifier::{Classifier, ClassifierOptions, ModelRunner, ScoreTransform};
pub use error::ClassifierError;
pub use preprocess::{ImagePreprocessor, Normalization, PreprocessOptions};
pub use types::{Orientation, PreparedTensor, Prediction, TensorShape};

#[cfg(feature = "ml")]
pub fn run() {
    use clap::Parser;

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = cli::Cli::parse();
    if let Err(e) = cli::execute(cli) {
        log::error!("{:#}", e);
        eprintln!("✗ エラー: {:#}", e);
        std::process::exit(1);
    }
}

#[cfg(not(feature = "ml"))]
pub fn run() {
    eprintln!("✗ 推論機能が無効です。`ml` フィーチャーを有効にしてビルドしてください");
    std::process::exit(1);
}
