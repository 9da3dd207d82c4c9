//! コマンドライン引数の定義と実行

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use log::{info, warn};
use std::path::{Path, PathBuf};

use crate::commands;
use crate::model::{load_metadata, print_metadata_info, AppConfig, DeviceType, InferenceConfig};

/// 手書き数字の写真を分類する
#[derive(Debug, Parser)]
#[command(name = "digit_classifier", version, about)]
pub struct Cli {
    /// 設定ファイルのパス
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// モデルアセット (.tar.gz) のパス
    #[arg(long, global = true)]
    pub model: Option<PathBuf>,

    /// 推論スレッド数
    #[arg(long, global = true)]
    pub threads: Option<usize>,

    /// 計算デバイス
    #[arg(long, global = true, value_enum)]
    pub device: Option<DeviceArg>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum DeviceArg {
    Cpu,
    Wgpu,
}

impl From<DeviceArg> for DeviceType {
    fn from(arg: DeviceArg) -> Self {
        match arg {
            DeviceArg::Cpu => DeviceType::Cpu,
            DeviceArg::Wgpu => DeviceType::Wgpu,
        }
    }
}

/// 分類時の共通オプション
#[derive(Debug, Clone, clap::Args)]
pub struct ClassifyArgs {
    /// 撮影時の向き（度、90の倍数）
    #[arg(long, allow_hyphen_values = true)]
    pub orientation: Option<i32>,

    /// 二値化を有効にする
    #[arg(long)]
    pub binarize: bool,

    /// 二値化のしきい値
    #[arg(long)]
    pub threshold: Option<u8>,

    /// モデル入力画像の保存先
    #[arg(long)]
    pub preview: Option<PathBuf>,

    /// JSONで出力する
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// 画像ファイルを分類
    Classify {
        image: PathBuf,
        #[command(flatten)]
        args: ClassifyArgs,
    },
    /// 同梱テスト画像からランダムに1枚選んで分類
    Sample {
        #[command(flatten)]
        args: ClassifyArgs,
    },
    /// ディレクトリ内の画像をまとめて分類しCSVに出力
    Batch {
        dir: PathBuf,
        #[arg(long, default_value = "report.csv")]
        output: PathBuf,
        #[arg(long, allow_hyphen_values = true)]
        orientation: Option<i32>,
    },
    /// モデルアセットのメタデータを表示
    Inspect { model: Option<PathBuf> },
    /// 初期化重みのモデルアセットを作成（動作確認用）
    InitModel {
        #[arg(long)]
        out: PathBuf,
        #[arg(long, default_value_t = 1)]
        channels: u32,
        #[arg(long, default_value_t = 28)]
        size: u32,
    },
    /// 現在の設定を表示
    Config {
        /// 設定ファイルに保存する
        #[arg(long)]
        save: bool,
    },
}

impl Cli {
    /// 設定ファイルを読み込み、コマンドライン引数で上書きする
    fn resolve_config(&self) -> (PathBuf, AppConfig) {
        let path = self.config.clone().unwrap_or_else(AppConfig::default_path);
        let mut config = AppConfig::load_or_default_from(&path);
        if let Some(model) = &self.model {
            config.model.model_path = model.to_string_lossy().to_string();
        }
        if let Some(threads) = self.threads {
            config.model.num_threads = threads;
        }
        if let Some(device) = self.device {
            config.device_type = device.into();
        }
        (path, config)
    }
}

impl ClassifyArgs {
    fn apply(&self, config: &mut AppConfig) {
        if self.binarize {
            config.preprocess.binarize = true;
        }
        if let Some(threshold) = self.threshold {
            config.preprocess.threshold = threshold;
        }
        if let Some(orientation) = self.orientation {
            config.preprocess.orientation = orientation;
        }
    }
}

/// 1枚の画像を分類して結果を表示し、設定に最後の画像パスを記録する
fn classify_one(config_path: &Path, mut config: AppConfig, image: PathBuf, args: &ClassifyArgs) -> Result<()> {
    args.apply(&mut config);
    let mut classifier = commands::open_classifier(&config)?;
    let prediction = commands::classify_image(
        &mut classifier,
        &image,
        config.preprocess.orientation,
        args.preview.as_deref(),
    )?;
    classifier.close();
    commands::print_prediction(&image, &prediction, args.json)?;

    // 設定ファイルがある場合のみ更新
    if config_path.exists() {
        config.update_last_image_path(&image);
        if let Err(e) = config.save(config_path) {
            warn!("設定ファイルの保存に失敗しました: {}", e);
        }
    }
    Ok(())
}

/// 解析済みの引数でコマンドを実行
pub fn execute(cli: Cli) -> Result<()> {
    let (config_path, mut config) = cli.resolve_config();

    match cli.command {
        Command::Classify { image, args } => classify_one(&config_path, config, image, &args),
        Command::Sample { args } => {
            let image = commands::choose_sample(&config)?;
            classify_one(&config_path, config, image, &args)
        }
        Command::Batch { dir, output, orientation } => {
            if let Some(orientation) = orientation {
                config.preprocess.orientation = orientation;
            }
            let mut classifier = commands::open_classifier(&config)?;
            let classified = commands::classify_batch(
                &mut classifier,
                &dir,
                &output,
                config.preprocess.orientation,
            )?;
            println!("{}枚を分類しました: {}", classified, output.display());
            Ok(())
        }
        Command::Inspect { model } => {
            let path = model.unwrap_or_else(|| PathBuf::from(&config.model.model_path));
            let metadata = load_metadata(&path)?;
            print_metadata_info(&metadata);
            InferenceConfig::from_metadata(&metadata).print_info();
            Ok(())
        }
        Command::InitModel { out, channels, size } => {
            let path = commands::init_model_asset(&out, size, channels)?;
            println!("モデルアセットを作成しました: {}", path.display());
            Ok(())
        }
        Command::Config { save } => {
            config.display();
            if save {
                config.validate()?;
                config.save(&config_path)?;
                info!("設定ファイルを保存しました: {}", config_path.display());
            }
            Ok(())
        }
    }
}
