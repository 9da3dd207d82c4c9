//! モデルアセットの永続化
//!
//! Tar.gz形式でモデルとメタデータを1ファイルに統合して保存・読み込みします。
//!
//! ファイル構成（tar.gz内部）:
//! - metadata.json   - メタデータ（ラベル、入力形状、正規化方式）
//! - model.bin       - モデルの重み（バイナリ、内容には関知しない）

use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use log::info;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use tar::{Archive, Builder};

use crate::model::model_metadata::ModelMetadata;

const METADATA_ENTRY: &str = "metadata.json";
const MODEL_ENTRY: &str = "model.bin";

/// 保存先パスを .tar.gz に揃える
fn tar_gz_path(output_path: &Path) -> PathBuf {
    if output_path.extension().and_then(|s| s.to_str()) == Some("gz") {
        output_path.to_path_buf()
    } else {
        output_path.with_extension("tar.gz")
    }
}

fn append_entry<W: std::io::Write>(builder: &mut Builder<W>, name: &str, data: &[u8]) -> Result<()> {
    let mut header = tar::Header::new_gnu();
    header.set_path(name)?;
    header.set_size(data.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder
        .append(&header, data)
        .context(format!("Failed to add {} to tar", name))
}

/// メタデータと共にモデルをTar.gz形式で保存
///
/// 拡張子が .gz でなければ .tar.gz を付けます。実際に書き込んだパスを返します。
pub fn save_model_with_metadata(
    output_path: &Path,
    metadata: &ModelMetadata,
    model_binary: &[u8],
) -> Result<PathBuf> {
    let path = tar_gz_path(output_path);

    // 親ディレクトリが存在しない場合は作成
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .context(format!("Failed to create parent directory: {:?}", parent))?;
    }

    let file = File::create(&path).context(format!("Failed to create tar.gz file: {:?}", path))?;
    let encoder = GzEncoder::new(file, Compression::default());
    let mut builder = Builder::new(encoder);

    let json_str = metadata.to_json_string()?;
    append_entry(&mut builder, METADATA_ENTRY, json_str.as_bytes())?;
    append_entry(&mut builder, MODEL_ENTRY, model_binary)?;

    builder
        .into_inner()
        .context("Failed to finalize tar.gz archive")?
        .finish()
        .context("Failed to flush gzip stream")?;

    info!("モデルを保存しました: {} ({} bytes)", path.display(), model_binary.len());
    Ok(path)
}

/// アーカイブを走査し、指定したエントリを読み込む
///
/// `want_metadata` / `want_model` が false のエントリは読み飛ばします。
fn read_archive(
    tar_gz_path: &Path,
    want_metadata: bool,
    want_model: bool,
) -> Result<(Option<ModelMetadata>, Option<Vec<u8>>)> {
    let file = File::open(tar_gz_path)
        .context(format!("Failed to open tar.gz file: {:?}", tar_gz_path))?;
    let mut archive = Archive::new(GzDecoder::new(file));

    let mut metadata = None;
    let mut model_binary = None;

    for entry in archive.entries().context("Failed to read tar.gz archive")? {
        let mut entry = entry?;
        let name = entry.path()?.to_string_lossy().into_owned();

        match name.as_str() {
            METADATA_ENTRY if want_metadata => {
                let mut json_str = String::new();
                entry.read_to_string(&mut json_str)?;
                metadata = Some(ModelMetadata::from_json_string(&json_str)?);
            }
            MODEL_ENTRY if want_model => {
                let mut buffer = Vec::new();
                entry.read_to_end(&mut buffer)?;
                model_binary = Some(buffer);
            }
            _ => {}
        }

        if (!want_metadata || metadata.is_some()) && (!want_model || model_binary.is_some()) {
            break;
        }
    }

    Ok((metadata, model_binary))
}

/// Tar.gzからモデルメタデータを読み込む
pub fn load_metadata(tar_gz_path: &Path) -> Result<ModelMetadata> {
    read_archive(tar_gz_path, true, false)?
        .0
        .ok_or_else(|| anyhow::anyhow!("metadata.json not found in tar.gz archive"))
}

/// メタデータとモデルバイナリを共に読み込む
///
/// メタデータの整合性チェックも行います。
pub fn load_model_with_metadata(tar_gz_path: &Path) -> Result<(ModelMetadata, Vec<u8>)> {
    match read_archive(tar_gz_path, true, true)? {
        (Some(metadata), Some(binary)) => {
            metadata.validate().context("Invalid model metadata")?;
            info!("モデルファイルを読み込みました: {} bytes", binary.len());
            Ok((metadata, binary))
        }
        (None, _) => Err(anyhow::anyhow!("metadata.json not found in tar.gz archive")),
        (_, None) => Err(anyhow::anyhow!("model.bin not found in tar.gz archive")),
    }
}

/// メタデータをコンソールに表示
pub fn print_metadata_info(metadata: &ModelMetadata) {
    println!("\n=== モデルメタデータ ===");
    println!("アーキテクチャ: {}", metadata.architecture);
    println!("ラベル: {}", metadata.labels.join(", "));
    println!(
        "入力サイズ: {}x{} (チャネル {})",
        metadata.input_width, metadata.input_height, metadata.input_channels
    );
    println!("正規化: {}", metadata.normalization);
    println!("スコア後処理: {}", metadata.score_transform);
    println!("作成日時: {}", metadata.packed_at);
    println!("========================");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let metadata = ModelMetadata::digits(28, 1);
        let weights = vec![1u8, 2, 3, 4, 5];

        let path = save_model_with_metadata(&dir.path().join("digits"), &metadata, &weights).unwrap();
        assert!(path.to_string_lossy().ends_with("digits.tar.gz"));

        let (loaded_meta, loaded_weights) = load_model_with_metadata(&path).unwrap();
        assert_eq!(loaded_meta, metadata);
        assert_eq!(loaded_weights, weights);

        assert_eq!(load_metadata(&path).unwrap(), metadata);
    }

    #[test]
    fn test_creates_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("nested/models/digits.tar.gz");
        let path = save_model_with_metadata(&target, &ModelMetadata::digits(8, 3), &[0u8; 16]).unwrap();
        assert_eq!(path, target);
        assert!(path.exists());
    }

    #[test]
    fn test_missing_model_entry() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.tar.gz");

        // metadata.json だけのアーカイブを作る
        let file = File::create(&path).unwrap();
        let mut builder = Builder::new(GzEncoder::new(file, Compression::default()));
        let json = ModelMetadata::digits(28, 1).to_json_string().unwrap();
        append_entry(&mut builder, METADATA_ENTRY, json.as_bytes()).unwrap();
        builder.into_inner().unwrap().finish().unwrap();

        let err = load_model_with_metadata(&path).unwrap_err();
        assert!(err.to_string().contains("model.bin"));
        assert!(load_metadata(&path).is_ok());
    }

    #[test]
    fn test_missing_file() {
        let err = load_model_with_metadata(Path::new("no/such/model.tar.gz")).unwrap_err();
        assert!(format!("{:#}", err).contains("Failed to open tar.gz file"));
    }

    #[test]
    fn test_invalid_metadata_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut metadata = ModelMetadata::digits(28, 1);
        metadata.input_channels = 2;
        let path = save_model_with_metadata(&dir.path().join("bad.tar.gz"), &metadata, &[1]).unwrap();
        assert!(load_model_with_metadata(&path).is_err());
    }
}
