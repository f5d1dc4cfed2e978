use std::fs::File;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::info;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Zip `src` (a directory) into a fresh archive under the system temp dir,
/// returning the archive path. Compression runs on the blocking pool.
pub async fn zip_dir(src: &Path) -> Result<PathBuf> {
    let src = src.to_path_buf();
    let stem = src
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "archive".to_string());
    let dest = std::env::temp_dir().join(format!(
        "{} {}.zip",
        stem,
        chrono::Utc::now().format("%Y%m%d-%H%M%S")
    ));

    let out = dest.clone();
    tokio::task::spawn_blocking(move || zip_dir_blocking(&src, &out))
        .await
        .context("Archive task panicked")??;

    info!("Created archive {}", dest.display());
    Ok(dest)
}

fn zip_dir_blocking(src: &Path, dest: &Path) -> Result<()> {
    let file = File::create(dest)
        .with_context(|| format!("Failed to create archive: {}", dest.display()))?;
    let mut writer = ZipWriter::new(file);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    let mut stack = vec![src.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let entries = std::fs::read_dir(&dir)
            .with_context(|| format!("Failed to list directory: {}", dir.display()))?;
        for entry in entries {
            let entry = entry.with_context(|| format!("Failed to read entry in {}", dir.display()))?;
            let path = entry.path();
            let rel = path
                .strip_prefix(src)
                .context("Entry escaped the archive root")?
                .to_string_lossy()
                .replace('\\', "/");

            if path.is_dir() {
                writer
                    .add_directory(rel, options)
                    .context("Failed to add directory to archive")?;
                stack.push(path);
            } else {
                writer
                    .start_file(rel, options)
                    .context("Failed to start archive entry")?;
                let mut input = File::open(&path)
                    .with_context(|| format!("Failed to open file: {}", path.display()))?;
                std::io::copy(&mut input, &mut writer)
                    .with_context(|| format!("Failed to compress: {}", path.display()))?;
            }
        }
    }

    writer.finish().context("Failed to finalize archive")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn archives_nested_tree() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("A - @alice - 555");
        std::fs::create_dir_all(root.join("sub")).unwrap();
        std::fs::write(root.join("one.jpg"), b"jpeg bytes").unwrap();
        std::fs::write(root.join("sub/two.mp4"), b"video bytes").unwrap();

        let archive_path = zip_dir(&root).await.unwrap();
        assert!(archive_path.exists());

        let file = File::open(&archive_path).unwrap();
        let mut archive = zip::ZipArchive::new(file).unwrap();
        let names: Vec<String> = (0..archive.len())
            .map(|i| archive.by_index(i).unwrap().name().to_string())
            .collect();
        assert!(names.iter().any(|n| n == "one.jpg"));
        assert!(names.iter().any(|n| n == "sub/two.mp4"));

        std::fs::remove_file(archive_path).unwrap();
    }

    #[tokio::test]
    async fn missing_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        assert!(zip_dir(&missing).await.is_err());
    }
}
