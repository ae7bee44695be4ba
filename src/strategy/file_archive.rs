use super::naming::archive_artifact_name;
use super::{Artifact, ArtifactRequest, BackupStrategy, SourceDescriptor, StrategyError};
use async_trait::async_trait;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Packs files and directories into a zip archive.
///
/// Each source path becomes a root entry named after its last component;
/// directories are added recursively.
#[derive(Default)]
pub struct FileArchive;

impl FileArchive {
    pub fn new() -> Self {
        Self
    }
}

fn entry_root(path: &Path) -> Result<String, StrategyError> {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .ok_or_else(|| StrategyError::Archive(format!("{:?} has no file name", path)))
}

fn write_archive(sources: &[PathBuf], target: &Path) -> Result<u64, StrategyError> {
    let file = File::create(target)?;
    let mut zip = ZipWriter::new(BufWriter::new(file));
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .large_file(true);

    let mut entries = 0u64;
    for source in sources {
        let metadata = std::fs::metadata(source).map_err(|e| {
            StrategyError::Io(std::io::Error::new(
                e.kind(),
                format!("{}: {}", source.display(), e),
            ))
        })?;
        let root = entry_root(source)?;

        if metadata.is_file() {
            zip.start_file(root.as_str(), options)?;
            std::io::copy(&mut File::open(source)?, &mut zip)?;
            entries += 1;
            continue;
        }

        for entry in WalkDir::new(source).sort_by_file_name() {
            let entry = entry.map_err(|e| StrategyError::Archive(e.to_string()))?;
            let relative = entry
                .path()
                .strip_prefix(source)
                .map_err(|e| StrategyError::Archive(e.to_string()))?;
            let mut name = root.clone();
            for component in relative.components() {
                name.push('/');
                name.push_str(&component.as_os_str().to_string_lossy());
            }

            if entry.file_type().is_dir() {
                zip.add_directory(name.as_str(), options)?;
            } else if entry.file_type().is_file() {
                zip.start_file(name.as_str(), options)?;
                std::io::copy(&mut File::open(entry.path())?, &mut zip)?;
            } else {
                debug!("Skipping special file {:?}", entry.path());
                continue;
            }
            entries += 1;
        }
    }

    let mut writer = zip.finish()?;
    writer.flush()?;
    Ok(entries)
}

#[async_trait]
impl BackupStrategy for FileArchive {
    fn name(&self) -> &'static str {
        "file_archive"
    }

    async fn produce_artifact(
        &self,
        source: &SourceDescriptor,
        request: &ArtifactRequest,
    ) -> Result<Artifact, StrategyError> {
        let (label, files) = match source {
            SourceDescriptor::Files(files) => ("files", files),
            SourceDescriptor::Config(files) => ("config", files),
            SourceDescriptor::Database(_) => {
                return Err(StrategyError::SourceMismatch {
                    strategy: self.name(),
                    source_kind: source.kind_name(),
                })
            }
        };

        let file_name =
            archive_artifact_name(request.task_id, &request.task_name, label, &request.version);
        let path = request.work_dir.join(&file_name);
        let sources: Vec<PathBuf> = files.paths.iter().map(PathBuf::from).collect();

        let target = path.clone();
        let entries = tokio::task::spawn_blocking(move || write_archive(&sources, &target))
            .await
            .map_err(|e| StrategyError::Archive(format!("archive task failed: {}", e)))??;

        let size = tokio::fs::metadata(&path).await?.len();
        info!(
            "Archived {} entries for task {} ({} bytes)",
            entries, request.task_id, size
        );

        Ok(Artifact {
            path,
            file_name,
            size,
        })
    }
}
