use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use stack_core::build::ENTRY_POINT_NAME;
use stack_core::error::BuildError;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

const EXECUTABLE_MODE: u32 = 0o755;
const REGULAR_MODE: u32 = 0o644;

/// Zips every file under `source_dir` into `zip_path`.
///
/// Entries are written in sorted order with paths relative to `source_dir`.
/// The entry point is marked executable. The archive is written next to its
/// destination and renamed into place, so a failed packaging run never leaves
/// a truncated zip behind.
pub fn package_directory(source_dir: &Path, zip_path: &Path) -> Result<(), BuildError> {
    if !source_dir.join(ENTRY_POINT_NAME).is_file() {
        return Err(BuildError::MissingOutput(
            source_dir.join(ENTRY_POINT_NAME).display().to_string(),
        ));
    }

    let mut files = Vec::new();
    collect_files(source_dir, &mut files)?;
    files.sort();

    if let Some(parent) = zip_path.parent() {
        fs::create_dir_all(parent)?;
    }
    let partial = zip_path.with_extension("zip.partial");
    write_archive(source_dir, &files, &partial).inspect_err(|_| {
        let _ = fs::remove_file(&partial);
    })?;
    fs::rename(&partial, zip_path)?;

    tracing::debug!(
        archive = %zip_path.display(),
        entries = files.len(),
        "packaged deployment archive"
    );
    Ok(())
}

fn write_archive(source_dir: &Path, files: &[PathBuf], zip_path: &Path) -> Result<(), BuildError> {
    let file = fs::File::create(zip_path)?;
    let mut zip = ZipWriter::new(file);

    for path in files {
        let relative = path.strip_prefix(source_dir).unwrap_or(path);
        let entry_name = relative
            .components()
            .map(|component| component.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        let mode = if entry_name == ENTRY_POINT_NAME {
            EXECUTABLE_MODE
        } else {
            REGULAR_MODE
        };
        let options = FileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .unix_permissions(mode);

        let contents = fs::read(path)?;
        zip.start_file(entry_name.as_str(), options)
            .map_err(|error| BuildError::Packaging(format!("{entry_name}: {error}")))?;
        zip.write_all(&contents)?;
    }

    zip.finish()
        .map_err(|error| BuildError::Packaging(error.to_string()))?;
    Ok(())
}

fn collect_files(dir: &Path, files: &mut Vec<PathBuf>) -> Result<(), BuildError> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        let path = entry.path();
        if file_type.is_dir() {
            collect_files(&path, files)?;
        } else if file_type.is_file() || path.is_file() {
            // Symlinked directories are not followed.
            files.push(path);
        }
    }
    Ok(())
}
