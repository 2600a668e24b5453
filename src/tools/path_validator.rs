use crate::component::video_compressor::{CompressorError, CompressorResult};
use anyhow::{Result, bail};
use std::fs::{self, File};
use std::path::Path;

pub fn validate_directory_exists(path: &Path) -> Result<()> {
    if !path.exists() {
        bail!("Path does not exist: {}", path.display());
    }
    if !path.is_dir() {
        bail!("Path is not a directory: {}", path.display());
    }
    Ok(())
}

/// Checks that `path` is an existing, readable regular file and returns its size.
pub fn validate_input_file(path: &Path) -> CompressorResult<u64> {
    let metadata = fs::metadata(path).map_err(|e| {
        CompressorError::InvalidInput(format!("{}: {e}", path.display()))
    })?;
    if !metadata.is_file() {
        return Err(CompressorError::InvalidInput(format!(
            "{} is not a regular file",
            path.display()
        )));
    }
    File::open(path).map_err(|e| {
        CompressorError::InvalidInput(format!("{} is not readable: {e}", path.display()))
    })?;
    Ok(metadata.len())
}

/// Creates the parent directory of `output` when it is missing.
pub fn ensure_output_parent(output: &Path) -> CompressorResult<()> {
    let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) else {
        return Ok(());
    };
    if parent.is_dir() {
        return Ok(());
    }
    fs::create_dir_all(parent).map_err(|e| {
        CompressorError::InvalidInput(format!(
            "cannot create output directory {}: {e}",
            parent.display()
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_validate_input_file() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("clip.mp4");
        fs::write(&file, vec![0u8; 128]).unwrap();

        assert_eq!(validate_input_file(&file).unwrap(), 128);
        assert!(matches!(
            validate_input_file(&dir.path().join("missing.mp4")),
            Err(CompressorError::InvalidInput(_))
        ));
        assert!(matches!(
            validate_input_file(dir.path()),
            Err(CompressorError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_ensure_output_parent_creates_directories() {
        let dir = tempdir().unwrap();
        let output = dir.path().join("a").join("b").join("out.webm");
        ensure_output_parent(&output).unwrap();
        assert!(dir.path().join("a").join("b").is_dir());
        ensure_output_parent(Path::new("out.webm")).unwrap();
    }

    #[test]
    fn test_validate_directory_exists() {
        let dir = tempdir().unwrap();
        assert!(validate_directory_exists(dir.path()).is_ok());
        assert!(validate_directory_exists(&dir.path().join("nope")).is_err());
    }
}
