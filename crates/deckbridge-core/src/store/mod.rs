pub mod bindings;

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use serde::Serialize;
use serde::de::DeserializeOwned;

pub(crate) fn write_atomic_bytes(path: &Path, contents: &[u8]) -> Result<(), anyhow::Error> {
    fs::create_dir_all(path.parent().unwrap())?;

    let temp_path = path.with_extension("json.temp");
    let backup_path = path.with_extension("json.bak");

    for p in [temp_path.as_path(), backup_path.as_path(), path] {
        if let Ok(meta) = fs::symlink_metadata(p) {
            if meta.file_type().is_symlink() {
                return Err(anyhow::anyhow!(
                    "refusing to write through symlink {}",
                    p.display()
                ));
            }
        }
    }

    // Write to temporary file
    let mut temp_file = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&temp_path)?;
    FileExt::lock_exclusive(&temp_file)?;
    temp_file.write_all(contents)?;
    temp_file.sync_all()?;
    FileExt::unlock(&temp_file)?;
    drop(temp_file);

    // If main file exists, back it up
    if path.exists() {
        fs::rename(path, &backup_path)?;
    }

    // Rename temp file to main file
    fs::rename(&temp_path, path)?;

    // Remove backup file if everything succeeded
    if backup_path.exists() {
        let _ = fs::remove_file(&backup_path);
    }

    Ok(())
}

/// Allows for easy persistence of values using JSON files
pub struct Store<T> {
    pub value: T,
    path: PathBuf,
}

impl<T> Store<T>
where
    T: Serialize + DeserializeOwned,
{
    fn validate_file_contents(path: &Path) -> Result<T, anyhow::Error> {
        if let Ok(meta) = fs::symlink_metadata(path) {
            if meta.file_type().is_symlink() {
                return Err(anyhow::anyhow!("refusing to read symlinked store file"));
            }
        }
        let file_contents = fs::read(path)?;
        Ok(serde_json::from_slice(&file_contents)?)
    }

    /// Create a new Store given an ID and storage directory, recovering from
    /// an interrupted write via the temp or backup file when needed.
    pub fn new(id: &str, config_dir: &Path, default: T) -> Result<Self, anyhow::Error> {
        let path = config_dir.join(format!("{}.json", id));
        let temp_path = path.with_extension("json.temp");
        let backup_path = path.with_extension("json.bak");

        if let Ok(value) = Self::validate_file_contents(&path) {
            let _ = fs::remove_file(&temp_path);
            let _ = fs::remove_file(&backup_path);
            Ok(Self { path, value })
        } else if let Ok(value) = Self::validate_file_contents(&temp_path) {
            fs::rename(&temp_path, &path)?;
            Ok(Self { path, value })
        } else if let Ok(value) = Self::validate_file_contents(&backup_path) {
            fs::rename(&backup_path, &path)?;
            Ok(Self { path, value })
        } else {
            Ok(Self {
                path,
                value: default,
            })
        }
    }

    /// Save the relevant Store as a file
    pub fn save(&self) -> Result<(), anyhow::Error> {
        let bytes = serde_json::to_vec(&self.value)?;
        write_atomic_bytes(&self.path, &bytes)
    }
}
