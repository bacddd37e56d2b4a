use tpkv_replica::store::LocalStore;

use std::fs;
use std::io;

use anyhow::{ensure, Context as _, Result};
use camino::{Utf8Path, Utf8PathBuf};

/// File deployment flavor: one file per key under the node's data directory.
pub struct FileStore {
    dir: Utf8PathBuf,
}

impl FileStore {
    pub fn new(dir: &Utf8Path) -> Result<Self> {
        fs::create_dir_all(dir).with_context(|| format!("failed to create data dir {dir}"))?;
        Ok(Self { dir: dir.to_owned() })
    }

    /// Keys become file names directly, so path separators are refused.
    fn entry_path(&self, key: &str) -> Result<Utf8PathBuf> {
        ensure!(
            !key.is_empty() && !key.contains(['/', '\\']) && key != "." && key != "..",
            "invalid store key: {key:?}"
        );
        Ok(self.dir.join(key))
    }
}

impl LocalStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let path = self.entry_path(key)?;
        match fs::read_to_string(&path) {
            Ok(value) => Ok(Some(value)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err).with_context(|| format!("failed to read {path}")),
        }
    }

    fn put(&self, key: &str, value: &str) -> Result<()> {
        let path = self.entry_path(key)?;
        fs::write(&path, value).with_context(|| format!("failed to write {path}"))
    }

    fn delete(&self, key: &str) -> Result<bool> {
        let path = self.entry_path(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err).with_context(|| format!("failed to remove {path}")),
        }
    }

    fn list(&self) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        for entry in self.dir.read_dir_utf8()? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                keys.push(entry.file_name().to_owned());
            }
        }
        Ok(keys)
    }
}
