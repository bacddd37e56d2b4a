//! the local `ClientFiles` directory used by upload/download

use std::env;
use std::fs;

use anyhow::{Context as _, Result};
use camino::{Utf8Path, Utf8PathBuf};

/// Resolves (and creates on first use) the `ClientFiles` directory under the
/// current working directory.
pub fn client_files_dir() -> Result<Utf8PathBuf> {
    let cwd = env::current_dir()?;
    let cwd = Utf8PathBuf::from_path_buf(cwd).map_err(|p| {
        anyhow::anyhow!("current dir is not valid utf-8: {}", p.display())
    })?;
    let dir = cwd.join("ClientFiles");
    fs::create_dir_all(&dir).with_context(|| format!("failed to create {dir}"))?;
    Ok(dir)
}

pub fn read_local_file(dir: &Utf8Path, name: &str) -> Result<String> {
    let path = dir.join(format!("{name}.txt"));
    fs::read_to_string(&path).with_context(|| format!("failed to read {path}"))
}

pub fn write_local_file(dir: &Utf8Path, name: &str, contents: &str) -> Result<()> {
    let path = dir.join(format!("{name}.txt"));
    fs::write(&path, contents).with_context(|| format!("failed to write {path}"))
}
