//! Where lorelens keeps its own data (config and the persisted vector store).

use std::path::PathBuf;

const STORE_DIRNAME: &str = "store";

/// Returns the directory where lorelens stores config and app data.
/// On Linux: `~/.local/share/lorelens/`.
/// Creates the directory if it doesn't exist; returns `None` if we can't determine the path.
pub fn app_data_dir() -> Option<PathBuf> {
    let dir = directories::ProjectDirs::from("app", "Lorelens", "lorelens")?
        .data_local_dir()
        .to_path_buf();
    std::fs::create_dir_all(&dir).ok()?;
    Some(dir)
}

/// Directory backing the file storage of the vector store.
pub fn store_dir() -> Option<PathBuf> {
    app_data_dir().map(|dir| dir.join(STORE_DIRNAME))
}
