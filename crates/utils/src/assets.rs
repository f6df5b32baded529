use std::path::PathBuf;

use directories::ProjectDirs;

const PROJECT_ROOT: &str = env!("CARGO_MANIFEST_DIR");

/// Directory holding the board database and other local state.
///
/// Debug builds keep everything under `dev_assets/` in the workspace so test runs
/// never touch real data.
pub fn asset_dir() -> PathBuf {
    if cfg!(debug_assertions) {
        return PathBuf::from(PROJECT_ROOT).join("../../dev_assets");
    }

    ProjectDirs::from("dev", "taskboard", "taskboard")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."))
    // ✔ macOS → ~/Library/Application Support/dev.taskboard.taskboard
    // ✔ Linux → ~/.local/share/taskboard   (respects XDG_DATA_HOME)
    // ✔ Windows → %APPDATA%\taskboard\taskboard
}

/// Get the database file path.
///
/// Respects the `TASKBOARD_DATABASE_PATH` environment variable for custom locations.
/// Supports tilde expansion (e.g., `~/taskboard/boards.sqlite`).
///
/// Default: `{asset_dir}/boards.sqlite`
pub fn database_path() -> PathBuf {
    if let Ok(path) = std::env::var("TASKBOARD_DATABASE_PATH") {
        return crate::path::expand_tilde(&path);
    }
    asset_dir().join("boards.sqlite")
}
