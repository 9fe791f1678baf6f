use std::{env, path::PathBuf};

use directories::ProjectDirs;

const PROJECT_ROOT: &str = env!("CARGO_MANIFEST_DIR");
const ASSET_DIR_ENV: &str = "SITEFORGE_ASSET_DIR";

/// Data directory holding the sqlite database and `config.json`.
///
/// `SITEFORGE_ASSET_DIR` wins when set. Debug builds fall back to
/// `dev_assets/` at the workspace root, release builds to the platform data dir.
pub fn asset_dir() -> PathBuf {
    let path = if let Ok(custom_dir) = env::var(ASSET_DIR_ENV) {
        PathBuf::from(custom_dir)
    } else if cfg!(debug_assertions) {
        PathBuf::from(PROJECT_ROOT).join("../../dev_assets")
    } else {
        match ProjectDirs::from("dev", "siteforge", "siteforge") {
            Some(dirs) => dirs.data_dir().to_path_buf(),
            None => {
                tracing::warn!("No home directory available, using ./siteforge_data");
                PathBuf::from("siteforge_data")
            }
        }
    };

    if !path.exists()
        && let Err(e) = std::fs::create_dir_all(&path)
    {
        tracing::error!("Failed to create asset directory {}: {}", path.display(), e);
    }

    path
}

pub fn config_path() -> PathBuf {
    asset_dir().join("config.json")
}

pub fn database_path() -> PathBuf {
    asset_dir().join("db.sqlite")
}
