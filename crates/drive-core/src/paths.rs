use directories::ProjectDirs;
use std::path::PathBuf;

pub const APP_QUALIFIER: &str = "me";
pub const APP_ORG: &str = "proton";
pub const APP_NAME: &str = "protondrive-linux";

/// Overrides every directory with `<value>/{config,cache,data}`.
pub const HOME_OVERRIDE_ENV: &str = "DRIVE_CORE_HOME";

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from(APP_QUALIFIER, APP_ORG, APP_NAME)
}

pub fn home_override() -> Option<PathBuf> {
    std::env::var_os(HOME_OVERRIDE_ENV)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

pub fn config_dir() -> Option<PathBuf> {
    if let Some(home) = home_override() {
        return Some(home.join("config"));
    }
    project_dirs().map(|d| d.config_dir().to_path_buf())
}

pub fn cache_dir() -> Option<PathBuf> {
    if let Some(home) = home_override() {
        return Some(home.join("cache"));
    }
    project_dirs().map(|d| d.cache_dir().to_path_buf())
}

pub fn data_dir() -> Option<PathBuf> {
    if let Some(home) = home_override() {
        return Some(home.join("data"));
    }
    project_dirs().map(|d| d.data_dir().to_path_buf())
}
