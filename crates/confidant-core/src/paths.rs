use std::env;
use std::path::PathBuf;

/// Return the user's home directory path.
///
/// Uses HOME on Unix-like systems and USERPROFILE on Windows.
pub fn get_home_dir() -> Result<String, String> {
    if let Ok(home) = env::var("HOME") {
        if !home.is_empty() {
            return Ok(home);
        }
    }

    if let Ok(profile) = env::var("USERPROFILE") {
        if !profile.is_empty() {
            return Ok(profile);
        }
    }

    Err("Home directory not set".to_string())
}

/// Default directory for persisted collections: `{home}/.config/confidant`.
pub fn default_data_dir() -> Result<PathBuf, String> {
    get_home_dir().map(|home| PathBuf::from(home).join(".config").join("confidant"))
}
