use std::path::{Path, PathBuf};

pub const DEFAULT_HTTP_PORT: u16 = 8080;

pub fn data_dir() -> PathBuf {
    // On macOS and Linux, use ~/.local/share/pilot/ (XDG standard)
    #[cfg(unix)]
    {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join(".local")
            .join("share")
            .join("pilot")
    }
    #[cfg(windows)]
    {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("pilot")
    }
}

pub fn config_dir() -> PathBuf {
    #[cfg(unix)]
    {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".config")
            .join("pilot")
    }

    #[cfg(windows)]
    {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("pilot")
    }
}

pub fn temp_dir() -> PathBuf {
    std::env::temp_dir()
}

/// Name of the user owning this process, used to locate the player's
/// control-bus address files (`/tmp/omxplayerdbus.<user>`).
pub fn current_user() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "root".to_string())
}

fn find_on_path(name: &str) -> Option<PathBuf> {
    let path = std::env::var("PATH").ok()?;
    #[cfg(unix)]
    let sep = ":";
    #[cfg(windows)]
    let sep = ";";
    for dir in path.split(sep) {
        let p = PathBuf::from(dir).join(name);
        if p.exists() {
            return Some(p);
        }
    }
    None
}

/// Resolve a configured binary.
///
/// Anything containing a path separator is taken as-is (if it exists);
/// bare names are looked up beside the current exe and then on PATH.
pub fn find_binary(name: &str) -> Option<PathBuf> {
    let as_path = Path::new(name);
    if as_path.components().count() > 1 {
        return as_path.exists().then(|| as_path.to_path_buf());
    }

    if let Ok(current_exe) = std::env::current_exe() {
        if let Some(dir) = current_exe.parent() {
            let local = dir.join(name);
            if local.exists() {
                return Some(local);
            }
        }
    }

    find_on_path(name)
}
