use log::{debug, info};
use std::fs;
use std::path::{Path, PathBuf};

/// Interpreters tried in order when the configured one is missing.
const INTERPRETER_FALLBACKS: &[(&str, &str)] = &[("python3", "python")];

pub fn is_executable_file(path: &Path) -> bool {
    let metadata = match fs::metadata(path) {
        Ok(m) => m,
        Err(_) => return false,
    };

    if !metadata.is_file() {
        return false;
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if metadata.permissions().mode() & 0o111 == 0 {
            debug!("Skipping non-executable file: {}", path.display());
            return false;
        }
    }

    true
}

/// Resolves a launcher program: explicit paths are checked in place, bare
/// names are looked up on `PATH` with interpreter fallbacks.
pub fn resolve_executable(name: &str) -> Option<PathBuf> {
    if name.contains(std::path::MAIN_SEPARATOR) {
        let path = PathBuf::from(name);
        return is_executable_file(&path).then_some(path);
    }

    if let Ok(found) = which::which(name) {
        debug!("Resolved {name} to {}", found.display());
        return Some(found);
    }

    let fallback = INTERPRETER_FALLBACKS
        .iter()
        .find(|(primary, _)| *primary == name)
        .map(|(_, alt)| *alt)?;
    match which::which(fallback) {
        Ok(found) => {
            info!(
                "{name} not found on PATH, using {fallback} at {}",
                found.display()
            );
            Some(found)
        }
        Err(_) => None,
    }
}
