use crate::types::{NtlError, NtlResult};
use gdal::errors::CplErrType;
use std::path::{Path, PathBuf};

/// Entries that mark the repository root
pub const ROOT_MARKERS: [&str; 2] = ["Cargo.toml", "src"];

/// How many parent directories `find_repo_root` climbs by default
pub const DEFAULT_MAX_UP: usize = 8;

/// Route GDAL warnings (e.g. "not georeferenced") to debug logging instead
/// of stderr. Failures are still logged as errors.
pub fn suppress_warnings() {
    gdal::config::set_error_handler(|class, number, message| match class {
        CplErrType::Failure | CplErrType::Fatal => {
            log::error!("GDAL error {}: {}", number, message)
        }
        _ => log::debug!("GDAL {:?} {}: {}", class, number, message),
    });
}

/// Walk up from `start` (default: current directory) until a directory
/// containing every entry of `ROOT_MARKERS` is found.
pub fn find_repo_root(start: Option<&Path>, max_up: usize) -> NtlResult<PathBuf> {
    let start = match start {
        Some(p) => p.to_path_buf(),
        None => std::env::current_dir()?,
    };

    let mut current = Some(start.canonicalize()?);
    for _ in 0..max_up {
        let Some(dir) = current else { break };
        if ROOT_MARKERS.iter().all(|m| dir.join(m).exists()) {
            return Ok(dir);
        }
        current = dir.parent().map(Path::to_path_buf);
    }

    Err(NtlError::Config(format!(
        "Repository root not found (expected {:?} within {} levels of {})",
        ROOT_MARKERS,
        max_up,
        start.display()
    )))
}

/// Change the working directory to the repository root and return it
pub fn set_working_directory_to_repo_root() -> NtlResult<PathBuf> {
    let root = find_repo_root(None, DEFAULT_MAX_UP)?;
    std::env::set_current_dir(&root)?;
    log::debug!("Working directory set to {}", root.display());
    Ok(root)
}
