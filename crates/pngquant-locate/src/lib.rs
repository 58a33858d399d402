//! # pngquant-locate
//!
//! Find the [pngquant](https://pngquant.org/) executable at runtime so that
//! callers of the lossy-compression step never have to hard-code where the
//! tool was installed.
//!
//! ## How it works
//!
//! On first call to [`locate_pngquant`]:
//!
//! 1. If `PNGQUANT_PATH` is set and points to an executable file, that path wins.
//! 2. Otherwise every directory on `PATH` is searched for the platform
//!    executable name (`pngquant`, or `pngquant.exe` on Windows). On Unix a
//!    match must also carry an execute bit.
//! 3. The resolved path is cached for the lifetime of the process.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use pngquant_locate::{locate_pngquant, pngquant_version};
//!
//! let path = locate_pngquant().expect("pngquant is not installed");
//! let version = pngquant_version(&path).expect("pngquant --version failed");
//! println!("using pngquant {version} at {}", path.display());
//! ```
//!
//! ## Environment variable overrides
//!
//! - `PNGQUANT_PATH`: path to a specific pngquant binary; skips the `PATH` search.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::OnceLock;

use thiserror::Error;

// ── Public constants ─────────────────────────────────────────────────────────

/// Environment variable naming an explicit pngquant binary.
pub const PNGQUANT_PATH_ENV: &str = "PNGQUANT_PATH";

/// Executable file name searched for on `PATH`.
#[cfg(windows)]
pub const PNGQUANT_EXE: &str = "pngquant.exe";
/// Executable file name searched for on `PATH`.
#[cfg(not(windows))]
pub const PNGQUANT_EXE: &str = "pngquant";

// ── Error type ───────────────────────────────────────────────────────────────

/// Errors returned by pngquant-locate operations.
#[derive(Error, Debug)]
pub enum LocateError {
    /// No pngquant binary on `PATH` and no usable `PNGQUANT_PATH`.
    #[error(
        "pngquant not found (searched {searched} directories on PATH)\n\
Install it (e.g. `brew install pngquant` / `apt install pngquant`)\n\
or set PNGQUANT_PATH=/path/to/pngquant."
    )]
    NotFound { searched: usize },

    /// Running `pngquant --version` failed.
    #[error("Failed to probe pngquant at '{path}': {reason}")]
    Probe { path: PathBuf, reason: String },
}

// ── Thread-safe singleton path cache ─────────────────────────────────────────

static RESOLVED_PATH: OnceLock<PathBuf> = OnceLock::new();

// ── Public API ───────────────────────────────────────────────────────────────

/// Returns the path to the pngquant executable.
///
/// - If `PNGQUANT_PATH` is set (and names an executable file), that path is used.
/// - Otherwise searches each directory of `PATH`.
///
/// # Thread safety
///
/// Safe to call from multiple threads simultaneously; whichever thread
/// resolves first populates the cache and later calls return it unchanged.
pub fn locate_pngquant() -> Result<PathBuf, LocateError> {
    if let Some(path) = RESOLVED_PATH.get() {
        return Ok(path.clone());
    }

    let path = resolve(
        std::env::var_os(PNGQUANT_PATH_ENV).as_deref(),
        std::env::var_os("PATH").as_deref(),
    )?;

    Ok(RESOLVED_PATH.get_or_init(|| path).clone())
}

/// Returns `true` when [`locate_pngquant`] would succeed.
pub fn is_pngquant_available() -> bool {
    locate_pngquant().is_ok()
}

/// Searches a `PATH`-style list of directories for an executable `exe_name`.
pub fn find_in_path(exe_name: &str, path_var: &OsStr) -> Option<PathBuf> {
    std::env::split_paths(path_var)
        .map(|dir| dir.join(exe_name))
        .find(|candidate| is_executable(candidate))
}

/// Runs `<path> --version` and returns the trimmed version string.
pub fn pngquant_version(path: &Path) -> Result<String, LocateError> {
    let output = Command::new(path)
        .arg("--version")
        .output()
        .map_err(|e| LocateError::Probe {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

    if !output.status.success() {
        return Err(LocateError::Probe {
            path: path.to_path_buf(),
            reason: format!("exited with {}", output.status),
        });
    }

    let version = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if version.is_empty() {
        return Err(LocateError::Probe {
            path: path.to_path_buf(),
            reason: "empty version output".into(),
        });
    }
    Ok(version)
}

// ── Internal helpers ─────────────────────────────────────────────────────────

fn resolve(
    override_path: Option<&OsStr>,
    path_var: Option<&OsStr>,
) -> Result<PathBuf, LocateError> {
    // 1. Environment variable override.
    if let Some(p) = override_path.filter(|p| !p.is_empty()) {
        let p = PathBuf::from(p);
        if is_executable(&p) {
            return Ok(p);
        }
        // Fall through: override set but unusable → still search PATH.
        eprintln!(
            "pngquant-locate: {PNGQUANT_PATH_ENV} '{}' is not an executable file; searching PATH …",
            p.display()
        );
    }

    // 2. PATH search.
    let path_var = path_var.unwrap_or_default();
    find_in_path(PNGQUANT_EXE, path_var).ok_or_else(|| LocateError::NotFound {
        searched: std::env::split_paths(path_var).count(),
    })
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::OsString;
    use tempfile::TempDir;

    fn fake_exe(dir: &Path) -> PathBuf {
        let p = dir.join(PNGQUANT_EXE);
        std::fs::write(&p, b"#!/bin/sh\n").unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&p, std::fs::Permissions::from_mode(0o755)).unwrap();
        }
        p
    }

    #[test]
    fn finds_executable_in_second_path_entry() {
        let empty = TempDir::new().unwrap();
        let bin = TempDir::new().unwrap();
        let exe = fake_exe(bin.path());

        let path_var = std::env::join_paths([empty.path(), bin.path()]).unwrap();
        assert_eq!(find_in_path(PNGQUANT_EXE, &path_var), Some(exe));
    }

    #[cfg(unix)]
    #[test]
    fn skips_files_without_execute_bit() {
        use std::os::unix::fs::PermissionsExt;

        let plain = TempDir::new().unwrap();
        let bin = TempDir::new().unwrap();
        let not_exe = plain.path().join(PNGQUANT_EXE);
        std::fs::write(&not_exe, b"not a program").unwrap();
        std::fs::set_permissions(&not_exe, std::fs::Permissions::from_mode(0o644)).unwrap();
        let exe = fake_exe(bin.path());

        let path_var = std::env::join_paths([plain.path(), bin.path()]).unwrap();
        assert_eq!(find_in_path(PNGQUANT_EXE, &path_var), Some(exe.clone()));

        // A non-executable override is ignored the same way.
        let resolved = resolve(Some(not_exe.as_os_str()), Some(&path_var)).unwrap();
        assert_eq!(resolved, exe);

        let only_plain = std::env::join_paths([plain.path()]).unwrap();
        assert_eq!(find_in_path(PNGQUANT_EXE, &only_plain), None);
    }

    #[test]
    fn directory_named_like_the_binary_is_skipped() {
        let decoy = TempDir::new().unwrap();
        std::fs::create_dir(decoy.path().join(PNGQUANT_EXE)).unwrap();
        let path_var = std::env::join_paths([decoy.path()]).unwrap();
        assert_eq!(find_in_path(PNGQUANT_EXE, &path_var), None);
    }

    #[test]
    fn override_wins_over_path() {
        let over = TempDir::new().unwrap();
        let on_path = TempDir::new().unwrap();
        let exe = fake_exe(over.path());
        fake_exe(on_path.path());

        let path_var = std::env::join_paths([on_path.path()]).unwrap();
        let resolved = resolve(Some(exe.as_os_str()), Some(&path_var)).unwrap();
        assert_eq!(resolved, exe);
    }

    #[test]
    fn missing_override_falls_back_to_path() {
        let on_path = TempDir::new().unwrap();
        let exe = fake_exe(on_path.path());

        let bogus = OsString::from("/definitely/not/here/pngquant");
        let path_var = std::env::join_paths([on_path.path()]).unwrap();
        let resolved = resolve(Some(&bogus), Some(&path_var)).unwrap();
        assert_eq!(resolved, exe);
    }

    #[test]
    fn not_found_reports_searched_count() {
        let a = TempDir::new().unwrap();
        let b = TempDir::new().unwrap();
        let path_var = std::env::join_paths([a.path(), b.path()]).unwrap();
        match resolve(None, Some(&path_var)) {
            Err(LocateError::NotFound { searched }) => assert_eq!(searched, 2),
            other => panic!("expected NotFound, got {other:?}"),
        }
    }

    #[test]
    fn availability_matches_locate() {
        assert_eq!(is_pngquant_available(), locate_pngquant().is_ok());
    }

    #[test]
    fn version_of_missing_binary_fails() {
        let err = pngquant_version(Path::new("/definitely/not/here/pngquant")).unwrap_err();
        assert!(err.to_string().contains("/definitely/not/here/pngquant"));
    }
}
