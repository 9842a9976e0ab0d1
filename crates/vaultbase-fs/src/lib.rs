//! Filesystem helpers shared by the vaultbase crates.
//!
//! Everything that touches key files, credential files or the encrypted
//! container goes through here:
//! - atomic replacement (temp file in the same directory, `sync_all`, rename)
//! - owner-only permissions on secrets
//! - best-effort "hidden" marking on platforms that have such an attribute
//! - removal that tolerates missing files and slow lock release

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use tempfile::NamedTempFile;

#[derive(Debug)]
pub enum AtomicWriteError<E> {
    Io(io::Error),
    Writer(E),
}

impl<E> From<io::Error> for AtomicWriteError<E> {
    fn from(err: io::Error) -> Self {
        Self::Io(err)
    }
}

impl<E: std::fmt::Display> std::fmt::Display for AtomicWriteError<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AtomicWriteError::Io(err) => write!(f, "io error: {err}"),
            AtomicWriteError::Writer(err) => write!(f, "write error: {err}"),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for AtomicWriteError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AtomicWriteError::Io(err) => Some(err),
            AtomicWriteError::Writer(err) => Some(err),
        }
    }
}

fn parent_dir_or_dot(path: &Path) -> &Path {
    // `Path::parent` is `Some("")` for bare names like `auth.json`.
    path.parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
}

/// Atomically replace `dest` with whatever `write_fn` writes.
///
/// The temp file lives next to `dest`, is flushed and synced, then renamed over
/// the destination. If `write_fn` fails, `dest` is untouched and the temp file
/// is removed.
pub fn atomic_write<T, E>(
    dest: impl AsRef<Path>,
    write_fn: impl FnOnce(&mut File) -> Result<T, E>,
) -> Result<T, AtomicWriteError<E>> {
    let dest = dest.as_ref();
    let dir = parent_dir_or_dot(dest);
    fs::create_dir_all(dir)?;

    let mut tmp = NamedTempFile::new_in(dir)?;
    let out = write_fn(tmp.as_file_mut()).map_err(AtomicWriteError::Writer)?;

    tmp.as_file_mut().flush()?;
    tmp.as_file().sync_all()?;

    let tmp_path = tmp.into_temp_path();
    replace_file(tmp_path.as_ref(), dest)?;

    // The file is already in place; a failed directory sync is not a write failure.
    let _ = sync_parent_dir(dest);

    Ok(out)
}

/// Atomically write a full byte slice to `dest`.
pub fn atomic_write_bytes(dest: impl AsRef<Path>, bytes: &[u8]) -> io::Result<()> {
    atomic_write(dest, |file| file.write_all(bytes)).map_err(|err| match err {
        AtomicWriteError::Io(err) => err,
        AtomicWriteError::Writer(err) => err,
    })
}

/// Atomically write `bytes` as a secret: owner-only permissions, then hidden.
///
/// Permission and attribute changes are best-effort; only the write itself can fail.
pub fn write_secret_file(dest: impl AsRef<Path>, bytes: &[u8]) -> io::Result<()> {
    let dest = dest.as_ref();
    atomic_write_bytes(dest, bytes)?;
    if let Err(err) = restrict_to_owner(dest) {
        log::debug!("could not restrict permissions on {}: {err}", dest.display());
    }
    set_hidden(dest);
    Ok(())
}

fn sync_parent_dir(path: &Path) -> io::Result<()> {
    let dir = File::open(parent_dir_or_dot(path))?;
    dir.sync_all()
}

fn replace_file(from: &Path, to: &Path) -> io::Result<()> {
    #[cfg(windows)]
    {
        use windows_sys::Win32::Storage::FileSystem::{MoveFileExW, MOVEFILE_REPLACE_EXISTING};

        // MoveFileExW refuses to replace a hidden/system destination.
        clear_hidden(to);

        let from_w = to_wide_null(from);
        let to_w = to_wide_null(to);
        let ok = unsafe { MoveFileExW(from_w.as_ptr(), to_w.as_ptr(), MOVEFILE_REPLACE_EXISTING) };
        if ok == 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    #[cfg(not(windows))]
    {
        fs::rename(from, to)
    }
}

#[cfg(windows)]
fn to_wide_null(path: &Path) -> Vec<u16> {
    use std::os::windows::ffi::OsStrExt as _;

    let mut wide: Vec<u16> = path.as_os_str().encode_wide().collect();
    wide.push(0);
    wide
}

/// Restrict `path` to owner read/write (`0600`). No-op on non-Unix platforms.
pub fn restrict_to_owner(path: &Path) -> io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))
    }

    #[cfg(not(unix))]
    {
        let _ = path;
        Ok(())
    }
}

/// Mark `path` hidden from casual directory browsing.
///
/// Only Windows has a hidden attribute; elsewhere this returns `false`. This is a
/// UX nicety, never a security boundary, and it never fails.
pub fn set_hidden(path: &Path) -> bool {
    #[cfg(windows)]
    {
        use windows_sys::Win32::Storage::FileSystem::{SetFileAttributesW, FILE_ATTRIBUTE_HIDDEN};

        let wide = to_wide_null(path);
        // Hidden only: adding SYSTEM would make later overwrites require elevation.
        unsafe { SetFileAttributesW(wide.as_ptr(), FILE_ATTRIBUTE_HIDDEN) != 0 }
    }

    #[cfg(not(windows))]
    {
        let _ = path;
        false
    }
}

/// Reset the attributes set by [`set_hidden`] so the file can be replaced.
pub fn clear_hidden(path: &Path) -> bool {
    #[cfg(windows)]
    {
        use windows_sys::Win32::Storage::FileSystem::{SetFileAttributesW, FILE_ATTRIBUTE_NORMAL};

        if !path.exists() {
            return false;
        }
        let wide = to_wide_null(path);
        unsafe { SetFileAttributesW(wide.as_ptr(), FILE_ATTRIBUTE_NORMAL) != 0 }
    }

    #[cfg(not(windows))]
    {
        let _ = path;
        false
    }
}

/// Remove `path`, treating a missing file as success.
///
/// Returns whether a file was actually removed.
pub fn remove_if_exists(path: &Path) -> io::Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err),
    }
}

/// Remove `path`, retrying while the OS is still releasing locks on it.
pub fn remove_with_retry(path: &Path, attempts: u32, delay: Duration) -> io::Result<bool> {
    let attempts = attempts.max(1);
    let mut last_err = None;
    for attempt in 0..attempts {
        match remove_if_exists(path) {
            Ok(removed) => return Ok(removed),
            Err(err) => {
                log::debug!(
                    "remove {} failed (attempt {}/{attempts}): {err}",
                    path.display(),
                    attempt + 1
                );
                last_err = Some(err);
                if attempt + 1 < attempts {
                    thread::sleep(delay);
                }
            }
        }
    }
    Err(last_err.unwrap_or_else(|| io::Error::new(io::ErrorKind::Other, "remove failed")))
}

/// Build `<path><suffix>` in the same directory, e.g. `work.db` + `-wal`.
pub fn sibling_path_with_suffix(path: impl AsRef<Path>, suffix: &str) -> PathBuf {
    let path = path.as_ref();
    let dir = parent_dir_or_dot(path);
    let file_name = path.file_name().unwrap_or_default();
    dir.join(format!("{}{}", file_name.to_string_lossy(), suffix))
}
