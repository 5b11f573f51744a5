//! Byte-level file primitives.
//!
//! Every operation reports failure through its return value and a log event;
//! nothing here panics or returns an error to the caller.

use std::collections::BTreeSet;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use tb_common::{Error, Result};

use super::lock::{FileLock, LockMode};
use crate::logging::{event_names, MAINTAINER};
use crate::orchestrator::batch::METADATA_SUFFIX;

/// File primitives used by the orchestrators, writers and migrations.
pub trait FileHandler: Send + Sync {
    /// Append `data` to `file`, prefixed by `separator` when the file already
    /// holds data. Creates the file if missing.
    fn append(&self, file: &Path, data: &[u8], separator: Option<&[u8]>) -> bool;

    /// Replace the content of `file` atomically (temp file then rename).
    fn overwrite(&self, file: &Path, data: &[u8]) -> bool;

    /// Read `file` framed by `prefix` and `suffix`; empty on failure.
    fn read(&self, file: &Path, prefix: &[u8], suffix: &[u8]) -> Vec<u8>;

    /// Delete a file or a directory tree.
    fn delete(&self, target: &Path) -> bool;

    /// Move every entry of `source_dir` into `dest_dir`. Existing entries of
    /// `dest_dir` are never overwritten: a clashing entry is moved under a
    /// free name, together with its `_metadata` sidecar.
    fn move_all(&self, source_dir: &Path, dest_dir: &Path) -> bool;
}

/// [`FileHandler`] over the local filesystem with advisory locks.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainFileHandler;

impl PlainFileHandler {
    pub fn new() -> Self {
        PlainFileHandler
    }

    fn try_append(&self, file: &Path, data: &[u8], separator: Option<&[u8]>) -> Result<()> {
        let handle = OpenOptions::new().create(true).append(true).open(file)?;
        let _lock = FileLock::acquire(&handle, LockMode::Exclusive)?;

        // Length is checked under the lock so two appenders agree on it.
        let existing = handle.metadata()?.len();
        let separator = separator.filter(|_| existing > 0).unwrap_or_default();

        let mut buffer = Vec::with_capacity(separator.len() + data.len());
        buffer.extend_from_slice(separator);
        buffer.extend_from_slice(data);
        (&handle).write_all(&buffer)?;
        (&handle).flush()?;
        Ok(())
    }

    fn try_overwrite(&self, file: &Path, data: &[u8]) -> Result<()> {
        let temp = temp_path(file);
        {
            let mut handle = File::create(&temp)?;
            handle.write_all(data)?;
            handle.sync_all()?;
        }
        if let Err(e) = fs::rename(&temp, file) {
            let _ = fs::remove_file(&temp);
            return Err(e.into());
        }
        Ok(())
    }

    fn try_read(&self, file: &Path, prefix: &[u8], suffix: &[u8]) -> Result<Vec<u8>> {
        let handle = File::open(file)?;
        let _lock = FileLock::acquire(&handle, LockMode::Shared)?;

        let len = handle.metadata()?.len() as usize;
        let mut buffer = Vec::with_capacity(prefix.len() + len + suffix.len());
        buffer.extend_from_slice(prefix);
        (&handle).read_to_end(&mut buffer)?;
        buffer.extend_from_slice(suffix);
        Ok(buffer)
    }

    fn try_delete(&self, target: &Path) -> Result<()> {
        let metadata = fs::symlink_metadata(target)?;
        if metadata.is_dir() {
            fs::remove_dir_all(target)?;
        } else {
            fs::remove_file(target)?;
        }
        Ok(())
    }

    fn prepare_move(&self, source_dir: &Path, dest_dir: &Path) -> Result<bool> {
        if !source_dir.exists() {
            return Ok(false);
        }
        if !source_dir.is_dir() {
            return Err(Error::NotADirectory {
                path: source_dir.to_path_buf(),
            });
        }
        if !dest_dir.exists() {
            fs::create_dir_all(dest_dir)?;
        } else if !dest_dir.is_dir() {
            return Err(Error::NotADirectory {
                path: dest_dir.to_path_buf(),
            });
        }
        Ok(true)
    }
}

impl FileHandler for PlainFileHandler {
    fn append(&self, file: &Path, data: &[u8], separator: Option<&[u8]>) -> bool {
        match self.try_append(file, data, separator) {
            Ok(()) => true,
            Err(e) => {
                internal_log!(
                    ERROR,
                    MAINTAINER,
                    event_names::FILE_APPEND_FAILED,
                    path = %file.display(),
                    error = %e,
                    "Unable to append data to file"
                );
                false
            }
        }
    }

    fn overwrite(&self, file: &Path, data: &[u8]) -> bool {
        match self.try_overwrite(file, data) {
            Ok(()) => true,
            Err(e) => {
                internal_log!(
                    ERROR,
                    MAINTAINER,
                    event_names::FILE_WRITE_FAILED,
                    path = %file.display(),
                    error = %e,
                    "Unable to write file"
                );
                false
            }
        }
    }

    fn read(&self, file: &Path, prefix: &[u8], suffix: &[u8]) -> Vec<u8> {
        match self.try_read(file, prefix, suffix) {
            Ok(buffer) => buffer,
            Err(e) => {
                internal_log!(
                    ERROR,
                    MAINTAINER,
                    event_names::FILE_READ_FAILED,
                    path = %file.display(),
                    error = %e,
                    "Unable to read file"
                );
                Vec::new()
            }
        }
    }

    fn delete(&self, target: &Path) -> bool {
        match self.try_delete(target) {
            Ok(()) => true,
            Err(e) => {
                internal_log!(
                    ERROR,
                    MAINTAINER,
                    event_names::FILE_DELETE_FAILED,
                    path = %target.display(),
                    error = %e,
                    "Unable to delete file"
                );
                false
            }
        }
    }

    fn move_all(&self, source_dir: &Path, dest_dir: &Path) -> bool {
        match self.prepare_move(source_dir, dest_dir) {
            Ok(true) => {}
            Ok(false) => {
                internal_log!(
                    INFO,
                    MAINTAINER,
                    event_names::FILE_MOVE_SKIPPED,
                    source = %source_dir.display(),
                    "Nothing to move, source directory does not exist"
                );
                return true;
            }
            Err(e) => {
                internal_log!(
                    ERROR,
                    MAINTAINER,
                    event_names::FILE_MOVE_FAILED,
                    source = %source_dir.display(),
                    destination = %dest_dir.display(),
                    error = %e,
                    "Unable to move files"
                );
                return false;
            }
        }

        let (names, unnamed) = match list_names(source_dir) {
            Ok(listing) => listing,
            Err(e) => {
                internal_log!(
                    ERROR,
                    MAINTAINER,
                    event_names::FILE_MOVE_FAILED,
                    source = %source_dir.display(),
                    error = %e,
                    "Unable to list source directory"
                );
                return false;
            }
        };

        let mut all_moved = unnamed == 0;
        for name in &names {
            // Sidecars travel with their batch file.
            if sidecar_owner(name).is_some_and(|owner| names.contains(owner)) {
                continue;
            }
            let sidecar = format!("{}{}", name, METADATA_SUFFIX);
            let has_sidecar = names.contains(&sidecar);

            let Some(target) = free_target(dest_dir, name, has_sidecar) else {
                internal_log!(
                    ERROR,
                    MAINTAINER,
                    event_names::FILE_MOVE_FAILED,
                    source = %source_dir.join(name).display(),
                    destination = %dest_dir.display(),
                    "No free name left in the destination directory"
                );
                all_moved = false;
                continue;
            };
            all_moved &= rename_logged(&source_dir.join(name), &dest_dir.join(&target));
            if has_sidecar {
                all_moved &= rename_logged(
                    &source_dir.join(&sidecar),
                    &dest_dir.join(format!("{}{}", target, METADATA_SUFFIX)),
                );
            }
        }
        all_moved
    }
}

const MAX_RENAME_ATTEMPTS: u64 = 1024;

/// Entry names of `dir` that are valid UTF-8, sorted, and how many entries
/// were skipped for not being UTF-8.
fn list_names(dir: &Path) -> Result<(BTreeSet<String>, usize)> {
    let mut names = BTreeSet::new();
    let mut unnamed = 0;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        match entry.file_name().into_string() {
            Ok(name) => {
                names.insert(name);
            }
            Err(name) => {
                unnamed += 1;
                internal_log!(
                    WARN,
                    MAINTAINER,
                    event_names::FILE_MOVE_SKIPPED,
                    source = %dir.display(),
                    name = ?name,
                    "Skipping entry with a non UTF-8 name"
                );
            }
        }
    }
    Ok((names, unnamed))
}

fn sidecar_owner(name: &str) -> Option<&str> {
    name.strip_suffix(METADATA_SUFFIX).filter(|owner| !owner.is_empty())
}

/// A name under `dest_dir` that overwrites nothing. Batch names (timestamps)
/// move to the next free timestamp so ordering by name stays ordering by age.
fn free_target(dest_dir: &Path, name: &str, with_sidecar: bool) -> Option<String> {
    let taken = |candidate: &str| {
        dest_dir.join(candidate).symlink_metadata().is_ok()
            || (with_sidecar
                && dest_dir
                    .join(format!("{}{}", candidate, METADATA_SUFFIX))
                    .symlink_metadata()
                    .is_ok())
    };
    if !taken(name) {
        return Some(name.to_string());
    }

    let target = match name.parse::<u64>() {
        Ok(timestamp) => (1..=MAX_RENAME_ATTEMPTS)
            .filter_map(|offset| timestamp.checked_add(offset))
            .map(|candidate| candidate.to_string())
            .find(|candidate| !taken(candidate)),
        Err(_) => (1..=MAX_RENAME_ATTEMPTS)
            .map(|suffix| format!("{}.{}", name, suffix))
            .find(|candidate| !taken(candidate)),
    }?;
    internal_log!(
        DEBUG,
        MAINTAINER,
        event_names::FILE_MOVE_RENAMED,
        destination = %dest_dir.display(),
        name = %name,
        renamed_to = %target,
        "Destination already holds this name, moving under a new one"
    );
    Some(target)
}

fn rename_logged(from: &Path, to: &Path) -> bool {
    match fs::rename(from, to) {
        Ok(()) => true,
        Err(e) => {
            internal_log!(
                ERROR,
                MAINTAINER,
                event_names::FILE_MOVE_FAILED,
                source = %from.display(),
                destination = %to.display(),
                error = %e,
                "Unable to move file"
            );
            false
        }
    }
}

fn temp_path(file: &Path) -> PathBuf {
    let mut name = file
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    file.with_file_name(name)
}
