use std::fs::{self, Metadata};
use std::io::{self, ErrorKind};
use std::path::{Component, Path, PathBuf};

use walkdir::WalkDir;

use crate::reconcile::{FailureReason, ItemOutcome};
use crate::result_tree::RiskLevel;

// EBUSY, ETXTBSY
#[cfg(unix)]
const LOCKED_OS_CODES: &[i32] = &[16, 26];
// ERROR_SHARING_VIOLATION, ERROR_LOCK_VIOLATION
#[cfg(windows)]
const LOCKED_OS_CODES: &[i32] = &[32, 33];
#[cfg(not(any(unix, windows)))]
const LOCKED_OS_CODES: &[i32] = &[];

// EROFS
#[cfg(unix)]
const READ_ONLY_OS_CODES: &[i32] = &[30];
#[cfg(not(unix))]
const READ_ONLY_OS_CODES: &[i32] = &[];

pub(crate) fn classify_io_error(err: &io::Error) -> FailureReason {
    match err.kind() {
        ErrorKind::NotFound => FailureReason::NotFound,
        ErrorKind::PermissionDenied => FailureReason::PermissionDenied,
        _ => match err.raw_os_error() {
            Some(code) if LOCKED_OS_CODES.contains(&code) => FailureReason::Locked,
            Some(code) if READ_ONLY_OS_CODES.contains(&code) => FailureReason::SystemProtected,
            _ => FailureReason::Other(err.to_string()),
        },
    }
}

/// Bytes actually allocated on disk.
#[cfg(unix)]
pub(crate) fn physical_size(md: &Metadata) -> u64 {
    use std::os::unix::fs::MetadataExt;
    md.blocks() * 512
}

#[cfg(not(unix))]
pub(crate) fn physical_size(md: &Metadata) -> u64 {
    md.len()
}

/// Logical and physical size of a file, or of everything below a directory.
pub(crate) fn entry_sizes(path: &Path, md: &Metadata) -> (u64, u64) {
    if !md.is_dir() {
        return (md.len(), physical_size(md));
    }
    WalkDir::new(path)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| e.metadata().ok())
        .fold((0, 0), |(logical, physical), md| {
            (logical + md.len(), physical + physical_size(&md))
        })
}

/// True when `path` lies strictly below one of `roots` without climbing out via `..`.
pub(crate) fn is_within_roots(roots: &[PathBuf], path: &Path) -> bool {
    if path.components().any(|c| matches!(c, Component::ParentDir)) {
        return false;
    }
    roots
        .iter()
        .any(|root| path != root.as_path() && path.starts_with(root))
}

/// Delete one scanned entry and describe what happened to it.
pub(crate) fn remove_entry(roots: &[PathBuf], id: &str) -> ItemOutcome {
    let path = Path::new(id);
    if !is_within_roots(roots, path) {
        return ItemOutcome::failed(id, 0, FailureReason::OutOfScope);
    }
    // symlink_metadata so a link is removed, never its target
    let md = match fs::symlink_metadata(path) {
        Ok(md) => md,
        Err(err) => return ItemOutcome::failed(id, 0, classify_io_error(&err)),
    };
    let (logical, physical) = entry_sizes(path, &md);
    let removed = if md.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };
    match removed {
        Ok(()) => ItemOutcome::deleted(id, logical, physical),
        Err(err) => ItemOutcome::failed(id, logical, classify_io_error(&err)),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum FileFamily {
    Video,
    DiskImage,
    Archive,
    Other,
}

impl FileFamily {
    pub(crate) fn of(path: &Path) -> Self {
        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "mp4" | "mkv" | "mov" | "avi" | "wmv" | "m4v" | "webm" | "flv" => FileFamily::Video,
            "iso" | "dmg" | "img" | "vhd" | "vhdx" | "vmdk" | "qcow2" => FileFamily::DiskImage,
            "zip" | "tar" | "gz" | "tgz" | "7z" | "rar" | "xz" | "bz2" | "zst" => FileFamily::Archive,
            _ => FileFamily::Other,
        }
    }

    pub(crate) fn label(self) -> &'static str {
        match self {
            FileFamily::Video => "Videos",
            FileFamily::DiskImage => "Disk Images",
            FileFamily::Archive => "Archives",
            FileFamily::Other => "Other Large Files",
        }
    }

    pub(crate) fn description(self) -> &'static str {
        match self {
            FileFamily::Video => "Large video files",
            FileFamily::DiskImage => "Installer and virtual machine images",
            FileFamily::Archive => "Compressed archives",
            FileFamily::Other => "Large files of other types",
        }
    }

    pub(crate) fn risk(self) -> RiskLevel {
        match self {
            FileFamily::DiskImage | FileFamily::Archive => RiskLevel::Low,
            FileFamily::Video => RiskLevel::Moderate,
            FileFamily::Other => RiskLevel::Elevated,
        }
    }
}
