//! Timestamped backups taken before a record is overwritten or removed
//!
//! Layout: `{root}/{seg0}/{seg1}/.backup/{middle segments}/{leaf}.{timestamp}{suffix}`.
//! Keys shorter than three segments back up under `{root}/.backup/`.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use super::format::StoredFormat;

pub(crate) const BACKUP_DIR: &str = ".backup";

const TIMESTAMP_FORMAT: &str = "%Y%m%dT%H%M%S_%9f";
const TIMESTAMP_LEN: usize = 25;

struct Location {
    dir: PathBuf,
    leaf: String,
}

fn location(root: &Path, key: &str) -> Location {
    let segments: Vec<&str> = key.split('/').collect();
    let (leaf, parents) = segments
        .split_last()
        .map_or((key, &[][..]), |(leaf, parents)| (*leaf, parents));

    let mut dir = root.to_path_buf();
    if parents.len() >= 2 {
        dir.push(parents[0]);
        dir.push(parents[1]);
        dir.push(BACKUP_DIR);
        dir.extend(&parents[2..]);
    } else {
        dir.push(BACKUP_DIR);
        dir.extend(parents);
    }

    Location {
        dir,
        leaf: leaf.to_string(),
    }
}

/// Copy `source` (the current file of `key`) into the backup area.
pub(crate) fn create(
    root: &Path,
    key: &str,
    source: &Path,
    format: StoredFormat,
) -> io::Result<PathBuf> {
    let Location { dir, leaf } = location(root, key);
    fs::create_dir_all(&dir)?;

    let mut stamp: DateTime<Utc> = Utc::now();
    let target = loop {
        let candidate = dir.join(format!(
            "{leaf}.{}{}",
            stamp.format(TIMESTAMP_FORMAT),
            format.suffix()
        ));
        if !candidate.exists() {
            break candidate;
        }
        // Same nanosecond as an earlier backup
        stamp += chrono::Duration::nanoseconds(1);
    };

    fs::copy(source, &target)?;
    Ok(target)
}

/// Backups of `key`, oldest first.
pub(crate) fn list(root: &Path, key: &str) -> io::Result<Vec<PathBuf>> {
    let Location { dir, leaf } = location(root, key);
    let entries = match fs::read_dir(&dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    let mut found: Vec<(String, PathBuf)> = Vec::new();
    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if let Some(stamp) = backup_timestamp(name, &leaf) {
            found.push((stamp.to_string(), entry.path()));
        }
    }
    found.sort();
    Ok(found.into_iter().map(|(_, path)| path).collect())
}

/// Delete all but the newest `retention` backups of `key`. Returns how many were removed.
pub(crate) fn rotate(root: &Path, key: &str, retention: usize) -> io::Result<usize> {
    let backups = list(root, key)?;
    let excess = backups.len().saturating_sub(retention);
    for path in &backups[..excess] {
        match fs::remove_file(path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
    }
    Ok(excess)
}

/// Timestamp part of `name` if it is a backup of `leaf`.
fn backup_timestamp<'a>(name: &'a str, leaf: &str) -> Option<&'a str> {
    let rest = name.strip_prefix(leaf)?.strip_prefix('.')?;
    if rest.len() <= TIMESTAMP_LEN || !rest.is_char_boundary(TIMESTAMP_LEN) {
        return None;
    }
    let (stamp, suffix) = rest.split_at(TIMESTAMP_LEN);
    let well_formed = stamp.bytes().enumerate().all(|(i, b)| match i {
        8 => b == b'T',
        15 => b == b'_',
        _ => b.is_ascii_digit(),
    });
    let known_suffix = StoredFormat::PROBE_ORDER.iter().any(|f| f.suffix() == suffix);
    (well_formed && known_suffix).then_some(stamp)
}
