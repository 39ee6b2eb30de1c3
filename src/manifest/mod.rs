//! Artifact manifests
//!
//! A manifest lists, for one (experiment, algorithm) pair, which derived
//! artifacts exist on disk, with size, content hash, encoding and point count.
//! It is regenerated from the filesystem after every derived write and is
//! never a source of truth: deleting it loses nothing.
//!
//! ```json
//! {
//!   "version": 1,
//!   "experiment_id": "e1",
//!   "algorithm_key": "orb_ransac_seq00_run0",
//!   "generated_at": "2024-01-01T00:00:00Z",
//!   "trajectory": {"ui": {"url": "/assets/experiments/e1/trajectories/orb_ransac_seq00_run0.ui.arrow", ...}},
//!   "pr_curve": {"ui": {...}, "full": {...}, "aux": {...}},
//!   "frames": {"individual": {...}}
//! }
//! ```

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::codec::{CodecHandle, Resolution};
use crate::config::DEFAULT_HASH_LIMIT_BYTES;
use crate::error::StorageOp;
use crate::experiment::keys;
use crate::store::{Record, StorageHandle, StoredFormat};
use crate::{Error, Result};

/// Manifest format version.
pub const MANIFEST_VERSION: u32 = 1;

/// Encoding label of codec-written files.
pub const ARROW_IPC_ENCODING: &str = "arrow-ipc";

/// One file (or directory of frame files) listed in a manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactEntry {
    /// Asset URL: prefix plus the path relative to the storage root.
    pub url: String,
    /// Size on disk.
    pub bytes: u64,
    /// `sha256:<hex>`, or `fp:<bytes>-<mtime_ns>` for large files and directories.
    pub hash: String,
    /// `arrow-ipc`, `json` or `json+gzip`.
    pub encoding: String,
    /// Point (or frame) count, when it could be determined.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub points: Option<usize>,
    /// Last modification time.
    pub modified_at: DateTime<Utc>,
}

/// Resolutions present for one artifact kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactVariants {
    /// Downsampled binary.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ui: Option<ArtifactEntry>,
    /// Full-resolution binary.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full: Option<ArtifactEntry>,
    /// Canonical JSON copy (PR curves only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aux: Option<ArtifactEntry>,
}

impl ArtifactVariants {
    /// True if nothing is present.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.ui.is_none() && self.full.is_none() && self.aux.is_none()
    }

    fn entries(&self) -> impl Iterator<Item = &ArtifactEntry> {
        [&self.ui, &self.full, &self.aux].into_iter().flatten()
    }
}

/// Stored frame results, in whichever layout exists.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameArtifacts {
    /// Legacy single batch file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch: Option<ArtifactEntry>,
    /// Directory of per-frame files.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub individual: Option<ArtifactEntry>,
}

/// Inventory of one algorithm run's artifacts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    /// Format version.
    pub version: u32,
    /// Experiment the run belongs to.
    pub experiment_id: String,
    /// Algorithm run.
    pub algorithm_key: String,
    /// When this inventory was taken.
    pub generated_at: DateTime<Utc>,
    /// Trajectory variants.
    #[serde(default)]
    pub trajectory: ArtifactVariants,
    /// PR curve variants.
    #[serde(default)]
    pub pr_curve: ArtifactVariants,
    /// Frame results.
    #[serde(default)]
    pub frames: FrameArtifacts,
}

impl Manifest {
    /// Whether both manifests list the same files, ignoring `generated_at`.
    #[must_use]
    pub fn same_inventory(&self, other: &Self) -> bool {
        self.version == other.version
            && self.experiment_id == other.experiment_id
            && self.algorithm_key == other.algorithm_key
            && self.trajectory == other.trajectory
            && self.pr_curve == other.pr_curve
            && self.frames == other.frames
    }

    /// Every listed entry.
    pub fn entries(&self) -> impl Iterator<Item = &ArtifactEntry> {
        self.trajectory
            .entries()
            .chain(self.pr_curve.entries())
            .chain([&self.frames.batch, &self.frames.individual].into_iter().flatten())
    }
}

/// A manifest entry that no longer matches the disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntegrityIssue {
    /// URL of the entry.
    pub url: String,
    /// What differs.
    pub message: String,
}

impl From<IntegrityIssue> for Error {
    fn from(issue: IntegrityIssue) -> Self {
        Self::Integrity {
            url: issue.url,
            message: issue.message,
        }
    }
}

/// Generates, stores and audits manifests.
#[derive(Debug)]
pub struct ManifestManager {
    storage: StorageHandle,
    codec: CodecHandle,
    hash_limit_bytes: u64,
    url_prefix: String,
    update_lock: Mutex<()>,
}

impl ManifestManager {
    /// Create a manager with the default hash limit and `/assets` URL prefix.
    #[must_use]
    pub fn new(storage: StorageHandle, codec: CodecHandle) -> Self {
        Self::with_options(storage, codec, DEFAULT_HASH_LIMIT_BYTES, "/assets")
    }

    /// Create a manager with an explicit hash limit and URL prefix.
    #[must_use]
    pub fn with_options(
        storage: StorageHandle,
        codec: CodecHandle,
        hash_limit_bytes: u64,
        url_prefix: impl Into<String>,
    ) -> Self {
        Self {
            storage,
            codec,
            hash_limit_bytes,
            url_prefix: url_prefix.into().trim_end_matches('/').to_string(),
            update_lock: Mutex::new(()),
        }
    }

    /// Inspect the disk and build a fresh manifest.
    ///
    /// # Errors
    ///
    /// Returns an error for invalid ids or if a present file cannot be read.
    pub fn generate_manifest(&self, experiment_id: &str, algorithm_key: &str) -> Result<Manifest> {
        keys::validate_id("experiment id", experiment_id)?;
        keys::validate_id("algorithm key", algorithm_key)?;

        let trajectory_key = keys::trajectory_key(experiment_id, algorithm_key);
        let pr_key = keys::pr_curve_key(experiment_id, algorithm_key);

        let trajectory = ArtifactVariants {
            ui: self.binary_entry(&trajectory_key, Resolution::Ui)?,
            full: self.binary_entry(&trajectory_key, Resolution::Full)?,
            aux: None,
        };
        let pr_curve = ArtifactVariants {
            ui: self.binary_entry(&pr_key, Resolution::Ui)?,
            full: self.binary_entry(&pr_key, Resolution::Full)?,
            aux: self.canonical_entry(&pr_key, |value| {
                value.get("recall").and_then(|r| r.as_array()).map(Vec::len)
            })?,
        };
        let frames_key = keys::frames_key(experiment_id, algorithm_key);
        let frames = match self.individual_frames_entry(&frames_key)? {
            Some(individual) => FrameArtifacts {
                batch: None,
                individual: Some(individual),
            },
            None => FrameArtifacts {
                batch: self.canonical_entry(&frames_key, |value| value.as_array().map(Vec::len))?,
                individual: None,
            },
        };

        Ok(Manifest {
            version: MANIFEST_VERSION,
            experiment_id: experiment_id.to_string(),
            algorithm_key: algorithm_key.to_string(),
            generated_at: Utc::now(),
            trajectory,
            pr_curve,
            frames,
        })
    }

    /// Persist a manifest as uncompressed JSON at `manifests/{alg}`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Storage` if the write fails.
    pub fn save_manifest(&self, manifest: &Manifest) -> Result<()> {
        let key = keys::manifest_key(&manifest.experiment_id, &manifest.algorithm_key);
        self.storage.save_json(&key, manifest, false)
    }

    /// Load the stored manifest, if any.
    ///
    /// # Errors
    ///
    /// Returns `Error::Serialization` if the stored manifest is corrupt.
    pub fn load_manifest(&self, experiment_id: &str, algorithm_key: &str) -> Result<Option<Manifest>> {
        self.storage
            .load_json(&keys::manifest_key(experiment_id, algorithm_key))
    }

    /// Regenerate the manifest and store it if the inventory changed.
    ///
    /// Returns the manifest now on disk. Calling it twice without disk
    /// changes in between rewrites nothing the second time.
    ///
    /// # Errors
    ///
    /// Returns an error if generation or the write fails.
    pub fn update_manifest_after_save(&self, experiment_id: &str, algorithm_key: &str) -> Result<Manifest> {
        let _guard = self
            .update_lock
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        let fresh = self.generate_manifest(experiment_id, algorithm_key)?;
        let stored = match self.load_manifest(experiment_id, algorithm_key) {
            Ok(stored) => stored,
            Err(e) if e.is_serialization() => {
                warn!(experiment_id, algorithm_key, error = %e, "replacing unreadable manifest");
                None
            }
            Err(e) => return Err(e),
        };

        if let Some(stored) = stored {
            if stored.same_inventory(&fresh) {
                debug!(experiment_id, algorithm_key, "manifest unchanged");
                return Ok(stored);
            }
        }
        self.save_manifest(&fresh)?;
        debug!(experiment_id, algorithm_key, "manifest updated");
        Ok(fresh)
    }

    /// Compare every entry with the file it describes.
    ///
    /// Never runs on the write path; this is an audit.
    #[must_use]
    pub fn verify_manifest(&self, manifest: &Manifest) -> Vec<IntegrityIssue> {
        let mut issues = Vec::new();
        for entry in manifest.entries() {
            let issue = |message: String| IntegrityIssue {
                url: entry.url.clone(),
                message,
            };
            let Some(path) = self.path_for_url(&entry.url) else {
                issues.push(issue("URL is outside the asset prefix".to_string()));
                continue;
            };

            let observed = if path.is_dir() {
                DirSummary::scan(&path).map(|dir| (dir.bytes, dir.fingerprint()))
            } else {
                fs::metadata(&path).and_then(|meta| {
                    let hash = self.file_hash(&path, &meta)?;
                    Ok((meta.len(), hash))
                })
            };

            match observed {
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    issues.push(issue("file is missing".to_string()));
                }
                Err(e) => issues.push(issue(format!("cannot read file: {e}"))),
                Ok((bytes, _)) if bytes != entry.bytes => issues.push(issue(format!(
                    "size changed: manifest {} bytes, disk {bytes} bytes",
                    entry.bytes
                ))),
                Ok((_, hash)) if hash != entry.hash => issues.push(issue(format!(
                    "hash changed: manifest {}, disk {hash}",
                    entry.hash
                ))),
                Ok(_) => {}
            }
        }
        issues
    }

    fn binary_entry(&self, key: &str, resolution: Resolution) -> Result<Option<ArtifactEntry>> {
        let path = self.storage.sidecar_path(key, resolution.suffix())?;
        let Some(meta) = file_metadata(&path).map_err(|e| Error::storage(key, StorageOp::List, e))? else {
            return Ok(None);
        };
        let points = match self.codec.read_metadata(&path) {
            Ok(metadata) => metadata.and_then(|m| m.get("points").and_then(|p| p.parse().ok())),
            Err(e) => {
                debug!(path = %path.display(), error = %e, "no point count for manifest entry");
                None
            }
        };
        self.entry(key, &path, &meta, ARROW_IPC_ENCODING, points).map(Some)
    }

    fn canonical_entry(
        &self,
        key: &str,
        count: impl Fn(&serde_json::Value) -> Option<usize>,
    ) -> Result<Option<ArtifactEntry>> {
        let Some(file) = self.storage.locate(key)? else {
            return Ok(None);
        };
        let Some(meta) = file_metadata(&file.path).map_err(|e| Error::storage(key, StorageOp::List, e))? else {
            return Ok(None);
        };
        let points = match self.storage.load(key) {
            Ok(Some(Record::Json(value))) => count(&value),
            Ok(_) => None,
            Err(e) => {
                debug!(key, error = %e, "no point count for manifest entry");
                None
            }
        };
        self.entry(key, &file.path, &meta, file.format.label(), points).map(Some)
    }

    fn individual_frames_entry(&self, frames_key: &str) -> Result<Option<ArtifactEntry>> {
        let dir = self.storage.root().join(frames_key);
        if !dir.is_dir() {
            return Ok(None);
        }
        let summary = DirSummary::scan(&dir).map_err(|e| Error::storage(frames_key, StorageOp::List, e))?;
        let Some(format) = summary.format else {
            return Ok(None);
        };
        Ok(Some(ArtifactEntry {
            url: self.url_for(&dir),
            bytes: summary.bytes,
            hash: summary.fingerprint(),
            encoding: format.label().to_string(),
            points: Some(summary.count),
            modified_at: DateTime::<Utc>::from(summary.newest),
        }))
    }

    fn entry(
        &self,
        key: &str,
        path: &Path,
        meta: &fs::Metadata,
        encoding: &str,
        points: Option<usize>,
    ) -> Result<ArtifactEntry> {
        let hash = self
            .file_hash(path, meta)
            .map_err(|e| Error::storage(key, StorageOp::Load, e))?;
        Ok(ArtifactEntry {
            url: self.url_for(path),
            bytes: meta.len(),
            hash,
            encoding: encoding.to_string(),
            points,
            modified_at: DateTime::<Utc>::from(meta.modified().unwrap_or(UNIX_EPOCH)),
        })
    }

    fn file_hash(&self, path: &Path, meta: &fs::Metadata) -> io::Result<String> {
        if meta.len() > self.hash_limit_bytes {
            return Ok(fingerprint(meta.len(), meta.modified().unwrap_or(UNIX_EPOCH)));
        }
        let mut hasher = Sha256::new();
        io::copy(&mut File::open(path)?, &mut hasher)?;
        Ok(format!("sha256:{:x}", hasher.finalize()))
    }

    fn url_for(&self, path: &Path) -> String {
        let relative = path.strip_prefix(self.storage.root()).unwrap_or(path);
        let segments: Vec<String> = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        format!("{}/{}", self.url_prefix, segments.join("/"))
    }

    fn path_for_url(&self, url: &str) -> Option<PathBuf> {
        let relative = url.strip_prefix(&self.url_prefix)?.trim_start_matches('/');
        if relative.is_empty() || relative.split('/').any(|s| s == ".." || s == ".") {
            return None;
        }
        Some(self.storage.root().join(relative))
    }
}

fn file_metadata(path: &Path) -> io::Result<Option<fs::Metadata>> {
    match fs::metadata(path) {
        Ok(meta) if meta.is_file() => Ok(Some(meta)),
        Ok(_) => Ok(None),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

/// Frame files directly inside a directory.
struct DirSummary {
    bytes: u64,
    count: usize,
    newest: SystemTime,
    format: Option<StoredFormat>,
}

impl DirSummary {
    fn scan(dir: &Path) -> io::Result<Self> {
        let mut summary = Self {
            bytes: 0,
            count: 0,
            newest: UNIX_EPOCH,
            format: None,
        };
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if name.starts_with('.') {
                continue;
            }
            let Some((_, format)) = StoredFormat::split_file_name(name) else {
                continue;
            };
            let meta = entry.metadata()?;
            if !meta.is_file() {
                continue;
            }
            summary.bytes += meta.len();
            summary.count += 1;
            summary.newest = summary.newest.max(meta.modified().unwrap_or(UNIX_EPOCH));
            summary.format.get_or_insert(format);
        }
        Ok(summary)
    }

    fn fingerprint(&self) -> String {
        fingerprint(self.bytes, self.newest)
    }
}

fn fingerprint(bytes: u64, modified: SystemTime) -> String {
    let mtime_ns = modified
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    format!("fp:{bytes}-{mtime_ns}")
}
