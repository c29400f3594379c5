use crate::config::PathCase;
use crate::database::{Database, DatabaseError};
use crate::media::trash::{TrashBin, TrashError, TrashRecord};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum RenameError {
    #[error("No files selected")]
    NoFilesSelected,

    #[error("{target} already exists (renaming {path})")]
    NameCollisionExternal { path: PathBuf, target: PathBuf },

    #[error("{target} is claimed twice in this batch (renaming {path})")]
    NameCollisionInternal { path: PathBuf, target: PathBuf },

    #[error("Failed to rename {path} to {target}: {error}")]
    RenameIoFailure {
        path: PathBuf,
        target: PathBuf,
        #[source]
        error: io::Error,
    },

    #[error("Rollback failed: {path} is stranded at {stuck}: {error}")]
    RollbackFailed {
        path: PathBuf,
        stuck: PathBuf,
        #[source]
        error: io::Error,
    },

    #[error("File not found: {path}")]
    SourceMissing { path: PathBuf },

    #[error("Invalid file name {name:?}: {reason}")]
    InvalidName { name: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Trash error: {0}")]
    Trash(#[from] TrashError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

/// One planned move in a batch rename.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlannedRename {
    pub from: PathBuf,
    pub to: PathBuf,
    pub sequence: u64,
    /// Already carries its target name.
    pub skip: bool,
}

/// Allocation for a batch rename, computed without touching the disk.
#[derive(Debug)]
pub struct RenamePlan {
    pub directory: PathBuf,
    pub entries: Vec<PlannedRename>,
    /// Validation failures; a plan with issues is never executed.
    pub issues: Vec<RenameError>,
}

impl RenamePlan {
    pub fn is_valid(&self) -> bool {
        self.issues.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenamedFile {
    pub from: PathBuf,
    pub to: PathBuf,
}

#[derive(Debug, Default)]
pub struct BatchRenameReport {
    pub success: bool,
    pub renamed: Vec<RenamedFile>,
    pub skipped: Vec<PathBuf>,
    pub errors: Vec<RenameError>,
}

impl BatchRenameReport {
    fn failed(errors: Vec<RenameError>) -> Self {
        Self {
            errors,
            ..Default::default()
        }
    }

    /// True when a file may be left under a temporary name.
    pub fn rollback_failed(&self) -> bool {
        self.errors
            .iter()
            .any(|e| matches!(e, RenameError::RollbackFailed { .. }))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Location {
    Original,
    Temp,
    Target,
}

/// Rename and delete operations on library files.
///
/// Every successful move carries the file's metadata to its new path and
/// drops the stale snapshot entry.
pub struct FileOperations {
    db: Database,
    trash: Arc<TrashBin>,
    sequence_width: usize,
}

impl FileOperations {
    pub fn new(db: Database, trash: Arc<TrashBin>, sequence_width: usize) -> Self {
        Self {
            db,
            trash,
            sequence_width: sequence_width.max(1),
        }
    }

    fn path_case(&self) -> PathCase {
        self.db.path_case()
    }

    /// Allocate sequence names for `paths` (in input order) and validate them.
    ///
    /// All inputs are assumed to share the directory of the first one.
    pub fn plan_batch_rename(&self, paths: &[PathBuf]) -> Result<RenamePlan, RenameError> {
        let first = paths.first().ok_or(RenameError::NoFilesSelected)?;
        let directory = match first.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };

        let path_case = self.path_case();
        let members: HashSet<String> = paths.iter().map(|path| path_case.key(path)).collect();

        let mut taken = BTreeSet::new();
        for entry in fs::read_dir(&directory)? {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    log::warn!("Skipping unreadable entry in {}: {}", directory.display(), e);
                    continue;
                }
            };
            let path = entry.path();
            if members.contains(&path_case.key(&path)) {
                continue;
            }
            if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
                continue;
            }
            if let Some(sequence) = sequence_number(&path) {
                taken.insert(sequence);
            }
        }

        let mut next = 1u64;
        let mut entries = Vec::with_capacity(paths.len());
        for path in paths {
            while taken.contains(&next) {
                next += 1;
            }
            let sequence = next;
            next += 1;

            let extension = path
                .extension()
                .map(|ext| format!(".{}", ext.to_string_lossy()))
                .unwrap_or_default();
            let target = directory.join(format!(
                "{:0width$}{}",
                sequence,
                extension,
                width = self.sequence_width
            ));
            let skip = path.file_name() == target.file_name();

            entries.push(PlannedRename {
                from: path.clone(),
                to: target,
                sequence,
                skip,
            });
        }

        let issues = validate(&entries, &members, path_case);
        Ok(RenamePlan {
            directory,
            entries,
            issues,
        })
    }

    /// All-or-nothing batch rename to a pure zero-padded sequence.
    pub fn batch_rename(&self, paths: &[PathBuf]) -> BatchRenameReport {
        match self.plan_batch_rename(paths) {
            Ok(plan) => self.execute_plan(plan),
            Err(e) => BatchRenameReport::failed(vec![e]),
        }
    }

    pub fn execute_plan(&self, plan: RenamePlan) -> BatchRenameReport {
        if !plan.is_valid() {
            log::warn!(
                "Batch rename in {} rejected with {} conflict(s); nothing renamed",
                plan.directory.display(),
                plan.issues.len()
            );
            return BatchRenameReport::failed(plan.issues);
        }

        let (skipped, moves): (Vec<_>, Vec<_>) = plan.entries.into_iter().partition(|e| e.skip);
        let skipped: Vec<PathBuf> = skipped.into_iter().map(|e| e.from).collect();

        if let Err(errors) = apply_moves(&plan.directory, &moves) {
            return BatchRenameReport {
                skipped,
                ..BatchRenameReport::failed(errors)
            };
        }

        let renamed: Vec<RenamedFile> = moves
            .into_iter()
            .map(|m| RenamedFile {
                from: m.from,
                to: m.to,
            })
            .collect();
        let moved: Vec<(PathBuf, PathBuf)> = renamed
            .iter()
            .map(|file| (file.from.clone(), file.to.clone()))
            .collect();
        self.after_moves(&moved);

        log::info!(
            "Batch rename in {}: {} renamed, {} skipped",
            plan.directory.display(),
            renamed.len(),
            skipped.len()
        );
        BatchRenameReport {
            success: true,
            renamed,
            skipped,
            errors: Vec::new(),
        }
    }

    /// Rename one file within its directory, keeping the extension when
    /// `new_name` has none. Returns the new path.
    pub fn rename_file(&self, path: &Path, new_name: &str) -> Result<PathBuf, RenameError> {
        if !path.is_file() {
            return Err(RenameError::SourceMissing {
                path: path.to_path_buf(),
            });
        }

        let file_name = target_file_name(path, new_name)?;
        let target = match path.parent() {
            Some(parent) => parent.join(&file_name),
            None => PathBuf::from(&file_name),
        };
        if target == path {
            return Ok(target);
        }

        let case_only = self.path_case().same(path, &target);
        if !case_only && fs::symlink_metadata(&target).is_ok() {
            return Err(RenameError::NameCollisionExternal {
                path: path.to_path_buf(),
                target,
            });
        }

        fs::rename(path, &target).map_err(|error| RenameError::RenameIoFailure {
            path: path.to_path_buf(),
            target: target.clone(),
            error,
        })?;
        self.after_moves(&[(path.to_path_buf(), target.clone())]);

        log::info!("Renamed {} to {}", path.display(), target.display());
        Ok(target)
    }

    /// Move a file to the trash and drop its metadata.
    pub fn delete_file(&self, path: &Path) -> Result<TrashRecord, RenameError> {
        if !path.is_file() {
            return Err(RenameError::SourceMissing {
                path: path.to_path_buf(),
            });
        }

        let record = self.trash.move_to_trash(path)?;
        if let Err(e) = self.db.metadata().remove(path) {
            log::warn!("Failed to remove metadata for {}: {}", path.display(), e);
        }
        if let Err(e) = self.db.videos().remove_path(path) {
            log::warn!("Failed to drop cached record for {}: {}", path.display(), e);
        }
        Ok(record)
    }

    /// Carry metadata and snapshot rows across completed moves, all in one
    /// step so targets that were other files' old names stay correct. The
    /// files are already in place, so store failures are logged rather than
    /// returned.
    fn after_moves(&self, moves: &[(PathBuf, PathBuf)]) {
        if let Err(e) = self.db.metadata().migrate_many(moves) {
            log::warn!(
                "Failed to migrate metadata for {} moved file(s): {}",
                moves.len(),
                e
            );
        }
        if let Err(e) = self.db.videos().relocate_many(moves, false) {
            log::warn!(
                "Failed to update cached records for {} moved file(s): {}",
                moves.len(),
                e
            );
        }
    }
}

/// Sequence number of a file named like `007.mp4`.
fn sequence_number(path: &Path) -> Option<u64> {
    let stem = path.file_stem()?.to_str()?;
    if stem.is_empty() || !stem.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    stem.parse().ok()
}

fn validate(
    entries: &[PlannedRename],
    members: &HashSet<String>,
    path_case: PathCase,
) -> Vec<RenameError> {
    let mut issues = Vec::new();
    let mut sources = HashSet::new();
    let mut targets: HashMap<String, &Path> = HashMap::new();

    for entry in entries {
        if !sources.insert(path_case.key(&entry.from)) {
            issues.push(RenameError::NameCollisionInternal {
                path: entry.from.clone(),
                target: entry.to.clone(),
            });
            continue;
        }
        if !entry.from.is_file() {
            issues.push(RenameError::SourceMissing {
                path: entry.from.clone(),
            });
            continue;
        }

        let key = path_case.key(&entry.to);
        if targets.insert(key.clone(), &entry.from).is_some() {
            issues.push(RenameError::NameCollisionInternal {
                path: entry.from.clone(),
                target: entry.to.clone(),
            });
            continue;
        }

        if !entry.skip && !members.contains(&key) && fs::symlink_metadata(&entry.to).is_ok() {
            issues.push(RenameError::NameCollisionExternal {
                path: entry.from.clone(),
                target: entry.to.clone(),
            });
        }
    }

    issues
}

/// Two-phase move: every source goes to a unique temporary name first, then
/// every temporary name goes to its target. Any failure rolls the whole
/// batch back.
fn apply_moves(directory: &Path, moves: &[PlannedRename]) -> Result<(), Vec<RenameError>> {
    let batch_id = Uuid::new_v4().simple().to_string();
    let temps: Vec<PathBuf> = (0..moves.len())
        .map(|i| directory.join(format!(".vidshelf-rename-{}-{}.tmp", batch_id, i)))
        .collect();
    let mut locations = vec![Location::Original; moves.len()];

    for (i, planned) in moves.iter().enumerate() {
        if let Err(error) = fs::rename(&planned.from, &temps[i]) {
            log::error!("Failed to stage {}: {}", planned.from.display(), error);
            let mut errors = vec![RenameError::RenameIoFailure {
                path: planned.from.clone(),
                target: temps[i].clone(),
                error,
            }];
            errors.extend(rollback(moves, &temps, &mut locations));
            return Err(errors);
        }
        locations[i] = Location::Temp;
    }

    for (i, planned) in moves.iter().enumerate() {
        let result = if fs::symlink_metadata(&planned.to).is_ok() {
            Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                "target appeared during rename",
            ))
        } else {
            fs::rename(&temps[i], &planned.to)
        };

        if let Err(error) = result {
            log::error!(
                "Failed to rename {} to {}: {}",
                planned.from.display(),
                planned.to.display(),
                error
            );
            let mut errors = vec![RenameError::RenameIoFailure {
                path: planned.from.clone(),
                target: planned.to.clone(),
                error,
            }];
            errors.extend(rollback(moves, &temps, &mut locations));
            return Err(errors);
        }
        locations[i] = Location::Target;
    }

    Ok(())
}

/// Best-effort return of every moved file to its original name. Finished
/// targets go back to their temporary names first so no original name is
/// still occupied when the temporaries are restored.
fn rollback(
    moves: &[PlannedRename],
    temps: &[PathBuf],
    locations: &mut [Location],
) -> Vec<RenameError> {
    let mut errors = Vec::new();

    for (i, planned) in moves.iter().enumerate() {
        if locations[i] != Location::Target {
            continue;
        }
        match fs::rename(&planned.to, &temps[i]) {
            Ok(()) => locations[i] = Location::Temp,
            Err(error) => {
                log::error!(
                    "Rollback failed: {} stays at {}: {}",
                    planned.from.display(),
                    planned.to.display(),
                    error
                );
                errors.push(RenameError::RollbackFailed {
                    path: planned.from.clone(),
                    stuck: planned.to.clone(),
                    error,
                });
            }
        }
    }

    for (i, planned) in moves.iter().enumerate() {
        if locations[i] != Location::Temp {
            continue;
        }
        let result = if fs::symlink_metadata(&planned.from).is_ok() {
            Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                "original name is occupied",
            ))
        } else {
            fs::rename(&temps[i], &planned.from)
        };
        match result {
            Ok(()) => locations[i] = Location::Original,
            Err(error) => {
                log::error!(
                    "Rollback failed: {} stays at {}: {}",
                    planned.from.display(),
                    temps[i].display(),
                    error
                );
                errors.push(RenameError::RollbackFailed {
                    path: planned.from.clone(),
                    stuck: temps[i].clone(),
                    error,
                });
            }
        }
    }

    errors
}

fn target_file_name(path: &Path, new_name: &str) -> Result<String, RenameError> {
    let name = new_name.trim();
    let invalid = |reason: &str| RenameError::InvalidName {
        name: new_name.to_string(),
        reason: reason.to_string(),
    };

    if name.is_empty() {
        return Err(invalid("name is empty"));
    }
    if name.contains('/') || name.contains('\\') {
        return Err(invalid("name must not contain path separators"));
    }
    if name == "." || name == ".." {
        return Err(invalid("reserved name"));
    }

    if Path::new(name).extension().is_some() {
        return Ok(name.to_string());
    }
    match path.extension() {
        Some(ext) => Ok(format!("{}.{}", name, ext.to_string_lossy())),
        None => Ok(name.to_string()),
    }
}
