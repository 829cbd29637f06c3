//! Interned source file records.
//!
//! Every unique path maps to exactly one [`FileId`] for the lifetime of the
//! process. A file keeps its identity across delete/re-add cycles so a
//! revived module reuses the same record; only the `tracked` flag and the
//! cached import positions change.

use std::path::{Path, PathBuf};

use rustc_hash::FxHashMap;

use crate::parse::ParsedImport;

/// Stable handle into the process-wide file table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileId(pub u32);

/// Stable handle into the process-wide package table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PackageId(pub u32);

/// Target platform for suffix-qualified file variants (`foo.ios.js`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Platform {
    Android,
    Ios,
    Web,
}

impl Platform {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Android => "android",
            Self::Ios => "ios",
            Self::Web => "web",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "android" => Some(Self::Android),
            "ios" => Some(Self::Ios),
            "web" => Some(Self::Web),
            _ => None,
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One known source file.
#[derive(Debug)]
pub struct File {
    pub path: PathBuf,
    /// Extension with the leading dot, e.g. `.js`.
    pub file_type: String,
    /// Platform qualifier parsed from the secondary extension.
    pub platform: Option<Platform>,
    /// Owning package.
    pub package: PackageId,
    /// Parsed import refs and their source positions. Recomputed after a
    /// reload; `None` until the file is first parsed.
    pub imports: Option<Vec<ParsedImport>>,
    /// False after a delete event. The record stays interned so the file
    /// keeps its identity when re-added.
    pub tracked: bool,
}

impl File {
    fn new(path: PathBuf, package: PackageId) -> Self {
        let file_type = file_type_of(&path);
        let platform = platform_of(&path, &file_type);
        Self {
            path,
            file_type,
            platform,
            package,
            imports: None,
            tracked: true,
        }
    }
}

/// Extension with the leading dot, empty string when absent.
pub fn file_type_of(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{e}"))
        .unwrap_or_default()
}

/// Detect a platform qualifier: `foo.ios.js` has platform `ios`.
fn platform_of(path: &Path, file_type: &str) -> Option<Platform> {
    if file_type.is_empty() {
        return None;
    }
    let name = path.file_name()?.to_str()?;
    let stem = &name[..name.len() - file_type.len()];
    let (_, qualifier) = stem.rsplit_once('.')?;
    Platform::parse(qualifier)
}

/// Process-wide table of interned files.
#[derive(Debug, Default)]
pub struct FileTable {
    by_path: FxHashMap<PathBuf, FileId>,
    files: Vec<File>,
}

impl FileTable {
    /// Intern a path, reviving a previously deleted record if one exists.
    pub fn add(&mut self, path: PathBuf, package: PackageId) -> FileId {
        if let Some(&id) = self.by_path.get(&path) {
            let file = &mut self.files[id.0 as usize];
            if !file.tracked {
                file.tracked = true;
                file.imports = None;
                file.package = package;
            }
            return id;
        }
        let id = FileId(self.files.len() as u32);
        self.files.push(File::new(path.clone(), package));
        self.by_path.insert(path, id);
        id
    }

    /// Look up a tracked file by path.
    pub fn get(&self, path: &Path) -> Option<FileId> {
        self.by_path
            .get(path)
            .copied()
            .filter(|id| self.files[id.0 as usize].tracked)
    }

    pub fn file(&self, id: FileId) -> &File {
        &self.files[id.0 as usize]
    }

    pub fn file_mut(&mut self, id: FileId) -> &mut File {
        &mut self.files[id.0 as usize]
    }

    /// Mark a file untracked. Returns false when the path was never interned
    /// or is already untracked.
    pub fn untrack(&mut self, path: &Path) -> Option<FileId> {
        let id = self.get(path)?;
        self.files[id.0 as usize].tracked = false;
        Some(id)
    }

    /// Drop cached import positions after a reload event. Returns the id
    /// when the path is tracked.
    pub fn invalidate(&mut self, path: &Path) -> Option<FileId> {
        let id = self.get(path)?;
        self.files[id.0 as usize].imports = None;
        Some(id)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}
