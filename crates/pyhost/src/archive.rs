//! ZIP import into a project's stored tree.

use std::collections::HashSet;
use std::io::{Cursor, Read};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use thiserror::Error;
use tracing::info;
use zip::ZipArchive;

use crate::store::{FileStore, NewFile, StoreError, StoredFile, join_relative, split_relative};
use crate::workspace::has_parent_segment;

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("invalid base64 payload: {0}")]
    Encoding(#[from] base64::DecodeError),

    #[error("invalid ZIP archive: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("unsafe path in archive: {0}")]
    UnsafePath(String),

    #[error("archive entry is not UTF-8 text: {0}")]
    NotText(String),

    #[error("failed to read archive entry {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// What an import added or changed.
#[derive(Debug, Default)]
pub struct ImportReport {
    /// Newly created entries, folders first.
    pub created: Vec<StoredFile>,
    pub updated: usize,
}

struct Entry {
    /// Path relative to the project root, without trailing slash.
    path: String,
    /// `None` for directories.
    content: Option<String>,
}

/// Extract a base64-encoded ZIP into the store under `target_path`.
///
/// The whole archive is decoded and validated before the store is touched.
/// Folders are created first, each once; files are then created, or updated
/// when an entry already exists at that path.
pub async fn import_zip(
    store: &dyn FileStore,
    project_id: &str,
    zip_base64: &str,
    target_path: Option<&str>,
) -> Result<ImportReport, ArchiveError> {
    let bytes = STANDARD.decode(zip_base64.trim())?;
    let target = target_path.map(|t| t.trim_matches('/')).unwrap_or("");
    if has_parent_segment(target) {
        return Err(ArchiveError::UnsafePath(target.to_string()));
    }
    let entries = read_entries(bytes, target)?;

    let mut report = ImportReport::default();
    let mut known_folders = HashSet::new();

    for entry in entries.iter().filter(|e| e.content.is_none()) {
        ensure_folders(store, project_id, &entry.path, &mut known_folders, &mut report).await?;
    }

    for entry in &entries {
        let Some(content) = &entry.content else {
            continue;
        };
        let (parent, name) = split_relative(&entry.path);
        if !parent.is_empty() {
            ensure_folders(store, project_id, parent, &mut known_folders, &mut report).await?;
        }

        match store.get_file_by_path(project_id, &entry.path).await? {
            Some(existing) => {
                store.update_file(&existing.id, project_id, content).await?;
                report.updated += 1;
            }
            None => {
                let file = store
                    .create_file(project_id, NewFile::file(parent, name, content.clone()))
                    .await?;
                report.created.push(file);
            }
        }
    }

    info!(
        project_id,
        created = report.created.len(),
        updated = report.updated,
        "archive imported"
    );
    Ok(report)
}

fn read_entries(bytes: Vec<u8>, target: &str) -> Result<Vec<Entry>, ArchiveError> {
    let mut archive = ZipArchive::new(Cursor::new(bytes))?;
    let mut entries = Vec::with_capacity(archive.len());

    for index in 0..archive.len() {
        let mut file = archive.by_index(index)?;
        let raw_name = file.name().replace('\\', "/");
        if raw_name.starts_with('/') || has_parent_segment(&raw_name) || raw_name.contains('\0') {
            return Err(ArchiveError::UnsafePath(raw_name));
        }

        let relative: Vec<&str> = raw_name.split('/').filter(|p| !p.is_empty() && *p != ".").collect();
        if relative.is_empty() {
            continue;
        }
        let path = join_relative(target, &relative.join("/"));

        if file.is_dir() {
            entries.push(Entry { path, content: None });
            continue;
        }

        let mut buf = Vec::new();
        file.read_to_end(&mut buf).map_err(|source| ArchiveError::Read {
            path: raw_name.clone(),
            source,
        })?;
        let content = String::from_utf8(buf).map_err(|_| ArchiveError::NotText(raw_name.clone()))?;
        entries.push(Entry {
            path,
            content: Some(content),
        });
    }
    Ok(entries)
}

/// Create every folder along `path` that is not stored yet.
async fn ensure_folders(
    store: &dyn FileStore,
    project_id: &str,
    path: &str,
    known: &mut HashSet<String>,
    report: &mut ImportReport,
) -> Result<(), ArchiveError> {
    let mut current = String::new();
    for part in path.split('/').filter(|p| !p.is_empty()) {
        let parent = current.clone();
        current = join_relative(&parent, part);
        if !known.insert(current.clone()) {
            continue;
        }
        if store.get_file_by_path(project_id, &current).await?.is_none() {
            let folder = store
                .create_file(project_id, NewFile::directory(parent, part))
                .await?;
            report.created.push(folder);
        }
    }
    Ok(())
}
