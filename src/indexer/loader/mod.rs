
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::embeddings::Document;

const PAGE_BREAK: char = '\x0c';

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FileKind {
    Pdf,
    Text,
    Markdown,
}

impl FileKind {
    fn from_path(path: &Path) -> Option<Self> {
        let extension = path.extension()?.to_str()?.to_ascii_lowercase();
        match extension.as_str() {
            "pdf" => Some(Self::Pdf),
            "txt" => Some(Self::Text),
            "md" => Some(Self::Markdown),
            _ => None,
        }
    }

    const fn mime_type(self) -> &'static str {
        match self {
            Self::Pdf => "application/pdf",
            Self::Text => "text/plain",
            Self::Markdown => "text/markdown",
        }
    }
}

/// Reads `.pdf`, `.txt` and `.md` files under a directory, recursively
#[derive(Debug, Clone)]
pub struct DocumentLoader {
    root: PathBuf,
}

impl DocumentLoader {
    #[inline]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[inline]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// PDFs yield one document per page. Files that cannot be read are
    /// skipped with a warning.
    #[inline]
    pub async fn load(&self) -> Result<Vec<Document>> {
        let root = self.root.clone();
        tokio::task::spawn_blocking(move || load_directory(&root))
            .await
            .context("Document loading task panicked")?
    }
}

fn load_directory(root: &Path) -> Result<Vec<Document>> {
    if !root.is_dir() {
        warn!("Data folder {} does not exist", root.display());
        return Ok(Vec::new());
    }

    let mut files = Vec::new();
    collect_files(root, &mut files)?;
    files.sort();

    let mut documents = Vec::new();
    for path in files {
        let Some(kind) = FileKind::from_path(&path) else {
            debug!("Skipping unsupported file {}", path.display());
            continue;
        };
        match load_file(&path, kind) {
            Ok(mut loaded) => {
                debug!("Loaded {} documents from {}", loaded.len(), path.display());
                documents.append(&mut loaded);
            }
            Err(e) => warn!("Skipping {}: {:#}", path.display(), e),
        }
    }

    info!(
        "Loaded {} documents from {}",
        documents.len(),
        root.display()
    );
    Ok(documents)
}

fn collect_files(dir: &Path, files: &mut Vec<PathBuf>) -> Result<()> {
    let entries =
        fs::read_dir(dir).with_context(|| format!("Failed to read directory {}", dir.display()))?;
    for entry in entries {
        let path = entry?.path();
        if path.is_dir() {
            collect_files(&path, files)?;
        } else if path.is_file() {
            files.push(path);
        }
    }
    Ok(())
}

fn load_file(path: &Path, kind: FileKind) -> Result<Vec<Document>> {
    let file_path = path.to_string_lossy().into_owned();
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();

    let base = |id: String, text: String| {
        Document::new(id, text)
            .with_metadata("file_path", file_path.as_str())
            .with_metadata("file_name", file_name.as_str())
            .with_metadata("file_type", kind.mime_type())
    };

    match kind {
        FileKind::Pdf => {
            let bytes = fs::read(path).context("Failed to read PDF")?;
            let text = pdf_extract::extract_text_from_mem(&bytes)
                .context("Failed to extract text from PDF")?;
            if text.trim().is_empty() {
                warn!(
                    "No text extracted from {}; it might be a scanned document",
                    path.display()
                );
            }
            Ok(split_pages(&text)
                .into_iter()
                .map(|(page, text)| {
                    base(format!("{file_path}#page={page}"), text)
                        .with_metadata("page_label", Value::String(page.to_string()))
                })
                .collect())
        }
        FileKind::Text | FileKind::Markdown => {
            let text = fs::read_to_string(path).context("Failed to read text file")?;
            if text.trim().is_empty() {
                return Ok(Vec::new());
            }
            Ok(vec![base(file_path.clone(), text)])
        }
    }
}

/// Form-feed separated pages, numbered from 1. Blank pages are dropped but
/// keep their number.
pub(crate) fn split_pages(text: &str) -> Vec<(usize, String)> {
    text.split(PAGE_BREAK)
        .enumerate()
        .filter(|(_, page)| !page.trim().is_empty())
        .map(|(index, page)| (index + 1, page.trim().to_string()))
        .collect()
}
