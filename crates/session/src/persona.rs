//! Persona context: the priming payload that gives the model its character.
//!
//! Two documents are read once per process, a dialogue script that defines how
//! the character talks and a biography that defines who the character is.
//! Each is sent upstream as a blob labelled with its sniffed media type and
//! paired with a short annotation.

use async_trait::async_trait;
use parley_config::PersonaConfig;
use parley_core::error::PersonaError;
use parley_core::message::{Blob, Part, Role, Turn};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::info;

use crate::sniff::{MediaType, sniff};

/// Where persona documents come from.
#[async_trait]
pub trait DocumentSource: Send + Sync {
    async fn read(&self, path: &Path) -> std::io::Result<Vec<u8>>;
}

/// Reads documents from the local filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsSource;

#[async_trait]
impl DocumentSource for FsSource {
    async fn read(&self, path: &Path) -> std::io::Result<Vec<u8>> {
        tokio::fs::read(path).await
    }
}

/// One loaded persona document.
#[derive(Debug, Clone)]
pub struct PersonaDocument {
    pub path: PathBuf,
    pub bytes: Arc<[u8]>,
    pub media_type: MediaType,
}

impl PersonaDocument {
    fn to_part(&self) -> Part {
        Part::Blob(Blob::new(self.media_type.essence(), self.bytes.clone()))
    }
}

/// Immutable once built.
#[derive(Debug, Clone)]
pub struct PersonaContext {
    pub style_corpus: PersonaDocument,
    pub biography: PersonaDocument,
    pub style_note: String,
    pub biography_note: String,
}

impl PersonaContext {
    /// The priming turn: script, its note, biography, its note.
    pub fn turn(&self) -> Turn {
        Turn::new(
            Role::Persona,
            vec![
                self.style_corpus.to_part(),
                Part::text(&self.style_note),
                self.biography.to_part(),
                Part::text(&self.biography_note),
            ],
        )
    }
}

/// Reads and packages the two persona documents.
pub struct PersonaLoader {
    source: Arc<dyn DocumentSource>,
    script_path: PathBuf,
    biography_path: PathBuf,
    style_note: String,
    biography_note: String,
}

impl PersonaLoader {
    pub fn new(source: Arc<dyn DocumentSource>, config: &PersonaConfig) -> Self {
        Self {
            source,
            script_path: config.script_path.clone(),
            biography_path: config.biography_path.clone(),
            style_note: config.style_note.clone(),
            biography_note: config.biography_note.clone(),
        }
    }

    /// Filesystem-backed loader.
    pub fn from_config(config: &PersonaConfig) -> Self {
        Self::new(Arc::new(FsSource), config)
    }

    pub async fn load(&self) -> Result<PersonaContext, PersonaError> {
        let style_corpus = self.read_document(&self.script_path).await?;
        let biography = self.read_document(&self.biography_path).await?;

        info!(
            script = %style_corpus.path.display(),
            script_bytes = style_corpus.bytes.len(),
            script_type = %style_corpus.media_type,
            biography = %biography.path.display(),
            biography_bytes = biography.bytes.len(),
            biography_type = %biography.media_type,
            "Persona documents loaded"
        );

        Ok(PersonaContext {
            style_corpus,
            biography,
            style_note: self.style_note.clone(),
            biography_note: self.biography_note.clone(),
        })
    }

    async fn read_document(&self, path: &Path) -> Result<PersonaDocument, PersonaError> {
        let bytes = self
            .source
            .read(path)
            .await
            .map_err(|e| PersonaError::Unreadable {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;

        if bytes.is_empty() {
            return Err(PersonaError::Empty {
                path: path.to_path_buf(),
            });
        }

        Ok(PersonaDocument {
            path: path.to_path_buf(),
            media_type: sniff(&bytes),
            bytes: bytes.into(),
        })
    }
}

/// Runs the loader at most once and hands every caller the same outcome.
///
/// Concurrent first callers wait on the single in-flight load. A failure is
/// memoized like a success: the persona documents are a startup precondition,
/// so retrying on every request would only hide the problem.
pub struct PersonaCell {
    loader: PersonaLoader,
    cell: OnceCell<Result<Arc<PersonaContext>, PersonaError>>,
}

impl PersonaCell {
    pub fn new(loader: PersonaLoader) -> Self {
        Self {
            loader,
            cell: OnceCell::new(),
        }
    }

    /// Already-built context, for tests and fixtures that skip the loader.
    pub fn ready(context: PersonaContext) -> Self {
        Self {
            loader: PersonaLoader::new(Arc::new(FsSource), &PersonaConfig::default()),
            cell: OnceCell::new_with(Some(Ok(Arc::new(context)))),
        }
    }

    pub async fn get(&self) -> Result<Arc<PersonaContext>, PersonaError> {
        self.cell
            .get_or_init(|| async { self.loader.load().await.map(Arc::new) })
            .await
            .clone()
    }

    pub fn is_initialized(&self) -> bool {
        self.cell.initialized()
    }
}
