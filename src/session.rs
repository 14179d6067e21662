//! Document session orchestration.
//!
//! A session owns the pipeline for one active document: parse → ingest →
//! embed → index, then many-reader retrieval. The built corpus (index +
//! fragment store) is published behind an `Arc` swapped atomically under a
//! short write lock, so replacing the active document never exposes a mix of
//! old and new entries; queries already holding the old handle finish
//! against it. Sessions are plain values; any number can coexist, each with
//! its own corpus.

use std::path::Path;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use crate::config::Config;
use crate::embed::{embed_fragments, Embedder, EmbeddingError};
use crate::fragment::{FragmentStore, FragmentStoreError};
use crate::generate::{Answer, ResponseAssembler};
use crate::index::{IndexBuilder, IndexError, SearchIndex};
use crate::index_storage::{SessionStorage, StorageError};
use crate::ingest::{images, IngestError, IngestReport, Ingestor};
use crate::parser::{DocumentParser, ParseError};
use crate::retrieve::{QueryInput, RetrievalResult, RetrieveError, Retriever};

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("no document loaded")]
    NoDocument,

    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("ingestion error: {0}")]
    Ingest(#[from] IngestError),

    #[error("embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("index error: {0}")]
    Index(#[from] IndexError),

    #[error("fragment store error: {0}")]
    Fragment(#[from] FragmentStoreError),

    #[error("retrieval error: {0}")]
    Retrieve(#[from] RetrieveError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("query image is not usable: {0}")]
    InvalidQueryImage(String),

    #[error("internal error: {0}")]
    Internal(String),
}

/// A published, immutable corpus: the index and the fragments it resolves to.
pub struct Corpus {
    pub index: SearchIndex,
    pub store: FragmentStore,
}

/// One document session: single-writer while building, many readers after
/// publish.
pub struct DocumentSession {
    config: Config,
    embedder: Arc<dyn Embedder>,
    retriever: Retriever,
    corpus: RwLock<Option<Arc<Corpus>>>,
}

impl DocumentSession {
    pub fn new(config: Config, embedder: Arc<dyn Embedder>) -> Self {
        let retriever = Retriever::new(embedder.clone(), config.default_k);
        Self {
            config,
            embedder,
            retriever,
            corpus: RwLock::new(None),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Snapshot the currently published corpus handle, if any. A poisoned
    /// lock is an internal error, distinct from "no document loaded".
    pub fn corpus(&self) -> Result<Option<Arc<Corpus>>, SessionError> {
        let guard = self
            .corpus
            .read()
            .map_err(|e| SessionError::Internal(format!("lock poisoned: {e}")))?;
        Ok(guard.clone())
    }

    pub fn has_document(&self) -> bool {
        matches!(self.corpus(), Ok(Some(_)))
    }

    pub fn fragment_count(&self) -> usize {
        match self.corpus() {
            Ok(Some(corpus)) => corpus.store.len(),
            _ => 0,
        }
    }

    /// Parse, ingest, embed and index a document, then atomically publish it
    /// as the session's active corpus, replacing any previous one.
    pub fn load_document(
        &self,
        parser: &dyn DocumentParser,
        path: &Path,
        show_progress: bool,
    ) -> Result<IngestReport, SessionError> {
        log::info!("loading document {}", path.display());

        let document = parser.parse(path)?;

        let mut ingestor = Ingestor::from_config(&self.config);
        if show_progress {
            ingestor = ingestor.with_progress();
        }
        let output = ingestor.ingest(document)?;

        let vectors = embed_fragments(self.embedder.as_ref(), &output.fragments)?;

        let mut builder =
            IndexBuilder::new(self.embedder.dimensions(), self.embedder.model_version());
        builder.append(vectors)?;
        let index = builder.build();

        let mut store = FragmentStore::new();
        for fragment in output.fragments {
            store.insert(fragment)?;
        }

        self.publish(Corpus { index, store })?;
        Ok(output.report)
    }

    /// Publish a fully built corpus. This is the atomic swap point; the old
    /// handle stays valid for queries already in flight.
    fn publish(&self, corpus: Corpus) -> Result<(), SessionError> {
        let mut guard = self
            .corpus
            .write()
            .map_err(|e| SessionError::Internal(format!("lock poisoned: {e}")))?;
        *guard = Some(Arc::new(corpus));
        Ok(())
    }

    /// Persist the active corpus so a later process can skip re-ingestion.
    pub fn persist(&self, storage: &SessionStorage) -> Result<(), SessionError> {
        let corpus = self.corpus()?.ok_or(SessionError::NoDocument)?;
        storage.save(&corpus.index, &corpus.store)?;
        Ok(())
    }

    /// Restore a previously persisted corpus and publish it.
    pub fn restore(&self, storage: &SessionStorage) -> Result<(), SessionError> {
        let (index, store) = storage.load(
            self.embedder.model_version(),
            self.embedder.dimensions(),
        )?;
        log::info!("restored session with {} fragments", store.len());
        self.publish(Corpus { index, store })
    }

    /// Decode and size-cap a raw query image into a probe.
    pub fn prepare_query_image(&self, bytes: &[u8]) -> Result<QueryInput, SessionError> {
        let prepared = images::prepare_image(bytes, self.config.max_image_dimension)
            .map_err(|e| SessionError::InvalidQueryImage(e.to_string()))?;
        Ok(QueryInput::Image(prepared.png))
    }

    /// Retrieve the k most relevant fragments for a query against the
    /// published corpus. Only the corpus handle snapshot happens under the
    /// lock; embedding and search run without it.
    pub fn retrieve(
        &self,
        input: &QueryInput,
        k: Option<usize>,
    ) -> Result<RetrievalResult, SessionError> {
        let corpus = self.corpus()?.ok_or(SessionError::NoDocument)?;
        Ok(self
            .retriever
            .retrieve(&corpus.index, &corpus.store, input, k)?)
    }

    /// Retrieve and generate a grounded answer. The generation call happens
    /// after retrieval completes and holds no session lock, so a slow model
    /// never blocks other readers.
    pub fn ask(
        &self,
        assembler: &ResponseAssembler,
        input: &QueryInput,
        k: Option<usize>,
    ) -> Result<Answer, SessionError> {
        let retrieval = self.retrieve(input, k)?;
        Ok(assembler.generate(input, &retrieval))
    }

    pub fn generation_timeout(&self) -> Duration {
        Duration::from_secs(self.config.generation_timeout_secs)
    }
}
