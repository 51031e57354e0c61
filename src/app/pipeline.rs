use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use tokio::sync::broadcast;

use crate::app::dispatcher::RateLimitedDispatcher;
use crate::app::model::{
    ChunkOutcome, FallbackReason, PipelineEvent, PipelineStatus, ProcessingState,
};
use crate::app::progress_store::ProgressStore;
use crate::app::queue::InProcessQueue;
use crate::backend::{
    HttpBackend, ImageGenerator, ImageRequest, SUMMARY_MODE_CHAPTER, Summarizer, SummaryRequest,
    SummaryResponse, TextExtractor,
};
use crate::blocks;
use crate::chunker::{self, MAX_SERVICE_CHARS, MIN_SERVICE_CHARS, char_len, tail_chars, take_chars};
use crate::config::{BackendMode, PipelineConfig};
use crate::demo::DemoBackend;
use crate::formats::{Book, Chapter, ImageRef, PendingSource, Snapshot, default_chapter_title};
use crate::ingest::{self, IngestError};

pub const UNKNOWN_AUTHOR: &str = "Unknown";
const EVENT_CAPACITY: usize = 256;

/// Lazily turns a document's raw chunks into chapters, a sliding window at a time.
///
/// All summarizer calls go through one [`RateLimitedDispatcher`], so chunk work is
/// effectively serialized even when prefetch and navigation overlap. The `processing`
/// set guarantees a chunk is never dispatched twice.
pub struct BookPipeline {
    config: PipelineConfig,
    summarizer: Arc<dyn Summarizer>,
    images: Option<Arc<dyn ImageGenerator>>,
    extractor: Option<Arc<dyn TextExtractor>>,
    dispatcher: RateLimitedDispatcher,
    store: ProgressStore,
    queue: InProcessQueue,
    events: broadcast::Sender<PipelineEvent>,
    state: Mutex<PipelineState>,
    persist_lock: tokio::sync::Mutex<()>,
}

#[derive(Debug, Default)]
struct PipelineState {
    book: Option<Book>,
    raw_chunks: Vec<String>,
    progress: ProcessingState,
    pending_source: Option<PendingSource>,
    loading: bool,
    advisory: Option<String>,
}

struct ChunkJob {
    index: usize,
    book_id: String,
    book_title: String,
    text: String,
    prev_context: Option<String>,
    next_context: Option<String>,
}

enum Claim {
    Claimed(ChunkJob),
    Skipped,
    BookChanged,
}

struct ChunkResult {
    chapter: Chapter,
    outcome: ChunkOutcome,
    advisory: Option<String>,
}

impl BookPipeline {
    pub fn new(
        config: PipelineConfig,
        summarizer: Arc<dyn Summarizer>,
        images: Option<Arc<dyn ImageGenerator>>,
        extractor: Option<Arc<dyn TextExtractor>>,
        store: ProgressStore,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Arc::new(Self {
            dispatcher: RateLimitedDispatcher::new(config.min_call_interval),
            queue: InProcessQueue::new(1),
            config,
            summarizer,
            images,
            extractor,
            store,
            events,
            state: Mutex::new(PipelineState::default()),
            persist_lock: tokio::sync::Mutex::new(()),
        })
    }

    /// Wires the backend selected by `config.backend_mode` and a store under `data_dir`.
    /// Only the live backend can extract text from PDFs.
    pub fn from_config(config: PipelineConfig) -> anyhow::Result<Arc<Self>> {
        let store = ProgressStore::local_fs(&config.data_dir);
        let (summarizer, images, extractor): (
            Arc<dyn Summarizer>,
            Arc<dyn ImageGenerator>,
            Option<Arc<dyn TextExtractor>>,
        ) = match config.backend_mode {
            BackendMode::Demo => {
                let backend = Arc::new(DemoBackend);
                let summarizer: Arc<dyn Summarizer> = backend.clone();
                let images: Arc<dyn ImageGenerator> = backend;
                (summarizer, images, None)
            }
            BackendMode::Live => {
                let backend = Arc::new(HttpBackend::new(
                    &config.api_base_url,
                    config.request_timeout,
                )?);
                let summarizer: Arc<dyn Summarizer> = backend.clone();
                let images: Arc<dyn ImageGenerator> = backend.clone();
                let extractor: Arc<dyn TextExtractor> = backend;
                (summarizer, images, Some(extractor))
            }
        };
        let images = config.resolve_images.then_some(images);
        tracing::info!(
            mode = ?config.backend_mode,
            api_base_url = %config.api_base_url,
            data_dir = %config.data_dir.display(),
            "pipeline configured"
        );
        Ok(Self::new(config, summarizer, images, extractor, store))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.events.subscribe()
    }

    /// Loads the stored snapshot, if any. Returns whether a book is now loaded.
    pub async fn restore(&self) -> bool {
        let snapshot = match self.store.load().await {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => {
                tracing::debug!("no stored snapshot; waiting for a new document");
                return false;
            }
            Err(err) => {
                tracing::warn!(?err, "failed to load snapshot; starting empty");
                return false;
            }
        };

        if let Some(pending) = snapshot.pending_source {
            tracing::info!(path = %pending.path, "resuming ingestion of pending source");
            let title = pending
                .title
                .clone()
                .unwrap_or_else(|| ingest::default_title(Path::new(&pending.path)));
            let author = pending.author.as_deref().unwrap_or(UNKNOWN_AUTHOR);
            return match self.ingest_text(&title, author, &pending.content).await {
                Ok(_) => true,
                Err(err) => {
                    tracing::warn!(%err, "pending source could not be ingested; discarding it");
                    self.clear().await;
                    false
                }
            };
        }

        let Some(book) = snapshot.book else {
            return false;
        };
        if book.chapters.len() != snapshot.raw_chunks.len() {
            tracing::warn!(
                chapters = book.chapters.len(),
                raw_chunks = snapshot.raw_chunks.len(),
                "stored snapshot is inconsistent; ignoring it"
            );
            return false;
        }

        let chunks = snapshot.raw_chunks.len();
        let processed = snapshot.processed.into_iter().filter(|idx| *idx < chunks);
        let book_id = book.id.clone();
        {
            let mut state = self.state();
            *state = PipelineState {
                book: Some(book),
                raw_chunks: snapshot.raw_chunks,
                progress: ProcessingState::with_processed(processed),
                ..PipelineState::default()
            };
        }
        tracing::info!(book_id = %book_id, chunks, "restored book from snapshot");
        self.emit(PipelineEvent::BookLoaded { book_id, chunks });
        true
    }

    /// Reads a text file (or, with an extractor, a PDF) and makes it the current book. The
    /// source is stored as pending until chunking finishes, so an interrupted ingest can be
    /// resumed.
    pub async fn ingest_file(
        &self,
        path: &Path,
        title: Option<&str>,
        author: Option<&str>,
    ) -> Result<String, IngestError> {
        let text = match &self.extractor {
            Some(extractor) if ingest::is_pdf_path(path) => {
                ingest::extract_pdf(extractor.as_ref(), path).await?
            }
            _ => ingest::read_source(path).await?,
        };

        {
            let _persist = self.persist_lock.lock().await;
            let snapshot = {
                let mut state = self.state();
                state.pending_source = Some(PendingSource {
                    path: path.display().to_string(),
                    content: text.clone(),
                    title: title.map(str::to_owned),
                    author: author.map(str::to_owned),
                });
                self.snapshot_of(&state)
            };
            self.persist(&snapshot).await;
        }

        let title = title
            .map(str::to_owned)
            .unwrap_or_else(|| ingest::default_title(path));
        self.ingest_text(&title, author.unwrap_or(UNKNOWN_AUTHOR), &text)
            .await
    }

    /// Chunks `text` and replaces the current book with one placeholder chapter per chunk.
    pub async fn ingest_text(
        &self,
        title: &str,
        author: &str,
        text: &str,
    ) -> Result<String, IngestError> {
        ingest::ensure_text(title, text)?;

        let raw_chunks = chunker::split(text);
        let book_id = ingest::book_id_for(chunker::normalize(text).trim());
        let chunks = raw_chunks.len();
        let book = Book::with_placeholders(
            book_id.clone(),
            title.to_owned(),
            author.to_owned(),
            chunks,
        );

        let _persist = self.persist_lock.lock().await;
        let snapshot = {
            let mut state = self.state();
            *state = PipelineState {
                book: Some(book),
                raw_chunks,
                ..PipelineState::default()
            };
            self.snapshot_of(&state)
        };
        self.persist(&snapshot).await;

        tracing::info!(book_id = %book_id, title, chunks, "ingested document");
        self.emit(PipelineEvent::BookLoaded {
            book_id: book_id.clone(),
            chunks,
        });
        Ok(book_id)
    }

    /// Processes chunk 0 right away, then prefetches the first window in the background.
    pub async fn on_init(self: &Arc<Self>) {
        if self.chunk_count() == 0 {
            return;
        }
        self.process(0).await;

        let pipeline = Arc::clone(self);
        self.queue.spawn(async move {
            pipeline.on_chunk_viewed(0).await;
        });
    }

    /// Processes the unclaimed chunks in `[index, index + window)`, in ascending order,
    /// one after another. Stops early if the book is replaced or cleared meanwhile.
    pub async fn on_chunk_viewed(&self, index: usize) {
        let (book_id, eligible) = {
            let state = self.state();
            let Some(book) = state.book.as_ref() else {
                return;
            };
            let total = state.raw_chunks.len();
            let end = index.saturating_add(self.config.window_size()).min(total);
            let eligible = (index.min(end)..end)
                .filter(|idx| !state.progress.is_settled_or_claimed(*idx))
                .collect::<Vec<_>>();
            (book.id.clone(), eligible)
        };

        if eligible.is_empty() {
            tracing::debug!(index, "window has no eligible chunks");
            return;
        }

        tracing::debug!(index, ?eligible, "processing window");
        for idx in eligible {
            if !self.run(idx, Some(&book_id)).await {
                tracing::debug!(
                    index,
                    book_id = %book_id,
                    "book replaced during window; abandoning the rest"
                );
                break;
            }
        }
    }

    /// Turns one chunk into a chapter. A no-op if the chunk is done or already in flight;
    /// every failure ends in a fallback chapter.
    pub async fn process(&self, index: usize) {
        self.run(index, None).await;
    }

    /// Returns false when `expected_book` is no longer the current book.
    async fn run(&self, index: usize, expected_book: Option<&str>) -> bool {
        let job = match self.claim(index, expected_book) {
            Claim::Claimed(job) => job,
            Claim::Skipped => {
                tracing::debug!(index, "chunk already processed or in flight");
                return true;
            }
            Claim::BookChanged => return false,
        };
        self.emit(PipelineEvent::ChunkClaimed { index });

        let result = self.build_chapter(&job).await;
        self.complete(job, result).await;
        true
    }

    /// Waits for background prefetch spawned so far.
    pub async fn wait_for_background(&self) {
        self.queue.wait_idle().await;
    }

    pub async fn save(&self) {
        let _persist = self.persist_lock.lock().await;
        let snapshot = {
            let state = self.state();
            self.snapshot_of(&state)
        };
        self.persist(&snapshot).await;
    }

    /// Drops the current book and purges the stored snapshot.
    pub async fn clear(&self) {
        let _persist = self.persist_lock.lock().await;
        {
            let mut state = self.state();
            *state = PipelineState::default();
        }
        if let Err(err) = self.store.clear().await {
            tracing::warn!(?err, "failed to clear stored snapshot");
        }
        tracing::info!("cleared current book");
        self.emit(PipelineEvent::BookCleared);
    }

    pub fn book(&self) -> Option<Book> {
        self.state().book.clone()
    }

    pub fn chapter(&self, index: usize) -> Option<Chapter> {
        self.state()
            .book
            .as_ref()
            .and_then(|book| book.chapters.get(index).cloned())
    }

    pub fn chunk_count(&self) -> usize {
        self.state().raw_chunks.len()
    }

    pub fn raw_chunks(&self) -> Vec<String> {
        self.state().raw_chunks.clone()
    }

    pub fn status(&self) -> Option<PipelineStatus> {
        let state = self.state();
        let book = state.book.as_ref()?;
        let chunks = state.raw_chunks.len();
        Some(PipelineStatus {
            book_id: book.id.clone(),
            title: book.title.clone(),
            chunks,
            processed: state.progress.processed(),
            processing: state.progress.processing(),
            pending: state.progress.pending(chunks),
            loading: state.loading,
            advisory: state.advisory.clone(),
        })
    }

    fn claim(&self, index: usize, expected_book: Option<&str>) -> Claim {
        let mut guard = self.state();
        let state = &mut *guard;
        let Some(book) = state.book.as_ref() else {
            return match expected_book {
                Some(_) => Claim::BookChanged,
                None => Claim::Skipped,
            };
        };
        if expected_book.is_some_and(|expected| expected != book.id) {
            return Claim::BookChanged;
        }
        let Some(text) = state.raw_chunks.get(index).cloned() else {
            return Claim::Skipped;
        };
        if !state.progress.claim(index) {
            return Claim::Skipped;
        }
        state.loading = true;

        let context_chars = self.config.context_chars();
        let non_empty = |s: &str| (!s.is_empty()).then(|| s.to_owned());
        let prev_context = index
            .checked_sub(1)
            .and_then(|prev| state.raw_chunks.get(prev))
            .and_then(|chunk| non_empty(tail_chars(chunk.trim(), context_chars)));
        let next_context = state
            .raw_chunks
            .get(index + 1)
            .and_then(|chunk| non_empty(take_chars(chunk.trim(), context_chars)));

        Claim::Claimed(ChunkJob {
            index,
            book_id: book.id.clone(),
            book_title: book.title.clone(),
            text,
            prev_context,
            next_context,
        })
    }

    async fn build_chapter(&self, job: &ChunkJob) -> ChunkResult {
        let trimmed = job.text.trim();
        if char_len(trimmed) < MIN_SERVICE_CHARS {
            tracing::debug!(
                chunk_index = job.index,
                chars = char_len(trimmed),
                "chunk too small for the summarizer; using raw text"
            );
            return ChunkResult {
                chapter: blocks::fallback_chapter(&job.book_id, job.index, &job.text),
                outcome: ChunkOutcome::Fallback {
                    reason: FallbackReason::TooSmall,
                },
                advisory: None,
            };
        }

        let request = SummaryRequest {
            text_chunk: take_chars(trimmed, MAX_SERVICE_CHARS).to_owned(),
            mode: SUMMARY_MODE_CHAPTER.to_owned(),
            book_id: job.book_id.clone(),
            chapter_title: default_chapter_title(job.index),
            prev_context: job.prev_context.clone(),
            next_context: job.next_context.clone(),
        };

        let response = match self.summarize_with_retries(&request, job.index).await {
            Ok(response) => response,
            Err(err) => {
                tracing::warn!(
                    chunk_index = job.index,
                    error = %format!("{err:#}"),
                    "summary failed; falling back to raw text"
                );
                return ChunkResult {
                    chapter: blocks::fallback_chapter(&job.book_id, job.index, &job.text),
                    outcome: ChunkOutcome::Fallback {
                        reason: FallbackReason::RemoteError,
                    },
                    advisory: Some(format!(
                        "Couldn't summarize {} right now; showing the raw text instead.",
                        default_chapter_title(job.index)
                    )),
                };
            }
        };

        match blocks::chapter_from_response(&job.book_id, job.index, &response) {
            Some(mut chapter) => {
                self.resolve_images(&mut chapter, &job.book_title).await;
                ChunkResult {
                    chapter,
                    outcome: ChunkOutcome::Succeeded,
                    advisory: None,
                }
            }
            None => {
                tracing::warn!(
                    chunk_index = job.index,
                    "summary returned no blocks; falling back to raw text"
                );
                ChunkResult {
                    chapter: blocks::fallback_chapter(&job.book_id, job.index, &job.text),
                    outcome: ChunkOutcome::Fallback {
                        reason: FallbackReason::EmptyResponse,
                    },
                    advisory: Some(format!(
                        "The summary for {} came back empty; showing the raw text instead.",
                        default_chapter_title(job.index)
                    )),
                }
            }
        }
    }

    async fn summarize_with_retries(
        &self,
        request: &SummaryRequest,
        index: usize,
    ) -> anyhow::Result<SummaryResponse> {
        let attempts = self.config.summary_retries.saturating_add(1);
        let mut last_err = None;

        for attempt in 1..=attempts {
            self.dispatcher.await_slot().await;
            let call = self.summarizer.summarize(request);
            let result = match tokio::time::timeout(self.config.request_timeout, call).await {
                Ok(result) => result,
                Err(_) => Err(anyhow::anyhow!(
                    "summary request timed out after {:?}",
                    self.config.request_timeout
                )),
            };
            match result {
                Ok(response) => {
                    tracing::debug!(
                        chunk_index = index,
                        attempt,
                        blocks = response.blocks.len(),
                        cached = response.cached,
                        "summary received"
                    );
                    return Ok(response);
                }
                Err(err) => {
                    tracing::warn!(
                        chunk_index = index,
                        attempt,
                        attempts,
                        error = %format!("{err:#}"),
                        "summary call failed"
                    );
                    last_err = Some(err);
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("no summary attempt was made")))
    }

    async fn resolve_images(&self, chapter: &mut Chapter, book_title: &str) {
        let Some(images) = &self.images else {
            return;
        };
        for block in &mut chapter.blocks {
            let Some(ImageRef::Pending { prompt }) = &block.image else {
                continue;
            };
            let request = ImageRequest::for_book(prompt, book_title);
            match images.generate_image(&request).await {
                Ok(url) => block.image = Some(ImageRef::Url { url }),
                Err(err) => {
                    tracing::warn!(block_id = %block.id, ?err, "image generation failed; keeping prompt");
                }
            }
        }
    }

    async fn complete(&self, job: ChunkJob, result: ChunkResult) {
        let ChunkResult {
            chapter,
            outcome,
            advisory,
        } = result;
        let index = job.index;

        let _persist = self.persist_lock.lock().await;
        let snapshot = {
            let mut guard = self.state();
            let state = &mut *guard;
            let still_current = state
                .book
                .as_ref()
                .is_some_and(|book| book.id == job.book_id)
                && state.progress.is_processing(index);
            if !still_current {
                tracing::debug!(
                    chunk_index = index,
                    book_id = %job.book_id,
                    "book changed while chunk was in flight; discarding result"
                );
                return;
            }

            if let Some(book) = state.book.as_mut() {
                book.replace_chapter(index, chapter);
            }
            state.progress.complete(index);
            state.loading = state.progress.has_in_flight();
            if let Some(message) = &advisory {
                state.advisory = Some(message.clone());
            }
            self.snapshot_of(state)
        };
        self.persist(&snapshot).await;

        tracing::info!(chunk_index = index, ?outcome, "chunk completed");
        if let Some(message) = advisory {
            self.emit(PipelineEvent::Advisory { message });
        }
        self.emit(PipelineEvent::ChunkCompleted { index, outcome });
    }

    fn snapshot_of(&self, state: &PipelineState) -> Snapshot {
        Snapshot {
            book: state.book.clone(),
            raw_chunks: state.raw_chunks.clone(),
            processed: state.progress.processed(),
            book_id: state.book.as_ref().map(|book| book.id.clone()),
            book_title: state.book.as_ref().map(|book| book.title.clone()),
            pending_source: state.pending_source.clone(),
            saved_at: Some(Utc::now()),
        }
    }

    async fn persist(&self, snapshot: &Snapshot) {
        if let Err(err) = self.store.save(snapshot).await {
            tracing::warn!(?err, "failed to persist snapshot; continuing in memory");
        }
    }

    fn emit(&self, event: PipelineEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn state(&self) -> MutexGuard<'_, PipelineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
