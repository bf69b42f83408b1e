//! Document session: the top-level viewing lifecycle.
//!
//! A session ties the origin fetcher, document store, page decoder, disk
//! cache, and page window together. Selecting a document materializes it
//! locally (download on first visit, reuse afterwards), opens it with the
//! decoder, and starts a window; closing tears everything down in an order
//! that never lets a decode race the handle release.

use std::sync::Arc;
use std::time::Duration;

use paperflow_cache::{CacheError, PageCache};
use paperflow_decoder::{DecodeError, DocumentHandle, PageDecoder};
use paperflow_store::{Document, DocumentStore, FetchError, OriginFetcher, StoreError};
use paperflow_window::{PageWindow, WindowConfig};

/// Where the session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No document open.
    Idle,
    /// A document is being materialized and opened.
    Loading,
    /// A document is open and the window is serving pages.
    Ready,
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("document fetch failed: {0}")]
    Fetch(#[from] FetchError),
    #[error("document store failed: {0}")]
    Store(#[from] StoreError),
    #[error("document decode failed: {0}")]
    Decode(#[from] DecodeError),
    #[error("page cache failed: {0}")]
    Cache(#[from] CacheError),
}

/// Session tuning, applied to the window and worker pool it creates.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub worker_count: usize,
    pub poll_interval: Duration,
    pub prefetch_distance: u32,
    pub visible_len: u32,
    pub target_width: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        let window = WindowConfig::default();
        Self {
            worker_count: window.worker_count,
            poll_interval: window.poll_interval,
            prefetch_distance: window.prefetch_distance,
            visible_len: window.visible_len,
            target_width: window.target_width,
        }
    }
}

impl SessionConfig {
    pub fn with_worker_count(mut self, count: usize) -> Self {
        self.worker_count = count;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_prefetch_distance(mut self, distance: u32) -> Self {
        self.prefetch_distance = distance;
        self
    }

    pub fn with_visible_len(mut self, len: u32) -> Self {
        self.visible_len = len.max(1);
        self
    }

    pub fn with_target_width(mut self, width: u32) -> Self {
        self.target_width = width;
        self
    }

    fn window_config(&self) -> WindowConfig {
        WindowConfig::default()
            .with_worker_count(self.worker_count)
            .with_poll_interval(self.poll_interval)
            .with_prefetch_distance(self.prefetch_distance)
            .with_visible_len(self.visible_len)
            .with_target_width(self.target_width)
    }
}

/// One open-document lifecycle: `Idle -> Loading -> Ready`, back to `Idle`
/// on close or on a failed selection.
pub struct DocumentSession {
    store: DocumentStore,
    fetcher: Arc<dyn OriginFetcher>,
    decoder: Arc<dyn PageDecoder>,
    cache: PageCache,
    config: SessionConfig,
    state: SessionState,
    document: Option<Document>,
    handle: Option<DocumentHandle>,
    window: Option<PageWindow>,
    current_first: u32,
    last_error: Option<String>,
}

impl DocumentSession {
    pub fn new(
        store: DocumentStore,
        fetcher: Arc<dyn OriginFetcher>,
        decoder: Arc<dyn PageDecoder>,
        cache: PageCache,
        config: SessionConfig,
    ) -> Self {
        Self {
            store,
            fetcher,
            decoder,
            cache,
            config,
            state: SessionState::Idle,
            document: None,
            handle: None,
            window: None,
            current_first: 0,
            last_error: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn document(&self) -> Option<&Document> {
        self.document.as_ref()
    }

    pub fn window(&self) -> Option<&PageWindow> {
        self.window.as_ref()
    }

    /// Message of the most recent failed selection, cleared by a
    /// successful one.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Opens `document`, replacing whatever was open before.
    ///
    /// First visit downloads and materializes the file; later visits reuse
    /// the stored copy without touching the network. On failure the session
    /// returns to `Idle` with `last_error` set and the error is also
    /// returned to the caller.
    pub fn select_document(&mut self, document: Document) -> Result<(), SessionError> {
        self.reset();
        self.state = SessionState::Loading;
        tracing::info!(name = %document.display_name, "loading document");

        match self.open_document(document) {
            Ok(()) => {
                self.state = SessionState::Ready;
                self.last_error = None;
                tracing::info!("document ready");
                Ok(())
            }
            Err(err) => {
                self.reset();
                self.last_error = Some(err.to_string());
                tracing::warn!(error = %err, "document selection failed");
                Err(err)
            }
        }
    }

    fn open_document(&mut self, mut document: Document) -> Result<(), SessionError> {
        let path = match self.store.exists(&document.source_file_name) {
            Some(path) => {
                tracing::debug!(name = %document.source_file_name, "document already materialized");
                path
            }
            None => {
                let bytes = self.fetcher.fetch(&document.source_url)?;
                self.store.save(&document.source_file_name, &bytes)?
            }
        };
        document.local_path = Some(path.clone());

        let handle = self.decoder.open(&path)?;
        let window = match PageWindow::new(
            self.decoder.clone(),
            handle,
            self.cache.clone(),
            document.source_file_name.clone(),
            self.config.window_config(),
        ) {
            Ok(window) => window,
            Err(err) => {
                // Give the handle back before surfacing the error.
                if let Err(close_err) = self.decoder.close(handle) {
                    tracing::warn!(error = %close_err, "closing handle after failed open");
                }
                return Err(err.into());
            }
        };
        window.initial_prefetch();

        self.document = Some(document);
        self.handle = Some(handle);
        self.window = Some(window);
        self.current_first = 0;
        Ok(())
    }

    /// Reports that the first visible page changed, moving the window.
    pub fn on_visible_range_changed(&mut self, new_first: u32) {
        if let Some(window) = &self.window {
            window.on_scroll(self.current_first, new_first, self.config.prefetch_distance);
            self.current_first = new_first.min(window.page_count().saturating_sub(1));
        }
    }

    /// Schedules every page of the open document for decode-and-cache.
    pub fn render_all(&self) {
        if let Some(window) = &self.window {
            window.render_all();
        }
    }

    /// Closes the open document and returns to `Idle`.
    pub fn close(&mut self) {
        self.reset();
        self.state = SessionState::Idle;
    }

    /// Shuts the window down (joining its workers) before releasing the
    /// decoder handle, so a close never races an in-flight decode.
    fn reset(&mut self) {
        if let Some(window) = self.window.take() {
            window.shutdown();
        }
        if let Some(handle) = self.handle.take() {
            if let Err(err) = self.decoder.close(handle) {
                tracing::warn!(error = %err, "closing document handle");
            }
        }
        self.document = None;
        self.current_first = 0;
        self.state = SessionState::Idle;
    }
}

impl Drop for DocumentSession {
    fn drop(&mut self) {
        self.reset();
    }
}
