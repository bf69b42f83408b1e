//! The page window itself.
//!
//! `PageWindow` ties the slot table, job queue, worker pool, decoder, and
//! disk cache together. Callers drive it with scroll positions; the window
//! schedules decodes for pages entering the retained range and evicts
//! resident images for pages leaving it.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use paperflow_cache::{AspectSignature, CacheKey, PageCache};
use paperflow_decoder::{DecodeError, DocumentHandle, PageDecoder, RgbaImage};

use crate::cancel::CancellationToken;
use crate::pool::{DecodeJob, JobQueue, WorkerPool, WorkerPoolConfig};
use crate::slots::SlotTable;

/// Tuning for a [`PageWindow`].
#[derive(Debug, Clone)]
pub struct WindowConfig {
    /// Decode worker threads.
    pub worker_count: usize,
    /// Idle poll cadence of the workers.
    pub poll_interval: Duration,
    /// Pages retained beyond each edge of the visible range.
    pub prefetch_distance: u32,
    /// Number of simultaneously visible pages.
    pub visible_len: u32,
    /// Raster width requested from the decoder, in pixels.
    pub target_width: u32,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            worker_count: 4,
            poll_interval: Duration::from_millis(50),
            prefetch_distance: 1,
            visible_len: 1,
            target_width: 1080,
        }
    }
}

impl WindowConfig {
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
}

struct WindowShared {
    decoder: Arc<dyn PageDecoder>,
    handle: DocumentHandle,
    cache: PageCache,
    document_name: String,
    page_count: u32,
    slots: SlotTable,
    queue: JobQueue,
    token: CancellationToken,
    target_width: u32,
    /// Current visible range, inclusive on both ends.
    visible: Mutex<(u32, u32)>,
    /// Pages allowed to hold an in-memory image, inclusive on both ends.
    /// Starts as the whole document and narrows on every scroll.
    retained: Mutex<(u32, u32)>,
}

impl WindowShared {
    fn cache_key(&self, page_index: u32) -> Result<CacheKey, DecodeError> {
        let size = self.decoder.page_size(self.handle, page_index)?;
        let aspect = AspectSignature::new(
            size.width_pt.round().max(1.0) as u32,
            size.height_pt.round().max(1.0) as u32,
        );
        Ok(CacheKey::new(self.document_name.clone(), page_index, aspect))
    }

    fn is_retained(&self, page: u32) -> bool {
        let (first, last) = *self.retained.lock().unwrap();
        page >= first && page <= last
    }

    /// Publishes a finished job, keeping the image in memory only while
    /// the page is still inside the retained range.
    ///
    /// `keep_in_memory` was decided at enqueue time; a scroll may have
    /// moved the window since, and its eviction pass cannot see a job that
    /// has not published yet. The post-publish re-check closes the other
    /// interleaving, where the scroll lands between the range read and the
    /// publish.
    fn publish_job(&self, job: DecodeJob, image: RgbaImage, cached: bool) {
        let page = job.page_index;
        let keep = job.keep_in_memory && self.is_retained(page);

        self.slots.publish(page, keep.then(|| Arc::new(image)), cached);

        if keep && !self.is_retained(page) {
            self.slots.evict(page);
        }
    }

    /// Executes one decode job on a worker thread.
    ///
    /// Cache hit loads the PNG and skips the decoder. Cache miss decodes,
    /// persists, and publishes. Any failure or a cancelled token releases
    /// the slot instead of publishing.
    fn run_job(&self, job: DecodeJob) {
        let page = job.page_index;

        if self.token.is_cancelled() {
            self.slots.fail(page);
            return;
        }

        let key = match self.cache_key(page) {
            Ok(key) => key,
            Err(err) => {
                tracing::warn!(page, error = %err, "cache key derivation failed");
                self.slots.fail(page);
                return;
            }
        };

        if self.cache.exists(&key) {
            if let Some(image) = self.cache.load(&key) {
                self.publish_job(job, image, true);
                return;
            }
            // Entry was unreadable; fall through and decode it again.
        }

        let image = match self.decoder.decode_page(self.handle, page, self.target_width) {
            Ok(image) => image,
            Err(err) => {
                tracing::warn!(page, error = %err, "page decode failed");
                self.slots.fail(page);
                return;
            }
        };

        if self.token.is_cancelled() {
            self.slots.fail(page);
            return;
        }

        let cached = match self.cache.save(&key, &image) {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(page, error = %err, "cache write failed, image stays in memory only");
                false
            }
        };

        self.publish_job(job, image, cached);
    }
}

/// Sliding window of decoded pages for one open document.
pub struct PageWindow {
    shared: Arc<WindowShared>,
    config: WindowConfig,
    pool: Option<WorkerPool>,
}

impl PageWindow {
    /// Creates the window and starts its worker pool.
    ///
    /// `document_name` keys the disk cache, so two documents with the same
    /// file name share cache entries by design.
    pub fn new(
        decoder: Arc<dyn PageDecoder>,
        handle: DocumentHandle,
        cache: PageCache,
        document_name: impl Into<String>,
        config: WindowConfig,
    ) -> Result<Self, DecodeError> {
        let page_count = decoder.page_count(handle)?;
        let queue = JobQueue::new();

        let shared = Arc::new(WindowShared {
            decoder,
            handle,
            cache,
            document_name: document_name.into(),
            page_count,
            slots: SlotTable::new(page_count),
            queue: queue.clone(),
            token: CancellationToken::new(),
            target_width: config.target_width,
            visible: Mutex::new((0, config.visible_len.saturating_sub(1))),
            retained: Mutex::new((0, page_count.saturating_sub(1))),
        });

        let executor = {
            let shared = shared.clone();
            Arc::new(move |job: DecodeJob| shared.run_job(job))
        };
        let pool_config = WorkerPoolConfig::new(config.worker_count)
            .with_poll_interval(config.poll_interval);
        let pool = WorkerPool::new(queue, executor, pool_config);

        Ok(Self {
            shared,
            config,
            pool: Some(pool),
        })
    }

    pub fn page_count(&self) -> u32 {
        self.shared.page_count
    }

    pub fn slots(&self) -> &SlotTable {
        &self.shared.slots
    }

    /// Schedules a decode for `page_index` unless one is already resident
    /// or in flight. Out-of-range indices and cancelled windows are no-ops.
    pub fn ensure_page(&self, page_index: u32, keep_in_memory: bool) {
        if page_index >= self.shared.page_count || self.shared.token.is_cancelled() {
            return;
        }

        if self.shared.slots.try_begin_decode(page_index) {
            self.shared.queue.push(DecodeJob {
                page_index,
                keep_in_memory,
            });
        }
    }

    /// Schedules the initial visible range plus the leading prefetch band.
    pub fn initial_prefetch(&self) {
        if self.shared.page_count == 0 {
            return;
        }

        let last = self
            .config
            .visible_len
            .saturating_sub(1)
            .saturating_add(self.config.prefetch_distance)
            .min(self.shared.page_count - 1);
        *self.shared.visible.lock().unwrap() =
            (0, self.config.visible_len.saturating_sub(1).min(last));
        *self.shared.retained.lock().unwrap() = (0, last);

        for page in 0..=last {
            self.ensure_page(page, true);
        }
    }

    /// Moves the window after a scroll from `prev_first` to `new_first`.
    ///
    /// Visible pages and one prefetch page `distance` beyond the leading
    /// edge are scheduled; resident pages outside the retained range
    /// `[first - distance, last + distance]` are evicted. A large jump
    /// evicts everything left behind in one pass.
    pub fn on_scroll(&self, prev_first: u32, new_first: u32, distance: u32) {
        if self.shared.page_count == 0 {
            return;
        }

        let forward = new_first >= prev_first;
        let first = new_first.min(self.shared.page_count - 1);
        let last = first
            .saturating_add(self.config.visible_len.saturating_sub(1))
            .min(self.shared.page_count - 1);
        let retain_first = first.saturating_sub(distance);
        let retain_last = last
            .saturating_add(distance)
            .min(self.shared.page_count - 1);

        // Ranges move before any job is enqueued, so a job dispatched for
        // the new position never publishes against the old ranges.
        *self.shared.visible.lock().unwrap() = (first, last);
        *self.shared.retained.lock().unwrap() = (retain_first, retain_last);

        for page in first..=last {
            self.ensure_page(page, true);
        }

        if forward {
            let target = last.saturating_add(distance);
            if target < self.shared.page_count {
                self.ensure_page(target, true);
            }
        } else if let Some(target) = first.checked_sub(distance) {
            self.ensure_page(target, true);
        }

        for page in self.shared.slots.resident_indices() {
            if page < retain_first || page > retain_last {
                self.shared.slots.evict(page);
            }
        }
    }

    /// Schedules every page of the document.
    ///
    /// Pages inside the current visible range stay resident in memory;
    /// all other pages are decoded straight through to the disk cache.
    pub fn render_all(&self) {
        let (first, last) = *self.shared.visible.lock().unwrap();
        for page in 0..self.shared.page_count {
            self.ensure_page(page, page >= first && page <= last);
        }
    }

    /// Stops new work: cancels the token and releases every queued slot.
    /// Jobs already running on a worker observe the token and bail out.
    pub fn cancel(&self) {
        self.shared.token.cancel();
        for job in self.shared.queue.drain() {
            self.shared.slots.fail(job.page_index);
        }
    }

    /// Cancels outstanding work and joins the worker threads.
    pub fn shutdown(mut self) {
        self.cancel();
        if let Some(pool) = self.pool.take() {
            pool.shutdown();
        }
    }
}

impl Drop for PageWindow {
    fn drop(&mut self) {
        self.cancel();
        if let Some(pool) = self.pool.take() {
            pool.shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::slots::PageSlotState;
    use paperflow_decoder::PageSize;
    use std::collections::HashSet;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Instant;

    struct StubDecoder {
        page_count: u32,
        decode_calls: AtomicUsize,
        decode_delay: Duration,
        failing_pages: HashSet<u32>,
        seen_pages: Mutex<Vec<u32>>,
    }

    impl StubDecoder {
        fn new(page_count: u32) -> Self {
            Self {
                page_count,
                decode_calls: AtomicUsize::new(0),
                decode_delay: Duration::ZERO,
                failing_pages: HashSet::new(),
                seen_pages: Mutex::new(Vec::new()),
            }
        }

        fn with_delay(mut self, delay: Duration) -> Self {
            self.decode_delay = delay;
            self
        }

        fn failing_on(mut self, page: u32) -> Self {
            self.failing_pages.insert(page);
            self
        }
    }

    impl PageDecoder for StubDecoder {
        fn open(&self, _path: &Path) -> Result<DocumentHandle, DecodeError> {
            unimplemented!("windows receive an already opened handle")
        }

        fn page_count(&self, _handle: DocumentHandle) -> Result<u32, DecodeError> {
            Ok(self.page_count)
        }

        fn page_size(
            &self,
            _handle: DocumentHandle,
            page_index: u32,
        ) -> Result<PageSize, DecodeError> {
            if page_index >= self.page_count {
                return Err(DecodeError::IndexOutOfRange {
                    page: page_index,
                    page_count: self.page_count,
                });
            }
            Ok(PageSize {
                width_pt: 612.0,
                height_pt: 792.0,
            })
        }

        fn decode_page(
            &self,
            _handle: DocumentHandle,
            page_index: u32,
            target_width: u32,
        ) -> Result<RgbaImage, DecodeError> {
            self.seen_pages.lock().unwrap().push(page_index);
            if page_index >= self.page_count {
                return Err(DecodeError::IndexOutOfRange {
                    page: page_index,
                    page_count: self.page_count,
                });
            }
            if self.failing_pages.contains(&page_index) {
                return Err(DecodeError::DecodeFailure("stub failure".to_owned()));
            }
            if !self.decode_delay.is_zero() {
                thread::sleep(self.decode_delay);
            }
            self.decode_calls.fetch_add(1, Ordering::SeqCst);
            Ok(RgbaImage::new(target_width.min(8), 8))
        }

        fn close(&self, _handle: DocumentHandle) -> Result<(), DecodeError> {
            Ok(())
        }
    }

    fn handle() -> DocumentHandle {
        DocumentHandle::from_raw(1)
    }

    fn window(
        decoder: Arc<StubDecoder>,
        config: WindowConfig,
    ) -> (PageWindow, tempfile::TempDir) {
        let dir = tempfile::tempdir().expect("tempdir");
        let cache = PageCache::new(dir.path()).expect("cache");
        let window = PageWindow::new(decoder, handle(), cache, "doc.pdf", config)
            .expect("window should build");
        (window, dir)
    }

    fn fast_config() -> WindowConfig {
        WindowConfig::default().with_poll_interval(Duration::from_millis(5))
    }

    fn wait_until(timeout: Duration, mut pred: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if pred() {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn concurrent_requests_decode_each_page_once() {
        let decoder = Arc::new(StubDecoder::new(1).with_delay(Duration::from_millis(20)));
        let (window, _dir) = window(decoder.clone(), fast_config());
        let window = Arc::new(window);

        let threads: Vec<_> = (0..8)
            .map(|_| {
                let window = window.clone();
                thread::spawn(move || window.ensure_page(0, true))
            })
            .collect();
        for thread in threads {
            thread.join().unwrap();
        }

        assert!(wait_until(Duration::from_secs(2), || {
            window.slots().state(0) == Some(PageSlotState::Resident)
        }));
        assert_eq!(decoder.decode_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn scroll_jump_evicts_everything_left_behind() {
        let decoder = Arc::new(StubDecoder::new(40));
        let config = fast_config()
            .with_visible_len(6)
            .with_prefetch_distance(5);
        let (window, _dir) = window(decoder, config);

        // Visible [0, 5] plus the forward prefetch page 10. Settling here
        // makes the jump below exercise the synchronous eviction pass alone.
        window.on_scroll(0, 0, 5);
        assert!(wait_until(Duration::from_secs(2), || {
            (0..6).all(|page| window.slots().state(page) == Some(PageSlotState::Resident))
                && window.slots().state(10) == Some(PageSlotState::Resident)
        }));

        window.on_scroll(0, 20, 5);
        assert!(wait_until(Duration::from_secs(2), || {
            (20..26).all(|page| window.slots().state(page) == Some(PageSlotState::Resident))
        }));

        // Retained range is [15, 30]; the old window must be gone.
        for page in 0..15 {
            assert_ne!(
                window.slots().state(page),
                Some(PageSlotState::Resident),
                "page {page} should not be resident"
            );
            assert!(window.slots().image(page).is_none());
        }
    }

    #[test]
    fn decodes_finishing_after_a_jump_do_not_stay_resident() {
        let decoder = Arc::new(StubDecoder::new(40).with_delay(Duration::from_millis(50)));
        let config = fast_config()
            .with_visible_len(6)
            .with_prefetch_distance(5);
        let (window, _dir) = window(decoder, config);

        // Jump while the first window's decodes are still on the workers,
        // so their publishes land after the eviction pass has run.
        window.on_scroll(0, 0, 5);
        thread::sleep(Duration::from_millis(20));
        window.on_scroll(0, 20, 5);

        assert!(wait_until(Duration::from_secs(5), || {
            (0..40).all(|page| window.slots().state(page) != Some(PageSlotState::Decoding))
                && (20..26).all(|page| window.slots().state(page) == Some(PageSlotState::Resident))
        }));

        // Retained range is [15, 30]; late publishes must not re-materialize
        // pages behind it.
        for page in 0..15 {
            assert_ne!(
                window.slots().state(page),
                Some(PageSlotState::Resident),
                "page {page} must not hold an image after the jump"
            );
            assert!(window.slots().image(page).is_none());
        }
    }

    #[test]
    fn backward_scroll_at_first_page_stays_in_range() {
        let decoder = Arc::new(StubDecoder::new(10));
        let config = fast_config().with_prefetch_distance(3);
        let (window, _dir) = window(decoder.clone(), config);

        window.on_scroll(5, 0, 3);
        assert!(wait_until(Duration::from_secs(2), || {
            window.slots().state(0) == Some(PageSlotState::Resident)
        }));

        let seen = decoder.seen_pages.lock().unwrap();
        assert!(seen.iter().all(|&page| page < 10));
    }

    #[test]
    fn decode_failure_is_contained_to_its_page() {
        let decoder = Arc::new(StubDecoder::new(3).failing_on(1));
        let (window, _dir) = window(decoder, fast_config());

        for page in 0..3 {
            window.ensure_page(page, true);
        }

        assert!(wait_until(Duration::from_secs(2), || {
            window.slots().state(0) == Some(PageSlotState::Resident)
                && window.slots().state(2) == Some(PageSlotState::Resident)
                && window.slots().state(1) == Some(PageSlotState::Empty)
        }));
        assert!(window.slots().image(1).is_none());
    }

    #[test]
    fn render_all_caches_every_page_but_keeps_only_visible_resident() {
        let decoder = Arc::new(StubDecoder::new(6));
        let config = fast_config().with_visible_len(2);
        let (window, _dir) = window(decoder, config);

        window.render_all();

        assert!(wait_until(Duration::from_secs(2), || {
            (0..6).all(|page| window.slots().is_cached_on_disk(page))
        }));
        assert!(wait_until(Duration::from_secs(2), || {
            window.slots().resident_indices() == vec![0, 1]
        }));
    }

    #[test]
    fn cancel_stops_new_work() {
        let decoder = Arc::new(StubDecoder::new(4));
        let (window, _dir) = window(decoder.clone(), fast_config());

        window.cancel();
        window.ensure_page(0, true);

        thread::sleep(Duration::from_millis(50));
        assert_eq!(decoder.decode_calls.load(Ordering::SeqCst), 0);
        assert_eq!(window.slots().state(0), Some(PageSlotState::Empty));
    }

    #[test]
    fn cached_page_skips_the_decoder() {
        let first = Arc::new(StubDecoder::new(1));
        let dir = tempfile::tempdir().expect("tempdir");
        let cache = PageCache::new(dir.path()).expect("cache");

        let window_a = PageWindow::new(
            first,
            handle(),
            cache.clone(),
            "doc.pdf",
            fast_config(),
        )
        .expect("window should build");
        window_a.ensure_page(0, true);
        assert!(wait_until(Duration::from_secs(2), || {
            window_a.slots().is_cached_on_disk(0)
        }));
        window_a.shutdown();

        let second = Arc::new(StubDecoder::new(1));
        let window_b = PageWindow::new(
            second.clone(),
            handle(),
            cache,
            "doc.pdf",
            fast_config(),
        )
        .expect("window should build");
        window_b.ensure_page(0, true);
        assert!(wait_until(Duration::from_secs(2), || {
            window_b.slots().state(0) == Some(PageSlotState::Resident)
        }));

        assert_eq!(second.decode_calls.load(Ordering::SeqCst), 0);
        window_b.shutdown();
    }
}
