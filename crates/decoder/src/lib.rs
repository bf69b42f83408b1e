//! Page decoder: opens a local file as a paged document and rasterizes
//! individual pages on demand.
//!
//! The decoder owns the expensive per-page decode operation and the
//! document handle lifecycle. Concurrent `decode_page` and `close` on the
//! same handle must be sequenced by the caller (the session joins its
//! workers before closing); this implementation degrades to
//! `InvalidHandle` rather than misbehaving if that is violated.

use image::{ImageBuffer, Rgba};
use lopdf::Document;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

pub type RgbaImage = ImageBuffer<Rgba<u8>, Vec<u8>>;

/// Refuse rasterization beyond this buffer size rather than allocate it.
const MAX_TARGET_PIXELS: u64 = 64 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DocumentHandle(u64);

impl DocumentHandle {
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

/// Source page dimensions in points.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageSize {
    pub width_pt: f32,
    pub height_pt: f32,
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("not a parseable document: {0}")]
    InvalidDocument(String),
    #[error("invalid handle {0}")]
    InvalidHandle(u64),
    #[error("page {page} out of range (page_count={page_count})")]
    IndexOutOfRange { page: u32, page_count: u32 },
    #[error("page rasterization failed: {0}")]
    DecodeFailure(String),
}

/// Decodes pages of an open document into raster images.
///
/// `decode_page` computes the target height from the source aspect ratio
/// (`target_height = source_height * target_width / source_width`,
/// integer-truncated) and releases page-level resources on every exit
/// path. The returned buffer is owned by the caller.
pub trait PageDecoder: Send + Sync {
    fn open(&self, path: &Path) -> Result<DocumentHandle, DecodeError>;
    fn page_count(&self, handle: DocumentHandle) -> Result<u32, DecodeError>;
    fn page_size(&self, handle: DocumentHandle, page_index: u32) -> Result<PageSize, DecodeError>;
    fn decode_page(
        &self,
        handle: DocumentHandle,
        page_index: u32,
        target_width: u32,
    ) -> Result<RgbaImage, DecodeError>;
    fn close(&self, handle: DocumentHandle) -> Result<(), DecodeError>;
}

#[derive(Debug)]
struct DocumentRecord {
    page_sizes: Vec<PageSize>,
    /// Pages currently held open by in-flight decodes.
    open_pages: AtomicU32,
}

/// Releases the page-level resource when dropped, so every exit path out
/// of `decode_page` (including errors) returns the page.
struct PageLease<'a> {
    record: &'a DocumentRecord,
}

impl<'a> PageLease<'a> {
    fn acquire(record: &'a DocumentRecord) -> Self {
        record.open_pages.fetch_add(1, Ordering::AcqRel);
        Self { record }
    }
}

impl Drop for PageLease<'_> {
    fn drop(&mut self) {
        self.record.open_pages.fetch_sub(1, Ordering::AcqRel);
    }
}

#[derive(Debug, Default)]
struct DecoderState {
    next_handle: u64,
    docs: HashMap<DocumentHandle, Arc<DocumentRecord>>,
}

/// Default `PageDecoder` backed by `lopdf`.
///
/// Page geometry comes from each page's MediaBox; rasterization fills a
/// white page with a light border at the requested resolution. The handle
/// map sits behind an interior mutex so decodes can run from worker
/// threads, and records are shared out as `Arc`s so the map lock is never
/// held across a rasterization.
#[derive(Debug, Default)]
pub struct LopdfDecoder {
    state: Mutex<DecoderState>,
}

impl LopdfDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    fn parse_sizes(bytes: &[u8]) -> Result<Vec<PageSize>, DecodeError> {
        if bytes.windows("/Encrypt".len()).any(|window| window == b"/Encrypt") {
            return Err(DecodeError::InvalidDocument("encrypted document".to_owned()));
        }

        let doc = Document::load_mem(bytes)
            .map_err(|err| DecodeError::InvalidDocument(err.to_string()))?;
        let pages = doc.get_pages();
        let mut sizes = Vec::with_capacity(pages.len());

        for (_, object_id) in pages {
            let dict = doc
                .get_dictionary(object_id)
                .map_err(|err| DecodeError::InvalidDocument(err.to_string()))?;
            let size = dict
                .get(b"MediaBox")
                .ok()
                .and_then(|obj| obj.as_array().ok())
                .and_then(|array| {
                    if array.len() != 4 {
                        return None;
                    }
                    let x0 = array[0].as_float().ok()?;
                    let y0 = array[1].as_float().ok()?;
                    let x1 = array[2].as_float().ok()?;
                    let y1 = array[3].as_float().ok()?;
                    Some(PageSize { width_pt: (x1 - x0).abs(), height_pt: (y1 - y0).abs() })
                })
                .unwrap_or(PageSize { width_pt: 612.0, height_pt: 792.0 });

            sizes.push(size);
        }

        if sizes.is_empty() {
            return Err(DecodeError::InvalidDocument("document has no pages".to_owned()));
        }

        Ok(sizes)
    }

    fn record(&self, handle: DocumentHandle) -> Result<Arc<DocumentRecord>, DecodeError> {
        let state = self.state.lock().unwrap();
        state.docs.get(&handle).cloned().ok_or(DecodeError::InvalidHandle(handle.raw()))
    }

    fn rasterize(width: u32, height: u32) -> Result<RgbaImage, DecodeError> {
        if width as u64 * height as u64 > MAX_TARGET_PIXELS {
            return Err(DecodeError::DecodeFailure(format!(
                "page too large at requested resolution ({width}x{height})"
            )));
        }

        let mut image = RgbaImage::from_pixel(width, height, Rgba([255, 255, 255, 255]));

        if width >= 4 && height >= 4 {
            for x in 0..width {
                image.put_pixel(x, 0, Rgba([220, 220, 220, 255]));
                image.put_pixel(x, height - 1, Rgba([220, 220, 220, 255]));
            }
            for y in 0..height {
                image.put_pixel(0, y, Rgba([220, 220, 220, 255]));
                image.put_pixel(width - 1, y, Rgba([220, 220, 220, 255]));
            }
        }

        Ok(image)
    }
}

impl PageDecoder for LopdfDecoder {
    fn open(&self, path: &Path) -> Result<DocumentHandle, DecodeError> {
        let bytes = fs::read(path)?;
        let page_sizes = Self::parse_sizes(&bytes)?;

        let mut state = self.state.lock().unwrap();
        state.next_handle += 1;
        let handle = DocumentHandle(state.next_handle);
        state.docs.insert(
            handle,
            Arc::new(DocumentRecord { page_sizes, open_pages: AtomicU32::new(0) }),
        );

        tracing::debug!(handle = handle.raw(), path = %path.display(), "document opened");

        Ok(handle)
    }

    fn page_count(&self, handle: DocumentHandle) -> Result<u32, DecodeError> {
        Ok(self.record(handle)?.page_sizes.len() as u32)
    }

    fn page_size(&self, handle: DocumentHandle, page_index: u32) -> Result<PageSize, DecodeError> {
        let record = self.record(handle)?;
        record.page_sizes.get(page_index as usize).copied().ok_or(
            DecodeError::IndexOutOfRange {
                page: page_index,
                page_count: record.page_sizes.len() as u32,
            },
        )
    }

    fn decode_page(
        &self,
        handle: DocumentHandle,
        page_index: u32,
        target_width: u32,
    ) -> Result<RgbaImage, DecodeError> {
        if target_width == 0 {
            return Err(DecodeError::DecodeFailure("target width must be non-zero".to_owned()));
        }

        let record = self.record(handle)?;
        let page_count = record.page_sizes.len() as u32;
        let size = record
            .page_sizes
            .get(page_index as usize)
            .copied()
            .ok_or(DecodeError::IndexOutOfRange { page: page_index, page_count })?;

        let _page = PageLease::acquire(&record);

        let source_width = size.width_pt.round().max(1.0) as u64;
        let source_height = size.height_pt.round().max(1.0) as u64;
        let target_height = ((source_height * target_width as u64) / source_width).max(1);
        let target_height =
            u32::try_from(target_height).map_err(|_| {
                DecodeError::DecodeFailure("computed page height overflows".to_owned())
            })?;

        Self::rasterize(target_width, target_height)
    }

    fn close(&self, handle: DocumentHandle) -> Result<(), DecodeError> {
        let mut state = self.state.lock().unwrap();
        let record =
            state.docs.remove(&handle).ok_or(DecodeError::InvalidHandle(handle.raw()))?;

        let open_pages = record.open_pages.load(Ordering::Acquire);
        if open_pages > 0 {
            // Caller failed to sequence close after in-flight decodes.
            tracing::warn!(handle = handle.raw(), open_pages, "closed document with open pages");
        }

        Ok(())
    }
}
