//! Deterministic pure-Rust engine binding.
//!
//! Understands a minimal PDF-like layout: a `%PDF-` header followed by one
//! `/Type /Page` object per page, each with an optional
//! `/MediaBox [x0 y0 x1 y1]` in points (US Letter when absent). Rendering fills
//! the bitmap with a per-page pattern in a configurable number of increments,
//! consulting the pause decision between increments.
//!
//! Used by the test suite, the benchmark and the demo; it also doubles as the
//! reference for what an engine binding must do.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::{
    BitmapHandle, BitmapInfo, DocumentHandle, EngineBinding, EngineError, PageHandle,
    PauseDecision, PixelSize, RenderEngine, RenderProgress,
};

/// Bytes per pixel of every synthetic bitmap (BGRA / BGRx).
pub const BYTES_PER_PIXEL: usize = 4;

/// Largest pixel buffer a synthetic bitmap may allocate (256 MiB).
pub const MAX_BITMAP_BYTES: usize = 256 << 20;

const HEADER: &[u8] = b"%PDF-";
const PAGE_MARKER: &[u8] = b"/Type /Page";
const MEDIA_BOX: &[u8] = b"/MediaBox [";
const LETTER: (f64, f64) = (612.0, 792.0);

/// Build a document with `pages` US Letter pages.
#[must_use]
pub fn document(pages: usize) -> Vec<u8> {
    document_with_sizes(&vec![LETTER; pages])
}

/// Build a document whose pages have the given sizes in points.
#[must_use]
pub fn document_with_sizes(sizes: &[(f64, f64)]) -> Vec<u8> {
    let mut out = String::from("%PDF-1.7\n");
    out.push_str(&format!("1 0 obj << /Type /Pages /Count {} >> endobj\n", sizes.len()));
    for (idx, (w, h)) in sizes.iter().enumerate() {
        out.push_str(&format!(
            "{} 0 obj << /Type /Page /Parent 1 0 R /MediaBox [0 0 {w} {h}] >> endobj\n",
            idx + 2
        ));
    }
    out.push_str("%%EOF\n");
    out.into_bytes()
}

/// Knobs for the synthetic engine.
#[derive(Debug, Clone)]
pub struct SyntheticConfig {
    /// Number of increments a full page render takes.
    pub render_steps: u32,
    /// Sleep per increment, to simulate expensive pages.
    pub step_delay: Duration,
    /// Page index whose render always fails.
    pub fail_render_on_page: Option<usize>,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            render_steps: 4,
            step_delay: Duration::ZERO,
            fail_render_on_page: None,
        }
    }
}

impl SyntheticConfig {
    /// Create a config with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of increments per page.
    #[must_use]
    pub const fn with_render_steps(mut self, steps: u32) -> Self {
        self.render_steps = steps;
        self
    }

    /// Set the per-increment delay.
    #[must_use]
    pub const fn with_step_delay(mut self, delay: Duration) -> Self {
        self.step_delay = delay;
        self
    }

    /// Make every render of page `index` fail.
    #[must_use]
    pub const fn with_failing_page(mut self, index: usize) -> Self {
        self.fail_render_on_page = Some(index);
        self
    }
}

#[derive(Debug, Default)]
struct Tally {
    created: AtomicUsize,
    live: AtomicUsize,
    pending_failures: AtomicUsize,
}

/// Engine binding producing [`SyntheticInstance`]s.
///
/// Cloning shares the instance counters and failure injection state.
#[derive(Debug, Clone, Default)]
pub struct SyntheticEngine {
    config: SyntheticConfig,
    tally: Arc<Tally>,
}

impl SyntheticEngine {
    /// Create a binding with the given config.
    #[must_use]
    pub fn new(config: SyntheticConfig) -> Self {
        Self {
            config,
            tally: Arc::new(Tally::default()),
        }
    }

    /// Make the next `count` instance creations fail.
    pub fn fail_next_creations(&self, count: usize) {
        self.tally.pending_failures.store(count, Ordering::SeqCst);
    }

    /// Instances successfully created so far.
    #[must_use]
    pub fn instances_created(&self) -> usize {
        self.tally.created.load(Ordering::SeqCst)
    }

    /// Instances not yet dropped.
    #[must_use]
    pub fn live_instances(&self) -> usize {
        self.tally.live.load(Ordering::SeqCst)
    }
}

impl EngineBinding for SyntheticEngine {
    type Instance = SyntheticInstance;

    fn create_instance(&self) -> Result<SyntheticInstance, EngineError> {
        let injected = self
            .tally
            .pending_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(EngineError::Startup("injected startup failure".into()));
        }
        self.tally.created.fetch_add(1, Ordering::SeqCst);
        self.tally.live.fetch_add(1, Ordering::SeqCst);
        Ok(SyntheticInstance {
            config: self.config.clone(),
            tally: Arc::clone(&self.tally),
            next_handle: AtomicU64::new(1),
            documents: HashMap::new(),
            pages: HashMap::new(),
            bitmaps: HashMap::new(),
            renders: HashMap::new(),
        })
    }
}

struct Page {
    document: DocumentHandle,
    index: usize,
    size_points: (f64, f64),
}

struct Bitmap {
    info: BitmapInfo,
    pixels: Vec<u8>,
}

struct RenderJob {
    bitmap: BitmapHandle,
    rows_done: u32,
    step: u32,
}

/// One synthetic engine instance.
pub struct SyntheticInstance {
    config: SyntheticConfig,
    tally: Arc<Tally>,
    next_handle: AtomicU64,
    documents: HashMap<DocumentHandle, Vec<(f64, f64)>>,
    pages: HashMap<PageHandle, Page>,
    bitmaps: HashMap<BitmapHandle, Bitmap>,
    renders: HashMap<PageHandle, RenderJob>,
}

impl Drop for SyntheticInstance {
    fn drop(&mut self) {
        self.tally.live.fetch_sub(1, Ordering::SeqCst);
    }
}

impl SyntheticInstance {
    fn issue(&self) -> u64 {
        self.next_handle.fetch_add(1, Ordering::Relaxed)
    }

    fn page(&self, page: PageHandle) -> Result<&Page, EngineError> {
        self.pages.get(&page).ok_or(EngineError::UnknownHandle {
            kind: "page",
            id: page.raw(),
        })
    }

    /// Run increments until done, failed or the pause decision says stop.
    fn advance(
        &mut self,
        page: PageHandle,
        pause: &mut dyn PauseDecision,
    ) -> Result<RenderProgress, EngineError> {
        let index = self.page(page)?.index;
        let steps = self.config.render_steps.max(1);
        let delay = self.config.step_delay;
        let failing = self.config.fail_render_on_page == Some(index);

        let job = self.renders.get_mut(&page).ok_or_else(|| {
            EngineError::InvalidArgument(format!("no render in progress for {page}"))
        })?;
        let bitmap = self.bitmaps.get_mut(&job.bitmap).ok_or(EngineError::UnknownHandle {
            kind: "bitmap",
            id: job.bitmap.raw(),
        })?;
        let height = bitmap.info.height;
        let rows_per_step = height.div_ceil(steps).max(1);

        loop {
            if failing && job.step + 1 >= steps.div_ceil(2) {
                return Ok(RenderProgress::Failed);
            }
            if !delay.is_zero() {
                std::thread::sleep(delay);
            }
            let end = (job.rows_done + rows_per_step).min(height);
            paint_rows(bitmap, index, job.rows_done, end);
            job.rows_done = end;
            job.step += 1;
            if job.rows_done >= height {
                return Ok(RenderProgress::Done);
            }
            if pause.should_pause() {
                return Ok(RenderProgress::ToBeContinued);
            }
        }
    }
}

fn paint_rows(bitmap: &mut Bitmap, page_index: usize, from: u32, to: u32) {
    let stride = bitmap.info.stride;
    let shade = u8::try_from(page_index % 251).unwrap_or(0);
    for row in from..to {
        let start = row as usize * stride;
        for (col, px) in bitmap.pixels[start..start + stride]
            .chunks_exact_mut(BYTES_PER_PIXEL)
            .enumerate()
        {
            let x = u8::try_from(col % 256).unwrap_or(0);
            let y = u8::try_from(row % 256).unwrap_or(0);
            px.copy_from_slice(&[x, y, shade, 0xFF]);
        }
    }
}

/// Parse page sizes out of a synthetic document.
fn parse_pages(bytes: &[u8]) -> Result<Vec<(f64, f64)>, EngineError> {
    if !bytes.starts_with(HEADER) {
        return Err(EngineError::InvalidDocument("missing %PDF- header".into()));
    }
    let mut sizes = Vec::new();
    let mut cursor = 0;
    while let Some(pos) = find(&bytes[cursor..], PAGE_MARKER) {
        let start = cursor + pos + PAGE_MARKER.len();
        cursor = start;
        // `/Type /Pages` is the page tree node, not a page.
        if bytes.get(start) == Some(&b's') {
            continue;
        }
        let object_end = find(&bytes[start..], b"endobj").map_or(bytes.len(), |end| start + end);
        let object = &bytes[start..object_end];
        let size = match find(object, MEDIA_BOX) {
            Some(at) => parse_media_box(&object[at + MEDIA_BOX.len()..])?,
            None => LETTER,
        };
        sizes.push(size);
    }
    if sizes.is_empty() {
        return Err(EngineError::InvalidDocument("document has no pages".into()));
    }
    Ok(sizes)
}

fn parse_media_box(rest: &[u8]) -> Result<(f64, f64), EngineError> {
    let end = rest
        .iter()
        .position(|b| *b == b']')
        .ok_or_else(|| EngineError::InvalidDocument("unterminated /MediaBox".into()))?;
    let text = std::str::from_utf8(&rest[..end])
        .map_err(|e| EngineError::InvalidDocument(format!("bad /MediaBox: {e}")))?;
    let values = text
        .split_whitespace()
        .map(str::parse::<f64>)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| EngineError::InvalidDocument(format!("bad /MediaBox: {e}")))?;
    match values.as_slice() {
        [x0, y0, x1, y1] if x1 > x0 && y1 > y0 => Ok((x1 - x0, y1 - y0)),
        _ => Err(EngineError::InvalidDocument(format!("bad /MediaBox [{text}]"))),
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn points_to_pixels(points: f64, dpi: u32) -> u32 {
    (points * f64::from(dpi) / 72.0).round().max(1.0) as u32
}

impl RenderEngine for SyntheticInstance {
    fn open_document(&mut self, bytes: &[u8]) -> Result<DocumentHandle, EngineError> {
        let sizes = parse_pages(bytes)?;
        let handle = DocumentHandle(self.issue());
        self.documents.insert(handle, sizes);
        Ok(handle)
    }

    fn close_document(&mut self, document: DocumentHandle) -> Result<(), EngineError> {
        self.documents.remove(&document).ok_or(EngineError::UnknownHandle {
            kind: "document",
            id: document.raw(),
        })?;
        let orphaned: Vec<PageHandle> = self
            .pages
            .iter()
            .filter(|(_, page)| page.document == document)
            .map(|(handle, _)| *handle)
            .collect();
        for page in orphaned {
            self.renders.remove(&page);
            self.pages.remove(&page);
        }
        Ok(())
    }

    fn page_count(&mut self, document: DocumentHandle) -> Result<usize, EngineError> {
        self.documents
            .get(&document)
            .map(Vec::len)
            .ok_or(EngineError::UnknownHandle {
                kind: "document",
                id: document.raw(),
            })
    }

    fn load_page(&mut self, document: DocumentHandle, index: usize) -> Result<PageHandle, EngineError> {
        let sizes = self.documents.get(&document).ok_or(EngineError::UnknownHandle {
            kind: "document",
            id: document.raw(),
        })?;
        let size_points = *sizes.get(index).ok_or_else(|| {
            EngineError::InvalidArgument(format!("page index {index} out of range ({} pages)", sizes.len()))
        })?;
        let handle = PageHandle(self.issue());
        self.pages.insert(
            handle,
            Page {
                document,
                index,
                size_points,
            },
        );
        Ok(handle)
    }

    fn close_page(&mut self, page: PageHandle) -> Result<(), EngineError> {
        self.renders.remove(&page);
        self.pages.remove(&page).map(|_| ()).ok_or(EngineError::UnknownHandle {
            kind: "page",
            id: page.raw(),
        })
    }

    fn page_size_in_pixels(&mut self, page: PageHandle, dpi: u32) -> Result<PixelSize, EngineError> {
        if dpi == 0 {
            return Err(EngineError::InvalidArgument("dpi must be greater than 0".into()));
        }
        let (w, h) = self.page(page)?.size_points;
        Ok(PixelSize {
            width: points_to_pixels(w, dpi),
            height: points_to_pixels(h, dpi),
        })
    }

    fn create_bitmap(&mut self, width: u32, height: u32, _alpha: bool) -> Result<BitmapHandle, EngineError> {
        if width == 0 || height == 0 {
            return Err(EngineError::InvalidArgument(format!(
                "bitmap must not be empty ({width}x{height})"
            )));
        }
        let too_large = || {
            EngineError::InvalidArgument(format!(
                "bitmap {width}x{height} exceeds {MAX_BITMAP_BYTES} bytes"
            ))
        };
        let stride = (width as usize)
            .checked_mul(BYTES_PER_PIXEL)
            .ok_or_else(too_large)?;
        let info = BitmapInfo {
            width,
            height,
            stride,
            bytes_per_pixel: BYTES_PER_PIXEL,
        };
        let len = info
            .buffer_len()
            .filter(|&len| len <= MAX_BITMAP_BYTES)
            .ok_or_else(too_large)?;
        let handle = BitmapHandle(self.issue());
        self.bitmaps.insert(
            handle,
            Bitmap {
                info,
                pixels: vec![0; len],
            },
        );
        Ok(handle)
    }

    fn destroy_bitmap(&mut self, bitmap: BitmapHandle) -> Result<(), EngineError> {
        self.bitmaps.remove(&bitmap).map(|_| ()).ok_or(EngineError::UnknownHandle {
            kind: "bitmap",
            id: bitmap.raw(),
        })
    }

    fn bitmap_info(&mut self, bitmap: BitmapHandle) -> Result<BitmapInfo, EngineError> {
        self.bitmaps
            .get(&bitmap)
            .map(|b| b.info)
            .ok_or(EngineError::UnknownHandle {
                kind: "bitmap",
                id: bitmap.raw(),
            })
    }

    fn bitmap_buffer(&mut self, bitmap: BitmapHandle) -> Result<Vec<u8>, EngineError> {
        self.bitmaps
            .get(&bitmap)
            .map(|b| b.pixels.clone())
            .ok_or(EngineError::UnknownHandle {
                kind: "bitmap",
                id: bitmap.raw(),
            })
    }

    fn render_start(
        &mut self,
        bitmap: BitmapHandle,
        page: PageHandle,
        size: PixelSize,
        pause: &mut dyn PauseDecision,
    ) -> Result<RenderProgress, EngineError> {
        self.page(page)?;
        let info = self.bitmap_info(bitmap)?;
        if info.width != size.width || info.height != size.height {
            return Err(EngineError::InvalidArgument(format!(
                "render size {}x{} does not match {bitmap} ({}x{})",
                size.width, size.height, info.width, info.height
            )));
        }
        if self.renders.contains_key(&page) {
            return Err(EngineError::InvalidArgument(format!("{page} is already rendering")));
        }
        self.renders.insert(
            page,
            RenderJob {
                bitmap,
                rows_done: 0,
                step: 0,
            },
        );
        self.advance(page, pause)
    }

    fn render_continue(
        &mut self,
        page: PageHandle,
        pause: &mut dyn PauseDecision,
    ) -> Result<RenderProgress, EngineError> {
        self.advance(page, pause)
    }

    fn render_close(&mut self, page: PageHandle) -> Result<(), EngineError> {
        self.renders.remove(&page);
        Ok(())
    }
}
