//! Engine binding abstraction.
//!
//! The pool never talks to a rendering library directly. It drives an
//! [`EngineBinding`], which knows how to start one engine instance, and the
//! resulting [`RenderEngine`], which exposes the fixed document operation set
//! (open/close document, load/close page, page size, bitmap lifecycle and the
//! incremental render calls).
//!
//! Engine instances are created and used on a single dedicated worker thread,
//! so [`RenderEngine`] implementations do not need to be `Send` or `Sync`.

pub mod synthetic;

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors reported by an engine binding.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EngineError {
    /// The engine instance could not be started.
    #[error("engine startup failed: {0}")]
    Startup(String),
    /// The supplied bytes are not a readable document.
    #[error("invalid document: {0}")]
    InvalidDocument(String),
    /// A handle does not refer to a live engine object.
    #[error("unknown {kind} handle {id}")]
    UnknownHandle {
        /// Handle kind (`document`, `page`, `bitmap`).
        kind: &'static str,
        /// Raw handle value.
        id: u64,
    },
    /// Argument rejected by the engine (zero-sized bitmap, page out of range, ...).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// Any other engine failure.
    #[error("engine failure: {0}")]
    Failure(String),
}

macro_rules! engine_handle {
    ($(#[$meta:meta])* $name:ident, $label:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub u64);

        impl $name {
            /// Raw handle value as issued by the engine.
            #[must_use]
            pub const fn raw(self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($label, "#{}"), self.0)
            }
        }
    };
}

engine_handle!(
    /// Opaque reference to an open document inside one engine instance.
    DocumentHandle,
    "document"
);
engine_handle!(
    /// Opaque reference to a loaded page inside one engine instance.
    PageHandle,
    "page"
);
engine_handle!(
    /// Opaque reference to a bitmap inside one engine instance.
    BitmapHandle,
    "bitmap"
);

/// Page dimensions in device pixels at a given DPI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PixelSize {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

/// Layout of a bitmap buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BitmapInfo {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Bytes per row.
    pub stride: usize,
    /// Bytes per pixel.
    pub bytes_per_pixel: usize,
}

impl BitmapInfo {
    /// Expected length of the pixel buffer, `None` if it does not fit in
    /// `usize`.
    #[must_use]
    pub const fn buffer_len(&self) -> Option<usize> {
        self.stride.checked_mul(self.height as usize)
    }
}

/// Status reported by the engine after a render start/continue call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RenderProgress {
    /// The engine paused and wants to be continued later.
    ToBeContinued,
    /// The bitmap is complete.
    Done,
    /// The engine gave up on this page.
    Failed,
}

/// Decides whether an incremental render should yield at a pause point.
///
/// Called synchronously on the worker thread between render increments, so
/// implementations must be cheap and must never block. Returning `true` hands
/// control back to the render session; returning `false` lets the engine keep
/// going without another pause opportunity.
pub trait PauseDecision: Send {
    /// Return `true` to pause the render now.
    fn should_pause(&mut self) -> bool;
}

impl<F> PauseDecision for F
where
    F: FnMut() -> bool + Send,
{
    fn should_pause(&mut self) -> bool {
        self()
    }
}

/// Pause at every opportunity.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysPause;

impl PauseDecision for AlwaysPause {
    fn should_pause(&mut self) -> bool {
        true
    }
}

/// Never pause; the engine renders to completion in one call.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverPause;

impl PauseDecision for NeverPause {
    fn should_pause(&mut self) -> bool {
        false
    }
}

/// Operations one engine instance exposes.
///
/// Every call is synchronous. Handles are only meaningful to the instance that
/// issued them.
pub trait RenderEngine {
    /// Open a document from raw bytes.
    fn open_document(&mut self, bytes: &[u8]) -> Result<DocumentHandle, EngineError>;
    /// Close a document.
    fn close_document(&mut self, document: DocumentHandle) -> Result<(), EngineError>;
    /// Number of pages in a document.
    fn page_count(&mut self, document: DocumentHandle) -> Result<usize, EngineError>;
    /// Load the page at `index` (zero based).
    fn load_page(&mut self, document: DocumentHandle, index: usize) -> Result<PageHandle, EngineError>;
    /// Close a page.
    fn close_page(&mut self, page: PageHandle) -> Result<(), EngineError>;
    /// Page size in pixels at `dpi`.
    fn page_size_in_pixels(&mut self, page: PageHandle, dpi: u32) -> Result<PixelSize, EngineError>;
    /// Allocate a bitmap.
    fn create_bitmap(&mut self, width: u32, height: u32, alpha: bool) -> Result<BitmapHandle, EngineError>;
    /// Free a bitmap.
    fn destroy_bitmap(&mut self, bitmap: BitmapHandle) -> Result<(), EngineError>;
    /// Layout of a bitmap.
    fn bitmap_info(&mut self, bitmap: BitmapHandle) -> Result<BitmapInfo, EngineError>;
    /// Copy of a bitmap's pixel buffer.
    fn bitmap_buffer(&mut self, bitmap: BitmapHandle) -> Result<Vec<u8>, EngineError>;
    /// Begin rendering `page` into `bitmap`.
    fn render_start(
        &mut self,
        bitmap: BitmapHandle,
        page: PageHandle,
        size: PixelSize,
        pause: &mut dyn PauseDecision,
    ) -> Result<RenderProgress, EngineError>;
    /// Continue a paused render.
    fn render_continue(
        &mut self,
        page: PageHandle,
        pause: &mut dyn PauseDecision,
    ) -> Result<RenderProgress, EngineError>;
    /// Release the render state attached to `page`.
    fn render_close(&mut self, page: PageHandle) -> Result<(), EngineError>;
}

/// Factory for engine instances.
///
/// `create_instance` runs on the worker thread that will own the instance for
/// its whole life; the instance is dropped on that same thread when the worker
/// is destroyed.
pub trait EngineBinding: Send + Sync + 'static {
    /// Engine instance type.
    type Instance: RenderEngine + 'static;

    /// Start a fresh engine instance.
    ///
    /// # Errors
    ///
    /// Returns an [`EngineError`] when the instance cannot be started.
    fn create_instance(&self) -> Result<Self::Instance, EngineError>;
}
