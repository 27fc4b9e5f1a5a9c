//! Leases: a caller's exclusive session on one worker.
//!
//! A [`Lease`] tracks every engine handle it creates (document, pages,
//! bitmaps, an active render) so that releasing it always tears the engine
//! state down, in reverse order, before the worker is reused. A lease is
//! `Send` but deliberately not `Sync`: its operations take `&mut self`.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::core::error::PoolError;
use crate::core::render::{RenderSession, RenderState};
use crate::core::worker_pool::{LeaseId, PoolShared, Worker, WorkerId};
use crate::engine::{
    BitmapHandle, BitmapInfo, DocumentHandle, EngineBinding, EngineError, PageHandle, PauseDecision,
    PixelSize, RenderEngine,
};

/// Pixels of one rendered page, copied out of the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderedPage {
    /// Zero-based page index.
    pub index: usize,
    /// Bitmap layout.
    pub info: BitmapInfo,
    /// Raw pixel buffer, `info.buffer_len()` bytes.
    pub pixels: Vec<u8>,
}

/// Engine handles owned by the current lease.
#[derive(Debug, Default)]
struct OpenHandles {
    document: Option<DocumentHandle>,
    pages: BTreeSet<PageHandle>,
    bitmaps: BTreeSet<BitmapHandle>,
    rendering: Option<PageHandle>,
}

impl OpenHandles {
    fn is_empty(&self) -> bool {
        self.document.is_none()
            && self.pages.is_empty()
            && self.bitmaps.is_empty()
            && self.rendering.is_none()
    }

    /// Release everything in one worker round trip: render, bitmaps, pages,
    /// document. Every handle is attempted; the first engine error is returned.
    fn teardown<I>(&mut self, worker: &Worker<I>, operation: &'static str) -> Result<(), PoolError>
    where
        I: RenderEngine + 'static,
    {
        if self.is_empty() {
            return Ok(());
        }
        let rendering = self.rendering.take();
        let bitmaps = std::mem::take(&mut self.bitmaps);
        let pages = std::mem::take(&mut self.pages);
        let document = self.document.take();

        worker
            .call(operation, move |engine| {
                let mut first_error: Option<EngineError> = None;
                let mut note = |result: Result<(), EngineError>| {
                    if let Err(e) = result {
                        first_error.get_or_insert(e);
                    }
                };
                if let Some(page) = rendering {
                    note(engine.render_close(page));
                }
                for bitmap in bitmaps.into_iter().rev() {
                    note(engine.destroy_bitmap(bitmap));
                }
                for page in pages.into_iter().rev() {
                    note(engine.close_page(page));
                }
                if let Some(document) = document {
                    note(engine.close_document(document));
                }
                first_error.map_or(Ok(()), Err)
            })?
            .map_err(|source| PoolError::Engine {
                operation,
                worker: worker.id(),
                source,
            })
    }
}

/// Exclusive use of one pooled worker.
///
/// Obtained from [`WorkerPool::acquire`](crate::core::WorkerPool::acquire).
/// Release it with [`close`](Self::close); dropping it closes it too.
pub struct Lease<B: EngineBinding> {
    id: LeaseId,
    worker_id: WorkerId,
    pool: Arc<PoolShared<B>>,
    /// `None` once released.
    worker: Option<Worker<B::Instance>>,
    open: OpenHandles,
}

impl<B: EngineBinding> std::fmt::Debug for Lease<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lease")
            .field("id", &self.id)
            .field("worker_id", &self.worker_id)
            .finish_non_exhaustive()
    }
}

impl<B: EngineBinding> Lease<B> {
    pub(crate) fn new(pool: Arc<PoolShared<B>>, worker: Worker<B::Instance>) -> Self {
        let id = LeaseId::new();
        debug!(lease_id = %id, worker_id = worker.id().0, "Lease granted");
        Self {
            id,
            worker_id: worker.id(),
            pool,
            worker: Some(worker),
            open: OpenHandles::default(),
        }
    }

    /// Lease identifier.
    #[must_use]
    pub const fn id(&self) -> LeaseId {
        self.id
    }

    /// Worker backing this lease.
    #[must_use]
    pub const fn worker_id(&self) -> WorkerId {
        self.worker_id
    }

    /// Whether the lease has been released.
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        self.worker.is_none()
    }

    /// Currently open document, if any.
    #[must_use]
    pub const fn active_document(&self) -> Option<DocumentHandle> {
        self.open.document
    }

    fn worker(&self, operation: &'static str) -> Result<&Worker<B::Instance>, PoolError> {
        let worker = self.worker.as_ref().ok_or(PoolError::LeaseClosed {
            operation,
            lease: self.id,
        })?;
        if worker.is_destroyed() {
            return Err(PoolError::WorkerDestroyed {
                operation,
                worker: self.worker_id,
            });
        }
        Ok(worker)
    }

    fn document(&self, operation: &'static str) -> Result<DocumentHandle, PoolError> {
        self.worker(operation)?;
        self.open.document.ok_or(PoolError::NoActiveDocument { operation })
    }

    fn check_page(&self, operation: &'static str, page: PageHandle) -> Result<(), PoolError> {
        self.document(operation)?;
        if self.open.pages.contains(&page) {
            Ok(())
        } else {
            Err(PoolError::UnknownHandle {
                operation,
                handle: page.to_string(),
            })
        }
    }

    fn check_bitmap(&self, operation: &'static str, bitmap: BitmapHandle) -> Result<(), PoolError> {
        self.document(operation)?;
        if self.open.bitmaps.contains(&bitmap) {
            Ok(())
        } else {
            Err(PoolError::UnknownHandle {
                operation,
                handle: bitmap.to_string(),
            })
        }
    }

    /// Run `f` on the worker thread.
    pub(crate) fn call_worker<T, F>(&self, operation: &'static str, f: F) -> Result<T, PoolError>
    where
        T: Send + 'static,
        F: FnOnce(&mut B::Instance) -> T + Send + 'static,
    {
        self.worker(operation)?.call(operation, f)
    }

    /// Run an engine call on the worker thread, wrapping engine errors.
    pub(crate) fn call_engine<T, F>(&self, operation: &'static str, f: F) -> Result<T, PoolError>
    where
        T: Send + 'static,
        F: FnOnce(&mut B::Instance) -> Result<T, EngineError> + Send + 'static,
    {
        self.call_worker(operation, f)?
            .map_err(|source| PoolError::Engine {
                operation,
                worker: self.worker_id,
                source,
            })
    }

    pub(crate) fn mark_rendering(&mut self, page: Option<PageHandle>) {
        self.open.rendering = page;
    }

    /// Open a document. One document per lease.
    ///
    /// # Errors
    ///
    /// - `PoolError::DocumentAlreadyOpen` if a document is open
    /// - `PoolError::DocumentLoadFailed` if the engine rejects the bytes
    /// - `PoolError::LeaseClosed` / `PoolError::WorkerDestroyed`
    pub fn open_document(&mut self, bytes: impl Into<Vec<u8>>) -> Result<DocumentHandle, PoolError> {
        const OP: &str = "open_document";
        let worker = self.worker(OP)?;
        if let Some(document) = self.open.document {
            return Err(PoolError::DocumentAlreadyOpen {
                operation: OP,
                worker: self.worker_id,
                document,
            });
        }
        let bytes = bytes.into();
        let len = bytes.len();
        let document = worker
            .call(OP, move |engine| engine.open_document(&bytes))?
            .map_err(|source| PoolError::DocumentLoadFailed {
                worker: self.worker_id,
                source,
            })?;
        self.open.document = Some(document);
        debug!(lease_id = %self.id, document = document.raw(), bytes = len, "Document opened");
        Ok(document)
    }

    /// Close the open document along with every page and bitmap it owns.
    ///
    /// # Errors
    ///
    /// - `PoolError::NoActiveDocument` if nothing is open
    /// - engine errors from the teardown (all handles are still dropped)
    pub fn close_document(&mut self) -> Result<(), PoolError> {
        const OP: &str = "close_document";
        self.document(OP)?;
        let worker = self.worker(OP)?.clone();
        self.open.teardown(&worker, OP)
    }

    /// Number of pages in the open document.
    ///
    /// # Errors
    ///
    /// `PoolError::NoActiveDocument`, or engine errors.
    pub fn page_count(&self) -> Result<usize, PoolError> {
        let document = self.document("page_count")?;
        self.call_engine("page_count", move |engine| engine.page_count(document))
    }

    /// Load the page at `index`.
    ///
    /// # Errors
    ///
    /// `PoolError::NoActiveDocument`, or engine errors (index out of range).
    pub fn load_page(&mut self, index: usize) -> Result<PageHandle, PoolError> {
        let document = self.document("load_page")?;
        let page = self.call_engine("load_page", move |engine| engine.load_page(document, index))?;
        self.open.pages.insert(page);
        Ok(page)
    }

    /// Close a page. A page the engine failed to close stays tracked and is
    /// retried when the lease is torn down.
    ///
    /// # Errors
    ///
    /// `PoolError::UnknownHandle` if the page is not open on this lease, or
    /// engine errors.
    pub fn close_page(&mut self, page: PageHandle) -> Result<(), PoolError> {
        const OP: &str = "close_page";
        self.check_page(OP, page)?;
        if self.open.rendering == Some(page) {
            return Err(PoolError::InvalidState {
                operation: OP,
                state: RenderState::InProgress,
            });
        }
        self.call_engine(OP, move |engine| engine.close_page(page))?;
        self.open.pages.remove(&page);
        Ok(())
    }

    /// Page size in pixels at `dpi`.
    ///
    /// # Errors
    ///
    /// `PoolError::UnknownHandle`, or engine errors.
    pub fn page_size(&self, page: PageHandle, dpi: u32) -> Result<PixelSize, PoolError> {
        self.check_page("page_size_in_pixels", page)?;
        self.call_engine("page_size_in_pixels", move |engine| {
            engine.page_size_in_pixels(page, dpi)
        })
    }

    /// Allocate a bitmap.
    ///
    /// # Errors
    ///
    /// `PoolError::NoActiveDocument`, or engine errors.
    pub fn create_bitmap(&mut self, width: u32, height: u32, alpha: bool) -> Result<BitmapHandle, PoolError> {
        self.document("create_bitmap")?;
        let bitmap = self.call_engine("create_bitmap", move |engine| {
            engine.create_bitmap(width, height, alpha)
        })?;
        self.open.bitmaps.insert(bitmap);
        Ok(bitmap)
    }

    /// Free a bitmap.
    ///
    /// # Errors
    ///
    /// `PoolError::UnknownHandle`, or engine errors.
    pub fn destroy_bitmap(&mut self, bitmap: BitmapHandle) -> Result<(), PoolError> {
        self.check_bitmap("destroy_bitmap", bitmap)?;
        self.call_engine("destroy_bitmap", move |engine| engine.destroy_bitmap(bitmap))?;
        self.open.bitmaps.remove(&bitmap);
        Ok(())
    }

    /// Bitmap layout.
    ///
    /// # Errors
    ///
    /// `PoolError::UnknownHandle`, or engine errors.
    pub fn bitmap_info(&self, bitmap: BitmapHandle) -> Result<BitmapInfo, PoolError> {
        self.check_bitmap("bitmap_info", bitmap)?;
        self.call_engine("bitmap_info", move |engine| engine.bitmap_info(bitmap))
    }

    /// Copy of a bitmap's pixels.
    ///
    /// # Errors
    ///
    /// `PoolError::UnknownHandle`, or engine errors.
    pub fn bitmap_buffer(&self, bitmap: BitmapHandle) -> Result<Vec<u8>, PoolError> {
        self.check_bitmap("bitmap_buffer", bitmap)?;
        self.call_engine("bitmap_buffer", move |engine| engine.bitmap_buffer(bitmap))
    }

    /// Create a bitmap of `size` for `page` and return a `Ready` render
    /// session over it.
    ///
    /// # Errors
    ///
    /// `PoolError::UnknownHandle` for a foreign page, or bitmap creation
    /// errors.
    pub fn render_session(
        &mut self,
        page: PageHandle,
        size: PixelSize,
        alpha: bool,
    ) -> Result<RenderSession<'_, B>, PoolError> {
        self.check_page("render_session", page)?;
        let bitmap = self.create_bitmap(size.width, size.height, alpha)?;
        Ok(RenderSession::new(self, page, bitmap, size))
    }

    /// Load, size, render and read back one page, releasing the page and
    /// bitmap on every path.
    ///
    /// # Errors
    ///
    /// Any error from the individual steps; `PoolError::RenderFailed` if the
    /// engine gives up on the page.
    pub fn render_page<P>(&mut self, index: usize, dpi: u32, pause: P) -> Result<RenderedPage, PoolError>
    where
        P: PauseDecision + 'static,
    {
        let page = self.load_page(index)?;
        let rendered = self.render_loaded_page(page, index, dpi, pause);
        let closed = self.close_page(page);
        let rendered = rendered?;
        closed?;
        Ok(rendered)
    }

    fn render_loaded_page<P>(
        &mut self,
        page: PageHandle,
        index: usize,
        dpi: u32,
        pause: P,
    ) -> Result<RenderedPage, PoolError>
    where
        P: PauseDecision + 'static,
    {
        let size = self.page_size(page, dpi)?;
        let mut session = self.render_session(page, size, true)?;
        session.run(pause)?;
        let bitmap = session.finish()?;

        let read = self
            .bitmap_info(bitmap)
            .and_then(|info| Ok((info, self.bitmap_buffer(bitmap)?)));
        let destroyed = self.destroy_bitmap(bitmap);
        let (info, pixels) = read?;
        destroyed?;
        Ok(RenderedPage { index, info, pixels })
    }

    /// Tear down all engine state and return the worker to the pool.
    ///
    /// Idempotent. If teardown fails the worker is destroyed instead of
    /// recycled. A worker already destroyed by pool shutdown is not an error.
    ///
    /// # Errors
    ///
    /// The first teardown error.
    pub fn close(&mut self) -> Result<(), PoolError> {
        let Some(worker) = self.worker.take() else {
            return Ok(());
        };
        let teardown = self.open.teardown(&worker, "close_lease");
        self.open = OpenHandles::default();
        self.pool.release(self.id, worker, teardown.is_ok());
        match teardown {
            Err(PoolError::WorkerDestroyed { .. }) => Ok(()),
            other => other,
        }
    }
}

impl<B: EngineBinding> Drop for Lease<B> {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(lease_id = %self.id, error = %e, "Lease dropped with failed cleanup");
        }
    }
}
