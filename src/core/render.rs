//! Incremental render state machine.
//!
//! A [`RenderSession`] owns one bitmap and drives the engine's
//! start/continue/close render calls for one page:
//!
//! ```text
//! Ready --start--> InProgress --+--> Done     (terminal)
//!                      ^        +--> Failed   (terminal)
//!                      |        +--> Paused
//!                      +--resume-------+
//! ```
//!
//! The session mutably borrows its [`Lease`], so no other operation can run on
//! the worker (and the lease cannot be closed) while the session is alive.
//! Dropping the session closes the engine render state and destroys the bitmap
//! unless it was handed to the caller through [`RenderSession::finish`].

use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::core::error::PoolError;
use crate::core::lease::Lease;
use crate::engine::{
    BitmapHandle, EngineBinding, PageHandle, PauseDecision, PixelSize, RenderEngine, RenderProgress,
};

/// Lifecycle state of a render session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RenderState {
    /// Bitmap created, render not started.
    Ready,
    /// An engine render call is running.
    InProgress,
    /// The engine yielded; call `resume` to continue.
    Paused,
    /// Bitmap complete.
    Done,
    /// The engine gave up, or the worker died mid-render.
    Failed,
}

impl RenderState {
    /// `Done` or `Failed`.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

/// Render of one page into one bitmap.
pub struct RenderSession<'l, B: EngineBinding> {
    lease: &'l mut Lease<B>,
    page: PageHandle,
    bitmap: BitmapHandle,
    size: PixelSize,
    state: RenderState,
    /// Travels to the worker thread for each engine call and comes back with
    /// the result.
    pause: Option<Box<dyn PauseDecision>>,
    render_open: bool,
    owns_bitmap: bool,
}

impl<'l, B: EngineBinding> RenderSession<'l, B> {
    pub(crate) fn new(lease: &'l mut Lease<B>, page: PageHandle, bitmap: BitmapHandle, size: PixelSize) -> Self {
        Self {
            lease,
            page,
            bitmap,
            size,
            state: RenderState::Ready,
            pause: None,
            render_open: false,
            owns_bitmap: true,
        }
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> RenderState {
        self.state
    }

    /// Page being rendered.
    #[must_use]
    pub const fn page(&self) -> PageHandle {
        self.page
    }

    /// Target bitmap.
    #[must_use]
    pub const fn bitmap(&self) -> BitmapHandle {
        self.bitmap
    }

    /// Render size in pixels.
    #[must_use]
    pub const fn size(&self) -> PixelSize {
        self.size
    }

    fn invalid(&self, operation: &'static str) -> PoolError {
        PoolError::InvalidState {
            operation,
            state: self.state,
        }
    }

    /// Start rendering. `pause` is consulted at every pause point of this and
    /// all later increments.
    ///
    /// # Errors
    ///
    /// - `PoolError::InvalidState` unless the session is `Ready`
    /// - `PoolError::RenderFailed` if the engine reports failure
    /// - `PoolError::Engine` / `PoolError::WorkerDestroyed` on call failure
    pub fn start<P>(&mut self, pause: P) -> Result<RenderState, PoolError>
    where
        P: PauseDecision + 'static,
    {
        if self.state != RenderState::Ready {
            return Err(self.invalid("render_start"));
        }
        self.pause = Some(Box::new(pause));
        self.render_open = true;
        self.lease.mark_rendering(Some(self.page));
        self.step("render_start", true)
    }

    /// Continue a paused render.
    ///
    /// # Errors
    ///
    /// - `PoolError::InvalidState` unless the session is `Paused`
    /// - otherwise as [`start`](Self::start)
    pub fn resume(&mut self) -> Result<RenderState, PoolError> {
        if self.state != RenderState::Paused {
            return Err(self.invalid("render_continue"));
        }
        self.step("render_continue", false)
    }

    /// Drive the render to completion: start if `Ready` (or swap in `pause`
    /// if `Paused`), then resume until `Done`.
    ///
    /// # Errors
    ///
    /// - `PoolError::InvalidState` if the session is already terminal
    /// - otherwise as [`start`](Self::start)
    pub fn run<P>(&mut self, pause: P) -> Result<(), PoolError>
    where
        P: PauseDecision + 'static,
    {
        match self.state {
            RenderState::Ready => {
                self.start(pause)?;
            }
            RenderState::Paused => self.pause = Some(Box::new(pause)),
            _ => return Err(self.invalid("render_run")),
        }
        while self.state == RenderState::Paused {
            self.resume()?;
        }
        Ok(())
    }

    /// Keep resuming until the render is terminal or `deadline` passes.
    /// Returns the state reached; `Paused` means the deadline hit first and
    /// the render can be resumed later.
    ///
    /// # Errors
    ///
    /// - `PoolError::InvalidState` if the render has not been started
    /// - otherwise as [`resume`](Self::resume)
    pub fn run_until(&mut self, deadline: Instant) -> Result<RenderState, PoolError> {
        if self.state == RenderState::Ready {
            return Err(self.invalid("render_run_until"));
        }
        while self.state == RenderState::Paused && Instant::now() < deadline {
            self.resume()?;
        }
        Ok(self.state)
    }

    /// Copy the finished bitmap's pixels.
    ///
    /// # Errors
    ///
    /// `PoolError::InvalidState` unless `Done`; engine errors otherwise.
    pub fn read_pixels(&self) -> Result<Vec<u8>, PoolError> {
        if self.state != RenderState::Done {
            return Err(self.invalid("bitmap_buffer"));
        }
        self.lease.bitmap_buffer(self.bitmap)
    }

    /// Close the engine render state and hand the bitmap to the caller, who
    /// must destroy it with [`Lease::destroy_bitmap`] (or let the lease do it
    /// on close).
    ///
    /// # Errors
    ///
    /// `PoolError::InvalidState` unless `Done`; the session is still cleaned
    /// up on drop.
    pub fn finish(mut self) -> Result<BitmapHandle, PoolError> {
        if self.state != RenderState::Done {
            return Err(self.invalid("render_finish"));
        }
        self.close_render()?;
        self.owns_bitmap = false;
        Ok(self.bitmap)
    }

    fn step(&mut self, operation: &'static str, start: bool) -> Result<RenderState, PoolError> {
        let Some(mut pause) = self.pause.take() else {
            return Err(self.invalid(operation));
        };
        let (bitmap, page, size) = (self.bitmap, self.page, self.size);
        self.state = RenderState::InProgress;

        let outcome = self.lease.call_worker(operation, move |engine| {
            let progress = if start {
                engine.render_start(bitmap, page, size, pause.as_mut())
            } else {
                engine.render_continue(page, pause.as_mut())
            };
            (progress, pause)
        });

        let (progress, pause) = match outcome {
            Ok(outcome) => outcome,
            Err(e) => {
                self.state = RenderState::Failed;
                return Err(e);
            }
        };
        self.pause = Some(pause);

        match progress {
            Ok(RenderProgress::ToBeContinued) => self.state = RenderState::Paused,
            Ok(RenderProgress::Done) => {
                self.state = RenderState::Done;
                debug!(page = page.raw(), width = size.width, height = size.height, "Render done");
            }
            Ok(RenderProgress::Failed) => {
                self.state = RenderState::Failed;
                return Err(PoolError::RenderFailed {
                    worker: self.lease.worker_id(),
                    page,
                });
            }
            Err(source) => {
                self.state = RenderState::Failed;
                return Err(PoolError::Engine {
                    operation,
                    worker: self.lease.worker_id(),
                    source,
                });
            }
        }
        Ok(self.state)
    }

    fn close_render(&mut self) -> Result<(), PoolError> {
        if !self.render_open {
            return Ok(());
        }
        self.render_open = false;
        let page = self.page;
        self.lease.mark_rendering(None);
        self.lease
            .call_engine("render_close", move |engine| engine.render_close(page))
    }
}

impl<B: EngineBinding> Drop for RenderSession<'_, B> {
    fn drop(&mut self) {
        // Reverse acquisition order: render state, then bitmap.
        if let Err(e) = self.close_render() {
            warn!(page = self.page.raw(), error = %e, "Failed to close render state");
        }
        if self.owns_bitmap {
            if let Err(e) = self.lease.destroy_bitmap(self.bitmap) {
                warn!(bitmap = self.bitmap.raw(), error = %e, "Failed to destroy bitmap");
            }
        }
    }
}
