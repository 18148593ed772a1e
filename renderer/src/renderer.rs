use std::{
    cell::{Cell, RefCell},
    fmt,
    rc::{Rc, Weak},
    time::Duration,
};

use anyhow::{Result, bail};
use log::{debug, error, info, warn};
use smudge_atlas::RgbaImage;
use smudge_material::MappingMaterial;
use tokio::{
    task::JoinHandle,
    time::{Instant, MissedTickBehavior},
};

use crate::{ContextLease, GpuBackend, Globals};

pub const DEFAULT_FRAME_RATE: f64 = 60.0;

/// Timing of a frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameTiming {
    /// Time since the previous frame, or since the start for the first frame.
    pub time_delta: Duration,
    /// Time since the renderer was started.
    pub global_time: Duration,
}

type FrameHandler = Rc<dyn Fn(&FrameTiming)>;

/// Draws the installed program on a recurring frame loop.
///
/// Each tick runs synchronously: the frame handler is called first, then the program's uniforms
/// are uploaded and it is drawn. Cloning shares the renderer.
#[derive(Clone)]
pub struct Renderer {
    inner: Rc<Inner>,
}

struct Inner {
    lease: ContextLease,
    frame_period: Duration,
    program: RefCell<Option<Rc<MappingMaterial>>>,
    frame_handler: RefCell<Option<FrameHandler>>,
    holds: Cell<usize>,
    ticking: Cell<bool>,
    start_time: Cell<Instant>,
    last_draw_time: Cell<Instant>,
    frame_loop: RefCell<Option<JoinHandle<()>>>,
    frames: Cell<u64>,
}

impl fmt::Debug for Renderer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Renderer")
            .field("running", &self.is_running())
            .field("frames", &self.inner.frames.get())
            .finish()
    }
}

impl Renderer {
    pub fn new(lease: ContextLease, frame_rate: f64) -> Self {
        let frame_rate = if frame_rate > 0.0 {
            frame_rate
        } else {
            warn!("Invalid frame rate {frame_rate}, using {DEFAULT_FRAME_RATE}");
            DEFAULT_FRAME_RATE
        };
        let now = Instant::now();
        Self {
            inner: Rc::new(Inner {
                lease,
                frame_period: Duration::from_secs_f64(1.0 / frame_rate),
                program: None.into(),
                frame_handler: None.into(),
                holds: 0.into(),
                ticking: false.into(),
                start_time: now.into(),
                last_draw_time: now.into(),
                frame_loop: None.into(),
                frames: 0.into(),
            }),
        }
    }

    pub fn set_frame_handler(&self, handler: impl Fn(&FrameTiming) + 'static) {
        *self.inner.frame_handler.borrow_mut() = Some(Rc::new(handler));
    }

    /// Installs the program to draw. The previously installed program is released.
    pub fn set_program(&self, program: Option<Rc<MappingMaterial>>) {
        let previous = self.inner.program.replace(program);
        if let Some(previous) = previous {
            let is_same = self
                .inner
                .program
                .borrow()
                .as_ref()
                .is_some_and(|p| p.program() == previous.program());
            if !is_same {
                self.inner.lease.backend().release_program(previous.program());
            }
        }
    }

    pub fn program(&self) -> Option<Rc<MappingMaterial>> {
        self.inner.program.borrow().clone()
    }

    pub fn backend(&self) -> Rc<dyn GpuBackend> {
        self.inner.lease.backend().clone()
    }

    /// Starts the frame loop. Must be called from within a `LocalSet`.
    ///
    /// Always resets the clock, also when the loop is already running: the next frame's delta
    /// and the global time are measured from now.
    pub fn start(&self) {
        let now = Instant::now();
        self.inner.start_time.set(now);
        self.inner.last_draw_time.set(now);
        if self.is_running() {
            return;
        }

        let period = self.inner.frame_period;
        let weak: Weak<Inner> = Rc::downgrade(&self.inner);
        let frame_loop = tokio::task::spawn_local(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                Renderer { inner }.tick(Instant::now());
            }
        });
        *self.inner.frame_loop.borrow_mut() = Some(frame_loop);
        info!("Renderer started");
    }

    /// Stops the frame loop. No further ticks are run.
    pub fn stop(&self) {
        if let Some(frame_loop) = self.inner.frame_loop.borrow_mut().take() {
            frame_loop.abort();
            info!("Renderer stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner.frame_loop.borrow().is_some()
    }

    /// Suppresses ticks as long as the returned guard lives.
    pub fn hold(&self) -> RenderHold {
        self.inner.holds.set(self.inner.holds.get() + 1);
        RenderHold {
            inner: self.inner.clone(),
        }
    }

    pub fn is_held(&self) -> bool {
        self.inner.holds.get() > 0
    }

    pub fn frame_count(&self) -> u64 {
        self.inner.frames.get()
    }

    /// Runs one frame. Returns `false` if the frame was skipped.
    pub fn tick(&self, now: Instant) -> bool {
        let inner = &self.inner;
        if inner.holds.get() > 0 {
            warn!("Skipping frame: the renderer is held");
            return false;
        }
        if inner.ticking.get() {
            warn!("Skipping frame: the previous frame is still running");
            return false;
        }
        let Some(program) = self.program() else {
            debug!("Skipping frame: no program installed");
            return false;
        };

        inner.ticking.set(true);
        let _ticking = TickingGuard(inner);

        let timing = FrameTiming {
            time_delta: now.saturating_duration_since(inner.last_draw_time.get()),
            global_time: now.saturating_duration_since(inner.start_time.get()),
        };
        inner.last_draw_time.set(now);

        let handler = inner.frame_handler.borrow().clone();
        if let Some(handler) = handler {
            handler(&timing);
        }

        let mapping = program.mapping();
        let globals = Globals {
            resolution: [mapping.width() as f32, mapping.height() as f32],
            time_delta: timing.time_delta.as_secs_f32(),
            global_time: timing.global_time.as_secs_f32(),
        };
        let backend = inner.lease.backend();
        let drawn = backend
            .write_uniforms(program.program(), &globals, &program.text_uniforms())
            .and_then(|_| backend.draw(program.program()));
        if let Err(e) = drawn {
            error!("Drawing {} failed: {e:?}", program.program());
        }

        inner.frames.set(inner.frames.get() + 1);
        true
    }

    /// Reads back the last frame drawn.
    pub async fn image_data(&self) -> Result<RgbaImage> {
        let Some(program) = self.program() else {
            bail!("No program installed");
        };
        self.inner
            .lease
            .backend()
            .read_pixels(program.program())
            .await
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(frame_loop) = self.frame_loop.get_mut().take() {
            frame_loop.abort();
        }
        if let Some(program) = self.program.get_mut().take() {
            self.lease.backend().release_program(program.program());
        }
    }
}

/// Suppresses ticks while alive.
#[must_use]
pub struct RenderHold {
    inner: Rc<Inner>,
}

impl Drop for RenderHold {
    fn drop(&mut self) {
        self.inner.holds.set(self.inner.holds.get() - 1);
    }
}

struct TickingGuard<'a>(&'a Inner);

impl Drop for TickingGuard<'_> {
    fn drop(&mut self) {
        self.0.ticking.set(false);
    }
}
