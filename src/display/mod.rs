// Display ownership arbiter.
//
// The arbiter owns the surfaces and the panel for the life of the process.
// The menu redraws through `redraw_menu`; a cart writes through a
// `DisplayLease` it receives from `hand_to_cart`. One mutex covers both
// paths, so an ownership change never interleaves with a redraw.
//
//   MenuOwned ──pause()──▶ MenuOwned+Paused ──hand_to_cart()──▶ CartOwned
//       ▲                                                           │
//       └──────────────── hand_to_menu() (full redraw) ─────────────┘

pub mod surfaces;

use std::sync::{Arc, Mutex, MutexGuard};

use crate::latch::InitLatch;

pub use surfaces::{make_color, DisplaySurfacePair, MemoryPanel, Panel, BACKGROUND};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ownership {
    MenuOwned,
    CartOwned,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DisplayError {
    #[error("cannot {action} while {ownership:?} (paused: {paused})")]
    InvalidTransition {
        action: &'static str,
        ownership: Ownership,
        paused: bool,
    },
    #[error("display not initialized")]
    NotInitialized,
    #[error("panel init failed: {0}")]
    Panel(String),
}

/// What one refresh step did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Redraw {
    /// Paused, or the cart holds the display.
    Skipped,
    /// Nothing changed since the last redraw.
    Idle,
    /// Every strip was rendered and flushed; `full` when forced by a resume.
    Drawn { full: bool },
}

struct DisplayState {
    ownership: Ownership,
    paused: bool,
    /// Bumped on every hand-off; a lease is valid only for its generation.
    generation: u64,
    full_redraw_pending: bool,
    surfaces: Option<DisplaySurfacePair>,
    panel: Box<dyn Panel>,
}

impl DisplayState {
    fn transition_error(&self, action: &'static str) -> DisplayError {
        DisplayError::InvalidTransition {
            action,
            ownership: self.ownership,
            paused: self.paused,
        }
    }

    /// CartOwned → MenuOwned: revoke the lease and schedule a full redraw.
    fn give_back(&mut self) {
        self.ownership = Ownership::MenuOwned;
        self.generation += 1;
        self.full_redraw_pending = true;
        self.paused = false;
        log::debug!("display handed back to menu");
    }

    /// Fill the whole panel with the background colour, strip by strip.
    fn clear_panel(&mut self) {
        let Some(surfaces) = self.surfaces.as_mut() else {
            return;
        };
        let (w, h, rows) = (surfaces.width(), surfaces.height(), surfaces.rows_per_strip());
        let mut y = 0;
        while y < h {
            let n = rows.min(h - y);
            let strip = &mut surfaces.back_strip()[..w as usize * n as usize];
            strip.fill(BACKGROUND);
            self.panel.draw_bitmap(0, y, w, n, strip);
            surfaces.swap_strips();
            y += n;
        }
    }
}

pub struct DisplayArbiter {
    state: Mutex<DisplayState>,
    width: u16,
    height: u16,
    rows_per_strip: u16,
    latch: InitLatch,
}

impl DisplayArbiter {
    pub fn new(panel: Box<dyn Panel>, rows_per_strip: u16) -> Self {
        let (width, height) = panel.size();
        Self {
            state: Mutex::new(DisplayState {
                ownership: Ownership::MenuOwned,
                paused: false,
                generation: 0,
                full_redraw_pending: true,
                surfaces: None,
                panel,
            }),
            width,
            height,
            rows_per_strip,
            latch: InitLatch::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, DisplayState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Bring the panel up and allocate the surfaces, once.
    pub fn init(&self) -> Result<bool, DisplayError> {
        let ran = self.latch.run(|| {
            let mut st = self.lock();
            st.panel.init().map_err(DisplayError::Panel)?;
            st.surfaces = Some(DisplaySurfacePair::new(
                self.width,
                self.height,
                self.rows_per_strip,
            ));
            Ok(())
        })?;
        if ran {
            log::info!(
                "display initialized: {}x{}, {} rows per strip",
                self.width,
                self.height,
                self.rows_per_strip
            );
        }
        Ok(ran)
    }

    pub fn size(&self) -> (u16, u16) {
        (self.width, self.height)
    }

    pub fn ownership(&self) -> Ownership {
        self.lock().ownership
    }

    pub fn is_paused(&self) -> bool {
        self.lock().paused
    }

    /// Stop menu redraws without giving up ownership. Idempotent.
    pub fn pause(&self) {
        let mut st = self.lock();
        if !st.paused {
            st.paused = true;
            log::debug!("display paused");
        }
    }

    /// Give the cart write access. Only from paused + menu-owned. The panel
    /// is cleared before the lease is handed out.
    pub fn hand_to_cart(self: &Arc<Self>) -> Result<DisplayLease, DisplayError> {
        let mut st = self.lock();
        if !st.paused || st.ownership != Ownership::MenuOwned {
            return Err(st.transition_error("hand to cart"));
        }
        if st.surfaces.is_none() {
            return Err(DisplayError::NotInitialized);
        }
        st.ownership = Ownership::CartOwned;
        st.generation += 1;
        st.clear_panel();
        log::debug!("display handed to cart (lease {})", st.generation);
        Ok(DisplayLease {
            arbiter: Arc::clone(self),
            generation: st.generation,
        })
    }

    /// Take the display back for the menu, revoke the lease, and force a
    /// full redraw on the next refresh tick.
    pub fn hand_to_menu(&self) -> Result<(), DisplayError> {
        let mut st = self.lock();
        if st.ownership != Ownership::CartOwned {
            return Err(st.transition_error("hand to menu"));
        }
        st.give_back();
        Ok(())
    }

    /// Unpause the menu. From cart ownership this is `hand_to_menu`.
    pub fn resume(&self) {
        let mut st = self.lock();
        if st.ownership == Ownership::CartOwned {
            st.give_back();
            return;
        }
        st.paused = false;
        st.full_redraw_pending = true;
    }

    pub fn clear(&self) {
        self.lock().clear_panel();
    }

    /// Write a block of pixels for whoever holds the cart lease. A no-op
    /// returning `false` unless the display is cart-owned.
    pub fn write_frame(&self, x: u16, y: u16, width: u16, height: u16, pixels: &[u16]) -> bool {
        self.forward(None, x, y, width, height, pixels)
    }

    fn forward(
        &self,
        generation: Option<u64>,
        x: u16,
        y: u16,
        width: u16,
        height: u16,
        pixels: &[u16],
    ) -> bool {
        let mut st = self.lock();
        if st.ownership != Ownership::CartOwned {
            log::trace!("write_frame dropped: display is menu-owned");
            return false;
        }
        if generation.is_some_and(|g| g != st.generation) {
            log::trace!("write_frame dropped: stale lease");
            return false;
        }
        let len = width as usize * height as usize;
        if len == 0
            || x as u32 + width as u32 > self.width as u32
            || y as u32 + height as u32 > self.height as u32
            || pixels.len() < len
        {
            log::warn!("write_frame rejected: {width}x{height} at ({x},{y})");
            return false;
        }
        st.panel.draw_bitmap(x, y, width, height, &pixels[..len]);
        true
    }

    fn lease_valid(st: &DisplayState, generation: u64) -> bool {
        st.ownership == Ownership::CartOwned && st.generation == generation
    }

    /// One step of the menu refresh activity. Renders every strip through
    /// `render(y, width, strip)` and flushes it, but only while the menu
    /// owns the display and is not paused.
    pub fn redraw_menu(&self, dirty: bool, mut render: impl FnMut(u16, u16, &mut [u16])) -> Redraw {
        let mut guard = self.lock();
        let st = &mut *guard;
        if st.paused || st.ownership != Ownership::MenuOwned {
            return Redraw::Skipped;
        }
        let full = st.full_redraw_pending;
        if !full && !dirty {
            return Redraw::Idle;
        }
        let Some(surfaces) = st.surfaces.as_mut() else {
            return Redraw::Skipped;
        };
        st.full_redraw_pending = false;

        let (w, h, rows) = (surfaces.width(), surfaces.height(), surfaces.rows_per_strip());
        let mut y = 0;
        while y < h {
            let n = rows.min(h - y);
            let strip = &mut surfaces.back_strip()[..w as usize * n as usize];
            render(y, w, strip);
            st.panel.draw_bitmap(0, y, w, n, strip);
            surfaces.swap_strips();
            y += n;
        }
        Redraw::Drawn { full }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
//  Lease
// ─────────────────────────────────────────────────────────────────────────────

/// Revocable write access for one cart session. Every call re-checks that
/// the arbiter is still cart-owned under this lease's generation.
pub struct DisplayLease {
    arbiter: Arc<DisplayArbiter>,
    generation: u64,
}

impl DisplayLease {
    pub fn size(&self) -> (u16, u16) {
        self.arbiter.size()
    }

    pub fn is_valid(&self) -> bool {
        DisplayArbiter::lease_valid(&self.arbiter.lock(), self.generation)
    }

    pub fn write_frame(&self, x: u16, y: u16, width: u16, height: u16, pixels: &[u16]) -> bool {
        self.arbiter
            .forward(Some(self.generation), x, y, width, height, pixels)
    }

    /// Run `f` on off-screen frame buffer `index` (0 or 1).
    pub fn with_frame_buffer<R>(&self, index: usize, f: impl FnOnce(&mut [u16]) -> R) -> Option<R> {
        let mut st = self.arbiter.lock();
        if !DisplayArbiter::lease_valid(&st, self.generation) {
            return None;
        }
        st.surfaces.as_mut()?.frame_buffer(index).map(f)
    }

    /// Present frame buffer `index` full-screen.
    pub fn flush_frame_buffer(&self, index: usize) -> bool {
        let mut guard = self.arbiter.lock();
        let st = &mut *guard;
        if !DisplayArbiter::lease_valid(st, self.generation) {
            return false;
        }
        let Some(surfaces) = st.surfaces.as_mut() else {
            return false;
        };
        let (w, h) = (surfaces.width(), surfaces.height());
        match surfaces.frame_buffer(index) {
            Some(fb) => {
                st.panel.draw_bitmap(0, 0, w, h, fb);
                true
            }
            None => false,
        }
    }
}
