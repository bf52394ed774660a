// Menu GUI: catalog names, focus navigation, mute/volume, and the
// periodic refresh thread that redraws the menu through the arbiter.
//
// The refresh thread waits on a crossbeam ticker and a stop channel.
// Each tick captures a `MenuView` (gui → session locks) and only then
// enters `redraw_menu` (display lock), so the crate-wide lock order holds.

use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, select, tick, Sender};

use crate::audio::AudioAmp;
use crate::display::{make_color, DisplayArbiter, Redraw, BACKGROUND};
use crate::i2c_bus::BusError;
use crate::session::{Session, VideoSetting, MAX_VOLUME};

const ROW_HEIGHT: u16 = 16;
const VOLUME_BAR_HEIGHT: u16 = 8;

#[derive(Debug, Default)]
struct MenuState {
    names: Vec<String>,
    dirty: bool,
    paused: bool,
}

struct RefreshHandle {
    stop_tx: Sender<()>,
    thread: JoinHandle<()>,
}

pub struct Gui {
    menu: Arc<Mutex<MenuState>>,
    session: Session,
    display: Arc<DisplayArbiter>,
    audio: Arc<AudioAmp>,
    refresh: Mutex<Option<RefreshHandle>>,
}

fn lock_menu(menu: &Mutex<MenuState>) -> MutexGuard<'_, MenuState> {
    menu.lock().unwrap_or_else(|e| e.into_inner())
}

impl Gui {
    pub fn new(session: Session, display: Arc<DisplayArbiter>, audio: Arc<AudioAmp>) -> Self {
        Self {
            menu: Arc::new(Mutex::new(MenuState::default())),
            session,
            display,
            audio,
            refresh: Mutex::new(None),
        }
    }

    fn menu(&self) -> MutexGuard<'_, MenuState> {
        lock_menu(&self.menu)
    }

    pub fn add_rom(&self, name: &str) {
        let mut menu = self.menu();
        menu.names.push(name.to_string());
        menu.dirty = true;
    }

    pub fn len(&self) -> usize {
        self.menu().names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.menu().names.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        self.menu().names.clone()
    }

    /// Move focus one entry, wrapping at both ends. No-op on an empty catalog.
    fn step_focus(&self, forward: bool) {
        let mut menu = self.menu();
        let len = menu.names.len();
        if len == 0 {
            return;
        }
        let mut st = self.session.lock();
        st.focused = if forward {
            (st.focused + 1) % len
        } else {
            (st.focused + len - 1) % len
        };
        menu.dirty = true;
        log::debug!("menu focus → {} ({})", st.focused, menu.names[st.focused]);
    }

    pub fn next(&self) {
        self.step_focus(true);
    }

    pub fn previous(&self) {
        self.step_focus(false);
    }

    pub fn selected_index(&self) -> usize {
        self.session.focused()
    }

    /// Stop redrawing. The refresh thread keeps ticking but does nothing.
    pub fn pause(&self) {
        self.menu().paused = true;
    }

    pub fn resume(&self) {
        let mut menu = self.menu();
        menu.paused = false;
        menu.dirty = true;
    }

    pub fn is_paused(&self) -> bool {
        self.menu().paused
    }

    pub fn ready_to_play(&self) -> bool {
        self.session.ready_to_play()
    }

    pub fn set_ready_to_play(&self, ready: bool) {
        self.session.set_ready_to_play(ready);
    }

    pub fn set_mute(&self, muted: bool) -> Result<(), BusError> {
        self.audio.set_muted(&self.session, muted)?;
        self.menu().dirty = true;
        Ok(())
    }

    /// Flip mute; returns the new state.
    pub fn toggle_mute(&self) -> Result<bool, BusError> {
        let muted = !self.session.is_muted();
        self.set_mute(muted)?;
        Ok(muted)
    }

    pub fn set_audio_level(&self, percent: i32) -> Result<u8, BusError> {
        let level = self.audio.set_volume(&self.session, percent)?;
        self.menu().dirty = true;
        Ok(level)
    }

    pub fn audio_level(&self) -> u8 {
        self.session.volume()
    }

    /// Scaling mode applied to the next cart launch.
    pub fn set_video_setting(&self, video: VideoSetting) {
        self.session.set_video_setting(video);
        log::info!("video setting: {video:?}");
    }

    pub fn video_setting(&self) -> VideoSetting {
        self.session.video_setting()
    }

    /// One refresh step; the refresh thread calls this on every tick.
    pub fn refresh_once(&self) -> Redraw {
        refresh_step(&self.menu, &self.session, &self.display)
    }

    /// Start the refresh thread. Returns `false` if it is already running.
    pub fn start_refresh(&self, interval: Duration) -> std::io::Result<bool> {
        let mut slot = self.refresh.lock().unwrap_or_else(|e| e.into_inner());
        if slot.is_some() {
            return Ok(false);
        }

        let (stop_tx, stop_rx) = bounded::<()>(1);
        let menu = Arc::clone(&self.menu);
        let session = self.session.clone();
        let display = Arc::clone(&self.display);
        let thread = thread::Builder::new()
            .name("gui-refresh".into())
            .spawn(move || {
                let ticker = tick(interval);
                loop {
                    select! {
                        recv(stop_rx) -> _ => break,
                        recv(ticker) -> _ => {
                            refresh_step(&menu, &session, &display);
                        }
                    }
                }
                log::debug!("gui refresh thread stopped");
            })?;

        log::info!("gui refresh started ({} ms)", interval.as_millis());
        *slot = Some(RefreshHandle { stop_tx, thread });
        Ok(true)
    }

    pub fn stop_refresh(&self) {
        let handle = self.refresh.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(h) = handle {
            let _ = h.stop_tx.send(());
            if h.thread.join().is_err() {
                log::error!("gui refresh thread panicked");
            }
        }
    }
}

impl Drop for Gui {
    fn drop(&mut self) {
        self.stop_refresh();
    }
}

fn refresh_step(menu: &Mutex<MenuState>, session: &Session, display: &DisplayArbiter) -> Redraw {
    let view = {
        let mut m = lock_menu(menu);
        if m.paused {
            return Redraw::Skipped;
        }
        let st = session.lock();
        let view = MenuView {
            count: m.names.len(),
            focused: st.focused,
            volume: st.volume(),
            muted: st.muted,
            dirty: m.dirty,
            height: display.size().1,
        };
        m.dirty = false;
        view
    };

    let outcome = display.redraw_menu(view.dirty, |y, w, strip| view.render(y, w, strip));
    if outcome == Redraw::Skipped && view.dirty {
        // Not drawn; keep it for the next tick.
        lock_menu(menu).dirty = true;
    }
    if let Redraw::Drawn { full } = outcome {
        log::trace!("menu redrawn (full: {full})");
    }
    outcome
}

// ─────────────────────────────────────────────────────────────────────────────
//  Renderer
// ─────────────────────────────────────────────────────────────────────────────

/// Everything the renderer needs, copied out of the locks before drawing.
/// One bar per catalog entry (focused one highlighted, list scrolled to
/// keep it visible) and a volume bar along the bottom edge.
#[derive(Debug, Clone, Copy)]
struct MenuView {
    count: usize,
    focused: usize,
    volume: u8,
    muted: bool,
    dirty: bool,
    height: u16,
}

impl MenuView {
    fn render(&self, y0: u16, width: u16, strip: &mut [u16]) {
        let w = width as usize;
        if w == 0 {
            return;
        }
        for (r, line) in strip.chunks_exact_mut(w).enumerate() {
            self.render_line(y0 + r as u16, line);
        }
    }

    fn render_line(&self, y: u16, line: &mut [u16]) {
        line.fill(BACKGROUND);
        let list_height = self.height.saturating_sub(VOLUME_BAR_HEIGHT);

        if y >= list_height {
            let filled = line.len() * self.volume as usize / MAX_VOLUME as usize;
            let color = if self.muted {
                make_color(160, 32, 32)
            } else {
                make_color(32, 160, 64)
            };
            line[..filled].fill(color);
            return;
        }

        let visible = (list_height / ROW_HEIGHT).max(1) as usize;
        let first = self.focused.saturating_sub(visible - 1);
        let index = first + (y / ROW_HEIGHT) as usize;
        let row_y = y % ROW_HEIGHT;
        if index >= self.count || row_y == 0 || row_y == ROW_HEIGHT - 1 {
            return;
        }
        if index == self.focused {
            line.fill(make_color(48, 96, 200));
        } else {
            let marker = line.len().min(8);
            line[..marker].fill(make_color(96, 96, 96));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::AMP_ADDR;
    use crate::display::MemoryPanel;
    use crate::i2c_bus::{I2cBus, SimulatedBus};
    use crate::peripheral_mux::{Peripheral, PeripheralBus};
    use crate::session::DeviceSessionState;

    fn gui() -> (Gui, Arc<DisplayArbiter>, MemoryPanel, SimulatedBus) {
        let sim = SimulatedBus::new();
        sim.attach(AMP_ADDR, Peripheral::Audio);
        let backend = Box::new(sim.clone()) as Box<dyn I2cBus>;
        let mut bus = PeripheralBus::new(backend, Duration::from_millis(10));
        bus.init().unwrap();
        let session = Session::new(DeviceSessionState::new(60, false));
        let audio = Arc::new(AudioAmp::new(Arc::new(Mutex::new(bus))));
        let panel = MemoryPanel::new(64, 48);
        let display = Arc::new(DisplayArbiter::new(Box::new(panel.clone()), 16));
        display.init().unwrap();
        (Gui::new(session, Arc::clone(&display), audio), display, panel, sim)
    }

    #[test]
    fn navigation_wraps() {
        let (gui, ..) = gui();
        gui.add_rom("mario.nes");
        gui.add_rom("tetris.gb");
        assert_eq!(gui.selected_index(), 0);
        gui.next();
        assert_eq!(gui.selected_index(), 1);
        gui.next();
        assert_eq!(gui.selected_index(), 0);
        gui.previous();
        assert_eq!(gui.selected_index(), 1);
    }

    #[test]
    fn k_nexts_return_to_start() {
        let (gui, ..) = gui();
        for name in ["a.nes", "b.gb", "c.gbc", "d.nes", "e.gb"] {
            gui.add_rom(name);
        }
        gui.next();
        gui.next();
        let start = gui.selected_index();
        for _ in 0..gui.len() {
            gui.next();
        }
        assert_eq!(gui.selected_index(), start);

        let (gui, ..) = self::gui();
        for name in ["a.nes", "b.gb", "c.gbc"] {
            gui.add_rom(name);
        }
        gui.previous();
        assert_eq!(gui.selected_index(), 2);
    }

    #[test]
    fn empty_catalog_navigation_is_noop() {
        let (gui, ..) = gui();
        gui.next();
        gui.previous();
        assert_eq!(gui.selected_index(), 0);
        assert!(gui.is_empty());
    }

    #[test]
    fn volume_and_mute_go_through_amp() {
        let (gui, _, _, sim) = gui();
        assert_eq!(gui.set_audio_level(75).unwrap(), 75);
        assert_eq!(gui.audio_level(), 75);
        assert!(gui.toggle_mute().unwrap());
        assert!(!gui.toggle_mute().unwrap());

        sim.set_nack(AMP_ADDR, true);
        assert!(gui.set_audio_level(10).is_err());
        assert_eq!(gui.audio_level(), 75);
        assert!(gui.set_mute(true).is_err());
    }

    #[test]
    fn refresh_respects_pause_and_ownership() {
        let (gui, display, panel, _) = gui();
        gui.add_rom("mario.nes");
        assert_eq!(gui.refresh_once(), Redraw::Drawn { full: true });
        assert_eq!(gui.refresh_once(), Redraw::Idle);
        assert!(!panel.is_filled_with(0xFFFF));

        gui.pause();
        gui.next();
        assert_eq!(gui.refresh_once(), Redraw::Skipped);
        display.pause();
        let _lease = display.hand_to_cart().unwrap();
        gui.resume();
        let flushes = panel.flushes();
        assert_eq!(gui.refresh_once(), Redraw::Skipped);
        assert_eq!(panel.flushes(), flushes);
        assert!(panel.is_filled_with(BACKGROUND));

        display.hand_to_menu().unwrap();
        assert_eq!(gui.refresh_once(), Redraw::Drawn { full: true });
    }

    #[test]
    fn refresh_thread_starts_once_and_stops() {
        let (gui, _, panel, _) = gui();
        gui.add_rom("tetris.gb");
        assert!(gui.start_refresh(Duration::from_millis(1)).unwrap());
        assert!(!gui.start_refresh(Duration::from_millis(1)).unwrap());
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while panel.flushes() == 0 && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(2));
        }
        assert!(panel.flushes() > 0);
        gui.stop_refresh();
        let flushes = panel.flushes();
        gui.add_rom("zelda.gbc");
        thread::sleep(Duration::from_millis(20));
        assert_eq!(panel.flushes(), flushes);
    }

    #[test]
    fn video_setting_is_shared_with_session() {
        let (gui, ..) = gui();
        assert_eq!(gui.video_setting(), VideoSetting::Fit);
        gui.set_video_setting(VideoSetting::Original);
        assert_eq!(gui.session.video_setting(), VideoSetting::Original);
    }

    #[test]
    fn live_refresh_never_draws_over_cart() {
        let (gui, display, panel, _) = gui();
        gui.add_rom("mario.nes");
        gui.add_rom("tetris.gb");
        assert!(gui.start_refresh(Duration::from_millis(1)).unwrap());

        let mut violations = 0;
        for _ in 0..200 {
            // Keep the menu dirty so every tick wants to redraw.
            gui.next();
            display.pause();
            let lease = display.hand_to_cart().unwrap();
            if !panel.is_filled_with(BACKGROUND) {
                violations += 1;
            }
            thread::sleep(Duration::from_millis(2));
            if !panel.is_filled_with(BACKGROUND) {
                violations += 1;
            }
            drop(lease);
            display.hand_to_menu().unwrap();
        }
        assert_eq!(violations, 0);

        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while panel.is_filled_with(BACKGROUND) && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(2));
        }
        assert!(!panel.is_filled_with(BACKGROUND));
        gui.stop_refresh();
    }
}
