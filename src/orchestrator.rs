// Device orchestrator: boot once, then loop MENU → LAUNCHING → RUNNING →
// TEARDOWN → MENU forever.
//
// The orchestrator thread is the only one that touches the cart. The GUI
// refresh thread only ever reaches the display through `redraw_menu`.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use crossbeam_channel::tick;

use crate::audio::AudioAmp;
use crate::cart::{AdapterError, Cart, CartConfig};
use crate::config::Config;
use crate::display::{DisplayArbiter, Panel};
use crate::gui::Gui;
use crate::i2c_bus::I2cBus;
use crate::input::{EdgeDetector, Input, InputSource, MenuAction};
use crate::peripheral_mux::{lock_bus, PeripheralBus, SharedBus};
use crate::session::{DeviceSessionState, Phase, Session};
use crate::storage::{RomDescriptor, RomStore, ScanOutcome, Storage};

/// Volume step for the menu's left/right buttons.
const VOLUME_STEP: i32 = 10;

/// The hardware the device runs against.
pub struct Backends {
    pub bus: Box<dyn I2cBus>,
    pub panel: Box<dyn Panel>,
    pub input: Box<dyn InputSource>,
}

/// Outcome of one MENU → … → MENU pass.
#[derive(Debug)]
pub enum CycleReport {
    /// The cart ran and the user quit it.
    Played { rom: String, frames: u64 },
    /// The cart never reached RUNNING.
    LaunchFailed { rom: String, error: AdapterError },
}

pub struct Device {
    config: Config,
    /// Where menu-side setting changes are persisted, if anywhere.
    config_path: Option<PathBuf>,
    session: Session,
    bus: SharedBus,
    audio: Arc<AudioAmp>,
    input: Arc<Input>,
    storage: Storage,
    roms: RomStore,
    display: Arc<DisplayArbiter>,
    gui: Gui,
    catalog: Vec<RomDescriptor>,
    saves: Vec<PathBuf>,
    booted: bool,
}

impl Device {
    pub fn new(config: Config, backends: Backends) -> Self {
        let mut state = DeviceSessionState::new(config.initial_volume, config.muted);
        state.video = config.video_setting;
        let session = Session::new(state);
        let mux = PeripheralBus::new(backends.bus, config.bus_timeout());
        let bus: SharedBus = Arc::new(Mutex::new(mux));
        let audio = Arc::new(AudioAmp::new(Arc::clone(&bus)));
        let display = Arc::new(DisplayArbiter::new(backends.panel, config.rows_per_buffer));
        let gui = Gui::new(session.clone(), Arc::clone(&display), Arc::clone(&audio));
        Self {
            storage: Storage::new(&config.mount_point, &config.rom_dir, &config.save_dir),
            roms: RomStore::new(config.rom_pool_bytes),
            input: Arc::new(Input::new(backends.input)),
            config,
            config_path: None,
            session,
            bus,
            audio,
            display,
            gui,
            catalog: Vec::new(),
            saves: Vec::new(),
            booted: false,
        }
    }

    /// Persist menu-side setting changes to `path`.
    pub fn with_config_path(mut self, path: PathBuf) -> Self {
        self.config_path = Some(path);
        self
    }

    /// Bring every subsystem up once, scan the volume and populate the
    /// menu. Failures are logged and leave the device degraded, never
    /// stopped. Returns false when already booted.
    pub fn boot(&mut self) -> bool {
        if self.booted {
            return false;
        }
        log::info!("booting emubox");

        self.roms.init();
        if let Err(e) = self.storage.mount() {
            log::error!("{e}");
        }
        if let Err(e) = self.display.init() {
            log::error!("display init failed: {e}");
        }
        if let Err(e) = lock_bus(&self.bus).init() {
            log::error!("I2C bus init failed: {e}");
        }
        if let Err(e) = self.audio.init(&self.session) {
            log::error!("audio init failed: {e}");
        }
        if let Err(e) = self.input.init() {
            log::error!("input init failed: {e}");
        }

        let outcome = self.storage.scan_roms();
        if let ScanOutcome::Unavailable { path, reason } = &outcome {
            log::warn!("ROM directory {} unavailable ({reason}), catalog is empty", path.display());
        }
        for rom in outcome.into_roms() {
            self.register(rom);
        }
        self.saves = self.storage.scan_saves();
        log::info!("{} ROMs, {} saves", self.catalog.len(), self.saves.len());

        if let Err(e) = self.gui.start_refresh(self.config.refresh_interval()) {
            log::error!("cannot start menu refresh: {e}");
        }
        self.session.set_phase(Phase::Menu);
        self.booted = true;
        true
    }

    fn register(&mut self, rom: RomDescriptor) {
        self.gui.add_rom(rom.display_name());
        self.catalog.push(rom);
    }

    pub fn catalog(&self) -> &[RomDescriptor] {
        &self.catalog
    }

    pub fn saves(&self) -> &[PathBuf] {
        &self.saves
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn gui(&self) -> &Gui {
        &self.gui
    }

    pub fn display(&self) -> &Arc<DisplayArbiter> {
        &self.display
    }

    pub fn rom_store(&self) -> &RomStore {
        &self.roms
    }

    pub fn run_forever(&mut self) -> ! {
        loop {
            match self.run_cycle() {
                CycleReport::Played { rom, frames } => {
                    log::info!("'{rom}' finished after {frames} frames");
                }
                CycleReport::LaunchFailed { rom, error } => {
                    log::warn!("'{rom}' did not start: {error}");
                }
            }
        }
    }

    /// One full pass: wait in the menu for a selection, launch it, run it
    /// until the user quits, tear down, and return to the menu.
    pub fn run_cycle(&mut self) -> CycleReport {
        self.boot();
        self.session.set_phase(Phase::Menu);
        let index = self.wait_for_selection();
        let descriptor = self.catalog[index].clone();
        let rom = descriptor.display_name().to_string();
        log::info!("selected #{index} '{rom}' ({})", descriptor.storage_path().display());

        self.session.set_phase(Phase::Launching);
        let report = match self.launch(descriptor) {
            Ok(mut cart) => {
                self.session.set_phase(Phase::Running);
                while cart.run() {}
                let frames = cart.frames();
                self.session.set_phase(Phase::Teardown);
                self.teardown(Some(cart));
                CycleReport::Played { rom, frames }
            }
            Err(error) => {
                log::error!("launching '{rom}' failed: {error}");
                self.session.set_phase(Phase::Teardown);
                self.teardown(None);
                CycleReport::LaunchFailed { rom, error }
            }
        };
        self.session.set_phase(Phase::Menu);
        report
    }

    /// Poll input until the user confirms a catalog entry. Returns its index.
    fn wait_for_selection(&mut self) -> usize {
        self.gui.set_ready_to_play(false);
        let ticker = tick(self.config.input_poll_interval());
        let mut edges = EdgeDetector::new(self.input.snapshot());
        loop {
            if let Some(index) = self.poll_menu(&mut edges) {
                return index;
            }
            let _ = ticker.recv();
        }
    }

    /// One menu poll. Returns the selected index once confirmed.
    fn poll_menu(&mut self, edges: &mut EdgeDetector) -> Option<usize> {
        let snapshot = edges.update(self.input.snapshot())?;
        match MenuAction::from_snapshot(&snapshot)? {
            MenuAction::Previous => self.gui.previous(),
            MenuAction::Next => self.gui.next(),
            MenuAction::VolumeDown | MenuAction::VolumeUp => {
                let step = if snapshot.left { -VOLUME_STEP } else { VOLUME_STEP };
                // The error is already logged by the amp driver.
                let _ = self.gui.set_audio_level(self.gui.audio_level() as i32 + step);
            }
            MenuAction::ToggleMute => {
                let _ = self.gui.toggle_mute();
            }
            MenuAction::CycleVideo => {
                let video = self.gui.video_setting().next();
                self.gui.set_video_setting(video);
                self.config.video_setting = video;
                if let Some(path) = &self.config_path {
                    // Command-line overrides stay off disk.
                    let mut stored = Config::load_from(path);
                    stored.video_setting = video;
                    stored.save_to(path);
                }
            }
            MenuAction::Confirm => {
                let index = self.gui.selected_index();
                if index >= self.catalog.len() {
                    log::info!("nothing to play");
                    return None;
                }
                self.gui.set_ready_to_play(true);
                return Some(index);
            }
        }
        None
    }

    fn launch(&mut self, descriptor: RomDescriptor) -> Result<Cart, AdapterError> {
        self.gui.pause();
        self.display.pause();
        let display = self.display.hand_to_cart()?;
        Cart::check_platform(descriptor.platform())?;
        let rom = self.roms.load(descriptor.storage_path())?;
        Cart::new(CartConfig {
            descriptor,
            rom,
            display,
            input: Arc::clone(&self.input),
            core: None,
            frame_interval: self.config.frame_interval(),
            video: self.session.video_setting(),
        })
    }

    fn teardown(&mut self, cart: Option<Cart>) {
        drop(cart);
        self.roms.release();
        self.display.clear();
        if let Err(e) = self.display.hand_to_menu() {
            // The hand-off itself failed; just unpause the menu.
            log::debug!("{e}");
            self.display.resume();
        }
        // The error is already logged by the amp driver.
        let _ = self.audio.refresh(&self.session);
        self.gui.resume();
        self.gui.set_ready_to_play(false);
        log::info!("back to menu");
    }
}
