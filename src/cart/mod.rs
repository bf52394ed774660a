// Cart adapters: one running cartridge session per platform.
//
// The orchestrator builds exactly one `Cart` per launch, calls `run()`
// until it returns false, then drops it. Platform dispatch is a closed
// enum; Game Boy Color runs on the Game Boy adapter in colour mode.

pub mod gameboy;
pub mod nes;
pub mod pattern;

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::display::{DisplayError, DisplayLease};
use crate::input::{Input, InputSnapshot};
use crate::session::VideoSetting;
use crate::storage::{LoadError, Platform, RomDescriptor, RomImage};

pub use gameboy::GameboyCart;
pub use nes::NesCart;
pub use pattern::PatternCore;

#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    #[error("no emulator for platform {0}")]
    UnsupportedPlatform(Platform),
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error(transparent)]
    Display(#[from] DisplayError),
    #[error("emulation core rejected ROM: {0}")]
    Core(String),
}

/// An emulation core as seen by an adapter. Frames are RGB565 at the
/// core's native resolution.
pub trait EmulationCore: Send {
    /// Native display resolution as (width, height).
    fn display_size(&self) -> (u16, u16);

    /// Attach the ROM image. Called once before the first frame.
    fn load(&mut self, rom: &RomImage) -> Result<(), String>;

    /// Latch the buttons the next `run_frame` sees.
    fn set_input(&mut self, input: &InputSnapshot);

    fn run_frame(&mut self);

    /// Render the current frame into `buffer` (`width * height` pixels).
    fn render_frame(&self, buffer: &mut [u16]);

    fn reset(&mut self);
}

/// Everything an adapter needs for one session.
pub struct CartConfig {
    pub descriptor: RomDescriptor,
    pub rom: RomImage,
    pub display: DisplayLease,
    pub input: Arc<Input>,
    /// `None` selects the built-in core for the platform.
    pub core: Option<Box<dyn EmulationCore>>,
    /// Target time per frame; zero runs unpaced.
    pub frame_interval: Duration,
    /// Scaling for adapters that compose into a frame buffer.
    pub video: VideoSetting,
}

pub enum Cart {
    Nes(NesCart),
    Gameboy(GameboyCart),
}

impl Cart {
    /// Fail early for platforms no adapter handles.
    pub fn check_platform(platform: Platform) -> Result<(), AdapterError> {
        match platform {
            Platform::Unknown => Err(AdapterError::UnsupportedPlatform(platform)),
            _ => Ok(()),
        }
    }

    pub fn new(config: CartConfig) -> Result<Self, AdapterError> {
        match config.descriptor.platform() {
            Platform::Nes => Ok(Self::Nes(NesCart::new(config)?)),
            Platform::Gameboy => Ok(Self::Gameboy(GameboyCart::new(config, false)?)),
            Platform::GameboyColor => Ok(Self::Gameboy(GameboyCart::new(config, true)?)),
            p @ Platform::Unknown => Err(AdapterError::UnsupportedPlatform(p)),
        }
    }

    /// Run one frame. Returns false once the session should end: the
    /// user pressed the quit combo, or the display lease was revoked.
    pub fn run(&mut self) -> bool {
        match self {
            Self::Nes(c) => c.run(),
            Self::Gameboy(c) => c.run(),
        }
    }

    pub fn frames(&self) -> u64 {
        self.session().frames
    }

    fn session(&self) -> &CartSession {
        match self {
            Self::Nes(c) => &c.session,
            Self::Gameboy(c) => &c.session,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
//  Shared per-session plumbing
// ─────────────────────────────────────────────────────────────────────────────

/// State common to every adapter: the ROM, lease, input, core, and
/// frame pacing.
pub(crate) struct CartSession {
    descriptor: RomDescriptor,
    rom: RomImage,
    display: DisplayLease,
    input: Arc<Input>,
    core: Box<dyn EmulationCore>,
    frame_interval: Duration,
    next_frame: Option<Instant>,
    frames: u64,
    /// Native-resolution render target.
    native: Vec<u16>,
}

pub(crate) enum Step {
    Quit,
    Frame,
}

impl CartSession {
    fn new(
        config: CartConfig,
        default_core: impl FnOnce() -> Box<dyn EmulationCore>,
    ) -> Result<Self, AdapterError> {
        let CartConfig {
            descriptor,
            rom,
            display,
            input,
            core,
            frame_interval,
            ..
        } = config;
        if !display.is_valid() {
            return Err(AdapterError::Display(DisplayError::NotInitialized));
        }

        let mut core = core.unwrap_or_else(default_core);
        core.load(&rom).map_err(AdapterError::Core)?;
        let (w, h) = core.display_size();
        log::info!(
            "starting {} cart '{}' ({} bytes, md5 {}, {w}x{h})",
            descriptor.platform(),
            descriptor.display_name(),
            rom.len(),
            rom.md5()
        );

        Ok(Self {
            descriptor,
            rom,
            display,
            input,
            core,
            frame_interval,
            next_frame: None,
            frames: 0,
            native: vec![0; w as usize * h as usize],
        })
    }

    /// Poll input, advance the core one frame, and render it into `native`.
    fn step(&mut self) -> Step {
        let buttons = self.input.snapshot();
        if buttons.is_quit_combo() {
            log::info!("quit combo pressed, leaving '{}'", self.descriptor.display_name());
            return Step::Quit;
        }
        self.pace();
        self.core.set_input(&buttons);
        self.core.run_frame();
        self.core.render_frame(&mut self.native);
        self.frames += 1;
        Step::Frame
    }

    fn pace(&mut self) {
        if self.frame_interval.is_zero() {
            return;
        }
        let now = Instant::now();
        let due = self.next_frame.unwrap_or(now);
        if due > now {
            thread::sleep(due - now);
        }
        // Do not try to catch up after a long stall.
        self.next_frame = Some(due.max(now) + self.frame_interval);
    }

    /// True once the lease has been revoked.
    fn lease_lost(&self) -> bool {
        if self.display.is_valid() {
            return false;
        }
        log::warn!("display lease revoked, stopping '{}'", self.descriptor.display_name());
        true
    }
}

impl Drop for CartSession {
    fn drop(&mut self) {
        self.core.reset();
        log::info!(
            "cart '{}' stopped after {} frames (rom {})",
            self.descriptor.display_name(),
            self.frames,
            self.rom.path().display()
        );
    }
}
