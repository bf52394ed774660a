// Device session state: orchestrator phase, menu focus, the audio
// mute/volume pair, and the video scaling mode shared between the menu
// and a running cart.
//
// One mutex guards the whole value. Lock order across the crate is
// display → gui → session → bus; nothing takes an earlier lock while
// holding a later one.

use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

pub const MAX_VOLUME: u8 = 100;

/// Phases of the orchestrator loop. `Booting` is visited once per process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Booting,
    Menu,
    Launching,
    Running,
    Teardown,
}

/// How a cart frame smaller than the panel is presented.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoSetting {
    /// Native size, centred.
    Original,
    /// Scaled as large as fits, keeping the aspect ratio, centred.
    #[default]
    Fit,
    /// Stretched over the whole panel.
    Fill,
}

impl VideoSetting {
    /// The next mode in menu order, wrapping.
    pub fn next(self) -> Self {
        match self {
            Self::Original => Self::Fit,
            Self::Fit => Self::Fill,
            Self::Fill => Self::Original,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceSessionState {
    pub phase: Phase,
    /// Focused catalog index; meaningless while the catalog is empty.
    pub focused: usize,
    pub muted: bool,
    volume: u8,
    pub video: VideoSetting,
    /// Set by the menu when the user asks to play the focused cart.
    pub ready_to_play: bool,
}

impl DeviceSessionState {
    pub fn new(volume: i32, muted: bool) -> Self {
        Self {
            phase: Phase::Booting,
            focused: 0,
            muted,
            volume: clamp_volume(volume),
            video: VideoSetting::default(),
            ready_to_play: false,
        }
    }

    pub fn volume(&self) -> u8 {
        self.volume
    }

    /// Store a volume percentage, clamped to `[0, 100]`. Returns the stored value.
    pub fn set_volume(&mut self, percent: i32) -> u8 {
        self.volume = clamp_volume(percent);
        self.volume
    }
}

impl Default for DeviceSessionState {
    fn default() -> Self {
        Self::new(60, false)
    }
}

pub fn clamp_volume(percent: i32) -> u8 {
    percent.clamp(0, MAX_VOLUME as i32) as u8
}

/// Shared handle onto the session state.
#[derive(Debug, Clone, Default)]
pub struct Session {
    inner: Arc<Mutex<DeviceSessionState>>,
}

impl Session {
    pub fn new(state: DeviceSessionState) -> Self {
        Self {
            inner: Arc::new(Mutex::new(state)),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, DeviceSessionState> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn snapshot(&self) -> DeviceSessionState {
        self.lock().clone()
    }

    pub fn phase(&self) -> Phase {
        self.lock().phase
    }

    pub fn set_phase(&self, phase: Phase) {
        let mut st = self.lock();
        if st.phase != phase {
            log::debug!("phase {:?} → {:?}", st.phase, phase);
            st.phase = phase;
        }
    }

    pub fn focused(&self) -> usize {
        self.lock().focused
    }

    pub fn is_muted(&self) -> bool {
        self.lock().muted
    }

    pub fn volume(&self) -> u8 {
        self.lock().volume
    }

    pub fn video_setting(&self) -> VideoSetting {
        self.lock().video
    }

    pub fn set_video_setting(&self, video: VideoSetting) {
        self.lock().video = video;
    }

    pub fn ready_to_play(&self) -> bool {
        self.lock().ready_to_play
    }

    pub fn set_ready_to_play(&self, ready: bool) {
        self.lock().ready_to_play = ready;
    }
}
