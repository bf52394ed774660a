// Button input: snapshots, edge detection and menu actions.
//
// Device: GPIO pull-ups, active low. Host: KeyboardInput reads button
// names from stdin; ScriptedInput replays a fixed sequence for tests.

use std::collections::VecDeque;
use std::io::BufRead;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;

use crossbeam_channel::{unbounded, Receiver};

use crate::latch::InitLatch;

/// Every button state sampled in one poll. Compared structurally to
/// detect edges.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct InputSnapshot {
    pub up: bool,
    pub down: bool,
    pub left: bool,
    pub right: bool,
    pub a: bool,
    pub b: bool,
    pub x: bool,
    pub y: bool,
    pub start: bool,
    pub select: bool,
    pub joystick_select: bool,
}

impl InputSnapshot {
    /// Select + start: leave the running cart and go back to the menu.
    pub fn is_quit_combo(&self) -> bool {
        self.select && self.start
    }

    /// Set the button named `name`. Returns false for unknown names.
    pub fn press(&mut self, name: &str) -> bool {
        let button = match name.to_ascii_lowercase().as_str() {
            "up" | "w" => &mut self.up,
            "down" | "s" => &mut self.down,
            "left" => &mut self.left,
            "right" => &mut self.right,
            "a" => &mut self.a,
            "b" => &mut self.b,
            "x" => &mut self.x,
            "y" => &mut self.y,
            "start" | "enter" => &mut self.start,
            "select" => &mut self.select,
            "joy" | "joystick_select" => &mut self.joystick_select,
            _ => return false,
        };
        *button = true;
        true
    }

    /// Parse `"select+start"` / `"down"` into a snapshot.
    pub fn parse(line: &str) -> Option<Self> {
        let mut snap = Self::default();
        let mut any = false;
        for token in line.split(|c: char| c == '+' || c.is_whitespace()) {
            if token.is_empty() {
                continue;
            }
            if !snap.press(token) {
                return None;
            }
            any = true;
        }
        any.then_some(snap)
    }
}

/// What the menu does with a freshly changed snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuAction {
    Previous,
    Next,
    Confirm,
    VolumeDown,
    VolumeUp,
    ToggleMute,
    CycleVideo,
}

impl MenuAction {
    pub fn from_snapshot(s: &InputSnapshot) -> Option<Self> {
        if s.up {
            Some(Self::Previous)
        } else if s.down {
            Some(Self::Next)
        } else if s.start || s.a {
            Some(Self::Confirm)
        } else if s.left {
            Some(Self::VolumeDown)
        } else if s.right {
            Some(Self::VolumeUp)
        } else if s.x {
            Some(Self::ToggleMute)
        } else if s.y {
            Some(Self::CycleVideo)
        } else {
            None
        }
    }
}

/// Remembers the previous snapshot; only changes are reported.
#[derive(Debug, Default)]
pub struct EdgeDetector {
    prev: InputSnapshot,
}

impl EdgeDetector {
    pub fn new(initial: InputSnapshot) -> Self {
        Self { prev: initial }
    }

    /// Returns the new snapshot when it differs from the last one.
    pub fn update(&mut self, current: InputSnapshot) -> Option<InputSnapshot> {
        if current == self.prev {
            return None;
        }
        self.prev = current;
        Some(current)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
//  Sources
// ─────────────────────────────────────────────────────────────────────────────

/// A button backend. Polling is caller-driven.
pub trait InputSource: Send {
    fn init(&mut self) -> Result<(), String> {
        Ok(())
    }

    fn snapshot(&mut self) -> InputSnapshot;
}

/// Latched, lockable wrapper shared by the orchestrator and the running cart.
pub struct Input {
    source: Mutex<Box<dyn InputSource>>,
    latch: InitLatch,
}

impl Input {
    pub fn new(source: Box<dyn InputSource>) -> Self {
        Self {
            source: Mutex::new(source),
            latch: InitLatch::new(),
        }
    }

    fn source(&self) -> MutexGuard<'_, Box<dyn InputSource>> {
        self.source.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn init(&self) -> Result<bool, String> {
        let ran = self.latch.run(|| self.source().init())?;
        if ran {
            log::info!("input initialized");
        }
        Ok(ran)
    }

    pub fn snapshot(&self) -> InputSnapshot {
        self.source().snapshot()
    }
}

/// Replays queued snapshots; once drained it keeps returning the last one.
#[derive(Debug, Clone, Default)]
pub struct ScriptedInput {
    queue: Arc<Mutex<VecDeque<InputSnapshot>>>,
    last: InputSnapshot,
}

impl ScriptedInput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, snap: InputSnapshot) -> &Self {
        self.queue
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(snap);
        self
    }

    /// Queue a press of `buttons` followed by a release.
    pub fn tap(&self, buttons: &str) -> &Self {
        if let Some(snap) = InputSnapshot::parse(buttons) {
            self.push(snap);
        }
        self.push(InputSnapshot::default())
    }

    /// Queue `n` idle polls.
    pub fn idle(&self, n: usize) -> &Self {
        for _ in 0..n {
            self.push(InputSnapshot::default());
        }
        self
    }

    pub fn remaining(&self) -> usize {
        self.queue.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl InputSource for ScriptedInput {
    fn snapshot(&mut self) -> InputSnapshot {
        if let Some(next) = self
            .queue
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
        {
            self.last = next;
        }
        self.last
    }
}

/// Reads button names from stdin, one press per line (`down`, `a`,
/// `select+start`). Each line becomes a press followed by a release.
#[derive(Default)]
pub struct KeyboardInput {
    rx: Option<Receiver<InputSnapshot>>,
}

impl KeyboardInput {
    pub fn new() -> Self {
        Self::default()
    }
}

impl InputSource for KeyboardInput {
    fn init(&mut self) -> Result<(), String> {
        let (tx, rx) = unbounded();
        thread::Builder::new()
            .name("input-stdin".into())
            .spawn(move || {
                let stdin = std::io::stdin();
                for line in stdin.lock().lines() {
                    let Ok(line) = line else { break };
                    match InputSnapshot::parse(&line) {
                        Some(snap) => {
                            // A tap: pressed for one poll, then released.
                            let release = InputSnapshot::default();
                            if tx.send(snap).is_err() || tx.send(release).is_err() {
                                break;
                            }
                        }
                        None if line.trim().is_empty() => {}
                        None => log::warn!("unknown button(s): {}", line.trim()),
                    }
                }
                log::debug!("stdin closed, keyboard input thread exiting");
            })
            .map_err(|e| format!("Cannot spawn input thread: {e}"))?;
        self.rx = Some(rx);
        Ok(())
    }

    fn snapshot(&mut self) -> InputSnapshot {
        self.rx
            .as_ref()
            .and_then(|rx| rx.try_recv().ok())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_combo() {
        let s = InputSnapshot::parse("select+start").unwrap();
        assert!(s.is_quit_combo());
        assert!(!s.a);
        assert!(InputSnapshot::parse("jump").is_none());
        assert!(InputSnapshot::parse("  ").is_none());
    }

    #[test]
    fn held_input_fires_once() {
        let down = InputSnapshot::parse("down").unwrap();
        let mut edges = EdgeDetector::default();
        let fired: Vec<_> = [down, down, down, InputSnapshot::default(), down]
            .into_iter()
            .filter_map(|s| edges.update(s))
            .filter_map(|s| MenuAction::from_snapshot(&s))
            .collect();
        assert_eq!(fired, vec![MenuAction::Next, MenuAction::Next]);
    }

    #[test]
    fn menu_actions() {
        let act = |l: &str| MenuAction::from_snapshot(&InputSnapshot::parse(l).unwrap());
        assert_eq!(act("up"), Some(MenuAction::Previous));
        assert_eq!(act("down"), Some(MenuAction::Next));
        assert_eq!(act("a"), Some(MenuAction::Confirm));
        assert_eq!(act("start"), Some(MenuAction::Confirm));
        assert_eq!(act("left"), Some(MenuAction::VolumeDown));
        assert_eq!(act("right"), Some(MenuAction::VolumeUp));
        assert_eq!(act("x"), Some(MenuAction::ToggleMute));
        assert_eq!(act("y"), Some(MenuAction::CycleVideo));
        assert_eq!(act("b"), None);
    }

    #[test]
    fn scripted_input_holds_last() {
        let script = ScriptedInput::new();
        script.tap("a");
        let input = Input::new(Box::new(script.clone()));
        assert!(input.init().unwrap());
        assert!(!input.init().unwrap());
        assert!(input.snapshot().a);
        assert_eq!(input.snapshot(), InputSnapshot::default());
        assert_eq!(input.snapshot(), InputSnapshot::default());
        assert_eq!(script.remaining(), 0);
    }
}
