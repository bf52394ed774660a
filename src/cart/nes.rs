use super::{AdapterError, CartConfig, CartSession, PatternCore, Step};

pub const NES_WIDTH: u16 = 256;
pub const NES_HEIGHT: u16 = 240;

/// NES adapter. Frames go straight to the panel through `write_frame`,
/// centred, unscaled.
pub struct NesCart {
    pub(super) session: CartSession,
    origin: (u16, u16),
}

impl NesCart {
    pub fn new(config: CartConfig) -> Result<Self, AdapterError> {
        let (panel_w, panel_h) = config.display.size();
        let session =
            CartSession::new(config, || Box::new(PatternCore::new(NES_WIDTH, NES_HEIGHT)))?;
        let (w, h) = session.core.display_size();
        if w > panel_w || h > panel_h {
            return Err(AdapterError::Core(format!(
                "{w}x{h} frame does not fit a {panel_w}x{panel_h} panel"
            )));
        }
        Ok(Self {
            session,
            origin: ((panel_w - w) / 2, (panel_h - h) / 2),
        })
    }

    pub fn run(&mut self) -> bool {
        match self.session.step() {
            Step::Quit => false,
            Step::Frame => {
                let (w, h) = self.session.core.display_size();
                let (x, y) = self.origin;
                let s = &self.session;
                if !s.display.write_frame(x, y, w, h, &s.native) && s.lease_lost() {
                    return false;
                }
                log::trace!("nes frame {}", s.frames);
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cart::tests::{config, lease};
    use crate::display::BACKGROUND;
    use crate::input::ScriptedInput;
    use crate::storage::Platform;

    #[test]
    fn frame_is_centred() {
        let script = ScriptedInput::new();
        let (_arb, panel, lease) = lease(320, 240);
        let mut cart = NesCart::new(config("mario.nes", Platform::Nes, &script, lease)).unwrap();
        assert!(cart.run());
        // Pillarbox columns stay background.
        assert_eq!(panel.pixel(0, 120), BACKGROUND);
        assert_eq!(panel.pixel(319, 120), BACKGROUND);
        assert_eq!(cart.origin, (32, 0));
    }

    #[test]
    fn panel_too_small_is_rejected() {
        let script = ScriptedInput::new();
        let (_arb, _, lease) = lease(160, 144);
        let err = NesCart::new(config("mario.nes", Platform::Nes, &script, lease)).err().unwrap();
        assert!(matches!(err, AdapterError::Core(_)));
    }
}
