use super::{AdapterError, CartConfig, CartSession, PatternCore, Step};
use crate::display::{make_color, BACKGROUND};
use crate::session::VideoSetting;

pub const GB_WIDTH: u16 = 160;
pub const GB_HEIGHT: u16 = 144;

/// Four-shade DMG palette, lightest first.
const DMG_SHADES: [(u8, u8, u8); 4] =
    [(155, 188, 15), (139, 172, 15), (48, 98, 48), (15, 56, 15)];

/// Game Boy / Game Boy Color adapter. Frames are scaled per the video
/// setting, composed into the off-screen frame buffers (alternating), and
/// presented whole.
pub struct GameboyCart {
    pub(super) session: CartSession,
    color: bool,
    back: usize,
    /// Scaled output rectangle: (x, y, w, h).
    target: (u16, u16, u16, u16),
}

impl GameboyCart {
    pub fn new(config: CartConfig, color: bool) -> Result<Self, AdapterError> {
        let panel = config.display.size();
        let video = config.video;
        let session =
            CartSession::new(config, || Box::new(PatternCore::new(GB_WIDTH, GB_HEIGHT)))?;
        let (w, h) = session.core.display_size();
        if w == 0 || h == 0 {
            return Err(AdapterError::Core(format!("invalid frame size {w}x{h}")));
        }

        let target = target_rect(video, (w, h), panel);
        log::debug!(
            "gameboy output {}x{} at ({},{}), {video:?}, color={color}",
            target.2,
            target.3,
            target.0,
            target.1
        );

        Ok(Self {
            session,
            color,
            back: 0,
            target,
        })
    }

    pub fn is_color(&self) -> bool {
        self.color
    }

    pub fn run(&mut self) -> bool {
        if let Step::Quit = self.session.step() {
            return false;
        }

        let (src_w, src_h) = self.session.core.display_size();
        let (tx, ty, tw, th) = self.target;
        let color = self.color;
        let native = &self.session.native;
        let lease = &self.session.display;
        let (panel_w, _) = lease.size();

        let composed = lease.with_frame_buffer(self.back, |fb| {
            fb.fill(BACKGROUND);
            for oy in 0..th as usize {
                let sy = oy * src_h as usize / th as usize;
                let row = &native[sy * src_w as usize..(sy + 1) * src_w as usize];
                let dst = (ty as usize + oy) * panel_w as usize + tx as usize;
                for (ox, px) in fb[dst..dst + tw as usize].iter_mut().enumerate() {
                    let p = row[ox * src_w as usize / tw as usize];
                    *px = if color { p } else { dmg_shade(p) };
                }
            }
        });

        let presented = composed.is_some() && lease.flush_frame_buffer(self.back);
        if !presented && self.session.lease_lost() {
            return false;
        }
        self.back ^= 1;
        log::trace!("gameboy frame {}", self.session.frames);
        true
    }
}

/// Output rectangle (x, y, w, h) for a `src` frame on a `panel`. A frame
/// too large to show unscaled falls back to `Fit`.
fn target_rect(video: VideoSetting, src: (u16, u16), panel: (u16, u16)) -> (u16, u16, u16, u16) {
    let (w, h) = (src.0 as u32, src.1 as u32);
    let (pw, ph) = (panel.0 as u32, panel.1 as u32);
    let (out_w, out_h) = match video {
        VideoSetting::Fill => (pw, ph),
        VideoSetting::Original if w <= pw && h <= ph => (w, h),
        _ if pw * h >= ph * w => (w * ph / h, ph),
        _ => (pw, h * pw / w),
    };
    (
        ((pw - out_w) / 2) as u16,
        ((ph - out_h) / 2) as u16,
        out_w as u16,
        out_h as u16,
    )
}

/// Map an RGB565 pixel onto the nearest of the four DMG shades by luminance.
fn dmg_shade(p: u16) -> u16 {
    let r = ((p >> 11) & 0x1F) as u32 * 255 / 31;
    let g = ((p >> 5) & 0x3F) as u32 * 255 / 63;
    let b = (p & 0x1F) as u32 * 255 / 31;
    let luma = (r * 299 + g * 587 + b * 114) / 1000;
    let (sr, sg, sb) = DMG_SHADES[3 - (luma as usize * 4 / 256).min(3)];
    make_color(sr, sg, sb)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cart::tests::{config, lease};
    use crate::display::{DisplayArbiter, MemoryPanel};
    use crate::input::ScriptedInput;
    use crate::storage::Platform;
    use std::sync::Arc;

    fn cart(video: VideoSetting) -> (GameboyCart, MemoryPanel, Arc<DisplayArbiter>) {
        let script = ScriptedInput::new();
        let (arb, panel, lease) = lease(320, 240);
        let mut config = config("tetris.gb", Platform::Gameboy, &script, lease);
        config.video = video;
        (GameboyCart::new(config, false).unwrap(), panel, arb)
    }

    #[test]
    fn fit_scales_to_panel_height() {
        let (mut cart, panel, _arb) = cart(VideoSetting::Fit);
        assert_eq!(cart.target, (27, 0, 266, 240));
        assert!(cart.run());
        assert_eq!(panel.pixel(0, 0), BACKGROUND);
        assert_ne!(panel.pixel(160, 120), BACKGROUND);
    }

    #[test]
    fn original_is_centred_unscaled() {
        let (mut cart, panel, _arb) = cart(VideoSetting::Original);
        assert_eq!(cart.target, (80, 48, 160, 144));
        assert!(cart.run());
        assert_eq!(panel.pixel(79, 120), BACKGROUND);
        assert_eq!(panel.pixel(160, 47), BACKGROUND);
        assert_ne!(panel.pixel(80, 48), BACKGROUND);
        assert_ne!(panel.pixel(239, 191), BACKGROUND);
        assert_eq!(panel.pixel(240, 120), BACKGROUND);
    }

    #[test]
    fn fill_stretches_over_panel() {
        let (mut cart, panel, _arb) = cart(VideoSetting::Fill);
        assert_eq!(cart.target, (0, 0, 320, 240));
        assert!(cart.run());
        assert_ne!(panel.pixel(0, 0), BACKGROUND);
        assert_ne!(panel.pixel(319, 239), BACKGROUND);
    }

    #[test]
    fn original_too_large_falls_back_to_fit() {
        assert_eq!(
            target_rect(VideoSetting::Original, (160, 144), (120, 90)),
            target_rect(VideoSetting::Fit, (160, 144), (120, 90))
        );
        assert_eq!(target_rect(VideoSetting::Fit, (160, 144), (120, 90)), (10, 0, 100, 90));
    }

    #[test]
    fn dmg_mode_uses_four_shades() {
        let shades: Vec<u16> = DMG_SHADES.iter().map(|&(r, g, b)| make_color(r, g, b)).collect();
        for p in [0x0000u16, 0xFFFF, 0xF800, 0x07E0, 0x1234] {
            assert!(shades.contains(&dmg_shade(p)));
        }
        assert_eq!(dmg_shade(0xFFFF), shades[0]);
        assert_eq!(dmg_shade(0x0000), shades[3]);
    }

    #[test]
    fn alternates_frame_buffers() {
        let script = ScriptedInput::new();
        let (_arb, _, lease) = lease(320, 240);
        let config = config("zelda.gbc", Platform::GameboyColor, &script, lease);
        let mut cart = GameboyCart::new(config, true).unwrap();
        assert_eq!(cart.back, 0);
        cart.run();
        assert_eq!(cart.back, 1);
        cart.run();
        assert_eq!(cart.back, 0);
    }
}
