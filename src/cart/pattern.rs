// Built-in stand-in core. It does not execute the ROM; it renders a
// scrolling pattern sampled from the ROM bytes so the whole display and
// input path can run without a real emulator linked in.

use super::EmulationCore;
use crate::display::make_color;
use crate::input::InputSnapshot;
use crate::storage::RomImage;

pub struct PatternCore {
    width: u16,
    height: u16,
    rom: Option<RomImage>,
    input: InputSnapshot,
    scroll: (i32, i32),
    frame: u64,
}

impl PatternCore {
    pub fn new(width: u16, height: u16) -> Self {
        Self {
            width,
            height,
            rom: None,
            input: InputSnapshot::default(),
            scroll: (0, 0),
            frame: 0,
        }
    }

    pub fn frame(&self) -> u64 {
        self.frame
    }

    pub fn scroll(&self) -> (i32, i32) {
        self.scroll
    }
}

impl EmulationCore for PatternCore {
    fn display_size(&self) -> (u16, u16) {
        (self.width, self.height)
    }

    fn load(&mut self, rom: &RomImage) -> Result<(), String> {
        if rom.is_empty() {
            return Err(format!("{} is empty", rom.path().display()));
        }
        self.rom = Some(rom.clone());
        Ok(())
    }

    fn set_input(&mut self, input: &InputSnapshot) {
        self.input = *input;
    }

    fn run_frame(&mut self) {
        let i = &self.input;
        self.scroll.0 += i.right as i32 - i.left as i32;
        self.scroll.1 += i.down as i32 - i.up as i32;
        self.frame += 1;
    }

    fn render_frame(&self, buffer: &mut [u16]) {
        let Some(rom) = &self.rom else {
            return;
        };
        let bytes = rom.as_bytes();
        let w = self.width as usize;
        // Eight-pixel tiles, one ROM byte each.
        for (idx, px) in buffer.iter_mut().enumerate().take(w * self.height as usize) {
            let x = ((idx % w) as i64 + self.scroll.0 as i64).rem_euclid(1 << 16) as usize / 8;
            let y = ((idx / w) as i64 + self.scroll.1 as i64).rem_euclid(1 << 16) as usize / 8;
            let b = bytes[(x * 31 + y * 17 + self.frame as usize / 8) % bytes.len()];
            *px = make_color(b, b.rotate_left(3), b.rotate_left(5)).max(1);
        }
    }

    fn reset(&mut self) {
        self.scroll = (0, 0);
        self.frame = 0;
        self.input = InputSnapshot::default();
    }
}
