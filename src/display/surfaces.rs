// Pixel surfaces and the panel they are flushed to.
//
// Pixel format everywhere is packed RGB565 (`u16`), for menu strips and
// cart frames alike.

use std::sync::{Arc, Mutex, MutexGuard};

/// Colour the panel is cleared to between menu and cart.
pub const BACKGROUND: u16 = 0x0000;

pub fn make_color(r: u8, g: u8, b: u8) -> u16 {
    ((r as u16 & 0xF8) << 8) | ((g as u16 & 0xFC) << 3) | (b as u16 >> 3)
}

/// The physical display. `draw_bitmap` copies a `width × height` block of
/// pixels to `(x, y)`; the caller guarantees the block is on-screen.
pub trait Panel: Send {
    fn init(&mut self) -> Result<(), String> {
        Ok(())
    }

    fn size(&self) -> (u16, u16);

    fn draw_bitmap(&mut self, x: u16, y: u16, width: u16, height: u16, pixels: &[u16]);
}

// ─────────────────────────────────────────────────────────────────────────────
//  Surface pair
// ─────────────────────────────────────────────────────────────────────────────

/// Two menu strip buffers (front/back) plus two full-size frame buffers
/// for carts. Owned by the arbiter for the life of the process.
#[derive(Debug)]
pub struct DisplaySurfacePair {
    width: u16,
    height: u16,
    rows_per_strip: u16,
    strips: [Vec<u16>; 2],
    front: usize,
    frame_buffers: [Vec<u16>; 2],
}

impl DisplaySurfacePair {
    pub fn new(width: u16, height: u16, rows_per_strip: u16) -> Self {
        let rows = rows_per_strip.clamp(1, height.max(1));
        let strip_len = width as usize * rows as usize;
        let frame_len = width as usize * height as usize;
        Self {
            width,
            height,
            rows_per_strip: rows,
            strips: [vec![BACKGROUND; strip_len], vec![BACKGROUND; strip_len]],
            front: 0,
            frame_buffers: [vec![BACKGROUND; frame_len], vec![BACKGROUND; frame_len]],
        }
    }

    pub fn width(&self) -> u16 {
        self.width
    }

    pub fn height(&self) -> u16 {
        self.height
    }

    pub fn rows_per_strip(&self) -> u16 {
        self.rows_per_strip
    }

    /// The strip not currently being flushed.
    pub fn back_strip(&mut self) -> &mut [u16] {
        &mut self.strips[1 - self.front]
    }

    pub fn swap_strips(&mut self) {
        self.front = 1 - self.front;
    }

    pub fn front_strip(&self) -> &[u16] {
        &self.strips[self.front]
    }

    pub fn frame_buffer(&mut self, index: usize) -> Option<&mut [u16]> {
        self.frame_buffers.get_mut(index).map(|b| b.as_mut_slice())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
//  In-memory panel
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug)]
struct PanelState {
    pixels: Vec<u16>,
    flushes: usize,
    initialized: bool,
}

/// Host panel backed by a framebuffer in memory. Clones share state so
/// tests can inspect what the arbiter drew.
#[derive(Debug, Clone)]
pub struct MemoryPanel {
    width: u16,
    height: u16,
    state: Arc<Mutex<PanelState>>,
}

impl MemoryPanel {
    pub fn new(width: u16, height: u16) -> Self {
        Self {
            width,
            height,
            state: Arc::new(Mutex::new(PanelState {
                pixels: vec![0xFFFF; width as usize * height as usize],
                flushes: 0,
                initialized: false,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PanelState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn pixel(&self, x: u16, y: u16) -> u16 {
        self.lock().pixels[y as usize * self.width as usize + x as usize]
    }

    /// Number of `draw_bitmap` calls so far.
    pub fn flushes(&self) -> usize {
        self.lock().flushes
    }

    pub fn is_initialized(&self) -> bool {
        self.lock().initialized
    }

    /// True when every pixel equals `color`.
    pub fn is_filled_with(&self, color: u16) -> bool {
        self.lock().pixels.iter().all(|&p| p == color)
    }
}

impl Panel for MemoryPanel {
    fn init(&mut self) -> Result<(), String> {
        self.lock().initialized = true;
        Ok(())
    }

    fn size(&self) -> (u16, u16) {
        (self.width, self.height)
    }

    fn draw_bitmap(&mut self, x: u16, y: u16, width: u16, height: u16, pixels: &[u16]) {
        let stride = self.width as usize;
        let mut st = self.lock();
        st.flushes += 1;
        for row in 0..height as usize {
            let src = &pixels[row * width as usize..(row + 1) * width as usize];
            let start = (y as usize + row) * stride + x as usize;
            st.pixels[start..start + width as usize].copy_from_slice(src);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rgb565_packing() {
        assert_eq!(make_color(0, 0, 0), 0x0000);
        assert_eq!(make_color(255, 255, 255), 0xFFFF);
        assert_eq!(make_color(255, 0, 0), 0xF800);
        assert_eq!(make_color(0, 255, 0), 0x07E0);
        assert_eq!(make_color(0, 0, 255), 0x001F);
    }

    #[test]
    fn strips_swap() {
        let mut s = DisplaySurfacePair::new(4, 4, 2);
        s.back_strip().fill(7);
        s.swap_strips();
        assert!(s.front_strip().iter().all(|&p| p == 7));
        assert!(s.back_strip().iter().all(|&p| p == BACKGROUND));
        assert_eq!(s.frame_buffer(1).unwrap().len(), 16);
        assert!(s.frame_buffer(2).is_none());
    }

    #[test]
    fn memory_panel_blits() {
        let mut panel = MemoryPanel::new(4, 3);
        panel.draw_bitmap(1, 1, 2, 2, &[1, 2, 3, 4]);
        assert_eq!(panel.pixel(1, 1), 1);
        assert_eq!(panel.pixel(2, 2), 4);
        assert_eq!(panel.pixel(0, 0), 0xFFFF);
        assert_eq!(panel.flushes(), 1);
    }
}
