//! Frame buffer: row-major `u32` pixels with a fixed row pitch.

use crate::alloc::{AddressWindow, PageSource, Region};
use crate::error::AllocError;

/// One allocation of `x_row * y_res` pixels.
///
/// Rows are `x_row` pixels apart; only the first `x_res` of each row are
/// part of the picture.
pub struct FrameBuffer<R: Region> {
    x_res: usize,
    y_res: usize,
    x_row: usize,
    pixels: R,
}

impl<R: Region> FrameBuffer<R> {
    /// Allocate a frame from `window`. `x_row` must be at least `x_res`.
    pub fn alloc<S>(
        window: &AddressWindow<S>,
        x_res: usize,
        y_res: usize,
        x_row: usize,
    ) -> Result<Self, AllocError>
    where
        S: PageSource<Region = R>,
    {
        debug_assert!(x_row >= x_res);
        let pixels = window.alloc(x_row * y_res * 4)?;
        Ok(Self {
            x_res,
            y_res,
            x_row,
            pixels,
        })
    }

    /// Visible width in pixels.
    pub fn x_res(&self) -> usize {
        self.x_res
    }

    /// Height in rows.
    pub fn y_res(&self) -> usize {
        self.y_res
    }

    /// Row pitch in pixels.
    pub fn x_row(&self) -> usize {
        self.x_row
    }

    /// Address of the first pixel.
    pub fn addr(&self) -> u64 {
        self.pixels.addr()
    }

    /// Bytes backing the frame, row padding included.
    pub fn byte_len(&self) -> usize {
        self.x_row * self.y_res * 4
    }

    /// Pixel at `(x, y)`.
    pub fn pixel(&self, x: usize, y: usize) -> u32 {
        let at = (y * self.x_row + x) * 4;
        let b = &self.pixels[at..at + 4];
        u32::from_le_bytes([b[0], b[1], b[2], b[3]])
    }

    /// Set the pixel at `(x, y)`.
    pub fn set_pixel(&mut self, x: usize, y: usize, value: u32) {
        let at = (y * self.x_row + x) * 4;
        self.pixels[at..at + 4].copy_from_slice(&value.to_le_bytes());
    }

    /// Overwrite the start of row `y` with `pixels`.
    pub fn write_row(&mut self, y: usize, pixels: &[u32]) {
        let start = y * self.x_row * 4;
        let row = &mut self.pixels[start..start + self.x_row * 4];
        for (dst, px) in row.chunks_exact_mut(4).zip(pixels) {
            dst.copy_from_slice(&px.to_le_bytes());
        }
    }

    /// Visible pixels of row `y`.
    pub fn row(&self, y: usize) -> impl Iterator<Item = u32> + '_ {
        let start = y * self.x_row * 4;
        self.pixels[start..start + self.x_res * 4]
            .chunks_exact(4)
            .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Rows `[y0, y1)` of worker `index` when the frame is split in `parts` bands.
    pub fn band(&self, index: usize, parts: usize) -> std::ops::Range<usize> {
        let parts = parts.max(1);
        let y0 = self.y_res * index / parts;
        let y1 = self.y_res * (index + 1) / parts;
        y0..y1
    }

    /// Repack the visible area into `out`, `x_res` pixels per row.
    pub fn present_into(&self, out: &mut [u32]) {
        for (y, dst) in out.chunks_exact_mut(self.x_res).take(self.y_res).enumerate() {
            for (d, px) in dst.iter_mut().zip(self.row(y)) {
                *d = px;
            }
        }
    }

    /// Visible area with the row pitch removed.
    pub fn packed(&self) -> Vec<u32> {
        let mut out = vec![0; self.x_res * self.y_res];
        self.present_into(&mut out);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alloc::AddressMode;

    #[test]
    fn present_drops_row_padding() {
        let window = AddressWindow::anonymous(AddressMode::Wide);
        let mut frame = FrameBuffer::alloc(&window, 3, 2, 5).unwrap();
        frame.write_row(0, &[1, 2, 3, 0xDEAD, 0xBEEF]);
        frame.write_row(1, &[4, 5, 6, 0xDEAD, 0xBEEF]);
        frame.set_pixel(2, 1, 9);
        assert_eq!(frame.packed(), [1, 2, 3, 4, 5, 9]);
        assert_eq!(frame.pixel(3, 0), 0xDEAD);
    }

    #[test]
    fn bands_cover_every_row_once() {
        let window = AddressWindow::anonymous(AddressMode::Wide);
        let frame = FrameBuffer::alloc(&window, 4, 10, 4).unwrap();
        let rows: Vec<usize> = (0..3).flat_map(|i| frame.band(i, 3)).collect();
        assert_eq!(rows, (0..10).collect::<Vec<_>>());
    }
}
