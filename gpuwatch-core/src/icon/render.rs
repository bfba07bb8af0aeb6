//! Pixel drawing and PNG encoding

use std::io::Cursor;

use image::{ImageFormat, Rgba, RgbaImage};

use super::{IconError, RenderSpec};

/// Default canvas edge in pixels (18 pt at 2x)
pub const DEFAULT_ICON_SIZE: u32 = 36;

const MIN_SIZE: u32 = 16;
const MAX_SIZE: u32 = 256;

const TRANSPARENT: Rgba<u8> = Rgba([0, 0, 0, 0]);
const EMPTY: Rgba<u8> = Rgba([0x4a, 0x55, 0x68, 0xff]);
const BORDER: Rgba<u8> = Rgba([0x71, 0x80, 0x96, 0xff]);
const ERROR_CROSS: Rgba<u8> = Rgba([0xff, 0x33, 0x33, 0xff]);

const DUAL_PADDING: u32 = 3;
const SINGLE_PADDING: u32 = 4;
const CROSS_PADDING: u32 = 6;

/// Outline rectangle of one bar (outer edge, exclusive right/bottom)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BarRect {
    /// Left edge
    pub x: u32,
    /// Top edge
    pub y: u32,
    /// Width including the outline
    pub width: u32,
    /// Height including the outline
    pub height: u32,
}

impl BarRect {
    /// Number of interior rows (inside the 1 px outline)
    #[must_use]
    pub const fn interior_height(&self) -> u32 {
        self.height.saturating_sub(2)
    }

    /// Interior rows painted for `percent` (already clamped)
    #[must_use]
    pub fn filled_rows(&self, percent: f32) -> u32 {
        let ih = self.interior_height();
        let rows = (f64::from(ih) * f64::from(percent) / 100.0).round();
        (rows.max(0.0) as u32).min(ih)
    }
}

/// Renders icons at a fixed size
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IconRenderer {
    size: u32,
}

impl Default for IconRenderer {
    fn default() -> Self {
        Self::new(DEFAULT_ICON_SIZE)
    }
}

impl IconRenderer {
    /// Creates a renderer; `size` is clamped to 16–256 pixels
    #[must_use]
    pub fn new(size: u32) -> Self {
        Self {
            size: size.clamp(MIN_SIZE, MAX_SIZE),
        }
    }

    /// Canvas edge in pixels
    #[must_use]
    pub const fn size(&self) -> u32 {
        self.size
    }

    /// Renders utilization percentages to PNG bytes.
    ///
    /// No values draws the error cross; more than two uses the first two.
    ///
    /// # Errors
    ///
    /// Returns [`IconError::Encode`] if PNG encoding fails.
    pub fn render(&self, percentages: &[f32]) -> Result<Vec<u8>, IconError> {
        self.render_spec(&RenderSpec::from_percentages(percentages))
    }

    /// Renders a prepared spec to PNG bytes
    ///
    /// # Errors
    ///
    /// Returns [`IconError::Encode`] if PNG encoding fails.
    pub fn render_spec(&self, spec: &RenderSpec) -> Result<Vec<u8>, IconError> {
        let image = self.render_image(spec);
        let mut bytes = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .map_err(|e| IconError::Encode(e.to_string()))?;
        Ok(bytes)
    }

    /// Draws a spec into an RGBA buffer
    #[must_use]
    pub fn render_image(&self, spec: &RenderSpec) -> RgbaImage {
        let mut image = RgbaImage::from_pixel(self.size, self.size, TRANSPARENT);

        if spec.is_error() {
            self.draw_cross(&mut image);
            return image;
        }

        for (bar, rect) in spec.bars().iter().zip(self.bar_geometry(spec.bars().len())) {
            let fill = Rgba(bar.band.rgba());
            draw_bar(&mut image, rect, rect.filled_rows(bar.percent), fill);
        }
        image
    }

    /// Outline rectangles for `count` bars (1 or 2; anything else is empty)
    #[must_use]
    pub fn bar_geometry(&self, count: usize) -> Vec<BarRect> {
        let size = self.size;
        match count {
            1 => vec![BarRect {
                x: SINGLE_PADDING,
                y: SINGLE_PADDING,
                width: size - 2 * SINGLE_PADDING,
                height: size - 2 * SINGLE_PADDING,
            }],
            2 => {
                let width = (size - 3 * DUAL_PADDING) / 2;
                let height = size - 2 * DUAL_PADDING;
                vec![
                    BarRect {
                        x: DUAL_PADDING,
                        y: DUAL_PADDING,
                        width,
                        height,
                    },
                    BarRect {
                        x: 2 * DUAL_PADDING + width,
                        y: DUAL_PADDING,
                        width,
                        height,
                    },
                ]
            }
            _ => Vec::new(),
        }
    }

    fn draw_cross(&self, image: &mut RgbaImage) {
        let last = self.size - 1;
        let lo = CROSS_PADDING;
        let hi = last - CROSS_PADDING;
        for y in lo..=hi {
            for x in lo..=hi {
                let on_main = x.abs_diff(y) <= 1;
                let on_anti = (x + y).abs_diff(last) <= 1;
                if on_main || on_anti {
                    image.put_pixel(x, y, ERROR_CROSS);
                }
            }
        }
    }
}

fn draw_bar(image: &mut RgbaImage, rect: BarRect, filled_rows: u32, fill: Rgba<u8>) {
    let right = rect.x + rect.width - 1;
    let bottom = rect.y + rect.height - 1;
    // first interior row (from the top) that is filled
    let fill_from = bottom - filled_rows;

    for y in rect.y..=bottom {
        for x in rect.x..=right {
            let outline = x == rect.x || x == right || y == rect.y || y == bottom;
            let color = if outline {
                BORDER
            } else if y >= fill_from {
                fill
            } else {
                EMPTY
            };
            image.put_pixel(x, y, color);
        }
    }
}
