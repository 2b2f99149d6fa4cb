/*!
 * Slide rendering.
 *
 * A slide is a deterministic function of (title, body, style): a flat
 * background, a title line, the body word-wrapped to the style's width and a
 * small footer. Text is drawn with the built-in 8x8 bitmap font scaled by an
 * integer factor, so no font files are needed and output is pixel-identical
 * across hosts.
 *
 * Body text that does not fit in `max_lines` is cut and the last visible line
 * ends with the truncation marker. Slides summarize the narration; losing the
 * tail of the body here is expected and not reported as an error.
 */

use font8x8::{BASIC_FONTS, LATIN_FONTS, UnicodeFonts};
use image::{Rgb, RgbImage};
use std::path::Path;

use crate::errors::RenderError;
use crate::models::SlideImage;

/// Edge length of one glyph cell before scaling
const GLYPH_SIZE: u32 = 8;

/// Marker appended to truncated text
pub const TRUNCATION_MARKER: &str = "...";

/// Visual configuration of a slide
#[derive(Debug, Clone, PartialEq)]
pub struct SlideStyle {
    /// Image width in pixels
    pub width: u32,
    /// Image height in pixels
    pub height: u32,
    /// Outer margin in pixels
    pub margin: u32,
    /// Integer scale of body glyphs
    pub body_scale: u32,
    /// Integer scale of title glyphs
    pub title_scale: u32,
    /// Extra pixels between body lines
    pub line_spacing: u32,
    /// Upper bound on body characters per line
    pub max_chars_per_line: usize,
    /// Upper bound on body lines
    pub max_lines: usize,
    /// Background color
    pub background: [u8; 3],
    /// Title color
    pub title_color: [u8; 3],
    /// Body color
    pub body_color: [u8; 3],
    /// Footer color
    pub footer_color: [u8; 3],
    /// Footer text, drawn bottom-right
    pub footer: String,
}

impl Default for SlideStyle {
    fn default() -> Self {
        Self::standard()
    }
}

impl SlideStyle {
    /// 640x360 slide used for regular runs
    pub fn standard() -> Self {
        Self {
            width: 640,
            height: 360,
            margin: 32,
            body_scale: 2,
            title_scale: 3,
            line_spacing: 6,
            max_chars_per_line: 36,
            max_lines: 10,
            background: [248, 249, 251],
            title_color: [20, 20, 20],
            body_color: [30, 30, 30],
            footer_color: [90, 90, 90],
            footer: "Generated by slidecast".to_string(),
        }
    }

    /// 480x270 slide with less text, same 16:9 aspect ratio as `standard`
    pub fn fast() -> Self {
        Self {
            width: 480,
            height: 270,
            margin: 24,
            body_scale: 2,
            title_scale: 2,
            line_spacing: 4,
            max_chars_per_line: 27,
            max_lines: 8,
            ..Self::standard()
        }
    }

    /// Pick the style for the given mode
    pub fn for_mode(fast: bool) -> Self {
        if fast { Self::fast() } else { Self::standard() }
    }

    fn body_glyph(&self) -> u32 {
        GLYPH_SIZE * self.body_scale
    }

    fn title_glyph(&self) -> u32 {
        GLYPH_SIZE * self.title_scale
    }

    fn footer_glyph(&self) -> u32 {
        GLYPH_SIZE
    }

    fn inner_width(&self) -> u32 {
        self.width.saturating_sub(2 * self.margin)
    }

    fn body_top(&self) -> u32 {
        self.margin + self.title_glyph() + self.title_glyph() / 2
    }

    fn body_bottom(&self) -> u32 {
        self.height
            .saturating_sub(self.margin)
            .saturating_sub(self.footer_glyph())
            .saturating_sub(self.line_spacing)
    }

    /// Body characters per line after applying the geometric limit
    pub fn effective_chars_per_line(&self) -> usize {
        let geometric = (self.inner_width() / self.body_glyph().max(1)) as usize;
        self.max_chars_per_line.min(geometric)
    }

    /// Title characters that fit on one line
    pub fn title_chars(&self) -> usize {
        (self.inner_width() / self.title_glyph().max(1)) as usize
    }

    /// Body lines after applying the geometric limit
    pub fn effective_max_lines(&self) -> usize {
        let line_height = self.body_glyph() + self.line_spacing;
        let available = self.body_bottom().saturating_sub(self.body_top());
        let geometric = if line_height == 0 {
            0
        } else {
            // The last line needs no trailing spacing
            ((available + self.line_spacing) / line_height) as usize
        };
        self.max_lines.min(geometric)
    }

    /// Width over height
    pub fn aspect_ratio(&self) -> f64 {
        self.width as f64 / self.height.max(1) as f64
    }

    fn validate(&self) -> Result<(), RenderError> {
        if self.width % 2 != 0 || self.height % 2 != 0 {
            return Err(RenderError::InvalidStyle(format!(
                "dimensions must be even for yuv420p output, got {}x{}",
                self.width, self.height
            )));
        }
        if self.body_scale == 0 || self.title_scale == 0 {
            return Err(RenderError::InvalidStyle("glyph scales must be at least 1".to_string()));
        }
        if self.effective_chars_per_line() <= TRUNCATION_MARKER.len() {
            return Err(RenderError::InvalidStyle(format!(
                "slide too narrow: {} characters per line",
                self.effective_chars_per_line()
            )));
        }
        if self.effective_max_lines() == 0 {
            return Err(RenderError::InvalidStyle("slide too short for any body line".to_string()));
        }
        Ok(())
    }
}

/// Word-wrap `text` to lines of at most `width` characters.
///
/// Words longer than a line are split across lines.
pub fn wrap_text(text: &str, width: usize) -> Vec<String> {
    let width = width.max(1);
    let mut lines = Vec::new();
    let mut current = String::new();
    let mut current_len = 0usize;

    for word in text.split_whitespace() {
        let mut word: Vec<char> = word.chars().collect();

        while word.len() > width {
            if current_len > 0 {
                lines.push(std::mem::take(&mut current));
                current_len = 0;
            }
            let rest = word.split_off(width);
            lines.push(word.into_iter().collect());
            word = rest;
        }

        let needed = if current_len == 0 { word.len() } else { current_len + 1 + word.len() };
        if needed > width && current_len > 0 {
            lines.push(std::mem::take(&mut current));
            current_len = 0;
        }
        if current_len > 0 {
            current.push(' ');
            current_len += 1;
        }
        current.extend(word.iter());
        current_len += word.len();
    }

    if current_len > 0 {
        lines.push(current);
    }
    lines
}

/// Cut `line` so that it plus the truncation marker fits in `width` characters
pub fn with_marker(line: &str, width: usize) -> String {
    let keep = width.saturating_sub(TRUNCATION_MARKER.len());
    let kept: String = line.chars().take(keep).collect();
    format!("{}{}", kept.trim_end(), TRUNCATION_MARKER)
}

/// Wrap and truncate body text to the slide's capacity
pub fn layout_body(body: &str, chars_per_line: usize, max_lines: usize) -> Vec<String> {
    let mut lines = wrap_text(body, chars_per_line);
    if lines.len() > max_lines {
        lines.truncate(max_lines);
        if let Some(last) = lines.last_mut() {
            *last = with_marker(last, chars_per_line);
        }
    }
    lines
}

fn glyph_for(c: char) -> [u8; 8] {
    BASIC_FONTS
        .get(c)
        .or_else(|| LATIN_FONTS.get(c))
        .or_else(|| BASIC_FONTS.get('?'))
        .unwrap_or([0; 8])
}

fn draw_text(image: &mut RgbImage, text: &str, x: u32, y: u32, scale: u32, color: [u8; 3]) {
    let cell = GLYPH_SIZE * scale;
    for (index, c) in text.chars().enumerate() {
        let glyph = glyph_for(c);
        let origin_x = x + index as u32 * cell;
        for (row, bits) in glyph.iter().enumerate() {
            for col in 0..GLYPH_SIZE {
                if bits & (1 << col) == 0 {
                    continue;
                }
                let px = origin_x + col * scale;
                let py = y + row as u32 * scale;
                for dy in 0..scale {
                    for dx in 0..scale {
                        let (tx, ty) = (px + dx, py + dy);
                        if tx < image.width() && ty < image.height() {
                            image.put_pixel(tx, ty, Rgb(color));
                        }
                    }
                }
            }
        }
    }
}

// @struct: Renders segment text into slide images
#[derive(Debug, Clone)]
pub struct SlideRenderer {
    style: SlideStyle,
}

impl SlideRenderer {
    pub fn new(style: SlideStyle) -> Self {
        Self { style }
    }

    pub fn style(&self) -> &SlideStyle {
        &self.style
    }

    /// Render one slide
    pub fn render(&self, title: &str, body: &str, order: u32) -> Result<SlideImage, RenderError> {
        let style = &self.style;
        style.validate()?;

        let mut pixels = RgbImage::from_pixel(style.width, style.height, Rgb(style.background));

        let title = title.trim();
        let title_line = if title.chars().count() > style.title_chars() {
            with_marker(title, style.title_chars())
        } else {
            title.to_string()
        };
        draw_text(&mut pixels, &title_line, style.margin, style.margin, style.title_scale, style.title_color);

        let chars_per_line = style.effective_chars_per_line();
        let lines = layout_body(body.trim(), chars_per_line, style.effective_max_lines());
        let line_height = style.body_glyph() + style.line_spacing;
        for (i, line) in lines.iter().enumerate() {
            let y = style.body_top() + i as u32 * line_height;
            draw_text(&mut pixels, line, style.margin, y, style.body_scale, style.body_color);
        }

        let footer_width = style.footer.chars().count() as u32 * style.footer_glyph();
        let footer_x = style.width.saturating_sub(style.margin).saturating_sub(footer_width);
        let footer_y = style.height.saturating_sub(style.margin).saturating_sub(style.footer_glyph());
        draw_text(&mut pixels, &style.footer, footer_x, footer_y, 1, style.footer_color);

        Ok(SlideImage {
            width: style.width,
            height: style.height,
            pixels,
            order,
        })
    }
}

impl SlideImage {
    /// Write the slide as PNG
    pub fn save_png(&self, path: &Path) -> Result<(), RenderError> {
        self.pixels
            .save_with_format(path, image::ImageFormat::Png)
            .map_err(|e| RenderError::Write {
                path: path.to_path_buf(),
                message: e.to_string(),
            })
    }
}
