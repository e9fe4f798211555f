use crate::canvas::TextMeasurer;
use crate::style::{Font, HorzAlign, VertAlign};
use crate::types::{Color, Padding, Pt, Rect};
use image::GenericImageView;
use sha2::{Digest, Sha256};
use std::sync::Arc;

/// Text with optional `[expression]` placeholders.
#[derive(Debug, Clone, PartialEq)]
pub struct TextObject {
    pub text: String,
    pub font: Font,
    pub horz_align: HorzAlign,
    pub vert_align: VertAlign,
    pub word_wrap: bool,
    pub allow_expressions: bool,
    /// Opening and closing expression delimiters separated by a comma.
    pub brackets: String,
    pub padding: Padding,
    pub text_color: Color,
    pub hide_zeros: bool,
    // Evaluated text for the band instance being printed.
    pub(crate) display: Option<String>,
    // Overflow handed over by a breaking sibling; replaces evaluation once.
    pub(crate) break_text: Option<String>,
}

impl Default for TextObject {
    fn default() -> Self {
        Self {
            text: String::new(),
            font: Font::default(),
            horz_align: HorzAlign::Left,
            vert_align: VertAlign::Top,
            word_wrap: true,
            allow_expressions: true,
            brackets: "[,]".to_string(),
            padding: Padding {
                left: Pt::from_i32(2),
                top: Pt::ZERO,
                right: Pt::from_i32(2),
                bottom: Pt::ZERO,
            },
            text_color: Color::BLACK,
            hide_zeros: false,
            display: None,
            break_text: None,
        }
    }
}

impl TextObject {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    pub fn display_text(&self) -> &str {
        self.display.as_deref().unwrap_or(&self.text)
    }

    pub fn bracket_pair(&self) -> (&str, &str) {
        match self.brackets.split_once(',') {
            Some((open, close)) if !open.is_empty() && !close.is_empty() => (open, close),
            _ => ("[", "]"),
        }
    }

    /// Greedy word wrap of the displayed text into lines no wider than the
    /// inner width. Words wider than a line are split by character.
    pub fn wrap_lines(&self, measurer: &dyn TextMeasurer, width: Pt) -> Vec<String> {
        let text = self.display_text();
        if text.is_empty() {
            return Vec::new();
        }
        let avail = width - self.padding.horizontal();
        let mut lines = Vec::new();
        for paragraph in text.split('\n') {
            let paragraph = paragraph.trim_end_matches('\r');
            if !self.word_wrap {
                lines.push(paragraph.to_string());
                continue;
            }
            let mut current = String::new();
            for word in paragraph.split(' ') {
                let candidate = if current.is_empty() {
                    word.to_string()
                } else {
                    format!("{current} {word}")
                };
                if measurer.text_width(&candidate, &self.font) <= avail {
                    current = candidate;
                    continue;
                }
                if !current.is_empty() {
                    lines.push(std::mem::take(&mut current));
                }
                for ch in word.chars() {
                    current.push(ch);
                    if current.chars().count() > 1
                        && measurer.text_width(&current, &self.font) > avail
                    {
                        current.pop();
                        lines.push(std::mem::take(&mut current));
                        current.push(ch);
                    }
                }
            }
            lines.push(current);
        }
        lines
    }

    pub fn calc_height(&self, measurer: &dyn TextMeasurer, width: Pt) -> Pt {
        let lines = self.wrap_lines(measurer, width).len() as i32;
        measurer.line_height(&self.font) * lines + self.padding.vertical()
    }

    /// Lines that fit into `height` and the lines that do not.
    pub fn split_for_height(
        &self,
        measurer: &dyn TextMeasurer,
        width: Pt,
        height: Pt,
    ) -> (Vec<String>, Vec<String>) {
        let mut lines = self.wrap_lines(measurer, width);
        let line_height = measurer.line_height(&self.font);
        let mut fit = 0usize;
        let mut used = self.padding.vertical();
        while fit < lines.len() && used + line_height <= height {
            used += line_height;
            fit += 1;
        }
        let rest = lines.split_off(fit);
        (lines, rest)
    }

    /// Keeps the lines that fit in `height` and hands the rest to `target`.
    /// Returns whether the source still has text to print.
    pub fn break_into(
        &mut self,
        target: &mut TextObject,
        measurer: &dyn TextMeasurer,
        width: Pt,
        height: Pt,
    ) -> bool {
        let (keep, rest) = self.split_for_height(measurer, width, height);
        target.break_text = Some(rest.join("\n"));
        self.display = Some(keep.join("\n"));
        !keep.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SizeMode {
    #[default]
    Normal,
    CenterImage,
    StretchImage,
    Zoom,
    AutoSize,
}

impl SizeMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SizeMode::Normal => "Normal",
            SizeMode::CenterImage => "CenterImage",
            SizeMode::StretchImage => "StretchImage",
            SizeMode::Zoom => "Zoom",
            SizeMode::AutoSize => "AutoSize",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "Normal" => Some(SizeMode::Normal),
            "CenterImage" => Some(SizeMode::CenterImage),
            "StretchImage" => Some(SizeMode::StretchImage),
            "Zoom" => Some(SizeMode::Zoom),
            "AutoSize" => Some(SizeMode::AutoSize),
            _ => None,
        }
    }

    /// Where an image of `image_width` x `image_height` points lands inside
    /// `bounds`.
    pub fn place(self, bounds: Rect, image_width: Pt, image_height: Pt) -> Rect {
        let centered = |w: Pt, h: Pt| Rect {
            x: bounds.x + (bounds.width - w) / 2,
            y: bounds.y + (bounds.height - h) / 2,
            width: w,
            height: h,
        };
        match self {
            SizeMode::Normal => Rect {
                width: image_width,
                height: image_height,
                ..bounds
            },
            SizeMode::CenterImage => centered(image_width, image_height),
            SizeMode::StretchImage | SizeMode::AutoSize => bounds,
            SizeMode::Zoom => {
                if image_width.is_zero() || image_height.is_zero() {
                    return bounds;
                }
                let sx = bounds.width.to_f32() / image_width.to_f32();
                let sy = bounds.height.to_f32() / image_height.to_f32();
                let scale = sx.min(sy);
                centered(image_width * scale, image_height * scale)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoadedImage {
    /// Hex SHA-256 of the encoded bytes; identical images share one resource.
    pub resource_id: String,
    pub width_px: u32,
    pub height_px: u32,
    pub bytes: Arc<[u8]>,
}

impl LoadedImage {
    // 96 dpi pixels to points.
    pub fn width(&self) -> Pt {
        Pt::from_f32(self.width_px as f32 * 0.75)
    }

    pub fn height(&self) -> Pt {
        Pt::from_f32(self.height_px as f32 * 0.75)
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub enum ImageState {
    #[default]
    Empty,
    Loaded(LoadedImage),
    Error(String),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct PictureObject {
    pub image_location: String,
    pub data_column: String,
    /// Image embedded in the report definition.
    pub image_data: Option<Arc<[u8]>>,
    pub size_mode: SizeMode,
    pub(crate) image: ImageState,
}

impl PictureObject {
    pub fn image(&self) -> &ImageState {
        &self.image
    }

    /// Decodes `bytes` far enough to learn the pixel size. Undecodable data
    /// leaves the picture in the error state.
    pub fn decode(bytes: Arc<[u8]>) -> ImageState {
        match image::load_from_memory(&bytes) {
            Ok(decoded) => {
                let (width_px, height_px) = decoded.dimensions();
                ImageState::Loaded(LoadedImage {
                    resource_id: sha256_hex(&bytes),
                    width_px,
                    height_px,
                    bytes,
                })
            }
            Err(err) => ImageState::Error(err.to_string()),
        }
    }

    pub fn calc_height(&self, current: Pt) -> Pt {
        match (&self.image, self.size_mode) {
            (ImageState::Loaded(image), SizeMode::AutoSize) => image.height(),
            _ => current,
        }
    }
}

pub(crate) fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    let mut out = String::with_capacity(digest.len() * 2);
    for b in digest {
        use std::fmt::Write;
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ShapeKind {
    #[default]
    Rectangle,
    RoundRectangle,
    Ellipse,
    Triangle,
    Diamond,
}

impl ShapeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ShapeKind::Rectangle => "Rectangle",
            ShapeKind::RoundRectangle => "RoundRectangle",
            ShapeKind::Ellipse => "Ellipse",
            ShapeKind::Triangle => "Triangle",
            ShapeKind::Diamond => "Diamond",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "Rectangle" => Some(ShapeKind::Rectangle),
            "RoundRectangle" => Some(ShapeKind::RoundRectangle),
            "Ellipse" => Some(ShapeKind::Ellipse),
            "Triangle" => Some(ShapeKind::Triangle),
            "Diamond" => Some(ShapeKind::Diamond),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ShapeObject {
    pub shape: ShapeKind,
    /// Corner radius for round rectangles, in points.
    pub curve: f32,
}

impl ShapeObject {
    pub fn new(shape: ShapeKind) -> Self {
        Self { shape, curve: 0.0 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct LineObject {
    pub diagonal: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ContainerObject;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TableColumn {
    pub width: Pt,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TableRow {
    pub height: Pt,
    pub auto_size: bool,
}

/// Grid of text cells. Cells are the table's text children in row-major
/// order; surplus children beyond `rows x columns` are not laid out.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TableObject {
    pub columns: Vec<TableColumn>,
    pub rows: Vec<TableRow>,
}

impl TableObject {
    pub fn new(column_widths: &[f32], row_heights: &[f32]) -> Self {
        Self {
            columns: column_widths
                .iter()
                .map(|w| TableColumn {
                    width: Pt::from_f32(*w),
                })
                .collect(),
            rows: row_heights
                .iter()
                .map(|h| TableRow {
                    height: Pt::from_f32(*h),
                    auto_size: false,
                })
                .collect(),
        }
    }

    pub fn cell_count(&self) -> usize {
        self.columns.len() * self.rows.len()
    }

    pub fn cell_position(&self, index: usize) -> Option<(usize, usize)> {
        if self.columns.is_empty() || index >= self.cell_count() {
            return None;
        }
        Some((index / self.columns.len(), index % self.columns.len()))
    }

    pub fn width(&self) -> Pt {
        self.columns.iter().map(|c| c.width).sum()
    }

    pub fn height(&self) -> Pt {
        self.rows.iter().map(|r| r.height).sum()
    }

    /// Cell rectangle relative to the table.
    pub fn cell_rect(&self, row: usize, column: usize) -> Option<Rect> {
        let width = self.columns.get(column)?.width;
        let height = self.rows.get(row)?.height;
        Some(Rect {
            x: self.columns[..column].iter().map(|c| c.width).sum(),
            y: self.rows[..row].iter().map(|r| r.height).sum(),
            width,
            height,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canvas::ApproxTextMeasurer;

    // 5pt per character, 12pt lines with the default font.
    fn text(value: &str) -> TextObject {
        TextObject {
            padding: Padding::default(),
            ..TextObject::new(value)
        }
    }

    #[test]
    fn wrap_respects_width_and_paragraphs() {
        let t = text("aaa bbb ccc\nd");
        let lines = t.wrap_lines(&ApproxTextMeasurer, Pt::from_i32(40));
        assert_eq!(lines, vec!["aaa bbb", "ccc", "d"]);
        assert_eq!(t.calc_height(&ApproxTextMeasurer, Pt::from_i32(40)), Pt::from_i32(36));
    }

    #[test]
    fn long_words_are_split_by_character() {
        let t = text("abcdefgh");
        let lines = t.wrap_lines(&ApproxTextMeasurer, Pt::from_i32(20));
        assert_eq!(lines, vec!["abcd", "efgh"]);
    }

    #[test]
    fn empty_text_has_padding_height_only() {
        let t = TextObject::new("");
        assert_eq!(t.calc_height(&ApproxTextMeasurer, Pt::from_i32(100)), Pt::ZERO);
    }

    #[test]
    fn break_moves_overflow_lines_to_target() {
        let mut source = text("one two three four");
        let mut target = text("");
        let kept = source.break_into(
            &mut target,
            &ApproxTextMeasurer,
            Pt::from_i32(40),
            Pt::from_i32(25),
        );
        assert!(kept);
        assert_eq!(source.display_text(), "one two\nthree");
        assert_eq!(target.break_text.as_deref(), Some("four"));
    }

    #[test]
    fn zoom_keeps_aspect_ratio_centered() {
        let bounds = Rect::new(0.0, 0.0, 100.0, 50.0);
        let placed = SizeMode::Zoom.place(bounds, Pt::from_i32(20), Pt::from_i32(20));
        assert_eq!(placed.width, Pt::from_i32(50));
        assert_eq!(placed.x, Pt::from_i32(25));
        assert_eq!(placed.y, Pt::ZERO);
    }

    #[test]
    fn undecodable_bytes_produce_error_state() {
        let state = PictureObject::decode(Arc::from(&b"not an image"[..]));
        assert!(matches!(state, ImageState::Error(_)));
    }

    #[test]
    fn table_cells_are_row_major() {
        let table = TableObject::new(&[10.0, 20.0], &[5.0, 6.0]);
        assert_eq!(table.cell_position(3), Some((1, 1)));
        assert_eq!(table.cell_position(4), None);
        let rect = table.cell_rect(1, 1).expect("cell");
        assert_eq!(rect, Rect::new(10.0, 5.0, 20.0, 6.0));
    }
}
