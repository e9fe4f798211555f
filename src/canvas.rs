use crate::style::Font;
use crate::types::{Color, Pt, Rect, Size};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    SaveState,
    RestoreState,
    Translate(Pt, Pt),
    Scale(f32, f32),
    Rotate(f32),
    // Non-rendered metadata (object names, band boundaries) for export consumers.
    Meta {
        key: String,
        value: String,
    },
    SetFillColor(Color),
    SetStrokeColor(Color),
    SetLineWidth(Pt),
    SetDash {
        pattern: Vec<Pt>,
        phase: Pt,
    },
    SetFontName(String),
    SetFontSize(Pt),
    ClipRect {
        x: Pt,
        y: Pt,
        width: Pt,
        height: Pt,
    },
    MoveTo {
        x: Pt,
        y: Pt,
    },
    LineTo {
        x: Pt,
        y: Pt,
    },
    CurveTo {
        x1: Pt,
        y1: Pt,
        x2: Pt,
        y2: Pt,
        x: Pt,
        y: Pt,
    },
    ClosePath,
    Fill,
    Stroke,
    DrawString {
        x: Pt,
        y: Pt,
        text: String,
    },
    DrawRect {
        x: Pt,
        y: Pt,
        width: Pt,
        height: Pt,
    },
    DrawImage {
        x: Pt,
        y: Pt,
        width: Pt,
        height: Pt,
        resource_id: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    pub size: Size,
    pub commands: Vec<Command>,
}

impl Page {
    fn new(size: Size) -> Self {
        Self {
            size,
            commands: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub pages: Vec<Page>,
}

/// Width/height oracle for text. Layout only ever needs advance widths and a
/// line pitch, so glyph-accurate shaping stays outside the engine.
pub trait TextMeasurer: Send + Sync {
    fn text_width(&self, text: &str, font: &Font) -> Pt;

    fn line_height(&self, font: &Font) -> Pt {
        font.size.mul_ratio(6, 5)
    }
}

/// Average-advance metrics: half an em per character, a little wider when bold.
#[derive(Debug, Clone, Copy, Default)]
pub struct ApproxTextMeasurer;

impl TextMeasurer for ApproxTextMeasurer {
    fn text_width(&self, text: &str, font: &Font) -> Pt {
        let chars = text.chars().count() as i32;
        let per_char = if font.bold {
            font.size.mul_ratio(11, 20)
        } else {
            font.size.mul_ratio(1, 2)
        };
        per_char * chars
    }
}

#[derive(Debug, Clone)]
struct GraphicsState {
    fill_color: Color,
    stroke_color: Color,
    line_width: Pt,
    font_size: Pt,
    font_name: String,
}

impl Default for GraphicsState {
    fn default() -> Self {
        Self {
            fill_color: Color::BLACK,
            stroke_color: Color::BLACK,
            line_width: Pt::from_f32(1.0),
            font_size: Pt::from_f32(10.0),
            font_name: "Arial".to_string(),
        }
    }
}

pub struct Canvas {
    page_size: Size,
    pages: Vec<Page>,
    current: Page,
    state_stack: Vec<GraphicsState>,
    current_state: GraphicsState,
    measurer: Arc<dyn TextMeasurer>,
}

impl Canvas {
    pub fn new(page_size: Size) -> Self {
        Self::with_measurer(page_size, Arc::new(ApproxTextMeasurer))
    }

    pub fn with_measurer(page_size: Size, measurer: Arc<dyn TextMeasurer>) -> Self {
        Self {
            page_size,
            pages: Vec::new(),
            current: Page::new(page_size),
            state_stack: Vec::new(),
            current_state: GraphicsState::default(),
            measurer,
        }
    }

    pub fn page_size(&self) -> Size {
        self.page_size
    }

    // Applies to the page currently being recorded and every page after it.
    pub fn set_page_size(&mut self, size: Size) {
        self.page_size = size;
        self.current.size = size;
    }

    pub fn measure_text(&self, text: &str, font: &Font) -> Size {
        Size {
            width: self.measurer.text_width(text, font),
            height: self.measurer.line_height(font),
        }
    }

    pub fn measurer(&self) -> &dyn TextMeasurer {
        self.measurer.as_ref()
    }

    pub fn save_state(&mut self) {
        self.state_stack.push(self.current_state.clone());
        self.current.commands.push(Command::SaveState);
    }

    pub fn restore_state(&mut self) {
        if let Some(state) = self.state_stack.pop() {
            self.current_state = state;
            self.current.commands.push(Command::RestoreState);
        }
    }

    pub fn translate(&mut self, x: Pt, y: Pt) {
        self.current.commands.push(Command::Translate(x, y));
    }

    pub fn scale(&mut self, x: f32, y: f32) {
        self.current.commands.push(Command::Scale(x, y));
    }

    pub fn rotate(&mut self, angle_radians: f32) {
        self.current.commands.push(Command::Rotate(angle_radians));
    }

    pub fn meta(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.current.commands.push(Command::Meta {
            key: key.into(),
            value: value.into(),
        });
    }

    pub fn set_fill_color(&mut self, color: Color) {
        if self.current_state.fill_color == color {
            return;
        }
        self.current_state.fill_color = color;
        self.current.commands.push(Command::SetFillColor(color));
    }

    pub fn set_stroke_color(&mut self, color: Color) {
        if self.current_state.stroke_color == color {
            return;
        }
        self.current_state.stroke_color = color;
        self.current.commands.push(Command::SetStrokeColor(color));
    }

    pub fn set_line_width(&mut self, width: Pt) {
        let width = width.max(Pt::ZERO);
        if self.current_state.line_width == width {
            return;
        }
        self.current_state.line_width = width;
        self.current.commands.push(Command::SetLineWidth(width));
    }

    pub fn set_dash(&mut self, pattern: Vec<Pt>, phase: Pt) {
        self.current
            .commands
            .push(Command::SetDash { pattern, phase });
    }

    pub fn set_font(&mut self, font: &Font) {
        if self.current_state.font_name != font.name {
            self.current_state.font_name = font.name.clone();
            self.current
                .commands
                .push(Command::SetFontName(font.name.clone()));
        }
        if self.current_state.font_size != font.size {
            self.current_state.font_size = font.size;
            self.current.commands.push(Command::SetFontSize(font.size));
        }
    }

    pub fn clip_rect(&mut self, rect: Rect) {
        self.current.commands.push(Command::ClipRect {
            x: rect.x,
            y: rect.y,
            width: rect.width,
            height: rect.height,
        });
    }

    pub fn move_to(&mut self, x: Pt, y: Pt) {
        self.current.commands.push(Command::MoveTo { x, y });
    }

    pub fn line_to(&mut self, x: Pt, y: Pt) {
        self.current.commands.push(Command::LineTo { x, y });
    }

    pub fn curve_to(&mut self, x1: Pt, y1: Pt, x2: Pt, y2: Pt, x: Pt, y: Pt) {
        self.current.commands.push(Command::CurveTo {
            x1,
            y1,
            x2,
            y2,
            x,
            y,
        });
    }

    pub fn close_path(&mut self) {
        self.current.commands.push(Command::ClosePath);
    }

    pub fn fill(&mut self) {
        self.current.commands.push(Command::Fill);
    }

    pub fn stroke(&mut self) {
        self.current.commands.push(Command::Stroke);
    }

    pub fn draw_line(&mut self, x1: Pt, y1: Pt, x2: Pt, y2: Pt) {
        self.move_to(x1, y1);
        self.line_to(x2, y2);
        self.stroke();
    }

    pub fn draw_rect(&mut self, x: Pt, y: Pt, width: Pt, height: Pt) {
        self.current.commands.push(Command::DrawRect {
            x,
            y,
            width,
            height,
        });
    }

    // Four cubic segments with the usual 0.5523 control distance.
    pub fn draw_ellipse(&mut self, rect: Rect) {
        let rx = rect.width / 2;
        let ry = rect.height / 2;
        let cx = rect.x + rx;
        let cy = rect.y + ry;
        let kx = rx * 0.552_284_8;
        let ky = ry * 0.552_284_8;
        self.move_to(cx + rx, cy);
        self.curve_to(cx + rx, cy + ky, cx + kx, cy + ry, cx, cy + ry);
        self.curve_to(cx - kx, cy + ry, cx - rx, cy + ky, cx - rx, cy);
        self.curve_to(cx - rx, cy - ky, cx - kx, cy - ry, cx, cy - ry);
        self.curve_to(cx + kx, cy - ry, cx + rx, cy - ky, cx + rx, cy);
        self.close_path();
    }

    pub fn draw_polygon(&mut self, points: &[(Pt, Pt)]) {
        let Some(((x0, y0), rest)) = points.split_first() else {
            return;
        };
        self.move_to(*x0, *y0);
        for (x, y) in rest {
            self.line_to(*x, *y);
        }
        self.close_path();
    }

    pub fn draw_string(&mut self, x: Pt, y: Pt, text: impl Into<String>) {
        self.current.commands.push(Command::DrawString {
            x,
            y,
            text: text.into(),
        });
    }

    pub fn draw_image(&mut self, rect: Rect, resource_id: impl Into<String>) {
        self.current.commands.push(Command::DrawImage {
            x: rect.x,
            y: rect.y,
            width: rect.width,
            height: rect.height,
            resource_id: resource_id.into(),
        });
    }

    pub fn show_page(&mut self) {
        let current = std::mem::replace(&mut self.current, Page::new(self.page_size));
        self.pages.push(current);
        self.state_stack.clear();
        self.current_state = GraphicsState::default();
    }

    pub fn current_command_count(&self) -> usize {
        self.current.commands.len()
    }

    pub fn is_current_empty(&self) -> bool {
        self.current.commands.is_empty()
    }

    pub fn finish(mut self) -> Document {
        if !self.current.commands.is_empty() || self.pages.is_empty() {
            self.show_page();
        }
        Document { pages: self.pages }
    }

    pub fn finish_without_show(self) -> Document {
        Document { pages: self.pages }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redundant_state_changes_are_not_recorded() {
        let mut canvas = Canvas::new(Size::from_mm(100.0, 100.0));
        canvas.set_fill_color(Color::BLACK);
        canvas.set_line_width(Pt::from_f32(1.0));
        assert!(canvas.is_current_empty());
        canvas.set_fill_color(Color::WHITE);
        assert_eq!(canvas.current_command_count(), 1);
    }

    #[test]
    fn restore_state_resets_tracked_colors() {
        let mut canvas = Canvas::new(Size::from_mm(100.0, 100.0));
        canvas.save_state();
        canvas.set_fill_color(Color::WHITE);
        canvas.restore_state();
        canvas.set_fill_color(Color::WHITE);
        let doc = canvas.finish();
        let fills = doc.pages[0]
            .commands
            .iter()
            .filter(|c| matches!(c, Command::SetFillColor(_)))
            .count();
        assert_eq!(fills, 2);
    }

    #[test]
    fn approx_measurer_scales_with_font_size() {
        let measurer = ApproxTextMeasurer;
        let font = Font::default();
        assert_eq!(measurer.text_width("abcd", &font), Pt::from_i32(20));
        assert_eq!(measurer.line_height(&font), Pt::from_i32(12));
    }

    #[test]
    fn transforms_are_scoped_by_saved_state() {
        let mut canvas = Canvas::new(Size::from_mm(100.0, 100.0));
        canvas.save_state();
        canvas.translate(Pt::from_i32(10), Pt::from_i32(20));
        canvas.rotate(std::f32::consts::FRAC_PI_2);
        canvas.scale(2.0, 2.0);
        canvas.draw_line(Pt::ZERO, Pt::ZERO, Pt::from_i32(5), Pt::ZERO);
        canvas.restore_state();
        let doc = canvas.finish();
        let commands = &doc.pages[0].commands;
        assert_eq!(commands[0], Command::SaveState);
        assert_eq!(commands[1], Command::Translate(Pt::from_i32(10), Pt::from_i32(20)));
        assert!(matches!(commands[2], Command::Rotate(_)));
        assert_eq!(commands[3], Command::Scale(2.0, 2.0));
        assert_eq!(commands.last(), Some(&Command::RestoreState));
    }

    #[test]
    fn finish_always_yields_at_least_one_page() {
        let canvas = Canvas::new(Size::from_mm(100.0, 100.0));
        let doc = canvas.finish();
        assert_eq!(doc.pages.len(), 1);
    }
}
