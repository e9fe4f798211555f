use crate::canvas::Canvas;
use crate::types::{Color, Pt, Rect};

/// Set of border sides that are drawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BorderLines(u8);

impl BorderLines {
    pub const NONE: BorderLines = BorderLines(0);
    pub const LEFT: BorderLines = BorderLines(1);
    pub const RIGHT: BorderLines = BorderLines(2);
    pub const TOP: BorderLines = BorderLines(4);
    pub const BOTTOM: BorderLines = BorderLines(8);
    pub const ALL: BorderLines = BorderLines(15);

    pub fn contains(self, other: BorderLines) -> bool {
        self.0 & other.0 == other.0 && other.0 != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn as_string(self) -> String {
        if self == BorderLines::ALL {
            return "All".to_string();
        }
        if self.is_empty() {
            return "None".to_string();
        }
        let names = [
            (BorderLines::LEFT, "Left"),
            (BorderLines::RIGHT, "Right"),
            (BorderLines::TOP, "Top"),
            (BorderLines::BOTTOM, "Bottom"),
        ];
        names
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect::<Vec<_>>()
            .join(", ")
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let mut out = BorderLines::NONE;
        for part in raw.split(',') {
            out = out
                | match part.trim() {
                    "All" => BorderLines::ALL,
                    "None" | "" => BorderLines::NONE,
                    "Left" => BorderLines::LEFT,
                    "Right" => BorderLines::RIGHT,
                    "Top" => BorderLines::TOP,
                    "Bottom" => BorderLines::BOTTOM,
                    _ => return None,
                };
        }
        Some(out)
    }
}

impl std::ops::BitOr for BorderLines {
    type Output = BorderLines;
    fn bitor(self, rhs: BorderLines) -> BorderLines {
        BorderLines(self.0 | rhs.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LineStyle {
    #[default]
    Solid,
    Dash,
    Dot,
    DashDot,
    DashDotDot,
    Double,
}

impl LineStyle {
    pub fn as_str(&self) -> &'static str {
        match self {
            LineStyle::Solid => "Solid",
            LineStyle::Dash => "Dash",
            LineStyle::Dot => "Dot",
            LineStyle::DashDot => "DashDot",
            LineStyle::DashDotDot => "DashDotDot",
            LineStyle::Double => "Double",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "Solid" => Some(LineStyle::Solid),
            "Dash" => Some(LineStyle::Dash),
            "Dot" => Some(LineStyle::Dot),
            "DashDot" => Some(LineStyle::DashDot),
            "DashDotDot" => Some(LineStyle::DashDotDot),
            "Double" => Some(LineStyle::Double),
            _ => None,
        }
    }

    fn dash_pattern(self, width: Pt) -> Vec<Pt> {
        let unit = width.max(Pt::from_f32(1.0));
        match self {
            LineStyle::Solid | LineStyle::Double => Vec::new(),
            LineStyle::Dash => vec![unit * 3, unit],
            LineStyle::Dot => vec![unit, unit],
            LineStyle::DashDot => vec![unit * 3, unit, unit, unit],
            LineStyle::DashDotDot => vec![unit * 3, unit, unit, unit, unit, unit],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BorderLine {
    pub color: Color,
    pub style: LineStyle,
    pub width: Pt,
}

impl Default for BorderLine {
    fn default() -> Self {
        Self {
            color: Color::BLACK,
            style: LineStyle::Solid,
            width: Pt::from_f32(1.0),
        }
    }
}

impl BorderLine {
    fn apply(&self, canvas: &mut Canvas) {
        canvas.set_stroke_color(self.color);
        canvas.set_line_width(self.width);
        canvas.set_dash(self.style.dash_pattern(self.width), Pt::ZERO);
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Border {
    pub lines: BorderLines,
    pub left_line: BorderLine,
    pub top_line: BorderLine,
    pub right_line: BorderLine,
    pub bottom_line: BorderLine,
    pub shadow: bool,
    pub shadow_width: Pt,
    pub shadow_color: Color,
}

impl Border {
    pub fn all(line: BorderLine) -> Self {
        Self {
            lines: BorderLines::ALL,
            left_line: line,
            top_line: line,
            right_line: line,
            bottom_line: line,
            ..Border::default()
        }
    }

    /// Sets every side to the same line definition.
    pub fn set_line(&mut self, line: BorderLine) {
        self.left_line = line;
        self.top_line = line;
        self.right_line = line;
        self.bottom_line = line;
    }

    fn is_uniform_solid_box(&self) -> bool {
        self.lines == BorderLines::ALL
            && self.left_line == self.top_line
            && self.left_line == self.right_line
            && self.left_line == self.bottom_line
            && self.left_line.style == LineStyle::Solid
    }

    pub fn draw(&self, canvas: &mut Canvas, rect: Rect) {
        if self.shadow && self.shadow_width > Pt::ZERO {
            let w = self.shadow_width;
            canvas.set_fill_color(self.shadow_color);
            canvas.draw_rect(rect.right(), rect.y + w, w, rect.height);
            canvas.fill();
            canvas.draw_rect(rect.x + w, rect.bottom(), rect.width - w, w);
            canvas.fill();
        }
        if self.lines.is_empty() {
            return;
        }
        if self.is_uniform_solid_box() {
            self.left_line.apply(canvas);
            canvas.draw_rect(rect.x, rect.y, rect.width, rect.height);
            canvas.stroke();
            return;
        }
        let sides = [
            (
                BorderLines::LEFT,
                &self.left_line,
                (rect.x, rect.y, rect.x, rect.bottom()),
            ),
            (
                BorderLines::TOP,
                &self.top_line,
                (rect.x, rect.y, rect.right(), rect.y),
            ),
            (
                BorderLines::RIGHT,
                &self.right_line,
                (rect.right(), rect.y, rect.right(), rect.bottom()),
            ),
            (
                BorderLines::BOTTOM,
                &self.bottom_line,
                (rect.x, rect.bottom(), rect.right(), rect.bottom()),
            ),
        ];
        for (flag, line, (x1, y1, x2, y2)) in sides {
            if !self.lines.contains(flag) {
                continue;
            }
            line.apply(canvas);
            canvas.draw_line(x1, y1, x2, y2);
            if line.style == LineStyle::Double {
                let gap = line.width * 2;
                let (dx, dy) = if x1 == x2 { (gap, Pt::ZERO) } else { (Pt::ZERO, gap) };
                canvas.draw_line(x1 + dx, y1 + dy, x2 + dx, y2 + dy);
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum Fill {
    #[default]
    None,
    Solid(Color),
}

impl Fill {
    pub fn draw(&self, canvas: &mut Canvas, rect: Rect) {
        if let Fill::Solid(color) = self {
            canvas.set_fill_color(*color);
            canvas.draw_rect(rect.x, rect.y, rect.width, rect.height);
            canvas.fill();
        }
    }

    pub fn color(&self) -> Option<Color> {
        match self {
            Fill::None => None,
            Fill::Solid(color) => Some(*color),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Font {
    pub name: String,
    pub size: Pt,
    pub bold: bool,
    pub italic: bool,
    pub underline: bool,
}

impl Default for Font {
    fn default() -> Self {
        Self {
            name: "Arial".to_string(),
            size: Pt::from_i32(10),
            bold: false,
            italic: false,
            underline: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HorzAlign {
    #[default]
    Left,
    Center,
    Right,
    Justify,
}

impl HorzAlign {
    pub fn as_str(&self) -> &'static str {
        match self {
            HorzAlign::Left => "Left",
            HorzAlign::Center => "Center",
            HorzAlign::Right => "Right",
            HorzAlign::Justify => "Justify",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "Left" => Some(HorzAlign::Left),
            "Center" => Some(HorzAlign::Center),
            "Right" => Some(HorzAlign::Right),
            "Justify" => Some(HorzAlign::Justify),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VertAlign {
    #[default]
    Top,
    Center,
    Bottom,
}

impl VertAlign {
    pub fn as_str(&self) -> &'static str {
        match self {
            VertAlign::Top => "Top",
            VertAlign::Center => "Center",
            VertAlign::Bottom => "Bottom",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "Top" => Some(VertAlign::Top),
            "Center" => Some(VertAlign::Center),
            "Bottom" => Some(VertAlign::Bottom),
            _ => None,
        }
    }
}
