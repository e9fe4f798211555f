use crate::band::{Band, BandKind, DataBand, GroupHeaderBand};
use crate::objects::{
    ContainerObject, LineObject, PictureObject, ShapeObject, TableObject, TextObject,
};
use crate::page::ReportPage;
use crate::style::{Border, Fill};
use crate::types::{Pt, Rect};

slotmap::new_key_type! {
    /// Handle into a [`ComponentTree`](crate::ComponentTree). Handles of removed
    /// components never resolve again.
    pub struct ComponentId;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ShiftMode {
    #[default]
    Always,
    Never,
    WhenOverlapped,
}

impl ShiftMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ShiftMode::Always => "Always",
            ShiftMode::Never => "Never",
            ShiftMode::WhenOverlapped => "WhenOverlapped",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "Always" => Some(ShiftMode::Always),
            "Never" => Some(ShiftMode::Never),
            "WhenOverlapped" => Some(ShiftMode::WhenOverlapped),
            _ => None,
        }
    }
}

/// Edges of the parent a component keeps a fixed distance to when the parent
/// is resized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Anchor(u8);

impl Anchor {
    pub const NONE: Anchor = Anchor(0);
    pub const TOP: Anchor = Anchor(1);
    pub const BOTTOM: Anchor = Anchor(2);
    pub const LEFT: Anchor = Anchor(4);
    pub const RIGHT: Anchor = Anchor(8);

    pub fn contains(self, other: Anchor) -> bool {
        self.0 & other.0 == other.0 && other.0 != 0
    }

    pub fn as_string(self) -> String {
        if self.0 == 0 {
            return "None".to_string();
        }
        [
            (Anchor::TOP, "Top"),
            (Anchor::BOTTOM, "Bottom"),
            (Anchor::LEFT, "Left"),
            (Anchor::RIGHT, "Right"),
        ]
        .iter()
        .filter(|(flag, _)| self.contains(*flag))
        .map(|(_, name)| *name)
        .collect::<Vec<_>>()
        .join(", ")
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let mut out = Anchor::NONE;
        for part in raw.split(',') {
            out = out
                | match part.trim() {
                    "None" | "" => Anchor::NONE,
                    "Top" => Anchor::TOP,
                    "Bottom" => Anchor::BOTTOM,
                    "Left" => Anchor::LEFT,
                    "Right" => Anchor::RIGHT,
                    _ => return None,
                };
        }
        Some(out)
    }
}

impl Default for Anchor {
    fn default() -> Self {
        Anchor::TOP | Anchor::LEFT
    }
}

impl std::ops::BitOr for Anchor {
    type Output = Anchor;
    fn bitor(self, rhs: Anchor) -> Anchor {
        Anchor(self.0 | rhs.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Dock {
    #[default]
    None,
    Left,
    Top,
    Right,
    Bottom,
    Fill,
}

impl Dock {
    pub fn as_str(&self) -> &'static str {
        match self {
            Dock::None => "None",
            Dock::Left => "Left",
            Dock::Top => "Top",
            Dock::Right => "Right",
            Dock::Bottom => "Bottom",
            Dock::Fill => "Fill",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "None" => Some(Dock::None),
            "Left" => Some(Dock::Left),
            "Top" => Some(Dock::Top),
            "Right" => Some(Dock::Right),
            "Bottom" => Some(Dock::Bottom),
            "Fill" => Some(Dock::Fill),
            _ => None,
        }
    }
}

/// Which page/band instances an object prints on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrintOn {
    pub first_page: bool,
    pub odd_pages: bool,
    pub even_pages: bool,
    pub repeated_band: bool,
}

impl Default for PrintOn {
    fn default() -> Self {
        Self {
            first_page: true,
            odd_pages: true,
            even_pages: true,
            repeated_band: true,
        }
    }
}

impl PrintOn {
    pub fn allows(&self, page_number: usize, repeated: bool) -> bool {
        if repeated && !self.repeated_band {
            return false;
        }
        if page_number == 1 {
            return self.first_page;
        }
        if page_number % 2 == 0 {
            self.even_pages
        } else {
            self.odd_pages
        }
    }
}

/// Properties shared by every report component.
#[derive(Debug, Clone, PartialEq)]
pub struct ComponentBase {
    pub name: String,
    pub bounds: Rect,
    pub visible: bool,
    pub anchor: Anchor,
    pub dock: Dock,
    pub can_grow: bool,
    pub can_shrink: bool,
    pub grow_to_bottom: bool,
    pub shift_mode: ShiftMode,
    pub print_on: PrintOn,
    pub border: Border,
    pub fill: Fill,
    pub can_break: bool,
    /// Non-owning link to the component that receives overflow content.
    /// Cleared by the tree when the target is removed.
    pub break_to: Option<ComponentId>,
}

impl ComponentBase {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            bounds: Rect::default(),
            visible: true,
            anchor: Anchor::default(),
            dock: Dock::None,
            can_grow: false,
            can_shrink: false,
            grow_to_bottom: false,
            shift_mode: ShiftMode::Always,
            print_on: PrintOn::default(),
            border: Border::default(),
            fill: Fill::None,
            can_break: false,
            break_to: None,
        }
    }

    pub fn with_bounds(mut self, bounds: Rect) -> Self {
        self.bounds = bounds;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ObjectKind {
    Page(ReportPage),
    Band(Band),
    Text(TextObject),
    Picture(PictureObject),
    Shape(ShapeObject),
    Line(LineObject),
    Container(ContainerObject),
    Table(TableObject),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Component {
    pub base: ComponentBase,
    pub kind: ObjectKind,
}

impl Component {
    pub fn new(base: ComponentBase, kind: ObjectKind) -> Self {
        Self { base, kind }
    }

    pub fn page(name: impl Into<String>) -> Self {
        Self::new(ComponentBase::new(name), ObjectKind::Page(ReportPage::default()))
    }

    pub fn band(name: impl Into<String>, kind: BandKind, height: f32) -> Self {
        let mut base = ComponentBase::new(name);
        base.bounds.height = Pt::from_f32(height);
        Self::new(base, ObjectKind::Band(Band::new(kind)))
    }

    pub fn data_band(name: impl Into<String>, data_source: &str, height: f32) -> Self {
        Self::band(name, BandKind::Data(DataBand::bound_to(data_source)), height)
    }

    pub fn group_header(name: impl Into<String>, condition: &str, height: f32) -> Self {
        Self::band(
            name,
            BandKind::GroupHeader(GroupHeaderBand::with_condition(condition)),
            height,
        )
    }

    pub fn text(name: impl Into<String>, bounds: Rect, text: impl Into<String>) -> Self {
        let mut base = ComponentBase::new(name).with_bounds(bounds);
        base.can_break = true;
        Self::new(base, ObjectKind::Text(TextObject::new(text)))
    }

    pub fn picture(name: impl Into<String>, bounds: Rect, location: impl Into<String>) -> Self {
        let picture = PictureObject {
            image_location: location.into(),
            ..PictureObject::default()
        };
        Self::new(
            ComponentBase::new(name).with_bounds(bounds),
            ObjectKind::Picture(picture),
        )
    }

    pub fn shape(name: impl Into<String>, bounds: Rect, shape: ShapeObject) -> Self {
        Self::new(ComponentBase::new(name).with_bounds(bounds), ObjectKind::Shape(shape))
    }

    pub fn line(name: impl Into<String>, bounds: Rect) -> Self {
        let mut base = ComponentBase::new(name).with_bounds(bounds);
        base.shift_mode = ShiftMode::WhenOverlapped;
        Self::new(base, ObjectKind::Line(LineObject::default()))
    }

    pub fn container(name: impl Into<String>, bounds: Rect) -> Self {
        Self::new(
            ComponentBase::new(name).with_bounds(bounds),
            ObjectKind::Container(ContainerObject),
        )
    }

    pub fn table(name: impl Into<String>, bounds: Rect, table: TableObject) -> Self {
        Self::new(ComponentBase::new(name).with_bounds(bounds), ObjectKind::Table(table))
    }

    pub fn name(&self) -> &str {
        &self.base.name
    }

    /// Element tag used by persistence and the registry.
    pub fn type_name(&self) -> &'static str {
        match &self.kind {
            ObjectKind::Page(_) => "ReportPage",
            ObjectKind::Band(band) => band.kind.type_name(),
            ObjectKind::Text(_) => "TextObject",
            ObjectKind::Picture(_) => "PictureObject",
            ObjectKind::Shape(_) => "ShapeObject",
            ObjectKind::Line(_) => "LineObject",
            ObjectKind::Container(_) => "ContainerObject",
            ObjectKind::Table(_) => "TableObject",
        }
    }

    pub fn as_band(&self) -> Option<&Band> {
        match &self.kind {
            ObjectKind::Band(band) => Some(band),
            _ => None,
        }
    }

    pub fn as_band_mut(&mut self) -> Option<&mut Band> {
        match &mut self.kind {
            ObjectKind::Band(band) => Some(band),
            _ => None,
        }
    }

    pub fn as_page(&self) -> Option<&ReportPage> {
        match &self.kind {
            ObjectKind::Page(page) => Some(page),
            _ => None,
        }
    }

    pub fn as_page_mut(&mut self) -> Option<&mut ReportPage> {
        match &mut self.kind {
            ObjectKind::Page(page) => Some(page),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&TextObject> {
        match &self.kind {
            ObjectKind::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_text_mut(&mut self) -> Option<&mut TextObject> {
        match &mut self.kind {
            ObjectKind::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn is_band(&self) -> bool {
        matches!(self.kind, ObjectKind::Band(_))
    }

    /// Report objects (not pages or bands).
    pub fn is_object(&self) -> bool {
        !matches!(self.kind, ObjectKind::Band(_) | ObjectKind::Page(_))
    }
}
