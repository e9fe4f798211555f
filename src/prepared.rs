use crate::canvas::{Canvas, Document, TextMeasurer};
use crate::component::{ComponentId, ObjectKind};
use crate::objects::{ImageState, ShapeKind, ShapeObject, SizeMode};
use crate::style::{Border, Fill, Font, HorzAlign, VertAlign};
use crate::tree::ComponentTree;
use crate::types::{Color, Margins, Padding, Pt, Rect, Size};
use std::collections::BTreeMap;
use std::sync::Arc;

/// What a printed object shows, resolved at the time its band was printed.
#[derive(Debug, Clone, PartialEq)]
pub enum PreparedContent {
    Band {
        type_name: &'static str,
        repeated: bool,
    },
    Text {
        lines: Vec<String>,
        font: Font,
        horz_align: HorzAlign,
        vert_align: VertAlign,
        color: Color,
        padding: Padding,
        line_height: Pt,
    },
    Picture {
        resource_id: Option<String>,
        size_mode: SizeMode,
        image_width: Pt,
        image_height: Pt,
        error: Option<String>,
    },
    Shape(ShapeObject),
    Line {
        diagonal: bool,
    },
    Container,
    Table,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PreparedObject {
    pub name: String,
    pub bounds: Rect,
    pub border: Border,
    pub fill: Fill,
    pub content: PreparedContent,
    /// Nesting depth below the band (the band itself is 0).
    pub depth: usize,
    pub can_break: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PreparedPage {
    pub size: Size,
    pub margins: Margins,
    pub page_number: usize,
    /// Objects in paint order with page-absolute bounds.
    pub objects: Vec<PreparedObject>,
}

impl PreparedPage {
    pub fn new(size: Size, margins: Margins, page_number: usize) -> Self {
        Self {
            size,
            margins,
            page_number,
            objects: Vec::new(),
        }
    }

    /// Band objects in print order.
    pub fn bands(&self) -> impl Iterator<Item = &PreparedObject> {
        self.objects
            .iter()
            .filter(|o| matches!(o.content, PreparedContent::Band { .. }))
    }

    pub fn find(&self, name: &str) -> Option<&PreparedObject> {
        self.objects.iter().find(|o| o.name == name)
    }

    pub fn text_of(&self, name: &str) -> Option<String> {
        match &self.find(name)?.content {
            PreparedContent::Text { lines, .. } => Some(lines.join("\n")),
            _ => None,
        }
    }
}

/// The finished output of a prepare pass.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PreparedPages {
    pub pages: Vec<PreparedPage>,
    pub(crate) images: BTreeMap<String, Arc<[u8]>>,
}

impl PreparedPages {
    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    /// All printed text, one entry per text object, in page order.
    pub fn texts(&self) -> Vec<String> {
        self.pages
            .iter()
            .flat_map(|page| page.objects.iter())
            .filter_map(|object| match &object.content {
                PreparedContent::Text { lines, .. } => Some(lines.join("\n")),
                _ => None,
            })
            .collect()
    }

    /// Encoded image bytes keyed by resource id.
    pub fn images(&self) -> &BTreeMap<String, Arc<[u8]>> {
        &self.images
    }

    pub(crate) fn add_image(&mut self, resource_id: &str, bytes: Arc<[u8]>) {
        self.images
            .entry(resource_id.to_string())
            .or_insert(bytes);
    }

    /// Replays every page onto a recording canvas.
    pub fn render(&self, measurer: Arc<dyn TextMeasurer>) -> Document {
        let first = self.pages.first().map(|p| p.size).unwrap_or_default();
        let mut canvas = Canvas::with_measurer(first, measurer);
        for page in &self.pages {
            canvas.set_page_size(page.size);
            canvas.meta("page", page.page_number.to_string());
            for object in &page.objects {
                draw_object(&mut canvas, object);
            }
            canvas.show_page();
        }
        canvas.finish_without_show()
    }
}

fn draw_object(canvas: &mut Canvas, object: &PreparedObject) {
    let rect = object.bounds;
    if let PreparedContent::Band { type_name, .. } = &object.content {
        canvas.meta("band", format!("{}:{}", type_name, object.name));
    } else {
        canvas.meta("object", object.name.clone());
    }
    object.fill.draw(canvas, rect);
    match &object.content {
        PreparedContent::Text {
            lines,
            font,
            horz_align,
            vert_align,
            color,
            padding,
            line_height,
        } => {
            canvas.save_state();
            canvas.clip_rect(rect);
            canvas.set_font(font);
            canvas.set_fill_color(*color);
            let inner_width = rect.width - padding.horizontal();
            let inner_height = rect.height - padding.vertical();
            let used = *line_height * lines.len() as i32;
            let mut y = rect.y
                + padding.top
                + match vert_align {
                    VertAlign::Top => Pt::ZERO,
                    VertAlign::Center => (inner_height - used) / 2,
                    VertAlign::Bottom => inner_height - used,
                };
            for line in lines {
                let width = canvas.measure_text(line, font).width;
                let x = rect.x
                    + padding.left
                    + match horz_align {
                        HorzAlign::Left | HorzAlign::Justify => Pt::ZERO,
                        HorzAlign::Center => (inner_width - width) / 2,
                        HorzAlign::Right => inner_width - width,
                    };
                canvas.draw_string(x, y, line.clone());
                y += *line_height;
            }
            canvas.restore_state();
        }
        PreparedContent::Picture {
            resource_id,
            size_mode,
            image_width,
            image_height,
            error,
        } => {
            if let Some(id) = resource_id {
                canvas.save_state();
                canvas.clip_rect(rect);
                canvas.draw_image(size_mode.place(rect, *image_width, *image_height), id.clone());
                canvas.restore_state();
            } else if error.is_some() {
                canvas.set_stroke_color(Color::rgb(0.8, 0.0, 0.0));
                canvas.set_line_width(Pt::from_f32(0.5));
                canvas.draw_line(rect.x, rect.y, rect.right(), rect.bottom());
                canvas.draw_line(rect.right(), rect.y, rect.x, rect.bottom());
            }
        }
        PreparedContent::Shape(shape) => draw_shape(canvas, shape, rect),
        PreparedContent::Line { diagonal } => {
            canvas.set_stroke_color(Color::BLACK);
            if *diagonal {
                canvas.draw_line(rect.x, rect.y, rect.right(), rect.bottom());
            } else if rect.width.abs() >= rect.height.abs() {
                canvas.draw_line(rect.x, rect.y, rect.right(), rect.y);
            } else {
                canvas.draw_line(rect.x, rect.y, rect.x, rect.bottom());
            }
        }
        PreparedContent::Band { .. } | PreparedContent::Container | PreparedContent::Table => {}
    }
    object.border.draw(canvas, rect);
}

fn draw_shape(canvas: &mut Canvas, shape: &ShapeObject, rect: Rect) {
    canvas.set_stroke_color(Color::BLACK);
    let mid_x = rect.x + rect.width / 2;
    let mid_y = rect.y + rect.height / 2;
    match shape.shape {
        ShapeKind::Rectangle => {
            canvas.draw_rect(rect.x, rect.y, rect.width, rect.height);
        }
        ShapeKind::RoundRectangle => {
            let r = Pt::from_f32(shape.curve)
                .min(rect.width / 2)
                .min(rect.height / 2);
            if r <= Pt::ZERO {
                canvas.draw_rect(rect.x, rect.y, rect.width, rect.height);
            } else {
                let k = r * 0.552_284_8;
                let (l, t, rt, b) = (rect.x, rect.y, rect.right(), rect.bottom());
                canvas.move_to(l + r, t);
                canvas.line_to(rt - r, t);
                canvas.curve_to(rt - r + k, t, rt, t + r - k, rt, t + r);
                canvas.line_to(rt, b - r);
                canvas.curve_to(rt, b - r + k, rt - r + k, b, rt - r, b);
                canvas.line_to(l + r, b);
                canvas.curve_to(l + r - k, b, l, b - r + k, l, b - r);
                canvas.line_to(l, t + r);
                canvas.curve_to(l, t + r - k, l + r - k, t, l + r, t);
                canvas.close_path();
            }
        }
        ShapeKind::Ellipse => canvas.draw_ellipse(rect),
        ShapeKind::Triangle => canvas.draw_polygon(&[
            (mid_x, rect.y),
            (rect.right(), rect.bottom()),
            (rect.x, rect.bottom()),
        ]),
        ShapeKind::Diamond => canvas.draw_polygon(&[
            (mid_x, rect.y),
            (rect.right(), mid_y),
            (mid_x, rect.bottom()),
            (rect.x, mid_y),
        ]),
    }
    canvas.stroke();
}

/// One printed copy of a band: the band itself followed by its objects with
/// band-relative bounds, flattened in paint order.
#[derive(Debug, Clone, PartialEq)]
pub struct BandInstance {
    pub name: String,
    pub type_name: &'static str,
    pub height: Pt,
    pub objects: Vec<PreparedObject>,
    pub can_break: bool,
    pub repeated: bool,
}

impl BandInstance {
    pub fn width(&self) -> Pt {
        self.objects
            .first()
            .map(|o| o.bounds.width)
            .unwrap_or(Pt::ZERO)
    }

    /// Number of objects excluding the band itself.
    pub fn object_count(&self) -> usize {
        self.objects.len().saturating_sub(1)
    }

    /// Objects positioned on a page with the band's top-left at (`x`, `y`).
    pub fn placed_at(&self, x: Pt, y: Pt) -> Vec<PreparedObject> {
        self.objects
            .iter()
            .map(|o| PreparedObject {
                bounds: o.bounds.translated(x, y),
                ..o.clone()
            })
            .collect()
    }

    /// Splits the band so that the first part is at most `avail` tall.
    ///
    /// Objects that cannot break and cross the cut move to the second part
    /// whole; breakable text keeps the lines that fit. Returns `None` when
    /// nothing can stay in the first part.
    pub fn split_at(&self, avail: Pt) -> Option<(BandInstance, BandInstance)> {
        if avail >= self.height {
            return None;
        }
        let mut cut = avail;
        loop {
            let mut next = cut;
            for object in self.objects.iter().skip(1) {
                let top = object.bounds.y;
                if top >= next || object.bounds.bottom() <= next {
                    continue;
                }
                let keeps = match &object.content {
                    PreparedContent::Text { .. } if object.can_break => {
                        fitting_lines(object, next - top) > 0
                    }
                    PreparedContent::Container if object.can_break => true,
                    _ => false,
                };
                if !keeps {
                    next = next.min(top);
                }
            }
            if next == cut {
                break;
            }
            cut = next;
        }
        if cut <= Pt::ZERO {
            return None;
        }

        let mut first = Vec::new();
        let mut second = Vec::new();
        for (index, object) in self.objects.iter().enumerate() {
            if index == 0 {
                let mut head = object.clone();
                head.bounds.height = cut;
                let mut tail = object.clone();
                tail.bounds.height = self.height - cut;
                first.push(head);
                second.push(tail);
                continue;
            }
            let top = object.bounds.y;
            let bottom = object.bounds.bottom();
            if bottom <= cut {
                first.push(object.clone());
                continue;
            }
            if top >= cut {
                let mut moved = object.clone();
                moved.bounds.y = top - cut;
                second.push(moved);
                continue;
            }
            let mut head = object.clone();
            head.bounds.height = cut - top;
            let mut tail = object.clone();
            tail.bounds.y = Pt::ZERO;
            tail.bounds.height = bottom - cut;
            if let (
                PreparedContent::Text { lines: kept, .. },
                PreparedContent::Text { lines: rest, .. },
            ) = (&mut head.content, &mut tail.content)
            {
                let fit = fitting_lines(object, cut - top);
                let remaining = kept.split_off(fit.min(kept.len()));
                *rest = remaining;
            }
            first.push(head);
            second.push(tail);
        }
        let part = |objects: Vec<PreparedObject>, height: Pt, repeated: bool| BandInstance {
            name: self.name.clone(),
            type_name: self.type_name,
            height,
            objects,
            can_break: self.can_break,
            repeated,
        };
        Some((
            part(first, cut, self.repeated),
            part(second, self.height - cut, self.repeated),
        ))
    }
}

fn fitting_lines(object: &PreparedObject, height: Pt) -> usize {
    let PreparedContent::Text {
        lines,
        padding,
        line_height,
        ..
    } = &object.content
    else {
        return 0;
    };
    if *line_height <= Pt::ZERO {
        return lines.len();
    }
    let mut used = padding.vertical();
    let mut fit = 0;
    while fit < lines.len() && used + *line_height <= height {
        used += *line_height;
        fit += 1;
    }
    fit
}

/// Captures the current state of `band` and its objects for printing.
///
/// Hidden subtrees and objects whose PrintOn excludes this page (or a
/// repeated instance) are left out.
pub fn snapshot_band(
    tree: &ComponentTree,
    band: ComponentId,
    measurer: &dyn TextMeasurer,
    page_number: usize,
    repeated: bool,
) -> Option<BandInstance> {
    let component = tree.get(band)?;
    let bounds = component.base.bounds;
    let type_name = component.as_band()?.kind.type_name();
    let mut objects = vec![PreparedObject {
        name: component.base.name.clone(),
        bounds: Rect {
            x: Pt::ZERO,
            y: Pt::ZERO,
            ..bounds
        },
        border: component.base.border.clone(),
        fill: component.base.fill,
        content: PreparedContent::Band {
            type_name,
            repeated,
        },
        depth: 0,
        can_break: component.base.can_break,
    }];
    collect_objects(
        tree,
        band,
        Pt::ZERO,
        Pt::ZERO,
        1,
        measurer,
        page_number,
        repeated,
        &mut objects,
    );
    Some(BandInstance {
        name: component.base.name.clone(),
        type_name,
        height: bounds.height,
        objects,
        can_break: component.base.can_break,
        repeated,
    })
}

#[allow(clippy::too_many_arguments)]
fn collect_objects(
    tree: &ComponentTree,
    parent: ComponentId,
    dx: Pt,
    dy: Pt,
    depth: usize,
    measurer: &dyn TextMeasurer,
    page_number: usize,
    repeated: bool,
    out: &mut Vec<PreparedObject>,
) {
    for child in tree.objects(parent) {
        let Some(component) = tree.get(child) else {
            continue;
        };
        let base = &component.base;
        if !base.visible || !base.print_on.allows(page_number, repeated) {
            continue;
        }
        let bounds = base.bounds.translated(dx, dy);
        let content = match &component.kind {
            ObjectKind::Text(text) => PreparedContent::Text {
                lines: text.wrap_lines(measurer, base.bounds.width),
                font: text.font.clone(),
                horz_align: text.horz_align,
                vert_align: text.vert_align,
                color: text.text_color,
                padding: text.padding,
                line_height: measurer.line_height(&text.font),
            },
            ObjectKind::Picture(picture) => match picture.image() {
                ImageState::Loaded(image) => PreparedContent::Picture {
                    resource_id: Some(image.resource_id.clone()),
                    size_mode: picture.size_mode,
                    image_width: image.width(),
                    image_height: image.height(),
                    error: None,
                },
                ImageState::Error(message) => PreparedContent::Picture {
                    resource_id: None,
                    size_mode: picture.size_mode,
                    image_width: Pt::ZERO,
                    image_height: Pt::ZERO,
                    error: Some(message.clone()),
                },
                ImageState::Empty => PreparedContent::Picture {
                    resource_id: None,
                    size_mode: picture.size_mode,
                    image_width: Pt::ZERO,
                    image_height: Pt::ZERO,
                    error: None,
                },
            },
            ObjectKind::Shape(shape) => PreparedContent::Shape(*shape),
            ObjectKind::Line(line) => PreparedContent::Line {
                diagonal: line.diagonal,
            },
            ObjectKind::Container(_) => PreparedContent::Container,
            ObjectKind::Table(_) => PreparedContent::Table,
            ObjectKind::Band(_) | ObjectKind::Page(_) => continue,
        };
        out.push(PreparedObject {
            name: base.name.clone(),
            bounds,
            border: base.border.clone(),
            fill: base.fill,
            content,
            depth,
            can_break: base.can_break,
        });
        collect_objects(
            tree,
            child,
            bounds.x,
            bounds.y,
            depth + 1,
            measurer,
            page_number,
            repeated,
            out,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::band::BandKind;
    use crate::canvas::{ApproxTextMeasurer, Command};
    use crate::component::Component;
    use crate::style::BorderLine;

    fn band_with(objects: Vec<Component>) -> (ComponentTree, ComponentId) {
        let mut tree = ComponentTree::new();
        let page = tree.insert_root(Component::page("Page1"));
        let mut band = Component::band("Title", BandKind::ReportTitle, 60.0);
        band.base.bounds.width = Pt::from_i32(200);
        band.base.can_break = true;
        let band = tree.add_child(page, band).expect("title");
        for object in objects {
            tree.add_child(band, object).expect("object");
        }
        (tree, band)
    }

    fn memo(name: &str, y: f32, height: f32, text: &str) -> Component {
        let mut c = Component::text(name, Rect::new(0.0, y, 40.0, height), text);
        if let Some(t) = c.as_text_mut() {
            t.padding = Padding::default();
        }
        c
    }

    #[test]
    fn snapshot_skips_hidden_and_repeated_only_objects() {
        let mut hidden = memo("Hidden", 0.0, 12.0, "x");
        hidden.base.visible = false;
        let mut once = memo("Once", 12.0, 12.0, "y");
        once.base.print_on.repeated_band = false;
        let (tree, band) = band_with(vec![hidden, once, memo("Always", 24.0, 12.0, "z")]);

        let first = snapshot_band(&tree, band, &ApproxTextMeasurer, 1, false).expect("band");
        assert_eq!(first.object_count(), 2);
        let repeated = snapshot_band(&tree, band, &ApproxTextMeasurer, 2, true).expect("band");
        assert_eq!(repeated.object_count(), 1);
        assert_eq!(repeated.objects[1].name, "Always");
    }

    #[test]
    fn split_moves_crossing_unbreakable_objects_to_the_second_part() {
        let mut shape = Component::shape(
            "Box",
            Rect::new(50.0, 20.0, 20.0, 30.0),
            ShapeObject::new(ShapeKind::Rectangle),
        );
        shape.base.can_break = false;
        let (tree, band) = band_with(vec![memo("Top", 0.0, 12.0, "a"), shape]);
        let instance = snapshot_band(&tree, band, &ApproxTextMeasurer, 1, false).expect("band");

        let (first, second) = instance.split_at(Pt::from_i32(30)).expect("split");
        assert_eq!(first.height, Pt::from_i32(20));
        assert_eq!(first.object_count(), 1);
        assert_eq!(second.height, Pt::from_i32(40));
        let moved = &second.objects[1];
        assert_eq!(moved.name, "Box");
        assert_eq!(moved.bounds.y, Pt::ZERO);
    }

    #[test]
    fn split_breaks_text_between_lines() {
        let text = memo("Memo", 0.0, 48.0, "aaaaaaa bbbbbbb ccccccc ddddddd");
        let (tree, band) = band_with(vec![text]);
        let instance = snapshot_band(&tree, band, &ApproxTextMeasurer, 1, false).expect("band");

        let (first, second) = instance.split_at(Pt::from_i32(30)).expect("split");
        assert_eq!(first.height, Pt::from_i32(30));
        let kept = match &first.objects[1].content {
            PreparedContent::Text { lines, .. } => lines.clone(),
            other => panic!("unexpected {other:?}"),
        };
        let rest = match &second.objects[1].content {
            PreparedContent::Text { lines, .. } => lines.clone(),
            other => panic!("unexpected {other:?}"),
        };
        assert_eq!(kept, vec!["aaaaaaa", "bbbbbbb"]);
        assert_eq!(rest, vec!["ccccccc", "ddddddd"]);
    }

    #[test]
    fn split_fails_when_nothing_fits() {
        let mut shape = Component::shape(
            "Box",
            Rect::new(0.0, 0.0, 20.0, 50.0),
            ShapeObject::new(ShapeKind::Ellipse),
        );
        shape.base.can_break = false;
        let (tree, band) = band_with(vec![shape]);
        let instance = snapshot_band(&tree, band, &ApproxTextMeasurer, 1, false).expect("band");
        assert!(instance.split_at(Pt::from_i32(30)).is_none());
    }

    #[test]
    fn render_draws_uniform_border_as_one_rectangle() {
        let mut framed = memo("Framed", 0.0, 12.0, "hi");
        framed.base.border = Border::all(BorderLine::default());
        let (tree, band) = band_with(vec![framed]);
        let instance = snapshot_band(&tree, band, &ApproxTextMeasurer, 1, false).expect("band");
        let mut page = PreparedPage::new(Size::from_mm(210.0, 297.0), Margins::default(), 1);
        page.objects = instance.placed_at(Pt::from_i32(10), Pt::from_i32(10));
        let pages = PreparedPages {
            pages: vec![page],
            images: BTreeMap::new(),
        };

        let doc = pages.render(Arc::new(ApproxTextMeasurer));
        let commands = &doc.pages[0].commands;
        let rects = commands
            .iter()
            .filter(|c| matches!(c, Command::DrawRect { .. }))
            .count();
        let lines = commands
            .iter()
            .filter(|c| matches!(c, Command::LineTo { .. }))
            .count();
        assert_eq!(rects, 1);
        assert_eq!(lines, 0);
        assert!(commands.iter().any(|c| matches!(
            c,
            Command::DrawString { text, .. } if text == "hi"
        )));
    }
}
