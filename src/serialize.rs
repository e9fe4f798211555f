//! Report persistence as XML.
//!
//! Every component becomes one element named by its type tag. Attributes are
//! dotted property paths (`Font.Size`, `Columns.Count`,
//! `Border.LeftLine.Width`) and only those differing from the registry's
//! default instance of the same tag are written. Band slots are not stored:
//! nested elements re-attach through the same containment rules used when
//! building a report in code.

use crate::band::{Band, BandKind, SortOrder, SortSpec};
use crate::columns::ColumnLayout;
use crate::component::{Anchor, Component, ComponentBase, ComponentId, Dock, ObjectKind, ShiftMode};
use crate::data::{Dictionary, Relation};
use crate::error::ReportError;
use crate::objects::{PictureObject, ShapeKind, ShapeObject, SizeMode, TableColumn, TableRow, TextObject};
use crate::page::ReportPage;
use crate::registry::ComponentRegistry;
use crate::report::Report;
use crate::style::{BorderLine, BorderLines, Fill, HorzAlign, LineStyle, VertAlign};
use crate::totals::{Total, TotalKind};
use crate::tree::ComponentTree;
use crate::types::{Color, Pt};
use crate::value::Value;
use base64::Engine;
use quick_xml::Writer;
use quick_xml::events::attributes::Attribute;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, Event};
use quick_xml::name::QName;
use base64::engine::general_purpose::STANDARD as BASE64;
use std::borrow::Cow;
use std::sync::Arc;

const ROOT_TAG: &str = "Report";
const DICTIONARY_TAG: &str = "Dictionary";

impl Report {
    pub fn to_xml(&self) -> String {
        write_report(self, &ComponentRegistry::default())
    }

    pub fn from_xml(xml: &str) -> Result<Report, ReportError> {
        read_report(xml, &ComponentRegistry::default())
    }
}

type Properties = Vec<(&'static str, String)>;

struct InvalidValue;

type Applied = Result<bool, InvalidValue>;

fn format_pt(value: Pt) -> String {
    let milli = value.to_milli_i64();
    let sign = if milli < 0 { "-" } else { "" };
    let milli = milli.unsigned_abs();
    let (whole, frac) = (milli / 1000, milli % 1000);
    if frac == 0 {
        format!("{sign}{whole}")
    } else {
        let frac = format!("{frac:03}");
        format!("{sign}{whole}.{}", frac.trim_end_matches('0'))
    }
}

fn parse_pt(raw: &str) -> Option<Pt> {
    let value: f64 = raw.trim().parse().ok()?;
    value
        .is_finite()
        .then(|| Pt::from_milli_i64((value * 1000.0).round() as i64))
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim() {
        v if v.eq_ignore_ascii_case("true") => Some(true),
        v if v.eq_ignore_ascii_case("false") => Some(false),
        _ => None,
    }
}

fn parse_fill(raw: &str) -> Option<Fill> {
    if raw.trim() == "None" {
        return Some(Fill::None);
    }
    Color::from_hex(raw).map(Fill::Solid)
}

fn fill_string(fill: &Fill) -> String {
    match fill {
        Fill::None => "None".to_string(),
        Fill::Solid(color) => color.to_hex(),
    }
}

fn set<T>(slot: &mut T, parsed: Option<T>) -> Applied {
    *slot = parsed.ok_or(InvalidValue)?;
    Ok(true)
}

fn parse_num<T: std::str::FromStr>(raw: &str) -> Option<T> {
    raw.trim().parse().ok()
}

fn properties(component: &Component) -> Properties {
    let mut props = Properties::new();
    base_properties(&component.base, &mut props);
    match &component.kind {
        ObjectKind::Page(page) => page_properties(page, &mut props),
        ObjectKind::Band(band) => band_properties(band, &mut props),
        ObjectKind::Text(text) => text_properties(text, &mut props),
        ObjectKind::Picture(picture) => picture_properties(picture, &mut props),
        ObjectKind::Shape(shape) => {
            props.push(("Shape", shape.shape.as_str().to_string()));
            props.push(("Curve", shape.curve.to_string()));
        }
        ObjectKind::Line(line) => props.push(("Diagonal", line.diagonal.to_string())),
        ObjectKind::Container(_) | ObjectKind::Table(_) => {}
    }
    props
}

const BORDER_SIDES: [[&str; 3]; 4] = [
    ["Border.LeftLine.Color", "Border.LeftLine.Style", "Border.LeftLine.Width"],
    ["Border.TopLine.Color", "Border.TopLine.Style", "Border.TopLine.Width"],
    ["Border.RightLine.Color", "Border.RightLine.Style", "Border.RightLine.Width"],
    ["Border.BottomLine.Color", "Border.BottomLine.Style", "Border.BottomLine.Width"],
];

fn base_properties(base: &ComponentBase, props: &mut Properties) {
    props.push(("Left", format_pt(base.bounds.x)));
    props.push(("Top", format_pt(base.bounds.y)));
    props.push(("Width", format_pt(base.bounds.width)));
    props.push(("Height", format_pt(base.bounds.height)));
    props.push(("Visible", base.visible.to_string()));
    props.push(("Anchor", base.anchor.as_string()));
    props.push(("Dock", base.dock.as_str().to_string()));
    props.push(("CanGrow", base.can_grow.to_string()));
    props.push(("CanShrink", base.can_shrink.to_string()));
    props.push(("GrowToBottom", base.grow_to_bottom.to_string()));
    props.push(("ShiftMode", base.shift_mode.as_str().to_string()));
    props.push(("PrintOn.FirstPage", base.print_on.first_page.to_string()));
    props.push(("PrintOn.OddPages", base.print_on.odd_pages.to_string()));
    props.push(("PrintOn.EvenPages", base.print_on.even_pages.to_string()));
    props.push(("PrintOn.RepeatedBand", base.print_on.repeated_band.to_string()));
    props.push(("CanBreak", base.can_break.to_string()));

    let border = &base.border;
    props.push(("Border.Lines", border.lines.as_string()));
    let lines = [
        &border.left_line,
        &border.top_line,
        &border.right_line,
        &border.bottom_line,
    ];
    for (paths, line) in BORDER_SIDES.iter().zip(lines) {
        props.push((paths[0], line.color.to_hex()));
        props.push((paths[1], line.style.as_str().to_string()));
        props.push((paths[2], format_pt(line.width)));
    }
    props.push(("Border.Shadow", border.shadow.to_string()));
    props.push(("Border.ShadowWidth", format_pt(border.shadow_width)));
    props.push(("Border.ShadowColor", border.shadow_color.to_hex()));
    props.push(("Fill.Color", fill_string(&base.fill)));
}

fn page_properties(page: &ReportPage, props: &mut Properties) {
    props.push(("PaperWidth", page.paper_width.to_string()));
    props.push(("PaperHeight", page.paper_height.to_string()));
    props.push(("LeftMargin", page.margins.left.to_string()));
    props.push(("TopMargin", page.margins.top.to_string()));
    props.push(("RightMargin", page.margins.right.to_string()));
    props.push(("BottomMargin", page.margins.bottom.to_string()));
    props.push(("TitleBeforeHeader", page.title_before_header.to_string()));
}

fn band_properties(band: &Band, props: &mut Properties) {
    props.push(("StartNewPage", band.start_new_page.to_string()));
    props.push(("PrintOnBottom", band.print_on_bottom.to_string()));
    props.push(("RepeatOnEveryPage", band.repeat_on_every_page.to_string()));
    props.push(("KeepWithData", band.keep_with_data.to_string()));
    match &band.kind {
        BandKind::Data(data) => {
            props.push(("DataSource", data.data_source.clone()));
            props.push(("Filter", data.filter.clone()));
            props.push(("Relation", data.relation.clone()));
            props.push(("RowCount", data.row_count.to_string()));
            props.push(("MaxRows", data.max_rows.to_string()));
            props.push(("Columns.Count", data.columns.count.to_string()));
            props.push(("Columns.Width", data.columns.width.to_string()));
            props.push(("Columns.Layout", data.columns.layout.as_str().to_string()));
            props.push(("Columns.MinRowCount", data.columns.min_row_count.to_string()));
            props.push(("PrintIfDetailEmpty", data.print_if_detail_empty.to_string()));
            props.push((
                "PrintIfDatasourceEmpty",
                data.print_if_datasource_empty.to_string(),
            ));
            props.push(("CollectChildRows", data.collect_child_rows.to_string()));
            props.push(("IdColumn", data.id_column.clone()));
            props.push(("ParentIdColumn", data.parent_id_column.clone()));
            props.push(("Indent", format_pt(data.indent)));
        }
        BandKind::GroupHeader(group) => {
            props.push(("Condition", group.condition.clone()));
            props.push(("SortOrder", group.sort_order.as_str().to_string()));
        }
        _ => {}
    }
}

fn text_properties(text: &TextObject, props: &mut Properties) {
    props.push(("Text", text.text.clone()));
    props.push(("Font.Name", text.font.name.clone()));
    props.push(("Font.Size", format_pt(text.font.size)));
    props.push(("Font.Bold", text.font.bold.to_string()));
    props.push(("Font.Italic", text.font.italic.to_string()));
    props.push(("Font.Underline", text.font.underline.to_string()));
    props.push(("HorzAlign", text.horz_align.as_str().to_string()));
    props.push(("VertAlign", text.vert_align.as_str().to_string()));
    props.push(("WordWrap", text.word_wrap.to_string()));
    props.push(("AllowExpressions", text.allow_expressions.to_string()));
    props.push(("Brackets", text.brackets.clone()));
    props.push(("Padding.Left", format_pt(text.padding.left)));
    props.push(("Padding.Top", format_pt(text.padding.top)));
    props.push(("Padding.Right", format_pt(text.padding.right)));
    props.push(("Padding.Bottom", format_pt(text.padding.bottom)));
    props.push(("TextColor", text.text_color.to_hex()));
    props.push(("HideZeros", text.hide_zeros.to_string()));
}

fn picture_properties(picture: &PictureObject, props: &mut Properties) {
    props.push(("ImageLocation", picture.image_location.clone()));
    props.push(("DataColumn", picture.data_column.clone()));
    props.push(("SizeMode", picture.size_mode.as_str().to_string()));
    let image = picture
        .image_data
        .as_ref()
        .map(|bytes| BASE64.encode(bytes))
        .unwrap_or_default();
    props.push(("Image", image));
}

fn set_property(component: &mut Component, path: &str, raw: &str) -> Applied {
    if set_base_property(&mut component.base, path, raw)? {
        return Ok(true);
    }
    match &mut component.kind {
        ObjectKind::Page(page) => set_page_property(page, path, raw),
        ObjectKind::Band(band) => set_band_property(band, path, raw),
        ObjectKind::Text(text) => set_text_property(text, path, raw),
        ObjectKind::Picture(picture) => set_picture_property(picture, path, raw),
        ObjectKind::Shape(shape) => set_shape_property(shape, path, raw),
        ObjectKind::Line(line) => match path {
            "Diagonal" => set(&mut line.diagonal, parse_bool(raw)),
            _ => Ok(false),
        },
        ObjectKind::Container(_) | ObjectKind::Table(_) => Ok(false),
    }
}

fn set_base_property(base: &mut ComponentBase, path: &str, raw: &str) -> Applied {
    if let Some(side) = BORDER_SIDES.iter().position(|paths| paths.contains(&path)) {
        let border = &mut base.border;
        let line: &mut BorderLine = match side {
            0 => &mut border.left_line,
            1 => &mut border.top_line,
            2 => &mut border.right_line,
            _ => &mut border.bottom_line,
        };
        return match path.rsplit('.').next() {
            Some("Color") => set(&mut line.color, Color::from_hex(raw)),
            Some("Style") => set(&mut line.style, LineStyle::parse(raw)),
            _ => set(&mut line.width, parse_pt(raw)),
        };
    }
    match path {
        "Left" => set(&mut base.bounds.x, parse_pt(raw)),
        "Top" => set(&mut base.bounds.y, parse_pt(raw)),
        "Width" => set(&mut base.bounds.width, parse_pt(raw)),
        "Height" => set(&mut base.bounds.height, parse_pt(raw)),
        "Visible" => set(&mut base.visible, parse_bool(raw)),
        "Anchor" => set(&mut base.anchor, Anchor::parse(raw)),
        "Dock" => set(&mut base.dock, Dock::parse(raw)),
        "CanGrow" => set(&mut base.can_grow, parse_bool(raw)),
        "CanShrink" => set(&mut base.can_shrink, parse_bool(raw)),
        "GrowToBottom" => set(&mut base.grow_to_bottom, parse_bool(raw)),
        "ShiftMode" => set(&mut base.shift_mode, ShiftMode::parse(raw)),
        "PrintOn.FirstPage" => set(&mut base.print_on.first_page, parse_bool(raw)),
        "PrintOn.OddPages" => set(&mut base.print_on.odd_pages, parse_bool(raw)),
        "PrintOn.EvenPages" => set(&mut base.print_on.even_pages, parse_bool(raw)),
        "PrintOn.RepeatedBand" => set(&mut base.print_on.repeated_band, parse_bool(raw)),
        "CanBreak" => set(&mut base.can_break, parse_bool(raw)),
        "Border.Lines" => set(&mut base.border.lines, BorderLines::parse(raw)),
        "Border.Shadow" => set(&mut base.border.shadow, parse_bool(raw)),
        "Border.ShadowWidth" => set(&mut base.border.shadow_width, parse_pt(raw)),
        "Border.ShadowColor" => set(&mut base.border.shadow_color, Color::from_hex(raw)),
        "Fill.Color" => set(&mut base.fill, parse_fill(raw)),
        _ => Ok(false),
    }
}

fn set_page_property(page: &mut ReportPage, path: &str, raw: &str) -> Applied {
    match path {
        "PaperWidth" => set(&mut page.paper_width, parse_num(raw)),
        "PaperHeight" => set(&mut page.paper_height, parse_num(raw)),
        "LeftMargin" => set(&mut page.margins.left, parse_num(raw)),
        "TopMargin" => set(&mut page.margins.top, parse_num(raw)),
        "RightMargin" => set(&mut page.margins.right, parse_num(raw)),
        "BottomMargin" => set(&mut page.margins.bottom, parse_num(raw)),
        "TitleBeforeHeader" => set(&mut page.title_before_header, parse_bool(raw)),
        _ => Ok(false),
    }
}

fn set_band_property(band: &mut Band, path: &str, raw: &str) -> Applied {
    match path {
        "StartNewPage" => return set(&mut band.start_new_page, parse_bool(raw)),
        "PrintOnBottom" => return set(&mut band.print_on_bottom, parse_bool(raw)),
        "RepeatOnEveryPage" => return set(&mut band.repeat_on_every_page, parse_bool(raw)),
        "KeepWithData" => return set(&mut band.keep_with_data, parse_bool(raw)),
        _ => {}
    }
    match &mut band.kind {
        BandKind::Data(data) => match path {
            "DataSource" => set(&mut data.data_source, Some(raw.to_string())),
            "Filter" => set(&mut data.filter, Some(raw.to_string())),
            "Relation" => set(&mut data.relation, Some(raw.to_string())),
            "RowCount" => set(&mut data.row_count, parse_num(raw)),
            "MaxRows" => set(&mut data.max_rows, parse_num(raw)),
            "Columns.Count" => set(&mut data.columns.count, parse_num(raw)),
            "Columns.Width" => set(&mut data.columns.width, parse_num(raw)),
            "Columns.Layout" => set(&mut data.columns.layout, ColumnLayout::parse(raw)),
            "Columns.MinRowCount" => set(&mut data.columns.min_row_count, parse_num(raw)),
            "PrintIfDetailEmpty" => set(&mut data.print_if_detail_empty, parse_bool(raw)),
            "PrintIfDatasourceEmpty" => {
                set(&mut data.print_if_datasource_empty, parse_bool(raw))
            }
            "CollectChildRows" => set(&mut data.collect_child_rows, parse_bool(raw)),
            "IdColumn" => set(&mut data.id_column, Some(raw.to_string())),
            "ParentIdColumn" => set(&mut data.parent_id_column, Some(raw.to_string())),
            "Indent" => set(&mut data.indent, parse_pt(raw)),
            _ => Ok(false),
        },
        BandKind::GroupHeader(group) => match path {
            "Condition" => set(&mut group.condition, Some(raw.to_string())),
            "SortOrder" => set(&mut group.sort_order, SortOrder::parse(raw)),
            _ => Ok(false),
        },
        _ => Ok(false),
    }
}

fn set_text_property(text: &mut TextObject, path: &str, raw: &str) -> Applied {
    match path {
        "Text" => set(&mut text.text, Some(raw.to_string())),
        "Font.Name" => set(&mut text.font.name, Some(raw.to_string())),
        "Font.Size" => set(&mut text.font.size, parse_pt(raw)),
        "Font.Bold" => set(&mut text.font.bold, parse_bool(raw)),
        "Font.Italic" => set(&mut text.font.italic, parse_bool(raw)),
        "Font.Underline" => set(&mut text.font.underline, parse_bool(raw)),
        "HorzAlign" => set(&mut text.horz_align, HorzAlign::parse(raw)),
        "VertAlign" => set(&mut text.vert_align, VertAlign::parse(raw)),
        "WordWrap" => set(&mut text.word_wrap, parse_bool(raw)),
        "AllowExpressions" => set(&mut text.allow_expressions, parse_bool(raw)),
        "Brackets" => set(&mut text.brackets, Some(raw.to_string())),
        "Padding.Left" => set(&mut text.padding.left, parse_pt(raw)),
        "Padding.Top" => set(&mut text.padding.top, parse_pt(raw)),
        "Padding.Right" => set(&mut text.padding.right, parse_pt(raw)),
        "Padding.Bottom" => set(&mut text.padding.bottom, parse_pt(raw)),
        "TextColor" => set(&mut text.text_color, Color::from_hex(raw)),
        "HideZeros" => set(&mut text.hide_zeros, parse_bool(raw)),
        _ => Ok(false),
    }
}

fn set_picture_property(picture: &mut PictureObject, path: &str, raw: &str) -> Applied {
    match path {
        "ImageLocation" => set(&mut picture.image_location, Some(raw.to_string())),
        "DataColumn" => set(&mut picture.data_column, Some(raw.to_string())),
        "SizeMode" => set(&mut picture.size_mode, SizeMode::parse(raw)),
        "Image" => {
            let bytes = if raw.trim().is_empty() {
                None
            } else {
                let decoded = BASE64.decode(raw.trim()).map_err(|_| InvalidValue)?;
                Some(Arc::from(decoded))
            };
            set(&mut picture.image_data, Some(bytes))
        }
        _ => Ok(false),
    }
}

fn set_shape_property(shape: &mut ShapeObject, path: &str, raw: &str) -> Applied {
    match path {
        "Shape" => set(&mut shape.shape, ShapeKind::parse(raw)),
        "Curve" => set(&mut shape.curve, parse_num(raw)),
        _ => Ok(false),
    }
}

/// Attribute text escaped for markup, with line breaks and tabs kept as
/// character references so attribute normalization on read preserves them.
fn attribute<'a>(name: &'a str, value: &str) -> Attribute<'a> {
    let escaped = quick_xml::escape::escape(value)
        .replace('\n', "&#10;")
        .replace('\r', "&#13;")
        .replace('\t', "&#9;");
    Attribute {
        key: QName(name.as_bytes()),
        value: Cow::Owned(escaped.into_bytes()),
    }
}

struct XmlOut {
    writer: Writer<Vec<u8>>,
}

impl XmlOut {
    fn new() -> Self {
        let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
        let _ = writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)));
        Self { writer }
    }

    fn start<'a>(tag: &'a str, attributes: &[(&str, String)]) -> BytesStart<'a> {
        let mut start = BytesStart::new(tag);
        for (name, value) in attributes {
            start.push_attribute(attribute(name, value));
        }
        start
    }

    fn empty(&mut self, tag: &str, attributes: &[(&str, String)]) {
        let _ = self
            .writer
            .write_event(Event::Empty(Self::start(tag, attributes)));
    }

    fn open(&mut self, tag: &str, attributes: &[(&str, String)]) {
        let _ = self
            .writer
            .write_event(Event::Start(Self::start(tag, attributes)));
    }

    fn close(&mut self, tag: &str) {
        let _ = self.writer.write_event(Event::End(BytesEnd::new(tag)));
    }

    fn finish(self) -> String {
        let mut out = String::from_utf8(self.writer.into_inner()).unwrap_or_default();
        out.push('\n');
        out
    }
}

/// Serializes `report` to XML, writing only properties that differ from the
/// `registry` default of each component's tag.
pub fn write_report(report: &Report, registry: &ComponentRegistry) -> String {
    let mut writer = XmlOut::new();
    writer.open(ROOT_TAG, &[("Name", report.name.clone())]);
    write_dictionary(&mut writer, &report.dictionary);
    for root in report.tree.roots() {
        write_component(&mut writer, &report.tree, *root, registry);
    }
    writer.close(ROOT_TAG);
    writer.finish()
}

fn value_attributes(value: &Value) -> (&'static str, String) {
    match value {
        Value::Null => ("Null", String::new()),
        Value::Bool(v) => ("Bool", v.to_string()),
        Value::Int(v) => ("Int", v.to_string()),
        Value::Float(v) => ("Float", v.to_string()),
        Value::Text(v) => ("Text", v.clone()),
        Value::Bytes(v) => ("Bytes", BASE64.encode(v)),
    }
}

fn parse_value(data_type: &str, raw: &str) -> Option<Value> {
    match data_type {
        "Null" => Some(Value::Null),
        "Bool" => parse_bool(raw).map(Value::Bool),
        "Int" => parse_num(raw).map(Value::Int),
        "Float" => parse_num(raw).map(Value::Float),
        "Text" => Some(Value::Text(raw.to_string())),
        "Bytes" => BASE64
            .decode(raw.trim())
            .ok()
            .map(|bytes| Value::Bytes(Arc::from(bytes))),
        _ => None,
    }
}

fn write_dictionary(writer: &mut XmlOut, dictionary: &Dictionary) {
    if dictionary.parameters().is_empty()
        && dictionary.relations().is_empty()
        && dictionary.totals().is_empty()
    {
        return;
    }
    writer.open(DICTIONARY_TAG, &[]);
    for parameter in dictionary.parameters() {
        let (data_type, value) = value_attributes(&parameter.value);
        writer.empty(
            "Parameter",
            &[
                ("Name", parameter.name.clone()),
                ("DataType", data_type.to_string()),
                ("Value", value),
            ],
        );
    }
    for relation in dictionary.relations() {
        writer.empty(
            "Relation",
            &[
                ("Name", relation.name.clone()),
                ("ParentDataSource", relation.parent_source.clone()),
                ("ChildDataSource", relation.child_source.clone()),
                ("ParentColumns", relation.parent_columns.join(",")),
                ("ChildColumns", relation.child_columns.join(",")),
            ],
        );
    }
    for total in dictionary.totals() {
        writer.empty(
            "Total",
            &[
                ("Name", total.name.clone()),
                ("TotalType", total.kind.as_str().to_string()),
                ("Expression", total.expression.clone()),
                ("Evaluator", total.evaluator.clone()),
                ("PrintOn", total.print_on.clone()),
                ("ResetAfterPrint", total.reset_after_print.to_string()),
            ],
        );
    }
    writer.close(DICTIONARY_TAG);
}

fn write_component(
    writer: &mut XmlOut,
    tree: &ComponentTree,
    id: ComponentId,
    registry: &ComponentRegistry,
) {
    let Some(component) = tree.get(id) else {
        return;
    };
    let tag = component.type_name();
    let defaults = registry
        .create(tag)
        .map(|default| properties(&default))
        .unwrap_or_default();
    let mut attributes = vec![("Name", component.base.name.clone())];
    for (path, value) in properties(component) {
        let unchanged = defaults
            .iter()
            .any(|(default_path, default)| *default_path == path && *default == value);
        if !unchanged {
            attributes.push((path, value));
        }
    }
    if let Some(target) = component.base.break_to.and_then(|target| tree.get(target)) {
        attributes.push(("BreakTo", target.base.name.clone()));
    }

    let mut nested = Vec::new();
    match &component.kind {
        ObjectKind::Band(band) => {
            if let BandKind::Data(data) = &band.kind {
                for sort in &data.sort {
                    nested.push((
                        "Sort",
                        vec![
                            ("Expression", sort.expression.clone()),
                            ("Descending", sort.descending.to_string()),
                        ],
                    ));
                }
            }
        }
        ObjectKind::Table(table) => {
            for column in &table.columns {
                nested.push(("TableColumn", vec![("Width", format_pt(column.width))]));
            }
            for row in &table.rows {
                nested.push((
                    "TableRow",
                    vec![
                        ("Height", format_pt(row.height)),
                        ("AutoSize", row.auto_size.to_string()),
                    ],
                ));
            }
        }
        _ => {}
    }

    let children = tree.children(id);
    if nested.is_empty() && children.is_empty() {
        writer.empty(tag, &attributes);
        return;
    }
    writer.open(tag, &attributes);
    for (nested_tag, nested_attributes) in &nested {
        writer.empty(nested_tag, nested_attributes);
    }
    for child in children {
        write_component(writer, tree, *child, registry);
    }
    writer.close(tag);
}

/// Rebuilds a report from XML. Components are created through `registry`;
/// children attach with [`ComponentTree::add_child`], so elements in a slot
/// their parent does not accept are skipped.
pub fn read_report(xml: &str, registry: &ComponentRegistry) -> Result<Report, ReportError> {
    let document = roxmltree::Document::parse(xml)?;
    let root = document.root_element();
    if root.tag_name().name() != ROOT_TAG {
        return Err(ReportError::Format(format!(
            "expected <{ROOT_TAG}> root, found <{}>",
            root.tag_name().name()
        )));
    }
    let mut report = Report::new(root.attribute("Name").unwrap_or_default());
    let mut links = Vec::new();
    for node in root.children().filter(roxmltree::Node::is_element) {
        if node.tag_name().name() == DICTIONARY_TAG {
            read_dictionary(node, &mut report.dictionary)?;
            continue;
        }
        let component = read_component(node, registry)?;
        if component.as_page().is_none() {
            return Err(ReportError::Format(format!(
                "<{}> cannot be a top-level element",
                node.tag_name().name()
            )));
        }
        let id = report.tree.insert_root(component);
        collect_link(node, id, &mut links);
        read_children(node, id, &mut report.tree, registry, &mut links)?;
    }

    for (source, target) in links {
        match report.tree.find_by_name(&target) {
            Some(target) => {
                report.tree.set_break_to(source, Some(target));
            }
            None => log::warn!("BreakTo target `{target}` not found"),
        }
    }
    Ok(report)
}

fn collect_link(node: roxmltree::Node<'_, '_>, id: ComponentId, links: &mut Vec<(ComponentId, String)>) {
    if let Some(target) = node.attribute("BreakTo") {
        links.push((id, target.to_string()));
    }
}

fn read_component(
    node: roxmltree::Node<'_, '_>,
    registry: &ComponentRegistry,
) -> Result<Component, ReportError> {
    let tag = node.tag_name().name();
    let mut component = registry
        .create(tag)
        .ok_or_else(|| ReportError::Format(format!("unknown element <{tag}>")))?;
    component.base.name = node.attribute("Name").unwrap_or_default().to_string();
    for attribute in node.attributes() {
        let path = attribute.name();
        if matches!(path, "Name" | "BreakTo") {
            continue;
        }
        match set_property(&mut component, path, attribute.value()) {
            Ok(true) => {}
            Ok(false) => log::warn!(
                "`{}` ({tag}): unknown property `{path}` ignored",
                component.base.name
            ),
            Err(InvalidValue) => {
                return Err(ReportError::Format(format!(
                    "`{}` ({tag}): invalid value `{}` for `{path}`",
                    component.base.name,
                    attribute.value()
                )));
            }
        }
    }
    Ok(component)
}

fn read_children(
    node: roxmltree::Node<'_, '_>,
    parent: ComponentId,
    tree: &mut ComponentTree,
    registry: &ComponentRegistry,
    links: &mut Vec<(ComponentId, String)>,
) -> Result<(), ReportError> {
    for child in node.children().filter(roxmltree::Node::is_element) {
        match child.tag_name().name() {
            "Sort" => {
                let spec = SortSpec::new(
                    child.attribute("Expression").unwrap_or_default(),
                    child
                        .attribute("Descending")
                        .and_then(parse_bool)
                        .unwrap_or(false),
                );
                if let Some(data) = tree
                    .get_mut(parent)
                    .and_then(|c| c.as_band_mut())
                    .and_then(|b| b.as_data_mut())
                {
                    data.sort.push(spec);
                }
            }
            "TableColumn" | "TableRow" => {
                let Some(ObjectKind::Table(table)) = tree.get_mut(parent).map(|c| &mut c.kind)
                else {
                    continue;
                };
                if child.tag_name().name() == "TableColumn" {
                    let width = child.attribute("Width").and_then(parse_pt).unwrap_or(Pt::ZERO);
                    table.columns.push(TableColumn { width });
                } else {
                    table.rows.push(TableRow {
                        height: child.attribute("Height").and_then(parse_pt).unwrap_or(Pt::ZERO),
                        auto_size: child
                            .attribute("AutoSize")
                            .and_then(parse_bool)
                            .unwrap_or(false),
                    });
                }
            }
            _ => {
                let component = read_component(child, registry)?;
                let Some(id) = tree.add_child(parent, component) else {
                    continue;
                };
                collect_link(child, id, links);
                read_children(child, id, tree, registry, links)?;
            }
        }
    }
    Ok(())
}

fn read_dictionary(node: roxmltree::Node<'_, '_>, dictionary: &mut Dictionary) -> Result<(), ReportError> {
    let attr = |node: roxmltree::Node<'_, '_>, name: &str| {
        node.attribute(name).unwrap_or_default().to_string()
    };
    let columns = |raw: String| -> Vec<String> {
        raw.split(',')
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(str::to_string)
            .collect()
    };
    for child in node.children().filter(roxmltree::Node::is_element) {
        match child.tag_name().name() {
            "Parameter" => {
                let name = attr(child, "Name");
                let data_type = attr(child, "DataType");
                let value = parse_value(&data_type, &attr(child, "Value")).ok_or_else(|| {
                    ReportError::Format(format!("parameter `{name}`: invalid {data_type} value"))
                })?;
                dictionary.set_parameter(name, value);
            }
            "Relation" => dictionary.add_relation(Relation {
                name: attr(child, "Name"),
                parent_source: attr(child, "ParentDataSource"),
                child_source: attr(child, "ChildDataSource"),
                parent_columns: columns(attr(child, "ParentColumns")),
                child_columns: columns(attr(child, "ChildColumns")),
            }),
            "Total" => {
                let name = attr(child, "Name");
                let kind = TotalKind::parse(&attr(child, "TotalType")).ok_or_else(|| {
                    ReportError::Format(format!("total `{name}`: unknown TotalType"))
                })?;
                let mut total = Total::new(
                    name,
                    kind,
                    attr(child, "Expression"),
                    attr(child, "Evaluator"),
                    attr(child, "PrintOn"),
                );
                if let Some(reset) = child.attribute("ResetAfterPrint").and_then(parse_bool) {
                    total.reset_after_print = reset;
                }
                dictionary.add_total(total);
            }
            other => log::warn!("unknown dictionary element <{other}> ignored"),
        }
    }
    Ok(())
}
