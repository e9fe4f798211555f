use crate::band::BandKind;
use crate::component::Component;
use crate::objects::{ShapeKind, ShapeObject, TableObject};
use crate::types::Rect;
use std::collections::BTreeMap;

pub type ComponentFactory = fn() -> Component;

/// Maps element tags to factories producing a fresh default instance.
///
/// The XML reader creates components through the registry, and the writer
/// compares every component against the registry default of its tag so
/// only changed properties are written.
#[derive(Debug, Clone)]
pub struct ComponentRegistry {
    factories: BTreeMap<String, ComponentFactory>,
}

impl Default for ComponentRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register("ReportPage", || Component::page(""));
        registry.register("ReportTitleBand", || band(BandKind::ReportTitle));
        registry.register("ReportSummaryBand", || band(BandKind::ReportSummary));
        registry.register("PageHeaderBand", || band(BandKind::PageHeader));
        registry.register("PageFooterBand", || band(BandKind::PageFooter));
        registry.register("ColumnHeaderBand", || band(BandKind::ColumnHeader));
        registry.register("ColumnFooterBand", || band(BandKind::ColumnFooter));
        registry.register("DataHeaderBand", || band(BandKind::DataHeader));
        registry.register("DataFooterBand", || band(BandKind::DataFooter));
        registry.register("DataBand", || Component::data_band("", "", 0.0));
        registry.register("GroupHeaderBand", || Component::group_header("", "", 0.0));
        registry.register("GroupFooterBand", || band(BandKind::GroupFooter));
        registry.register("ChildBand", || band(BandKind::Child));
        registry.register("OverlayBand", || band(BandKind::Overlay));
        registry.register("TextObject", || Component::text("", Rect::default(), ""));
        registry.register("PictureObject", || Component::picture("", Rect::default(), ""));
        registry.register("ShapeObject", || {
            Component::shape("", Rect::default(), ShapeObject::new(ShapeKind::Rectangle))
        });
        registry.register("LineObject", || Component::line("", Rect::default()));
        registry.register("ContainerObject", || Component::container("", Rect::default()));
        registry.register("TableObject", || {
            Component::table("", Rect::default(), TableObject::default())
        });
        registry
    }
}

fn band(kind: BandKind) -> Component {
    Component::band("", kind, 0.0)
}

impl ComponentRegistry {
    pub fn empty() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }

    /// Registers `factory` under `tag`, returning the factory it replaces.
    pub fn register(
        &mut self,
        tag: impl Into<String>,
        factory: ComponentFactory,
    ) -> Option<ComponentFactory> {
        self.factories.insert(tag.into(), factory)
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.factories.contains_key(tag)
    }

    pub fn create(&self, tag: &str) -> Option<Component> {
        self.factories.get(tag).map(|factory| factory())
    }

    pub fn tags(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }
}
