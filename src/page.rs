use crate::component::ComponentId;
use crate::types::{Margins, Pt, Size};

/// A report page template: paper geometry plus the band slots the engine
/// walks. Band handles are owned children of the page in the tree.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportPage {
    pub paper_width: f32,
    pub paper_height: f32,
    pub margins: Margins,
    /// Print the report title above the page header on the first page.
    pub title_before_header: bool,
    pub title: Option<ComponentId>,
    pub summary: Option<ComponentId>,
    pub page_header: Option<ComponentId>,
    pub page_footer: Option<ComponentId>,
    pub column_header: Option<ComponentId>,
    pub column_footer: Option<ComponentId>,
    pub bands: Vec<ComponentId>,
    pub overlays: Vec<ComponentId>,
}

impl Default for ReportPage {
    fn default() -> Self {
        Self {
            paper_width: 210.0,
            paper_height: 297.0,
            margins: Margins::default(),
            title_before_header: true,
            title: None,
            summary: None,
            page_header: None,
            page_footer: None,
            column_header: None,
            column_footer: None,
            bands: Vec::new(),
            overlays: Vec::new(),
        }
    }
}

impl ReportPage {
    pub fn paper_size(&self) -> Size {
        Size::from_mm(self.paper_width, self.paper_height)
    }

    pub fn printable_width_mm(&self) -> f32 {
        self.paper_width - self.margins.left - self.margins.right
    }

    pub fn printable_height_mm(&self) -> f32 {
        self.paper_height - self.margins.top - self.margins.bottom
    }

    pub fn printable_width(&self) -> Pt {
        Pt::from_mm(self.printable_width_mm())
    }

    pub fn printable_height(&self) -> Pt {
        Pt::from_mm(self.printable_height_mm())
    }

    pub fn left_margin(&self) -> Pt {
        Pt::from_mm(self.margins.left)
    }

    pub fn top_margin(&self) -> Pt {
        Pt::from_mm(self.margins.top)
    }

    /// Every band slot, in the order the engine visits them.
    pub fn band_slots(&self) -> Vec<ComponentId> {
        let singles = [
            self.title,
            self.page_header,
            self.column_header,
            self.column_footer,
            self.page_footer,
            self.summary,
        ];
        singles
            .into_iter()
            .flatten()
            .chain(self.bands.iter().copied())
            .chain(self.overlays.iter().copied())
            .collect()
    }

    pub(crate) fn detach(&mut self, id: ComponentId) {
        for slot in [
            &mut self.title,
            &mut self.summary,
            &mut self.page_header,
            &mut self.page_footer,
            &mut self.column_header,
            &mut self.column_footer,
        ] {
            if *slot == Some(id) {
                *slot = None;
            }
        }
        self.bands.retain(|b| *b != id);
        self.overlays.retain(|b| *b != id);
    }
}
