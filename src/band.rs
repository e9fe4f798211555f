use crate::columns::BandColumns;
use crate::component::ComponentId;
use crate::types::Pt;
use crate::value::Value;

/// Optional behaviours a band kind supports. A band flag only takes effect
/// when its kind has the matching capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BandCapabilities {
    pub start_new_page: bool,
    pub print_on_bottom: bool,
    pub repeat_on_every_page: bool,
    pub keep_with_data: bool,
}

impl BandCapabilities {
    const NONE: BandCapabilities = BandCapabilities {
        start_new_page: false,
        print_on_bottom: false,
        repeat_on_every_page: false,
        keep_with_data: false,
    };

    const fn new(
        start_new_page: bool,
        print_on_bottom: bool,
        repeat_on_every_page: bool,
        keep_with_data: bool,
    ) -> Self {
        Self {
            start_new_page,
            print_on_bottom,
            repeat_on_every_page,
            keep_with_data,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum BandKind {
    ReportTitle,
    ReportSummary,
    PageHeader,
    PageFooter,
    ColumnHeader,
    ColumnFooter,
    DataHeader,
    DataFooter,
    Data(DataBand),
    GroupHeader(GroupHeaderBand),
    GroupFooter,
    Child,
    Overlay,
}

impl BandKind {
    pub fn capabilities(&self) -> BandCapabilities {
        match self {
            BandKind::ReportTitle => BandCapabilities::new(true, false, false, false),
            BandKind::ReportSummary => BandCapabilities::new(true, true, false, false),
            BandKind::PageHeader
            | BandKind::PageFooter
            | BandKind::ColumnHeader
            | BandKind::ColumnFooter
            | BandKind::Overlay => BandCapabilities::NONE,
            BandKind::DataHeader => BandCapabilities::new(true, false, true, true),
            BandKind::DataFooter => BandCapabilities::new(true, true, true, true),
            BandKind::Data(_) => BandCapabilities::new(true, false, false, false),
            BandKind::GroupHeader(_) => BandCapabilities::new(true, false, true, true),
            BandKind::GroupFooter => BandCapabilities::new(true, true, true, true),
            BandKind::Child => BandCapabilities::new(true, false, false, false),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            BandKind::ReportTitle => "ReportTitleBand",
            BandKind::ReportSummary => "ReportSummaryBand",
            BandKind::PageHeader => "PageHeaderBand",
            BandKind::PageFooter => "PageFooterBand",
            BandKind::ColumnHeader => "ColumnHeaderBand",
            BandKind::ColumnFooter => "ColumnFooterBand",
            BandKind::DataHeader => "DataHeaderBand",
            BandKind::DataFooter => "DataFooterBand",
            BandKind::Data(_) => "DataBand",
            BandKind::GroupHeader(_) => "GroupHeaderBand",
            BandKind::GroupFooter => "GroupFooterBand",
            BandKind::Child => "ChildBand",
            BandKind::Overlay => "OverlayBand",
        }
    }

    pub fn from_type_name(tag: &str) -> Option<Self> {
        let kind = match tag {
            "ReportTitleBand" => BandKind::ReportTitle,
            "ReportSummaryBand" => BandKind::ReportSummary,
            "PageHeaderBand" => BandKind::PageHeader,
            "PageFooterBand" => BandKind::PageFooter,
            "ColumnHeaderBand" => BandKind::ColumnHeader,
            "ColumnFooterBand" => BandKind::ColumnFooter,
            "DataHeaderBand" => BandKind::DataHeader,
            "DataFooterBand" => BandKind::DataFooter,
            "DataBand" => BandKind::Data(DataBand::default()),
            "GroupHeaderBand" => BandKind::GroupHeader(GroupHeaderBand::default()),
            "GroupFooterBand" => BandKind::GroupFooter,
            "ChildBand" => BandKind::Child,
            "OverlayBand" => BandKind::Overlay,
            _ => return None,
        };
        Some(kind)
    }

    pub fn same_kind(&self, other: &BandKind) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Band {
    pub kind: BandKind,
    pub start_new_page: bool,
    pub print_on_bottom: bool,
    pub repeat_on_every_page: bool,
    pub keep_with_data: bool,
    pub child: Option<ComponentId>,
    // Set on instances reprinted at the top or bottom of a continuation page.
    pub(crate) repeated: bool,
}

impl Band {
    pub fn new(kind: BandKind) -> Self {
        Self {
            kind,
            start_new_page: false,
            print_on_bottom: false,
            repeat_on_every_page: false,
            keep_with_data: false,
            child: None,
            repeated: false,
        }
    }

    pub fn effective_start_new_page(&self) -> bool {
        self.start_new_page && self.kind.capabilities().start_new_page
    }

    pub fn effective_print_on_bottom(&self) -> bool {
        self.print_on_bottom && self.kind.capabilities().print_on_bottom
    }

    pub fn effective_repeat_on_every_page(&self) -> bool {
        self.repeat_on_every_page && self.kind.capabilities().repeat_on_every_page
    }

    pub fn effective_keep_with_data(&self) -> bool {
        self.keep_with_data && self.kind.capabilities().keep_with_data
    }

    pub fn is_repeated(&self) -> bool {
        self.repeated
    }

    pub fn as_data(&self) -> Option<&DataBand> {
        match &self.kind {
            BandKind::Data(data) => Some(data),
            _ => None,
        }
    }

    pub fn as_data_mut(&mut self) -> Option<&mut DataBand> {
        match &mut self.kind {
            BandKind::Data(data) => Some(data),
            _ => None,
        }
    }

    pub fn as_group(&self) -> Option<&GroupHeaderBand> {
        match &self.kind {
            BandKind::GroupHeader(group) => Some(group),
            _ => None,
        }
    }

    pub fn as_group_mut(&mut self) -> Option<&mut GroupHeaderBand> {
        match &mut self.kind {
            BandKind::GroupHeader(group) => Some(group),
            _ => None,
        }
    }

    /// Band slots owned by this band, in print order.
    pub fn attachments(&self) -> Vec<ComponentId> {
        let mut out = Vec::new();
        match &self.kind {
            BandKind::Data(data) => {
                out.extend(data.header);
                out.extend(data.details.iter().copied());
                out.extend(data.footer);
            }
            BandKind::GroupHeader(group) => {
                out.extend(group.header);
                out.extend(group.nested_group);
                out.extend(group.data);
                out.extend(group.group_footer);
                out.extend(group.footer);
            }
            _ => {}
        }
        out.extend(self.child);
        out
    }

    pub(crate) fn detach(&mut self, id: ComponentId) {
        if self.child == Some(id) {
            self.child = None;
        }
        match &mut self.kind {
            BandKind::Data(data) => {
                for slot in [&mut data.header, &mut data.footer] {
                    if *slot == Some(id) {
                        *slot = None;
                    }
                }
                data.details.retain(|d| *d != id);
            }
            BandKind::GroupHeader(group) => {
                for slot in [
                    &mut group.nested_group,
                    &mut group.data,
                    &mut group.group_footer,
                    &mut group.header,
                    &mut group.footer,
                ] {
                    if *slot == Some(id) {
                        *slot = None;
                    }
                }
            }
            _ => {}
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SortSpec {
    pub expression: String,
    pub descending: bool,
}

impl SortSpec {
    pub fn new(expression: impl Into<String>, descending: bool) -> Self {
        Self {
            expression: expression.into(),
            descending,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DataBand {
    pub data_source: String,
    pub filter: String,
    pub sort: Vec<SortSpec>,
    /// Explicit master-detail relation name; empty means discover by source.
    pub relation: String,
    /// Virtual rows printed when no data source is bound.
    pub row_count: usize,
    /// Zero means unlimited.
    pub max_rows: usize,
    pub columns: BandColumns,
    pub header: Option<ComponentId>,
    pub footer: Option<ComponentId>,
    pub details: Vec<ComponentId>,
    pub print_if_detail_empty: bool,
    pub print_if_datasource_empty: bool,
    pub collect_child_rows: bool,
    pub id_column: String,
    pub parent_id_column: String,
    pub indent: Pt,
}

impl Default for DataBand {
    fn default() -> Self {
        Self {
            data_source: String::new(),
            filter: String::new(),
            sort: Vec::new(),
            relation: String::new(),
            row_count: 1,
            max_rows: 0,
            columns: BandColumns::default(),
            header: None,
            footer: None,
            details: Vec::new(),
            print_if_detail_empty: false,
            print_if_datasource_empty: false,
            collect_child_rows: false,
            id_column: String::new(),
            parent_id_column: String::new(),
            indent: Pt::from_i32(20),
        }
    }
}

impl DataBand {
    pub fn bound_to(data_source: &str) -> Self {
        Self {
            data_source: data_source.to_string(),
            ..Self::default()
        }
    }

    pub fn is_hierarchical(&self) -> bool {
        !self.id_column.is_empty() && !self.parent_id_column.is_empty()
    }

    /// Puts group sort entries ahead of the band's own sort, keeping their
    /// outer-to-inner order. Returns how many were inserted.
    pub fn insert_group_sorts(&mut self, entries: Vec<SortSpec>) -> usize {
        let count = entries.len();
        self.sort.splice(0..0, entries);
        count
    }

    pub fn remove_group_sorts(&mut self, count: usize) {
        let count = count.min(self.sort.len());
        self.sort.drain(0..count);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    None,
    #[default]
    Ascending,
    Descending,
}

impl SortOrder {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortOrder::None => "None",
            SortOrder::Ascending => "Ascending",
            SortOrder::Descending => "Descending",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "None" => Some(SortOrder::None),
            "Ascending" => Some(SortOrder::Ascending),
            "Descending" => Some(SortOrder::Descending),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct GroupHeaderBand {
    pub condition: String,
    pub sort_order: SortOrder,
    pub nested_group: Option<ComponentId>,
    pub data: Option<ComponentId>,
    pub group_footer: Option<ComponentId>,
    pub header: Option<ComponentId>,
    pub footer: Option<ComponentId>,
    pub(crate) group_value: Value,
}

impl GroupHeaderBand {
    pub fn with_condition(condition: &str) -> Self {
        Self {
            condition: condition.to_string(),
            ..Self::default()
        }
    }

    pub fn reset_group_value(&mut self, value: Value) {
        self.group_value = value;
    }

    pub fn group_value(&self) -> &Value {
        &self.group_value
    }

    /// Null to non-null (or back) is a change; two nulls are not.
    pub fn group_value_changed(&self, value: &Value) -> bool {
        match (self.group_value.is_null(), value.is_null()) {
            (true, true) => false,
            (true, false) | (false, true) => true,
            (false, false) => self.group_value != *value,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_need_kind_capability() {
        let mut header = Band::new(BandKind::PageHeader);
        header.start_new_page = true;
        header.print_on_bottom = true;
        assert!(!header.effective_start_new_page());
        assert!(!header.effective_print_on_bottom());

        let mut footer = Band::new(BandKind::GroupFooter);
        footer.print_on_bottom = true;
        footer.repeat_on_every_page = true;
        assert!(footer.effective_print_on_bottom());
        assert!(footer.effective_repeat_on_every_page());

        let mut data = Band::new(BandKind::Data(DataBand::default()));
        data.repeat_on_every_page = true;
        assert!(!data.effective_repeat_on_every_page());
    }

    #[test]
    fn group_sort_entries_go_first_and_come_off_by_count() {
        let mut data = DataBand::bound_to("Orders");
        data.sort.push(SortSpec::new("[Orders.Id]", false));
        let inserted = data.insert_group_sorts(vec![
            SortSpec::new("[Orders.Country]", false),
            SortSpec::new("[Orders.City]", true),
        ]);
        assert_eq!(inserted, 2);
        assert_eq!(data.sort[0].expression, "[Orders.Country]");
        assert_eq!(data.sort[1].expression, "[Orders.City]");
        data.remove_group_sorts(inserted);
        assert_eq!(data.sort, vec![SortSpec::new("[Orders.Id]", false)]);
    }

    #[test]
    fn group_value_change_treats_null_transitions_as_changes() {
        let mut group = GroupHeaderBand::with_condition("[x]");
        assert!(!group.group_value_changed(&Value::Null));
        assert!(group.group_value_changed(&Value::Int(1)));
        group.reset_group_value(Value::Int(1));
        assert!(!group.group_value_changed(&Value::Int(1)));
        assert!(group.group_value_changed(&Value::Null));
        assert!(group.group_value_changed(&Value::Int(2)));
    }

    #[test]
    fn band_kind_tags_round_trip() {
        let kind = BandKind::from_type_name("GroupFooterBand").expect("tag");
        assert_eq!(kind.type_name(), "GroupFooterBand");
        assert!(kind.same_kind(&BandKind::GroupFooter));
        assert!(!kind.same_kind(&BandKind::DataFooter));
        assert!(BandKind::from_type_name("Bogus").is_none());
    }
}
