use crate::component::{Component, ComponentId};
use crate::data::{DataSource, Dictionary};
use crate::tree::ComponentTree;

/// A report definition: pages and their bands in the component tree plus the
/// dictionary of data, parameters and totals they use.
#[derive(Debug, Default)]
pub struct Report {
    pub name: String,
    pub tree: ComponentTree,
    pub dictionary: Dictionary,
}

impl Report {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn add_page(&mut self, name: impl Into<String>) -> ComponentId {
        self.tree.insert_root(Component::page(name))
    }

    /// Page templates in print order.
    pub fn pages(&self) -> Vec<ComponentId> {
        self.tree
            .roots()
            .iter()
            .copied()
            .filter(|id| self.tree.get(*id).is_some_and(|c| c.as_page().is_some()))
            .collect()
    }

    /// Attaches `component` under `parent`; see [`ComponentTree::add_child`].
    pub fn add(&mut self, parent: ComponentId, component: Component) -> Option<ComponentId> {
        self.tree.add_child(parent, component)
    }

    pub fn find(&self, name: &str) -> Option<ComponentId> {
        self.tree.find_by_name(name)
    }

    pub fn register_data(&mut self, source: impl DataSource + 'static) {
        self.dictionary.register_data(source);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Rect;

    #[test]
    fn pages_and_lookup() {
        let mut report = Report::new("Sales");
        let first = report.add_page("Page1");
        let second = report.add_page("Page2");
        let band = report
            .add(first, Component::data_band("Data1", "Orders", 20.0))
            .expect("band");
        report.add(band, Component::text("Text1", Rect::new(0.0, 0.0, 50.0, 10.0), "x"));
        assert_eq!(report.pages(), vec![first, second]);
        assert_eq!(report.find("Data1"), Some(band));
        assert!(report.find("Text1").is_some());
        assert!(report.find("Missing").is_none());
    }
}
