use crate::band::BandKind;
use crate::canvas::TextMeasurer;
use crate::component::{Component, ComponentId, ObjectKind};
use crate::types::Rect;
use slotmap::SlotMap;

#[derive(Debug, Clone)]
struct Node {
    parent: Option<ComponentId>,
    children: Vec<ComponentId>,
    component: Component,
}

/// Owns every component of a report. Children are listed in z-order; band
/// slots (headers, footers, details, child bands) are children too, so
/// removing a band removes everything attached to it.
#[derive(Debug, Clone, Default)]
pub struct ComponentTree {
    nodes: SlotMap<ComponentId, Node>,
    roots: Vec<ComponentId>,
}

/// Snapshot of a band (or object) and the objects inside it, taken before a
/// band prints and put back afterwards.
#[derive(Debug, Clone)]
pub struct SavedState {
    entries: Vec<(ComponentId, Component)>,
}

impl ComponentTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, id: ComponentId) -> bool {
        self.nodes.contains_key(id)
    }

    /// Adds a parentless component (a report page).
    pub fn insert_root(&mut self, component: Component) -> ComponentId {
        let id = self.nodes.insert(Node {
            parent: None,
            children: Vec::new(),
            component,
        });
        self.roots.push(id);
        id
    }

    pub fn roots(&self) -> &[ComponentId] {
        &self.roots
    }

    pub fn get(&self, id: ComponentId) -> Option<&Component> {
        self.nodes.get(id).map(|node| &node.component)
    }

    pub fn get_mut(&mut self, id: ComponentId) -> Option<&mut Component> {
        self.nodes.get_mut(id).map(|node| &mut node.component)
    }

    pub fn parent(&self, id: ComponentId) -> Option<ComponentId> {
        self.nodes.get(id).and_then(|node| node.parent)
    }

    pub fn children(&self, id: ComponentId) -> &[ComponentId] {
        self.nodes
            .get(id)
            .map(|node| node.children.as_slice())
            .unwrap_or(&[])
    }

    /// Report objects directly inside `id`, in z-order. Attached bands are
    /// excluded.
    pub fn objects(&self, id: ComponentId) -> Vec<ComponentId> {
        self.children(id)
            .iter()
            .copied()
            .filter(|child| self.get(*child).is_some_and(Component::is_object))
            .collect()
    }

    /// Attaches `component` under `parent` if the parent accepts it.
    ///
    /// Band children land in their slot (header, footer, detail list, child,
    /// nested group...). Objects go into generic containment on bands,
    /// containers and tables. Anything else is rejected and `None` returned.
    pub fn add_child(&mut self, parent: ComponentId, component: Component) -> Option<ComponentId> {
        let parent_component = self.get(parent)?;
        if !accepts(parent_component, &component) {
            log::warn!(
                "`{}` ({}) does not accept `{}` ({})",
                parent_component.name(),
                parent_component.type_name(),
                component.name(),
                component.type_name()
            );
            return None;
        }
        let id = self.nodes.insert(Node {
            parent: Some(parent),
            children: Vec::new(),
            component,
        });
        if let Some(node) = self.nodes.get_mut(parent) {
            node.children.push(id);
        }
        self.attach_slot(parent, id);
        Some(id)
    }

    fn attach_slot(&mut self, parent: ComponentId, id: ComponentId) {
        let Some(kind) = self
            .get(id)
            .and_then(Component::as_band)
            .map(|band| band.kind.clone())
        else {
            return;
        };
        let Some(parent_component) = self.get_mut(parent) else {
            return;
        };
        match &mut parent_component.kind {
            ObjectKind::Page(page) => match kind {
                BandKind::ReportTitle => page.title = Some(id),
                BandKind::ReportSummary => page.summary = Some(id),
                BandKind::PageHeader => page.page_header = Some(id),
                BandKind::PageFooter => page.page_footer = Some(id),
                BandKind::ColumnHeader => page.column_header = Some(id),
                BandKind::ColumnFooter => page.column_footer = Some(id),
                BandKind::Overlay => page.overlays.push(id),
                _ => page.bands.push(id),
            },
            ObjectKind::Band(band) => {
                if matches!(kind, BandKind::Child) {
                    band.child = Some(id);
                    return;
                }
                match &mut band.kind {
                    BandKind::Data(data) => match kind {
                        BandKind::DataHeader => data.header = Some(id),
                        BandKind::DataFooter => data.footer = Some(id),
                        _ => data.details.push(id),
                    },
                    BandKind::GroupHeader(group) => match kind {
                        BandKind::GroupHeader(_) => group.nested_group = Some(id),
                        BandKind::Data(_) => group.data = Some(id),
                        BandKind::GroupFooter => group.group_footer = Some(id),
                        BandKind::DataHeader => group.header = Some(id),
                        _ => group.footer = Some(id),
                    },
                    _ => {}
                }
            }
            _ => {}
        }
    }

    /// Removes `id` with its whole subtree. Break links pointing into the
    /// removed subtree are cleared.
    pub fn remove(&mut self, id: ComponentId) -> Option<Component> {
        if !self.contains(id) {
            return None;
        }
        let mut doomed = Vec::new();
        self.collect_descendants(id, &mut doomed);
        if let Some(parent) = self.parent(id) {
            if let Some(node) = self.nodes.get_mut(parent) {
                node.children.retain(|child| *child != id);
                match &mut node.component.kind {
                    ObjectKind::Page(page) => page.detach(id),
                    ObjectKind::Band(band) => band.detach(id),
                    _ => {}
                }
            }
        }
        self.roots.retain(|root| *root != id);
        for child in &doomed {
            self.nodes.remove(*child);
        }
        let removed = self.nodes.remove(id).map(|node| node.component);
        for node in self.nodes.values_mut() {
            if node
                .component
                .base
                .break_to
                .is_some_and(|target| target == id || doomed.contains(&target))
            {
                node.component.base.break_to = None;
            }
        }
        removed
    }

    fn collect_descendants(&self, id: ComponentId, out: &mut Vec<ComponentId>) {
        for child in self.children(id) {
            self.collect_descendants(*child, out);
            out.push(*child);
        }
    }

    /// Pre-order list of `id` and everything below it.
    pub fn descendants(&self, id: ComponentId) -> Vec<ComponentId> {
        let mut out = Vec::new();
        if self.contains(id) {
            self.preorder(id, &mut out);
        }
        out
    }

    fn preorder(&self, id: ComponentId, out: &mut Vec<ComponentId>) {
        out.push(id);
        for child in self.children(id) {
            self.preorder(*child, out);
        }
    }

    pub fn find_by_name(&self, name: &str) -> Option<ComponentId> {
        self.roots
            .iter()
            .flat_map(|root| self.descendants(*root))
            .find(|id| self.get(*id).is_some_and(|c| c.name() == name))
    }

    /// Own bounds offset by every ancestor's position.
    pub fn absolute_bounds(&self, id: ComponentId) -> Option<Rect> {
        let mut rect = self.get(id)?.base.bounds;
        let mut current = self.parent(id);
        while let Some(ancestor) = current {
            let bounds = self.get(ancestor)?.base.bounds;
            rect = rect.translated(bounds.x, bounds.y);
            current = self.parent(ancestor);
        }
        Some(rect)
    }

    /// Points `source`'s overflow at `target`. Both must exist.
    pub fn set_break_to(&mut self, source: ComponentId, target: Option<ComponentId>) -> bool {
        if target.is_some_and(|t| !self.contains(t)) {
            return false;
        }
        match self.get_mut(source) {
            Some(component) => {
                component.base.break_to = target;
                true
            }
            None => false,
        }
    }

    /// Saves `id` and the objects inside it. Attached bands are not included;
    /// they save their own state when they print.
    pub fn save_state(&self, id: ComponentId) -> SavedState {
        let mut entries = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            let Some(component) = self.get(current) else {
                continue;
            };
            entries.push((current, component.clone()));
            stack.extend(self.objects(current));
        }
        SavedState { entries }
    }

    pub fn restore_state(&mut self, saved: SavedState) {
        for (id, component) in saved.entries {
            if let Some(node) = self.nodes.get_mut(id) {
                node.component = component;
            }
        }
    }

    /// Moves content that does not fit `source` into its `break_to` target.
    ///
    /// Only components of the same concrete type exchange content; anything
    /// else is a no-op returning `false`. Returns whether the source still
    /// has content of its own.
    pub fn break_component(&mut self, source: ComponentId, measurer: &dyn TextMeasurer) -> bool {
        let Some(target) = self.get(source).and_then(|c| c.base.break_to) else {
            return false;
        };
        if target == source {
            return false;
        }
        let Some([src, dst]) = self.nodes.get_disjoint_mut([source, target]) else {
            return false;
        };
        let bounds = src.component.base.bounds;
        match (&mut src.component.kind, &mut dst.component.kind) {
            (ObjectKind::Text(from), ObjectKind::Text(to)) => {
                from.break_into(to, measurer, bounds.width, bounds.height)
            }
            (from, to) => {
                if std::mem::discriminant(from) != std::mem::discriminant(to) {
                    log::debug!(
                        "break from `{}` to `{}` skipped: different component types",
                        src.component.base.name,
                        dst.component.base.name
                    );
                }
                false
            }
        }
    }
}

fn accepts(parent: &Component, child: &Component) -> bool {
    match (&parent.kind, &child.kind) {
        (_, ObjectKind::Page(_)) => false,
        (ObjectKind::Page(page), ObjectKind::Band(band)) => match band.kind {
            BandKind::ReportTitle => page.title.is_none(),
            BandKind::ReportSummary => page.summary.is_none(),
            BandKind::PageHeader => page.page_header.is_none(),
            BandKind::PageFooter => page.page_footer.is_none(),
            BandKind::ColumnHeader => page.column_header.is_none(),
            BandKind::ColumnFooter => page.column_footer.is_none(),
            BandKind::Data(_) | BandKind::GroupHeader(_) | BandKind::Overlay => true,
            BandKind::DataHeader
            | BandKind::DataFooter
            | BandKind::GroupFooter
            | BandKind::Child => false,
        },
        (ObjectKind::Page(_), _) => false,
        (ObjectKind::Band(parent_band), ObjectKind::Band(band)) => {
            if matches!(band.kind, BandKind::Child) {
                return parent_band.child.is_none();
            }
            match (&parent_band.kind, &band.kind) {
                (BandKind::Data(data), BandKind::DataHeader) => data.header.is_none(),
                (BandKind::Data(data), BandKind::DataFooter) => data.footer.is_none(),
                (BandKind::Data(_), BandKind::Data(_) | BandKind::GroupHeader(_)) => true,
                (BandKind::GroupHeader(group), BandKind::GroupHeader(_)) => {
                    group.nested_group.is_none() && group.data.is_none()
                }
                (BandKind::GroupHeader(group), BandKind::Data(_)) => {
                    group.data.is_none() && group.nested_group.is_none()
                }
                (BandKind::GroupHeader(group), BandKind::GroupFooter) => {
                    group.group_footer.is_none()
                }
                (BandKind::GroupHeader(group), BandKind::DataHeader) => group.header.is_none(),
                (BandKind::GroupHeader(group), BandKind::DataFooter) => group.footer.is_none(),
                _ => false,
            }
        }
        (ObjectKind::Band(_) | ObjectKind::Container(_), kind) => {
            !matches!(kind, ObjectKind::Band(_))
        }
        (ObjectKind::Table(_), ObjectKind::Text(_)) => true,
        _ => false,
    }
}
