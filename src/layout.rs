use crate::canvas::TextMeasurer;
use crate::component::{Anchor, Component, ComponentId, Dock, ObjectKind, ShiftMode};
use crate::tree::ComponentTree;
use crate::types::{Pt, Rect};

// Tolerance when deciding whether a sibling sits below a grower.
const SHIFT_EPSILON: f32 = 1e-4;

/// Hooks fired around the layout of a band or container.
pub trait LayoutListener {
    fn before_layout(&mut self, _tree: &ComponentTree, _id: ComponentId) {}
    fn after_layout(&mut self, _tree: &ComponentTree, _id: ComponentId) {}
}

#[derive(Debug, Default)]
pub struct NoopLayoutListener;

impl LayoutListener for NoopLayoutListener {}

/// Height `id` wants for its current content.
///
/// Bands and containers lay out their objects first (growth, shift,
/// grow-to-bottom) and report the bottom of their content, limited by their
/// own CanGrow/CanShrink. Text and pictures measure themselves; everything
/// else keeps its height.
pub fn calc_height(
    tree: &mut ComponentTree,
    id: ComponentId,
    measurer: &dyn TextMeasurer,
    listener: &mut dyn LayoutListener,
) -> Pt {
    let Some(component) = tree.get(id) else {
        return Pt::ZERO;
    };
    let bounds = component.base.bounds;
    let is_table = match &component.kind {
        ObjectKind::Text(text) => return text.calc_height(measurer, bounds.width),
        ObjectKind::Picture(picture) => return picture.calc_height(bounds.height),
        ObjectKind::Shape(_) | ObjectKind::Line(_) | ObjectKind::Page(_) => return bounds.height,
        ObjectKind::Table(_) => true,
        ObjectKind::Band(_) | ObjectKind::Container(_) => false,
    };
    if is_table {
        layout_table(tree, id, measurer)
    } else {
        layout_children(tree, id, measurer, listener)
    }
}

fn layout_children(
    tree: &mut ComponentTree,
    id: ComponentId,
    measurer: &dyn TextMeasurer,
    listener: &mut dyn LayoutListener,
) -> Pt {
    listener.before_layout(tree, id);
    let Some(own) = tree.get(id).map(|c| c.base.clone()) else {
        return Pt::ZERO;
    };

    let mut objects = tree.objects(id);
    objects.sort_by(|a, b| {
        let top = |c: &ComponentId| tree.get(*c).map(|c| c.base.bounds.y).unwrap_or(Pt::ZERO);
        top(a)
            .partial_cmp(&top(b))
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let old: Vec<Rect> = objects
        .iter()
        .map(|child| bounds_of(tree, *child))
        .collect();
    let mut heights: Vec<Pt> = old.iter().map(|r| r.height).collect();
    for (k, child) in objects.iter().enumerate() {
        let Some(base) = tree.get(*child).map(|c| c.base.clone()) else {
            continue;
        };
        if !base.visible || !(base.can_grow || base.can_shrink) {
            continue;
        }
        let wanted = calc_height(tree, *child, measurer, listener);
        if (wanted > old[k].height && base.can_grow) || (wanted < old[k].height && base.can_shrink)
        {
            heights[k] = wanted;
        }
    }

    let modes: Vec<ShiftMode> = objects
        .iter()
        .map(|child| {
            tree.get(*child)
                .map(|c| c.base.shift_mode)
                .unwrap_or_default()
        })
        .collect();
    let shifts = compute_shifts(&old, &heights, &modes);

    let mut bottom = Pt::ZERO;
    for (k, child) in objects.iter().enumerate() {
        if let Some(component) = tree.get_mut(*child) {
            component.base.bounds.y = old[k].y + shifts[k];
            component.base.bounds.height = heights[k];
            if component.base.visible {
                bottom = bottom.max(component.base.bounds.bottom());
            }
        }
    }

    let mut height = bottom;
    if !own.can_grow && height > own.bounds.height {
        height = own.bounds.height;
    }
    if !own.can_shrink && height < own.bounds.height {
        height = own.bounds.height;
    }

    for child in &objects {
        if let Some(component) = tree.get_mut(*child) {
            if component.base.grow_to_bottom {
                component.base.bounds.height = (height - component.base.bounds.y).max(Pt::ZERO);
            }
        }
    }
    log::trace!("layout `{}`: height {} -> {}", own.name, own.bounds.height, height);
    listener.after_layout(tree, id);
    height
}

fn bounds_of(tree: &ComponentTree, id: ComponentId) -> Rect {
    tree.get(id).map(|c| c.base.bounds).unwrap_or_default()
}

/// Per-sibling vertical shift caused by earlier siblings changing height.
///
/// `old` must be in Top order. Growth pushes a sibling by the largest single
/// grow, shrink pulls by the largest single shrink, and when both reach the
/// same sibling the fold runs in Top order so the later grower decides.
pub fn compute_shifts(old: &[Rect], heights: &[Pt], modes: &[ShiftMode]) -> Vec<Pt> {
    let n = old.len();
    let mut shifts = vec![Pt::ZERO; n];
    for i in 0..n {
        let shift = heights[i] - old[i].height;
        if shift.is_zero() {
            continue;
        }
        let grower_bottom = old[i].bottom().to_f32();
        for j in (i + 1)..n {
            if old[j].y.to_f32() < grower_bottom - SHIFT_EPSILON {
                continue;
            }
            match modes[j] {
                ShiftMode::Never => continue,
                ShiftMode::WhenOverlapped if !old[i].overlaps_horizontally(&old[j]) => continue,
                _ => {}
            }
            if (shift > Pt::ZERO && shift > shifts[j]) || (shift < Pt::ZERO && shift < shifts[j]) {
                shifts[j] = shift;
            }
        }
    }
    shifts
}

/// Lays out table cells on the grid, growing auto-size rows to their tallest
/// cell. Returns the table height.
fn layout_table(tree: &mut ComponentTree, id: ComponentId, measurer: &dyn TextMeasurer) -> Pt {
    let Some(mut table) = tree.get(id).and_then(|c| match &c.kind {
        ObjectKind::Table(table) => Some(table.clone()),
        _ => None,
    }) else {
        return Pt::ZERO;
    };
    let cells = tree.objects(id);
    for row_index in 0..table.rows.len() {
        if !table.rows[row_index].auto_size {
            continue;
        }
        let mut tallest = Pt::ZERO;
        for (index, cell) in cells.iter().enumerate() {
            let Some((r, c)) = table.cell_position(index) else {
                continue;
            };
            if r != row_index {
                continue;
            }
            let width = table.columns[c].width;
            if let Some(text) = tree.get(*cell).and_then(Component::as_text) {
                tallest = tallest.max(text.calc_height(measurer, width));
            }
        }
        if tallest > Pt::ZERO {
            table.rows[row_index].height = tallest;
        }
    }
    for (index, cell) in cells.iter().enumerate() {
        let Some(rect) = table
            .cell_position(index)
            .and_then(|(r, c)| table.cell_rect(r, c))
        else {
            continue;
        };
        if let Some(component) = tree.get_mut(*cell) {
            component.base.bounds = rect;
        }
    }
    let height = table.height();
    if let Some(component) = tree.get_mut(id) {
        component.base.bounds.width = table.width();
        component.kind = ObjectKind::Table(table);
    }
    height
}

impl ComponentTree {
    /// Resizes `id` and re-runs anchor and dock layout of its objects.
    pub fn resize(&mut self, id: ComponentId, width: Pt, height: Pt) {
        let Some(component) = self.get_mut(id) else {
            return;
        };
        let dx = width - component.base.bounds.width;
        let dy = height - component.base.bounds.height;
        component.base.bounds.width = width;
        component.base.bounds.height = height;
        update_layout(self, id, dx, dy);
    }
}

fn update_layout(tree: &mut ComponentTree, id: ComponentId, dx: Pt, dy: Pt) {
    let Some(parent) = tree.get(id).map(|c| c.base.bounds) else {
        return;
    };
    let mut remaining = Rect {
        x: Pt::ZERO,
        y: Pt::ZERO,
        width: parent.width,
        height: parent.height,
    };
    for child in tree.objects(id) {
        let Some(base) = tree.get(child).map(|c| c.base.clone()) else {
            continue;
        };
        let old = base.bounds;
        let new = match base.dock {
            Dock::None => anchored(old, base.anchor, dx, dy),
            Dock::Top => {
                let rect = Rect {
                    x: remaining.x,
                    y: remaining.y,
                    width: remaining.width,
                    height: old.height,
                };
                remaining.y += old.height;
                remaining.height -= old.height;
                rect
            }
            Dock::Bottom => {
                let rect = Rect {
                    x: remaining.x,
                    y: remaining.bottom() - old.height,
                    width: remaining.width,
                    height: old.height,
                };
                remaining.height -= old.height;
                rect
            }
            Dock::Left => {
                let rect = Rect {
                    x: remaining.x,
                    y: remaining.y,
                    width: old.width,
                    height: remaining.height,
                };
                remaining.x += old.width;
                remaining.width -= old.width;
                rect
            }
            Dock::Right => {
                let rect = Rect {
                    x: remaining.right() - old.width,
                    y: remaining.y,
                    width: old.width,
                    height: remaining.height,
                };
                remaining.width -= old.width;
                rect
            }
            Dock::Fill => remaining,
        };
        if let Some(component) = tree.get_mut(child) {
            component.base.bounds = new;
        }
        let (cdx, cdy) = (new.width - old.width, new.height - old.height);
        if !cdx.is_zero() || !cdy.is_zero() {
            update_layout(tree, child, cdx, cdy);
        }
    }
}

fn anchored(old: Rect, anchor: Anchor, dx: Pt, dy: Pt) -> Rect {
    let mut rect = old;
    match (anchor.contains(Anchor::LEFT), anchor.contains(Anchor::RIGHT)) {
        (true, true) => rect.width += dx,
        (false, true) => rect.x += dx,
        (false, false) => rect.x += dx / 2,
        (true, false) => {}
    }
    match (anchor.contains(Anchor::TOP), anchor.contains(Anchor::BOTTOM)) {
        (true, true) => rect.height += dy,
        (false, true) => rect.y += dy,
        (false, false) => rect.y += dy / 2,
        (true, false) => {}
    }
    rect
}
