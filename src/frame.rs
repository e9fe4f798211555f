use crate::prepared::{BandInstance, PreparedPage};
use crate::types::{Pt, Rect};

pub enum AddResult {
    Placed,
    /// The first part was placed; the rest continues on the next page.
    Split(BandInstance),
    Overflow(BandInstance),
}

/// The free vertical space of a page column that bands stack into.
#[derive(Debug, Clone)]
pub struct Frame {
    rect: Rect,
    cursor_y: Pt,
    // Space kept free at the bottom for the column and page footers.
    reserved: Pt,
    // Cursor position after the page-start bands; the frame counts as empty
    // until something prints below it.
    content_start: Pt,
}

impl Frame {
    pub fn new(rect: Rect) -> Self {
        Self {
            rect,
            cursor_y: Pt::ZERO,
            reserved: Pt::ZERO,
            content_start: Pt::ZERO,
        }
    }

    pub fn rect(&self) -> Rect {
        self.rect
    }

    pub fn cursor_y(&self) -> Pt {
        self.cursor_y
    }

    /// Absolute y of the next band.
    pub fn current_y(&self) -> Pt {
        self.rect.y + self.cursor_y
    }

    pub fn set_cursor_y(&mut self, y: Pt) {
        self.cursor_y = y.max(Pt::ZERO);
    }

    pub fn reserve(&mut self, height: Pt) {
        self.reserved += height;
    }

    pub fn release(&mut self, height: Pt) {
        self.reserved = (self.reserved - height).max(Pt::ZERO);
    }

    pub fn reserved(&self) -> Pt {
        self.reserved
    }

    pub fn mark_content_start(&mut self) {
        self.content_start = self.cursor_y;
    }

    pub fn remaining_height(&self) -> Pt {
        (self.rect.height - self.reserved - self.cursor_y).max(Pt::ZERO)
    }

    pub fn is_empty(&self) -> bool {
        self.cursor_y <= self.content_start
    }

    pub fn fits(&self, height: Pt) -> bool {
        height <= self.remaining_height()
    }

    /// Stacks `band` at the cursor, splitting or overflowing it when it does
    /// not fit. `x` is the absolute left edge of the band.
    pub fn add(&mut self, band: BandInstance, x: Pt, page: &mut PreparedPage) -> AddResult {
        let avail = self.remaining_height();
        if band.height <= avail {
            self.place(&band, x, page);
            return AddResult::Placed;
        }

        if band.can_break && avail > Pt::ZERO {
            if let Some((first, second)) = band.split_at(avail) {
                self.place(&first, x, page);
                return AddResult::Split(second);
            }
        }

        // A band taller than an empty page would never fit anywhere; print it
        // here clipped so pagination keeps moving.
        if self.is_empty() {
            self.place(&band, x, page);
            self.cursor_y = self.rect.height - self.reserved;
            return AddResult::Placed;
        }

        AddResult::Overflow(band)
    }

    fn place(&mut self, band: &BandInstance, x: Pt, page: &mut PreparedPage) {
        let y = self.current_y();
        page.objects.extend(band.placed_at(x, y));
        self.cursor_y += band.height;
    }

    /// Places `band` at absolute `y` without moving the cursor.
    pub fn place_at(&self, band: &BandInstance, x: Pt, y: Pt, page: &mut PreparedPage) {
        page.objects.extend(band.placed_at(x, y));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prepared::{PreparedContent, PreparedObject};
    use crate::style::{Border, Fill};
    use crate::types::{Margins, Size};

    fn band(name: &str, height: i32, can_break: bool) -> BandInstance {
        let height = Pt::from_i32(height);
        BandInstance {
            name: name.to_string(),
            type_name: "DataBand",
            height,
            objects: vec![PreparedObject {
                name: name.to_string(),
                bounds: Rect {
                    x: Pt::ZERO,
                    y: Pt::ZERO,
                    width: Pt::from_i32(100),
                    height,
                },
                border: Border::default(),
                fill: Fill::None,
                content: PreparedContent::Band {
                    type_name: "DataBand",
                    repeated: false,
                },
                depth: 0,
                can_break,
            }],
            can_break,
            repeated: false,
        }
    }

    fn page() -> PreparedPage {
        PreparedPage::new(Size::from_mm(210.0, 297.0), Margins::default(), 1)
    }

    #[test]
    fn bands_stack_until_the_frame_is_full() {
        let mut frame = Frame::new(Rect::new(10.0, 20.0, 100.0, 50.0));
        frame.reserve(Pt::from_i32(10));
        let mut page = page();
        assert!(matches!(
            frame.add(band("A", 30, false), Pt::from_i32(10), &mut page),
            AddResult::Placed
        ));
        assert_eq!(page.objects[0].bounds.y, Pt::from_i32(20));
        let overflow = frame.add(band("B", 20, false), Pt::from_i32(10), &mut page);
        assert!(matches!(overflow, AddResult::Overflow(ref b) if b.name == "B"));
        assert_eq!(frame.remaining_height(), Pt::from_i32(10));
    }

    #[test]
    fn oversized_band_is_placed_on_an_empty_frame() {
        let mut frame = Frame::new(Rect::new(0.0, 0.0, 100.0, 50.0));
        frame.set_cursor_y(Pt::from_i32(5));
        frame.mark_content_start();
        let mut page = page();
        assert!(matches!(
            frame.add(band("Huge", 80, false), Pt::ZERO, &mut page),
            AddResult::Placed
        ));
        assert_eq!(frame.remaining_height(), Pt::ZERO);
        assert!(!frame.is_empty());
    }
}
