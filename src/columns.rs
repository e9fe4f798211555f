/// Order in which a multi-column data band fills its columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ColumnLayout {
    #[default]
    AcrossThenDown,
    DownThenAcross,
}

impl ColumnLayout {
    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnLayout::AcrossThenDown => "AcrossThenDown",
            ColumnLayout::DownThenAcross => "DownThenAcross",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "AcrossThenDown" => Some(ColumnLayout::AcrossThenDown),
            "DownThenAcross" => Some(ColumnLayout::DownThenAcross),
            _ => None,
        }
    }
}

/// Multi-column layout of a data band. Widths are in millimetres like the
/// page they are laid out on; `width == 0` splits the printable width evenly.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BandColumns {
    pub count: usize,
    pub width: f32,
    pub layout: ColumnLayout,
    pub min_row_count: usize,
}

impl Default for BandColumns {
    fn default() -> Self {
        Self {
            count: 1,
            width: 0.0,
            layout: ColumnLayout::AcrossThenDown,
            min_row_count: 0,
        }
    }
}

impl BandColumns {
    pub fn is_multi_column(&self) -> bool {
        self.count > 1
    }

    pub fn actual_width(&self, printable_width: f32) -> f32 {
        if self.width > 0.0 {
            return self.width;
        }
        printable_width / self.count.max(1) as f32
    }

    /// Left offset of each column relative to the printable area.
    pub fn positions(&self, printable_width: f32) -> Vec<f32> {
        let width = self.actual_width(printable_width);
        (0..self.count.max(1)).map(|i| i as f32 * width).collect()
    }

    /// Rows per column for DownThenAcross: enough to hold `rows`, and never
    /// fewer than `min_row_count`.
    pub fn rows_per_column(&self, rows: usize) -> usize {
        let count = self.count.max(1);
        rows.div_ceil(count).max(self.min_row_count).max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn three_even_columns_on_a4_with_10mm_margins() {
        let columns = BandColumns {
            count: 3,
            ..BandColumns::default()
        };
        let printable = 210.0 - 10.0 - 10.0;
        let width = columns.actual_width(printable);
        assert!((width - 190.0 / 3.0).abs() < 1e-4);
        assert_eq!(columns.positions(printable), vec![0.0, width, 2.0 * width]);
    }

    #[test]
    fn explicit_width_wins_and_rows_per_column_honors_minimum() {
        let columns = BandColumns {
            count: 2,
            width: 50.0,
            layout: ColumnLayout::DownThenAcross,
            min_row_count: 4,
        };
        assert_eq!(columns.actual_width(190.0), 50.0);
        assert_eq!(columns.positions(190.0), vec![0.0, 50.0]);
        assert_eq!(columns.rows_per_column(5), 4);
        assert_eq!(columns.rows_per_column(11), 6);
    }
}
