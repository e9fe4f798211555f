use crate::totals::Total;
use crate::value::Value;
use std::fmt;

/// Row-producing collaborator. Implementations own the storage; the engine
/// only reads cells by position.
pub trait DataSource: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;
    fn columns(&self) -> &[String];
    fn row_count(&self) -> usize;
    fn value(&self, row: usize, column: usize) -> Value;

    fn column_index(&self, column: &str) -> Option<usize> {
        self.columns()
            .iter()
            .position(|c| c.eq_ignore_ascii_case(column))
    }
}

/// In-memory table.
#[derive(Debug, Clone, Default)]
pub struct TableDataSource {
    name: String,
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

impl TableDataSource {
    pub fn new(name: impl Into<String>, columns: &[&str]) -> Self {
        Self {
            name: name.into(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
            rows: Vec::new(),
        }
    }

    pub fn with_row(mut self, row: Vec<Value>) -> Self {
        self.push_row(row);
        self
    }

    pub fn push_row(&mut self, mut row: Vec<Value>) {
        row.resize(self.columns.len(), Value::Null);
        self.rows.push(row);
    }
}

impl DataSource for TableDataSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn columns(&self) -> &[String] {
        &self.columns
    }

    fn row_count(&self) -> usize {
        self.rows.len()
    }

    fn value(&self, row: usize, column: usize) -> Value {
        self.rows
            .get(row)
            .and_then(|r| r.get(column))
            .cloned()
            .unwrap_or(Value::Null)
    }
}

/// Master-detail link: child rows whose `child_columns` equal the parent
/// row's `parent_columns`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Relation {
    pub name: String,
    pub parent_source: String,
    pub child_source: String,
    pub parent_columns: Vec<String>,
    pub child_columns: Vec<String>,
}

impl Relation {
    pub fn new(
        name: impl Into<String>,
        parent_source: impl Into<String>,
        parent_column: impl Into<String>,
        child_source: impl Into<String>,
        child_column: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            parent_source: parent_source.into(),
            child_source: child_source.into(),
            parent_columns: vec![parent_column.into()],
            child_columns: vec![child_column.into()],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Parameter {
    pub name: String,
    pub value: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SystemVariables {
    pub page: usize,
    pub total_pages: usize,
    pub row: usize,
    pub abs_row: usize,
}

/// A registered source plus its current iteration state.
#[derive(Debug)]
pub(crate) struct BoundSource {
    pub(crate) source: Box<dyn DataSource>,
    // Raw row indices in iteration order.
    pub(crate) rows: Vec<usize>,
    // Hierarchy depth per entry of `rows`, all zero for flat sources.
    pub(crate) levels: Vec<usize>,
    pub(crate) cursor: usize,
    // Raw row the column accessors read from.
    pub(crate) current: Option<usize>,
    pub(crate) initialized: bool,
}

impl BoundSource {
    fn new(source: Box<dyn DataSource>) -> Self {
        Self {
            source,
            rows: Vec::new(),
            levels: Vec::new(),
            cursor: 0,
            current: None,
            initialized: false,
        }
    }

    pub(crate) fn iteration_rows(&self) -> Vec<usize> {
        if self.initialized {
            self.rows.clone()
        } else {
            (0..self.source.row_count()).collect()
        }
    }
}

/// Data sources, relations, parameters, totals and system variables visible
/// to expressions.
#[derive(Debug, Default)]
pub struct Dictionary {
    pub(crate) sources: Vec<BoundSource>,
    relations: Vec<Relation>,
    parameters: Vec<Parameter>,
    pub(crate) totals: Vec<Total>,
    pub(crate) system: SystemVariables,
}

impl Dictionary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a source, replacing one with the same name.
    pub fn register_data(&mut self, source: impl DataSource + 'static) {
        let bound = BoundSource::new(Box::new(source));
        match self.source_index(bound.source.name()) {
            Some(idx) => self.sources[idx] = bound,
            None => self.sources.push(bound),
        }
    }

    pub fn data_source(&self, name: &str) -> Option<&dyn DataSource> {
        self.source_index(name)
            .map(|idx| self.sources[idx].source.as_ref())
    }

    pub(crate) fn source_index(&self, name: &str) -> Option<usize> {
        self.sources
            .iter()
            .position(|s| s.source.name().eq_ignore_ascii_case(name))
    }

    pub fn add_relation(&mut self, relation: Relation) {
        self.relations.push(relation);
    }

    pub fn relations(&self) -> &[Relation] {
        &self.relations
    }

    pub fn relation(&self, name: &str) -> Option<&Relation> {
        self.relations
            .iter()
            .find(|r| r.name.eq_ignore_ascii_case(name))
    }

    pub fn find_relation(&self, parent: &str, child: &str) -> Option<&Relation> {
        self.relations.iter().find(|r| {
            r.parent_source.eq_ignore_ascii_case(parent)
                && r.child_source.eq_ignore_ascii_case(child)
        })
    }

    pub fn set_parameter(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        let name = name.into();
        let value = value.into();
        match self
            .parameters
            .iter_mut()
            .find(|p| p.name.eq_ignore_ascii_case(&name))
        {
            Some(existing) => existing.value = value,
            None => self.parameters.push(Parameter { name, value }),
        }
    }

    pub fn parameter(&self, name: &str) -> Option<&Value> {
        self.parameters
            .iter()
            .find(|p| p.name.eq_ignore_ascii_case(name))
            .map(|p| &p.value)
    }

    pub fn parameters(&self) -> &[Parameter] {
        &self.parameters
    }

    pub fn add_total(&mut self, total: Total) {
        self.totals.push(total);
    }

    pub fn totals(&self) -> &[Total] {
        &self.totals
    }

    pub fn total_value(&self, name: &str) -> Option<Value> {
        self.totals
            .iter()
            .find(|t| t.name.eq_ignore_ascii_case(name))
            .map(Total::value)
    }

    pub fn system(&self) -> &SystemVariables {
        &self.system
    }

    /// Resolves `Source.Column` against the source's current row.
    pub fn column_value(&self, path: &str) -> Option<Value> {
        let mut best: Option<(&BoundSource, &str)> = None;
        for bound in &self.sources {
            let name = bound.source.name();
            let Some(rest) = strip_prefix_ignore_case(path, name) else {
                continue;
            };
            let Some(column) = rest.strip_prefix('.') else {
                continue;
            };
            if best.is_none_or(|(b, _)| b.source.name().len() < name.len()) {
                best = Some((bound, column));
            }
        }
        let (bound, column) = best?;
        let col = bound.source.column_index(column)?;
        Some(match bound.current {
            Some(row) => bound.source.value(row, col),
            None => Value::Null,
        })
    }

    pub fn first(&mut self, source: &str) -> bool {
        self.set_position(source, 0)
    }

    pub fn next(&mut self, source: &str) -> bool {
        let Some(idx) = self.source_index(source) else {
            return false;
        };
        let cursor = self.sources[idx].cursor + 1;
        self.set_position_at(idx, cursor)
    }

    pub fn has_more_rows(&self, source: &str) -> bool {
        self.source_index(source).is_some_and(|idx| {
            let bound = &self.sources[idx];
            bound.cursor < bound.rows.len()
        })
    }

    /// Number of rows in the current iteration (after relation, filter, max rows).
    pub fn row_count(&self, source: &str) -> usize {
        self.source_index(source)
            .map(|idx| self.sources[idx].rows.len())
            .unwrap_or(0)
    }

    pub fn position(&self, source: &str) -> Option<usize> {
        let idx = self.source_index(source)?;
        let bound = &self.sources[idx];
        (bound.cursor < bound.rows.len()).then_some(bound.cursor)
    }

    /// Raw row indices of the current iteration, in order.
    pub fn iteration(&self, source: &str) -> Vec<usize> {
        self.source_index(source)
            .map(|idx| self.sources[idx].rows.clone())
            .unwrap_or_default()
    }

    pub fn current_level(&self, source: &str) -> usize {
        self.source_index(source)
            .and_then(|idx| {
                let bound = &self.sources[idx];
                bound.levels.get(bound.cursor).copied()
            })
            .unwrap_or(0)
    }

    pub fn set_position(&mut self, source: &str, position: usize) -> bool {
        match self.source_index(source) {
            Some(idx) => self.set_position_at(idx, position),
            None => false,
        }
    }

    fn set_position_at(&mut self, idx: usize, position: usize) -> bool {
        let bound = &mut self.sources[idx];
        bound.cursor = position.min(bound.rows.len());
        bound.current = bound.rows.get(bound.cursor).copied();
        bound.current.is_some()
    }
}

fn strip_prefix_ignore_case<'a>(text: &'a str, prefix: &str) -> Option<&'a str> {
    if text.len() < prefix.len() || !text.is_char_boundary(prefix.len()) {
        return None;
    }
    let (head, tail) = text.split_at(prefix.len());
    head.eq_ignore_ascii_case(prefix).then_some(tail)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dictionary() -> Dictionary {
        let mut dict = Dictionary::new();
        dict.register_data(
            TableDataSource::new("Orders", &["Id", "Amount"])
                .with_row(vec![Value::Int(1), Value::Int(10)])
                .with_row(vec![Value::Int(2), Value::Int(20)]),
        );
        dict.register_data(
            TableDataSource::new("Orders.Archive", &["Id"]).with_row(vec![Value::Int(99)]),
        );
        dict
    }

    #[test]
    fn column_value_prefers_longest_source_name() {
        let mut dict = dictionary();
        dict.sources[1].rows = vec![0];
        dict.set_position("Orders.Archive", 0);
        assert_eq!(dict.column_value("Orders.Archive.Id"), Some(Value::Int(99)));
        assert_eq!(dict.column_value("Orders.Id"), Some(Value::Null));
        assert_eq!(dict.column_value("Orders.Nope"), None);
    }

    #[test]
    fn cursor_walks_forward_only() {
        let mut dict = dictionary();
        dict.sources[0].rows = vec![1, 0];
        assert!(dict.first("Orders"));
        assert_eq!(dict.column_value("orders.amount"), Some(Value::Int(20)));
        assert!(dict.next("Orders"));
        assert_eq!(dict.column_value("Orders.Amount"), Some(Value::Int(10)));
        assert!(!dict.next("Orders"));
        assert!(!dict.has_more_rows("Orders"));
    }

    #[test]
    fn parameters_are_case_insensitive_and_replaceable() {
        let mut dict = Dictionary::new();
        dict.set_parameter("Title", "A");
        dict.set_parameter("title", "B");
        assert_eq!(dict.parameters().len(), 1);
        assert_eq!(dict.parameter("TITLE"), Some(&Value::from("B")));
    }
}
