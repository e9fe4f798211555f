use crate::band::SortSpec;
use crate::data::{Dictionary, Relation};
use crate::error::ReportError;
use crate::evaluator::{DataContext, Evaluator};
use crate::value::Value;
use std::cmp::Ordering;
use std::collections::HashSet;

/// How a data band wants its source iterated.
#[derive(Debug, Clone, Default)]
pub struct InitRequest<'a> {
    /// Band name used in error messages.
    pub component: &'a str,
    pub source: &'a str,
    pub relation: Option<Relation>,
    pub filter: &'a str,
    pub sort: &'a [SortSpec],
    pub collect_child_rows: bool,
    pub max_rows: usize,
    /// `(id column, parent id column)` for tree-shaped sources.
    pub hierarchy: Option<(&'a str, &'a str)>,
}

/// Builds the iteration of `request.source` and rewinds its cursor to before
/// the first row. Returns the number of rows.
///
/// With a relation the candidate rows are the children of the master's
/// current row, or of every master row when `collect_child_rows` is set or
/// the master has no current row. Filter, sort and max rows apply in that
/// order; hierarchical sources are then reordered depth first.
pub async fn init(
    dictionary: &mut Dictionary,
    evaluator: &dyn Evaluator,
    request: &InitRequest<'_>,
) -> Result<usize, ReportError> {
    let idx = dictionary
        .source_index(request.source)
        .ok_or_else(|| ReportError::UnknownDataSource(request.source.to_string()))?;

    let mut rows = match &request.relation {
        Some(relation) => related_rows(dictionary, idx, relation, request)?,
        None => (0..dictionary.sources[idx].source.row_count()).collect(),
    };

    let filter = request.filter.trim();
    if !filter.is_empty() {
        let mut kept = Vec::with_capacity(rows.len());
        for row in rows {
            dictionary.sources[idx].current = Some(row);
            let context = DataContext::new(dictionary);
            let value = evaluator
                .calc_async(filter, &context)
                .await
                .map_err(|err| ReportError::expression(request.component, filter, err))?;
            if value.is_truthy() {
                kept.push(row);
            }
        }
        rows = kept;
    }

    if !request.sort.is_empty() {
        let mut keyed = Vec::with_capacity(rows.len());
        for row in rows {
            dictionary.sources[idx].current = Some(row);
            let mut keys = Vec::with_capacity(request.sort.len());
            for spec in request.sort {
                let context = DataContext::new(dictionary);
                let key = evaluator
                    .calc_async(&spec.expression, &context)
                    .await
                    .map_err(|err| {
                        ReportError::expression(request.component, &spec.expression, err)
                    })?;
                keys.push(key);
            }
            keyed.push((row, keys));
        }
        keyed.sort_by(|(_, a), (_, b)| compare_keys(a, b, request.sort));
        rows = keyed.into_iter().map(|(row, _)| row).collect();
    }

    let mut levels = vec![0; rows.len()];
    if let Some((id_column, parent_column)) = request.hierarchy {
        (rows, levels) = order_hierarchy(dictionary, idx, &rows, id_column, parent_column)
            .ok_or_else(|| {
                ReportError::configuration(
                    request.component,
                    format!("unknown hierarchy column `{id_column}` or `{parent_column}`"),
                )
            })?;
    }

    if request.max_rows > 0 && rows.len() > request.max_rows {
        rows.truncate(request.max_rows);
        levels.truncate(request.max_rows);
    }

    let bound = &mut dictionary.sources[idx];
    bound.rows = rows;
    bound.levels = levels;
    bound.cursor = 0;
    bound.current = None;
    bound.initialized = true;
    log::debug!(
        "init `{}` for `{}`: {} rows",
        request.source,
        request.component,
        bound.rows.len()
    );
    Ok(bound.rows.len())
}

/// Forgets every source's iteration so the next pass starts from raw data.
pub fn reset_sources(dictionary: &mut Dictionary) {
    for bound in &mut dictionary.sources {
        bound.rows.clear();
        bound.levels.clear();
        bound.cursor = 0;
        bound.current = None;
        bound.initialized = false;
    }
}

fn compare_keys(a: &[Value], b: &[Value], specs: &[SortSpec]) -> Ordering {
    for ((x, y), spec) in a.iter().zip(b).zip(specs) {
        let ordering = x.sort_cmp(y);
        let ordering = if spec.descending {
            ordering.reverse()
        } else {
            ordering
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

fn related_rows(
    dictionary: &Dictionary,
    child_idx: usize,
    relation: &Relation,
    request: &InitRequest<'_>,
) -> Result<Vec<usize>, ReportError> {
    let parent_idx = dictionary
        .source_index(&relation.parent_source)
        .ok_or_else(|| ReportError::UnknownDataSource(relation.parent_source.clone()))?;
    let parent = &dictionary.sources[parent_idx];
    let child = &dictionary.sources[child_idx];

    let missing = |column: &str| {
        ReportError::configuration(
            request.component,
            format!("relation `{}` names unknown column `{column}`", relation.name),
        )
    };
    let parent_columns = relation
        .parent_columns
        .iter()
        .map(|c| parent.source.column_index(c).ok_or_else(|| missing(c)))
        .collect::<Result<Vec<_>, _>>()?;
    let child_columns = relation
        .child_columns
        .iter()
        .map(|c| child.source.column_index(c).ok_or_else(|| missing(c)))
        .collect::<Result<Vec<_>, _>>()?;

    let masters = match parent.current {
        Some(row) if !request.collect_child_rows => vec![row],
        _ => parent.iteration_rows(),
    };

    let mut seen = HashSet::new();
    let mut rows = Vec::new();
    for master in masters {
        let keys: Vec<Value> = parent_columns
            .iter()
            .map(|col| parent.source.value(master, *col))
            .collect();
        for row in 0..child.source.row_count() {
            let matches = child_columns
                .iter()
                .zip(&keys)
                .all(|(col, key)| child.source.value(row, *col).loose_eq(key));
            if matches && seen.insert(row) {
                rows.push(row);
            }
        }
    }
    Ok(rows)
}

fn order_hierarchy(
    dictionary: &Dictionary,
    idx: usize,
    rows: &[usize],
    id_column: &str,
    parent_column: &str,
) -> Option<(Vec<usize>, Vec<usize>)> {
    let source = &dictionary.sources[idx].source;
    let id_col = source.column_index(id_column)?;
    let parent_col = source.column_index(parent_column)?;
    let ids: Vec<Value> = rows.iter().map(|r| source.value(*r, id_col)).collect();
    let parents: Vec<Value> = rows.iter().map(|r| source.value(*r, parent_col)).collect();

    let is_root = |k: usize| parents[k].is_null() || !ids.iter().any(|id| id.loose_eq(&parents[k]));
    let mut visited = vec![false; rows.len()];
    let mut ordered = Vec::with_capacity(rows.len());
    let mut levels = Vec::with_capacity(rows.len());

    let mut stack: Vec<(usize, usize)> = (0..rows.len())
        .filter(|k| is_root(*k))
        .rev()
        .map(|k| (k, 0))
        .collect();
    loop {
        while let Some((k, level)) = stack.pop() {
            if visited[k] {
                continue;
            }
            visited[k] = true;
            ordered.push(rows[k]);
            levels.push(level);
            for child in (0..rows.len()).rev() {
                if !visited[child] && !parents[child].is_null() && parents[child].loose_eq(&ids[k]) {
                    stack.push((child, level + 1));
                }
            }
        }
        // Rows caught in a parent cycle never reach a root; start them at the top.
        match visited.iter().position(|v| !v) {
            Some(k) => stack.push((k, 0)),
            None => break,
        }
    }
    Some((ordered, levels))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::TableDataSource;
    use crate::evaluator::ColumnEvaluator;

    fn dictionary() -> Dictionary {
        let mut dict = Dictionary::new();
        dict.register_data(
            TableDataSource::new("Customers", &["Id", "Name"])
                .with_row(vec![1.into(), "Ann".into()])
                .with_row(vec![2.into(), "Bob".into()]),
        );
        dict.register_data(
            TableDataSource::new("Orders", &["Id", "CustomerId", "Amount"])
                .with_row(vec![10.into(), 2.into(), 5.into()])
                .with_row(vec![11.into(), 1.into(), 30.into()])
                .with_row(vec![12.into(), 2.into(), 20.into()])
                .with_row(vec![13.into(), 1.into(), 7.into()]),
        );
        dict.add_relation(Relation::new(
            "CustomerOrders",
            "Customers",
            "Id",
            "Orders",
            "CustomerId",
        ));
        dict
    }

    fn related(dict: &Dictionary, collect: bool) -> InitRequest<'static> {
        InitRequest {
            component: "Data2",
            source: "Orders",
            relation: dict.relation("CustomerOrders").cloned(),
            collect_child_rows: collect,
            ..InitRequest::default()
        }
    }

    #[test]
    fn children_follow_the_current_master_row() {
        let mut dict = dictionary();
        let request = related(&dict, false);
        pollster::block_on(init(&mut dict, &ColumnEvaluator, &InitRequest {
            component: "Data1",
            source: "Customers",
            ..InitRequest::default()
        }))
        .expect("customers");

        let mut emitted = Vec::new();
        dict.first("Customers");
        while dict.has_more_rows("Customers") {
            emitted.push(dict.column_value("Customers.Id").expect("id").to_string());
            pollster::block_on(init(&mut dict, &ColumnEvaluator, &request)).expect("orders");
            dict.first("Orders");
            while dict.has_more_rows("Orders") {
                emitted.push(dict.column_value("Orders.Id").expect("id").to_string());
                dict.next("Orders");
            }
            dict.next("Customers");
        }
        assert_eq!(emitted, vec!["1", "11", "13", "2", "10", "12"]);
    }

    #[test]
    fn collect_child_rows_concatenates_every_master() {
        let mut dict = dictionary();
        let request = related(&dict, true);
        dict.first("Customers");
        pollster::block_on(init(&mut dict, &ColumnEvaluator, &request)).expect("orders");
        assert_eq!(dict.iteration("Orders"), vec![1, 3, 0, 2]);
    }

    #[test]
    fn master_without_current_row_yields_all_children() {
        let mut dict = dictionary();
        let request = related(&dict, false);
        let count = pollster::block_on(init(&mut dict, &ColumnEvaluator, &request)).expect("init");
        assert_eq!(count, 4);
    }

    #[test]
    fn filter_then_sort_then_max_rows() {
        let mut dict = dictionary();
        let sort = [SortSpec::new("Orders.Amount", true)];
        let request = InitRequest {
            component: "Data1",
            source: "Orders",
            filter: "Orders.Amount > 5",
            sort: &sort,
            max_rows: 2,
            ..InitRequest::default()
        };
        let count = pollster::block_on(init(&mut dict, &ColumnEvaluator, &request)).expect("init");
        assert_eq!(count, 2);
        assert_eq!(dict.iteration("Orders"), vec![1, 2]);
        assert_eq!(dict.position("Orders"), Some(0));
        assert!(dict.column_value("Orders.Id").expect("column").is_null());
    }

    #[test]
    fn failing_filter_names_the_band_and_expression() {
        let mut dict = dictionary();
        let request = InitRequest {
            component: "Data1",
            source: "Orders",
            filter: "Missing > 1",
            ..InitRequest::default()
        };
        let err = pollster::block_on(init(&mut dict, &ColumnEvaluator, &request))
            .expect_err("unknown identifier");
        assert!(matches!(
            err,
            ReportError::Expression { ref component, ref expression, .. }
                if component == "Data1" && expression == "Missing > 1"
        ));
    }

    #[test]
    fn unknown_source_is_reported() {
        let mut dict = dictionary();
        let request = InitRequest {
            component: "Data1",
            source: "Nope",
            ..InitRequest::default()
        };
        let err = pollster::block_on(init(&mut dict, &ColumnEvaluator, &request))
            .expect_err("unknown");
        assert!(matches!(err, ReportError::UnknownDataSource(name) if name == "Nope"));
    }

    #[test]
    fn hierarchy_is_depth_first_with_levels() {
        let mut dict = Dictionary::new();
        dict.register_data(
            TableDataSource::new("Tree", &["Id", "Parent"])
                .with_row(vec![2.into(), 1.into()])
                .with_row(vec![1.into(), Value::Null])
                .with_row(vec![3.into(), 2.into()])
                .with_row(vec![4.into(), Value::Null])
                .with_row(vec![5.into(), 1.into()]),
        );
        let request = InitRequest {
            component: "Data1",
            source: "Tree",
            hierarchy: Some(("Id", "Parent")),
            ..InitRequest::default()
        };
        pollster::block_on(init(&mut dict, &ColumnEvaluator, &request)).expect("init");
        assert_eq!(dict.iteration("Tree"), vec![1, 0, 2, 4, 3]);
        let mut levels = Vec::new();
        dict.first("Tree");
        while dict.has_more_rows("Tree") {
            levels.push(dict.current_level("Tree"));
            dict.next("Tree");
        }
        assert_eq!(levels, vec![0, 1, 2, 1, 0]);
    }

    #[test]
    fn reset_returns_sources_to_raw_rows() {
        let mut dict = dictionary();
        let request = InitRequest {
            component: "Data1",
            source: "Orders",
            max_rows: 1,
            ..InitRequest::default()
        };
        pollster::block_on(init(&mut dict, &ColumnEvaluator, &request)).expect("init");
        reset_sources(&mut dict);
        assert_eq!(dict.row_count("Orders"), 0);
        assert!(!dict.sources[1].initialized);
        assert_eq!(dict.sources[1].iteration_rows(), vec![0, 1, 2, 3]);
    }
}
