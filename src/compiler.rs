//! Lowers a validated [`QueryPlan`] to the downstream table service's wire
//! syntax: filter predicates, `order`, `select` (plain or aggregated) as query
//! parameters, and the row window as a `Range` header.

use crate::parser::{Aggregation, FilterOp, QueryPlan, ScalarValue, SYNTHETIC_ID};

#[derive(Debug, Clone)]
pub struct CompiledQuery {
    pub params: Vec<(String, String)>,
    pub offset: u64,
    pub limit: u64,
}

impl CompiledQuery {
    /// Half-open row window `[offset, offset+limit)` in the downstream's
    /// inclusive `first-last` convention.
    pub fn range(&self) -> String {
        format!("{}-{}", self.offset, self.offset + self.limit - 1)
    }

    #[cfg(test)]
    fn query_string(&self) -> String {
        self.params
            .iter()
            .map(|(key, value)| format!("{key}={value}"))
            .collect::<Vec<_>>()
            .join("&")
    }
}

/// Quotes a column name so the downstream treats it as an identifier, never
/// as an expression. Escaping is injective: backslashes are doubled before
/// embedded quotes are escaped.
pub fn escape_column(name: &str) -> String {
    format!("\"{}\"", name.replace('\\', "\\\\").replace('"', "\\\""))
}

pub fn compile(plan: &QueryPlan) -> CompiledQuery {
    compile_window(plan, plan.offset(), plan.page_size)
}

/// Same clauses, explicit window. The export encoders walk the full result
/// set batch by batch through this entry point.
pub fn compile_window(plan: &QueryPlan, offset: u64, limit: u64) -> CompiledQuery {
    let mut params = Vec::new();

    for filter in &plan.filters {
        params.push((escape_column(&filter.column), predicate(filter.op, &filter.values)));
    }

    if let Some(aggregation) = &plan.aggregation {
        params.push(("select".to_string(), aggregated_select(aggregation)));
    } else if let Some(projection) = &plan.projection {
        let select = projection
            .iter()
            .map(|column| escape_column(column))
            .collect::<Vec<_>>()
            .join(",");
        params.push(("select".to_string(), select));
    }

    if !plan.sorts.is_empty() {
        let mut terms = plan
            .sorts
            .iter()
            .map(|sort| format!("{}.{}", escape_column(&sort.column), sort.direction.as_str()))
            .collect::<Vec<_>>();
        // deterministic paging needs a total order
        terms.push(format!("{SYNTHETIC_ID}.asc"));
        params.push(("order".to_string(), terms.join(",")));
    } else if plan.aggregation.is_none() {
        params.push(("order".to_string(), format!("{SYNTHETIC_ID}.asc")));
    }

    CompiledQuery {
        params,
        offset,
        limit,
    }
}

/// The auxiliary group-count request for aggregated plans: same filters, a
/// one-row window, and an aggregated projection whose exact total is the
/// number of groups. `None` when the plan has no grouping (single-row result).
pub fn compile_group_probe(plan: &QueryPlan) -> Option<CompiledQuery> {
    let aggregation = plan.aggregation.as_ref()?;
    let first = aggregation.group_by.first()?;

    let mut params: Vec<(String, String)> = plan
        .filters
        .iter()
        .map(|filter| (escape_column(&filter.column), predicate(filter.op, &filter.values)))
        .collect();

    let mut items: Vec<String> = aggregation
        .group_by
        .iter()
        .map(|column| escape_column(column))
        .collect();
    items.push(format!(
        "{}:{}.count()",
        escape_column(&format!("{first}__count")),
        escape_column(first)
    ));
    params.push(("select".to_string(), items.join(",")));

    Some(CompiledQuery {
        params,
        offset: 0,
        limit: 1,
    })
}

fn predicate(op: FilterOp, values: &[ScalarValue]) -> String {
    match op {
        FilterOp::Exact => format!("eq.{}", values[0]),
        FilterOp::Differs => format!("neq.{}", values[0]),
        FilterOp::Contains => format!("ilike.*{}*", values[0]),
        FilterOp::In => {
            let list = values
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(",");
            format!("in.({list})")
        }
        FilterOp::Less => format!("lte.{}", values[0]),
        FilterOp::Greater => format!("gte.{}", values[0]),
        FilterOp::StrictlyLess => format!("lt.{}", values[0]),
        FilterOp::StrictlyGreater => format!("gt.{}", values[0]),
    }
}

fn aggregated_select(aggregation: &Aggregation) -> String {
    let mut items: Vec<String> = aggregation
        .group_by
        .iter()
        .map(|column| escape_column(column))
        .collect();
    for aggregate in &aggregation.aggregates {
        items.push(format!(
            "{}:{}.{}()",
            escape_column(&aggregate.alias()),
            escape_column(&aggregate.column),
            aggregate.func.as_str()
        ));
    }
    items.join(",")
}
