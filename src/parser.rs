//! Parses the flat query-string multimap into a normalized [`QueryPlan`].
//!
//! Filter, sort and aggregation clauses use the `<column>__<suffix>` key
//! syntax. Keys without the separator are ignored as a reserved extension
//! surface, except for `page`, `page_size` and `columns`.

use crate::{
    error::{Result, ServiceError},
    profile::{Profile, SemanticType},
};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use std::fmt;

pub const SYNTHETIC_ID: &str = "__id";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Exact,
    Differs,
    Contains,
    In,
    Less,
    Greater,
    StrictlyLess,
    StrictlyGreater,
}

impl FilterOp {
    pub fn suffix(&self) -> &'static str {
        match self {
            FilterOp::Exact => "exact",
            FilterOp::Differs => "differs",
            FilterOp::Contains => "contains",
            FilterOp::In => "in",
            FilterOp::Less => "less",
            FilterOp::Greater => "greater",
            FilterOp::StrictlyLess => "strictly_less",
            FilterOp::StrictlyGreater => "strictly_greater",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggFunc {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

impl AggFunc {
    pub fn as_str(&self) -> &'static str {
        match self {
            AggFunc::Count => "count",
            AggFunc::Sum => "sum",
            AggFunc::Avg => "avg",
            AggFunc::Min => "min",
            AggFunc::Max => "max",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortDirection::Asc => "asc",
            SortDirection::Desc => "desc",
        }
    }
}

/// A scalar validated against the column's semantic type. Date and datetime
/// lexemes are forwarded verbatim so partial dates keep their meaning on the
/// downstream side.
#[derive(Debug, Clone, PartialEq)]
pub enum ScalarValue {
    Text(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Date(String),
    DateTime(String),
}

impl fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScalarValue::Text(v) | ScalarValue::Date(v) | ScalarValue::DateTime(v) => {
                f.write_str(v)
            }
            ScalarValue::Int(v) => write!(f, "{v}"),
            ScalarValue::Float(v) => write!(f, "{v}"),
            ScalarValue::Bool(v) => write!(f, "{v}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FilterClause {
    pub column: String,
    pub op: FilterOp,
    pub values: Vec<ScalarValue>,
}

#[derive(Debug, Clone)]
pub struct SortClause {
    pub column: String,
    pub direction: SortDirection,
}

#[derive(Debug, Clone)]
pub struct Aggregate {
    pub column: String,
    pub func: AggFunc,
}

impl Aggregate {
    /// Result column name, `<column>__<fn>`.
    pub fn alias(&self) -> String {
        format!("{}__{}", self.column, self.func.as_str())
    }
}

#[derive(Debug, Clone, Default)]
pub struct Aggregation {
    pub group_by: Vec<String>,
    pub aggregates: Vec<Aggregate>,
}

#[derive(Debug, Clone)]
pub struct QueryPlan {
    pub filters: Vec<FilterClause>,
    pub sorts: Vec<SortClause>,
    pub projection: Option<Vec<String>>,
    pub aggregation: Option<Aggregation>,
    pub page: u64,
    pub page_size: u64,
}

impl QueryPlan {
    pub fn offset(&self) -> u64 {
        (self.page - 1) * self.page_size
    }
}

/// Suffix → clause kind. The table is static; there is no runtime dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Suffix {
    Sort,
    Filter(FilterOp),
    GroupBy,
    Aggregate(AggFunc),
}

fn lookup_suffix(raw: &str) -> Option<Suffix> {
    match raw {
        "sort" => Some(Suffix::Sort),
        "exact" => Some(Suffix::Filter(FilterOp::Exact)),
        "differs" => Some(Suffix::Filter(FilterOp::Differs)),
        "contains" => Some(Suffix::Filter(FilterOp::Contains)),
        "in" => Some(Suffix::Filter(FilterOp::In)),
        "less" => Some(Suffix::Filter(FilterOp::Less)),
        "greater" => Some(Suffix::Filter(FilterOp::Greater)),
        "strictly_less" => Some(Suffix::Filter(FilterOp::StrictlyLess)),
        "strictly_greater" => Some(Suffix::Filter(FilterOp::StrictlyGreater)),
        "groupby" => Some(Suffix::GroupBy),
        "count" => Some(Suffix::Aggregate(AggFunc::Count)),
        "sum" => Some(Suffix::Aggregate(AggFunc::Sum)),
        "avg" => Some(Suffix::Aggregate(AggFunc::Avg)),
        "min" => Some(Suffix::Aggregate(AggFunc::Min)),
        "max" => Some(Suffix::Aggregate(AggFunc::Max)),
        _ => None,
    }
}

fn suffix_allowed(suffix: Suffix, semantic: SemanticType) -> bool {
    match suffix {
        Suffix::Sort | Suffix::GroupBy => true,
        Suffix::Filter(FilterOp::Exact)
        | Suffix::Filter(FilterOp::Differs)
        | Suffix::Filter(FilterOp::In) => true,
        Suffix::Filter(FilterOp::Contains) => semantic == SemanticType::String,
        Suffix::Filter(FilterOp::Less)
        | Suffix::Filter(FilterOp::Greater)
        | Suffix::Filter(FilterOp::StrictlyLess)
        | Suffix::Filter(FilterOp::StrictlyGreater) => semantic.is_comparable(),
        Suffix::Aggregate(AggFunc::Sum) | Suffix::Aggregate(AggFunc::Avg) => semantic.is_numeric(),
        Suffix::Aggregate(_) => true,
    }
}

/// Suffixes legal on a column of the given type, in documentation order.
pub fn suffixes_for(semantic: SemanticType) -> Vec<&'static str> {
    const ALL: &[&str] = &[
        "exact",
        "differs",
        "contains",
        "in",
        "less",
        "greater",
        "strictly_less",
        "strictly_greater",
        "sort",
        "groupby",
        "count",
        "sum",
        "avg",
        "min",
        "max",
    ];
    ALL.iter()
        .copied()
        .filter(|raw| {
            let suffix = lookup_suffix(raw).expect("static suffix table");
            suffix_allowed(suffix, semantic)
        })
        .collect()
}

pub fn parse(
    pairs: &[(String, String)],
    profile: &Profile,
    page_size_default: u64,
    page_size_max: u64,
) -> Result<QueryPlan> {
    let mut filters = Vec::new();
    let mut sorts = Vec::new();
    let mut projection = None;
    let mut aggregation = Aggregation::default();
    let mut page = 1u64;
    let mut page_size = page_size_default;

    for (key, value) in pairs {
        match key.as_str() {
            "page" => {
                page = value
                    .parse::<u64>()
                    .ok()
                    .filter(|p| *p >= 1)
                    .ok_or_else(|| invalid_value("page", "", value))?;
            }
            "page_size" => {
                page_size = value
                    .parse::<u64>()
                    .ok()
                    .filter(|s| (1..=page_size_max).contains(s))
                    .ok_or_else(|| invalid_value("page_size", "", value))?;
            }
            "columns" => {
                // validated after the loop, once aggregation clauses are known
                projection = Some(value.split(',').map(str::to_string).collect::<Vec<_>>());
            }
            _ => {
                let Some((column, raw_suffix)) = split_key(key) else {
                    // reserved extension surface
                    continue;
                };
                let suffix = lookup_suffix(raw_suffix)
                    .ok_or_else(|| invalid_parameter(column, raw_suffix))?;
                let semantic = profile
                    .semantic_type(column)
                    .ok_or_else(|| invalid_parameter(column, raw_suffix))?;
                if !suffix_allowed(suffix, semantic) {
                    return Err(invalid_parameter(column, raw_suffix));
                }

                match suffix {
                    Suffix::Sort => {
                        let direction = match value.as_str() {
                            "asc" => SortDirection::Asc,
                            "desc" => SortDirection::Desc,
                            _ => return Err(invalid_value(column, raw_suffix, value)),
                        };
                        sorts.push(SortClause {
                            column: column.to_string(),
                            direction,
                        });
                    }
                    Suffix::Filter(op) => {
                        let values = parse_filter_values(column, op, value, semantic)?;
                        filters.push(FilterClause {
                            column: column.to_string(),
                            op,
                            values,
                        });
                    }
                    Suffix::GroupBy => {
                        if !value.is_empty() {
                            return Err(invalid_value(column, raw_suffix, value));
                        }
                        aggregation.group_by.push(column.to_string());
                    }
                    Suffix::Aggregate(func) => {
                        if !value.is_empty() {
                            return Err(invalid_value(column, raw_suffix, value));
                        }
                        aggregation.aggregates.push(Aggregate {
                            column: column.to_string(),
                            func,
                        });
                    }
                }
            }
        }
    }

    let aggregation =
        (!aggregation.group_by.is_empty() || !aggregation.aggregates.is_empty()).then_some(aggregation);

    if aggregation.is_some() {
        // aggregate result columns are not sortable through this surface
        if let Some(sort) = sorts.first() {
            return Err(invalid_parameter(&sort.column, "sort"));
        }
    }

    if let Some(projection) = &projection {
        match &aggregation {
            // the projection must stay within the aggregation output
            Some(aggregation) => {
                let mut allowed: Vec<String> = aggregation.group_by.clone();
                allowed.extend(aggregation.aggregates.iter().map(Aggregate::alias));
                for column in projection {
                    if !allowed.iter().any(|name| name == column) {
                        return Err(invalid_parameter(column, "columns"));
                    }
                }
            }
            None => {
                for column in projection {
                    if column != SYNTHETIC_ID && profile.semantic_type(column).is_none() {
                        return Err(invalid_parameter(column, "columns"));
                    }
                }
            }
        }
    }

    Ok(QueryPlan {
        filters,
        sorts,
        projection,
        aggregation,
        page,
        page_size,
    })
}

/// Splits on the last `__`, so headers that themselves contain `__` keep
/// addressing the right column.
fn split_key(key: &str) -> Option<(&str, &str)> {
    let idx = key.rfind("__")?;
    if idx == 0 {
        return None;
    }
    Some((&key[..idx], &key[idx + 2..]))
}

fn parse_filter_values(
    column: &str,
    op: FilterOp,
    raw: &str,
    semantic: SemanticType,
) -> Result<Vec<ScalarValue>> {
    if op == FilterOp::In {
        return raw
            .split(',')
            .map(|item| parse_scalar(column, op.suffix(), item, semantic))
            .collect();
    }
    Ok(vec![parse_scalar(column, op.suffix(), raw, semantic)?])
}

fn parse_scalar(
    column: &str,
    operator: &str,
    raw: &str,
    semantic: SemanticType,
) -> Result<ScalarValue> {
    let reject = || invalid_value(column, operator, raw);
    match semantic {
        SemanticType::String | SemanticType::Json => Ok(ScalarValue::Text(raw.to_string())),
        SemanticType::Int => raw.parse::<i64>().map(ScalarValue::Int).map_err(|_| reject()),
        SemanticType::Float => raw
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .map(ScalarValue::Float)
            .ok_or_else(reject),
        SemanticType::Bool => match raw {
            "true" | "1" => Ok(ScalarValue::Bool(true)),
            "false" | "0" => Ok(ScalarValue::Bool(false)),
            _ => Err(reject()),
        },
        SemanticType::Date => {
            if is_valid_date_lexeme(raw) {
                Ok(ScalarValue::Date(raw.to_string()))
            } else {
                Err(reject())
            }
        }
        SemanticType::Datetime => {
            if is_valid_datetime_lexeme(raw) {
                Ok(ScalarValue::DateTime(raw.to_string()))
            } else {
                Err(reject())
            }
        }
    }
}

/// Full dates plus the `%Y` / `%Y-%m` prefixes the downstream casts itself.
fn is_valid_date_lexeme(raw: &str) -> bool {
    if NaiveDate::parse_from_str(raw, "%Y-%m-%d").is_ok() {
        return true;
    }
    match raw.split('-').collect::<Vec<_>>().as_slice() {
        [year] => year.len() == 4 && year.parse::<u16>().is_ok(),
        [year, month] => {
            year.len() == 4
                && year.parse::<u16>().is_ok()
                && matches!(month.parse::<u8>(), Ok(1..=12))
        }
        _ => false,
    }
}

fn is_valid_datetime_lexeme(raw: &str) -> bool {
    DateTime::parse_from_rfc3339(raw).is_ok()
        || NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S").is_ok()
        || NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").is_ok()
        || is_valid_date_lexeme(raw)
}

fn invalid_parameter(column: &str, operator: &str) -> ServiceError {
    ServiceError::InvalidParameter {
        column: column.to_string(),
        operator: operator.to_string(),
    }
}

fn invalid_value(column: &str, operator: &str, value: &str) -> ServiceError {
    ServiceError::InvalidValue {
        column: column.to_string(),
        operator: operator.to_string(),
        value: value.to_string(),
    }
}
