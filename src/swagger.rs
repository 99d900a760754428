//! Per-resource OpenAPI document, derived from the column profile. One query
//! parameter per `<column>__<operator>` combination legal for the column's
//! semantic type, in profile column order.

use crate::{
    parser::suffixes_for,
    profile::{Profile, SemanticType},
};
use serde_json::{json, Map, Value};
use uuid::Uuid;

pub fn build_document(
    profile: &Profile,
    resource_id: Uuid,
    aggregation_allowed: bool,
    page_size_default: u64,
) -> Value {
    let parameters = parameters(profile, aggregation_allowed, page_size_default);
    let components = components(profile);

    let mut paths = Map::new();
    paths.insert(
        format!("/api/resources/{resource_id}/data/"),
        json!({
            "get": {
                "description": "Returns resource data as a paginated JSON document.",
                "summary": "Get resource data from its ID",
                "operationId": "getResourceDataFromId",
                "responses": {
                    "200": {
                        "description": "successful operation",
                        "content": {
                            "application/json": {
                                "schema": {"$ref": "#/components/schemas/ResourceData"}
                            }
                        },
                    },
                    "400": {"description": "Invalid query string"},
                    "404": {"description": "Resource not found"},
                },
            },
            "parameters": parameters.clone(),
        }),
    );
    paths.insert(
        format!("/api/resources/{resource_id}/data/csv/"),
        json!({
            "get": {
                "description": "Returns resource data as a CSV file.",
                "summary": "Get resource data from its ID in CSV format",
                "operationId": "getResourceDataFromIdCsv",
                "responses": {
                    "200": {"description": "successful operation", "content": {"text/csv": {}}},
                    "400": {"description": "Invalid query string"},
                    "404": {"description": "Resource not found"},
                },
            },
            "parameters": parameters.clone(),
        }),
    );
    paths.insert(
        format!("/api/resources/{resource_id}/data/json/"),
        json!({
            "get": {
                "description": "Returns resource data as a flat JSON array.",
                "summary": "Get resource data from its ID in JSON format",
                "operationId": "getResourceDataFromIdJson",
                "responses": {
                    "200": {
                        "description": "successful operation",
                        "content": {"application/json": {}},
                    },
                    "400": {"description": "Invalid query string"},
                    "404": {"description": "Resource not found"},
                },
            },
            "parameters": parameters,
        }),
    );

    json!({
        "openapi": "3.0.3",
        "info": {
            "title": "Tabular API",
            "description": "Retrieve rows of a tabular resource with optional filtering, sorting and aggregation.",
            "version": env!("CARGO_PKG_VERSION"),
        },
        "tags": [
            {
                "name": "Data retrieval",
                "description": "Retrieve data for a specified resource",
            }
        ],
        "paths": paths,
        "components": components,
    })
}

fn parameters(profile: &Profile, aggregation_allowed: bool, page_size_default: u64) -> Vec<Value> {
    let mut list = vec![
        json!({
            "name": "page",
            "in": "query",
            "description": "Specific page (page=value)",
            "required": false,
            "schema": {"type": "integer"},
            "example": 1,
        }),
        json!({
            "name": "page_size",
            "in": "query",
            "description": "Number of results per page (page_size=value)",
            "required": false,
            "schema": {"type": "integer"},
            "example": page_size_default,
        }),
        json!({
            "name": "columns",
            "in": "query",
            "description": "Columns to keep in the result (columns=column1,column3,...)",
            "required": false,
            "schema": {"type": "string"},
            "style": "form",
            "explode": false,
        }),
    ];

    for (column, semantic) in profile.columns() {
        for suffix in suffixes_for(semantic) {
            if is_aggregator(suffix) && !aggregation_allowed {
                continue;
            }
            list.push(parameter(column, semantic, suffix));
        }
    }
    list
}

fn parameter(column: &str, semantic: SemanticType, suffix: &str) -> Value {
    let name = format!("{column}__{suffix}");
    let mut entry = json!({
        "name": name,
        "in": "query",
        "description": description(column, suffix),
        "required": false,
        "schema": value_schema(semantic, suffix),
    });
    if is_aggregator(suffix) {
        entry
            .as_object_mut()
            .expect("entry is an object")
            .insert("allowEmptyValue".into(), json!(true));
    }
    entry
}

fn is_aggregator(suffix: &str) -> bool {
    matches!(suffix, "groupby" | "count" | "sum" | "avg" | "min" | "max")
}

fn value_schema(semantic: SemanticType, suffix: &str) -> Value {
    match suffix {
        "exact" | "differs" | "less" | "greater" | "strictly_less" | "strictly_greater" => {
            json!({"type": semantic.openapi_type()})
        }
        "sort" => json!({"type": "string", "enum": ["asc", "desc"]}),
        // comma-separated list, or no value at all for aggregators
        "in" | "contains" => json!({"type": "string"}),
        _ => json!({"type": "boolean"}),
    }
}

fn description(column: &str, suffix: &str) -> String {
    match suffix {
        "exact" => format!("Exact match in column: {column} ({column}__exact=value)"),
        "differs" => format!("Differs from in column: {column} ({column}__differs=value)"),
        "contains" => format!("String contains in column: {column} ({column}__contains=value)"),
        "in" => format!("Value in list in column: {column} ({column}__in=value1,value2,...)"),
        "less" => format!("Less than or equal to in column: {column} ({column}__less=value)"),
        "greater" => {
            format!("Greater than or equal to in column: {column} ({column}__greater=value)")
        }
        "strictly_less" => {
            format!("Strictly less than in column: {column} ({column}__strictly_less=value)")
        }
        "strictly_greater" => format!(
            "Strictly greater than in column: {column} ({column}__strictly_greater=value)"
        ),
        "sort" => format!(
            "Sort ascending or descending on column: {column} ({column}__sort=asc or {column}__sort=desc)"
        ),
        "groupby" => format!("Performs `group by values` operation in column: {column}"),
        "count" => format!("Performs `count values` operation in column: {column}"),
        "sum" => format!("Performs `sum` operation in column: {column}"),
        "avg" => format!("Performs `mean` operation in column: {column}"),
        "min" => format!("Performs `minimum` operation in column: {column}"),
        "max" => format!("Performs `maximum` operation in column: {column}"),
        other => format!("Applies `{other}` to column: {column}"),
    }
}

fn components(profile: &Profile) -> Value {
    let mut properties = Map::new();
    for (column, semantic) in profile.columns() {
        properties.insert(column.to_string(), json!({"type": semantic.openapi_type()}));
    }

    json!({
        "schemas": {
            "ResourceData": {
                "type": "object",
                "properties": {
                    "data": {
                        "type": "array",
                        "items": {"$ref": "#/components/schemas/Resource"},
                    },
                    "links": {
                        "type": "object",
                        "properties": {
                            "profile": {
                                "description": "Link to the profile endpoint of the resource",
                                "type": "string",
                            },
                            "swagger": {
                                "description": "Link to the swagger endpoint of the resource",
                                "type": "string",
                            },
                            "next": {
                                "description": "Pagination link to the next page of the resource data",
                                "type": "string",
                            },
                            "prev": {
                                "description": "Pagination link to the previous page of the resource data",
                                "type": "string",
                            },
                        },
                    },
                    "meta": {
                        "type": "object",
                        "properties": {
                            "page": {"description": "Current page", "type": "integer"},
                            "page_size": {
                                "description": "Number of results per page",
                                "type": "integer",
                            },
                            "total": {"description": "Total number of results", "type": "integer"},
                        },
                    },
                },
            },
            "Resource": {"type": "object", "properties": properties},
        }
    })
}
