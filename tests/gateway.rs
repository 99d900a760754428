mod support;

use axum::http::StatusCode;
use serde_json::{json, Value};
use support::{harness, harness_with, profile_document, resource_id, rows_response, TABLE};
use uuid::Uuid;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, ResponseTemplate};

fn data_url(query: &str) -> String {
    let rid = resource_id();
    if query.is_empty() {
        format!("/api/resources/{rid}/data/")
    } else {
        format!("/api/resources/{rid}/data/?{query}")
    }
}

#[tokio::test]
async fn filters_compile_and_totals_flow_through() {
    let h = harness().await;
    h.seed_resource(resource_id(), false).await;

    Mock::given(method("GET"))
        .and(path(format!("/{TABLE}")))
        .and(query_param("\"score\"", "gte.0.9"))
        .and(query_param("\"decompte\"", "eq.13"))
        .and(query_param("order", "__id.asc"))
        .respond_with(rows_response(
            json!([
                {"__id": 1, "id": "a", "score": 0.95, "decompte": 13},
                {"__id": 7, "id": "b", "score": 0.99, "decompte": 13},
            ]),
            "0-1/2",
        ))
        .mount(&h.downstream)
        .await;

    let (status, body) = h
        .get(&data_url("score__greater=0.9&decompte__exact=13"))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["meta"]["total"], 2);
    assert_eq!(body["data"].as_array().unwrap().len(), 2);
    assert!(body["links"]["next"].is_null());
    assert!(body["links"]["prev"].is_null());
    assert!(body["links"]["profile"].as_str().unwrap().starts_with("http://api.test/"));
}

#[tokio::test]
async fn pagination_meta_and_links_are_absolute() {
    let h = harness().await;
    h.seed_resource(resource_id(), false).await;

    Mock::given(method("GET"))
        .and(path(format!("/{TABLE}")))
        .respond_with(rows_response(
            json!([{"__id": 31, "id": "x"}]),
            "30-59/100",
        ))
        .mount(&h.downstream)
        .await;

    let (status, body) = h.get(&data_url("page=2&page_size=30")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["meta"], json!({"page": 2, "page_size": 30, "total": 100}));
    let prev = body["links"]["prev"].as_str().unwrap();
    assert!(prev.starts_with("http://api.test/api/resources/"));
    assert!(prev.ends_with("page=1&page_size=30"));
    let next = body["links"]["next"].as_str().unwrap();
    assert!(next.ends_with("page=3&page_size=30"));
}

#[tokio::test]
async fn last_page_has_no_next_link() {
    let h = harness().await;
    h.seed_resource(resource_id(), false).await;

    Mock::given(method("GET"))
        .and(path(format!("/{TABLE}")))
        .respond_with(rows_response(json!([{"__id": 61}]), "60-60/61"))
        .mount(&h.downstream)
        .await;

    let (_, body) = h.get(&data_url("page=3&page_size=30")).await;
    assert!(body["links"]["next"].is_null());
    assert!(body["links"]["prev"].as_str().unwrap().ends_with("page=2&page_size=30"));
}

#[tokio::test]
async fn projection_narrows_returned_keys() {
    let h = harness().await;
    h.seed_resource(resource_id(), false).await;

    Mock::given(method("GET"))
        .and(path(format!("/{TABLE}")))
        .and(query_param("select", "\"id\",\"score\""))
        .respond_with(rows_response(
            json!([
                {"id": "a", "score": 0.1},
                {"id": "b", "score": 0.2},
            ]),
            "0-1/2",
        ))
        .mount(&h.downstream)
        .await;

    let (status, body) = h.get(&data_url("columns=id,score")).await;
    assert_eq!(status, StatusCode::OK);
    for row in body["data"].as_array().unwrap() {
        let keys: Vec<&str> = row.as_object().unwrap().keys().map(String::as_str).collect();
        assert_eq!(keys, ["id", "score"]);
    }
}

#[tokio::test]
async fn aggregation_reports_the_group_count() {
    let h = harness().await;
    h.seed_resource(resource_id(), true).await;

    // the window request carries the aggregated projection; its Content-Range
    // still counts pre-aggregation rows
    Mock::given(method("GET"))
        .and(path(format!("/{TABLE}")))
        .and(query_param(
            "select",
            "\"decompte\",\"score__avg\":\"score\".avg()",
        ))
        .and(query_param("\"birth\"", "lte.1996"))
        .respond_with(rows_response(
            json!([
                {"decompte": 13, "score__avg": 0.91},
                {"decompte": 14, "score__avg": 0.42},
            ]),
            "0-1/5700",
        ))
        .mount(&h.downstream)
        .await;

    // the group-count probe replaces the total
    Mock::given(method("GET"))
        .and(path(format!("/{TABLE}")))
        .and(query_param(
            "select",
            "\"decompte\",\"decompte__count\":\"decompte\".count()",
        ))
        .and(query_param("\"birth\"", "lte.1996"))
        .respond_with(rows_response(
            json!([{"decompte": 13, "decompte__count": 3100}]),
            "0-0/2",
        ))
        .mount(&h.downstream)
        .await;

    let (status, body) = h
        .get(&data_url("decompte__groupby&birth__less=1996&score__avg"))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["meta"]["total"], 2);
    for row in body["data"].as_array().unwrap() {
        let keys: Vec<&str> = row.as_object().unwrap().keys().map(String::as_str).collect();
        assert_eq!(keys, ["decompte", "score__avg"]);
    }
}

#[tokio::test]
async fn aggregate_without_grouping_totals_one() {
    let h = harness().await;
    h.seed_resource(resource_id(), true).await;

    Mock::given(method("GET"))
        .and(path(format!("/{TABLE}")))
        .and(query_param("select", "\"score__avg\":\"score\".avg()"))
        .respond_with(rows_response(json!([{"score__avg": 0.5}]), "0-0/5700"))
        .mount(&h.downstream)
        .await;

    let (status, body) = h.get(&data_url("score__avg")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["meta"]["total"], 1);
}

#[tokio::test]
async fn aggregation_without_exception_is_forbidden() {
    let h = harness().await;
    h.seed_resource(resource_id(), false).await;

    let (status, body) = h
        .get(&data_url("decompte__groupby&birth__less=1996&score__avg"))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["errors"][0]["code"], "aggregation_not_allowed");
    assert_eq!(body["errors"][0]["resource_id"], resource_id().to_string());
}

#[tokio::test]
async fn config_overlay_grants_aggregation() {
    let rid = resource_id();
    let h = harness_with(|config| config.allow_aggregation.push(rid)).await;
    h.seed_resource(rid, false).await;

    Mock::given(method("GET"))
        .and(path(format!("/{TABLE}")))
        .and(query_param("select", "\"score__avg\":\"score\".avg()"))
        .respond_with(rows_response(json!([{"score__avg": 0.5}]), "0-0/10"))
        .mount(&h.downstream)
        .await;

    let (status, _) = h.get(&data_url("score__avg")).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn deleted_resource_is_gone_even_for_data() {
    let h = harness().await;
    let rid = resource_id();
    let dataset_id: Uuid = "dddddddd-3333-eeee-4444-ffffffffffff".parse().unwrap();
    h.seed_resource_record(rid, "deleted", Some(dataset_id)).await;
    // no tables_index fixture on purpose: the deleted state must preempt it

    let (status, body) = h.get(&data_url("score__greater=0.9")).await;
    assert_eq!(status, StatusCode::GONE);
    assert_eq!(body["errors"][0]["code"], "resource_gone");
    assert_eq!(body["errors"][0]["dataset_id"], dataset_id.to_string());
}

#[tokio::test]
async fn unknown_resource_is_not_found() {
    let h = harness().await;
    let rid = resource_id();
    Mock::given(method("GET"))
        .and(path("/resources"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&h.downstream)
        .await;

    let (status, body) = h.get(&data_url("")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["errors"][0]["code"], "resource_not_found");
    assert_eq!(body["errors"][0]["resource_id"], rid.to_string());
}

#[tokio::test]
async fn invalid_operator_and_value_are_reported() {
    let h = harness().await;
    h.seed_resource(resource_id(), false).await;

    let (status, body) = h.get(&data_url("score__matches=0.9")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["errors"][0]["code"], "invalid_parameter");
    assert_eq!(body["errors"][0]["column"], "score");
    assert_eq!(body["errors"][0]["operator"], "matches");

    let (status, body) = h.get(&data_url("decompte__exact=treize")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["errors"][0]["code"], "invalid_value");
    assert_eq!(body["errors"][0]["value"], "treize");

    let (status, body) = h.get(&data_url("page_size=9000")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["errors"][0]["column"], "page_size");
}

#[tokio::test]
async fn missing_total_degrades_and_full_pages_keep_next() {
    let h = harness().await;
    h.seed_resource(resource_id(), false).await;

    Mock::given(method("GET"))
        .and(path(format!("/{TABLE}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"__id": 1}, {"__id": 2}
        ])))
        .mount(&h.downstream)
        .await;

    let (status, body) = h.get(&data_url("page_size=2")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["meta"]["total"].is_null());
    assert!(!body["links"]["next"].is_null());
}

#[tokio::test]
async fn csv_export_streams_sorted_rows() {
    let h = harness().await;
    h.seed_resource(resource_id(), false).await;

    Mock::given(method("GET"))
        .and(path(format!("/{TABLE}")))
        .and(query_param("order", "\"score\".desc,__id.asc"))
        .respond_with(rows_response(
            json!([
                {"__id": 3, "id": "c", "score": 0.9},
                {"__id": 1, "id": "a", "score": 0.5},
                {"__id": 2, "id": "b", "score": 0.1},
            ]),
            "0-2/3",
        ))
        .mount(&h.downstream)
        .await;

    let rid = resource_id();
    let (status, headers, bytes) = h
        .get_raw(&format!("/api/resources/{rid}/data/csv/?score__sort=desc"))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers["content-type"], "text/csv");
    assert!(headers["content-disposition"]
        .to_str()
        .unwrap()
        .contains(&format!("{rid}.csv")));

    let text = String::from_utf8(bytes.to_vec()).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines[0], "__id,id,score");
    assert_eq!(lines[1], "3,c,0.9");
    assert_eq!(lines[2], "1,a,0.5");
    assert_eq!(lines[3], "2,b,0.1");
}

#[tokio::test]
async fn csv_export_walks_every_batch() {
    let h = harness_with(|config| config.batch_size = 2).await;
    h.seed_resource(resource_id(), false).await;

    Mock::given(method("GET"))
        .and(path(format!("/{TABLE}")))
        .and(wiremock::matchers::header("Range", "0-1"))
        .respond_with(rows_response(
            json!([{"__id": 1, "id": "a"}, {"__id": 2, "id": "b"}]),
            "0-1/3",
        ))
        .mount(&h.downstream)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/{TABLE}")))
        .and(wiremock::matchers::header("Range", "2-3"))
        .respond_with(rows_response(json!([{"__id": 3, "id": "c"}]), "2-2/3"))
        .mount(&h.downstream)
        .await;

    let rid = resource_id();
    let (status, _, bytes) = h
        .get_raw(&format!("/api/resources/{rid}/data/csv/"))
        .await;
    assert_eq!(status, StatusCode::OK);
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert_eq!(text.lines().count(), 4);
    assert!(text.lines().last().unwrap().starts_with("3,"));
}

#[tokio::test]
async fn flat_json_export_is_one_array() {
    let h = harness().await;
    h.seed_resource(resource_id(), false).await;

    Mock::given(method("GET"))
        .and(path(format!("/{TABLE}")))
        .respond_with(rows_response(
            json!([{"__id": 1, "id": "a"}, {"__id": 2, "id": "b"}]),
            "0-1/2",
        ))
        .mount(&h.downstream)
        .await;

    let rid = resource_id();
    let (status, headers, bytes) = h
        .get_raw(&format!("/api/resources/{rid}/data/json/"))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers["content-type"], "application/json");
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body.as_array().unwrap().len(), 2);
    assert_eq!(body[0]["id"], "a");
}

#[tokio::test]
async fn meta_endpoint_links_to_the_other_surfaces() {
    let h = harness().await;
    let rid = resource_id();
    h.seed_resource(rid, false).await;

    let (status, body) = h.get(&format!("/api/resources/{rid}/")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["url"], "https://files.example.org/source.csv");
    let rels: Vec<&str> = body["links"]
        .as_array()
        .unwrap()
        .iter()
        .map(|link| link["rel"].as_str().unwrap())
        .collect();
    assert_eq!(rels, ["profile", "data", "swagger"]);
    assert_eq!(
        body["links"][1]["href"],
        format!("http://api.test/api/resources/{rid}/data/")
    );
}

#[tokio::test]
async fn profile_endpoint_passes_the_document_through() {
    let h = harness().await;
    let rid = resource_id();
    h.seed_resource(rid, false).await;

    let (status, body) = h.get(&format!("/api/resources/{rid}/profile/")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["profile"], profile_document());
}

#[tokio::test]
async fn resource_without_profile_is_a_distinct_not_found() {
    let h = harness().await;
    let rid = resource_id();
    h.seed_resource_record(rid, "ok", None).await;
    h.seed_exception(rid, false).await;
    Mock::given(method("GET"))
        .and(path("/tables_index"))
        .and(query_param("select", "parsing_table"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!([{ "parsing_table": TABLE }])),
        )
        .mount(&h.downstream)
        .await;
    Mock::given(method("GET"))
        .and(path("/tables_index"))
        .and(query_param("select", "profile"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{ "profile": null }])))
        .mount(&h.downstream)
        .await;

    let (status, body) = h.get(&format!("/api/resources/{rid}/profile/")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["errors"][0]["code"], "profile_not_found");
}

#[tokio::test]
async fn swagger_lists_typed_operators_per_column() {
    let h = harness().await;
    let rid = resource_id();
    h.seed_resource(rid, false).await;

    let (status, body) = h.get(&format!("/api/resources/{rid}/swagger/")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["openapi"], "3.0.3");
    let parameters = body["paths"][format!("/api/resources/{rid}/data/")]["parameters"]
        .as_array()
        .unwrap();
    let names: Vec<&str> = parameters
        .iter()
        .map(|p| p["name"].as_str().unwrap())
        .collect();
    assert!(names.contains(&"score__greater"));
    assert!(names.contains(&"liste__contains"));
    assert!(!names.contains(&"score__contains"));
    // aggregators are hidden while the resource has no exception
    assert!(!names.contains(&"score__avg"));
}

#[tokio::test]
async fn aggregation_exceptions_merge_directory_and_config() {
    let overlay: Uuid = "00000000-0000-0000-0000-000000000001".parse().unwrap();
    let h = harness_with(|config| config.allow_aggregation.push(overlay)).await;
    Mock::given(method("GET"))
        .and(path("/exceptions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"resource_id": "aaaaaaaa-1111-bbbb-2222-cccccccccccc"}
        ])))
        .mount(&h.downstream)
        .await;

    let (status, body) = h.get("/api/aggregation-exceptions/").await;
    assert_eq!(status, StatusCode::OK);
    let ids: Vec<&str> = body
        .as_array()
        .unwrap()
        .iter()
        .map(|row| row["resource_id"].as_str().unwrap())
        .collect();
    assert_eq!(
        ids,
        [
            "aaaaaaaa-1111-bbbb-2222-cccccccccccc",
            "00000000-0000-0000-0000-000000000001",
        ]
    );
}

#[tokio::test]
async fn health_reports_downstream_reachability() {
    let h = harness().await;
    Mock::given(method("HEAD"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&h.downstream)
        .await;

    let (status, body) = h.get("/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert!(body["uptime_seconds"].is_number());
}

#[tokio::test]
async fn downstream_5xx_maps_to_bad_gateway() {
    let h = harness().await;
    h.seed_resource(resource_id(), false).await;
    Mock::given(method("GET"))
        .and(path(format!("/{TABLE}")))
        .respond_with(ResponseTemplate::new(503))
        .mount(&h.downstream)
        .await;

    let (status, body) = h.get(&data_url("")).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["errors"][0]["code"], "downstream_unavailable");
}

#[tokio::test]
async fn downstream_4xx_is_a_gateway_bug() {
    let h = harness().await;
    h.seed_resource(resource_id(), false).await;
    Mock::given(method("GET"))
        .and(path(format!("/{TABLE}")))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({"message": "boom"})))
        .mount(&h.downstream)
        .await;

    let (status, body) = h.get(&data_url("")).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["errors"][0]["code"], "internal");
    // the downstream's message must not leak
    assert_eq!(body["errors"][0]["message"], "internal error");
}
