use std::fmt::Write as _;
use std::path::Path;
use std::time::Duration;

use pretty_assertions::assert_eq;
use serde_json::json;
use tokio_test::{assert_err, assert_ok};

use super::*;
use crate::interp::Classification;
use crate::models::{ExecutionErrorKind, SessionState};

fn service(dir: &Path) -> DataService {
    let mut config = AppConfig::default();
    config.sessions.workspace_dir = Some(dir.to_path_buf());
    DataService::new(config)
}

fn write_sales_csv(path: &Path, rows: usize) {
    let mut text = String::from("region,units,price\n");
    for i in 0..rows {
        let region = ["north", "south", "east"][i % 3];
        let price = if i % 10 == 0 {
            String::new()
        } else {
            format!("{}.5", i)
        };
        writeln!(text, "{},{},{}", region, i, price).unwrap();
    }
    std::fs::write(path, text).unwrap();
}

#[tokio::test]
async fn test_listed_ids_match_created() {
    let dir = tempfile::tempdir().unwrap();
    let service = service(dir.path());

    assert_ok!(service.create_session(Some("a".into()), false).await);
    assert_ok!(service.create_session(Some("b".into()), false).await);
    let generated = service.create_session(None, false).await.unwrap();

    let list = service.list_sessions().await.unwrap();
    let ids: Vec<String> = list.sessions.iter().map(|s| s.session_id.clone()).collect();
    assert_eq!(list.total_sessions, 3);
    assert_eq!(ids, vec!["a".to_string(), "b".to_string(), generated.session_id]);
}

#[tokio::test]
async fn test_duplicate_create_keeps_state() {
    let dir = tempfile::tempdir().unwrap();
    let service = service(dir.path());
    service.create_session(Some("s".into()), false).await.unwrap();
    service.execute("keep = 7", "s", true, None).await.unwrap();

    let err = service.create_session(Some("s".into()), true).await.unwrap_err();
    assert_eq!(err.kind(), "DuplicateSessionError");

    let record = service.execute("keep", "s", true, None).await.unwrap();
    assert_eq!(record.result.as_deref(), Some("7"));
}

#[tokio::test]
async fn test_counter_and_history_track_every_attempt() {
    let dir = tempfile::tempdir().unwrap();
    let service = service(dir.path());
    service.create_session(Some("s".into()), true).await.unwrap();

    let attempts = ["a = 1", "undefined_name", "time.sleep(20)", "a + 1", "%pwd"];
    let mut kinds = Vec::new();
    for code in attempts {
        let timeout = code.starts_with("time").then_some(1);
        let record = service.execute(code, "s", true, timeout).await.unwrap();
        kinds.push(record.error_kind);
    }
    assert_eq!(
        kinds,
        vec![
            None,
            Some(ExecutionErrorKind::ExecutionError),
            Some(ExecutionErrorKind::TimeoutError),
            None,
            None,
        ]
    );

    let status = service.get_session_status("s").await.unwrap();
    assert_eq!(status.execution_count, 5);
    assert_eq!(status.error_count, 2);

    let history = service.get_history("s", 0, false).await.unwrap();
    assert_eq!(history.total_executions, 5);
    let codes: Vec<&str> = history.history.iter().map(|h| h.code.as_str()).collect();
    assert_eq!(codes, attempts.to_vec());
    let counts: Vec<u64> = history.history.iter().map(|h| h.execution_count).collect();
    assert_eq!(counts, vec![1, 2, 3, 4, 5]);
}

#[tokio::test]
async fn test_history_limit_and_output_flag() {
    let dir = tempfile::tempdir().unwrap();
    let service = service(dir.path());
    service.create_session(Some("s".into()), false).await.unwrap();
    for i in 0..4 {
        service
            .execute(&format!("print({})", i), "s", true, None)
            .await
            .unwrap();
    }

    let recent = service.get_history("s", 2, false).await.unwrap();
    assert_eq!(recent.total_executions, 4);
    assert_eq!(recent.history.len(), 2);
    assert_eq!(recent.history[0].code, "print(2)");
    assert_eq!(recent.history[0].stdout, None);

    let full = service.get_history("s", 1, true).await.unwrap();
    assert_eq!(full.history[0].stdout.as_deref(), Some("3\n"));
}

#[tokio::test]
async fn test_assignment_then_expression() {
    let dir = tempfile::tempdir().unwrap();
    let service = service(dir.path());
    service.create_session(Some("s".into()), false).await.unwrap();

    let first = service.execute("x = 41", "s", true, None).await.unwrap();
    let second = service.execute("x + 1", "s", true, None).await.unwrap();
    assert_eq!(first.result, None);
    assert_eq!(second.result.as_deref(), Some("42"));
}

#[tokio::test]
async fn test_clear_missing_name_is_atomic() {
    let dir = tempfile::tempdir().unwrap();
    let service = service(dir.path());
    service.create_session(Some("s".into()), false).await.unwrap();
    service.execute("y = 1\nz = 2", "s", true, None).await.unwrap();

    let err = service
        .clear_variables("s", Some(vec!["y".into(), "x".into()]), false, true)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "VariableNotFoundError");
    assert_eq!(err.context()["variables"], json!(["x"]));

    assert_ok!(service.describe_variable("y", "s", false).await);
    assert_ok!(service.describe_variable("z", "s", false).await);

    let cleared = service
        .clear_variables("s", Some(vec!["y".into()]), false, true)
        .await
        .unwrap();
    assert_eq!(cleared.cleared_variables, vec!["y"]);
    assert_eq!(cleared.remaining_variables, 1);
}

#[tokio::test]
async fn test_clear_requires_names_or_all() {
    let dir = tempfile::tempdir().unwrap();
    let service = service(dir.path());
    service.create_session(Some("s".into()), false).await.unwrap();
    let err = service.clear_variables("s", None, false, true).await.unwrap_err();
    assert_eq!(err.kind(), "InvalidRequest");
}

#[tokio::test]
async fn test_clear_all_keeps_imports() {
    let dir = tempfile::tempdir().unwrap();
    let service = service(dir.path());
    service.create_session(Some("s".into()), true).await.unwrap();
    service.execute("a = [1, 2, 3]\nb = 'text'", "s", true, None).await.unwrap();

    let result = service.clear_variables("s", None, true, true).await.unwrap();
    let mut cleared = result.cleared_variables.clone();
    cleared.sort();
    assert_eq!(cleared, vec!["a", "b"]);
    assert_eq!(result.remaining_variables, 7);
    assert!(service.execute("math.sqrt(16)", "s", true, None).await.unwrap().success);

    let result = service.clear_variables("s", None, true, false).await.unwrap();
    assert_eq!(result.remaining_variables, 0);
}

#[tokio::test]
async fn test_load_csv_synthesizes_free_name() {
    let dir = tempfile::tempdir().unwrap();
    let service = service(dir.path());
    service.create_session(Some("s".into()), false).await.unwrap();
    write_sales_csv(&dir.path().join("s").join("sales.csv"), 100);
    service.execute("df_sales = 'taken'", "s", true, None).await.unwrap();

    let loaded = service
        .load_file("sales.csv", "s", "csv", None, LoadOptions::default())
        .await
        .unwrap();
    assert_eq!(loaded.variable_name, "df_sales_1");
    assert_eq!(loaded.shape, [100, 3]);
    assert_eq!(loaded.encoding.as_deref(), Some("utf-8"));
    assert_eq!(loaded.dtypes["units"], json!("int64"));
    assert_eq!(loaded.dtypes["price"], json!("float64"));

    let descriptor = service.describe_table("df_sales_1", "s").await.unwrap();
    assert_eq!(descriptor.shape, [100, 3]);
    assert_eq!(descriptor.columns, vec!["region", "units", "price"]);
    assert_eq!(descriptor.null_counts["price"], json!(10));

    let original = service.execute("df_sales", "s", true, None).await.unwrap();
    assert_eq!(original.result.as_deref(), Some("'taken'"));
}

#[tokio::test]
async fn test_load_errors() {
    let dir = tempfile::tempdir().unwrap();
    let service = service(dir.path());
    service.create_session(Some("s".into()), false).await.unwrap();
    write_sales_csv(&dir.path().join("s").join("t.csv"), 3);

    let missing = service
        .load_file("nope.csv", "s", "csv", None, LoadOptions::default())
        .await
        .unwrap_err();
    assert_eq!(missing.kind(), "FileNotFoundError");

    let format = service
        .load_file("t.csv", "s", "parquet", None, LoadOptions::default())
        .await
        .unwrap_err();
    assert_eq!(format.kind(), "UnsupportedFormatError");

    let name = service
        .load_file("t.csv", "s", "csv", Some("class".into()), LoadOptions::default())
        .await
        .unwrap_err();
    assert_eq!(name.kind(), "InvalidRequest");

    let session = service
        .load_file("t.csv", "ghost", "csv", None, LoadOptions::default())
        .await
        .unwrap_err();
    assert_eq!(session.kind(), "SessionNotFoundError");
}

#[tokio::test]
async fn test_loaded_table_is_visible_to_code() {
    let dir = tempfile::tempdir().unwrap();
    let service = service(dir.path());
    service.create_session(Some("s".into()), true).await.unwrap();
    write_sales_csv(&dir.path().join("s").join("t.csv"), 12);

    service
        .load_file("t.csv", "s", "csv", Some("sales".into()), LoadOptions::default())
        .await
        .unwrap();
    let record = service.execute("len(sales)", "s", true, None).await.unwrap();
    assert_eq!(record.result.as_deref(), Some("12"));

    let tables = service.list_tables("s").await.unwrap();
    assert_eq!(tables.total_tables, 1);
    assert_eq!(tables.tables[0].name, "sales");
}

#[tokio::test]
async fn test_head_sample_bounds() {
    let dir = tempfile::tempdir().unwrap();
    let service = service(dir.path());
    service.create_session(Some("s".into()), false).await.unwrap();
    write_sales_csv(&dir.path().join("s").join("t.csv"), 40);
    service
        .load_file("t.csv", "s", "csv", Some("t".into()), LoadOptions::default())
        .await
        .unwrap();

    let sample = service
        .sample_column("t", "price", "s", SampleMethod::Head, 5, &SampleOptions::default())
        .await
        .unwrap();
    assert!(sample.sample_data.len() <= 5);
    assert_eq!(sample.total_rows, 40);
    assert_eq!(sample.null_count, 4);

    let err = service
        .sample_column("t", "cost", "s", SampleMethod::Head, 5, &SampleOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "ColumnNotFoundError");
}

#[tokio::test]
async fn test_preview_and_summary() {
    let dir = tempfile::tempdir().unwrap();
    let service = service(dir.path());
    service.create_session(Some("s".into()), false).await.unwrap();
    write_sales_csv(&dir.path().join("s").join("t.csv"), 6);
    service
        .load_file("t.csv", "s", "csv", Some("t".into()), LoadOptions::default())
        .await
        .unwrap();

    let tail = service
        .preview_table("t", "s", PreviewMethod::Tail, 2)
        .await
        .unwrap();
    assert_eq!(tail.total_rows, 6);
    assert_eq!(tail.n_rows, 2);
    assert_eq!(tail.data[1]["units"], json!(5));

    let sample = service
        .preview_table("t", "s", PreviewMethod::Sample, 50)
        .await
        .unwrap();
    assert_eq!(sample.n_rows, 6);

    let summary = service.summarize_table("t", "s", true).await.unwrap();
    let numeric = summary.numeric_summary.unwrap();
    assert_eq!(numeric["units"]["count"], json!(6));
    assert_eq!(numeric["units"]["max"], json!(5.0));
    let categorical = summary.categorical_summary.unwrap();
    assert_eq!(categorical["region"]["unique"], json!(3));

    let numeric_only = service.summarize_table("t", "s", false).await.unwrap();
    assert!(numeric_only.categorical_summary.is_none());
}

#[tokio::test]
async fn test_inspection_on_scalar_fails_as_not_a_table() {
    let dir = tempfile::tempdir().unwrap();
    let service = service(dir.path());
    service.create_session(Some("s".into()), false).await.unwrap();
    service.execute("n = 3", "s", true, None).await.unwrap();

    let err = service.describe_table("n", "s").await.unwrap_err();
    assert_eq!(err.kind(), "NotATableError");
    let described = service.describe_variable("n", "s", true).await.unwrap();
    assert_eq!(described.classification, Classification::Scalar);
    assert_eq!(described.content_preview.as_deref(), Some("3"));
}

#[tokio::test]
async fn test_memory_report_tracks_bindings() {
    let dir = tempfile::tempdir().unwrap();
    let service = service(dir.path());
    service.create_session(Some("s".into()), false).await.unwrap();
    service
        .execute("big = 'x' * 100000\nsmall = 1", "s", true, None)
        .await
        .unwrap();

    let report = service.check_memory("s").await.unwrap();
    assert_eq!(report.session_id, "s");
    assert_eq!(report.top_variables[0].name, "big");
    assert!(report.total_bytes > 100_000);
}

#[tokio::test]
async fn test_delete_then_inspect() {
    let dir = tempfile::tempdir().unwrap();
    let service = service(dir.path());
    service.create_session(Some("gone".into()), true).await.unwrap();

    assert_ok!(service.delete_session("gone").await);
    assert_eq!(
        service.list_tables("gone").await.unwrap_err().kind(),
        "SessionNotFoundError"
    );
    assert_eq!(
        service.check_memory("gone").await.unwrap_err().kind(),
        "SessionNotFoundError"
    );
    assert_eq!(
        service.get_history("gone", 10, false).await.unwrap_err().kind(),
        "SessionNotFoundError"
    );
    assert_err!(service.delete_session("gone").await);
}

#[tokio::test]
async fn test_timed_out_run_keeps_session_usable() {
    let dir = tempfile::tempdir().unwrap();
    let service = service(dir.path());
    service.create_session(Some("s".into()), true).await.unwrap();

    let record = service
        .execute("time.sleep(30)", "s", true, Some(1))
        .await
        .unwrap();
    assert!(!record.success);
    assert_eq!(record.error_kind, Some(ExecutionErrorKind::TimeoutError));

    let next = service.execute("1 + 1", "s", true, None).await.unwrap();
    assert_eq!(next.result.as_deref(), Some("2"));
    let history = service.get_history("s", 0, false).await.unwrap();
    assert_eq!(history.total_executions, 2);
}

#[tokio::test]
async fn test_busy_session_reports_without_blocking() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = AppConfig::default();
    config.sessions.workspace_dir = Some(dir.path().to_path_buf());
    config.execution.inspect_wait_ms = 100;
    let service = DataService::new(config);
    service.create_session(Some("s".into()), true).await.unwrap();

    let observe = async {
        tokio::time::sleep(Duration::from_millis(200)).await;
        let listed = service.list_sessions().await.unwrap();
        let status = service.get_session_status("s").await;
        (listed, status)
    };
    let (record, (listed, status)) =
        tokio::join!(service.execute("time.sleep(1)", "s", true, None), observe);

    assert!(record.unwrap().success);
    assert_eq!(listed.sessions[0].status, SessionState::Busy);
    assert_eq!(listed.sessions[0].variable_count, None);
    assert_eq!(status.unwrap_err().kind(), "BusyError");

    let listed = service.list_sessions().await.unwrap();
    assert_eq!(listed.sessions[0].status, SessionState::Active);
    assert_eq!(listed.sessions[0].variable_count, Some(7));
}

#[tokio::test]
async fn test_sessions_are_isolated() {
    let dir = tempfile::tempdir().unwrap();
    let service = service(dir.path());
    service.create_session(Some("one".into()), false).await.unwrap();
    service.create_session(Some("two".into()), false).await.unwrap();

    service.execute("shared = 1", "one", true, None).await.unwrap();
    let other = service.execute("shared", "two", true, None).await.unwrap();
    assert!(!other.success);
    assert!(other.error.unwrap().starts_with("NameError"));
}

#[tokio::test]
async fn test_dispatch_by_tool_name() {
    let dir = tempfile::tempdir().unwrap();
    let service = service(dir.path());

    let created = dispatch(&service, "create_session", json!({"session_id": "t"}))
        .await
        .unwrap();
    assert_eq!(created["session_id"], json!("t"));
    assert_eq!(created["auto_imported"].as_array().unwrap().len(), 7);

    let record = dispatch(&service, "execute", json!({"session_id": "t", "code": "2 * 21"}))
        .await
        .unwrap();
    assert_eq!(record["result"], json!("42"));
    assert_eq!(record["mode"], json!("code"));

    let listed = dispatch(&service, "list_sessions", serde_json::Value::Null)
        .await
        .unwrap();
    assert_eq!(listed["total_sessions"], json!(1));

    let unknown = dispatch(&service, "format_disk", json!({})).await.unwrap_err();
    assert_eq!(unknown.kind(), "InvalidRequest");
    let malformed = dispatch(&service, "execute", json!({"session_id": "t"}))
        .await
        .unwrap_err();
    assert_eq!(malformed.kind(), "InvalidRequest");
}

#[tokio::test]
async fn test_health_counts_sessions() {
    let dir = tempfile::tempdir().unwrap();
    let service = service(dir.path());
    service.create_session(None, false).await.unwrap();
    let health = service.health().await;
    assert_eq!(health.status, "healthy");
    assert_eq!(health.active_sessions, 1);
    service.shutdown().await;
    assert_eq!(service.health().await.active_sessions, 0);
}
