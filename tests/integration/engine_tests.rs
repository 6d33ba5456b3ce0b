//! Integration tests for the execution engine
//!
//! Script spiders need a `python3` on PATH; those tests return early when it
//! is missing. Rule spiders run through this crate's own binary as the worker
//! and fetch from wiremock servers.

use serde_json::json;
use spider_engine::config::Config;
use spider_engine::engine::DirectFailure;
use spider_engine::storage::{LogLevel, LogSource, NewSpider, SqliteStorage, Storage};
use spider_engine::{EngineError, Orchestrator, SpiderStatus};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::Barrier;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const LISTING: &str = r#"<html><body>
  <div class="item" data-id="1"><h2>First</h2></div>
  <div class="item" data-id="2"><h2>Second</h2></div>
  <div class="item" data-id="3"><h2>Third</h2></div>
</body></html>"#;

fn python_available() -> bool {
    std::process::Command::new("python3")
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// Creates a test configuration rooted in a temporary directory
fn create_test_config(root: &TempDir) -> Config {
    let mut config = Config::default();
    config.engine.files_dir = root.path().join("files").to_string_lossy().into_owned();
    config.engine.logs_dir = root.path().join("logs").to_string_lossy().into_owned();
    config.engine.scripts_dir = root.path().join("scripts").to_string_lossy().into_owned();
    config.engine.stop_grace_seconds = 1;
    config.engine.direct_call_timeout_seconds = 30;
    config.engine.worker_program = Some(env!("CARGO_BIN_EXE_spider-engine").to_string());
    config.rate_limit.interval_minutes = 0;
    config
}

fn create_engine(config: Config, spiders: &[NewSpider]) -> (Orchestrator<SqliteStorage>, Vec<i64>) {
    let mut storage = SqliteStorage::new_in_memory().unwrap();
    let ids = spiders
        .iter()
        .map(|spider| storage.create_spider(spider).unwrap())
        .collect();
    (Orchestrator::new(config, storage).unwrap(), ids)
}

fn script_spider(name: &str, code: &str) -> NewSpider {
    NewSpider {
        name: name.to_string(),
        code: code.to_string(),
        ..Default::default()
    }
}

fn rule_spider(name: &str, url: String) -> NewSpider {
    NewSpider {
        name: name.to_string(),
        config: json!({
            "type": "rules",
            "url": url,
            "delay": 0,
            "timeout": 5,
            "retries": 0,
            "rules": [
                {"field": "id", "selector": "div.item", "type": "attr", "attr": "data-id"},
                {"field": "title", "selector": "h2"}
            ]
        }),
        ..Default::default()
    }
}

fn scripts_left(root: &TempDir) -> usize {
    std::fs::read_dir(root.path().join("scripts"))
        .map(|entries| entries.count())
        .unwrap_or(0)
}

#[tokio::test]
async fn test_script_run_registers_outputs() {
    if !python_available() {
        return;
    }
    let root = TempDir::new().unwrap();
    let code = "rows = [{'name': 'a', 'n': 1}, {'name': 'b', 'n': 2}]\n\
                save_data(rows, 'rows.json')\n\
                save_data(rows, 'rows.csv', format='csv')\n\
                log_message('INFO', 'done with ' + str(get_config()))";
    let (engine, ids) = create_engine(create_test_config(&root), &[script_spider("writer", code)]);
    let spider_id = ids[0];

    let execution_id = engine.start(spider_id).unwrap();
    engine.wait_for_completion(spider_id).await;
    assert!(engine.status(spider_id).is_none());

    let storage = engine.storage();
    let storage = storage.lock().unwrap();
    let spider = storage.get_spider(spider_id).unwrap().unwrap();
    assert_eq!(spider.status, SpiderStatus::Inactive);
    assert_eq!(spider.run_count, 1);
    assert_eq!(spider.success_count, 1);
    assert_eq!(spider.error_count, 0);
    assert!(spider.last_run_at.is_some());

    let files = storage.get_spider_files(spider_id).unwrap();
    let names: Vec<&str> = files.iter().map(|f| f.filename.as_str()).collect();
    assert!(names.contains(&"rows.json"));
    assert!(names.contains(&"rows.csv"));
    assert!(files.iter().any(|f| f.file_type == "csv"));
    assert!(files
        .iter()
        .any(|f| f.file_type == "log" && f.filename.ends_with("_stdout.log")));
    assert!(files
        .iter()
        .all(|f| f.execution_id.as_deref() == Some(execution_id.as_str())));

    let logs = storage.get_execution_logs(&execution_id).unwrap();
    assert!(logs[0].message.contains("started with execution ID"));
    assert!(logs
        .iter()
        .any(|l| l.source == Some(LogSource::SpiderOutput) && l.message.contains("Data saved to rows.csv")));
    assert!(logs
        .iter()
        .any(|l| l.source == Some(LogSource::SpiderRunner) && l.message.contains("completed successfully")));
    drop(storage);

    assert_eq!(scripts_left(&root), 0);
}

#[tokio::test]
async fn test_failing_script_marks_error() {
    if !python_available() {
        return;
    }
    let root = TempDir::new().unwrap();
    let code = "raise ValueError('boom')";
    let (engine, ids) = create_engine(create_test_config(&root), &[script_spider("broken", code)]);
    let spider_id = ids[0];

    let execution_id = engine.start(spider_id).unwrap();
    engine.wait_for_completion(spider_id).await;

    let storage = engine.storage();
    let storage = storage.lock().unwrap();
    let spider = storage.get_spider(spider_id).unwrap().unwrap();
    assert_eq!(spider.status, SpiderStatus::Error);
    assert_eq!(spider.error_count, 1);
    assert_eq!(spider.success_count, 0);

    let logs = storage.get_execution_logs(&execution_id).unwrap();
    assert!(logs.iter().any(|l| l.level == LogLevel::Error
        && l.source == Some(LogSource::SpiderError)
        && l.message.contains("boom")));
    assert!(logs
        .iter()
        .any(|l| l.source == Some(LogSource::SpiderRunner) && l.message.contains("failed with exit code 1")));

    let stderr_file = storage
        .get_spider_files(spider_id)
        .unwrap()
        .into_iter()
        .find(|f| f.file_type == "log" && f.filename.ends_with("_stderr.log"))
        .unwrap();
    let stderr = std::fs::read_to_string(&stderr_file.path).unwrap();
    let stderr_lines = stderr.lines().filter(|line| !line.trim().is_empty()).count();
    let error_entries = logs
        .iter()
        .filter(|l| l.level == LogLevel::Error && l.source == Some(LogSource::SpiderError))
        .count();
    assert!(stderr_lines > 1);
    assert_eq!(error_entries, stderr_lines);
}

#[tokio::test]
async fn test_start_twice_then_stop() {
    if !python_available() {
        return;
    }
    let root = TempDir::new().unwrap();
    let code = "import time\ntime.sleep(30)";
    let (engine, ids) = create_engine(create_test_config(&root), &[script_spider("sleeper", code)]);
    let spider_id = ids[0];

    let execution_id = engine.start(spider_id).unwrap();
    assert!(matches!(
        engine.start(spider_id).unwrap_err(),
        EngineError::AlreadyRunning { .. }
    ));
    assert_eq!(engine.running_spiders(), vec![spider_id]);
    assert_eq!(engine.status(spider_id).unwrap().execution_id, execution_id);

    tokio::time::sleep(Duration::from_millis(300)).await;
    let (first, second) = tokio::join!(engine.stop(spider_id), engine.stop(spider_id));
    first.unwrap();
    second.unwrap();

    assert!(engine.status(spider_id).is_none());
    assert!(matches!(
        engine.stop(spider_id).await.unwrap_err(),
        EngineError::NotRunning { .. }
    ));

    let storage = engine.storage();
    let storage = storage.lock().unwrap();
    let spider = storage.get_spider(spider_id).unwrap().unwrap();
    assert_eq!(spider.status, SpiderStatus::Stopped);
    assert_eq!(spider.success_count, 0);
    assert_eq!(spider.error_count, 0);

    let logs = storage.get_execution_logs(&execution_id).unwrap();
    let stopped: Vec<_> = logs
        .iter()
        .filter(|l| l.message.contains("was stopped manually"))
        .collect();
    assert_eq!(stopped.len(), 1);
    assert_eq!(stopped[0].level, LogLevel::Warning);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_starts_admit_one() {
    if !python_available() {
        return;
    }
    let root = TempDir::new().unwrap();
    let (engine, ids) = create_engine(
        create_test_config(&root),
        &[script_spider("racer", "import time\ntime.sleep(30)")],
    );
    let spider_id = ids[0];

    let barrier = Arc::new(Barrier::new(8));
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let engine = engine.clone();
            let barrier = barrier.clone();
            tokio::spawn(async move {
                barrier.wait().await;
                engine.start(spider_id)
            })
        })
        .collect();

    let mut started = 0;
    let mut rejected = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => started += 1,
            Err(EngineError::AlreadyRunning { .. }) => rejected += 1,
            Err(e) => panic!("unexpected start error: {}", e),
        }
    }
    assert_eq!(started, 1);
    assert_eq!(rejected, 7);
    assert_eq!(engine.running_spiders(), vec![spider_id]);

    engine.stop(spider_id).await.unwrap();

    let storage = engine.storage();
    let spider = storage.lock().unwrap().get_spider(spider_id).unwrap().unwrap();
    assert_eq!(spider.run_count, 1);
}

#[tokio::test]
async fn test_spider_can_run_again_after_stop() {
    if !python_available() {
        return;
    }
    let root = TempDir::new().unwrap();
    let (engine, ids) = create_engine(
        create_test_config(&root),
        &[script_spider("again", "import time\ntime.sleep(30)")],
    );
    let spider_id = ids[0];

    engine.start(spider_id).unwrap();
    engine.stop(spider_id).await.unwrap();

    let second = engine.start(spider_id).unwrap();
    assert_eq!(engine.status(spider_id).unwrap().execution_id, second);
    engine.stop(spider_id).await.unwrap();

    let storage = engine.storage();
    let spider = storage.lock().unwrap().get_spider(spider_id).unwrap().unwrap();
    assert_eq!(spider.run_count, 2);
}

#[tokio::test]
async fn test_direct_call_returns_script_data() {
    if !python_available() {
        return;
    }
    let root = TempDir::new().unwrap();
    let code = "def spider_main():\n    return [{'x': 1}, {'x': 2}]";
    let (engine, ids) = create_engine(create_test_config(&root), &[script_spider("direct", code)]);
    let spider_id = ids[0];

    let result = engine.run_synchronous(spider_id, None).await.unwrap();
    assert!(result.success, "{:?}", result);
    assert_eq!(result.count, 2);
    assert_eq!(result.data, vec![json!({"x": 1}), json!({"x": 2})]);
    assert!(result.execution_time > 0.0);

    let storage = engine.storage();
    let storage = storage.lock().unwrap();
    let spider = storage.get_spider(spider_id).unwrap().unwrap();
    assert_eq!(spider.run_count, 1);
    assert_eq!(spider.success_count, 1);
    assert_eq!(spider.status, SpiderStatus::Inactive);
    assert!(storage.get_spider_files(spider_id).unwrap().is_empty());
    drop(storage);

    assert_eq!(scripts_left(&root), 0);
}

#[tokio::test]
async fn test_direct_call_code_override_without_data() {
    if !python_available() {
        return;
    }
    let root = TempDir::new().unwrap();
    let (engine, ids) = create_engine(
        create_test_config(&root),
        &[script_spider("override", "raise RuntimeError('stored body')")],
    );
    let spider_id = ids[0];

    let result = engine
        .run_synchronous(spider_id, Some("def spider_main():\n    return []"))
        .await
        .unwrap();
    assert!(!result.success);
    assert_eq!(result.message.as_deref(), Some("No data extracted"));
    assert!(result.failure.is_none());

    let storage = engine.storage();
    let spider = storage.lock().unwrap().get_spider(spider_id).unwrap().unwrap();
    assert_eq!(spider.error_count, 1);
}

#[tokio::test]
async fn test_direct_call_without_result_object() {
    if !python_available() {
        return;
    }
    let root = TempDir::new().unwrap();
    let code = "print('noise')\nimport sys\nsys.exit(0)";
    let (engine, ids) = create_engine(create_test_config(&root), &[script_spider("quiet", code)]);
    let spider_id = ids[0];

    let result = engine.run_synchronous(spider_id, None).await.unwrap();
    assert!(!result.success);
    assert_eq!(result.failure, Some(DirectFailure::ResultParseFailure));
    assert_eq!(result.stdout.as_deref().map(str::trim), Some("noise"));
    assert!(result.data.is_empty());

    let storage = engine.storage();
    let spider = storage.lock().unwrap().get_spider(spider_id).unwrap().unwrap();
    assert_eq!(spider.error_count, 1);
    assert_eq!(spider.success_count, 0);
}

#[tokio::test]
async fn test_direct_call_timeout() {
    if !python_available() {
        return;
    }
    let root = TempDir::new().unwrap();
    let mut config = create_test_config(&root);
    config.engine.direct_call_timeout_seconds = 1;
    let code = "import time\nlog_message('INFO', 'sleeping')\ntime.sleep(30)";
    let (engine, ids) = create_engine(config, &[script_spider("slow", code)]);
    let spider_id = ids[0];

    let result = engine.run_synchronous(spider_id, None).await.unwrap();
    assert!(!result.success);
    assert_eq!(result.failure, Some(DirectFailure::Timeout));
    assert!(result.execution_time < 15.0);
    assert!(result.stderr.as_deref().unwrap_or("").contains("sleeping"));

    let storage = engine.storage();
    let spider = storage.lock().unwrap().get_spider(spider_id).unwrap().unwrap();
    assert_eq!(spider.error_count, 1);
    assert_eq!(spider.success_count, 0);
}

#[tokio::test]
async fn test_direct_call_rate_limit() {
    if !python_available() {
        return;
    }
    let root = TempDir::new().unwrap();
    let mut config = create_test_config(&root);
    config.rate_limit.interval_minutes = 5;
    let code = "def spider_main():\n    return [{'ok': True}]";
    let (engine, ids) = create_engine(config, &[script_spider("limited", code)]);
    let spider_id = ids[0];

    assert!(engine.run_synchronous(spider_id, None).await.unwrap().success);

    match engine.run_synchronous(spider_id, None).await.unwrap_err() {
        EngineError::RateLimited {
            remaining_seconds,
            interval_minutes,
            ..
        } => {
            assert_eq!(interval_minutes, 5);
            assert!(remaining_seconds > 200.0);
        }
        other => panic!("expected rate limit, got {other}"),
    }

    engine
        .storage()
        .lock()
        .unwrap()
        .set_setting("system", r#"{"apiCallIntervalMinutes": 0}"#)
        .unwrap();
    assert!(engine.run_synchronous(spider_id, None).await.unwrap().success);

    let storage = engine.storage();
    let spider = storage.lock().unwrap().get_spider(spider_id).unwrap().unwrap();
    assert_eq!(spider.run_count, 2);
    assert_eq!(spider.success_count, 2);
}

#[tokio::test]
async fn test_rule_spider_direct_call() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/list"))
        .respond_with(ResponseTemplate::new(200).set_body_string(LISTING))
        .mount(&server)
        .await;

    let root = TempDir::new().unwrap();
    let (engine, ids) = create_engine(
        create_test_config(&root),
        &[rule_spider("rules", format!("{}/list", server.uri()))],
    );
    let spider_id = ids[0];

    let result = engine.run_synchronous(spider_id, None).await.unwrap();
    assert!(result.success, "{:?}", result);
    assert_eq!(result.count, 3);
    assert_eq!(result.data[0], json!({"id": "1", "title": "First"}));
    assert_eq!(result.data[2], json!({"id": "3", "title": "Third"}));
    assert_eq!(result.url, format!("{}/list", server.uri()));
}

#[tokio::test]
async fn test_rule_spider_fetch_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let root = TempDir::new().unwrap();
    let (engine, ids) = create_engine(
        create_test_config(&root),
        &[rule_spider("down", format!("{}/list", server.uri()))],
    );
    let spider_id = ids[0];

    let result = engine.run_synchronous(spider_id, None).await.unwrap();
    assert!(!result.success);
    assert_eq!(result.failure, Some(DirectFailure::NonZeroExit { exit_code: 1 }));

    let storage = engine.storage();
    let spider = storage.lock().unwrap().get_spider(spider_id).unwrap().unwrap();
    assert_eq!(spider.error_count, 1);
}

#[tokio::test]
async fn test_rule_spider_run_writes_results_file() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/list"))
        .respond_with(ResponseTemplate::new(200).set_body_string(LISTING))
        .mount(&server)
        .await;

    let root = TempDir::new().unwrap();
    let (engine, ids) = create_engine(
        create_test_config(&root),
        &[rule_spider("rules-run", format!("{}/list", server.uri()))],
    );
    let spider_id = ids[0];

    let execution_id = engine.start(spider_id).unwrap();
    engine.wait_for_completion(spider_id).await;

    let storage = engine.storage();
    let storage = storage.lock().unwrap();
    let spider = storage.get_spider(spider_id).unwrap().unwrap();
    assert_eq!(spider.status, SpiderStatus::Inactive);
    assert_eq!(spider.success_count, 1);

    let files = storage.get_spider_files(spider_id).unwrap();
    let results = files
        .iter()
        .find(|f| f.filename == "spider_results.json")
        .expect("results file registered");
    let records: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&results.path).unwrap()).unwrap();
    assert_eq!(records.as_array().unwrap().len(), 3);

    let logs = storage.get_execution_logs(&execution_id).unwrap();
    assert!(logs
        .iter()
        .any(|l| l.source == Some(LogSource::SpiderOutput) && l.message.contains("Extracted 3 records")));
}

#[tokio::test]
async fn test_invalid_ruleset_fails_run() {
    let root = TempDir::new().unwrap();
    let (engine, ids) = create_engine(
        create_test_config(&root),
        &[NewSpider {
            name: "no-url".to_string(),
            config: json!({"type": "rules", "rules": []}),
            ..Default::default()
        }],
    );
    let spider_id = ids[0];

    let execution_id = engine.start(spider_id).unwrap();
    engine.wait_for_completion(spider_id).await;

    let storage = engine.storage();
    let storage = storage.lock().unwrap();
    let spider = storage.get_spider(spider_id).unwrap().unwrap();
    assert_eq!(spider.status, SpiderStatus::Error);
    assert_eq!(spider.error_count, 1);

    let logs = storage.get_execution_logs(&execution_id).unwrap();
    assert!(logs
        .iter()
        .any(|l| l.level == LogLevel::Error && l.message.contains("execution failed")));
}
