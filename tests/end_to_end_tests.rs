//! Full runs: run definition file -> dispatcher -> report on disk.

mod common;

use common::{client, TestServer};
use std::sync::Arc;
use std::time::Duration;
use streamload::report::{self, RunInfo};
use streamload::{
    Config, Dispatcher, DispatcherConfig, FailureKind, HttpProbe, MetricField, MetricsAggregator,
    RunPlan, RunReport,
};

async fn run_plan(plan: &RunPlan, probe: HttpProbe) -> (RunReport, Vec<streamload::RequestMetric>) {
    let aggregator = Arc::new(MetricsAggregator::new());
    let dispatcher = Dispatcher::new(
        probe,
        aggregator.clone(),
        DispatcherConfig::new(plan.concurrency, plan.total_requests),
    );
    let outcome = dispatcher.run(plan.request_source()).await;
    let metrics = aggregator.snapshot();
    (RunReport::from_metrics(&metrics, outcome.elapsed), metrics)
}

#[tokio::test]
async fn test_csv_rows_cycle_through_requests() {
    let server = TestServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("prompts.csv"), "prompt\nalpha\nbeta\ngamma\n").unwrap();
    let config_path = dir.path().join("run.json");
    std::fs::write(
        &config_path,
        serde_json::json!({
            "url": server.url("/stream?chunks=2&delay_ms=5"),
            "body": {"messages": [{"role": "user", "content": "{{prompt}}"}], "stream": true},
            "concurrency": 1,
            "total_requests": 5,
            "timeout": 5,
            "data_source": {"type": "csv", "file": "prompts.csv", "column": "prompt"}
        })
        .to_string(),
    )
    .unwrap();

    let mut config = Config::for_test();
    config.config_file = Some(config_path);
    let plan = config.load_plan().unwrap();
    let (report, _) = run_plan(&plan, HttpProbe::new(client(plan.concurrency))).await;

    assert_eq!(report.success_count, 5);
    let prompts: Vec<String> = server
        .bodies()
        .iter()
        .map(|body| {
            let value: serde_json::Value = serde_json::from_str(body).unwrap();
            value["messages"][0]["content"].as_str().unwrap().to_string()
        })
        .collect();
    assert_eq!(prompts, ["alpha", "beta", "gamma", "alpha", "beta"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_server_sees_bounded_concurrency() {
    let server = TestServer::start().await;
    let mut config = Config::for_test();
    config.url = Some(server.url("/stream?chunks=3&delay_ms=20"));
    config.concurrency = 3;
    config.total_requests = 12;
    let plan = config.load_plan().unwrap();

    let (report, metrics) = run_plan(&plan, HttpProbe::new(client(3))).await;

    assert_eq!(report.total_requests, 12);
    assert_eq!(report.success_count, 12);
    assert_eq!(server.hits(), 12);
    assert!(server.max_in_flight() <= 3, "server saw {}", server.max_in_flight());
    assert!(metrics.iter().all(|m| !m.end_marker_seen));
    let ttft = report.summary(MetricField::Ttft).unwrap();
    assert_eq!(ttft.count, 12);
}

#[tokio::test]
async fn test_failures_and_report_file() {
    let server = TestServer::start().await;
    let mut config = Config::for_test();
    config.url = Some(server.url("/overloaded"));
    config.concurrency = 2;
    config.total_requests = 4;
    let plan = config.load_plan().unwrap();

    let (report, metrics) = run_plan(&plan, HttpProbe::new(client(2))).await;

    assert_eq!(report.failure_count, 4);
    assert_eq!(report.failures_by_kind.get(&FailureKind::HttpStatus), Some(&4));
    assert_eq!(report.failures_by_message.get("HTTP 500: model overloaded"), Some(&4));
    assert_eq!(report.ttft, None);
    assert!(report::render_text(&report).contains("no successful samples"));

    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("test_results.json");
    let info = RunInfo::new(plan.template.url.as_str(), plan.concurrency, plan.total_requests);
    report::save_json(&output, &info, &report, &metrics).unwrap();

    let saved: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&output).unwrap()).unwrap();
    assert_eq!(saved["summary"]["failed_count"], 4);
    assert_eq!(saved["metrics"].as_array().unwrap().len(), 4);
    assert_eq!(saved["metrics"][0]["error_kind"], "http_status");
}

#[tokio::test]
async fn test_stalled_stream_counts_as_timeout() {
    let server = TestServer::start().await;
    let mut config = Config::for_test();
    config.url = Some(server.url("/hang"));
    config.concurrency = 1;
    config.total_requests = 1;
    config.timeout_secs = 1;
    let plan = config.load_plan().unwrap();

    let (report, metrics) = run_plan(&plan, HttpProbe::new(client(1))).await;

    assert_eq!(report.failures_by_kind.get(&FailureKind::Timeout), Some(&1));
    let metric = &metrics[0];
    assert_eq!(metric.first_chunk_time, None);
    let total = metric.total_time();
    assert!(total >= Duration::from_secs(1));
    assert!(total < Duration::from_millis(1500));
}
