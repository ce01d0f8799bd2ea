//! # streamload - command line entry point
//!
//! Loads the run plan, drives it through the dispatcher, prints the report
//! and saves detailed results as JSON.

use std::process::ExitCode;
use std::sync::Arc;
use streamload::report::{self, RunInfo};
use streamload::{
    setup_shutdown_handler, Config, Dispatcher, DispatcherConfig, GracefulShutdown,
    HttpClientBuilder, HttpProbe, LogProgress, MetricsAggregator,
};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> ExitCode {
    // Parse configuration from CLI args and .env file
    let config = Config::parse_args();

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let plan = config.load_plan()?;

    let client = HttpClientBuilder::from_config(&config)
        .concurrency(plan.concurrency)
        .build()?;
    let probe = HttpProbe::new(client)
        .expected_status(config.expected_status_code())
        .end_marker(config.end_marker.clone().into_bytes());

    let source = plan.request_source();
    let info = RunInfo::new(plan.template.url.as_str(), plan.concurrency, plan.total_requests)
        .with_data_rows(source.row_count());
    info!("\n{}", report::render_banner(&info));
    if let Some(file) = &plan.data_file {
        info!("Data file: {}", file.display());
    }

    let shutdown = GracefulShutdown::new();
    setup_shutdown_handler(&shutdown);

    let capacity = usize::try_from(plan.total_requests).unwrap_or(usize::MAX).min(1 << 20);
    let aggregator = Arc::new(MetricsAggregator::with_capacity(capacity));
    let dispatcher = Dispatcher::new(
        probe,
        aggregator.clone(),
        DispatcherConfig::new(plan.concurrency, plan.total_requests),
    )
    .with_progress(LogProgress)
    .with_cancellation(shutdown.token());

    let outcome = dispatcher.run(source).await;
    shutdown.complete_shutdown();

    if outcome.source_exhausted {
        warn!(
            "Only {} of {} requests could be prepared",
            outcome.dispatched, plan.total_requests
        );
    }

    let metrics = aggregator.snapshot();
    let mut run_report = streamload::RunReport::from_metrics(&metrics, outcome.elapsed);
    run_report.cancelled = outcome.cancelled;

    println!("{}", report::render_text(&run_report));
    report::save_json(&config.output, &info, &run_report, &metrics)?;

    Ok(())
}
