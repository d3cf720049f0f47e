use three_way_recommender::jobs::run_evaluation_job;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    let json_logs = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    if json_logs {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(EnvFilter::from_default_env())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer())
            .with(EnvFilter::from_default_env())
            .init();
    }

    info!("Starting three-way recommender evaluation");

    let report = run_evaluation_job().await.map_err(|e| {
        error!("Evaluation failed: {:#}", e);
        e
    })?;

    for run in &report.runs {
        info!(
            run = run.run,
            total_cost = run.total_cost,
            statistics = ?run.statistics.0,
            "Run result"
        );
    }
    info!(
        mean_cost = report.cost.mean,
        std_dev = report.cost.std_dev,
        "Total cost {:.2} ± {:.2} (min {:.2}, max {:.2})",
        report.cost.mean,
        report.cost.std_dev,
        report.cost.min,
        report.cost.max
    );

    Ok(())
}
