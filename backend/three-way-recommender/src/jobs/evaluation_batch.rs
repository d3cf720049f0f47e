// ============================================
// Evaluation Batch Job (離線評估任務)
// ============================================
//
// Offline leave-user-out evaluation of the three-way recommender.
//
// Workflow:
// 1. Load the rating dataset (async file read)
// 2. Disclose everything and center ratings around the mean
// 3. Pretrain the factor model
// 4. Run the disclosure loop for every user, `repeat_times` times
// 5. Log the cost summary and optionally write it as JSON
//
// Usage:
//   TCR_DATASET_PATH=data/jester-data-1/jester-data-1.txt TCR_REPEAT_TIMES=5 three-way-recommender

use crate::config::EvaluationConfig;
use crate::services::evaluation::{CostEvaluator, EvaluationReport, LeaveUserOutRunner};
use crate::services::factorization::FactorModel;
use crate::services::popularity::PopularityRecommender;
use crate::services::rating_store::{self, RatingBounds, RatingStore};
use anyhow::{Context, Result};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::path::Path;
use std::time::Instant;
use tracing::info;

/// Evaluation batch job runner
pub struct EvaluationJob {
    config: EvaluationConfig,
}

impl EvaluationJob {
    pub fn new(config: EvaluationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EvaluationConfig {
        &self.config
    }

    /// Loads the dataset, evaluates it on a blocking thread and writes the
    /// report if a path is configured.
    pub async fn run(&self) -> Result<EvaluationReport> {
        let dataset = &self.config.dataset;
        let bounds = RatingBounds::new(dataset.rating_lower_bound, dataset.rating_upper_bound);
        let store = rating_store::load(&dataset.path, dataset.format, bounds)
            .await
            .with_context(|| format!("failed to load dataset {}", dataset.path.display()))?;

        let config = self.config.clone();
        let report = tokio::task::spawn_blocking(move || evaluate(store, &config))
            .await
            .context("evaluation task panicked")??;

        if let Some(path) = &self.config.run.report_path {
            write_report(path, &report).await?;
        }
        Ok(report)
    }
}

/// CPU-bound part of the job: centering, pretraining and the repeated runs.
pub fn evaluate(mut store: RatingStore, config: &EvaluationConfig) -> Result<EvaluationReport> {
    let start_time = Instant::now();

    store.set_all_training();
    store
        .adjust_using_mean_rating()
        .context("failed to center ratings")?;

    let mut rng = StdRng::seed_from_u64(config.run.seed);
    let mut model = FactorModel::pretrain(&store, &config.factorization, &mut rng);

    let decision = &config.decision;
    let popularity =
        PopularityRecommender::new(&store, decision.popularity_thresholds, decision.quota());
    let evaluator = CostEvaluator::new(&config.cost, store.mean_rating());
    let runner = LeaveUserOutRunner::new(&popularity, decision, &evaluator);

    let report = runner
        .repeated_runs(
            &mut store,
            &mut model,
            config.run.seed,
            config.run.repeat_times,
        )
        .context("leave-user-out evaluation failed")?;

    info!(
        duration_ms = start_time.elapsed().as_millis() as u64,
        "Evaluation completed"
    );
    Ok(report)
}

async fn write_report(path: &Path, report: &EvaluationReport) -> Result<()> {
    let json = serde_json::to_vec_pretty(report).context("failed to serialize report")?;
    tokio::fs::write(path, json)
        .await
        .with_context(|| format!("failed to write report to {}", path.display()))?;
    info!(path = %path.display(), "Wrote evaluation report");
    Ok(())
}

/// Entry point used by the binary.
pub async fn run_evaluation_job() -> Result<EvaluationReport> {
    info!("Initializing evaluation batch job");

    let config = EvaluationConfig::from_env().context("invalid configuration")?;
    let job = EvaluationJob::new(config);
    let report = job.run().await?;

    info!(
        runs = report.runs.len(),
        mean_cost = report.cost.mean,
        std_dev = report.cost.std_dev,
        min_cost = report.cost.min,
        max_cost = report.cost.max,
        "Evaluation batch job completed"
    );
    Ok(report)
}
