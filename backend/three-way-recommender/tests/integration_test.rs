use std::io::Write;
use three_way_recommender::config::EvaluationConfig;
use three_way_recommender::jobs::{evaluate, EvaluationJob};
use three_way_recommender::models::{Behavior, CostMatrix, Like};
use three_way_recommender::services::rating_store::{
    self, DatasetError, RatingBounds, RatingFormat,
};

// 3 users × 4 items
//   user 0: item0 = 5, item1 = 3, item2 = -4
//   user 1: item0 = 2, item1 = -1, item3 = 6
//   user 2: item0 = 4, item2 = 1
// popularity: item0 = 3, item1 = 2, item2 = 2, item3 = 1
const TRIPLES: &str = "0,0,5\n0,1,3\n0,2,-4\n1,0,2\n1,1,-1\n1,3,6\n2,0,4\n2,2,1\n";
const DENSE: &str = "3\t5\t3\t-4\t99\n3\t2\t-1\t99\t6\n2\t4\t99\t1\t99\n";

fn write_dataset(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().expect("create temp dataset");
    file.write_all(contents.as_bytes()).expect("write temp dataset");
    file.flush().expect("flush temp dataset");
    file
}

/// popular (> 0.8·3): item0; semi-popular (1.5, 2.4]: item1, item2.
/// One recommend and two promote slots, so the first popularity round is
/// forced to recommend item0 and promote items 1 and 2.
fn scenario_config(path: &std::path::Path, format: RatingFormat) -> EvaluationConfig {
    let mut config = EvaluationConfig::default();
    config.dataset.path = path.to_path_buf();
    config.dataset.format = format;
    config.factorization.rank = 2;
    config.factorization.pretrain_rounds = 20;
    config.factorization.incremental_rounds = 5;
    config.decision.recommendation_length = 3;
    config.decision.recommendation_ratio = 0.34;
    config.decision.popularity_thresholds = [0.5, 0.8];
    config.decision.maturity_threshold = 10.0;
    config.cost.cost_matrix = CostMatrix([[2.0, 40.0], [20.0, 10.0], [50.0, 6.0]]);
    config.cost.like_threshold = 0.0;
    config.run.repeat_times = 2;
    config
}

#[tokio::test]
async fn test_end_to_end_scenario_cost() {
    let dataset = write_dataset(TRIPLES);
    let config = scenario_config(dataset.path(), RatingFormat::Triples);
    assert!(config.validate().is_ok());

    let report = EvaluationJob::new(config).run().await.unwrap();

    assert_eq!(report.users, 3);
    assert_eq!(report.items, 4);
    assert_eq!(report.ratings, 8);
    assert!((report.mean_rating - 2.0).abs() < 1e-12);
    assert_eq!(report.runs.len(), 2);

    for run in &report.runs {
        // user0: 6 + 10 + 20, user1: 6 + 20 + 40, user2: 6 + 10
        assert_eq!(run.total_cost, 118.0);
        assert_eq!(run.mature_users, 3);
        assert_eq!(run.stuck_users, 0);
        assert_eq!(run.popularity_rounds, 3);
        assert_eq!(run.model_rounds, 0);

        let stats = &run.statistics;
        assert_eq!(stats.count(Behavior::Recommend, Like::Like), 3);
        assert_eq!(stats.count(Behavior::Recommend, Like::Dislike), 0);
        assert_eq!(stats.count(Behavior::Promote, Like::Like), 2);
        assert_eq!(stats.count(Behavior::Promote, Like::Dislike), 2);
        assert_eq!(stats.count(Behavior::NonRecommend, Like::Like), 1);
        assert_eq!(stats.count(Behavior::NonRecommend, Like::Dislike), 0);
    }

    assert_eq!(report.cost.mean, 118.0);
    assert_eq!(report.cost.std_dev, 0.0);
    assert_eq!(report.cost.min, 118.0);
    assert_eq!(report.cost.max, 118.0);
}

#[tokio::test]
async fn test_dense_and_triples_formats_agree() {
    let dense = write_dataset(DENSE);
    let triples = write_dataset(TRIPLES);

    let from_dense = EvaluationJob::new(scenario_config(dense.path(), RatingFormat::Dense))
        .run()
        .await
        .unwrap();
    let from_triples = EvaluationJob::new(scenario_config(triples.path(), RatingFormat::Triples))
        .run()
        .await
        .unwrap();

    assert_eq!(from_dense.ratings, from_triples.ratings);
    assert_eq!(from_dense.cost, from_triples.cost);
}

#[tokio::test]
async fn test_report_written_as_json() {
    let dataset = write_dataset(TRIPLES);
    let dir = tempfile::tempdir().unwrap();
    let report_path = dir.path().join("report.json");

    let mut config = scenario_config(dataset.path(), RatingFormat::Triples);
    config.run.report_path = Some(report_path.clone());
    EvaluationJob::new(config).run().await.unwrap();

    let written = std::fs::read_to_string(&report_path).unwrap();
    let json: serde_json::Value = serde_json::from_str(&written).unwrap();
    assert_eq!(json["runs"].as_array().unwrap().len(), 2);
    assert_eq!(json["cost"]["mean"].as_f64(), Some(118.0));
    assert!(json["started_at"].is_string());
}

#[tokio::test]
async fn test_unreachable_maturity_gets_stuck() {
    let dataset = write_dataset(TRIPLES);
    let mut config = scenario_config(dataset.path(), RatingFormat::Triples);
    config.decision.maturity_threshold = 1.0e6;
    config.run.repeat_times = 1;

    let report = EvaluationJob::new(config).run().await.unwrap();
    let run = &report.runs[0];
    assert_eq!(run.mature_users, 0);
    assert_eq!(run.stuck_users, 3);
    assert_eq!(run.statistics.total(), 8);
}

#[tokio::test]
async fn test_single_slot_popularity_round_with_fixed_seed() {
    use three_way_recommender::models::{DisclosureState, Quota, StageSelection};
    use three_way_recommender::utils::user_rng;

    let dataset = write_dataset(TRIPLES);
    let store = rating_store::load(
        dataset.path(),
        RatingFormat::Triples,
        RatingBounds::new(-10.0, 10.0),
    )
    .await
    .unwrap();
    assert_eq!(
        (0..4).map(|i| store.item_popularity(i)).collect::<Vec<_>>(),
        vec![3, 2, 2, 1]
    );

    let quota = Quota {
        num_recommend: 1,
        num_promote: 1,
    };
    let popularity = three_way_recommender::PopularityRecommender::new(&store, [0.5, 0.8], quota);
    assert_eq!(popularity.popular_items(), &[0]);
    assert_eq!(popularity.semi_popular_items(), &[1, 2]);

    // item2 was already promoted, so item1 is the only promote candidate left
    let mut state = DisclosureState::new();
    state.apply(StageSelection {
        recommended: vec![],
        promoted: vec![2],
    });
    let selection = popularity
        .three_way_recommend(&mut state, &mut user_rng(42, 0))
        .unwrap();
    assert_eq!(selection.recommended, vec![0]);
    assert_eq!(selection.promoted, vec![1]);
    assert!(state.recommended().contains(&0));
    assert!(state.promoted().contains(&1));

    // both pools are empty now
    assert!(popularity
        .three_way_recommend(&mut state, &mut user_rng(42, 0))
        .is_none());

    // a fresh round draws one of the two semi-popular items, the same one
    // for the same seed
    let draw = || {
        let mut fresh = DisclosureState::new();
        popularity
            .three_way_recommend(&mut fresh, &mut user_rng(42, 0))
            .unwrap()
    };
    let first = draw();
    assert_eq!(first.recommended, vec![0]);
    assert_eq!(first.promoted.len(), 1);
    assert!([1, 2].contains(&first.promoted[0]));
    assert_eq!(draw(), first);
}

#[tokio::test]
async fn test_zero_popularity_thresholds_mark_rated_items_popular() {
    let dataset = write_dataset(TRIPLES);
    let bounds = RatingBounds::new(-10.0, 10.0);
    let store = rating_store::load(dataset.path(), RatingFormat::Triples, bounds)
        .await
        .unwrap();

    let popularity = three_way_recommender::PopularityRecommender::new(
        &store,
        [0.0, 0.0],
        three_way_recommender::models::Quota::from_length_ratio(2, 0.5),
    );
    assert_eq!(popularity.popular_items(), &[0, 1, 2, 3]);
    assert!(popularity.semi_popular_items().is_empty());
}

#[tokio::test]
async fn test_malformed_dataset_is_rejected() {
    let dataset = write_dataset("0,0,5\n0,1\n");
    let config = scenario_config(dataset.path(), RatingFormat::Triples);

    let err = EvaluationJob::new(config).run().await.unwrap_err();
    match err.downcast_ref::<DatasetError>() {
        Some(DatasetError::DataFormat { line, .. }) => assert_eq!(*line, 2),
        other => panic!("expected DataFormat, got {:?}", other),
    }
}

#[tokio::test]
async fn test_missing_dataset_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let config = scenario_config(&dir.path().join("missing.csv"), RatingFormat::Triples);

    let err = EvaluationJob::new(config).run().await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<DatasetError>(),
        Some(DatasetError::DataLoad { .. })
    ));
}

#[test]
fn test_evaluate_same_seed_is_reproducible() {
    let dataset = write_dataset(TRIPLES);
    let mut config = scenario_config(dataset.path(), RatingFormat::Triples);
    config.decision.maturity_threshold = 1.0e6;
    config.run.repeat_times = 1;

    let load = || {
        tokio_test::block_on(rating_store::load(
            dataset.path(),
            RatingFormat::Triples,
            RatingBounds::new(-10.0, 10.0),
        ))
        .unwrap()
    };

    let first = evaluate(load(), &config).unwrap();
    let second = evaluate(load(), &config).unwrap();
    assert_eq!(first.runs[0].total_cost, second.runs[0].total_cost);
    assert_eq!(first.runs[0].statistics, second.runs[0].statistics);
}
