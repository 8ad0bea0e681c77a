//! Consensus orchestrator against scripted collaborators


use mocks::{fast_config, idea, strategy, FixedQuotes, ScriptedOracle, StubRenderer};
use market_data::TimeFrame;
use rust_decimal::Decimal;
use signal_api::analysis::{AnalysisConfig, AnalysisError, Analyzer, Outcome};
use signal_api::models::Direction;
use signal_api::oracle::OracleError;
use signal_api::MetricsCollector;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

struct Harness {
    _dir: TempDir,
    renderer: Arc<StubRenderer>,
    oracle: Arc<ScriptedOracle>,
    quotes: Arc<FixedQuotes>,
    analyzer: Analyzer,
}

fn harness(oracle: ScriptedOracle, config: AnalysisConfig) -> Harness {
    harness_with(oracle, config, |r| r)
}

fn harness_with(
    oracle: ScriptedOracle,
    config: AnalysisConfig,
    customize: impl FnOnce(StubRenderer) -> StubRenderer,
) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let renderer = Arc::new(customize(StubRenderer::new(dir.path())));
    let oracle = Arc::new(oracle);
    let quotes = Arc::new(FixedQuotes::new(&[("BTC/USDT", "101.5")]));
    let analyzer = Analyzer::new(
        renderer.clone(),
        oracle.clone(),
        quotes.clone(),
        config,
        MetricsCollector::new(),
    );
    Harness {
        _dir: dir,
        renderer,
        oracle,
        quotes,
        analyzer,
    }
}

#[tokio::test]
async fn test_two_to_one_majority_succeeds() {
    let h = harness(
        ScriptedOracle::voting(&[Direction::Long, Direction::Long, Direction::Short]),
        fast_config(),
    );

    let outcome = h.analyzer.run_analysis("BTC/USDT", &strategy()).await.unwrap();
    match outcome {
        Outcome::Success {
            idea,
            consensus,
            charts,
        } => {
            assert_eq!(idea.direction, Direction::Long);
            assert_eq!(consensus.to_string(), "2/3");
            assert_eq!(charts.len(), 2);
            assert!(charts.iter().all(|c| c.path().exists()));
        }
        other => panic!("expected success, got {:?}", other),
    }
    // stopped at three votes
    assert_eq!(h.oracle.calls(), 3);
}

#[tokio::test]
async fn test_prompt_uses_one_price_snapshot() {
    let h = harness(
        ScriptedOracle::voting(&[Direction::Long, Direction::Long, Direction::Long]),
        fast_config(),
    );
    h.analyzer.run_analysis("BTC/USDT", &strategy()).await.unwrap();

    let prompts = h.oracle.prompts();
    assert_eq!(prompts.len(), 3);
    assert!(prompts
        .iter()
        .all(|p| p == "Analyze BTC/USDT at 101.5 on 1d, 4h"));
}

#[tokio::test]
async fn test_all_abstentions_yield_no_signal() {
    let h = harness(ScriptedOracle::new(vec![]), fast_config());

    let outcome = h.analyzer.run_analysis("BTC/USDT", &strategy()).await.unwrap();
    assert!(matches!(outcome, Outcome::NoSignal { .. }));
    assert_eq!(h.oracle.calls(), 5);
}

#[tokio::test]
async fn test_oracle_calls_bounded_by_max_attempts() {
    let config = AnalysisConfig {
        max_attempts: 4,
        target_successes: 3,
        ..fast_config()
    };
    // one vote then silence: never reaches the target
    let h = harness(ScriptedOracle::voting(&[Direction::Short]), config);

    let outcome = h.analyzer.run_analysis("BTC/USDT", &strategy()).await.unwrap();
    assert_eq!(h.oracle.calls(), 4);
    match outcome {
        Outcome::Ambiguous { tally } => {
            assert_eq!(tally.get(Direction::Short), 1);
            assert_eq!(tally.total(), 1);
        }
        other => panic!("expected ambiguous, got {:?}", other),
    }
}

#[tokio::test]
async fn test_split_vote_is_ambiguous() {
    let h = harness(
        ScriptedOracle::voting(&[Direction::Long, Direction::Short]),
        fast_config(),
    );

    match h.analyzer.run_analysis("BTC/USDT", &strategy()).await.unwrap() {
        Outcome::Ambiguous { tally } => {
            assert_eq!(tally.get(Direction::Long), 1);
            assert_eq!(tally.get(Direction::Short), 1);
        }
        other => panic!("expected ambiguous, got {:?}", other),
    }
    assert!(h.renderer.remaining().is_empty());
}

#[tokio::test]
async fn test_stage_two_rejection_discards_unanimous_winner() {
    let config = AnalysisConfig {
        self_validation: true,
        ..fast_config()
    };
    // three votes, then the critique answers "none"
    let h = harness(
        ScriptedOracle::voting(&[Direction::Long, Direction::Long, Direction::Long]),
        config,
    );

    let outcome = h.analyzer.run_analysis("BTC/USDT", &strategy()).await.unwrap();
    assert!(matches!(outcome, Outcome::NoSignal { .. }));
    assert_eq!(h.oracle.calls(), 4);
    assert!(h.renderer.remaining().is_empty());
}

#[tokio::test]
async fn test_stage_two_confirmation_returns_refined_idea() {
    let config = AnalysisConfig {
        self_validation: true,
        ..fast_config()
    };
    let mut refined = idea(Direction::Long);
    refined.symbol = "SOMETHING/ELSE".to_string();
    refined.stop_loss = 95.into();

    let h = harness(
        ScriptedOracle::new(vec![
            Ok(Some(idea(Direction::Long))),
            Ok(Some(idea(Direction::Long))),
            Ok(Some(idea(Direction::Short))),
            Ok(Some(refined)),
        ]),
        config,
    );

    let outcome = h.analyzer.run_analysis("BTC/USDT", &strategy()).await.unwrap();
    let Outcome::Success {
        idea,
        consensus,
        charts,
    } = outcome
    else {
        panic!("expected success");
    };
    assert_eq!(idea.symbol, "BTC/USDT");
    assert_eq!(idea.stop_loss, Decimal::from(95));
    assert_eq!(consensus.to_string(), "2/3");
    assert_eq!(charts.len(), 2);

    // stage 2 charts carry the representative's levels
    let annotated: Vec<_> = h.renderer.overlays().into_iter().flatten().collect();
    assert_eq!(annotated.len(), 2);
    assert_eq!(annotated[0].entry, Some(Decimal::from(100)));
    assert_eq!(annotated[0].stop_loss, Decimal::from(90));
    assert_eq!(annotated[0].take_profit, Decimal::from(120));

    let critique = h.oracle.prompts().pop().unwrap();
    assert!(critique.contains("Long setup"));
    assert!(critique.contains("\"take_profit\": \"120\""));

    // only the success charts survive
    assert_eq!(h.renderer.remaining().len(), 2);
    drop(charts);
    assert!(h.renderer.remaining().is_empty());
}

#[tokio::test]
async fn test_transient_errors_retried_within_attempt() {
    let h = harness(
        ScriptedOracle::new(vec![
            Err(OracleError::Transient("503".into())),
            Err(OracleError::Transient("timeout".into())),
            Ok(Some(idea(Direction::Short))),
            Ok(Some(idea(Direction::Short))),
            Ok(Some(idea(Direction::Short))),
        ]),
        fast_config(),
    );

    match h.analyzer.run_analysis("BTC/USDT", &strategy()).await.unwrap() {
        Outcome::Success { consensus, .. } => assert_eq!(consensus.to_string(), "3/3"),
        other => panic!("expected success, got {:?}", other),
    }
    assert_eq!(h.oracle.calls(), 5);
}

#[tokio::test]
async fn test_exhausted_retries_count_as_abstention() {
    let config = AnalysisConfig {
        max_attempts: 1,
        ..fast_config()
    };
    let h = harness(
        ScriptedOracle::new((0..10).map(|_| Err(OracleError::Transient("503".into()))).collect()),
        config,
    );

    let outcome = h.analyzer.run_analysis("BTC/USDT", &strategy()).await.unwrap();
    assert!(matches!(outcome, Outcome::NoSignal { .. }));
    // first call plus three retries
    assert_eq!(h.oracle.calls(), 4);
}

#[tokio::test]
async fn test_blocked_and_malformed_answers_are_not_retried() {
    let h = harness(
        ScriptedOracle::new(vec![
            Err(OracleError::Blocked("SAFETY".into())),
            Err(OracleError::Malformed {
                reason: "no JSON object".into(),
                raw: "I cannot help with that".into(),
            }),
            Ok(Some(idea(Direction::Long))),
            Ok(Some(idea(Direction::Long))),
            Ok(None),
        ]),
        fast_config(),
    );

    match h.analyzer.run_analysis("BTC/USDT", &strategy()).await.unwrap() {
        Outcome::Success { consensus, .. } => assert_eq!(consensus.to_string(), "2/2"),
        other => panic!("expected success, got {:?}", other),
    }
    assert_eq!(h.oracle.calls(), 5);
}

#[tokio::test]
async fn test_rejected_request_aborts_the_run() {
    let h = harness(
        ScriptedOracle::new(vec![Err(OracleError::Rejected {
            status: 403,
            message: "API key invalid".into(),
        })]),
        fast_config(),
    );

    let err = h
        .analyzer
        .run_analysis("BTC/USDT", &strategy())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        AnalysisError::Oracle(OracleError::Rejected { status: 403, .. })
    ));
    assert_eq!(h.oracle.calls(), 1);
    assert_eq!(h.analyzer.in_flight(), 0);
    assert!(h.renderer.remaining().is_empty());
}

#[tokio::test]
async fn test_missing_quote_fails_before_oracle_spend() {
    let h = harness(ScriptedOracle::voting(&[Direction::Long]), fast_config());
    h.quotes.set_failing(true);

    let err = h
        .analyzer
        .run_analysis("BTC/USDT", &strategy())
        .await
        .unwrap_err();
    assert!(matches!(err, AnalysisError::QuoteUnavailable(_)));
    assert_eq!(h.oracle.calls(), 0);
    assert!(h.renderer.created().is_empty());
}

#[tokio::test]
async fn test_attempts_without_charts_skip_the_oracle() {
    let h = harness_with(
        ScriptedOracle::voting(&[Direction::Long, Direction::Long]),
        fast_config(),
        |r| r.with_failing(&[TimeFrame::Day1, TimeFrame::Hour4]),
    );

    let outcome = h.analyzer.run_analysis("BTC/USDT", &strategy()).await.unwrap();
    assert!(matches!(outcome, Outcome::NoSignal { .. }));
    assert_eq!(h.oracle.calls(), 0);
}

#[tokio::test]
async fn test_failed_timeframe_is_dropped() {
    let h = harness_with(
        ScriptedOracle::voting(&[Direction::Long, Direction::Long, Direction::Long]),
        fast_config(),
        |r| r.with_failing(&[TimeFrame::Day1]),
    );

    match h.analyzer.run_analysis("BTC/USDT", &strategy()).await.unwrap() {
        Outcome::Success { charts, .. } => {
            assert_eq!(charts.len(), 1);
            assert_eq!(charts[0].timeframe(), TimeFrame::Hour4);
        }
        other => panic!("expected success, got {:?}", other),
    }
    // each oracle call saw the single surviving chart
    assert_eq!(h.oracle.seen_charts().len(), 3);
}

#[tokio::test]
async fn test_slow_oracle_times_out_as_transient() {
    let config = AnalysisConfig {
        max_attempts: 1,
        oracle_retries: 1,
        call_timeout: Duration::from_millis(100),
        ..fast_config()
    };
    let h = harness(
        ScriptedOracle::voting(&[Direction::Long]).with_delay(Duration::from_secs(5)),
        config,
    );

    let outcome = h.analyzer.run_analysis("BTC/USDT", &strategy()).await.unwrap();
    assert!(matches!(outcome, Outcome::NoSignal { .. }));
    assert_eq!(h.oracle.calls(), 2);
}

#[tokio::test]
async fn test_non_winning_charts_are_removed() {
    let h = harness(
        ScriptedOracle::voting(&[Direction::Long, Direction::Short, Direction::Long]),
        fast_config(),
    );

    let outcome = h.analyzer.run_analysis("BTC/USDT", &strategy()).await.unwrap();
    assert_eq!(h.renderer.created().len(), 6);
    // the representative's two charts are handed over, the rest are gone
    assert_eq!(h.renderer.remaining().len(), 2);
    drop(outcome);
    assert!(h.renderer.remaining().is_empty());
}

#[tokio::test]
async fn test_in_flight_counter_tracks_concurrent_runs() {
    let h = harness(
        ScriptedOracle::voting(&[Direction::Long]).with_delay(Duration::from_millis(200)),
        AnalysisConfig {
            max_attempts: 1,
            ..fast_config()
        },
    );
    let analyzer = Arc::new(h.analyzer);

    let running = {
        let analyzer = analyzer.clone();
        tokio::spawn(async move { analyzer.run_analysis("BTC/USDT", &strategy()).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(analyzer.in_flight(), 1);

    running.await.unwrap().unwrap();
    assert_eq!(analyzer.in_flight(), 0);
}
