//! Circuit breaker behavior seen through the query client.

use std::time::Duration;

use query_resilience::config::{BreakerConfig, FallbackStrategy};
use query_resilience::resilience::{FallbackSource, TransitionReason};
use query_resilience::{CircuitPhase, Clock, Fetched, QueryClient, QueryError, ResilienceConfig};

mod common;
use common::{manual_client, ScriptedDependency};

fn breaker(failure_threshold: u32, min_requests_before_trip: u64) -> BreakerConfig {
    BreakerConfig {
        failure_threshold,
        min_requests_before_trip,
        ..BreakerConfig::default()
    }
}

#[tokio::test]
async fn test_open_circuit_returns_default_payload() {
    let (client, clock) = manual_client(ResilienceConfig::default());
    client.configure_circuit("payments", breaker(2, 2)).unwrap();
    let dependency = ScriptedDependency::new();
    let options = client.options().circuit("payments").max_attempts(1);

    for n in 0..2 {
        let fetched = client
            .fetch(
                &format!("invoice:{}", n),
                dependency.operation(|_| Err(QueryError::connection("connect refused"))),
                options.clone(),
            )
            .await
            .unwrap();
        assert!(matches!(fetched, Fetched::Unavailable(_)));
    }
    assert_eq!(dependency.calls(), 2);

    let fetched = client
        .fetch(
            "invoice:2",
            dependency.operation(|_| Ok("paid".into())),
            options,
        )
        .await
        .unwrap();
    assert_eq!(dependency.calls(), 2);

    let Fetched::Unavailable(payload) = fetched else {
        panic!("expected the default payload, got {:?}", fetched);
    };
    assert_eq!(
        serde_json::to_value(&payload).unwrap(),
        serde_json::json!({
            "error": "service unavailable",
            "circuitName": "payments",
            "phase": "open",
            "timestamp": clock.epoch_millis(),
        })
    );

    let state = client.circuit_state("payments").unwrap();
    assert!(state.is_open);
    assert_eq!(state.metrics.rejected_requests, 1);
}

#[tokio::test]
async fn test_trip_after_consecutive_failures() {
    let (client, _clock) = manual_client(ResilienceConfig::default());
    client.configure_circuit("search", breaker(5, 3)).unwrap();
    client.set_static_response("search", "empty", 0, "no results".to_string());
    let dependency = ScriptedDependency::new();
    let options = client.options().circuit("search").max_attempts(1);

    for n in 0..5 {
        client
            .fetch(
                &format!("q:{}", n),
                dependency.operation(|_| Err(QueryError::transport("500"))),
                options.clone(),
            )
            .await
            .unwrap();
    }
    assert!(client.circuit_state("search").unwrap().is_open);
    // all-failure ratio trips at the third request, the last two never run
    assert_eq!(dependency.calls(), 3);

    let before = dependency.calls();
    let fetched = client
        .fetch("q:6", dependency.operation(|_| Ok("hit".into())), options)
        .await
        .unwrap();
    assert_eq!(dependency.calls(), before);
    assert_eq!(
        fetched,
        Fetched::Fallback {
            value: "no results".into(),
            source: FallbackSource::Static("empty".into())
        }
    );
}

#[tokio::test]
async fn test_failure_count_trips_when_ratio_stays_low() {
    let (client, _clock) = manual_client(ResilienceConfig::default());
    client.configure_circuit("search", breaker(5, 3)).unwrap();
    client.set_static_response("search", "empty", 0, "no results".to_string());
    let dependency = ScriptedDependency::new();
    let options = client.options().circuit("search").max_attempts(1);

    // six successes, then failures: 5 of 11 stays under half
    let operation = || {
        dependency.operation(|n| {
            if n < 6 {
                Ok(format!("hit-{}", n))
            } else {
                Err(QueryError::transport("500"))
            }
        })
    };
    for n in 0..10 {
        client.fetch(&format!("q:{}", n), operation(), options.clone()).await.unwrap();
        assert!(client.circuit_state("search").unwrap().is_closed);
    }
    client.fetch("q:10", operation(), options.clone()).await.unwrap();

    let state = client.circuit_state("search").unwrap();
    assert!(state.is_open);
    assert_eq!(state.failure_count, 5);
    assert_eq!(state.metrics.failed_requests, 5);
    assert_eq!(state.metrics.total_requests, 11);
    assert_eq!(dependency.calls(), 11);

    let fetched = client.fetch("q:11", operation(), options).await.unwrap();
    assert_eq!(dependency.calls(), 11);
    assert!(matches!(fetched, Fetched::Fallback { .. }));
}

#[tokio::test(start_paused = true)]
async fn test_slow_attempt_cut_off_as_timeout() {
    let client: QueryClient<String> = QueryClient::new(ResilienceConfig::default());
    client
        .configure_circuit(
            "reports",
            BreakerConfig {
                timeout_ms: 50,
                failure_threshold: 8,
                enable_adaptive_thresholds: true,
                ..BreakerConfig::default()
            },
        )
        .unwrap();
    client.set_static_response("reports", "cached-report", 0, "yesterday".to_string());
    assert_eq!(client.circuit_state("reports").unwrap().current_threshold, 8);

    let dependency = ScriptedDependency::new();
    let started = tokio::time::Instant::now();
    let fetched = client
        .fetch(
            "report:today",
            dependency.slow_operation(Duration::from_secs(5), |_| Ok("today".into())),
            client.options().circuit("reports").max_attempts(1),
        )
        .await
        .unwrap();

    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(
        fetched,
        Fetched::Fallback {
            value: "yesterday".into(),
            source: FallbackSource::Static("cached-report".into())
        }
    );
    let state = client.circuit_state("reports").unwrap();
    assert_eq!(state.metrics.timeout_requests, 1);
    assert_eq!(state.current_threshold, 6);
    assert!(state.is_closed);
    assert!(client.get_cached("report:today").is_none());
}

#[tokio::test]
async fn test_recovery_through_half_open() {
    let (client, clock) = manual_client(ResilienceConfig::default());
    client
        .configure_circuit(
            "inventory",
            BreakerConfig {
                recovery_timeout_ms: 30_000,
                success_threshold: 2,
                ..breaker(2, 2)
            },
        )
        .unwrap();
    let mut events = client.subscribe_circuit("inventory").unwrap();
    let dependency = ScriptedDependency::new();
    let options = client.options().circuit("inventory").max_attempts(1);

    for _ in 0..2 {
        client
            .load("stock", dependency.operation(|_| Err(QueryError::transport("503"))), options.clone())
            .await
            .unwrap();
    }
    assert!(client.circuit_state("inventory").unwrap().is_open);

    clock.advance(Duration::from_secs(29));
    client
        .load("stock", dependency.operation(|_| Ok("12".into())), options.clone())
        .await
        .unwrap();
    assert_eq!(dependency.calls(), 2);

    clock.advance(Duration::from_secs(1));
    let fetched = client
        .load("stock", dependency.operation(|_| Ok("12".into())), options.clone())
        .await
        .unwrap();
    assert_eq!(fetched, Fetched::Loaded("12".into()));
    assert!(client.circuit_state("inventory").unwrap().is_half_open);

    client
        .load("stock", dependency.operation(|_| Ok("13".into())), options)
        .await
        .unwrap();
    assert!(client.circuit_state("inventory").unwrap().is_closed);

    let reasons: Vec<TransitionReason> = std::iter::from_fn(|| events.try_recv().ok())
        .map(|event| event.reason)
        .collect();
    assert_eq!(
        reasons,
        vec![
            TransitionReason::Tripped,
            TransitionReason::RecoveryTimeoutElapsed,
            TransitionReason::Recovered
        ]
    );
}

#[tokio::test]
async fn test_half_open_failure_reopens() {
    let (client, clock) = manual_client(ResilienceConfig::default());
    client.configure_circuit("inventory", breaker(2, 2)).unwrap();
    client.force_open("inventory").unwrap();
    let dependency = ScriptedDependency::new();
    let options = client.options().circuit("inventory").max_attempts(1);

    clock.advance(Duration::from_secs(60));
    client
        .load("stock", dependency.operation(|_| Err(QueryError::transport("503"))), options)
        .await
        .unwrap();

    assert_eq!(dependency.calls(), 1);
    let state = client.circuit_state("inventory").unwrap();
    assert_eq!(state.phase, CircuitPhase::Open);
    assert_eq!(state.metrics.circuit_open_count, 2);
}

#[tokio::test]
async fn test_retries_stop_once_circuit_opens() {
    let (client, clock) = manual_client(ResilienceConfig::default());
    client.configure_circuit("payments", breaker(2, 2)).unwrap();
    let dependency = ScriptedDependency::new();
    let options = client
        .options()
        .circuit("payments")
        .max_attempts(5)
        .backoff(Duration::from_millis(100), Duration::from_secs(1));

    let fetched = client
        .fetch("invoice", dependency.operation(|_| Err(QueryError::transport("503"))), options)
        .await
        .unwrap();

    assert!(matches!(fetched, Fetched::Unavailable(_)));
    // two failures trip the circuit, the third attempt is rejected
    assert_eq!(dependency.calls(), 2);
    assert_eq!(clock.elapsed(), Duration::from_millis(300));
}

#[tokio::test]
async fn test_degraded_service_uses_handler_with_request_context() {
    let (client, _clock) = manual_client(ResilienceConfig::default());
    client
        .configure_circuit(
            "profile",
            BreakerConfig {
                fallback_strategy: FallbackStrategy::DegradedService,
                ..BreakerConfig::default()
            },
        )
        .unwrap();
    client.register_fallback("profile", "anonymous", 1, |request| async move {
        Ok(format!(
            "guest for {} after {}",
            request.key.unwrap_or_default(),
            request.error.kind() == query_resilience::ErrorKind::Timeout
        ))
    });
    client.set_static_response("profile", "blank", 0, "blank".to_string());

    let dependency = ScriptedDependency::new();
    let fetched = client
        .fetch(
            "user:9",
            dependency.operation(|_| Err(QueryError::Timeout(Duration::from_secs(10)))),
            client.options().circuit("profile").max_attempts(1),
        )
        .await
        .unwrap();

    assert_eq!(
        fetched,
        Fetched::Fallback {
            value: "guest for user:9 after true".into(),
            source: FallbackSource::Handler("anonymous".into())
        }
    );
}

#[tokio::test(start_paused = true)]
async fn test_health_monitor_moves_open_circuit_to_half_open() {
    let mut config = ResilienceConfig::default();
    config.circuit_breaker.recovery_timeout_ms = 5_000;
    config.circuit_breaker.health_check_interval_ms = 1_000;
    let client: QueryClient<String> = QueryClient::new(config);

    client.force_open("payments").unwrap();
    let monitor = client.spawn_health_monitor();

    tokio::time::sleep(Duration::from_millis(4_500)).await;
    assert!(client.circuit_state("payments").unwrap().is_open);

    tokio::time::sleep(Duration::from_millis(1_000)).await;
    assert!(client.circuit_state("payments").unwrap().is_half_open);

    monitor.shutdown().await;
}

#[tokio::test]
async fn test_reloaded_defaults_reach_existing_circuits() {
    let (client, _clock) = manual_client(ResilienceConfig::default());
    client.force_open("search").unwrap();
    client.reset_circuit("search").unwrap();
    assert_eq!(client.circuit_state("search").unwrap().current_threshold, 5);

    let mut reloaded = ResilienceConfig::default();
    reloaded.circuit_breaker.failure_threshold = 8;
    client.apply_config(reloaded).unwrap();

    assert_eq!(client.circuit_state("search").unwrap().current_threshold, 8);
    assert!(client.circuit_state("search").unwrap().is_closed);
}
