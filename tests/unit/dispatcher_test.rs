//! Failover order, health skipping, retries and timeouts

use chrono::Duration as ChronoDuration;
use std::time::Duration;
use uuid::Uuid;

use gen_orchestrator::clock::Clock;
use gen_orchestrator::config::ProviderSeed;
use gen_orchestrator::models::{QualityMode, Side};
use gen_orchestrator::provider::{GenerationOptions, ProviderConfig};
use gen_orchestrator::AppError;

use crate::common::{Behavior, Harness};

fn options() -> GenerationOptions {
    GenerationOptions {
        prompt: "Professional fashion photograph of a linen shirt".into(),
        negative_prompt: None,
        aspect_ratio: "3:4".into(),
        resolution: "1K".into(),
        quality_mode: QualityMode::Fast,
        side: Side::Front,
        index: 0,
        reference_image_url: None,
    }
}

/// Give a provider a poor track record with its last error `ago` in the past
async fn degrade(h: &Harness, id: Uuid, ago: ChronoDuration) {
    let at = h.clock.now() - ago;
    h.state
        .stores
        .providers
        .update(
            id,
            Box::new(move |p: &mut ProviderConfig| {
                p.success_count = 2;
                p.error_count = 10;
                p.last_error = Some("503".into());
                p.last_error_at = Some(at);
            }),
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn test_falls_back_in_priority_order() {
    let h = Harness::new();
    h.add_provider("secondary", 2, None, 2).await;
    h.add_provider("primary", 1, None, 2).await;
    h.provider.set("primary", Behavior::Fail);

    let outcome = h
        .state
        .dispatcher
        .dispatch(Uuid::new_v4(), &options())
        .await
        .unwrap();

    assert_eq!(outcome.provider_used, "secondary");
    assert_eq!(outcome.attempts, 3);
    assert_eq!(outcome.failed_providers.len(), 1);
    assert!(outcome.failed_providers[0].contains("primary"));
    assert_eq!(h.provider.calls(), vec!["primary", "primary", "secondary"]);
    assert_eq!(h.clock.sleeps(), vec![Duration::from_millis(1000)]);
}

#[tokio::test]
async fn test_degraded_provider_past_cooldown_is_probed_first() {
    let h = Harness::new();
    let primary = h.add_provider("primary", 1, None, 3).await;
    h.add_provider("secondary", 2, None, 3).await;
    degrade(&h, primary, ChronoDuration::minutes(10)).await;

    let outcome = h
        .state
        .dispatcher
        .dispatch(Uuid::new_v4(), &options())
        .await
        .unwrap();

    assert_eq!(outcome.provider_used, "primary");
    assert_eq!(h.provider.calls(), vec!["primary"]);

    let updated = h.state.stores.providers.get(primary).await.unwrap();
    assert_eq!(updated.success_count, 3);
    assert_eq!(updated.error_count, 9);
}

#[tokio::test]
async fn test_unhealthy_provider_inside_cooldown_is_skipped() {
    let h = Harness::new();
    let primary = h.add_provider("primary", 1, None, 3).await;
    h.add_provider("secondary", 2, None, 3).await;
    degrade(&h, primary, ChronoDuration::minutes(1)).await;

    let outcome = h
        .state
        .dispatcher
        .dispatch(Uuid::new_v4(), &options())
        .await
        .unwrap();

    assert_eq!(outcome.provider_used, "secondary");
    assert_eq!(outcome.attempts, 1);
    assert!(outcome.failed_providers[0].contains("skipped (unhealthy"));
    assert_eq!(h.provider.calls(), vec!["secondary"]);
}

#[tokio::test]
async fn test_organization_providers_shadow_global() {
    let h = Harness::new();
    let org = Uuid::new_v4();
    h.add_provider("own", 5, Some(org), 1).await;
    h.add_provider("shared", 1, None, 1).await;

    let outcome = h.state.dispatcher.dispatch(org, &options()).await.unwrap();
    assert_eq!(outcome.provider_used, "own");

    let outcome = h
        .state
        .dispatcher
        .dispatch(Uuid::new_v4(), &options())
        .await
        .unwrap();
    assert_eq!(outcome.provider_used, "shared");

    // Global providers are not a fallback for an organization that has its own
    h.provider.set("own", Behavior::Fail);
    let err = h.state.dispatcher.dispatch(org, &options()).await.unwrap_err();
    assert!(matches!(err, AppError::AllProvidersFailed { attempts: 1, .. }));
    assert_eq!(h.provider.calls(), vec!["own", "shared", "own"]);
}

#[tokio::test]
async fn test_all_failed_reports_every_provider() {
    let h = Harness::new();
    h.add_provider("primary", 1, None, 2).await;
    h.add_provider("secondary", 2, None, 1).await;
    h.provider.set("primary", Behavior::Fail);
    h.provider.set("secondary", Behavior::Fail);

    let err = h
        .state
        .dispatcher
        .dispatch(Uuid::new_v4(), &options())
        .await
        .unwrap_err();

    match err {
        AppError::AllProvidersFailed {
            attempts,
            failed_providers,
            last_error,
        } => {
            assert_eq!(attempts, 3);
            assert_eq!(failed_providers.len(), 2);
            assert!(failed_providers[0].contains("primary"));
            assert!(failed_providers[1].contains("secondary"));
            assert!(last_error.contains("secondary returned 503"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_no_providers_configured() {
    let h = Harness::new();
    let err = h
        .state
        .dispatcher
        .dispatch(Uuid::new_v4(), &options())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::AllProvidersFailed { attempts: 0, .. }));
}

#[tokio::test]
async fn test_provider_without_adapter_is_skipped() {
    let h = Harness::new();
    let config = ProviderConfig::from_seed(&ProviderSeed {
        name: "legacy".into(),
        kind: "grpc".into(),
        organization_id: None,
        priority: 0,
        endpoint: "http://legacy.test".into(),
        api_key: None,
        model: None,
        active: true,
        max_retries: 3,
        timeout_ms: 1000,
    });
    h.state.stores.providers.insert(config).await.unwrap();
    h.add_provider("primary", 1, None, 1).await;

    let outcome = h
        .state
        .dispatcher
        .dispatch(Uuid::new_v4(), &options())
        .await
        .unwrap();
    assert_eq!(outcome.provider_used, "primary");
    assert!(outcome.failed_providers[0].contains("no adapter"));
}

#[tokio::test(start_paused = true)]
async fn test_hung_provider_times_out() {
    let h = Harness::new();
    let primary = h.add_provider("primary", 1, None, 2).await;
    h.add_provider("secondary", 2, None, 1).await;
    h.provider.set("primary", Behavior::Hang);

    let outcome = h
        .state
        .dispatcher
        .dispatch(Uuid::new_v4(), &options())
        .await
        .unwrap();

    assert_eq!(outcome.provider_used, "secondary");
    let health = h.state.stores.providers.get(primary).await.unwrap();
    assert_eq!(health.error_count, 2);
    assert!(health.last_error.unwrap().contains("timed out after 1000ms"));
}

#[tokio::test]
async fn test_success_lets_an_error_age_out() {
    let h = Harness::new();
    let primary = h.add_provider("primary", 1, None, 3).await;
    h.provider.set("primary", Behavior::script(&[false, false, true]));

    let outcome = h
        .state
        .dispatcher
        .dispatch(Uuid::new_v4(), &options())
        .await
        .unwrap();
    assert_eq!(outcome.attempts, 3);
    assert!(outcome.failed_providers.is_empty());

    let health = h.state.stores.providers.get(primary).await.unwrap();
    assert_eq!(health.success_count, 1);
    assert_eq!(health.error_count, 1);
    assert!(health.last_error_at.is_some());
}

#[tokio::test]
async fn test_repeated_failures_mark_provider_unhealthy() {
    let h = Harness::new();
    let primary = h.add_provider("primary", 1, None, 3).await;
    h.provider.set("primary", Behavior::Fail);

    for _ in 0..2 {
        let _ = h.state.dispatcher.dispatch(Uuid::new_v4(), &options()).await;
    }
    // Six failures: the third dispatch finds the provider unhealthy
    assert_eq!(h.provider.calls().len(), 6);
    let err = h
        .state
        .dispatcher
        .dispatch(Uuid::new_v4(), &options())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::AllProvidersFailed { attempts: 0, .. }));
    assert_eq!(h.provider.calls().len(), 6);

    let snapshot = h.state.health.snapshot().await.unwrap();
    assert!(!snapshot.iter().find(|p| p.id == primary).unwrap().healthy);

    // Cooldown measured from the last error
    h.clock.advance(Duration::from_secs(300));
    h.provider.set("primary", Behavior::Succeed);
    let outcome = h
        .state
        .dispatcher
        .dispatch(Uuid::new_v4(), &options())
        .await
        .unwrap();
    assert_eq!(outcome.provider_used, "primary");
}

async fn disable(h: &Harness, id: Uuid) {
    h.state
        .stores
        .providers
        .update(id, Box::new(|p: &mut ProviderConfig| p.active = false))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_disabled_provider_is_reported_as_skipped() {
    let h = Harness::new();
    let primary = h.add_provider("primary", 1, None, 3).await;
    h.add_provider("secondary", 2, None, 3).await;
    disable(&h, primary).await;

    let outcome = h
        .state
        .dispatcher
        .dispatch(Uuid::new_v4(), &options())
        .await
        .unwrap();

    assert_eq!(outcome.provider_used, "secondary");
    assert_eq!(outcome.attempts, 1);
    assert_eq!(outcome.failed_providers, vec!["primary: skipped (disabled)".to_string()]);
    assert_eq!(h.provider.calls(), vec!["secondary"]);
}

#[tokio::test]
async fn test_organization_with_only_disabled_providers_uses_global() {
    let h = Harness::new();
    let org = Uuid::new_v4();
    let own = h.add_provider("own", 1, Some(org), 3).await;
    h.add_provider("shared", 1, None, 3).await;
    disable(&h, own).await;

    let outcome = h.state.dispatcher.dispatch(org, &options()).await.unwrap();
    assert_eq!(outcome.provider_used, "shared");
    assert!(outcome.failed_providers.is_empty());
}

#[tokio::test]
async fn test_all_disabled_fails_without_attempts() {
    let h = Harness::new();
    let only = h.add_provider("only", 1, None, 3).await;
    disable(&h, only).await;

    let err = h
        .state
        .dispatcher
        .dispatch(Uuid::new_v4(), &options())
        .await
        .unwrap_err();
    match err {
        AppError::AllProvidersFailed {
            attempts,
            failed_providers,
            ..
        } => {
            assert_eq!(attempts, 0);
            assert_eq!(failed_providers, vec!["only: skipped (disabled)".to_string()]);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(h.provider.calls().is_empty());
}
