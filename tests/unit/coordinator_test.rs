//! Synchronous generation: billing, partial success and validation

use std::sync::Arc;
use std::time::Duration;

use gen_orchestrator::config::Settings;
use gen_orchestrator::generation::{PromptBuilder, PromptContext, SidePrompt};
use gen_orchestrator::models::{GenerationStatus, QualityMode, Side};
use gen_orchestrator::store::CatalogKind;
use gen_orchestrator::AppError;

use crate::common::{input, Behavior, Harness};

#[tokio::test]
async fn test_full_success_charges_every_image() {
    let h = Harness::new();
    h.add_provider("primary", 1, None, 3).await;
    let org = h.add_org(20).await;
    let product = h.add_product(org).await;

    let outcome = h
        .state
        .coordinator
        .generate(input(org, product, 2, 1, QualityMode::Fast))
        .await
        .unwrap();

    assert_eq!(outcome.images.len(), 3);
    assert_eq!(outcome.credits_charged, 9);
    assert!(outcome.errors.is_empty());
    assert_eq!(outcome.request.status, GenerationStatus::Done);
    assert_eq!(outcome.request.credits_consumed, 9);
    assert_eq!(h.balance(org).await, 11);

    let sides: Vec<(Side, u32)> = outcome.images.iter().map(|i| (i.side, i.index)).collect();
    assert_eq!(sides, vec![(Side::Front, 0), (Side::Front, 1), (Side::Back, 0)]);

    let stored = h.state.stores.generations.count_images(outcome.request.id).await.unwrap();
    assert_eq!(stored, 3);
}

#[tokio::test]
async fn test_partial_success_charges_only_produced() {
    let h = Harness::new();
    h.add_provider("primary", 1, None, 3).await;
    h.provider
        .set("primary", Behavior::script(&[true, true, false, false, false]));
    let org = h.add_org(20).await;
    let product = h.add_product(org).await;

    let outcome = h
        .state
        .coordinator
        .generate(input(org, product, 3, 0, QualityMode::Standard))
        .await
        .unwrap();

    assert_eq!(outcome.images.len(), 2);
    assert_eq!(outcome.credits_charged, 10);
    assert_eq!(h.balance(org).await, 10);
    assert_eq!(outcome.request.status, GenerationStatus::Error);
    assert!(outcome.request.front_error.is_some());
    assert!(outcome.request.back_error.is_none());
    assert_eq!(
        h.clock.sleeps(),
        vec![Duration::from_millis(1000), Duration::from_millis(2000)]
    );
    assert_eq!(h.provider.calls().len(), 5);
}

#[tokio::test]
async fn test_insufficient_credits_makes_no_calls() {
    let h = Harness::new();
    h.add_provider("primary", 1, None, 3).await;
    let org = h.add_org(5).await;
    let product = h.add_product(org).await;

    let err = h
        .state
        .coordinator
        .generate(input(org, product, 2, 0, QualityMode::High))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        AppError::InsufficientCredits { required: 16, available: 5 }
    ));
    assert!(h.provider.calls().is_empty());
    assert_eq!(h.balance(org).await, 5);
}

#[tokio::test]
async fn test_zero_success_persists_nothing() {
    let h = Harness::new();
    h.add_provider("primary", 1, None, 1).await;
    h.provider.set("primary", Behavior::Fail);
    let org = h.add_org(20).await;
    let product = h.add_product(org).await;

    let err = h
        .state
        .coordinator
        .generate(input(org, product, 1, 1, QualityMode::Fast))
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::ZeroSuccessGeneration(_)));
    assert_eq!(h.balance(org).await, 20);
    assert_eq!(h.state.ledger.history(org, 10).await.unwrap().len(), 1);
    // Both sides were attempted
    assert_eq!(h.provider.calls().len(), 2);
}

#[tokio::test]
async fn test_failed_side_does_not_stop_other_side() {
    let h = Harness::new();
    h.add_provider("primary", 1, None, 1).await;
    h.provider.set("primary", Behavior::script(&[false, true]));
    let org = h.add_org(20).await;
    let product = h.add_product(org).await;

    let outcome = h
        .state
        .coordinator
        .generate(input(org, product, 2, 1, QualityMode::Fast))
        .await
        .unwrap();

    // The second front image is never attempted after the first fails
    assert_eq!(h.provider.calls().len(), 2);
    assert_eq!(outcome.images.len(), 1);
    assert_eq!(outcome.images[0].side, Side::Back);
    assert_eq!(outcome.credits_charged, 3);
    assert!(outcome.errors.contains_key(&Side::Front));
    assert!(outcome.request.front_error.is_some());
    assert!(outcome.request.back_error.is_none());
    assert_eq!(outcome.request.status, GenerationStatus::Error);
    assert_eq!(h.balance(org).await, 17);
}

#[tokio::test]
async fn test_foreign_product_is_not_found() {
    let h = Harness::new();
    h.add_provider("primary", 1, None, 1).await;
    let org = h.add_org(20).await;
    let other = h.add_org(20).await;
    let product = h.add_product(other).await;

    let err = h
        .state
        .coordinator
        .generate(input(org, product, 1, 0, QualityMode::Fast))
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::NotFound(_)));
    assert!(h.provider.calls().is_empty());
}

#[tokio::test]
async fn test_shared_catalog_items_are_visible() {
    let h = Harness::new();
    h.add_provider("primary", 1, None, 1).await;
    let org = h.add_org(20).await;
    let product = h.add_product(org).await;
    let scene = h.add_catalog(CatalogKind::ScenePreset, None, "a rooftop at noon").await;
    let foreign_model = h
        .add_catalog(CatalogKind::ModelProfile, Some(h.add_org(0).await), "private model")
        .await;

    let mut request = input(org, product, 1, 0, QualityMode::Fast);
    request.scene_preset_id = Some(scene);
    assert!(h.state.coordinator.generate(request.clone()).await.is_ok());

    request.model_profile_id = Some(foreign_model);
    let err = h.state.coordinator.generate(request).await.unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}

struct FrontOnly;

impl PromptBuilder for FrontOnly {
    fn build(&self, ctx: &PromptContext<'_>, side: Side) -> Option<SidePrompt> {
        match side {
            Side::Front => Some(SidePrompt {
                full_prompt: format!("{} on a plain backdrop", ctx.product.name),
                negative_prompt: None,
            }),
            Side::Back => None,
        }
    }
}

#[tokio::test]
async fn test_missing_prompt_rejected_before_dispatch() {
    let h = Harness::with(Settings::default(), Arc::new(FrontOnly));
    h.add_provider("primary", 1, None, 1).await;
    let org = h.add_org(20).await;
    let product = h.add_product(org).await;

    let err = h
        .state
        .coordinator
        .generate(input(org, product, 1, 1, QualityMode::Fast))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidRequest(_)));
    assert!(h.provider.calls().is_empty());

    // A front-only request does not need the back prompt
    let outcome = h
        .state
        .coordinator
        .generate(input(org, product, 1, 0, QualityMode::Fast))
        .await
        .unwrap();
    assert_eq!(outcome.images.len(), 1);
}

#[tokio::test]
async fn test_empty_request_is_invalid() {
    let h = Harness::new();
    let org = h.add_org(20).await;
    let product = h.add_product(org).await;

    let err = h
        .state
        .coordinator
        .generate(input(org, product, 0, 0, QualityMode::Fast))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidRequest(_)));
}

#[tokio::test]
async fn test_oversized_counts_are_invalid() {
    let h = Harness::new();
    h.add_provider("primary", 1, None, 3).await;
    let org = h.add_org(1_000).await;
    let product = h.add_product(org).await;

    // Counts whose sum does not fit in a u32
    let err = h
        .state
        .coordinator
        .generate(input(org, product, u32::MAX, 1, QualityMode::Fast))
        .await
        .unwrap_err();
    match err {
        AppError::InvalidRequest(message) => assert!(message.contains("4294967296 images requested")),
        other => panic!("unexpected error: {other}"),
    }

    // Above the configured per-request cap
    let err = h
        .state
        .coordinator
        .generate(input(org, product, 15, 6, QualityMode::Fast))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidRequest(_)));
    assert!(h.provider.calls().is_empty());
    assert_eq!(h.balance(org).await, 1_000);

    // Exactly at the cap is accepted
    let outcome = h
        .state
        .coordinator
        .generate(input(org, product, 14, 6, QualityMode::Fast))
        .await
        .unwrap();
    assert_eq!(outcome.images.len(), 20);
    assert_eq!(outcome.credits_charged, 60);
}

#[tokio::test]
async fn test_image_cap_follows_settings() {
    let mut settings = Settings::default();
    settings.generation.max_images_per_request = 2;
    let h = Harness::with_settings(settings);
    h.add_provider("primary", 1, None, 3).await;
    let org = h.add_org(100).await;
    let product = h.add_product(org).await;

    let err = h
        .state
        .coordinator
        .generate(input(org, product, 2, 1, QualityMode::Fast))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidRequest(_)));
}
