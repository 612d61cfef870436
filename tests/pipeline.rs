//! Whole-pipeline tests over scripted providers: no pdfium, no network.
//!
//! Run with:
//!   cargo test --test pipeline

mod common;

use common::*;
use guidegen::{GuideError, GuidePipeline, PublishDecision, Severity};
use std::sync::Arc;

fn pipeline(
    pages: usize,
    cheap: Arc<ScriptedVision>,
    expensive: Option<Arc<ScriptedVision>>,
    illustrations: bool,
) -> GuidePipeline {
    let mut p = GuidePipeline::new(
        config(illustrations),
        Arc::new(FakePdf { pages }),
        cheap,
        limiters(),
    );
    if let Some(e) = expensive {
        p = p.with_secondary(e);
    }
    p
}

fn codes(guide: &guidegen::GeneratedGuide) -> Vec<&str> {
    guide.quality_flags.iter().map(|f| f.code.as_str()).collect()
}

#[tokio::test]
async fn clean_twenty_page_manual_stays_on_cheap_tier() {
    let cheap = Arc::new(ScriptedVision::new("cheap", CHEAP_MODEL, clean_pages(0.95)).with_refinement(NO_CHANGES));
    let expensive = Arc::new(ScriptedVision::new("expensive", EXPENSIVE_MODEL, clean_pages(0.99)));

    let guide = pipeline(20, Arc::clone(&cheap), Some(Arc::clone(&expensive)), false)
        .generate("sku-20", "Bookcase", "bookcase.pdf")
        .await
        .unwrap();

    assert_eq!(cheap.analyzed_pages(), (1..=20).collect::<Vec<_>>());
    assert!(expensive.analyzed_pages().is_empty());
    assert_eq!(cheap.completion_count(), 1, "exactly one refinement call");

    assert_eq!(guide.steps.len(), 20);
    for (i, s) in guide.steps.iter().enumerate() {
        assert_eq!(s.step_number, i as u32 + 1);
    }
    assert_eq!(guide.metadata.primary_model, CHEAP_MODEL);
    assert_eq!(guide.metadata.secondary_model, None);
    assert_eq!(guide.metadata.refinement_model.as_deref(), Some(CHEAP_MODEL));
    assert_eq!(guide.metadata.pdf_page_count, 20);
    assert!(guide.metadata.pages.iter().all(|r| r.parsed && !r.escalated));

    // 20 page calls + 1 refinement call, all on the cheap model.
    assert_eq!(guide.metadata.cost.calls, 21);
    assert_eq!(guide.metadata.cost.by_model.len(), 1);

    // Tools and the shared cam lock come through the summaries.
    assert_eq!(guide.tools, vec!["Allen key".to_string()]);
    assert!(guide.parts.iter().any(|p| p.name == "cam lock"));
    assert_eq!(guide.steps[0].screw_direction, guidegen::ScrewDirection::Clockwise);

    assert!((guide.overall_confidence - 0.95).abs() < 1e-9);
    assert!(guide.passes_quality_gate);
    assert_eq!(guide.publish_decision, PublishDecision::AutoPublish);
    assert!(guide
        .quality_flags
        .iter()
        .all(|f| f.severity == Severity::Info));
}

#[tokio::test]
async fn page_with_many_arrows_escalates_alone() {
    let cheap = Arc::new(
        ScriptedVision::new("cheap", CHEAP_MODEL, |page| {
            let arrows = if page == 7 { 6 } else { 2 };
            Ok(page_json(page as u32, arrows, 0.9))
        })
        .with_refinement(NO_CHANGES),
    );
    let expensive = Arc::new(ScriptedVision::new("expensive", EXPENSIVE_MODEL, clean_pages(0.97)));

    let guide = pipeline(10, cheap, Some(Arc::clone(&expensive)), false)
        .generate("sku-10", "Wardrobe", "wardrobe.pdf")
        .await
        .unwrap();

    assert_eq!(expensive.analyzed_pages(), vec![7]);
    let escalated: Vec<usize> = guide
        .metadata
        .pages
        .iter()
        .filter(|r| r.escalated)
        .map(|r| r.page_number)
        .collect();
    assert_eq!(escalated, vec![7]);
    assert_eq!(guide.metadata.pages[6].model_used, EXPENSIVE_MODEL);
    assert_eq!(guide.metadata.pages[5].model_used, CHEAP_MODEL);
    assert_eq!(guide.metadata.secondary_model.as_deref(), Some(EXPENSIVE_MODEL));
    // The expensive reading replaced the cheap one for page 7.
    assert_eq!(guide.steps[6].confidence, 0.97);
}

#[tokio::test]
async fn unparseable_cheap_page_falls_back_to_expensive_tier() {
    let cheap = Arc::new(
        ScriptedVision::new("cheap", CHEAP_MODEL, |page| match page {
            2 => Ok("Sorry, I can't make out this diagram.".to_string()),
            3 | 4 => Err(transport_error("cheap")),
            // Bare step list instead of the page object.
            5 => {
                let page: serde_json::Value = serde_json::from_str(&page_json(5, 0, 0.9)).unwrap();
                Ok(page["steps"].to_string())
            }
            _ => Ok(page_json(page as u32, 1, 0.9)),
        })
        .with_refinement(NO_CHANGES),
    );
    let expensive = Arc::new(ScriptedVision::new("expensive", EXPENSIVE_MODEL, |page| {
        if page == 3 {
            Err(transport_error("expensive"))
        } else {
            Ok(page_json(page as u32, 1, 0.92))
        }
    }));

    let guide = pipeline(5, cheap, Some(Arc::clone(&expensive)), false)
        .generate("sku-4", "Nightstand", "nightstand.pdf")
        .await
        .unwrap();

    assert_eq!(expensive.analyzed_pages(), vec![2, 3, 4]);
    let p = &guide.metadata.pages;
    assert!(p[1].parsed && p[1].escalated);
    // Both tiers failed on page 3: it degrades to an empty page, the run goes on.
    assert!(!p[2].parsed && p[2].escalated);
    assert_eq!(p[2].step_count, 0);
    // Cheap call failed on page 4, the expensive reading is used.
    assert!(p[3].parsed && p[3].escalated);
    assert_eq!(p[3].model_used, EXPENSIVE_MODEL);
    assert_eq!(p[3].step_count, 1);
    // The bare array on page 5 is read as the page's steps.
    assert!(p[4].parsed && !p[4].escalated);
    assert_eq!(p[4].model_used, CHEAP_MODEL);
    assert_eq!(p[4].step_count, 1);

    assert_eq!(guide.steps.len(), 4);
    assert_eq!(guide.steps[2].confidence, 0.92);
    assert!(guide.steps[3].parts.iter().any(|part| part.name == "shelf bracket 5"));
}

#[tokio::test]
async fn refinement_merges_split_step() {
    let refinement = r#"Here is the refined guide:
```json
{"steps": [
  {"original_step_numbers": [5, 6],
   "title": "Attach the back panel",
   "instruction": "Slide the back panel into the grooves, then nail it to every shelf."},
  {"original_step_numbers": [7],
   "title": "Mount the doors",
   "instruction": "Hang both doors on the hinges and adjust the gaps.",
   "transition_note": "The carcass is finished; the doors come next."}
]}
```"#;
    let cheap = Arc::new(ScriptedVision::new("cheap", CHEAP_MODEL, clean_pages(0.9)).with_refinement(refinement));

    let guide = pipeline(8, cheap, None, false)
        .generate("sku-8", "Cabinet", "cabinet.pdf")
        .await
        .unwrap();

    assert_eq!(guide.steps.len(), 7);
    for (i, s) in guide.steps.iter().enumerate() {
        assert_eq!(s.step_number, i as u32 + 1);
    }
    let merged = &guide.steps[4];
    assert_eq!(merged.title, "Attach the back panel");
    assert_eq!(merged.merged_from, vec![5, 6]);
    assert!(merged.parts.iter().any(|p| p.name == "shelf bracket 5"));
    assert!(merged.parts.iter().any(|p| p.name == "shelf bracket 6"));

    let doors = &guide.steps[5];
    assert_eq!(doors.title, "Mount the doors");
    assert!(doors.callouts[0].text.starts_with("The carcass is finished"));
    assert_eq!(guide.steps[6].title, "Step 7");
    assert!(!codes(&guide).contains(&"NON_CONTIGUOUS_STEPS"));
}

#[tokio::test]
async fn failed_refinement_keeps_assembled_steps() {
    // No refinement script: `complete` returns HTTP 503.
    let cheap = Arc::new(ScriptedVision::new("cheap", CHEAP_MODEL, clean_pages(0.9)));

    let guide = pipeline(3, Arc::clone(&cheap), None, false)
        .generate("sku-3", "Stool", "stool.pdf")
        .await
        .unwrap();

    assert_eq!(cheap.completion_count(), 1);
    assert_eq!(guide.steps.len(), 3);
    assert_eq!(guide.steps[1].title, "Step 2");
    assert!(guide.steps[1].instruction.starts_with("Fix shelf bracket 2"));
}

#[tokio::test]
async fn publish_decision_follows_confidence() {
    // 0.8: no flags, but below the auto-publish bar.
    let cheap = Arc::new(ScriptedVision::new("cheap", CHEAP_MODEL, clean_pages(0.8)).with_refinement(NO_CHANGES));
    let guide = pipeline(5, cheap, None, false)
        .generate("sku-a", "Desk", "desk.pdf")
        .await
        .unwrap();
    assert_eq!(guide.publish_decision, PublishDecision::Review);
    assert!(guide.passes_quality_gate);

    // 0.55 everywhere: every step is low-confidence, which is an error.
    let cheap = Arc::new(ScriptedVision::new("cheap", CHEAP_MODEL, clean_pages(0.55)).with_refinement(NO_CHANGES));
    let guide = pipeline(5, cheap, None, false)
        .generate("sku-b", "Desk", "desk.pdf")
        .await
        .unwrap();
    assert_eq!(guide.publish_decision, PublishDecision::Hold);
    assert!(!guide.passes_quality_gate);
    assert!(codes(&guide).contains(&"LOW_CONFIDENCE_RATIO"));
    assert_eq!(
        guide
            .quality_flags
            .iter()
            .filter(|f| f.code == "LOW_CONFIDENCE_STEP")
            .count(),
        5
    );
}

#[tokio::test]
async fn nothing_parseable_is_fatal() {
    let cheap = Arc::new(ScriptedVision::new("cheap", CHEAP_MODEL, |_| {
        Ok("I cannot read this image.".to_string())
    }));
    let err = pipeline(3, Arc::clone(&cheap), None, false)
        .generate("sku-x", "Chair", "chair.pdf")
        .await
        .unwrap_err();
    assert!(
        matches!(err, GuideError::NoPagesExtracted { total: 3, .. }),
        "got {err:?}"
    );
    assert_eq!(cheap.completion_count(), 0, "no refinement after a failed Pass 1");
}

#[tokio::test]
async fn empty_or_unreachable_pdf_is_fatal() {
    let cheap = Arc::new(ScriptedVision::new("cheap", CHEAP_MODEL, clean_pages(0.9)));
    let err = pipeline(0, Arc::clone(&cheap), None, false)
        .generate("sku-0", "Shelf", "empty.pdf")
        .await
        .unwrap_err();
    assert!(matches!(err, GuideError::NoPagesExtracted { total: 0, .. }));

    let err = GuidePipeline::new(config(false), Arc::new(UnreachablePdf), cheap, limiters())
        .generate("sku-0", "Shelf", "https://cdn.example/missing.pdf")
        .await
        .unwrap_err();
    assert!(matches!(err, GuideError::DownloadFailed { .. }));
}

#[tokio::test]
async fn failed_illustration_becomes_flag() {
    let cheap = Arc::new(ScriptedVision::new("cheap", CHEAP_MODEL, clean_pages(0.95)).with_refinement(NO_CHANGES));
    let images = Arc::new(FakeImages::new(&[2]));

    let guide = pipeline(3, cheap, None, true)
        .with_image_generator(Arc::clone(&images) as Arc<dyn guidegen::ImageGenerator>)
        .generate("sku-i", "Bench", "bench.pdf")
        .await
        .unwrap();

    assert_eq!(images.call_count(), 3, "one failure never stops the batch");
    assert!(guide.steps[0].illustration_url.is_some());
    assert!(guide.steps[1].illustration_url.is_none());
    assert!(guide.steps[1].illustration_prompt.is_some());
    assert!(guide.steps[2].illustration_url.is_some());

    let failed: Vec<Option<u32>> = guide
        .quality_flags
        .iter()
        .filter(|f| f.code == "ILLUSTRATION_FAILED")
        .map(|f| f.step_number)
        .collect();
    assert_eq!(failed, vec![Some(2)]);
    // The re-run checker sees the other two illustrations.
    assert!(guide
        .quality_flags
        .iter()
        .any(|f| f.code == "MISSING_ILLUSTRATION" && f.step_number == Some(2)));
    assert_eq!(guide.metadata.illustration_models, vec!["gpt-image-1-mini".to_string()]);
}

#[tokio::test]
async fn dry_run_prepares_prompts_only() {
    let cheap = Arc::new(ScriptedVision::new("cheap", CHEAP_MODEL, clean_pages(0.95)).with_refinement(NO_CHANGES));
    let mut cfg = config(true);
    cfg.illustration.dry_run = true;
    let images = Arc::new(FakeImages::new(&[]));

    let guide = GuidePipeline::new(cfg, Arc::new(FakePdf { pages: 2 }), cheap, limiters())
        .with_image_generator(Arc::clone(&images) as Arc<dyn guidegen::ImageGenerator>)
        .generate("sku-d", "Shelf", "shelf.pdf")
        .await
        .unwrap();

    assert_eq!(images.call_count(), 0);
    assert!(guide
        .steps
        .iter()
        .all(|s| s.illustration_prompt.is_some() && s.illustration_url.is_none()));
    assert!(!codes(&guide).contains(&"MISSING_ILLUSTRATION"));
    assert!(guide.metadata.illustration_models.is_empty());
}
