//! End-to-end tests for the smart upload processor.
//!
//! Each test drives the real processor over real SQLite stores and a real
//! filesystem object store, with a scripted vision client and rasterizer.

mod common;

use common::{base_settings, sample_pdf, FakeRasterizer, Harness};
use fermata_server::queue::{JobError, JobHandler, JobKind};
use fermata_server::smart_upload::{
    ParseStatus, ProgressStep, RoutingDecision, SecondPassStatus, SessionStore,
};
use fermata_server::storage::ObjectStore;
use serde_json::json;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

fn metadata_json(
    title: &str,
    multi: bool,
    confidence: f64,
    instructions: serde_json::Value,
) -> String {
    json!({
        "title": title,
        "composer": "Test Composer",
        "isMultiPart": multi,
        "confidenceScore": confidence,
        "cuttingInstructions": instructions,
    })
    .to_string()
}

#[tokio::test]
async fn single_part_happy_path_auto_commits() {
    let mut settings = base_settings();
    settings.push(("smart_upload_enable_fully_autonomous_mode", "true"));
    let rasterizer = Arc::new(FakeRasterizer::with_text_layer(&["Flute", "Flute"]));
    let harness = Harness::new(&settings, rasterizer).await;
    let session_id = harness.seed_session(&sample_pdf(2)).await;

    harness.vision.push_content(&metadata_json(
        "Air for Band",
        false,
        96.0,
        json!([{
            "partName": "Flute", "instrument": "Flute", "section": "Woodwinds",
            "transposition": "C", "partNumber": 1, "pageRange": [1, 2]
        }]),
    ));

    let mut progress_rx = harness.progress.subscribe();
    let job = harness.process_job(&session_id);
    harness
        .processor
        .execute(&job, &CancellationToken::new())
        .await
        .unwrap();

    let session = harness.sessions.get(&session_id).unwrap().unwrap();
    assert_eq!(session.parse_status, ParseStatus::Parsed);
    assert_eq!(session.parsed_parts.len(), 1);
    assert_eq!(session.parsed_parts[0].instrument, "Flute");
    assert_eq!(session.parsed_parts[0].page_range, [1, 2]);
    assert_eq!(session.parsed_parts[0].page_count, 2);
    assert_eq!(
        session.routing_decision,
        Some(RoutingDecision::AutoParseAutoApprove)
    );
    assert!(session.auto_approved);
    assert!(!session.requires_human_review);
    assert_eq!(session.second_pass_status, SecondPassStatus::NotNeeded);
    assert_eq!(session.final_confidence, 96.0);
    assert_eq!(
        session.provenance.provider.as_deref(),
        Some("openai")
    );
    assert!(session.first_pass_raw.is_some());

    // Exactly one LLM call was spent: budget bound holds trivially.
    assert_eq!(harness.vision.call_count(), 1);

    // The split part landed in storage under the session's namespace.
    let key = &session.parsed_parts[0].storage_key;
    assert!(key.starts_with(&format!("smart-upload/{}/parts/", session_id)));
    assert!(harness.objects.get_object(key).await.is_ok());

    // Auto-commit was enqueued strictly after the session write.
    use fermata_server::queue::JobStore;
    let jobs = harness.jobs.list_for_session(&session_id).unwrap();
    assert!(jobs.iter().any(|j| j.kind == JobKind::AutoCommit));

    // Progress percentages are monotone and terminate at complete/100.
    let mut events = Vec::new();
    while let Ok(event) = progress_rx.try_recv() {
        events.push(event);
    }
    assert!(events.windows(2).all(|w| w[0].percent <= w[1].percent));
    let last = events.last().unwrap();
    assert_eq!(last.step, ProgressStep::Complete);
    assert_eq!(last.percent, 100);

    // Executing the enqueued auto-commit hands the session to the committer.
    let commit_job = jobs
        .into_iter()
        .find(|j| j.kind == JobKind::AutoCommit)
        .unwrap();
    harness
        .processor
        .execute(&commit_job, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(
        harness.committer.committed.lock().unwrap().as_slice(),
        &[session_id.clone()]
    );
}

#[tokio::test]
async fn multi_part_deterministic_segmentation() {
    let rasterizer = Arc::new(FakeRasterizer::with_text_layer(&[
        "Flute 1",
        "Flute 1",
        "Flute 1",
        "Flute 2",
        "Flute 2",
        "Flute 2",
        "Bb Clarinet",
        "Bb Clarinet",
        "Bb Clarinet",
        "Bb Clarinet",
    ]));
    let harness = Harness::new(&base_settings(), rasterizer).await;
    let session_id = harness.seed_session(&sample_pdf(10)).await;

    // The model's own instructions are deliberately wrong; the trusted
    // text-layer segmentation overlays them.
    harness.vision.push_content(&metadata_json(
        "Festive Overture",
        true,
        93.0,
        json!([{
            "partName": "Everything", "instrument": "Full Score", "section": "Score",
            "transposition": "C", "partNumber": 1, "pageRange": [1, 10]
        }]),
    ));

    let job = harness.process_job(&session_id);
    harness
        .processor
        .execute(&job, &CancellationToken::new())
        .await
        .unwrap();

    let session = harness.sessions.get(&session_id).unwrap().unwrap();
    assert_eq!(session.parsed_parts.len(), 3);

    let ranges: Vec<[i64; 2]> = session.parsed_parts.iter().map(|p| p.page_range).collect();
    assert_eq!(ranges, vec![[1, 3], [4, 6], [7, 10]]);
    assert!(session
        .parsed_parts
        .iter()
        .all(|p| p.section == "Woodwinds"));
    let transpositions: Vec<&str> = session
        .parsed_parts
        .iter()
        .map(|p| p.transposition.as_str())
        .collect();
    assert_eq!(transpositions, vec!["C", "C", "Bb"]);
    assert_eq!(session.parsed_parts[1].part_number, 2);

    // Segmentation confidence from a full text layer is at least 75.
    assert!(session.confidence_score >= 75.0);

    // Distinct display names produce distinct storage keys.
    let keys: std::collections::HashSet<&str> = session
        .parsed_parts
        .iter()
        .map(|p| p.storage_key.as_str())
        .collect();
    assert_eq!(keys.len(), 3);
}

#[tokio::test]
async fn gaps_are_filled_with_unlabelled_parts() {
    let rasterizer = Arc::new(FakeRasterizer {
        page_texts: vec![String::new(); 10],
        renders_work: true,
        crops_work: false,
    });
    let harness = Harness::new(&base_settings(), rasterizer).await;
    let session_id = harness.seed_session(&sample_pdf(10)).await;

    harness.vision.push_content(&metadata_json(
        "Suite in Eb",
        true,
        85.0,
        json!([
            {"partName": "Oboe", "instrument": "Oboe", "section": "Woodwinds",
             "transposition": "C", "partNumber": 1, "pageRange": [1, 3]},
            {"partName": "Bassoon", "instrument": "Bassoon", "section": "Woodwinds",
             "transposition": "C", "partNumber": 1, "pageRange": [7, 10]}
        ]),
    ));

    let job = harness.process_job(&session_id);
    harness
        .processor
        .execute(&job, &CancellationToken::new())
        .await
        .unwrap();

    let session = harness.sessions.get(&session_id).unwrap().unwrap();
    assert_eq!(session.parse_status, ParseStatus::Parsed);
    assert_eq!(session.parsed_parts.len(), 3);

    let filler = &session.parsed_parts[1];
    assert_eq!(filler.instrument, "Unlabelled");
    assert_eq!(filler.section, "Other");
    assert_eq!(filler.page_range, [4, 6]);

    // Union of part ranges covers [1, 10] exactly.
    let mut covered = vec![0u8; 10];
    for part in &session.parsed_parts {
        for page in part.page_range[0]..=part.page_range[1] {
            covered[(page - 1) as usize] += 1;
        }
    }
    assert!(covered.iter().all(|&c| c == 1));

    // 85 sits between the parse and auto-approve thresholds: second pass.
    assert_eq!(
        session.routing_decision,
        Some(RoutingDecision::AutoParseSecondPass)
    );
    assert_eq!(session.second_pass_status, SecondPassStatus::Queued);
}

#[tokio::test]
async fn overlapping_ranges_are_routed_to_second_pass_without_parsing() {
    let rasterizer = Arc::new(FakeRasterizer {
        page_texts: vec![String::new(); 10],
        renders_work: true,
        crops_work: false,
    });
    let harness = Harness::new(&base_settings(), rasterizer).await;
    let session_id = harness.seed_session(&sample_pdf(10)).await;

    harness.vision.push_content(&metadata_json(
        "Canzona",
        true,
        85.0,
        json!([
            {"partName": "A", "instrument": "Trumpet", "section": "Brass",
             "transposition": "Bb", "partNumber": 1, "pageRange": [1, 5]},
            {"partName": "B", "instrument": "Trombone", "section": "Brass",
             "transposition": "C", "partNumber": 1, "pageRange": [3, 8]}
        ]),
    ));

    let mut progress_rx = harness.progress.subscribe();
    let job = harness.process_job(&session_id);
    harness
        .processor
        .execute(&job, &CancellationToken::new())
        .await
        .unwrap();

    let session = harness.sessions.get(&session_id).unwrap().unwrap();
    assert_eq!(session.parse_status, ParseStatus::NotParsed);
    assert!(session.parsed_parts.is_empty());
    assert_eq!(
        session.routing_decision,
        Some(RoutingDecision::NoParseSecondPass)
    );
    assert_eq!(session.second_pass_status, SecondPassStatus::Queued);
    assert!(session.notes.as_deref().unwrap().contains("overlaps"));

    use fermata_server::queue::JobStore;
    let jobs = harness.jobs.list_for_session(&session_id).unwrap();
    assert!(jobs.iter().any(|j| j.kind == JobKind::SecondPass));

    let mut last = None;
    while let Ok(event) = progress_rx.try_recv() {
        last = Some(event);
    }
    let last = last.unwrap();
    assert_eq!(last.step, ProgressStep::QueuedForSecondPass);
    assert_eq!(last.percent, 100);
}

#[tokio::test]
async fn budget_exhaustion_keeps_partial_labels_and_completes() {
    let mut settings = base_settings();
    settings.push(("smart_upload_budget_max_llm_calls_per_session", "1"));
    let rasterizer = Arc::new(FakeRasterizer::scanned(35));
    let harness = Harness::new(&settings, rasterizer).await;
    let session_id = harness.seed_session(&sample_pdf(35)).await;

    // One scripted response: labels for the first batch of 30 crops. The
    // second batch and the primary pass would need calls the budget denies.
    let labels: Vec<serde_json::Value> = (1..=30)
        .map(|page| json!({"page": page, "header": "Flute"}))
        .collect();
    harness
        .vision
        .push_content(&json!({ "pages": labels }).to_string());

    let job = harness.process_job(&session_id);
    harness
        .processor
        .execute(&job, &CancellationToken::new())
        .await
        .unwrap();

    // Total LLM calls in the job never exceeded the budget of 1.
    assert_eq!(harness.vision.call_count(), 1);

    let session = harness.sessions.get(&session_id).unwrap().unwrap();
    // Partial labels produced a low-confidence parse: routed onward, not
    // failed.
    assert_eq!(
        session.routing_decision,
        Some(RoutingDecision::NoParseSecondPass)
    );
    assert_eq!(session.second_pass_status, SecondPassStatus::Queued);
    assert!(session.confidence_score > 0.0);
    assert!(session.confidence_score < 70.0);
    let metadata = session.extracted_metadata.unwrap();
    assert_eq!(metadata.cutting_instructions.len(), 1);
    assert_eq!(metadata.cutting_instructions[0].instrument, "Flute");
}

#[tokio::test]
async fn confirmed_second_pass_promotes_to_autonomous_commit() {
    let mut settings = base_settings();
    settings.push(("smart_upload_enable_fully_autonomous_mode", "true"));
    let rasterizer = Arc::new(FakeRasterizer {
        page_texts: vec![String::new(); 10],
        renders_work: true,
        crops_work: false,
    });
    let harness = Harness::new(&settings, rasterizer).await;
    let session_id = harness.seed_session(&sample_pdf(10)).await;

    // First pass: clean parse at 85, which lands in the second-pass band.
    harness.vision.push_content(&metadata_json(
        "Chorale and Shaker Dance",
        true,
        85.0,
        json!([
            {"partName": "Flute", "instrument": "Flute", "section": "Woodwinds",
             "transposition": "C", "partNumber": 1, "pageRange": [1, 5]},
            {"partName": "Oboe", "instrument": "Oboe", "section": "Woodwinds",
             "transposition": "C", "partNumber": 1, "pageRange": [6, 10]}
        ]),
    ));
    let job = harness.process_job(&session_id);
    harness
        .processor
        .execute(&job, &CancellationToken::new())
        .await
        .unwrap();

    let session = harness.sessions.get(&session_id).unwrap().unwrap();
    assert_eq!(session.second_pass_status, SecondPassStatus::Queued);
    assert!(!session.auto_approved);

    // Second pass confirms with a higher score.
    harness
        .vision
        .push_content(r#"{"confirmed": true, "confidenceScore": 97, "corrections": {}}"#);
    let second_pass_job = fermata_server::queue::Job::new(JobKind::SecondPass, &session_id, None);
    harness
        .processor
        .execute(&second_pass_job, &CancellationToken::new())
        .await
        .unwrap();

    let session = harness.sessions.get(&session_id).unwrap().unwrap();
    assert_eq!(session.second_pass_status, SecondPassStatus::Complete);
    assert_eq!(session.final_confidence, 97.0);
    assert!(session.auto_approved);
    assert!(!session.requires_human_review);

    use fermata_server::queue::JobStore;
    let jobs = harness.jobs.list_for_session(&session_id).unwrap();
    assert!(jobs.iter().any(|j| j.kind == JobKind::AutoCommit));
}

#[tokio::test]
async fn missing_session_is_a_fatal_failure() {
    let rasterizer = Arc::new(FakeRasterizer::scanned(1));
    let harness = Harness::new(&base_settings(), rasterizer).await;

    let job = harness.process_job("no-such-session");
    let error = harness
        .processor
        .execute(&job, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(error, JobError::Fatal(_)));
}

#[tokio::test]
async fn transient_provider_errors_are_retryable() {
    let rasterizer = Arc::new(FakeRasterizer {
        page_texts: vec![String::new(); 2],
        renders_work: true,
        crops_work: false,
    });
    let harness = Harness::new(&base_settings(), rasterizer).await;
    let session_id = harness.seed_session(&sample_pdf(2)).await;

    harness.vision.push_error(
        fermata_server::providers::ProviderError::Unreachable("connection refused".to_string()),
    );

    let job = harness.process_job(&session_id);
    let error = harness
        .processor
        .execute(&job, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(error, JobError::Retryable(_)));
}

#[tokio::test]
async fn cancellation_stops_before_any_state_write() {
    let rasterizer = Arc::new(FakeRasterizer::with_text_layer(&["Flute", "Flute"]));
    let harness = Harness::new(&base_settings(), rasterizer).await;
    let session_id = harness.seed_session(&sample_pdf(2)).await;

    let cancel = CancellationToken::new();
    cancel.cancel();
    let job = harness.process_job(&session_id);
    let error = harness.processor.execute(&job, &cancel).await.unwrap_err();
    assert!(matches!(error, JobError::Cancelled));

    // The session is untouched.
    let session = harness.sessions.get(&session_id).unwrap().unwrap();
    assert_eq!(session.parse_status, ParseStatus::NotParsed);
    assert!(session.routing_decision.is_none());
    assert_eq!(harness.vision.call_count(), 0);
}

#[tokio::test]
async fn invalid_configuration_fails_the_job_fatally() {
    // Cloud provider with no key: the config snapshot itself is invalid.
    let rasterizer = Arc::new(FakeRasterizer::scanned(2));
    let harness = Harness::new(&[("llm_provider", "openai")], rasterizer).await;
    let session_id = harness.seed_session(&sample_pdf(2)).await;

    let job = harness.process_job(&session_id);
    let error = harness
        .processor
        .execute(&job, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(error, JobError::Fatal(_)));
}
