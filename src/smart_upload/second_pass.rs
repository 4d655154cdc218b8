//! Second-pass verification and autonomous commit job bodies.
//!
//! The second pass re-checks a low-confidence extraction with the smaller
//! verification model over the sampled pages plus the first-pass metadata.
//! The auto-commit job hands an approved session to the external library
//! committer.

use super::budget::SessionBudget;
use super::extract::extract_first_json_object;
use super::models::{ParseStatus, ProgressStep, RoutingDecision, SecondPassStatus};
use super::processor::{checkpoint, map_provider_error, SmartUploadProcessor};
use super::sampling::sample_pages;
use crate::pdf::RenderOptions;
use crate::prompts;
use crate::providers::{ProviderError, ResponseFormat, VisionCallOptions, VisionImage};
use crate::queue::{Job, JobError};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde_json::Value;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const VERIFICATION_TIMEOUT: Duration = Duration::from_secs(120);

/// Parsed verification reply.
#[derive(Debug, Clone)]
struct Verification {
    confirmed: bool,
    confidence_score: f64,
    corrected_title: Option<String>,
    notes: Option<String>,
}

fn parse_verification(raw: &str) -> Option<Verification> {
    let json = extract_first_json_object(raw)?;
    let obj = json.as_object()?;
    let corrections = obj.get("corrections").and_then(Value::as_object);
    Some(Verification {
        confirmed: obj.get("confirmed").and_then(Value::as_bool).unwrap_or(false),
        confidence_score: obj
            .get("confidenceScore")
            .and_then(Value::as_f64)
            .unwrap_or(0.0)
            .clamp(0.0, 100.0),
        corrected_title: corrections
            .and_then(|c| c.get("title"))
            .and_then(Value::as_str)
            .map(str::to_string),
        notes: corrections
            .and_then(|c| c.get("notes"))
            .and_then(Value::as_str)
            .map(str::to_string),
    })
}

impl SmartUploadProcessor {
    pub(super) async fn run_second_pass(
        &self,
        job: &Job,
        cancel: &CancellationToken,
    ) -> Result<(), JobError> {
        let session_id = job.session_id.as_str();
        let mut session = self.load_session(session_id)?;
        let config = self.load_config()?;
        let mut budget =
            SessionBudget::new(config.budget_max_llm_calls, config.budget_max_input_tokens);

        if session.second_pass_status != SecondPassStatus::Queued {
            info!(
                session_id,
                status = session.second_pass_status.as_str(),
                "Second pass no longer queued; nothing to do"
            );
            return Ok(());
        }

        checkpoint(cancel)?;
        let pdf = self
            .objects
            .get_object(&session.storage_key)
            .await
            .map_err(|e| JobError::Retryable(e.to_string()))?;
        let total_pages = self
            .rasterizer
            .page_count(&pdf)
            .await
            .map_err(|e| JobError::Fatal(e.to_string()))?;

        let mut images: Vec<VisionImage> = Vec::new();
        for index in sample_pages(total_pages) {
            checkpoint(cancel)?;
            let png = self
                .rasterizer
                .render_page_png(&pdf, index, RenderOptions::default())
                .await
                .map_err(|e| JobError::Fatal(e.to_string()))?;
            images.push(VisionImage {
                mime_type: "image/png".to_string(),
                base64_data: BASE64.encode(&png),
                label: Some(format!("Page {}", index + 1)),
            });
        }

        budget
            .try_reserve_call()
            .map_err(|e| JobError::Fatal(e.to_string()))?;

        let first_pass_summary = session
            .extracted_metadata
            .as_ref()
            .and_then(|m| serde_json::to_string(m).ok())
            .unwrap_or_else(|| "{}".to_string());
        let user_prompt = format!(
            "First-pass extraction:\n{}\n\nVerify this against the sampled pages and \
             return the JSON described in your instructions.",
            first_pass_summary
        );

        let opts = VisionCallOptions {
            system: Some(config.verification_system_prompt.clone()),
            response_format: ResponseFormat::Json,
            max_tokens: 1024,
            temperature: 0.1,
            model_params: config.verification_model_params.clone(),
            documents: Vec::new(),
            timeout: VERIFICATION_TIMEOUT,
        };
        let response = match self
            .vision
            .call_vision_model(
                &config.verification_target(),
                &images,
                &user_prompt,
                &opts,
                cancel,
            )
            .await
        {
            Ok(response) => response,
            Err(ProviderError::Cancelled) => return Err(JobError::Cancelled),
            Err(e) => {
                // Persist the failed pass so review queues can see it, then
                // let the queue decide on retries.
                session.second_pass_status = SecondPassStatus::Failed;
                session.requires_human_review = true;
                session.notes = Some(format!("Second pass failed: {}", e));
                self.sessions
                    .update(&session)
                    .map_err(|err| JobError::Retryable(err.to_string()))?;
                return Err(map_provider_error(e));
            }
        };
        budget.record_usage(&response.usage);

        let verification = parse_verification(&response.content);
        match verification {
            None => {
                warn!(session_id, "Verification reply had no usable JSON");
                session.second_pass_status = SecondPassStatus::Complete;
                session.requires_human_review = true;
                session.notes = Some("Verification reply was unreadable".to_string());
            }
            Some(v) if v.confirmed => {
                session.second_pass_status = SecondPassStatus::Complete;
                session.final_confidence = session.final_confidence.max(v.confidence_score);
                if let (Some(title), Some(metadata)) =
                    (v.corrected_title, session.extracted_metadata.as_mut())
                {
                    metadata.title = title;
                }

                let can_commit = config.enable_fully_autonomous_mode
                    && session.parse_status == ParseStatus::Parsed
                    && !session.parsed_parts.is_empty()
                    && session.final_confidence >= config.autonomous_approval_threshold;
                if can_commit {
                    session.routing_decision = Some(RoutingDecision::AutoParseAutoApprove);
                    session.auto_approved = true;
                    session.requires_human_review = false;
                } else {
                    session.requires_human_review = true;
                }
            }
            Some(v) => {
                session.second_pass_status = SecondPassStatus::Complete;
                session.final_confidence = session.final_confidence.min(v.confidence_score);
                session.requires_human_review = true;
                session.notes = Some(
                    v.notes
                        .unwrap_or_else(|| "Verification did not confirm the extraction".to_string()),
                );
            }
        }

        self.sessions
            .update(&session)
            .map_err(|e| JobError::Retryable(e.to_string()))?;

        if session.auto_approved {
            self.queue
                .enqueue_auto_commit(session_id)
                .map_err(|e| JobError::Retryable(e.to_string()))?;
        }

        info!(
            session_id,
            final_confidence = session.final_confidence,
            auto_approved = session.auto_approved,
            "Second pass complete"
        );
        self.progress.emit(
            session_id,
            ProgressStep::Complete,
            100,
            "Second pass complete",
        );
        Ok(())
    }

    pub(super) async fn run_auto_commit(&self, job: &Job) -> Result<(), JobError> {
        let session_id = job.session_id.as_str();
        let mut session = self.load_session(session_id)?;

        if !session.auto_approved || session.parsed_parts.is_empty() {
            return Err(JobError::Fatal(format!(
                "Session {} is not eligible for autonomous commit",
                session_id
            )));
        }

        match self.committer.commit_session(&session).await {
            Ok(()) => {
                let _ = self
                    .audit
                    .log_session_auto_committed(session_id, session.parsed_parts.len());
                info!(
                    session_id,
                    parts = session.parsed_parts.len(),
                    "Session committed autonomously"
                );
                Ok(())
            }
            Err(e) => {
                session.auto_approved = false;
                session.requires_human_review = true;
                session.notes = Some(format!("Autonomous commit failed: {}", e));
                self.sessions
                    .update(&session)
                    .map_err(|err| JobError::Retryable(err.to_string()))?;
                Err(JobError::Fatal(format!("Commit failed: {}", e)))
            }
        }
    }
}
