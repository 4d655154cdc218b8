//! The smart upload processor: the body of `smartupload.process` jobs.
//!
//! Orchestrates download, rendering, deterministic segmentation, the vision
//! pass, validation, splitting, storage, quality gating, and routing. Within
//! one job everything is sequential; the only suspension points are the
//! downstream I/O calls. Cancellation is honored at phase boundaries and
//! inside the dispatcher; nothing is written past the last checkpoint.

use super::budget::SessionBudget;
use super::commit::LibraryCommitter;
use super::extract::{parse_header_labels, parse_metadata};
use super::models::{
    part_storage_key, slugify, truncate_first_pass_raw, CuttingInstruction, ExtractedMetadata,
    LlmProvenance, ParseStatus, ParsedPart, ProgressStep, RoutingDecision, SecondPassStatus,
    UploadSession,
};
use super::progress::ProgressBus;
use super::quality::{self, QualityInput};
use super::segmentation::{segment, PageHeader, SegmentationResult};
use super::session_store::SessionStore;
use super::validator::{validate, ValidateOptions};
use crate::audit::AuditLogger;
use crate::pdf::{split_page_ranges, PdfRasterizer, RenderOptions};
use crate::prompts;
use crate::providers::{
    PdfAttachment, ProviderError, ResponseFormat, VisionCallOptions, VisionClient, VisionImage,
};
use crate::queue::{Job, JobError, JobHandler, JobKind, JobQueue};
use crate::settings::{ConfigError, RuntimeConfig, SettingsStore};
use crate::smart_upload::sampling::sample_pages;
use crate::storage::{ObjectMeta, ObjectStore};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Fraction of pages whose text layer must yield a header line before the
/// deterministic text-layer path is used at all.
const TEXT_LAYER_COVERAGE_THRESHOLD: f64 = 0.6;

/// Maximum header crops per labeling call.
const HEADER_LABEL_BATCH_SIZE: usize = 30;

/// Deadline for model inference calls. Probes use the dispatcher's own
/// shorter deadline.
const INFERENCE_TIMEOUT: Duration = Duration::from_secs(120);

pub struct SmartUploadProcessor {
    pub(super) sessions: Arc<dyn SessionStore>,
    pub(super) settings: Arc<dyn SettingsStore>,
    pub(super) objects: Arc<dyn ObjectStore>,
    pub(super) rasterizer: Arc<dyn PdfRasterizer>,
    pub(super) vision: Arc<dyn VisionClient>,
    pub(super) queue: Arc<JobQueue>,
    pub(super) progress: ProgressBus,
    pub(super) audit: Arc<AuditLogger>,
    pub(super) committer: Arc<dyn LibraryCommitter>,
}

#[async_trait]
impl JobHandler for SmartUploadProcessor {
    async fn execute(&self, job: &Job, cancel: &CancellationToken) -> Result<(), JobError> {
        match job.kind {
            JobKind::Process => self.process(job, cancel).await,
            JobKind::SecondPass => self.run_second_pass(job, cancel).await,
            JobKind::AutoCommit => self.run_auto_commit(job).await,
        }
    }
}

/// Outcome of the deterministic segmentation attempts.
struct DeterministicSegmentation {
    result: SegmentationResult,
    /// Confidence cleared the skip-parse threshold; instructions may overlay
    /// the model's.
    trusted: bool,
    from_text_layer: bool,
}

impl SmartUploadProcessor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        settings: Arc<dyn SettingsStore>,
        objects: Arc<dyn ObjectStore>,
        rasterizer: Arc<dyn PdfRasterizer>,
        vision: Arc<dyn VisionClient>,
        queue: Arc<JobQueue>,
        progress: ProgressBus,
        audit: Arc<AuditLogger>,
        committer: Arc<dyn LibraryCommitter>,
    ) -> Self {
        Self {
            sessions,
            settings,
            objects,
            rasterizer,
            vision,
            queue,
            progress,
            audit,
            committer,
        }
    }

    pub(super) fn load_config(&self) -> Result<RuntimeConfig, JobError> {
        RuntimeConfig::load(self.settings.as_ref()).map_err(|e| match e {
            ConfigError::Invalid(_) => JobError::Fatal(e.to_string()),
            ConfigError::Store(inner) => JobError::Retryable(inner.to_string()),
        })
    }

    pub(super) fn load_session(&self, session_id: &str) -> Result<UploadSession, JobError> {
        self.sessions
            .get(session_id)
            .map_err(|e| JobError::Retryable(e.to_string()))?
            .ok_or_else(|| JobError::Fatal(format!("Session {} not found", session_id)))
    }

    async fn process(&self, job: &Job, cancel: &CancellationToken) -> Result<(), JobError> {
        let session_id = job.session_id.as_str();

        // Step 1: load session and snapshot configuration.
        self.progress
            .emit(session_id, ProgressStep::Starting, 0, "Loading session");
        let mut session = self.load_session(session_id)?;
        let config = self.load_config()?;
        let mut budget =
            SessionBudget::new(config.budget_max_llm_calls, config.budget_max_input_tokens);

        // Step 2: fetch the original.
        checkpoint(cancel)?;
        self.progress
            .emit(session_id, ProgressStep::Downloading, 5, "Fetching original PDF");
        let pdf = self
            .objects
            .get_object(&session.storage_key)
            .await
            .map_err(|e| JobError::Retryable(e.to_string()))?;
        if pdf.len() as u64 > config.max_file_size_bytes {
            return Err(JobError::Fatal(format!(
                "Stored file is {} bytes, over the {} byte limit",
                pdf.len(),
                config.max_file_size_bytes
            )));
        }
        if pdf.len() as u64 != session.byte_size {
            return Err(JobError::Fatal(format!(
                "Stored file is {} bytes but the session recorded {}",
                pdf.len(),
                session.byte_size
            )));
        }

        // Step 3: page count and representative renders.
        checkpoint(cancel)?;
        self.progress
            .emit(session_id, ProgressStep::Rendering, 10, "Rendering sampled pages");
        let total_pages = self
            .rasterizer
            .page_count(&pdf)
            .await
            .map_err(|e| JobError::Fatal(e.to_string()))?;
        if total_pages == 0 {
            return Err(JobError::Fatal("Document has no pages".to_string()));
        }
        let sampled_images = self.render_sampled_pages(&pdf, total_pages, cancel).await?;

        // Steps 4-5: deterministic segmentation, text layer first.
        checkpoint(cancel)?;
        self.progress.emit(
            session_id,
            ProgressStep::Analyzing,
            20,
            "Reading text layer",
        );
        let mut deterministic = self.segment_from_text_layer(&pdf, total_pages, &config).await;

        if deterministic.is_none() {
            checkpoint(cancel)?;
            self.progress.emit(
                session_id,
                ProgressStep::Analyzing,
                25,
                "Labeling page headers",
            );
            deterministic = self
                .segment_from_header_crops(&pdf, total_pages, &config, &mut budget, cancel)
                .await?;
        }

        // Step 6: primary vision call, budget permitting.
        checkpoint(cancel)?;
        self.progress.emit(
            session_id,
            ProgressStep::Analyzing,
            30,
            "Analyzing document with vision model",
        );
        let can_send_primary = config.native_pdf_enabled() || !sampled_images.is_empty();
        let primary = if can_send_primary {
            match budget.try_reserve_call() {
                Ok(()) => {
                    let response = self
                        .call_primary_vision(&config, &pdf, &sampled_images, cancel)
                        .await?;
                    budget.record_usage(&response.usage);
                    Some(response)
                }
                Err(_) if deterministic.is_some() => {
                    // Deterministic labels exist; finish the job on those
                    // alone rather than failing it.
                    warn!(
                        session_id,
                        "LLM budget exhausted before primary pass; using deterministic labels only"
                    );
                    None
                }
                Err(exhausted) => return Err(JobError::Fatal(exhausted.to_string())),
            }
        } else if deterministic.is_some() {
            warn!(
                session_id,
                "No renderable pages for the vision pass; using deterministic labels only"
            );
            None
        } else {
            return Err(JobError::Fatal(
                "No renderable pages to send to the vision model".to_string(),
            ));
        };

        // Step 7: lenient parse (or synthesis from segmentation alone).
        let first_pass_raw = primary
            .as_ref()
            .map(|r| truncate_first_pass_raw(&r.content));
        let mut metadata = match &primary {
            Some(response) => parse_metadata(&response.content, total_pages),
            None => ExtractedMetadata::default(),
        };

        // Step 8: overlay deterministic results.
        let mut gate_segmentation_confidence: Option<f64> = None;
        if let Some(seg) = &deterministic {
            if seg.trusted || primary.is_none() {
                metadata.cutting_instructions = seg
                    .result
                    .instructions
                    .iter()
                    .map(to_one_indexed)
                    .collect();
                metadata.confidence_score = metadata.confidence_score.max(seg.result.confidence);
            }
            // A true text layer is ground truth and never drags the final
            // score; vision-labeled header crops do.
            if !seg.from_text_layer {
                gate_segmentation_confidence = Some(seg.result.confidence);
            }
        }

        // Step 9: validate and route away low-confidence parses.
        checkpoint(cancel)?;
        self.progress.emit(
            session_id,
            ProgressStep::Validating,
            50,
            "Validating cutting instructions",
        );
        let outcome = validate(
            &metadata.cutting_instructions,
            total_pages,
            ValidateOptions {
                one_indexed: true,
                detect_gaps: true,
            },
        );
        if !outcome.is_valid || metadata.confidence_score < config.skip_parse_threshold {
            session.extracted_metadata = Some(metadata.clone());
            session.confidence_score = metadata.confidence_score;
            session.final_confidence = metadata.confidence_score;
            session.routing_decision = Some(RoutingDecision::NoParseSecondPass);
            session.parse_status = ParseStatus::NotParsed;
            session.first_pass_raw = first_pass_raw;
            session.provenance = provenance(&config);
            session.notes = Some(low_confidence_note(&outcome.errors, &metadata, &config));

            if config.two_pass_enabled {
                session.second_pass_status = SecondPassStatus::Queued;
                self.sessions
                    .update(&session)
                    .map_err(|e| JobError::Retryable(e.to_string()))?;
                self.queue
                    .enqueue_second_pass(session_id)
                    .map_err(|e| JobError::Retryable(e.to_string()))?;
            } else {
                session.second_pass_status = SecondPassStatus::NotNeeded;
                session.requires_human_review = true;
                self.sessions
                    .update(&session)
                    .map_err(|e| JobError::Retryable(e.to_string()))?;
            }

            self.progress.emit(
                session_id,
                ProgressStep::QueuedForSecondPass,
                100,
                "Parse not trusted; queued for verification",
            );
            return Ok(());
        }
        let instructions = outcome.instructions;

        // Step 10: split.
        checkpoint(cancel)?;
        self.progress
            .emit(session_id, ProgressStep::Splitting, 70, "Splitting parts");
        let ranges: Vec<(usize, usize)> = instructions
            .iter()
            .map(|i| ((i.start() - 1) as usize, (i.end() - 1) as usize))
            .collect();
        let splits =
            split_page_ranges(&pdf, &ranges).map_err(|e| JobError::Fatal(e.to_string()))?;

        // Step 11: store each part.
        checkpoint(cancel)?;
        self.progress
            .emit(session_id, ProgressStep::Saving, 90, "Saving parts");
        let parts = self
            .save_parts(&session, &instructions, splits)
            .await
            .map_err(|e| JobError::Retryable(e.to_string()))?;

        // Steps 12-13: gates and routing.
        let gates = quality::evaluate(&QualityInput {
            parsed_parts: &parts,
            metadata: &metadata,
            total_pages,
            max_pages_per_part: config.max_pages_per_part,
            segmentation_confidence: gate_segmentation_confidence,
        });
        let final_confidence = gates.final_confidence;

        let routing = if final_confidence >= config.auto_approve_threshold {
            RoutingDecision::AutoParseAutoApprove
        } else {
            RoutingDecision::AutoParseSecondPass
        };
        let needs_second_pass =
            routing == RoutingDecision::AutoParseSecondPass && config.two_pass_enabled;
        let second_pass_status = if needs_second_pass {
            SecondPassStatus::Queued
        } else {
            SecondPassStatus::NotNeeded
        };
        let should_auto_commit = config.enable_fully_autonomous_mode
            && final_confidence >= config.autonomous_approval_threshold
            && second_pass_status == SecondPassStatus::NotNeeded
            && !gates.failed;

        // Step 14: one atomic session write, strictly after parts landed.
        session.extracted_metadata = Some(metadata.clone());
        session.confidence_score = metadata.confidence_score;
        session.final_confidence = final_confidence;
        session.routing_decision = Some(routing);
        session.parse_status = ParseStatus::Parsed;
        session.second_pass_status = second_pass_status;
        session.auto_approved = should_auto_commit;
        session.requires_human_review = !(should_auto_commit || needs_second_pass);
        session.parsed_parts = parts.clone();
        session.cutting_instructions = instructions;
        session.first_pass_raw = first_pass_raw;
        session.notes = if gates.failed {
            Some(format!("Quality gates: {}", gates.reasons.join("; ")))
        } else {
            None
        };
        session.provenance = provenance(&config);
        self.sessions
            .update(&session)
            .map_err(|e| JobError::Retryable(e.to_string()))?;

        // Step 15: follow-up jobs only after the write committed.
        if needs_second_pass {
            self.queue
                .enqueue_second_pass(session_id)
                .map_err(|e| JobError::Retryable(e.to_string()))?;
        }
        if should_auto_commit {
            self.queue
                .enqueue_auto_commit(session_id)
                .map_err(|e| JobError::Retryable(e.to_string()))?;
        }

        info!(
            session_id,
            parts = parts.len(),
            final_confidence,
            routing = routing.as_str(),
            llm_calls = budget.calls_used(),
            "Smart upload processed"
        );
        self.progress.emit(
            session_id,
            ProgressStep::Complete,
            100,
            format!("{} parts created", parts.len()),
        );
        Ok(())
    }

    async fn render_sampled_pages(
        &self,
        pdf: &[u8],
        total_pages: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<VisionImage>, JobError> {
        let mut images = Vec::new();
        for index in sample_pages(total_pages) {
            checkpoint(cancel)?;
            match self
                .rasterizer
                .render_page_png(pdf, index, RenderOptions::default())
                .await
            {
                Ok(png) => images.push(VisionImage {
                    mime_type: "image/png".to_string(),
                    base64_data: BASE64.encode(&png),
                    label: Some(format!("Page {}", index + 1)),
                }),
                // Unrendered pages narrow the vision pass but never sink the
                // job; the deterministic path may not need images at all.
                Err(e) => warn!(page = index + 1, "Page render failed: {}", e),
            }
        }
        Ok(images)
    }

    /// Step 4: trust the text layer when enough pages carry a header line.
    async fn segment_from_text_layer(
        &self,
        pdf: &[u8],
        total_pages: usize,
        config: &RuntimeConfig,
    ) -> Option<DeterministicSegmentation> {
        let mut headers: Vec<PageHeader> = Vec::with_capacity(total_pages);
        let mut pages_with_header = 0usize;
        for page_index in 0..total_pages {
            match self.rasterizer.extract_page_text(pdf, page_index).await {
                Ok(text) => {
                    let header = text.header_line().map(str::to_string);
                    if header.is_some() {
                        pages_with_header += 1;
                    }
                    headers.push(PageHeader {
                        page_index,
                        has_text: header.is_some(),
                        header_text: header.unwrap_or_default(),
                    });
                }
                Err(e) => {
                    debug!(page_index, "Text extraction failed: {}", e);
                    headers.push(PageHeader {
                        page_index,
                        header_text: String::new(),
                        has_text: false,
                    });
                }
            }
        }

        let coverage = pages_with_header as f64 / total_pages as f64;
        if coverage < TEXT_LAYER_COVERAGE_THRESHOLD {
            debug!(coverage, "Text layer too sparse for deterministic segmentation");
            return None;
        }

        let result = segment(&headers, total_pages, true);
        if result.labeled_fraction == 0.0 {
            return None;
        }
        let trusted = result.confidence >= config.skip_parse_threshold;
        Some(DeterministicSegmentation {
            trusted,
            from_text_layer: true,
            result,
        })
    }

    /// Step 5: label header crops in batches, spending budget per batch and
    /// keeping partial results when it runs out.
    async fn segment_from_header_crops(
        &self,
        pdf: &[u8],
        total_pages: usize,
        config: &RuntimeConfig,
        budget: &mut SessionBudget,
        cancel: &CancellationToken,
    ) -> Result<Option<DeterministicSegmentation>, JobError> {
        let mut crops: Vec<VisionImage> = Vec::with_capacity(total_pages);
        for page_index in 0..total_pages {
            checkpoint(cancel)?;
            match self.rasterizer.render_header_crop_png(pdf, page_index).await {
                Ok(png) => crops.push(VisionImage {
                    mime_type: "image/png".to_string(),
                    base64_data: BASE64.encode(&png),
                    label: Some(format!("Page {}", page_index + 1)),
                }),
                Err(e) => warn!(page_index, "Header crop failed: {}", e),
            }
        }
        if crops.is_empty() {
            return Ok(None);
        }

        let mut headers: Vec<PageHeader> = Vec::new();
        for batch in crops.chunks(HEADER_LABEL_BATCH_SIZE) {
            if budget.try_reserve_call().is_err() {
                warn!(
                    labeled = headers.len(),
                    "LLM budget exhausted mid-batch; continuing with partial labels"
                );
                break;
            }

            let opts = VisionCallOptions {
                system: Some(config.header_label_prompt.clone()),
                response_format: ResponseFormat::Json,
                max_tokens: 2048,
                temperature: 0.1,
                model_params: config.verification_model_params.clone(),
                documents: Vec::new(),
                timeout: INFERENCE_TIMEOUT,
            };
            match self
                .vision
                .call_vision_model(
                    &config.verification_target(),
                    batch,
                    prompts::HEADER_LABEL_USER_PROMPT,
                    &opts,
                    cancel,
                )
                .await
            {
                Ok(response) => {
                    budget.record_usage(&response.usage);
                    for (page_number, header) in parse_header_labels(&response.content) {
                        let page_index = page_number - 1;
                        if page_index < total_pages {
                            headers.push(PageHeader {
                                page_index,
                                has_text: header.is_some(),
                                header_text: header.unwrap_or_default(),
                            });
                        }
                    }
                }
                Err(ProviderError::Cancelled) => return Err(JobError::Cancelled),
                Err(e) => {
                    warn!("Header labeling batch failed: {}; keeping partial labels", e);
                    break;
                }
            }
        }

        if headers.is_empty() {
            return Ok(None);
        }
        let result = segment(&headers, total_pages, false);
        if result.labeled_fraction == 0.0 {
            return Ok(None);
        }
        let trusted = result.confidence >= config.skip_parse_threshold;
        Ok(Some(DeterministicSegmentation {
            trusted,
            from_text_layer: false,
            result,
        }))
    }

    /// Step 6: the primary vision call, over the raw PDF when the provider
    /// takes one, sampled page images otherwise.
    async fn call_primary_vision(
        &self,
        config: &RuntimeConfig,
        pdf: &[u8],
        sampled_images: &[VisionImage],
        cancel: &CancellationToken,
    ) -> Result<crate::providers::VisionResponse, JobError> {
        let (images, user_prompt, documents) = if config.native_pdf_enabled() {
            (
                Vec::new(),
                prompts::DEFAULT_VISION_PDF_USER_PROMPT,
                vec![PdfAttachment {
                    base64_data: BASE64.encode(pdf),
                    filename: None,
                }],
            )
        } else {
            (
                sampled_images.to_vec(),
                prompts::DEFAULT_VISION_USER_PROMPT,
                Vec::new(),
            )
        };

        let opts = VisionCallOptions {
            system: Some(config.vision_system_prompt.clone()),
            response_format: ResponseFormat::Json,
            max_tokens: 4096,
            temperature: 0.1,
            model_params: config.vision_model_params.clone(),
            documents,
            timeout: INFERENCE_TIMEOUT,
        };
        self.vision
            .call_vision_model(&config.vision_target(), &images, user_prompt, &opts, cancel)
            .await
            .map_err(map_provider_error)
    }

    /// Step 11: upload split parts under collision-free, deterministic keys.
    async fn save_parts(
        &self,
        session: &UploadSession,
        instructions: &[CuttingInstruction],
        splits: Vec<crate::pdf::SplitPart>,
    ) -> anyhow::Result<Vec<ParsedPart>> {
        let mut parts = Vec::with_capacity(splits.len());
        let mut used_slugs: HashSet<String> = HashSet::new();

        for (instruction, split) in instructions.iter().zip(splits) {
            let mut slug = slugify(&instruction.display_name());
            let mut suffix = 2usize;
            while !used_slugs.insert(slug.clone()) {
                slug = format!("{}-{}", slugify(&instruction.display_name()), suffix);
                suffix += 1;
            }

            let storage_key = part_storage_key(&session.id, &slug);
            let mut meta = ObjectMeta::new();
            meta.insert("sessionId".to_string(), session.id.clone());
            meta.insert("instrument".to_string(), instruction.instrument.clone());
            meta.insert("partName".to_string(), instruction.part_name.clone());
            meta.insert("section".to_string(), instruction.section.clone());
            meta.insert(
                "originalUploadId".to_string(),
                session.storage_key.clone(),
            );

            let byte_size = split.bytes.len() as u64;
            self.objects
                .put_object(&storage_key, &split.bytes, &meta)
                .await?;

            parts.push(ParsedPart {
                instrument: instruction.instrument.clone(),
                part_name: instruction.part_name.clone(),
                section: instruction.section.clone(),
                transposition: instruction.transposition.clone(),
                part_number: instruction.part_number,
                filename: format!("{}.pdf", slug),
                storage_key,
                byte_size,
                page_count: split.page_count,
                page_range: instruction.page_range,
            });
        }
        Ok(parts)
    }
}

pub(super) fn checkpoint(cancel: &CancellationToken) -> Result<(), JobError> {
    if cancel.is_cancelled() {
        Err(JobError::Cancelled)
    } else {
        Ok(())
    }
}

pub(super) fn map_provider_error(e: ProviderError) -> JobError {
    match e {
        ProviderError::Cancelled => JobError::Cancelled,
        e if e.is_retryable() => JobError::Retryable(e.to_string()),
        e => JobError::Fatal(e.to_string()),
    }
}

pub(super) fn provenance(config: &RuntimeConfig) -> LlmProvenance {
    LlmProvenance {
        provider: Some(config.provider.to_string()),
        vision_model: Some(config.vision_model.clone()),
        verification_model: Some(config.verification_model.clone()),
        model_params: config.vision_model_params.clone(),
        prompt_version: Some(config.prompt_version.clone()),
    }
}

fn to_one_indexed(instruction: &CuttingInstruction) -> CuttingInstruction {
    let mut out = instruction.clone();
    out.page_range = [instruction.start() + 1, instruction.end() + 1];
    out
}

fn low_confidence_note(
    errors: &[String],
    metadata: &ExtractedMetadata,
    config: &RuntimeConfig,
) -> String {
    if errors.is_empty() {
        format!(
            "Confidence {:.0} below the parse threshold {:.0}",
            metadata.confidence_score, config.skip_parse_threshold
        )
    } else {
        format!("Cutting instructions invalid: {}", errors.join("; "))
    }
}
