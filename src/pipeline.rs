//! Strategy orchestration: the cheapest extraction path that yields
//! acceptable data wins.
//!
//! The ladder runs text-first, then embedded XFA form data, then a
//! single-call vision pass for short documents, then chunked vision, and
//! finally a last-resort full-document attempt. A strategy "succeeds" only
//! if its result passes [`ApplicationMetadata::is_acceptable`]; an empty
//! object from the model escalates to the next rung. While the local
//! strategies run, the document is speculatively uploaded in the background
//! so a later vision rung doesn't pay the upload latency; the task is
//! aborted if no rung ends up needing it.

use crate::aggregate::merge_chunk_results;
use crate::chunker::split_into_chunks;
use crate::config::Settings;
use crate::error::ExtractError;
use crate::gemini::{FileHandle, ModelClient, RemoteExtractor};
use crate::pdf::{self, analyze_pdf, PdfSignal};
use crate::progress::{MonotonicProgress, ProgressSink};
use crate::schema::{ApplicationMetadata, OfficeActionData};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{info, warn};

const PDF_MIME: &str = "application/pdf";

const METADATA_PROMPT: &str = "You are analyzing a United States patent application filing. \
Extract the bibliographic data: the title of the invention, the application number, the filing \
date, the entity status (micro, small, or undiscounted), every inventor with their full name, \
name parts, residence address, citizenship, the applicant when one is identified separately \
from the inventors, and the total number of drawing sheets. The Application Data Sheet (ADS), \
declaration, and transmittal forms are the most reliable sources. Only report values that are \
actually present in the document. Use null for anything absent; never guess or invent data.";

const TEXT_PROMPT_SUFFIX: &str = "The document's extracted text follows. Form field values, \
when present, appear between the FORM FIELD DATA markers and are the most reliable source.";

const XFA_PROMPT: &str = "You are analyzing the user-entered form data of a United States \
patent application, provided as XML extracted from the filing's fillable form. Field names \
describe what each value is. Extract the bibliographic data: title, application number, filing \
date, entity status, all inventors with names and addresses, the applicant, and the drawing \
sheet count. Only report values present in the XML; use null for anything absent.";

const CHUNK_PROMPT: &str = "You are analyzing an excerpt of a United States patent application; \
other parts of the filing are processed separately. Extract any bibliographic data visible in \
these pages: title, application number, filing date, entity status, inventors with names and \
addresses, applicant, drawing sheet count. Report only what appears in this excerpt and use \
null for everything else; another excerpt may carry the missing fields.";

const FALLBACK_PROMPT: &str = "You are analyzing a United States patent application that \
resisted structured extraction. Examine the document carefully, including handwritten entries, \
stamps, and poor-quality scans, and extract whatever bibliographic data you can find: title, \
application number, filing date, entity status, inventors, applicant, drawing sheet count. \
A partial answer is far better than none. Use null only for fields with no trace in the document.";

const OFFICE_ACTION_PROMPT: &str = "You are analyzing a USPTO Office Action. Extract the header \
(application number, filing date, office action date and type, examiner name, art unit, response \
deadline), the status of every claim, each rejection with its statutory basis, affected claims, \
examiner reasoning, and cited prior art references, any objections with their corrective actions, \
and other notable statements such as allowable subject matter indications. Only report what the \
document states; use null or empty lists for anything absent.";

fn metadata_schema() -> serde_json::Value {
    json!({
        "title": "invention title or null",
        "application_number": "string or null",
        "filing_date": "string as printed, or null",
        "entity_status": "micro | small | undiscounted | null",
        "inventors": [{
            "name": "full name as printed",
            "first_name": "string or null",
            "middle_name": "string or null",
            "last_name": "string or null",
            "suffix": "string or null",
            "street_address": "string or null",
            "city": "string or null",
            "state": "string or null",
            "zip_code": "string or null",
            "country": "string or null",
            "citizenship": "string or null",
            "full_address": "single-line address or null",
            "extraction_confidence": "0.0 to 1.0"
        }],
        "applicant": {
            "name": "organization or person, or null",
            "street_address": "string or null",
            "city": "string or null",
            "state": "string or null",
            "zip_code": "string or null",
            "country": "string or null"
        },
        "total_drawing_sheets": "integer or null",
        "extraction_confidence": "0.0 to 1.0",
        "_debug_reasoning": "one sentence on where the data was found"
    })
}

fn office_action_schema() -> serde_json::Value {
    json!({
        "header": {
            "application_number": "string or null",
            "filing_date": "string or null",
            "office_action_date": "string or null",
            "office_action_type": "non-final | final | advisory | null",
            "examiner_name": "string or null",
            "art_unit": "string or null",
            "response_deadline": "string or null"
        },
        "claims_status": [{
            "claim_number": "string",
            "status": "Rejected | Allowed | Objected to | Cancelled | Withdrawn",
            "dependency_type": "independent | dependent | null"
        }],
        "rejections": [{
            "rejection_type": "e.g. 102, 103, 112",
            "statutory_basis": "string or null",
            "affected_claims": ["claim numbers"],
            "examiner_reasoning": "summary or null",
            "cited_prior_art": [{
                "reference_type": "US Patent | Foreign Patent | NPL",
                "identifier": "string",
                "relevant_claims": ["claim numbers"]
            }]
        }],
        "objections": [{
            "objected_item": "string or null",
            "reason": "string or null",
            "corrective_action": "string or null"
        }],
        "other_statements": [{
            "statement_type": "string or null",
            "content": "string or null"
        }]
    })
}

/// A document handed to the pipeline, either in memory or on disk.
pub enum DocumentInput {
    Bytes(Vec<u8>),
    Path(PathBuf),
}

impl DocumentInput {
    async fn into_bytes(self) -> Result<Vec<u8>, ExtractError> {
        match self {
            DocumentInput::Bytes(bytes) => Ok(bytes),
            DocumentInput::Path(path) => tokio::fs::read(&path)
                .await
                .map_err(|e| ExtractError::Document(format!("{}: {}", path.display(), e))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Strategy {
    TextFirst,
    StructuredForm,
    NativeVision,
    ChunkedVision,
    FinalFallback,
}

type UploadTask = JoinHandle<Result<FileHandle, ExtractError>>;

/// The analysis pipeline. Cheap to share behind an `Arc`.
pub struct Analyzer {
    extractor: Arc<RemoteExtractor>,
    settings: Settings,
}

impl Analyzer {
    pub fn new(client: Arc<dyn ModelClient>, settings: Settings) -> Self {
        let extractor = Arc::new(RemoteExtractor::new(client, &settings));
        Self {
            extractor,
            settings,
        }
    }

    /// Run the full strategy ladder and return the first result that clears
    /// its rung's acceptance gate. Results that carry real data but miss
    /// the gate are held as a floor: if every later rung fails, the best
    /// earlier result is returned instead of an error.
    /// [`ExtractError::RateLimited`] from the last rung propagates so
    /// callers can distinguish "busy" from "unreadable".
    pub async fn analyze(
        &self,
        input: DocumentInput,
        progress: Arc<dyn ProgressSink>,
    ) -> Result<ApplicationMetadata, ExtractError> {
        let progress = MonotonicProgress::new(progress);
        let bytes = Arc::new(input.into_bytes().await?);

        progress.report(5, "Analyzing document structure");
        let signal = analyze_pdf(&bytes);
        info!(
            "Document: {} pages, {} chars local text, xfa={}",
            signal.page_count,
            signal.local_text.len(),
            signal.xfa_datasets.is_some()
        );

        // Page count 0 means the local parser gave up; such documents are
        // assumed short enough for the single-call vision path.
        let fast_track = signal.page_count < self.settings.fast_track_max_pages;

        let mut speculative: Option<UploadTask> = if fast_track {
            let extractor = self.extractor.clone();
            let upload_bytes = bytes.clone();
            Some(tokio::spawn(async move {
                extractor.upload(&upload_bytes, PDF_MIME).await
            }))
        } else {
            None
        };

        let mut ladder = Vec::new();
        if stripped_text_len(&signal.local_text) >= self.settings.sufficient_text_chars {
            ladder.push(Strategy::TextFirst);
        }
        if signal.xfa_datasets.is_some() {
            ladder.push(Strategy::StructuredForm);
        }
        if fast_track {
            ladder.push(Strategy::NativeVision);
        }
        ladder.push(Strategy::ChunkedVision);
        ladder.push(Strategy::FinalFallback);

        let mut floor: Option<ApplicationMetadata> = None;
        let mut last_err: Option<ExtractError> = None;
        let total_rungs = ladder.len();

        for (rung, strategy) in ladder.into_iter().enumerate() {
            let is_last = rung + 1 == total_rungs;
            info!("Running strategy {:?} ({}/{})", strategy, rung + 1, total_rungs);

            let outcome = self
                .run_strategy(strategy, &bytes, &signal, &mut speculative, &progress)
                .await;

            match outcome {
                Ok(metadata) if strategy_accepts(strategy, &metadata) => {
                    info!("Strategy {:?} produced an accepted result", strategy);
                    abort_upload(&mut speculative).await;
                    progress.report(100, "Analysis complete");
                    return Ok(metadata);
                }
                Ok(metadata) if is_last => {
                    // The last rung is terminal: even an empty result ends
                    // the ladder, but an earlier partial result beats it.
                    abort_upload(&mut speculative).await;
                    progress.report(100, "Analysis complete");
                    return Ok(floor.unwrap_or(metadata));
                }
                Ok(metadata) if metadata.is_acceptable() => {
                    // Thin but real data. Keep it and see if a later rung
                    // clears its acceptance gate.
                    info!("Strategy {:?} produced a partial result, continuing", strategy);
                    if floor.is_none() {
                        floor = Some(metadata);
                    }
                }
                Ok(_) => {
                    warn!("Strategy {:?} returned an empty result, escalating", strategy);
                }
                Err(ExtractError::RateLimited) if is_last => {
                    abort_upload(&mut speculative).await;
                    return Err(ExtractError::RateLimited);
                }
                Err(e) => {
                    warn!("Strategy {:?} failed: {}", strategy, e);
                    last_err = Some(e);
                }
            }
        }

        abort_upload(&mut speculative).await;

        if let Some(metadata) = floor {
            info!("All strategies exhausted; returning best partial result");
            progress.report(100, "Analysis complete");
            return Ok(metadata);
        }

        Err(ExtractError::Exhausted(
            last_err
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no strategy produced data".to_string()),
        ))
    }

    async fn run_strategy(
        &self,
        strategy: Strategy,
        bytes: &Arc<Vec<u8>>,
        signal: &PdfSignal,
        speculative: &mut Option<UploadTask>,
        progress: &MonotonicProgress,
    ) -> Result<ApplicationMetadata, ExtractError> {
        match strategy {
            Strategy::TextFirst => {
                progress.report(20, "Extracting from embedded text");
                let prompt = format!(
                    "{}\n\n{}\n\n{}",
                    METADATA_PROMPT, TEXT_PROMPT_SUFFIX, signal.local_text
                );
                self.extractor
                    .generate_structured(&prompt, None, &metadata_schema())
                    .await
            }
            Strategy::StructuredForm => {
                progress.report(25, "Reading embedded form data");
                let xml = signal.xfa_datasets.as_deref().unwrap_or_default();
                let prompt = format!("{}\n\n{}", XFA_PROMPT, xml);
                self.extractor
                    .generate_structured(&prompt, None, &metadata_schema())
                    .await
            }
            Strategy::NativeVision => {
                progress.report(35, "Analyzing document with vision model");
                let handle = self.resolve_upload(speculative, bytes).await?;
                self.extractor
                    .generate_structured(METADATA_PROMPT, Some(&handle), &metadata_schema())
                    .await
            }
            Strategy::ChunkedVision => self.run_chunked(bytes, progress).await,
            Strategy::FinalFallback => {
                progress.report(92, "Final extraction attempt");
                let handle = self.resolve_upload(speculative, bytes).await?;
                self.extractor
                    .generate_structured(FALLBACK_PROMPT, Some(&handle), &metadata_schema())
                    .await
            }
        }
    }

    /// Split the document into page-range chunks and fan them out to the
    /// model under a concurrency cap. Chunks that fail are logged and
    /// excluded from the merge; a rate limit on any chunk aborts the whole
    /// strategy. Results merge in page order regardless of completion order.
    async fn run_chunked(
        &self,
        bytes: &Arc<Vec<u8>>,
        progress: &MonotonicProgress,
    ) -> Result<ApplicationMetadata, ExtractError> {
        progress.report(40, "Splitting document into page chunks");
        let chunks = split_into_chunks(bytes, self.settings.chunk_size_pages)?;
        let total = chunks.len();
        progress.report(45, &format!("Processing {} chunks", total));

        let semaphore = Arc::new(Semaphore::new(self.settings.max_concurrent_extractions));
        let mut handles = Vec::with_capacity(total);
        for chunk in chunks {
            let extractor = self.extractor.clone();
            let semaphore = semaphore.clone();
            handles.push(tokio::spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|_| ExtractError::Request("concurrency gate closed".into()))?;
                let handle = extractor.upload(&chunk.bytes, PDF_MIME).await?;
                let prompt = format!(
                    "{}\n\nThis excerpt covers pages {} to {} of the filing.",
                    CHUNK_PROMPT, chunk.start_page, chunk.end_page
                );
                extractor
                    .generate_structured::<ApplicationMetadata>(
                        &prompt,
                        Some(&handle),
                        &metadata_schema(),
                    )
                    .await
            }));
        }

        // Awaiting in spawn order keeps results keyed by chunk position.
        let mut results = Vec::new();
        let mut pending = handles.into_iter().enumerate();
        while let Some((i, handle)) = pending.next() {
            match handle.await {
                Ok(Ok(metadata)) => results.push(metadata),
                Ok(Err(ExtractError::RateLimited)) => {
                    // Quota is gone; the queued chunk tasks must not keep
                    // hitting the service behind our back.
                    for (_, rest) in pending {
                        rest.abort();
                        let _ = rest.await;
                    }
                    return Err(ExtractError::RateLimited);
                }
                Ok(Err(e)) => warn!("Chunk {}/{} failed: {}", i + 1, total, e),
                Err(e) => warn!("Chunk {}/{} task aborted: {}", i + 1, total, e),
            }
            let pct = 50 + ((i + 1) * 40 / total) as u8;
            progress.report(pct, &format!("Processed chunk {}/{}", i + 1, total));
        }

        if results.is_empty() {
            return Err(ExtractError::Request("every chunk failed".into()));
        }
        Ok(merge_chunk_results(&results))
    }

    /// Hand over the speculative upload if one is pending, otherwise upload
    /// now. A failed speculative upload is retried fresh, except for rate
    /// limiting, which propagates.
    async fn resolve_upload(
        &self,
        speculative: &mut Option<UploadTask>,
        bytes: &Arc<Vec<u8>>,
    ) -> Result<FileHandle, ExtractError> {
        if let Some(task) = speculative.take() {
            match task.await {
                Ok(Ok(handle)) => return Ok(handle),
                Ok(Err(ExtractError::RateLimited)) => return Err(ExtractError::RateLimited),
                Ok(Err(e)) => warn!("Speculative upload failed, retrying inline: {}", e),
                Err(e) => warn!("Speculative upload task lost: {}", e),
            }
        }
        self.extractor.upload(bytes, PDF_MIME).await
    }

    /// Analyze a USPTO Office Action: text path when the document carries
    /// enough embedded text, vision path otherwise or on text failure.
    pub async fn analyze_office_action(
        &self,
        input: DocumentInput,
        progress: Arc<dyn ProgressSink>,
    ) -> Result<OfficeActionData, ExtractError> {
        let progress = MonotonicProgress::new(progress);
        let bytes = input.into_bytes().await?;

        progress.report(5, "Analyzing document structure");
        let signal = analyze_pdf(&bytes);

        if stripped_text_len(&signal.local_text) >= self.settings.sufficient_text_chars {
            progress.report(20, "Extracting from embedded text");
            let prompt = format!(
                "{}\n\nThe document's extracted text follows.\n\n{}",
                OFFICE_ACTION_PROMPT, signal.local_text
            );
            match self
                .extractor
                .generate_structured::<OfficeActionData>(&prompt, None, &office_action_schema())
                .await
            {
                Ok(data) => {
                    progress.report(100, "Analysis complete");
                    return Ok(data);
                }
                Err(ExtractError::RateLimited) => return Err(ExtractError::RateLimited),
                Err(e) => warn!("Office action text extraction failed: {}", e),
            }
        }

        progress.report(50, "Analyzing document with vision model");
        let handle = self.extractor.upload(&bytes, PDF_MIME).await?;
        let data = self
            .extractor
            .generate_structured(OFFICE_ACTION_PROMPT, Some(&handle), &office_action_schema())
            .await?;
        progress.report(100, "Analysis complete");
        Ok(data)
    }
}

async fn abort_upload(speculative: &mut Option<UploadTask>) {
    if let Some(task) = speculative.take() {
        task.abort();
        let _ = task.await;
    }
}

/// Per-strategy acceptance. Every rung first requires real data (at least
/// one non-empty scalar or a named inventor); on top of that, the cheaper
/// rungs demand the fields they are actually trusted to find, so a thin
/// answer from an unreliable source keeps the ladder climbing.
fn strategy_accepts(strategy: Strategy, metadata: &ApplicationMetadata) -> bool {
    if !metadata.is_acceptable() {
        return false;
    }
    match strategy {
        Strategy::TextFirst => {
            filled(&metadata.title)
                || filled(&metadata.application_number)
                || !metadata.inventors.is_empty()
        }
        // Form data is only trusted when it yields actual inventor names.
        Strategy::StructuredForm => metadata
            .inventors
            .iter()
            .any(|i| filled(&i.name) || filled(&i.last_name)),
        Strategy::NativeVision => true,
        Strategy::ChunkedVision => {
            filled(&metadata.title) || !metadata.inventors.is_empty()
        }
        Strategy::FinalFallback => true,
    }
}

fn filled(field: &Option<String>) -> bool {
    field.as_deref().map_or(false, |s| !s.trim().is_empty())
}

/// Character count of the local text with the extraction markers removed,
/// so a scanned document full of page markers doesn't look text-rich.
fn stripped_text_len(text: &str) -> usize {
    static PAGE_MARKER: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();
    let page_marker = PAGE_MARKER
        .get_or_init(|| regex::Regex::new(r"--- PAGE \d+ ---").expect("page marker pattern is valid"));
    let cleaned = page_marker.replace_all(text, "");
    let cleaned = cleaned
        .replace(pdf::FORM_DATA_START, "")
        .replace(pdf::FORM_DATA_END, "")
        .replace(pdf::EMPTY_PAGE_MARKER, "");
    cleaned.chars().filter(|c| !c.is_whitespace()).count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gemini::stub::{StubModel, StubReply};
    use crate::pdf::test_pdf::{build_form_pdf, build_pdf, build_xfa_pdf};
    use crate::progress::test_sink::RecordingSink;
    use crate::progress::NoopProgress;

    const GOOD_RESULT: &str =
        r#"{"title":"Adjustable Widget Coupling","inventors":[{"name":"Jane Smith"}]}"#;

    /// PDF whose form fields alone exceed the text sufficiency cutoff.
    fn text_rich_pdf() -> Vec<u8> {
        let abstract_text = "a".repeat(300);
        build_form_pdf(
            &["Application Data Sheet"],
            &[
                ("InventionTitle", "Adjustable Widget Coupling"),
                ("AbstractText", &abstract_text),
            ],
        )
    }

    #[tokio::test]
    async fn text_rich_document_never_touches_the_files_api() {
        let model = Arc::new(StubModel::with_replies(vec![StubReply::Ok(
            GOOD_RESULT.into(),
        )]));
        let analyzer = Analyzer::new(model.clone(), Settings::default());

        let result = analyzer
            .analyze(
                DocumentInput::Bytes(text_rich_pdf()),
                Arc::new(NoopProgress),
            )
            .await
            .unwrap();

        assert_eq!(result.title.as_deref(), Some("Adjustable Widget Coupling"));
        assert_eq!(model.generate_count(), 1);
        // The speculative upload is aborted before it ever runs on a
        // current-thread scheduler.
        assert_eq!(model.upload_count(), 0);
        // The prompt carried the embedded text, not a file reference.
        let prompts = model.prompts.lock().unwrap();
        assert!(prompts[0].contains("Adjustable Widget Coupling"));
    }

    #[tokio::test]
    async fn xfa_document_is_answered_from_form_data() {
        let model = Arc::new(StubModel::with_replies(vec![StubReply::Ok(
            GOOD_RESULT.into(),
        )]));
        let analyzer = Analyzer::new(model.clone(), Settings::default());
        let datasets = "<xfa:datasets><InventionTitle>Adjustable Widget Coupling</InventionTitle>\
                        <Inventor>Jane Smith</Inventor></xfa:datasets>";

        let result = analyzer
            .analyze(
                DocumentInput::Bytes(build_xfa_pdf(&[""], datasets)),
                Arc::new(NoopProgress),
            )
            .await
            .unwrap();

        assert!(result.is_acceptable());
        assert_eq!(model.generate_count(), 1);
        // The speculative upload was cancelled before it ever ran.
        assert_eq!(model.upload_count(), 0);
        let prompts = model.prompts.lock().unwrap();
        assert!(prompts[0].contains("<InventionTitle>"));
    }

    #[tokio::test]
    async fn long_scanned_document_is_chunked() {
        let mut replies = Vec::new();
        for i in 0..6 {
            replies.push(StubReply::Ok(format!(
                r#"{{"application_number":"17/000,00{}","inventors":[{{"name":"Inventor {}"}}]}}"#,
                i, i
            )));
        }
        let model = Arc::new(StubModel::with_replies(replies));
        let analyzer = Analyzer::new(model.clone(), Settings::default());

        // 60 scanned pages: no text, no XFA, too long for the fast track.
        let pages = vec![""; 60];
        let result = analyzer
            .analyze(
                DocumentInput::Bytes(build_pdf(&pages)),
                Arc::new(NoopProgress),
            )
            .await
            .unwrap();

        assert_eq!(model.upload_count(), 6);
        assert_eq!(model.generate_count(), 6);
        // First chunk's scalar wins, inventors arrive in chunk order.
        assert_eq!(result.application_number.as_deref(), Some("17/000,000"));
        let names: Vec<_> = result
            .inventors
            .iter()
            .map(|i| i.name.as_deref().unwrap())
            .collect();
        assert_eq!(
            names,
            vec![
                "Inventor 0",
                "Inventor 1",
                "Inventor 2",
                "Inventor 3",
                "Inventor 4",
                "Inventor 5"
            ]
        );
    }

    #[tokio::test]
    async fn empty_result_escalates_to_the_next_strategy() {
        let model = Arc::new(StubModel::with_replies(vec![
            StubReply::Ok("{}".into()),
            StubReply::Ok(GOOD_RESULT.into()),
        ]));
        let analyzer = Analyzer::new(model.clone(), Settings::default());
        let datasets = "<xfa:datasets><ApplicationType>nonprovisional</ApplicationType>\
                        <Signature>____________________________________</Signature>\
                        </xfa:datasets>";

        // Form rung returns nothing, fast-track vision rung delivers.
        let result = analyzer
            .analyze(
                DocumentInput::Bytes(build_xfa_pdf(&[""], datasets)),
                Arc::new(NoopProgress),
            )
            .await
            .unwrap();

        assert_eq!(result.title.as_deref(), Some("Adjustable Widget Coupling"));
        assert_eq!(model.generate_count(), 2);
        // The vision rung consumed the speculative upload.
        assert_eq!(model.upload_count(), 1);
    }

    #[tokio::test]
    async fn rate_limit_on_the_last_rung_propagates() {
        let model = Arc::new(StubModel::with_replies(vec![
            StubReply::RateLimited,
            StubReply::RateLimited,
            StubReply::RateLimited,
        ]));
        let analyzer = Analyzer::new(model.clone(), Settings::default());

        let result = analyzer
            .analyze(
                DocumentInput::Bytes(build_pdf(&[""])),
                Arc::new(NoopProgress),
            )
            .await;

        assert!(matches!(result, Err(ExtractError::RateLimited)));
    }

    #[tokio::test]
    async fn rate_limited_chunk_stops_the_remaining_chunk_tasks() {
        // Every call is rate limited. With six chunks an implementation
        // that lets the queued tasks run would make six chunk calls plus
        // the fallback; aborting caps it at the first chunk, at most one
        // already-woken neighbour, and the fallback.
        let replies = (0..10).map(|_| StubReply::RateLimited).collect();
        let model = Arc::new(StubModel::with_replies(replies));
        let analyzer = Analyzer::new(
            model.clone(),
            Settings {
                max_concurrent_extractions: 1,
                ..Settings::default()
            },
        );

        // 60 scanned pages: chunked vision is the first rung, 6 chunks.
        let pages = vec![""; 60];
        let result = analyzer
            .analyze(
                DocumentInput::Bytes(build_pdf(&pages)),
                Arc::new(NoopProgress),
            )
            .await;

        assert!(matches!(result, Err(ExtractError::RateLimited)));
        assert!(
            model.generate_count() <= 3,
            "orphaned chunk tasks kept calling the model: {} calls",
            model.generate_count()
        );
        assert!(model.upload_count() <= 3);
    }

    #[tokio::test]
    async fn partial_result_is_returned_when_later_rungs_fail() {
        let model = Arc::new(StubModel::with_replies(vec![
            StubReply::Ok(r#"{"entity_status":"small"}"#.into()),
            StubReply::Transient("vision failed".into()),
            StubReply::Transient("chunk failed".into()),
            StubReply::Transient("fallback failed".into()),
        ]));
        let analyzer = Analyzer::new(
            model.clone(),
            Settings {
                max_retries: 1,
                ..Settings::default()
            },
        );

        let datasets = "<xfa:datasets><EntityStatus>small</EntityStatus>\
                        <Signature>____________________________________</Signature>\
                        </xfa:datasets>";
        let result = analyzer
            .analyze(
                DocumentInput::Bytes(build_xfa_pdf(&[""], datasets)),
                Arc::new(NoopProgress),
            )
            .await
            .unwrap();

        // Every later rung failed; the thin form result is the floor.
        assert_eq!(result.entity_status.as_deref(), Some("small"));
        assert_eq!(model.generate_count(), 4);
    }

    #[tokio::test]
    async fn progress_is_monotonic_and_ends_at_100() {
        let mut replies = Vec::new();
        for _ in 0..6 {
            replies.push(StubReply::Ok(GOOD_RESULT.into()));
        }
        let model = Arc::new(StubModel::with_replies(replies));
        let analyzer = Analyzer::new(model, Settings::default());
        let sink = Arc::new(RecordingSink::default());

        let pages = vec![""; 60];
        analyzer
            .analyze(DocumentInput::Bytes(build_pdf(&pages)), sink.clone())
            .await
            .unwrap();

        let percents = sink.percents();
        assert!(!percents.is_empty());
        assert!(percents.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(*percents.last().unwrap(), 100);
    }

    #[tokio::test]
    async fn unreadable_bytes_fall_through_to_vision() {
        let model = Arc::new(StubModel::with_replies(vec![StubReply::Ok(
            GOOD_RESULT.into(),
        )]));
        let analyzer = Analyzer::new(model.clone(), Settings::default());

        // Not a PDF at all: page count is unknown, so the fast track runs.
        let result = analyzer
            .analyze(
                DocumentInput::Bytes(b"definitely not a pdf".to_vec()),
                Arc::new(NoopProgress),
            )
            .await
            .unwrap();

        assert!(result.is_acceptable());
        assert_eq!(model.upload_count(), 1);
    }

    #[tokio::test]
    async fn office_action_text_path_parses_structured_data() {
        let reply = r#"{
            "header": {"application_number": "16/555,123", "office_action_type": "non-final"},
            "claims_status": [{"claim_number": "1", "status": "Rejected"}],
            "rejections": [{
                "rejection_type": "103",
                "affected_claims": ["1"],
                "cited_prior_art": [{"identifier": "US 9,876,543"}]
            }]
        }"#;
        let model = Arc::new(StubModel::with_replies(vec![StubReply::Ok(reply.into())]));
        let analyzer = Analyzer::new(model.clone(), Settings::default());

        let filler = "claim rejection discussion ".repeat(20);
        let data = analyzer
            .analyze_office_action(
                DocumentInput::Bytes(build_form_pdf(&["Office Action"], &[("Body", &filler)])),
                Arc::new(NoopProgress),
            )
            .await
            .unwrap();

        assert_eq!(data.header.application_number.as_deref(), Some("16/555,123"));
        assert_eq!(data.claims_status.len(), 1);
        assert_eq!(data.rejections[0].rejection_type, "103");
        assert_eq!(model.upload_count(), 0);
    }
}
