//! The refinement session: ingest → sanitize → export behind one guard.
//!
//! [`Refinery`] owns a [`SessionState`] and runs the pipeline stages against
//! it. Every operation follows the same shape:
//!
//! 1. lock, [`SessionState::begin`] (claims the in-flight slot or fails
//!    with `Busy`/`InvalidStep`), unlock;
//! 2. await the stage with no lock held;
//! 3. lock, [`reduce`] with the outcome, unlock.
//!
//! A second call while one is running is rejected instead of queued, and a
//! [`Refinery::reset`] during a call makes its result stale. The slot is
//! held by a `Claim`; dropping an unfinished call (a timeout around it, a
//! losing `select!` branch) releases the slot as a failure.

use crate::config::RefineConfig;
use crate::error::DocRefineError;
use crate::model::{AnalysisResult, DocumentState, ExportedDocument};
use crate::pipeline::llm::{ProviderGenerator, TextGenerator};
use crate::pipeline::{export, ingest, input, sanitize};
use crate::session::{reduce, Event, Operation, SessionState, Ticket};
use edgequake_llm::{LLMProvider, ProviderFactory};
use once_cell::sync::OnceCell;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Model used when a provider is named without one.
pub const DEFAULT_MODEL: &str = "gpt-4.1-nano";

/// A document refinement session.
///
/// # Example
/// ```rust,no_run
/// use docrefine::{Refinery, RefineConfig};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let refinery = Refinery::new(RefineConfig::default());
/// refinery.upload_path("report.docx").await?;
/// let analysis = refinery.sanitize().await?;
/// println!("{}", analysis.summary);
/// let doc = refinery.export().await?;
/// docrefine::write_export(&doc, std::path::Path::new("."))?;
/// # Ok(())
/// # }
/// ```
pub struct Refinery {
    session: Mutex<SessionState>,
    generator: OnceCell<Arc<dyn TextGenerator>>,
    config: RefineConfig,
}

impl Refinery {
    /// Create a session at step 1. The text generator is resolved on the
    /// first [`Refinery::sanitize`], so ingestion works without credentials.
    pub fn new(config: RefineConfig) -> Self {
        Self {
            session: Mutex::new(SessionState::new()),
            generator: OnceCell::new(),
            config,
        }
    }

    /// Create a session with an explicit text generator.
    pub fn with_generator(mut config: RefineConfig, generator: Arc<dyn TextGenerator>) -> Self {
        config.generator = Some(generator);
        Self::new(config)
    }

    pub fn config(&self) -> &RefineConfig {
        &self.config
    }

    /// Snapshot of the current session state.
    pub fn state(&self) -> SessionState {
        self.lock().clone()
    }

    /// Ingest in-memory `.docx` bytes. Step 1 → 2.
    pub async fn upload(
        &self,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> Result<Arc<DocumentState>, DocRefineError> {
        let claim = self.begin(Operation::Ingest, file_name)?;
        let result = ingest_blocking(file_name.to_string(), bytes).await;
        self.finish_ingest(claim, result)
    }

    /// Read a local path or URL, then ingest it. Step 1 → 2.
    pub async fn upload_path(&self, input: &str) -> Result<Arc<DocumentState>, DocRefineError> {
        let claim = self.begin(Operation::Ingest, input)?;
        let result = async {
            let resolved = input::resolve_input(input, self.config.download_timeout_secs).await?;
            ingest_blocking(resolved.file_name, resolved.bytes).await
        }
        .await;
        self.finish_ingest(claim, result)
    }

    /// Send the document out for cleaning and validate the reply. Step 2 → 3.
    ///
    /// Also allowed at step 3; the new result replaces the previous one.
    pub async fn sanitize(&self) -> Result<Arc<AnalysisResult>, DocRefineError> {
        let claim = self.begin(Operation::Sanitize, "document")?;
        let document = match claim.before.document().cloned() {
            Some(d) => d,
            None => {
                let err = DocRefineError::Internal("sanitize started without a document".into());
                return Err(claim.fail(err));
            }
        };

        let generator = match self.generator() {
            Ok(g) => g,
            Err(e) => return Err(claim.fail(e)),
        };
        info!(
            "Sanitizing {} via {} ({} chars)",
            document.file_name,
            generator.name(),
            document.raw_text.chars().count()
        );

        let start = Instant::now();
        let result = sanitize::sanitize(
            &document,
            &generator,
            &self.config,
            self.config.progress_callback.as_ref(),
        )
        .await;

        match result {
            Ok(analysis) => {
                let analysis = Arc::new(analysis);
                let ticket = claim.settle();
                self.apply(Event::Sanitized(ticket, Arc::clone(&analysis)));
                let summary = format!(
                    "{} issues, {} suggestions in {}ms",
                    analysis.formatting_issues.len(),
                    analysis.structural_suggestions.len(),
                    start.elapsed().as_millis()
                );
                info!("Sanitized {}: {}", document.file_name, summary);
                self.notify_complete(Operation::Sanitize, &summary);
                Ok(analysis)
            }
            Err(e) => Err(claim.fail(e.into())),
        }
    }

    /// Build the Word file from the cleaned markup. Stays at step 3.
    pub async fn export(&self) -> Result<ExportedDocument, DocRefineError> {
        let claim = self.begin(Operation::Export, "cleaned markup")?;
        let file_name = claim.before.document().map(|d| d.file_name.clone());
        let html = match claim.before.analysis().map(|a| a.formatted_html.clone()) {
            Some(html) => html,
            None => {
                let err = DocRefineError::Internal("export started without an analysis".into());
                return Err(claim.fail(err));
            }
        };

        let config = self.config.clone();
        let result = tokio::task::spawn_blocking(move || {
            export::export(&html, file_name.as_deref(), &config)
        })
        .await
        .map_err(|e| DocRefineError::Internal(format!("export task failed: {e}")))
        .and_then(|r| r);

        match result {
            Ok(doc) => {
                self.apply(Event::Exported(claim.settle()));
                self.notify_complete(
                    Operation::Export,
                    &format!("{} ({} bytes)", doc.file_name, doc.bytes.len()),
                );
                Ok(doc)
            }
            Err(e) => Err(claim.fail(e)),
        }
    }

    /// Discard everything and return to step 1.
    ///
    /// A call still in flight keeps running; its result is ignored.
    pub fn reset(&self) {
        let mut guard = self.lock();
        if let Some(op) = guard.in_flight() {
            warn!("Reset while {} is in flight; its result will be discarded", op);
        }
        *guard = reduce(&guard, Event::Reset);
        info!("Session reset");
    }

    // ── Internal helpers ─────────────────────────────────────────────────

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.session.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Claim the in-flight slot.
    fn begin(&self, operation: Operation, detail: &str) -> Result<Claim<'_>, DocRefineError> {
        let claim = {
            let mut guard = self.lock();
            let (next, ticket) = guard.begin(operation)?;
            let before = guard.clone();
            *guard = next;
            Claim {
                refinery: self,
                ticket,
                armed: true,
                before,
            }
        };
        debug!("{} started on {}", operation, detail);
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_stage_start(operation, detail);
        }
        Ok(claim)
    }

    fn apply(&self, event: Event) {
        let mut guard = self.lock();
        *guard = reduce(&guard, event);
    }

    fn notify_complete(&self, operation: Operation, summary: &str) {
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_stage_complete(operation, summary);
        }
    }

    fn finish_ingest(
        &self,
        claim: Claim<'_>,
        result: Result<DocumentState, DocRefineError>,
    ) -> Result<Arc<DocumentState>, DocRefineError> {
        match result {
            Ok(doc) => {
                let summary = format!(
                    "{}: {} chars, {} images",
                    doc.file_name,
                    doc.raw_text.chars().count(),
                    doc.image_count
                );
                let doc = Arc::new(doc);
                self.apply(Event::Ingested(claim.settle(), Arc::clone(&doc)));
                self.notify_complete(Operation::Ingest, &summary);
                Ok(doc)
            }
            Err(e) => Err(claim.fail(e)),
        }
    }

    fn generator(&self) -> Result<Arc<dyn TextGenerator>, DocRefineError> {
        self.generator
            .get_or_try_init(|| resolve_generator(&self.config))
            .map(Arc::clone)
    }
}

/// The in-flight slot held by one running operation.
///
/// Settle it with the success event, or let [`Claim::fail`] (or a drop)
/// release it with `Failed`.
struct Claim<'a> {
    refinery: &'a Refinery,
    ticket: Ticket,
    armed: bool,
    /// State the slot was claimed from.
    before: SessionState,
}

impl Claim<'_> {
    /// Take the ticket for the success event; the drop no longer fires.
    fn settle(mut self) -> Ticket {
        self.armed = false;
        self.ticket
    }

    /// Release the slot after a failure and hand the error back.
    fn fail(mut self, err: DocRefineError) -> DocRefineError {
        self.armed = false;
        let operation = self.ticket.operation();
        warn!("{} failed: {}", operation, err);
        self.refinery.apply(Event::Failed(self.ticket));
        if let Some(ref cb) = self.refinery.config.progress_callback {
            cb.on_stage_error(operation, &err.to_string());
        }
        err
    }
}

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        if self.armed {
            warn!("{} was cancelled before it finished", self.ticket.operation());
            self.refinery.apply(Event::Failed(self.ticket));
        }
    }
}

/// Resolve a document without starting a session or touching a provider.
///
/// Used by `--inspect-only`; does not require an API key.
pub async fn inspect(input_str: &str, config: &RefineConfig) -> Result<DocumentState, DocRefineError> {
    let resolved = input::resolve_input(input_str, config.download_timeout_secs).await?;
    ingest_blocking(resolved.file_name, resolved.bytes).await
}

/// Ingestion is CPU-bound (inflate + XML walk); keep it off the reactor.
async fn ingest_blocking(file_name: String, bytes: Vec<u8>) -> Result<DocumentState, DocRefineError> {
    tokio::task::spawn_blocking(move || ingest::ingest(&file_name, &bytes))
        .await
        .map_err(|e| DocRefineError::Internal(format!("ingest task failed: {e}")))?
}

fn create_provider(provider_name: &str, model: &str) -> Result<Arc<dyn TextGenerator>, DocRefineError> {
    let provider = ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        DocRefineError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })?;
    Ok(wrap(provider, format!("{provider_name}/{model}")))
}

fn wrap(provider: Arc<dyn LLMProvider>, label: String) -> Arc<dyn TextGenerator> {
    Arc::new(ProviderGenerator::new(provider, label))
}

/// Resolve the text generator, from most-specific to least-specific:
///
/// 1. `config.generator`, used as-is
/// 2. `config.provider`, wrapped
/// 3. `config.provider_name` + `config.model`
/// 4. `EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`, both set
/// 5. OpenAI when `OPENAI_API_KEY` is set
/// 6. `ProviderFactory::from_env()` auto-detection
fn resolve_generator(config: &RefineConfig) -> Result<Arc<dyn TextGenerator>, DocRefineError> {
    if let Some(ref generator) = config.generator {
        return Ok(Arc::clone(generator));
    }

    if let Some(ref provider) = config.provider {
        let label = config.model.clone().unwrap_or_else(|| "custom".to_string());
        return Ok(wrap(Arc::clone(provider), label));
    }

    if let Some(ref name) = config.provider_name {
        let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
        return create_provider(name, model);
    }

    if let (Ok(prov), Ok(model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            return create_provider(&prov, &model);
        }
    }

    if let Ok(openai_key) = std::env::var("OPENAI_API_KEY") {
        if !openai_key.is_empty() {
            let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
            return create_provider("openai", model);
        }
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| DocRefineError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                Set OPENAI_API_KEY, ANTHROPIC_API_KEY, or configure a provider.\n\
                Error: {}",
                e
            ),
        })?;

    Ok(wrap(llm_provider, "auto".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::llm::{GeneratedText, GenerationRequest};
    use crate::session::Step;
    use async_trait::async_trait;

    struct Unused;

    #[async_trait]
    impl TextGenerator for Unused {
        fn name(&self) -> &str {
            "unused"
        }

        async fn generate(&self, _request: &GenerationRequest) -> Result<GeneratedText, String> {
            Err("should not be called".into())
        }
    }

    #[test]
    fn explicit_generator_wins() {
        let generator: Arc<dyn TextGenerator> = Arc::new(Unused);
        let config = RefineConfig::builder()
            .generator(Arc::clone(&generator))
            .provider_name("openai")
            .build()
            .unwrap();
        let resolved = resolve_generator(&config).unwrap();
        assert_eq!(resolved.name(), "unused");
    }

    #[test]
    fn new_session_starts_at_upload() {
        let refinery = Refinery::new(RefineConfig::default());
        assert_eq!(refinery.state().step(), Step::Upload);
    }

    #[tokio::test]
    async fn sanitize_before_upload_is_invalid_step() {
        let refinery = Refinery::with_generator(RefineConfig::default(), Arc::new(Unused));
        let err = refinery.sanitize().await.unwrap_err();
        assert!(matches!(err, DocRefineError::InvalidStep { .. }));
        assert!(refinery.state().in_flight().is_none());
    }

    #[tokio::test]
    async fn failed_upload_releases_slot() {
        let refinery = Refinery::new(RefineConfig::default());
        assert!(refinery.upload("x.docx", b"garbage".to_vec()).await.is_err());
        let state = refinery.state();
        assert_eq!(state.step(), Step::Upload);
        assert!(state.in_flight().is_none());
    }
}
