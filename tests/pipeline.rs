//! Session-level integration tests with an in-process text generator.
//!
//! No network: every test plugs a scripted [`TextGenerator`] into the
//! [`Refinery`] and builds its `.docx` fixtures with docx-rs.

use async_trait::async_trait;
use docrefine::{
    DocRefineError, GeneratedText, GenerationRequest, Operation, RefineConfig, Refinery,
    SanitizeError, StageProgressCallback, Step, TextGenerator, DOCX_MIME,
};
use docx_rs::{Docx, Paragraph, Run};
use serde_json::json;
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ── Test helpers ─────────────────────────────────────────────────────────────

fn docx_fixture(paragraphs: &[&str]) -> Vec<u8> {
    let mut docx = Docx::new();
    for text in paragraphs {
        docx = docx.add_paragraph(Paragraph::new().add_run(Run::new().add_text(*text)));
    }
    let mut buf = Cursor::new(Vec::new());
    docx.build().pack(&mut buf).expect("pack fixture");
    buf.into_inner()
}

fn reply(html: &str) -> String {
    json!({
        "formattingIssues": [
            {"type": "spacing", "description": "Double spaces", "suggestion": "Single spaces"}
        ],
        "structuralSuggestions": [],
        "summary": "Removed the chat preamble.",
        "formattedHtml": html,
    })
    .to_string()
}

/// Answers every request with the same body after an optional delay and
/// remembers what it was asked.
struct Scripted {
    body: Result<String, String>,
    delay: Duration,
    calls: AtomicUsize,
    last: Mutex<Option<GenerationRequest>>,
}

impl Scripted {
    fn ok(body: impl Into<String>) -> Arc<Self> {
        Self::build(Ok(body.into()), Duration::ZERO)
    }

    fn slow(body: impl Into<String>, delay: Duration) -> Arc<Self> {
        Self::build(Ok(body.into()), delay)
    }

    fn failing(reason: &str) -> Arc<Self> {
        Self::build(Err(reason.to_string()), Duration::ZERO)
    }

    fn build(body: Result<String, String>, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            body,
            delay,
            calls: AtomicUsize::new(0),
            last: Mutex::new(None),
        })
    }

    fn last_request(&self) -> GenerationRequest {
        self.last.lock().unwrap().clone().expect("no request recorded")
    }
}

#[async_trait]
impl TextGenerator for Scripted {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<GeneratedText, String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last.lock().unwrap() = Some(request.clone());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.body.clone().map(|content| GeneratedText {
            content,
            input_tokens: 42,
            output_tokens: 17,
        })
    }
}

fn refinery(generator: Arc<Scripted>) -> Refinery {
    Refinery::with_generator(RefineConfig::default(), generator)
}

#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<String>>,
}

impl StageProgressCallback for Recorder {
    fn on_stage_start(&self, stage: Operation, _detail: &str) {
        self.events.lock().unwrap().push(format!("start {stage}"));
    }

    fn on_input_truncated(&self, original_chars: usize, kept_chars: usize) {
        self.events
            .lock()
            .unwrap()
            .push(format!("truncated {original_chars}->{kept_chars}"));
    }

    fn on_stage_complete(&self, stage: Operation, _summary: &str) {
        self.events.lock().unwrap().push(format!("done {stage}"));
    }

    fn on_stage_error(&self, stage: Operation, _error: &str) {
        self.events.lock().unwrap().push(format!("error {stage}"));
    }
}

// ── Happy path ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn report_docx_walks_all_three_steps() {
    let generator = Scripted::ok(reply("<p>Hello world</p>"));
    let refinery = refinery(Arc::clone(&generator));

    let doc = refinery
        .upload("report.docx", docx_fixture(&["Hello world"]))
        .await
        .unwrap();
    assert_eq!(doc.raw_text, "Hello world");
    assert_eq!(doc.file_name, "report.docx");
    assert_eq!(refinery.state().step(), Step::Confirm);
    assert_eq!(refinery.state().preview_html(), Some("<p>Hello world</p>"));

    let analysis = refinery.sanitize().await.unwrap();
    assert_eq!(analysis.formatted_html, "<p>Hello world</p>");
    assert_eq!(analysis.summary, "Removed the chat preamble.");
    assert_eq!(analysis.input_tokens, 42);
    assert_eq!(refinery.state().step(), Step::Review);
    assert!(generator.last_request().user_message.contains("Hello world"));

    let exported = refinery.export().await.unwrap();
    assert_eq!(exported.file_name, "DocRefine_Limpo_report.docx");
    assert_eq!(exported.mime_type, DOCX_MIME);
    assert_eq!(&exported.bytes[..4], b"PK\x03\x04");
    assert_eq!(refinery.state().step(), Step::Review);

    // Exported file reads back to the same text.
    let back = docrefine::pipeline::ingest::ingest(&exported.file_name, &exported.bytes).unwrap();
    assert_eq!(back.raw_text, "Hello world");
}

#[tokio::test]
async fn export_is_repeatable() {
    let refinery = refinery(Scripted::ok(reply("<h1>T</h1><p>Body</p>")));
    refinery
        .upload("a.docx", docx_fixture(&["T", "Body"]))
        .await
        .unwrap();
    refinery.sanitize().await.unwrap();

    let first = refinery.export().await.unwrap();
    let second = refinery.export().await.unwrap();
    assert_eq!(first.file_name, second.file_name);
    assert_eq!(refinery.state().step(), Step::Review);
    assert!(!refinery.state().is_exporting());
}

#[tokio::test]
async fn markdown_residue_is_cleaned_before_review() {
    let refinery = refinery(Scripted::ok(reply("```html\n<p>**Hi** there</p>\n```")));
    refinery.upload("a.docx", docx_fixture(&["Hi there"])).await.unwrap();
    let analysis = refinery.sanitize().await.unwrap();
    assert_eq!(analysis.formatted_html, "<p><strong>Hi</strong> there</p>");
}

#[tokio::test]
async fn long_documents_are_truncated_before_sending() {
    let generator = Scripted::ok(reply("<p>abcde</p>"));
    let recorder = Arc::new(Recorder::default());
    let config = RefineConfig::builder()
        .max_input_chars(5)
        .progress_callback(Arc::clone(&recorder) as Arc<dyn StageProgressCallback>)
        .build()
        .unwrap();
    let refinery = Refinery::with_generator(config, Arc::clone(&generator) as Arc<dyn TextGenerator>);

    refinery
        .upload("long.docx", docx_fixture(&["abcdefghijklmnop"]))
        .await
        .unwrap();
    refinery.sanitize().await.unwrap();

    let sent = generator.last_request().user_message;
    assert!(sent.contains("abcde"));
    assert!(!sent.contains("abcdef"));
    let events = recorder.events.lock().unwrap().clone();
    assert_eq!(
        events,
        vec![
            "start ingest",
            "done ingest",
            "start sanitize",
            "truncated 16->5",
            "done sanitize"
        ]
    );
}

// ── Failures never advance the step ──────────────────────────────────────────

#[tokio::test]
async fn corrupt_upload_stays_at_step_one() {
    let refinery = refinery(Scripted::ok(reply("<p>x</p>")));
    let err = refinery
        .upload("broken.docx", b"PK\x03\x04 not really".to_vec())
        .await
        .unwrap_err();
    assert!(matches!(err, DocRefineError::Parse { .. }));

    let state = refinery.state();
    assert_eq!(state.step(), Step::Upload);
    assert!(state.document().is_none());
    assert!(state.in_flight().is_none());
}

#[tokio::test]
async fn reply_missing_field_stays_at_step_two() {
    let body = json!({
        "formattingIssues": [],
        "structuralSuggestions": [],
        "summary": "done"
    })
    .to_string();
    let refinery = refinery(Scripted::ok(body));
    refinery.upload("a.docx", docx_fixture(&["Hello"])).await.unwrap();

    let err = refinery.sanitize().await.unwrap_err();
    assert!(matches!(
        err,
        DocRefineError::Sanitization(SanitizeError::Schema(_))
    ));
    let state = refinery.state();
    assert_eq!(state.step(), Step::Confirm);
    assert!(state.analysis().is_none());
    assert!(!state.is_analyzing());
}

#[tokio::test]
async fn disallowed_markup_is_rejected() {
    let refinery = refinery(Scripted::ok(reply("<p>hi</p><script>alert(1)</script>")));
    refinery.upload("a.docx", docx_fixture(&["hi"])).await.unwrap();
    let err = refinery.sanitize().await.unwrap_err();
    assert!(matches!(
        err,
        DocRefineError::Sanitization(SanitizeError::Markup(_))
    ));
    assert_eq!(refinery.state().step(), Step::Confirm);
}

#[tokio::test]
async fn provider_failure_is_reported_once() {
    let generator = Scripted::failing("HTTP 429 Too Many Requests");
    let refinery = refinery(Arc::clone(&generator));
    refinery.upload("a.docx", docx_fixture(&["hi"])).await.unwrap();

    let err = refinery.sanitize().await.unwrap_err();
    assert!(matches!(
        err,
        DocRefineError::Sanitization(SanitizeError::Request(ref m)) if m.contains("429")
    ));
    assert_eq!(generator.calls.load(Ordering::SeqCst), 1);

    // The user may simply try again.
    assert!(refinery.sanitize().await.is_err());
    assert_eq!(generator.calls.load(Ordering::SeqCst), 2);
    assert_eq!(refinery.state().step(), Step::Confirm);
}

#[tokio::test]
async fn export_before_sanitize_is_invalid() {
    let refinery = refinery(Scripted::ok(reply("<p>x</p>")));
    refinery.upload("a.docx", docx_fixture(&["x"])).await.unwrap();
    assert!(matches!(
        refinery.export().await,
        Err(DocRefineError::InvalidStep {
            operation: Operation::Export,
            step: Step::Confirm
        })
    ));
}

// ── In-flight guard and reset ────────────────────────────────────────────────

#[tokio::test]
async fn concurrent_sanitize_is_busy() {
    let generator = Scripted::slow(reply("<p>x</p>"), Duration::from_millis(200));
    let refinery = refinery(Arc::clone(&generator));
    refinery.upload("a.docx", docx_fixture(&["x"])).await.unwrap();

    let (first, second) = tokio::join!(refinery.sanitize(), refinery.sanitize());
    assert!(first.is_ok());
    assert!(matches!(
        second,
        Err(DocRefineError::Busy {
            operation: Operation::Sanitize,
            in_flight: Operation::Sanitize
        })
    ));
    assert_eq!(generator.calls.load(Ordering::SeqCst), 1);
    assert_eq!(refinery.state().step(), Step::Review);
}

#[tokio::test]
async fn upload_during_sanitize_is_busy() {
    let refinery = refinery(Scripted::slow(reply("<p>x</p>"), Duration::from_millis(200)));
    refinery.upload("a.docx", docx_fixture(&["x"])).await.unwrap();

    let (sanitized, uploaded) = tokio::join!(
        refinery.sanitize(),
        refinery.upload("b.docx", docx_fixture(&["y"]))
    );
    assert!(sanitized.is_ok());
    assert!(matches!(uploaded, Err(DocRefineError::Busy { .. })));
    assert_eq!(refinery.state().document().unwrap().file_name, "a.docx");
}

#[tokio::test]
async fn reset_discards_a_late_result() {
    let refinery = refinery(Scripted::slow(reply("<p>late</p>"), Duration::from_millis(200)));
    refinery.upload("a.docx", docx_fixture(&["x"])).await.unwrap();

    let (late, ()) = tokio::join!(refinery.sanitize(), async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        refinery.reset();
    });
    assert!(late.is_ok());

    let state = refinery.state();
    assert_eq!(state.step(), Step::Upload);
    assert!(state.document().is_none());
    assert!(state.analysis().is_none());
    assert!(state.in_flight().is_none());

    // The session is usable again straight away.
    refinery.upload("b.docx", docx_fixture(&["y"])).await.unwrap();
    assert_eq!(refinery.state().step(), Step::Confirm);
}

#[tokio::test]
async fn reset_from_every_step_returns_to_upload() {
    let refinery = refinery(Scripted::ok(reply("<p>x</p>")));

    refinery.reset();
    assert_eq!(refinery.state().step(), Step::Upload);

    refinery.upload("a.docx", docx_fixture(&["x"])).await.unwrap();
    refinery.reset();
    assert_eq!(refinery.state().step(), Step::Upload);
    assert!(refinery.state().document().is_none());

    refinery.upload("a.docx", docx_fixture(&["x"])).await.unwrap();
    refinery.sanitize().await.unwrap();
    refinery.reset();
    let state = refinery.state();
    assert_eq!(state.step(), Step::Upload);
    assert!(state.analysis().is_none());
}

#[tokio::test]
async fn abandoned_sanitize_releases_the_slot() {
    let generator = Scripted::slow(reply("<p>x</p>"), Duration::from_millis(300));
    let refinery = refinery(Arc::clone(&generator));
    refinery.upload("a.docx", docx_fixture(&["x"])).await.unwrap();

    let timed_out = tokio::time::timeout(Duration::from_millis(20), refinery.sanitize()).await;
    assert!(timed_out.is_err());

    let state = refinery.state();
    assert_eq!(state.step(), Step::Confirm);
    assert!(state.in_flight().is_none());

    refinery.sanitize().await.unwrap();
    assert_eq!(generator.calls.load(Ordering::SeqCst), 2);
    assert_eq!(refinery.state().step(), Step::Review);
}

#[tokio::test]
async fn session_shares_the_returned_results() {
    let refinery = refinery(Scripted::ok(reply("<p>x</p>")));
    let doc = refinery.upload("a.docx", docx_fixture(&["x"])).await.unwrap();
    let analysis = refinery.sanitize().await.unwrap();

    let state = refinery.state();
    assert!(Arc::ptr_eq(&doc, state.document().unwrap()));
    assert!(Arc::ptr_eq(&analysis, state.analysis().unwrap()));
}

// ── Writing to disk ──────────────────────────────────────────────────────────

#[tokio::test]
async fn upload_path_and_write_export() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("minutes.docx");
    std::fs::write(&input, docx_fixture(&["Minutes", "Item one"])).unwrap();

    let refinery = refinery(Scripted::ok(reply("<h1>Minutes</h1><p>Item one</p>")));
    refinery.upload_path(input.to_str().unwrap()).await.unwrap();
    refinery.sanitize().await.unwrap();
    let doc = refinery.export().await.unwrap();

    let out_dir = dir.path().join("out");
    std::fs::create_dir(&out_dir).unwrap();
    let written = docrefine::write_export(&doc, &out_dir).unwrap();
    assert_eq!(written, out_dir.join("DocRefine_Limpo_minutes.docx"));

    let names: Vec<String> = std::fs::read_dir(&out_dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, vec!["DocRefine_Limpo_minutes.docx".to_string()]);
}

#[test]
fn session_is_drivable_from_sync_code() {
    let refinery = refinery(Scripted::ok(reply("<p>sync</p>")));
    let analysis = tokio_test::block_on(async {
        refinery.upload("s.docx", docx_fixture(&["sync"])).await?;
        refinery.sanitize().await
    })
    .unwrap();
    assert_eq!(analysis.formatted_html, "<p>sync</p>");
}
