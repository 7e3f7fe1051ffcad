//! Configuration types for document refinement.
//!
//! All behaviour is controlled through [`RefineConfig`], built via its
//! [`RefineConfigBuilder`]. Page styling for the exported file lives in
//! [`PageLayout`] so the HTML shell and the `.docx` writer read the same
//! numbers.

use crate::error::DocRefineError;
use crate::pipeline::llm::TextGenerator;
use crate::progress::ProgressCallback;
use edgequake_llm::LLMProvider;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Default prefix of exported file names.
pub const DEFAULT_FILE_PREFIX: &str = "DocRefine_Limpo_";

/// Configuration for a refinement session.
///
/// Built via [`RefineConfig::builder()`] or using [`RefineConfig::default()`].
///
/// # Example
/// ```rust
/// use docrefine::RefineConfig;
///
/// let config = RefineConfig::builder()
///     .model("gpt-4.1-mini")
///     .max_input_chars(12_000)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct RefineConfig {
    /// LLM model identifier, e.g. "gpt-4.1-mini", "gemini-2.0-flash".
    /// If None, uses provider default.
    pub model: Option<String>,

    /// LLM provider name (e.g. "openai", "anthropic", "gemini").
    /// If None along with `provider`, uses `ProviderFactory::from_env()`.
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Pre-constructed text generator. Takes precedence over every provider
    /// setting; used to plug in non-edgequake backends and test doubles.
    pub generator: Option<Arc<dyn TextGenerator>>,

    /// Sampling temperature. Default: 0.1.
    ///
    /// Cleaning must not paraphrase; a low temperature keeps the model close
    /// to the source wording.
    pub temperature: f32,

    /// Maximum tokens the model may generate. Default: 8192.
    ///
    /// The reply carries the whole cleaned document as HTML plus the report,
    /// so it is roughly as long as the (truncated) input.
    pub max_tokens: usize,

    /// Maximum number of characters of document text sent to the model.
    /// Default: 15 000. Longer documents are truncated.
    pub max_input_chars: usize,

    /// Per-call timeout for the sanitization request in seconds. Default: 120.
    pub api_timeout_secs: u64,

    /// Download timeout for URL inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// Custom system prompt. If None, uses built-in default.
    pub system_prompt: Option<String>,

    /// Prefix of the exported file name. Default: `DocRefine_Limpo_`.
    pub file_prefix: String,

    /// Page styling of the exported document.
    pub layout: PageLayout,

    /// Optional per-stage progress callback.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for RefineConfig {
    fn default() -> Self {
        Self {
            model: None,
            provider_name: None,
            provider: None,
            generator: None,
            temperature: 0.1,
            max_tokens: 8192,
            max_input_chars: 15_000,
            api_timeout_secs: 120,
            download_timeout_secs: 120,
            system_prompt: None,
            file_prefix: DEFAULT_FILE_PREFIX.to_string(),
            layout: PageLayout::default(),
            progress_callback: None,
        }
    }
}

impl fmt::Debug for RefineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefineConfig")
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("generator", &self.generator.as_ref().map(|g| g.name().to_string()))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("max_input_chars", &self.max_input_chars)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("file_prefix", &self.file_prefix)
            .field("layout", &self.layout)
            .finish()
    }
}

impl RefineConfig {
    /// Create a new builder for `RefineConfig`.
    pub fn builder() -> RefineConfigBuilder {
        RefineConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`RefineConfig`].
#[derive(Debug)]
pub struct RefineConfigBuilder {
    config: RefineConfig,
}

impl RefineConfigBuilder {
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn generator(mut self, generator: Arc<dyn TextGenerator>) -> Self {
        self.config.generator = Some(generator);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn max_input_chars(mut self, n: usize) -> Self {
        self.config.max_input_chars = n;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(prompt.into());
        self
    }

    pub fn file_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.file_prefix = prefix.into();
        self
    }

    pub fn layout(mut self, layout: PageLayout) -> Self {
        self.config.layout = layout;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<RefineConfig, DocRefineError> {
        let c = &self.config;
        if c.max_input_chars == 0 {
            return Err(DocRefineError::InvalidConfig(
                "max_input_chars must be ≥ 1".into(),
            ));
        }
        if c.max_tokens == 0 {
            return Err(DocRefineError::InvalidConfig("max_tokens must be ≥ 1".into()));
        }
        if c.api_timeout_secs == 0 {
            return Err(DocRefineError::InvalidConfig(
                "api_timeout_secs must be ≥ 1".into(),
            ));
        }
        if c.file_prefix.contains(['/', '\\']) {
            return Err(DocRefineError::InvalidConfig(format!(
                "file_prefix must not contain path separators, got {:?}",
                c.file_prefix
            )));
        }
        c.layout.validate()?;
        Ok(self.config)
    }
}

// ── Page layout ──────────────────────────────────────────────────────────

/// Print styling applied to the exported document.
///
/// Defaults follow the usual academic layout: A4 portrait, margins
/// 3 cm top/left and 2 cm bottom/right, Arial 12 pt, 1.5 line spacing,
/// justified paragraphs with a 1.25 cm first-line indent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageLayout {
    pub margin_top_cm: f32,
    pub margin_right_cm: f32,
    pub margin_bottom_cm: f32,
    pub margin_left_cm: f32,
    pub font_family: String,
    pub font_size_pt: f32,
    pub line_height: f32,
    /// Space after each paragraph.
    pub paragraph_spacing_pt: f32,
    pub first_line_indent_cm: f32,
    pub justify: bool,
    pub orientation: Orientation,
}

impl Default for PageLayout {
    fn default() -> Self {
        Self {
            margin_top_cm: 3.0,
            margin_right_cm: 2.0,
            margin_bottom_cm: 2.0,
            margin_left_cm: 3.0,
            font_family: "Arial".to_string(),
            font_size_pt: 12.0,
            line_height: 1.5,
            paragraph_spacing_pt: 12.0,
            first_line_indent_cm: 1.25,
            justify: true,
            orientation: Orientation::Portrait,
        }
    }
}

/// Page orientation of the exported document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Orientation {
    #[default]
    Portrait,
    Landscape,
}

/// Twentieths of a point per centimetre.
const TWIPS_PER_CM: f32 = 566.929;

impl PageLayout {
    fn validate(&self) -> Result<(), DocRefineError> {
        let margins = [
            self.margin_top_cm,
            self.margin_right_cm,
            self.margin_bottom_cm,
            self.margin_left_cm,
        ];
        if margins.iter().any(|m| !(0.0..=10.0).contains(m)) {
            return Err(DocRefineError::InvalidConfig(format!(
                "margins must be 0–10 cm, got {margins:?}"
            )));
        }
        if !(6.0..=72.0).contains(&self.font_size_pt) {
            return Err(DocRefineError::InvalidConfig(format!(
                "font size must be 6–72 pt, got {}",
                self.font_size_pt
            )));
        }
        if !(1.0..=3.0).contains(&self.line_height) {
            return Err(DocRefineError::InvalidConfig(format!(
                "line height must be 1.0–3.0, got {}",
                self.line_height
            )));
        }
        if self.font_family.trim().is_empty() {
            return Err(DocRefineError::InvalidConfig("font family is empty".into()));
        }
        Ok(())
    }

    /// Convert centimetres to twips (1/1440 inch), the unit of page geometry.
    pub fn cm_to_twips(cm: f32) -> i32 {
        (cm * TWIPS_PER_CM).round() as i32
    }

    /// Font size in half-points, the unit of run sizes.
    pub fn half_points(&self) -> usize {
        (self.font_size_pt * 2.0).round() as usize
    }

    /// Line spacing in 240ths of a line ("auto" line rule).
    pub fn line_spacing_240ths(&self) -> i32 {
        (self.line_height * 240.0).round() as i32
    }

    /// Paragraph spacing in twips.
    pub fn paragraph_spacing_twips(&self) -> u32 {
        (self.paragraph_spacing_pt * 20.0).round() as u32
    }

    /// CSS rules for the HTML document shell.
    pub fn css(&self) -> String {
        format!(
            "@page {{ size: A4 {orientation}; margin: {t}cm {r}cm {b}cm {l}cm; }}\n\
             body {{ font-family: '{font}', sans-serif; font-size: {size}pt; line-height: {lh}; text-align: {align}; color: #000000; }}\n\
             p {{ margin: 0 0 {sp}pt 0; text-indent: {indent}cm; }}\n\
             table {{ border-collapse: collapse; width: 100%; margin: {sp}pt 0; }}\n\
             th, td {{ border: 1px solid black; padding: 6pt; }}\n\
             h1, h2, h3 {{ font-weight: bold; margin: 18pt 0 12pt 0; text-align: left; text-indent: 0; }}",
            orientation = match self.orientation {
                Orientation::Portrait => "portrait",
                Orientation::Landscape => "landscape",
            },
            t = self.margin_top_cm,
            r = self.margin_right_cm,
            b = self.margin_bottom_cm,
            l = self.margin_left_cm,
            font = self.font_family,
            size = self.font_size_pt,
            lh = self.line_height,
            align = if self.justify { "justify" } else { "left" },
            sp = self.paragraph_spacing_pt,
            indent = self.first_line_indent_cm,
        )
    }
}
