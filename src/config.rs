//! Configuration types for playlist-dl

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Batch execution configuration (concurrency, destination, resolution strictness)
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Maximum number of items fetched simultaneously (default: 4)
    #[serde(default = "default_concurrency_limit")]
    pub concurrency_limit: usize,

    /// Base destination directory (default: "./downloads")
    #[serde(default = "default_output_root")]
    pub output_root: PathBuf,

    /// Output file name template, relative to `output_root`
    ///
    /// `{index}` is replaced with the zero-padded sequence index and `{key}` with the
    /// sanitized canonical key. Anything else (such as yt-dlp's `%(title)s`) is passed
    /// through to the fetcher untouched.
    #[serde(default = "default_file_name_template")]
    pub file_name_template: String,

    /// Zero-padding width for `{index}` (default: 3)
    #[serde(default = "default_index_width")]
    pub index_width: usize,

    /// Treat a collection that enumerates to zero entries as unavailable (default: true)
    #[serde(default = "default_true")]
    pub expect_non_empty: bool,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            concurrency_limit: default_concurrency_limit(),
            output_root: default_output_root(),
            file_name_template: default_file_name_template(),
            index_width: default_index_width(),
            expect_non_empty: true,
        }
    }
}

/// Per-item retry policy
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts per item, including the first one (default: 3)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the second attempt (default: 1 second)
    #[serde(default = "default_initial_delay", with = "duration_millis_serde")]
    pub initial_delay: Duration,

    /// Upper bound on every sleep between attempts, jitter included (default: 30 seconds)
    #[serde(default = "default_max_delay", with = "duration_millis_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Retry policy with no delay between attempts
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            jitter: false,
        }
    }
}

/// What a recognized reference denotes
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceKind {
    /// A single fetchable item
    #[default]
    Item,
    /// A collection that must be expanded through the entry lister
    Collection,
}

/// How the identifying value is pulled out of a matching reference
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Extraction {
    /// A capture group of the rule's pattern, by index ("1") or name ("id")
    Capture {
        /// Group index or name
        group: String,
    },
    /// A query parameter of the reference parsed as a URL
    QueryParam {
        /// Parameter name (e.g., "v" or "list")
        name: String,
    },
    /// The n-th non-empty path segment of the reference parsed as a URL (0-based)
    PathSegment {
        /// Segment index
        index: usize,
    },
    /// The trimmed reference itself
    #[default]
    Whole,
}

/// One entry of the normalizer's pattern table
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceRule {
    /// Rule name, used in logs
    pub name: String,

    /// Regular expression a reference must match for this rule to apply
    pub pattern: String,

    /// Extraction applied to matching references
    #[serde(default)]
    pub extract: Extraction,

    /// Canonical key template; `{id}` is replaced by the extracted value
    #[serde(default = "default_key_template")]
    pub key_template: String,

    /// Whether matches denote items or collections
    #[serde(default)]
    pub kind: ReferenceKind,
}

impl ReferenceRule {
    /// Rule mapping every non-empty reference to itself
    pub fn identity() -> Self {
        Self {
            name: "identity".to_string(),
            pattern: r"\S".to_string(),
            extract: Extraction::Whole,
            key_template: default_key_template(),
            kind: ReferenceKind::Item,
        }
    }
}

/// Recognized reference shapes
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NormalizerConfig {
    /// Rules tried in order; the first rule that matches and yields a value wins
    #[serde(default = "default_rules")]
    pub rules: Vec<ReferenceRule>,
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self {
            rules: default_rules(),
        }
    }
}

/// A field consulted when turning a raw collection entry into a reference
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateField {
    /// JSON field name in the raw entry
    pub name: String,

    /// Optional template; `{value}` is replaced by the field's value
    #[serde(default)]
    pub template: Option<String>,
}

impl CandidateField {
    /// Field used verbatim
    pub fn plain(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            template: None,
        }
    }

    /// Field rendered through a template
    pub fn templated(name: impl Into<String>, template: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            template: Some(template.into()),
        }
    }
}

/// Raw entry → reference extraction
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExtractionConfig {
    /// Fields in priority order; the first non-empty one wins
    #[serde(default = "default_candidate_fields")]
    pub candidate_fields: Vec<CandidateField>,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            candidate_fields: default_candidate_fields(),
        }
    }
}

/// Output media format requested from the fetch tool
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaFormat {
    /// Best video and best audio merged into an mp4 container
    #[default]
    Video,
    /// Best audio extracted to mp3 with embedded thumbnail and metadata
    Audio,
}

impl MediaFormat {
    /// File extension of the final output
    pub fn extension(&self) -> &'static str {
        match self {
            MediaFormat::Video => "mp4",
            MediaFormat::Audio => "mp3",
        }
    }
}

/// External tool configuration (yt-dlp, ffmpeg)
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Path to the yt-dlp binary (None = search PATH when `search_path` is set)
    #[serde(default)]
    pub yt_dlp_path: Option<PathBuf>,

    /// Directory or binary passed to yt-dlp as `--ffmpeg-location`
    #[serde(default)]
    pub ffmpeg_location: Option<PathBuf>,

    /// Search PATH for binaries that are not configured explicitly (default: true)
    #[serde(default = "default_true")]
    pub search_path: bool,

    /// Requested output format
    #[serde(default)]
    pub format: MediaFormat,

    /// Audio bitrate in kbit/s for [`MediaFormat::Audio`] (default: "192")
    #[serde(default = "default_audio_quality")]
    pub audio_quality: String,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            yt_dlp_path: None,
            ffmpeg_location: None,
            search_path: true,
            format: MediaFormat::default(),
            audio_quality: default_audio_quality(),
        }
    }
}

/// Top-level configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Batch execution settings
    #[serde(default)]
    pub batch: BatchConfig,

    /// Per-item retry policy
    #[serde(default)]
    pub retry: RetryConfig,

    /// Recognized reference shapes
    #[serde(default)]
    pub normalizer: NormalizerConfig,

    /// Raw entry extraction
    #[serde(default)]
    pub extraction: ExtractionConfig,

    /// External tools
    #[serde(default)]
    pub tools: ToolsConfig,
}

impl Config {
    /// Parse a JSON configuration; missing fields take their defaults
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON configuration file
    pub fn from_file(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Reject settings the batch cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.batch.concurrency_limit == 0 {
            return Err(Error::config(
                "batch.concurrency_limit",
                "concurrency limit must be at least 1",
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(Error::config(
                "retry.max_attempts",
                "max attempts must be at least 1",
            ));
        }
        let multiplier = self.retry.backoff_multiplier;
        if !multiplier.is_finite() || multiplier < 1.0 {
            return Err(Error::config(
                "retry.backoff_multiplier",
                "backoff multiplier must be a finite number >= 1.0",
            ));
        }
        if self.normalizer.rules.is_empty() {
            return Err(Error::config(
                "normalizer.rules",
                "at least one reference rule is required",
            ));
        }
        if self.extraction.candidate_fields.is_empty() {
            return Err(Error::config(
                "extraction.candidate_fields",
                "at least one candidate field is required",
            ));
        }
        Ok(())
    }
}

fn default_concurrency_limit() -> usize {
    4
}

fn default_output_root() -> PathBuf {
    PathBuf::from("./downloads")
}

fn default_file_name_template() -> String {
    "{index} - %(title).100s.%(ext)s".to_string()
}

fn default_index_width() -> usize {
    3
}

fn default_true() -> bool {
    true
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(30)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_key_template() -> String {
    "{id}".to_string()
}

fn default_audio_quality() -> String {
    "192".to_string()
}

const WATCH_URL: &str = "https://www.youtube.com/watch?v={id}";

fn default_rules() -> Vec<ReferenceRule> {
    vec![
        ReferenceRule {
            name: "youtube_playlist".to_string(),
            pattern: r"^https?://(?:www\.|m\.|music\.)?youtube\.com/playlist\?".to_string(),
            extract: Extraction::QueryParam {
                name: "list".to_string(),
            },
            key_template: "https://www.youtube.com/playlist?list={id}".to_string(),
            kind: ReferenceKind::Collection,
        },
        ReferenceRule {
            name: "youtube_watch".to_string(),
            pattern: r"^https?://(?:www\.|m\.|music\.)?youtube\.com/watch\?".to_string(),
            extract: Extraction::QueryParam {
                name: "v".to_string(),
            },
            key_template: WATCH_URL.to_string(),
            kind: ReferenceKind::Item,
        },
        ReferenceRule {
            name: "youtube_short_link".to_string(),
            pattern: r"^https?://youtu\.be/(?P<id>[A-Za-z0-9_-]+)".to_string(),
            extract: Extraction::Capture {
                group: "id".to_string(),
            },
            key_template: WATCH_URL.to_string(),
            kind: ReferenceKind::Item,
        },
        ReferenceRule {
            name: "instagram_reel".to_string(),
            pattern: r"^https?://(?:www\.)?instagram\.com/reels?/[^/?#]+".to_string(),
            extract: Extraction::PathSegment { index: 1 },
            key_template: "https://www.instagram.com/reel/{id}/".to_string(),
            kind: ReferenceKind::Item,
        },
    ]
}

fn default_candidate_fields() -> Vec<CandidateField> {
    vec![
        CandidateField::plain("webpage_url"),
        CandidateField::plain("url"),
        CandidateField::templated("id", "https://www.youtube.com/watch?v={value}"),
    ]
}

// Durations are read and written as integer milliseconds, nothing else is accepted
mod duration_millis_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
