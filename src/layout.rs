//! Destination naming for fetched items

use std::path::{Path, PathBuf};
use url::Url;

use crate::config::BatchConfig;
use crate::error::{Error, Result};
use crate::types::ItemDescriptor;

/// Longest file name stem produced from a canonical key
const MAX_STEM_LEN: usize = 100;

/// Maps an item to its destination hint
///
/// Must be pure: the same index and item always give the same path.
pub trait OutputLayout: Send + Sync {
    /// Destination for the item at `sequence_index`
    fn output_path(&self, sequence_index: usize, item: &ItemDescriptor) -> PathBuf;
}

/// `{output_root}/{template}` with `{index}` and `{key}` substituted
///
/// Placeholders the layout does not know (such as yt-dlp's `%(title)s`) are left for the
/// fetcher to fill in.
#[derive(Clone, Debug)]
pub struct IndexedLayout {
    root: PathBuf,
    template: String,
    index_width: usize,
}

impl IndexedLayout {
    /// Create a layout rooted at `root`
    pub fn new(root: impl Into<PathBuf>, template: impl Into<String>, index_width: usize) -> Self {
        Self {
            root: root.into(),
            template: template.into(),
            index_width,
        }
    }

    /// Layout from the batch configuration
    pub fn from_config(config: &BatchConfig) -> Self {
        Self::new(
            config.output_root.clone(),
            config.file_name_template.clone(),
            config.index_width,
        )
    }

    /// Base destination directory
    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl OutputLayout for IndexedLayout {
    fn output_path(&self, sequence_index: usize, item: &ItemDescriptor) -> PathBuf {
        let index = format!("{:0width$}", sequence_index, width = self.index_width);
        let name = self
            .template
            .replace("{index}", &index)
            .replace("{key}", &sanitize_component(&key_stem(item.canonical_key())));
        self.root.join(name)
    }
}

/// Create the destination directory if it does not exist yet
pub async fn ensure_output_root(root: &Path) -> Result<()> {
    tokio::fs::create_dir_all(root).await.map_err(|e| {
        Error::Io(std::io::Error::new(
            e.kind(),
            format!(
                "Failed to create output directory '{}': {}",
                root.display(),
                e
            ),
        ))
    })
}

/// The identifying part of a canonical key
///
/// For URL keys this is the last query value, else the last path segment, else the host.
/// Other keys are used as they are.
fn key_stem(key: &str) -> String {
    let Ok(url) = Url::parse(key) else {
        return key.to_string();
    };

    if let Some((_, value)) = url.query_pairs().last() {
        if !value.is_empty() {
            return value.into_owned();
        }
    }

    url.path_segments()
        .and_then(|segments| segments.filter(|s| !s.is_empty()).last().map(str::to_string))
        .or_else(|| url.host_str().map(str::to_string))
        .unwrap_or_else(|| key.to_string())
}

/// Make a string safe to use as a single path component on every platform
pub fn sanitize_component(input: &str) -> String {
    let replaced: String = input
        .chars()
        .map(|c| if is_forbidden(c) { '_' } else { c })
        .collect();

    // Collapse runs of underscores
    let mut compacted = String::with_capacity(replaced.len());
    let mut prev_underscore = false;
    for c in replaced.chars() {
        if c == '_' {
            if !prev_underscore {
                compacted.push(c);
            }
            prev_underscore = true;
        } else {
            compacted.push(c);
            prev_underscore = false;
        }
    }

    let mut cleaned = compacted.trim_matches(&['_', ' ', '.'][..]).to_string();
    if cleaned.is_empty() {
        cleaned = "untitled".to_string();
    }
    if cleaned.chars().count() > MAX_STEM_LEN {
        cleaned = cleaned.chars().take(MAX_STEM_LEN).collect();
    }
    if is_reserved_windows_name(&cleaned) {
        cleaned.push('_');
    }
    cleaned
}

fn is_forbidden(c: char) -> bool {
    matches!(c, '\\' | '/' | ':' | '*' | '?' | '"' | '<' | '>' | '|' | '%' | '\0'..='\u{1F}')
}

fn is_reserved_windows_name(name: &str) -> bool {
    const RESERVED: &[&str] = &[
        "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
        "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
    ];
    RESERVED.iter().any(|r| r.eq_ignore_ascii_case(name))
}
