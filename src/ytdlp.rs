//! yt-dlp backed lister and fetcher
//!
//! Both collaborators shell out to the external `yt-dlp` binary. Argument building and
//! output parsing are plain functions so they can be tested without the binary.

use async_trait::async_trait;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tokio::process::Command;

use crate::config::{MediaFormat, ToolsConfig};
use crate::error::{Error, FetchError, Result};
use crate::fetcher::Fetcher;
use crate::layout::ensure_output_root;
use crate::resolver::EntryLister;
use crate::types::{CollectionReference, ItemDescriptor, RawEntry};

const BINARY_NAME: &str = "yt-dlp";

/// Locate yt-dlp: the configured path wins, then PATH when searching is enabled
fn locate_binary(tools: &ToolsConfig) -> Result<PathBuf> {
    if let Some(path) = &tools.yt_dlp_path {
        return Ok(path.clone());
    }
    if !tools.search_path {
        return Err(Error::config(
            "tools.yt_dlp_path",
            "yt-dlp path not configured and PATH search is disabled",
        ));
    }
    which::which(BINARY_NAME)
        .map_err(|e| Error::NotFound(format!("{BINARY_NAME} not found in PATH: {e}")))
}

/// Lists collection entries with `yt-dlp --flat-playlist -J`
#[derive(Clone, Debug)]
pub struct YtDlpLister {
    binary_path: PathBuf,
}

impl YtDlpLister {
    /// Create a lister with an explicit binary path
    pub fn new(binary_path: PathBuf) -> Self {
        Self { binary_path }
    }

    /// Attempt to find yt-dlp in PATH
    pub fn from_path() -> Option<Self> {
        which::which(BINARY_NAME).ok().map(Self::new)
    }

    /// Create a lister from the tools configuration
    pub fn from_config(tools: &ToolsConfig) -> Result<Self> {
        locate_binary(tools).map(Self::new)
    }
}

#[async_trait]
impl EntryLister for YtDlpLister {
    async fn list_entries(&self, collection: &CollectionReference) -> Result<Vec<RawEntry>> {
        tracing::debug!(
            binary = %self.binary_path.display(),
            collection = %collection,
            "Running yt-dlp listing"
        );

        let output = Command::new(&self.binary_path)
            .args(listing_args(collection.as_str()))
            .output()
            .await
            .map_err(|e| Error::ExternalTool(format!("Failed to execute yt-dlp: {}", e)))?;

        if !output.status.success() {
            return Err(Error::ExternalTool(failure_message(
                &output.stderr,
                output.status.code(),
            )));
        }

        parse_listing(&output.stdout)
    }

    fn name(&self) -> &'static str {
        "yt-dlp"
    }
}

/// Downloads single items with yt-dlp, merging or transcoding through ffmpeg
#[derive(Clone, Debug)]
pub struct YtDlpFetcher {
    binary_path: PathBuf,
    ffmpeg_location: Option<PathBuf>,
    format: MediaFormat,
    audio_quality: String,
}

impl YtDlpFetcher {
    /// Create a video fetcher with an explicit binary path
    pub fn new(binary_path: PathBuf) -> Self {
        Self {
            binary_path,
            ffmpeg_location: None,
            format: MediaFormat::Video,
            audio_quality: "192".to_string(),
        }
    }

    /// Attempt to find yt-dlp in PATH
    pub fn from_path() -> Option<Self> {
        which::which(BINARY_NAME).ok().map(Self::new)
    }

    /// Create a fetcher from the tools configuration
    pub fn from_config(tools: &ToolsConfig) -> Result<Self> {
        let binary_path = locate_binary(tools)?;
        Ok(Self {
            binary_path,
            ffmpeg_location: tools.ffmpeg_location.clone(),
            format: tools.format,
            audio_quality: tools.audio_quality.clone(),
        })
    }

    /// Output format
    pub fn with_format(mut self, format: MediaFormat) -> Self {
        self.format = format;
        self
    }

    /// ffmpeg directory or binary handed to yt-dlp
    pub fn with_ffmpeg_location(mut self, location: PathBuf) -> Self {
        self.ffmpeg_location = Some(location);
        self
    }

    fn args(&self, target: &str, destination: &Path) -> Vec<OsString> {
        fetch_args(
            self.format,
            &self.audio_quality,
            self.ffmpeg_location.as_deref(),
            target,
            destination,
        )
    }
}

#[async_trait]
impl Fetcher for YtDlpFetcher {
    async fn fetch(
        &self,
        item: &ItemDescriptor,
        destination: &Path,
    ) -> std::result::Result<PathBuf, FetchError> {
        if let Some(parent) = destination.parent().filter(|p| !p.as_os_str().is_empty()) {
            ensure_output_root(parent).await?;
        }

        let output = Command::new(&self.binary_path)
            .args(self.args(item.canonical_key(), destination))
            .output()
            .await
            .map_err(|e| FetchError::new(format!("Failed to execute yt-dlp: {}", e)))?;

        if !output.status.success() {
            return Err(FetchError::new(failure_message(
                &output.stderr,
                output.status.code(),
            )));
        }

        Ok(produced_path(&output.stdout).unwrap_or_else(|| destination.to_path_buf()))
    }

    fn name(&self) -> &'static str {
        "yt-dlp"
    }
}

fn listing_args(reference: &str) -> Vec<OsString> {
    ["--flat-playlist", "-J", "--no-warnings", "--", reference]
        .into_iter()
        .map(OsString::from)
        .collect()
}

fn fetch_args(
    format: MediaFormat,
    audio_quality: &str,
    ffmpeg_location: Option<&Path>,
    target: &str,
    destination: &Path,
) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec![
        "--no-playlist".into(),
        "--continue".into(),
        "--no-warnings".into(),
    ];

    match format {
        MediaFormat::Video => {
            args.extend(
                ["-f", "bestvideo+bestaudio/best", "--merge-output-format", "mp4"]
                    .into_iter()
                    .map(OsString::from),
            );
        }
        MediaFormat::Audio => {
            args.extend(
                ["-f", "bestaudio/best", "-x", "--audio-format", "mp3"]
                    .into_iter()
                    .map(OsString::from),
            );
            args.push("--audio-quality".into());
            args.push(format!("{audio_quality}K").into());
            args.push("--embed-thumbnail".into());
            args.push("--embed-metadata".into());
        }
    }

    if let Some(location) = ffmpeg_location {
        args.push("--ffmpeg-location".into());
        args.push(location.as_os_str().to_owned());
    }

    args.push("--print".into());
    args.push("after_move:filepath".into());
    args.push("-o".into());
    args.push(destination.as_os_str().to_owned());
    args.push("--".into());
    args.push(target.into());
    args
}

/// Entries of a `-J` dump; a dump without `entries` is a single item
fn parse_listing(stdout: &[u8]) -> Result<Vec<RawEntry>> {
    let info: serde_json::Value = serde_json::from_slice(stdout)?;
    let serde_json::Value::Object(mut info) = info else {
        return Err(Error::ExternalTool(
            "yt-dlp listing is not a JSON object".to_string(),
        ));
    };

    match info.remove("entries") {
        Some(serde_json::Value::Array(entries)) => Ok(entries
            .into_iter()
            .map(|entry| match entry {
                serde_json::Value::Object(map) => map,
                // Unavailable entries show up as null; keep the slot so it is counted
                _ => RawEntry::new(),
            })
            .collect()),
        Some(_) => Err(Error::ExternalTool(
            "yt-dlp listing has a malformed entries field".to_string(),
        )),
        None => Ok(vec![info]),
    }
}

/// Final file path printed by `--print after_move:filepath`
fn produced_path(stdout: &[u8]) -> Option<PathBuf> {
    String::from_utf8_lossy(stdout)
        .lines()
        .map(str::trim)
        .rfind(|line| !line.is_empty())
        .map(PathBuf::from)
}

/// Most useful line of stderr for a failed run
fn failure_message(stderr: &[u8], code: Option<i32>) -> String {
    let stderr = String::from_utf8_lossy(stderr);
    let lines: Vec<&str> = stderr
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();

    lines
        .iter()
        .rev()
        .find(|l| l.starts_with("ERROR"))
        .or_else(|| lines.last())
        .map(|l| l.to_string())
        .unwrap_or_else(|| match code {
            Some(code) => format!("yt-dlp exited with status {code}"),
            None => "yt-dlp terminated by signal".to_string(),
        })
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn strings(args: &[OsString]) -> Vec<String> {
        args.iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    fn position(args: &[String], flag: &str) -> usize {
        args.iter().position(|a| a == flag).unwrap()
    }

    #[test]
    fn video_args_merge_to_mp4() {
        let args = strings(&fetch_args(
            MediaFormat::Video,
            "192",
            None,
            "https://www.youtube.com/watch?v=abc",
            Path::new("/out/001 - %(title).100s.%(ext)s"),
        ));

        assert_eq!(args[position(&args, "-f") + 1], "bestvideo+bestaudio/best");
        assert_eq!(args[position(&args, "--merge-output-format") + 1], "mp4");
        assert_eq!(
            args[position(&args, "-o") + 1],
            "/out/001 - %(title).100s.%(ext)s"
        );
        assert!(args.contains(&"--no-playlist".to_string()));
        assert!(args.contains(&"--continue".to_string()));
        assert!(!args.contains(&"--ffmpeg-location".to_string()));
        assert_eq!(args.last().unwrap(), "https://www.youtube.com/watch?v=abc");
        assert_eq!(args[args.len() - 2], "--");
    }

    #[test]
    fn audio_args_extract_mp3() {
        let args = strings(&fetch_args(
            MediaFormat::Audio,
            "320",
            Some(Path::new("/opt/ffmpeg/bin")),
            "x",
            Path::new("/out/a"),
        ));

        assert_eq!(args[position(&args, "-f") + 1], "bestaudio/best");
        assert!(args.contains(&"-x".to_string()));
        assert_eq!(args[position(&args, "--audio-format") + 1], "mp3");
        assert_eq!(args[position(&args, "--audio-quality") + 1], "320K");
        assert!(args.contains(&"--embed-thumbnail".to_string()));
        assert_eq!(args[position(&args, "--ffmpeg-location") + 1], "/opt/ffmpeg/bin");
    }

    #[test]
    fn listing_args_end_with_reference() {
        let args = strings(&listing_args("-weird-id"));
        assert_eq!(args, vec!["--flat-playlist", "-J", "--no-warnings", "--", "-weird-id"]);
    }

    #[test]
    fn parse_listing_reads_entries() {
        let json = br#"{
            "id": "PL1",
            "_type": "playlist",
            "entries": [
                {"id": "a", "url": "https://www.youtube.com/watch?v=a"},
                null,
                {"id": "b", "url": "https://www.youtube.com/watch?v=b"}
            ]
        }"#;
        let entries = parse_listing(json).unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0]["id"], "a");
        assert!(entries[1].is_empty());
        assert_eq!(entries[2]["id"], "b");
    }

    #[test]
    fn parse_listing_treats_single_video_as_one_entry() {
        let json = br#"{"id": "a", "webpage_url": "https://www.youtube.com/watch?v=a"}"#;
        let entries = parse_listing(json).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0]["webpage_url"], "https://www.youtube.com/watch?v=a");
    }

    #[test]
    fn parse_listing_rejects_garbage() {
        assert!(matches!(
            parse_listing(b"not json"),
            Err(Error::Serialization(_))
        ));
        assert!(matches!(
            parse_listing(b"[1, 2]"),
            Err(Error::ExternalTool(_))
        ));
        assert!(matches!(
            parse_listing(br#"{"entries": "nope"}"#),
            Err(Error::ExternalTool(_))
        ));
    }

    #[test]
    fn produced_path_takes_last_printed_line() {
        let stdout = b"/out/001 - First.mp4\n\n";
        assert_eq!(
            produced_path(stdout),
            Some(PathBuf::from("/out/001 - First.mp4"))
        );
        assert_eq!(produced_path(b"  \n"), None);
    }

    #[test]
    fn failure_message_prefers_error_lines() {
        let stderr = b"WARNING: something odd\nERROR: [youtube] abc: Private video\nmore noise\n";
        assert_eq!(
            failure_message(stderr, Some(1)),
            "ERROR: [youtube] abc: Private video"
        );
        assert_eq!(failure_message(b"just noise\n", Some(1)), "just noise");
        assert_eq!(failure_message(b"", Some(2)), "yt-dlp exited with status 2");
        assert_eq!(failure_message(b"", None), "yt-dlp terminated by signal");
    }

    #[test]
    fn explicit_binary_path_is_used() {
        let tools = ToolsConfig {
            yt_dlp_path: Some(PathBuf::from("/usr/local/bin/yt-dlp")),
            format: MediaFormat::Audio,
            ..ToolsConfig::default()
        };
        let fetcher = YtDlpFetcher::from_config(&tools).unwrap();
        assert_eq!(fetcher.binary_path, PathBuf::from("/usr/local/bin/yt-dlp"));
        assert_eq!(fetcher.format, MediaFormat::Audio);

        let lister = YtDlpLister::from_config(&tools).unwrap();
        assert_eq!(lister.binary_path, PathBuf::from("/usr/local/bin/yt-dlp"));
    }

    #[test]
    fn disabled_search_without_path_is_config_error() {
        let tools = ToolsConfig {
            search_path: false,
            ..ToolsConfig::default()
        };
        assert!(matches!(
            YtDlpLister::from_config(&tools),
            Err(Error::Config { .. })
        ));
    }

    #[tokio::test]
    async fn missing_binary_fails_the_attempt() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = YtDlpFetcher::new(dir.path().join("no-such-yt-dlp"));
        let item = ItemDescriptor::new("x", "x", 1).unwrap();

        let err = fetcher
            .fetch(&item, &dir.path().join("out").join("001 - x"))
            .await
            .unwrap_err();
        assert!(err.message.contains("Failed to execute yt-dlp"));
        // Destination directory is prepared before the tool runs
        assert!(dir.path().join("out").is_dir());
    }
}
