//! Supported-file filter.
//!
//! Decides from a filename alone whether a file is worth backing up. The decision is based on the
//! text after the last `.`, compared case-insensitively against an allow-list.

use serde::Deserialize;
use std::collections::HashSet;

/// Office documents and plain text.
pub const DOCUMENT_EXTENSIONS: &[&str] = &[
    "pdf", "doc", "docx", "txt", "rtf", "odt", "xls", "xlsx", "csv", "ods", "ppt", "pptx", "odp",
];

/// Still images, including camera raw.
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "bmp", "webp", "heic", "raw", "svg"];

/// Video and audio, only used by the `media` profile.
pub const AV_EXTENSIONS: &[&str] = &["mp4", "mov", "m4v", "avi", "mkv", "3gp", "mp3", "m4a", "wav", "flac"];

/// Which built-in extension set a deployment uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExtensionProfile {
    /// Documents plus images (the default)
    #[default]
    DocumentsAndImages,
    /// Images plus video and audio, for camera cards
    Media,
}

impl ExtensionProfile {
    pub fn extensions(self) -> Vec<&'static str> {
        match self {
            Self::DocumentsAndImages => DOCUMENT_EXTENSIONS.iter().chain(IMAGE_EXTENSIONS).copied().collect(),
            Self::Media => IMAGE_EXTENSIONS.iter().chain(AV_EXTENSIONS).copied().collect(),
        }
    }

    /// Parses a profile name as written in settings or env vars.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "documents_and_images" | "documents" | "default" => Some(Self::DocumentsAndImages),
            "media" => Some(Self::Media),
            _ => None,
        }
    }
}

/// Immutable allow-list of lowercase extensions. Cheap to share across sessions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupportedFileFilter {
    extensions: HashSet<String>,
}

impl SupportedFileFilter {
    pub fn from_profile(profile: ExtensionProfile) -> Self {
        Self::with_extensions(profile.extensions())
    }

    /// Builds a filter from a custom list. Entries are lowercased, a leading `.` is dropped, and empty
    /// entries are ignored so that a name ending in `.` can never match.
    pub fn with_extensions<I, S>(extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let extensions = extensions
            .into_iter()
            .map(|ext| ext.as_ref().trim().trim_start_matches('.').to_lowercase())
            .filter(|ext| !ext.is_empty())
            .collect();
        Self { extensions }
    }

    pub fn is_supported(&self, filename: &str) -> bool {
        let ext = extension_of(filename);
        !ext.is_empty() && self.extensions.contains(&ext)
    }

    pub fn len(&self) -> usize {
        self.extensions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.extensions.is_empty()
    }
}

impl Default for SupportedFileFilter {
    fn default() -> Self {
        Self::from_profile(ExtensionProfile::default())
    }
}

/// Lowercased text after the last `.`, or an empty string when there is no `.`.
pub fn extension_of(filename: &str) -> String {
    filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_lowercase())
        .unwrap_or_default()
}
