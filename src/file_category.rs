//! File categorization for routing files into category folders.
//!
//! A [`CategoryClassifier`] maps [`FileMetadata`] to a [`CategoryLabel`]. It is
//! either a deterministic extension table ([`RuleClassifier`]) or a trained
//! statistical model ([`ForestModel`]); the variant is chosen once at
//! construction and callers only ever use [`CategoryClassifier::predict`].
//!
//! # Examples
//!
//! ```
//! use tidyfold::file_category::{CategoryClassifier, FileMetadata, RuleClassifier};
//!
//! let classifier = CategoryClassifier::Rules(RuleClassifier::default());
//! let meta = FileMetadata::new("report.pdf", 2048, "application/pdf");
//! assert_eq!(classifier.predict(&meta).as_str(), "Documents");
//!
//! let unknown = FileMetadata::new("blob.xyz", 10, "application/x-unknown");
//! assert_eq!(classifier.predict(&unknown).as_str(), "Others");
//! ```
use crate::forest::ForestModel;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Media type used when content sniffing finds nothing.
pub const DEFAULT_MEDIA_TYPE: &str = "application/octet-stream";

/// Metadata a classifier sees for one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetadata {
    pub name: String,
    #[serde(rename = "size")]
    pub size_bytes: u64,
    #[serde(rename = "type")]
    pub media_type: String,
}

impl FileMetadata {
    pub fn new(name: impl Into<String>, size_bytes: u64, media_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            size_bytes,
            media_type: media_type.into(),
        }
    }

    /// Reads metadata for the file at `path`.
    ///
    /// The media type is sniffed from the file's leading bytes with `infer`.
    pub fn from_path(path: &Path) -> io::Result<Self> {
        let meta = std::fs::metadata(path)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no file name"))?;
        let media_type = infer::get_from_path(path)?
            .map(|kind| kind.mime_type().to_string())
            .unwrap_or_else(|| DEFAULT_MEDIA_TYPE.to_string());

        Ok(Self {
            name,
            size_bytes: meta.len(),
            media_type,
        })
    }

    /// Returns the lower-cased extension of the file name, if any.
    pub fn extension(&self) -> Option<String> {
        Path::new(&self.name)
            .extension()
            .map(|ext| ext.to_string_lossy().to_lowercase())
            .filter(|ext| !ext.is_empty())
    }

    /// Returns the media type family, e.g. `image` for `image/png`.
    pub fn media_family(&self) -> String {
        self.media_type
            .split('/')
            .next()
            .unwrap_or_default()
            .trim()
            .to_lowercase()
    }
}

/// Name of the folder a file is routed into. The set of labels is open.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CategoryLabel(String);

impl CategoryLabel {
    /// The mandatory fallback label.
    pub const FALLBACK: &'static str = "Others";

    pub fn new(label: impl Into<String>) -> Self {
        Self(label.into())
    }

    pub fn fallback() -> Self {
        Self(Self::FALLBACK.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_fallback(&self) -> bool {
        self.0 == Self::FALLBACK
    }
}

impl fmt::Display for CategoryLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<Category> for CategoryLabel {
    fn from(category: Category) -> Self {
        Self(category.dir_name().to_string())
    }
}

/// Built-in categories of the rule table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Image,
    Audio,
    Video,
    Document,
    Archive,
    Code,
    Spreadsheet,
    Presentation,
    Font,
    Other,
}

impl Category {
    /// Returns the folder name for this category.
    ///
    /// ```
    /// use tidyfold::file_category::Category;
    ///
    /// assert_eq!(Category::Image.dir_name(), "Images");
    /// assert_eq!(Category::Other.dir_name(), "Others");
    /// ```
    pub fn dir_name(&self) -> &'static str {
        match self {
            Category::Image => "Images",
            Category::Audio => "Audio",
            Category::Video => "Videos",
            Category::Document => "Documents",
            Category::Archive => "Archives",
            Category::Code => "Code",
            Category::Spreadsheet => "Spreadsheets",
            Category::Presentation => "Presentations",
            Category::Font => "Fonts",
            Category::Other => CategoryLabel::FALLBACK,
        }
    }
}

/// Deterministic extension table with a media-type table as second chance.
#[derive(Debug, Clone)]
pub struct RuleClassifier {
    mime_map: HashMap<String, CategoryLabel>,
    extension_map: HashMap<String, CategoryLabel>,
}

impl RuleClassifier {
    /// Creates a classifier with all standard mappings.
    pub fn new() -> Self {
        let mut classifier = Self {
            mime_map: HashMap::new(),
            extension_map: HashMap::new(),
        };
        classifier.populate_standard_mappings();
        classifier
    }

    /// Creates the standard classifier and then applies `overrides`, a map
    /// from label to extensions (as read from the `[categories]` table).
    pub fn with_overrides(overrides: &HashMap<String, Vec<String>>) -> Self {
        let mut classifier = Self::new();
        for (label, extensions) in overrides {
            for ext in extensions {
                classifier.add_extension_mapping(ext, CategoryLabel::new(label.clone()));
            }
        }
        classifier
    }

    fn populate_standard_mappings(&mut self) {
        let mimes: &[(&str, Category)] = &[
            ("image/png", Category::Image),
            ("image/jpeg", Category::Image),
            ("image/gif", Category::Image),
            ("image/webp", Category::Image),
            ("image/svg+xml", Category::Image),
            ("image/bmp", Category::Image),
            ("image/tiff", Category::Image),
            ("image/heif", Category::Image),
            ("audio/mpeg", Category::Audio),
            ("audio/x-wav", Category::Audio),
            ("audio/ogg", Category::Audio),
            ("audio/x-flac", Category::Audio),
            ("audio/aac", Category::Audio),
            ("audio/m4a", Category::Audio),
            ("video/mp4", Category::Video),
            ("video/mpeg", Category::Video),
            ("video/quicktime", Category::Video),
            ("video/x-msvideo", Category::Video),
            ("video/x-matroska", Category::Video),
            ("video/webm", Category::Video),
            ("video/x-flv", Category::Video),
            ("application/pdf", Category::Document),
            ("text/plain", Category::Document),
            ("text/html", Category::Document),
            ("application/msword", Category::Document),
            (
                "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
                Category::Document,
            ),
            ("application/rtf", Category::Document),
            ("application/vnd.oasis.opendocument.text", Category::Document),
            ("application/epub+zip", Category::Document),
            ("application/zip", Category::Archive),
            ("application/vnd.rar", Category::Archive),
            ("application/x-7z-compressed", Category::Archive),
            ("application/x-tar", Category::Archive),
            ("application/gzip", Category::Archive),
            ("application/x-bzip2", Category::Archive),
            ("application/x-xz", Category::Archive),
            ("text/x-shellscript", Category::Code),
            ("application/wasm", Category::Code),
            ("application/x-executable", Category::Code),
            ("text/csv", Category::Spreadsheet),
            ("application/vnd.ms-excel", Category::Spreadsheet),
            (
                "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
                Category::Spreadsheet,
            ),
            ("application/vnd.oasis.opendocument.spreadsheet", Category::Spreadsheet),
            ("application/vnd.ms-powerpoint", Category::Presentation),
            (
                "application/vnd.openxmlformats-officedocument.presentationml.presentation",
                Category::Presentation,
            ),
            ("application/vnd.oasis.opendocument.presentation", Category::Presentation),
            ("application/font-woff", Category::Font),
            ("application/font-sfnt", Category::Font),
            ("font/ttf", Category::Font),
            ("font/otf", Category::Font),
            ("font/woff", Category::Font),
            ("font/woff2", Category::Font),
        ];
        for (mime, category) in mimes {
            self.add_mime_mapping(mime, (*category).into());
        }

        let extensions: &[(Category, &[&str])] = &[
            (
                Category::Image,
                &["png", "jpg", "jpeg", "gif", "webp", "svg", "bmp", "tiff", "ico", "heic"],
            ),
            (Category::Audio, &["mp3", "wav", "ogg", "flac", "aac", "m4a", "wma"]),
            (
                Category::Video,
                &["mp4", "mkv", "avi", "mov", "flv", "wmv", "webm", "3gp"],
            ),
            (
                Category::Document,
                &["pdf", "txt", "doc", "docx", "html", "htm", "md", "rtf", "odt", "epub"],
            ),
            (Category::Archive, &["zip", "rar", "7z", "tar", "gz", "bz2", "xz"]),
            (
                Category::Code,
                &[
                    "py", "java", "c", "cpp", "h", "hpp", "js", "ts", "rs", "go", "sh", "bash",
                    "json", "xml", "yaml", "yml", "toml",
                ],
            ),
            (Category::Spreadsheet, &["csv", "xls", "xlsx", "ods"]),
            (Category::Presentation, &["ppt", "pptx", "odp"]),
            (Category::Font, &["ttf", "otf", "woff", "woff2"]),
        ];
        for (category, exts) in extensions {
            for ext in *exts {
                self.add_extension_mapping(ext, (*category).into());
            }
        }
    }

    /// Adds a media type to label mapping.
    pub fn add_mime_mapping(&mut self, mime: &str, label: CategoryLabel) {
        self.mime_map.insert(mime.to_lowercase(), label);
    }

    /// Adds (or replaces) an extension to label mapping. A leading dot is ignored.
    pub fn add_extension_mapping(&mut self, ext: &str, label: CategoryLabel) {
        let ext = ext.trim_start_matches('.').to_lowercase();
        self.extension_map.insert(ext, label);
    }

    pub fn extension_to_label(&self, ext: &str) -> Option<&CategoryLabel> {
        self.extension_map.get(&ext.to_lowercase())
    }

    pub fn mime_to_label(&self, mime: &str) -> Option<&CategoryLabel> {
        self.mime_map.get(&mime.to_lowercase())
    }

    /// Extension first, then media type, then the fallback label.
    pub fn predict(&self, metadata: &FileMetadata) -> CategoryLabel {
        if let Some(ext) = metadata.extension()
            && let Some(label) = self.extension_to_label(&ext)
        {
            return label.clone();
        }

        if let Some(label) = self.mime_to_label(&metadata.media_type) {
            return label.clone();
        }

        CategoryLabel::fallback()
    }
}

impl Default for RuleClassifier {
    fn default() -> Self {
        Self::new()
    }
}

/// Errors raised while building a classifier.
#[derive(Debug, Error)]
pub enum ClassifierError {
    #[error("model artifact not found: {0}")]
    ModelNotFound(PathBuf),
    #[error("failed to read model artifact {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid model artifact {path}: {reason}")]
    InvalidModel { path: PathBuf, reason: String },
    #[error("cannot train on an empty sample set")]
    NoSamples,
    #[error("invalid training data at line {line}: {reason}")]
    InvalidSample { line: usize, reason: String },
    #[error("invalid training parameter: {0}")]
    InvalidParameter(String),
}

pub type ClassifierResult<T> = Result<T, ClassifierError>;

/// The classifier handed to the Reorganizer and Watcher.
#[derive(Debug, Clone)]
pub enum CategoryClassifier {
    Rules(RuleClassifier),
    Model(ForestModel),
}

impl CategoryClassifier {
    /// Loads a trained model artifact from `path`.
    pub fn load_model(path: &Path) -> ClassifierResult<Self> {
        ForestModel::load(path).map(CategoryClassifier::Model)
    }

    /// Predicts the category label. Never fails; unmatched input yields "Others".
    pub fn predict(&self, metadata: &FileMetadata) -> CategoryLabel {
        match self {
            CategoryClassifier::Rules(rules) => rules.predict(metadata),
            CategoryClassifier::Model(model) => model.predict(metadata),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            CategoryClassifier::Rules(_) => "rules",
            CategoryClassifier::Model(_) => "model",
        }
    }
}

impl Default for CategoryClassifier {
    fn default() -> Self {
        CategoryClassifier::Rules(RuleClassifier::default())
    }
}
