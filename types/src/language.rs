//! Document language classification by file extension.

use std::fmt;
use std::path::Path;

/// Languages the analysis server accepts in `textDocument/didOpen`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Language {
    Swift,
    ObjectiveC,
    ObjectiveCpp,
    C,
    Cpp,
}

impl Language {
    /// LSP `languageId` for this language.
    #[must_use]
    pub const fn language_id(self) -> &'static str {
        match self {
            Self::Swift => "swift",
            Self::ObjectiveC => "objective-c",
            Self::ObjectiveCpp => "objective-cpp",
            Self::C => "c",
            Self::Cpp => "cpp",
        }
    }

    /// Map a bare extension (no leading dot) to a language.
    ///
    /// Headers are classified as the Objective-C family. Anything unknown,
    /// including an empty extension, falls back to Swift.
    #[must_use]
    pub fn from_extension(ext: &str) -> Self {
        match ext {
            "swift" => Self::Swift,
            "m" | "h" => Self::ObjectiveC,
            "mm" | "hpp" => Self::ObjectiveCpp,
            "c" => Self::C,
            "cpp" | "cc" | "cxx" | "c++" => Self::Cpp,
            _ => Self::Swift,
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.language_id())
    }
}

/// Classify a document by its file extension.
#[must_use]
pub fn classify_language(path: &Path) -> Language {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map_or(Language::Swift, Language::from_extension)
}
