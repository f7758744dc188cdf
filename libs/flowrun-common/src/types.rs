use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Languages the sandbox knows how to run.
///
/// The numeric values are the identifiers callers send on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum LanguageId {
    Python,
    JavaScript,
    Cpp,
}

impl LanguageId {
    pub const ALL: [LanguageId; 3] = [LanguageId::Python, LanguageId::JavaScript, LanguageId::Cpp];

    pub fn code(self) -> u32 {
        match self {
            LanguageId::Python => 71,
            LanguageId::JavaScript => 63,
            LanguageId::Cpp => 54,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            LanguageId::Python => "python",
            LanguageId::JavaScript => "javascript",
            LanguageId::Cpp => "cpp",
        }
    }
}

impl fmt::Display for LanguageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Raised when a language identifier has no runtime.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unsupported language: {0}")]
pub struct UnsupportedLanguage(pub String);

impl TryFrom<u32> for LanguageId {
    type Error = UnsupportedLanguage;

    fn try_from(code: u32) -> Result<Self, Self::Error> {
        LanguageId::ALL
            .into_iter()
            .find(|lang| lang.code() == code)
            .ok_or_else(|| UnsupportedLanguage(code.to_string()))
    }
}

impl From<LanguageId> for u32 {
    fn from(lang: LanguageId) -> u32 {
        lang.code()
    }
}

impl FromStr for LanguageId {
    type Err = UnsupportedLanguage;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase();
        if let Ok(code) = normalized.parse::<u32>() {
            return LanguageId::try_from(code);
        }
        match normalized.as_str() {
            "python" | "python3" | "py" => Ok(LanguageId::Python),
            "javascript" | "js" | "node" | "nodejs" => Ok(LanguageId::JavaScript),
            "cpp" | "c++" | "cxx" => Ok(LanguageId::Cpp),
            _ => Err(UnsupportedLanguage(s.to_string())),
        }
    }
}

/// One execution request, as it travels through the job queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionJob {
    pub submission_id: Uuid,
    pub language_id: LanguageId,
    pub code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdin: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl SubmissionJob {
    pub fn new(language_id: LanguageId, code: String, stdin: Option<String>) -> Self {
        Self {
            submission_id: Uuid::new_v4(),
            language_id,
            code,
            stdin: stdin.filter(|input| !input.is_empty()),
            created_at: Utc::now(),
        }
    }
}

/// Classification attached to every result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    None,
    CompileError,
    RuntimeError,
    InfrastructureError,
    Timeout,
    UnsupportedLanguage,
}

impl ErrorKind {
    pub fn is_error(self) -> bool {
        self != ErrorKind::None
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::None => "none",
            ErrorKind::CompileError => "compile_error",
            ErrorKind::RuntimeError => "runtime_error",
            ErrorKind::InfrastructureError => "infrastructure_error",
            ErrorKind::Timeout => "timeout",
            ErrorKind::UnsupportedLanguage => "unsupported_language",
        }
    }
}

/// Outcome of one job. Created once by a worker and never updated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub submission_id: Uuid,
    pub output: String,
    pub exit_code: Option<i64>,
    pub error_kind: ErrorKind,
}

impl ExecutionResult {
    pub fn new(submission_id: Uuid, output: impl Into<String>, exit_code: Option<i64>, error_kind: ErrorKind) -> Self {
        Self {
            submission_id,
            output: output.into(),
            exit_code,
            error_kind,
        }
    }

    /// Result for a job that never reached program execution.
    pub fn failed(submission_id: Uuid, error_kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::new(submission_id, message, None, error_kind)
    }
}
