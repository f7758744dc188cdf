// Language runtime registry
// Maps a language id to the sandbox image and the command that runs a submission

use crate::types::{LanguageId, UnsupportedLanguage};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// Directory the workspace is mounted at inside every sandbox.
pub const SANDBOX_WORKDIR: &str = "/app";

/// Name of the stdin file inside the workspace.
pub const INPUT_FILE_NAME: &str = "input.txt";

/// Printed between a successful compile and the program run.
/// Its absence in the captured output means the compiler failed.
pub const COMPILE_SENTINEL: &str = "__FLOWRUN_COMPILATION_SUCCESS__";

const SOURCE_PLACEHOLDER: &str = "{source}";

/// How one language is run inside the sandbox.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SandboxRuntimeSpec {
    pub language_id: LanguageId,
    pub image: String,
    /// Source file extension, without the dot.
    pub file_extension: String,
    /// Compile step for two-phase languages. `{source}` is replaced with the mounted source path.
    #[serde(default)]
    pub compile_command: Option<String>,
    /// Run step. `{source}` is replaced with the mounted source path.
    pub run_command: String,
    pub memory_limit_mb: u32,
    pub cpu_limit: f32,
}

impl SandboxRuntimeSpec {
    pub fn source_file_name(&self) -> String {
        format!("code.{}", self.file_extension)
    }

    pub fn source_path_in_sandbox(&self) -> String {
        format!("{}/{}", SANDBOX_WORKDIR, self.source_file_name())
    }

    pub fn is_compiled(&self) -> bool {
        self.compile_command.is_some()
    }

    pub fn memory_limit_bytes(&self) -> i64 {
        i64::from(self.memory_limit_mb) * 1024 * 1024
    }

    pub fn nano_cpus(&self) -> i64 {
        (f64::from(self.cpu_limit) * 1_000_000_000.0) as i64
    }

    /// Render the shell command executed by `sh -c` inside the container.
    ///
    /// Stdin redirection is applied to the program run only, never to the compiler.
    pub fn build_command(&self, has_input: bool) -> String {
        let source = self.source_path_in_sandbox();
        let mut run = self.run_command.replace(SOURCE_PLACEHOLDER, &source);
        if has_input {
            run.push_str(&format!(" < {}/{}", SANDBOX_WORKDIR, INPUT_FILE_NAME));
        }

        match &self.compile_command {
            Some(compile) => format!(
                "{} && echo {} && {}",
                compile.replace(SOURCE_PLACEHOLDER, &source),
                COMPILE_SENTINEL,
                run
            ),
            None => run,
        }
    }
}

/// Result of looking for the compile sentinel in captured output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompileOutcome {
    /// Compiler failed; holds the trimmed diagnostics.
    Failed(String),
    /// Compiler succeeded; holds the program output with the sentinel removed.
    Succeeded(String),
}

/// Split the combined output of a compile-then-run command.
pub fn split_compile_output(raw: &str) -> CompileOutcome {
    let normalized = raw.replace("\r\n", "\n");
    match normalized.find(COMPILE_SENTINEL) {
        None => {
            let diagnostics = normalized
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .collect::<Vec<_>>()
                .join("\n");
            CompileOutcome::Failed(diagnostics)
        }
        Some(start) => {
            let mut end = start + COMPILE_SENTINEL.len();
            if normalized[end..].starts_with('\n') {
                end += 1;
            }
            let mut program_output = String::with_capacity(normalized.len());
            program_output.push_str(&normalized[..start]);
            program_output.push_str(&normalized[end..]);
            CompileOutcome::Succeeded(program_output)
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct LanguagesJson {
    languages: Vec<SandboxRuntimeSpec>,
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("no languages configured in {0}")]
    Empty(String),
}

/// Registry of sandbox runtimes, keyed by language id
#[derive(Debug, Clone)]
pub struct LanguageRegistry {
    specs: HashMap<LanguageId, SandboxRuntimeSpec>,
}

impl LanguageRegistry {
    /// The three runtimes shipped with flowrun.
    pub fn builtin() -> Self {
        Self::from_specs(vec![
            SandboxRuntimeSpec {
                language_id: LanguageId::Python,
                image: "python:3.9-slim".to_string(),
                file_extension: "py".to_string(),
                compile_command: None,
                run_command: "python -u {source}".to_string(),
                memory_limit_mb: 100,
                cpu_limit: 0.5,
            },
            SandboxRuntimeSpec {
                language_id: LanguageId::JavaScript,
                image: "node:16-slim".to_string(),
                file_extension: "js".to_string(),
                compile_command: None,
                run_command: "node {source}".to_string(),
                memory_limit_mb: 100,
                cpu_limit: 0.5,
            },
            SandboxRuntimeSpec {
                language_id: LanguageId::Cpp,
                image: "gcc:latest".to_string(),
                file_extension: "cpp".to_string(),
                compile_command: Some("g++ {source} -o /tmp/program 2>&1".to_string()),
                run_command: "/tmp/program".to_string(),
                // g++ itself needs headroom beyond the program's own budget
                memory_limit_mb: 256,
                cpu_limit: 1.0,
            },
        ])
    }

    /// Load runtimes from a languages.json file
    pub fn load(config_path: &Path) -> Result<Self, RegistryError> {
        let path = config_path.display().to_string();
        let content = fs::read_to_string(config_path).map_err(|source| RegistryError::Read {
            path: path.clone(),
            source,
        })?;
        let parsed: LanguagesJson = serde_json::from_str(&content).map_err(|source| RegistryError::Parse {
            path: path.clone(),
            source,
        })?;

        if parsed.languages.is_empty() {
            return Err(RegistryError::Empty(path));
        }

        Ok(Self::from_specs(parsed.languages))
    }

    fn from_specs(specs: Vec<SandboxRuntimeSpec>) -> Self {
        Self {
            specs: specs.into_iter().map(|spec| (spec.language_id, spec)).collect(),
        }
    }

    pub fn resolve(&self, language: LanguageId) -> Result<&SandboxRuntimeSpec, UnsupportedLanguage> {
        self.specs
            .get(&language)
            .ok_or_else(|| UnsupportedLanguage(language.to_string()))
    }

    /// Resolve a raw wire identifier.
    pub fn resolve_code(&self, code: u32) -> Result<&SandboxRuntimeSpec, UnsupportedLanguage> {
        self.resolve(LanguageId::try_from(code)?)
    }

    pub fn list(&self) -> Vec<&SandboxRuntimeSpec> {
        let mut specs: Vec<_> = self.specs.values().collect();
        specs.sort_by_key(|spec| spec.language_id.code());
        specs
    }
}

impl Default for LanguageRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}
