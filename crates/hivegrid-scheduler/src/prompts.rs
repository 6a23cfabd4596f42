//! Prompt rendering for code-oriented jobs.
//!
//! The executor only depends on the [`PromptRenderer`] trait. The
//! built-in [`PromptLibrary`] carries per-language templates for
//! refactor, lint and codegen jobs, generates a generic template for any
//! other language, and appends an `ADDITIONAL REQUIREMENTS:` block for
//! the enabled [`PromptToggle`]s.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::debug;

use hivegrid_core::JobKind;

/// Turns a job kind, language and input text into an instruction prompt.
pub trait PromptRenderer: Send + Sync {
    /// `input` is source code for refactor/lint and a description for
    /// codegen.
    fn render(&self, kind: JobKind, language: &str, input: &str) -> String;
}

/// Named switches that append extra instructions to refactor prompts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptToggle {
    ReplaceAny,
    RemoveUnusedImports,
    EnforceTyping,
    AddTodos,
    PreserveComments,
    AddDocstrings,
    OptimizePerformance,
}

impl PromptToggle {
    pub const ALL: [PromptToggle; 7] = [
        PromptToggle::ReplaceAny,
        PromptToggle::RemoveUnusedImports,
        PromptToggle::EnforceTyping,
        PromptToggle::AddTodos,
        PromptToggle::PreserveComments,
        PromptToggle::AddDocstrings,
        PromptToggle::OptimizePerformance,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PromptToggle::ReplaceAny => "replace_any",
            PromptToggle::RemoveUnusedImports => "remove_unused_imports",
            PromptToggle::EnforceTyping => "enforce_typing",
            PromptToggle::AddTodos => "add_todos",
            PromptToggle::PreserveComments => "preserve_comments",
            PromptToggle::AddDocstrings => "add_docstrings",
            PromptToggle::OptimizePerformance => "optimize_performance",
        }
    }

    /// Instruction line appended when the toggle is on.
    pub fn instruction(&self) -> &'static str {
        match self {
            PromptToggle::ReplaceAny => "Replace 'any' types with proper types",
            PromptToggle::RemoveUnusedImports => "Remove unused imports and variables",
            PromptToggle::EnforceTyping => "Add type annotations where missing",
            PromptToggle::AddTodos => "Add TODO comments for potential improvements",
            PromptToggle::PreserveComments => "Keep existing comments",
            PromptToggle::AddDocstrings => "Add docstrings/documentation",
            PromptToggle::OptimizePerformance => "Optimize for better performance",
        }
    }

    fn enabled_by_default(&self) -> bool {
        matches!(
            self,
            PromptToggle::RemoveUnusedImports | PromptToggle::EnforceTyping | PromptToggle::PreserveComments
        )
    }
}

impl fmt::Display for PromptToggle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PromptToggle {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PromptToggle::ALL
            .into_iter()
            .find(|t| t.as_str() == s.trim())
            .ok_or_else(|| format!("unknown prompt toggle: {s}"))
    }
}

/// Template-based [`PromptRenderer`].
///
/// Templates use `{code}`, `{description}` and `{toggles_text}`
/// placeholders.
#[derive(Debug, Clone)]
pub struct PromptLibrary {
    templates: HashMap<(String, JobKind), String>,
    toggles: BTreeMap<PromptToggle, bool>,
}

impl Default for PromptLibrary {
    fn default() -> Self {
        Self::new()
    }
}

impl PromptLibrary {
    /// Library with the built-in templates and default toggles.
    pub fn new() -> Self {
        let mut library = Self {
            templates: HashMap::new(),
            toggles: PromptToggle::ALL
                .into_iter()
                .map(|t| (t, t.enabled_by_default()))
                .collect(),
        };
        for (language, kind, template) in BUILTIN_TEMPLATES {
            library.add_template(language, *kind, template);
        }
        library
    }

    /// Builder method: set a toggle.
    pub fn with_toggle(mut self, toggle: PromptToggle, enabled: bool) -> Self {
        self.set_toggle(toggle, enabled);
        self
    }

    pub fn set_toggle(&mut self, toggle: PromptToggle, enabled: bool) {
        self.toggles.insert(toggle, enabled);
    }

    pub fn toggle(&self, toggle: PromptToggle) -> bool {
        self.toggles.get(&toggle).copied().unwrap_or(false)
    }

    pub fn toggles(&self) -> &BTreeMap<PromptToggle, bool> {
        &self.toggles
    }

    /// Register or replace the template for a language/kind pair.
    pub fn add_template(&mut self, language: &str, kind: JobKind, template: &str) {
        self.templates
            .insert((language.to_ascii_lowercase(), kind), template.to_string());
    }

    /// Languages with at least one explicit template, sorted.
    pub fn languages(&self) -> Vec<String> {
        let mut langs: Vec<String> = self.templates.keys().map(|(l, _)| l.clone()).collect();
        langs.sort();
        langs.dedup();
        langs
    }

    /// The `ADDITIONAL REQUIREMENTS:` block, empty when no toggle is on.
    pub fn toggles_text(&self) -> String {
        let enabled: Vec<&PromptToggle> = self
            .toggles
            .iter()
            .filter(|(_, on)| **on)
            .map(|(t, _)| t)
            .collect();
        if enabled.is_empty() {
            return String::new();
        }

        let mut text = String::from("ADDITIONAL REQUIREMENTS:\n");
        for toggle in enabled {
            text.push_str("- ");
            text.push_str(toggle.instruction());
            text.push('\n');
        }
        text
    }

    fn template_for(&self, kind: JobKind, language: &str) -> String {
        match self.templates.get(&(language.to_string(), kind)) {
            Some(t) => t.clone(),
            None => {
                debug!(%kind, %language, "generating prompt template");
                generic_template(kind, language)
            }
        }
    }
}

impl PromptRenderer for PromptLibrary {
    fn render(&self, kind: JobKind, language: &str, input: &str) -> String {
        let language = language.to_ascii_lowercase();
        let template = self.template_for(kind, &language);
        let toggles = if kind == JobKind::Refactor {
            self.toggles_text()
        } else {
            String::new()
        };

        // Toggles first so text inside `input` is never re-expanded.
        let template = template.replace("{toggles_text}", &toggles);
        match kind {
            JobKind::Codegen => template.replace("{description}", input),
            _ => template.replace("{code}", input),
        }
    }
}

/// Language name used when neither the extension nor the content gives
/// a hint. Its templates name no language.
pub const GENERAL_LANGUAGE: &str = "general";

/// Guess a language name from a source file's extension, then from
/// keywords in its content. Falls back to [`GENERAL_LANGUAGE`].
pub fn detect_language(path: &Path, content: &str) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match ext.as_str() {
        "py" => "python",
        "js" | "jsx" => "javascript",
        "ts" | "tsx" => "typescript",
        "php" => "php",
        "java" => "java",
        "cpp" => "cpp",
        "c" => "c",
        "cs" => "csharp",
        "rb" => "ruby",
        "go" => "go",
        "rs" => "rust",
        "swift" => "swift",
        "kt" => "kotlin",
        "scala" => "scala",
        "sh" => "bash",
        "ps1" => "powershell",
        _ => sniff_language(content).unwrap_or(GENERAL_LANGUAGE),
    }
}

/// Keyword heuristics for files without a known extension.
fn sniff_language(code: &str) -> Option<&'static str> {
    let has_any = |words: &[&str]| words.iter().any(|w| code.contains(w));

    if code.contains("<?php") {
        return Some("php");
    }
    if has_any(&["def ", "import ", "from ", "class ", "if __name__"]) {
        return Some("python");
    }
    if has_any(&["function", "const ", "let ", "var ", "=>"]) {
        if has_any(&["interface ", ": string", ": number"]) {
            return Some("typescript");
        }
        return Some("javascript");
    }
    if has_any(&["public class", "public static void main"]) {
        return Some("java");
    }
    None
}

fn generic_template(kind: JobKind, language: &str) -> String {
    let named = (language != GENERAL_LANGUAGE).then_some(language);
    let title = named.unwrap_or("software");
    let practices = named.unwrap_or("established");
    let fence = named.unwrap_or("");
    let target = named.map_or_else(|| "code".to_string(), |l| format!("{l} code"));

    match kind {
        JobKind::Refactor => format!(
            "You are an expert {title} developer. Refactor the following code while maintaining its functionality:\n\n\
             REQUIREMENTS:\n\
             - Fix any syntax or logic errors\n\
             - Improve code structure and readability\n\
             - Follow {practices} best practices and conventions\n\
             - Remove unused code\n\
             - Maintain existing functionality\n\n\
             {{toggles_text}}\n\
             CODE TO REFACTOR:\n```{fence}\n{{code}}\n```\n\n\
             Return ONLY the refactored code without explanations or markdown formatting."
        ),
        JobKind::Lint => format!(
            "Fix linting and syntax issues in this {target}:\n\n{{code}}\n\n\
             Fix these specific issues:\n\
             - Syntax errors\n\
             - Style violations\n\
             - Undefined variables\n\
             - Logic errors\n\
             - Best practice violations\n\n\
             Return only the fixed code."
        ),
        JobKind::Codegen => format!(
            "Generate {target} for the following requirement:\n\n\
             REQUIREMENT: {{description}}\n\n\
             GUIDELINES:\n\
             - Follow {practices} best practices\n\
             - Include proper error handling\n\
             - Add appropriate comments\n\
             - Make it robust and maintainable\n\n\
             Return only the code without explanations."
        ),
        JobKind::Chat | JobKind::DocQuery => "{code}".to_string(),
    }
}

const BUILTIN_TEMPLATES: &[(&str, JobKind, &str)] = &[
    (
        "python",
        JobKind::Refactor,
        "You are an expert Python developer. Refactor the following code while maintaining its functionality:

REQUIREMENTS:
- Fix any syntax/logic errors
- Improve code structure and readability
- Add type hints where appropriate
- Remove unused imports
- Follow PEP 8 guidelines
- Maintain existing functionality

{toggles_text}
CODE TO REFACTOR:
```python
{code}
```

Return ONLY the refactored code without explanations or markdown formatting.",
    ),
    (
        "python",
        JobKind::Lint,
        "Fix linting issues in this Python code:

{code}

Fix these specific issues:
- Syntax errors
- Import errors
- Undefined variables
- Type hint issues
- PEP 8 violations
- Logic errors

Return only the fixed code.",
    ),
    (
        "python",
        JobKind::Codegen,
        "Generate Python code for the following requirement:

REQUIREMENT: {description}

GUIDELINES:
- Use type hints
- Include proper error handling
- Follow PEP 8 standards
- Add docstrings
- Make it production-ready

Return only the code without explanations.",
    ),
    (
        "typescript",
        JobKind::Refactor,
        "You are an expert TypeScript developer. Refactor the following code while maintaining its functionality:

REQUIREMENTS:
- Fix any TypeScript errors
- Improve type safety
- Remove unused imports
- Follow best practices
- Maintain backward compatibility
- Preserve existing functionality

{toggles_text}
CODE TO REFACTOR:
```typescript
{code}
```

Return ONLY the refactored code without explanations or markdown formatting.",
    ),
    (
        "typescript",
        JobKind::Lint,
        "Fix linting issues in this TypeScript code:

{code}

Fix these specific issues:
- ESLint errors
- TypeScript compiler errors
- Unused variables/imports
- Type annotations
- Code style issues

Return only the fixed code.",
    ),
    (
        "typescript",
        JobKind::Codegen,
        "Generate TypeScript code for the following requirement:

REQUIREMENT: {description}

GUIDELINES:
- Use proper TypeScript types
- Include error handling
- Follow modern ES6+ patterns
- Add appropriate comments
- Make it production-ready

Return only the code without explanations.",
    ),
    (
        "php",
        JobKind::Refactor,
        "You are an expert PHP developer. Refactor the following code while maintaining its functionality:

REQUIREMENTS:
- Fix any syntax/logic errors
- Improve code structure
- Follow PSR standards
- Remove unused code
- Maintain existing functionality

{toggles_text}
CODE TO REFACTOR:
```php
{code}
```

Return ONLY the refactored code without explanations or markdown formatting.",
    ),
];
