//! Hook-event distiller
//!
//! Lifecycle hooks forward raw tool traffic; most of it is not worth
//! remembering. The distiller classifies each event by tool and outcome
//! and produces an observation draft for the ones that are: file mutations
//! become `change`, failing commands become `error`, todo updates become
//! `todo`, subagent completions become `note`. Pure classification; the
//! privacy filter and embedder run later in the ingest pipeline.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;

use crate::identity;
use crate::model::{ObservationDraft, ObservationSource, ObservationType};

/// Longest narrative the distiller will emit
const MAX_NARRATIVE: usize = 1200;

/// One hook ingest payload (field names fixed by the hook protocol)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HookEvent {
    #[serde(rename = "claudeSessionId", default)]
    pub claude_session_id: Option<String>,
    #[serde(default)]
    pub project: Option<String>,
    #[serde(default)]
    pub tool_name: Option<String>,
    #[serde(default)]
    pub tool_input: Option<Value>,
    #[serde(default)]
    pub tool_response: Option<Value>,
    #[serde(default)]
    pub cwd: Option<String>,
}

impl HookEvent {
    /// Resolve the project id: explicit, or derived from the working
    /// directory.
    pub fn resolve_project(&self) -> Option<String> {
        if let Some(project) = &self.project {
            if !project.trim().is_empty() {
                return Some(project.clone());
            }
        }
        self.cwd
            .as_deref()
            .filter(|cwd| !cwd.trim().is_empty())
            .map(|cwd| identity::project_id(Path::new(cwd)))
    }
}

/// Distill a hook event into an observation draft, or `None` when the
/// event carries nothing worth remembering.
pub fn distill(event: &HookEvent, workstation: &str) -> Option<ObservationDraft> {
    let project = event.resolve_project()?;
    let tool = event.tool_name.as_deref().unwrap_or("");

    let mut draft = match tool {
        "Edit" | "MultiEdit" | "Write" | "NotebookEdit" => distill_file_mutation(event, tool)?,
        "Bash" => distill_command(event)?,
        "TodoWrite" => distill_todos(event)?,
        "Task" => distill_subagent(event)?,
        // Pure retrieval traffic is noise, not memory
        "Read" | "Grep" | "Glob" | "WebFetch" | "WebSearch" | "LS" => return None,
        _ => distill_generic(event, tool)?,
    };

    draft.project = project;
    draft.session_id = event.claude_session_id.clone();
    draft.workstation = workstation.to_string();
    draft.source = ObservationSource::Hook;
    if !tool.is_empty() {
        draft.tags.push(tool.to_lowercase());
    }
    Some(draft)
}

fn distill_file_mutation(event: &HookEvent, tool: &str) -> Option<ObservationDraft> {
    let file = input_str(event, "file_path")?;
    let short = short_path(&file);

    let verb = if tool == "Write" { "Wrote" } else { "Edited" };
    let mut draft = ObservationDraft::new("", ObservationType::Change, format!("{verb} {short}"));
    draft.files.push(file.clone());
    draft.facts.push(format!("file: {file}"));

    if let Some(old) = input_str(event, "old_string") {
        if let Some(new) = input_str(event, "new_string") {
            draft.narrative = clip(&format!(
                "Replaced:\n{}\nWith:\n{}",
                clip(&old, 400),
                clip(&new, 400)
            ), MAX_NARRATIVE);
        }
    } else if let Some(content) = input_str(event, "content") {
        draft.narrative = clip(&content, MAX_NARRATIVE);
    }
    Some(draft)
}

fn distill_command(event: &HookEvent) -> Option<ObservationDraft> {
    let command = input_str(event, "command")?;
    let failed = command_failed(event.tool_response.as_ref());

    let first_line = command.lines().next().unwrap_or(&command);
    let draft = if failed {
        let mut draft = ObservationDraft::new(
            "",
            ObservationType::Error,
            format!("Command failed: {}", clip(first_line, 80)),
        );
        draft.facts.push(format!("command: {}", clip(&command, 200)));
        if let Some(stderr) = response_str(event, "stderr").filter(|s| !s.trim().is_empty()) {
            draft.narrative = clip(&stderr, MAX_NARRATIVE);
        }
        draft
    } else if is_mutating_command(first_line) {
        let mut draft = ObservationDraft::new(
            "",
            ObservationType::Change,
            format!("Ran {}", clip(first_line, 80)),
        );
        draft.facts.push(format!("command: {}", clip(&command, 200)));
        draft
    } else {
        // Successful read-only commands are noise
        return None;
    };
    Some(draft)
}

fn distill_todos(event: &HookEvent) -> Option<ObservationDraft> {
    let todos = event.tool_input.as_ref()?.get("todos")?.as_array()?;
    let open: Vec<String> = todos
        .iter()
        .filter(|t| t.get("status").and_then(|s| s.as_str()) != Some("completed"))
        .filter_map(|t| t.get("content").and_then(|c| c.as_str()))
        .map(|s| s.to_string())
        .collect();
    if open.is_empty() {
        return None;
    }

    let mut draft = ObservationDraft::new(
        "",
        ObservationType::Todo,
        format!("Open work items ({})", open.len()),
    );
    draft.facts = open.into_iter().map(|t| clip(&t, 200)).collect();
    Some(draft)
}

fn distill_subagent(event: &HookEvent) -> Option<ObservationDraft> {
    let description = input_str(event, "description")
        .or_else(|| input_str(event, "prompt"))?;
    let mut draft = ObservationDraft::new(
        "",
        ObservationType::Note,
        format!("Subagent: {}", clip(&description, 80)),
    );
    if let Some(result) = event
        .tool_response
        .as_ref()
        .and_then(|r| r.as_str().map(str::to_string).or_else(|| response_str(event, "result")))
    {
        draft.narrative = clip(&result, MAX_NARRATIVE);
    }
    Some(draft)
}

fn distill_generic(event: &HookEvent, tool: &str) -> Option<ObservationDraft> {
    if tool.is_empty() {
        return None;
    }
    let mut draft = ObservationDraft::new("", ObservationType::Note, format!("Used {tool}"));
    if let Some(input) = &event.tool_input {
        draft.narrative = clip(&compact_json(input), MAX_NARRATIVE);
    }
    Some(draft)
}

// ============================================================================
// CLASSIFICATION HELPERS
// ============================================================================

fn command_failed(response: Option<&Value>) -> bool {
    let Some(response) = response else {
        return false;
    };
    if response.get("is_error").and_then(|v| v.as_bool()) == Some(true) {
        return true;
    }
    if let Some(code) = response
        .get("exit_code")
        .or_else(|| response.get("exitCode"))
        .and_then(|v| v.as_i64())
    {
        return code != 0;
    }
    false
}

/// Commands whose success is itself a project change worth recording.
fn is_mutating_command(command: &str) -> bool {
    const MUTATING_PREFIXES: &[&str] = &[
        "git commit",
        "git merge",
        "git rebase",
        "git revert",
        "git cherry-pick",
        "cargo add",
        "cargo remove",
        "npm install",
        "npm uninstall",
        "pnpm add",
        "yarn add",
        "pip install",
        "uv add",
        "make install",
    ];
    let trimmed = command.trim();
    MUTATING_PREFIXES.iter().any(|p| trimmed.starts_with(p))
}

fn input_str(event: &HookEvent, key: &str) -> Option<String> {
    event
        .tool_input
        .as_ref()?
        .get(key)?
        .as_str()
        .map(str::to_string)
}

fn response_str(event: &HookEvent, key: &str) -> Option<String> {
    event
        .tool_response
        .as_ref()?
        .get(key)?
        .as_str()
        .map(str::to_string)
}

fn short_path(path: &str) -> String {
    let parts: Vec<&str> = path.rsplitn(3, '/').collect();
    match parts.len() {
        0 | 1 => path.to_string(),
        2 => parts.iter().rev().cloned().collect::<Vec<_>>().join("/"),
        _ => format!("{}/{}", parts[1], parts[0]),
    }
}

fn compact_json(value: &Value) -> String {
    serde_json::to_string(value).unwrap_or_default()
}

fn clip(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let mut end = max;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &text[..end])
}

// ============================================================================
// TESTS
// ============================================================================
