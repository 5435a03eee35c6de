//! Context injection
//!
//! At session start the hook asks for the project's most relevant memory.
//! The payload carries up to `CONTEXT_OBSERVATIONS` observations ranked by
//! relevance (then type weight, then recency) and a `full_count` telling
//! the caller how many deserve full narrative rendering; the rest render
//! as one-line summaries.

use serde_json::{json, Value};

use engram_core::Observation;

/// Build the injection payload.
pub fn context_payload(observations: &[Observation], full_count: usize) -> Value {
    let full_count = full_count.min(observations.len());
    json!({
        "observations": observations
            .iter()
            .map(|obs| json!({
                "id": obs.id,
                "type": obs.kind.as_str(),
                "title": obs.title,
                "subtitle": obs.subtitle,
                "narrative": obs.narrative,
                "facts": obs.facts,
            }))
            .collect::<Vec<Value>>(),
        "full_count": full_count,
    })
}

/// Render the fenced `<memory-context>` block the hook forwards as
/// additional context.
pub fn render_memory_context(observations: &[Observation], full_count: usize) -> String {
    let mut out = String::from("<memory-context>\n");
    out.push_str("# Project memory\n\n");

    if observations.is_empty() {
        out.push_str("No prior observations for this project.\n");
        out.push_str("</memory-context>\n");
        return out;
    }

    let full_count = full_count.min(observations.len());
    for obs in &observations[..full_count] {
        out.push_str(&format!("## [{}] {}\n", obs.kind.as_str(), obs.title));
        if !obs.subtitle.is_empty() {
            out.push_str(&format!("{}\n", obs.subtitle));
        }
        if !obs.narrative.is_empty() {
            out.push_str(&format!("{}\n", obs.narrative));
        }
        for fact in &obs.facts {
            out.push_str(&format!("- {}\n", fact));
        }
        out.push('\n');
    }

    if observations.len() > full_count {
        out.push_str("## Earlier observations\n");
        for obs in &observations[full_count..] {
            out.push_str(&format!("- [{}] {}\n", obs.kind.as_str(), obs.title));
        }
    }

    out.push_str("</memory-context>\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use engram_core::ObservationType;

    fn obs(id: i64, kind: ObservationType, title: &str) -> Observation {
        let now = Utc::now();
        Observation {
            id,
            project: "p".into(),
            session_id: None,
            workstation: "ws".into(),
            kind,
            title: title.into(),
            subtitle: String::new(),
            narrative: format!("{title} narrative"),
            facts: vec!["a fact".into()],
            tags: vec![],
            files: vec![],
            concepts: vec![],
            importance: 0.5,
            confidence: 0.7,
            relevance: 0.5,
            access_count: 0,
            archived: false,
            superseded_by: None,
            embedding_pending: false,
            created_at: now,
            last_accessed: now,
        }
    }

    #[test]
    fn payload_caps_full_count_at_result_size() {
        let rows = vec![obs(1, ObservationType::Decision, "adopt Postgres")];
        let payload = context_payload(&rows, 25);
        assert_eq!(payload["full_count"], 1);
        assert_eq!(payload["observations"][0]["type"], "decision");
        assert_eq!(payload["observations"][0]["facts"][0], "a fact");
    }

    #[test]
    fn rendering_splits_full_and_summary() {
        let rows = vec![
            obs(1, ObservationType::Decision, "adopt Postgres"),
            obs(2, ObservationType::Discovery, "GIN index helps"),
            obs(3, ObservationType::Note, "minor cleanup"),
        ];
        let rendered = render_memory_context(&rows, 2);

        assert!(rendered.starts_with("<memory-context>"));
        assert!(rendered.trim_end().ends_with("</memory-context>"));
        // First two fully rendered with narrative and facts
        assert!(rendered.contains("## [decision] adopt Postgres"));
        assert!(rendered.contains("adopt Postgres narrative"));
        // Third one is a one-liner
        assert!(rendered.contains("- [note] minor cleanup"));
        assert!(!rendered.contains("minor cleanup narrative"));
    }

    #[test]
    fn empty_memory_renders_a_stub() {
        let rendered = render_memory_context(&[], 25);
        assert!(rendered.contains("No prior observations"));
    }
}
