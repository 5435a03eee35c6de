//! Core data model
//!
//! Observations are the atomic unit of memory. They are linked by typed
//! relations, grouped into projects, and attributed to sessions captured
//! from the host assistant's conversation logs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// OBSERVATION TYPES
// ============================================================================

/// Types of observations
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ObservationType {
    /// A decision made about architecture, design, or process
    Decision,
    /// Something learned about the codebase or its environment
    Discovery,
    /// A concrete change applied to the project
    Change,
    /// A recurring pattern or convention
    Pattern,
    /// A synthesized insight
    Insight,
    /// An error encountered and what it looked like
    Error,
    /// An open action item
    Todo,
    /// General note
    #[default]
    Note,
}

impl ObservationType {
    /// All types, in weight order
    pub const ALL: [ObservationType; 8] = [
        ObservationType::Decision,
        ObservationType::Discovery,
        ObservationType::Pattern,
        ObservationType::Insight,
        ObservationType::Error,
        ObservationType::Change,
        ObservationType::Todo,
        ObservationType::Note,
    ];

    /// Convert to string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            ObservationType::Decision => "decision",
            ObservationType::Discovery => "discovery",
            ObservationType::Change => "change",
            ObservationType::Pattern => "pattern",
            ObservationType::Insight => "insight",
            ObservationType::Error => "error",
            ObservationType::Todo => "todo",
            ObservationType::Note => "note",
        }
    }

    /// Parse from string name, falling back to `Note`
    pub fn parse_name(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "decision" => ObservationType::Decision,
            "discovery" => ObservationType::Discovery,
            "change" => ObservationType::Change,
            "pattern" => ObservationType::Pattern,
            "insight" => ObservationType::Insight,
            "error" => ObservationType::Error,
            "todo" => ObservationType::Todo,
            _ => ObservationType::Note,
        }
    }
}

impl std::fmt::Display for ObservationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// OBSERVATION
// ============================================================================

/// An observation in the memory store
///
/// `relevance` is derived state, recomputed only by the consolidation decay
/// cycle. `superseded_by` points at a newer observation and must stay
/// acyclic; supersession is orthogonal to archival.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Observation {
    /// Stable numeric id (row id)
    pub id: i64,
    /// Project this observation belongs to (`dirname_<6hex>`)
    pub project: String,
    /// Session that produced it, if any
    pub session_id: Option<String>,
    /// Workstation that produced it
    pub workstation: String,
    /// Observation type
    pub kind: ObservationType,
    /// Short headline
    pub title: String,
    /// Secondary headline
    pub subtitle: String,
    /// Free-text narrative
    pub narrative: String,
    /// Ordered short factual statements
    pub facts: Vec<String>,
    /// Tag strings
    pub tags: Vec<String>,
    /// File paths referenced
    pub files: Vec<String>,
    /// Concept strings
    pub concepts: Vec<String>,
    /// Importance in [0,1]
    pub importance: f64,
    /// Confidence in [0,1]
    pub confidence: f64,
    /// Derived relevance in [0,1]
    pub relevance: f64,
    /// Number of times retrieved
    pub access_count: i64,
    /// Excluded from default search when set
    pub archived: bool,
    /// Newer observation that supersedes this one
    pub superseded_by: Option<i64>,
    /// Set when the embedding could not be produced at write time
    pub embedding_pending: bool,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last retrieval time
    pub last_accessed: DateTime<Utc>,
}

impl Observation {
    /// Concatenated text that feeds the full-text index and the embedder
    pub fn index_text(&self) -> String {
        let mut text = String::with_capacity(
            self.title.len() + self.subtitle.len() + self.narrative.len() + 64,
        );
        text.push_str(&self.title);
        if !self.subtitle.is_empty() {
            text.push('\n');
            text.push_str(&self.subtitle);
        }
        if !self.narrative.is_empty() {
            text.push('\n');
            text.push_str(&self.narrative);
        }
        for fact in &self.facts {
            text.push('\n');
            text.push_str(fact);
        }
        text
    }

    /// Age in fractional days at `now`
    pub fn age_days(&self, now: DateTime<Utc>) -> f64 {
        (now - self.created_at).num_seconds().max(0) as f64 / 86_400.0
    }

    /// Days since last retrieval at `now`
    pub fn days_since_access(&self, now: DateTime<Utc>) -> f64 {
        (now - self.last_accessed).num_seconds().max(0) as f64 / 86_400.0
    }
}

// ============================================================================
// DRAFTS AND PATCHES
// ============================================================================

/// Where an observation's initial confidence comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ObservationSource {
    /// Distilled from a lifecycle hook event
    #[default]
    Hook,
    /// Created or edited through the tool surface
    Tool,
    /// Inferred by a consolidation cycle
    Consolidation,
}

/// Input for creating a new observation
///
/// Uses `deny_unknown_fields` so malformed callers fail loudly.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ObservationDraft {
    pub project: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub workstation: String,
    pub kind: ObservationType,
    pub title: String,
    #[serde(default)]
    pub subtitle: String,
    #[serde(default)]
    pub narrative: String,
    #[serde(default)]
    pub facts: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub files: Vec<String>,
    #[serde(default)]
    pub concepts: Vec<String>,
    /// Explicit importance boost in [0,1], folded into the importance score
    #[serde(default)]
    pub boost: f64,
    #[serde(default)]
    pub source: ObservationSource,
}

impl ObservationDraft {
    /// Minimal draft with the required fields
    pub fn new(project: impl Into<String>, kind: ObservationType, title: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            session_id: None,
            workstation: String::new(),
            kind,
            title: title.into(),
            subtitle: String::new(),
            narrative: String::new(),
            facts: vec![],
            tags: vec![],
            files: vec![],
            concepts: vec![],
            boost: 0.0,
            source: ObservationSource::Hook,
        }
    }

    /// Text that feeds the full-text index and the embedder
    pub fn index_text(&self) -> String {
        let mut text = self.title.clone();
        if !self.subtitle.is_empty() {
            text.push('\n');
            text.push_str(&self.subtitle);
        }
        if !self.narrative.is_empty() {
            text.push('\n');
            text.push_str(&self.narrative);
        }
        for fact in &self.facts {
            text.push('\n');
            text.push_str(fact);
        }
        text
    }
}

/// Typed partial update for an observation
///
/// `None` leaves a field untouched. Relevance is deliberately absent; it is
/// derived state owned by consolidation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ObservationPatch {
    pub title: Option<String>,
    pub subtitle: Option<String>,
    pub narrative: Option<String>,
    pub facts: Option<Vec<String>>,
    pub tags: Option<Vec<String>>,
    pub files: Option<Vec<String>>,
    pub concepts: Option<Vec<String>>,
    pub importance: Option<f64>,
    pub confidence: Option<f64>,
}

impl ObservationPatch {
    /// Whether this patch touches text that is embedded and full-text indexed
    pub fn changes_text(&self) -> bool {
        self.title.is_some()
            || self.subtitle.is_some()
            || self.narrative.is_some()
            || self.facts.is_some()
    }
}

// ============================================================================
// RELATIONS
// ============================================================================

/// Typed directed edge between observations
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationType {
    Causes,
    Fixes,
    Supersedes,
    DependsOn,
    RelatesTo,
    EvolvesFrom,
    LeadsTo,
    SimilarTo,
    Contradicts,
    Reinforces,
    InvalidatedBy,
    Explains,
    SharesTheme,
    ParallelContext,
    Summarizes,
    PartOf,
    PrefersOver,
}

impl RelationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationType::Causes => "causes",
            RelationType::Fixes => "fixes",
            RelationType::Supersedes => "supersedes",
            RelationType::DependsOn => "depends_on",
            RelationType::RelatesTo => "relates_to",
            RelationType::EvolvesFrom => "evolves_from",
            RelationType::LeadsTo => "leads_to",
            RelationType::SimilarTo => "similar_to",
            RelationType::Contradicts => "contradicts",
            RelationType::Reinforces => "reinforces",
            RelationType::InvalidatedBy => "invalidated_by",
            RelationType::Explains => "explains",
            RelationType::SharesTheme => "shares_theme",
            RelationType::ParallelContext => "parallel_context",
            RelationType::Summarizes => "summarizes",
            RelationType::PartOf => "part_of",
            RelationType::PrefersOver => "prefers_over",
        }
    }
}

impl std::str::FromStr for RelationType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "causes" => Ok(RelationType::Causes),
            "fixes" => Ok(RelationType::Fixes),
            "supersedes" => Ok(RelationType::Supersedes),
            "depends_on" => Ok(RelationType::DependsOn),
            "relates_to" => Ok(RelationType::RelatesTo),
            "evolves_from" => Ok(RelationType::EvolvesFrom),
            "leads_to" => Ok(RelationType::LeadsTo),
            "similar_to" => Ok(RelationType::SimilarTo),
            "contradicts" => Ok(RelationType::Contradicts),
            "reinforces" => Ok(RelationType::Reinforces),
            "invalidated_by" => Ok(RelationType::InvalidatedBy),
            "explains" => Ok(RelationType::Explains),
            "shares_theme" => Ok(RelationType::SharesTheme),
            "parallel_context" => Ok(RelationType::ParallelContext),
            "summarizes" => Ok(RelationType::Summarizes),
            "part_of" => Ok(RelationType::PartOf),
            "prefers_over" => Ok(RelationType::PrefersOver),
            _ => Err(format!("Unknown relation type: {}", s)),
        }
    }
}

impl std::fmt::Display for RelationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How a relation came to exist
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Provenance {
    #[default]
    Manual,
    Consolidation,
    Inferred,
}

impl Provenance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provenance::Manual => "manual",
            Provenance::Consolidation => "consolidation",
            Provenance::Inferred => "inferred",
        }
    }

    pub fn parse_name(s: &str) -> Self {
        match s {
            "consolidation" => Provenance::Consolidation,
            "inferred" => Provenance::Inferred,
            _ => Provenance::Manual,
        }
    }
}

/// A directed typed edge between two observations
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Relation {
    pub from: i64,
    pub to: i64,
    pub kind: RelationType,
    /// Edge weight in [0,1]
    pub weight: f64,
    pub created_at: DateTime<Utc>,
    pub provenance: Provenance,
}

impl Relation {
    pub fn new(from: i64, to: i64, kind: RelationType, weight: f64) -> Self {
        Self {
            from,
            to,
            kind,
            weight: weight.clamp(0.0, 1.0),
            created_at: Utc::now(),
            provenance: Provenance::Manual,
        }
    }

    pub fn with_provenance(mut self, provenance: Provenance) -> Self {
        self.provenance = provenance;
        self
    }
}

// ============================================================================
// SESSIONS
// ============================================================================

/// Composite session key: `workstation:project:session_uuid`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionKey {
    pub workstation: String,
    pub project: String,
    pub session_uuid: String,
}

impl SessionKey {
    pub fn new(
        workstation: impl Into<String>,
        project: impl Into<String>,
        session_uuid: impl Into<String>,
    ) -> Self {
        Self {
            workstation: workstation.into(),
            project: project.into(),
            session_uuid: session_uuid.into(),
        }
    }
}

impl std::fmt::Display for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.workstation, self.project, self.session_uuid)
    }
}

/// One message inside a session
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMessage {
    pub role: String,
    pub timestamp: DateTime<Utc>,
    pub text: String,
}

/// A bounded conversation parsed from the host's logs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub key: SessionKey,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    /// mtime of the source log file, unix seconds, for incremental re-indexing
    pub source_mtime: i64,
    pub summary: Option<String>,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub message_count: i64,
}

// ============================================================================
// PATTERNS
// ============================================================================

/// A named recurring cluster of observations
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryPattern {
    pub name: String,
    pub project: String,
    pub observation_ids: Vec<i64>,
    pub confidence: f64,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

// ============================================================================
// FILTERS
// ============================================================================

/// Structured filter over observations
///
/// `project` is mandatory: observations never cross project boundaries.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObservationFilter {
    pub project: String,
    #[serde(default)]
    pub kinds: Vec<ObservationType>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub file_prefix: Option<String>,
    #[serde(default)]
    pub concepts: Vec<String>,
    #[serde(default)]
    pub created_after: Option<DateTime<Utc>>,
    #[serde(default)]
    pub created_before: Option<DateTime<Utc>>,
    #[serde(default)]
    pub min_importance: Option<f64>,
    #[serde(default)]
    pub include_archived: bool,
}

impl ObservationFilter {
    pub fn project(project: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            kinds: vec![],
            tags: vec![],
            file_prefix: None,
            concepts: vec![],
            created_after: None,
            created_before: None,
            min_importance: None,
            include_archived: false,
        }
    }

    /// Check the parts of the filter not encoded in either index.
    ///
    /// Used to drop hydrated candidates that slipped past the index-level
    /// project/archived filters.
    pub fn matches(&self, obs: &Observation) -> bool {
        if obs.project != self.project {
            return false;
        }
        if !self.include_archived && obs.archived {
            return false;
        }
        if !self.kinds.is_empty() && !self.kinds.contains(&obs.kind) {
            return false;
        }
        if !self.tags.is_empty() && !self.tags.iter().any(|t| obs.tags.contains(t)) {
            return false;
        }
        if let Some(prefix) = &self.file_prefix {
            if !obs.files.iter().any(|f| f.starts_with(prefix.as_str())) {
                return false;
            }
        }
        if !self.concepts.is_empty() && !self.concepts.iter().any(|c| obs.concepts.contains(c)) {
            return false;
        }
        if let Some(after) = self.created_after {
            if obs.created_at < after {
                return false;
            }
        }
        if let Some(before) = self.created_before {
            if obs.created_at > before {
                return false;
            }
        }
        if let Some(min) = self.min_importance {
            if obs.importance < min {
                return false;
            }
        }
        true
    }
}

// ============================================================================
// STATS
// ============================================================================

/// Counters for the status surface
#[non_exhaustive]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryStats {
    pub total_observations: i64,
    pub archived_observations: i64,
    pub pending_embeddings: i64,
    pub total_relations: i64,
    pub total_sessions: i64,
    pub total_patterns: i64,
    pub average_relevance: f64,
    pub average_importance: f64,
    pub oldest_observation: Option<DateTime<Utc>>,
    pub newest_observation: Option<DateTime<Utc>>,
}

// ============================================================================
// TESTS
// ============================================================================
