//! Task Descriptors & Classification
//!
//! Inbound unit of work plus the heuristic classifier that turns a free-text
//! description into a (task type, complexity, required expertise) triple.
//! Classification is keyword- and count-based on purpose: it is cheap,
//! deterministic, and easy to audit when a routing decision is questioned.

use serde::{Deserialize, Serialize};

/// Acceptance-criteria count above which a task is complex
const COMPLEX_CRITERIA_COUNT: usize = 5;
/// Acceptance-criteria count above which a task is at least moderate
const MODERATE_CRITERIA_COUNT: usize = 2;

/// Keyword table driving task-type classification; first match wins,
/// expertise tags accumulate across all matches.
const DOMAIN_KEYWORDS: &[(&str, &[&str])] = &[
    ("backend", &["api", "endpoint", "server", "database", "schema", "migration"]),
    ("frontend", &["ui", "frontend", "component", "layout", "css", "render"]),
    ("testing", &["test", "coverage", "regression", "flaky"]),
    ("review", &["review", "audit", "feedback"]),
    ("docs", &["document", "documentation", "readme", "guide"]),
    ("infra", &["deploy", "docker", "pipeline", "infra", "provision"]),
];

/// Description keywords that force complex classification regardless of
/// criteria count
const COMPLEX_KEYWORDS: &[&str] = &["architecture", "refactor", "migrate", "redesign"];

/// One unit of work submitted for routing
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TaskDescriptor {
    /// Caller-supplied task identifier
    pub task_id: String,
    /// Free-text description
    pub description: String,
    /// Acceptance criteria; their count feeds complexity classification
    #[serde(default)]
    pub acceptance_criteria: Vec<String>,
    /// Input artifacts the task consumes
    #[serde(default)]
    pub inputs: Vec<String>,
    /// Caller's duration estimate in seconds, if any
    pub estimated_duration_secs: Option<u64>,
    /// Priority, 0 (background) to 3 (urgent)
    #[serde(default)]
    pub priority: u8,
}

impl TaskDescriptor {
    /// Minimal descriptor with just an id and description
    pub fn new(task_id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            description: description.into(),
            acceptance_criteria: Vec::new(),
            inputs: Vec::new(),
            estimated_duration_secs: None,
            priority: 0,
        }
    }

    /// Add an acceptance criterion
    #[must_use]
    pub fn with_criterion(mut self, criterion: impl Into<String>) -> Self {
        self.acceptance_criteria.push(criterion.into());
        self
    }

    /// Add an input artifact
    #[must_use]
    pub fn with_input(mut self, input: impl Into<String>) -> Self {
        self.inputs.push(input.into());
        self
    }

    /// Set the priority (clamped to 3)
    #[must_use]
    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority.min(3);
        self
    }

    /// Set the caller's duration estimate
    #[must_use]
    pub fn with_estimated_duration_secs(mut self, secs: u64) -> Self {
        self.estimated_duration_secs = Some(secs);
        self
    }
}

/// How demanding a task is, from its structure alone
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskComplexity {
    /// Small, self-contained work
    Simple,
    /// Multi-step work within one domain
    Moderate,
    /// Cross-cutting or heavily specified work
    Complex,
}

impl TaskComplexity {
    /// Default duration estimate in seconds when the caller supplies none
    #[must_use]
    pub fn default_duration_secs(&self) -> u64 {
        match self {
            Self::Simple => 15 * 60,
            Self::Moderate => 60 * 60,
            Self::Complex => 4 * 60 * 60,
        }
    }
}

/// Classifier output for one task
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TaskClassification {
    /// Primary task type (first matching domain, or "general")
    pub task_type: String,
    /// Structural complexity
    pub complexity: TaskComplexity,
    /// Expertise tags the task requires (all matching domains)
    pub required_expertise: Vec<String>,
    /// Whether the task spans domains and benefits from collaboration
    pub needs_collaboration: bool,
}

/// Classify a task from its description, criteria and inputs
#[must_use]
pub fn classify(task: &TaskDescriptor) -> TaskClassification {
    let text = format!(
        "{} {} {}",
        task.description.to_lowercase(),
        task.acceptance_criteria.join(" ").to_lowercase(),
        task.inputs.join(" ").to_lowercase(),
    );

    let mut required_expertise = Vec::new();
    for (domain, keywords) in DOMAIN_KEYWORDS {
        if keywords.iter().any(|kw| text.contains(kw)) {
            required_expertise.push((*domain).to_string());
        }
    }
    let task_type = required_expertise
        .first()
        .cloned()
        .unwrap_or_else(|| "general".to_string());

    let complexity = if task.acceptance_criteria.len() > COMPLEX_CRITERIA_COUNT
        || COMPLEX_KEYWORDS.iter().any(|kw| text.contains(kw))
    {
        TaskComplexity::Complex
    } else if task.acceptance_criteria.len() > MODERATE_CRITERIA_COUNT || task.inputs.len() > 3 {
        TaskComplexity::Moderate
    } else {
        TaskComplexity::Simple
    };

    let needs_collaboration =
        complexity == TaskComplexity::Complex || required_expertise.len() > 1;

    TaskClassification {
        task_type,
        complexity,
        required_expertise,
        needs_collaboration,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seven_criteria_is_complex() {
        let mut task = TaskDescriptor::new("t1", "implement feature");
        for i in 0..7 {
            task = task.with_criterion(format!("criterion {i}"));
        }
        assert_eq!(classify(&task).complexity, TaskComplexity::Complex);
    }

    #[test]
    fn test_five_criteria_is_not_complex() {
        let mut task = TaskDescriptor::new("t1", "implement feature");
        for i in 0..5 {
            task = task.with_criterion(format!("criterion {i}"));
        }
        assert_eq!(classify(&task).complexity, TaskComplexity::Moderate);
    }

    #[test]
    fn test_backend_keywords() {
        let c = classify(&TaskDescriptor::new("t1", "add an API endpoint for users"));
        assert_eq!(c.task_type, "backend");
        assert_eq!(c.required_expertise, vec!["backend".to_string()]);
    }

    #[test]
    fn test_cross_domain_needs_collaboration() {
        let c = classify(&TaskDescriptor::new(
            "t1",
            "wire the new API endpoint into the frontend component",
        ));
        assert!(c.required_expertise.len() > 1);
        assert!(c.needs_collaboration);
    }

    #[test]
    fn test_unmatched_text_is_general_simple() {
        let c = classify(&TaskDescriptor::new("t1", "tidy the backlog"));
        assert_eq!(c.task_type, "general");
        assert_eq!(c.complexity, TaskComplexity::Simple);
        assert!(!c.needs_collaboration);
    }

    #[test]
    fn test_classification_is_deterministic() {
        let task = TaskDescriptor::new("t1", "review the database migration")
            .with_criterion("schema applies cleanly");
        assert_eq!(classify(&task), classify(&task));
    }
}
