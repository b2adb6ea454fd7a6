use expander_core::CandidateCategory;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// One pattern the Tree Access Layer uses to locate a candidate kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternSpec {
    pub category: CandidateCategory,
    /// Regular expression applied per line of the content snapshot.
    pub pattern: String,
}

/// Observed performance of one pattern, fed into `optimize_patterns`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternPerf {
    pub pattern: String,
    pub hits: u64,
    pub avg_latency_ms: f32,
}

/// Work sent across the worker boundary. Payloads are owned snapshots; no
/// shared mutable state crosses the channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TaskPayload {
    AnalyzeStructure {
        content: String,
    },
    ParseCandidates {
        content: String,
        patterns: Vec<PatternSpec>,
    },
    OptimizePatterns {
        patterns: Vec<PatternSpec>,
        perf: Vec<PatternPerf>,
    },
    /// Liveness probe used by `health_check`.
    Ping,
    /// Diagnostic task that holds a worker for `hold`; used to calibrate
    /// the task deadline against the execution environment.
    Calibrate {
        hold: Duration,
    },
    /// A kind the built-in workers do not recognize; always resolved via
    /// fallback.
    Custom {
        kind: String,
        payload: serde_json::Value,
    },
}

impl TaskPayload {
    #[must_use]
    pub fn kind(&self) -> &str {
        match self {
            TaskPayload::AnalyzeStructure { .. } => "analyze_structure",
            TaskPayload::ParseCandidates { .. } => "parse_candidates",
            TaskPayload::OptimizePatterns { .. } => "optimize_patterns",
            TaskPayload::Ping => "ping",
            TaskPayload::Calibrate { .. } => "calibrate",
            TaskPayload::Custom { kind, .. } => kind,
        }
    }
}

/// A submitted task. Owned by the pool from submission to completion or
/// timeout; never shared between workers.
#[derive(Debug, Clone)]
pub struct WorkerTask {
    pub task_id: u64,
    pub payload: TaskPayload,
    pub deadline: Instant,
}

/// Structural metrics over a tree content snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructureReport {
    pub node_count: usize,
    pub max_depth: usize,
    pub collapsed_markers: usize,
    pub total_bytes: usize,
}

/// A pattern hit inside a content snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateMatch {
    pub category: CandidateCategory,
    pub line: usize,
    pub excerpt: String,
}

/// Computed result of one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AnalysisResult {
    Structure(StructureReport),
    Candidates(Vec<CandidateMatch>),
    Patterns(Vec<PatternSpec>),
    Pong,
    Calibrated { held: Duration },
    /// The task kind is not one the analysis library implements.
    Unsupported { kind: String },
}

/// What `submit` resolves with. `fallback` marks a degraded, in-process
/// execution (pool unavailable, worker error, or unknown kind).
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisOutput {
    pub task_id: u64,
    pub result: AnalysisResult,
    pub fallback: bool,
    pub duration: Duration,
}
