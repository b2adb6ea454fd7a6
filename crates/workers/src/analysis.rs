//! Pure analysis functions over tree content snapshots.
//!
//! These run identically inside a worker thread and in the synchronous
//! fallback path; the only difference callers observe is the `fallback` tag.

use crate::task::{
    AnalysisResult, CandidateMatch, PatternPerf, PatternSpec, StructureReport, TaskPayload,
};
use regex::Regex;
use std::collections::HashMap;

/// Tokens the discovery heuristics leave in serialized snapshots to mark
/// still-collapsed content.
const COLLAPSED_TOKENS: [&str; 3] = ["[+]", "load more", "continue this thread"];

/// Depth/size metrics for a snapshot. Depth is derived from indentation
/// (two spaces per level), the serialization the Tree Access Layer emits.
#[must_use]
pub fn analyze_structure(content: &str) -> StructureReport {
    let mut report = StructureReport {
        total_bytes: content.len(),
        ..StructureReport::default()
    };

    for line in content.lines() {
        let trimmed = line.trim_start();
        if trimmed.is_empty() {
            continue;
        }
        report.node_count += 1;

        let indent = line.len() - trimmed.len();
        let depth = indent / 2;
        report.max_depth = report.max_depth.max(depth);

        let lowered = trimmed.to_ascii_lowercase();
        if COLLAPSED_TOKENS.iter().any(|t| lowered.contains(t)) {
            report.collapsed_markers += 1;
        }
    }

    report
}

/// Apply a pattern table line-by-line. Invalid patterns are skipped with a
/// warning rather than failing the whole task.
#[must_use]
pub fn parse_candidates(content: &str, patterns: &[PatternSpec]) -> Vec<CandidateMatch> {
    let mut compiled = Vec::with_capacity(patterns.len());
    for spec in patterns {
        match Regex::new(&spec.pattern) {
            Ok(re) => compiled.push((spec.category, re)),
            Err(err) => {
                log::warn!("skipping invalid pattern {:?}: {err}", spec.pattern);
            }
        }
    }

    let mut matches = Vec::new();
    for (line_no, line) in content.lines().enumerate() {
        for (category, re) in &compiled {
            if let Some(found) = re.find(line) {
                matches.push(CandidateMatch {
                    category: *category,
                    line: line_no,
                    excerpt: found.as_str().to_string(),
                });
            }
        }
    }
    matches
}

/// Reorder a pattern table by observed hit-rate (descending), breaking ties
/// by lower latency. Patterns without perf data keep their relative order at
/// the end, so a fresh table is a no-op.
#[must_use]
pub fn optimize_patterns(patterns: &[PatternSpec], perf: &[PatternPerf]) -> Vec<PatternSpec> {
    let by_pattern: HashMap<&str, &PatternPerf> =
        perf.iter().map(|p| (p.pattern.as_str(), p)).collect();

    let mut scored: Vec<(usize, &PatternSpec)> = patterns.iter().enumerate().collect();
    scored.sort_by(|(ia, a), (ib, b)| {
        let pa = by_pattern.get(a.pattern.as_str());
        let pb = by_pattern.get(b.pattern.as_str());
        match (pa, pb) {
            (Some(pa), Some(pb)) => pb
                .hits
                .cmp(&pa.hits)
                .then(
                    pa.avg_latency_ms
                        .partial_cmp(&pb.avg_latency_ms)
                        .unwrap_or(std::cmp::Ordering::Equal),
                )
                .then(ia.cmp(ib)),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => ia.cmp(ib),
        }
    });

    scored.into_iter().map(|(_, spec)| spec.clone()).collect()
}

/// Dispatch a payload to the matching analysis function. `Custom` kinds are
/// reported as unsupported; the pool turns that into a fallback result.
#[must_use]
pub fn compute(payload: &TaskPayload) -> AnalysisResult {
    match payload {
        TaskPayload::AnalyzeStructure { content } => {
            AnalysisResult::Structure(analyze_structure(content))
        }
        TaskPayload::ParseCandidates { content, patterns } => {
            AnalysisResult::Candidates(parse_candidates(content, patterns))
        }
        TaskPayload::OptimizePatterns { patterns, perf } => {
            AnalysisResult::Patterns(optimize_patterns(patterns, perf))
        }
        TaskPayload::Ping => AnalysisResult::Pong,
        TaskPayload::Calibrate { hold } => {
            std::thread::sleep(*hold);
            AnalysisResult::Calibrated { held: *hold }
        }
        TaskPayload::Custom { kind, .. } => AnalysisResult::Unsupported { kind: kind.clone() },
    }
}
