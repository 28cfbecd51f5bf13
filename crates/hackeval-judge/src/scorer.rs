//! Scorer: pure aggregation of analysis and execution outcomes into the
//! scored content of an [`EvaluationResult`](hackeval_core::EvaluationResult).
//!
//! Nothing here reads clocks, the environment or any shared state, so the
//! same inputs always produce the same scores.

use hackeval_core::{
    AnalysisReport, EngineConfig, ExecutionResult, ResourceLimits, ScoredContent, ScoringConfig,
    SecurityFlag, SecurityVerdict, SubScores, TestCase, WEIGHT_TOTAL,
};

/// Sub-scores are expressed out of this.
const SUB_SCORE_MAX: f64 = 100.0;

fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

#[derive(Debug, Clone)]
pub struct Scorer {
    scoring: ScoringConfig,
    defaults: ResourceLimits,
}

impl Scorer {
    pub fn new(scoring: ScoringConfig, defaults: ResourceLimits) -> Self {
        Self { scoring, defaults }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.scoring.clone(), config.default_limits())
    }

    pub fn max_score(&self) -> f64 {
        self.scoring.max_score
    }

    /// Score one evaluation. `executions` are matched to `cases` by index.
    pub fn score(
        &self,
        cases: &[TestCase],
        executions: Vec<ExecutionResult>,
        analysis: AnalysisReport,
        extra_flags: Vec<SecurityFlag>,
        submission_diagnostics: Vec<String>,
    ) -> ScoredContent {
        let sub_scores = SubScores {
            correctness: round4(self.correctness(cases, &executions)),
            performance: round4(self.performance(cases, &executions)),
            quality: round4(self.quality(&analysis)),
        };
        let security = self.security(&executions, extra_flags);
        let composite_score = round4(self.composite(&sub_scores, &security));

        ScoredContent {
            composite_score,
            max_score: self.scoring.max_score,
            sub_scores,
            security,
            analysis,
            executions,
            submission_diagnostics,
        }
    }

    fn weight_of(cases: &[TestCase], exec: &ExecutionResult) -> f64 {
        cases.get(exec.case_index).map_or(0.0, |c| f64::from(c.weight))
    }

    /// Weighted fraction of passing cases.
    fn correctness(&self, cases: &[TestCase], executions: &[ExecutionResult]) -> f64 {
        let total: f64 = cases.iter().map(|c| f64::from(c.weight)).sum();
        if total <= 0.0 {
            return 0.0;
        }
        let passed: f64 = executions
            .iter()
            .filter(|e| e.status.is_pass())
            .map(|e| Self::weight_of(cases, e))
            .sum();
        SUB_SCORE_MAX * passed / total
    }

    /// Full marks at or below the target ratio, nothing at the limit.
    fn curve(&self, ratio: f64) -> f64 {
        let target = self.scoring.performance.target_ratio;
        if ratio <= target {
            1.0
        } else if ratio >= 1.0 {
            0.0
        } else {
            (1.0 - ratio) / (1.0 - target)
        }
    }

    fn case_efficiency(&self, case: &TestCase, exec: &ExecutionResult) -> f64 {
        let limits = self.defaults.with_overrides(&case.limits);
        let time_ratio = exec.wall_time_ms as f64 / limits.time_ms.max(1) as f64;
        let memory_ratio = exec.peak_memory_bytes as f64 / limits.memory_bytes().max(1) as f64;
        let share = self.scoring.performance.time_share.clamp(0.0, 1.0);
        share * self.curve(time_ratio) + (1.0 - share) * self.curve(memory_ratio)
    }

    /// Resource efficiency of passing cases, weighted over the whole suite.
    fn performance(&self, cases: &[TestCase], executions: &[ExecutionResult]) -> f64 {
        let total: f64 = cases.iter().map(|c| f64::from(c.weight)).sum();
        if total <= 0.0 {
            return 0.0;
        }
        let earned: f64 = executions
            .iter()
            .filter(|e| e.status.is_pass())
            .filter_map(|e| cases.get(e.case_index).map(|c| (c, e)))
            .map(|(c, e)| f64::from(c.weight) * self.case_efficiency(c, e))
            .sum();
        SUB_SCORE_MAX * earned / total
    }

    /// Strictly decreasing in violation count and severity.
    fn quality(&self, analysis: &AnalysisReport) -> f64 {
        let curve = &self.scoring.quality;
        let burden: f64 = analysis
            .violations
            .iter()
            .map(|v| curve.severity_weights.weight(v.severity))
            .sum();
        if curve.half_life + burden <= 0.0 {
            return 0.0;
        }
        SUB_SCORE_MAX * curve.half_life / (curve.half_life + burden)
    }

    fn security(&self, executions: &[ExecutionResult], extra: Vec<SecurityFlag>) -> SecurityVerdict {
        let mut flags: Vec<SecurityFlag> = executions
            .iter()
            .flat_map(|e| e.security_flags.iter().cloned())
            .chain(extra)
            .collect();
        flags.sort_by(|a, b| a.kind.cmp(&b.kind).then_with(|| a.evidence.cmp(&b.evidence)));
        flags.dedup();

        let policy = &self.scoring.security;
        SecurityVerdict {
            penalty: round4(policy.penalty_per_flag * flags.len() as f64),
            disqualified: policy.disqualify && !flags.is_empty(),
            flags,
        }
    }

    fn composite(&self, sub: &SubScores, security: &SecurityVerdict) -> f64 {
        if security.disqualified {
            return 0.0;
        }
        let w = &self.scoring.weights;
        let weighted = f64::from(w.correctness) * sub.correctness
            + f64::from(w.performance) * sub.performance
            + f64::from(w.quality) * sub.quality;
        let max = self.scoring.max_score;
        let raw = max * weighted / (f64::from(WEIGHT_TOTAL) * SUB_SCORE_MAX) - security.penalty;
        raw.clamp(0.0, max)
    }
}
