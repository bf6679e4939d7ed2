use std::collections::VecDeque;

use indexmap::IndexMap;
use serde::Serialize;
use tracing::debug;

use crate::common::{ErrorSample, FeedbackMessage, GroundTruthRecord};

const RECENT_EXPIRED: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnmatchedReason {
    /// The record was already evaluated or fell out of the retention window.
    Late,
    /// No frame with this id has been produced.
    NotRecorded,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Evaluation {
    Matched(ErrorSample),
    /// The consumer analysed the frame but did not find the ball.
    Missed { sequence_id: u64 },
    Unmatched {
        sequence_id: u64,
        reason: UnmatchedReason,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EvaluationStats {
    pub recorded: u64,
    pub matched: u64,
    pub missed: u64,
    pub unmatched: u64,
    pub expired: u64,
    pub mean_error: Option<f64>,
    pub max_error: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EvaluationReport {
    pub stats: EvaluationStats,
    pub recent_expired: Vec<u64>,
}

/// Matches feedback against the ground truth of the frames that were sent.
///
/// Only the last `retention` records are kept. A record leaves the window once it is matched
/// or missed, or when it is evicted, in which case it counts as expired.
#[derive(Debug)]
pub struct ErrorEvaluator {
    pending: IndexMap<u64, GroundTruthRecord>,
    retention: usize,
    highest_recorded: Option<u64>,
    stats: EvaluationStats,
    error_sum: f64,
    recent_expired: VecDeque<u64>,
}

impl ErrorEvaluator {
    pub fn new(retention: usize) -> Self {
        Self {
            pending: IndexMap::new(),
            retention: retention.max(1),
            highest_recorded: None,
            stats: EvaluationStats::default(),
            error_sum: 0.0,
            recent_expired: VecDeque::with_capacity(RECENT_EXPIRED),
        }
    }

    pub fn record(&mut self, truth: GroundTruthRecord) {
        self.stats.recorded += 1;
        self.highest_recorded = Some(
            self.highest_recorded
                .map_or(truth.sequence_id, |id| id.max(truth.sequence_id)),
        );
        self.pending.insert(truth.sequence_id, truth);
        while self.pending.len() > self.retention {
            if let Some((sequence_id, _)) = self.pending.shift_remove_index(0) {
                self.expire(sequence_id);
            }
        }
    }

    fn expire(&mut self, sequence_id: u64) {
        self.stats.expired += 1;
        if self.recent_expired.len() == RECENT_EXPIRED {
            self.recent_expired.pop_front();
        }
        self.recent_expired.push_back(sequence_id);
    }

    pub fn on_feedback(&mut self, feedback: &FeedbackMessage) -> Evaluation {
        let sequence_id = feedback.sequence_id;
        let Some(truth) = self.pending.shift_remove(&sequence_id) else {
            self.stats.unmatched += 1;
            let reason = match self.highest_recorded {
                Some(highest) if sequence_id <= highest => UnmatchedReason::Late,
                _ => UnmatchedReason::NotRecorded,
            };
            debug!("Feedback for frame {} unmatched: {:?}", sequence_id, reason);
            return Evaluation::Unmatched {
                sequence_id,
                reason,
            };
        };

        if !feedback.found {
            self.stats.missed += 1;
            return Evaluation::Missed { sequence_id };
        }

        let sample = ErrorSample::between(&truth, feedback.x, feedback.y);
        self.stats.matched += 1;
        self.error_sum += sample.error_distance;
        self.stats.mean_error = Some(self.error_sum / self.stats.matched as f64);
        self.stats.max_error = Some(
            self.stats
                .max_error
                .map_or(sample.error_distance, |max| max.max(sample.error_distance)),
        );
        Evaluation::Matched(sample)
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn stats(&self) -> &EvaluationStats {
        &self.stats
    }

    /// Expires whatever is still waiting for feedback.
    pub fn finish(mut self) -> EvaluationReport {
        let remaining: Vec<u64> = self.pending.drain(..).map(|(id, _)| id).collect();
        for sequence_id in remaining {
            self.expire(sequence_id);
        }
        EvaluationReport {
            stats: self.stats,
            recent_expired: self.recent_expired.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn truth(sequence_id: u64, x: f64, y: f64) -> GroundTruthRecord {
        GroundTruthRecord {
            sequence_id,
            true_x: x,
            true_y: y,
        }
    }

    fn feedback(sequence_id: u64, x: f64, y: f64, found: bool) -> FeedbackMessage {
        FeedbackMessage {
            sequence_id,
            x,
            y,
            found,
        }
    }

    #[test]
    fn matching_feedback_yields_error_sample() {
        let mut evaluator = ErrorEvaluator::new(10);
        evaluator.record(truth(0, 100.0, 50.0));
        match evaluator.on_feedback(&feedback(0, 103.0, 54.0, true)) {
            Evaluation::Matched(sample) => {
                assert_eq!(sample.sequence_id, 0);
                assert!((sample.error_distance - 5.0).abs() < 1e-9);
                assert_eq!((sample.dx, sample.dy), (3.0, 4.0));
            }
            other => panic!("expected match, got {:?}", other),
        }
        assert!((evaluator.stats().mean_error.unwrap() - 5.0).abs() < 1e-9);
        assert_eq!(evaluator.pending(), 0);
    }

    #[test]
    fn second_feedback_for_same_frame_is_late() {
        let mut evaluator = ErrorEvaluator::new(10);
        evaluator.record(truth(3, 1.0, 1.0));
        evaluator.on_feedback(&feedback(3, 1.0, 1.0, true));
        assert_eq!(
            evaluator.on_feedback(&feedback(3, 1.0, 1.0, true)),
            Evaluation::Unmatched {
                sequence_id: 3,
                reason: UnmatchedReason::Late
            }
        );
    }

    #[test]
    fn unknown_id_is_not_recorded() {
        let mut evaluator = ErrorEvaluator::new(10);
        evaluator.record(truth(0, 1.0, 1.0));
        assert_eq!(
            evaluator.on_feedback(&feedback(9, 1.0, 1.0, true)),
            Evaluation::Unmatched {
                sequence_id: 9,
                reason: UnmatchedReason::NotRecorded
            }
        );
        assert_eq!(evaluator.stats().unmatched, 1);
    }

    #[test]
    fn not_found_counts_as_missed() {
        let mut evaluator = ErrorEvaluator::new(10);
        evaluator.record(truth(1, 1.0, 1.0));
        assert_eq!(
            evaluator.on_feedback(&feedback(1, 0.0, 0.0, false)),
            Evaluation::Missed { sequence_id: 1 }
        );
        assert_eq!(evaluator.stats().matched, 0);
        assert_eq!(evaluator.stats().mean_error, None);
    }

    #[test]
    fn feedback_out_of_order_matches_by_id() {
        let mut evaluator = ErrorEvaluator::new(10);
        for id in 0..8 {
            evaluator.record(truth(id, id as f64 * 10.0, 5.0));
        }
        let later = evaluator.on_feedback(&feedback(5, 51.0, 5.0, true));
        let earlier = evaluator.on_feedback(&feedback(3, 30.0, 7.0, true));
        match (later, earlier) {
            (Evaluation::Matched(later), Evaluation::Matched(earlier)) => {
                assert_eq!(later.sequence_id, 5);
                assert!((later.error_distance - 1.0).abs() < 1e-9);
                assert_eq!(earlier.sequence_id, 3);
                assert!((earlier.error_distance - 2.0).abs() < 1e-9);
            }
            other => panic!("expected two matches, got {:?}", other),
        }
        assert_eq!(evaluator.stats().matched, 2);
        assert_eq!(evaluator.stats().unmatched, 0);
        assert_eq!(evaluator.pending(), 6);
    }

    #[test]
    fn retention_window_expires_oldest() {
        let mut evaluator = ErrorEvaluator::new(3);
        for id in 0..5 {
            evaluator.record(truth(id, id as f64, 0.0));
        }
        assert_eq!(evaluator.pending(), 3);
        assert_eq!(evaluator.stats().expired, 2);
        assert_eq!(
            evaluator.on_feedback(&feedback(0, 0.0, 0.0, true)),
            Evaluation::Unmatched {
                sequence_id: 0,
                reason: UnmatchedReason::Late
            }
        );
        assert!(matches!(
            evaluator.on_feedback(&feedback(4, 4.0, 0.0, true)),
            Evaluation::Matched(_)
        ));
    }

    #[test]
    fn every_recorded_frame_is_accounted_for() {
        let mut evaluator = ErrorEvaluator::new(8);
        for id in 0..100 {
            evaluator.record(truth(id, 10.0, 10.0));
            if id % 3 == 0 {
                evaluator.on_feedback(&feedback(id, 11.0, 10.0, true));
            } else if id % 7 == 0 {
                evaluator.on_feedback(&feedback(id, 0.0, 0.0, false));
            }
        }
        let report = evaluator.finish();
        let stats = &report.stats;
        assert_eq!(stats.recorded, 100);
        assert_eq!(stats.matched + stats.missed + stats.expired, 100);
        assert_eq!(stats.max_error, Some(1.0));
        assert!(report.recent_expired.len() <= RECENT_EXPIRED);
        assert_eq!(report.recent_expired.last(), Some(&97));
    }
}
