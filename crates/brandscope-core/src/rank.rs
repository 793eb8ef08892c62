//! Borda-style aggregation of blinded-response rankings.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::blind::BlindMapping;
use crate::score::ConsensusLevel;

/// One candidate's position in one judge's ordering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankedCandidate {
    pub blind_id: String,
    /// 1-based rank; 1 is best.
    pub rank: usize,
}

/// One judge's full ordering over every blinded response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Evaluation {
    pub judge: String,
    pub ranking: Vec<RankedCandidate>,
}

/// Aggregated outcome for one candidate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatedRank {
    pub blind_id: String,
    pub engine_id: String,
    pub average_rank: f64,
    pub borda_score: usize,
    pub individual_ranks: Vec<usize>,
    /// Normalized inverse-variance agreement in `[0, 1]`.
    pub agreement: f64,
    /// Contiguous 1..N with no gaps or ties.
    pub final_rank: usize,
}

/// Full aggregation result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankOutcome {
    /// Sorted by `final_rank` ascending.
    pub rankings: Vec<AggregatedRank>,
    /// Engine id of the candidate with `final_rank == 1`.
    pub winner: String,
    pub consensus: ConsensusLevel,
}

/// Misuse of the aggregator is a programmer error and fails loudly.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RankAggregationError {
    #[error("cannot aggregate an empty evaluation set")]
    EmptyEvaluations,
    #[error("cannot aggregate over an empty blind mapping")]
    EmptyMapping,
    #[error("judge `{judge}` ranked unknown candidate `{blind_id}`")]
    UnknownCandidate { judge: String, blind_id: String },
    #[error("judge `{judge}` did not rank candidate `{blind_id}`")]
    MissingCandidate { judge: String, blind_id: String },
    #[error("judge `{judge}` assigned ranks that are not a permutation of 1..={expected}")]
    InvalidRanks { judge: String, expected: usize },
}

/// Combine one or more judges' orderings of blinded responses into a final
/// order with deterministic tie-breaking.
///
/// The sort key (average rank, then Borda score, then agreement, then
/// lexicographic blind id) is a total order, so `final_rank` is always a
/// contiguous permutation `1..=N`, and permuting the input evaluations never
/// changes the result.
pub fn aggregate_rankings(
    evaluations: &[Evaluation],
    mapping: &BlindMapping,
) -> Result<RankOutcome, RankAggregationError> {
    if evaluations.is_empty() {
        return Err(RankAggregationError::EmptyEvaluations);
    }
    if mapping.is_empty() {
        return Err(RankAggregationError::EmptyMapping);
    }

    let candidate_count = mapping.len();
    let mut ranks_by_candidate: BTreeMap<&str, Vec<usize>> =
        mapping.blind_ids().map(|id| (id, Vec::new())).collect();

    for (index, evaluation) in evaluations.iter().enumerate() {
        let mut seen_ranks = vec![false; candidate_count];
        for ranked in &evaluation.ranking {
            let Some(ranks) = ranks_by_candidate.get_mut(ranked.blind_id.as_str()) else {
                return Err(RankAggregationError::UnknownCandidate {
                    judge: evaluation.judge.clone(),
                    blind_id: ranked.blind_id.clone(),
                });
            };
            // A candidate ranked twice shows up as a length mismatch here.
            if ranked.rank < 1
                || ranked.rank > candidate_count
                || seen_ranks[ranked.rank - 1]
                || ranks.len() > index
            {
                return Err(RankAggregationError::InvalidRanks {
                    judge: evaluation.judge.clone(),
                    expected: candidate_count,
                });
            }
            seen_ranks[ranked.rank - 1] = true;
            ranks.push(ranked.rank);
        }
        // A full ordering ranks every candidate exactly once.
        if let Some((blind_id, _)) = ranks_by_candidate
            .iter()
            .find(|(_, ranks)| ranks.len() <= index)
        {
            return Err(RankAggregationError::MissingCandidate {
                judge: evaluation.judge.clone(),
                blind_id: (*blind_id).to_string(),
            });
        }
    }

    let mut aggregated: Vec<AggregatedRank> = ranks_by_candidate
        .into_iter()
        .map(|(blind_id, individual_ranks)| {
            let borda_score: usize = individual_ranks
                .iter()
                .map(|rank| candidate_count - rank)
                .sum();
            let average_rank = individual_ranks.iter().sum::<usize>() as f64
                / individual_ranks.len() as f64;
            let agreement = agreement_score(&individual_ranks);
            AggregatedRank {
                blind_id: blind_id.to_string(),
                engine_id: mapping.engine_of(blind_id).unwrap_or_default().to_string(),
                average_rank,
                borda_score,
                individual_ranks,
                agreement,
                final_rank: 0,
            }
        })
        .collect();

    aggregated.sort_by(|a, b| {
        a.average_rank
            .partial_cmp(&b.average_rank)
            .unwrap_or(Ordering::Equal)
            .then_with(|| b.borda_score.cmp(&a.borda_score))
            .then_with(|| {
                b.agreement
                    .partial_cmp(&a.agreement)
                    .unwrap_or(Ordering::Equal)
            })
            .then_with(|| a.blind_id.cmp(&b.blind_id))
    });
    for (position, entry) in aggregated.iter_mut().enumerate() {
        entry.final_rank = position + 1;
    }

    let mean_agreement =
        aggregated.iter().map(|r| r.agreement).sum::<f64>() / aggregated.len() as f64;
    let consensus = consensus_from_agreement(mean_agreement);
    let winner = aggregated[0].engine_id.clone();
    debug!(candidates = aggregated.len(), evaluations = evaluations.len(), %winner, "rank aggregation completed");

    Ok(RankOutcome {
        rankings: aggregated,
        winner,
        consensus,
    })
}

/// `1 − variance / max_possible_variance`, clamped to `[0, 1]`. The maximum
/// possible variance is derived from the observed min/max rank spread; a
/// single evaluation or zero spread yields perfect agreement.
fn agreement_score(ranks: &[usize]) -> f64 {
    if ranks.len() <= 1 {
        return 1.0;
    }
    let min = *ranks.iter().min().unwrap_or(&0) as f64;
    let max = *ranks.iter().max().unwrap_or(&0) as f64;
    if (max - min).abs() < f64::EPSILON {
        return 1.0;
    }
    let mean = ranks.iter().sum::<usize>() as f64 / ranks.len() as f64;
    let variance = ranks
        .iter()
        .map(|&rank| {
            let diff = rank as f64 - mean;
            diff * diff
        })
        .sum::<f64>()
        / ranks.len() as f64;
    let max_variance = ((max - min) / 2.0).powi(2);
    (1.0 - variance / max_variance).clamp(0.0, 1.0)
}

fn consensus_from_agreement(mean_agreement: f64) -> ConsensusLevel {
    if mean_agreement >= 0.85 {
        ConsensusLevel::Strong
    } else if mean_agreement >= 0.6 {
        ConsensusLevel::Moderate
    } else if mean_agreement >= 0.35 {
        ConsensusLevel::Weak
    } else {
        ConsensusLevel::None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blind::{blind_responses_with, EngineResponse};
    use proptest::prelude::*;
    use rand::rngs::StdRng;
    use rand::seq::SliceRandom;
    use rand::SeedableRng;

    fn mapping_for(count: usize) -> BlindMapping {
        let responses: Vec<_> = (0..count)
            .map(|i| EngineResponse {
                engine_id: format!("engine-{i}"),
                content: format!("answer {i}"),
                token_count: 50,
            })
            .collect();
        blind_responses_with(&responses, &mut StdRng::seed_from_u64(42))
            .unwrap()
            .mapping
    }

    fn evaluation(judge: &str, order: &[(&str, usize)]) -> Evaluation {
        Evaluation {
            judge: judge.to_string(),
            ranking: order
                .iter()
                .map(|(blind_id, rank)| RankedCandidate {
                    blind_id: (*blind_id).to_string(),
                    rank: *rank,
                })
                .collect(),
        }
    }

    #[test]
    fn single_evaluation_has_perfect_agreement() {
        let mapping = mapping_for(3);
        let eval = evaluation(
            "judge-1",
            &[("Response A", 2), ("Response B", 1), ("Response C", 3)],
        );
        let outcome = aggregate_rankings(&[eval], &mapping).unwrap();
        assert!(outcome.rankings.iter().all(|r| (r.agreement - 1.0).abs() < f64::EPSILON));
        assert_eq!(outcome.consensus, ConsensusLevel::Strong);
        assert_eq!(outcome.rankings[0].blind_id, "Response B");
    }

    #[test]
    fn borda_scores_follow_positions() {
        let mapping = mapping_for(3);
        let evals = [
            evaluation("j1", &[("Response A", 1), ("Response B", 2), ("Response C", 3)]),
            evaluation("j2", &[("Response A", 1), ("Response B", 3), ("Response C", 2)]),
        ];
        let outcome = aggregate_rankings(&evals, &mapping).unwrap();
        let a = outcome.rankings.iter().find(|r| r.blind_id == "Response A").unwrap();
        // (3-1) + (3-1) = 4.
        assert_eq!(a.borda_score, 4);
        assert_eq!(a.final_rank, 1);
        assert!((a.average_rank - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn fully_tied_averages_break_deterministically_by_blind_id() {
        let mapping = mapping_for(2);
        // Two judges flip each other: both candidates average 1.5 with equal
        // Borda and agreement, so the lexicographic tail decides.
        let evals = [
            evaluation("j1", &[("Response A", 1), ("Response B", 2)]),
            evaluation("j2", &[("Response A", 2), ("Response B", 1)]),
        ];
        let outcome = aggregate_rankings(&evals, &mapping).unwrap();
        assert_eq!(outcome.rankings[0].blind_id, "Response A");
        assert_eq!(outcome.rankings[0].final_rank, 1);
        assert_eq!(outcome.rankings[1].blind_id, "Response B");
        assert_eq!(outcome.rankings[1].final_rank, 2);
    }

    #[test]
    fn empty_inputs_fail_loudly() {
        let mapping = mapping_for(2);
        assert_eq!(
            aggregate_rankings(&[], &mapping).unwrap_err(),
            RankAggregationError::EmptyEvaluations
        );
    }

    #[test]
    fn unknown_and_invalid_ranks_are_rejected() {
        let mapping = mapping_for(2);
        let unknown = evaluation("j1", &[("Response Z", 1), ("Response A", 2)]);
        assert!(matches!(
            aggregate_rankings(&[unknown], &mapping).unwrap_err(),
            RankAggregationError::UnknownCandidate { .. }
        ));

        let out_of_range = evaluation("j1", &[("Response A", 1), ("Response B", 5)]);
        assert!(matches!(
            aggregate_rankings(&[out_of_range], &mapping).unwrap_err(),
            RankAggregationError::InvalidRanks { .. }
        ));

        let duplicate = evaluation("j1", &[("Response A", 1), ("Response B", 1)]);
        assert!(matches!(
            aggregate_rankings(&[duplicate], &mapping).unwrap_err(),
            RankAggregationError::InvalidRanks { .. }
        ));

        let missing = evaluation("j1", &[("Response A", 1)]);
        assert!(matches!(
            aggregate_rankings(&[missing], &mapping).unwrap_err(),
            RankAggregationError::MissingCandidate { .. }
        ));
    }

    #[test]
    fn disagreement_lowers_agreement_score() {
        let mapping = mapping_for(4);
        // Candidate A gets ranks 1 and 4 (max spread), B gets 2 and 2.
        let evals = [
            evaluation(
                "j1",
                &[("Response A", 1), ("Response B", 2), ("Response C", 3), ("Response D", 4)],
            ),
            evaluation(
                "j2",
                &[("Response A", 4), ("Response B", 2), ("Response C", 3), ("Response D", 1)],
            ),
        ];
        let outcome = aggregate_rankings(&evals, &mapping).unwrap();
        let a = outcome.rankings.iter().find(|r| r.blind_id == "Response A").unwrap();
        let b = outcome.rankings.iter().find(|r| r.blind_id == "Response B").unwrap();
        assert!(a.agreement < b.agreement);
        assert!((b.agreement - 1.0).abs() < f64::EPSILON);
        // Ranks 1 and 4: variance 2.25 equals max variance for that spread.
        assert!(a.agreement.abs() < f64::EPSILON);
    }

    proptest! {
        #[test]
        fn final_ranks_are_always_a_contiguous_permutation(
            count in 2usize..8,
            seed in 0u64..500,
        ) {
            let mapping = mapping_for(count);
            let ids: Vec<String> = mapping.blind_ids().map(str::to_string).collect();
            let mut rng = StdRng::seed_from_u64(seed);
            let mut evals = Vec::new();
            for judge in 0..3 {
                let mut order: Vec<usize> = (1..=count).collect();
                order.shuffle(&mut rng);
                evals.push(Evaluation {
                    judge: format!("judge-{judge}"),
                    ranking: ids
                        .iter()
                        .zip(order.iter())
                        .map(|(blind_id, rank)| RankedCandidate {
                            blind_id: blind_id.clone(),
                            rank: *rank,
                        })
                        .collect(),
                });
            }
            let outcome = aggregate_rankings(&evals, &mapping).unwrap();
            let mut finals: Vec<usize> = outcome.rankings.iter().map(|r| r.final_rank).collect();
            finals.sort_unstable();
            let expected: Vec<usize> = (1..=count).collect();
            prop_assert_eq!(finals, expected);
        }

        #[test]
        fn aggregation_is_evaluation_order_independent(
            count in 2usize..6,
            seed in 0u64..500,
        ) {
            let mapping = mapping_for(count);
            let ids: Vec<String> = mapping.blind_ids().map(str::to_string).collect();
            let mut rng = StdRng::seed_from_u64(seed);
            let mut evals = Vec::new();
            for judge in 0..4 {
                let mut order: Vec<usize> = (1..=count).collect();
                order.shuffle(&mut rng);
                evals.push(Evaluation {
                    judge: format!("judge-{judge}"),
                    ranking: ids
                        .iter()
                        .zip(order.iter())
                        .map(|(blind_id, rank)| RankedCandidate {
                            blind_id: blind_id.clone(),
                            rank: *rank,
                        })
                        .collect(),
                });
            }
            let forward = aggregate_rankings(&evals, &mapping).unwrap();
            let mut reversed = evals.clone();
            reversed.reverse();
            let backward = aggregate_rankings(&reversed, &mapping).unwrap();

            for (f, b) in forward.rankings.iter().zip(backward.rankings.iter()) {
                prop_assert_eq!(&f.blind_id, &b.blind_id);
                prop_assert_eq!(f.final_rank, b.final_rank);
            }
            prop_assert_eq!(forward.winner, backward.winner);
        }
    }
}
