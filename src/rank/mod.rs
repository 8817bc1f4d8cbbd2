//! Semantic re-ranking and two-tier result fusion
//!
//! This module handles:
//! - Scoring semantic candidates (remote similarity, local exact cosine, or a blend)
//! - Similarity threshold and candidate limit
//! - Fusing lexical and semantic rows: every lexical row precedes every semantic row

use crate::config::{RerankMode, SearchConfig};
use crate::embed::cosine_similarity;
use crate::lexical::LexicalHit;
use crate::store::VectorHit;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Which tier produced a row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Lexical,
    Semantic,
}

/// One row of a search result page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRow {
    /// Paragraph (or window) uid for lexical rows, block uid for semantic rows
    pub uid: String,
    pub paragraph_uid: String,
    pub section_uid: String,
    pub sermon_uid: String,
    pub section_number: Option<String>,
    pub text: String,
    /// bm25 cost, lexical rows only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rank: Option<f64>,
    /// Similarity, semantic rows only (higher is closer)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distance: Option<f32>,
    pub sermon_title: Option<String>,
    pub sermon_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_uid: Option<String>,
    pub tier: Tier,
}

impl From<LexicalHit> for ResultRow {
    fn from(hit: LexicalHit) -> Self {
        Self {
            uid: hit.uid,
            paragraph_uid: hit.paragraph_uid,
            section_uid: hit.section_uid,
            sermon_uid: hit.sermon_uid,
            section_number: hit.section_number,
            text: hit.text,
            rank: Some(hit.rank),
            distance: None,
            sermon_title: hit.sermon_title,
            sermon_date: hit.sermon_date,
            block_uid: None,
            tier: Tier::Lexical,
        }
    }
}

/// How a semantic candidate's final score is computed
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RerankStrategy {
    RemoteDistance,
    /// Exact cosine against the stored embedding; remote score when none is stored
    LocalCosine,
    /// `weight * local + (1 - weight) * remote`
    Blend { weight: f32 },
}

impl RerankStrategy {
    pub fn from_config(config: &SearchConfig) -> Self {
        match config.rerank {
            RerankMode::RemoteDistance => RerankStrategy::RemoteDistance,
            RerankMode::LocalCosine => RerankStrategy::LocalCosine,
            RerankMode::Blend => RerankStrategy::Blend {
                weight: config.blend_weight.clamp(0.0, 1.0),
            },
        }
    }

    /// Whether scoring needs the stored block embeddings
    pub fn needs_local_vectors(&self) -> bool {
        !matches!(self, RerankStrategy::RemoteDistance)
    }

    pub fn score(&self, remote: f32, local: Option<f32>) -> f32 {
        match (self, local) {
            (RerankStrategy::RemoteDistance, _) | (_, None) => remote,
            (RerankStrategy::LocalCosine, Some(local)) => local,
            (RerankStrategy::Blend { weight }, Some(local)) => {
                weight * local + (1.0 - weight) * remote
            }
        }
    }
}

/// A semantic candidate after re-ranking
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredHit {
    pub block_uid: String,
    pub paragraph_uid: String,
    pub remote_score: f32,
    pub local_score: Option<f32>,
    pub score: f32,
}

/// Re-ranks semantic candidates
pub struct Ranker {
    strategy: RerankStrategy,
    min_similarity: f32,
    limit: usize,
}

impl Ranker {
    pub fn new(strategy: RerankStrategy, min_similarity: f32, limit: usize) -> Self {
        Self {
            strategy,
            min_similarity,
            limit,
        }
    }

    pub fn from_config(config: &SearchConfig) -> Self {
        Self::new(
            RerankStrategy::from_config(config),
            config.min_similarity,
            config.semantic_limit,
        )
    }

    pub fn strategy(&self) -> RerankStrategy {
        self.strategy
    }

    /// Score, threshold, sort descending and truncate.
    ///
    /// `stored` maps block uid to its local embedding; it may be empty for
    /// [`RerankStrategy::RemoteDistance`].
    pub fn rank(
        &self,
        hits: Vec<VectorHit>,
        query_vector: &[f32],
        stored: &HashMap<String, Vec<f32>>,
    ) -> Vec<ScoredHit> {
        let mut scored: Vec<ScoredHit> = hits
            .into_iter()
            .map(|hit| {
                let local = if self.strategy.needs_local_vectors() {
                    stored
                        .get(&hit.block_uid)
                        .map(|v| cosine_similarity(query_vector, v))
                } else {
                    None
                };
                ScoredHit {
                    score: self.strategy.score(hit.score, local),
                    block_uid: hit.block_uid,
                    paragraph_uid: hit.paragraph_uid,
                    remote_score: hit.score,
                    local_score: local,
                }
            })
            .filter(|hit| hit.score >= self.min_similarity)
            .collect();

        scored.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.block_uid.cmp(&b.block_uid))
        });
        scored.truncate(self.limit);
        scored
    }
}

/// Merge the tiers: lexical rows in their given order, then semantic rows
/// whose paragraph no earlier row already covers.
///
/// Window rows cover every paragraph in `window_members`.
pub fn fuse(
    lexical: Vec<ResultRow>,
    semantic: Vec<ResultRow>,
    window_members: &HashMap<String, Vec<String>>,
) -> Vec<ResultRow> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut fused = Vec::with_capacity(lexical.len() + semantic.len());

    for row in lexical {
        match window_members.get(&row.uid) {
            Some(members) => seen.extend(members.iter().cloned()),
            None => {
                seen.insert(row.paragraph_uid.clone());
            }
        }
        fused.push(row);
    }

    for row in semantic {
        if seen.insert(row.paragraph_uid.clone()) {
            fused.push(row);
        }
    }

    fused
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(block: &str, paragraph: &str, score: f32) -> VectorHit {
        VectorHit {
            block_uid: block.to_string(),
            paragraph_uid: paragraph.to_string(),
            sermon_uid: "47-0412".to_string(),
            score,
        }
    }

    fn row(uid: &str, paragraph: &str, tier: Tier) -> ResultRow {
        ResultRow {
            uid: uid.to_string(),
            paragraph_uid: paragraph.to_string(),
            section_uid: "s1".to_string(),
            sermon_uid: "47-0412".to_string(),
            section_number: None,
            text: String::new(),
            rank: None,
            distance: None,
            sermon_title: None,
            sermon_date: None,
            block_uid: None,
            tier,
        }
    }

    #[test]
    fn test_remote_distance_ignores_local_vectors() {
        let ranker = Ranker::new(RerankStrategy::RemoteDistance, 0.0, 10);
        let stored = HashMap::from([("b1".to_string(), vec![0.0, 1.0])]);
        let ranked = ranker.rank(
            vec![hit("b1", "p1", 0.5), hit("b2", "p2", 0.9)],
            &[1.0, 0.0],
            &stored,
        );
        assert_eq!(ranked[0].block_uid, "b2");
        assert_eq!(ranked[1].score, 0.5);
        assert_eq!(ranked[1].local_score, None);
    }

    #[test]
    fn test_local_cosine_reorders_candidates() {
        let ranker = Ranker::new(RerankStrategy::LocalCosine, 0.0, 10);
        let stored = HashMap::from([
            ("b1".to_string(), vec![1.0, 0.0]),
            ("b2".to_string(), vec![0.6, 0.8]),
        ]);
        // Remote prefers b2, exact cosine prefers b1; b3 has no local vector
        let ranked = ranker.rank(
            vec![hit("b1", "p1", 0.5), hit("b2", "p2", 0.9), hit("b3", "p3", 0.7)],
            &[1.0, 0.0],
            &stored,
        );
        let order: Vec<&str> = ranked.iter().map(|h| h.block_uid.as_str()).collect();
        assert_eq!(order, vec!["b1", "b3", "b2"]);
        assert!((ranked[0].score - 1.0).abs() < 1e-6);
        assert_eq!(ranked[1].score, 0.7);
    }

    #[test]
    fn test_blend_weights_scores() {
        let strategy = RerankStrategy::Blend { weight: 0.25 };
        assert!((strategy.score(0.8, Some(0.4)) - 0.7).abs() < 1e-6);
        assert_eq!(strategy.score(0.8, None), 0.8);
    }

    #[test]
    fn test_threshold_and_limit() {
        let ranker = Ranker::new(RerankStrategy::RemoteDistance, 0.3, 2);
        let ranked = ranker.rank(
            vec![
                hit("a", "p1", 0.2),
                hit("b", "p2", 0.4),
                hit("c", "p3", 0.6),
                hit("d", "p4", 0.5),
            ],
            &[],
            &HashMap::new(),
        );
        let order: Vec<&str> = ranked.iter().map(|h| h.block_uid.as_str()).collect();
        assert_eq!(order, vec!["c", "d"]);
    }

    #[test]
    fn test_fuse_keeps_lexical_first_and_drops_covered_paragraphs() {
        let lexical = vec![row("p2", "p2", Tier::Lexical), row("p1", "p1", Tier::Lexical)];
        let semantic = vec![
            row("p1-b2", "p1", Tier::Semantic),
            row("p3-b1", "p3", Tier::Semantic),
            row("p3-b2", "p3", Tier::Semantic),
        ];

        let fused = fuse(lexical, semantic, &HashMap::new());
        let uids: Vec<&str> = fused.iter().map(|r| r.uid.as_str()).collect();
        assert_eq!(uids, vec!["p2", "p1", "p3-b1"]);

        let first_semantic = fused
            .iter()
            .position(|r| r.tier == Tier::Semantic)
            .unwrap();
        assert!(fused[first_semantic..].iter().all(|r| r.tier == Tier::Semantic));
    }

    #[test]
    fn test_fuse_window_rows_cover_all_members() {
        let lexical = vec![row("p1_w2", "p1", Tier::Lexical)];
        let semantic = vec![
            row("p2-b1", "p2", Tier::Semantic),
            row("p3-b1", "p3", Tier::Semantic),
        ];
        let members = HashMap::from([(
            "p1_w2".to_string(),
            vec!["p1".to_string(), "p2".to_string()],
        )]);

        let fused = fuse(lexical, semantic, &members);
        let uids: Vec<&str> = fused.iter().map(|r| r.uid.as_str()).collect();
        assert_eq!(uids, vec!["p1_w2", "p3-b1"]);
    }
}
