//! Gradient-boosted regression trees for the logistic loss.
//!
//! Each round fits a tree to the first and second derivatives of the log loss
//! at the current margin, as in XGBoost: a leaf's weight is `-G / (H + lambda)`
//! and a split is kept only when its structure gain exceeds `loss_reduction`.

use crate::types::DesignMatrix;
use ndarray::{Array1, ArrayView1, ArrayView2};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::index::sample;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use thiserror::Error;

/// Booster settings, named after their tidymodels counterparts.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoostParams {
    /// Number of boosting rounds.
    pub trees: usize,
    pub tree_depth: usize,
    /// Minimum hessian weight a child must carry.
    pub min_n: usize,
    /// Minimum structure gain needed to keep a split.
    pub loss_reduction: f64,
    /// Fraction of rows sampled for each tree.
    pub sample_size: f64,
    /// Columns considered at each split. `None` means all of them.
    pub mtry: Option<usize>,
    pub learn_rate: f64,
    /// L2 penalty on leaf weights.
    pub lambda: f64,
}

impl Default for BoostParams {
    fn default() -> Self {
        BoostParams {
            trees: 1000,
            tree_depth: 6,
            min_n: 1,
            loss_reduction: 0.0,
            sample_size: 1.0,
            mtry: None,
            learn_rate: 0.3,
            lambda: 1.0,
        }
    }
}

impl BoostParams {
    fn validate(&self) -> Result<(), BoostError> {
        if self.trees == 0 {
            return Err(BoostError::InvalidParameter("trees must be at least 1".into()));
        }
        if self.tree_depth == 0 {
            return Err(BoostError::InvalidParameter("tree_depth must be at least 1".into()));
        }
        if !(self.sample_size > 0.0 && self.sample_size <= 1.0) {
            return Err(BoostError::InvalidParameter(format!(
                "sample_size must lie in (0, 1], got {}",
                self.sample_size
            )));
        }
        if self.mtry == Some(0) {
            return Err(BoostError::InvalidParameter("mtry must be at least 1".into()));
        }
        if !(self.learn_rate > 0.0) || !(self.loss_reduction >= 0.0) || !(self.lambda >= 0.0) {
            return Err(BoostError::InvalidParameter(format!(
                "learn_rate must be positive and loss_reduction, lambda non-negative (got {}, {}, {})",
                self.learn_rate, self.loss_reduction, self.lambda
            )));
        }
        Ok(())
    }
}

#[derive(Error, Debug, PartialEq)]
pub enum BoostError {
    #[error("Invalid boosting parameter: {0}")]
    InvalidParameter(String),
    #[error("Cannot boost trees on an empty design matrix.")]
    EmptyDesign,
}

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    Leaf {
        weight: f64,
    },
}

/// A single regression tree stored as a flat node arena; node 0 is the root.
#[derive(Debug, Clone, PartialEq)]
struct Tree {
    nodes: Vec<Node>,
}

impl Tree {
    fn predict_row(&self, row: ArrayView1<f64>) -> f64 {
        let mut idx = 0;
        loop {
            match &self.nodes[idx] {
                Node::Leaf { weight } => return *weight,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    idx = if row[*feature] <= *threshold { *left } else { *right };
                }
            }
        }
    }

    fn n_leaves(&self) -> usize {
        self.nodes
            .iter()
            .filter(|n| matches!(n, Node::Leaf { .. }))
            .count()
    }
}

struct SplitCandidate {
    feature: usize,
    threshold: f64,
    gain: f64,
}

/// Immutable inputs shared by every node while growing one tree.
struct TreeBuilder<'a> {
    x: ArrayView2<'a, f64>,
    grad: &'a [f64],
    hess: &'a [f64],
    params: &'a BoostParams,
    mtry: usize,
}

impl TreeBuilder<'_> {
    fn leaf_weight(&self, g: f64, h: f64) -> f64 {
        -g / (h + self.params.lambda) * self.params.learn_rate
    }

    fn score(&self, g: f64, h: f64) -> f64 {
        g * g / (h + self.params.lambda)
    }

    fn grow(
        &self,
        rows: &[usize],
        depth: usize,
        rng: &mut StdRng,
        nodes: &mut Vec<Node>,
        gain_by_feature: &mut [f64],
    ) -> usize {
        let g: f64 = rows.iter().map(|&i| self.grad[i]).sum();
        let h: f64 = rows.iter().map(|&i| self.hess[i]).sum();

        let split = if depth < self.params.tree_depth && rows.len() >= 2 {
            self.best_split(rows, g, h, rng)
        } else {
            None
        };

        let Some(split) = split else {
            nodes.push(Node::Leaf {
                weight: self.leaf_weight(g, h),
            });
            return nodes.len() - 1;
        };

        let (left_rows, right_rows): (Vec<usize>, Vec<usize>) = rows
            .iter()
            .partition(|&&i| self.x[[i, split.feature]] <= split.threshold);

        gain_by_feature[split.feature] += split.gain;
        let idx = nodes.len();
        // Placeholder until both children are placed.
        nodes.push(Node::Leaf { weight: 0.0 });
        let left = self.grow(&left_rows, depth + 1, rng, nodes, gain_by_feature);
        let right = self.grow(&right_rows, depth + 1, rng, nodes, gain_by_feature);
        nodes[idx] = Node::Split {
            feature: split.feature,
            threshold: split.threshold,
            left,
            right,
        };
        idx
    }

    /// Exact greedy search over the sampled columns. Thresholds sit halfway
    /// between consecutive distinct values.
    fn best_split(&self, rows: &[usize], g: f64, h: f64, rng: &mut StdRng) -> Option<SplitCandidate> {
        let p = self.x.ncols();
        let features: Vec<usize> = if self.mtry >= p {
            (0..p).collect()
        } else {
            let mut f = sample(rng, p, self.mtry).into_vec();
            f.sort_unstable();
            f
        };

        let parent = self.score(g, h);
        let min_child = self.params.min_n as f64;
        let mut best: Option<SplitCandidate> = None;

        let mut sorted: Vec<(f64, f64, f64)> = Vec::with_capacity(rows.len());
        for &feature in &features {
            sorted.clear();
            sorted.extend(rows.iter().map(|&i| (self.x[[i, feature]], self.grad[i], self.hess[i])));
            sorted.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(Ordering::Equal));

            let mut gl = 0.0;
            let mut hl = 0.0;
            for k in 0..sorted.len() - 1 {
                gl += sorted[k].1;
                hl += sorted[k].2;
                if sorted[k].0 == sorted[k + 1].0 {
                    continue;
                }
                let hr = h - hl;
                if hl < min_child || hr < min_child {
                    continue;
                }
                let gr = g - gl;
                let gain = 0.5 * (self.score(gl, hl) + self.score(gr, hr) - parent);
                if gain > self.params.loss_reduction
                    && best.as_ref().is_none_or(|b| gain > b.gain)
                {
                    best = Some(SplitCandidate {
                        feature,
                        threshold: 0.5 * (sorted[k].0 + sorted[k + 1].0),
                        gain,
                    });
                }
            }
        }
        best
    }
}

/// A fitted ensemble.
#[derive(Debug, Clone, PartialEq)]
pub struct BoostFit {
    pub feature_names: Vec<String>,
    trees: Vec<Tree>,
    base_margin: f64,
    gain_by_feature: Vec<f64>,
}

impl BoostFit {
    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    fn margin(&self, x: ArrayView2<f64>) -> Array1<f64> {
        Array1::from_iter(x.rows().into_iter().map(|row| {
            self.base_margin + self.trees.iter().map(|t| t.predict_row(row)).sum::<f64>()
        }))
    }

    pub fn predict_proba(&self, x: ArrayView2<f64>) -> Array1<f64> {
        crate::glm::inverse_logit(&self.margin(x))
    }

    /// Total split gain per feature, scaled to sum to one. All zeros when no
    /// tree ever split.
    pub fn gain_importance(&self) -> Vec<(String, f64)> {
        let total: f64 = self.gain_by_feature.iter().sum();
        self.feature_names
            .iter()
            .zip(&self.gain_by_feature)
            .map(|(name, &g)| (name.clone(), if total > 0.0 { g / total } else { 0.0 }))
            .collect()
    }
}

/// Boosts `params.trees` rounds on `design`. Row and column sampling draw
/// from a generator seeded with `seed`.
pub fn fit_boost(design: &DesignMatrix, params: &BoostParams, seed: u64) -> Result<BoostFit, BoostError> {
    params.validate()?;
    let n = design.n_rows();
    let p = design.n_features();
    if n == 0 || p == 0 {
        return Err(BoostError::EmptyDesign);
    }

    let mtry = params.mtry.unwrap_or(p).min(p);
    let rows_per_tree = ((n as f64 * params.sample_size).floor() as usize).clamp(1, n);
    let mut rng = StdRng::seed_from_u64(seed);

    let y = design.y.to_vec();
    let mut margin: Vec<f64> = vec![0.0; n];
    let mut grad = vec![0.0; n];
    let mut hess = vec![0.0; n];
    let mut gain_by_feature = vec![0.0; p];
    let mut trees = Vec::with_capacity(params.trees);

    for round in 0..params.trees {
        for i in 0..n {
            let prob = 1.0 / (1.0 + (-margin[i]).exp());
            grad[i] = prob - y[i];
            hess[i] = (prob * (1.0 - prob)).max(1e-16);
        }

        let mut rows: Vec<usize> = if rows_per_tree == n {
            (0..n).collect()
        } else {
            sample(&mut rng, n, rows_per_tree).into_vec()
        };
        rows.sort_unstable();

        let builder = TreeBuilder {
            x: design.x.view(),
            grad: &grad,
            hess: &hess,
            params,
            mtry,
        };
        let mut nodes = Vec::new();
        builder.grow(&rows, 0, &mut rng, &mut nodes, &mut gain_by_feature);
        let tree = Tree { nodes };

        for (i, m) in margin.iter_mut().enumerate() {
            *m += tree.predict_row(design.x.row(i));
        }
        if (round + 1) % 250 == 0 {
            log::debug!(
                "[Boost Round #{}] last tree has {} leaves",
                round + 1,
                tree.n_leaves()
            );
        }
        trees.push(tree);
    }

    log::debug!(
        "Boosted {} trees on {} rows x {} features (mtry {}, {} rows per tree)",
        trees.len(),
        n,
        p,
        mtry,
        rows_per_tree
    );

    Ok(BoostFit {
        feature_names: design.names.clone(),
        trees,
        base_margin: 0.0,
        gain_by_feature,
    })
}
