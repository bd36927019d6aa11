//! Random-forest classifier artifacts.
//!
//! A model artifact is a JSON export of a fitted forest:
//!
//! ```json
//! {
//!   "features": ["age", "income"],
//!   "classes":  [0, 1],
//!   "trees": [
//!     { "nodes": [
//!       { "feature": 0, "threshold": 40.5, "left": 1, "right": 2 },
//!       { "value": [30.0, 10.0] },
//!       { "value": [5.0, 25.0] }
//!     ] }
//!   ]
//! }
//! ```
//!
//! Node `0` is the root. A sample goes left when its feature value is less
//! than or equal to the threshold. Leaf weights are normalised per tree and
//! the class distribution is the mean across trees.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ForestError {
  #[error("artifact is not a forest export: {0}")]
  Parse(#[from] serde_json::Error),

  #[error("malformed forest: {0}")]
  Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Node {
  Split {
    feature:   usize,
    threshold: f64,
    left:      usize,
    right:     usize,
  },
  Leaf {
    value: Vec<f64>,
  },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tree {
  pub nodes: Vec<Node>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForestModel {
  pub features: Vec<String>,
  /// Class labels, in the order of the leaf weight vectors.
  pub classes:  Vec<Value>,
  pub trees:    Vec<Tree>,
}

impl ForestModel {
  /// Parse and validate an artifact.
  pub fn from_slice(bytes: &[u8]) -> Result<Self, ForestError> {
    let model: Self = serde_json::from_slice(bytes)?;
    model.validate()?;
    Ok(model)
  }

  /// Check that every walk from a root ends at a leaf of the right width.
  ///
  /// Children must come after their parent, which rules out cycles.
  pub fn validate(&self) -> Result<(), ForestError> {
    let invalid = |msg: String| Err(ForestError::Invalid(msg));
    if self.classes.is_empty() {
      return invalid("no classes".into());
    }
    if self.trees.is_empty() {
      return invalid("no trees".into());
    }

    for (t, tree) in self.trees.iter().enumerate() {
      if tree.nodes.is_empty() {
        return invalid(format!("tree {t} has no nodes"));
      }
      for (i, node) in tree.nodes.iter().enumerate() {
        match node {
          Node::Split { feature, left, right, .. } => {
            if *feature >= self.features.len() {
              return invalid(format!("tree {t} node {i}: unknown feature {feature}"));
            }
            for child in [*left, *right] {
              if child <= i || child >= tree.nodes.len() {
                return invalid(format!("tree {t} node {i}: bad child {child}"));
              }
            }
          }
          Node::Leaf { value } => {
            if value.len() != self.classes.len() {
              return invalid(format!(
                "tree {t} node {i}: {} weights for {} classes",
                value.len(),
                self.classes.len()
              ));
            }
          }
        }
      }
    }
    Ok(())
  }

  /// Mean class distribution for one sample, ordered like `features`.
  pub fn predict_proba(&self, sample: &[f64]) -> Vec<f64> {
    let mut total = vec![0.0; self.classes.len()];
    for tree in &self.trees {
      let leaf = tree.leaf_for(sample);
      let sum: f64 = leaf.iter().sum();
      if sum > 0.0 {
        for (acc, w) in total.iter_mut().zip(leaf) {
          *acc += w / sum;
        }
      }
    }
    let n = self.trees.len() as f64;
    total.iter_mut().for_each(|p| *p /= n);
    total
  }

  /// Most probable class and its probability. Ties go to the earlier class.
  pub fn predict(&self, sample: &[f64]) -> (&Value, f64) {
    let proba = self.predict_proba(sample);
    let (best, p) = proba
      .iter()
      .copied()
      .enumerate()
      .fold((0, f64::MIN), |acc, (i, p)| if p > acc.1 { (i, p) } else { acc });
    (&self.classes[best], p)
  }
}

impl Tree {
  fn leaf_for(&self, sample: &[f64]) -> &[f64] {
    let mut i = 0;
    loop {
      match &self.nodes[i] {
        Node::Leaf { value } => return value,
        Node::Split { feature, threshold, left, right } => {
          i = if sample[*feature] <= *threshold { *left } else { *right };
        }
      }
    }
  }
}
