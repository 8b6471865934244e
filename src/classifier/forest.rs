// Gradient-boosted decision forest read from a JSON weight file
//
// File layout:
//   { "variables": [...], "offset": 0.0,
//     "trees": [ { "weight": 0.1, "nodes": [ {"feature": 0, "threshold": 1.5, "left": 1, "right": 2},
//                                           {"value": -1.0}, {"value": 1.0} ] } ] }
//
// Node 0 is the root. A split sends x[feature] < threshold to `left`.
// The response is tanh(offset + sum of weight * leaf), in [-1, 1].

use std::fs;
use std::path::Path;

use serde::Deserialize;
use tracing::info;

use super::{TrackFeatures, TrackScorer, FEATURE_NAMES};
use crate::error::{AnalyzerError, Result};

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum Node {
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    Leaf {
        value: f64,
    },
}

#[derive(Debug, Clone, Deserialize)]
struct Tree {
    weight: f64,
    nodes: Vec<Node>,
}

#[derive(Debug, Clone, Deserialize)]
struct ModelFile {
    variables: Vec<String>,
    trees: Vec<Tree>,
    #[serde(default)]
    offset: f64,
}

/// Boosted forest classifier, immutable once loaded
#[derive(Debug, Clone)]
pub struct BoostedForest {
    trees: Vec<Tree>,
    offset: f64,
}

impl BoostedForest {
    /// Loads and validates a weight file. Any problem is fatal for the run.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| {
            AnalyzerError::Model(format!("cannot read weight file {}: {}", path.display(), e))
        })?;
        let forest = Self::from_json(&text)?;
        info!(
            path = %path.display(),
            trees = forest.trees.len(),
            "Loaded classifier weights"
        );
        Ok(forest)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let model: ModelFile = serde_json::from_str(text)
            .map_err(|e| AnalyzerError::Model(format!("malformed weight file: {}", e)))?;

        if model.variables.len() != FEATURE_NAMES.len()
            || model.variables.iter().zip(FEATURE_NAMES).any(|(a, b)| a != b)
        {
            return Err(AnalyzerError::Model(format!(
                "variables {:?} do not match expected {:?}",
                model.variables, FEATURE_NAMES
            )));
        }
        if model.trees.is_empty() {
            return Err(AnalyzerError::Model("forest has no trees".to_string()));
        }
        for (t, tree) in model.trees.iter().enumerate() {
            validate_tree(tree).map_err(|msg| AnalyzerError::Model(format!("tree {}: {}", t, msg)))?;
        }

        Ok(Self {
            trees: model.trees,
            offset: model.offset,
        })
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    /// Raw forest response before the tanh
    fn raw(&self, x: &[f64; 7]) -> f64 {
        self.offset + self.trees.iter().map(|t| t.weight * leaf_value(t, x)).sum::<f64>()
    }
}

/// Children must come after their parent, so every walk reaches a leaf
fn validate_tree(tree: &Tree) -> std::result::Result<(), String> {
    if tree.nodes.is_empty() {
        return Err("no nodes".to_string());
    }
    for (i, node) in tree.nodes.iter().enumerate() {
        if let Node::Split { feature, left, right, .. } = *node {
            if feature >= FEATURE_NAMES.len() {
                return Err(format!("node {} uses unknown feature {}", i, feature));
            }
            for child in [left, right] {
                if child <= i || child >= tree.nodes.len() {
                    return Err(format!("node {} has invalid child {}", i, child));
                }
            }
        }
    }
    Ok(())
}

fn leaf_value(tree: &Tree, x: &[f64; 7]) -> f64 {
    let mut idx = 0;
    loop {
        match tree.nodes[idx] {
            Node::Leaf { value } => return value,
            Node::Split {
                feature,
                threshold,
                left,
                right,
            } => idx = if x[feature] < threshold { left } else { right },
        }
    }
}

impl TrackScorer for BoostedForest {
    fn score(&self, features: &TrackFeatures) -> f64 {
        self.raw(&features.to_array()).tanh()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VARIABLES: &str = r#"["mva_track_pt", "mva_track_eta", "mva_track_nchi2", "mva_track_nhits",
        "mva_ntrk10", "mva_drSig", "mva_track_isinjet"]"#;

    fn model(trees: &str, offset: f64) -> String {
        format!(r#"{{"variables": {}, "offset": {}, "trees": {}}}"#, VARIABLES, offset, trees)
    }

    fn stump(feature: usize, threshold: f64, weight: f64) -> String {
        format!(
            r#"{{"weight": {}, "nodes": [{{"feature": {}, "threshold": {}, "left": 1, "right": 2}},
                {{"value": -1.0}}, {{"value": 1.0}}]}}"#,
            weight, feature, threshold
        )
    }

    #[test]
    fn test_single_stump() {
        let forest = BoostedForest::from_json(&model(&format!("[{}]", stump(5, 10.0, 0.5)), 0.0)).unwrap();
        assert_eq!(forest.n_trees(), 1);
        let low = TrackFeatures { dr_sig: 6.0, ..Default::default() };
        let high = TrackFeatures { dr_sig: 20.0, ..Default::default() };
        assert!((forest.score(&low) - (-0.5_f64).tanh()).abs() < 1e-12);
        assert!((forest.score(&high) - 0.5_f64.tanh()).abs() < 1e-12);
    }

    #[test]
    fn test_forest_sums_trees_and_offset() {
        let trees = format!("[{}, {}]", stump(0, 2.0, 0.3), stump(4, 1.0, 0.2));
        let forest = BoostedForest::from_json(&model(&trees, 0.1)).unwrap();
        let f = TrackFeatures { pt: 5.0, ntrk10: 0.0, ..Default::default() };
        // +0.3 from the pt stump, -0.2 from the ntrk10 stump
        let expected = (0.1_f64 + 0.3 - 0.2).tanh();
        assert!((forest.score(&f) - expected).abs() < 1e-12);
        assert!(forest.score(&f).abs() <= 1.0);
    }

    #[test]
    fn test_rejects_wrong_variables() {
        let text = r#"{"variables": ["a"], "trees": [{"weight": 1.0, "nodes": [{"value": 0.0}]}]}"#;
        assert!(matches!(BoostedForest::from_json(text), Err(AnalyzerError::Model(_))));
    }

    #[test]
    fn test_rejects_bad_structure() {
        // Child pointing backwards would loop forever
        let looping = r#"[{"weight": 1.0, "nodes": [{"feature": 0, "threshold": 1.0, "left": 0, "right": 1}, {"value": 1.0}]}]"#;
        assert!(BoostedForest::from_json(&model(looping, 0.0)).is_err());

        let unknown_feature = format!("[{}]", stump(9, 1.0, 1.0));
        assert!(BoostedForest::from_json(&model(&unknown_feature, 0.0)).is_err());

        assert!(BoostedForest::from_json(&model("[]", 0.0)).is_err());
        assert!(BoostedForest::from_json("not json").is_err());
    }

    #[test]
    fn test_load_missing_file_is_model_error() {
        let err = BoostedForest::load(Path::new("/nonexistent/weights.json")).unwrap_err();
        assert!(matches!(err, AnalyzerError::Model(_)));
    }
}
