//! Random-forest category model.
//!
//! Each file is reduced to three categorical features: its extension, a
//! logarithmic size bucket and its media-type family. A forest of CART trees
//! is grown on bootstrap resamples, each split drawing from a random subset
//! of the features; prediction is a majority vote.
//!
//! The trained model is stored as a JSON artifact. The organizer never looks
//! inside it and only calls [`ForestModel::predict`].

use crate::file_category::{CategoryLabel, ClassifierError, ClassifierResult, FileMetadata};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::Path;

const ARTIFACT_VERSION: u32 = 1;
const FEATURE_COUNT: usize = 3;
const EXTENSION: usize = 0;
const SIZE_BUCKET: usize = 1;
const MEDIA_FAMILY: usize = 2;
const MAX_SIZE_BUCKET: u32 = 40;

/// Encoded feature vector: `[extension code, size bucket, media family code]`.
/// Code 0 means "not seen during training".
pub type Features = [u32; FEATURE_COUNT];

/// One training example.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabeledSample {
    #[serde(flatten)]
    pub metadata: FileMetadata,
    pub category: CategoryLabel,
}

impl LabeledSample {
    pub fn new(metadata: FileMetadata, category: impl Into<String>) -> Self {
        Self {
            metadata,
            category: CategoryLabel::new(category.into()),
        }
    }
}

/// Hyperparameters for growing a forest.
#[derive(Debug, Clone, PartialEq)]
pub struct ForestParams {
    pub trees: usize,
    pub max_depth: usize,
    pub min_samples_split: usize,
    pub seed: u64,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            trees: 25,
            max_depth: 8,
            min_samples_split: 2,
            seed: 42,
        }
    }
}

/// Maps raw metadata onto [`Features`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeatureEncoder {
    extensions: Vec<String>,
    families: Vec<String>,
}

/// `floor(log2(size + 1))`, capped.
fn size_bucket(size: u64) -> u32 {
    let bits = 63 - size.saturating_add(1).leading_zeros();
    bits.min(MAX_SIZE_BUCKET)
}

fn code_of(vocabulary: &[String], value: &str) -> u32 {
    vocabulary
        .binary_search_by(|probe| probe.as_str().cmp(value))
        .map(|idx| idx as u32 + 1)
        .unwrap_or(0)
}

impl FeatureEncoder {
    /// Builds the vocabularies from the training samples.
    pub fn fit<'a>(samples: impl IntoIterator<Item = &'a FileMetadata>) -> Self {
        let mut extensions = BTreeSet::new();
        let mut families = BTreeSet::new();
        for metadata in samples {
            extensions.insert(metadata.extension().unwrap_or_default());
            families.insert(metadata.media_family());
        }
        Self {
            extensions: extensions.into_iter().collect(),
            families: families.into_iter().collect(),
        }
    }

    pub fn encode(&self, metadata: &FileMetadata) -> Features {
        let extension = metadata.extension().unwrap_or_default();
        [
            code_of(&self.extensions, &extension),
            size_bucket(metadata.size_bytes),
            code_of(&self.families, &metadata.media_family()),
        ]
    }

    /// True when neither the extension nor the media family was seen in training.
    pub fn is_unfamiliar(&self, features: &Features) -> bool {
        features[EXTENSION] == 0 && features[MEDIA_FAMILY] == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
enum SplitTest {
    Equals(u32),
    AtMost(u32),
}

impl SplitTest {
    fn matches(&self, value: u32) -> bool {
        match *self {
            SplitTest::Equals(v) => value == v,
            SplitTest::AtMost(v) => value <= v,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
enum TreeNode {
    Leaf {
        label: usize,
    },
    Split {
        feature: usize,
        test: SplitTest,
        pass: Box<TreeNode>,
        fail: Box<TreeNode>,
    },
}

impl TreeNode {
    fn predict(&self, features: &Features) -> usize {
        let mut node = self;
        loop {
            match node {
                TreeNode::Leaf { label } => return *label,
                TreeNode::Split {
                    feature,
                    test,
                    pass,
                    fail,
                } => {
                    node = if test.matches(features[*feature]) {
                        &**pass
                    } else {
                        &**fail
                    };
                }
            }
        }
    }

    /// Checks that every split reads a real feature and every leaf names a
    /// known label.
    fn validate(&self, label_count: usize) -> Result<(), String> {
        let mut pending = vec![self];
        while let Some(node) = pending.pop() {
            match node {
                TreeNode::Leaf { label } if *label >= label_count => {
                    return Err(format!("leaf label {} out of range ({} labels)", label, label_count));
                }
                TreeNode::Leaf { .. } => {}
                TreeNode::Split { feature, .. } if *feature >= FEATURE_COUNT => {
                    return Err(format!("split on unknown feature {}", feature));
                }
                TreeNode::Split { pass, fail, .. } => {
                    pending.push(pass);
                    pending.push(fail);
                }
            }
        }
        Ok(())
    }
}

struct TreeBuilder<'a> {
    rows: &'a [(Features, usize)],
    label_count: usize,
    params: &'a ForestParams,
    features_per_split: usize,
}

fn gini(counts: &[usize], total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let total = total as f64;
    1.0 - counts
        .iter()
        .map(|&c| {
            let p = c as f64 / total;
            p * p
        })
        .sum::<f64>()
}

/// Index of the largest count; ties go to the lowest index.
fn majority(counts: &[usize]) -> usize {
    let mut best = 0;
    for (idx, &count) in counts.iter().enumerate() {
        if count > counts[best] {
            best = idx;
        }
    }
    best
}

impl TreeBuilder<'_> {
    fn counts(&self, indices: &[usize]) -> Vec<usize> {
        let mut counts = vec![0; self.label_count];
        for &i in indices {
            counts[self.rows[i].1] += 1;
        }
        counts
    }

    fn build(&self, indices: &[usize], depth: usize, rng: &mut StdRng) -> TreeNode {
        let counts = self.counts(indices);
        let label = majority(&counts);
        let pure = counts.iter().filter(|&&c| c > 0).count() <= 1;
        if pure || depth >= self.params.max_depth || indices.len() < self.params.min_samples_split {
            return TreeNode::Leaf { label };
        }

        let parent_impurity = gini(&counts, indices.len());
        let mut candidates: Vec<usize> = (0..FEATURE_COUNT).collect();
        candidates.shuffle(rng);

        let mut best: Option<(f64, usize, SplitTest)> = None;
        for &feature in candidates.iter().take(self.features_per_split) {
            let values: BTreeSet<u32> = indices.iter().map(|&i| self.rows[i].0[feature]).collect();
            for &value in &values {
                let test = if feature == SIZE_BUCKET {
                    SplitTest::AtMost(value)
                } else {
                    SplitTest::Equals(value)
                };
                let mut pass = vec![0; self.label_count];
                let mut fail = vec![0; self.label_count];
                for &i in indices {
                    let (features, label) = &self.rows[i];
                    if test.matches(features[feature]) {
                        pass[*label] += 1;
                    } else {
                        fail[*label] += 1;
                    }
                }
                let n_pass: usize = pass.iter().sum();
                let n_fail = indices.len() - n_pass;
                if n_pass == 0 || n_fail == 0 {
                    continue;
                }
                let weighted = (n_pass as f64 * gini(&pass, n_pass)
                    + n_fail as f64 * gini(&fail, n_fail))
                    / indices.len() as f64;
                let gain = parent_impurity - weighted;
                if gain > 1e-12 && best.is_none_or(|(g, _, _)| gain > g) {
                    best = Some((gain, feature, test));
                }
            }
        }

        let Some((_, feature, test)) = best else {
            return TreeNode::Leaf { label };
        };

        let (pass, fail): (Vec<usize>, Vec<usize>) = indices
            .iter()
            .partition(|&&i| test.matches(self.rows[i].0[feature]));
        TreeNode::Split {
            feature,
            test,
            pass: Box::new(self.build(&pass, depth + 1, rng)),
            fail: Box::new(self.build(&fail, depth + 1, rng)),
        }
    }
}

/// A trained forest together with its encoder and label set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForestModel {
    version: u32,
    labels: Vec<CategoryLabel>,
    encoder: FeatureEncoder,
    trees: Vec<TreeNode>,
}

impl ForestModel {
    /// Grows a forest on `samples`.
    pub fn fit(samples: &[LabeledSample], params: &ForestParams) -> ClassifierResult<Self> {
        if samples.is_empty() {
            return Err(ClassifierError::NoSamples);
        }
        if params.trees == 0 {
            return Err(ClassifierError::InvalidParameter(
                "forest needs at least one tree".to_string(),
            ));
        }

        let labels: Vec<CategoryLabel> = samples
            .iter()
            .map(|s| s.category.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let encoder = FeatureEncoder::fit(samples.iter().map(|s| &s.metadata));
        let rows: Vec<(Features, usize)> = samples
            .iter()
            .map(|s| {
                let label = labels.binary_search(&s.category).unwrap_or_default();
                (encoder.encode(&s.metadata), label)
            })
            .collect();

        let builder = TreeBuilder {
            rows: &rows,
            label_count: labels.len(),
            params,
            features_per_split: ((FEATURE_COUNT as f64).sqrt().round() as usize).max(1),
        };

        let mut rng = StdRng::seed_from_u64(params.seed);
        let trees = (0..params.trees)
            .map(|_| {
                let bootstrap: Vec<usize> = (0..rows.len())
                    .map(|_| rng.random_range(0..rows.len()))
                    .collect();
                builder.build(&bootstrap, 0, &mut rng)
            })
            .collect();

        tracing::info!(
            samples = samples.len(),
            labels = labels.len(),
            trees = params.trees,
            "trained category forest"
        );

        Ok(Self {
            version: ARTIFACT_VERSION,
            labels,
            encoder,
            trees,
        })
    }

    pub fn labels(&self) -> &[CategoryLabel] {
        &self.labels
    }

    /// Majority vote of all trees; unfamiliar input yields "Others".
    pub fn predict(&self, metadata: &FileMetadata) -> CategoryLabel {
        let features = self.encoder.encode(metadata);
        if self.encoder.is_unfamiliar(&features) || self.labels.is_empty() {
            return CategoryLabel::fallback();
        }

        let mut votes = vec![0; self.labels.len()];
        for tree in &self.trees {
            let label = tree.predict(&features);
            if let Some(slot) = votes.get_mut(label) {
                *slot += 1;
            }
        }
        self.labels[majority(&votes)].clone()
    }

    /// Writes the model artifact as JSON.
    pub fn save(&self, path: &Path) -> ClassifierResult<()> {
        let json = serde_json::to_string(self).map_err(|e| ClassifierError::InvalidModel {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|e| ClassifierError::Io {
                path: path.to_path_buf(),
                source: e,
            })?;
        }
        fs::write(path, json).map_err(|e| ClassifierError::Io {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Reads a model artifact written by [`ForestModel::save`].
    pub fn load(path: &Path) -> ClassifierResult<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                ClassifierError::ModelNotFound(path.to_path_buf())
            } else {
                ClassifierError::Io {
                    path: path.to_path_buf(),
                    source: e,
                }
            }
        })?;
        let model: Self =
            serde_json::from_str(&content).map_err(|e| ClassifierError::InvalidModel {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        if model.version != ARTIFACT_VERSION {
            return Err(ClassifierError::InvalidModel {
                path: path.to_path_buf(),
                reason: format!("unsupported artifact version {}", model.version),
            });
        }
        let label_count = model.labels.len();
        if model.trees.is_empty() || label_count == 0 {
            return Err(ClassifierError::InvalidModel {
                path: path.to_path_buf(),
                reason: "model has no trees or no labels".to_string(),
            });
        }
        for (idx, tree) in model.trees.iter().enumerate() {
            tree.validate(label_count)
                .map_err(|reason| ClassifierError::InvalidModel {
                    path: path.to_path_buf(),
                    reason: format!("tree {}: {}", idx, reason),
                })?;
        }
        Ok(model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample(name: &str, size: u64, mime: &str, category: &str) -> LabeledSample {
        LabeledSample::new(FileMetadata::new(name, size, mime), category)
    }

    fn corpus() -> Vec<LabeledSample> {
        let mut samples = Vec::new();
        for i in 0..8u64 {
            samples.push(sample(&format!("doc{i}.pdf"), 2048 + i * 100, "application/pdf", "Documents"));
            samples.push(sample(&format!("img{i}.jpg"), 1024 + i * 50, "image/jpeg", "Images"));
            samples.push(sample(&format!("song{i}.mp3"), 4_000_000 + i, "audio/mpeg", "Audio"));
        }
        samples
    }

    #[test]
    fn test_size_bucket() {
        assert_eq!(size_bucket(0), 0);
        assert_eq!(size_bucket(1), 1);
        assert_eq!(size_bucket(3), 2);
        assert_eq!(size_bucket(1023), 10);
        assert_eq!(size_bucket(u64::MAX), MAX_SIZE_BUCKET);
    }

    #[test]
    fn test_encoder_unknown_values_are_zero() {
        let samples = corpus();
        let encoder = FeatureEncoder::fit(samples.iter().map(|s| &s.metadata));
        let features = encoder.encode(&FileMetadata::new("x.xyz", 10, "chemical/x-pdb"));
        assert_eq!(features[EXTENSION], 0);
        assert_eq!(features[MEDIA_FAMILY], 0);
        assert!(encoder.is_unfamiliar(&features));

        let known = encoder.encode(&FileMetadata::new("x.pdf", 10, "application/pdf"));
        assert!(known[EXTENSION] > 0);
        assert!(!encoder.is_unfamiliar(&known));
    }

    #[test]
    fn test_predicts_training_categories() {
        let model = ForestModel::fit(&corpus(), &ForestParams::default()).unwrap();

        let doc = FileMetadata::new("example_document.pdf", 2048, "application/pdf");
        let img = FileMetadata::new("example_image.jpg", 1024, "image/jpeg");
        let song = FileMetadata::new("example_audio.mp3", 4096, "audio/mpeg");
        assert_eq!(model.predict(&doc).as_str(), "Documents");
        assert_eq!(model.predict(&img).as_str(), "Images");
        assert_eq!(model.predict(&song).as_str(), "Audio");
    }

    #[test]
    fn test_unfamiliar_input_predicts_others() {
        let model = ForestModel::fit(&corpus(), &ForestParams::default()).unwrap();
        let unknown = FileMetadata::new("unknown_file.xyz", 1024, "chemical/x-unknown");
        assert!(model.predict(&unknown).is_fallback());
    }

    #[test]
    fn test_fit_is_deterministic_for_seed() {
        let a = ForestModel::fit(&corpus(), &ForestParams::default()).unwrap();
        let b = ForestModel::fit(&corpus(), &ForestParams::default()).unwrap();
        assert_eq!(
            serde_json::to_string(&a).unwrap(),
            serde_json::to_string(&b).unwrap()
        );
    }

    #[test]
    fn test_fit_rejects_empty_and_zero_trees() {
        assert!(matches!(
            ForestModel::fit(&[], &ForestParams::default()),
            Err(ClassifierError::NoSamples)
        ));
        let params = ForestParams {
            trees: 0,
            ..ForestParams::default()
        };
        assert!(matches!(
            ForestModel::fit(&corpus(), &params),
            Err(ClassifierError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_save_and_load_artifact() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let path = temp_dir.path().join("models").join("model.json");
        let model = ForestModel::fit(&corpus(), &ForestParams::default()).unwrap();
        model.save(&path).unwrap();

        let loaded = ForestModel::load(&path).unwrap();
        assert_eq!(loaded.labels(), model.labels());
        let img = FileMetadata::new("holiday.jpg", 1500, "image/jpeg");
        assert_eq!(loaded.predict(&img), model.predict(&img));
    }

    #[test]
    fn test_load_missing_and_corrupt_artifacts() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let missing = temp_dir.path().join("missing.json");
        assert!(matches!(
            ForestModel::load(&missing),
            Err(ClassifierError::ModelNotFound(_))
        ));

        let corrupt = temp_dir.path().join("corrupt.json");
        fs::write(&corrupt, "{not a model").unwrap();
        assert!(matches!(
            ForestModel::load(&corrupt),
            Err(ClassifierError::InvalidModel { .. })
        ));
    }

    #[test]
    fn test_load_rejects_out_of_range_trees() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let path = temp_dir.path().join("model.json");
        ForestModel::fit(&corpus(), &ForestParams::default())
            .unwrap()
            .save(&path)
            .unwrap();
        let saved: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();

        let bad_trees = [
            serde_json::json!([{"split": {
                "feature": 7,
                "test": {"equals": 1},
                "pass": {"leaf": {"label": 0}},
                "fail": {"leaf": {"label": 0}}
            }}]),
            serde_json::json!([{"leaf": {"label": 99}}]),
        ];
        for trees in bad_trees {
            let mut edited = saved.clone();
            edited["trees"] = trees;
            fs::write(&path, edited.to_string()).unwrap();
            assert!(matches!(
                ForestModel::load(&path),
                Err(ClassifierError::InvalidModel { .. })
            ));
        }
    }

    #[test]
    fn test_labeled_sample_json_shape() {
        let parsed: LabeledSample = serde_json::from_str(
            r#"{"name":"a.pdf","size":10,"type":"application/pdf","category":"Documents"}"#,
        )
        .unwrap();
        assert_eq!(parsed.metadata.size_bytes, 10);
        assert_eq!(parsed.category.as_str(), "Documents");
    }
}
