//! Offline training of the category forest.
//!
//! Training reads labeled samples, holds out a test fraction (stratified by
//! label when the data allows it), grows a [`ForestModel`] on the remainder
//! and scores it on the held-out part.

use crate::file_category::{CategoryLabel, ClassifierError, ClassifierResult, FileMetadata};
use crate::forest::{ForestModel, ForestParams, LabeledSample};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs;
use std::path::Path;

/// Parameters of a training run.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainConfig {
    /// Share of the samples held out for evaluation, in `(0, 1)`.
    pub test_fraction: f64,
    pub forest: ForestParams,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            test_fraction: 0.2,
            forest: ForestParams::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TrainTestSplit {
    pub train: Vec<LabeledSample>,
    pub test: Vec<LabeledSample>,
    pub stratified: bool,
}

/// Precision/recall/F1 for one label.
#[derive(Debug, Clone, PartialEq)]
pub struct LabelScore {
    pub label: CategoryLabel,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub support: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationReport {
    pub scores: Vec<LabelScore>,
    pub accuracy: f64,
    pub test_samples: usize,
}

impl EvaluationReport {
    pub fn score(&self, label: &str) -> Option<&LabelScore> {
        self.scores.iter().find(|s| s.label.as_str() == label)
    }
}

impl fmt::Display for EvaluationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let width = self
            .scores
            .iter()
            .map(|s| s.label.as_str().len())
            .max()
            .unwrap_or(0)
            .max(8);
        writeln!(
            f,
            "{:<width$} {:>9} {:>9} {:>9} {:>9}",
            "label",
            "precision",
            "recall",
            "f1-score",
            "support",
            width = width
        )?;
        for s in &self.scores {
            writeln!(
                f,
                "{:<width$} {:>9.2} {:>9.2} {:>9.2} {:>9}",
                s.label.as_str(),
                s.precision,
                s.recall,
                s.f1,
                s.support,
                width = width
            )?;
        }
        write!(
            f,
            "{:<width$} {:>9} {:>9} {:>9.2} {:>9}",
            "accuracy",
            "",
            "",
            self.accuracy,
            self.test_samples,
            width = width
        )
    }
}

#[derive(Debug, Clone)]
pub struct TrainingOutcome {
    pub model: ForestModel,
    pub report: EvaluationReport,
    pub stratified: bool,
}

/// One row of a CSV training file with `name,size,type,category` columns.
#[derive(Debug, Deserialize)]
struct CsvSample {
    name: String,
    size: u64,
    #[serde(rename = "type")]
    media_type: String,
    category: String,
}

/// Reads training samples: CSV with a `name,size,type,category` header when
/// the file ends in `.csv`, JSON lines (`{"name","size","type","category"}`)
/// otherwise.
pub fn load_samples(path: &Path) -> ClassifierResult<Vec<LabeledSample>> {
    let is_csv = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"));
    if is_csv {
        load_csv_samples(path)
    } else {
        load_json_samples(path)
    }
}

fn load_csv_samples(path: &Path) -> ClassifierResult<Vec<LabeledSample>> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| match e.into_kind() {
            csv::ErrorKind::Io(source) => ClassifierError::Io {
                path: path.to_path_buf(),
                source,
            },
            kind => ClassifierError::InvalidSample {
                line: 1,
                reason: format!("{:?}", kind),
            },
        })?;

    reader
        .deserialize::<CsvSample>()
        .map(|row| {
            let row = row.map_err(|e| ClassifierError::InvalidSample {
                line: e.position().map(|p| p.line() as usize).unwrap_or(0),
                reason: e.to_string(),
            })?;
            Ok(LabeledSample::new(
                FileMetadata::new(row.name, row.size, row.media_type),
                row.category,
            ))
        })
        .collect()
}

fn load_json_samples(path: &Path) -> ClassifierResult<Vec<LabeledSample>> {
    let content = fs::read_to_string(path).map_err(|e| ClassifierError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(idx, line)| {
            serde_json::from_str(line).map_err(|e| ClassifierError::InvalidSample {
                line: idx + 1,
                reason: e.to_string(),
            })
        })
        .collect()
}

fn held_out(count: usize, test_fraction: f64) -> usize {
    (count as f64 * test_fraction).round() as usize
}

/// Splits `samples` into train and test sets.
///
/// The split is stratified when every label has at least two samples and its
/// share of the test fraction rounds to at least one sample. Otherwise the
/// samples are shuffled and split without regard to label.
pub fn split_samples(
    samples: &[LabeledSample],
    test_fraction: f64,
    seed: u64,
) -> ClassifierResult<TrainTestSplit> {
    if samples.is_empty() {
        return Err(ClassifierError::NoSamples);
    }
    if !(test_fraction > 0.0 && test_fraction < 1.0) {
        return Err(ClassifierError::InvalidParameter(format!(
            "test fraction must be between 0 and 1, got {}",
            test_fraction
        )));
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let mut by_label: BTreeMap<&CategoryLabel, Vec<&LabeledSample>> = BTreeMap::new();
    for sample in samples {
        by_label.entry(&sample.category).or_default().push(sample);
    }

    let stratifiable = by_label
        .values()
        .all(|group| group.len() >= 2 && held_out(group.len(), test_fraction) >= 1);

    let mut train = Vec::new();
    let mut test = Vec::new();
    if stratifiable {
        for group in by_label.values_mut() {
            group.shuffle(&mut rng);
            let n_test = held_out(group.len(), test_fraction).min(group.len() - 1);
            test.extend(group[..n_test].iter().map(|s| (*s).clone()));
            train.extend(group[n_test..].iter().map(|s| (*s).clone()));
        }
    } else {
        tracing::warn!(
            labels = by_label.len(),
            samples = samples.len(),
            test_fraction,
            "not every label has enough samples for a stratified split; using a plain shuffled split"
        );
        let mut shuffled: Vec<LabeledSample> = samples.to_vec();
        shuffled.shuffle(&mut rng);
        let n_test = if shuffled.len() < 2 {
            0
        } else {
            held_out(shuffled.len(), test_fraction).clamp(1, shuffled.len() - 1)
        };
        test = shuffled.split_off(shuffled.len() - n_test);
        train = shuffled;
    }

    Ok(TrainTestSplit {
        train,
        test,
        stratified: stratifiable,
    })
}

fn ratio(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        1.0
    } else {
        numerator as f64 / denominator as f64
    }
}

/// Scores `model` on `test`. Any zero division scores as 1.0.
pub fn evaluate(model: &ForestModel, test: &[LabeledSample]) -> EvaluationReport {
    let pairs: Vec<(&CategoryLabel, CategoryLabel)> = test
        .iter()
        .map(|s| (&s.category, model.predict(&s.metadata)))
        .collect();

    let labels: BTreeSet<CategoryLabel> = pairs
        .iter()
        .flat_map(|(truth, predicted)| [(*truth).clone(), predicted.clone()])
        .collect();

    let scores = labels
        .into_iter()
        .map(|label| {
            let tp = pairs
                .iter()
                .filter(|(t, p)| **t == label && *p == label)
                .count();
            let fp = pairs
                .iter()
                .filter(|(t, p)| **t != label && *p == label)
                .count();
            let fn_ = pairs
                .iter()
                .filter(|(t, p)| **t == label && *p != label)
                .count();
            LabelScore {
                precision: ratio(tp, tp + fp),
                recall: ratio(tp, tp + fn_),
                f1: ratio(2 * tp, 2 * tp + fp + fn_),
                support: tp + fn_,
                label,
            }
        })
        .collect();

    let correct = pairs.iter().filter(|(t, p)| *t == p).count();
    EvaluationReport {
        scores,
        accuracy: ratio(correct, pairs.len()),
        test_samples: pairs.len(),
    }
}

/// Splits, fits and evaluates in one go.
pub fn train(samples: &[LabeledSample], config: &TrainConfig) -> ClassifierResult<TrainingOutcome> {
    let split = split_samples(samples, config.test_fraction, config.forest.seed)?;
    tracing::info!(
        train = split.train.len(),
        test = split.test.len(),
        stratified = split.stratified,
        "split training data"
    );

    let model = ForestModel::fit(&split.train, &config.forest)?;
    let report = evaluate(&model, &split.test);
    tracing::info!("model evaluation report:\n{}", report);

    Ok(TrainingOutcome {
        model,
        report,
        stratified: split.stratified,
    })
}
