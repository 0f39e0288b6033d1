//! Trainable direction classifier
//!
//! Multinomial logistic regression over the fixed feature layout. The
//! backend is intentionally small: mini-batch gradient descent with a
//! softmax head, trained fresh off the serving path and swapped in under a
//! short write lock only when the held-out accuracy clears the save bar.

use std::path::{Path, PathBuf};
use std::sync::RwLock;

use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{EngineError, EngineResult};
use crate::types::Direction;

pub const NUM_CLASSES: usize = 3;

// ============================================================================
// Contract
// ============================================================================

/// Single inference outcome: a full distribution plus the argmax class
#[derive(Debug, Clone, Serialize)]
pub struct Inference {
    pub probabilities: [f64; NUM_CLASSES],
    pub predicted: Direction,
    pub confidence: f64,
}

/// Result of one training pass
#[derive(Debug, Clone, Serialize)]
pub struct TrainingStats {
    pub epochs: usize,
    pub samples: usize,
    pub final_loss: f64,
    pub final_accuracy: f64,
    pub train_losses: Vec<f64>,
    pub val_accuracies: Vec<f64>,
    /// Whether the trained state replaced the serving state
    pub saved: bool,
}

/// Training hyperparameters, decoupled from the backend
#[derive(Debug, Clone)]
pub struct TrainSettings {
    pub epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f64,
    pub validation_split: f64,
    pub save_accuracy_bar: f64,
}

/// Classifier capability set. The engine and the learning system only see
/// this trait, so the numeric backend can be swapped without touching them.
pub trait Classifier: Send + Sync {
    fn infer(&self, features: &[f64]) -> EngineResult<Inference>;
    fn train(&self, x: &[Vec<f64>], y: &[usize], settings: &TrainSettings)
        -> EngineResult<TrainingStats>;
    fn version(&self) -> u32;
    fn accuracy(&self) -> f64;
}

// ============================================================================
// Softmax backend
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SoftmaxState {
    weights: Array2<f64>,
    bias: Array1<f64>,
    version: u32,
    accuracy: f64,
}

impl SoftmaxState {
    fn zeros(input_dim: usize) -> Self {
        Self {
            weights: Array2::zeros((input_dim, NUM_CLASSES)),
            bias: Array1::zeros(NUM_CLASSES),
            version: 1,
            accuracy: 0.0,
        }
    }

    fn probabilities(&self, features: &Array1<f64>) -> Array1<f64> {
        let logits = features.dot(&self.weights) + &self.bias;
        softmax(&logits)
    }
}

pub struct SoftmaxClassifier {
    state: RwLock<Option<SoftmaxState>>,
    input_dim: usize,
    model_path: PathBuf,
}

impl SoftmaxClassifier {
    /// Fresh classifier with zeroed weights (uniform output until trained)
    pub fn new(input_dim: usize, model_path: impl Into<PathBuf>) -> Self {
        Self {
            state: RwLock::new(Some(SoftmaxState::zeros(input_dim))),
            input_dim,
            model_path: model_path.into(),
        }
    }

    /// Load a checkpoint if one exists, otherwise start fresh. A corrupt
    /// checkpoint is logged and ignored.
    pub fn load_or_init(input_dim: usize, model_path: impl Into<PathBuf>) -> Self {
        let model_path = model_path.into();
        let state = match Self::load_checkpoint(&model_path, input_dim) {
            Ok(Some(state)) => {
                info!(
                    version = state.version,
                    accuracy = state.accuracy,
                    path = %model_path.display(),
                    "loaded classifier checkpoint"
                );
                state
            }
            Ok(None) => {
                info!(path = %model_path.display(), "no checkpoint, starting fresh");
                SoftmaxState::zeros(input_dim)
            }
            Err(e) => {
                warn!(error = %e, path = %model_path.display(), "checkpoint unreadable, starting fresh");
                SoftmaxState::zeros(input_dim)
            }
        };
        Self {
            state: RwLock::new(Some(state)),
            input_dim,
            model_path,
        }
    }

    fn load_checkpoint(path: &Path, input_dim: usize) -> EngineResult<Option<SoftmaxState>> {
        if !path.exists() {
            return Ok(None);
        }
        let file = std::fs::File::open(path)?;
        let state: SoftmaxState = serde_json::from_reader(std::io::BufReader::new(file))?;
        if state.weights.nrows() != input_dim {
            return Err(EngineError::Model(format!(
                "checkpoint input width {} does not match configured {}",
                state.weights.nrows(),
                input_dim
            )));
        }
        Ok(Some(state))
    }

    fn save_checkpoint(&self, state: &SoftmaxState) -> EngineResult<()> {
        if let Some(dir) = self.model_path.parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir)?;
            }
        }
        let file = std::fs::File::create(&self.model_path)?;
        serde_json::to_writer(std::io::BufWriter::new(file), state)?;
        info!(path = %self.model_path.display(), version = state.version, "classifier checkpoint saved");
        Ok(())
    }
}

impl Classifier for SoftmaxClassifier {
    fn infer(&self, features: &[f64]) -> EngineResult<Inference> {
        let guard = self.state.read().unwrap();
        let state = guard.as_ref().ok_or(EngineError::NotInitialized)?;
        if features.len() != self.input_dim {
            return Err(EngineError::Model(format!(
                "feature width {} does not match input width {}",
                features.len(),
                self.input_dim
            )));
        }

        let x = Array1::from_iter(features.iter().copied());
        let probs = state.probabilities(&x);

        let mut predicted_class = 0;
        for i in 1..NUM_CLASSES {
            if probs[i] > probs[predicted_class] {
                predicted_class = i;
            }
        }

        Ok(Inference {
            probabilities: [probs[0], probs[1], probs[2]],
            predicted: Direction::from_class_index(predicted_class),
            confidence: probs[predicted_class],
        })
    }

    fn train(
        &self,
        x: &[Vec<f64>],
        y: &[usize],
        settings: &TrainSettings,
    ) -> EngineResult<TrainingStats> {
        let n = x.len();
        let val_n = (n as f64 * settings.validation_split) as usize;
        if n == 0 || val_n == 0 || val_n >= n {
            return Err(EngineError::InsufficientData { needed: 5, got: n });
        }
        // Stored rows may predate a feature-layout change.
        if let Some(bad) = x.iter().find(|row| row.len() != self.input_dim) {
            return Err(EngineError::Model(format!(
                "training row width {} does not match input width {}",
                bad.len(),
                self.input_dim
            )));
        }

        // Train on a snapshot; serving keeps reading the current state.
        let mut candidate = {
            let guard = self.state.read().unwrap();
            guard.as_ref().ok_or(EngineError::NotInitialized)?.clone()
        };

        let train_n = n - val_n;
        let (x_train, x_val) = x.split_at(train_n);
        let (y_train, y_val) = y.split_at(train_n);

        let batch_size = settings.batch_size.min(train_n);
        let num_batches = (train_n / batch_size).max(1);

        let mut train_losses = Vec::with_capacity(settings.epochs);
        let mut val_accuracies = Vec::with_capacity(settings.epochs);

        for epoch in 0..settings.epochs {
            let mut epoch_loss = 0.0;
            for b in 0..num_batches {
                let start = b * batch_size;
                let end = (start + batch_size).min(train_n);
                epoch_loss += gradient_step(
                    &mut candidate,
                    &x_train[start..end],
                    &y_train[start..end],
                    settings.learning_rate,
                );
            }
            let avg_loss = epoch_loss / num_batches as f64;
            train_losses.push(avg_loss);

            let val_accuracy = accuracy_of(&candidate, x_val, y_val);
            val_accuracies.push(val_accuracy);

            info!(
                epoch = epoch + 1,
                total = settings.epochs,
                loss = format!("{avg_loss:.4}"),
                val_acc = format!("{val_accuracy:.4}"),
                "training epoch"
            );
        }

        let final_accuracy = *val_accuracies.last().unwrap_or(&0.0);
        let saved = final_accuracy > settings.save_accuracy_bar;

        {
            let mut guard = self.state.write().unwrap();
            let current = guard.as_mut().ok_or(EngineError::NotInitialized)?;
            candidate.version = current.version + 1;
            candidate.accuracy = final_accuracy;
            if saved {
                *current = candidate.clone();
            } else {
                // Previous weights stay authoritative; only bookkeeping moves.
                current.version += 1;
                current.accuracy = final_accuracy;
            }
        }

        if saved {
            self.save_checkpoint(&candidate)?;
            info!(accuracy = final_accuracy, "new classifier state committed");
        } else {
            info!(
                accuracy = final_accuracy,
                bar = settings.save_accuracy_bar,
                "trained state below save bar, keeping previous weights"
            );
        }

        Ok(TrainingStats {
            epochs: settings.epochs,
            samples: n,
            final_loss: *train_losses.last().unwrap_or(&0.0),
            final_accuracy,
            train_losses,
            val_accuracies,
            saved,
        })
    }

    fn version(&self) -> u32 {
        self.state
            .read()
            .unwrap()
            .as_ref()
            .map(|s| s.version)
            .unwrap_or(0)
    }

    fn accuracy(&self) -> f64 {
        self.state
            .read()
            .unwrap()
            .as_ref()
            .map(|s| s.accuracy)
            .unwrap_or(0.0)
    }
}

/// One mini-batch update; returns the batch cross-entropy loss
fn gradient_step(state: &mut SoftmaxState, x: &[Vec<f64>], y: &[usize], lr: f64) -> f64 {
    let m = x.len();
    let dim = state.weights.nrows();

    let mut grad_w = Array2::<f64>::zeros((dim, NUM_CLASSES));
    let mut grad_b = Array1::<f64>::zeros(NUM_CLASSES);
    let mut loss = 0.0;

    for (features, &label) in x.iter().zip(y) {
        let xi = Array1::from_iter(features.iter().copied());
        let probs = state.probabilities(&xi);
        loss -= probs[label].max(1e-12).ln();

        for c in 0..NUM_CLASSES {
            let err = probs[c] - if c == label { 1.0 } else { 0.0 };
            grad_b[c] += err;
            for d in 0..dim {
                grad_w[[d, c]] += err * xi[d];
            }
        }
    }

    let scale = lr / m as f64;
    state.weights.scaled_add(-scale, &grad_w);
    state.bias.scaled_add(-scale, &grad_b);

    loss / m as f64
}

fn accuracy_of(state: &SoftmaxState, x: &[Vec<f64>], y: &[usize]) -> f64 {
    if x.is_empty() {
        return 0.0;
    }
    let correct = x
        .iter()
        .zip(y)
        .filter(|(features, label)| {
            let xi = Array1::from_iter(features.iter().copied());
            let probs = state.probabilities(&xi);
            let mut best = 0;
            for i in 1..NUM_CLASSES {
                if probs[i] > probs[best] {
                    best = i;
                }
            }
            best == **label
        })
        .count();
    correct as f64 / x.len() as f64
}

/// Numerically stable softmax (max subtracted before exponentiation)
fn softmax(logits: &Array1<f64>) -> Array1<f64> {
    let max = logits.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let exps: Array1<f64> = logits.mapv(|v| (v - max).exp());
    let sum = exps.sum();
    exps / sum
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> TrainSettings {
        TrainSettings {
            epochs: 10,
            batch_size: 32,
            learning_rate: 0.05,
            validation_split: 0.2,
            save_accuracy_bar: 0.5,
        }
    }

    /// 60 samples whose label is fully determined by the first feature column
    fn separable_dataset(dim: usize) -> (Vec<Vec<f64>>, Vec<usize>) {
        let mut x = Vec::new();
        let mut y = Vec::new();
        for i in 0..60 {
            let up = i % 2 == 0;
            let mut features = vec![0.0; dim];
            features[0] = if up { 2.0 } else { -2.0 };
            features[1] = (i % 5) as f64 * 0.01;
            x.push(features);
            y.push(if up { 0 } else { 1 });
        }
        (x, y)
    }

    #[test]
    fn test_untrained_inference_is_uniform() {
        let clf = SoftmaxClassifier::new(4, "unused.json");
        let out = clf.infer(&[1.0, 2.0, 3.0, 4.0]).unwrap();
        let sum: f64 = out.probabilities.iter().sum();
        assert!((sum - 1.0).abs() < 1e-9);
        for p in out.probabilities {
            assert!((p - 1.0 / 3.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_infer_rejects_wrong_width() {
        let clf = SoftmaxClassifier::new(4, "unused.json");
        assert!(clf.infer(&[1.0, 2.0]).is_err());
    }

    #[test]
    fn test_train_rejects_mismatched_row_width() {
        let clf = SoftmaxClassifier::new(4, "unused.json");
        let (mut x, mut y) = separable_dataset(4);
        // one row from before a feature-layout change
        x.push(vec![1.0, 2.0]);
        y.push(0);
        assert!(matches!(
            clf.train(&x, &y, &settings()),
            Err(EngineError::Model(_))
        ));
    }

    #[test]
    fn test_train_rejects_tiny_dataset() {
        let clf = SoftmaxClassifier::new(2, "unused.json");
        let x = vec![vec![1.0, 0.0]; 3];
        let y = vec![0; 3];
        assert!(matches!(
            clf.train(&x, &y, &settings()),
            Err(EngineError::InsufficientData { .. })
        ));
    }

    #[test]
    fn test_separable_data_trains_above_90_percent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");
        let clf = SoftmaxClassifier::new(8, &path);

        let (x, y) = separable_dataset(8);
        let stats = clf.train(&x, &y, &settings()).unwrap();

        assert_eq!(stats.epochs, 10);
        assert_eq!(stats.train_losses.len(), 10);
        assert!(stats.final_accuracy > 0.9, "accuracy {}", stats.final_accuracy);
        assert!(stats.saved);
        assert_eq!(clf.version(), 2);

        // saved state must reproduce inference exactly after reload
        let probe = vec![2.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0];
        let before = clf.infer(&probe).unwrap();
        let reloaded = SoftmaxClassifier::load_or_init(8, &path);
        let after = reloaded.infer(&probe).unwrap();
        assert_eq!(before.probabilities, after.probabilities);
        assert_eq!(before.predicted, Direction::Up);
    }

    #[test]
    fn test_version_increments_even_without_save() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");
        let clf = SoftmaxClassifier::new(2, &path);

        // labels independent of features: held-out accuracy stays near chance
        let mut x = Vec::new();
        let mut y = Vec::new();
        for i in 0..60 {
            x.push(vec![0.0, 0.0]);
            y.push(i % 3);
        }
        let stats = clf.train(&x, &y, &settings()).unwrap();
        assert!(!stats.saved);
        assert_eq!(clf.version(), 2);
        assert!(!path.exists());

        // weights untouched: inference stays uniform
        let out = clf.infer(&[1.0, 1.0]).unwrap();
        for p in out.probabilities {
            assert!((p - 1.0 / 3.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_mismatched_checkpoint_width_starts_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");
        let clf = SoftmaxClassifier::new(4, &path);
        let (x, y) = separable_dataset(4);
        clf.train(&x, &y, &settings()).unwrap();

        let reloaded = SoftmaxClassifier::load_or_init(8, &path);
        assert_eq!(reloaded.version(), 1);
    }
}
