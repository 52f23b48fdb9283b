//! Synthetic progress shared by both orchestrators.
//!
//! The backend never reports a percentage, only how long a job has been
//! running, so progress grows at two points per second and stops short of
//! completion until the backend confirms it.

/// Upper bound while a job is still in progress.
pub const IN_PROGRESS_CAP: f64 = 95.0;

/// Reported once the backend has confirmed completion.
pub const COMPLETE: f64 = 100.0;

/// `min(elapsed * 2, 95)`; negative or non-finite input counts as zero.
pub fn estimate_progress(elapsed_seconds: f64) -> f64 {
    if !elapsed_seconds.is_finite() || elapsed_seconds <= 0.0 {
        return 0.0;
    }
    (elapsed_seconds * 2.0).min(IN_PROGRESS_CAP)
}

const STAGES: [(f64, &str); 5] = [
    (0.0, "Initializing model architecture..."),
    (15.0, "Loading training data..."),
    (30.0, "Training LSTM layers..."),
    (60.0, "Optimizing weights..."),
    (85.0, "Finalizing model..."),
];

/// Human label for the training stage a progress value falls into.
pub fn training_stage(progress: f64) -> &'static str {
    STAGES
        .iter()
        .rev()
        .find(|(threshold, _)| progress >= *threshold)
        .map(|(_, label)| *label)
        .unwrap_or(STAGES[0].1)
}
