//! Error kinds shared across the crate.
//!
//! Primitive operations report failures as typed variants so that the
//! orchestration layer can distinguish programmer errors (shape mismatches)
//! from recoverable conditions (a missing Galois key that can be loaded, a
//! ciphertext that merely needs a bootstrap).

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Level mismatch, dimension mismatch or undersized buffer. These are
    /// programmer errors and are never recovered from.
    #[error("shape error: {0}")]
    Shape(String),

    /// A Galois or relinearization key required by the operation is not in
    /// the active evaluation key set. The caller may preload it and retry.
    #[error("missing key: {0}")]
    KeyMissing(String),

    /// The ciphertext level is below the minimum required by the operation.
    /// Usually resolved by bootstrapping.
    #[error("level {level} below required minimum {required} for {op}")]
    Range {
        op: &'static str,
        level: usize,
        required: usize,
    },

    /// Mismatched scales on operands of an addition or subtraction.
    #[error("scale mismatch: {0} vs {1}")]
    ScaleMismatch(f64, f64),

    /// The bounded Galois-key cache is full.
    #[error("maximum number of concurrent Galois keys exceeded")]
    KeyCapacity,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Failure wrapped with the pipeline stage that produced it.
    #[error("[{stage}]: {source}")]
    Stage {
        stage: String,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    pub fn shape(msg: impl Into<String>) -> Self {
        Error::Shape(msg.into())
    }

    pub fn key_missing(msg: impl Into<String>) -> Self {
        Error::KeyMissing(msg.into())
    }

    /// Wraps the error with the name of the pipeline stage in which it
    /// occurred, so the first failure identifies the responsible stage.
    pub fn in_stage(self, stage: impl Into<String>) -> Self {
        Error::Stage {
            stage: stage.into(),
            source: Box::new(self),
        }
    }
}

/// Extension trait to annotate results with a stage name.
pub trait StageExt<T> {
    fn stage(self, name: &str) -> Result<T>;
}

impl<T> StageExt<T> for Result<T> {
    fn stage(self, name: &str) -> Result<T> {
        self.map_err(|e| e.in_stage(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_wrapping_names_the_stage() {
        let err: Result<()> = Err(Error::shape("dimension mismatch"));
        let wrapped = err.stage("qkv: query").unwrap_err();
        let msg = wrapped.to_string();
        assert!(msg.contains("qkv: query"), "{msg}");
        assert!(matches!(wrapped, Error::Stage { .. }));
    }

    #[test]
    fn range_error_reports_levels() {
        let err = Error::Range {
            op: "rescale",
            level: 0,
            required: 1,
        };
        assert!(err.to_string().contains("rescale"));
        assert!(err.to_string().contains('0'));
    }

    #[test]
    fn io_errors_convert() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing file");
        let err: Error = io.into();
        assert!(matches!(err, Error::Io(_)));
    }
}
