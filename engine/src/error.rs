//! Engine Error Type
//!
//! Errors returned to the host. Capacity overflow, catalogue parse failures and
//! stale solid ids are not errors here: they degrade gracefully and surface as
//! warning strings on the container or the scene.

use thiserror::Error;

use crate::container::ContainerId;

/// Errors produced by the clay engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// File system error (config load/save)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Config JSON could not be parsed or written
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// No usable GPU adapter or device
    #[error("GPU unavailable: {0}")]
    GpuUnavailable(String),

    /// A staging buffer could not be mapped for read-back
    #[error("buffer map failed: {0}")]
    BufferMap(String),

    /// The container handle does not exist (destroyed or never created)
    #[error("unknown container {0:?}")]
    UnknownContainer(ContainerId),

    /// The solid id is not in the container's registry
    #[error("unknown solid {solid} in container {container:?}")]
    UnknownSolid { container: ContainerId, solid: u32 },

    /// A configuration value is structurally invalid (not merely out of range)
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The operation needs a different render strategy
    #[error("operation requires the {expected} strategy, container uses {actual}")]
    StrategyMismatch {
        expected: &'static str,
        actual: &'static str,
    },
}

/// Convenience alias used throughout the engine.
pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        let err = EngineError::UnknownSolid {
            container: ContainerId(3),
            solid: 7,
        };
        assert_eq!(err.to_string(), "unknown solid 7 in container ContainerId(3)");

        let err = EngineError::StrategyMismatch {
            expected: "mesh",
            actual: "point splat",
        };
        assert!(err.to_string().contains("mesh"));
    }

    #[test]
    fn test_from_io() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: EngineError = io.into();
        assert!(matches!(err, EngineError::Io(_)));
    }
}
