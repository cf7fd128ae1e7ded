//! Graphics error types and the API-check policy.
//!
//! Native error codes are converted to [`GraphicsError`] at the backend
//! boundary. How a failed call is then treated is decided by a
//! [`CheckPolicy`]: abort the process, trust the call and continue, or hand the
//! error back to the caller.

use std::fmt;

/// Errors that can occur in the graphics system.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphicsError {
    /// Failed to initialize the graphics system.
    InitializationFailed(String),
    /// Failed to create a resource.
    ResourceCreationFailed(String),
    /// A requested feature is not supported.
    FeatureNotSupported(String),
    /// A required instance or device extension is not available.
    ExtensionMissing(String),
    /// Out of GPU or host memory.
    OutOfMemory,
    /// The GPU device was lost.
    DeviceLost,
    /// An invalid parameter was provided.
    InvalidParameter(String),
    /// The object is not in a state that allows the operation.
    NotReady(String),
    /// A wait did not complete within its timeout.
    Timeout,
    /// An internal error occurred.
    Internal(String),
    /// The surface is outdated and needs to be reconfigured.
    SurfaceOutdated,
    /// The surface was lost and needs to be recreated.
    SurfaceLost,
}

impl fmt::Display for GraphicsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InitializationFailed(msg) => write!(f, "initialization failed: {msg}"),
            Self::ResourceCreationFailed(msg) => write!(f, "resource creation failed: {msg}"),
            Self::FeatureNotSupported(msg) => write!(f, "feature not supported: {msg}"),
            Self::ExtensionMissing(name) => write!(f, "required extension missing: {name}"),
            Self::OutOfMemory => write!(f, "out of GPU memory"),
            Self::DeviceLost => write!(f, "GPU device lost"),
            Self::InvalidParameter(msg) => write!(f, "invalid parameter: {msg}"),
            Self::NotReady(msg) => write!(f, "not ready: {msg}"),
            Self::Timeout => write!(f, "wait timed out"),
            Self::Internal(msg) => write!(f, "internal error: {msg}"),
            Self::SurfaceOutdated => write!(f, "surface outdated, needs reconfiguration"),
            Self::SurfaceLost => write!(f, "surface lost, needs recreation"),
        }
    }
}

impl std::error::Error for GraphicsError {}

/// Result alias used throughout the crate.
pub type GraphicsResult<T> = Result<T, GraphicsError>;

/// How failed API calls are handled.
///
/// The default mirrors the engine's historical behaviour: debug builds abort
/// with the stringified error, release builds do not check status-only calls.
/// Calls that must produce a value (resource creation) cannot be trusted
/// without a value, so they return `Err` under [`CheckPolicy::Trust`] as well.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CheckPolicy {
    /// Log the failure at error level and abort the process.
    Abort,
    /// Ignore failures of calls that only report a status.
    Trust,
    /// Return the failure to the caller.
    Propagate,
}

impl Default for CheckPolicy {
    fn default() -> Self {
        if cfg!(debug_assertions) {
            Self::Abort
        } else {
            Self::Trust
        }
    }
}

impl CheckPolicy {
    /// Apply the policy to a status-only call.
    ///
    /// `what` names the operation for the log line.
    pub fn check(self, what: &str, result: GraphicsResult<()>) -> GraphicsResult<()> {
        match (self, result) {
            (_, Ok(())) => Ok(()),
            (Self::Abort, Err(e)) => abort_with(what, &e),
            (Self::Trust, Err(e)) => {
                log::debug!("{what} failed (unchecked): {e}");
                Ok(())
            }
            (Self::Propagate, Err(e)) => Err(e),
        }
    }

    /// Apply the policy to a call that produces a value.
    ///
    /// Under [`CheckPolicy::Trust`] the error is still returned because no
    /// value exists to continue with.
    pub fn check_value<T>(self, what: &str, result: GraphicsResult<T>) -> GraphicsResult<T> {
        match (self, result) {
            (_, Ok(value)) => Ok(value),
            (Self::Abort, Err(e)) => abort_with(what, &e),
            (_, Err(e)) => Err(e),
        }
    }
}

/// Abort-on-error helper for call sites that treat any failure as fatal.
///
/// ```ignore
/// let device = instance.create_device().or_abort();
/// ```
pub trait OrAbort<T> {
    /// Return the value, or log the error and abort the process.
    fn or_abort(self) -> T;
}

impl<T> OrAbort<T> for GraphicsResult<T> {
    #[track_caller]
    fn or_abort(self) -> T {
        match self {
            Ok(value) => value,
            Err(e) => abort_with(&std::panic::Location::caller().to_string(), &e),
        }
    }
}

fn abort_with(what: &str, error: &GraphicsError) -> ! {
    log::error!("{what}: {error}");
    std::process::abort()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = GraphicsError::OutOfMemory;
        assert_eq!(err.to_string(), "out of GPU memory");

        let err = GraphicsError::ExtensionMissing("VK_KHR_swapchain".to_string());
        assert_eq!(
            err.to_string(),
            "required extension missing: VK_KHR_swapchain"
        );
    }

    #[test]
    fn test_default_policy_matches_build() {
        if cfg!(debug_assertions) {
            assert_eq!(CheckPolicy::default(), CheckPolicy::Abort);
        } else {
            assert_eq!(CheckPolicy::default(), CheckPolicy::Trust);
        }
    }

    #[test]
    fn test_trust_discards_status_failures() {
        let result = CheckPolicy::Trust.check("reset", Err(GraphicsError::DeviceLost));
        assert_eq!(result, Ok(()));
    }

    #[test]
    fn test_trust_still_fails_value_calls() {
        let result: GraphicsResult<u32> =
            CheckPolicy::Trust.check_value("create", Err(GraphicsError::OutOfMemory));
        assert_eq!(result, Err(GraphicsError::OutOfMemory));
    }

    #[test]
    fn test_propagate_returns_error() {
        let result = CheckPolicy::Propagate.check("submit", Err(GraphicsError::Timeout));
        assert_eq!(result, Err(GraphicsError::Timeout));
    }

    #[test]
    fn test_or_abort_passes_values_through() {
        let value: GraphicsResult<u32> = Ok(7);
        assert_eq!(value.or_abort(), 7);
    }
}
