/*!
 * Error Types
 * Centralized error handling with thiserror, miette, and serde support
 */

use miette::Diagnostic;
use nix::errno::Errno;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type for datapath operations
///
/// # Must Use
/// Structural operations unwind partially acquired hardware resources on
/// failure; the error must be handled before retrying.
pub type HqmResult<T> = Result<T, HqmError>;

/// Unified datapath error type with miette diagnostics
#[derive(Error, Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Diagnostic)]
#[serde(rename_all = "snake_case", tag = "error", content = "details")]
pub enum HqmError {
    /// Bad id, count or priority, or a teardown-order violation
    #[error("Invalid argument: {0}")]
    #[diagnostic(
        code(hqm::invalid_argument),
        help("Check ids and counts against the domain's configuration. Handles must be detached before their parent is torn down.")
    )]
    InvalidArgument(String),

    /// Referenced resource was never configured
    #[error("Not configured: {0}")]
    #[diagnostic(
        code(hqm::not_configured),
        help("Create the domain, pool or port before referencing it.")
    )]
    NotConfigured(String),

    /// Resource already exists (duplicate alert thread, registered device)
    #[error("Already exists: {0}")]
    #[diagnostic(
        code(hqm::already_exists),
        help("Only one instance of this resource is allowed. Tear down the existing one first.")
    )]
    AlreadyExists(String),

    /// Mapping or allocation failure
    #[error("Resource exhausted: {0}")]
    #[diagnostic(
        code(hqm::resource_exhausted),
        help("The device or domain has no free resources of this kind. Reset unused domains.")
    )]
    ResourceExhausted(String),

    /// Datapath used before the domain was started
    #[error("Permission denied: {0}")]
    #[diagnostic(
        code(hqm::permission_denied),
        help("Start the scheduling domain before sending or receiving.")
    )]
    PermissionDenied(String),

    /// Port is disabled and its consumer queue has been drained
    #[error("Port disabled: {0}")]
    #[diagnostic(
        code(hqm::port_disabled),
        help("Re-enable the port to continue receiving events.")
    )]
    PortDisabled(String),

    /// Operation raced with a domain or device shutdown
    #[error("Interrupted: {0}")]
    #[diagnostic(
        code(hqm::interrupted),
        help("The domain is shutting down. Detach handles and reset the domain.")
    )]
    Interrupted(String),

    /// Domain start requested without a running alert thread
    #[error("No alert thread: {0}")]
    #[diagnostic(
        code(hqm::no_alert_thread),
        help("Launch the domain alert thread before starting the domain.")
    )]
    NoAlertThread(String),

    /// The hardware collaborator rejected a command
    #[error("Hardware command '{op}' failed with status {status}")]
    #[diagnostic(
        code(hqm::hardware),
        help("The device refused the command. Inspect device logs for the status code.")
    )]
    Hardware { op: String, status: i32 },
}

impl HqmError {
    /// POSIX errno equivalent of this error
    pub fn errno(&self) -> Errno {
        match self {
            HqmError::InvalidArgument(_) => Errno::EINVAL,
            HqmError::NotConfigured(_) => Errno::EINVAL,
            HqmError::AlreadyExists(_) => Errno::EEXIST,
            HqmError::ResourceExhausted(_) => Errno::ENOMEM,
            HqmError::PermissionDenied(_) => Errno::EPERM,
            HqmError::PortDisabled(_) => Errno::EACCES,
            HqmError::Interrupted(_) => Errno::EINTR,
            HqmError::NoAlertThread(_) => Errno::ESRCH,
            HqmError::Hardware { .. } => Errno::EIO,
        }
    }

    /// Negative errno, as returned by the kernel driver interface
    pub fn code(&self) -> i32 {
        -(self.errno() as i32)
    }

    pub fn is_interrupted(&self) -> bool {
        matches!(self, HqmError::Interrupted(_))
    }

    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        HqmError::InvalidArgument(msg.into())
    }

    pub(crate) fn hardware(op: &str, status: i32) -> Self {
        HqmError::Hardware {
            op: op.to_string(),
            status,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_serialization() {
        let error = HqmError::InvalidArgument("queue 3".into());
        let json = serde_json::to_string(&error).unwrap();
        let deserialized: HqmError = serde_json::from_str(&json).unwrap();
        assert_eq!(error, deserialized);
    }

    #[test]
    fn test_errno_mapping() {
        assert_eq!(HqmError::Interrupted("x".into()).errno(), Errno::EINTR);
        assert_eq!(HqmError::PermissionDenied("x".into()).errno(), Errno::EPERM);
        assert_eq!(HqmError::PortDisabled("x".into()).errno(), Errno::EACCES);
        assert_eq!(HqmError::NoAlertThread("x".into()).errno(), Errno::ESRCH);
        assert_eq!(HqmError::AlreadyExists("x".into()).code(), -(Errno::EEXIST as i32));
    }

    #[test]
    fn test_hardware_error_display() {
        let error = HqmError::hardware("start_domain", 7);
        assert_eq!(
            error.to_string(),
            "Hardware command 'start_domain' failed with status 7"
        );
    }
}
