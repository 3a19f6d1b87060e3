//! Process-level error taxonomy.
//!
//! Errors cross subsystem boundaries typed; only the mode machine decides
//! whether one is surfaced to the user or silently degrades. The class of an
//! error, not its text, determines that policy.

use crate::definition::DefinitionError;
use crate::engine::EngineError;
use crate::k8s::facade::FacadeError;
use crate::template::TemplateError;

/// Exit code for runtime failures.
pub const EXIT_RUNTIME: i32 = 1;
/// Exit code for configuration failures (bad kubeconfig, invalid definitions, bad flags).
pub const EXIT_CONFIG: i32 = 2;

/// How a subsystem error should be treated by the mode machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Invalid definition, bad kubeconfig, missing permissions at startup.
    /// Surfaced; the offending item is skipped, others continue.
    Configuration,
    /// Network failure, API throttling. Cached data keeps serving; watches retry.
    Transient,
    /// 404 for a kind, RBAC denied. The kind is unavailable in this context.
    Permanent,
    /// Template execution failure. The cell shows the error; the row survives.
    Rendering,
    /// Log reader closed or errored. The source is dropped, others continue.
    Stream,
    /// Process-wide invariant violation. Logged, process exits with code 1.
    Fatal,
}

pub trait Classify {
    fn class(&self) -> ErrorClass;
}

impl Classify for DefinitionError {
    fn class(&self) -> ErrorClass {
        ErrorClass::Configuration
    }
}

impl Classify for TemplateError {
    fn class(&self) -> ErrorClass {
        ErrorClass::Rendering
    }
}

impl Classify for FacadeError {
    fn class(&self) -> ErrorClass {
        if self.is_permanent() {
            ErrorClass::Permanent
        } else {
            ErrorClass::Transient
        }
    }
}

impl Classify for EngineError {
    fn class(&self) -> ErrorClass {
        match self {
            EngineError::UnknownKind(_) => ErrorClass::Configuration,
            EngineError::Facade(e) => e.class(),
        }
    }
}
