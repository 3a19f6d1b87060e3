//! kubewatch library — exposes all internal modules so integration tests in tests/ can import them.
//! This is a CLI tool; the lib target exists solely to give the test suite access to internal
//! types. `must_use_candidate` and `missing_errors_doc` are suppressed because these are
//! implementation details, not a published library API.
#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::module_name_repetitions,
    clippy::too_many_lines,
    clippy::must_use_candidate,   // internal helpers; callers are tests, not library consumers
    clippy::missing_errors_doc,   // errors are surfaced through the mode machine, not rustdoc
    clippy::missing_panics_doc,   // Mutex::lock().expect() on local locks can't deadlock
)]

pub mod cache;
pub mod cli;
pub mod definition;
pub mod engine;
pub mod error;
pub mod event;
pub mod k8s;
pub mod logs;
pub mod mode;
pub mod registry;
pub mod render;
pub mod resource;
pub mod select;
pub mod style;
pub mod template;
pub mod ui;
