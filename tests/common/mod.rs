//! Common test infrastructure
//!
//! Tests should only import from this module, not from internal submodules.

mod fixtures;
mod http;
mod notifier;

#[allow(unused_imports)]
pub use fixtures::{file_source, wait_for, TestEnv};
#[allow(unused_imports)]
pub use http::{CapturedRequest, FakeHttpServer};
#[allow(unused_imports)]
pub use notifier::{NotifierEvent, RecordingNotifier};
