//! Provider implementations
//!
//! Real window-system and driver bindings live outside this crate. The
//! headless backend implements both boundary traits in software and is what
//! the tests and the soak binary run against.

pub mod headless;

pub use headless::{HeadlessBackend, HeadlessStats};
