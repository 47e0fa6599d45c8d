//! Panic-on-failure test helpers shared by the workspace's test suites.
//!
//! `unwrap_used`/`expect_used` are denied workspace-wide (`[workspace.lints.clippy]`)
//! even in test code, so test bodies reach for `must`/`must_some` instead of
//! sprinkling raw `.unwrap()` calls that would trip the lint.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod must;

pub use must::{must, must_err, must_some};
