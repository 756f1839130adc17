//! # guestctl-actions
//!
//! Synthetic input and screen capture on the remote display.
//!
//! This crate provides:
//! - `ActionExecutor`: one `xdotool` invocation per UI primitive
//! - `BatchRunner`: validate-then-run sequences that stop at the first failure
//! - `capture_screenshot`: `scrot` on the guest, stored as a workspace artifact

mod batch;
mod executor;
mod screenshot;

pub use batch::BatchRunner;
pub use executor::{normalize_key, ActionExecutor};
pub use screenshot::capture_screenshot;
