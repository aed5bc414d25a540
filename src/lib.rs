#![doc = include_str!("../README.md")]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(
    clippy::unwrap_used,
    clippy::panic,
    clippy::unimplemented,
    clippy::todo,
    clippy::undocumented_unsafe_blocks
)]

use std::{
    future::Future,
    sync::{Mutex, MutexGuard, PoisonError},
    time::Duration,
};

const SERVICE_TYPE: &str = "_ndi._tcp.local.";
const SDK_VERSION: &str = "6.0.0";
const SDK_PLATFORM: &str = "LINUX";

/// A timeout that never elapses, to block until data or a state change.
pub const FOREVER: Duration = Duration::MAX;

fn hostname() -> String {
    let hostname = gethostname::gethostname();
    String::from_utf8_lossy(&hostname.into_encoded_bytes()).to_string()
}

fn name(subname: &str) -> String {
    format!("{} ({subname})", hostname().to_ascii_uppercase())
}

/// Lock `mutex`, recovering the guard if a previous holder panicked.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Run `fut` to completion or until `timeout` elapses.
///
/// The future is always polled at least once, so a [`Duration::ZERO`] timeout
/// behaves like a poll, and [`FOREVER`] never elapses.
async fn timeout<F: Future>(timeout: Duration, fut: F) -> Option<F::Output> {
    tokio::time::timeout(timeout, fut).await.ok()
}

mod error;
pub use error::{Error, Result};

pub mod alloc;
pub mod clock;
pub mod frame;
pub mod io;
mod queue;

mod source;
pub use source::Source;

pub mod discovery;
pub mod scan;

pub mod recv;
pub mod send;

pub mod avsync;
pub mod framesync;
pub mod genlock;
