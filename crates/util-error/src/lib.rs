// SPDX-License-Identifier: MIT

//! Error plumbing shared by all the crates
//!
//! Library crates define their own `snafu` enums. What is here is for the
//! seams where the concrete error is someone else's business (network,
//! bridge submission, backend commit) and for binaries.

use snafu::Snafu;

pub mod fmt;

/// Error from an implementation we don't know the type of
pub type BoxedError = Box<dyn std::error::Error + Send + Sync + 'static>;
pub type BoxedErrorResult<T> = std::result::Result<T, BoxedError>;

pub type WhateverResult<T> = std::result::Result<T, Whatever>;

/// Snafu's `Whatever`, but `Send + Sync` so it can cross tasks
#[derive(Debug, Snafu)]
#[snafu(whatever, display("{message}"))]
pub struct Whatever {
    #[snafu(source(from(BoxedError, Some)))]
    source: Option<BoxedError>,

    message: String,
}
