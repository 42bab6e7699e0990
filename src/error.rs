//! Error types for query merging and batch execution.

use displaydoc::Display;
use thiserror::Error;

/// Errors raised while combining queries into a single document or while
/// splitting a combined response back apart.
#[derive(Error, Display, Debug, Clone, Eq, PartialEq)]
#[non_exhaustive]
pub enum MergeError {
    /// found a non-field selection where only plain fields can be folded
    NonFieldSelection,

    /// expected {expected} responses to unmerge but got {actual}
    ResponseCountMismatch {
        /// How many responses the dispatch list called for.
        expected: usize,

        /// How many responses were supplied.
        actual: usize,
    },
}

/// Usage errors for [`crate::batching::Batch`].
///
/// These are surfaced synchronously to the offending caller and are never
/// retried.
#[derive(Error, Display, Debug, Clone, Eq, PartialEq)]
#[non_exhaustive]
pub enum BatchError {
    /// cannot queue a query: the batch has already started
    AlreadyStarted,

    /// the batch has already been run
    AlreadyRun,
}

/// Errors delivered through a [`crate::batching::ResponseHandle`] when a
/// query's fate depended on a failed executor call.
#[derive(Error, Display, Debug, Clone, Eq, PartialEq)]
#[non_exhaustive]
pub enum FetchError {
    /// query execution failed: {reason}
    ExecutionError {
        /// The reason the executor call failed.
        reason: String,
    },

    /// queries could not be combined: {reason}
    MergeFailed {
        /// The reason the merge failed.
        reason: String,
    },

    /// the batch was dropped before producing a response
    Aborted,
}
