//! Merges many independent GraphQL queries into a single physical request
//! and splits the combined response back into per-query results,
//! indistinguishable from having sent each query separately.
//!
//! The crate has two parts, in dependency order:
//!
//! * the [merge engine](merge::merge): a pure transformation that decides
//!   which queries can share one document, rewrites selection trees,
//!   variable names and fragment names to avoid collisions, and builds the
//!   inverse projections that carve data and errors back out of the
//!   combined response;
//! * the [batch coordinator](batching::Batch): queues queries, dispatches
//!   the merged and unmerged ones concurrently through a caller-supplied
//!   [executor](batching::QueryExecutor), and recovers from partial
//!   failures by isolating failing queries and re-merging the rest for one
//!   retry pass.
//!
//! Parsing query text and talking to the network are the caller's problem:
//! queries come in as `apollo-compiler` ASTs and leave through whatever
//! transport the executor wraps.
//!
//! ```ignore
//! let batch = Batch::new(|query: Query| async move { transport.send(query).await });
//! let user = batch.queue(&user_query)?;
//! let teams = batch.queue(&teams_query)?;
//! batch.run().await?;
//! let user_response = user.response().await?;
//! ```

#![warn(unreachable_pub)]

pub mod batching;
pub mod error;
pub mod graphql;
pub mod json_ext;
pub mod merge;

pub use batching::Batch;
pub use batching::QueryExecutor;
pub use batching::ResponseHandle;
pub use graphql::Query;
pub use graphql::Response;
pub use merge::merge;
pub use merge::MergeResult;
