//! The merge engine: combines independent queries into one document and
//! splits the combined response back into per-query results.
//!
//! [`merge`] decides which of the given queries can safely share one
//! physical request, rewrites their selection trees, variable names and
//! fragment names to avoid collisions, and records for every folded query
//! the inverse mapping needed to carve its own data and errors back out of
//! the combined response.

mod fold;
mod names;
mod project;

use apollo_compiler::ast;
use apollo_compiler::Node;

use self::fold::Combiner;
use self::project::Projection;
use crate::error::MergeError;
use crate::graphql::Query;
use crate::graphql::Response;

/// Where one input query ended up after merging.
#[derive(Clone, Copy, Debug)]
enum Slot {
    /// Folded into the combined query, at this position of the merged list.
    Merged(usize),
    /// Passed through untouched, at this position of the unmerged list.
    Unmerged(usize),
}

/// The outcome of one [`merge`] invocation.
///
/// Holds the combined query (if any), the queries it was folded from, the
/// queries that passed through unmerged, and the projections that split a
/// combined response back apart. A result is only meaningful for the
/// responses of the dispatch it was built for.
#[derive(Debug)]
pub struct MergeResult {
    merged_query: Option<Query>,
    merged_queries: Vec<Query>,
    unmerged_queries: Vec<Query>,
    projections: Vec<Projection>,
    slots: Vec<Slot>,
}

impl MergeResult {
    /// The combined query, if at least one input query was eligible.
    pub fn merged_query(&self) -> Option<&Query> {
        self.merged_query.as_ref()
    }

    /// The input queries folded into the combined query, in input order.
    pub fn merged_queries(&self) -> &[Query] {
        &self.merged_queries
    }

    /// The input queries that could not be combined, in input order.
    pub fn unmerged_queries(&self) -> &[Query] {
        &self.unmerged_queries
    }

    /// The ordered dispatch list: the combined query first (when present),
    /// followed by every unmerged query.
    pub fn all_queries(&self) -> Vec<Query> {
        self.merged_query
            .iter()
            .chain(self.unmerged_queries.iter())
            .cloned()
            .collect()
    }

    /// Split a combined response into one response per merged query, in the
    /// same order as [`MergeResult::merged_queries`].
    pub fn unmerge_merged_queries(&self, response: &Response) -> Vec<Response> {
        self.projections
            .iter()
            .map(|projection| {
                Response::builder()
                    .and_data(response.data.as_ref().map(|data| projection.data(data)))
                    .errors(projection.errors(&response.errors))
                    .build()
            })
            .collect()
    }

    /// Consume responses in dispatch order (see [`MergeResult::all_queries`])
    /// and return responses in the original input order.
    pub fn unmerge_all_queries(&self, responses: &[Response]) -> Result<Vec<Response>, MergeError> {
        let combined = usize::from(self.merged_query.is_some());
        let expected = combined + self.unmerged_queries.len();
        if responses.len() != expected {
            return Err(MergeError::ResponseCountMismatch {
                expected,
                actual: responses.len(),
            });
        }

        let merged_responses = match (combined, responses.first()) {
            (1, Some(response)) => self.unmerge_merged_queries(response),
            _ => Vec::new(),
        };
        let unmerged_responses = &responses[combined..];

        Ok(self
            .slots
            .iter()
            .map(|slot| match slot {
                Slot::Merged(index) => merged_responses[*index].clone(),
                Slot::Unmerged(index) => unmerged_responses[*index].clone(),
            })
            .collect())
    }

    /// For each merged query, its position in the original input list.
    pub(crate) fn merged_input_positions(&self) -> Vec<usize> {
        self.position_of(|slot| match slot {
            Slot::Merged(index) => Some(*index),
            Slot::Unmerged(_) => None,
        })
    }

    /// For each unmerged query, its position in the original input list.
    pub(crate) fn unmerged_input_positions(&self) -> Vec<usize> {
        self.position_of(|slot| match slot {
            Slot::Merged(_) => None,
            Slot::Unmerged(index) => Some(*index),
        })
    }

    fn position_of(&self, select: impl Fn(&Slot) -> Option<usize>) -> Vec<usize> {
        let mut positions: Vec<(usize, usize)> = self
            .slots
            .iter()
            .enumerate()
            .filter_map(|(input, slot)| select(slot).map(|index| (index, input)))
            .collect();
        positions.sort_unstable();
        positions.into_iter().map(|(_, input)| input).collect()
    }
}

/// Combine as many of the given queries as is safe into one query.
///
/// Queries are folded in input order. A list with a single entry is never
/// merged: it is returned as-is on the unmerged path with an identity
/// unmerge. Cloning of the inputs means callers can keep, requeue, or
/// re-merge the same `Query` values freely afterwards.
pub fn merge(queries: &[Query]) -> Result<MergeResult, MergeError> {
    if queries.len() == 1 {
        return Ok(MergeResult {
            merged_query: None,
            merged_queries: Vec::new(),
            unmerged_queries: vec![queries[0].clone()],
            projections: Vec::new(),
            slots: vec![Slot::Unmerged(0)],
        });
    }

    let mut combiner = Combiner::new();
    let mut merged_queries = Vec::new();
    let mut unmerged_queries = Vec::new();
    let mut projections = Vec::new();
    let mut slots = Vec::with_capacity(queries.len());

    for query in queries {
        if eligible(&query.document) {
            projections.push(combiner.fold(query)?);
            slots.push(Slot::Merged(merged_queries.len()));
            merged_queries.push(query.clone());
        } else {
            slots.push(Slot::Unmerged(unmerged_queries.len()));
            unmerged_queries.push(query.clone());
        }
    }

    let merged_query = (!merged_queries.is_empty()).then(|| combiner.finish());
    tracing::debug!(
        merged = merged_queries.len(),
        unmerged = unmerged_queries.len(),
        "combined queries into a single document"
    );

    Ok(MergeResult {
        merged_query,
        merged_queries,
        unmerged_queries,
        projections,
        slots,
    })
}

/// The first operation of a document, if any.
pub(crate) fn operation(document: &ast::Document) -> Option<&Node<ast::OperationDefinition>> {
    document.definitions.iter().find_map(|definition| match definition {
        ast::Definition::OperationDefinition(operation) => Some(operation),
        _ => None,
    })
}

/// A query may be folded into a combined document iff its document holds
/// exactly one operation, that operation is a query with no directives, and
/// every one of its top-level selections is a plain field. Anything else
/// (mutations, subscriptions, multi-operation documents, operation-level
/// directives, top-level fragment usage) goes through unmerged.
fn eligible(document: &ast::Document) -> bool {
    let mut operations = document.definitions.iter().filter_map(|definition| {
        match definition {
            ast::Definition::OperationDefinition(operation) => Some(operation),
            _ => None,
        }
    });
    let Some(operation) = operations.next() else {
        return false;
    };
    if operations.next().is_some() {
        return false;
    }
    operation.operation_type == ast::OperationType::Query
        && operation.directives.is_empty()
        && operation
            .selection_set
            .iter()
            .all(|selection| matches!(selection, ast::Selection::Field(_)))
}
