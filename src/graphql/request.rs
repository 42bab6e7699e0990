use apollo_compiler::ast;
use apollo_compiler::validation::WithErrors;
use serde_json_bytes::ByteString;
use serde_json_bytes::Map as JsonMap;
use serde_json_bytes::Value;

use crate::json_ext::Object;

/// A parsed GraphQL query document together with its variable bindings.
///
/// This is the unit the merge engine and the batch coordinator operate on.
/// Cloning is cheap: the document's AST nodes are reference counted, so a
/// clone is the shallow copy that lets the same logical query be queued
/// more than once.
#[derive(Clone, Debug)]
pub struct Query {
    /// The parsed query document.
    pub document: ast::Document,

    /// The values bound to the document's variables for this call.
    pub variables: Object,
}

#[buildstructor::buildstructor]
impl Query {
    /// Returns a builder that builds a [`Query`] from its components.
    ///
    /// Builder methods:
    ///
    /// * `.document(`[`ast::Document`]`)`
    ///   Required.
    ///   Sets [`Query::document`].
    ///
    /// * `.variables(impl Into<`[`serde_json_bytes::Map`]`<`[`ByteString`]`, `[`Value`]`>>)`
    ///   Optional.
    ///   Sets the entire [`Query::variables`] map, which defaults to empty.
    ///
    /// * `.variable(impl Into<`[`ByteString`]`>, impl Into<`[`Value`]`>)`
    ///   Optional, may be called multiple times.
    ///   Adds one binding to the [`Query::variables`] map.
    ///
    /// * `.build()`
    ///   Finishes the builder and returns a [`Query`].
    #[builder(visibility = "pub")]
    fn new(document: ast::Document, variables: JsonMap<ByteString, Value>) -> Self {
        Self {
            document,
            variables,
        }
    }

    /// Parse `source_text` into a [`Query`] with no variable bindings.
    ///
    /// This is a convenience passthrough to the `apollo-compiler` parser;
    /// bindings can be added afterwards through [`Query::builder`] or by
    /// inserting into [`Query::variables`].
    pub fn parse(source_text: &str) -> Result<Self, WithErrors<ast::Document>> {
        Ok(Self {
            document: ast::Document::parse(source_text, "query.graphql")?,
            variables: Object::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json_bytes::json;

    use super::*;

    #[test]
    fn parse_and_build() {
        let query = Query::parse("query TopProducts { topProducts { upc name } }").unwrap();
        assert!(query.variables.is_empty());

        let query = Query::builder()
            .document(query.document)
            .variable("first", 5)
            .build();
        assert_eq!(query.variables.get("first"), Some(&json!(5)));
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(Query::parse("query { unbalanced {").is_err());
    }
}
