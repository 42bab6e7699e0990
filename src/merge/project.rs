//! Projection of a combined response back into per-query shapes.

use crate::graphql::Error;
use crate::json_ext::Object;
use crate::json_ext::Path;
use crate::json_ext::PathElement;
use crate::json_ext::Value;

/// Links one of a query's requested fields to its slot in the combined
/// document.
///
/// `alias` is the response key the combined document uses for the field,
/// `output` is the response key the original query asked for. `child` is
/// present when the field's own selections were folded as well and must be
/// projected recursively; when absent the subtree under `alias` is returned
/// verbatim.
#[derive(Clone, Debug)]
pub(crate) struct FieldMapping {
    pub(crate) alias: String,
    pub(crate) output: String,
    pub(crate) child: Option<Projection>,
}

/// The ordered field mappings reconstructing one query's response shape
/// from a combined response.
///
/// A projection is a pure function of its mapping list: it holds no other
/// state and stays valid for exactly the merge invocation that built it.
#[derive(Clone, Debug, Default)]
pub(crate) struct Projection {
    pub(crate) mappings: Vec<FieldMapping>,
}

impl Projection {
    /// Carve this query's share out of a combined data tree.
    ///
    /// Arrays are mapped over transparently at any level; `null` propagates
    /// without recursing; scalars pass through unchanged.
    pub(crate) fn data(&self, value: &Value) -> Value {
        match value {
            Value::Array(items) => Value::Array(items.iter().map(|item| self.data(item)).collect()),
            Value::Object(combined) => {
                let mut out = Object::new();
                for mapping in &self.mappings {
                    let Some(slot) = combined.get(mapping.alias.as_str()) else {
                        continue;
                    };
                    let projected = match &mapping.child {
                        Some(child) if !slot.is_null() => child.data(slot),
                        _ => slot.clone(),
                    };
                    out.insert(mapping.output.clone(), projected);
                }
                Value::Object(out)
            }
            other => other.clone(),
        }
    }

    /// Keep the combined response's errors that belong to this query,
    /// remapped into the query's own coordinate space.
    ///
    /// Errors without a path, or whose path has no field-name step at all,
    /// are unscoped and attached verbatim.
    pub(crate) fn errors(&self, errors: &[Error]) -> Vec<Error> {
        errors
            .iter()
            .filter_map(|error| match &error.path {
                None => Some(error.clone()),
                Some(path) => self.error_path(&path.0).map(|mapped| {
                    let mut error = error.clone();
                    error.path = Some(Path(mapped));
                    error
                }),
            })
            .collect()
    }

    /// Remap a combined-document error path, or `None` if the error does
    /// not belong to this query.
    fn error_path(&self, path: &[PathElement]) -> Option<Vec<PathElement>> {
        let Some((position, key)) =
            path.iter().enumerate().find_map(|(index, element)| match element {
                PathElement::Key(key) => Some((index, key)),
                PathElement::Index(_) => None,
            })
        else {
            // No field-name component: unscoped, copied verbatim.
            return Some(path.to_vec());
        };
        let mapping = self.mappings.iter().find(|mapping| mapping.alias == *key)?;

        let mut mapped: Vec<PathElement> = path[..position].to_vec();
        mapped.push(PathElement::Key(mapping.output.clone()));
        match &mapping.child {
            None => mapped.extend(path[position + 1..].iter().cloned()),
            Some(child) => mapped.extend(child.error_path(&path[position + 1..])?),
        }
        Some(mapped)
    }
}

#[cfg(test)]
mod tests {
    use serde_json_bytes::json;

    use super::*;

    fn leaf(alias: &str, output: &str) -> FieldMapping {
        FieldMapping {
            alias: alias.to_string(),
            output: output.to_string(),
            child: None,
        }
    }

    fn projection(mappings: Vec<FieldMapping>) -> Projection {
        Projection { mappings }
    }

    fn error_at(path: &str) -> Error {
        Error::builder()
            .message(format!("failed at {path}"))
            .path(Path::from(path))
            .build()
    }

    #[test]
    fn data_renames_and_recurses() {
        let combined = json!({
            "user": { "id": 3, "b": [{ "name": "Team A" }] },
            "a": { "id": 4 },
        });
        let projection = projection(vec![FieldMapping {
            alias: "user".to_string(),
            output: "user".to_string(),
            child: Some(Projection {
                mappings: vec![leaf("id", "id"), leaf("b", "teams")],
            }),
        }]);
        assert_eq!(
            projection.data(&combined),
            json!({ "user": { "id": 3, "teams": [{ "name": "Team A" }] } })
        );
    }

    #[test]
    fn data_null_short_circuits() {
        let combined = json!({ "user": null });
        let projection = projection(vec![FieldMapping {
            alias: "user".to_string(),
            output: "user".to_string(),
            child: Some(Projection {
                mappings: vec![leaf("id", "id")],
            }),
        }]);
        assert_eq!(projection.data(&combined), json!({ "user": null }));
    }

    #[test]
    fn data_skips_missing_slots() {
        let combined = json!({ "other": 1 });
        let projection = projection(vec![leaf("user", "user")]);
        assert_eq!(projection.data(&combined), json!({}));
    }

    #[test]
    fn data_maps_over_arrays() {
        let combined = json!([{ "a": 1, "junk": 2 }, null, { "a": 3 }]);
        let projection = projection(vec![leaf("a", "answer")]);
        assert_eq!(
            projection.data(&combined),
            json!([{ "answer": 1 }, null, { "answer": 3 }])
        );
    }

    #[test]
    fn errors_are_remapped_and_filtered() {
        let projection = projection(vec![FieldMapping {
            alias: "a".to_string(),
            output: "user".to_string(),
            child: Some(Projection {
                mappings: vec![leaf("id", "id"), leaf("b", "teams")],
            }),
        }]);

        // Belongs to this query: outer and inner steps both remapped.
        let errors = projection.errors(&[error_at("a/b/1/name")]);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].path, Some(Path::from("user/teams/1/name")));

        // Rooted at a slot some other query owns: dropped.
        assert!(projection.errors(&[error_at("user/id")]).is_empty());

        // Nested step this query did not select: dropped.
        assert!(projection.errors(&[error_at("a/name")]).is_empty());
    }

    #[test]
    fn unscoped_errors_are_kept_verbatim() {
        let projection = projection(vec![leaf("a", "user")]);

        let pathless = Error::builder().message("the server fell over").build();
        assert_eq!(projection.errors(&[pathless.clone()]), vec![pathless]);

        let index_only = error_at("0/1");
        assert_eq!(
            projection.errors(&[index_only.clone()]),
            vec![index_only]
        );
    }

    #[test]
    fn leading_indices_are_preserved() {
        let projection = projection(vec![leaf("a", "user")]);
        let errors = projection.errors(&[error_at("0/a/name")]);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].path, Some(Path::from("0/user/name")));
    }
}
