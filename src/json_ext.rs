//! JSON types and response-path helpers.

use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use serde_json_bytes::ByteString;
use serde_json_bytes::Map;

pub use serde_json_bytes::Value;

/// A JSON object.
pub type Object = Map<ByteString, Value>;

/// One step in a response path.
///
/// GraphQL error paths alternate between field response keys and list
/// indices, e.g. `["hero", "friends", 1, "name"]`.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathElement {
    /// An index within a list value.
    Index(usize),

    /// The response key of a field within an object value.
    Key(String),
}

/// A path identifying a location within [`crate::graphql::Response::data`].
#[derive(Clone, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct Path(pub Vec<PathElement>);

impl Path {
    pub fn empty() -> Path {
        Path(Vec::new())
    }

    pub fn iter(&self) -> impl Iterator<Item = &PathElement> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for Path {
    fn from(s: &str) -> Self {
        Self(
            s.split('/')
                .filter(|segment| !segment.is_empty())
                .map(|segment| {
                    if let Ok(index) = segment.parse::<usize>() {
                        PathElement::Index(index)
                    } else {
                        PathElement::Key(segment.to_string())
                    }
                })
                .collect(),
        )
    }
}

impl FromIterator<PathElement> for Path {
    fn from_iter<I: IntoIterator<Item = PathElement>>(iter: I) -> Self {
        Path(iter.into_iter().collect())
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for element in self.iter() {
            write!(f, "/")?;
            match element {
                PathElement::Index(index) => write!(f, "{index}")?,
                PathElement::Key(key) => write!(f, "{key}")?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn path_from_string() {
        let path = Path::from("hero/friends/1/name");
        assert_eq!(
            path,
            Path(vec![
                PathElement::Key("hero".to_string()),
                PathElement::Key("friends".to_string()),
                PathElement::Index(1),
                PathElement::Key("name".to_string()),
            ])
        );
    }

    #[test]
    fn path_serialization() {
        let path = Path::from("hero/friends/1/name");
        assert_eq!(
            serde_json::to_value(&path).unwrap(),
            json!(["hero", "friends", 1, "name"])
        );
        let parsed: Path =
            serde_json::from_value(json!(["hero", "friends", 1, "name"])).unwrap();
        assert_eq!(parsed, path);
    }

    #[test]
    fn path_display() {
        assert_eq!(
            Path::from("hero/friends/1/name").to_string(),
            "/hero/friends/1/name"
        );
        assert_eq!(Path::empty().to_string(), "");
    }
}
