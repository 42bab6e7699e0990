//! Folding of mergeable queries into one shared document.

use std::collections::HashMap;
use std::collections::HashSet;

use apollo_compiler::ast;
use apollo_compiler::Name;
use apollo_compiler::Node;

use super::names::NameAllocator;
use super::project::FieldMapping;
use super::project::Projection;
use crate::error::MergeError;
use crate::graphql::Query;
use crate::json_ext::Object;

/// Accumulates the combined document across one merge invocation.
///
/// Each eligible query is folded in turn; the combiner owns the growing
/// top-level field list, the combined variable definitions and their bound
/// values, and the combined fragment definitions. Input documents are never
/// mutated: folding rebuilds only the nodes it changes.
pub(crate) struct Combiner {
    fields: Vec<Node<ast::Field>>,
    variables: Vec<Node<ast::VariableDefinition>>,
    variable_values: Object,
    fragments: Vec<Node<ast::FragmentDefinition>>,
    // Fragment definitions already emitted, for identity-level dedup.
    emitted_fragments: Vec<EmittedFragment>,
    variable_names: NameAllocator,
    fragment_names: NameAllocator,
}

/// One fragment definition already present in the combined document,
/// remembered together with how its references were resolved when its body
/// was rewritten. A later query may point its spreads at this copy only if
/// its own rename maps resolve every one of those references identically;
/// otherwise the shared definition node gets a second, independently
/// rewritten copy.
struct EmittedFragment {
    definition: Node<ast::FragmentDefinition>,
    name: Name,
    variables: HashMap<String, Name>,
    spreads: HashMap<String, Name>,
}

impl Combiner {
    pub(crate) fn new() -> Self {
        Self {
            fields: Vec::new(),
            variables: Vec::new(),
            variable_values: Object::new(),
            fragments: Vec::new(),
            emitted_fragments: Vec::new(),
            variable_names: NameAllocator::new(),
            fragment_names: NameAllocator::new(),
        }
    }

    /// Fold one eligible query into the combined document, returning the
    /// projection that later carves its share back out of the combined
    /// response.
    pub(crate) fn fold(&mut self, query: &Query) -> Result<Projection, MergeError> {
        let operation = super::operation(&query.document).ok_or(MergeError::NonFieldSelection)?;

        let variable_renames = self.fold_variables(operation, query);
        let fragment_renames = self.fold_fragments(&query.document, &variable_renames);

        let mut renamed_fields = Vec::with_capacity(operation.selection_set.len());
        for selection in &operation.selection_set {
            match selection {
                ast::Selection::Field(field) => renamed_fields.push(rewrite_field(
                    field,
                    &variable_renames,
                    &fragment_renames,
                )),
                // Eligibility filtering only admits plain fields here.
                _ => return Err(MergeError::NonFieldSelection),
            }
        }

        let mappings = fold_fields(&mut self.fields, &renamed_fields)?;
        Ok(Projection { mappings })
    }

    /// Build the combined query from everything folded so far.
    pub(crate) fn finish(self) -> Query {
        let operation = ast::OperationDefinition {
            operation_type: ast::OperationType::Query,
            name: None,
            variables: self.variables,
            directives: Default::default(),
            selection_set: self
                .fields
                .into_iter()
                .map(ast::Selection::Field)
                .collect(),
        };
        let mut document = ast::Document::new();
        document
            .definitions
            .push(ast::Definition::OperationDefinition(Node::new(operation)));
        for fragment in self.fragments {
            document
                .definitions
                .push(ast::Definition::FragmentDefinition(fragment));
        }
        Query {
            document,
            variables: self.variable_values,
        }
    }

    /// Resolve the query's variable definitions against the combined set,
    /// returning the rename map to apply to its trees.
    ///
    /// Deduplication is value-level: an earlier combined variable is reused
    /// when the default values match, neither side carries directives, and
    /// the bound runtime values are identical. Otherwise the original name
    /// is kept when free, or a fresh alphabetic name is minted.
    fn fold_variables(
        &mut self,
        operation: &ast::OperationDefinition,
        query: &Query,
    ) -> HashMap<String, Name> {
        let mut renames = HashMap::new();
        for variable in &operation.variables {
            let bound = query.variables.get(variable.name.as_str());
            if let Some(existing) = self.reusable_variable(variable, bound) {
                renames.insert(variable.name.to_string(), existing);
                continue;
            }
            let name = Name::new_unchecked(&self.variable_names.claim(variable.name.as_str()));
            self.variables.push(Node::new(ast::VariableDefinition {
                name: name.clone(),
                ty: variable.ty.clone(),
                default_value: variable.default_value.clone(),
                directives: variable.directives.clone(),
            }));
            if let Some(value) = bound {
                self.variable_values.insert(name.as_str(), value.clone());
            }
            renames.insert(variable.name.to_string(), name);
        }
        renames
    }

    fn reusable_variable(
        &self,
        candidate: &ast::VariableDefinition,
        bound: Option<&crate::json_ext::Value>,
    ) -> Option<Name> {
        if !candidate.directives.is_empty() {
            return None;
        }
        self.variables
            .iter()
            .find(|existing| {
                existing.directives.is_empty()
                    && same_optional_value(
                        existing.default_value.as_deref(),
                        candidate.default_value.as_deref(),
                    )
                    && self.variable_values.get(existing.name.as_str()) == bound
                    // With no bound value the declared type is the only
                    // signal left that the variables are interchangeable.
                    && (bound.is_some() || existing.ty == candidate.ty)
            })
            .map(|existing| existing.name.clone())
    }

    /// Resolve the query's fragment definitions against the combined set,
    /// returning the rename map for its fragment spreads.
    ///
    /// The same definition node reused by several queries maps to one slot
    /// and is emitted once, provided this query resolves every variable and
    /// spread inside it exactly as the emitted copy did; a shared definition
    /// under diverging renames is rewritten into a fresh copy instead.
    /// Textually distinct definitions keep their name when free or get a
    /// fresh one. Names are assigned for the whole document before any body
    /// is rewritten so that spreads between fragments of the same query
    /// resolve correctly.
    fn fold_fragments(
        &mut self,
        document: &ast::Document,
        variable_renames: &HashMap<String, Name>,
    ) -> HashMap<String, Name> {
        let definitions: Vec<&Node<ast::FragmentDefinition>> = document
            .definitions
            .iter()
            .filter_map(|definition| match definition {
                ast::Definition::FragmentDefinition(fragment) => Some(fragment),
                _ => None,
            })
            .collect();
        let local: HashSet<&str> = definitions
            .iter()
            .map(|definition| definition.name.as_str())
            .collect();
        let references: HashMap<&str, FragmentReferences> = definitions
            .iter()
            .map(|definition| (definition.name.as_str(), fragment_references(definition)))
            .collect();

        // A definition is a reuse candidate when it is the very node already
        // emitted and this query's variables resolve to the same combined
        // names the emitted body carries.
        let mut reusable: HashMap<&str, usize> = HashMap::new();
        for definition in &definitions {
            let refs = &references[definition.name.as_str()];
            let candidate = self.emitted_fragments.iter().position(|emitted| {
                emitted.definition.ptr_eq(definition)
                    && refs.variables.iter().all(|variable| {
                        emitted.variables.get(variable)
                            == Some(&resolve_variable(variable_renames, variable))
                    })
            });
            if let Some(index) = candidate {
                reusable.insert(definition.name.as_str(), index);
            }
        }

        // Spreads inside a candidate must keep resolving to the names the
        // emitted body uses; losing one candidate can invalidate another, so
        // iterate to a fixed point.
        loop {
            let mut dropped = false;
            for definition in &definitions {
                let Some(&index) = reusable.get(definition.name.as_str()) else {
                    continue;
                };
                let emitted = &self.emitted_fragments[index];
                let intact = references[definition.name.as_str()]
                    .fragments
                    .iter()
                    .all(|spread| {
                        let resolved = match reusable.get(spread.as_str()) {
                            Some(&inner) => Some(self.emitted_fragments[inner].name.clone()),
                            // A sibling that gets re-emitted takes a fresh
                            // name, so the emitted spread no longer matches.
                            None if local.contains(spread.as_str()) => None,
                            // A dangling spread stays untouched either way.
                            None => Some(Name::new_unchecked(spread)),
                        };
                        resolved.as_ref() == emitted.spreads.get(spread)
                    });
                if !intact {
                    reusable.remove(definition.name.as_str());
                    dropped = true;
                }
            }
            if !dropped {
                break;
            }
        }

        let mut renames = HashMap::new();
        let mut pending = Vec::new();
        for definition in &definitions {
            if let Some(&index) = reusable.get(definition.name.as_str()) {
                renames.insert(
                    definition.name.to_string(),
                    self.emitted_fragments[index].name.clone(),
                );
            } else {
                let name =
                    Name::new_unchecked(&self.fragment_names.claim(definition.name.as_str()));
                renames.insert(definition.name.to_string(), name);
                pending.push(*definition);
            }
        }

        for definition in pending {
            let name = renames[definition.name.as_str()].clone();
            self.fragments.push(Node::new(ast::FragmentDefinition {
                name: name.clone(),
                type_condition: definition.type_condition.clone(),
                directives: rewrite_directives(&definition.directives, variable_renames),
                selection_set: rewrite_selections(
                    &definition.selection_set,
                    variable_renames,
                    &renames,
                ),
            }));
            let refs = &references[definition.name.as_str()];
            self.emitted_fragments.push(EmittedFragment {
                definition: definition.clone(),
                name,
                variables: refs
                    .variables
                    .iter()
                    .map(|variable| {
                        (variable.clone(), resolve_variable(variable_renames, variable))
                    })
                    .collect(),
                spreads: refs
                    .fragments
                    .iter()
                    .map(|spread| {
                        let resolved = renames
                            .get(spread.as_str())
                            .cloned()
                            .unwrap_or_else(|| Name::new_unchecked(spread));
                        (spread.clone(), resolved)
                    })
                    .collect(),
            });
        }
        renames
    }
}

/// The combined-document name a variable reference resolves to; references
/// to undeclared variables pass through unchanged.
fn resolve_variable(variable_renames: &HashMap<String, Name>, variable: &str) -> Name {
    variable_renames
        .get(variable)
        .cloned()
        .unwrap_or_else(|| Name::new_unchecked(variable))
}

/// The variable and fragment names a fragment body mentions.
#[derive(Default)]
struct FragmentReferences {
    variables: HashSet<String>,
    fragments: HashSet<String>,
}

fn fragment_references(definition: &ast::FragmentDefinition) -> FragmentReferences {
    let mut references = FragmentReferences::default();
    collect_directive_variables(&definition.directives, &mut references.variables);
    collect_selection_references(&definition.selection_set, &mut references);
    references
}

fn collect_selection_references(
    selections: &[ast::Selection],
    references: &mut FragmentReferences,
) {
    for selection in selections {
        match selection {
            ast::Selection::Field(field) => {
                for argument in &field.arguments {
                    collect_value_variables(&argument.value, &mut references.variables);
                }
                collect_directive_variables(&field.directives, &mut references.variables);
                collect_selection_references(&field.selection_set, references);
            }
            ast::Selection::FragmentSpread(spread) => {
                references.fragments.insert(spread.fragment_name.to_string());
                collect_directive_variables(&spread.directives, &mut references.variables);
            }
            ast::Selection::InlineFragment(inline) => {
                collect_directive_variables(&inline.directives, &mut references.variables);
                collect_selection_references(&inline.selection_set, references);
            }
        }
    }
}

fn collect_value_variables(value: &ast::Value, variables: &mut HashSet<String>) {
    match value {
        ast::Value::Variable(name) => {
            variables.insert(name.to_string());
        }
        ast::Value::List(items) => {
            for item in items {
                collect_value_variables(item, variables);
            }
        }
        ast::Value::Object(entries) => {
            for (_, entry) in entries {
                collect_value_variables(entry, variables);
            }
        }
        _ => {}
    }
}

fn collect_directive_variables(directives: &ast::DirectiveList, variables: &mut HashSet<String>) {
    for directive in directives.iter() {
        for argument in &directive.arguments {
            collect_value_variables(&argument.value, variables);
        }
    }
}

/// The response key under which a field's value appears.
pub(crate) fn response_key(field: &ast::Field) -> &Name {
    field.alias.as_ref().unwrap_or(&field.name)
}

/// Whether a field's own selections can take part in folding: only plain
/// fields, no fragment spreads or inline fragments.
fn mergeable_shape(field: &ast::Field) -> bool {
    field
        .selection_set
        .iter()
        .all(|selection| matches!(selection, ast::Selection::Field(_)))
}

/// Fold `incoming` fields into the `existing` list, recursively reusing
/// structurally compatible fields and appending the rest under fresh,
/// level-unique response keys.
///
/// Returns one mapping per incoming field, which is the inverse map used to
/// project the combined response back to the incoming selection's shape.
fn fold_fields(
    existing: &mut Vec<Node<ast::Field>>,
    incoming: &[Node<ast::Field>],
) -> Result<Vec<FieldMapping>, MergeError> {
    let mut mappings = Vec::with_capacity(incoming.len());
    for field in incoming {
        let output = response_key(field).to_string();

        if mergeable_shape(field) {
            if let Some(slot) = existing
                .iter_mut()
                .find(|candidate| compatible(candidate, field))
            {
                let child = if field.selection_set.is_empty() {
                    None
                } else {
                    Some(fold_into(slot, &field_children(field)?)?)
                };
                mappings.push(FieldMapping {
                    alias: response_key(slot).to_string(),
                    output,
                    child,
                });
                continue;
            }
        }

        // No compatible slot: append under a response key unique at this level.
        let mut level_names =
            NameAllocator::with_reserved(existing.iter().map(|f| response_key(f).to_string()));
        let key = level_names.claim(&output);
        let alias = if key == output {
            field.alias.clone()
        } else {
            Some(Name::new_unchecked(&key))
        };

        let (selection_set, child) = if mergeable_shape(field) && !field.selection_set.is_empty() {
            let mut children = Vec::new();
            let child_mappings = fold_fields(&mut children, &field_children(field)?)?;
            (
                children.into_iter().map(ast::Selection::Field).collect(),
                Some(Projection {
                    mappings: child_mappings,
                }),
            )
        } else {
            // Opaque subtree (or leaf): kept verbatim, projected verbatim.
            (field.selection_set.clone(), None)
        };

        existing.push(Node::new(ast::Field {
            alias,
            name: field.name.clone(),
            arguments: field.arguments.clone(),
            directives: field.directives.clone(),
            selection_set,
        }));
        mappings.push(FieldMapping {
            alias: key,
            output,
            child,
        });
    }
    Ok(mappings)
}

/// Fold `children` into an existing combined field's selection set.
fn fold_into(
    slot: &mut Node<ast::Field>,
    children: &[Node<ast::Field>],
) -> Result<Projection, MergeError> {
    let inner = slot.make_mut();
    let mut existing_children = Vec::with_capacity(inner.selection_set.len());
    for selection in inner.selection_set.drain(..) {
        match selection {
            ast::Selection::Field(field) => existing_children.push(field),
            // Compatibility checks keep opaque subtrees out of this path.
            _ => return Err(MergeError::NonFieldSelection),
        }
    }
    let mappings = fold_fields(&mut existing_children, children)?;
    inner.selection_set = existing_children
        .into_iter()
        .map(ast::Selection::Field)
        .collect();
    Ok(Projection { mappings })
}

fn field_children(field: &ast::Field) -> Result<Vec<Node<ast::Field>>, MergeError> {
    field
        .selection_set
        .iter()
        .map(|selection| match selection {
            ast::Selection::Field(child) => Ok(child.clone()),
            _ => Err(MergeError::NonFieldSelection),
        })
        .collect()
}

/// Whether two fields may be folded into one physical field: same name,
/// no directives on either side, argument lists equal as sets, and both
/// selection sets made of plain fields only.
fn compatible(existing: &ast::Field, incoming: &ast::Field) -> bool {
    existing.name == incoming.name
        && existing.directives.is_empty()
        && incoming.directives.is_empty()
        && same_arguments(&existing.arguments, &incoming.arguments)
        && mergeable_shape(existing)
        && mergeable_shape(incoming)
}

/// Returns true if two argument lists are equivalent.
///
/// The arguments and values must be the same, independent of order.
fn same_arguments(left: &[Node<ast::Argument>], right: &[Node<ast::Argument>]) -> bool {
    if left.len() != right.len() {
        return false;
    }

    let right = right
        .iter()
        .map(|argument| (&argument.name, argument))
        .collect::<HashMap<_, _>>();

    left.iter().all(|argument| {
        right
            .get(&argument.name)
            .is_some_and(|other| same_value(&argument.value, &other.value))
    })
}

/// Compare two input values, assuming no duplicate object keys and ignoring
/// object key order. Variables compare by (already resolved) name; literals
/// by kind and value. Source locations never participate.
fn same_value(left: &ast::Value, right: &ast::Value) -> bool {
    use ast::Value;
    match (left, right) {
        (Value::Null, Value::Null) => true,
        (Value::Enum(left), Value::Enum(right)) => left == right,
        (Value::Variable(left), Value::Variable(right)) => left == right,
        (Value::String(left), Value::String(right)) => left == right,
        (Value::Float(left), Value::Float(right)) => left == right,
        (Value::Int(left), Value::Int(right)) => left == right,
        (Value::Boolean(left), Value::Boolean(right)) => left == right,
        (Value::List(left), Value::List(right)) => {
            left.len() == right.len()
                && left
                    .iter()
                    .zip(right.iter())
                    .all(|(left, right)| same_value(left, right))
        }
        (Value::Object(left), Value::Object(right)) if left.len() == right.len() => {
            left.iter().all(|(key, value)| {
                right
                    .iter()
                    .find(|(other_key, _)| key == other_key)
                    .is_some_and(|(_, other_value)| same_value(value, other_value))
            })
        }
        _ => false,
    }
}

fn same_optional_value(left: Option<&ast::Value>, right: Option<&ast::Value>) -> bool {
    match (left, right) {
        (None, None) => true,
        (Some(left), Some(right)) => same_value(left, right),
        _ => false,
    }
}

/// Rebuild a field with variable references and fragment spreads rewritten
/// to their combined-document names.
fn rewrite_field(
    field: &Node<ast::Field>,
    variable_renames: &HashMap<String, Name>,
    fragment_renames: &HashMap<String, Name>,
) -> Node<ast::Field> {
    Node::new(ast::Field {
        alias: field.alias.clone(),
        name: field.name.clone(),
        arguments: field
            .arguments
            .iter()
            .map(|argument| {
                Node::new(ast::Argument {
                    name: argument.name.clone(),
                    value: rewrite_value(&argument.value, variable_renames),
                })
            })
            .collect(),
        directives: rewrite_directives(&field.directives, variable_renames),
        selection_set: rewrite_selections(&field.selection_set, variable_renames, fragment_renames),
    })
}

fn rewrite_selections(
    selections: &[ast::Selection],
    variable_renames: &HashMap<String, Name>,
    fragment_renames: &HashMap<String, Name>,
) -> Vec<ast::Selection> {
    selections
        .iter()
        .map(|selection| match selection {
            ast::Selection::Field(field) => {
                ast::Selection::Field(rewrite_field(field, variable_renames, fragment_renames))
            }
            ast::Selection::FragmentSpread(spread) => {
                ast::Selection::FragmentSpread(Node::new(ast::FragmentSpread {
                    fragment_name: fragment_renames
                        .get(spread.fragment_name.as_str())
                        .cloned()
                        .unwrap_or_else(|| spread.fragment_name.clone()),
                    directives: rewrite_directives(&spread.directives, variable_renames),
                }))
            }
            ast::Selection::InlineFragment(inline) => {
                ast::Selection::InlineFragment(Node::new(ast::InlineFragment {
                    type_condition: inline.type_condition.clone(),
                    directives: rewrite_directives(&inline.directives, variable_renames),
                    selection_set: rewrite_selections(
                        &inline.selection_set,
                        variable_renames,
                        fragment_renames,
                    ),
                }))
            }
        })
        .collect()
}

fn rewrite_directives(
    directives: &ast::DirectiveList,
    variable_renames: &HashMap<String, Name>,
) -> ast::DirectiveList {
    ast::DirectiveList(
        directives
            .iter()
            .map(|directive| {
                Node::new(ast::Directive {
                    name: directive.name.clone(),
                    arguments: directive
                        .arguments
                        .iter()
                        .map(|argument| {
                            Node::new(ast::Argument {
                                name: argument.name.clone(),
                                value: rewrite_value(&argument.value, variable_renames),
                            })
                        })
                        .collect(),
                })
            })
            .collect(),
    )
}

fn rewrite_value(
    value: &Node<ast::Value>,
    variable_renames: &HashMap<String, Name>,
) -> Node<ast::Value> {
    match value.as_ref() {
        ast::Value::Variable(name) => match variable_renames.get(name.as_str()) {
            Some(renamed) => Node::new(ast::Value::Variable(renamed.clone())),
            None => value.clone(),
        },
        ast::Value::List(items) => Node::new(ast::Value::List(
            items
                .iter()
                .map(|item| rewrite_value(item, variable_renames))
                .collect(),
        )),
        ast::Value::Object(entries) => Node::new(ast::Value::Object(
            entries
                .iter()
                .map(|(key, entry)| (key.clone(), rewrite_value(entry, variable_renames)))
                .collect(),
        )),
        _ => value.clone(),
    }
}
