//! Selection trees: which fields of a type the client asked for.

use arcstr::ArcStr;
use indexmap::IndexMap;
use serde_json::Value;

use crate::{
    DomainError, DomainResult, JsonMap,
    registry::{FieldType, Registry, TypeDef},
};

/// Key carrying the arguments of the enclosing field or root operation
pub const ARGS_KEY: &str = "__args";

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Selection {
    fields: IndexMap<ArcStr, FieldSelection>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct FieldSelection {
    pub args: Option<Value>,
    /// Sub-selection for object fields; `None` for `true` leaves
    pub nested: Option<Selection>,
}

impl Selection {
    /// Selection of the given leaf fields
    pub fn leaves<'a>(names: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            fields: names
                .into_iter()
                .map(|name| (ArcStr::from(name), FieldSelection::default()))
                .collect(),
        }
    }

    /// Parse and validate a query value against `type_def`, returning the root `__args` too.
    pub fn parse(
        registry: &Registry,
        type_def: &TypeDef,
        query: &Value,
    ) -> DomainResult<(Self, Option<Value>)> {
        match query {
            Value::Object(map) => Self::parse_object(registry, type_def, map, 0),
            Value::Bool(true) | Value::Null => Ok((Self::default(), None)),
            _ => Err(DomainError::args("query must be `true` or an object")),
        }
    }

    fn parse_object(
        registry: &Registry,
        type_def: &TypeDef,
        map: &JsonMap,
        depth: usize,
    ) -> DomainResult<(Self, Option<Value>)> {
        let mut selection = Self::default();
        let mut args = None;

        for (key, value) in map {
            if key == ARGS_KEY {
                args = Some(value.clone());
                continue;
            }

            let field = type_def.get_field(key).ok_or_else(|| {
                DomainError::invalid_field(format!(
                    "unknown field `{key}` on type `{}`",
                    type_def.name()
                ))
                .at_field(key.as_str())
            })?;

            if field.hidden || (depth > 0 && field.nest_hidden) {
                return Err(
                    DomainError::invalid_field(format!("field `{key}` is not selectable"))
                        .at_field(key.as_str()),
                );
            }

            let field_selection = match (value, &field.ty) {
                (Value::Bool(true), _) => FieldSelection::default(),
                (Value::Bool(false) | Value::Null, _) => continue,
                (Value::Object(nested), FieldType::Object(type_ref)) => {
                    let target = registry.resolve(type_ref)?;
                    let (nested, args) = Self::parse_object(registry, target, nested, depth + 1)
                        .map_err(|error| error.at_field(key.as_str()))?;
                    FieldSelection {
                        args,
                        nested: Some(nested),
                    }
                }
                (Value::Object(nested), FieldType::Scalar(_))
                    if nested.keys().all(|key| key == ARGS_KEY) =>
                {
                    FieldSelection {
                        args: nested.get(ARGS_KEY).cloned(),
                        nested: None,
                    }
                }
                (Value::Object(_), FieldType::Scalar(_)) => {
                    return Err(DomainError::invalid_field(format!(
                        "field `{key}` has no sub-fields"
                    ))
                    .at_field(key.as_str()));
                }
                _ => {
                    return Err(
                        DomainError::args(format!("invalid selection of `{key}`"))
                            .at_field(key.as_str()),
                    );
                }
            };

            selection.fields.insert(key.as_str().into(), field_selection);
        }

        Ok((selection, args))
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&FieldSelection> {
        self.fields.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ArcStr, &FieldSelection)> {
        self.fields.iter()
    }

    /// This selection with `name` added as a leaf unless already present
    pub fn with_leaf(mut self, name: &str) -> Self {
        if !self.fields.contains_key(name) {
            self.fields.insert(name.into(), FieldSelection::default());
        }
        self
    }

    /// Keep only the selected keys of `record`, recursively.
    pub fn project(&self, mut record: JsonMap) -> JsonMap {
        let mut output = JsonMap::with_capacity(self.fields.len());

        for (name, field_selection) in &self.fields {
            let value = record.remove(name.as_str()).unwrap_or(Value::Null);
            let value = match &field_selection.nested {
                Some(nested) => nested.project_value(value),
                None => value,
            };
            output.insert(name.to_string(), value);
        }

        output
    }

    fn project_value(&self, value: Value) -> Value {
        match value {
            Value::Object(map) => Value::Object(self.project(map)),
            Value::Array(items) => Value::Array(
                items
                    .into_iter()
                    .map(|item| self.project_value(item))
                    .collect(),
            ),
            other => other,
        }
    }
}

/// Selection of a paginator result.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PaginatorSelection {
    pub total: bool,
    pub count: bool,
    pub start_cursor: bool,
    pub end_cursor: bool,
    pub edges: Option<EdgeSelection>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct EdgeSelection {
    pub node: Option<Selection>,
    pub cursor: bool,
}

impl PaginatorSelection {
    pub fn parse(
        registry: &Registry,
        type_def: &TypeDef,
        query: &Value,
    ) -> DomainResult<(Self, Option<Value>)> {
        let mut selection = Self::default();
        let mut args = None;

        let Value::Object(map) = query else {
            return Ok((selection, args));
        };

        for (key, value) in map {
            match (key.as_str(), value) {
                (ARGS_KEY, _) => args = Some(value.clone()),
                ("paginatorInfo", Value::Object(info)) => {
                    for (info_key, info_value) in info {
                        let selected = info_value == &Value::Bool(true);
                        match info_key.as_str() {
                            "total" => selection.total = selected,
                            "count" => selection.count = selected,
                            "startCursor" => selection.start_cursor = selected,
                            "endCursor" => selection.end_cursor = selected,
                            other => {
                                return Err(DomainError::invalid_field(format!(
                                    "unknown field `{other}` on paginatorInfo"
                                ))
                                .at_field(other)
                                .at_field("paginatorInfo"));
                            }
                        }
                    }
                }
                ("edges", Value::Object(edges)) => {
                    let mut edge_selection = EdgeSelection::default();
                    for (edge_key, edge_value) in edges {
                        match (edge_key.as_str(), edge_value) {
                            ("cursor", value) => edge_selection.cursor = value == &Value::Bool(true),
                            ("node", Value::Object(_)) | ("node", Value::Bool(true)) => {
                                let (node, _) = Selection::parse(registry, type_def, edge_value)
                                    .map_err(|error| error.at_field("node").at_field("edges"))?;
                                edge_selection.node = Some(node);
                            }
                            (other, _) => {
                                return Err(DomainError::invalid_field(format!(
                                    "invalid edge selection `{other}`"
                                ))
                                .at_field(other)
                                .at_field("edges"));
                            }
                        }
                    }
                    selection.edges = Some(edge_selection);
                }
                (other, _) => {
                    return Err(DomainError::invalid_field(format!(
                        "invalid paginator selection `{other}`"
                    ))
                    .at_field(other));
                }
            }
        }

        Ok((selection, args))
    }

    pub fn node(&self) -> Option<&Selection> {
        self.edges.as_ref().and_then(|edges| edges.node.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::registry::{FieldDef, SqlType};

    fn registry() -> std::sync::Arc<Registry> {
        let mut builder = Registry::builder();
        builder.register(
            TypeDef::new("user")
                .field("name", FieldDef::scalar(SqlType::Text))
                .field("password", FieldDef::scalar(SqlType::Text).hidden())
                .field("email", FieldDef::scalar(SqlType::Text).nest_hidden())
                .created_by("user"),
        );
        builder.finalize().unwrap()
    }

    #[test]
    fn parse_nested_selection_with_args() {
        let registry = registry();
        let user = registry.type_def("user").unwrap();

        let (selection, args) = Selection::parse(
            &registry,
            user,
            &json!({
                "__args": { "id": "u1" },
                "name": true,
                "email": false,
                "createdBy": { "id": true, "name": true }
            }),
        )
        .unwrap();

        assert_eq!(Some(json!({ "id": "u1" })), args);
        assert!(selection.contains("name"));
        assert!(!selection.contains("email"));
        assert_eq!(
            Some(&Selection::leaves(["id", "name"])),
            selection.get("createdBy").unwrap().nested.as_ref()
        );
    }

    #[test]
    fn hidden_fields_are_rejected() {
        let registry = registry();
        let user = registry.type_def("user").unwrap();

        let error = Selection::parse(&registry, user, &json!({ "password": true })).unwrap_err();
        assert_eq!("InvalidFieldError", error.kind().type_name());

        Selection::parse(&registry, user, &json!({ "email": true })).unwrap();
        let error = Selection::parse(&registry, user, &json!({ "createdBy": { "email": true } }))
            .unwrap_err();
        assert_eq!(
            vec![ArcStr::from("createdBy"), ArcStr::from("email")],
            error.field_path()
        );
    }

    #[test]
    fn scalar_fields_have_no_sub_fields() {
        let registry = registry();
        let user = registry.type_def("user").unwrap();

        let error =
            Selection::parse(&registry, user, &json!({ "name": { "first": true } })).unwrap_err();
        assert_eq!("InvalidFieldError", error.kind().type_name());
    }

    #[test]
    fn project_keeps_selected_keys() {
        let selection = Selection::leaves(["name"]);
        let projected = selection.project(
            json!({ "id": "u1", "name": "a", "$last_id": "u1" })
                .as_object()
                .unwrap()
                .clone(),
        );

        assert_eq!(json!({ "name": "a" }), Value::Object(projected));
    }

    #[test]
    fn parse_paginator_selection() {
        let registry = registry();
        let user = registry.type_def("user").unwrap();

        let (selection, args) = PaginatorSelection::parse(
            &registry,
            user,
            &json!({
                "__args": { "first": 2 },
                "paginatorInfo": { "total": true, "endCursor": true },
                "edges": { "node": { "name": true }, "cursor": true }
            }),
        )
        .unwrap();

        assert_eq!(Some(json!({ "first": 2 })), args);
        assert!(selection.total && selection.end_cursor);
        assert!(!selection.count && !selection.start_cursor);
        assert_eq!(Some(&Selection::leaves(["name"])), selection.node());
    }
}
