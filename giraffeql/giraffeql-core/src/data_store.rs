use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use crate::{
    DomainResult, JsonMap,
    filter::WhereExpr,
    query_args::{ListArgs, PaginationArgs},
    selection::{PaginatorSelection, Selection},
    session::Session,
};

/// One page of a cursor paginated result.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Paginator {
    pub total: Option<u64>,
    pub start_cursor: Option<String>,
    pub end_cursor: Option<String>,
    pub edges: Vec<Edge>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Edge {
    pub node: JsonMap,
    pub cursor: String,
}

impl Paginator {
    /// Render the parts of the page the client selected.
    pub fn render(&self, selection: &PaginatorSelection) -> Value {
        let mut output = JsonMap::new();

        let mut info = JsonMap::new();
        if selection.total {
            info.insert("total".into(), self.total.map(Value::from).unwrap_or(Value::Null));
        }
        if selection.count {
            info.insert("count".into(), Value::from(self.edges.len()));
        }
        if selection.start_cursor {
            info.insert("startCursor".into(), self.start_cursor.clone().into());
        }
        if selection.end_cursor {
            info.insert("endCursor".into(), self.end_cursor.clone().into());
        }
        if !info.is_empty() {
            output.insert("paginatorInfo".into(), Value::Object(info));
        }

        if let Some(edge_selection) = &selection.edges {
            let edges = self
                .edges
                .iter()
                .map(|edge| {
                    let mut output = JsonMap::new();
                    if edge_selection.node.is_some() {
                        output.insert("node".into(), Value::Object(edge.node.clone()));
                    }
                    if edge_selection.cursor {
                        output.insert("cursor".into(), Value::String(edge.cursor.clone()));
                    }
                    Value::Object(output)
                })
                .collect();
            output.insert("edges".into(), Value::Array(edges));
        }

        Value::Object(output)
    }
}

/// The persistence operations behind the root operations.
///
/// Records are JSON objects shaped by the given selection.
#[async_trait::async_trait]
pub trait DataStoreAPI: Send + Sync {
    /// Fetch the record identified by a unique key.
    async fn get(
        &self,
        typename: &str,
        lookup: &JsonMap,
        selection: &Selection,
        session: &Session,
    ) -> DomainResult<JsonMap>;

    async fn get_multiple(
        &self,
        typename: &str,
        args: &ListArgs,
        selection: &Selection,
        session: &Session,
    ) -> DomainResult<Vec<JsonMap>>;

    /// Fetch the records with the given ids in a single query.
    ///
    /// The returned records always include `id`.
    async fn get_by_ids(
        &self,
        typename: &str,
        ids: &[Value],
        selection: &Selection,
        session: &Session,
    ) -> DomainResult<Vec<JsonMap>>;

    async fn get_paginator(
        &self,
        typename: &str,
        args: &PaginationArgs,
        selection: &PaginatorSelection,
        session: &Session,
    ) -> DomainResult<Paginator>;

    async fn count(
        &self,
        typename: &str,
        filter: Option<&WhereExpr>,
        session: &Session,
    ) -> DomainResult<u64>;

    async fn create(
        &self,
        typename: &str,
        args: &JsonMap,
        selection: &Selection,
        session: &Session,
    ) -> DomainResult<JsonMap>;

    async fn update(
        &self,
        typename: &str,
        lookup: &JsonMap,
        fields: &JsonMap,
        selection: &Selection,
        session: &Session,
    ) -> DomainResult<JsonMap>;

    /// Delete the record, returning its selected fields as they were before deletion.
    async fn delete(
        &self,
        typename: &str,
        lookup: &JsonMap,
        selection: &Selection,
        session: &Session,
    ) -> DomainResult<JsonMap>;
}

/// A [DataStoreAPI] in an [Arc].
pub type ArcDataStore = Arc<dyn DataStoreAPI>;

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::selection::EdgeSelection;

    #[test]
    fn render_selected_parts_only() {
        let paginator = Paginator {
            total: Some(3),
            start_cursor: Some("c1".into()),
            end_cursor: Some("c2".into()),
            edges: vec![
                Edge {
                    node: json!({ "name": "a" }).as_object().unwrap().clone(),
                    cursor: "c1".into(),
                },
                Edge {
                    node: json!({ "name": "b" }).as_object().unwrap().clone(),
                    cursor: "c2".into(),
                },
            ],
        };

        let selection = PaginatorSelection {
            total: true,
            count: true,
            start_cursor: false,
            end_cursor: true,
            edges: Some(EdgeSelection {
                node: Some(Selection::leaves(["name"])),
                cursor: false,
            }),
        };

        assert_eq!(
            json!({
                "paginatorInfo": { "total": 3, "count": 2, "endCursor": "c2" },
                "edges": [{ "node": { "name": "a" } }, { "node": { "name": "b" } }]
            }),
            paginator.render(&selection)
        );
    }

    #[test]
    fn empty_page_has_null_cursors() {
        let selection = PaginatorSelection {
            start_cursor: true,
            end_cursor: true,
            ..Default::default()
        };

        assert_eq!(
            json!({ "paginatorInfo": { "startCursor": null, "endCursor": null } }),
            Paginator::default().render(&selection)
        );
    }
}
