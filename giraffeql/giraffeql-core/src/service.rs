use std::sync::Arc;

use arcstr::ArcStr;

use crate::{
    field_path::FieldPath,
    permission::{AccessControlMap, AccessRule, OperationKey},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SearchMode {
    /// Case-insensitive match of the escaped search query anywhere in the value
    Regex,
    /// Equality with the search query
    Exact,
}

#[derive(Clone, Debug)]
pub struct SearchField {
    pub path: FieldPath,
    pub mode: SearchMode,
}

/// Rows of `typename` referencing a deleted row through `field`.
#[derive(Clone, Debug)]
pub struct Dependent {
    pub typename: ArcStr,
    pub field: ArcStr,
    /// Self-referential tree: delete the whole subtree
    pub recursive: bool,
}

/// The root operations and policies for one type.
#[derive(Clone, Debug)]
pub struct ServiceDef {
    pub typename: ArcStr,
    pub access: AccessControlMap,
    pub search_fields: Vec<SearchField>,
    pub dependents: Vec<Dependent>,
    /// Compute changed-field diffs for update hooks
    pub track_changes: bool,
}

impl ServiceDef {
    pub fn new(typename: &str) -> Self {
        Self {
            typename: typename.into(),
            access: Default::default(),
            search_fields: vec![],
            dependents: vec![],
            track_changes: false,
        }
    }

    pub fn allow(mut self, operation: OperationKey, rule: Arc<dyn AccessRule>) -> Self {
        self.access.insert(operation, rule);
        self
    }

    /// Rule for every operation without its own rule
    pub fn allow_by_default(mut self, rule: Arc<dyn AccessRule>) -> Self {
        self.access.set_fallback(rule);
        self
    }

    pub fn search(mut self, path: &str, mode: SearchMode) -> Self {
        self.search_fields.push(SearchField {
            path: path.into(),
            mode,
        });
        self
    }

    pub fn dependent(mut self, typename: &str, field: &str) -> Self {
        self.dependents.push(Dependent {
            typename: typename.into(),
            field: field.into(),
            recursive: false,
        });
        self
    }

    /// Children of the same type referencing their parent through `field`
    pub fn recursive_dependent(mut self, field: &str) -> Self {
        self.dependents.push(Dependent {
            typename: self.typename.clone(),
            field: field.into(),
            recursive: true,
        });
        self
    }

    pub fn track_changes(mut self) -> Self {
        self.track_changes = true;
        self
    }
}
