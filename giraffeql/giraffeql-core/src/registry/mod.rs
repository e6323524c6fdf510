//! The type registry.
//!
//! Types are registered by name in any order through a [RegistryBuilder], referring to each
//! other through [TypeRef] tokens. [RegistryBuilder::finalize] resolves and validates the
//! whole graph once and produces the immutable [Registry] shared by the engine and the store.

use std::{fmt::Display, sync::Arc};

use arcstr::ArcStr;
use indexmap::IndexMap;
use itertools::Itertools;
use tracing::debug;

use crate::{
    DomainError, DomainResult,
    field_path::{FieldPath, PathSegment},
    service::ServiceDef,
};

mod type_def;

pub use type_def::*;

/// A by-name reference to a type, usable before the type is registered.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TypeRef(ArcStr);

impl TypeRef {
    pub fn named(name: &str) -> Self {
        Self(name.into())
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl Display for TypeRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Default)]
pub struct RegistryBuilder {
    types: IndexMap<ArcStr, TypeDef>,
    services: IndexMap<ArcStr, ServiceDef>,
    errors: Vec<String>,
}

impl RegistryBuilder {
    /// Register a type definition and get a reference token for it.
    pub fn register(&mut self, def: TypeDef) -> TypeRef {
        let type_ref = TypeRef(def.name.clone());
        if self.types.contains_key(&def.name) {
            self.errors
                .push(format!("type `{}` registered twice", def.name));
        } else {
            self.types.insert(def.name.clone(), def);
        }
        type_ref
    }

    pub fn register_service(&mut self, service: ServiceDef) {
        if self.services.contains_key(&service.typename) {
            self.errors
                .push(format!("service `{}` registered twice", service.typename));
        } else {
            self.services.insert(service.typename.clone(), service);
        }
    }

    /// Resolve every type reference and validate the linked graph.
    pub fn finalize(mut self) -> DomainResult<Arc<Registry>> {
        for def in self.types.values() {
            self.errors.extend(def.errors.iter().cloned());
        }

        self.link_foreign_keys();

        let registry = Registry {
            types: self.types,
            services: self.services,
        };

        let mut errors = self.errors;
        for def in registry.types.values() {
            registry.validate_type(def, &mut errors);
        }
        for service in registry.services.values() {
            registry.validate_service(service, &mut errors);
        }

        if !errors.is_empty() {
            return Err(DomainError::initialization(errors.iter().join("; ")));
        }

        let mut registry = registry;
        let unique_keys: Vec<(ArcStr, Vec<UniqueKey>)> = registry
            .types
            .values()
            .map(|def| (def.name.clone(), collect_unique_keys(def)))
            .collect();
        for (name, keys) in unique_keys {
            if let Some(def) = registry.types.get_mut(&name) {
                def.unique_keys = keys;
            }
        }

        debug!(
            "registry finalized with {} types and {} services",
            registry.types.len(),
            registry.services.len()
        );

        Ok(Arc::new(registry))
    }

    /// Foreign key columns take the id type of the type they point at.
    fn link_foreign_keys(&mut self) {
        let id_types: IndexMap<ArcStr, SqlType> = self
            .types
            .iter()
            .map(|(name, def)| (name.clone(), def.id_kind.sql_type()))
            .collect();

        for def in self.types.values_mut() {
            for field in def.fields.values_mut() {
                let Some(target) = field.object_type() else {
                    continue;
                };
                let Some(id_type) = id_types.get(target.name()).copied() else {
                    continue;
                };
                let is_array = field.is_array;
                match &mut field.kind {
                    FieldKind::Join(sql) => sql.sql_type = id_type,
                    FieldKind::Dataloader { sql, .. } => {
                        sql.sql_type = if is_array { SqlType::Json } else { id_type };
                    }
                    _ => {}
                }
            }
        }
    }
}

/// The immutable, fully linked set of types and services.
#[derive(Debug)]
pub struct Registry {
    types: IndexMap<ArcStr, TypeDef>,
    services: IndexMap<ArcStr, ServiceDef>,
}

/// One join needed to reach the end of a [FieldPath].
#[derive(Debug)]
pub enum PathStep<'r> {
    /// Follow the foreign key `field` of `owner` to `target`.
    Join {
        key: String,
        owner: &'r TypeDef,
        field: &'r FieldDef,
        target: &'r TypeDef,
    },
    /// Join `target` on the predicates declared by `field`.
    SpecialJoin {
        key: String,
        owner: &'r TypeDef,
        field: &'r FieldDef,
        target: &'r TypeDef,
        join: &'r SpecialJoin,
    },
    /// Join the link table `link_type` whose `back_reference` points at `owner`.
    Link {
        key: String,
        owner: &'r TypeDef,
        link_type: &'r TypeDef,
        back_reference: &'r FieldDef,
    },
}

impl PathStep<'_> {
    /// Identifies the join among all joins of one query
    pub fn key(&self) -> &str {
        match self {
            Self::Join { key, .. } | Self::SpecialJoin { key, .. } | Self::Link { key, .. } => key,
        }
    }
}

/// A field path resolved against the registry.
#[derive(Debug)]
pub struct ResolvedPath<'r> {
    pub steps: Vec<PathStep<'r>>,
    pub owner: &'r TypeDef,
    pub field: &'r FieldDef,
}

impl Registry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    pub fn type_def(&self, name: &str) -> DomainResult<&TypeDef> {
        self.types
            .get(name)
            .ok_or_else(|| DomainError::invalid_field(format!("unknown type `{name}`")))
    }

    pub fn resolve(&self, type_ref: &TypeRef) -> DomainResult<&TypeDef> {
        self.type_def(type_ref.name())
    }

    pub fn types(&self) -> impl Iterator<Item = &TypeDef> {
        self.types.values()
    }

    pub fn service(&self, typename: &str) -> DomainResult<&ServiceDef> {
        self.services.get(typename).ok_or_else(|| {
            DomainError::initialization(format!("no service registered for `{typename}`"))
        })
    }

    pub fn services(&self) -> impl Iterator<Item = &ServiceDef> {
        self.services.values()
    }

    /// Resolve `path` starting at `root`.
    ///
    /// Every segment but the last must be joinable (or a link traversal),
    /// the last segment may be any field.
    pub fn resolve_path<'r>(
        &'r self,
        root: &'r TypeDef,
        path: &FieldPath,
    ) -> DomainResult<ResolvedPath<'r>> {
        let Some((last, init)) = path.segments().split_last() else {
            return Err(DomainError::invalid_field("empty field path"));
        };

        let mut steps = vec![];
        let mut owner = root;
        let mut key = String::new();

        for segment in init {
            owner = self.resolve_link_step(owner, segment, &mut key, &mut steps)?;
            let field = field_of(owner, &segment.field)?;
            push_key(&mut key, &segment.field);
            let target = self.resolve(
                field
                    .object_type()
                    .ok_or_else(|| not_joinable(owner, field))?,
            )?;

            match &field.kind {
                FieldKind::Join(_) => steps.push(PathStep::Join {
                    key: key.clone(),
                    owner,
                    field,
                    target,
                }),
                FieldKind::SpecialJoin(join) => steps.push(PathStep::SpecialJoin {
                    key: key.clone(),
                    owner,
                    field,
                    target,
                    join,
                }),
                _ => return Err(not_joinable(owner, field)),
            }
            owner = target;
        }

        owner = self.resolve_link_step(owner, last, &mut key, &mut steps)?;
        let field = field_of(owner, &last.field)?;

        Ok(ResolvedPath {
            steps,
            owner,
            field,
        })
    }

    /// For a `link/field` segment, push the link join and return the link type.
    fn resolve_link_step<'r>(
        &'r self,
        owner: &'r TypeDef,
        segment: &PathSegment,
        key: &mut String,
        steps: &mut Vec<PathStep<'r>>,
    ) -> DomainResult<&'r TypeDef> {
        let Some(link_name) = &segment.link else {
            return Ok(owner);
        };

        let link_type = self.type_def(link_name)?;
        let link_def = link_type.link_def().ok_or_else(|| {
            DomainError::invalid_field(format!("`{link_name}` is not a link type"))
        })?;

        let back_reference = link_def
            .references
            .iter()
            .find(|reference| {
                reference.target.name() == owner.name.as_str() && reference.field != segment.field
            })
            .ok_or_else(|| {
                DomainError::invalid_field(format!(
                    "link type `{link_name}` has no reference to `{}` besides `{}`",
                    owner.name, segment.field
                ))
            })?;

        push_key(key, &format!("{link_name}<{}/", back_reference.field));
        steps.push(PathStep::Link {
            key: key.clone(),
            owner,
            link_type,
            back_reference: field_of(link_type, &back_reference.field)?,
        });

        Ok(link_type)
    }

    fn validate_type(&self, def: &TypeDef, errors: &mut Vec<String>) {
        for field in def.fields.values() {
            let location = format!("{}.{}", def.name, field.name);

            if let Some(sql) = field.sql() {
                if sql.column.chars().any(char::is_uppercase) {
                    errors.push(format!(
                        "{location}: column `{}` must not contain uppercase characters",
                        sql.column
                    ));
                }
            }

            let target = match field.object_type() {
                Some(type_ref) => match self.resolve(type_ref) {
                    Ok(target) => Some(target),
                    Err(_) => {
                        errors.push(format!("{location}: unknown type `{type_ref}`"));
                        continue;
                    }
                },
                None => None,
            };

            match (&field.kind, target) {
                (FieldKind::Scalar(_), Some(_)) => {
                    errors.push(format!("{location}: scalar field with object type"));
                }
                (FieldKind::Join(_) | FieldKind::Dataloader { .. }, None) => {
                    errors.push(format!("{location}: foreign key field without object type"));
                }
                (FieldKind::SpecialJoin(join), target) => {
                    let Some(target) = target else {
                        errors.push(format!("{location}: special join without object type"));
                        continue;
                    };
                    for predicate in &join.predicates {
                        match predicate {
                            JoinPredicate::ParentColumn {
                                column,
                                parent_column,
                            } => {
                                if !has_column(target, column) {
                                    errors.push(format!(
                                        "{location}: `{}` has no column `{column}`",
                                        target.name
                                    ));
                                }
                                if !has_column(def, parent_column) {
                                    errors.push(format!(
                                        "{location}: `{}` has no column `{parent_column}`",
                                        def.name
                                    ));
                                }
                            }
                            JoinPredicate::SessionParam { column, .. } => {
                                if !has_column(target, column) {
                                    errors.push(format!(
                                        "{location}: `{}` has no column `{column}`",
                                        target.name
                                    ));
                                }
                            }
                        }
                    }
                }
                (FieldKind::Computed { required_fields, .. }, _) => {
                    for path in required_fields {
                        match self.resolve_path(def, path) {
                            Ok(resolved) if resolved.field.sql().is_none() => {
                                errors.push(format!(
                                    "{location}: required field `{path}` is not a sql field"
                                ));
                            }
                            Ok(_) => {}
                            Err(error) => {
                                errors.push(format!("{location}: required field `{path}`: {error}"))
                            }
                        }
                    }
                }
                _ => {}
            }
        }

        if let Some(link) = &def.link {
            if link.references.len() < 2 {
                errors.push(format!("link type `{}` needs two references", def.name));
            }
        }
    }

    fn validate_service(&self, service: &ServiceDef, errors: &mut Vec<String>) {
        let Ok(def) = self.type_def(&service.typename) else {
            errors.push(format!("service for unknown type `{}`", service.typename));
            return;
        };

        for dependent in &service.dependents {
            let location = format!("{}: dependent {}.{}", def.name, dependent.typename, dependent.field);
            if dependent.recursive && dependent.typename != def.name {
                errors.push(format!("{location}: recursive dependents must be self-referential"));
            }
            match self.type_def(&dependent.typename) {
                Ok(dependent_def) => {
                    if dependent_def
                        .get_field(&dependent.field)
                        .and_then(FieldDef::sql)
                        .is_none()
                    {
                        errors.push(format!("{location}: not a sql field"));
                    }
                }
                Err(_) => errors.push(format!("{location}: unknown type")),
            }
        }

        for search_field in &service.search_fields {
            match self.resolve_path(def, &search_field.path) {
                Ok(resolved) if resolved.field.sql().is_some() => {}
                _ => errors.push(format!(
                    "{}: search field `{}` is not a sql field",
                    def.name, search_field.path
                )),
            }
        }
    }
}

fn field_of<'r>(owner: &'r TypeDef, name: &str) -> DomainResult<&'r FieldDef> {
    owner.get_field(name).ok_or_else(|| {
        DomainError::invalid_field(format!("unknown field `{name}` on type `{}`", owner.name))
    })
}

fn not_joinable(owner: &TypeDef, field: &FieldDef) -> DomainError {
    DomainError::invalid_field(format!(
        "field `{}` on type `{}` can not be traversed",
        field.name, owner.name
    ))
}

fn push_key(key: &mut String, segment: &str) {
    if !key.is_empty() && !key.ends_with('/') {
        key.push('.');
    }
    key.push_str(segment);
}

fn has_column(def: &TypeDef, column: &str) -> bool {
    def.fields
        .values()
        .filter_map(FieldDef::sql)
        .any(|sql| sql.column == column)
}

fn collect_unique_keys(def: &TypeDef) -> Vec<UniqueKey> {
    let mut keys = vec![UniqueKey {
        name: ID_FIELD.into(),
        fields: vec![ID_FIELD.into()],
    }];

    let mut groups: IndexMap<ArcStr, Vec<ArcStr>> = IndexMap::new();
    for field in def.fields.values() {
        if let Some(group) = field.sql().and_then(|sql| sql.unique_group.clone()) {
            groups.entry(group).or_default().push(field.name.clone());
        }
    }

    keys.extend(
        groups
            .into_iter()
            .map(|(name, fields)| UniqueKey { name, fields }),
    );
    keys
}
