use std::{fmt::Debug, sync::Arc};

use arcstr::ArcStr;
use heck::AsSnakeCase;
use indexmap::IndexMap;
use serde_json::Value;

use crate::{
    field_path::FieldPath,
    resolver::{BatchLoader, FieldResolver, RecordLoader},
};

use super::TypeRef;

pub const ID_FIELD: &str = "id";
pub const CREATED_AT_FIELD: &str = "createdAt";
pub const UPDATED_AT_FIELD: &str = "updatedAt";
pub const CREATED_BY_FIELD: &str = "createdBy";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SqlType {
    Text,
    Integer,
    Decimal,
    Boolean,
    Json,
    Date,
    DateTime,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum IdKind {
    /// Random `[0-9a-z]` string generated by the engine
    #[default]
    RandomString,
    /// Integer generated by the database
    Serial,
}

impl IdKind {
    pub fn sql_type(self) -> SqlType {
        match self {
            Self::RandomString => SqlType::Text,
            Self::Serial => SqlType::Integer,
        }
    }
}

/// How a field maps onto a column of its type's table.
#[derive(Clone, Debug)]
pub struct SqlMapping {
    /// Empty until the owning field is added to a type, then defaults to the snake_cased field name
    pub column: ArcStr,
    pub sql_type: SqlType,
    /// SQL template wrapping the column on read, e.g. `lower({column})`
    pub getter: Option<ArcStr>,
    /// SQL template wrapping the bound value on write, e.g. `lower({value})`
    pub setter: Option<ArcStr>,
    pub unique_group: Option<ArcStr>,
    pub default_value: Option<Value>,
}

impl SqlMapping {
    pub fn new(sql_type: SqlType) -> Self {
        Self {
            column: ArcStr::new(),
            sql_type,
            getter: None,
            setter: None,
            unique_group: None,
            default_value: None,
        }
    }
}

#[derive(Clone, Debug)]
pub enum FieldType {
    Scalar(SqlType),
    Object(TypeRef),
}

/// A join whose ON clause is declared as data rather than derived from a foreign key.
///
/// The joined table is the field's object type.
#[derive(Clone, Debug, Default)]
pub struct SpecialJoin {
    pub predicates: Vec<JoinPredicate>,
}

#[derive(Clone, Debug)]
pub enum JoinPredicate {
    /// `joined.column = parent.parent_column`
    ParentColumn {
        column: ArcStr,
        parent_column: ArcStr,
    },
    /// `joined.column = <session parameter>`
    SessionParam { column: ArcStr, param: ArcStr },
}

#[derive(Clone)]
pub enum FieldKind {
    Scalar(SqlMapping),
    /// Foreign key column joined into the parent query
    Join(SqlMapping),
    SpecialJoin(SpecialJoin),
    /// Foreign key column (or JSON array of keys) resolved in a batch after the parent query
    Dataloader {
        sql: SqlMapping,
        loader: Arc<dyn BatchLoader>,
    },
    /// Value produced by a resolver from other fields of the same row
    Computed {
        resolver: Arc<dyn FieldResolver>,
        required_fields: Vec<FieldPath>,
    },
}

impl FieldKind {
    pub fn sql(&self) -> Option<&SqlMapping> {
        match self {
            Self::Scalar(sql) | Self::Join(sql) | Self::Dataloader { sql, .. } => Some(sql),
            Self::SpecialJoin(_) | Self::Computed { .. } => None,
        }
    }

    fn sql_mut(&mut self) -> Option<&mut SqlMapping> {
        match self {
            Self::Scalar(sql) | Self::Join(sql) | Self::Dataloader { sql, .. } => Some(sql),
            Self::SpecialJoin(_) | Self::Computed { .. } => None,
        }
    }

    pub fn is_joinable(&self) -> bool {
        matches!(self, Self::Join(_) | Self::SpecialJoin(_))
    }
}

impl Debug for FieldKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Scalar(sql) => f.debug_tuple("Scalar").field(sql).finish(),
            Self::Join(sql) => f.debug_tuple("Join").field(sql).finish(),
            Self::SpecialJoin(join) => f.debug_tuple("SpecialJoin").field(join).finish(),
            Self::Dataloader { sql, .. } => f.debug_struct("Dataloader").field("sql", sql).finish(),
            Self::Computed {
                required_fields, ..
            } => f
                .debug_struct("Computed")
                .field("required_fields", required_fields)
                .finish(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct FieldDef {
    pub name: ArcStr,
    pub ty: FieldType,
    pub kind: FieldKind,
    pub is_array: bool,
    pub nullable: bool,
    pub addable: bool,
    pub updateable: bool,
    /// Never selectable
    pub hidden: bool,
    /// Not selectable below the root level
    pub nest_hidden: bool,
}

impl FieldDef {
    fn new(ty: FieldType, kind: FieldKind) -> Self {
        Self {
            name: ArcStr::new(),
            ty,
            kind,
            is_array: false,
            nullable: true,
            addable: true,
            updateable: true,
            hidden: false,
            nest_hidden: false,
        }
    }

    pub fn scalar(sql_type: SqlType) -> Self {
        Self::new(
            FieldType::Scalar(sql_type),
            FieldKind::Scalar(SqlMapping::new(sql_type)),
        )
    }

    /// Foreign key to `target`, joined when nested fields are selected.
    ///
    /// The column type follows the target's id kind.
    pub fn join(target: &str) -> Self {
        Self::new(
            FieldType::Object(TypeRef::named(target)),
            FieldKind::Join(SqlMapping::new(SqlType::Text)),
        )
    }

    pub fn special_join(target: &str, predicates: impl IntoIterator<Item = JoinPredicate>) -> Self {
        Self::new(
            FieldType::Object(TypeRef::named(target)),
            FieldKind::SpecialJoin(SpecialJoin {
                predicates: predicates.into_iter().collect(),
            }),
        )
        .not_addable()
        .not_updateable()
    }

    /// Foreign key to `target` resolved by `loader` after the parent query.
    pub fn dataloader(target: &str, loader: Arc<dyn BatchLoader>) -> Self {
        Self::new(
            FieldType::Object(TypeRef::named(target)),
            FieldKind::Dataloader {
                sql: SqlMapping::new(SqlType::Text),
                loader,
            },
        )
    }

    /// Dataloader field loading `target` records through the data store.
    pub fn record_loader(target: &str) -> Self {
        Self::dataloader(target, Arc::new(RecordLoader))
    }

    pub fn computed<P: Into<FieldPath>>(
        ty: FieldType,
        resolver: Arc<dyn FieldResolver>,
        required_fields: impl IntoIterator<Item = P>,
    ) -> Self {
        Self::new(
            ty,
            FieldKind::Computed {
                resolver,
                required_fields: required_fields.into_iter().map(Into::into).collect(),
            },
        )
        .not_addable()
        .not_updateable()
    }

    pub fn required(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn array(mut self) -> Self {
        self.is_array = true;
        self
    }

    pub fn hidden(mut self) -> Self {
        self.hidden = true;
        self
    }

    pub fn nest_hidden(mut self) -> Self {
        self.nest_hidden = true;
        self
    }

    pub fn not_addable(mut self) -> Self {
        self.addable = false;
        self
    }

    pub fn not_updateable(mut self) -> Self {
        self.updateable = false;
        self
    }

    pub fn column(self, column: &str) -> Self {
        self.map_sql(|sql| sql.column = column.into())
    }

    pub fn unique(self, group: &str) -> Self {
        self.map_sql(|sql| sql.unique_group = Some(group.into()))
    }

    pub fn default_value(self, value: Value) -> Self {
        self.map_sql(|sql| sql.default_value = Some(value))
    }

    pub fn getter(self, template: &str) -> Self {
        self.map_sql(|sql| sql.getter = Some(template.into()))
    }

    pub fn setter(self, template: &str) -> Self {
        self.map_sql(|sql| sql.setter = Some(template.into()))
    }

    fn map_sql(mut self, func: impl FnOnce(&mut SqlMapping)) -> Self {
        if let Some(sql) = self.kind.sql_mut() {
            func(sql);
        }
        self
    }

    pub fn sql(&self) -> Option<&SqlMapping> {
        self.kind.sql()
    }

    pub fn object_type(&self) -> Option<&TypeRef> {
        match &self.ty {
            FieldType::Object(type_ref) => Some(type_ref),
            FieldType::Scalar(_) => None,
        }
    }

    pub(super) fn sql_mut(&mut self) -> Option<&mut SqlMapping> {
        self.kind.sql_mut()
    }
}

/// One side of a link type
#[derive(Clone, Debug)]
pub struct LinkReference {
    pub field: ArcStr,
    pub target: TypeRef,
    pub allow_null: bool,
    pub updateable: bool,
}

impl LinkReference {
    pub fn new(field: &str, target: &str) -> Self {
        Self {
            field: field.into(),
            target: TypeRef::named(target),
            allow_null: false,
            updateable: false,
        }
    }

    pub fn allow_null(mut self) -> Self {
        self.allow_null = true;
        self
    }

    pub fn updateable(mut self) -> Self {
        self.updateable = true;
        self
    }
}

#[derive(Clone, Debug)]
pub struct LinkDef {
    pub references: Vec<LinkReference>,
}

/// A set of fields whose combined values identify one row
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UniqueKey {
    pub name: ArcStr,
    pub fields: Vec<ArcStr>,
}

#[derive(Clone, Debug)]
pub struct TypeDef {
    pub(super) name: ArcStr,
    pub(super) id_kind: IdKind,
    pub(super) fields: IndexMap<ArcStr, FieldDef>,
    pub(super) link: Option<LinkDef>,
    pub(super) unique_keys: Vec<UniqueKey>,
    pub(super) errors: Vec<String>,
}

impl TypeDef {
    /// New type backed by a table of the same name, with a random string `id`.
    pub fn new(name: &str) -> Self {
        let mut def = Self {
            name: name.into(),
            id_kind: IdKind::RandomString,
            fields: Default::default(),
            link: None,
            unique_keys: vec![],
            errors: vec![],
        };
        def.insert_id_field();
        def
    }

    /// Link type: one row per association between the referenced types.
    ///
    /// A join field is generated per reference, and the references together form a unique key.
    pub fn link(name: &str, references: impl IntoIterator<Item = LinkReference>) -> Self {
        let references: Vec<LinkReference> = references.into_iter().collect();
        let mut def = Self::new(name);

        for reference in &references {
            let mut field = FieldDef::join(reference.target.name()).unique("link");
            field.nullable = reference.allow_null;
            field.updateable = reference.updateable;
            def = def.field(&reference.field, field);
        }

        def.link = Some(LinkDef { references });
        def
    }

    pub fn serial_id(mut self) -> Self {
        self.id_kind = IdKind::Serial;
        self.insert_id_field();
        self
    }

    pub fn field(mut self, name: &str, mut field: FieldDef) -> Self {
        if self.fields.contains_key(name) {
            self.errors
                .push(format!("duplicate field `{name}` on type `{}`", self.name));
            return self;
        }

        field.name = name.into();
        if let Some(sql) = field.sql_mut() {
            if sql.column.is_empty() {
                sql.column = AsSnakeCase(name).to_string().into();
            }
        }

        self.fields.insert(name.into(), field);
        self
    }

    /// Adds `createdAt` and `updatedAt`, maintained by the data store.
    pub fn timestamps(self) -> Self {
        self.field(
            CREATED_AT_FIELD,
            FieldDef::scalar(SqlType::DateTime)
                .required()
                .not_addable()
                .not_updateable(),
        )
        .field(
            UPDATED_AT_FIELD,
            FieldDef::scalar(SqlType::DateTime)
                .required()
                .not_addable()
                .not_updateable(),
        )
    }

    /// Adds `createdBy`, set from the session identity on create.
    pub fn created_by(self, user_type: &str) -> Self {
        self.field(
            CREATED_BY_FIELD,
            FieldDef::join(user_type).not_addable().not_updateable(),
        )
    }

    pub fn name(&self) -> &ArcStr {
        &self.name
    }

    /// The table backing this type
    pub fn table(&self) -> &str {
        &self.name
    }

    pub fn id_kind(&self) -> IdKind {
        self.id_kind
    }

    pub fn fields(&self) -> &IndexMap<ArcStr, FieldDef> {
        &self.fields
    }

    pub fn get_field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.get(name)
    }

    pub fn link_def(&self) -> Option<&LinkDef> {
        self.link.as_ref()
    }

    pub fn unique_keys(&self) -> &[UniqueKey] {
        &self.unique_keys
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    fn insert_id_field(&mut self) {
        let mut field = FieldDef::scalar(self.id_kind.sql_type())
            .required()
            .not_addable()
            .not_updateable();
        field.name = ID_FIELD.into();
        if let Some(sql) = field.sql_mut() {
            sql.column = ID_FIELD.into();
        }
        self.fields.insert(ID_FIELD.into(), field);
    }
}
