use std::fmt::Display;

use itertools::Itertools;
use smallvec::{SmallVec, smallvec};

pub struct Ident<T>(pub T);

impl<T: AsRef<str>> Display for Ident<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "\"")?;

        let str = self.0.as_ref();
        let mut prev = 0;

        for (index, ch) in str.char_indices() {
            if ch == '"' {
                write!(f, "{}", &str[prev..index])?;
                prev = index;

                // a standalone '"' is escaped by inserting another '"':
                write!(f, "\"")?;
            }
        }

        write!(f, "{}\"", &str[prev..str.len()])
    }
}

/// Table alias, numbered per table: `"user_0"`, `"user_1"`, ..
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Alias<'a> {
    pub table: &'a str,
    pub index: usize,
}

impl Display for Alias<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", Ident(format!("{}_{}", self.table, self.index)))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

impl Direction {
    pub fn flip(self) -> Self {
        match self {
            Self::Asc => Self::Desc,
            Self::Desc => Self::Asc,
        }
    }
}

#[derive(Clone, Default)]
pub struct Select<'a> {
    pub expressions: Expressions<'a>,
    pub from: Vec<FromItem<'a>>,
    pub where_: Option<Expr<'a>>,
    pub group_by: Vec<Expr<'a>>,
    pub order_by: OrderBy<'a>,
    pub limit: Limit,
}

pub struct Insert<'a> {
    pub into: TableName<'a>,
    pub column_names: Vec<&'a str>,
    pub values: Vec<Expr<'a>>,
    pub returning: Vec<Expr<'a>>,
}

pub struct Update<'a> {
    pub table_name: TableName<'a>,
    pub set: Vec<UpdateColumn<'a>>,
    pub where_: Option<Expr<'a>>,
    pub returning: Vec<Expr<'a>>,
}

pub struct Delete<'a> {
    pub from: TableName<'a>,
    pub where_: Option<Expr<'a>>,
    pub returning: Vec<Expr<'a>>,
}

impl<'a> WhereExt<'a> for Select<'a> {
    fn where_mut(&mut self) -> &mut Option<Expr<'a>> {
        &mut self.where_
    }
}

impl<'a> WhereExt<'a> for Update<'a> {
    fn where_mut(&mut self) -> &mut Option<Expr<'a>> {
        &mut self.where_
    }
}

impl<'a> WhereExt<'a> for Delete<'a> {
    fn where_mut(&mut self) -> &mut Option<Expr<'a>> {
        &mut self.where_
    }
}

#[derive(Clone, Default)]
pub struct Expressions<'a> {
    pub items: Vec<Expr<'a>>,
    pub multiline: bool,
}

impl<'a> From<Vec<Expr<'a>>> for Expressions<'a> {
    fn from(value: Vec<Expr<'a>>) -> Self {
        Self {
            items: value,
            multiline: false,
        }
    }
}

/// column = expr
pub struct UpdateColumn<'a>(pub &'a str, pub Expr<'a>);

#[derive(Clone, Default)]
pub struct OrderBy<'a> {
    pub expressions: Vec<OrderByExpr<'a>>,
}

#[derive(Clone)]
pub struct OrderByExpr<'a>(pub Expr<'a>, pub Direction);

#[derive(Clone, Default)]
pub struct Limit {
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

#[derive(Clone)]
pub enum Expr<'a> {
    /// path in current scope
    Path(Path<'a>),
    /// input parameter
    Param(Param),
    LiteralInt(i64),
    LiteralBool(bool),
    /// (a, b, ..)
    Tuple(Vec<Expr<'a>>),
    /// (a)
    Paren(Box<Expr<'a>>),
    Select(Box<Select<'a>>),
    /// (a AND b)
    And(Vec<Expr<'a>>),
    /// (a OR b)
    Or(Vec<Expr<'a>>),
    Not(Box<Expr<'a>>),
    /// a = b
    Eq(Box<Expr<'a>>, Box<Expr<'a>>),
    /// a <> b
    Neq(Box<Expr<'a>>, Box<Expr<'a>>),
    /// a < b
    Lt(Box<Expr<'a>>, Box<Expr<'a>>),
    /// a <= b
    Lte(Box<Expr<'a>>, Box<Expr<'a>>),
    /// a > b
    Gt(Box<Expr<'a>>, Box<Expr<'a>>),
    /// a >= b
    Gte(Box<Expr<'a>>, Box<Expr<'a>>),
    /// a IN b
    In(Box<Expr<'a>>, Box<Expr<'a>>),
    /// a NOT IN b
    NotIn(Box<Expr<'a>>, Box<Expr<'a>>),
    IsNull(Box<Expr<'a>>),
    IsNotNull(Box<Expr<'a>>),
    /// a LIKE b
    Like(Box<Expr<'a>>, Box<Expr<'a>>),
    /// a ~ b, or a ~* b when case insensitive
    Regex {
        case_insensitive: bool,
        expr: Box<Expr<'a>>,
        pattern: Box<Expr<'a>>,
    },
    /// a @> b
    JsonContains(Box<Expr<'a>>, Box<Expr<'a>>),
    /// a::type
    Cast(Box<Expr<'a>>, &'static str),
    /// A template where `{column}` and `{value}` stand for the inner expression
    Template(&'a str, Box<Expr<'a>>),
    /// COUNT(*)
    CountStar,
    /// COUNT(DISTINCT a)
    CountDistinct(Box<Expr<'a>>),
    /// a AS "label"
    As(Box<Expr<'a>>, String),
}

impl<'a> Expr<'a> {
    pub fn path1(segment: impl Into<PathSegment<'a>>) -> Self {
        Self::Path(Path(smallvec!(segment.into())))
    }

    pub fn path2(a: impl Into<PathSegment<'a>>, b: impl Into<PathSegment<'a>>) -> Self {
        Self::Path(Path(smallvec!(a.into(), b.into())))
    }

    pub fn param(p: usize) -> Self {
        Self::Param(Param(p))
    }

    pub fn paren(expr: impl Into<Self>) -> Self {
        Self::Paren(Box::new(expr.into()))
    }

    pub fn not(expr: impl Into<Self>) -> Self {
        Self::Not(Box::new(expr.into()))
    }

    pub fn eq(a: impl Into<Self>, b: impl Into<Self>) -> Self {
        Self::Eq(Box::new(a.into()), Box::new(b.into()))
    }

    pub fn neq(a: impl Into<Self>, b: impl Into<Self>) -> Self {
        Self::Neq(Box::new(a.into()), Box::new(b.into()))
    }

    pub fn lt(a: impl Into<Self>, b: impl Into<Self>) -> Self {
        Self::Lt(Box::new(a.into()), Box::new(b.into()))
    }

    pub fn lte(a: impl Into<Self>, b: impl Into<Self>) -> Self {
        Self::Lte(Box::new(a.into()), Box::new(b.into()))
    }

    pub fn gt(a: impl Into<Self>, b: impl Into<Self>) -> Self {
        Self::Gt(Box::new(a.into()), Box::new(b.into()))
    }

    pub fn gte(a: impl Into<Self>, b: impl Into<Self>) -> Self {
        Self::Gte(Box::new(a.into()), Box::new(b.into()))
    }

    pub fn in_(a: impl Into<Self>, b: impl Into<Self>) -> Self {
        Self::In(Box::new(a.into()), Box::new(b.into()))
    }

    pub fn not_in(a: impl Into<Self>, b: impl Into<Self>) -> Self {
        Self::NotIn(Box::new(a.into()), Box::new(b.into()))
    }

    pub fn is_null(expr: impl Into<Self>) -> Self {
        Self::IsNull(Box::new(expr.into()))
    }

    pub fn is_not_null(expr: impl Into<Self>) -> Self {
        Self::IsNotNull(Box::new(expr.into()))
    }

    pub fn like(a: impl Into<Self>, b: impl Into<Self>) -> Self {
        Self::Like(Box::new(a.into()), Box::new(b.into()))
    }

    pub fn regex(expr: impl Into<Self>, pattern: impl Into<Self>, case_insensitive: bool) -> Self {
        Self::Regex {
            case_insensitive,
            expr: Box::new(expr.into()),
            pattern: Box::new(pattern.into()),
        }
    }

    pub fn json_contains(a: impl Into<Self>, b: impl Into<Self>) -> Self {
        Self::JsonContains(Box::new(a.into()), Box::new(b.into()))
    }

    pub fn cast(expr: impl Into<Self>, ty: &'static str) -> Self {
        Self::Cast(Box::new(expr.into()), ty)
    }

    pub fn template(template: &'a str, expr: impl Into<Self>) -> Self {
        Self::Template(template, Box::new(expr.into()))
    }

    pub fn count_distinct(expr: impl Into<Self>) -> Self {
        Self::CountDistinct(Box::new(expr.into()))
    }

    pub fn as_(expr: impl Into<Self>, label: impl Into<String>) -> Self {
        Self::As(Box::new(expr.into()), label.into())
    }
}

#[derive(Clone)]
pub struct Path<'a>(SmallVec<PathSegment<'a>, 2>);

impl<'a> Path<'a> {
    pub fn empty() -> Self {
        Self(smallvec![])
    }

    pub fn join(&self, segment: impl Into<PathSegment<'a>>) -> Self {
        let mut segments = self.0.clone();
        segments.push(segment.into());
        Self(segments)
    }
}

impl<'a> FromIterator<PathSegment<'a>> for Path<'a> {
    fn from_iter<T: IntoIterator<Item = PathSegment<'a>>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a> From<PathSegment<'a>> for Path<'a> {
    fn from(value: PathSegment<'a>) -> Self {
        Self(smallvec![value])
    }
}

#[derive(Clone)]
pub enum PathSegment<'a> {
    Ident(&'a str),
    Alias(Alias<'a>),
    /// * (every column)
    Asterisk,
}

#[derive(Clone)]
pub enum FromItem<'a> {
    TableName(TableName<'a>),
    TableNameAs(TableName<'a>, Alias<'a>),
    Join(Box<Join<'a>>),
}

/// Always a LEFT JOIN, so a missing target keeps the parent row.
#[derive(Clone)]
pub struct Join<'a> {
    pub first: FromItem<'a>,
    pub second: FromItem<'a>,
    pub on: Expr<'a>,
}

#[derive(Clone, Copy)]
pub struct TableName<'a>(pub &'a str);

impl<'a> TableName<'a> {
    pub fn as_(self, alias: Alias<'a>) -> FromItem<'a> {
        FromItem::TableNameAs(self, alias)
    }
}

impl Display for Select<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SELECT")?;

        if !self.expressions.items.is_empty() {
            write!(f, " {e}", e = self.expressions)?;
        }

        write!(f, " FROM {}", self.from.iter().format(","))?;

        if let Some(condition) = &self.where_ {
            write!(f, " WHERE {condition}")?;
        }

        if !self.group_by.is_empty() {
            write!(f, " GROUP BY {}", self.group_by.iter().format(","))?;
        }

        write!(f, "{}", self.order_by)?;
        write!(f, "{}", self.limit)
    }
}

impl Display for Insert<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "INSERT INTO {table_name}", table_name = self.into)?;

        if self.column_names.is_empty() {
            write!(f, " DEFAULT VALUES")?;
        } else {
            write!(
                f,
                " ({columns}) VALUES ({values})",
                columns = self.column_names.iter().map(Ident).format(","),
                values = self.values.iter().format(","),
            )?;
        }

        if !self.returning.is_empty() {
            write!(f, " RETURNING {}", self.returning.iter().format(","))?;
        }

        Ok(())
    }
}

impl Display for Update<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "UPDATE {table_name} SET {set}",
            table_name = self.table_name,
            set = self.set.iter().format(",")
        )?;

        if let Some(condition) = &self.where_ {
            write!(f, " WHERE {condition}")?;
        }

        if !self.returning.is_empty() {
            write!(f, " RETURNING {}", self.returning.iter().format(","))?;
        }

        Ok(())
    }
}

impl Display for Delete<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "DELETE FROM {from}", from = self.from)?;

        if let Some(condition) = &self.where_ {
            write!(f, " WHERE {condition}")?;
        }

        if !self.returning.is_empty() {
            write!(f, " RETURNING {}", self.returning.iter().format(","))?;
        }

        Ok(())
    }
}

impl Display for Expressions<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.multiline {
            writeln!(f, "{}", self.items.iter().format(",\n"))
        } else {
            write!(f, "{}", self.items.iter().format(","))
        }
    }
}

impl Display for Limit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(limit) = self.limit {
            write!(f, " LIMIT {limit}")?;
        }

        if let Some(offset) = self.offset {
            write!(f, " OFFSET {offset}")?;
        }

        Ok(())
    }
}

impl Display for OrderBy<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.expressions.is_empty() {
            return Ok(());
        }

        write!(f, " ORDER BY {}", self.expressions.iter().format(","))
    }
}

impl Display for OrderByExpr<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)?;

        if matches!(self.1, Direction::Desc) {
            write!(f, " DESC")?;
        }

        Ok(())
    }
}

impl Display for UpdateColumn<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{column_name}={expr}",
            column_name = Ident(self.0),
            expr = self.1
        )
    }
}

impl Display for Expr<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Path(path) => write!(f, "{path}"),
            Self::Param(param) => write!(f, "{param}"),
            Self::LiteralInt(i) => write!(f, "{i}"),
            Self::LiteralBool(true) => write!(f, "TRUE"),
            Self::LiteralBool(false) => write!(f, "FALSE"),
            Self::Tuple(t) => write!(f, "({})", t.iter().format(",")),
            Self::Paren(expr) => write!(f, "({expr})"),
            Self::Select(select) => write!(f, "({select})"),
            Self::And(clauses) if clauses.is_empty() => write!(f, "TRUE"),
            Self::And(clauses) if clauses.len() == 1 => write!(f, "{}", clauses[0]),
            Self::And(clauses) => write!(f, "({})", clauses.iter().format(" AND ")),
            Self::Or(clauses) if clauses.is_empty() => write!(f, "FALSE"),
            Self::Or(clauses) if clauses.len() == 1 => write!(f, "{}", clauses[0]),
            Self::Or(clauses) => write!(f, "({})", clauses.iter().format(" OR ")),
            Self::Not(expr) => write!(f, "NOT ({expr})"),
            Self::Eq(a, b) => write!(f, "{a}={b}"),
            Self::Neq(a, b) => write!(f, "{a}<>{b}"),
            Self::Lt(a, b) => write!(f, "{a}<{b}"),
            Self::Lte(a, b) => write!(f, "{a}<={b}"),
            Self::Gt(a, b) => write!(f, "{a}>{b}"),
            Self::Gte(a, b) => write!(f, "{a}>={b}"),
            Self::In(a, b) => write!(f, "{a} IN {b}"),
            Self::NotIn(a, b) => write!(f, "{a} NOT IN {b}"),
            Self::IsNull(expr) => write!(f, "{expr} IS NULL"),
            Self::IsNotNull(expr) => write!(f, "{expr} IS NOT NULL"),
            Self::Like(a, b) => write!(f, "{a} LIKE {b}"),
            Self::Regex {
                case_insensitive,
                expr,
                pattern,
            } => {
                let operator = if *case_insensitive { "~*" } else { "~" };
                write!(f, "{expr} {operator} {pattern}")
            }
            Self::JsonContains(a, b) => write!(f, "{a} @> {b}"),
            Self::Cast(expr, ty) => write!(f, "{expr}::{ty}"),
            Self::Template(template, expr) => {
                let inner = expr.to_string();
                write!(
                    f,
                    "{}",
                    template
                        .replace("{column}", &inner)
                        .replace("{value}", &inner)
                )
            }
            Self::CountStar => write!(f, "COUNT(*)"),
            Self::CountDistinct(expr) => write!(f, "COUNT(DISTINCT {expr})"),
            Self::As(expr, label) => write!(f, "{expr} AS {}", Ident(label)),
        }
    }
}

impl Display for Path<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.iter().format("."))
    }
}

impl Display for PathSegment<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PathSegment::Ident(i) => write!(f, "{}", Ident(i)),
            PathSegment::Alias(a) => write!(f, "{a}"),
            PathSegment::Asterisk => write!(f, "*"),
        }
    }
}

impl Display for FromItem<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TableName(tn) => write!(f, "{tn}"),
            Self::TableNameAs(tn, alias) => write!(f, "{tn} AS {alias}"),
            Self::Join(join) => write!(f, "{join}"),
        }
    }
}

impl Display for Join<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let first = &self.first;
        let second = &self.second;
        let on = &self.on;

        write!(f, "{first} LEFT JOIN {second} ON {on}")
    }
}

impl<'a> From<Select<'a>> for Expr<'a> {
    fn from(value: Select<'a>) -> Self {
        Self::Select(Box::new(value))
    }
}

impl<'a> From<Path<'a>> for Expr<'a> {
    fn from(value: Path<'a>) -> Self {
        Self::Path(value)
    }
}

impl<'a> From<Join<'a>> for FromItem<'a> {
    fn from(value: Join<'a>) -> Self {
        FromItem::Join(Box::new(value))
    }
}

impl<'a> From<TableName<'a>> for FromItem<'a> {
    fn from(value: TableName<'a>) -> Self {
        Self::TableName(value)
    }
}

impl<'a> From<&'a str> for PathSegment<'a> {
    fn from(value: &'a str) -> Self {
        Self::Ident(value)
    }
}

impl<'a> From<Alias<'a>> for PathSegment<'a> {
    fn from(value: Alias<'a>) -> Self {
        Self::Alias(value)
    }
}

impl Display for TableName<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", Ident(self.0))
    }
}

pub trait WhereExt<'a> {
    fn where_mut(&mut self) -> &mut Option<Expr<'a>>;

    fn where_and(&mut self, expr: Expr<'a>) {
        match self.where_mut().take() {
            Some(Expr::And(mut clauses)) => {
                clauses.push(expr);
                (*self.where_mut()) = Some(Expr::And(clauses));
            }
            Some(old) => {
                (*self.where_mut()) = Some(Expr::And(vec![old, expr]));
            }
            None => {
                (*self.where_mut()) = Some(expr);
            }
        }
    }
}

#[derive(Clone, Copy)]
pub struct Param(pub usize);

impl Display for Param {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "${}", self.0 + 1)
    }
}
