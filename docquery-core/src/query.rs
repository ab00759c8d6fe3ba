//! Query construction API for document stores.
//!
//! A [`Query`] accumulates filter clauses, ordering, paging, grouping, projection and
//! execution options. It is built through the fluent [`QueryBuilder`] and compiled into
//! a native [`Command`](crate::command::Command) by [`Query::to_mql`].
//!
//! # Query Building
//!
//! ```ignore
//! use docquery::query::{Query, SortDirection};
//!
//! let query = Query::builder()
//!     .where_eq("name", "John Doe")
//!     .or_where_op("age", ">", 30)
//!     .order_by("created_at", SortDirection::Desc)
//!     .limit(10)
//!     .build();
//! ```
//!
//! # Combining Clauses
//!
//! `where_*` calls are conjoined in call order. An `or_where_*` call disjoins the new
//! clause with everything accumulated so far, so `a AND b OR c` means `(a AND b) OR c`.
//! Use [`QueryBuilder::where_nested`] to group clauses explicitly.
//!
//! Builder calls never fail. The first structural error (an invalid sort direction, a
//! malformed membership list, ...) is remembered and reported when the query compiles.

use std::{ops::RangeInclusive, str::FromStr, sync::Arc, time::Duration};

use bson::{Bson, Document};

use crate::{
    cast::CastRegistry,
    error::{DocumentStoreError, DocumentStoreResult},
};

/// Sort direction for query results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    /// Ascending order (A to Z, 0 to 9, earliest to latest).
    Asc,
    /// Descending order (Z to A, 9 to 0, latest to earliest).
    Desc,
}

impl SortDirection {
    /// The native sort weight: `1` or `-1`.
    pub fn weight(self) -> i32 {
        match self {
            SortDirection::Asc => 1,
            SortDirection::Desc => -1,
        }
    }
}

impl FromStr for SortDirection {
    type Err = DocumentStoreError;

    fn from_str(direction: &str) -> Result<Self, Self::Err> {
        match direction.trim().to_ascii_lowercase().as_str() {
            "asc" | "ascending" | "1" => Ok(SortDirection::Asc),
            "desc" | "descending" | "-1" => Ok(SortDirection::Desc),
            other => Err(DocumentStoreError::invalid_operand(
                "order_by",
                format!("sort direction must be \"asc\" or \"desc\", got {other:?}"),
            )),
        }
    }
}

/// What a sort entry orders by.
#[derive(Debug, Clone, PartialEq)]
pub enum SortKey {
    Field(String),
    /// A raw ordering expression. Rejected at compile time.
    Raw(String),
    /// Random ordering. Rejected at compile time.
    Random,
}

/// Sort specification for query results.
#[derive(Debug, Clone, PartialEq)]
pub struct Sort {
    pub key: SortKey,
    pub direction: SortDirection,
}

/// What a grouping entry groups by.
#[derive(Debug, Clone, PartialEq)]
pub enum GroupKey {
    Field(String),
    /// A raw grouping expression. Rejected at compile time.
    Raw(String),
}

/// Comparison operators accepted by the `where_op` family.
#[derive(Debug, Clone, PartialEq)]
pub enum Operator {
    Eq,
    Ne,
    Lt,
    Lte,
    Gt,
    Gte,
    /// SQL `LIKE` with `%` and `_` wildcards.
    Like { negated: bool, case_insensitive: bool },
    /// A regular expression match.
    Regex { negated: bool, case_insensitive: bool },
    In,
    NotIn,
    Between,
    NotBetween,
    Exists,
    Type,
    Mod,
    All,
    Size,
    ElemMatch,
    /// Compares one field with another. Rejected at compile time.
    Column,
    /// Full-text search. Rejected at compile time.
    FullText,
    /// An operator string with no known meaning. Rejected at compile time.
    Unknown(String),
}

impl Operator {
    /// Parses an operator string. Parsing is case-insensitive and never fails: unknown
    /// operators are kept so compilation can report them.
    pub fn parse(operator: &str) -> Self {
        let normalized = operator.trim().to_ascii_lowercase();
        let normalized = normalized.split_whitespace().collect::<Vec<_>>().join(" ");

        match normalized.as_str() {
            "=" | "==" => Operator::Eq,
            "!=" | "<>" => Operator::Ne,
            "<" => Operator::Lt,
            "<=" => Operator::Lte,
            ">" => Operator::Gt,
            ">=" => Operator::Gte,
            "like" => Operator::Like { negated: false, case_insensitive: false },
            "not like" => Operator::Like { negated: true, case_insensitive: false },
            "ilike" => Operator::Like { negated: false, case_insensitive: true },
            "not ilike" => Operator::Like { negated: true, case_insensitive: true },
            "regex" | "regexp" => Operator::Regex { negated: false, case_insensitive: false },
            "not regex" | "not regexp" => Operator::Regex { negated: true, case_insensitive: false },
            "iregex" | "iregexp" => Operator::Regex { negated: false, case_insensitive: true },
            "not iregex" | "not iregexp" => Operator::Regex { negated: true, case_insensitive: true },
            "in" => Operator::In,
            "not in" | "nin" => Operator::NotIn,
            "between" => Operator::Between,
            "not between" => Operator::NotBetween,
            "exists" => Operator::Exists,
            "type" => Operator::Type,
            "mod" => Operator::Mod,
            "all" => Operator::All,
            "size" | "$size" => Operator::Size,
            "elemmatch" => Operator::ElemMatch,
            _ => Operator::Unknown(operator.to_string()),
        }
    }

    /// A display name used in error messages.
    pub fn name(&self) -> String {
        match self {
            Operator::Eq => "=".to_string(),
            Operator::Ne => "!=".to_string(),
            Operator::Lt => "<".to_string(),
            Operator::Lte => "<=".to_string(),
            Operator::Gt => ">".to_string(),
            Operator::Gte => ">=".to_string(),
            Operator::Like { negated, case_insensitive } => {
                let like = if *case_insensitive { "ilike" } else { "like" };
                if *negated { format!("not {like}") } else { like.to_string() }
            }
            Operator::Regex { negated, case_insensitive } => {
                let regex = if *case_insensitive { "iregex" } else { "regex" };
                if *negated { format!("not {regex}") } else { regex.to_string() }
            }
            Operator::In => "in".to_string(),
            Operator::NotIn => "not in".to_string(),
            Operator::Between => "between".to_string(),
            Operator::NotBetween => "not between".to_string(),
            Operator::Exists => "exists".to_string(),
            Operator::Type => "type".to_string(),
            Operator::Mod => "mod".to_string(),
            Operator::All => "all".to_string(),
            Operator::Size => "size".to_string(),
            Operator::ElemMatch => "elemMatch".to_string(),
            Operator::Column => "column".to_string(),
            Operator::FullText => "fulltext".to_string(),
            Operator::Unknown(name) => name.clone(),
        }
    }
}

/// The operand of a predicate, shaped according to its operator.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Scalar(Bson),
    /// Range bounds or a `(divisor, remainder)` pair.
    Pair(Bson, Bson),
    Sequence(Vec<Bson>),
    SubFilter(Document),
    /// Another field, for column comparisons.
    Column(String),
}

impl Operand {
    /// Shapes a loosely typed value for `operator`.
    pub(crate) fn for_operator(operator: &Operator, value: Bson) -> DocumentStoreResult<Self> {
        match operator {
            Operator::In | Operator::NotIn => {
                Ok(Operand::Sequence(membership(operator, into_items(value))?))
            }
            Operator::All => Ok(Operand::Sequence(into_items(value))),
            Operator::Between | Operator::NotBetween => bounds(operator, into_items(value)),
            Operator::Mod => match into_items(value).as_slice() {
                [divisor, remainder] => Ok(Operand::Pair(divisor.clone(), remainder.clone())),
                _ => Err(DocumentStoreError::invalid_operand(
                    operator.name(),
                    "expected [divisor, remainder]",
                )),
            },
            Operator::ElemMatch => match value {
                Bson::Document(filter) => Ok(Operand::SubFilter(filter)),
                other => Err(DocumentStoreError::invalid_operand(
                    operator.name(),
                    format!("expected a sub-filter document, got {other}"),
                )),
            },
            Operator::Size => match value {
                Bson::Int32(_) | Bson::Int64(_) => Ok(Operand::Scalar(value)),
                other => Err(DocumentStoreError::invalid_operand(
                    operator.name(),
                    format!("expected an integer length, got {other}"),
                )),
            },
            Operator::Exists => match value {
                Bson::Boolean(_) => Ok(Operand::Scalar(value)),
                Bson::Int32(flag) => Ok(Operand::Scalar(Bson::Boolean(flag != 0))),
                Bson::Int64(flag) => Ok(Operand::Scalar(Bson::Boolean(flag != 0))),
                other => Err(DocumentStoreError::invalid_operand(
                    operator.name(),
                    format!("expected a boolean, got {other}"),
                )),
            },
            _ => Ok(Operand::Scalar(value)),
        }
    }
}

fn into_items(value: Bson) -> Vec<Bson> {
    match value {
        Bson::Array(items) => items,
        other => vec![other],
    }
}

/// Flattens single-value wrappers one level deep.
fn membership(operator: &Operator, values: Vec<Bson>) -> DocumentStoreResult<Vec<Bson>> {
    values
        .into_iter()
        .map(|value| match value {
            Bson::Document(wrapper) if wrapper.len() == 1 => {
                Ok(wrapper.into_iter().next().map_or(Bson::Null, |(_, inner)| inner))
            }
            Bson::Array(wrapper) if wrapper.len() == 1 => {
                Ok(wrapper.into_iter().next().unwrap_or(Bson::Null))
            }
            Bson::Document(_) | Bson::Array(_) => Err(DocumentStoreError::invalid_operand(
                operator.name(),
                "membership entries must be scalars or single-value wrappers",
            )),
            scalar => Ok(scalar),
        })
        .collect()
}

/// Takes the first two bounds after flattening nested lists one level.
fn bounds(operator: &Operator, values: Vec<Bson>) -> DocumentStoreResult<Operand> {
    let mut flattened = values.into_iter().flat_map(into_items);

    match (flattened.next(), flattened.next()) {
        (Some(low), Some(high)) => Ok(Operand::Pair(low, high)),
        _ => Err(DocumentStoreError::invalid_operand(
            operator.name(),
            "expected two bounds",
        )),
    }
}

/// A single field condition.
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    pub field: String,
    pub operator: Operator,
    pub operand: Operand,
}

/// A node of the filter tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Clause {
    Predicate(Predicate),
    And(Vec<Clause>),
    Or(Vec<Clause>),
    Not(Box<Clause>),
    /// A native filter document, merged as-is.
    Raw(Document),
}

impl Clause {
    /// Creates a predicate clause from an already shaped operand.
    pub fn predicate(field: impl Into<String>, operator: Operator, operand: Operand) -> Self {
        Clause::Predicate(Predicate { field: field.into(), operator, operand })
    }

    /// Negates this clause.
    pub fn not(self) -> Self {
        Clause::Not(Box::new(self))
    }
}

/// The ordered list of top-level clauses of a query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClauseStack {
    clauses: Vec<Clause>,
}

impl ClauseStack {
    pub fn clauses(&self) -> &[Clause] {
        &self.clauses
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    pub fn into_clauses(self) -> Vec<Clause> {
        self.clauses
    }

    /// Conjoins `clause` with the accumulated clauses.
    pub fn and(&mut self, clause: Clause) {
        self.clauses.push(clause);
    }

    /// Disjoins `clause` with everything accumulated so far.
    pub fn or(&mut self, clause: Clause) {
        let mut accumulated = std::mem::take(&mut self.clauses);

        let group = match accumulated.len() {
            0 => clause,
            1 => match accumulated.pop() {
                Some(Clause::Or(mut branches)) => {
                    branches.push(clause);
                    Clause::Or(branches)
                }
                Some(single) => Clause::Or(vec![single, clause]),
                None => clause,
            },
            _ => Clause::Or(vec![Clause::And(accumulated), clause]),
        };

        self.clauses.push(group);
    }
}

/// Aggregate functions computed by the group stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateFunction {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

impl AggregateFunction {
    /// The group accumulator implementing this function.
    pub fn accumulator(self) -> &'static str {
        match self {
            AggregateFunction::Count | AggregateFunction::Sum => "$sum",
            AggregateFunction::Avg => "$avg",
            AggregateFunction::Min => "$min",
            AggregateFunction::Max => "$max",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            AggregateFunction::Count => "count",
            AggregateFunction::Sum => "sum",
            AggregateFunction::Avg => "avg",
            AggregateFunction::Min => "min",
            AggregateFunction::Max => "max",
        }
    }
}

/// An aggregate requested on a query.
#[derive(Debug, Clone, PartialEq)]
pub struct Aggregate {
    pub function: AggregateFunction,
    /// The attribute path to aggregate; `None` counts documents.
    pub field: Option<String>,
}

/// Execution options forwarded with the compiled command.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryOptions {
    /// An index name or key pattern.
    pub hint: Option<Bson>,
    pub timeout: Option<Duration>,
    pub comment: Option<Bson>,
}

/// A structured query for retrieving, aggregating and mutating documents.
///
/// Use [`QueryBuilder`] for construction.
#[derive(Debug, Clone, Default)]
pub struct Query {
    pub(crate) wheres: ClauseStack,
    pub(crate) orders: Vec<Sort>,
    pub(crate) limit: Option<i64>,
    pub(crate) offset: Option<u64>,
    pub(crate) columns: Vec<String>,
    pub(crate) projection: Document,
    pub(crate) groups: Vec<GroupKey>,
    pub(crate) distinct: bool,
    pub(crate) aggregate: Option<Aggregate>,
    pub(crate) havings: Vec<&'static str>,
    pub(crate) unions: Vec<&'static str>,
    pub(crate) options: QueryOptions,
    pub(crate) casts: Option<Arc<CastRegistry>>,
    pub(crate) error: Option<DocumentStoreError>,
}

impl Query {
    /// Creates a new empty query with no clauses.
    pub fn new() -> Self {
        Query::default()
    }

    /// Creates a new query builder for fluent construction.
    pub fn builder() -> QueryBuilder {
        QueryBuilder::new()
    }

    /// Turns this query back into a builder to add more clauses.
    pub fn into_builder(self) -> QueryBuilder {
        QueryBuilder { query: self }
    }

    pub fn clauses(&self) -> &[Clause] {
        self.wheres.clauses()
    }

    pub fn orders(&self) -> &[Sort] {
        &self.orders
    }

    pub fn limit(&self) -> Option<i64> {
        self.limit
    }

    pub fn offset(&self) -> Option<u64> {
        self.offset
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn groups(&self) -> &[GroupKey] {
        &self.groups
    }

    pub fn is_distinct(&self) -> bool {
        self.distinct
    }

    pub fn aggregate(&self) -> Option<&Aggregate> {
        self.aggregate.as_ref()
    }

    pub fn options(&self) -> &QueryOptions {
        &self.options
    }

    /// The cast registry operands are converted with, if bound.
    pub fn casts(&self) -> Option<&CastRegistry> {
        self.casts.as_deref()
    }

    /// The first construction error recorded by the builder.
    pub fn error(&self) -> Option<&DocumentStoreError> {
        self.error.as_ref()
    }
}

/// Range bounds for the `between` family.
///
/// Built from arrays, vectors or inclusive ranges:
///
/// ```ignore
/// builder.where_between("age", [18, 65]);
/// builder.where_between("age", 18..=65);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Bounds(Vec<Bson>);

impl<T: Into<Bson>, const N: usize> From<[T; N]> for Bounds {
    fn from(bounds: [T; N]) -> Self {
        Bounds(bounds.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Bson>> From<Vec<T>> for Bounds {
    fn from(bounds: Vec<T>) -> Self {
        Bounds(bounds.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Bson>> From<RangeInclusive<T>> for Bounds {
    fn from(range: RangeInclusive<T>) -> Self {
        let (start, end) = range.into_inner();
        Bounds(vec![start.into(), end.into()])
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Boolean {
    And,
    Or,
}

/// Fluent builder for [`Query`].
#[derive(Debug, Clone, Default)]
pub struct QueryBuilder {
    query: Query,
}

impl QueryBuilder {
    /// Creates a new query builder.
    pub fn new() -> Self {
        QueryBuilder { query: Query::default() }
    }

    /// Binds the cast registry used to convert operands at compile time.
    pub fn with_casts(mut self, casts: Arc<CastRegistry>) -> Self {
        self.query.casts = Some(casts);
        self
    }

    fn fail(mut self, err: DocumentStoreError) -> Self {
        if self.query.error.is_none() {
            self.query.error = Some(err);
        }
        self
    }

    fn push(mut self, boolean: Boolean, clause: Clause) -> Self {
        match boolean {
            Boolean::And => self.query.wheres.and(clause),
            Boolean::Or => self.query.wheres.or(clause),
        }
        self
    }

    fn push_predicate(
        self,
        boolean: Boolean,
        field: impl Into<String>,
        operator: Operator,
        value: Bson,
        negated: bool,
    ) -> Self {
        match Operand::for_operator(&operator, value) {
            Ok(operand) => {
                let clause = Clause::predicate(field, operator, operand);
                self.push(boolean, if negated { clause.not() } else { clause })
            }
            Err(err) => self.fail(err),
        }
    }

    fn push_nested(self, boolean: Boolean, negated: bool, build: impl FnOnce(QueryBuilder) -> QueryBuilder) -> Self {
        let nested = build(QueryBuilder::new()).query;
        if let Some(err) = nested.error {
            return self.fail(err);
        }

        let mut clauses = nested.wheres.into_clauses();
        let group = match clauses.len() {
            0 => return self,
            1 => match clauses.pop() {
                Some(clause) => clause,
                None => return self,
            },
            _ => Clause::And(clauses),
        };

        self.push(boolean, if negated { group.not() } else { group })
    }

    /// Adds an equality clause.
    pub fn where_eq(self, field: impl Into<String>, value: impl Into<Bson>) -> Self {
        self.push_predicate(Boolean::And, field, Operator::Eq, value.into(), false)
    }

    /// Adds a clause with an explicit operator such as `">="`, `"like"` or `"not in"`.
    ///
    /// # Arguments
    ///
    /// * `field` - The attribute path to compare
    /// * `operator` - The operator string, parsed case-insensitively
    /// * `value` - The operand
    pub fn where_op(self, field: impl Into<String>, operator: &str, value: impl Into<Bson>) -> Self {
        self.push_predicate(Boolean::And, field, Operator::parse(operator), value.into(), false)
    }

    pub fn or_where_eq(self, field: impl Into<String>, value: impl Into<Bson>) -> Self {
        self.push_predicate(Boolean::Or, field, Operator::Eq, value.into(), false)
    }

    pub fn or_where_op(self, field: impl Into<String>, operator: &str, value: impl Into<Bson>) -> Self {
        self.push_predicate(Boolean::Or, field, Operator::parse(operator), value.into(), false)
    }

    /// Adds a negated clause: documents where `field operator value` does not hold.
    pub fn where_not(self, field: impl Into<String>, operator: &str, value: impl Into<Bson>) -> Self {
        self.push_predicate(Boolean::And, field, Operator::parse(operator), value.into(), true)
    }

    pub fn or_where_not(self, field: impl Into<String>, operator: &str, value: impl Into<Bson>) -> Self {
        self.push_predicate(Boolean::Or, field, Operator::parse(operator), value.into(), true)
    }

    /// Adds a membership clause. Empty lists are kept and match nothing.
    pub fn where_in<V: Into<Bson>>(self, field: impl Into<String>, values: impl IntoIterator<Item = V>) -> Self {
        let values = Bson::Array(values.into_iter().map(Into::into).collect());
        self.push_predicate(Boolean::And, field, Operator::In, values, false)
    }

    pub fn where_not_in<V: Into<Bson>>(self, field: impl Into<String>, values: impl IntoIterator<Item = V>) -> Self {
        let values = Bson::Array(values.into_iter().map(Into::into).collect());
        self.push_predicate(Boolean::And, field, Operator::NotIn, values, false)
    }

    pub fn or_where_in<V: Into<Bson>>(self, field: impl Into<String>, values: impl IntoIterator<Item = V>) -> Self {
        let values = Bson::Array(values.into_iter().map(Into::into).collect());
        self.push_predicate(Boolean::Or, field, Operator::In, values, false)
    }

    pub fn or_where_not_in<V: Into<Bson>>(self, field: impl Into<String>, values: impl IntoIterator<Item = V>) -> Self {
        let values = Bson::Array(values.into_iter().map(Into::into).collect());
        self.push_predicate(Boolean::Or, field, Operator::NotIn, values, false)
    }

    /// Adds an inclusive range clause.
    pub fn where_between(self, field: impl Into<String>, bounds: impl Into<Bounds>) -> Self {
        let Bounds(bounds) = bounds.into();
        self.push_predicate(Boolean::And, field, Operator::Between, Bson::Array(bounds), false)
    }

    pub fn where_not_between(self, field: impl Into<String>, bounds: impl Into<Bounds>) -> Self {
        let Bounds(bounds) = bounds.into();
        self.push_predicate(Boolean::And, field, Operator::NotBetween, Bson::Array(bounds), false)
    }

    pub fn or_where_between(self, field: impl Into<String>, bounds: impl Into<Bounds>) -> Self {
        let Bounds(bounds) = bounds.into();
        self.push_predicate(Boolean::Or, field, Operator::Between, Bson::Array(bounds), false)
    }

    pub fn or_where_not_between(self, field: impl Into<String>, bounds: impl Into<Bounds>) -> Self {
        let Bounds(bounds) = bounds.into();
        self.push_predicate(Boolean::Or, field, Operator::NotBetween, Bson::Array(bounds), false)
    }

    /// Matches documents where `field` is null or missing.
    pub fn where_null(self, field: impl Into<String>) -> Self {
        self.push_predicate(Boolean::And, field, Operator::Eq, Bson::Null, false)
    }

    pub fn where_not_null(self, field: impl Into<String>) -> Self {
        self.push_predicate(Boolean::And, field, Operator::Ne, Bson::Null, false)
    }

    pub fn or_where_null(self, field: impl Into<String>) -> Self {
        self.push_predicate(Boolean::Or, field, Operator::Eq, Bson::Null, false)
    }

    pub fn or_where_not_null(self, field: impl Into<String>) -> Self {
        self.push_predicate(Boolean::Or, field, Operator::Ne, Bson::Null, false)
    }

    /// Adds one null clause per field, each combined with `AND`.
    pub fn where_null_many<F: Into<String>>(self, fields: impl IntoIterator<Item = F>) -> Self {
        fields.into_iter().fold(self, |builder, field| builder.where_null(field))
    }

    /// Adds one null clause per field, each combined with `OR`.
    pub fn or_where_null_many<F: Into<String>>(self, fields: impl IntoIterator<Item = F>) -> Self {
        fields.into_iter().fold(self, |builder, field| builder.or_where_null(field))
    }

    /// Adds a parenthesized group built by `build`.
    ///
    /// ```ignore
    /// Query::builder()
    ///     .where_eq("name", "knife")
    ///     .where_nested(|q| q.where_op("amount", "<", 5).or_where_op("amount", ">", 20))
    /// ```
    pub fn where_nested(self, build: impl FnOnce(QueryBuilder) -> QueryBuilder) -> Self {
        self.push_nested(Boolean::And, false, build)
    }

    pub fn or_where_nested(self, build: impl FnOnce(QueryBuilder) -> QueryBuilder) -> Self {
        self.push_nested(Boolean::Or, false, build)
    }

    /// Adds a negated group.
    pub fn where_not_nested(self, build: impl FnOnce(QueryBuilder) -> QueryBuilder) -> Self {
        self.push_nested(Boolean::And, true, build)
    }

    /// Merges a native filter document as-is.
    pub fn where_raw(self, filter: Document) -> Self {
        self.push(Boolean::And, Clause::Raw(filter))
    }

    pub fn or_where_raw(self, filter: Document) -> Self {
        self.push(Boolean::Or, Clause::Raw(filter))
    }

    /// Compares two fields. Recorded so that compilation can reject it.
    pub fn where_column(self, first: impl Into<String>, operator: &str, second: impl Into<String>) -> Self {
        let clause = Clause::predicate(first, Operator::Column, Operand::Column(format!("{} {}", operator, second.into())));
        self.push(Boolean::And, clause)
    }

    pub fn or_where_column(self, first: impl Into<String>, operator: &str, second: impl Into<String>) -> Self {
        let clause = Clause::predicate(first, Operator::Column, Operand::Column(format!("{} {}", operator, second.into())));
        self.push(Boolean::Or, clause)
    }

    /// Full-text search. Recorded so that compilation can reject it.
    pub fn where_fulltext(self, field: impl Into<String>, search: impl Into<String>) -> Self {
        let clause = Clause::predicate(field, Operator::FullText, Operand::Scalar(Bson::String(search.into())));
        self.push(Boolean::And, clause)
    }

    pub fn or_where_fulltext(self, field: impl Into<String>, search: impl Into<String>) -> Self {
        let clause = Clause::predicate(field, Operator::FullText, Operand::Scalar(Bson::String(search.into())));
        self.push(Boolean::Or, clause)
    }

    /// Appends a sort entry.
    ///
    /// # Arguments
    ///
    /// * `field` - The field name to sort by
    /// * `direction` - The sort direction (ascending or descending)
    pub fn order_by(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.query.orders.push(Sort { key: SortKey::Field(field.into()), direction });
        self
    }

    /// Appends a sort entry from a direction string such as `"asc"` or `"DESC"`.
    pub fn order_by_str(self, field: impl Into<String>, direction: &str) -> Self {
        match direction.parse::<SortDirection>() {
            Ok(direction) => self.order_by(field, direction),
            Err(err) => self.fail(err),
        }
    }

    pub fn order_by_desc(self, field: impl Into<String>) -> Self {
        self.order_by(field, SortDirection::Desc)
    }

    /// Orders by `created_at`, newest first.
    pub fn latest(self) -> Self {
        self.order_by("created_at", SortDirection::Desc)
    }

    pub fn latest_by(self, field: impl Into<String>) -> Self {
        self.order_by(field, SortDirection::Desc)
    }

    /// Orders by `created_at`, oldest first.
    pub fn oldest(self) -> Self {
        self.order_by("created_at", SortDirection::Asc)
    }

    pub fn oldest_by(self, field: impl Into<String>) -> Self {
        self.order_by(field, SortDirection::Asc)
    }

    /// Clears every sort entry.
    pub fn reorder(mut self) -> Self {
        self.query.orders.clear();
        self
    }

    /// Replaces every sort entry with a single one.
    pub fn reorder_by(self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.reorder().order_by(field, direction)
    }

    /// Raw ordering expression. Recorded so that compilation can reject it.
    pub fn order_by_raw(mut self, expression: impl Into<String>) -> Self {
        self.query.orders.push(Sort { key: SortKey::Raw(expression.into()), direction: SortDirection::Asc });
        self
    }

    /// Random ordering. Recorded so that compilation can reject it.
    pub fn in_random_order(mut self) -> Self {
        self.query.orders.push(Sort { key: SortKey::Random, direction: SortDirection::Asc });
        self
    }

    /// Sets the maximum number of documents to return. Zero or a negative value
    /// removes the limit.
    pub fn limit(mut self, limit: i64) -> Self {
        self.query.limit = (limit > 0).then_some(limit);
        self
    }

    /// Alias of [`QueryBuilder::limit`].
    pub fn take(self, limit: i64) -> Self {
        self.limit(limit)
    }

    /// Sets the number of documents to skip. Zero or a negative value removes it.
    pub fn offset(mut self, offset: i64) -> Self {
        self.query.offset = u64::try_from(offset).ok().filter(|offset| *offset > 0);
        self
    }

    /// Alias of [`QueryBuilder::offset`].
    pub fn skip(self, offset: i64) -> Self {
        self.offset(offset)
    }

    /// Sets offset and limit for a 1-indexed page. Pages hold at least one document.
    pub fn for_page(self, page: i64, per_page: i64) -> Self {
        let per_page = per_page.max(1);
        self.offset((page.max(1) - 1).saturating_mul(per_page)).limit(per_page)
    }

    pub fn group_by<F: Into<String>>(mut self, fields: impl IntoIterator<Item = F>) -> Self {
        self.query.groups.extend(fields.into_iter().map(|field| GroupKey::Field(field.into())));
        self
    }

    /// Raw grouping expression. Recorded so that compilation can reject it.
    pub fn group_by_raw(mut self, expression: impl Into<String>) -> Self {
        self.query.groups.push(GroupKey::Raw(expression.into()));
        self
    }

    /// `HAVING` is recorded so that compilation can reject it.
    pub fn having(mut self, _field: impl Into<String>, _operator: &str, _value: impl Into<Bson>) -> Self {
        self.query.havings.push("having");
        self
    }

    pub fn or_having(mut self, _field: impl Into<String>, _operator: &str, _value: impl Into<Bson>) -> Self {
        self.query.havings.push("or_having");
        self
    }

    pub fn having_raw(mut self, _expression: impl Into<String>) -> Self {
        self.query.havings.push("having_raw");
        self
    }

    pub fn or_having_raw(mut self, _expression: impl Into<String>) -> Self {
        self.query.havings.push("or_having_raw");
        self
    }

    pub fn having_between(mut self, _field: impl Into<String>, _bounds: impl Into<Bounds>) -> Self {
        self.query.havings.push("having_between");
        self
    }

    /// Unions are recorded so that compilation can reject them.
    pub fn union(mut self, _other: Query) -> Self {
        self.query.unions.push("union");
        self
    }

    pub fn union_all(mut self, _other: Query) -> Self {
        self.query.unions.push("union_all");
        self
    }

    /// Returns distinct combinations of the selected columns.
    pub fn distinct(mut self) -> Self {
        self.query.distinct = true;
        self
    }

    /// Returns the distinct values of `field`.
    pub fn distinct_on(self, field: impl Into<String>) -> Self {
        self.select([field]).distinct()
    }

    /// Replaces the selected columns. `*` selects everything.
    pub fn select<F: Into<String>>(mut self, fields: impl IntoIterator<Item = F>) -> Self {
        self.query.columns.clear();
        self.add_select(fields)
    }

    /// Adds columns to the selection, skipping duplicates.
    pub fn add_select<F: Into<String>>(mut self, fields: impl IntoIterator<Item = F>) -> Self {
        for field in fields {
            let field = field.into();
            if field != "*" && !self.query.columns.contains(&field) {
                self.query.columns.push(field);
            }
        }
        self
    }

    /// Merges a raw projection document.
    pub fn project(mut self, projection: Document) -> Self {
        self.query.projection.extend(projection);
        self
    }

    /// Requests an aggregate instead of rows.
    pub fn with_aggregate(mut self, function: AggregateFunction, field: Option<&str>) -> Self {
        self.query.aggregate = Some(Aggregate { function, field: field.map(str::to_string) });
        self
    }

    /// Forces an index, by name or by key pattern.
    pub fn hint(mut self, hint: impl Into<Bson>) -> Self {
        self.query.options.hint = Some(hint.into());
        self
    }

    /// Bounds the server-side execution time.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.query.options.timeout = Some(timeout);
        self
    }

    pub fn comment(mut self, comment: impl Into<Bson>) -> Self {
        self.query.options.comment = Some(comment.into());
        self
    }

    /// Builds and returns the final query.
    pub fn build(self) -> Query {
        self.query
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    fn eq(field: &str, value: impl Into<Bson>) -> Clause {
        Clause::predicate(field, Operator::Eq, Operand::Scalar(value.into()))
    }

    #[test]
    fn operators_parse_case_insensitively() {
        assert_eq!(Operator::parse("LIKE"), Operator::Like { negated: false, case_insensitive: false });
        assert_eq!(Operator::parse("Not  ILike"), Operator::Like { negated: true, case_insensitive: true });
        assert_eq!(Operator::parse("<>"), Operator::Ne);
        assert_eq!(Operator::parse("$size"), Operator::Size);
        assert_eq!(Operator::parse("elemMatch"), Operator::ElemMatch);
        assert_eq!(Operator::parse("sounds like"), Operator::Unknown("sounds like".to_string()));
    }

    #[test]
    fn sort_direction_rejects_unknown_values() {
        assert_eq!("DESC".parse::<SortDirection>().unwrap(), SortDirection::Desc);
        assert!(matches!(
            "asec".parse::<SortDirection>(),
            Err(DocumentStoreError::InvalidOperand { .. })
        ));

        let query = Query::builder().order_by_str("name", "asec").build();
        assert!(query.error().is_some());
        assert!(query.orders().is_empty());
    }

    #[test]
    fn or_disjoins_everything_accumulated() {
        let query = Query::builder()
            .where_eq("a", 1)
            .where_eq("b", 2)
            .or_where_eq("c", 3)
            .build();

        assert_eq!(
            query.clauses(),
            &[Clause::Or(vec![Clause::And(vec![eq("a", 1), eq("b", 2)]), eq("c", 3)])]
        );
    }

    #[test]
    fn consecutive_or_clauses_extend_the_same_group() {
        let query = Query::builder()
            .where_eq("a", 1)
            .or_where_eq("b", 2)
            .or_where_eq("c", 3)
            .build();

        assert_eq!(query.clauses(), &[Clause::Or(vec![eq("a", 1), eq("b", 2), eq("c", 3)])]);
    }

    #[test]
    fn leading_or_is_a_plain_clause() {
        let query = Query::builder().or_where_eq("a", 1).build();
        assert_eq!(query.clauses(), &[eq("a", 1)]);
    }

    #[test]
    fn nested_groups_are_kept_intact() {
        let query = Query::builder()
            .where_eq("name", "knife")
            .where_nested(|q| q.where_eq("a", 1).where_eq("b", 2))
            .build();

        assert_eq!(
            query.clauses(),
            &[eq("name", "knife"), Clause::And(vec![eq("a", 1), eq("b", 2)])]
        );
    }

    #[test]
    fn nested_errors_surface_on_the_outer_query() {
        let query = Query::builder()
            .where_nested(|q| q.where_op("n", "mod", 3))
            .build();

        assert!(matches!(query.error(), Some(DocumentStoreError::InvalidOperand { .. })));
    }

    #[test]
    fn membership_lists_flatten_single_value_wrappers() {
        let query = Query::builder()
            .where_in("id", [Bson::from(1), Bson::Array(vec![2.into()]), Bson::Document(doc! { "k": 3 })])
            .build();

        assert_eq!(
            query.clauses(),
            &[Clause::predicate("id", Operator::In, Operand::Sequence(vec![1.into(), 2.into(), 3.into()]))]
        );
    }

    #[test]
    fn membership_lists_reject_ambiguous_wrappers() {
        let query = Query::builder()
            .where_in("id", [Bson::Array(vec![1.into(), 2.into()])])
            .build();

        assert!(matches!(query.error(), Some(DocumentStoreError::InvalidOperand { .. })));
    }

    #[test]
    fn between_takes_the_first_two_flattened_bounds() {
        let query = Query::builder()
            .where_between("n", vec![Bson::Array(vec![1.into()]), Bson::Array(vec![2.into(), 3.into()])])
            .where_between("m", 5..=9)
            .build();

        assert_eq!(
            query.clauses(),
            &[
                Clause::predicate("n", Operator::Between, Operand::Pair(1.into(), 2.into())),
                Clause::predicate("m", Operator::Between, Operand::Pair(5.into(), 9.into())),
            ]
        );
    }

    #[test]
    fn non_positive_limit_and_offset_unset_them() {
        let query = Query::builder().limit(10).offset(5).build();
        assert_eq!((query.limit(), query.offset()), (Some(10), Some(5)));

        let query = query.into_builder().limit(0).skip(-1).build();
        assert_eq!((query.limit(), query.offset()), (None, None));

        let query = Query::builder().for_page(3, 20).build();
        assert_eq!((query.limit(), query.offset()), (Some(20), Some(40)));
    }

    #[test]
    fn for_page_stays_bounded() {
        let query = Query::builder().for_page(2, 0).build();
        assert_eq!((query.limit(), query.offset()), (Some(1), Some(1)));

        let query = Query::builder().for_page(i64::MAX, i64::MAX).build();
        assert_eq!((query.limit(), query.offset()), (Some(i64::MAX), Some(i64::MAX as u64)));
    }

    #[test]
    fn select_dedupes_and_ignores_wildcard() {
        let query = Query::builder()
            .select(["*", "name"])
            .add_select(["name", "amount"])
            .build();

        assert_eq!(query.columns(), &["name".to_string(), "amount".to_string()]);
    }

    #[test]
    fn reorder_replaces_sort_entries() {
        let query = Query::builder().latest().reorder_by("name", SortDirection::Asc).build();

        assert_eq!(
            query.orders(),
            &[Sort { key: SortKey::Field("name".to_string()), direction: SortDirection::Asc }]
        );
    }
}
