//! Translation of the clause tree into a native filter document.

use bson::{Bson, Document, doc};

use crate::{
    cast::CastRegistry,
    error::{DocumentStoreError, DocumentStoreResult},
    query::{Clause, Operand, Operator, Predicate},
};

/// Walks a clause tree. Backends or tools that need a different rendering of the
/// filter implement this trait; [`FilterTranslator`] is the native one.
pub trait ClauseVisitor {
    type Output;
    type Error: Into<DocumentStoreError>;

    fn visit_and(&mut self, clauses: &[Clause]) -> Result<Self::Output, Self::Error>;
    fn visit_or(&mut self, clauses: &[Clause]) -> Result<Self::Output, Self::Error>;
    fn visit_not(&mut self, clause: &Clause) -> Result<Self::Output, Self::Error>;
    fn visit_raw(&mut self, filter: &Document) -> Result<Self::Output, Self::Error>;
    fn visit_predicate(&mut self, predicate: &Predicate) -> Result<Self::Output, Self::Error>;

    fn visit_clause(&mut self, clause: &Clause) -> Result<Self::Output, Self::Error> {
        match clause {
            Clause::And(clauses) => self.visit_and(clauses),
            Clause::Or(clauses) => self.visit_or(clauses),
            Clause::Not(clause) => self.visit_not(clause),
            Clause::Raw(filter) => self.visit_raw(filter),
            Clause::Predicate(predicate) => self.visit_predicate(predicate),
        }
    }
}

/// Renders clauses as a native filter, converting operands through the bound casts.
#[derive(Debug, Clone, Copy, Default)]
pub struct FilterTranslator<'a> {
    casts: Option<&'a CastRegistry>,
}

impl<'a> FilterTranslator<'a> {
    pub fn new(casts: Option<&'a CastRegistry>) -> Self {
        Self { casts }
    }

    /// Translates the top-level clause list: none gives `{}`, one renders as itself,
    /// several are wrapped in `$and`.
    pub fn translate(&mut self, clauses: &[Clause]) -> DocumentStoreResult<Document> {
        match clauses {
            [] => Ok(Document::new()),
            [single] => self.visit_clause(single),
            many => self.visit_and(many),
        }
    }

    fn cast(&self, field: &str, value: &Bson) -> DocumentStoreResult<Bson> {
        match self.casts {
            Some(casts) => casts.to_query_value(field, value.clone()),
            None => Ok(value.clone()),
        }
    }

    fn cast_all(&self, field: &str, values: &[Bson]) -> DocumentStoreResult<Vec<Bson>> {
        values.iter().map(|value| self.cast(field, value)).collect()
    }

    fn branches(&mut self, clauses: &[Clause]) -> DocumentStoreResult<Vec<Document>> {
        clauses.iter().map(|clause| self.visit_clause(clause)).collect()
    }
}

impl ClauseVisitor for FilterTranslator<'_> {
    type Output = Document;
    type Error = DocumentStoreError;

    fn visit_and(&mut self, clauses: &[Clause]) -> DocumentStoreResult<Document> {
        Ok(doc! { "$and": self.branches(clauses)? })
    }

    fn visit_or(&mut self, clauses: &[Clause]) -> DocumentStoreResult<Document> {
        Ok(doc! { "$or": self.branches(clauses)? })
    }

    fn visit_not(&mut self, clause: &Clause) -> DocumentStoreResult<Document> {
        Ok(doc! { "$nor": [self.visit_clause(clause)?] })
    }

    fn visit_raw(&mut self, filter: &Document) -> DocumentStoreResult<Document> {
        Ok(filter.clone())
    }

    fn visit_predicate(&mut self, predicate: &Predicate) -> DocumentStoreResult<Document> {
        let field = predicate.field.as_str();

        match (&predicate.operator, &predicate.operand) {
            (Operator::Eq, Operand::Scalar(value)) => Ok(doc! { field: self.cast(field, value)? }),
            (Operator::Ne, Operand::Scalar(value)) => {
                Ok(doc! { field: { "$ne": self.cast(field, value)? } })
            }
            (Operator::Lt, Operand::Scalar(value)) => {
                Ok(doc! { field: { "$lt": self.cast(field, value)? } })
            }
            (Operator::Lte, Operand::Scalar(value)) => {
                Ok(doc! { field: { "$lte": self.cast(field, value)? } })
            }
            (Operator::Gt, Operand::Scalar(value)) => {
                Ok(doc! { field: { "$gt": self.cast(field, value)? } })
            }
            (Operator::Gte, Operand::Scalar(value)) => {
                Ok(doc! { field: { "$gte": self.cast(field, value)? } })
            }
            (Operator::Like { negated, case_insensitive }, Operand::Scalar(value)) => {
                let pattern = match value {
                    Bson::String(pattern) => pattern.clone(),
                    other => other.to_string(),
                };
                let mut condition = doc! { "$regex": like_to_regex(&pattern) };
                if *case_insensitive {
                    condition.insert("$options", "i");
                }
                Ok(negate(field, Bson::Document(condition), *negated))
            }
            (Operator::Regex { negated, case_insensitive }, Operand::Scalar(value)) => {
                let condition = regex_condition(&predicate.operator, value, *case_insensitive)?;
                Ok(negate(field, condition, *negated))
            }
            (Operator::In, Operand::Sequence(values)) => {
                Ok(doc! { field: { "$in": self.cast_all(field, values)? } })
            }
            (Operator::NotIn, Operand::Sequence(values)) => {
                Ok(doc! { field: { "$nin": self.cast_all(field, values)? } })
            }
            (Operator::All, Operand::Sequence(values)) => {
                Ok(doc! { field: { "$all": self.cast_all(field, values)? } })
            }
            (Operator::Between, Operand::Pair(low, high)) => Ok(doc! {
                field: { "$gte": self.cast(field, low)?, "$lte": self.cast(field, high)? }
            }),
            (Operator::NotBetween, Operand::Pair(low, high)) => Ok(doc! {
                "$or": [
                    { field: { "$lt": self.cast(field, low)? } },
                    { field: { "$gt": self.cast(field, high)? } },
                ]
            }),
            (Operator::Exists, Operand::Scalar(value)) => {
                Ok(doc! { field: { "$exists": value.clone() } })
            }
            (Operator::Type, Operand::Scalar(value)) => Ok(doc! { field: { "$type": value.clone() } }),
            (Operator::Mod, Operand::Pair(divisor, remainder)) => {
                Ok(doc! { field: { "$mod": [divisor.clone(), remainder.clone()] } })
            }
            (Operator::Size, Operand::Scalar(value)) => Ok(doc! { field: { "$size": value.clone() } }),
            (Operator::ElemMatch, Operand::SubFilter(filter)) => {
                Ok(doc! { field: { "$elemMatch": filter.clone() } })
            }
            (Operator::Column, _) => Err(DocumentStoreError::unsupported("where_column")),
            (Operator::FullText, _) => Err(DocumentStoreError::unsupported("where_fulltext")),
            (Operator::Unknown(name), _) => {
                Err(DocumentStoreError::unsupported(format!("operator {name:?}")))
            }
            (operator, operand) => Err(DocumentStoreError::invalid_operand(
                operator.name(),
                format!("unexpected operand {operand:?}"),
            )),
        }
    }
}

fn negate(field: &str, condition: Bson, negated: bool) -> Document {
    if negated {
        doc! { field: { "$not": condition } }
    } else {
        doc! { field: condition }
    }
}

const REGEX_META: &str = r"\.+*?()|[]{}^$#&-~/";

fn push_escaped(regex: &mut String, c: char) {
    if REGEX_META.contains(c) {
        regex.push('\\');
    }
    regex.push(c);
}

/// Converts a SQL `LIKE` pattern into a regular expression.
///
/// `%` matches any run of characters and `_` a single one; `\%` and `\_` are literals.
/// Everything else is escaped. The result is anchored at each end that does not
/// start or finish with `%`.
pub fn like_to_regex(pattern: &str) -> String {
    let mut regex = String::with_capacity(pattern.len() + 2);
    let mut chars = pattern.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\\' if matches!(chars.peek(), Some('%' | '_')) => {
                if let Some(literal) = chars.next() {
                    regex.push(literal);
                }
            }
            '%' => regex.push_str(".*"),
            '_' => regex.push('.'),
            other => push_escaped(&mut regex, other),
        }
    }

    let open_start = pattern.starts_with('%');
    let open_end = pattern.ends_with('%') && !pattern.ends_with("\\%");

    match (open_start, open_end) {
        (true, true) => regex,
        (true, false) => format!("{regex}$"),
        (false, true) => format!("^{regex}"),
        (false, false) => format!("^{regex}$"),
    }
}

/// Splits a `/pattern/flags` literal. Anything else is a bare pattern.
fn split_delimited(text: &str) -> (&str, &str) {
    if text.len() >= 2 && text.starts_with('/') {
        if let Some(end) = text.rfind('/').filter(|end| *end > 0) {
            return (&text[1..end], &text[end + 1..]);
        }
    }
    (text, "")
}

fn regex_condition(operator: &Operator, value: &Bson, case_insensitive: bool) -> DocumentStoreResult<Bson> {
    match value {
        Bson::RegularExpression(_) => Ok(value.clone()),
        Bson::String(text) => {
            let (pattern, flags) = split_delimited(text);
            let mut options = flags.to_string();
            if case_insensitive && !options.contains('i') {
                options.push('i');
            }

            let mut condition = doc! { "$regex": pattern };
            if !options.is_empty() {
                condition.insert("$options", options);
            }
            Ok(Bson::Document(condition))
        }
        other => Err(DocumentStoreError::invalid_operand(
            operator.name(),
            format!("expected a regular expression, got {other}"),
        )),
    }
}
