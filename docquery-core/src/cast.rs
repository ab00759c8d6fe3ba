//! Attribute casts between stored encodings and application values.
//!
//! Every cast is one of a fixed set of [`CastKind`]s sharing the [`AttributeCast`]
//! capability. A [`CastRegistry`] attaches at most one cast to each field of a model
//! and knows the model's primary key, which decides whether stored identifiers are
//! rendered as strings on the way out.
//!
//! `Null` is never cast in either direction.

use std::{any::type_name, fmt::Debug, sync::Arc};
use bson::{Binary, Bson, DateTime, Document, oid::ObjectId, spec::BinarySubtype};
use chrono::{DateTime as ChronoDateTime, FixedOffset, NaiveDate, NaiveDateTime, TimeZone, Utc};
use uuid::Uuid;

use crate::{
    error::{DocumentStoreError, DocumentStoreResult},
    path::AttributePath,
};

const NAIVE_DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
];

/// Declared type of a model's primary key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyType {
    /// Keys are exposed as strings; stored ObjectIds are rendered as hex.
    #[default]
    String,
    /// Keys are integers.
    Int,
    /// Keys are exposed as native ObjectIds.
    ObjectId,
}

/// What a cast knows about the attribute it is converting.
#[derive(Debug, Clone, Copy)]
pub struct CastContext<'a> {
    pub model: &'a str,
    pub field: &'a str,
    pub key_name: &'a str,
    pub key_type: KeyType,
}

impl CastContext<'_> {
    /// Whether the attribute being cast is the model's primary key.
    pub fn is_key(&self) -> bool {
        self.field == self.key_name
    }

    /// `Model[field]`, used in error messages.
    pub fn qualified(&self) -> String {
        format!("{}[{}]", self.model, self.field)
    }

    fn invalid(&self, message: impl Into<String>) -> DocumentStoreError {
        DocumentStoreError::InvalidCast {
            field: self.qualified(),
            message: message.into(),
        }
    }
}

/// A two-way conversion between an attribute's storage encoding and its application value.
pub trait AttributeCast: Debug + Send + Sync {
    /// Converts an application value into the encoding the store keeps.
    fn to_storage(&self, context: &CastContext<'_>, value: Bson) -> DocumentStoreResult<Bson>;

    /// Converts a stored value back. Unrecognized input passes through unchanged.
    fn from_storage(&self, context: &CastContext<'_>, value: Bson) -> DocumentStoreResult<Bson>;

    /// Whether filter operands on this attribute are converted before being sent.
    fn applies_to_queries(&self) -> bool {
        true
    }
}

pub(crate) fn short_type_name<T: ?Sized>() -> &'static str {
    type_name::<T>().rsplit("::").next().unwrap_or("model")
}

fn type_label(value: &Bson) -> String {
    format!("{:?}", value.element_type())
}

fn as_number(value: &Bson) -> Option<f64> {
    match value {
        Bson::Int32(value) => Some(f64::from(*value)),
        Bson::Int64(value) => Some(*value as f64),
        Bson::Double(value) => Some(*value),
        _ => None,
    }
}

fn same_scalar(left: &Bson, right: &Bson) -> bool {
    match (as_number(left), as_number(right)) {
        (Some(left), Some(right)) => left == right,
        _ => left == right,
    }
}

/// ObjectId primary keys and references.
#[derive(Debug, Clone, Copy, Default)]
pub struct ObjectIdCast;

impl AttributeCast for ObjectIdCast {
    fn to_storage(&self, context: &CastContext<'_>, value: Bson) -> DocumentStoreResult<Bson> {
        match value {
            Bson::ObjectId(_) => Ok(value),
            Bson::String(text) => ObjectId::parse_str(&text)
                .map(Bson::ObjectId)
                .map_err(|_| DocumentStoreError::InvalidIdentifier {
                    field: context.qualified(),
                    value: text,
                }),
            other => Err(context.invalid(format!(
                "\"string\" or ObjectId expected, got {}",
                type_label(&other)
            ))),
        }
    }

    fn from_storage(&self, context: &CastContext<'_>, value: Bson) -> DocumentStoreResult<Bson> {
        match value {
            Bson::ObjectId(id) if context.is_key() && context.key_type == KeyType::String => {
                Ok(Bson::String(id.to_hex()))
            }
            other => Ok(other),
        }
    }
}

/// Default handling of a model's primary key: 24-hex strings are stored as ObjectIds,
/// any other key value is stored as given. Reads behave like [`ObjectIdCast`].
#[derive(Debug, Clone, Copy, Default)]
pub struct PrimaryKeyCast;

impl AttributeCast for PrimaryKeyCast {
    fn to_storage(&self, _context: &CastContext<'_>, value: Bson) -> DocumentStoreResult<Bson> {
        match value {
            Bson::String(ref text) if text.len() == 24 => Ok(ObjectId::parse_str(text)
                .map(Bson::ObjectId)
                .unwrap_or(value)),
            other => Ok(other),
        }
    }

    fn from_storage(&self, context: &CastContext<'_>, value: Bson) -> DocumentStoreResult<Bson> {
        ObjectIdCast.from_storage(context, value)
    }
}

/// Integer attributes, typically integer primary keys.
#[derive(Debug, Clone, Copy, Default)]
pub struct IntegerCast;

impl AttributeCast for IntegerCast {
    fn to_storage(&self, context: &CastContext<'_>, value: Bson) -> DocumentStoreResult<Bson> {
        match value {
            Bson::Int32(_) | Bson::Int64(_) => Ok(value),
            Bson::Double(number) if number.is_finite() && number.fract() == 0.0 => {
                Ok(Bson::Int64(number as i64))
            }
            Bson::String(ref text) => text
                .trim()
                .parse::<i64>()
                .map(Bson::Int64)
                .map_err(|_| context.invalid(format!("integer expected, got {text:?}"))),
            other => Err(context.invalid(format!("integer expected, got {}", type_label(&other)))),
        }
    }

    fn from_storage(&self, _context: &CastContext<'_>, value: Bson) -> DocumentStoreResult<Bson> {
        Ok(value)
    }
}

/// Date/time attributes stored as millisecond UTC timestamps.
#[derive(Debug, Clone, Copy, Default)]
pub struct DateCast;

impl DateCast {
    /// Interprets a value as an instant: native timestamps, epoch seconds, RFC 3339
    /// strings and `Y-m-d[ H:M[:S[.f]]]` strings (read as UTC).
    pub fn parse(value: &Bson) -> Option<ChronoDateTime<Utc>> {
        match value {
            Bson::DateTime(value) => ChronoDateTime::<Utc>::from_timestamp_millis(value.timestamp_millis()),
            Bson::Int32(seconds) => ChronoDateTime::<Utc>::from_timestamp(i64::from(*seconds), 0),
            Bson::Int64(seconds) => ChronoDateTime::<Utc>::from_timestamp(*seconds, 0),
            Bson::Double(seconds) if seconds.is_finite() => {
                ChronoDateTime::<Utc>::from_timestamp_millis((seconds * 1000.0).floor() as i64)
            }
            Bson::String(text) => parse_date_text(text.trim()),
            _ => None,
        }
    }

    /// The storage encoding of a chrono date/time.
    pub fn from_chrono<Tz: TimeZone>(value: &ChronoDateTime<Tz>) -> Bson {
        Bson::DateTime(DateTime::from_millis(value.timestamp_millis()))
    }

    /// Drops everything below the millisecond.
    pub fn truncate_to_millis(value: ChronoDateTime<Utc>) -> ChronoDateTime<Utc> {
        ChronoDateTime::<Utc>::from_timestamp_millis(value.timestamp_millis()).unwrap_or(value)
    }

    /// Whether two values denote the same millisecond. Values that are not dates
    /// compare structurally.
    pub fn same_instant(left: &Bson, right: &Bson) -> bool {
        match (Self::parse(left), Self::parse(right)) {
            (Some(left), Some(right)) => {
                Self::truncate_to_millis(left) == Self::truncate_to_millis(right)
            }
            _ => left == right,
        }
    }
}

fn parse_date_text(text: &str) -> Option<ChronoDateTime<Utc>> {
    if let Ok(parsed) = ChronoDateTime::<FixedOffset>::parse_from_rfc3339(text) {
        return Some(parsed.with_timezone(&Utc));
    }

    if let Ok(parsed) = ChronoDateTime::<FixedOffset>::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f%:z") {
        return Some(parsed.with_timezone(&Utc));
    }

    for format in NAIVE_DATETIME_FORMATS {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(text, format) {
            return Some(parsed.and_utc());
        }
    }

    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|date| date.and_utc())
}

impl AttributeCast for DateCast {
    fn to_storage(&self, context: &CastContext<'_>, value: Bson) -> DocumentStoreResult<Bson> {
        match Self::parse(&value) {
            Some(instant) => Ok(Self::from_chrono(&instant)),
            None => Err(context.invalid(format!("date/time expected, got {value}"))),
        }
    }

    fn from_storage(&self, _context: &CastContext<'_>, value: Bson) -> DocumentStoreResult<Bson> {
        match value {
            Bson::String(ref text) => Ok(parse_date_text(text.trim())
                .map(|instant| Self::from_chrono(&instant))
                .unwrap_or(value)),
            other => Ok(other),
        }
    }
}

/// UUIDs stored as binary subtype 4.
///
/// Filter operands are left alone: matching a stored UUID requires the binary form.
#[derive(Debug, Clone, Copy, Default)]
pub struct BinaryUuidCast;

impl BinaryUuidCast {
    /// The binary encoding of a UUID.
    pub fn binary(uuid: &Uuid) -> Bson {
        Bson::Binary(Binary {
            subtype: BinarySubtype::Uuid,
            bytes: uuid.as_bytes().to_vec(),
        })
    }
}

impl AttributeCast for BinaryUuidCast {
    fn to_storage(&self, context: &CastContext<'_>, value: Bson) -> DocumentStoreResult<Bson> {
        match value {
            Bson::Binary(ref binary) if binary.subtype == BinarySubtype::Uuid => Ok(value),
            Bson::String(ref text) => Uuid::parse_str(text)
                .map(|uuid| Self::binary(&uuid))
                .map_err(|_| context.invalid(format!("UUID string expected, got {text:?}"))),
            other => Err(context.invalid(format!(
                "UUID string or binary expected, got {}",
                type_label(&other)
            ))),
        }
    }

    fn from_storage(&self, _context: &CastContext<'_>, value: Bson) -> DocumentStoreResult<Bson> {
        match value {
            Bson::Binary(ref binary) if binary.subtype == BinarySubtype::Uuid => {
                Ok(Uuid::from_slice(&binary.bytes)
                    .map(|uuid| Bson::String(uuid.to_string()))
                    .unwrap_or(value))
            }
            other => Ok(other),
        }
    }

    fn applies_to_queries(&self) -> bool {
        false
    }
}

/// A Rust enum whose members are stored as scalar backing values.
///
/// `name` must match the member's serde representation so models deserialize.
pub trait BackedEnum: Sized + 'static {
    fn cases() -> &'static [Self];
    fn name(&self) -> &'static str;
    fn backing(&self) -> Bson;
}

/// Enum attributes: member names in the application, backing scalars in the store.
#[derive(Debug, Clone, PartialEq)]
pub struct EnumCast {
    name: String,
    cases: Vec<(String, Bson)>,
}

impl EnumCast {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            cases: Vec::new(),
        }
    }

    /// Adds a member and its backing scalar.
    pub fn case(mut self, name: impl Into<String>, backing: impl Into<Bson>) -> Self {
        self.cases.push((name.into(), backing.into()));
        self
    }

    /// Builds the cast from a [`BackedEnum`].
    pub fn of<E: BackedEnum>() -> Self {
        Self {
            name: short_type_name::<E>().to_string(),
            cases: E::cases()
                .iter()
                .map(|case| (case.name().to_string(), case.backing()))
                .collect(),
        }
    }
}

impl AttributeCast for EnumCast {
    fn to_storage(&self, context: &CastContext<'_>, value: Bson) -> DocumentStoreResult<Bson> {
        if let Bson::String(text) = &value {
            if let Some((_, backing)) = self.cases.iter().find(|(name, _)| name == text) {
                return Ok(backing.clone());
            }
        }

        if self.cases.iter().any(|(_, backing)| same_scalar(backing, &value)) {
            return Ok(value);
        }

        Err(context.invalid(format!("{value} is not a member of {}", self.name)))
    }

    fn from_storage(&self, _context: &CastContext<'_>, value: Bson) -> DocumentStoreResult<Bson> {
        self.cases
            .iter()
            .find(|(_, backing)| same_scalar(backing, &value))
            .map(|(name, _)| Bson::String(name.clone()))
            .ok_or_else(|| DocumentStoreError::UnknownEnumValue {
                field: self.name.clone(),
                value: value.to_string(),
            })
    }
}

/// The statically known cast kinds. [`CastKind::Custom`] wraps any other
/// [`AttributeCast`].
#[derive(Debug, Clone)]
pub enum CastKind {
    ObjectId,
    PrimaryKey,
    Integer,
    Date,
    BinaryUuid,
    Enum(EnumCast),
    Custom(Arc<dyn AttributeCast>),
}

impl CastKind {
    pub fn custom(cast: impl AttributeCast + 'static) -> Self {
        CastKind::Custom(Arc::new(cast))
    }

    fn as_cast(&self) -> &dyn AttributeCast {
        match self {
            CastKind::ObjectId => &ObjectIdCast,
            CastKind::PrimaryKey => &PrimaryKeyCast,
            CastKind::Integer => &IntegerCast,
            CastKind::Date => &DateCast,
            CastKind::BinaryUuid => &BinaryUuidCast,
            CastKind::Enum(cast) => cast,
            CastKind::Custom(cast) => cast.as_ref(),
        }
    }
}

impl AttributeCast for CastKind {
    fn to_storage(&self, context: &CastContext<'_>, value: Bson) -> DocumentStoreResult<Bson> {
        self.as_cast().to_storage(context, value)
    }

    fn from_storage(&self, context: &CastContext<'_>, value: Bson) -> DocumentStoreResult<Bson> {
        self.as_cast().from_storage(context, value)
    }

    fn applies_to_queries(&self) -> bool {
        self.as_cast().applies_to_queries()
    }
}

/// A cast attached to one (possibly dotted) attribute.
#[derive(Debug, Clone)]
pub struct CastDirective {
    field: String,
    path: AttributePath,
    kind: CastKind,
}

impl CastDirective {
    pub fn field(&self) -> &str {
        &self.field
    }

    pub fn path(&self) -> &AttributePath {
        &self.path
    }

    pub fn kind(&self) -> &CastKind {
        &self.kind
    }
}

/// Per-model set of cast directives plus the primary key declaration.
///
/// # Example
///
/// ```ignore
/// let casts = CastRegistry::new("User")
///     .with_cast("birthday", CastKind::Date)
///     .with_cast("entry.date", CastKind::Date)
///     .with_cast("member_status", CastKind::Enum(EnumCast::of::<MemberStatus>()));
/// ```
#[derive(Debug, Clone)]
pub struct CastRegistry {
    model: String,
    key_name: String,
    key_type: KeyType,
    directives: Vec<CastDirective>,
}

impl CastRegistry {
    /// Creates an empty registry keyed on `_id` with string keys.
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            key_name: "_id".to_string(),
            key_type: KeyType::String,
            directives: Vec::new(),
        }
    }

    /// Declares the primary key.
    pub fn with_key(mut self, name: impl Into<String>, key_type: KeyType) -> Self {
        self.key_name = name.into();
        self.key_type = key_type;
        self
    }

    /// Attaches a cast to `field`, replacing any cast already attached to it.
    pub fn with_cast(mut self, field: impl Into<String>, kind: CastKind) -> Self {
        let field = field.into();
        let directive = CastDirective {
            path: AttributePath::parse(&field),
            field,
            kind,
        };

        match self.directives.iter_mut().find(|existing| existing.field == directive.field) {
            Some(existing) => *existing = directive,
            None => self.directives.push(directive),
        }

        self
    }

    /// Removes the cast attached to `field`, if any.
    pub fn without_cast(mut self, field: &str) -> Self {
        self.directives.retain(|directive| directive.field != field);
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn key_name(&self) -> &str {
        &self.key_name
    }

    pub fn key_type(&self) -> KeyType {
        self.key_type
    }

    pub fn directives(&self) -> &[CastDirective] {
        &self.directives
    }

    pub fn directive(&self, field: &str) -> Option<&CastDirective> {
        self.directives.iter().find(|directive| directive.field == field)
    }

    fn context<'a>(&'a self, field: &'a str) -> CastContext<'a> {
        CastContext {
            model: &self.model,
            field,
            key_name: &self.key_name,
            key_type: self.key_type,
        }
    }

    /// Converts a value for `field` into its storage encoding.
    pub fn to_storage(&self, field: &str, value: Bson) -> DocumentStoreResult<Bson> {
        match (self.directive(field), value) {
            (_, Bson::Null) => Ok(Bson::Null),
            (Some(directive), value) => directive.kind.to_storage(&self.context(field), value),
            (None, value) => Ok(value),
        }
    }

    /// Converts a stored value of `field` back into its application value.
    pub fn from_storage(&self, field: &str, value: Bson) -> DocumentStoreResult<Bson> {
        match (self.directive(field), value) {
            (_, Bson::Null) => Ok(Bson::Null),
            (Some(directive), value) => directive.kind.from_storage(&self.context(field), value),
            (None, value) => Ok(value),
        }
    }

    /// Converts a filter operand for `field`. Casts that opt out of query conversion
    /// leave the operand untouched.
    pub fn to_query_value(&self, field: &str, value: Bson) -> DocumentStoreResult<Bson> {
        match self.directive(field) {
            Some(directive) if directive.kind.applies_to_queries() => self.to_storage(field, value),
            _ => Ok(value),
        }
    }

    /// Applies every directive to a document on its way into the store.
    pub fn document_to_storage(&self, mut document: Document) -> DocumentStoreResult<Document> {
        for directive in &self.directives {
            if let Some(value) = directive.path.get(&document).cloned() {
                let value = self.to_storage(&directive.field, value)?;
                directive.path.set(&mut document, value)?;
            }
        }

        Ok(document)
    }

    /// Applies every directive to a document read from the store.
    pub fn document_from_storage(&self, mut document: Document) -> DocumentStoreResult<Document> {
        for directive in &self.directives {
            if let Some(value) = directive.path.get(&document).cloned() {
                let value = self.from_storage(&directive.field, value)?;
                directive.path.set(&mut document, value)?;
            }
        }

        Ok(document)
    }

    /// Change-tracking equality: date attributes compare at millisecond precision,
    /// everything else structurally.
    pub fn is_equivalent(&self, field: &str, left: &Bson, right: &Bson) -> bool {
        match self.directive(field).map(CastDirective::kind) {
            Some(CastKind::Date) => DateCast::same_instant(left, right),
            _ => left == right,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[derive(Debug, Clone, Copy, PartialEq)]
    enum MemberStatus {
        Member,
        Guest,
    }

    impl BackedEnum for MemberStatus {
        fn cases() -> &'static [Self] {
            &[MemberStatus::Member, MemberStatus::Guest]
        }

        fn name(&self) -> &'static str {
            match self {
                MemberStatus::Member => "Member",
                MemberStatus::Guest => "Guest",
            }
        }

        fn backing(&self) -> Bson {
            match self {
                MemberStatus::Member => Bson::from("MEMBER"),
                MemberStatus::Guest => Bson::from("GUEST"),
            }
        }
    }

    fn users() -> CastRegistry {
        CastRegistry::new("User")
            .with_cast("_id", CastKind::ObjectId)
            .with_cast("friend_id", CastKind::ObjectId)
            .with_cast("birthday", CastKind::Date)
            .with_cast("entry.date", CastKind::Date)
            .with_cast("uuid", CastKind::BinaryUuid)
            .with_cast("member_status", CastKind::Enum(EnumCast::of::<MemberStatus>()))
    }

    const HEX: &str = "65a1b2c3d4e5f60718293a4b";

    #[test]
    fn identifier_round_trips_for_string_keys() {
        let registry = users();

        let stored = registry.to_storage("_id", Bson::from(HEX)).unwrap();
        assert!(matches!(stored, Bson::ObjectId(_)));
        assert_eq!(registry.from_storage("_id", stored).unwrap(), Bson::from(HEX));
    }

    #[test]
    fn identifier_stays_native_for_object_id_keys_and_non_key_fields() {
        let registry = users().with_key("_id", KeyType::ObjectId);
        let id = ObjectId::parse_str(HEX).unwrap();

        assert_eq!(registry.from_storage("_id", Bson::ObjectId(id)).unwrap(), Bson::ObjectId(id));
        assert_eq!(users().from_storage("friend_id", Bson::ObjectId(id)).unwrap(), Bson::ObjectId(id));
    }

    #[test]
    fn primary_key_only_converts_canonical_strings() {
        let registry = CastRegistry::new("Item").with_cast("_id", CastKind::PrimaryKey);

        assert!(matches!(registry.to_storage("_id", Bson::from(HEX)).unwrap(), Bson::ObjectId(_)));
        assert_eq!(registry.to_storage("_id", Bson::from("knife")).unwrap(), Bson::from("knife"));
        assert_eq!(registry.to_storage("_id", Bson::Int32(3)).unwrap(), Bson::Int32(3));
    }

    #[test]
    fn identifier_rejects_malformed_and_mistyped_input() {
        let registry = users();

        assert_eq!(
            registry.to_storage("_id", Bson::from("not-an-id")).unwrap_err(),
            DocumentStoreError::InvalidIdentifier {
                field: "User[_id]".to_string(),
                value: "not-an-id".to_string(),
            }
        );
        assert!(matches!(
            registry.to_storage("_id", Bson::Int32(12)).unwrap_err(),
            DocumentStoreError::InvalidCast { .. }
        ));
    }

    #[test]
    fn date_accepts_formats_and_epochs() {
        let registry = users();
        let expected = Bson::DateTime(DateTime::from_millis(1_704_067_200_000));

        for input in [
            Bson::from("2024-01-01"),
            Bson::from("2024-01-01 00:00:00"),
            Bson::from("2024-01-01T00:00:00Z"),
            Bson::from("2024-01-01T01:00:00+01:00"),
            Bson::Int64(1_704_067_200),
            expected.clone(),
        ] {
            assert_eq!(registry.to_storage("birthday", input).unwrap(), expected);
        }

        assert!(registry.to_storage("birthday", Bson::from("yesterday")).is_err());
    }

    #[test]
    fn date_truncates_below_the_millisecond() {
        let registry = users();

        let left = registry.to_storage("birthday", Bson::from("2024-05-01 10:00:00.1231")).unwrap();
        let right = registry.to_storage("birthday", Bson::from("2024-05-01 10:00:00.1239")).unwrap();

        assert_eq!(left, right);
        assert!(registry.is_equivalent(
            "birthday",
            &Bson::from("2024-05-01 10:00:00.1231"),
            &Bson::from("2024-05-01T10:00:00.123Z"),
        ));
        assert!(!registry.is_equivalent("name", &Bson::from("a"), &Bson::from("b")));
    }

    #[test]
    fn binary_uuid_converts_strings_but_not_query_operands() {
        let registry = users();
        let text = "0c103357-3806-48c9-a84b-867dcb625cfb";

        let stored = registry.to_storage("uuid", Bson::from(text)).unwrap();
        let Bson::Binary(binary) = &stored else {
            panic!("expected binary, got {stored:?}");
        };
        assert_eq!(binary.subtype, BinarySubtype::Uuid);
        assert_eq!(registry.to_storage("uuid", stored.clone()).unwrap(), stored);
        assert_eq!(registry.from_storage("uuid", stored).unwrap(), Bson::from(text));
        assert_eq!(registry.to_query_value("uuid", Bson::from(text)).unwrap(), Bson::from(text));
    }

    #[test]
    fn enum_reduces_members_and_resolves_backing_values() {
        let registry = users();

        assert_eq!(
            registry.to_storage("member_status", Bson::from("Member")).unwrap(),
            Bson::from("MEMBER")
        );
        assert_eq!(
            registry.from_storage("member_status", Bson::from("GUEST")).unwrap(),
            Bson::from("Guest")
        );
        assert_eq!(
            registry.from_storage("member_status", Bson::from("ADMIN")).unwrap_err(),
            DocumentStoreError::UnknownEnumValue {
                field: "MemberStatus".to_string(),
                value: "\"ADMIN\"".to_string(),
            }
        );
    }

    #[test]
    fn dotted_directives_apply_inside_embedded_documents() {
        let registry = users();
        let stored = registry
            .document_to_storage(doc! { "name": "John", "entry": { "date": "2024-01-01" } })
            .unwrap();

        assert_eq!(
            stored,
            doc! { "name": "John", "entry": { "date": DateTime::from_millis(1_704_067_200_000) } }
        );
    }

    #[test]
    fn null_is_never_cast_and_directives_replace() {
        let registry = users().with_cast("_id", CastKind::Integer);

        assert_eq!(registry.to_storage("_id", Bson::Null).unwrap(), Bson::Null);
        assert_eq!(registry.to_storage("_id", Bson::from("42")).unwrap(), Bson::Int64(42));
        assert_eq!(registry.directives().iter().filter(|d| d.field() == "_id").count(), 1);
    }

    #[derive(Debug)]
    struct Uppercase;

    impl AttributeCast for Uppercase {
        fn to_storage(&self, _context: &CastContext<'_>, value: Bson) -> DocumentStoreResult<Bson> {
            Ok(match value {
                Bson::String(text) => Bson::String(text.to_uppercase()),
                other => other,
            })
        }

        fn from_storage(&self, _context: &CastContext<'_>, value: Bson) -> DocumentStoreResult<Bson> {
            Ok(match value {
                Bson::String(text) => Bson::String(text.to_lowercase()),
                other => other,
            })
        }
    }

    #[test]
    fn custom_casts_use_the_same_capability() {
        let registry = CastRegistry::new("Tag").with_cast("code", CastKind::custom(Uppercase));

        assert_eq!(registry.to_storage("code", Bson::from("abc")).unwrap(), Bson::from("ABC"));
        assert_eq!(registry.from_storage("code", Bson::from("ABC")).unwrap(), Bson::from("abc"));
    }
}
