use crate::{
    context::ParsingContext,
    error::Error,
    types::{FromValue, Value},
};
use byteordered::Endianness;
use derive_more::Display;
use internment::Intern;
use itertools::Itertools;
use std::{fmt, sync::Arc};

/// Byte order of multi-byte fields.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Display)]
pub enum ByteOrder {
    #[display("big-endian")]
    BigEndian,
    #[display("little-endian")]
    LittleEndian,
}

impl From<ByteOrder> for Endianness {
    fn from(value: ByteOrder) -> Self {
        match value {
            ByteOrder::BigEndian => Endianness::Big,
            ByteOrder::LittleEndian => Endianness::Little,
        }
    }
}

/// Closure form of a dynamic field attribute.
pub type DynamicFn<T> = dyn Fn(&ParsingContext<'_>) -> Result<T, Error> + Send + Sync;

/// A field attribute that is either a literal, a reference to a sibling
/// field by name, or a computation over the parsing context.
#[derive(Clone)]
pub enum Dynamic<T> {
    Literal(T),
    Field(String),
    With(Arc<DynamicFn<T>>),
}

impl<T> Dynamic<T> {
    pub fn literal(value: T) -> Self {
        Self::Literal(value)
    }

    pub fn field(name: impl Into<String>) -> Self {
        Self::Field(name.into())
    }

    pub fn with<F>(f: F) -> Self
    where
        F: Fn(&ParsingContext<'_>) -> Result<T, Error> + Send + Sync + 'static,
    {
        Self::With(Arc::new(f))
    }

    /// The sibling name this attribute references, if any.
    pub fn field_ref(&self) -> Option<&str> {
        match self {
            Self::Field(name) => Some(name),
            _ => None,
        }
    }
}

impl<T: FromValue + Clone> Dynamic<T> {
    /// Resolve against the context: literals are returned as-is, names are
    /// looked up as sibling fields, closures are invoked.
    pub fn resolve(&self, ctx: &ParsingContext<'_>) -> Result<T, Error> {
        match self {
            Self::Literal(v) => Ok(v.clone()),
            Self::Field(name) => T::from_value(ctx.get(name)?),
            Self::With(f) => f(ctx),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Dynamic<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal(v) => f.debug_tuple("Literal").field(v).finish(),
            Self::Field(name) => f.debug_tuple("Field").field(name).finish(),
            Self::With(_) => f.write_str("With(..)"),
        }
    }
}

/// Closure form of a write override.
pub type OverrideFn = dyn Fn(&ParsingContext<'_>, Value) -> Result<Value, Error> + Send + Sync;

/// Hook that replaces a field's value just before it is written.
#[derive(Clone, Default)]
pub enum Override {
    /// Keep the resolved value.
    #[default]
    None,
    /// User-provided hook, given the context and the current value.
    With(Arc<OverrideFn>),
    /// Installed by the schema rewrite: the encoded byte length of the
    /// named sibling.
    LengthOf(String),
    /// Installed by the schema rewrite: the element count of the named
    /// sibling.
    CountOf(String),
}

impl Override {
    pub fn is_none(&self) -> bool {
        matches!(self, Override::None)
    }
}

impl fmt::Debug for Override {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::With(_) => f.write_str("With(..)"),
            Self::LengthOf(name) => f.debug_tuple("LengthOf").field(name).finish(),
            Self::CountOf(name) => f.debug_tuple("CountOf").field(name).finish(),
        }
    }
}

/// Text encoding of a string field.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Default, Display)]
pub enum TextEncoding {
    #[default]
    #[display("utf-8")]
    Utf8,
    #[display("ascii")]
    Ascii,
    #[display("latin-1")]
    Latin1,
    #[display("utf-16le")]
    Utf16Le,
    #[display("utf-16be")]
    Utf16Be,
}

/// How text encode/decode failures are handled.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Default)]
pub enum EncodingErrors {
    /// Fail with an encoding error.
    #[default]
    Strict,
    /// Substitute the replacement character (decode) or `?` (encode).
    Replace,
    /// Drop unrepresentable units.
    Ignore,
}

/// Fixed-format scalar tokens, using the usual C struct widths.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Display)]
pub enum Format {
    /// A single byte, passed through as a one-byte bytes value.
    #[display("char")]
    Char,
    #[display("signed byte")]
    SignedByte,
    #[display("unsigned byte")]
    UnsignedByte,
    #[display("bool")]
    Bool,
    #[display("short")]
    Short,
    #[display("unsigned short")]
    UnsignedShort,
    #[display("int")]
    Int,
    #[display("unsigned int")]
    UnsignedInt,
    #[display("long")]
    Long,
    #[display("unsigned long")]
    UnsignedLong,
    #[display("long long")]
    LongLong,
    #[display("unsigned long long")]
    UnsignedLongLong,
    #[display("native size")]
    NativeSize,
    #[display("unsigned native size")]
    UnsignedNativeSize,
    #[display("half float")]
    HalfFloat,
    #[display("float")]
    Float,
    #[display("double")]
    Double,
}

impl Format {
    /// Encoded width in bytes.
    pub fn width(&self) -> usize {
        match self {
            Self::Char | Self::SignedByte | Self::UnsignedByte | Self::Bool => 1,
            Self::Short | Self::UnsignedShort | Self::HalfFloat => 2,
            Self::Int | Self::UnsignedInt | Self::Long | Self::UnsignedLong | Self::Float => 4,
            Self::LongLong | Self::UnsignedLongLong | Self::Double => 8,
            Self::NativeSize | Self::UnsignedNativeSize => std::mem::size_of::<usize>(),
        }
    }
}

/// A fixed byte sequence required at its position in the stream.
///
/// Parsing anything else fails; writing emits the sequence regardless of the
/// record value (a supplied value is validated against it). The field's
/// default is the sequence itself.
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct MagicField {
    pub magic: Vec<u8>,
}

impl MagicField {
    pub fn new(magic: impl Into<Vec<u8>>) -> Self {
        Self {
            magic: magic.into(),
        }
    }
}

/// Raw bytes with optional length, terminator, and padding handling.
///
/// One of `length` and `terminator` must be set. With both, exactly `length`
/// bytes are consumed and the terminator is searched within them.
#[derive(Clone, Debug)]
pub struct BytesField {
    /// Byte count to read; negative reads to the end of the stream.
    pub length: Option<Dynamic<i64>>,
    /// Byte sequence ending the value; consumed but not returned.
    pub terminator: Option<Vec<u8>>,
    /// Stride of the terminator scan.
    pub step: usize,
    /// Fill bytes stripped on read and appended on write.
    pub padding: Option<Vec<u8>>,
    /// Fail loudly on boundary violations instead of truncating or padding.
    pub strict: bool,
}

impl Default for BytesField {
    fn default() -> Self {
        Self {
            length: None,
            terminator: None,
            step: 1,
            padding: None,
            strict: true,
        }
    }
}

impl BytesField {
    /// Exactly `length` bytes.
    pub fn sized(length: Dynamic<i64>) -> Self {
        Self {
            length: Some(length),
            ..Self::default()
        }
    }

    /// All bytes up to (and consuming) `terminator`.
    pub fn terminated(terminator: impl Into<Vec<u8>>) -> Self {
        Self {
            terminator: Some(terminator.into()),
            ..Self::default()
        }
    }

    /// All remaining bytes in the stream.
    pub fn to_end() -> Self {
        Self::sized(Dynamic::Literal(-1))
    }

    pub fn length(mut self, length: Dynamic<i64>) -> Self {
        self.length = Some(length);
        self
    }

    pub fn terminator(mut self, terminator: impl Into<Vec<u8>>) -> Self {
        self.terminator = Some(terminator.into());
        self
    }

    pub fn step(mut self, step: usize) -> Self {
        self.step = step;
        self
    }

    pub fn padding(mut self, padding: impl Into<Vec<u8>>) -> Self {
        self.padding = Some(padding.into());
        self
    }

    /// Downgrade boundary violations to truncation or padding.
    pub fn lenient(mut self) -> Self {
        self.strict = false;
        self
    }
}

/// Text over a raw [`BytesField`], decoded and encoded with a named
/// encoding.
#[derive(Clone, Debug, Default)]
pub struct StringField {
    pub bytes: BytesField,
    pub encoding: TextEncoding,
    pub errors: EncodingErrors,
}

impl StringField {
    pub fn new(bytes: BytesField) -> Self {
        Self {
            bytes,
            ..Self::default()
        }
    }

    /// Exactly `length` encoded bytes.
    pub fn sized(length: Dynamic<i64>) -> Self {
        Self::new(BytesField::sized(length))
    }

    /// All bytes up to (and consuming) `terminator`.
    pub fn terminated(terminator: impl Into<Vec<u8>>) -> Self {
        Self::new(BytesField::terminated(terminator))
    }

    pub fn encoding(mut self, encoding: TextEncoding) -> Self {
        self.encoding = encoding;
        self
    }

    pub fn errors(mut self, errors: EncodingErrors) -> Self {
        self.errors = errors;
        self
    }
}

/// Fixed-width unsigned or two's-complement integer.
#[derive(Clone, Debug)]
pub struct IntegerField {
    /// Encoded width in bytes (1..=8).
    pub length: usize,
    /// Falls back to the record's default byte order when unset.
    pub byte_order: Option<ByteOrder>,
    pub signed: bool,
}

impl IntegerField {
    pub fn new(length: usize) -> Self {
        Self {
            length,
            byte_order: None,
            signed: false,
        }
    }

    pub fn byte_order(mut self, byte_order: ByteOrder) -> Self {
        self.byte_order = Some(byte_order);
        self
    }

    pub fn signed(mut self) -> Self {
        self.signed = true;
        self
    }
}

/// Variable-length quantity: 7 payload bits per byte, most significant
/// group first, with the high bit flagging continuation.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Default)]
pub struct VariableLengthQuantityField;

impl VariableLengthQuantityField {
    pub fn new() -> Self {
        Self
    }
}

/// Sub-byte unsigned integer, read MSB-first within each byte.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct BitField {
    /// Width in bits (1..=64).
    pub length: usize,
    /// Skip to the next byte boundary after this field.
    pub realign: bool,
}

impl BitField {
    pub fn new(length: usize) -> Self {
        Self {
            length,
            realign: false,
        }
    }

    pub fn realign(mut self) -> Self {
        self.realign = true;
        self
    }
}

/// Fixed-format scalar, or a small tuple of them when repeated.
#[derive(Clone, Debug)]
pub struct StructField {
    pub format: Format,
    /// Falls back to the record's default byte order when unset.
    pub byte_order: Option<ByteOrder>,
    /// Parse this many scalars back to back, yielding a list value.
    pub repeat: Option<usize>,
}

impl StructField {
    pub fn new(format: Format) -> Self {
        Self {
            format,
            byte_order: None,
            repeat: None,
        }
    }

    pub fn byte_order(mut self, byte_order: ByteOrder) -> Self {
        self.byte_order = Some(byte_order);
        self
    }

    pub fn repeat(mut self, repeat: usize) -> Self {
        self.repeat = Some(repeat);
        self
    }
}

/// A nested record embedded as one field.
#[derive(Clone, Debug)]
pub struct StructureField {
    pub record: Arc<RecordType>,
    /// Byte cap for the nested record; the unread tail of the capped region
    /// is discarded on read and zero-filled on write.
    pub length: Option<Dynamic<i64>>,
    pub strict: bool,
}

impl StructureField {
    pub fn new(record: impl Into<Arc<RecordType>>) -> Self {
        Self {
            record: record.into(),
            length: None,
            strict: true,
        }
    }

    pub fn length(mut self, length: Dynamic<i64>) -> Self {
        self.length = Some(length);
        self
    }

    pub fn lenient(mut self) -> Self {
        self.strict = false;
        self
    }
}

/// Homogeneous sequence of a base field.
#[derive(Clone, Debug)]
pub struct ArrayField {
    pub base: Box<Field>,
    /// Element count; exactly one of `count` and `length` must be set.
    pub count: Option<Dynamic<u64>>,
    /// Byte bound; negative reads elements until the stream ends.
    pub length: Option<Dynamic<i64>>,
    pub strict: bool,
}

impl ArrayField {
    pub fn counted(base: impl Into<Field>, count: Dynamic<u64>) -> Self {
        Self {
            base: Box::new(base.into()),
            count: Some(count),
            length: None,
            strict: true,
        }
    }

    pub fn sized(base: impl Into<Field>, length: Dynamic<i64>) -> Self {
        Self {
            base: Box::new(base.into()),
            count: None,
            length: Some(length),
            strict: true,
        }
    }

    pub fn lenient(mut self) -> Self {
        self.strict = false;
        self
    }
}

/// Wraps a base field that is only present when a condition holds.
#[derive(Clone, Debug)]
pub struct ConditionalField {
    pub base: Box<Field>,
    /// Evaluated for truthiness; note that a non-empty byte string is true,
    /// including a single NUL byte.
    pub condition: Dynamic<Value>,
}

impl ConditionalField {
    pub fn new(base: impl Into<Field>, condition: Dynamic<Value>) -> Self {
        Self {
            base: Box::new(base.into()),
            condition,
        }
    }
}

/// Dispatches to one of several fields keyed on a resolved value.
#[derive(Clone, Debug)]
pub struct SwitchField {
    pub switch: Dynamic<Value>,
    pub cases: Vec<(Value, Field)>,
    pub other: Option<Box<Field>>,
}

impl SwitchField {
    pub fn new(switch: Dynamic<Value>) -> Self {
        Self {
            switch,
            cases: Vec::new(),
            other: None,
        }
    }

    pub fn case(mut self, key: impl Into<Value>, field: impl Into<Field>) -> Self {
        self.cases.push((key.into(), field.into()));
        self
    }

    pub fn other(mut self, field: impl Into<Field>) -> Self {
        self.other = Some(Box::new(field.into()));
        self
    }
}

/// Label/value bindings backing an [`EnumField`].
#[derive(Clone, Debug)]
pub struct Enumeration {
    members: Vec<(Intern<String>, i64)>,
    flags: bool,
    allow_unknown: bool,
}

impl Enumeration {
    pub fn new<I, S>(members: I) -> Self
    where
        I: IntoIterator<Item = (S, i64)>,
        S: Into<String>,
    {
        Self {
            members: Self::intern(members),
            flags: false,
            allow_unknown: false,
        }
    }

    /// Members combine as bit flags; parsed values decompose bitwise.
    pub fn flags<I, S>(members: I) -> Self
    where
        I: IntoIterator<Item = (S, i64)>,
        S: Into<String>,
    {
        Self {
            members: Self::intern(members),
            flags: true,
            allow_unknown: false,
        }
    }

    fn intern<I, S>(members: I) -> Vec<(Intern<String>, i64)>
    where
        I: IntoIterator<Item = (S, i64)>,
        S: Into<String>,
    {
        members
            .into_iter()
            .map(|(label, value)| (Intern::new(label.into()), value))
            .collect()
    }

    /// Pass unknown integers through unlabeled instead of failing.
    pub fn allow_unknown(mut self) -> Self {
        self.allow_unknown = true;
        self
    }

    pub(crate) fn is_flags(&self) -> bool {
        self.flags
    }

    pub(crate) fn allows_unknown(&self) -> bool {
        self.allow_unknown
    }

    pub fn label(&self, value: i64) -> Option<Intern<String>> {
        self.members
            .iter()
            .find_map(|(label, v)| (*v == value).then_some(*label))
    }

    pub fn value(&self, label: &str) -> Option<i64> {
        self.members
            .iter()
            .find_map(|(l, v)| (l.as_str() == label).then_some(*v))
    }

    /// Decompose bits into the labels of all contained members and the
    /// leftover bits matched by none.
    pub(crate) fn decompose(&self, bits: u64) -> (Vec<Intern<String>>, u64) {
        let mut rest = bits;
        let mut labels = Vec::new();
        for (label, value) in &self.members {
            let value = *value as u64;
            if value != 0 && bits & value == value {
                labels.push(*label);
                rest &= !value;
            }
        }
        (labels, rest)
    }
}

/// Integer-backed enumeration over a base field.
#[derive(Clone, Debug)]
pub struct EnumField {
    pub base: Box<Field>,
    pub enumeration: Enumeration,
}

impl EnumField {
    pub fn new(base: impl Into<Field>, enumeration: Enumeration) -> Self {
        Self {
            base: Box::new(base.into()),
            enumeration,
        }
    }
}

/// One declarative codec for one slot in a record.
#[derive(Clone, Debug)]
pub enum Field {
    Magic(MagicField),
    Bytes(BytesField),
    String(StringField),
    Integer(IntegerField),
    Vlq(VariableLengthQuantityField),
    Bits(BitField),
    Struct(StructField),
    Structure(StructureField),
    Array(ArrayField),
    Conditional(ConditionalField),
    Switch(SwitchField),
    Enum(EnumField),
}

impl From<MagicField> for Field {
    fn from(f: MagicField) -> Self {
        Field::Magic(f)
    }
}

impl From<BytesField> for Field {
    fn from(f: BytesField) -> Self {
        Field::Bytes(f)
    }
}

impl From<StringField> for Field {
    fn from(f: StringField) -> Self {
        Field::String(f)
    }
}

impl From<IntegerField> for Field {
    fn from(f: IntegerField) -> Self {
        Field::Integer(f)
    }
}

impl From<VariableLengthQuantityField> for Field {
    fn from(f: VariableLengthQuantityField) -> Self {
        Field::Vlq(f)
    }
}

impl From<BitField> for Field {
    fn from(f: BitField) -> Self {
        Field::Bits(f)
    }
}

impl From<StructField> for Field {
    fn from(f: StructField) -> Self {
        Field::Struct(f)
    }
}

impl From<StructureField> for Field {
    fn from(f: StructureField) -> Self {
        Field::Structure(f)
    }
}

impl From<ArrayField> for Field {
    fn from(f: ArrayField) -> Self {
        Field::Array(f)
    }
}

impl From<ConditionalField> for Field {
    fn from(f: ConditionalField) -> Self {
        Field::Conditional(f)
    }
}

impl From<SwitchField> for Field {
    fn from(f: SwitchField) -> Self {
        Field::Switch(f)
    }
}

impl From<EnumField> for Field {
    fn from(f: EnumField) -> Self {
        Field::Enum(f)
    }
}

/// A field slot within a [`RecordType`]: the codec plus the per-name
/// default and override hooks.
#[derive(Clone, Debug)]
pub struct NamedField {
    pub name: String,
    pub field: Field,
    pub default: Option<Dynamic<Value>>,
    pub override_hook: Override,
}

/// An immutable, ordered record layout. Declaration order is stream order.
#[derive(Clone, Debug)]
pub struct RecordType {
    name: String,
    byte_order: Option<ByteOrder>,
    fields: Vec<NamedField>,
}

impl RecordType {
    /// Start building a record layout.
    pub fn build(name: impl Into<String>) -> RecordTypeBuilder {
        RecordTypeBuilder {
            name: name.into(),
            byte_order: None,
            fields: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn byte_order(&self) -> Option<ByteOrder> {
        self.byte_order
    }

    pub fn fields(&self) -> &[NamedField] {
        &self.fields
    }

    pub(crate) fn field_named(&self, name: &str) -> Option<&NamedField> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// Builder for [`RecordType`]; validates names and wires length/count
/// auto-overrides once, at [`finish`](RecordTypeBuilder::finish).
#[derive(Debug)]
pub struct RecordTypeBuilder {
    name: String,
    byte_order: Option<ByteOrder>,
    fields: Vec<NamedField>,
}

impl RecordTypeBuilder {
    /// Default byte order for fields that do not declare one.
    pub fn byte_order(mut self, byte_order: ByteOrder) -> Self {
        self.byte_order = Some(byte_order);
        self
    }

    /// Append a field.
    pub fn field(mut self, name: impl Into<String>, field: impl Into<Field>) -> Self {
        self.fields.push(NamedField {
            name: name.into(),
            field: field.into(),
            default: None,
            override_hook: Override::None,
        });
        self
    }

    /// Set the default of the most recently added field. Has no effect
    /// before any field is added.
    pub fn default_value(mut self, default: Dynamic<Value>) -> Self {
        if let Some(last) = self.fields.last_mut() {
            last.default = Some(default);
        }
        self
    }

    /// Set the write override of the most recently added field. Has no
    /// effect before any field is added.
    pub fn override_with<F>(mut self, f: F) -> Self
    where
        F: Fn(&ParsingContext<'_>, Value) -> Result<Value, Error> + Send + Sync + 'static,
    {
        if let Some(last) = self.fields.last_mut() {
            last.override_hook = Override::With(Arc::new(f));
        }
        self
    }

    /// Validate and seal the layout.
    ///
    /// Field names must be unique. A field whose length or count references
    /// a sibling by name installs a synthetic override on that sibling so
    /// the referenced value is populated on write; an explicit override on
    /// the sibling takes precedence.
    pub fn finish(self) -> Result<RecordType, Error> {
        let duplicates: Vec<_> = self
            .fields
            .iter()
            .map(|f| f.name.as_str())
            .duplicates()
            .collect();
        if !duplicates.is_empty() {
            return Err(Error::Config(format!(
                "duplicate field name(s) {:?} in record '{}'",
                duplicates, self.name
            )));
        }

        let mut fields = self.fields;
        let wirings: Vec<(String, Override)> = fields
            .iter()
            .filter_map(|nf| {
                let sibling = match &nf.field {
                    Field::Bytes(f) => f.length.as_ref().and_then(Dynamic::field_ref),
                    Field::String(f) => f.bytes.length.as_ref().and_then(Dynamic::field_ref),
                    Field::Array(f) => {
                        return f
                            .count
                            .as_ref()
                            .and_then(Dynamic::field_ref)
                            .map(|s| (s.to_owned(), Override::CountOf(nf.name.clone())));
                    }
                    _ => None,
                };
                sibling.map(|s| (s.to_owned(), Override::LengthOf(nf.name.clone())))
            })
            .collect();
        for (sibling, hook) in wirings {
            match fields.iter_mut().find(|f| f.name == sibling) {
                Some(nf) if nf.override_hook.is_none() => nf.override_hook = hook,
                Some(_) => {}
                None => {
                    return Err(Error::Config(format!(
                        "field references unknown sibling '{}' in record '{}'",
                        sibling, self.name
                    )));
                }
            }
        }

        Ok(RecordType {
            name: self.name,
            byte_order: self.byte_order,
            fields,
        })
    }
}
