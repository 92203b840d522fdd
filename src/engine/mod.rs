use self::stream::{BitReader, BitWriter};
use crate::{
    context::ParsingContext,
    error::Error,
    schema::{
        ArrayField, BitField, ByteOrder, BytesField, ConditionalField, EnumField, Field, Format,
        IntegerField, MagicField, NamedField, Override, RecordType, StringField, StructField,
        StructureField, SwitchField, VariableLengthQuantityField,
    },
    types::{EnumValue, FlagsValue, Record, Value},
};
use byteordered::byteorder::{BigEndian, ByteOrder as _, LittleEndian};
use bytes::{Buf, BytesMut};
use ordered_float::OrderedFloat;
use std::{
    io::{Read, Write},
    sync::Arc,
};
use tokio_util::codec::Decoder;
use tracing::{debug, trace, warn};

pub mod stream;
pub(crate) mod text;

impl RecordType {
    /// Parse one record from a byte stream.
    ///
    /// Returns the record and the number of bytes consumed; the stream is
    /// left positioned directly after the record.
    pub fn parse<R: Read>(&self, r: &mut R) -> Result<(Record, usize), Error> {
        let mut reader = BitReader::new(r);
        let record = self.parse_stream(&mut reader, None, None)?;
        Ok((record, reader.position()))
    }

    /// Parse one record out of a byte slice.
    pub fn parse_bytes(&self, bytes: &[u8]) -> Result<(Record, usize), Error> {
        self.parse(&mut &bytes[..])
    }

    pub(crate) fn parse_stream<R: Read>(
        &self,
        r: &mut BitReader<R>,
        parent: Option<&ParsingContext<'_>>,
        byte_order: Option<ByteOrder>,
    ) -> Result<Record, Error> {
        let bo = self.byte_order().or(byte_order);
        let mut ctx = ParsingContext::with_parent(parent);
        for nf in self.fields() {
            let value = nf
                .field
                .parse(r, &ctx, bo)
                .map_err(|e| Error::at(format!("{}.{}", self.name(), nf.name), e))?;
            trace!(field = %nf.name, value = ?value, "Parsed field");
            ctx.set(nf.name.clone(), value);
        }
        debug!(record = %self.name(), bytes = r.position(), "Parsed record");
        Ok(Record::from_values(ctx.into_values()))
    }

    /// Serialize one record into a byte stream; returns the bytes written.
    pub fn write<W: Write>(&self, w: &mut W, record: &Record) -> Result<usize, Error> {
        let mut writer = BitWriter::new(w);
        self.write_stream(&mut writer, record, None, None)?;
        writer.finish()?;
        Ok(writer.position())
    }

    /// Serialize one record to a fresh buffer.
    pub fn to_bytes(&self, record: &Record) -> Result<Vec<u8>, Error> {
        let mut out = Vec::new();
        self.write(&mut out, record)?;
        Ok(out)
    }

    pub(crate) fn write_stream<W: Write>(
        &self,
        w: &mut BitWriter<W>,
        record: &Record,
        parent: Option<&ParsingContext<'_>>,
        byte_order: Option<ByteOrder>,
    ) -> Result<(), Error> {
        let bo = self.byte_order().or(byte_order);
        let mut ctx = ParsingContext::with_parent(parent);
        // Preload the supplied values so overrides can observe siblings
        // that have not been written yet.
        for nf in self.fields() {
            if let Some(v) = record.get(&nf.name) {
                ctx.set(nf.name.clone(), v.clone());
            }
        }
        for nf in self.fields() {
            let path = || format!("{}.{}", self.name(), nf.name);
            let supplied = self
                .supplied_or_default(nf, record, &ctx)
                .map_err(|e| Error::at(path(), e))?;
            let value = self
                .apply_override(nf, &ctx, supplied)
                .map_err(|e| Error::at(path(), e))?;
            nf.field
                .write(w, &ctx, bo, &value)
                .map_err(|e| Error::at(path(), e))?;
            trace!(field = %nf.name, value = ?value, "Wrote field");
            ctx.set(nf.name.clone(), value);
        }
        debug!(record = %self.name(), bytes = w.position(), "Wrote record");
        Ok(())
    }

    /// The value `record` holds for `name`, or the field's default when
    /// unset.
    pub fn value_of(&self, record: &Record, name: &str) -> Result<Value, Error> {
        let nf = self
            .field_named(name)
            .ok_or_else(|| Error::UnknownField(name.to_owned()))?;
        let mut ctx = ParsingContext::new();
        for f in self.fields() {
            if let Some(v) = record.get(&f.name) {
                ctx.set(f.name.clone(), v.clone());
            }
        }
        self.supplied_or_default(nf, record, &ctx)?
            .ok_or_else(|| Error::UnknownField(name.to_owned()))
    }

    /// Turn this layout into a tokio-util [`Decoder`] framing records out
    /// of a buffered byte stream.
    pub fn into_decoder(self) -> RecordDecoder {
        RecordDecoder {
            record_type: Arc::new(self),
        }
    }

    fn supplied_or_default(
        &self,
        nf: &NamedField,
        record: &Record,
        ctx: &ParsingContext<'_>,
    ) -> Result<Option<Value>, Error> {
        if let Some(v) = record.get(&nf.name) {
            return Ok(Some(v.clone()));
        }
        if let Some(default) = &nf.default {
            return default.resolve(ctx).map(Some);
        }
        Ok(nf.field.default_value())
    }

    fn apply_override(
        &self,
        nf: &NamedField,
        ctx: &ParsingContext<'_>,
        current: Option<Value>,
    ) -> Result<Value, Error> {
        match &nf.override_hook {
            Override::None => match current {
                Some(v) => Ok(v),
                // A conditional with no value falls back to the absent
                // sentinel; its condition decides whether anything is
                // written.
                None if matches!(nf.field, Field::Conditional(_)) => Ok(Value::Absent),
                None => Err(Error::UnknownField(nf.name.clone())),
            },
            Override::With(f) => f(ctx, current.unwrap_or(Value::Absent)),
            Override::LengthOf(dep) => {
                let value = self.dependent_value(dep, ctx)?;
                let field = &self
                    .field_named(dep)
                    .ok_or_else(|| Error::UnknownField(dep.clone()))?
                    .field;
                Ok(Value::UnsignedInteger(measured_len(field, &value)?))
            }
            Override::CountOf(dep) => {
                let value = self.dependent_value(dep, ctx)?;
                let count = value
                    .as_list()
                    .map(|l| l.len() as u64)
                    .ok_or_else(|| expected("a list", &value))?;
                Ok(Value::UnsignedInteger(count))
            }
        }
    }

    /// The value another field's auto-override measures: the supplied
    /// value if present, otherwise that field's default.
    fn dependent_value(&self, dep: &str, ctx: &ParsingContext<'_>) -> Result<Value, Error> {
        if let Some(v) = ctx.try_get(dep) {
            return Ok(v.clone());
        }
        let nf = self
            .field_named(dep)
            .ok_or_else(|| Error::UnknownField(dep.to_owned()))?;
        if let Some(default) = &nf.default {
            return default.resolve(ctx);
        }
        nf.field
            .default_value()
            .ok_or_else(|| Error::UnknownField(dep.to_owned()))
    }
}

impl Field {
    pub(crate) fn parse<R: Read>(
        &self,
        r: &mut BitReader<R>,
        ctx: &ParsingContext<'_>,
        byte_order: Option<ByteOrder>,
    ) -> Result<Value, Error> {
        match self {
            Field::Magic(f) => f.parse(r),
            Field::Bytes(f) => Ok(Value::Bytes(f.parse(r, ctx)?)),
            Field::String(f) => f.parse(r, ctx),
            Field::Integer(f) => f.parse(r, byte_order),
            Field::Vlq(f) => f.parse(r),
            Field::Bits(f) => f.parse(r),
            Field::Struct(f) => f.parse(r, byte_order),
            Field::Structure(f) => f.parse(r, ctx, byte_order),
            Field::Array(f) => f.parse(r, ctx, byte_order),
            Field::Conditional(f) => f.parse(r, ctx, byte_order),
            Field::Switch(f) => f.parse(r, ctx, byte_order),
            Field::Enum(f) => f.parse(r, ctx, byte_order),
        }
    }

    pub(crate) fn write<W: Write>(
        &self,
        w: &mut BitWriter<W>,
        ctx: &ParsingContext<'_>,
        byte_order: Option<ByteOrder>,
        value: &Value,
    ) -> Result<(), Error> {
        match self {
            Field::Magic(f) => f.write(w, value),
            Field::Bytes(f) => {
                let raw = value.as_bytes().ok_or_else(|| expected("bytes", value))?;
                f.write(w, ctx, raw)
            }
            Field::String(f) => f.write(w, ctx, value),
            Field::Integer(f) => f.write(w, byte_order, value),
            Field::Vlq(f) => f.write(w, value),
            Field::Bits(f) => f.write(w, value),
            Field::Struct(f) => f.write(w, byte_order, value),
            Field::Structure(f) => f.write(w, ctx, byte_order, value),
            Field::Array(f) => f.write(w, ctx, byte_order, value),
            Field::Conditional(f) => f.write(w, ctx, byte_order, value),
            Field::Switch(f) => f.write(w, ctx, byte_order, value),
            Field::Enum(f) => f.write(w, ctx, byte_order, value),
        }
    }

    /// The field-intrinsic default, independent of any per-name default
    /// declared on the record.
    pub(crate) fn default_value(&self) -> Option<Value> {
        match self {
            Field::Magic(f) => Some(Value::Bytes(f.magic.clone())),
            _ => None,
        }
    }
}

impl MagicField {
    fn parse<R: Read>(&self, r: &mut BitReader<R>) -> Result<Value, Error> {
        let found = r.read_bytes(self.magic.len())?;
        if found != self.magic {
            return Err(Error::MagicMismatch {
                expected: self.magic.clone(),
                found,
            });
        }
        Ok(Value::Bytes(found))
    }

    fn write<W: Write>(&self, w: &mut BitWriter<W>, value: &Value) -> Result<(), Error> {
        // A supplied value must agree; the magic is emitted either way.
        if let Some(found) = value.as_bytes() {
            if found != self.magic {
                return Err(Error::MagicMismatch {
                    expected: self.magic.clone(),
                    found: found.to_vec(),
                });
            }
        }
        w.write_bytes(&self.magic)
    }
}

impl BytesField {
    fn parse<R: Read>(
        &self,
        r: &mut BitReader<R>,
        ctx: &ParsingContext<'_>,
    ) -> Result<Vec<u8>, Error> {
        let length = self
            .length
            .as_ref()
            .map(|l| l.resolve(ctx))
            .transpose()?;
        match (length, self.terminator.as_deref()) {
            (Some(n), None) => {
                let mut data = if n < 0 {
                    r.read_to_end()?
                } else {
                    r.read_bytes(n as usize)?
                };
                if let Some(padding) = self.padding.as_deref() {
                    if !padding.is_empty() {
                        while data.ends_with(padding) {
                            data.truncate(data.len() - padding.len());
                        }
                    }
                }
                Ok(data)
            }
            (None, Some(terminator)) => {
                let (data, found) = r.read_until(terminator, self.step)?;
                if !found && self.strict {
                    return Err(Error::StreamExhausted);
                }
                Ok(data)
            }
            (Some(n), Some(terminator)) => {
                let buf = if n < 0 {
                    r.read_to_end()?
                } else {
                    r.read_bytes(n as usize)?
                };
                match find_terminator(&buf, terminator, self.step) {
                    Some(at) => Ok(buf[..at].to_vec()),
                    None if self.strict => Err(Error::TerminatorNotFound(terminator.to_vec())),
                    None => Ok(buf),
                }
            }
            (None, None) => Err(Error::Config(
                "bytes field needs a length or a terminator".to_owned(),
            )),
        }
    }

    fn write<W: Write>(
        &self,
        w: &mut BitWriter<W>,
        ctx: &ParsingContext<'_>,
        raw: &[u8],
    ) -> Result<(), Error> {
        let length = self
            .length
            .as_ref()
            .map(|l| l.resolve(ctx))
            .transpose()?;
        match (length, self.terminator.as_deref()) {
            (Some(n), None) => {
                if n < 0 {
                    return w.write_bytes(raw);
                }
                let n = n as usize;
                if raw.len() > n {
                    if self.strict {
                        return Err(Error::WriteOverflow {
                            declared: n,
                            actual: raw.len(),
                        });
                    }
                    warn!(declared = n, actual = raw.len(), "Writing past a non-strict length");
                    return w.write_bytes(raw);
                }
                if raw.len() < n {
                    return match self.padding.as_deref() {
                        Some(padding) if !padding.is_empty() => {
                            let mut data = raw.to_vec();
                            for i in raw.len()..n {
                                data.push(padding[(i - raw.len()) % padding.len()]);
                            }
                            w.write_bytes(&data)
                        }
                        _ if self.strict => Err(Error::WriteUnderflow {
                            declared: n,
                            actual: raw.len(),
                        }),
                        _ => {
                            warn!(declared = n, actual = raw.len(), "Writing short of a non-strict length");
                            w.write_bytes(raw)
                        }
                    };
                }
                w.write_bytes(raw)
            }
            (None, Some(terminator)) => {
                w.write_bytes(raw)?;
                w.write_bytes(terminator)?;
                if let Some(padding) = self.padding.as_deref() {
                    if !padding.is_empty() && self.step > 1 {
                        let rem = (raw.len() + terminator.len()) % self.step;
                        if rem != 0 {
                            let pad: Vec<u8> = (0..self.step - rem)
                                .map(|i| padding[i % padding.len()])
                                .collect();
                            w.write_bytes(&pad)?;
                        }
                    }
                }
                Ok(())
            }
            (Some(n), Some(terminator)) => {
                if n < 0 {
                    w.write_bytes(raw)?;
                    return w.write_bytes(terminator);
                }
                let n = n as usize;
                let content_len = raw.len() + terminator.len();
                if content_len > n {
                    if self.strict {
                        return Err(Error::WriteOverflow {
                            declared: n,
                            actual: content_len,
                        });
                    }
                    warn!(declared = n, actual = content_len, "Writing past a non-strict length");
                    w.write_bytes(raw)?;
                    return w.write_bytes(terminator);
                }
                w.write_bytes(raw)?;
                w.write_bytes(terminator)?;
                if content_len < n {
                    let pad: Vec<u8> = match self.padding.as_deref() {
                        Some(padding) if !padding.is_empty() => (0..n - content_len)
                            .map(|i| padding[i % padding.len()])
                            .collect(),
                        _ if self.strict => {
                            return Err(Error::WriteUnderflow {
                                declared: n,
                                actual: content_len,
                            });
                        }
                        _ => vec![0u8; n - content_len],
                    };
                    w.write_bytes(&pad)?;
                }
                Ok(())
            }
            (None, None) => Err(Error::Config(
                "bytes field needs a length or a terminator".to_owned(),
            )),
        }
    }
}

impl StringField {
    fn parse<R: Read>(
        &self,
        r: &mut BitReader<R>,
        ctx: &ParsingContext<'_>,
    ) -> Result<Value, Error> {
        let raw = self.bytes.parse(r, ctx)?;
        Ok(Value::String(text::decode(
            &raw,
            self.encoding,
            self.errors,
        )?))
    }

    fn write<W: Write>(
        &self,
        w: &mut BitWriter<W>,
        ctx: &ParsingContext<'_>,
        value: &Value,
    ) -> Result<(), Error> {
        let s = value.as_str().ok_or_else(|| expected("a string", value))?;
        let raw = text::encode(s, self.encoding, self.errors)?;
        self.bytes.write(w, ctx, &raw)
    }
}

impl IntegerField {
    fn check_length(&self) -> Result<(), Error> {
        if !(1..=8).contains(&self.length) {
            return Err(Error::Config(format!(
                "integer length {} is out of range (1..=8)",
                self.length
            )));
        }
        Ok(())
    }

    fn parse<R: Read>(
        &self,
        r: &mut BitReader<R>,
        byte_order: Option<ByteOrder>,
    ) -> Result<Value, Error> {
        self.check_length()?;
        let bo = effective_byte_order(self.byte_order, byte_order, self.length)?;
        let buf = r.read_bytes(self.length)?;
        Ok(if self.signed {
            Value::SignedInteger(read_signed(bo, &buf))
        } else {
            Value::UnsignedInteger(read_unsigned(bo, &buf))
        })
    }

    fn write<W: Write>(
        &self,
        w: &mut BitWriter<W>,
        byte_order: Option<ByteOrder>,
        value: &Value,
    ) -> Result<(), Error> {
        self.check_length()?;
        let bo = effective_byte_order(self.byte_order, byte_order, self.length)?;
        let mut buf = vec![0u8; self.length];
        if self.signed {
            let v = value.as_i64().ok_or_else(|| expected("an integer", value))?;
            if !fits_signed(v, self.length) {
                return Err(Error::Overflow {
                    width: self.length * 8,
                });
            }
            write_signed(bo, &mut buf, v);
        } else {
            let v = value
                .as_u64()
                .ok_or_else(|| expected("an unsigned integer", value))?;
            if !fits_unsigned(v, self.length) {
                return Err(Error::Overflow {
                    width: self.length * 8,
                });
            }
            write_unsigned(bo, &mut buf, v);
        }
        w.write_bytes(&buf)
    }
}

impl VariableLengthQuantityField {
    fn parse<R: Read>(&self, r: &mut BitReader<R>) -> Result<Value, Error> {
        let mut value: u64 = 0;
        loop {
            let byte = r.read_bytes(1)?[0];
            if value >> 57 != 0 {
                return Err(Error::Overflow { width: 64 });
            }
            value = (value << 7) | u64::from(byte & 0x7F);
            if byte & 0x80 == 0 {
                break;
            }
        }
        Ok(Value::UnsignedInteger(value))
    }

    fn write<W: Write>(&self, w: &mut BitWriter<W>, value: &Value) -> Result<(), Error> {
        let v = value
            .as_u64()
            .ok_or_else(|| expected("an unsigned integer", value))?;
        let mut groups = vec![(v & 0x7F) as u8];
        let mut rest = v >> 7;
        while rest != 0 {
            groups.push((rest & 0x7F) as u8 | 0x80);
            rest >>= 7;
        }
        groups.reverse();
        w.write_bytes(&groups)
    }
}

impl BitField {
    fn check_length(&self) -> Result<(), Error> {
        if !(1..=64).contains(&self.length) {
            return Err(Error::Config(format!(
                "bit field length {} is out of range (1..=64)",
                self.length
            )));
        }
        Ok(())
    }

    fn parse<R: Read>(&self, r: &mut BitReader<R>) -> Result<Value, Error> {
        self.check_length()?;
        let value = r.read_bits(self.length)?;
        if self.realign {
            r.realign();
        }
        Ok(Value::UnsignedInteger(value))
    }

    fn write<W: Write>(&self, w: &mut BitWriter<W>, value: &Value) -> Result<(), Error> {
        self.check_length()?;
        let v = value
            .as_u64()
            .ok_or_else(|| expected("an unsigned integer", value))?;
        if self.length < 64 && v >> self.length != 0 {
            return Err(Error::Overflow { width: self.length });
        }
        w.write_bits(v, self.length)?;
        if self.realign {
            w.realign(0)?;
        }
        Ok(())
    }
}

impl StructField {
    fn parse<R: Read>(
        &self,
        r: &mut BitReader<R>,
        byte_order: Option<ByteOrder>,
    ) -> Result<Value, Error> {
        match self.repeat {
            None => self.parse_scalar(r, byte_order),
            Some(n) => {
                let mut values = Vec::with_capacity(n);
                for _ in 0..n {
                    values.push(self.parse_scalar(r, byte_order)?);
                }
                Ok(Value::List(values))
            }
        }
    }

    fn parse_scalar<R: Read>(
        &self,
        r: &mut BitReader<R>,
        byte_order: Option<ByteOrder>,
    ) -> Result<Value, Error> {
        let width = self.format.width();
        let bo = effective_byte_order(self.byte_order, byte_order, width)?;
        let buf = r.read_bytes(width)?;
        Ok(match self.format {
            Format::Char => Value::Bytes(buf),
            Format::Bool => Value::Boolean(buf[0] != 0),
            Format::SignedByte
            | Format::Short
            | Format::Int
            | Format::Long
            | Format::LongLong
            | Format::NativeSize => Value::SignedInteger(read_signed(bo, &buf)),
            Format::UnsignedByte
            | Format::UnsignedShort
            | Format::UnsignedInt
            | Format::UnsignedLong
            | Format::UnsignedLongLong
            | Format::UnsignedNativeSize => Value::UnsignedInteger(read_unsigned(bo, &buf)),
            Format::HalfFloat => {
                Value::F32(OrderedFloat(f16_to_f32(read_unsigned(bo, &buf) as u16)))
            }
            Format::Float => Value::F32(OrderedFloat(f32::from_bits(
                read_unsigned(bo, &buf) as u32
            ))),
            Format::Double => Value::F64(OrderedFloat(f64::from_bits(read_unsigned(bo, &buf)))),
        })
    }

    fn write<W: Write>(
        &self,
        w: &mut BitWriter<W>,
        byte_order: Option<ByteOrder>,
        value: &Value,
    ) -> Result<(), Error> {
        match self.repeat {
            None => self.write_scalar(w, byte_order, value),
            Some(n) => {
                let items = value.as_list().ok_or_else(|| expected("a list", value))?;
                if items.len() != n {
                    return Err(Error::Config(format!(
                        "expected {} scalars, found {}",
                        n,
                        items.len()
                    )));
                }
                for item in items {
                    self.write_scalar(w, byte_order, item)?;
                }
                Ok(())
            }
        }
    }

    fn write_scalar<W: Write>(
        &self,
        w: &mut BitWriter<W>,
        byte_order: Option<ByteOrder>,
        value: &Value,
    ) -> Result<(), Error> {
        let width = self.format.width();
        let bo = effective_byte_order(self.byte_order, byte_order, width)?;
        let mut buf = vec![0u8; width];
        match self.format {
            Format::Char => {
                let b = value
                    .as_bytes()
                    .ok_or_else(|| expected("a single byte", value))?;
                match b.len() {
                    1 => buf[0] = b[0],
                    0 => {
                        return Err(Error::WriteUnderflow {
                            declared: 1,
                            actual: 0,
                        });
                    }
                    n => {
                        return Err(Error::WriteOverflow {
                            declared: 1,
                            actual: n,
                        });
                    }
                }
            }
            Format::Bool => buf[0] = u8::from(value.is_truthy()),
            Format::SignedByte
            | Format::Short
            | Format::Int
            | Format::Long
            | Format::LongLong
            | Format::NativeSize => {
                let v = value.as_i64().ok_or_else(|| expected("an integer", value))?;
                if !fits_signed(v, width) {
                    return Err(Error::Overflow { width: width * 8 });
                }
                write_signed(bo, &mut buf, v);
            }
            Format::UnsignedByte
            | Format::UnsignedShort
            | Format::UnsignedInt
            | Format::UnsignedLong
            | Format::UnsignedLongLong
            | Format::UnsignedNativeSize => {
                let v = value
                    .as_u64()
                    .ok_or_else(|| expected("an unsigned integer", value))?;
                if !fits_unsigned(v, width) {
                    return Err(Error::Overflow { width: width * 8 });
                }
                write_unsigned(bo, &mut buf, v);
            }
            Format::HalfFloat => {
                let f = value.as_f64().ok_or_else(|| expected("a float", value))?;
                write_unsigned(bo, &mut buf, u64::from(f32_to_f16(f as f32)));
            }
            Format::Float => {
                let f = value.as_f64().ok_or_else(|| expected("a float", value))?;
                write_unsigned(bo, &mut buf, u64::from((f as f32).to_bits()));
            }
            Format::Double => {
                let f = value.as_f64().ok_or_else(|| expected("a float", value))?;
                write_unsigned(bo, &mut buf, f.to_bits());
            }
        }
        w.write_bytes(&buf)
    }
}

impl StructureField {
    fn parse<R: Read>(
        &self,
        r: &mut BitReader<R>,
        ctx: &ParsingContext<'_>,
        byte_order: Option<ByteOrder>,
    ) -> Result<Value, Error> {
        let length = self
            .length
            .as_ref()
            .map(|l| l.resolve(ctx))
            .transpose()?;
        let record = match length {
            Some(n) => {
                if n < 0 {
                    return Err(Error::Config(
                        "structure length cap must be non-negative".to_owned(),
                    ));
                }
                // Bound the nested record to the capped region; whatever it
                // leaves unread is discarded.
                let buf = r.read_bytes(n as usize)?;
                let mut sub = BitReader::new(&buf[..]);
                self.record.parse_stream(&mut sub, Some(ctx), byte_order)?
            }
            None => self.record.parse_stream(r, Some(ctx), byte_order)?,
        };
        Ok(Value::Record(record))
    }

    fn write<W: Write>(
        &self,
        w: &mut BitWriter<W>,
        ctx: &ParsingContext<'_>,
        byte_order: Option<ByteOrder>,
        value: &Value,
    ) -> Result<(), Error> {
        let record = value
            .as_record()
            .ok_or_else(|| expected("a nested record", value))?;
        let length = self
            .length
            .as_ref()
            .map(|l| l.resolve(ctx))
            .transpose()?;
        match length {
            None => self.record.write_stream(w, record, Some(ctx), byte_order),
            Some(n) => {
                if n < 0 {
                    return Err(Error::Config(
                        "structure length cap must be non-negative".to_owned(),
                    ));
                }
                let n = n as usize;
                let mut buf = Vec::new();
                {
                    let mut sub = BitWriter::new(&mut buf);
                    self.record
                        .write_stream(&mut sub, record, Some(ctx), byte_order)?;
                    sub.finish()?;
                }
                if buf.len() > n {
                    if self.strict {
                        return Err(Error::WriteOverflow {
                            declared: n,
                            actual: buf.len(),
                        });
                    }
                    warn!(declared = n, actual = buf.len(), "Nested record exceeds its non-strict cap");
                } else {
                    buf.resize(n, 0);
                }
                w.write_bytes(&buf)
            }
        }
    }
}

impl ArrayField {
    fn parse<R: Read>(
        &self,
        r: &mut BitReader<R>,
        ctx: &ParsingContext<'_>,
        byte_order: Option<ByteOrder>,
    ) -> Result<Value, Error> {
        match (&self.count, &self.length) {
            (Some(count), None) => {
                let n = count.resolve(ctx)?;
                let mut values = Vec::new();
                for _ in 0..n {
                    values.push(self.base.parse(r, ctx, byte_order)?);
                }
                Ok(Value::List(values))
            }
            (None, Some(length)) => {
                let n = length.resolve(ctx)?;
                if n < 0 {
                    return self.parse_to_end(r, ctx, byte_order);
                }
                let n = n as usize;
                let buf = r.read_bytes(n)?;
                let mut sub = BitReader::new(&buf[..]);
                let mut values = Vec::new();
                while sub.position() < n {
                    let start = sub.position_bits();
                    match self.base.parse(&mut sub, ctx, byte_order) {
                        Ok(v) => {
                            if sub.position_bits() == start {
                                return Err(Error::Config(
                                    "array element consumed no bytes".to_owned(),
                                ));
                            }
                            values.push(v);
                        }
                        Err(e) if matches!(e.root(), Error::StreamExhausted) => {
                            return Err(Error::TrailingBytes(n - start / 8));
                        }
                        Err(e) => return Err(e),
                    }
                }
                Ok(Value::List(values))
            }
            _ => Err(Error::Config(
                "array needs exactly one of count or length".to_owned(),
            )),
        }
    }

    fn parse_to_end<R: Read>(
        &self,
        r: &mut BitReader<R>,
        ctx: &ParsingContext<'_>,
        byte_order: Option<ByteOrder>,
    ) -> Result<Value, Error> {
        let mut values = Vec::new();
        loop {
            let start = r.position_bits();
            match self.base.parse(r, ctx, byte_order) {
                Ok(v) => {
                    if r.position_bits() == start {
                        return Err(Error::Config(
                            "array element consumed no bytes".to_owned(),
                        ));
                    }
                    values.push(v);
                }
                // Exhaustion on an element's first byte ends the array;
                // exhaustion mid-element is a real failure.
                Err(e)
                    if matches!(e.root(), Error::StreamExhausted)
                        && r.position_bits() == start =>
                {
                    break;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(Value::List(values))
    }

    fn write<W: Write>(
        &self,
        w: &mut BitWriter<W>,
        ctx: &ParsingContext<'_>,
        byte_order: Option<ByteOrder>,
        value: &Value,
    ) -> Result<(), Error> {
        let items = value.as_list().ok_or_else(|| expected("a list", value))?;
        match (&self.count, &self.length) {
            (Some(count), None) => {
                let n = count.resolve(ctx)?;
                if n != items.len() as u64 {
                    if self.strict {
                        return Err(Error::Config(format!(
                            "array count {} does not match {} elements",
                            n,
                            items.len()
                        )));
                    }
                    warn!(count = n, elements = items.len(), "Array count does not match");
                }
                for item in items {
                    self.base.write(w, ctx, byte_order, item)?;
                }
                Ok(())
            }
            (None, Some(length)) => {
                let n = length.resolve(ctx)?;
                let mut buf = Vec::new();
                {
                    let mut sub = BitWriter::new(&mut buf);
                    for item in items {
                        self.base.write(&mut sub, ctx, byte_order, item)?;
                    }
                    sub.finish()?;
                }
                if n >= 0 && buf.len() != n as usize && self.strict {
                    let n = n as usize;
                    return Err(if buf.len() > n {
                        Error::WriteOverflow {
                            declared: n,
                            actual: buf.len(),
                        }
                    } else {
                        Error::WriteUnderflow {
                            declared: n,
                            actual: buf.len(),
                        }
                    });
                }
                w.write_bytes(&buf)
            }
            _ => Err(Error::Config(
                "array needs exactly one of count or length".to_owned(),
            )),
        }
    }
}

impl ConditionalField {
    fn parse<R: Read>(
        &self,
        r: &mut BitReader<R>,
        ctx: &ParsingContext<'_>,
        byte_order: Option<ByteOrder>,
    ) -> Result<Value, Error> {
        if self.condition.resolve(ctx)?.is_truthy() {
            self.base.parse(r, ctx, byte_order)
        } else {
            Ok(Value::Absent)
        }
    }

    fn write<W: Write>(
        &self,
        w: &mut BitWriter<W>,
        ctx: &ParsingContext<'_>,
        byte_order: Option<ByteOrder>,
        value: &Value,
    ) -> Result<(), Error> {
        if self.condition.resolve(ctx)?.is_truthy() {
            self.base.write(w, ctx, byte_order, value)
        } else {
            Ok(())
        }
    }
}

impl SwitchField {
    fn select(&self, ctx: &ParsingContext<'_>) -> Result<&Field, Error> {
        let key = self.switch.resolve(ctx)?;
        if let Some((_, field)) = self.cases.iter().find(|(k, _)| key.matches_key(k)) {
            return Ok(field);
        }
        match &self.other {
            Some(field) => Ok(field),
            None => Err(Error::SwitchNoMatch(format!("{key:?}"))),
        }
    }

    fn parse<R: Read>(
        &self,
        r: &mut BitReader<R>,
        ctx: &ParsingContext<'_>,
        byte_order: Option<ByteOrder>,
    ) -> Result<Value, Error> {
        self.select(ctx)?.parse(r, ctx, byte_order)
    }

    fn write<W: Write>(
        &self,
        w: &mut BitWriter<W>,
        ctx: &ParsingContext<'_>,
        byte_order: Option<ByteOrder>,
        value: &Value,
    ) -> Result<(), Error> {
        self.select(ctx)?.write(w, ctx, byte_order, value)
    }
}

impl EnumField {
    fn parse<R: Read>(
        &self,
        r: &mut BitReader<R>,
        ctx: &ParsingContext<'_>,
        byte_order: Option<ByteOrder>,
    ) -> Result<Value, Error> {
        let base = self.base.parse(r, ctx, byte_order)?;
        if self.enumeration.is_flags() {
            let bits = base
                .as_u64()
                .ok_or_else(|| expected("an unsigned integer", &base))?;
            let (labels, rest) = self.enumeration.decompose(bits);
            if rest != 0 && !self.enumeration.allows_unknown() {
                return Err(Error::EnumNotFound(format!("{rest:#x}")));
            }
            Ok(Value::Flags(FlagsValue { bits, labels }))
        } else {
            let value = base.as_i64().ok_or_else(|| expected("an integer", &base))?;
            match self.enumeration.label(value) {
                Some(label) => Ok(Value::Enum(EnumValue {
                    value,
                    label: Some(label),
                })),
                None if self.enumeration.allows_unknown() => {
                    Ok(Value::Enum(EnumValue { value, label: None }))
                }
                None => Err(Error::EnumNotFound(value.to_string())),
            }
        }
    }

    fn write<W: Write>(
        &self,
        w: &mut BitWriter<W>,
        ctx: &ParsingContext<'_>,
        byte_order: Option<ByteOrder>,
        value: &Value,
    ) -> Result<(), Error> {
        let backing = match value {
            Value::Enum(e) => {
                if !self.enumeration.is_flags()
                    && self.enumeration.label(e.value).is_none()
                    && !self.enumeration.allows_unknown()
                {
                    return Err(Error::EnumNotFound(e.value.to_string()));
                }
                Value::SignedInteger(e.value)
            }
            Value::Flags(f) => Value::UnsignedInteger(f.bits),
            Value::String(label) => {
                let v = self
                    .enumeration
                    .value(label)
                    .ok_or_else(|| Error::EnumNotFound(label.clone()))?;
                Value::SignedInteger(v)
            }
            Value::List(labels) if self.enumeration.is_flags() => {
                let mut bits = 0u64;
                for label in labels {
                    let label = label.as_str().ok_or_else(|| expected("a label", label))?;
                    bits |= self
                        .enumeration
                        .value(label)
                        .ok_or_else(|| Error::EnumNotFound(label.to_owned()))?
                        as u64;
                }
                Value::UnsignedInteger(bits)
            }
            Value::UnsignedInteger(_) | Value::SignedInteger(_) => value.clone(),
            other => return Err(expected("an enumeration member", other)),
        };
        self.base.write(w, ctx, byte_order, &backing)
    }
}

/// Frames complete records out of a buffered byte stream.
///
/// Each call attempts a full parse of the buffered bytes, treating
/// exhaustion as "need more data". Layouts that read to the end of the
/// stream frame on whatever happens to be buffered; prefer length-prefixed
/// or delimited layouts when streaming.
#[derive(Debug)]
pub struct RecordDecoder {
    record_type: Arc<RecordType>,
}

impl RecordDecoder {
    pub fn new(record_type: Arc<RecordType>) -> Self {
        Self { record_type }
    }
}

impl Decoder for RecordDecoder {
    type Item = Record;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Record>, Error> {
        if src.is_empty() {
            return Ok(None);
        }
        match self.record_type.parse_bytes(&src[..]) {
            Ok((record, consumed)) => {
                if consumed == 0 {
                    return Err(Error::Config(
                        "record layout consumed no bytes".to_owned(),
                    ));
                }
                src.advance(consumed);
                Ok(Some(record))
            }
            Err(e) if matches!(e.root(), Error::StreamExhausted) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Record>, Error> {
        if src.is_empty() {
            return Ok(None);
        }
        // At EOF the buffered bytes are the whole remaining stream, so
        // exhaustion is final rather than a request for more data.
        let (record, consumed) = self.record_type.parse_bytes(&src[..])?;
        if consumed == 0 {
            return Err(Error::Config(
                "record layout consumed no bytes".to_owned(),
            ));
        }
        src.advance(consumed);
        Ok(Some(record))
    }
}

/// Field-level byte order, falling back to the record default. Single-byte
/// widths do not need one.
fn effective_byte_order(
    field: Option<ByteOrder>,
    record: Option<ByteOrder>,
    width: usize,
) -> Result<ByteOrder, Error> {
    match field.or(record) {
        Some(bo) => Ok(bo),
        None if width <= 1 => Ok(ByteOrder::BigEndian),
        None => Err(Error::Config(
            "no byte order declared on the field or the record".to_owned(),
        )),
    }
}

fn read_unsigned(bo: ByteOrder, buf: &[u8]) -> u64 {
    match bo {
        ByteOrder::BigEndian => BigEndian::read_uint(buf, buf.len()),
        ByteOrder::LittleEndian => LittleEndian::read_uint(buf, buf.len()),
    }
}

fn read_signed(bo: ByteOrder, buf: &[u8]) -> i64 {
    match bo {
        ByteOrder::BigEndian => BigEndian::read_int(buf, buf.len()),
        ByteOrder::LittleEndian => LittleEndian::read_int(buf, buf.len()),
    }
}

fn write_unsigned(bo: ByteOrder, buf: &mut [u8], value: u64) {
    let n = buf.len();
    match bo {
        ByteOrder::BigEndian => BigEndian::write_uint(buf, value, n),
        ByteOrder::LittleEndian => LittleEndian::write_uint(buf, value, n),
    }
}

fn write_signed(bo: ByteOrder, buf: &mut [u8], value: i64) {
    let n = buf.len();
    match bo {
        ByteOrder::BigEndian => BigEndian::write_int(buf, value, n),
        ByteOrder::LittleEndian => LittleEndian::write_int(buf, value, n),
    }
}

fn fits_unsigned(value: u64, bytes: usize) -> bool {
    bytes >= 8 || value < (1u64 << (bytes * 8))
}

fn fits_signed(value: i64, bytes: usize) -> bool {
    if bytes >= 8 {
        return true;
    }
    let half = 1i64 << (bytes * 8 - 1);
    (-half..half).contains(&value)
}

/// First position of `terminator` in `buf` at a multiple of `step`.
fn find_terminator(buf: &[u8], terminator: &[u8], step: usize) -> Option<usize> {
    let step = step.max(1);
    if terminator.is_empty() || buf.len() < terminator.len() {
        return None;
    }
    (0..=buf.len() - terminator.len())
        .step_by(step)
        .find(|&i| &buf[i..i + terminator.len()] == terminator)
}

/// Byte length of `value` as `field` will encode it; backs the synthetic
/// length override.
fn measured_len(field: &Field, value: &Value) -> Result<u64, Error> {
    match field {
        Field::Bytes(_) => value
            .as_bytes()
            .map(|b| b.len() as u64)
            .ok_or_else(|| expected("bytes", value)),
        Field::String(f) => {
            let s = value.as_str().ok_or_else(|| expected("a string", value))?;
            Ok(text::encode(s, f.encoding, f.errors)?.len() as u64)
        }
        _ => Err(Error::Config(
            "length override references a field that is not bytes or string".to_owned(),
        )),
    }
}

fn expected(what: &str, value: &Value) -> Error {
    Error::Config(format!("expected {what}, found {}", value.kind()))
}

/// IEEE-754 binary16 to binary32.
pub(crate) fn f16_to_f32(bits: u16) -> f32 {
    let sign = u32::from(bits >> 15) << 31;
    let exp = u32::from((bits >> 10) & 0x1F);
    let frac = u32::from(bits & 0x3FF);
    let bits32 = match (exp, frac) {
        (0, 0) => sign,
        (0, _) => {
            // Subnormal half; renormalize for the wider exponent range.
            let mut exp32 = 113u32;
            let mut frac = frac;
            while frac & 0x400 == 0 {
                frac <<= 1;
                exp32 -= 1;
            }
            sign | (exp32 << 23) | ((frac & 0x3FF) << 13)
        }
        (0x1F, 0) => sign | 0x7F80_0000,
        (0x1F, _) => sign | 0x7F80_0000 | (frac << 13),
        _ => sign | ((exp + 112) << 23) | (frac << 13),
    };
    f32::from_bits(bits32)
}

/// IEEE-754 binary32 to binary16 with round-to-nearest-even.
pub(crate) fn f32_to_f16(value: f32) -> u16 {
    let bits = value.to_bits();
    let sign = ((bits >> 16) & 0x8000) as u16;
    let exp = ((bits >> 23) & 0xFF) as i32;
    let frac = bits & 0x007F_FFFF;

    if exp == 0xFF {
        let payload: u16 = if frac != 0 { 0x0200 } else { 0 };
        return sign | 0x7C00 | payload;
    }

    let unbiased = exp - 127;
    if unbiased > 15 {
        return sign | 0x7C00;
    }
    if unbiased >= -14 {
        let exp16 = (unbiased + 15) as u32;
        let mut out = (exp16 << 10) | (frac >> 13);
        let round = frac & 0x1FFF;
        // A carry out of the mantissa lands in the exponent, which still
        // yields the correct encoding.
        if round > 0x1000 || (round == 0x1000 && out & 1 == 1) {
            out += 1;
        }
        return sign | out as u16;
    }
    if unbiased >= -24 {
        let full = 0x0080_0000 | frac;
        let shift = (-1 - unbiased) as u32;
        let mut out = full >> shift;
        let rem = full & ((1 << shift) - 1);
        let half = 1 << (shift - 1);
        if rem > half || (rem == half && out & 1 == 1) {
            out += 1;
        }
        return sign | out as u16;
    }
    sign
}
