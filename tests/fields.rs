use bytefields::*;
use internment::Intern;
use pretty_assertions::assert_eq;
use test_log::test;

#[test]
fn magic_parses_validates_and_defaults() {
    let rt = RecordType::build("png")
        .field("magic", MagicField::new(b"\x89PNG"))
        .finish()
        .unwrap();

    let (record, consumed) = rt.parse_bytes(b"\x89PNGrest").unwrap();
    assert_eq!(consumed, 4);
    assert_eq!(record.get("magic"), Some(&Value::Bytes(b"\x89PNG".to_vec())));

    let err = rt.parse_bytes(b"\x89PNX").unwrap_err();
    assert!(matches!(err.root(), Error::MagicMismatch { .. }));
    assert_eq!(err.path(), Some("png.magic"));

    // An unset magic resolves from its default.
    assert_eq!(rt.to_bytes(&Record::new()).unwrap(), b"\x89PNG");
    assert_eq!(
        rt.value_of(&Record::new(), "magic").unwrap(),
        Value::Bytes(b"\x89PNG".to_vec())
    );

    // A supplied value must agree with the sequence.
    let err = rt
        .to_bytes(&Record::new().with("magic", &b"nope"[..]))
        .unwrap_err();
    assert!(matches!(err.root(), Error::MagicMismatch { .. }));
}

#[test]
fn sized_bytes_with_padding() {
    let rt = RecordType::build("fixed")
        .field(
            "data",
            BytesField::sized(Dynamic::Literal(8)).padding(b"\x00"),
        )
        .finish()
        .unwrap();

    let (record, _) = rt.parse_bytes(b"abc\x00\x00\x00\x00\x00").unwrap();
    assert_eq!(record.get("data"), Some(&Value::Bytes(b"abc".to_vec())));

    let bytes = rt
        .to_bytes(&Record::new().with("data", &b"abc"[..]))
        .unwrap();
    assert_eq!(bytes, b"abc\x00\x00\x00\x00\x00");
}

#[test]
fn padding_round_trip_is_lossy_for_padded_tails() {
    let rt = RecordType::build("fixed")
        .field(
            "data",
            BytesField::sized(Dynamic::Literal(4)).padding(b"\x00"),
        )
        .finish()
        .unwrap();

    // A value ending in the padding byte cannot survive a round trip: the
    // read side cannot tell value bytes from fill bytes.
    let original = Record::new().with("data", &b"a\x00"[..]);
    let bytes = rt.to_bytes(&original).unwrap();
    assert_eq!(bytes, b"a\x00\x00\x00");
    let (parsed, _) = rt.parse_bytes(&bytes).unwrap();
    assert_eq!(parsed.get("data"), Some(&Value::Bytes(b"a".to_vec())));
    assert_ne!(parsed.get("data"), original.get("data"));
}

#[test]
fn sized_bytes_write_bounds() {
    let strict = RecordType::build("strict")
        .field("data", BytesField::sized(Dynamic::Literal(3)))
        .finish()
        .unwrap();

    let err = strict
        .to_bytes(&Record::new().with("data", &b"abcd"[..]))
        .unwrap_err();
    assert!(matches!(
        err.root(),
        Error::WriteOverflow {
            declared: 3,
            actual: 4
        }
    ));

    let err = strict
        .to_bytes(&Record::new().with("data", &b"ab"[..]))
        .unwrap_err();
    assert!(matches!(
        err.root(),
        Error::WriteUnderflow {
            declared: 3,
            actual: 2
        }
    ));

    let lenient = RecordType::build("lenient")
        .field("data", BytesField::sized(Dynamic::Literal(3)).lenient())
        .finish()
        .unwrap();
    assert_eq!(
        lenient
            .to_bytes(&Record::new().with("data", &b"abcd"[..]))
            .unwrap(),
        b"abcd"
    );
    assert_eq!(
        lenient
            .to_bytes(&Record::new().with("data", &b"ab"[..]))
            .unwrap(),
        b"ab"
    );
}

#[test]
fn bounded_terminator_search() {
    let rt = RecordType::build("bounded")
        .field(
            "data",
            BytesField::sized(Dynamic::Literal(8)).terminator(b"\x00"),
        )
        .finish()
        .unwrap();

    // Exactly eight bytes are consumed; the value stops at the terminator.
    let (record, consumed) = rt.parse_bytes(b"abc\x00defgtail").unwrap();
    assert_eq!(consumed, 8);
    assert_eq!(record.get("data"), Some(&Value::Bytes(b"abc".to_vec())));

    let err = rt.parse_bytes(b"abcdefgh").unwrap_err();
    assert!(matches!(err.root(), Error::TerminatorNotFound(t) if *t == [0x00]));

    // Underflow without padding is an error when strict.
    let err = rt
        .to_bytes(&Record::new().with("data", &b"abc"[..]))
        .unwrap_err();
    assert!(matches!(err.root(), Error::WriteUnderflow { .. }));

    let padded = RecordType::build("bounded")
        .field(
            "data",
            BytesField::sized(Dynamic::Literal(8))
                .terminator(b"\x00")
                .padding(b"\xFF"),
        )
        .finish()
        .unwrap();
    assert_eq!(
        padded
            .to_bytes(&Record::new().with("data", &b"abc"[..]))
            .unwrap(),
        b"abc\x00\xFF\xFF\xFF\xFF"
    );
}

#[test]
fn unterminated_bytes_fail_when_strict() {
    let strict = RecordType::build("strict")
        .field("data", BytesField::terminated(b"\x00"))
        .finish()
        .unwrap();
    let err = strict.parse_bytes(b"no end").unwrap_err();
    assert!(matches!(err.root(), Error::StreamExhausted));

    let lenient = RecordType::build("lenient")
        .field("data", BytesField::terminated(b"\x00").lenient())
        .finish()
        .unwrap();
    let (record, _) = lenient.parse_bytes(b"no end").unwrap();
    assert_eq!(record.get("data"), Some(&Value::Bytes(b"no end".to_vec())));
}

#[test]
fn negative_length_reads_to_end() {
    let rt = RecordType::build("tail")
        .field("tag", IntegerField::new(1))
        .field("rest", BytesField::to_end())
        .finish()
        .unwrap();

    let (record, consumed) = rt.parse_bytes(b"\x07payload").unwrap();
    assert_eq!(consumed, 8);
    assert_eq!(record.get("rest"), Some(&Value::Bytes(b"payload".to_vec())));
}

#[test]
fn integer_byte_orders_and_widths() {
    let rt = RecordType::build("ints")
        .field(
            "a",
            IntegerField::new(3)
                .signed()
                .byte_order(ByteOrder::LittleEndian),
        )
        .field("b", IntegerField::new(2).byte_order(ByteOrder::BigEndian))
        .finish()
        .unwrap();

    let record = Record::new().with("a", -70_000i32).with("b", 0xBEEFu16);
    let bytes = rt.to_bytes(&record).unwrap();
    assert_eq!(bytes.len(), 5);
    let (parsed, _) = rt.parse_bytes(&bytes).unwrap();
    assert_eq!(parsed.get("a"), Some(&Value::SignedInteger(-70_000)));
    assert_eq!(parsed.get("b"), Some(&Value::UnsignedInteger(0xBEEF)));
}

#[test]
fn integer_write_overflow() {
    let rt = RecordType::build("narrow")
        .field("v", IntegerField::new(1))
        .finish()
        .unwrap();
    let err = rt.to_bytes(&Record::new().with("v", 300u16)).unwrap_err();
    assert!(matches!(err.root(), Error::Overflow { width: 8 }));

    let signed = RecordType::build("narrow")
        .field("v", IntegerField::new(1).signed())
        .finish()
        .unwrap();
    let err = signed
        .to_bytes(&Record::new().with("v", -129i16))
        .unwrap_err();
    assert!(matches!(err.root(), Error::Overflow { width: 8 }));
    assert_eq!(
        signed.to_bytes(&Record::new().with("v", -128i16)).unwrap(),
        [0x80]
    );
}

#[test]
fn byte_order_falls_back_to_record_default() {
    let rt = RecordType::build("le")
        .byte_order(ByteOrder::LittleEndian)
        .field("v", IntegerField::new(2))
        .finish()
        .unwrap();
    let (record, _) = rt.parse_bytes(&[0x34, 0x12]).unwrap();
    assert_eq!(record.get("v"), Some(&Value::UnsignedInteger(0x1234)));

    // No field-level and no record-level byte order on a multi-byte field.
    let bare = RecordType::build("bare")
        .field("v", IntegerField::new(2))
        .finish()
        .unwrap();
    let err = bare.parse_bytes(&[0x34, 0x12]).unwrap_err();
    assert!(matches!(err.root(), Error::Config(_)));
}

#[test]
fn adjacent_bit_fields_share_bytes() {
    let rt = RecordType::build("packed")
        .field("a", BitField::new(3))
        .field("b", BitField::new(5))
        .finish()
        .unwrap();

    let (record, consumed) = rt.parse_bytes(&[0b101_11011]).unwrap();
    assert_eq!(consumed, 1);
    assert_eq!(record.get("a"), Some(&Value::UnsignedInteger(0b101)));
    assert_eq!(record.get("b"), Some(&Value::UnsignedInteger(0b11011)));

    assert_eq!(rt.to_bytes(&record).unwrap(), [0b101_11011]);
}

#[test]
fn misaligned_transition_to_bytes_fails() {
    let rt = RecordType::build("bad")
        .field("a", BitField::new(3))
        .field("b", BytesField::sized(Dynamic::Literal(1)))
        .finish()
        .unwrap();
    let err = rt.parse_bytes(&[0xFF, 0xFF]).unwrap_err();
    assert!(matches!(err.root(), Error::MisalignedBits(3)));
    assert_eq!(err.path(), Some("bad.b"));
}

#[test]
fn bit_field_write_overflow() {
    let rt = RecordType::build("bits")
        .field("v", BitField::new(5).realign())
        .finish()
        .unwrap();
    let err = rt.to_bytes(&Record::new().with("v", 32u8)).unwrap_err();
    assert!(matches!(err.root(), Error::Overflow { width: 5 }));
}

#[test]
fn struct_scalar_formats() {
    let rt = RecordType::build("scalars")
        .byte_order(ByteOrder::BigEndian)
        .field("f", StructField::new(Format::Float))
        .field(
            "d",
            StructField::new(Format::Double).byte_order(ByteOrder::LittleEndian),
        )
        .field("h", StructField::new(Format::HalfFloat))
        .field("flag", StructField::new(Format::Bool))
        .field("c", StructField::new(Format::Char))
        .field("s", StructField::new(Format::Short))
        .finish()
        .unwrap();

    let record = Record::new()
        .with("f", 1.5f32)
        .with("d", -0.25f64)
        .with("h", 1.0f32)
        .with("flag", true)
        .with("c", &b"x"[..])
        .with("s", -2i16);
    let bytes = rt.to_bytes(&record).unwrap();
    assert_eq!(bytes.len(), 4 + 8 + 2 + 1 + 1 + 2);
    // Half floats use the usual binary16 layout.
    assert_eq!(&bytes[12..14], &[0x3C, 0x00]);

    let (parsed, _) = rt.parse_bytes(&bytes).unwrap();
    assert_eq!(parsed.get("f"), record.get("f"));
    assert_eq!(parsed.get("d"), record.get("d"));
    assert_eq!(parsed.get("h"), record.get("h"));
    assert_eq!(parsed.get("flag"), Some(&Value::Boolean(true)));
    assert_eq!(parsed.get("c"), Some(&Value::Bytes(b"x".to_vec())));
    assert_eq!(parsed.get("s"), Some(&Value::SignedInteger(-2)));
}

#[test]
fn struct_repeat_yields_a_list() {
    let rt = RecordType::build("tuple")
        .byte_order(ByteOrder::BigEndian)
        .field("v", StructField::new(Format::UnsignedShort).repeat(3))
        .finish()
        .unwrap();

    let (record, _) = rt
        .parse_bytes(&[0x00, 0x01, 0x00, 0x02, 0x00, 0x03])
        .unwrap();
    assert_eq!(
        record.get("v"),
        Some(&Value::List(vec![
            Value::UnsignedInteger(1),
            Value::UnsignedInteger(2),
            Value::UnsignedInteger(3),
        ]))
    );
    assert_eq!(
        rt.to_bytes(&record).unwrap(),
        [0x00, 0x01, 0x00, 0x02, 0x00, 0x03]
    );
}

#[test]
fn nested_structure_with_length_cap() {
    let inner = RecordType::build("inner")
        .field("a", IntegerField::new(1))
        .field("b", IntegerField::new(1))
        .finish()
        .unwrap();
    let rt = RecordType::build("outer")
        .field(
            "hdr",
            StructureField::new(inner).length(Dynamic::Literal(4)),
        )
        .field("tag", IntegerField::new(1))
        .finish()
        .unwrap();

    // The capped region is fully consumed; its unread tail is discarded.
    let (record, consumed) = rt.parse_bytes(&[0x01, 0x02, 0xAA, 0xBB, 0x07]).unwrap();
    assert_eq!(consumed, 5);
    assert_eq!(
        record.get("hdr"),
        Some(&Value::Record(
            Record::new().with("a", 1u8).with("b", 2u8)
        ))
    );
    assert_eq!(record.get("tag"), Some(&Value::UnsignedInteger(7)));

    // On write the nested record is zero-filled up to the cap.
    assert_eq!(rt.to_bytes(&record).unwrap(), [0x01, 0x02, 0x00, 0x00, 0x07]);
}

#[test]
fn nested_structure_overflowing_its_cap() {
    let inner = RecordType::build("inner")
        .field("a", IntegerField::new(1))
        .field("b", IntegerField::new(1))
        .finish()
        .unwrap();
    let rt = RecordType::build("outer")
        .field(
            "hdr",
            StructureField::new(inner).length(Dynamic::Literal(1)),
        )
        .finish()
        .unwrap();

    let err = rt.parse_bytes(&[0x01, 0x02]).unwrap_err();
    assert!(matches!(err.root(), Error::StreamExhausted));
    assert_eq!(err.path(), Some("outer.hdr.inner.b"));

    let err = rt
        .to_bytes(&Record::new().with(
            "hdr",
            Record::new().with("a", 1u8).with("b", 2u8),
        ))
        .unwrap_err();
    assert!(matches!(
        err.root(),
        Error::WriteOverflow {
            declared: 1,
            actual: 2
        }
    ));
}

#[test]
fn nested_record_sees_parent_context() {
    let inner = RecordType::build("body")
        .field(
            "opt",
            ConditionalField::new(IntegerField::new(1), Dynamic::field("flag")),
        )
        .finish()
        .unwrap();
    let rt = RecordType::build("outer")
        .field("flag", IntegerField::new(1))
        .field("body", StructureField::new(inner))
        .finish()
        .unwrap();

    let (record, consumed) = rt.parse_bytes(&[0x01, 0x2A]).unwrap();
    assert_eq!(consumed, 2);
    assert_eq!(
        record.get("body"),
        Some(&Value::Record(Record::new().with("opt", 0x2Au8)))
    );

    let (record, consumed) = rt.parse_bytes(&[0x00, 0x2A]).unwrap();
    assert_eq!(consumed, 1);
    assert_eq!(
        record.get("body"),
        Some(&Value::Record(Record::new().with("opt", Value::Absent)))
    );

    // Writing consults the same chained context.
    let bytes = rt
        .to_bytes(
            &Record::new()
                .with("flag", 0u8)
                .with("body", Record::new()),
        )
        .unwrap();
    assert_eq!(bytes, [0x00]);
}

#[test]
fn array_by_length_consumes_exactly() {
    let rt = RecordType::build("arr")
        .byte_order(ByteOrder::BigEndian)
        .field(
            "items",
            ArrayField::sized(IntegerField::new(2), Dynamic::Literal(6)),
        )
        .finish()
        .unwrap();

    let (record, _) = rt
        .parse_bytes(&[0x00, 0x01, 0x00, 0x02, 0x00, 0x03])
        .unwrap();
    assert_eq!(
        record.get("items"),
        Some(&Value::List(vec![
            Value::UnsignedInteger(1),
            Value::UnsignedInteger(2),
            Value::UnsignedInteger(3),
        ]))
    );

    // Five bytes cannot hold a whole number of two-byte elements.
    let bad = RecordType::build("arr")
        .byte_order(ByteOrder::BigEndian)
        .field(
            "items",
            ArrayField::sized(IntegerField::new(2), Dynamic::Literal(5)),
        )
        .finish()
        .unwrap();
    let err = bad
        .parse_bytes(&[0x00, 0x01, 0x00, 0x02, 0xFF])
        .unwrap_err();
    assert!(matches!(err.root(), Error::TrailingBytes(1)));
}

#[test]
fn array_by_length_write_bound() {
    let rt = RecordType::build("arr")
        .byte_order(ByteOrder::BigEndian)
        .field(
            "items",
            ArrayField::sized(IntegerField::new(2), Dynamic::Literal(6)),
        )
        .finish()
        .unwrap();

    let err = rt
        .to_bytes(&Record::new().with(
            "items",
            vec![Value::from(1u16), Value::from(2u16)],
        ))
        .unwrap_err();
    assert!(matches!(
        err.root(),
        Error::WriteUnderflow {
            declared: 6,
            actual: 4
        }
    ));
}

#[test]
fn unbounded_array_swallows_exhaustion_at_element_boundaries() {
    let element = RecordType::build("pair")
        .field("a", IntegerField::new(1))
        .field("b", IntegerField::new(1))
        .finish()
        .unwrap();
    let rt = RecordType::build("arr")
        .field(
            "items",
            ArrayField::sized(StructureField::new(element), Dynamic::Literal(-1)),
        )
        .finish()
        .unwrap();

    // Four bytes: two whole elements, then a clean end-of-stream.
    let (record, consumed) = rt.parse_bytes(&[1, 2, 3, 4]).unwrap();
    assert_eq!(consumed, 4);
    assert_eq!(record.get("items").and_then(Value::as_list).map(<[Value]>::len), Some(2));

    // Five bytes: the third element dies after its first sub-field, which
    // must propagate instead of ending the array.
    let err = rt.parse_bytes(&[1, 2, 3, 4, 5]).unwrap_err();
    assert!(matches!(err.root(), Error::StreamExhausted));
    assert_eq!(err.path(), Some("arr.items.pair.b"));
}

#[test]
fn conditional_truthiness() {
    // A single NUL byte is truthy; only the empty byte string is not.
    let rt = RecordType::build("cond")
        .field("tag", BytesField::sized(Dynamic::Literal(1)))
        .field(
            "body",
            ConditionalField::new(IntegerField::new(1), Dynamic::field("tag")),
        )
        .finish()
        .unwrap();
    let (record, consumed) = rt.parse_bytes(&[0x00, 0x2A]).unwrap();
    assert_eq!(consumed, 2);
    assert_eq!(record.get("body"), Some(&Value::UnsignedInteger(0x2A)));

    let rt = RecordType::build("cond")
        .field("tag", IntegerField::new(1))
        .field(
            "body",
            ConditionalField::new(IntegerField::new(1), Dynamic::field("tag")),
        )
        .finish()
        .unwrap();
    let (record, consumed) = rt.parse_bytes(&[0x00, 0x2A]).unwrap();
    assert_eq!(consumed, 1);
    assert_eq!(record.get("body"), Some(&Value::Absent));

    // A false condition writes nothing, even with a value supplied.
    let bytes = rt
        .to_bytes(&Record::new().with("tag", 0u8).with("body", 9u8))
        .unwrap();
    assert_eq!(bytes, [0x00]);
    let bytes = rt
        .to_bytes(&Record::new().with("tag", 1u8).with("body", 9u8))
        .unwrap();
    assert_eq!(bytes, [0x01, 0x09]);
}

#[test]
fn enum_unknown_values() {
    let strict = RecordType::build("e")
        .field(
            "v",
            EnumField::new(IntegerField::new(1), Enumeration::new([("A", 1), ("B", 2)])),
        )
        .finish()
        .unwrap();
    let err = strict.parse_bytes(&[0x03]).unwrap_err();
    assert!(matches!(err.root(), Error::EnumNotFound(_)));

    let open = RecordType::build("e")
        .field(
            "v",
            EnumField::new(
                IntegerField::new(1),
                Enumeration::new([("A", 1), ("B", 2)]).allow_unknown(),
            ),
        )
        .finish()
        .unwrap();
    let (record, _) = open.parse_bytes(&[0x03]).unwrap();
    assert_eq!(
        record.get("v"),
        Some(&Value::Enum(EnumValue {
            value: 3,
            label: None,
        }))
    );

    // Labels round-trip through write.
    let bytes = open.to_bytes(&Record::new().with("v", "B")).unwrap();
    assert_eq!(bytes, [0x02]);
}

#[test]
fn enum_flag_decomposition() {
    let rt = RecordType::build("perm")
        .field(
            "mode",
            EnumField::new(
                IntegerField::new(1),
                Enumeration::flags([("READ", 1), ("WRITE", 2), ("EXEC", 4)]),
            ),
        )
        .finish()
        .unwrap();

    let (record, _) = rt.parse_bytes(&[0x05]).unwrap();
    assert_eq!(
        record.get("mode"),
        Some(&Value::Flags(FlagsValue {
            bits: 5,
            labels: vec![
                Intern::new("READ".to_owned()),
                Intern::new("EXEC".to_owned()),
            ],
        }))
    );
    assert_eq!(rt.to_bytes(&record).unwrap(), [0x05]);

    // Leftover bits matched by no member are rejected.
    let err = rt.parse_bytes(&[0x09]).unwrap_err();
    assert!(matches!(err.root(), Error::EnumNotFound(_)));

    // A list of labels also serializes.
    let bytes = rt
        .to_bytes(&Record::new().with(
            "mode",
            vec![Value::from("READ"), Value::from("WRITE")],
        ))
        .unwrap();
    assert_eq!(bytes, [0x03]);
}

#[test]
fn switch_without_match() {
    let rt = RecordType::build("sw")
        .field("kind", IntegerField::new(1))
        .field(
            "body",
            SwitchField::new(Dynamic::field("kind"))
                .case(1u8, IntegerField::new(1)),
        )
        .finish()
        .unwrap();
    let err = rt.parse_bytes(&[0x09, 0x00]).unwrap_err();
    assert!(matches!(err.root(), Error::SwitchNoMatch(_)));

    let with_other = RecordType::build("sw")
        .field("kind", IntegerField::new(1))
        .field(
            "body",
            SwitchField::new(Dynamic::field("kind"))
                .case(1u8, IntegerField::new(1))
                .other(BytesField::to_end()),
        )
        .finish()
        .unwrap();
    let (record, _) = with_other.parse_bytes(&[0x09, 0x61, 0x62]).unwrap();
    assert_eq!(record.get("body"), Some(&Value::Bytes(b"ab".to_vec())));
}

#[test]
fn computed_attributes_and_defaults() {
    let rt = RecordType::build("computed")
        .field("version", IntegerField::new(1))
        .default_value(Dynamic::Literal(Value::UnsignedInteger(2)))
        .field(
            "data",
            BytesField::sized(Dynamic::with(|ctx| {
                // Twice the version, just to exercise the closure form.
                Ok(ctx.get("version")?.as_i64().unwrap_or(0) * 2)
            })),
        )
        .finish()
        .unwrap();

    let (record, consumed) = rt.parse_bytes(&[0x02, b'a', b'b', b'c', b'd']).unwrap();
    assert_eq!(consumed, 5);
    assert_eq!(record.get("data"), Some(&Value::Bytes(b"abcd".to_vec())));

    // The version field resolves from its declared default on write.
    let bytes = rt
        .to_bytes(&Record::new().with("data", &b"wxyz"[..]))
        .unwrap();
    assert_eq!(bytes, [0x02, b'w', b'x', b'y', b'z']);
    assert_eq!(
        rt.value_of(&Record::new(), "version").unwrap(),
        Value::UnsignedInteger(2)
    );
}

#[test]
fn explicit_override_beats_auto_override() {
    // The length field stores a byte count *including itself*; the explicit
    // override keeps the auto-override from being installed.
    let rt = RecordType::build("framed")
        .field("len", IntegerField::new(1))
        .override_with(|ctx, _| {
            let body = ctx.get("body")?;
            let body_len = body.as_bytes().map(<[u8]>::len).unwrap_or(0);
            Ok(Value::UnsignedInteger(body_len as u64 + 1))
        })
        .field("body", BytesField::sized(Dynamic::with(|ctx| {
            Ok(ctx.get("len")?.as_i64().unwrap_or(0) - 1)
        })))
        .finish()
        .unwrap();

    let bytes = rt
        .to_bytes(&Record::new().with("body", &b"abc"[..]))
        .unwrap();
    assert_eq!(bytes, [0x04, b'a', b'b', b'c']);

    let (record, _) = rt.parse_bytes(&bytes).unwrap();
    assert_eq!(record.get("body"), Some(&Value::Bytes(b"abc".to_vec())));
}

#[test]
fn strings_with_encodings() {
    let rt = RecordType::build("text")
        .field("len", IntegerField::new(1))
        .field(
            "name",
            StringField::sized(Dynamic::field("len")).encoding(TextEncoding::Latin1),
        )
        .finish()
        .unwrap();

    let bytes = rt
        .to_bytes(&Record::new().with("name", "café"))
        .unwrap();
    // Latin-1 encodes one byte per character, and the prefix measures the
    // encoded form.
    assert_eq!(bytes, [0x04, b'c', b'a', b'f', 0xE9]);
    let (record, _) = rt.parse_bytes(&bytes).unwrap();
    assert_eq!(record.get("name"), Some(&Value::String("café".into())));

    let strict_ascii = RecordType::build("text")
        .field(
            "name",
            StringField::terminated(b"\x00").encoding(TextEncoding::Ascii),
        )
        .finish()
        .unwrap();
    let err = strict_ascii
        .to_bytes(&Record::new().with("name", "café"))
        .unwrap_err();
    assert!(matches!(err.root(), Error::Encoding { .. }));
}
