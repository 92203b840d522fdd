use bytefields::*;
use internment::Intern;
use pretty_assertions::assert_eq;
use test_log::test;

fn length_prefixed() -> RecordType {
    RecordType::build("frame")
        .field("len", IntegerField::new(1))
        .field("val", StringField::sized(Dynamic::field("len")))
        .finish()
        .unwrap()
}

#[test]
fn length_prefix_parse_and_round_trip() {
    let rt = length_prefixed();
    let bytes = [0x06, 0x31, 0x32, 0x33, 0x34, 0x35, 0x36];

    let (record, consumed) = rt.parse_bytes(&bytes).unwrap();
    assert_eq!(consumed, 7);
    assert_eq!(record.get("len"), Some(&Value::UnsignedInteger(6)));
    assert_eq!(record.get("val"), Some(&Value::String("123456".into())));

    assert_eq!(rt.to_bytes(&record).unwrap(), bytes);
}

#[test]
fn length_prefix_auto_populates_on_write() {
    let rt = length_prefixed();

    // No `len` supplied; the sibling reference installs it.
    let bytes = rt
        .to_bytes(&Record::new().with("val", "123456"))
        .unwrap();
    assert_eq!(bytes, [0x06, 0x31, 0x32, 0x33, 0x34, 0x35, 0x36]);

    // A stale `len` is replaced by the synthetic override.
    let bytes = rt
        .to_bytes(&Record::new().with("len", 99u8).with("val", "hi"))
        .unwrap();
    assert_eq!(bytes, [0x02, b'h', b'i']);
}

#[test]
fn two_terminated_fields() {
    let rt = RecordType::build("pair")
        .field("foo", StringField::terminated(b"\x00"))
        .field("bar", StringField::terminated(b"\r\n"))
        .finish()
        .unwrap();
    let bytes = [
        0x68, 0x65, 0x6c, 0x6c, 0x6f, 0x00, 0x77, 0x6f, 0x72, 0x6c, 0x64, 0x0d, 0x0a,
    ];

    let (record, consumed) = rt.parse_bytes(&bytes).unwrap();
    assert_eq!(consumed, bytes.len());
    assert_eq!(record.get("foo"), Some(&Value::String("hello".into())));
    assert_eq!(record.get("bar"), Some(&Value::String("world".into())));

    assert_eq!(rt.to_bytes(&record).unwrap(), bytes);
}

#[test]
fn array_by_sibling_count() {
    let rt = RecordType::build("list")
        .field("count", IntegerField::new(1))
        .field(
            "items",
            ArrayField::counted(
                StringField::terminated(b"\x00"),
                Dynamic::field("count"),
            ),
        )
        .finish()
        .unwrap();
    let bytes = [
        0x02, 0x68, 0x65, 0x6c, 0x6c, 0x6f, 0x00, 0x77, 0x6f, 0x72, 0x6c, 0x64, 0x00,
    ];

    let (record, _) = rt.parse_bytes(&bytes).unwrap();
    assert_eq!(record.get("count"), Some(&Value::UnsignedInteger(2)));
    assert_eq!(
        record.get("items"),
        Some(&Value::List(vec![
            Value::String("hello".into()),
            Value::String("world".into()),
        ]))
    );

    // Count auto-populates from the list length.
    let written = rt
        .to_bytes(&Record::new().with(
            "items",
            vec![Value::String("hello".into()), Value::String("world".into())],
        ))
        .unwrap();
    assert_eq!(written, bytes);
}

#[test]
fn bits_with_realign_then_bytes() {
    let rt = RecordType::build("mix")
        .field("foo", BitField::new(5).realign())
        .field("bar", BytesField::sized(Dynamic::Literal(1)))
        .finish()
        .unwrap();
    let bytes = [0xA8, 0xFF];

    let (record, consumed) = rt.parse_bytes(&bytes).unwrap();
    assert_eq!(consumed, 2);
    assert_eq!(record.get("foo"), Some(&Value::UnsignedInteger(21)));
    assert_eq!(record.get("bar"), Some(&Value::Bytes(vec![0xFF])));

    assert_eq!(rt.to_bytes(&record).unwrap(), bytes);
}

#[test]
fn switch_keyed_on_enum_sibling() {
    let rt = RecordType::build("message")
        .byte_order(ByteOrder::BigEndian)
        .field(
            "type",
            EnumField::new(IntegerField::new(1), Enumeration::new([("A", 1), ("B", 2)])),
        )
        .field(
            "body",
            SwitchField::new(Dynamic::field("type"))
                .case("A", IntegerField::new(2))
                .case("B", BytesField::sized(Dynamic::Literal(3))),
        )
        .finish()
        .unwrap();

    let (record, _) = rt.parse_bytes(&[0x02, 0x61, 0x62, 0x63]).unwrap();
    assert_eq!(
        record.get("type"),
        Some(&Value::Enum(EnumValue {
            value: 2,
            label: Some(Intern::new("B".to_owned())),
        }))
    );
    assert_eq!(record.get("body"), Some(&Value::Bytes(b"abc".to_vec())));
    assert_eq!(rt.to_bytes(&record).unwrap(), [0x02, 0x61, 0x62, 0x63]);

    // The other arm dispatches to a two-byte integer.
    let (record, _) = rt.parse_bytes(&[0x01, 0x12, 0x34]).unwrap();
    assert_eq!(record.get("body"), Some(&Value::UnsignedInteger(0x1234)));
    assert_eq!(rt.to_bytes(&record).unwrap(), [0x01, 0x12, 0x34]);
}

#[test]
fn vlq_round_trip() {
    let rt = RecordType::build("vlq")
        .field("n", VariableLengthQuantityField::new())
        .finish()
        .unwrap();

    let (record, consumed) = rt.parse_bytes(&[0x81, 0x00]).unwrap();
    assert_eq!(consumed, 2);
    assert_eq!(record.get("n"), Some(&Value::UnsignedInteger(128)));
    assert_eq!(
        rt.to_bytes(&Record::new().with("n", 128u32)).unwrap(),
        [0x81, 0x00]
    );

    for n in [0u64, 1, 127, 128, 300, 16383, 16384, u64::from(u32::MAX)] {
        let bytes = rt.to_bytes(&Record::new().with("n", n)).unwrap();
        let (parsed, _) = rt.parse_bytes(&bytes).unwrap();
        assert_eq!(parsed.get("n"), Some(&Value::UnsignedInteger(n)), "n = {n}");
    }
}

#[test]
fn composite_record_round_trips() {
    let inner = RecordType::build("coords")
        .byte_order(ByteOrder::LittleEndian)
        .field("x", StructField::new(Format::Float))
        .field("y", StructField::new(Format::Float))
        .finish()
        .unwrap();
    let rt = RecordType::build("entity")
        .byte_order(ByteOrder::BigEndian)
        .field("magic", MagicField::new(b"EN"))
        .field("id", IntegerField::new(4))
        .field("name", StringField::terminated(b"\x00"))
        .field("flags", BitField::new(8))
        .field("pos", StructureField::new(inner))
        .field(
            "tags",
            ArrayField::counted(VariableLengthQuantityField::new(), Dynamic::Literal(2)),
        )
        .finish()
        .unwrap();

    let record = Record::new()
        .with("id", 0xDEAD_BEEFu32)
        .with("name", "probe")
        .with("flags", 0b1010_0001u8)
        .with(
            "pos",
            Record::new().with("x", 1.5f32).with("y", -0.25f32),
        )
        .with("tags", vec![Value::from(7u8), Value::from(300u32)]);

    let bytes = rt.to_bytes(&record).unwrap();
    let (parsed, consumed) = rt.parse_bytes(&bytes).unwrap();
    assert_eq!(consumed, bytes.len());

    // The magic resolves from its default on write, so it shows up in the
    // parsed record but not the original.
    assert_eq!(parsed.get("magic"), Some(&Value::Bytes(b"EN".to_vec())));
    assert_eq!(parsed.get("id"), record.get("id"));
    assert_eq!(parsed.get("name"), record.get("name"));
    assert_eq!(parsed.get("flags"), record.get("flags"));
    assert_eq!(parsed.get("pos"), record.get("pos"));
    assert_eq!(parsed.get("tags"), record.get("tags"));

    // And a full second pass is byte-identical.
    assert_eq!(rt.to_bytes(&parsed).unwrap(), bytes);
}
