use pretty_assertions::assert_eq;
use serde::{Deserialize, Serialize};

use super::{
    de::Error as DeError,
    doc,
    from_bson,
    from_document,
    from_slice,
    oid::ObjectId,
    spec::BinarySubtype,
    to_bson,
    to_document,
    Binary,
    Bson,
    DateTime,
    DbPointer,
    Decimal128,
    Document,
    JavaScriptCodeWithScope,
    Regex,
    Timestamp,
};

fn round_trip(doc: &Document) -> Document {
    let bytes = doc.to_vec().unwrap();
    Document::from_reader(bytes.as_slice()).unwrap()
}

#[test]
fn codec_round_trips_every_type() {
    let doc = doc! {
        "double": 3.125,
        "string": "värld",
        "doc": { "nested": [1, 2] },
        "array": ["a", 1, true],
        "binary": Binary { subtype: BinarySubtype::Generic, bytes: vec![1, 2, 3] },
        "uuid": Binary { subtype: BinarySubtype::Uuid, bytes: vec![0; 16] },
        "user_defined": Binary { subtype: BinarySubtype::UserDefined(0x81), bytes: vec![9] },
        "old_binary": Binary { subtype: BinarySubtype::BinaryOld, bytes: vec![4, 5] },
        "oid": ObjectId::parse_str("1d2045f46577e41c3d1815d7").unwrap(),
        "bool": true,
        "datetime": DateTime::from_millis(1_500_000_000_000),
        "null": null,
        "regex": Regex { pattern: "^a.*b$".into(), options: "i".into() },
        "code": Bson::JavaScriptCode("function() {}".into()),
        "code_w_scope": JavaScriptCodeWithScope {
            code: "function(x) { return x + y; }".into(),
            scope: doc! { "y": 1 },
        },
        "int32": 42i32,
        "timestamp": Timestamp { time: 123, increment: 456 },
        "int64": 42i64,
        "decimal": "1.5".parse::<Decimal128>().unwrap(),
        "min_key": Bson::MinKey,
        "max_key": Bson::MaxKey,
    };

    assert_eq!(round_trip(&doc), doc);
}

#[test]
fn codec_round_trips_decode_only_types() {
    // Undefined, Symbol and DbPointer cannot be produced by user code paths
    // but must survive decode -> encode -> decode.
    let doc = doc! {
        "undefined": Bson::Undefined,
        "symbol": Bson::Symbol("sym".into()),
        "db_pointer": Bson::DbPointer(DbPointer {
            namespace: "db.coll".into(),
            id: ObjectId::new(),
        }),
    };

    assert_eq!(round_trip(&doc), doc);
}

#[test]
fn float_special_values() {
    let doc = doc! {
        "nan": f64::NAN,
        "inf": f64::INFINITY,
        "neg_inf": f64::NEG_INFINITY,
        "neg_zero": -0.0f64,
    };
    let decoded = round_trip(&doc);

    let nan = decoded.get_f64("nan").unwrap();
    assert!(nan.is_nan());
    // NaN re-encodes to the canonical bit pattern
    assert_eq!(nan.to_bits(), f64::NAN.to_bits());
    assert_eq!(decoded.get_f64("inf").unwrap(), f64::INFINITY);
    assert_eq!(decoded.get_f64("neg_inf").unwrap(), f64::NEG_INFINITY);
    assert!(decoded.get_f64("neg_zero").unwrap().is_sign_negative());
}

#[test]
fn datetime_clamped_on_decode() {
    let doc = doc! { "dt": DateTime::from_millis(i64::MAX) };
    let decoded = round_trip(&doc);
    assert_eq!(decoded.get_datetime("dt").unwrap(), DateTime::MAX);
}

#[test]
fn key_order_preserved_through_codec() {
    let doc = doc! { "last_name": 1, "first_name": 1, "_id": 1, "zz": 1, "aa": 1 };
    let decoded = round_trip(&doc);
    let keys: Vec<_> = decoded.keys().cloned().collect();
    assert_eq!(keys, vec!["last_name", "first_name", "_id", "zz", "aa"]);
}

#[test]
fn rejects_bad_length_prefix() {
    let valid = doc! { "a": 1 }.to_vec().unwrap();

    let mut too_short = valid.clone();
    too_short[0..4].copy_from_slice(&3i32.to_le_bytes());
    assert!(Document::from_reader(too_short.as_slice()).is_err());

    let mut too_long = valid.clone();
    too_long[0..4].copy_from_slice(&((valid.len() + 10) as i32).to_le_bytes());
    assert!(Document::from_reader(too_long.as_slice()).is_err());
}

#[test]
fn rejects_missing_terminator() {
    let mut bytes = doc! { "a": 1 }.to_vec().unwrap();
    let len = bytes.len();
    bytes[len - 1] = 0x10;
    assert!(Document::from_reader(bytes.as_slice()).is_err());
}

#[test]
fn rejects_unknown_element_type() {
    let mut bytes = doc! { "a": 1 }.to_vec().unwrap();
    // corrupt the element tag for "a"
    bytes[4] = 0x77;
    assert!(matches!(
        Document::from_reader(bytes.as_slice()),
        Err(DeError::UnknownElementType(0x77))
    ));
}

#[test]
fn rejects_interior_nul_in_key() {
    let mut doc = Document::new();
    doc.insert("bad\0key", 1);
    assert!(doc.to_vec().is_err());
}

#[test]
fn serde_struct_round_trip() {
    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sub {
        y: Option<String>,
    }

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Data {
        _id: ObjectId,
        name: String,
        count: i64,
        ratio: f64,
        enabled: bool,
        tags: Vec<String>,
        sub: Sub,
        #[serde(skip_serializing_if = "Option::is_none")]
        missing: Option<i32>,
        when: DateTime,
        ts: Timestamp,
    }

    let data = Data {
        _id: ObjectId::new(),
        name: "x".into(),
        count: 7,
        ratio: 0.5,
        enabled: false,
        tags: vec!["a".into(), "b".into()],
        sub: Sub { y: None },
        missing: None,
        when: DateTime::from_millis(1_600_000_000_000),
        ts: Timestamp { time: 1, increment: 2 },
    };

    let doc = to_document(&data).unwrap();
    assert_eq!(doc.get_object_id("_id").unwrap(), data._id);
    assert_eq!(doc.get_i64("count").unwrap(), 7);
    assert!(!doc.contains_key("missing"));

    let bytes = doc.to_vec().unwrap();
    let back: Data = from_slice(&bytes).unwrap();
    assert_eq!(back, data);
}

#[test]
fn serde_enum_round_trip() {
    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    enum Mode {
        Fast,
        Careful { retries: i32 },
        Custom(String),
    }

    for mode in [
        Mode::Fast,
        Mode::Careful { retries: 3 },
        Mode::Custom("x".into()),
    ] {
        let bson = to_bson(&mode).unwrap();
        let back: Mode = from_bson(bson).unwrap();
        assert_eq!(back, mode);
    }
}

#[test]
fn serde_numeric_widening() {
    #[derive(Debug, PartialEq, Deserialize)]
    struct Nums {
        a: i64,
        b: f64,
        c: u32,
    }

    // servers routinely reply with narrower numeric types than the struct
    let nums: Nums = from_document(doc! { "a": 5i32, "b": 2i32, "c": 9i32 }).unwrap();
    assert_eq!(
        nums,
        Nums {
            a: 5,
            b: 2.0,
            c: 9
        }
    );
}

#[test]
fn int64_not_coerced_to_int32() {
    let doc = doc! { "v": 5i64 };
    let decoded = round_trip(&doc);
    assert_eq!(decoded.get("v"), Some(&Bson::Int64(5)));
}

#[test]
fn to_document_rejects_non_map() {
    assert!(to_document(&5i32).is_err());
}

#[test]
fn decimal128_bit_exact_through_codec() {
    let values = ["0.1", "-1E-6176", "9999999999999999999999999999999999", "NaN"];
    for s in values {
        let d: Decimal128 = s.parse().unwrap();
        let decoded = round_trip(&doc! { "d": d });
        let back = match decoded.get("d") {
            Some(Bson::Decimal128(d)) => *d,
            other => panic!("expected decimal, got {:?}", other),
        };
        assert_eq!(back.bytes(), d.bytes());
    }
}
