use bytes::Bytes;
use serde_json::json;
use turnstone::codec::payload::{PayloadExtractor, DEFAULT_MAX_STREAM_BYTES};
use turnstone::error::Error;
use turnstone::protocol::Segment;

fn descriptor_segment() -> Segment {
    Segment::Json(json!({
        "id": "object/1",
        "attributes": {
            "datacite": {
                "identifiers": [{ "identifier": "object/1", "identifierType": "Handle" }],
                "titles": [{ "title": "first object" }]
            }
        }
    }))
}

fn stream_header(id: &str) -> Segment {
    Segment::Json(json!({ "id": id }))
}

#[test]
fn parses_object_descriptor_from_first_segment() {
    let extractor = PayloadExtractor::default();
    let input = vec![descriptor_segment()];

    let object = extractor
        .extract_object(&input)
        .expect("extract object")
        .expect("object present");
    assert_eq!(object.id.as_deref(), Some("object/1"));

    let metadata = extractor
        .extract_metadata(&input)
        .expect("extract metadata")
        .expect("metadata present");
    assert_eq!(metadata.primary_identifier(), Some("object/1"));
    assert_eq!(metadata.titles[0].title, "first object");
}

#[test]
fn empty_input_means_no_object() {
    let extractor = PayloadExtractor::default();
    assert!(extractor.extract_object(&[]).expect("extract").is_none());
    assert!(extractor.extract_metadata(&[]).expect("extract").is_none());
    assert!(extractor.extract_streams(&[]).expect("extract").is_empty());
}

#[test]
fn binary_first_segment_is_rejected() {
    let extractor = PayloadExtractor::default();
    let input = vec![Segment::Bytes(Bytes::from_static(b"raw"))];

    let err = extractor.extract_object(&input).unwrap_err();
    assert!(matches!(err, Error::MalformedMessage(_)));
}

#[test]
fn descriptor_that_is_not_an_object_is_rejected() {
    let extractor = PayloadExtractor::default();
    let input = vec![Segment::Json(json!(["not", "an", "object"]))];

    let err = extractor.extract_object(&input).unwrap_err();
    assert!(matches!(err, Error::MalformedMessage(_)));
}

#[test]
fn collects_streams_as_label_content_pairs() {
    let extractor = PayloadExtractor::default();
    let input = vec![
        descriptor_segment(),
        stream_header("payload"),
        Segment::Bytes(Bytes::from_static(b"first")),
        stream_header("thumbnail"),
        Segment::Bytes(Bytes::from_static(b"second")),
    ];

    let streams = extractor.extract_streams(&input).expect("extract streams");
    assert_eq!(streams.len(), 2);
    assert_eq!(streams["payload"], Bytes::from_static(b"first"));
    assert_eq!(streams["thumbnail"], Bytes::from_static(b"second"));
}

#[test]
fn duplicate_stream_label_keeps_the_last_content() {
    let extractor = PayloadExtractor::default();
    let input = vec![
        descriptor_segment(),
        stream_header("payload"),
        Segment::Bytes(Bytes::from_static(b"old")),
        stream_header("payload"),
        Segment::Bytes(Bytes::from_static(b"new")),
    ];

    let streams = extractor.extract_streams(&input).expect("extract streams");
    assert_eq!(streams.len(), 1);
    assert_eq!(streams["payload"], Bytes::from_static(b"new"));
}

#[test]
fn stream_without_binary_segment_is_rejected() {
    let extractor = PayloadExtractor::default();
    let input = vec![descriptor_segment(), stream_header("payload")];

    let err = extractor.extract_streams(&input).unwrap_err();
    match err {
        Error::MalformedMessage(message) => assert!(message.contains("payload")),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn stream_header_without_id_is_rejected() {
    let extractor = PayloadExtractor::default();
    let input = vec![
        descriptor_segment(),
        Segment::Json(json!({ "name": "payload" })),
        Segment::Bytes(Bytes::from_static(b"data")),
    ];

    let err = extractor.extract_streams(&input).unwrap_err();
    assert!(matches!(err, Error::MalformedMessage(_)));
}

#[test]
fn stream_at_exactly_the_cap_is_accepted() {
    let extractor = PayloadExtractor::new(8);
    let input = vec![
        descriptor_segment(),
        stream_header("payload"),
        Segment::Bytes(Bytes::from(vec![0u8; 8])),
    ];

    let streams = extractor.extract_streams(&input).expect("extract streams");
    assert_eq!(streams["payload"].len(), 8);
}

#[test]
fn stream_over_the_cap_is_rejected() {
    let extractor = PayloadExtractor::new(8);
    let input = vec![
        descriptor_segment(),
        stream_header("payload"),
        Segment::Bytes(Bytes::from(vec![0u8; 9])),
    ];

    let err = extractor.extract_streams(&input).unwrap_err();
    match err {
        Error::MalformedMessage(message) => assert!(message.contains("8 byte limit")),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn default_extractor_uses_the_stock_cap() {
    let extractor = PayloadExtractor::default();
    assert_eq!(extractor.max_stream_bytes(), DEFAULT_MAX_STREAM_BYTES);
}
