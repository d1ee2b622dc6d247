/// Product record round trips through rendered images
use card_barcode_manager::{BarcodeCodec, BarcodeError, ProductRecord, RenderOptions, Symbology};
use tempfile::tempdir;

#[test]
fn test_record_round_trip_all_formats() {
    let codec = BarcodeCodec::default();
    let record = ProductRecord::new("P-100", "L42", "2026-12-31", "keep dry; 5\\C max");

    for symbology in Symbology::ALL {
        let png = codec.encode_record(&record, symbology).unwrap();
        assert_eq!(codec.decode_record(&png).unwrap(), record, "{symbology}");
    }
}

#[test]
fn test_round_trip_through_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("label.png");
    let codec = BarcodeCodec::new(RenderOptions {
        module_scale: 4,
        ..RenderOptions::default()
    });
    let record = ProductRecord::new("X1", "", "", "");

    let png = codec.encode_record(&record, Symbology::Pdf417).unwrap();
    codec.save(&path, &png).unwrap();

    let symbol = codec.load(&path).unwrap();
    assert_eq!(symbol.symbology, Some(Symbology::Pdf417));
    assert_eq!(ProductRecord::from_payload(&symbol.payload).unwrap(), record);
}

#[test]
fn test_legacy_json_label_decodes() {
    let codec = BarcodeCodec::default();
    let payload =
        r#"{"product_id":"P7","lot_number":"L7","expiration_date":"2025-06-30","notes":""}"#;
    let png = codec.encode(payload, Symbology::Qr).unwrap();

    assert_eq!(
        codec.decode_record(&png).unwrap(),
        ProductRecord::new("P7", "L7", "2025-06-30", "")
    );
}

#[test]
fn test_foreign_payload_is_rejected() {
    let codec = BarcodeCodec::default();
    let png = codec.encode("HELLO WORLD", Symbology::Qr).unwrap();
    assert!(matches!(codec.decode_record(&png), Err(BarcodeError::Decode(_))));
}

#[test]
fn test_save_into_missing_directory() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("missing").join("label.png");
    let codec = BarcodeCodec::default();
    let png = codec.encode("ID:1", Symbology::Code128).unwrap();

    assert!(matches!(
        codec.save(&path, &png),
        Err(BarcodeError::Save { .. })
    ));
}
