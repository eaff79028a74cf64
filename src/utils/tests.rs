use super::BrokerError;
use super::logging;

#[test]
fn logging_init_accepts_levels() {
    // Should not panic
    logging::init("info");
    logging::init("debug");
    logging::init("bogus");
}

#[test]
fn error_codes_match_variant_names() {
    let err = BrokerError::DeviceNotFound {
        client_id: "c1".into(),
        device_id: "d9".into(),
    };
    assert_eq!(err.code(), "DeviceNotFound");
    assert_eq!(err.error_type(), "ClientOffline");
    assert!(err.to_string().contains("d9"));

    assert_eq!(
        BrokerError::DuplicateRequest("u1".into()).code(),
        "DuplicateRequest"
    );
    assert_eq!(BrokerError::SessionClosed("s".into()).error_type(), "Unavailable");
}
