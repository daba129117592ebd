//! Unit tests for `AppError` kinds and display text.

use tool_bridge::models::ErrorPayload;
use tool_bridge::AppError;

#[test]
fn every_variant_has_a_stable_kind() {
    let cases = [
        (AppError::InvalidArguments("x".into()), "invalid_arguments"),
        (AppError::UnknownTool("x".into()), "unknown_tool"),
        (AppError::DuplicateRequestId("x".into()), "duplicate_request_id"),
        (AppError::Timeout("x".into()), "timeout"),
        (AppError::Cancelled("x".into()), "cancelled"),
        (AppError::Transport("x".into()), "transport_error"),
        (AppError::BatchTooLarge { len: 26, max: 25 }, "batch_too_large"),
        (AppError::InvalidBatch("x".into()), "invalid_batch"),
        (AppError::Overloaded("x".into()), "overloaded"),
        (AppError::Unauthorized("x".into()), "unauthorized"),
        (AppError::RateLimited("x".into()), "rate_limited"),
        (AppError::MissingGatewayKey("x".into()), "missing_gateway_key"),
        (AppError::Codec("x".into()), "codec_error"),
        (AppError::Config("x".into()), "config_error"),
        (AppError::Io("x".into()), "io_error"),
    ];

    for (err, kind) in cases {
        assert_eq!(err.kind(), kind, "wrong kind for {err:?}");
    }
}

#[test]
fn remote_error_keeps_executor_kind() {
    let err = AppError::Remote {
        kind: "not_found".into(),
        message: "no such file".into(),
    };
    assert_eq!(err.kind(), "not_found");
    assert_eq!(err.to_string(), "remote not_found: no such file");
}

#[test]
fn display_prefixes_the_category() {
    assert_eq!(AppError::Timeout("slow".into()).to_string(), "timeout: slow");
    assert_eq!(
        AppError::UnknownTool("frobnicate".into()).to_string(),
        "unknown tool: frobnicate"
    );
    assert_eq!(
        AppError::BatchTooLarge { len: 26, max: 25 }.to_string(),
        "batch too large: 26 entries, maximum is 25"
    );
}

/// The structured payload carries the message without the display prefix.
#[test]
fn payload_uses_kind_and_bare_message() {
    let payload = ErrorPayload::from(&AppError::Cancelled("caller went away".into()));
    assert_eq!(payload, ErrorPayload::new("cancelled", "caller went away"));
}

#[test]
fn toml_errors_convert_to_config() {
    let err: AppError = toml::from_str::<toml::Value>("= broken")
        .expect_err("invalid toml")
        .into();
    assert_eq!(err.kind(), "config_error");
}
