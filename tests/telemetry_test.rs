//! Integration tests for telemetry initialization and span helpers.

use claimsweep::model::{Kind, RequestId, WorkerId};

#[test]
fn telemetry_initializes_without_endpoint() {
    // Note: tracing subscriber can only be set once per process.
    // Using try_init() in the implementation avoids panics if another
    // test already initialized a subscriber.
    let config = claimsweep::telemetry::TelemetryConfig {
        endpoint: None,
        service_name: "claimsweep-test".to_string(),
        log_level: "debug".to_string(),
    };
    // This may return Err if a global subscriber was already set by
    // another test in this process; that is acceptable.
    let _guard = claimsweep::telemetry::init_telemetry(config);
}

#[test]
fn claim_span_records_group_and_outcome() {
    let span = claimsweep::telemetry::claim::start_claim_span(
        WorkerId::new(),
        RequestId(7),
        "sheet-1",
        Kind::Dependent,
    );
    claimsweep::telemetry::claim::record_group_size(&span, 3);
    claimsweep::telemetry::claim::record_state_transition(&span, "claiming", "executing");
    claimsweep::telemetry::claim::record_outcome(&span, "complete");
}
