//! Shared helpers for the integration test suite.

#![allow(dead_code)]

use serialhub::{DeviceInfo, MockHost, MockLink, PortSession, SelectionFilter, TransmissionParams};
use std::sync::Arc;
use std::sync::Once;

static TRACING: Once = Once::new();

/// Install a test subscriber once; `RUST_LOG` controls verbosity.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// A session over a mock host with one queued device.
pub fn session_with_device() -> (Arc<PortSession>, MockHost, MockLink) {
    init_tracing();
    let host = MockHost::new();
    let link = host.add_device();
    let session = Arc::new(PortSession::new(Arc::new(host.clone())));
    (session, host, link)
}

/// Identity record for a TI LaunchPad-style device, as used in the scenarios.
pub fn launchpad_info() -> DeviceInfo {
    DeviceInfo {
        serial_number: Some("08FF41E5".into()),
        manufacturer: Some("Texas Instruments".into()),
        vendor_id: Some(0x2047),
        product_id: Some(0x0013),
        product: Some("MSP Application UART".into()),
    }
}

/// Connect with wide-open selection and default parameters.
pub async fn connect_default(session: &PortSession) {
    session
        .connect(&SelectionFilter::any(), &TransmissionParams::default())
        .await
        .expect("connect");
}
