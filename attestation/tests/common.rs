#![allow(dead_code)]

use attestation::{
    quote::QuoteField,
    report_data::{FreshnessBinding, ReportData},
    tsm_report::{QuoteProvider, ReportClientError},
};
use hex_literal::hex;

pub(crate) const TEST_MRTD: [u8; 48] = hex!(
    "c68518a0ebb42136c12b2275164f8c72f25fa9a34392228687ed6e9caeb9c0f1dbd895e9cf475121c029dc47e70e91fd"
);
pub(crate) const TEST_RTMR2: [u8; 48] = hex!(
    "2e36d0b61a3a20c2dfbff70c96005ff3e1c7813b4abab452570330ddebabf939393099234abc0309f03936edebf74b1f"
);

pub(crate) const TEST_INTEGRITY_LOG: &str = "\
10 91f34b5c671d73504b274a919661cf80dab1e127 ima-ng sha1:0000000000000000000000000000000000000000 boot_aggregate
10 8b1f0e5c1b7d5a8c3f4e2a6b9d0c1e2f3a4b5c6d ima-ng sha256:6F3C0A0B /usr/bin/app
";

/// Nonce and timestamp of zero, peer key `0xAA` repeated.
pub(crate) fn test_binding() -> FreshnessBinding {
    FreshnessBinding::new([0u8; 32], 0, [0xAA; 32])
}

/// A quote-shaped buffer with the given MRTD, RTMR2 and report data. All other bytes are zero.
pub(crate) fn synthetic_quote(mrtd: &[u8; 48], rtmr2: &[u8; 48], report_data: &ReportData) -> Vec<u8> {
    let mut bytes = vec![0u8; 1024];
    write_field(&mut bytes, QuoteField::Mrtd, mrtd);
    write_field(&mut bytes, QuoteField::Rtmr(2), rtmr2);
    write_field(&mut bytes, QuoteField::ReportData, report_data.as_ref());
    bytes
}

fn write_field(bytes: &mut [u8], field: QuoteField, value: &[u8]) {
    let span = field.span().unwrap();
    bytes[span.offset..span.end()].copy_from_slice(value);
}

/// Hands out a fixed artifact regardless of the requested report data.
pub(crate) struct StaticQuoteProvider(pub(crate) Vec<u8>);

impl QuoteProvider for StaticQuoteProvider {
    async fn get_quote(&self, _report_data: &[u8]) -> Result<Vec<u8>, ReportClientError> {
        Ok(self.0.clone())
    }
}
