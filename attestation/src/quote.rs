//! Fixed-offset field extraction from a TDX quote (v4/v5).
//!
//! Layout: a 48-byte quote header followed by the TD report body. Offsets below are absolute
//! offsets into the quote buffer. To learn more about the layout, see:
//! - https://download.01.org/intel-sgx/latest/dcap-latest/linux/docs/Intel_TDX_DCAP_Quoting_Library_API.pdf

use core::fmt;

use attestation_primitives::hash::MEASUREMENT_SIZE;
use thiserror::Error;

use crate::report_data::{REPORT_DATA_SIZE, ReportData};

const QUOTE_HEADER_SIZE: usize = 48;

const MRTD_OFFSET: usize = QUOTE_HEADER_SIZE + 136;
const RTMR0_OFFSET: usize = QUOTE_HEADER_SIZE + 328;
const REPORT_DATA_OFFSET: usize = QUOTE_HEADER_SIZE + 520;

/// Number of runtime measurement registers in a TD report.
pub const RUNTIME_REGISTER_COUNT: usize = 4;

// Compile-time assertions
const _: () = {
    assert!(
        RTMR0_OFFSET + RUNTIME_REGISTER_COUNT * MEASUREMENT_SIZE == REPORT_DATA_OFFSET,
        "Report data must directly follow RTMR3."
    );
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpan {
    pub offset: usize,
    pub width: usize,
}

impl FieldSpan {
    pub const fn end(&self) -> usize {
        self.offset + self.width
    }
}

/// Named fields of a quote that the verifier reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuoteField {
    Mrtd,
    Rtmr(u8),
    ReportData,
}

impl QuoteField {
    pub const RTMRS: [QuoteField; RUNTIME_REGISTER_COUNT] = [
        QuoteField::Rtmr(0),
        QuoteField::Rtmr(1),
        QuoteField::Rtmr(2),
        QuoteField::Rtmr(3),
    ];

    /// Returns the position of this field in the quote, or `None` for a register index that
    /// does not exist.
    pub const fn span(self) -> Option<FieldSpan> {
        match self {
            QuoteField::Mrtd => Some(FieldSpan {
                offset: MRTD_OFFSET,
                width: MEASUREMENT_SIZE,
            }),
            QuoteField::Rtmr(index) if (index as usize) < RUNTIME_REGISTER_COUNT => {
                Some(FieldSpan {
                    offset: RTMR0_OFFSET + index as usize * MEASUREMENT_SIZE,
                    width: MEASUREMENT_SIZE,
                })
            }
            QuoteField::Rtmr(_) => None,
            QuoteField::ReportData => Some(FieldSpan {
                offset: REPORT_DATA_OFFSET,
                width: REPORT_DATA_SIZE,
            }),
        }
    }
}

impl fmt::Display for QuoteField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QuoteField::Mrtd => f.write_str("MRTD"),
            QuoteField::Rtmr(index) => write!(f, "RTMR{index}"),
            QuoteField::ReportData => f.write_str("REPORTDATA"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QuoteError {
    #[error("artifact too small: {actual} bytes, {field} requires at least {required}")]
    ArtifactTooSmall {
        actual: usize,
        required: usize,
        field: QuoteField,
    },
    #[error("unknown quote field {0}")]
    UnknownField(QuoteField),
}

/// TEE Remote Attestation Quote as returned by the attestation interface. The bytes are
/// assumed to be signature-verified elsewhere; this type only reads fields out of them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Quote(Vec<u8>);

impl Quote {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn raw_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Bounds-checked read of a single field. Every extraction goes through here.
    pub fn field(&self, field: QuoteField) -> Result<&[u8], QuoteError> {
        let span = field.span().ok_or(QuoteError::UnknownField(field))?;
        self.0
            .get(span.offset..span.end())
            .ok_or(QuoteError::ArtifactTooSmall {
                actual: self.0.len(),
                required: span.end(),
                field,
            })
    }

    /// Like [`Quote::field`], copied into a fixed-width array.
    pub fn field_array<const N: usize>(&self, field: QuoteField) -> Result<[u8; N], QuoteError> {
        let bytes = self.field(field)?;
        // Table widths are constants, so a mismatch here is a programming error in the caller.
        bytes.try_into().map_err(|_| QuoteError::UnknownField(field))
    }

    pub fn report_data(&self) -> Result<ReportData, QuoteError> {
        self.field_array::<REPORT_DATA_SIZE>(QuoteField::ReportData)
            .map(ReportData::from)
    }
}

impl From<Vec<u8>> for Quote {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use rstest::rstest;

    /// Minimum quote length that covers every field the verifier reads.
    const FIELDS_END: usize = REPORT_DATA_OFFSET + REPORT_DATA_SIZE;

    #[test]
    fn test_offsets_match_td_report_layout() {
        assert_eq!(QuoteField::Mrtd.span().unwrap().offset, 184);
        assert_eq!(QuoteField::Rtmr(0).span().unwrap().offset, 376);
        assert_eq!(QuoteField::Rtmr(1).span().unwrap().offset, 424);
        assert_eq!(QuoteField::Rtmr(2).span().unwrap().offset, 472);
        assert_eq!(QuoteField::Rtmr(3).span().unwrap().offset, 520);
        assert_eq!(QuoteField::ReportData.span().unwrap().offset, 568);
        assert_eq!(FIELDS_END, 632);
    }

    #[test]
    fn test_unknown_register_has_no_span() {
        assert_eq!(QuoteField::Rtmr(4).span(), None);
        let quote = Quote::new(vec![0u8; FIELDS_END]);
        assert_eq!(
            quote.field(QuoteField::Rtmr(4)),
            Err(QuoteError::UnknownField(QuoteField::Rtmr(4)))
        );
    }

    #[test]
    fn test_field_reads_exact_bytes() {
        let mut bytes = vec![0u8; FIELDS_END];
        bytes[MRTD_OFFSET..MRTD_OFFSET + MEASUREMENT_SIZE].fill(0x11);
        let quote = Quote::new(bytes);

        assert_eq!(quote.field(QuoteField::Mrtd).unwrap(), &[0x11; 48]);
        assert_eq!(quote.field(QuoteField::Rtmr(0)).unwrap(), &[0u8; 48]);
    }

    #[rstest]
    #[case(QuoteField::Mrtd)]
    #[case(QuoteField::Rtmr(0))]
    #[case(QuoteField::Rtmr(1))]
    #[case(QuoteField::Rtmr(2))]
    #[case(QuoteField::Rtmr(3))]
    #[case(QuoteField::ReportData)]
    fn test_field_one_byte_short_is_rejected(#[case] field: QuoteField) {
        let span = field.span().unwrap();
        let quote = Quote::new(vec![0u8; span.end() - 1]);

        assert_matches!(
            quote.field(field),
            Err(QuoteError::ArtifactTooSmall { actual, required, .. })
                if actual == span.end() - 1 && required == span.end()
        );
    }

    #[test]
    fn test_field_exact_length_is_accepted() {
        let span = QuoteField::ReportData.span().unwrap();
        let quote = Quote::new(vec![0u8; span.end()]);
        quote.report_data().unwrap();
    }
}
