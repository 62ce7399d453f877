use attestation_primitives::hash::{InfrastructureMeasurement, MEASUREMENT_SIZE, RuntimeMeasurement};
use serde::{Deserialize, Serialize};

use crate::quote::{Quote, QuoteError, QuoteField, RUNTIME_REGISTER_COUNT};

/// Measurements read from a quote. To learn more about the registers, see:
/// - https://docs.phala.network/phala-cloud/tees-attestation-and-zero-trust-security/attestation#runtime-measurement-fields
/// - https://arxiv.org/pdf/2303.15540 (Section 9.1)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeasurementSet {
    /// MRTD (Measurement of Root of Trust for Data) - identifies the virtual firmware.
    pub infrastructure: InfrastructureMeasurement,
    /// RTMR0..RTMR3. RTMR0 typically measures the virtual firmware data and configuration,
    /// RTMR1 the OS kernel, boot parameters and initrd, RTMR2 the OS application and RTMR3 is
    /// left to the workload.
    pub runtime: [RuntimeMeasurement; RUNTIME_REGISTER_COUNT],
}

impl MeasurementSet {
    /// Extracts the MRTD and all four RTMRs. Fails as a whole if any field is out of bounds, so
    /// a partially populated set is never returned.
    pub fn extract(quote: &Quote) -> Result<Self, QuoteError> {
        let infrastructure = quote.field_array::<MEASUREMENT_SIZE>(QuoteField::Mrtd)?;

        let mut runtime = [[0u8; MEASUREMENT_SIZE]; RUNTIME_REGISTER_COUNT];
        for (register, field) in runtime.iter_mut().zip(QuoteField::RTMRS) {
            *register = quote.field_array::<MEASUREMENT_SIZE>(field)?;
        }

        Ok(Self {
            infrastructure: infrastructure.into(),
            runtime: runtime.map(RuntimeMeasurement::from),
        })
    }

    pub fn infrastructure_hex(&self) -> String {
        self.infrastructure.as_hex()
    }

    /// Normalized hex of RTMR`index`, or `None` for an index past RTMR3.
    pub fn runtime_hex(&self, index: usize) -> Option<String> {
        self.runtime.get(index).map(RuntimeMeasurement::as_hex)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    const QUOTE_LEN: usize = 632;

    fn quote_with_distinct_fields() -> Quote {
        let mut bytes = vec![0u8; QUOTE_LEN];
        let span = QuoteField::Mrtd.span().unwrap();
        bytes[span.offset..span.end()].fill(0xF0);
        for (index, field) in QuoteField::RTMRS.into_iter().enumerate() {
            let span = field.span().unwrap();
            bytes[span.offset..span.end()].fill(index as u8 + 1);
        }
        Quote::new(bytes)
    }

    #[test]
    fn test_extract_reads_every_register() {
        let set = MeasurementSet::extract(&quote_with_distinct_fields()).unwrap();

        assert_eq!(*set.infrastructure, [0xF0; 48]);
        for (index, register) in set.runtime.iter().enumerate() {
            assert_eq!(**register, [index as u8 + 1; 48]);
        }
        assert_eq!(set.infrastructure_hex(), "f0".repeat(48));
        assert_eq!(set.runtime_hex(3), Some("04".repeat(48)));
        assert_eq!(set.runtime_hex(4), None);
    }

    #[test]
    fn test_extract_is_deterministic() {
        let quote = quote_with_distinct_fields();
        assert_eq!(
            MeasurementSet::extract(&quote).unwrap(),
            MeasurementSet::extract(&quote).unwrap()
        );
    }

    #[test]
    fn test_extract_aborts_when_last_register_is_truncated() {
        let rtmr3_end = QuoteField::Rtmr(3).span().unwrap().end();
        let quote = Quote::new(vec![0u8; rtmr3_end - 1]);

        assert_matches!(
            MeasurementSet::extract(&quote),
            Err(QuoteError::ArtifactTooSmall {
                field: QuoteField::Rtmr(3),
                ..
            })
        );
    }

    #[test]
    fn test_extract_empty_artifact() {
        assert_matches!(
            MeasurementSet::extract(&Quote::new(Vec::new())),
            Err(QuoteError::ArtifactTooSmall {
                actual: 0,
                field: QuoteField::Mrtd,
                ..
            })
        );
    }
}
