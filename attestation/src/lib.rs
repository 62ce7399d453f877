pub mod attestation;
pub mod integrity_log;
pub mod measurements;
pub mod policy;
pub mod quote;
pub mod report_data;
pub mod tsm_report;
pub mod verdict;
