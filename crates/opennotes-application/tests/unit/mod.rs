//! Unit test aggregate for the application layer.

mod fakes;

mod audit_tests;
mod batch_jobs_tests;
mod bulk_scan_tests;
mod embedding_tests;
mod search_tests;
mod session_tests;
mod token_bucket_tests;
mod workflow_tests;
