//! Integration test modules

mod channel_tests;
mod fetcher_tests;
mod support;
