//! Integration test entry point

mod crawl_tests;
