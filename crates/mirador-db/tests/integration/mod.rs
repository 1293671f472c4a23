mod common;
mod mirror_tests;
mod snapshot_store_tests;
