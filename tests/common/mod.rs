//! Common test utilities for ena-transfer integration tests

#[allow(dead_code)]
pub mod ftp_server;
#[allow(dead_code)]
pub mod webdav;

#[allow(unused_imports)]
pub use ftp_server::*;
#[allow(unused_imports)]
pub use webdav::*;
