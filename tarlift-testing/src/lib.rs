//! Test support for `tarlift`: generated object corpora and verification of produced tar
//! archives.  Nothing here talks to a real object store; the archives under test live in byte
//! buffers.
pub mod logging;
pub mod tar;
pub mod test_data;

/// Test code that reports errors can just cheat and use `eyre`
pub type Result<T> = color_eyre::Result<T>;
