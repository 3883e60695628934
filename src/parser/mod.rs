//! Email parsing: header blocks and MIME decomposition.

pub mod header;
pub mod mime;
