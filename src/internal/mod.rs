//! Internal implementation details of bank selection that are not part of the
//! public API.

pub(crate) mod applier;
