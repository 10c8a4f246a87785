//! Key namespacing for the shared Redis keyspace.
//!
//! Every key is stored as `prefix ++ key`. The prefix is a plain byte prefix,
//! so distinct keys under the same prefix stay distinct.

/// Prepends `prefix` to `key`.
pub(crate) fn namespaced(prefix: &[u8], key: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(prefix.len() + key.len());
    out.extend_from_slice(prefix);
    out.extend_from_slice(key);
    out
}
