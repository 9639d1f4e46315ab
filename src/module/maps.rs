//! Module tree map types and path helpers
//!
//! Children, parameters and buffers are kept in insertion-ordered maps so
//! traversal order always matches declaration order.

use indexmap::IndexMap;

use crate::tensor::Tensor;

use super::node::Module;

/// Type alias for child map: local name → owned child (order preserved)
pub type ChildMap = IndexMap<String, Module>;

/// Type alias for tensor map: local name → parameter or buffer (order preserved)
pub type TensorMap = IndexMap<String, Tensor>;

/// Separator between path segments
pub const PATH_SEPARATOR: char = '.';

/// Join a prefix and a local name into a dotted path
pub fn join_path(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}{PATH_SEPARATOR}{name}")
    }
}

/// Split `a.b.c` into (`a.b`, `c`)
pub fn split_last(path: &str) -> (&str, &str) {
    path.rsplit_once(PATH_SEPARATOR).unwrap_or(("", path))
}

/// Whether `path` is `prefix` itself or lies below it
pub fn is_under(path: &str, prefix: &str) -> bool {
    if prefix.is_empty() {
        return true;
    }
    path == prefix
        || (path.starts_with(prefix)
            && path[prefix.len()..].starts_with(PATH_SEPARATOR))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_path() {
        assert_eq!(join_path("", "encoder"), "encoder");
        assert_eq!(join_path("encoder", "layer"), "encoder.layer");
    }

    #[test]
    fn test_split_last() {
        assert_eq!(split_last("encoder.layer.0.weight"), ("encoder.layer.0", "weight"));
        assert_eq!(split_last("weight"), ("", "weight"));
    }

    #[test]
    fn test_is_under() {
        assert!(is_under("encoder.layer.0", "encoder"));
        assert!(is_under("encoder", "encoder"));
        assert!(!is_under("encoder_out", "encoder"));
        assert!(is_under("anything", ""));
    }
}
