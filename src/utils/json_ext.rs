//! JSON serialization glue shared by persistence shapes.

/// Types that can round-trip through a JSON string with a module-chosen
/// error type. Persistence provides a blanket implementation for all its
/// serde-friendly shapes.
pub trait JsonSerializable<E>: Sized {
    fn to_json_string(&self) -> Result<String, E>;
    fn from_json_str(s: &str) -> Result<Self, E>;
}
