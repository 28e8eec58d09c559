pub use serde_json::value::RawValue;

/// Data type of the `extras` attribute on all glTF objects.
///
/// The contents are not interpreted by the loader; the converter walks them
/// to report application-specific data as informational diagnostics.
pub type Extras = Option<Box<RawValue>>;

/// Returns the default value of `Extras`.
pub fn default() -> Extras {
    None
}
