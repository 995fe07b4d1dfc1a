//! Dataset dimensions.

use std::collections::BTreeMap;

use crate::data_type::AttrValue;

/// The axis a dimension represents.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Default)]
pub enum Axis {
    /// A longitude-like axis.
    X,
    /// A latitude-like axis.
    Y,
    /// A vertical axis.
    Z,
    /// A time axis.
    T,
    /// No recognised axis.
    #[default]
    Unknown,
}

impl Axis {
    /// Classify a dimension name.
    #[must_use]
    pub fn classify(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "x" | "lon" | "longitude" => Self::X,
            "y" | "lat" | "latitude" => Self::Y,
            "z" | "lev" | "level" | "depth" | "height" => Self::Z,
            "t" | "time" => Self::T,
            _ => Self::Unknown,
        }
    }

    /// Classify from an `axis` attribute value, falling back to the name.
    #[must_use]
    pub fn classify_with_attribute(name: &str, axis_attribute: Option<&AttrValue>) -> Self {
        match axis_attribute.and_then(AttrValue::as_str) {
            Some(value) => match value.to_ascii_uppercase().as_str() {
                "X" => Self::X,
                "Y" => Self::Y,
                "Z" => Self::Z,
                "T" => Self::T,
                _ => Self::classify(name),
            },
            None => Self::classify(name),
        }
    }
}

/// A dataset dimension.
///
/// The length is fixed at creation, except for unlimited dimensions which grow monotonically
/// with writes.
#[derive(Clone, Debug, PartialEq)]
pub struct Dimension {
    name: String,
    /// Declared length, [`None`] for unlimited.
    declared: Option<u64>,
    current: u64,
    axis: Axis,
    attributes: BTreeMap<String, AttrValue>,
}

impl Dimension {
    /// Create a dimension with a declared `length`, unlimited if [`None`].
    #[must_use]
    pub fn new(name: &str, length: Option<u64>) -> Self {
        Self {
            name: name.to_string(),
            declared: length,
            current: length.unwrap_or(0),
            axis: Axis::classify(name),
            attributes: BTreeMap::new(),
        }
    }

    /// The name of the dimension.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The declared length, [`None`] for unlimited.
    #[must_use]
    pub fn declared_length(&self) -> Option<u64> {
        self.declared
    }

    /// Returns true if the dimension is unlimited.
    #[must_use]
    pub fn is_unlimited(&self) -> bool {
        self.declared.is_none()
    }

    /// The current length (the grown length for unlimited dimensions).
    #[must_use]
    pub fn len(&self) -> u64 {
        self.current
    }

    /// Returns true if the current length is zero.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.current == 0
    }

    /// Grow an unlimited dimension to at least `length`. No-op for fixed dimensions and
    /// shrinking lengths.
    pub fn grow_to(&mut self, length: u64) {
        if self.is_unlimited() {
            self.current = self.current.max(length);
        }
    }

    /// The axis classification of the dimension.
    #[must_use]
    pub fn axis(&self) -> Axis {
        self.axis
    }

    /// The attributes of the dimension.
    #[must_use]
    pub fn attributes(&self) -> &BTreeMap<String, AttrValue> {
        &self.attributes
    }

    /// Mutably borrow the attributes of the dimension.
    pub fn attributes_mut(&mut self) -> &mut BTreeMap<String, AttrValue> {
        &mut self.attributes
    }

    /// Reclassify the axis from the `axis` attribute, if set.
    pub fn reclassify_axis(&mut self) {
        self.axis = Axis::classify_with_attribute(&self.name, self.attributes.get("axis"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_names() {
        assert_eq!(Axis::classify("time"), Axis::T);
        assert_eq!(Axis::classify("T"), Axis::T);
        assert_eq!(Axis::classify("latitude"), Axis::Y);
        assert_eq!(Axis::classify("lon"), Axis::X);
        assert_eq!(Axis::classify("height"), Axis::Z);
        assert_eq!(Axis::classify("ensemble"), Axis::Unknown);
    }

    #[test]
    fn classify_attribute_overrides() {
        let axis = Axis::classify_with_attribute("ensemble", Some(&AttrValue::from("T")));
        assert_eq!(axis, Axis::T);
        let axis = Axis::classify_with_attribute("time", None);
        assert_eq!(axis, Axis::T);
    }

    #[test]
    fn unlimited_growth() {
        let mut dimension = Dimension::new("time", None);
        assert!(dimension.is_unlimited());
        assert_eq!(dimension.len(), 0);
        dimension.grow_to(5);
        dimension.grow_to(3);
        assert_eq!(dimension.len(), 5);

        let mut fixed = Dimension::new("x", Some(4));
        fixed.grow_to(10);
        assert_eq!(fixed.len(), 4);
    }
}
