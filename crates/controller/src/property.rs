//! Property descriptors, values and the reference set derived from them

use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};

use crate::id::ServiceId;

/// Describes one configurable property of a service implementation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyDescriptor {
    name: String,
    required: bool,
    identifies_service: bool,
}

impl PropertyDescriptor {
    /// An optional literal property.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            required: false,
            identifies_service: false,
        }
    }

    /// Marks the property as required.
    #[must_use]
    pub const fn required(mut self, required: bool) -> Self {
        self.required = required;
        self
    }

    /// Marks the property's value as the id of another service.
    #[must_use]
    pub const fn identifies_service(mut self, identifies_service: bool) -> Self {
        self.identifies_service = identifies_service;
        self
    }

    /// Property name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether a value must be set.
    #[must_use]
    pub const fn is_required(&self) -> bool {
        self.required
    }

    /// Whether the value is a service reference.
    #[must_use]
    pub const fn is_service_reference(&self) -> bool {
        self.identifies_service
    }
}

/// A stored property value.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PropertyValue {
    /// Plain text.
    Literal(String),
    /// Id of another service.
    ServiceRef(ServiceId),
}

impl PropertyValue {
    /// The raw value.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Literal(value) => value,
            Self::ServiceRef(id) => id.as_str(),
        }
    }

    /// The referenced service, for reference values.
    #[must_use]
    pub const fn service_id(&self) -> Option<&ServiceId> {
        match self {
            Self::Literal(_) => None,
            Self::ServiceRef(id) => Some(id),
        }
    }
}

/// Outgoing references gained and lost by an edit.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReferenceChange {
    /// Newly referenced services.
    pub added: Vec<ServiceId>,
    /// Services no longer referenced.
    pub removed: Vec<ServiceId>,
}

impl ReferenceChange {
    /// Whether the edit left the reference set unchanged.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Ordered property values of one service.
///
/// The reference set is recomputed on every edit, in property order, so it
/// never goes stale relative to the values.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PropertyStore {
    values: IndexMap<String, PropertyValue>,
    references: IndexSet<ServiceId>,
}

impl PropertyStore {
    /// An empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets `name` to `value`.
    ///
    /// The value is stored as a reference when the descriptor says so. An
    /// empty reference clears the property.
    pub fn set(
        &mut self,
        descriptor: Option<&PropertyDescriptor>,
        name: &str,
        value: String,
    ) -> ReferenceChange {
        let is_reference = descriptor.is_some_and(PropertyDescriptor::is_service_reference);

        if is_reference && value.trim().is_empty() {
            return self.remove(name);
        }

        let value = if is_reference {
            PropertyValue::ServiceRef(ServiceId::new(value))
        } else {
            PropertyValue::Literal(value)
        };
        self.values.insert(name.to_string(), value);

        self.recompute_references()
    }

    /// Clears `name`.
    pub fn remove(&mut self, name: &str) -> ReferenceChange {
        self.values.shift_remove(name);
        self.recompute_references()
    }

    /// Value of `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&PropertyValue> {
        self.values.get(name)
    }

    /// Values in the order they were first set.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &PropertyValue)> {
        self.values
            .iter()
            .map(|(name, value)| (name.as_str(), value))
    }

    /// Referenced services, in property order, without duplicates.
    #[must_use]
    pub const fn references(&self) -> &IndexSet<ServiceId> {
        &self.references
    }

    /// Number of set properties.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether no property is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    fn recompute_references(&mut self) -> ReferenceChange {
        let next: IndexSet<ServiceId> = self
            .values
            .values()
            .filter_map(PropertyValue::service_id)
            .cloned()
            .collect();

        let change = ReferenceChange {
            added: next
                .iter()
                .filter(|id| !self.references.contains(*id))
                .cloned()
                .collect(),
            removed: self
                .references
                .iter()
                .filter(|id| !next.contains(*id))
                .cloned()
                .collect(),
        };
        self.references = next;

        change
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reference(name: &str) -> PropertyDescriptor {
        PropertyDescriptor::new(name).identifies_service(true)
    }

    #[test]
    fn test_literal_values_are_not_references() {
        let mut store = PropertyStore::new();
        let change = store.set(None, "Url", "http://localhost".to_string());

        assert!(change.is_empty());
        assert!(store.references().is_empty());
        assert_eq!(
            store.get("Url"),
            Some(&PropertyValue::Literal("http://localhost".to_string()))
        );
    }

    #[test]
    fn test_references_follow_edits() {
        let first = reference("Other Service");
        let second = reference("Other Service 2");
        let mut store = PropertyStore::new();

        let change = store.set(Some(&first), first.name(), "2".to_string());
        assert_eq!(change.added, vec![ServiceId::from("2")]);

        store.set(Some(&second), second.name(), "4".to_string());
        assert_eq!(
            store.references().iter().collect::<Vec<_>>(),
            vec![&ServiceId::from("2"), &ServiceId::from("4")]
        );

        let change = store.set(Some(&first), first.name(), "3".to_string());
        assert_eq!(change.added, vec![ServiceId::from("3")]);
        assert_eq!(change.removed, vec![ServiceId::from("2")]);

        // insertion position of the property is kept
        assert_eq!(
            store.references().iter().collect::<Vec<_>>(),
            vec![&ServiceId::from("3"), &ServiceId::from("4")]
        );
    }

    #[test]
    fn test_duplicate_references_are_collapsed() {
        let first = reference("Other Service");
        let second = reference("Other Service 2");
        let mut store = PropertyStore::new();
        store.set(Some(&first), first.name(), "2".to_string());

        let change = store.set(Some(&second), second.name(), "2".to_string());
        assert!(change.is_empty());
        assert_eq!(store.references().len(), 1);

        let change = store.remove(first.name());
        assert!(change.is_empty());
        assert_eq!(store.references().len(), 1);

        let change = store.remove(second.name());
        assert_eq!(change.removed, vec![ServiceId::from("2")]);
    }

    #[test]
    fn test_empty_reference_clears_property() {
        let descriptor = reference("Other Service");
        let mut store = PropertyStore::new();
        store.set(Some(&descriptor), descriptor.name(), "2".to_string());

        let change = store.set(Some(&descriptor), descriptor.name(), "  ".to_string());

        assert_eq!(change.removed, vec![ServiceId::from("2")]);
        assert!(store.is_empty());
    }
}
