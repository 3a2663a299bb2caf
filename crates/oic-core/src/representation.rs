use serde::{Deserialize, Serialize};

use crate::attributes::AttributeMap;
use crate::error::OicError;
use crate::query::is_valid_identifier;
use crate::value::{AttributeKind, AttributeValue};

/// Resource state snapshot: attributes plus uri, type/interface lists and
/// child representations.
///
/// Representations are plain values; cloning one yields a fully independent
/// copy, children included.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Representation {
    #[serde(rename = "href", default, skip_serializing_if = "String::is_empty")]
    uri: String,
    #[serde(rename = "rt", default, skip_serializing_if = "Vec::is_empty")]
    resource_types: Vec<String>,
    #[serde(rename = "if", default, skip_serializing_if = "Vec::is_empty")]
    interfaces: Vec<String>,
    #[serde(rename = "rep", default, skip_serializing_if = "AttributeMap::is_empty")]
    attributes: AttributeMap,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    children: Vec<Representation>,
}

fn validate_identifiers(list: &[String], what: &'static str) -> Result<(), OicError> {
    if list.iter().all(|entry| is_valid_identifier(entry)) {
        Ok(())
    } else {
        Err(OicError::InvalidParam(what))
    }
}

impl Representation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn set_uri(&mut self, uri: impl Into<String>) {
        self.uri = uri.into();
    }

    pub fn resource_types(&self) -> &[String] {
        &self.resource_types
    }

    /// Replaces the resource type list. An empty list is accepted.
    pub fn set_resource_types(&mut self, types: Vec<String>) -> Result<(), OicError> {
        validate_identifiers(&types, "resource type list")?;
        self.resource_types = types;
        Ok(())
    }

    pub fn add_resource_type(&mut self, resource_type: impl Into<String>) -> Result<(), OicError> {
        let resource_type = resource_type.into();
        if !is_valid_identifier(&resource_type) {
            return Err(OicError::InvalidParam("resource type"));
        }
        self.resource_types.push(resource_type);
        Ok(())
    }

    pub fn resource_interfaces(&self) -> &[String] {
        &self.interfaces
    }

    /// Replaces the interface list. An empty list is accepted.
    pub fn set_resource_interfaces(&mut self, interfaces: Vec<String>) -> Result<(), OicError> {
        validate_identifiers(&interfaces, "resource interface list")?;
        self.interfaces = interfaces;
        Ok(())
    }

    pub fn add_resource_interface(&mut self, interface: impl Into<String>) -> Result<(), OicError> {
        let interface = interface.into();
        if !is_valid_identifier(&interface) {
            return Err(OicError::InvalidParam("resource interface"));
        }
        self.interfaces.push(interface);
        Ok(())
    }

    pub fn children(&self) -> &[Representation] {
        &self.children
    }

    /// Appends a copy of `child`; later edits to the caller's value are not
    /// observed here.
    pub fn add_child(&mut self, child: &Representation) {
        self.children.push(child.clone());
    }

    pub fn set_children(&mut self, children: Vec<Representation>) {
        self.children = children;
    }

    pub fn clear_children(&mut self) {
        self.children.clear();
    }

    pub fn attributes(&self) -> &AttributeMap {
        &self.attributes
    }

    pub fn attributes_mut(&mut self) -> &mut AttributeMap {
        &mut self.attributes
    }

    pub fn set_value(&mut self, key: impl Into<String>, value: impl Into<AttributeValue>) {
        self.attributes.set(key, value);
    }

    pub fn get_value<T: AttributeKind>(&self, key: &str) -> Result<T, OicError> {
        self.attributes.get(key)
    }

    pub fn value(&self, key: &str) -> Option<&AttributeValue> {
        self.attributes.value(key)
    }

    pub fn remove(&mut self, key: &str) -> bool {
        self.attributes.remove(key)
    }

    pub fn has_attribute(&self, key: &str) -> bool {
        self.attributes.has_attribute(key)
    }

    pub fn is_null(&self, key: &str) -> bool {
        self.attributes.is_null(key)
    }

    pub fn set_null(&mut self, key: impl Into<String>) {
        self.attributes.set_null(key);
    }

    pub fn size(&self) -> usize {
        self.attributes.size()
    }

    pub fn value_to_string(&self, key: &str) -> String {
        self.attributes.value_to_string(key)
    }

    /// True when nothing would be serialized: no uri, types, interfaces,
    /// attributes or children.
    pub fn is_empty_data(&self) -> bool {
        self.uri.is_empty()
            && self.resource_types.is_empty()
            && self.interfaces.is_empty()
            && self.attributes.is_empty()
            && self.children.is_empty()
    }

    /// Deepest nesting of child or attribute representations below this one.
    pub fn nesting_depth(&self) -> usize {
        let from_children = self
            .children
            .iter()
            .map(|c| 1 + c.nesting_depth())
            .max()
            .unwrap_or(0);
        let from_attributes = self
            .attributes
            .iter()
            .map(|(_, v)| value_nesting_depth(v))
            .max()
            .unwrap_or(0);
        from_children.max(from_attributes)
    }
}

fn value_nesting_depth(value: &AttributeValue) -> usize {
    match value {
        AttributeValue::Representation(rep) => 1 + rep.nesting_depth(),
        AttributeValue::RepresentationArray(array) => {
            let mut deepest = 0;
            array.for_each_element(|rep| deepest = deepest.max(1 + rep.nesting_depth()));
            deepest
        }
        _ => 0,
    }
}
