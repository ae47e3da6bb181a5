//! In-memory document tree.
//!
//! A document is a single ordered tree of [`Element`]s and text leaves. Steps
//! mutate it in place; ownership of the tree makes relocation a plain
//! remove-then-insert, so a node can never have two parents.
//!
//! ## Serialization Format
//!
//! Elements serialize as `{"name", "attributes", "children"}` objects and text
//! leaves as bare JSON strings. Attribute order is preserved. Empty
//! `attributes`/`children` are omitted. This is the exchange format used by the
//! CLI in place of the XML parser/serializer.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::MigrateError;

/// Name of the root attribute that declares the document's schema version.
pub const SCHEMA_VERSION_ATTR: &str = "schemaVersion";

/// Name of the root attribute pointing at the schema file for the declared version.
pub const SCHEMA_LOCATION_ATTR: &str = "xsi:noNamespaceSchemaLocation";

/// A child of an [`Element`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Node {
    Text(String),
    Element(Element),
}

impl Node {
    pub fn as_element(&self) -> Option<&Element> {
        match self {
            Node::Element(e) => Some(e),
            Node::Text(_) => None,
        }
    }

    pub fn as_element_mut(&mut self) -> Option<&mut Element> {
        match self {
            Node::Element(e) => Some(e),
            Node::Text(_) => None,
        }
    }

    fn is_element_named(&self, name: &str) -> bool {
        matches!(self, Node::Element(e) if e.name == name)
    }
}

impl From<Element> for Node {
    fn from(element: Element) -> Self {
        Node::Element(element)
    }
}

/// A named node with ordered attributes and ordered children.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Element {
    pub name: String,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub attributes: IndexMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<Node>,
}

impl Element {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Builder-style attribute setter.
    pub fn with_attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_attr(name, value);
        self
    }

    /// Builder-style child append.
    pub fn with_child(mut self, child: Element) -> Self {
        self.append(child);
        self
    }

    /// Builder-style text content.
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.set_text(text);
        self
    }

    // -----------------------------------------------------------------------
    // Attributes
    // -----------------------------------------------------------------------

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    pub fn has_attr(&self, name: &str) -> bool {
        self.attributes.contains_key(name)
    }

    /// Set an attribute. An existing attribute keeps its position.
    pub fn set_attr(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.attributes.insert(name.into(), value.into());
    }

    /// Remove an attribute, keeping the order of the remaining ones.
    pub fn remove_attr(&mut self, name: &str) -> Option<String> {
        self.attributes.shift_remove(name)
    }

    /// Rename an attribute in place. Returns `false` when it was absent.
    pub fn rename_attr(&mut self, from: &str, to: &str) -> bool {
        match self.attributes.get_index_of(from) {
            Some(index) => {
                let value = self.attributes.shift_remove_index(index).map(|(_, v)| v);
                if let Some(value) = value {
                    self.attributes.shift_insert(index, to.to_string(), value);
                }
                true
            }
            None => false,
        }
    }

    // -----------------------------------------------------------------------
    // Children
    // -----------------------------------------------------------------------

    pub fn append(&mut self, child: Element) {
        self.children.push(Node::Element(child));
    }

    /// Insert `child` at node index `index` (clamped to the end).
    pub fn insert(&mut self, index: usize, child: Element) {
        let index = index.min(self.children.len());
        self.children.insert(index, Node::Element(child));
    }

    /// Insert `child` before the first direct child named `before`, or append
    /// when there is none.
    pub fn insert_before(&mut self, before: &str, child: Element) {
        match self.position(before) {
            Some(index) => self.insert(index, child),
            None => self.append(child),
        }
    }

    /// Node index of the first direct child element named `name`.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.children.iter().position(|n| n.is_element_named(name))
    }

    pub fn elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(Node::as_element)
    }

    pub fn elements_mut(&mut self) -> impl Iterator<Item = &mut Element> {
        self.children.iter_mut().filter_map(Node::as_element_mut)
    }

    /// Direct child elements named `name`, in document order.
    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Element> {
        self.elements().filter(move |e| e.name == name)
    }

    pub fn children_named_mut<'a>(
        &'a mut self,
        name: &'a str,
    ) -> impl Iterator<Item = &'a mut Element> {
        self.elements_mut().filter(move |e| e.name == name)
    }

    pub fn has_child(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    /// Detach every direct child element named `name`, in document order.
    pub fn take_children(&mut self, name: &str) -> Vec<Element> {
        let (taken, kept): (Vec<Node>, Vec<Node>) = std::mem::take(&mut self.children)
            .into_iter()
            .partition(|n| n.is_element_named(name));
        self.children = kept;
        taken
            .into_iter()
            .filter_map(|n| match n {
                Node::Element(e) => Some(e),
                Node::Text(_) => None,
            })
            .collect()
    }

    /// Detach the first direct child element named `name`.
    pub fn take_child(&mut self, name: &str) -> Option<Element> {
        let index = self.position(name)?;
        match self.children.remove(index) {
            Node::Element(e) => Some(e),
            Node::Text(_) => None,
        }
    }

    /// Detach every child element, leaving text leaves in place.
    pub fn take_elements(&mut self) -> Vec<Element> {
        let (elements, text): (Vec<Node>, Vec<Node>) = std::mem::take(&mut self.children)
            .into_iter()
            .partition(|n| matches!(n, Node::Element(_)));
        self.children = text;
        elements
            .into_iter()
            .filter_map(|n| match n {
                Node::Element(e) => Some(e),
                Node::Text(_) => None,
            })
            .collect()
    }

    // -----------------------------------------------------------------------
    // Descendants
    // -----------------------------------------------------------------------

    /// First descendant element named `name` in document order (excluding self).
    pub fn find(&self, name: &str) -> Option<&Element> {
        for child in self.elements() {
            if child.name == name {
                return Some(child);
            }
            if let Some(found) = child.find(name) {
                return Some(found);
            }
        }
        None
    }

    pub fn find_mut(&mut self, name: &str) -> Option<&mut Element> {
        for child in self.elements_mut() {
            if child.name == name {
                return Some(child);
            }
            if let Some(found) = child.find_mut(name) {
                return Some(found);
            }
        }
        None
    }

    /// All descendant elements named `name` in document order (excluding self).
    pub fn descendants<'a>(&'a self, name: &str) -> Vec<&'a Element> {
        let mut found = Vec::new();
        self.collect_descendants(name, &mut found);
        found
    }

    fn collect_descendants<'a>(&'a self, name: &str, found: &mut Vec<&'a Element>) {
        for child in self.elements() {
            if child.name == name {
                found.push(child);
            }
            child.collect_descendants(name, found);
        }
    }

    pub fn count_descendants(&self, name: &str) -> usize {
        self.elements()
            .map(|c| usize::from(c.name == name) + c.count_descendants(name))
            .sum()
    }

    /// Apply `f` to every descendant element named `name`, in document order.
    ///
    /// A matching element is visited before its own descendants.
    pub fn for_each_descendant_mut(&mut self, name: &str, f: &mut impl FnMut(&mut Element)) {
        for child in self.elements_mut() {
            if child.name == name {
                f(child);
            }
            child.for_each_descendant_mut(name, f);
        }
    }

    /// Fallible [`Element::for_each_descendant_mut`]; stops at the first error.
    pub fn try_for_each_descendant_mut<E>(
        &mut self,
        name: &str,
        f: &mut impl FnMut(&mut Element) -> Result<(), E>,
    ) -> Result<(), E> {
        for child in self.elements_mut() {
            if child.name == name {
                f(child)?;
            }
            child.try_for_each_descendant_mut(name, f)?;
        }
        Ok(())
    }

    /// Apply `f` to every descendant element, in document order.
    pub fn for_each_element_mut(&mut self, f: &mut impl FnMut(&mut Element)) {
        for child in self.elements_mut() {
            f(child);
            child.for_each_element_mut(f);
        }
    }

    /// Detach every descendant element named `name`, in document order.
    ///
    /// A detached element keeps its own subtree; matches nested inside it are
    /// not detached separately.
    pub fn take_descendants(&mut self, name: &str) -> Vec<Element> {
        let mut taken = Vec::new();
        self.take_descendants_into(name, &mut taken);
        taken
    }

    fn take_descendants_into(&mut self, name: &str, taken: &mut Vec<Element>) {
        let children = std::mem::take(&mut self.children);
        for node in children {
            match node {
                Node::Element(e) if e.name == name => taken.push(e),
                Node::Element(mut e) => {
                    e.take_descendants_into(name, taken);
                    self.children.push(Node::Element(e));
                }
                text => self.children.push(text),
            }
        }
    }

    /// Detach the first descendant element named `name`.
    pub fn take_descendant(&mut self, name: &str) -> Option<Element> {
        if let Some(index) = self.position(name) {
            return match self.children.remove(index) {
                Node::Element(e) => Some(e),
                Node::Text(_) => None,
            };
        }
        self.elements_mut().find_map(|c| c.take_descendant(name))
    }

    // -----------------------------------------------------------------------
    // Text
    // -----------------------------------------------------------------------

    /// Concatenated text of all descendant text leaves.
    pub fn text(&self) -> String {
        let mut out = String::new();
        self.collect_text(&mut out);
        out
    }

    fn collect_text(&self, out: &mut String) {
        for child in &self.children {
            match child {
                Node::Text(t) => out.push_str(t),
                Node::Element(e) => e.collect_text(out),
            }
        }
    }

    /// Replace all children with a single text leaf (none when `text` is empty).
    pub fn set_text(&mut self, text: impl Into<String>) {
        let text = text.into();
        self.children.clear();
        if !text.is_empty() {
            self.children.push(Node::Text(text));
        }
    }
}

/// A scenario document: one root element carrying the schema version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Document {
    root: Element,
}

impl Document {
    pub fn new(root: Element) -> Self {
        Self { root }
    }

    /// Parse a document from its JSON exchange form.
    pub fn from_json_str(json: &str) -> Result<Self, MigrateError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json_string_pretty(&self) -> Result<String, MigrateError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn root(&self) -> &Element {
        &self.root
    }

    pub fn root_mut(&mut self) -> &mut Element {
        &mut self.root
    }

    pub fn into_root(self) -> Element {
        self.root
    }

    /// The declared schema version. A missing attribute means version 0.
    pub fn schema_version(&self) -> Result<u32, MigrateError> {
        match self.root.attr(SCHEMA_VERSION_ATTR) {
            None => Ok(0),
            Some(raw) => raw
                .trim()
                .parse()
                .map_err(|_| MigrateError::InvalidVersion {
                    value: raw.to_string(),
                }),
        }
    }

    pub fn set_schema_version(&mut self, version: u32) {
        self.root.set_attr(SCHEMA_VERSION_ATTR, version.to_string());
    }
}

impl From<Element> for Document {
    fn from(root: Element) -> Self {
        Self::new(root)
    }
}
