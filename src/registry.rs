use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::error::{PddlError, Result};

/// Root of every type hierarchy. Untyped declarations resolve to it, and any
/// parent type that is never itself declared is registered directly under it.
pub const OBJECT_TYPE: &str = "object";

#[derive(Clone, Debug, Ord, PartialOrd, PartialEq, Eq)]
pub struct ObjectType {
    pub name: String,
    pub parent: Option<String>,
}

impl ObjectType {
    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    pub fn is_subtype(&self, other: &str, registry: &Registry) -> bool {
        registry.is_subtype(&self.name, other)
    }
}

#[derive(Clone, Debug, Ord, PartialOrd, PartialEq, Eq)]
pub struct Object {
    pub name: String,
    pub typ: String,
}

impl Object {
    pub fn new(name: &str, typ: &str) -> Self {
        Object {
            name: name.to_owned(),
            typ: typ.to_owned(),
        }
    }
}

impl fmt::Display for Object {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Symbol table for types and objects. Per-type object lists hold every
/// object whose type descends from that type, in declaration order.
#[derive(Clone, Debug, Ord, PartialOrd, PartialEq, Eq)]
pub struct Registry {
    types: BTreeMap<String, ObjectType>,
    objects: Vec<Object>,
    by_type: BTreeMap<String, Vec<Object>>,
}

impl Registry {
    pub fn new() -> Self {
        let mut types = BTreeMap::new();
        types.insert(
            OBJECT_TYPE.to_owned(),
            ObjectType {
                name: OBJECT_TYPE.to_owned(),
                parent: None,
            },
        );
        let mut by_type = BTreeMap::new();
        by_type.insert(OBJECT_TYPE.to_owned(), Vec::new());
        Registry {
            types,
            objects: Vec::new(),
            by_type,
        }
    }

    /// Installs a batch of `(name, parent)` declarations. A `None` parent
    /// means the root type.
    pub fn declare_types(&mut self, declarations: &[(String, Option<String>)]) -> Result<()> {
        let mut explicit = BTreeSet::new();
        for (name, parent) in declarations.iter() {
            if name == OBJECT_TYPE {
                if parent.as_deref().map_or(false, |p| p != OBJECT_TYPE) {
                    return Err(PddlError::InvalidArgument(format!(
                        "root type {OBJECT_TYPE} cannot have parent {}",
                        parent.as_deref().unwrap_or("")
                    )));
                }
                continue;
            }
            if !explicit.insert(name.clone()) {
                return Err(PddlError::InvalidArgument(format!(
                    "type {name} declared twice"
                )));
            }
            let parent = parent.clone().unwrap_or_else(|| OBJECT_TYPE.to_owned());
            self.types.insert(
                name.clone(),
                ObjectType {
                    name: name.clone(),
                    parent: Some(parent),
                },
            );
            self.by_type.entry(name.clone()).or_default();
        }

        let parents: Vec<String> = self
            .types
            .values()
            .filter_map(|t| t.parent.clone())
            .collect();
        for parent in parents {
            if !self.types.contains_key(&parent) {
                self.types.insert(
                    parent.clone(),
                    ObjectType {
                        name: parent.clone(),
                        parent: Some(OBJECT_TYPE.to_owned()),
                    },
                );
                self.by_type.entry(parent).or_default();
            }
        }

        for name in self.types.keys() {
            let mut hops = 0;
            let mut current = name.as_str();
            while let Some(parent) = self.types[current].parent.as_deref() {
                hops += 1;
                if hops > self.types.len() {
                    return Err(PddlError::InvalidArgument(format!(
                        "cycle in type hierarchy involving {name}"
                    )));
                }
                current = parent;
            }
        }
        Ok(())
    }

    pub fn contains_type(&self, name: &str) -> bool {
        self.types.contains_key(name)
    }

    pub fn object_type(&self, name: &str) -> Option<&ObjectType> {
        self.types.get(name)
    }

    /// True when `sub` names the same type as `sup` or a descendant of it.
    pub fn is_subtype(&self, sub: &str, sup: &str) -> bool {
        let mut current = match self.types.get(sub) {
            Some(t) => t,
            None => return false,
        };
        loop {
            if current.name == sup {
                return true;
            }
            match current.parent.as_deref().and_then(|p| self.types.get(p)) {
                Some(parent) => current = parent,
                None => return false,
            }
        }
    }

    pub fn add_object(&mut self, name: &str, typ: &str) -> Result<()> {
        if !self.types.contains_key(typ) {
            return Err(PddlError::UnknownSymbol(format!("type {typ}")));
        }
        if self.contains_object(name) {
            return Err(PddlError::InvalidArgument(format!(
                "object {name} declared twice"
            )));
        }
        let object = Object::new(name, typ);
        self.objects.push(object.clone());
        let mut current = typ.to_owned();
        loop {
            self.by_type
                .entry(current.clone())
                .or_default()
                .push(object.clone());
            match self.types[&current].parent.clone() {
                Some(parent) => current = parent,
                None => break,
            }
        }
        Ok(())
    }

    pub fn remove_object(&mut self, name: &str) -> Result<Object> {
        let at = self
            .objects
            .iter()
            .position(|obj| obj.name == name)
            .ok_or_else(|| PddlError::UnknownSymbol(format!("object {name}")))?;
        let removed = self.objects.remove(at);
        for members in self.by_type.values_mut() {
            members.retain(|obj| obj.name != name);
        }
        Ok(removed)
    }

    pub fn object(&self, name: &str) -> Result<&Object> {
        self.objects
            .iter()
            .find(|obj| obj.name == name)
            .ok_or_else(|| PddlError::UnknownSymbol(format!("object {name}")))
    }

    pub fn contains_object(&self, name: &str) -> bool {
        self.objects.iter().any(|obj| obj.name == name)
    }

    /// All objects in declaration order.
    pub fn objects(&self) -> &[Object] {
        &self.objects
    }

    /// Objects whose type descends from `typ`, in declaration order.
    /// Unknown types yield an empty slice.
    pub fn objects_of(&self, typ: &str) -> &[Object] {
        self.by_type.get(typ).map(|v| v.as_slice()).unwrap_or(&[])
    }
}

impl Default for Registry {
    fn default() -> Self {
        Registry::new()
    }
}
