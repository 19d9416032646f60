//! Structures (hidden classes) and the transition graph.
//!
//! A structure describes the layout of an object: which properties it has,
//! their attributes and storage offsets, and its prototype. Objects with the
//! same properties added in the same order with the same prototype share one
//! structure, so inline caches can validate a whole layout with one pointer
//! comparison.
//!
//! Children hold strong references to their parent, the parent's transition
//! table holds weak references to its children. Removing a property leaves
//! the shared graph: the result is a fresh structure that is never shared and
//! never cached.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::object::JsObject;

static NEXT_STRUCTURE_ID: AtomicU64 = AtomicU64::new(1);

/// Unique structure identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StructureId(pub u64);

impl StructureId {
    fn next() -> Self {
        Self(NEXT_STRUCTURE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Property attributes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PropertyAttributes {
    /// Property is writable
    pub writable: bool,
    /// Property is enumerable
    pub enumerable: bool,
    /// Property is configurable (deletable)
    pub configurable: bool,
}

impl PropertyAttributes {
    /// Default data property attributes
    pub const fn data() -> Self {
        Self {
            writable: true,
            enumerable: true,
            configurable: true,
        }
    }

    /// Writable and configurable but skipped by enumeration
    pub const fn hidden() -> Self {
        Self {
            writable: true,
            enumerable: false,
            configurable: true,
        }
    }

    /// Non-writable, non-enumerable, non-configurable
    pub const fn frozen() -> Self {
        Self {
            writable: false,
            enumerable: false,
            configurable: false,
        }
    }
}

impl Default for PropertyAttributes {
    fn default() -> Self {
        Self::data()
    }
}

/// Location of a property in object storage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PropertySlot {
    /// Index into the object's storage vector
    pub offset: usize,
    /// Attributes
    pub attributes: PropertyAttributes,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum TransitionKey {
    Add(Arc<str>, PropertyAttributes),
    Prototype(usize),
}

/// Shared object layout
pub struct Structure {
    id: StructureId,
    parent: Option<Arc<Structure>>,
    prototype: Option<Arc<JsObject>>,
    table: FxHashMap<Arc<str>, PropertySlot>,
    keys: Vec<Arc<str>>,
    /// Uncacheable structures come from deletions and are unique per object
    cacheable: bool,
    transitions: Mutex<FxHashMap<TransitionKey, Weak<Structure>>>,
}

impl Structure {
    /// Empty structure without a prototype
    pub fn root() -> Arc<Self> {
        Arc::new(Self::empty(None))
    }

    fn empty(prototype: Option<Arc<JsObject>>) -> Self {
        Self {
            id: StructureId::next(),
            parent: None,
            prototype,
            table: FxHashMap::default(),
            keys: Vec::new(),
            cacheable: true,
            transitions: Mutex::new(FxHashMap::default()),
        }
    }

    /// Identity
    #[inline]
    pub fn id(&self) -> StructureId {
        self.id
    }

    /// Structure this one transitioned from
    pub fn parent(&self) -> Option<&Arc<Structure>> {
        self.parent.as_ref()
    }

    /// Prototype of objects with this structure
    #[inline]
    pub fn prototype(&self) -> Option<&Arc<JsObject>> {
        self.prototype.as_ref()
    }

    /// Own property lookup
    #[inline]
    pub fn get(&self, name: &str) -> Option<PropertySlot> {
        self.table.get(name).copied()
    }

    /// Own property names in insertion order
    pub fn keys(&self) -> &[Arc<str>] {
        &self.keys
    }

    /// Number of own properties (and storage slots)
    #[inline]
    pub fn property_count(&self) -> usize {
        self.keys.len()
    }

    /// Whether inline caches may pin this structure
    #[inline]
    pub fn is_cacheable(&self) -> bool {
        self.cacheable
    }

    /// Number of live children in the transition table
    pub fn transition_count(&self) -> usize {
        self.transitions
            .lock()
            .values()
            .filter(|child| child.strong_count() > 0)
            .count()
    }

    fn cached_transition(
        self: &Arc<Self>,
        key: TransitionKey,
        build: impl FnOnce() -> Structure,
    ) -> Arc<Structure> {
        let mut transitions = self.transitions.lock();
        if let Some(child) = transitions.get(&key).and_then(Weak::upgrade) {
            return child;
        }
        let child = Arc::new(build());
        transitions.insert(key, Arc::downgrade(&child));
        tracing::trace!(parent = self.id.0, child = child.id.0, "structure transition");
        child
    }

    /// Structure after adding `name` with `attributes`.
    ///
    /// The same transition from the same structure yields the same child for
    /// as long as that child is alive.
    pub fn add_property_transition(
        self: &Arc<Self>,
        name: &Arc<str>,
        attributes: PropertyAttributes,
    ) -> Arc<Structure> {
        debug_assert!(self.get(name).is_none(), "property `{name}` already present");
        let build = || {
            let mut table = self.table.clone();
            let mut keys = self.keys.clone();
            table.insert(
                Arc::clone(name),
                PropertySlot {
                    offset: keys.len(),
                    attributes,
                },
            );
            keys.push(Arc::clone(name));
            Structure {
                id: StructureId::next(),
                parent: Some(Arc::clone(self)),
                prototype: self.prototype.clone(),
                table,
                keys,
                cacheable: self.cacheable,
                transitions: Mutex::new(FxHashMap::default()),
            }
        };
        if !self.cacheable {
            return Arc::new(build());
        }
        self.cached_transition(TransitionKey::Add(Arc::clone(name), attributes), build)
    }

    /// Structure with the same properties and a different prototype
    pub fn prototype_transition(self: &Arc<Self>, prototype: Option<Arc<JsObject>>) -> Arc<Structure> {
        let build = || Structure {
            id: StructureId::next(),
            parent: Some(Arc::clone(self)),
            prototype: prototype.clone(),
            table: self.table.clone(),
            keys: self.keys.clone(),
            cacheable: self.cacheable,
            transitions: Mutex::new(FxHashMap::default()),
        };
        if !self.cacheable {
            return Arc::new(build());
        }
        let key = TransitionKey::Prototype(
            prototype
                .as_ref()
                .map_or(0, |object| Arc::as_ptr(object) as usize),
        );
        self.cached_transition(key, build)
    }

    /// Fresh, unshared structure without `name`.
    ///
    /// Offsets are reassigned densely in key order; the caller compacts the
    /// object's storage to match.
    pub fn remove_property_transition(self: &Arc<Self>, name: &str) -> Arc<Structure> {
        let keys: Vec<Arc<str>> = self
            .keys
            .iter()
            .filter(|key| key.as_ref() != name)
            .cloned()
            .collect();
        let table = keys
            .iter()
            .enumerate()
            .map(|(offset, key)| {
                let attributes = self.table[key].attributes;
                (Arc::clone(key), PropertySlot { offset, attributes })
            })
            .collect();
        Arc::new(Structure {
            id: StructureId::next(),
            parent: Some(Arc::clone(self)),
            prototype: self.prototype.clone(),
            table,
            keys,
            cacheable: false,
            transitions: Mutex::new(FxHashMap::default()),
        })
    }
}

impl std::fmt::Debug for Structure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Structure")
            .field("id", &self.id.0)
            .field("keys", &self.keys)
            .field("has_prototype", &self.prototype.is_some())
            .field("cacheable", &self.cacheable)
            .finish()
    }
}
