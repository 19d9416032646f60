//! Objects
//!
//! Every object has a [`Structure`] and a storage vector indexed by the
//! structure's property offsets. Exotic behavior (arrays, functions,
//! arguments, activations) hangs off [`ObjectKind`].

use std::sync::Arc;

use marten_vm_bytecode::RegExpLiteral;
use parking_lot::{Mutex, RwLock};

use crate::activation::{ActivationData, ArgumentsData};
use crate::code_block::FunctionTemplate;
use crate::host::HostFunction;
use crate::scope::ScopeChain;
use crate::structure::{PropertyAttributes, PropertySlot, Structure};
use crate::value::Value;

/// A closure over a compiled function
pub struct JsFunction {
    /// Function body
    pub template: Arc<FunctionTemplate>,
    /// Scope chain captured at creation
    pub scope: ScopeChain,
}

/// State of a `for-in` enumeration
pub struct PropertyNameIterator {
    /// Object being enumerated
    pub base: Arc<JsObject>,
    /// Names snapshotted when enumeration started
    pub names: Vec<Arc<str>>,
    /// Next name to hand out
    pub position: usize,
}

/// Object flavor
pub enum ObjectKind {
    /// Plain object
    Ordinary,
    /// The global object
    Global,
    /// Array with dense element storage
    Array(RwLock<Vec<Value>>),
    /// Script function
    Function(JsFunction),
    /// Host function
    Host(HostFunction),
    /// Error instance
    Error,
    /// Regular expression instance
    RegExp(RegExpLiteral),
    /// `arguments` object
    Arguments(RwLock<ArgumentsData>),
    /// Function activation (variable object)
    Activation(RwLock<ActivationData>),
    /// `for-in` iterator
    PropertyNameIterator(Mutex<PropertyNameIterator>),
}

struct ObjectState {
    structure: Arc<Structure>,
    storage: Vec<Value>,
}

/// Result of a full property lookup
#[derive(Clone)]
pub struct PropertyLookup {
    /// Object that owns the property
    pub holder: Arc<JsObject>,
    /// Structure of the holder at lookup time
    pub holder_structure: Arc<Structure>,
    /// Slot in the holder
    pub slot: PropertySlot,
    /// Value read
    pub value: Value,
}

/// Result of a property store
#[derive(Debug, Clone)]
pub enum PutOutcome {
    /// Existing own property overwritten
    Replaced {
        /// Structure of the object (unchanged)
        structure: Arc<Structure>,
        /// Slot written
        offset: usize,
    },
    /// New own property added
    Added {
        /// Structure before the store
        old: Arc<Structure>,
        /// Structure after the store
        new: Arc<Structure>,
        /// Slot written
        offset: usize,
    },
    /// Property is read-only; the store was ignored
    Rejected,
}

/// A JavaScript object
pub struct JsObject {
    state: RwLock<ObjectState>,
    kind: ObjectKind,
}

impl JsObject {
    /// Create an object with `structure`. The structure must be empty.
    pub fn new(structure: Arc<Structure>, kind: ObjectKind) -> Arc<Self> {
        debug_assert_eq!(structure.property_count(), 0);
        Arc::new(Self {
            state: RwLock::new(ObjectState {
                structure,
                storage: Vec::new(),
            }),
            kind,
        })
    }

    /// Object flavor
    #[inline]
    pub fn kind(&self) -> &ObjectKind {
        &self.kind
    }

    /// Current structure
    #[inline]
    pub fn structure(&self) -> Arc<Structure> {
        Arc::clone(&self.state.read().structure)
    }

    /// Whether the current structure is exactly `structure`
    #[inline]
    pub fn has_structure(&self, structure: &Arc<Structure>) -> bool {
        Arc::ptr_eq(&self.state.read().structure, structure)
    }

    /// Prototype
    pub fn prototype(&self) -> Option<Arc<JsObject>> {
        self.state.read().structure.prototype().cloned()
    }

    /// Replace the prototype
    pub fn set_prototype(&self, prototype: Option<Arc<JsObject>>) {
        let mut state = self.state.write();
        state.structure = state.structure.prototype_transition(prototype);
    }

    /// Read storage slot `offset`
    #[inline]
    pub fn get_direct(&self, offset: usize) -> Value {
        self.state.read().storage[offset].clone()
    }

    /// Write storage slot `offset`
    #[inline]
    pub fn put_direct(&self, offset: usize, value: Value) {
        self.state.write().storage[offset] = value;
    }

    /// Write slot `offset` only if the structure is still `structure`
    pub fn put_direct_if(&self, structure: &Arc<Structure>, offset: usize, value: Value) -> bool {
        let mut state = self.state.write();
        if !Arc::ptr_eq(&state.structure, structure) {
            return false;
        }
        state.storage[offset] = value;
        true
    }

    /// Apply a cached add-property transition if the structure is still `old`
    pub fn transition_if(&self, old: &Arc<Structure>, new: &Arc<Structure>, value: Value) -> bool {
        let mut state = self.state.write();
        if !Arc::ptr_eq(&state.structure, old) {
            return false;
        }
        debug_assert_eq!(state.storage.len(), old.property_count());
        state.structure = Arc::clone(new);
        state.storage.push(value);
        true
    }

    /// Own property lookup
    pub fn get_own_property(&self, name: &str) -> Option<(PropertySlot, Value)> {
        let state = self.state.read();
        let slot = state.structure.get(name)?;
        Some((slot, state.storage[slot.offset].clone()))
    }

    /// Whether `name` is an own property
    pub fn has_own_property(&self, name: &str) -> bool {
        if self.state.read().structure.get(name).is_some() {
            return true;
        }
        match &self.kind {
            ObjectKind::Array(elements) => {
                array_index(name).is_some_and(|i| i < elements.read().len())
            }
            _ => false,
        }
    }

    /// Lookup along the prototype chain
    pub fn lookup(self: &Arc<Self>, name: &str) -> Option<PropertyLookup> {
        let mut current = Arc::clone(self);
        loop {
            let next = {
                let state = current.state.read();
                if let Some(slot) = state.structure.get(name) {
                    let value = state.storage[slot.offset].clone();
                    let holder_structure = Arc::clone(&state.structure);
                    drop(state);
                    return Some(PropertyLookup {
                        holder: current,
                        holder_structure,
                        slot,
                        value,
                    });
                }
                state.structure.prototype().cloned()
            };
            current = next?;
        }
    }

    /// Property value along the prototype chain
    pub fn get(self: &Arc<Self>, name: &str) -> Option<Value> {
        self.lookup(name).map(|found| found.value)
    }

    /// Whether `name` exists on the object or its prototypes
    pub fn has_property(self: &Arc<Self>, name: &str) -> bool {
        let mut current = Some(Arc::clone(self));
        while let Some(object) = current {
            if object.has_own_property(name) {
                return true;
            }
            current = object.prototype();
        }
        false
    }

    /// Store a data property
    pub fn put(&self, name: &Arc<str>, value: Value) -> PutOutcome {
        {
            let mut state = self.state.write();
            if let Some(slot) = state.structure.get(name) {
                if !slot.attributes.writable {
                    return PutOutcome::Rejected;
                }
                state.storage[slot.offset] = value;
                return PutOutcome::Replaced {
                    structure: Arc::clone(&state.structure),
                    offset: slot.offset,
                };
            }
        }
        if let Some(inherited) = self.prototype().and_then(|proto| proto.lookup(name)) {
            if !inherited.slot.attributes.writable {
                return PutOutcome::Rejected;
            }
        }
        self.add_property(name, value, PropertyAttributes::data())
    }

    fn add_property(&self, name: &Arc<str>, value: Value, attributes: PropertyAttributes) -> PutOutcome {
        let mut state = self.state.write();
        let old = Arc::clone(&state.structure);
        let new = old.add_property_transition(name, attributes);
        let offset = state.storage.len();
        state.structure = Arc::clone(&new);
        state.storage.push(value);
        PutOutcome::Added { old, new, offset }
    }

    /// Define or overwrite an own property regardless of writability
    pub fn define_property(&self, name: &str, value: Value, attributes: PropertyAttributes) {
        let existing = self.state.read().structure.get(name);
        match existing {
            Some(slot) if slot.attributes == attributes => self.put_direct(slot.offset, value),
            Some(_) => {
                self.delete_property_unchecked(name);
                self.add_property(&Arc::from(name), value, attributes);
            }
            None => {
                self.add_property(&Arc::from(name), value, attributes);
            }
        }
    }

    /// `delete obj[name]`; `false` if the property is not configurable
    pub fn delete_property(&self, name: &str) -> bool {
        if let ObjectKind::Array(elements) = &self.kind {
            if let Some(index) = array_index(name) {
                let mut elements = elements.write();
                if index < elements.len() {
                    elements[index] = Value::Undefined;
                }
                return true;
            }
        }
        match self.state.read().structure.get(name) {
            None => return true,
            Some(slot) if !slot.attributes.configurable => return false,
            Some(_) => {}
        }
        self.delete_property_unchecked(name);
        true
    }

    fn delete_property_unchecked(&self, name: &str) {
        let mut state = self.state.write();
        if state.structure.get(name).is_none() {
            return;
        }
        let new = state.structure.remove_property_transition(name);
        let storage = new
            .keys()
            .iter()
            .map(|key| {
                let old_slot = state.structure.get(key).map(|slot| slot.offset);
                old_slot.map_or(Value::Undefined, |offset| state.storage[offset].clone())
            })
            .collect();
        state.structure = new;
        state.storage = storage;
    }

    /// Own enumerable property names, array indices first
    pub fn enumerable_keys(&self) -> Vec<Arc<str>> {
        let mut keys = Vec::new();
        if let ObjectKind::Array(elements) = &self.kind {
            let len = elements.read().len();
            keys.extend((0..len).map(|i| Arc::from(itoa::Buffer::new().format(i))));
        }
        let state = self.state.read();
        keys.extend(
            state
                .structure
                .keys()
                .iter()
                .filter(|key| state.structure.get(key).is_some_and(|s| s.attributes.enumerable))
                .cloned(),
        );
        keys
    }

    /// Whether the object can be called
    pub fn is_callable(&self) -> bool {
        matches!(self.kind, ObjectKind::Function(_) | ObjectKind::Host(_))
    }

    /// Script function payload
    pub fn as_function(&self) -> Option<&JsFunction> {
        match &self.kind {
            ObjectKind::Function(function) => Some(function),
            _ => None,
        }
    }

    /// Dense elements of an array
    pub fn array_elements(&self) -> Option<&RwLock<Vec<Value>>> {
        match &self.kind {
            ObjectKind::Array(elements) => Some(elements),
            _ => None,
        }
    }

    /// `[[Class]]` name
    pub fn class_name(&self) -> &'static str {
        match self.kind {
            ObjectKind::Ordinary => "Object",
            ObjectKind::Global => "global",
            ObjectKind::Array(_) => "Array",
            ObjectKind::Function(_) | ObjectKind::Host(_) => "Function",
            ObjectKind::Error => "Error",
            ObjectKind::RegExp(_) => "RegExp",
            ObjectKind::Arguments(_) => "Arguments",
            ObjectKind::Activation(_) => "Activation",
            ObjectKind::PropertyNameIterator(_) => "PropertyNameIterator",
        }
    }

    /// Function name for display
    pub fn function_name(&self) -> Option<Arc<str>> {
        match &self.kind {
            ObjectKind::Function(function) => function.template.name(),
            ObjectKind::Host(host) => Some(Arc::clone(&host.name)),
            _ => None,
        }
    }

    /// ToString without invoking script code
    pub fn default_string(self: &Arc<Self>) -> String {
        match &self.kind {
            ObjectKind::Array(elements) => elements
                .read()
                .iter()
                .map(|v| {
                    if v.is_nullish() {
                        String::new()
                    } else {
                        v.to_js_string().to_string()
                    }
                })
                .collect::<Vec<_>>()
                .join(","),
            ObjectKind::Function(_) => format!(
                "function {}() {{\n    [bytecode]\n}}",
                self.function_name().as_deref().unwrap_or("")
            ),
            ObjectKind::Host(host) => {
                format!("function {}() {{\n    [native code]\n}}", host.name)
            }
            ObjectKind::Error => {
                let name = self
                    .get("name")
                    .map_or_else(|| "Error".into(), |v| v.to_js_string());
                let message = self
                    .get("message")
                    .map_or_else(|| "".into(), |v| v.to_js_string());
                if message.is_empty() {
                    name.to_string()
                } else {
                    format!("{name}: {message}")
                }
            }
            ObjectKind::RegExp(literal) => format!("/{}/{}", literal.pattern, literal.flags),
            _ => format!("[object {}]", self.class_name()),
        }
    }
}

impl std::fmt::Debug for JsObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsObject")
            .field("class", &self.class_name())
            .field("structure", &self.state.read().structure.id())
            .finish()
    }
}

/// Parse a canonical array index (`"0"`, `"17"`, not `"01"`)
pub fn array_index(name: &str) -> Option<usize> {
    if name.is_empty() || (name.len() > 1 && name.starts_with('0')) {
        return None;
    }
    if !name.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    name.parse().ok().filter(|i| *i < u32::MAX as usize)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plain() -> Arc<JsObject> {
        JsObject::new(Structure::root(), ObjectKind::Ordinary)
    }

    #[test]
    fn test_put_and_lookup() {
        let proto = plain();
        proto.put(&Arc::from("inherited"), Value::Int32(1));
        let root = Structure::root().prototype_transition(Some(Arc::clone(&proto)));
        let object = JsObject::new(root, ObjectKind::Ordinary);
        object.put(&Arc::from("own"), Value::Int32(2));

        let own = object.lookup("own").unwrap();
        assert!(Arc::ptr_eq(&own.holder, &object));
        let inherited = object.lookup("inherited").unwrap();
        assert!(Arc::ptr_eq(&inherited.holder, &proto));
        assert!(object.lookup("missing").is_none());
    }

    #[test]
    fn test_objects_share_structures() {
        let (a, b) = (plain(), plain());
        let root = Structure::root();
        let c = JsObject::new(Arc::clone(&root), ObjectKind::Ordinary);
        let d = JsObject::new(root, ObjectKind::Ordinary);
        for object in [&c, &d] {
            object.put(&Arc::from("x"), Value::Int32(1));
            object.put(&Arc::from("y"), Value::Int32(2));
        }
        assert!(Arc::ptr_eq(&c.structure(), &d.structure()));
        // Separate roots never share.
        assert!(!Arc::ptr_eq(&a.structure(), &b.structure()));
    }

    #[test]
    fn test_put_outcomes() {
        let object = plain();
        let name: Arc<str> = Arc::from("x");
        assert!(matches!(object.put(&name, Value::Int32(1)), PutOutcome::Added { offset: 0, .. }));
        assert!(matches!(object.put(&name, Value::Int32(2)), PutOutcome::Replaced { offset: 0, .. }));
        object.define_property("ro", Value::Int32(3), PropertyAttributes::frozen());
        assert!(matches!(object.put(&Arc::from("ro"), Value::Int32(4)), PutOutcome::Rejected));
        assert_eq!(object.get_own_property("ro").unwrap().1.as_int32(), Some(3));
    }

    #[test]
    fn test_delete_compacts_storage() {
        let object = plain();
        for (name, v) in [("a", 1), ("b", 2), ("c", 3)] {
            object.put(&Arc::from(name), Value::Int32(v));
        }
        assert!(object.delete_property("b"));
        assert!(!object.has_own_property("b"));
        assert_eq!(object.get_own_property("c").unwrap().1.as_int32(), Some(3));
        assert_eq!(object.get_own_property("a").unwrap().1.as_int32(), Some(1));
        assert!(!object.structure().is_cacheable());

        object.define_property("fixed", Value::Null, PropertyAttributes::frozen());
        assert!(!object.delete_property("fixed"));
    }

    #[test]
    fn test_enumerable_keys_skip_hidden() {
        let object = plain();
        object.put(&Arc::from("shown"), Value::Null);
        object.define_property("hidden", Value::Null, PropertyAttributes::hidden());
        let keys: Vec<_> = object.enumerable_keys().iter().map(|k| k.to_string()).collect();
        assert_eq!(keys, vec!["shown"]);
    }

    #[test]
    fn test_array_index() {
        assert_eq!(array_index("0"), Some(0));
        assert_eq!(array_index("42"), Some(42));
        assert_eq!(array_index("042"), None);
        assert_eq!(array_index("-1"), None);
        assert_eq!(array_index("length"), None);
    }
}
