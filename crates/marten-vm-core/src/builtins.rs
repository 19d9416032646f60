//! Realm intrinsics
//!
//! Prototypes, the shared root structures objects are created with, and the
//! handful of native functions the machine itself depends on: the error
//! constructors, `eval`, and `Array.prototype.sort` (which is where the
//! numeric comparator shortcut pays off).

use std::sync::Arc;

use crate::error::ErrorKind;
use crate::host::{HostCallContext, HostFunction};
use crate::object::{JsObject, ObjectKind};
use crate::sort::sort_with_comparator;
use crate::structure::{PropertyAttributes, Structure};
use crate::value::Value;

type NativeMethod =
    fn(&mut HostCallContext<'_>, &Arc<JsObject>, &Value, &[Value]) -> Result<Value, Value>;

/// Prototypes and root structures of one VM
pub struct Realm {
    /// The global object
    pub global: Arc<JsObject>,
    /// `Object.prototype`
    pub object_prototype: Arc<JsObject>,
    /// `Function.prototype`
    pub function_prototype: Arc<JsObject>,
    /// `Array.prototype`
    pub array_prototype: Arc<JsObject>,
    /// `RegExp.prototype`
    pub regexp_prototype: Arc<JsObject>,
    error_prototypes: Vec<Arc<JsObject>>,

    /// Plain objects
    pub object_structure: Arc<Structure>,
    /// Arrays
    pub array_structure: Arc<Structure>,
    /// Script and host functions
    pub function_structure: Arc<Structure>,
    /// Regular expression instances
    pub regexp_structure: Arc<Structure>,
    /// `arguments` objects
    pub arguments_structure: Arc<Structure>,
    /// Activations and iterators (no prototype)
    pub bare_structure: Arc<Structure>,
    error_structures: Vec<Arc<Structure>>,
}

impl Realm {
    /// Fresh realm with an empty global object
    pub fn new() -> Self {
        let root = Structure::root();
        let object_prototype = JsObject::new(Arc::clone(&root), ObjectKind::Ordinary);
        let object_structure = root.prototype_transition(Some(Arc::clone(&object_prototype)));

        let derived = |kind: ObjectKind| JsObject::new(Arc::clone(&object_structure), kind);
        let function_prototype = derived(ObjectKind::Ordinary);
        let array_prototype = derived(ObjectKind::Array(Default::default()));
        let regexp_prototype = derived(ObjectKind::Ordinary);
        let error_prototype = derived(ObjectKind::Ordinary);
        let global = derived(ObjectKind::Global);

        let mut error_prototypes = Vec::with_capacity(ErrorKind::ALL.len());
        for kind in ErrorKind::ALL {
            let prototype = match kind {
                ErrorKind::Error => Arc::clone(&error_prototype),
                _ => JsObject::new(
                    root.prototype_transition(Some(Arc::clone(&error_prototype))),
                    ObjectKind::Ordinary,
                ),
            };
            prototype.define_property("name", Value::string(kind.name()), PropertyAttributes::hidden());
            prototype.define_property("message", Value::string(""), PropertyAttributes::hidden());
            error_prototypes.push(prototype);
        }
        let error_structures = error_prototypes
            .iter()
            .map(|prototype| root.prototype_transition(Some(Arc::clone(prototype))))
            .collect();

        Self {
            array_structure: root.prototype_transition(Some(Arc::clone(&array_prototype))),
            function_structure: root.prototype_transition(Some(Arc::clone(&function_prototype))),
            regexp_structure: root.prototype_transition(Some(Arc::clone(&regexp_prototype))),
            arguments_structure: Arc::clone(&object_structure),
            bare_structure: Arc::clone(&root),
            global,
            object_prototype,
            function_prototype,
            array_prototype,
            regexp_prototype,
            error_prototypes,
            object_structure,
            error_structures,
        }
    }

    /// Prototype of errors of `kind`
    pub fn error_prototype(&self, kind: ErrorKind) -> &Arc<JsObject> {
        &self.error_prototypes[kind as usize]
    }

    /// Root structure of errors of `kind`
    pub fn error_structure(&self, kind: ErrorKind) -> &Arc<Structure> {
        &self.error_structures[kind as usize]
    }

    /// Plain object
    pub fn new_object(&self) -> Arc<JsObject> {
        JsObject::new(Arc::clone(&self.object_structure), ObjectKind::Ordinary)
    }

    /// Plain object with `prototype`
    pub fn new_object_with_prototype(&self, prototype: Arc<JsObject>) -> Arc<JsObject> {
        let structure = self
            .bare_structure
            .prototype_transition(Some(prototype));
        JsObject::new(structure, ObjectKind::Ordinary)
    }

    /// Array holding `elements`
    pub fn new_array(&self, elements: Vec<Value>) -> Arc<JsObject> {
        JsObject::new(
            Arc::clone(&self.array_structure),
            ObjectKind::Array(parking_lot::RwLock::new(elements)),
        )
    }

    /// Error object of `kind`
    pub fn new_error(&self, kind: ErrorKind, message: &str) -> Arc<JsObject> {
        let error = JsObject::new(Arc::clone(self.error_structure(kind)), ObjectKind::Error);
        if !message.is_empty() {
            error.define_property("message", Value::string(message), PropertyAttributes::hidden());
        }
        error
    }

    /// Host function object
    pub fn new_host_function(&self, function: HostFunction) -> Arc<JsObject> {
        let length = function.length;
        let object = JsObject::new(Arc::clone(&self.function_structure), ObjectKind::Host(function));
        object.define_property("length", Value::Int32(length as i32), PropertyAttributes::frozen());
        object
    }
}

impl Default for Realm {
    fn default() -> Self {
        Self::new()
    }
}

/// Install the intrinsic globals; returns the `eval` function object
pub(crate) fn install(realm: &Realm) -> Arc<JsObject> {
    for kind in ErrorKind::ALL {
        let constructor = realm.new_host_function(HostFunction::new(kind.name(), 1, move |ctx, _callee, _this, args| {
            let message = match args.first() {
                None | Some(Value::Undefined) => String::new(),
                Some(value) => value.to_js_string().to_string(),
            };
            Ok(Value::Object(ctx.vm().new_error(kind, &message)))
        }));
        let prototype = realm.error_prototype(kind);
        constructor.define_property("prototype", Value::Object(Arc::clone(prototype)), PropertyAttributes::frozen());
        prototype.define_property("constructor", Value::Object(Arc::clone(&constructor)), PropertyAttributes::hidden());
        realm
            .global
            .define_property(kind.name(), Value::Object(constructor), PropertyAttributes::hidden());
    }

    let eval = realm.new_host_function(HostFunction::new("eval", 1, indirect_eval));
    realm
        .global
        .define_property("eval", Value::Object(Arc::clone(&eval)), PropertyAttributes::hidden());

    let array_methods: [(&str, u32, NativeMethod); 3] = [
        ("sort", 1, array_sort),
        ("push", 1, array_push),
        ("join", 1, array_join),
    ];
    for (name, length, func) in array_methods {
        let function = realm.new_host_function(HostFunction::new(name, length, func));
        realm
            .array_prototype
            .define_property(name, Value::Object(function), PropertyAttributes::hidden());
    }

    let has_own = realm.new_host_function(HostFunction::new("hasOwnProperty", 1, |_ctx, _callee, this, args| {
        let name = args.first().map_or_else(|| "undefined".into(), Value::to_js_string);
        Ok(Value::Boolean(
            this.as_object().is_some_and(|object| object.has_own_property(&name)),
        ))
    }));
    realm
        .object_prototype
        .define_property("hasOwnProperty", Value::Object(has_own), PropertyAttributes::hidden());

    let to_string = realm.new_host_function(HostFunction::new("toString", 0, |_ctx, _callee, this, _args| {
        Ok(Value::string(this.to_js_string()))
    }));
    realm
        .object_prototype
        .define_property("toString", Value::Object(to_string), PropertyAttributes::hidden());

    eval
}

/// `eval` called as a plain function runs in the global scope
fn indirect_eval(
    ctx: &mut HostCallContext<'_>,
    _callee: &Arc<JsObject>,
    _this: &Value,
    args: &[Value],
) -> Result<Value, Value> {
    let Some(Value::String(source)) = args.first() else {
        return Ok(args.first().cloned().unwrap_or_default());
    };
    let code_block = ctx.vm().compile_eval(source, None).map_err(|abrupt| match abrupt {
        crate::error::Abrupt::Throw(value) => value,
        crate::error::Abrupt::Interrupted(_) => Value::Undefined,
    })?;
    ctx.execute(&code_block)
}

fn this_array<'a>(ctx: &HostCallContext<'_>, this: &'a Value, method: &str) -> Result<&'a Arc<JsObject>, Value> {
    match this.as_object() {
        Some(object) if object.array_elements().is_some() => Ok(object),
        _ => Err(ctx.error(
            ErrorKind::TypeError,
            &format!("Array.prototype.{method} called on a non-array"),
        )),
    }
}

fn array_sort(
    ctx: &mut HostCallContext<'_>,
    _callee: &Arc<JsObject>,
    this: &Value,
    args: &[Value],
) -> Result<Value, Value> {
    let array = Arc::clone(this_array(ctx, this, "sort")?);
    let comparator = args.first().cloned().unwrap_or_default();
    if !comparator.is_undefined() && !comparator.as_object().is_some_and(|f| f.is_callable()) {
        return Err(ctx.error(ErrorKind::TypeError, "comparator must be a function"));
    }
    let Some(elements) = array.array_elements() else {
        return Ok(this.clone());
    };
    // Sort a snapshot so the comparator may touch the array.
    let mut values = elements.read().clone();
    sort_with_comparator(ctx, &mut values, &comparator)?;
    *elements.write() = values;
    Ok(this.clone())
}

fn array_push(
    ctx: &mut HostCallContext<'_>,
    _callee: &Arc<JsObject>,
    this: &Value,
    args: &[Value],
) -> Result<Value, Value> {
    let array = this_array(ctx, this, "push")?;
    let Some(elements) = array.array_elements() else {
        return Ok(Value::Undefined);
    };
    let mut elements = elements.write();
    elements.extend_from_slice(args);
    Ok(Value::number(elements.len() as f64))
}

fn array_join(
    ctx: &mut HostCallContext<'_>,
    _callee: &Arc<JsObject>,
    this: &Value,
    args: &[Value],
) -> Result<Value, Value> {
    let array = this_array(ctx, this, "join")?;
    let separator = match args.first() {
        None | Some(Value::Undefined) => Arc::from(","),
        Some(value) => value.to_js_string(),
    };
    let Some(elements) = array.array_elements() else {
        return Ok(Value::string(""));
    };
    let joined = elements
        .read()
        .iter()
        .map(|v| if v.is_nullish() { "".into() } else { v.to_js_string() })
        .collect::<Vec<_>>()
        .join(&separator);
    Ok(Value::string(joined))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_objects_from_realm_share_structures() {
        let realm = Realm::new();
        let a = realm.new_object();
        let b = realm.new_object();
        a.put(&Arc::from("x"), Value::Int32(1));
        b.put(&Arc::from("x"), Value::Int32(2));
        assert!(Arc::ptr_eq(&a.structure(), &b.structure()));
        assert!(Arc::ptr_eq(&a.prototype().unwrap(), &realm.object_prototype));
    }

    #[test]
    fn test_error_objects() {
        let realm = Realm::new();
        let error = realm.new_error(ErrorKind::TypeError, "bad");
        assert_eq!(error.default_string(), "TypeError: bad");
        assert_eq!(realm.new_error(ErrorKind::RangeError, "").default_string(), "RangeError");
        let type_proto = realm.error_prototype(ErrorKind::TypeError);
        let base_proto = realm.error_prototype(ErrorKind::Error);
        assert!(Arc::ptr_eq(&type_proto.prototype().unwrap(), base_proto));
    }
}
