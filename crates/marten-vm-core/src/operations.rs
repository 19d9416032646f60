//! Operation slow paths shared by the execution backends
//!
//! Arithmetic with int32 fast paths, property access through the per-site
//! inline caches, and scope chain resolution. The interpreter calls these
//! for every instruction; the compiling backend calls them when a guard
//! fails or a site has no patched fast path.

use std::sync::Arc;

use marten_vm_bytecode::OpcodeId;
use rustc_hash::FxHashSet;

use crate::code_block::CodeBlock;
use crate::error::{Abrupt, ErrorKind, OpResult};
use crate::inline_cache::{CachedAccess, StructureChain};
use crate::object::{JsObject, ObjectKind, PutOutcome, array_index};
use crate::value::Value;
use crate::vm::Vm;

// ==================== Arithmetic ====================

/// Primitive value of `value` without running script code
pub fn to_primitive(value: &Value) -> Value {
    match value {
        Value::Object(object) => Value::string(object.default_string()),
        other => other.clone(),
    }
}

/// `a + b`
pub fn add(a: &Value, b: &Value) -> Value {
    if let (Value::Int32(x), Value::Int32(y)) = (a, b) {
        if let Some(sum) = x.checked_add(*y) {
            return Value::Int32(sum);
        }
    }
    let a = to_primitive(a);
    let b = to_primitive(b);
    if a.is_string() || b.is_string() {
        let mut joined = String::from(&*a.to_js_string());
        joined.push_str(&b.to_js_string());
        return Value::string(joined);
    }
    Value::number(a.to_number() + b.to_number())
}

/// `sub`, `mul`, `div` and `mod`
pub fn arithmetic(op: OpcodeId, a: &Value, b: &Value) -> Value {
    if let (Value::Int32(x), Value::Int32(y)) = (a, b) {
        let fast = match op {
            OpcodeId::Sub => x.checked_sub(*y),
            OpcodeId::Mul => x.checked_mul(*y).filter(|product| *product != 0 || (*x >= 0 && *y >= 0)),
            OpcodeId::Mod if *y > 0 && *x >= 0 => Some(x % y),
            _ => None,
        };
        if let Some(result) = fast {
            return Value::Int32(result);
        }
    }
    let x = a.to_number();
    let y = b.to_number();
    Value::number(match op {
        OpcodeId::Sub => x - y,
        OpcodeId::Mul => x * y,
        OpcodeId::Div => x / y,
        OpcodeId::Mod => x % y,
        other => panic!("`{other}` is not an arithmetic opcode"),
    })
}

/// Shifts and bitwise binary operators
pub fn bitwise(op: OpcodeId, a: &Value, b: &Value) -> Value {
    let x = a.to_int32();
    match op {
        OpcodeId::LShift => Value::Int32(x.wrapping_shl(b.to_uint32() & 31)),
        OpcodeId::RShift => Value::Int32(x >> (b.to_uint32() & 31)),
        OpcodeId::URShift => Value::number(((x as u32) >> (b.to_uint32() & 31)) as f64),
        OpcodeId::BitAnd => Value::Int32(x & b.to_int32()),
        OpcodeId::BitXor => Value::Int32(x ^ b.to_int32()),
        OpcodeId::BitOr => Value::Int32(x | b.to_int32()),
        other => panic!("`{other}` is not a bitwise opcode"),
    }
}

/// `value + delta` for the increment and decrement opcodes
pub fn increment(value: &Value, delta: i32) -> Value {
    if let Value::Int32(i) = value {
        if let Some(result) = i.checked_add(delta) {
            return Value::Int32(result);
        }
    }
    Value::number(value.to_number() + delta as f64)
}

/// ToNumber as a value
pub fn to_number(value: &Value) -> Value {
    match value {
        Value::Int32(_) | Value::Double(_) => value.clone(),
        other => Value::number(other.to_number()),
    }
}

/// `-value`
pub fn negate(value: &Value) -> Value {
    match value {
        Value::Int32(i) if *i != 0 && *i != i32::MIN => Value::Int32(-i),
        other => Value::number(-other.to_number()),
    }
}

fn compare(a: &Value, b: &Value, or_equal: bool) -> bool {
    if let (Value::Int32(x), Value::Int32(y)) = (a, b) {
        return if or_equal { x <= y } else { x < y };
    }
    let a = to_primitive(a);
    let b = to_primitive(b);
    if let (Value::String(x), Value::String(y)) = (&a, &b) {
        let ordering = x.encode_utf16().cmp(y.encode_utf16());
        return if or_equal { ordering.is_le() } else { ordering.is_lt() };
    }
    let x = a.to_number();
    let y = b.to_number();
    if or_equal { x <= y } else { x < y }
}

/// `a < b`
pub fn less(a: &Value, b: &Value) -> bool {
    compare(a, b, false)
}

/// `a <= b`
pub fn less_eq(a: &Value, b: &Value) -> bool {
    compare(a, b, true)
}

// ==================== Errors ====================

/// New error of `kind` as an abrupt completion
pub fn throw_error(vm: &Vm, kind: ErrorKind, message: &str) -> Abrupt {
    vm.throw_error(kind, message)
}

fn not_an_object(vm: &Vm, code_block: &CodeBlock, pc: usize, base: &Value, ident: &str) -> Abrupt {
    let described = match base {
        Value::String(s) => format!("'{s}'"),
        other => other.to_js_string().to_string(),
    };
    let message = match code_block.get_by_id_exception_info_for_bytecode_offset(pc as u32) {
        Some(info) if info.is_op_construct => format!("{described} is not a constructor"),
        Some(_) => format!("{described} is not a valid argument for 'instanceof'"),
        None => format!("{described} is not an object (evaluating property '{ident}')"),
    };
    throw_error(vm, ErrorKind::TypeError, &message)
}

fn utf16_length(s: &str) -> usize {
    s.encode_utf16().count()
}

fn character_at(s: &str, index: usize) -> Option<Value> {
    let unit = s.encode_utf16().nth(index)?;
    Some(Value::string(String::from_utf16_lossy(&[unit])))
}

/// Property key for a value used as a subscript
pub fn property_key(value: &Value) -> Arc<str> {
    value.to_js_string()
}

// ==================== Generic property access ====================

/// Full property read on an object, exotic storage first
pub fn get_property(vm: &Vm, object: &Arc<JsObject>, name: &str) -> Value {
    match object.kind() {
        ObjectKind::Array(elements) => {
            if name == "length" {
                return Value::number(elements.read().len() as f64);
            }
            if let Some(value) = array_index(name).and_then(|i| elements.read().get(i).cloned()) {
                return value;
            }
        }
        ObjectKind::Arguments(data) => {
            if let Some(value) = array_index(name).and_then(|i| data.read().get(vm.registers(), i)) {
                return value;
            }
        }
        ObjectKind::Activation(data) => {
            if let Some(value) = data.read().get_symbol(vm.registers(), name) {
                return value;
            }
        }
        _ => {}
    }
    object.get(name).unwrap_or_default()
}

fn set_array_length(vm: &Vm, object: &JsObject, value: &Value) -> OpResult<()> {
    let length = value.to_number();
    if length < 0.0 || length.fract() != 0.0 || length > u32::MAX as f64 {
        return Err(throw_error(vm, ErrorKind::RangeError, "Invalid array length"));
    }
    if let Some(elements) = object.array_elements() {
        elements.write().resize(length as usize, Value::Undefined);
    }
    Ok(())
}

/// Full property store on an object, exotic storage first.
///
/// Returns the ordinary store outcome, or `None` when exotic storage
/// absorbed the write.
pub fn put_property(
    vm: &mut Vm,
    object: &Arc<JsObject>,
    name: &Arc<str>,
    value: Value,
) -> OpResult<Option<PutOutcome>> {
    match object.kind() {
        ObjectKind::Array(elements) => {
            if &**name == "length" {
                set_array_length(vm, object, &value)?;
                return Ok(None);
            }
            if let Some(index) = array_index(name) {
                let mut elements = elements.write();
                if index >= elements.len() {
                    elements.resize(index + 1, Value::Undefined);
                }
                elements[index] = value;
                return Ok(None);
            }
        }
        ObjectKind::Arguments(data) => {
            if let Some(index) = array_index(name) {
                if data.write().set(vm.registers_mut(), index, value.clone()) {
                    return Ok(None);
                }
            }
        }
        ObjectKind::Activation(data) => {
            if data
                .write()
                .put_symbol(vm.registers_mut(), name, value.clone())
                .is_some()
            {
                return Ok(None);
            }
        }
        _ => {}
    }
    Ok(Some(object.put(name, value)))
}

// ==================== Cached property access ====================

/// `get_by_id` through stub `stub_index` of `code_block`
pub fn get_by_id(
    vm: &Vm,
    code_block: &CodeBlock,
    pc: usize,
    base: &Value,
    ident: &Arc<str>,
    stub_index: usize,
) -> OpResult<Value> {
    {
        let mut stub = code_block.structure_stub_info(stub_index);
        if let Some(value) = stub.probe_get(base) {
            return Ok(value);
        }
        stub.record_miss();
    }

    match base {
        Value::Object(object) => Ok(get_by_id_object(vm, code_block, object, ident, stub_index)),
        Value::String(s) if &**ident == "length" => {
            let mut stub = code_block.structure_stub_info(stub_index);
            if !stub.is_generic() {
                stub.install(CachedAccess::GetStringLength);
            }
            Ok(Value::number(utf16_length(s) as f64))
        }
        Value::String(s) => Ok(array_index(ident)
            .and_then(|i| character_at(s, i))
            .unwrap_or_default()),
        Value::Undefined | Value::Null => Err(not_an_object(vm, code_block, pc, base, ident)),
        _ => Ok(Value::Undefined),
    }
}

fn get_by_id_object(
    vm: &Vm,
    code_block: &CodeBlock,
    object: &Arc<JsObject>,
    ident: &Arc<str>,
    stub_index: usize,
) -> Value {
    match object.kind() {
        ObjectKind::Array(elements) if &**ident == "length" => {
            let mut stub = code_block.structure_stub_info(stub_index);
            if !stub.is_generic() {
                stub.install(CachedAccess::GetArrayLength);
            }
            return Value::number(elements.read().len() as f64);
        }
        // Exotic storage is never cached.
        ObjectKind::Array(_) | ObjectKind::Arguments(_) if array_index(ident).is_some() => {
            return get_property(vm, object, ident);
        }
        ObjectKind::Activation(data) => {
            if let Some(value) = data.read().get_symbol(vm.registers(), ident) {
                return value;
            }
        }
        _ => {}
    }

    let Some(found) = object.lookup(ident) else {
        return Value::Undefined;
    };
    let structure = object.structure();
    if !structure.is_cacheable() || !found.holder_structure.is_cacheable() {
        return found.value;
    }
    let mut stub = code_block.structure_stub_info(stub_index);
    if stub.is_generic() {
        return found.value;
    }
    let access = if Arc::ptr_eq(&found.holder, object) {
        CachedAccess::GetSelf {
            structure,
            offset: found.slot.offset,
        }
    } else if structure
        .prototype()
        .is_some_and(|prototype| Arc::ptr_eq(prototype, &found.holder))
    {
        CachedAccess::GetProto {
            structure,
            proto_structure: found.holder_structure,
            holder: Arc::clone(&found.holder),
            offset: found.slot.offset,
        }
    } else {
        CachedAccess::GetChain {
            chain: StructureChain::capture(&structure, Some(&found.holder)),
            structure,
            holder: Arc::clone(&found.holder),
            offset: found.slot.offset,
        }
    };
    tracing::trace!(ident = %ident, access = access.describe(), "get_by_id cache fill");
    stub.install(access);
    found.value
}

/// `put_by_id` through stub `stub_index` of `code_block`
pub fn put_by_id(
    vm: &mut Vm,
    code_block: &CodeBlock,
    pc: usize,
    base: &Value,
    ident: &Arc<str>,
    value: Value,
    stub_index: usize,
) -> OpResult<()> {
    let object = match base {
        Value::Object(object) => object,
        Value::Undefined | Value::Null => return Err(not_an_object(vm, code_block, pc, base, ident)),
        // Primitives have no own properties to write.
        _ => return Ok(()),
    };
    {
        let mut stub = code_block.structure_stub_info(stub_index);
        if stub.probe_put(object, &value) {
            return Ok(());
        }
        stub.record_miss();
    }

    let outcome = put_property(vm, object, ident, value)?;
    let mut stub = code_block.structure_stub_info(stub_index);
    if stub.is_generic() {
        return Ok(());
    }
    let access = match outcome {
        Some(PutOutcome::Replaced { structure, offset }) if structure.is_cacheable() => {
            CachedAccess::PutReplace { structure, offset }
        }
        Some(PutOutcome::Added { old, new, .. }) if old.is_cacheable() && new.is_cacheable() => {
            CachedAccess::PutTransition {
                chain: StructureChain::capture(&old, None),
                old,
                new,
            }
        }
        _ => return Ok(()),
    };
    tracing::trace!(ident = %ident, access = access.describe(), "put_by_id cache fill");
    stub.install(access);
    Ok(())
}

/// `delete base.ident`
pub fn delete_by_id(vm: &Vm, code_block: &CodeBlock, pc: usize, base: &Value, ident: &str) -> OpResult<bool> {
    match base {
        Value::Object(object) => Ok(object.delete_property(ident)),
        Value::Undefined | Value::Null => Err(not_an_object(vm, code_block, pc, base, ident)),
        _ => Ok(true),
    }
}

// ==================== Subscript access ====================

/// `base[property]`
pub fn get_by_val(vm: &Vm, base: &Value, property: &Value) -> OpResult<Value> {
    match base {
        Value::Object(object) => {
            if let (Some(elements), Some(index)) = (object.array_elements(), property.as_int32()) {
                if let Some(value) = usize::try_from(index).ok().and_then(|i| elements.read().get(i).cloned()) {
                    return Ok(value);
                }
            }
            Ok(get_property(vm, object, &property_key(property)))
        }
        Value::String(s) => {
            let key = property_key(property);
            if &*key == "length" {
                return Ok(Value::number(utf16_length(s) as f64));
            }
            Ok(array_index(&key).and_then(|i| character_at(s, i)).unwrap_or_default())
        }
        Value::Undefined | Value::Null => Err(throw_error(
            vm,
            ErrorKind::TypeError,
            &format!(
                "{} is not an object (evaluating property '{}')",
                base.to_js_string(),
                property_key(property)
            ),
        )),
        _ => Ok(Value::Undefined),
    }
}

/// `base[property] = value`
pub fn put_by_val(vm: &mut Vm, base: &Value, property: &Value, value: Value) -> OpResult<()> {
    match base {
        Value::Object(object) => {
            put_property(vm, object, &property_key(property), value)?;
            Ok(())
        }
        Value::Undefined | Value::Null => Err(throw_error(
            vm,
            ErrorKind::TypeError,
            &format!(
                "{} is not an object (evaluating property '{}')",
                base.to_js_string(),
                property_key(property)
            ),
        )),
        _ => Ok(()),
    }
}

/// `delete base[property]`
pub fn delete_by_val(vm: &Vm, base: &Value, property: &Value) -> OpResult<bool> {
    match base {
        Value::Object(object) => Ok(object.delete_property(&property_key(property))),
        Value::Undefined | Value::Null => Err(throw_error(
            vm,
            ErrorKind::TypeError,
            &format!("{} is not an object", base.to_js_string()),
        )),
        _ => Ok(true),
    }
}

// ==================== Type tests ====================

/// `value instanceof constructor` with `prototype` already fetched
pub fn instance_of(vm: &Vm, value: &Value, constructor: &Value, prototype: &Value) -> OpResult<bool> {
    if constructor.as_object().is_none() {
        return Err(throw_error(
            vm,
            ErrorKind::TypeError,
            &format!("'{}' is not a valid argument for 'instanceof'", constructor.to_js_string()),
        ));
    }
    let Some(object) = value.as_object() else {
        return Ok(false);
    };
    let Some(prototype) = prototype.as_object() else {
        return Err(throw_error(
            vm,
            ErrorKind::TypeError,
            "instanceof called on an object with an invalid prototype property",
        ));
    };
    let mut current = object.prototype();
    while let Some(candidate) = current {
        if Arc::ptr_eq(&candidate, prototype) {
            return Ok(true);
        }
        current = candidate.prototype();
    }
    Ok(false)
}

/// `property in base`
pub fn has_property(vm: &Vm, property: &Value, base: &Value) -> OpResult<bool> {
    let Some(object) = base.as_object() else {
        return Err(throw_error(
            vm,
            ErrorKind::TypeError,
            &format!("'{}' is not a valid argument for 'in'", base.to_js_string()),
        ));
    };
    let key = property_key(property);
    Ok(match object.kind() {
        ObjectKind::Arguments(data) => {
            array_index(&key).is_some_and(|i| i < data.read().len()) || object.has_property(&key)
        }
        ObjectKind::Activation(data) => {
            data.read().code_block().symbol(&key).is_some() || object.has_property(&key)
        }
        _ => object.has_property(&key),
    })
}

// ==================== Name resolution ====================

fn scope_lookup(vm: &Vm, object: &Arc<JsObject>, ident: &str) -> Option<Value> {
    if let ObjectKind::Activation(data) = object.kind() {
        if let Some(value) = data.read().get_symbol(vm.registers(), ident) {
            return Some(value);
        }
    }
    object
        .has_property(ident)
        .then(|| get_property(vm, object, ident))
}

fn unresolved(vm: &Vm, ident: &str) -> Abrupt {
    throw_error(vm, ErrorKind::ReferenceError, &format!("Can't find variable: {ident}"))
}

/// Value of `ident` along the current frame's scope chain
pub fn resolve(vm: &Vm, ident: &str) -> OpResult<Value> {
    let scope = vm.registers().top().scope.clone();
    scope
        .iter()
        .find_map(|object| scope_lookup(vm, object, ident))
        .ok_or_else(|| unresolved(vm, ident))
}

fn resolve_holder(vm: &Vm, ident: &str) -> Option<(Arc<JsObject>, Value)> {
    let scope = vm.registers().top().scope.clone();
    scope
        .iter()
        .find_map(|object| scope_lookup(vm, object, ident).map(|value| (Arc::clone(object), value)))
}

/// Scope object holding `ident`; the global object when nothing does
pub fn resolve_base(vm: &Vm, ident: &str) -> Value {
    match resolve_holder(vm, ident) {
        Some((holder, _)) => Value::Object(holder),
        None => Value::Object(Arc::clone(vm.global_object())),
    }
}

/// `(this, value)` for calling `ident`. Activations are never exposed as
/// `this`.
pub fn resolve_with_base(vm: &Vm, ident: &str) -> OpResult<(Value, Value)> {
    let (holder, value) = resolve_holder(vm, ident).ok_or_else(|| unresolved(vm, ident))?;
    let this = match holder.kind() {
        ObjectKind::Activation(_) => Value::Undefined,
        _ => Value::Object(holder),
    };
    Ok((this, value))
}

/// Global variable read through global resolve site `site`
pub fn resolve_global(vm: &Vm, code_block: &CodeBlock, ident: &str, site: usize) -> OpResult<Value> {
    let global = Arc::clone(vm.global_object());
    let mut info = code_block.global_resolve_info(site);
    if let Some(value) = info.probe(&global) {
        return Ok(value);
    }
    info.misses = info.misses.saturating_add(1);
    if let Some((slot, value)) = global.get_own_property(ident) {
        let structure = global.structure();
        if structure.is_cacheable() {
            info.structure = Some(structure);
            info.offset = slot.offset;
        }
        return Ok(value);
    }
    drop(info);
    global.get(ident).ok_or_else(|| unresolved(vm, ident))
}

// ==================== Enumeration ====================

/// Enumerable property names of `object` and its prototypes, shadowed
/// names reported once
pub fn enumerable_names(object: &Arc<JsObject>) -> Vec<Arc<str>> {
    let mut seen = FxHashSet::default();
    let mut names = Vec::new();
    let mut current = Some(Arc::clone(object));
    while let Some(holder) = current {
        for key in holder.enumerable_keys() {
            if seen.insert(Arc::clone(&key)) {
                names.push(key);
            }
        }
        current = holder.prototype();
    }
    names
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_fast_path_and_overflow() {
        assert!(matches!(add(&Value::Int32(2), &Value::Int32(3)), Value::Int32(5)));
        let overflow = add(&Value::Int32(i32::MAX), &Value::Int32(1));
        assert_eq!(overflow.to_number(), i32::MAX as f64 + 1.0);
        assert_eq!(add(&Value::string("a"), &Value::Int32(1)).as_str(), Some("a1"));
        assert_eq!(add(&Value::Int32(1), &Value::string("b")).as_str(), Some("1b"));
    }

    #[test]
    fn test_arithmetic() {
        assert!(matches!(arithmetic(OpcodeId::Sub, &Value::Int32(2), &Value::Int32(5)), Value::Int32(-3)));
        assert!(matches!(arithmetic(OpcodeId::Mod, &Value::Int32(7), &Value::Int32(3)), Value::Int32(1)));
        assert_eq!(arithmetic(OpcodeId::Div, &Value::Int32(1), &Value::Int32(2)).to_number(), 0.5);
        // -0 leaves integer space
        let negative_zero = arithmetic(OpcodeId::Mul, &Value::Int32(-1), &Value::Int32(0));
        assert!(matches!(negative_zero, Value::Double(d) if d == 0.0 && d.is_sign_negative()));
        assert!(arithmetic(OpcodeId::Mod, &Value::Int32(1), &Value::Int32(0)).to_number().is_nan());
    }

    #[test]
    fn test_bitwise() {
        assert!(matches!(bitwise(OpcodeId::LShift, &Value::Int32(1), &Value::Int32(33)), Value::Int32(2)));
        assert_eq!(bitwise(OpcodeId::URShift, &Value::Int32(-1), &Value::Int32(0)).to_number(), 4294967295.0);
        assert!(matches!(bitwise(OpcodeId::RShift, &Value::Int32(-8), &Value::Int32(1)), Value::Int32(-4)));
    }

    #[test]
    fn test_negate_and_increment() {
        assert!(matches!(negate(&Value::Int32(5)), Value::Int32(-5)));
        assert!(matches!(negate(&Value::Int32(0)), Value::Double(d) if d.is_sign_negative()));
        assert_eq!(increment(&Value::Int32(i32::MAX), 1).to_number(), 2147483648.0);
        assert!(matches!(increment(&Value::string("4"), -1), Value::Int32(3)));
    }

    #[test]
    fn test_comparisons() {
        assert!(less(&Value::Int32(1), &Value::Int32(2)));
        assert!(!less(&Value::Double(f64::NAN), &Value::Int32(2)));
        assert!(less(&Value::string("a"), &Value::string("b")));
        assert!(less(&Value::string("10"), &Value::string("9")));
        assert!(less_eq(&Value::Int32(2), &Value::Int32(2)));
    }
}
