//! Inline cache records.
//!
//! Property access sites, global resolve sites and call sites each own one
//! record in their code block. Both execution backends use the same
//! records: the interpreter probes and fills them, the compiling backend
//! additionally attaches a fast path.
//!
//! A property access site moves `Unset -> Monomorphic -> Polymorphic ->
//! Generic` and never back. Every structure a record refers to is held
//! strongly, which is what pins it for the lifetime of the cache entry.

use std::sync::{Arc, Weak};

use smallvec::SmallVec;

use crate::code_block::{CodeBlock, CodeBlockId};
use crate::object::JsObject;
use crate::structure::Structure;
use crate::value::Value;

/// Entries a polymorphic site holds before it goes generic
pub const POLYMORPHIC_CAPACITY: usize = 4;

/// Snapshot of the prototype structures above a base structure.
///
/// Valid while every prototype still has its snapshotted structure;
/// checked element-wise by identity without consulting property tables.
#[derive(Debug, Clone)]
pub struct StructureChain {
    structures: SmallVec<[Arc<Structure>; 4]>,
}

impl StructureChain {
    /// Snapshot the chain above `base` up to and including `holder`, or to
    /// the end of the chain when `holder` is `None`
    pub fn capture(base: &Structure, holder: Option<&Arc<JsObject>>) -> Self {
        let mut structures = SmallVec::new();
        let mut current = base.prototype().cloned();
        while let Some(object) = current {
            let structure = object.structure();
            current = structure.prototype().cloned();
            structures.push(structure);
            if holder.is_some_and(|h| Arc::ptr_eq(h, &object)) {
                break;
            }
        }
        Self { structures }
    }

    /// Whether the prototypes above `base` still match the snapshot
    pub fn is_valid(&self, base: &Structure) -> bool {
        let mut current = base.prototype().cloned();
        for expected in &self.structures {
            let Some(object) = current else {
                return false;
            };
            if !object.has_structure(expected) {
                return false;
            }
            current = expected.prototype().cloned();
        }
        true
    }

    /// Snapshotted structures, nearest prototype first
    pub fn structures(&self) -> &[Arc<Structure>] {
        &self.structures
    }
}

/// One cached way of performing an access
#[derive(Debug, Clone)]
pub enum CachedAccess {
    /// Own property of the base
    GetSelf {
        /// Base structure
        structure: Arc<Structure>,
        /// Storage offset in the base
        offset: usize,
    },
    /// Property of the direct prototype
    GetProto {
        /// Base structure
        structure: Arc<Structure>,
        /// Prototype structure
        proto_structure: Arc<Structure>,
        /// The prototype
        holder: Arc<JsObject>,
        /// Storage offset in the prototype
        offset: usize,
    },
    /// Property further up the prototype chain
    GetChain {
        /// Base structure
        structure: Arc<Structure>,
        /// Prototype structures up to the holder
        chain: StructureChain,
        /// Object owning the property
        holder: Arc<JsObject>,
        /// Storage offset in the holder
        offset: usize,
    },
    /// `length` of an array
    GetArrayLength,
    /// `length` of a string
    GetStringLength,
    /// Overwrite of an existing own property
    PutReplace {
        /// Base structure
        structure: Arc<Structure>,
        /// Storage offset
        offset: usize,
    },
    /// Addition of a new own property
    PutTransition {
        /// Structure before the add
        old: Arc<Structure>,
        /// Structure after the add
        new: Arc<Structure>,
        /// Prototype snapshot (no read-only property may appear above)
        chain: StructureChain,
    },
}

impl CachedAccess {
    /// Structures this entry pins
    pub fn structures(&self) -> Vec<Arc<Structure>> {
        match self {
            CachedAccess::GetSelf { structure, .. } | CachedAccess::PutReplace { structure, .. } => {
                vec![Arc::clone(structure)]
            }
            CachedAccess::GetProto {
                structure,
                proto_structure,
                ..
            } => vec![Arc::clone(structure), Arc::clone(proto_structure)],
            CachedAccess::GetChain {
                structure, chain, ..
            } => std::iter::once(Arc::clone(structure))
                .chain(chain.structures().iter().cloned())
                .collect(),
            CachedAccess::PutTransition { old, new, chain } => [Arc::clone(old), Arc::clone(new)]
                .into_iter()
                .chain(chain.structures().iter().cloned())
                .collect(),
            CachedAccess::GetArrayLength | CachedAccess::GetStringLength => Vec::new(),
        }
    }

    /// Structure of the accessed object this entry is keyed on
    fn base_structure(&self) -> Option<&Arc<Structure>> {
        match self {
            CachedAccess::GetSelf { structure, .. }
            | CachedAccess::GetProto { structure, .. }
            | CachedAccess::GetChain { structure, .. }
            | CachedAccess::PutReplace { structure, .. } => Some(structure),
            CachedAccess::PutTransition { old, .. } => Some(old),
            CachedAccess::GetArrayLength | CachedAccess::GetStringLength => None,
        }
    }

    /// Whether `other` caches an access for the same kind of base
    fn same_base(&self, other: &CachedAccess) -> bool {
        match (self.base_structure(), other.base_structure()) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            (None, None) => std::mem::discriminant(self) == std::mem::discriminant(other),
            _ => false,
        }
    }

    /// Try this entry as a load from `base`
    fn load(&self, base: &Value) -> Option<Value> {
        match (self, base) {
            (CachedAccess::GetStringLength, Value::String(s)) => {
                Some(Value::number(s.encode_utf16().count() as f64))
            }
            (CachedAccess::GetArrayLength, Value::Object(object)) => object
                .array_elements()
                .map(|elements| Value::number(elements.read().len() as f64)),
            (CachedAccess::GetSelf { structure, offset }, Value::Object(object)) => {
                object.has_structure(structure).then(|| object.get_direct(*offset))
            }
            (
                CachedAccess::GetProto {
                    structure,
                    proto_structure,
                    holder,
                    offset,
                },
                Value::Object(object),
            ) => (object.has_structure(structure) && holder.has_structure(proto_structure))
                .then(|| holder.get_direct(*offset)),
            (
                CachedAccess::GetChain {
                    structure,
                    chain,
                    holder,
                    offset,
                },
                Value::Object(object),
            ) => (object.has_structure(structure) && chain.is_valid(structure))
                .then(|| holder.get_direct(*offset)),
            _ => None,
        }
    }

    /// Try this entry as a store into `object`
    fn store(&self, object: &JsObject, value: &Value) -> bool {
        match self {
            CachedAccess::PutReplace { structure, offset } => {
                object.put_direct_if(structure, *offset, value.clone())
            }
            CachedAccess::PutTransition { old, new, chain } => {
                object.has_structure(old)
                    && chain.is_valid(old)
                    && object.transition_if(old, new, value.clone())
            }
            _ => false,
        }
    }

    /// Mnemonic used in code block dumps
    pub fn describe(&self) -> &'static str {
        match self {
            CachedAccess::GetSelf { .. } => "get_by_id_self",
            CachedAccess::GetProto { .. } => "get_by_id_proto",
            CachedAccess::GetChain { .. } => "get_by_id_chain",
            CachedAccess::GetArrayLength => "get_array_length",
            CachedAccess::GetStringLength => "get_string_length",
            CachedAccess::PutReplace { .. } => "put_by_id_replace",
            CachedAccess::PutTransition { .. } => "put_by_id_transition",
        }
    }
}

/// Cache state of a property access site
#[derive(Debug, Clone, Default)]
pub enum StubState {
    /// Never executed or reset
    #[default]
    Unset,
    /// One cached access
    Monomorphic(CachedAccess),
    /// Up to [`POLYMORPHIC_CAPACITY`] cached accesses
    Polymorphic(SmallVec<[CachedAccess; POLYMORPHIC_CAPACITY]>),
    /// Too many shapes seen; always take the slow path
    Generic,
}

/// Which instruction owns a structure stub
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessKind {
    /// `get_by_id`
    Get,
    /// `put_by_id`
    Put,
}

/// Fast path attached by the compiling backend: a single structure check
/// guarding a direct storage access
#[derive(Debug, Clone)]
pub struct PatchedAccess {
    /// Expected base structure
    pub structure: Arc<Structure>,
    /// Storage offset
    pub offset: usize,
}

/// Inline cache for one `get_by_id` / `put_by_id` site
#[derive(Debug, Clone)]
pub struct StructureStubInfo {
    /// Owning instruction kind
    pub kind: AccessKind,
    /// Offset of the owning instruction
    pub bytecode_offset: u32,
    state: StubState,
    misses: u32,
    hits: u64,
    /// Compiled fast path, if any
    pub fast_path: Option<PatchedAccess>,
}

impl StructureStubInfo {
    /// Empty cache for a site
    pub fn new(kind: AccessKind, bytecode_offset: u32) -> Self {
        Self {
            kind,
            bytecode_offset,
            state: StubState::Unset,
            misses: 0,
            hits: 0,
            fast_path: None,
        }
    }

    /// Current state
    #[inline]
    pub fn state(&self) -> &StubState {
        &self.state
    }

    /// Slow-path executions
    #[inline]
    pub fn misses(&self) -> u32 {
        self.misses
    }

    /// Cached executions
    #[inline]
    pub fn hits(&self) -> u64 {
        self.hits
    }

    /// Whether the site gave up caching
    pub fn is_generic(&self) -> bool {
        matches!(self.state, StubState::Generic)
    }

    fn entries(&self) -> &[CachedAccess] {
        match &self.state {
            StubState::Monomorphic(access) => std::slice::from_ref(access),
            StubState::Polymorphic(list) => list,
            StubState::Unset | StubState::Generic => &[],
        }
    }

    /// Cached load; `None` is a miss
    pub fn probe_get(&mut self, base: &Value) -> Option<Value> {
        let value = self.entries().iter().find_map(|entry| entry.load(base))?;
        self.hits += 1;
        Some(value)
    }

    /// Cached store; `false` is a miss
    pub fn probe_put(&mut self, object: &JsObject, value: &Value) -> bool {
        let stored = self.entries().iter().any(|entry| entry.store(object, value));
        if stored {
            self.hits += 1;
        }
        stored
    }

    /// Count a slow-path execution
    pub fn record_miss(&mut self) {
        self.misses = self.misses.saturating_add(1);
    }

    /// Add an access after a miss, widening the state. An entry for the
    /// same base structure is stale and gets replaced in place.
    pub fn install(&mut self, access: CachedAccess) {
        match &mut self.state {
            StubState::Monomorphic(entry) if entry.same_base(&access) => {
                *entry = access;
                self.fast_path = None;
                return;
            }
            StubState::Polymorphic(list) => {
                if let Some(entry) = list.iter_mut().find(|entry| entry.same_base(&access)) {
                    *entry = access;
                    return;
                }
            }
            _ => {}
        }
        self.state = match std::mem::take(&mut self.state) {
            StubState::Unset => StubState::Monomorphic(access),
            StubState::Monomorphic(first) => {
                let mut list = SmallVec::new();
                list.push(first);
                list.push(access);
                StubState::Polymorphic(list)
            }
            StubState::Polymorphic(mut list) if list.len() < POLYMORPHIC_CAPACITY => {
                list.push(access);
                StubState::Polymorphic(list)
            }
            StubState::Polymorphic(_) | StubState::Generic => {
                tracing::debug!(offset = self.bytecode_offset, "inline cache went generic");
                self.fast_path = None;
                StubState::Generic
            }
        };
    }

    /// Structures pinned by this site
    pub fn structures(&self) -> Vec<Arc<Structure>> {
        self.entries().iter().flat_map(CachedAccess::structures).collect()
    }

    /// Drop cached entries and release their structures.
    ///
    /// A generic site stays generic.
    pub fn clear(&mut self) {
        if !self.is_generic() {
            self.state = StubState::Unset;
        }
        self.fast_path = None;
    }
}

/// Inline cache for one `resolve_global` site
#[derive(Debug, Clone, Default)]
pub struct GlobalResolveInfo {
    /// Offset of the owning instruction
    pub bytecode_offset: u32,
    /// Global object structure at fill time
    pub structure: Option<Arc<Structure>>,
    /// Storage offset in the global object
    pub offset: usize,
    /// Slow-path executions
    pub misses: u32,
}

impl GlobalResolveInfo {
    /// Empty cache for a site
    pub fn new(bytecode_offset: u32) -> Self {
        Self {
            bytecode_offset,
            ..Default::default()
        }
    }

    /// Cached load from `global`
    #[inline]
    pub fn probe(&self, global: &JsObject) -> Option<Value> {
        let structure = self.structure.as_ref()?;
        global
            .has_structure(structure)
            .then(|| global.get_direct(self.offset))
    }
}

/// Link record for one call site
#[derive(Debug, Clone, Default)]
pub struct CallLinkInfo {
    /// Offset of the owning instruction
    pub bytecode_offset: u32,
    callee: Option<Weak<CodeBlock>>,
    callee_id: Option<CodeBlockId>,
}

impl CallLinkInfo {
    /// Unlinked record for a site
    pub fn new(bytecode_offset: u32) -> Self {
        Self {
            bytecode_offset,
            ..Default::default()
        }
    }

    /// Whether the site is linked to a live callee
    pub fn is_linked(&self) -> bool {
        self.callee.as_ref().is_some_and(|weak| weak.strong_count() > 0)
    }

    /// Whether the site is linked to exactly `callee`
    #[inline]
    pub fn is_linked_to(&self, callee: &CodeBlock) -> bool {
        self.callee_id == Some(callee.id()) && self.is_linked()
    }

    /// Linked callee
    pub fn callee(&self) -> Option<Arc<CodeBlock>> {
        self.callee.as_ref().and_then(Weak::upgrade)
    }

    /// Identity of the linked callee
    pub fn callee_id(&self) -> Option<CodeBlockId> {
        self.callee_id
    }

    pub(crate) fn set_linked(&mut self, callee: &Arc<CodeBlock>) {
        self.callee = Some(Arc::downgrade(callee));
        self.callee_id = Some(callee.id());
    }

    pub(crate) fn set_unlinked(&mut self) {
        self.callee = None;
        self.callee_id = None;
    }
}

/// Reverse link from a callee to one of its linked call sites
#[derive(Debug, Clone)]
pub struct CallerLink {
    /// Calling code block
    pub caller: Weak<CodeBlock>,
    /// Identity of the calling code block
    pub caller_id: CodeBlockId,
    /// Call link index in the caller
    pub link_index: usize,
}
