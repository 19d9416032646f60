//! Opcode identifiers and the opcode indirection table.
//!
//! Bytecode is generated against symbolic [`OpcodeId`]s. A linked
//! instruction stream stores numeric tags instead, and the mapping between
//! the two lives in an [`OpcodeTable`]. The table may be the identity or a
//! seeded permutation, so nothing outside this module may assume that a tag
//! equals the id's discriminant.

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// What an operand word of an instruction refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperandKind {
    /// Register index (signed, parameters are negative)
    Register,
    /// Index into the identifier table
    Identifier,
    /// Plain integer immediate
    Immediate,
    /// Absolute instruction offset
    Target,
    /// Index into the function declaration table
    Function,
    /// Index into the function expression table
    FunctionExpression,
    /// Index into the regular expression table
    RegExp,
    /// Index into the unexpected constant table
    UnexpectedConstant,
    /// Index of a property access cache site
    StructureStub,
    /// Index of a global resolve cache site
    GlobalResolve,
    /// Index of a call link site
    CallLink,
    /// Index into the immediate switch tables
    ImmediateTable,
    /// Index into the character switch tables
    CharacterTable,
    /// Index into the string switch tables
    StringTable,
}

macro_rules! define_opcodes {
    ($( $(#[$meta:meta])* $variant:ident = $name:literal [$($kind:ident),*] ),* $(,)?) => {
        /// Symbolic opcode identifier
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[repr(u16)]
        pub enum OpcodeId {
            $( $(#[$meta])* $variant, )*
        }

        impl OpcodeId {
            /// Every opcode, in declaration order
            pub const ALL: &'static [OpcodeId] = &[ $(OpcodeId::$variant,)* ];

            /// Number of opcodes
            pub const COUNT: usize = Self::ALL.len();

            /// Mnemonic used in dumps and serialized units
            pub const fn name(self) -> &'static str {
                match self {
                    $( OpcodeId::$variant => $name, )*
                }
            }

            /// Operand layout following the opcode word
            pub const fn operands(self) -> &'static [OperandKind] {
                match self {
                    $( OpcodeId::$variant => &[$(OperandKind::$kind),*], )*
                }
            }

            /// Look up an opcode by mnemonic
            pub fn from_name(name: &str) -> Option<Self> {
                match name {
                    $( $name => Some(OpcodeId::$variant), )*
                    _ => None,
                }
            }
        }
    };
}

define_opcodes! {
    // ==================== Frame setup ====================
    /// Initialize locals to undefined
    Enter = "enter" [],
    /// `enter` plus creation of the activation object
    EnterWithActivation = "enter_with_activation" [Register],
    /// Create the arguments object aliasing the frame
    CreateArguments = "create_arguments" [Register],
    /// Replace a primitive `this` with an object
    ConvertThis = "convert_this" [Register],

    // ==================== Constants & moves ====================
    /// dst = unexpected constant
    UnexpectedLoad = "unexpected_load" [Register, UnexpectedConstant],
    /// dst = {}
    NewObject = "new_object" [Register],
    /// dst = [first .. first + count]
    NewArray = "new_array" [Register, Register, Immediate],
    /// dst = /re/
    NewRegExp = "new_regexp" [Register, RegExp],
    /// dst = src
    Mov = "mov" [Register, Register],

    // ==================== Comparison ====================
    /// dst = !src
    Not = "not" [Register, Register],
    /// dst = a == b
    Eq = "eq" [Register, Register, Register],
    /// dst = a != b
    Neq = "neq" [Register, Register, Register],
    /// dst = a === b
    StrictEq = "stricteq" [Register, Register, Register],
    /// dst = a !== b
    NStrictEq = "nstricteq" [Register, Register, Register],
    /// dst = a < b
    Less = "less" [Register, Register, Register],
    /// dst = a <= b
    LessEq = "lesseq" [Register, Register, Register],
    /// dst = src == null
    EqNull = "eq_null" [Register, Register],
    /// dst = src != null
    NeqNull = "neq_null" [Register, Register],

    // ==================== Arithmetic ====================
    /// ++src_dst
    PreInc = "pre_inc" [Register],
    /// --src_dst
    PreDec = "pre_dec" [Register],
    /// dst = src_dst++
    PostInc = "post_inc" [Register, Register],
    /// dst = src_dst--
    PostDec = "post_dec" [Register, Register],
    /// dst = +src
    ToJsNumber = "to_jsnumber" [Register, Register],
    /// dst = -src
    Negate = "negate" [Register, Register],
    /// dst = a + b
    Add = "add" [Register, Register, Register],
    /// dst = a * b
    Mul = "mul" [Register, Register, Register],
    /// dst = a / b
    Div = "div" [Register, Register, Register],
    /// dst = a % b
    Mod = "mod" [Register, Register, Register],
    /// dst = a - b
    Sub = "sub" [Register, Register, Register],

    // ==================== Bitwise ====================
    /// dst = a << b
    LShift = "lshift" [Register, Register, Register],
    /// dst = a >> b
    RShift = "rshift" [Register, Register, Register],
    /// dst = a >>> b
    URShift = "urshift" [Register, Register, Register],
    /// dst = a & b
    BitAnd = "bitand" [Register, Register, Register],
    /// dst = a ^ b
    BitXor = "bitxor" [Register, Register, Register],
    /// dst = a | b
    BitOr = "bitor" [Register, Register, Register],
    /// dst = ~src
    BitNot = "bitnot" [Register, Register],

    // ==================== Type tests ====================
    /// dst = value instanceof constructor (prototype preloaded)
    InstanceOf = "instanceof" [Register, Register, Register, Register],
    /// dst = typeof src
    TypeOf = "typeof" [Register, Register],
    /// dst = property in base
    In = "in" [Register, Register, Register],

    // ==================== Name resolution ====================
    /// dst = lookup(identifier) along the scope chain
    Resolve = "resolve" [Register, Identifier],
    /// dst = global[identifier], cached per site
    ResolveGlobal = "resolve_global" [Register, Identifier, GlobalResolve],
    /// dst = scope object holding identifier
    ResolveBase = "resolve_base" [Register, Identifier],
    /// base_dst, dst = holder and value of identifier
    ResolveWithBase = "resolve_with_base" [Register, Register, Identifier],
    /// dst = scope[skip].registers[index]
    GetScopedVar = "get_scoped_var" [Register, Immediate, Immediate],
    /// scope[skip].registers[index] = value
    PutScopedVar = "put_scoped_var" [Immediate, Immediate, Register],

    // ==================== Property access ====================
    /// dst = base.identifier
    GetById = "get_by_id" [Register, Register, Identifier, StructureStub],
    /// base.identifier = value
    PutById = "put_by_id" [Register, Identifier, Register, StructureStub],
    /// dst = delete base.identifier
    DelById = "del_by_id" [Register, Register, Identifier],
    /// dst = base[property]
    GetByVal = "get_by_val" [Register, Register, Register],
    /// base[property] = value
    PutByVal = "put_by_val" [Register, Register, Register],
    /// dst = delete base[property]
    DelByVal = "del_by_val" [Register, Register, Register],
    /// base[index] = value
    PutByIndex = "put_by_index" [Register, Immediate, Register],

    // ==================== Control flow ====================
    /// Unconditional jump
    Jmp = "jmp" [Target],
    /// Jump if truthy
    JTrue = "jtrue" [Register, Target],
    /// Jump if falsy
    JFalse = "jfalse" [Register, Target],
    /// Jump if null or undefined
    JEqNull = "jeq_null" [Register, Target],
    /// Jump unless null or undefined
    JNeqNull = "jneq_null" [Register, Target],
    /// Jump if a < b
    JLess = "jless" [Register, Register, Target],
    /// Jump unless a < b
    JNLess = "jnless" [Register, Register, Target],
    /// Loop back-edge
    Loop = "loop" [Target],
    /// Loop back-edge if truthy
    LoopIfTrue = "loop_if_true" [Register, Target],
    /// Loop back-edge if a < b
    LoopIfLess = "loop_if_less" [Register, Register, Target],
    /// Switch over int32 values
    SwitchImm = "switch_imm" [ImmediateTable, Target, Register],
    /// Switch over single character strings
    SwitchChar = "switch_char" [CharacterTable, Target, Register],
    /// Switch over strings
    SwitchString = "switch_string" [StringTable, Target, Register],

    // ==================== Functions ====================
    /// dst = closure over a declared function
    NewFunc = "new_func" [Register, Function],
    /// dst = closure over a function expression
    NewFuncExp = "new_func_exp" [Register, FunctionExpression],
    /// dst = func(this = first, args...)
    Call = "call" [Register, Register, Register, Immediate, CallLink],
    /// Call that may be a direct eval
    CallEval = "call_eval" [Register, Register, Register, Immediate, CallLink],
    /// dst = new func(args...) with preloaded prototype
    Construct = "construct" [Register, Register, Register, Register, Immediate, CallLink],
    /// Copy the activation out of the register file
    TearOffActivation = "tear_off_activation" [Register],
    /// Copy the arguments object out of the register file
    TearOffArguments = "tear_off_arguments" [],
    /// Return from the current frame
    Ret = "ret" [Register],

    // ==================== Scopes ====================
    /// Push an object onto the scope chain
    PushScope = "push_scope" [Register],
    /// Pop the innermost scope
    PopScope = "pop_scope" [],
    /// Pop count scopes and jump
    JmpScopes = "jmp_scopes" [Immediate, Target],

    // ==================== Enumeration ====================
    /// dst = property name iterator over base
    GetPNames = "get_pnames" [Register, Register],
    /// dst = next name, or fall through when exhausted
    NextPName = "next_pname" [Register, Register, Target],

    // ==================== Exceptions ====================
    /// dst = pending exception
    Catch = "catch" [Register],
    /// Throw value
    Throw = "throw" [Register],
    /// dst = new error of the given type
    NewError = "new_error" [Register, Immediate, Register],

    // ==================== Misc ====================
    /// Debugger hook
    Debug = "debug" [Immediate, Immediate, Immediate],
    /// End of global or eval code
    End = "end" [Register],
}

impl OpcodeId {
    /// Length in words (opcode word plus operands)
    #[inline]
    pub const fn length(self) -> usize {
        self.operands().len() + 1
    }

    /// Whether this opcode is a loop back-edge (an interrupt safe point)
    pub const fn is_loop(self) -> bool {
        matches!(self, OpcodeId::Loop | OpcodeId::LoopIfTrue | OpcodeId::LoopIfLess)
    }

    /// Whether control never falls through to the next instruction
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            OpcodeId::Jmp
                | OpcodeId::Loop
                | OpcodeId::Ret
                | OpcodeId::End
                | OpcodeId::Throw
                | OpcodeId::JmpScopes
        )
    }
}

impl std::fmt::Display for OpcodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl Serialize for OpcodeId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

impl<'de> Deserialize<'de> for OpcodeId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        OpcodeId::from_name(&name)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown opcode `{name}`")))
    }
}

/// Mapping between symbolic opcodes and the numeric tags stored in linked code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpcodeTable {
    /// Tag for each opcode, indexed by `OpcodeId as usize`
    tags: Vec<u32>,
    /// Opcode for each tag
    ids: Vec<OpcodeId>,
}

impl OpcodeTable {
    /// Table where every tag equals the opcode's declaration index
    pub fn identity() -> Self {
        Self {
            tags: (0..OpcodeId::COUNT as u32).collect(),
            ids: OpcodeId::ALL.to_vec(),
        }
    }

    /// Table with tags permuted by a seeded shuffle.
    ///
    /// The same seed always produces the same table.
    pub fn shuffled(seed: u64) -> Self {
        let mut ids = OpcodeId::ALL.to_vec();
        let mut state = seed;
        for i in (1..ids.len()).rev() {
            let j = (splitmix64(&mut state) % (i as u64 + 1)) as usize;
            ids.swap(i, j);
        }
        let mut tags = vec![0; OpcodeId::COUNT];
        for (tag, id) in ids.iter().enumerate() {
            tags[*id as usize] = tag as u32;
        }
        Self { tags, ids }
    }

    /// Tag stored in linked code for `id`
    #[inline]
    pub fn tag(&self, id: OpcodeId) -> u32 {
        self.tags[id as usize]
    }

    /// Opcode for a linked tag
    #[inline]
    pub fn decode(&self, tag: u32) -> Option<OpcodeId> {
        self.ids.get(tag as usize).copied()
    }
}

impl Default for OpcodeTable {
    fn default() -> Self {
        Self::identity()
    }
}

fn splitmix64(state: &mut u64) -> u64 {
    *state = state.wrapping_add(0x9E37_79B9_7F4A_7C15);
    let mut z = *state;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_round_trip() {
        for &op in OpcodeId::ALL {
            assert_eq!(OpcodeId::from_name(op.name()), Some(op));
        }
        assert_eq!(OpcodeId::from_name("nop"), None);
    }

    #[test]
    fn test_lengths() {
        assert_eq!(OpcodeId::Enter.length(), 1);
        assert_eq!(OpcodeId::Add.length(), 4);
        assert_eq!(OpcodeId::GetById.length(), 5);
        assert_eq!(OpcodeId::Construct.length(), 7);
        assert_eq!(OpcodeId::Ret.length(), 2);
    }

    #[test]
    fn test_identity_table() {
        let table = OpcodeTable::identity();
        for &op in OpcodeId::ALL {
            assert_eq!(table.tag(op), op as u32);
            assert_eq!(table.decode(table.tag(op)), Some(op));
        }
        assert_eq!(table.decode(OpcodeId::COUNT as u32), None);
    }

    #[test]
    fn test_shuffled_table_is_a_permutation() {
        let table = OpcodeTable::shuffled(0xDEAD_BEEF);
        let mut seen = vec![false; OpcodeId::COUNT];
        for &op in OpcodeId::ALL {
            let tag = table.tag(op) as usize;
            assert!(!seen[tag]);
            seen[tag] = true;
            assert_eq!(table.decode(tag as u32), Some(op));
        }
        assert_ne!(table, OpcodeTable::identity());
        assert_eq!(table, OpcodeTable::shuffled(0xDEAD_BEEF));
    }

    #[test]
    fn test_serde_uses_mnemonic() {
        let json = serde_json::to_string(&OpcodeId::StrictEq).unwrap();
        assert_eq!(json, "\"stricteq\"");
        let op: OpcodeId = serde_json::from_str("\"get_by_id\"").unwrap();
        assert_eq!(op, OpcodeId::GetById);
        assert!(serde_json::from_str::<OpcodeId>("\"bogus\"").is_err());
    }
}
