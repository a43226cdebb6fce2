//! Instructions of the structured model.

use crate::desc::{ClassDesc, ConstantDesc, DynamicCallSiteDesc};
use crate::opcodes::*;

/// A position in a code body, allocated by the [`CodeBuilder`] or parser
/// that owns the body.
///
/// [`CodeBuilder`]: crate::builder::CodeBuilder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LabelNode(pub(crate) u32);

impl LabelNode {
    pub fn id(&self) -> u32 {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeKind {
    Byte,
    Short,
    Char,
    Int,
    Long,
    Float,
    Double,
    Reference,
    Boolean,
    Void,
}

impl TypeKind {
    /// Kind of a value held in a local or on the stack.
    pub fn from_descriptor(descriptor: &str) -> TypeKind {
        match descriptor.as_bytes().first() {
            Some(b'B') => TypeKind::Byte,
            Some(b'S') => TypeKind::Short,
            Some(b'C') => TypeKind::Char,
            Some(b'I') => TypeKind::Int,
            Some(b'J') => TypeKind::Long,
            Some(b'F') => TypeKind::Float,
            Some(b'D') => TypeKind::Double,
            Some(b'Z') => TypeKind::Boolean,
            Some(b'V') => TypeKind::Void,
            _ => TypeKind::Reference,
        }
    }

    pub fn from_newarray_code(code: u8) -> Option<TypeKind> {
        let kind = match code {
            T_BOOLEAN => TypeKind::Boolean,
            T_CHAR => TypeKind::Char,
            T_FLOAT => TypeKind::Float,
            T_DOUBLE => TypeKind::Double,
            T_BYTE => TypeKind::Byte,
            T_SHORT => TypeKind::Short,
            T_INT => TypeKind::Int,
            T_LONG => TypeKind::Long,
            _ => return None,
        };
        Some(kind)
    }

    pub fn newarray_code(&self) -> Option<u8> {
        let code = match self {
            TypeKind::Boolean => T_BOOLEAN,
            TypeKind::Char => T_CHAR,
            TypeKind::Float => T_FLOAT,
            TypeKind::Double => T_DOUBLE,
            TypeKind::Byte => T_BYTE,
            TypeKind::Short => T_SHORT,
            TypeKind::Int => T_INT,
            TypeKind::Long => T_LONG,
            TypeKind::Reference | TypeKind::Void => return None,
        };
        Some(code)
    }

    /// Offset of this kind within the `xLOAD`, `xSTORE` and `xRETURN`
    /// opcode families.
    fn slot_offset(&self) -> u8 {
        match self {
            TypeKind::Long => 1,
            TypeKind::Float => 2,
            TypeKind::Double => 3,
            TypeKind::Reference => 4,
            _ => 0,
        }
    }

    fn from_slot_offset(offset: u8) -> TypeKind {
        match offset {
            1 => TypeKind::Long,
            2 => TypeKind::Float,
            3 => TypeKind::Double,
            4 => TypeKind::Reference,
            _ => TypeKind::Int,
        }
    }

    fn array_offset(&self) -> u8 {
        match self {
            TypeKind::Long => 1,
            TypeKind::Float => 2,
            TypeKind::Double => 3,
            TypeKind::Reference => 4,
            TypeKind::Byte | TypeKind::Boolean => 5,
            TypeKind::Char => 6,
            TypeKind::Short => 7,
            TypeKind::Int | TypeKind::Void => 0,
        }
    }

    fn from_array_offset(offset: u8) -> TypeKind {
        match offset {
            1 => TypeKind::Long,
            2 => TypeKind::Float,
            3 => TypeKind::Double,
            4 => TypeKind::Reference,
            5 => TypeKind::Byte,
            6 => TypeKind::Char,
            7 => TypeKind::Short,
            _ => TypeKind::Int,
        }
    }

    pub fn is_wide(&self) -> bool {
        matches!(self, TypeKind::Long | TypeKind::Double)
    }
}

/// One instruction. Branch and switch targets are labels of the enclosing
/// code body.
#[derive(Debug, Clone, PartialEq)]
pub enum Insn {
    Nop,
    /// `ACONST_NULL` and the `xCONST_n` family.
    ConstantIntrinsic(u8),
    /// `BIPUSH` or `SIPUSH`.
    Push { opcode: u8, value: i32 },
    Ldc(ConstantDesc),
    Load { kind: TypeKind, slot: u16 },
    Store { kind: TypeKind, slot: u16 },
    Increment { slot: u16, constant: i16 },
    ArrayLoad(TypeKind),
    ArrayStore(TypeKind),
    /// `POP` through `SWAP`.
    Stack(u8),
    /// Arithmetic, shifts, bitwise operations, comparisons and
    /// `ARRAYLENGTH`.
    Operator(u8),
    /// `I2L` through `I2S`.
    Convert(u8),
    /// Conditional jumps, `GOTO` and `JSR`.
    Branch { opcode: u8, target: LabelNode },
    TableSwitch {
        low: i32,
        high: i32,
        default: LabelNode,
        targets: Vec<LabelNode>,
    },
    LookupSwitch {
        default: LabelNode,
        cases: Vec<(i32, LabelNode)>,
    },
    Return(TypeKind),
    Throw,
    Field {
        opcode: u8,
        owner: ClassDesc,
        name: String,
        descriptor: String,
    },
    Invoke {
        opcode: u8,
        owner: ClassDesc,
        name: String,
        descriptor: String,
        is_interface: bool,
    },
    InvokeDynamic(DynamicCallSiteDesc),
    NewObject(ClassDesc),
    NewPrimitiveArray(TypeKind),
    /// `ANEWARRAY`, holding the component type.
    NewReferenceArray(ClassDesc),
    NewMultiArray { array_type: ClassDesc, dimensions: u8 },
    /// `CHECKCAST` or `INSTANCEOF`.
    TypeCheck { opcode: u8, class: ClassDesc },
    /// `MONITORENTER` or `MONITOREXIT`.
    Monitor(u8),
    Ret(u16),
}

impl Insn {
    /// Builds the instruction for an opcode without operands. Short load
    /// and store forms such as `ALOAD_0` become [`Insn::Load`] and
    /// [`Insn::Store`].
    pub fn simple(opcode: u8) -> Option<Insn> {
        let insn = match opcode {
            NOP => Insn::Nop,
            ACONST_NULL..=DCONST_1 => Insn::ConstantIntrinsic(opcode),
            ILOAD_0..=ALOAD_3 => {
                let relative = opcode - ILOAD_0;
                Insn::Load {
                    kind: TypeKind::from_slot_offset(relative / 4),
                    slot: (relative % 4) as u16,
                }
            }
            IALOAD..=SALOAD => Insn::ArrayLoad(TypeKind::from_array_offset(opcode - IALOAD)),
            ISTORE_0..=ASTORE_3 => {
                let relative = opcode - ISTORE_0;
                Insn::Store {
                    kind: TypeKind::from_slot_offset(relative / 4),
                    slot: (relative % 4) as u16,
                }
            }
            IASTORE..=SASTORE => Insn::ArrayStore(TypeKind::from_array_offset(opcode - IASTORE)),
            POP..=SWAP => Insn::Stack(opcode),
            IADD..=LXOR | LCMP..=DCMPG | ARRAYLENGTH => Insn::Operator(opcode),
            I2L..=I2S => Insn::Convert(opcode),
            IRETURN..=ARETURN => Insn::Return(TypeKind::from_slot_offset(opcode - IRETURN)),
            RETURN => Insn::Return(TypeKind::Void),
            ATHROW => Insn::Throw,
            MONITORENTER | MONITOREXIT => Insn::Monitor(opcode),
            _ => return None,
        };
        Some(insn)
    }

    /// Builds a load, store or `RET` with an explicit slot.
    pub fn var(opcode: u8, slot: u16) -> Option<Insn> {
        let insn = match opcode {
            ILOAD..=ALOAD => Insn::Load {
                kind: TypeKind::from_slot_offset(opcode - ILOAD),
                slot,
            },
            ISTORE..=ASTORE => Insn::Store {
                kind: TypeKind::from_slot_offset(opcode - ISTORE),
                slot,
            },
            RET => Insn::Ret(slot),
            _ => return None,
        };
        Some(insn)
    }

    /// The canonical opcode. Loads and stores report their explicit-slot
    /// form, constant loads `LDC` or `LDC2_W`.
    pub fn opcode(&self) -> u8 {
        match self {
            Insn::Nop => NOP,
            Insn::ConstantIntrinsic(op)
            | Insn::Push { opcode: op, .. }
            | Insn::Stack(op)
            | Insn::Operator(op)
            | Insn::Convert(op)
            | Insn::Branch { opcode: op, .. }
            | Insn::Field { opcode: op, .. }
            | Insn::Invoke { opcode: op, .. }
            | Insn::TypeCheck { opcode: op, .. }
            | Insn::Monitor(op) => *op,
            Insn::Ldc(value) => {
                if value.is_wide() {
                    LDC2_W
                } else {
                    LDC
                }
            }
            Insn::Load { kind, .. } => ILOAD + kind.slot_offset(),
            Insn::Store { kind, .. } => ISTORE + kind.slot_offset(),
            Insn::Increment { .. } => IINC,
            Insn::ArrayLoad(kind) => IALOAD + kind.array_offset(),
            Insn::ArrayStore(kind) => IASTORE + kind.array_offset(),
            Insn::TableSwitch { .. } => TABLESWITCH,
            Insn::LookupSwitch { .. } => LOOKUPSWITCH,
            Insn::Return(TypeKind::Void) => RETURN,
            Insn::Return(kind) => IRETURN + kind.slot_offset(),
            Insn::Throw => ATHROW,
            Insn::InvokeDynamic(_) => INVOKEDYNAMIC,
            Insn::NewObject(_) => NEW,
            Insn::NewPrimitiveArray(_) => NEWARRAY,
            Insn::NewReferenceArray(_) => ANEWARRAY,
            Insn::NewMultiArray { .. } => MULTIANEWARRAY,
            Insn::Ret(_) => RET,
        }
    }
}

/// An entry of a code body in program order.
#[derive(Debug, Clone, PartialEq)]
pub enum CodeElement {
    Label(LabelNode),
    /// Marks the start of a source line at this point.
    LineNumber(u16),
    Insn(Insn),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_forms_become_explicit_slots() {
        assert_eq!(
            Insn::simple(ALOAD_0),
            Some(Insn::Load { kind: TypeKind::Reference, slot: 0 })
        );
        assert_eq!(
            Insn::simple(LLOAD_0 + 3),
            Some(Insn::Load { kind: TypeKind::Long, slot: 3 })
        );
        assert_eq!(
            Insn::simple(ISTORE_0 + 2),
            Some(Insn::Store { kind: TypeKind::Int, slot: 2 })
        );
        assert_eq!(Insn::simple(ALOAD_0).map(|i| i.opcode()), Some(ALOAD));
    }

    #[test]
    fn opcodes_round_trip_through_kinds() {
        let opcodes = [
            IALOAD, BALOAD, CALOAD, SALOAD, AASTORE, IRETURN, ARETURN, RETURN, DCMPG, I2S,
        ];
        for opcode in opcodes {
            assert_eq!(Insn::simple(opcode).map(|i| i.opcode()), Some(opcode));
        }
        assert_eq!(Insn::var(DSTORE, 9).map(|i| i.opcode()), Some(DSTORE));
        assert!(Insn::simple(BIPUSH).is_none());
        assert!(Insn::var(IINC, 1).is_none());
    }
}
