//! Instruction decoding and encoding shared by the readers, the writers and
//! the frame analyzer.

use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;

use crate::bytes::{
    write_i1, write_i2, write_i2_at, write_i4, write_i4_at, write_switch_padding, write_u1,
    write_u2, ByteReader,
};
use crate::error::{ClassReadError, ClassWriteError, Error, Result};
use crate::frame::parameter_descriptors;
use crate::opcodes::*;

/// The operand of a decoded instruction. Code positions are absolute
/// offsets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operand {
    None,
    /// `BIPUSH`, `SIPUSH` or the array type code of `NEWARRAY`.
    Int(i32),
    Local(u16),
    Iinc { index: u16, increment: i16 },
    /// A loadable constant pool entry.
    Constant(u16),
    Member(u16),
    InvokeDynamic(u16),
    Class(u16),
    Branch(usize),
    TableSwitch {
        default: usize,
        low: i32,
        high: i32,
        targets: Vec<usize>,
    },
    LookupSwitch {
        default: usize,
        pairs: Vec<(i32, usize)>,
    },
    MultiANewArray { index: u16, dimensions: u8 },
}

/// A decoded instruction.
///
/// Short forms are normalized: `ALOAD_1` decodes as `ALOAD` with slot 1,
/// `WIDE` is folded into the instruction it modifies, and `GOTO_W` and
/// `JSR_W` decode as `GOTO` and `JSR`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedInstruction {
    pub offset: usize,
    pub length: usize,
    pub opcode: u8,
    pub operand: Operand,
}

impl ParsedInstruction {
    /// Returns false when control never reaches the next instruction.
    pub fn falls_through(&self) -> bool {
        !matches!(
            self.opcode,
            GOTO | TABLESWITCH | LOOKUPSWITCH | IRETURN..=RETURN | ATHROW | RET
        )
    }

    /// Explicit jump targets, in operand order.
    pub fn branch_targets(&self) -> Vec<usize> {
        match &self.operand {
            Operand::Branch(target) => vec![*target],
            Operand::TableSwitch { default, targets, .. } => {
                let mut all = vec![*default];
                all.extend(targets.iter().copied());
                all
            }
            Operand::LookupSwitch { default, pairs } => {
                let mut all = vec![*default];
                all.extend(pairs.iter().map(|(_, target)| *target));
                all
            }
            _ => Vec::new(),
        }
    }
}

fn absolute(
    offset: usize,
    relative: i32,
    code_length: usize,
) -> std::result::Result<usize, ClassReadError> {
    let target = offset as i64 + relative as i64;
    if target < 0 || target as usize > code_length {
        return Err(ClassReadError::InvalidOffset(target as u32));
    }
    Ok(target as usize)
}

/// Decodes the body of a `Code` attribute.
pub fn decode_code(code: &[u8]) -> std::result::Result<Vec<ParsedInstruction>, ClassReadError> {
    let mut reader = ByteReader::new(code);
    let mut insns = Vec::new();

    while reader.remaining() > 0 {
        let offset = reader.pos();
        let opcode = reader.read_u1()?;
        let (opcode, operand) = match opcode {
            NOP..=DCONST_1 => (opcode, Operand::None),
            BIPUSH => (opcode, Operand::Int(reader.read_i1()? as i32)),
            SIPUSH => (opcode, Operand::Int(reader.read_i2()? as i32)),
            LDC => (opcode, Operand::Constant(reader.read_u1()? as u16)),
            LDC_W | LDC2_W => (opcode, Operand::Constant(reader.read_u2()?)),
            ILOAD..=ALOAD | ISTORE..=ASTORE | RET => {
                (opcode, Operand::Local(reader.read_u1()? as u16))
            }
            ILOAD_0..=ALOAD_3 => {
                let relative = opcode - ILOAD_0;
                (ILOAD + relative / 4, Operand::Local((relative % 4) as u16))
            }
            ISTORE_0..=ASTORE_3 => {
                let relative = opcode - ISTORE_0;
                (ISTORE + relative / 4, Operand::Local((relative % 4) as u16))
            }
            IALOAD..=SALOAD | IASTORE..=SASTORE | POP..=LXOR | I2L..=DCMPG => {
                (opcode, Operand::None)
            }
            IINC => (
                opcode,
                Operand::Iinc {
                    index: reader.read_u1()? as u16,
                    increment: reader.read_i1()? as i16,
                },
            ),
            IFEQ..=JSR | IFNULL | IFNONNULL => {
                let relative = reader.read_i2()? as i32;
                (opcode, Operand::Branch(absolute(offset, relative, code.len())?))
            }
            GOTO_W | JSR_W => {
                let relative = reader.read_i4()?;
                let opcode = if opcode == GOTO_W { GOTO } else { JSR };
                (opcode, Operand::Branch(absolute(offset, relative, code.len())?))
            }
            TABLESWITCH => {
                reader.align4(offset)?;
                let default = absolute(offset, reader.read_i4()?, code.len())?;
                let low = reader.read_i4()?;
                let high = reader.read_i4()?;
                if high < low {
                    return Err(ClassReadError::InvalidOpcode { opcode, offset });
                }
                let count = (high as i64 - low as i64 + 1) as usize;
                let mut targets = Vec::with_capacity(count.min(reader.remaining() / 4));
                for _ in 0..count {
                    targets.push(absolute(offset, reader.read_i4()?, code.len())?);
                }
                (
                    opcode,
                    Operand::TableSwitch {
                        default,
                        low,
                        high,
                        targets,
                    },
                )
            }
            LOOKUPSWITCH => {
                reader.align4(offset)?;
                let default = absolute(offset, reader.read_i4()?, code.len())?;
                let count = reader.read_i4()?;
                if count < 0 {
                    return Err(ClassReadError::InvalidOpcode { opcode, offset });
                }
                let mut pairs = Vec::with_capacity((count as usize).min(reader.remaining() / 8));
                for _ in 0..count {
                    let key = reader.read_i4()?;
                    pairs.push((key, absolute(offset, reader.read_i4()?, code.len())?));
                }
                (opcode, Operand::LookupSwitch { default, pairs })
            }
            IRETURN..=RETURN | ARRAYLENGTH | ATHROW | MONITORENTER | MONITOREXIT => {
                (opcode, Operand::None)
            }
            GETSTATIC..=INVOKESTATIC => (opcode, Operand::Member(reader.read_u2()?)),
            INVOKEINTERFACE => {
                let index = reader.read_u2()?;
                reader.read_u1()?;
                reader.read_u1()?;
                (opcode, Operand::Member(index))
            }
            INVOKEDYNAMIC => {
                let index = reader.read_u2()?;
                reader.read_u2()?;
                (opcode, Operand::InvokeDynamic(index))
            }
            NEW | ANEWARRAY | CHECKCAST | INSTANCEOF => (opcode, Operand::Class(reader.read_u2()?)),
            NEWARRAY => (opcode, Operand::Int(reader.read_u1()? as i32)),
            WIDE => {
                let inner = reader.read_u1()?;
                match inner {
                    ILOAD..=ALOAD | ISTORE..=ASTORE | RET => {
                        (inner, Operand::Local(reader.read_u2()?))
                    }
                    IINC => (
                        inner,
                        Operand::Iinc {
                            index: reader.read_u2()?,
                            increment: reader.read_i2()?,
                        },
                    ),
                    _ => return Err(ClassReadError::InvalidOpcode { opcode: inner, offset }),
                }
            }
            MULTIANEWARRAY => (
                opcode,
                Operand::MultiANewArray {
                    index: reader.read_u2()?,
                    dimensions: reader.read_u1()?,
                },
            ),
            _ => return Err(ClassReadError::InvalidOpcode { opcode, offset }),
        };
        insns.push(ParsedInstruction {
            offset,
            length: reader.pos() - offset,
            opcode,
            operand,
        });
    }

    Ok(insns)
}

/// Number of local slots taken by the arguments of a method descriptor,
/// not counting `this`.
pub fn argument_slots(descriptor: &str) -> usize {
    parameter_descriptors(descriptor)
        .iter()
        .map(|parameter| if matches!(parameter, &"J" | &"D") { 2 } else { 1 })
        .sum()
}

#[derive(Debug)]
struct Fixup<L> {
    opcode: u8,
    opcode_offset: usize,
    patch_at: usize,
    wide: bool,
    label: L,
}

/// Writes instructions into a code array and resolves label references
/// once every label is bound.
#[derive(Debug)]
pub struct CodeEmitter<L> {
    code: Vec<u8>,
    labels: HashMap<L, usize>,
    fixups: Vec<Fixup<L>>,
    last_instruction: Option<usize>,
}

impl<L> Default for CodeEmitter<L>
where
    L: Copy + Eq + Hash + Debug,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<L> CodeEmitter<L>
where
    L: Copy + Eq + Hash + Debug,
{
    pub fn new() -> Self {
        Self {
            code: Vec::new(),
            labels: HashMap::new(),
            fixups: Vec::new(),
            last_instruction: None,
        }
    }

    pub fn offset(&self) -> usize {
        self.code.len()
    }

    /// Offset of the most recently written instruction.
    pub fn last_instruction_offset(&self) -> Option<usize> {
        self.last_instruction
    }

    pub fn bind(&mut self, label: L) -> Result<()> {
        if self.labels.contains_key(&label) {
            return Err(Error::protocol(format!("label {label:?} is bound twice")));
        }
        self.labels.insert(label, self.code.len());
        Ok(())
    }

    pub fn label_offset(&self, label: L) -> Option<usize> {
        self.labels.get(&label).copied()
    }

    fn start(&mut self, opcode: u8) -> usize {
        let offset = self.code.len();
        self.last_instruction = Some(offset);
        write_u1(&mut self.code, opcode);
        offset
    }

    pub fn simple(&mut self, opcode: u8) {
        self.start(opcode);
    }

    pub fn int_insn(&mut self, opcode: u8, operand: i32) {
        self.start(opcode);
        match opcode {
            SIPUSH => write_i2(&mut self.code, operand as i16),
            BIPUSH => write_i1(&mut self.code, operand as i8),
            _ => write_u1(&mut self.code, operand as u8),
        }
    }

    /// Loads, stores and `RET`, using the one byte short forms for slots 0
    /// to 3 and `WIDE` above 255.
    pub fn var(&mut self, opcode: u8, slot: u16) {
        if slot < 4 && opcode != RET {
            let short = match opcode {
                ILOAD..=ALOAD => ILOAD_0 + (opcode - ILOAD) * 4,
                _ => ISTORE_0 + (opcode - ISTORE) * 4,
            };
            self.start(short + slot as u8);
        } else if slot <= u8::MAX as u16 {
            self.start(opcode);
            write_u1(&mut self.code, slot as u8);
        } else {
            self.start(WIDE);
            write_u1(&mut self.code, opcode);
            write_u2(&mut self.code, slot);
        }
    }

    pub fn iinc(&mut self, slot: u16, increment: i16) {
        if slot > u8::MAX as u16 || increment < i8::MIN as i16 || increment > i8::MAX as i16 {
            self.start(WIDE);
            write_u1(&mut self.code, IINC);
            write_u2(&mut self.code, slot);
            write_i2(&mut self.code, increment);
        } else {
            self.start(IINC);
            write_u1(&mut self.code, slot as u8);
            write_i1(&mut self.code, increment as i8);
        }
    }

    pub fn ldc(&mut self, index: u16, wide_value: bool) {
        if wide_value {
            self.start(LDC2_W);
            write_u2(&mut self.code, index);
        } else if index <= u8::MAX as u16 {
            self.start(LDC);
            write_u1(&mut self.code, index as u8);
        } else {
            self.start(LDC_W);
            write_u2(&mut self.code, index);
        }
    }

    /// Field and method instructions other than `INVOKEINTERFACE`, and the
    /// type instructions.
    pub fn cp_insn(&mut self, opcode: u8, index: u16) {
        self.start(opcode);
        write_u2(&mut self.code, index);
    }

    pub fn invokeinterface(&mut self, index: u16, descriptor: &str) {
        self.start(INVOKEINTERFACE);
        write_u2(&mut self.code, index);
        write_u1(&mut self.code, (argument_slots(descriptor) + 1) as u8);
        write_u1(&mut self.code, 0);
    }

    pub fn invokedynamic(&mut self, index: u16) {
        self.start(INVOKEDYNAMIC);
        write_u2(&mut self.code, index);
        write_u2(&mut self.code, 0);
    }

    pub fn multianewarray(&mut self, index: u16, dimensions: u8) {
        self.start(MULTIANEWARRAY);
        write_u2(&mut self.code, index);
        write_u1(&mut self.code, dimensions);
    }

    pub fn jump(&mut self, opcode: u8, label: L) {
        let opcode_offset = self.start(opcode);
        self.fixups.push(Fixup {
            opcode,
            opcode_offset,
            patch_at: self.code.len(),
            wide: false,
            label,
        });
        write_i2(&mut self.code, 0);
    }

    fn switch_target(&mut self, opcode: u8, opcode_offset: usize, label: L) {
        self.fixups.push(Fixup {
            opcode,
            opcode_offset,
            patch_at: self.code.len(),
            wide: true,
            label,
        });
        write_i4(&mut self.code, 0);
    }

    pub fn table_switch(&mut self, low: i32, high: i32, default: L, targets: &[L]) {
        let opcode_offset = self.start(TABLESWITCH);
        write_switch_padding(&mut self.code, opcode_offset);
        self.switch_target(TABLESWITCH, opcode_offset, default);
        write_i4(&mut self.code, low);
        write_i4(&mut self.code, high);
        for target in targets {
            self.switch_target(TABLESWITCH, opcode_offset, *target);
        }
    }

    pub fn lookup_switch(&mut self, default: L, pairs: &[(i32, L)]) {
        let opcode_offset = self.start(LOOKUPSWITCH);
        write_switch_padding(&mut self.code, opcode_offset);
        self.switch_target(LOOKUPSWITCH, opcode_offset, default);
        write_i4(&mut self.code, pairs.len() as i32);
        for (key, target) in pairs {
            write_i4(&mut self.code, *key);
            self.switch_target(LOOKUPSWITCH, opcode_offset, *target);
        }
    }

    /// Patches every branch and returns the code with the offset of each
    /// bound label.
    pub fn finish(
        mut self,
        method: &str,
    ) -> std::result::Result<(Vec<u8>, HashMap<L, usize>), ClassWriteError> {
        for fixup in &self.fixups {
            let target = self
                .labels
                .get(&fixup.label)
                .ok_or_else(|| ClassWriteError::UnboundLabel(format!("{:?}", fixup.label)))?;
            let relative = *target as i64 - fixup.opcode_offset as i64;
            if fixup.wide {
                write_i4_at(&mut self.code, fixup.patch_at, relative as i32);
            } else {
                let relative =
                    i16::try_from(relative).map_err(|_| ClassWriteError::BranchOutOfRange {
                        opcode: fixup.opcode,
                        offset: relative as i32,
                    })?;
                write_i2_at(&mut self.code, fixup.patch_at, relative);
            }
        }
        if self.code.len() > u16::MAX as usize {
            return Err(ClassWriteError::MethodTooLarge {
                method: method.to_string(),
                size: self.code.len(),
            });
        }
        Ok((self.code, self.labels))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_forms_are_normalized() {
        let code = [
            ALOAD_0, ILOAD_0 + 3, WIDE, ISTORE, 0x01, 0x00, GOTO_W, 0xFF, 0xFF, 0xFF, 0xFA, RETURN,
        ];
        let insns = decode_code(&code).unwrap();
        assert_eq!(insns[0].opcode, ALOAD);
        assert_eq!(insns[0].operand, Operand::Local(0));
        assert_eq!(insns[1].opcode, ILOAD);
        assert_eq!(insns[1].operand, Operand::Local(3));
        assert_eq!(insns[2].opcode, ISTORE);
        assert_eq!(insns[2].operand, Operand::Local(256));
        assert_eq!(insns[2].length, 4);
        assert_eq!(insns[3].opcode, GOTO);
        assert_eq!(insns[3].operand, Operand::Branch(0));
        assert!(!insns[3].falls_through());
    }

    #[test]
    fn emitter_round_trips_through_decoder() {
        let mut emitter: CodeEmitter<u32> = CodeEmitter::new();
        emitter.var(ILOAD, 1);
        emitter.table_switch(0, 1, 9, &[7, 9]);
        emitter.bind(7).unwrap();
        emitter.iinc(300, 1);
        emitter.jump(GOTO, 9);
        emitter.bind(9).unwrap();
        emitter.simple(RETURN);
        let (code, labels) = emitter.finish("run").unwrap();

        let insns = decode_code(&code).unwrap();
        let target7 = labels[&7];
        let target9 = labels[&9];
        assert_eq!(
            insns[1].operand,
            Operand::TableSwitch {
                default: target9,
                low: 0,
                high: 1,
                targets: vec![target7, target9],
            }
        );
        assert_eq!(insns[2].operand, Operand::Iinc { index: 300, increment: 1 });
        assert_eq!(insns[3].operand, Operand::Branch(target9));
    }

    #[test]
    fn unbound_label_is_reported() {
        let mut emitter: CodeEmitter<u32> = CodeEmitter::new();
        emitter.jump(IFEQ, 3);
        assert!(matches!(emitter.finish("m"), Err(ClassWriteError::UnboundLabel(_))));
    }

    #[test]
    fn invokeinterface_counts_argument_slots() {
        assert_eq!(argument_slots("(JLjava/lang/String;[DI)V"), 5);
        let mut emitter: CodeEmitter<u32> = CodeEmitter::new();
        emitter.invokeinterface(4, "(JI)V");
        let (code, _) = emitter.finish("m").unwrap();
        assert_eq!(code, vec![INVOKEINTERFACE, 0, 4, 4, 0]);
    }
}
