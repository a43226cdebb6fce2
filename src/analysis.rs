//! Data-flow analysis of a method body: max stack, max locals, and the
//! frames a `StackMapTable` needs.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::ops::Range;

use crate::bytecode::{decode_code, Operand, ParsedInstruction};
use crate::constant_pool::{ConstantPool, CpInfo};
use crate::error::{ClassWriteError, Error, Result};
use crate::frame::{
    frame_type_of, initial_locals, parameter_descriptors, return_descriptor, ExpandedFrame,
    FrameType,
};
use crate::hierarchy::{common_super_class, HierarchyResolver, OBJECT};
use crate::opcodes::*;

const THROWABLE: &str = "java/lang/Throwable";
const MAX_ITERATIONS: usize = 100_000;

/// The method whose code is analyzed.
#[derive(Debug, Clone, Copy)]
pub struct MethodContext<'a> {
    pub owner: &'a str,
    pub access: u32,
    pub name: &'a str,
    pub descriptor: &'a str,
}

/// An exception table entry with the catch type resolved to an internal
/// name. `None` catches everything.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerInfo {
    pub start: usize,
    pub end: usize,
    pub handler: usize,
    pub catch_type: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Maxs {
    pub max_stack: u16,
    pub max_locals: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Analysis {
    pub maxs: Maxs,
    /// Frames at jump targets, handler entries and dead code, sorted by
    /// offset. Long and double locals are single entries.
    pub frames: Vec<ExpandedFrame<FrameType>>,
    /// Ranges of unreachable instructions.
    pub dead_blocks: Vec<Range<usize>>,
}

#[derive(Debug, Clone, PartialEq)]
struct FrameState {
    /// One entry per slot; the second slot of a long or double is `Top`.
    locals: Vec<FrameType>,
    stack: Vec<FrameType>,
}

/// Computes max stack and max locals. Subroutines are followed without
/// checking types.
pub fn compute_maxs(
    code: &[u8],
    cp: &ConstantPool,
    method: &MethodContext<'_>,
    handlers: &[HandlerInfo],
) -> Result<Maxs> {
    let insns = decode_code(code)?;
    let mut analyzer = Analyzer::new(&insns, cp, method, handlers, None);
    analyzer.run()?;
    Ok(analyzer.maxs())
}

/// Computes maxs and frames. Merging two reference types consults
/// `resolver`.
pub fn compute_frames(
    code: &[u8],
    cp: &ConstantPool,
    method: &MethodContext<'_>,
    handlers: &[HandlerInfo],
    resolver: &dyn HierarchyResolver,
) -> Result<Analysis> {
    let insns = decode_code(code)?;
    let mut analyzer = Analyzer::new(&insns, cp, method, handlers, Some(resolver));
    analyzer.run()?;

    let mut targets = BTreeSet::new();
    for (index, insn) in insns.iter().enumerate() {
        if analyzer.states[index].is_some() {
            targets.extend(insn.branch_targets());
        }
    }
    targets.extend(handlers.iter().map(|h| h.handler));

    let mut frames = Vec::new();
    for offset in targets {
        let Some(&index) = analyzer.index_of.get(&offset) else {
            continue;
        };
        if let Some(state) = &analyzer.states[index] {
            frames.push(ExpandedFrame {
                offset: offset as u16,
                locals: compact_locals(&state.locals),
                stack: state.stack.clone(),
            });
        }
    }

    let dead_blocks = analyzer.dead_blocks(code.len());
    for block in &dead_blocks {
        frames.push(ExpandedFrame {
            offset: block.start as u16,
            locals: Vec::new(),
            stack: vec![FrameType::Object(THROWABLE.to_string())],
        });
    }
    frames.sort_by_key(|frame| frame.offset);

    let mut maxs = analyzer.maxs();
    if !dead_blocks.is_empty() {
        maxs.max_stack = maxs.max_stack.max(1);
    }
    Ok(Analysis {
        maxs,
        frames,
        dead_blocks,
    })
}

/// Replaces unreachable code with `NOP ... ATHROW` so that it verifies
/// against a frame holding only a throwable.
pub fn remove_dead_code(code: &mut [u8], dead_blocks: &[Range<usize>]) {
    for block in dead_blocks {
        if block.is_empty() || block.end > code.len() {
            continue;
        }
        code[block.start..block.end - 1].fill(NOP);
        code[block.end - 1] = ATHROW;
    }
}

/// Removes dead ranges from exception handler coverage, splitting
/// entries where needed.
pub fn trim_handlers(handlers: &[HandlerInfo], dead_blocks: &[Range<usize>]) -> Vec<HandlerInfo> {
    let mut current = handlers.to_vec();
    for block in dead_blocks {
        let mut next = Vec::with_capacity(current.len());
        for handler in current {
            if block.end <= handler.start || block.start >= handler.end {
                next.push(handler);
                continue;
            }
            if handler.start < block.start {
                next.push(HandlerInfo {
                    end: block.start,
                    ..handler.clone()
                });
            }
            if block.end < handler.end {
                next.push(HandlerInfo {
                    start: block.end,
                    ..handler
                });
            }
        }
        current = next;
    }
    current
}

struct Analyzer<'a> {
    insns: &'a [ParsedInstruction],
    cp: &'a ConstantPool,
    method: &'a MethodContext<'a>,
    handlers: &'a [HandlerInfo],
    resolver: Option<&'a dyn HierarchyResolver>,
    index_of: HashMap<usize, usize>,
    states: Vec<Option<FrameState>>,
    max_stack: usize,
}

impl<'a> Analyzer<'a> {
    fn new(
        insns: &'a [ParsedInstruction],
        cp: &'a ConstantPool,
        method: &'a MethodContext<'a>,
        handlers: &'a [HandlerInfo],
        resolver: Option<&'a dyn HierarchyResolver>,
    ) -> Self {
        let index_of = insns.iter().enumerate().map(|(i, insn)| (insn.offset, i)).collect();
        Self {
            insns,
            cp,
            method,
            handlers,
            resolver,
            index_of,
            states: vec![None; insns.len()],
            max_stack: 0,
        }
    }

    fn computing_frames(&self) -> bool {
        self.resolver.is_some()
    }

    fn initial_state(&self) -> FrameState {
        let mut locals = Vec::new();
        let method = self.method;
        for value in initial_locals(method.owner, method.access, method.name, method.descriptor) {
            let wide = value.is_wide();
            locals.push(value);
            if wide {
                locals.push(FrameType::Top);
            }
        }
        FrameState {
            locals,
            stack: Vec::new(),
        }
    }

    fn index(&self, offset: usize) -> Result<usize> {
        self.index_of
            .get(&offset)
            .copied()
            .ok_or_else(|| frame_error(format!("no instruction at offset {offset}")))
    }

    fn run(&mut self) -> Result<()> {
        if self.insns.is_empty() {
            return Ok(());
        }
        let mut queue = VecDeque::new();
        self.states[0] = Some(self.initial_state());
        queue.push_back(0usize);

        let mut iterations = 0usize;
        while let Some(index) = queue.pop_front() {
            iterations += 1;
            if iterations > MAX_ITERATIONS {
                return Err(ClassWriteError::FrameComputation(format!(
                    "analysis of {}{} does not converge",
                    self.method.name, self.method.descriptor
                ))
                .into());
            }
            let Some(state) = self.states[index].clone() else {
                continue;
            };
            let insns = self.insns;
            let insn = &insns[index];

            for handler in self.handlers {
                if handler.start <= insn.offset && insn.offset < handler.end {
                    let catch = handler.catch_type.clone().unwrap_or_else(|| THROWABLE.to_string());
                    let entry = FrameState {
                        locals: state.locals.clone(),
                        stack: vec![FrameType::Object(catch)],
                    };
                    let target = self.index(handler.handler)?;
                    if self.merge_into(target, entry)? {
                        queue.push_back(target);
                    }
                }
            }

            let next = self.execute(insn, &state)?;
            self.max_stack = self
                .max_stack
                .max(stack_slots(&state.stack))
                .max(stack_slots(&next.stack));

            for (target, successor) in self.successors(index, &next)? {
                self.max_stack = self.max_stack.max(stack_slots(&successor.stack));
                if self.merge_into(target, successor)? {
                    queue.push_back(target);
                }
            }
        }
        Ok(())
    }

    fn successors(&self, index: usize, next: &FrameState) -> Result<Vec<(usize, FrameState)>> {
        let insn = &self.insns[index];
        let mut successors = Vec::new();
        if insn.opcode == JSR {
            if let Operand::Branch(target) = insn.operand {
                let mut entry = next.clone();
                entry.stack.push(FrameType::Top);
                successors.push((self.index(target)?, entry));
            }
        } else {
            for target in insn.branch_targets() {
                successors.push((self.index(target)?, next.clone()));
            }
        }
        if insn.falls_through() && index + 1 < self.insns.len() {
            successors.push((index + 1, next.clone()));
        }
        Ok(successors)
    }

    /// Returns true when the state at `index` changed.
    fn merge_into(&mut self, index: usize, incoming: FrameState) -> Result<bool> {
        let Some(existing) = &self.states[index] else {
            self.states[index] = Some(incoming);
            return Ok(true);
        };
        if existing.stack.len() != incoming.stack.len() {
            return Err(ClassWriteError::FrameComputation(format!(
                "inconsistent stack height at offset {} in {}",
                self.insns[index].offset, self.method.name
            ))
            .into());
        }
        let len = existing.locals.len().max(incoming.locals.len());
        let mut locals = Vec::with_capacity(len);
        for i in 0..len {
            let left = existing.locals.get(i).unwrap_or(&FrameType::Top);
            let right = incoming.locals.get(i).unwrap_or(&FrameType::Top);
            locals.push(self.merge_type(left, right)?);
        }
        let mut stack = Vec::with_capacity(existing.stack.len());
        for (left, right) in existing.stack.iter().zip(&incoming.stack) {
            stack.push(self.merge_type(left, right)?);
        }
        let merged = FrameState { locals, stack };
        if &merged == existing {
            return Ok(false);
        }
        self.states[index] = Some(merged);
        Ok(true)
    }

    fn merge_type(&self, left: &FrameType, right: &FrameType) -> Result<FrameType> {
        if left == right {
            return Ok(left.clone());
        }
        let merged = match (left, right) {
            (FrameType::Null, FrameType::Object(name))
            | (FrameType::Object(name), FrameType::Null) => {
                FrameType::Object(name.clone())
            }
            (FrameType::Object(a), FrameType::Object(b)) => match self.resolver {
                Some(resolver) => FrameType::Object(common_super_class(resolver, a, b)?),
                None => FrameType::Object(OBJECT.to_string()),
            },
            _ => FrameType::Top,
        };
        Ok(merged)
    }

    fn maxs(&self) -> Maxs {
        let mut max_locals = self.initial_state().locals.len();
        for insn in self.insns {
            let (slot, wide) = match insn.operand {
                Operand::Local(slot) => {
                    (slot as usize, matches!(insn.opcode, LLOAD | DLOAD | LSTORE | DSTORE))
                }
                Operand::Iinc { index, .. } => (index as usize, false),
                _ => continue,
            };
            max_locals = max_locals.max(slot + if wide { 2 } else { 1 });
        }
        Maxs {
            max_stack: self.max_stack.min(u16::MAX as usize) as u16,
            max_locals: max_locals.min(u16::MAX as usize) as u16,
        }
    }

    fn dead_blocks(&self, code_length: usize) -> Vec<Range<usize>> {
        let mut blocks: Vec<Range<usize>> = Vec::new();
        for (index, insn) in self.insns.iter().enumerate() {
            if self.states[index].is_some() {
                continue;
            }
            let end = self.insns.get(index + 1).map_or(code_length, |next| next.offset);
            match blocks.last_mut() {
                Some(block) if block.end == insn.offset => block.end = end,
                _ => blocks.push(insn.offset..end),
            }
        }
        blocks
    }

    fn execute(&self, insn: &ParsedInstruction, frame: &FrameState) -> Result<FrameState> {
        let mut locals = frame.locals.clone();
        let mut stack = frame.stack.clone();
        let offset = insn.offset;
        let pop = |stack: &mut Vec<FrameType>| -> Result<FrameType> {
            stack
                .pop()
                .ok_or_else(|| frame_error(format!("stack underflow at offset {offset}")))
        };
        let pop_n = |stack: &mut Vec<FrameType>, count: usize| -> Result<()> {
            for _ in 0..count {
                pop(stack)?;
            }
            Ok(())
        };
        let category2 = |what: &str| -> Error {
            frame_error(format!("{what} on a long or double at offset {offset}"))
        };

        match insn.opcode {
            NOP => {}
            ACONST_NULL => stack.push(FrameType::Null),
            ICONST_M1..=ICONST_5 | BIPUSH | SIPUSH => stack.push(FrameType::Integer),
            LCONST_0 | LCONST_1 => stack.push(FrameType::Long),
            FCONST_0..=FCONST_2 => stack.push(FrameType::Float),
            DCONST_0 | DCONST_1 => stack.push(FrameType::Double),
            LDC | LDC_W | LDC2_W => {
                let Operand::Constant(index) = insn.operand else {
                    return Err(frame_error(format!("ldc without constant at {offset}")));
                };
                stack.push(self.ldc_type(index)?);
            }
            ILOAD => stack.push(FrameType::Integer),
            LLOAD => stack.push(FrameType::Long),
            FLOAD => stack.push(FrameType::Float),
            DLOAD => stack.push(FrameType::Double),
            ALOAD => {
                let Operand::Local(slot) = insn.operand else {
                    return Err(frame_error(format!("aload without slot at {offset}")));
                };
                stack.push(locals.get(slot as usize).cloned().unwrap_or(FrameType::Top));
            }
            IALOAD | BALOAD | CALOAD | SALOAD => {
                pop_n(&mut stack, 2)?;
                stack.push(FrameType::Integer);
            }
            LALOAD => {
                pop_n(&mut stack, 2)?;
                stack.push(FrameType::Long);
            }
            FALOAD => {
                pop_n(&mut stack, 2)?;
                stack.push(FrameType::Float);
            }
            DALOAD => {
                pop_n(&mut stack, 2)?;
                stack.push(FrameType::Double);
            }
            AALOAD => {
                pop(&mut stack)?;
                let array = pop(&mut stack)?;
                stack.push(array_element_type(&array));
            }
            ISTORE..=ASTORE => {
                let Operand::Local(slot) = insn.operand else {
                    return Err(frame_error(format!("store without slot at {offset}")));
                };
                let value = pop(&mut stack)?;
                store_local(&mut locals, slot, value);
            }
            IASTORE..=SASTORE => pop_n(&mut stack, 3)?,
            POP => {
                if pop(&mut stack)?.is_wide() {
                    return Err(category2("pop"));
                }
            }
            POP2 => {
                if !pop(&mut stack)?.is_wide() && pop(&mut stack)?.is_wide() {
                    return Err(category2("pop2"));
                }
            }
            DUP => {
                let v1 = pop(&mut stack)?;
                if v1.is_wide() {
                    return Err(category2("dup"));
                }
                stack.push(v1.clone());
                stack.push(v1);
            }
            DUP_X1 => {
                let v1 = pop(&mut stack)?;
                let v2 = pop(&mut stack)?;
                if v1.is_wide() || v2.is_wide() {
                    return Err(category2("dup_x1"));
                }
                stack.extend([v1.clone(), v2, v1]);
            }
            DUP_X2 => {
                let v1 = pop(&mut stack)?;
                if v1.is_wide() {
                    return Err(category2("dup_x2"));
                }
                let v2 = pop(&mut stack)?;
                if v2.is_wide() {
                    stack.extend([v1.clone(), v2, v1]);
                } else {
                    let v3 = pop(&mut stack)?;
                    stack.extend([v1.clone(), v3, v2, v1]);
                }
            }
            DUP2 => {
                let v1 = pop(&mut stack)?;
                if v1.is_wide() {
                    stack.extend([v1.clone(), v1]);
                } else {
                    let v2 = pop(&mut stack)?;
                    if v2.is_wide() {
                        return Err(category2("dup2"));
                    }
                    stack.extend([v2.clone(), v1.clone(), v2, v1]);
                }
            }
            DUP2_X1 => {
                let v1 = pop(&mut stack)?;
                if v1.is_wide() {
                    let v2 = pop(&mut stack)?;
                    stack.extend([v1.clone(), v2, v1]);
                } else {
                    let v2 = pop(&mut stack)?;
                    let v3 = pop(&mut stack)?;
                    stack.extend([v2.clone(), v1.clone(), v3, v2, v1]);
                }
            }
            DUP2_X2 => {
                let v1 = pop(&mut stack)?;
                if v1.is_wide() {
                    let v2 = pop(&mut stack)?;
                    if v2.is_wide() {
                        stack.extend([v1.clone(), v2, v1]);
                    } else {
                        let v3 = pop(&mut stack)?;
                        stack.extend([v1.clone(), v3, v2, v1]);
                    }
                } else {
                    let v2 = pop(&mut stack)?;
                    let v3 = pop(&mut stack)?;
                    if v3.is_wide() {
                        stack.extend([v2.clone(), v1.clone(), v3, v2, v1]);
                    } else {
                        let v4 = pop(&mut stack)?;
                        stack.extend([v2.clone(), v1.clone(), v4, v3, v2, v1]);
                    }
                }
            }
            SWAP => {
                let v1 = pop(&mut stack)?;
                let v2 = pop(&mut stack)?;
                if v1.is_wide() || v2.is_wide() {
                    return Err(category2("swap"));
                }
                stack.extend([v1, v2]);
            }
            IADD | ISUB | IMUL | IDIV | IREM | ISHL | ISHR | IUSHR | IAND | IOR | IXOR => {
                pop_n(&mut stack, 2)?;
                stack.push(FrameType::Integer);
            }
            LADD | LSUB | LMUL | LDIV | LREM | LSHL | LSHR | LUSHR | LAND | LOR | LXOR => {
                pop_n(&mut stack, 2)?;
                stack.push(FrameType::Long);
            }
            FADD | FSUB | FMUL | FDIV | FREM => {
                pop_n(&mut stack, 2)?;
                stack.push(FrameType::Float);
            }
            DADD | DSUB | DMUL | DDIV | DREM => {
                pop_n(&mut stack, 2)?;
                stack.push(FrameType::Double);
            }
            INEG | L2I | F2I | D2I | I2B | I2C | I2S => {
                pop(&mut stack)?;
                stack.push(FrameType::Integer);
            }
            LNEG | I2L | F2L | D2L => {
                pop(&mut stack)?;
                stack.push(FrameType::Long);
            }
            FNEG | I2F | L2F | D2F => {
                pop(&mut stack)?;
                stack.push(FrameType::Float);
            }
            DNEG | I2D | L2D | F2D => {
                pop(&mut stack)?;
                stack.push(FrameType::Double);
            }
            IINC => {}
            LCMP..=DCMPG => {
                pop_n(&mut stack, 2)?;
                stack.push(FrameType::Integer);
            }
            IFEQ..=IFLE | IFNULL | IFNONNULL => pop_n(&mut stack, 1)?,
            IF_ICMPEQ..=IF_ACMPNE => pop_n(&mut stack, 2)?,
            GOTO => {}
            JSR | RET => {
                if self.computing_frames() {
                    return Err(ClassWriteError::FrameComputation(format!(
                        "jsr/ret at offset {offset} cannot be described by frames"
                    ))
                    .into());
                }
            }
            TABLESWITCH | LOOKUPSWITCH => pop_n(&mut stack, 1)?,
            IRETURN..=ARETURN | ATHROW | MONITORENTER | MONITOREXIT => pop_n(&mut stack, 1)?,
            RETURN => {}
            GETSTATIC | GETFIELD | PUTSTATIC | PUTFIELD => {
                let Operand::Member(index) = insn.operand else {
                    return Err(frame_error(format!("field access without member at {offset}")));
                };
                let member = self.cp.member_ref(index)?;
                match insn.opcode {
                    GETSTATIC => stack.push(frame_type_of(member.descriptor)),
                    GETFIELD => {
                        pop(&mut stack)?;
                        stack.push(frame_type_of(member.descriptor));
                    }
                    PUTSTATIC => pop_n(&mut stack, 1)?,
                    _ => pop_n(&mut stack, 2)?,
                }
            }
            INVOKEVIRTUAL..=INVOKEINTERFACE => {
                let Operand::Member(index) = insn.operand else {
                    return Err(frame_error(format!("invoke without member at {offset}")));
                };
                let member = self.cp.member_ref(index)?;
                pop_n(&mut stack, parameter_descriptors(member.descriptor).len())?;
                if insn.opcode != INVOKESTATIC {
                    let receiver = pop(&mut stack)?;
                    if member.name == "<init>" {
                        let initialized = match receiver {
                            FrameType::UninitializedThis => self.method.owner.to_string(),
                            _ => member.owner.to_string(),
                        };
                        initialize(&mut locals, &mut stack, &receiver, initialized);
                    }
                }
                push_return(&mut stack, member.descriptor);
            }
            INVOKEDYNAMIC => {
                let Operand::InvokeDynamic(index) = insn.operand else {
                    return Err(frame_error(format!(
                        "invokedynamic without call site at {offset}"
                    )));
                };
                let (_, _, descriptor) = self.cp.dynamic(index)?;
                pop_n(&mut stack, parameter_descriptors(descriptor).len())?;
                push_return(&mut stack, descriptor);
            }
            NEW => stack.push(FrameType::Uninitialized(offset as u16)),
            NEWARRAY => {
                pop(&mut stack)?;
                let Operand::Int(code) = insn.operand else {
                    return Err(frame_error(format!("newarray without type at {offset}")));
                };
                stack.push(FrameType::Object(primitive_array(code)?.to_string()));
            }
            ANEWARRAY => {
                pop(&mut stack)?;
                let name = self.class_operand(insn)?;
                let array = if name.starts_with('[') {
                    format!("[{name}")
                } else {
                    format!("[L{name};")
                };
                stack.push(FrameType::Object(array));
            }
            ARRAYLENGTH | INSTANCEOF => {
                pop(&mut stack)?;
                stack.push(FrameType::Integer);
            }
            CHECKCAST => {
                pop(&mut stack)?;
                stack.push(FrameType::Object(self.class_operand(insn)?.to_string()));
            }
            MULTIANEWARRAY => {
                let Operand::MultiANewArray { index, dimensions } = insn.operand else {
                    return Err(frame_error(format!("multianewarray without type at {offset}")));
                };
                pop_n(&mut stack, dimensions as usize)?;
                stack.push(FrameType::Object(self.cp.class_name(index)?.to_string()));
            }
            _ => {}
        }

        Ok(FrameState { locals, stack })
    }

    fn class_operand(&self, insn: &ParsedInstruction) -> Result<&'a str> {
        match insn.operand {
            Operand::Class(index) => Ok(self.cp.class_name(index)?),
            _ => Err(frame_error(format!("missing class operand at {}", insn.offset))),
        }
    }

    fn ldc_type(&self, index: u16) -> Result<FrameType> {
        let ty = match self.cp.get(index)? {
            CpInfo::Integer(_) => FrameType::Integer,
            CpInfo::Float(_) => FrameType::Float,
            CpInfo::Long(_) => FrameType::Long,
            CpInfo::Double(_) => FrameType::Double,
            CpInfo::String { .. } => FrameType::Object("java/lang/String".to_string()),
            CpInfo::Class { .. } => FrameType::Object("java/lang/Class".to_string()),
            CpInfo::MethodType { .. } => {
                FrameType::Object("java/lang/invoke/MethodType".to_string())
            }
            CpInfo::MethodHandle { .. } => {
                FrameType::Object("java/lang/invoke/MethodHandle".to_string())
            }
            CpInfo::Dynamic { .. } => {
                let (_, _, descriptor) = self.cp.dynamic(index)?;
                frame_type_of(descriptor)
            }
            _ => FrameType::Top,
        };
        Ok(ty)
    }
}

fn frame_error(message: String) -> Error {
    ClassWriteError::FrameComputation(message).into()
}

fn push_return(stack: &mut Vec<FrameType>, descriptor: &str) {
    let ret = return_descriptor(descriptor);
    if ret != "V" {
        stack.push(frame_type_of(ret));
    }
}

fn initialize(
    locals: &mut [FrameType],
    stack: &mut [FrameType],
    receiver: &FrameType,
    owner: String,
) {
    let initialized = FrameType::Object(owner);
    for value in locals.iter_mut().chain(stack.iter_mut()) {
        if value == receiver {
            *value = initialized.clone();
        }
    }
}

fn store_local(locals: &mut Vec<FrameType>, slot: u16, value: FrameType) {
    let slot = slot as usize;
    let width = if value.is_wide() { 2 } else { 1 };
    if locals.len() < slot + width {
        locals.resize(slot + width, FrameType::Top);
    }
    if slot > 0 && locals[slot - 1].is_wide() {
        locals[slot - 1] = FrameType::Top;
    }
    locals[slot] = value;
    if width == 2 {
        locals[slot + 1] = FrameType::Top;
    }
}

fn array_element_type(array: &FrameType) -> FrameType {
    match array {
        FrameType::Null => FrameType::Null,
        FrameType::Object(name) => match name.strip_prefix('[') {
            Some(element) if element.starts_with('[') => FrameType::Object(element.to_string()),
            Some(element) => frame_type_of(element),
            None => FrameType::Object(OBJECT.to_string()),
        },
        _ => FrameType::Object(OBJECT.to_string()),
    }
}

fn primitive_array(code: i32) -> Result<&'static str> {
    let descriptor = match code as u8 {
        T_BOOLEAN => "[Z",
        T_CHAR => "[C",
        T_FLOAT => "[F",
        T_DOUBLE => "[D",
        T_BYTE => "[B",
        T_SHORT => "[S",
        T_INT => "[I",
        T_LONG => "[J",
        other => {
            return Err(frame_error(format!("invalid newarray type {other}")));
        }
    };
    Ok(descriptor)
}

fn stack_slots(stack: &[FrameType]) -> usize {
    stack.iter().map(|value| if value.is_wide() { 2 } else { 1 }).sum()
}

/// Converts slot-form locals to frame form: the `Top` after a long or
/// double is dropped and trailing `Top`s are trimmed.
fn compact_locals(locals: &[FrameType]) -> Vec<FrameType> {
    let mut out = Vec::new();
    let mut i = 0usize;
    while i < locals.len() {
        let value = &locals[i];
        out.push(value.clone());
        if value.is_wide() && matches!(locals.get(i + 1), Some(FrameType::Top)) {
            i += 1;
        }
        i += 1;
    }
    while matches!(out.last(), Some(FrameType::Top)) {
        out.pop();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constant_pool::ConstantPoolBuilder;
    use crate::constants::ACC_STATIC;
    use crate::hierarchy::ClassHierarchy;
    use pretty_assertions::assert_eq;

    const ILOAD_1: u8 = ILOAD_0 + 1;
    const ISTORE_1: u8 = ISTORE_0 + 1;

    fn method<'a>(descriptor: &'a str) -> MethodContext<'a> {
        MethodContext {
            owner: "demo/Sample",
            access: ACC_STATIC,
            name: "run",
            descriptor,
        }
    }

    #[test]
    fn if_else_frames_at_targets_only() {
        // iload_0; ifeq L1; iconst_1; istore_1; goto L2;
        // L1: iconst_2; istore_1; L2: iload_1; ireturn
        let code = [
            ILOAD_0, IFEQ, 0, 8, ICONST_1, ISTORE_1, GOTO, 0, 5, ICONST_2, ISTORE_1, ILOAD_1,
            IRETURN,
        ];
        let cp = ConstantPoolBuilder::new();
        let analysis =
            compute_frames(&code, cp.pool(), &method("(I)I"), &[], &ClassHierarchy::new()).unwrap();
        assert_eq!(analysis.maxs, Maxs { max_stack: 1, max_locals: 2 });
        assert_eq!(
            analysis.frames,
            vec![
                ExpandedFrame {
                    offset: 9,
                    locals: vec![FrameType::Integer],
                    stack: vec![],
                },
                ExpandedFrame {
                    offset: 11,
                    locals: vec![FrameType::Integer, FrameType::Integer],
                    stack: vec![],
                },
            ]
        );
        assert!(analysis.dead_blocks.is_empty());
    }

    #[test]
    fn long_locals_are_single_entries_in_frames() {
        // lload_0; lconst_0; lcmp; ifne L; lconst_1; lstore_0; L: return
        let code = [LLOAD_0, LCONST_0, LCMP, IFNE, 0, 5, LCONST_1, LSTORE_0, RETURN];
        let cp = ConstantPoolBuilder::new();
        let analysis =
            compute_frames(&code, cp.pool(), &method("(J)V"), &[], &ClassHierarchy::new()).unwrap();
        assert_eq!(analysis.maxs, Maxs { max_stack: 4, max_locals: 2 });
        assert_eq!(analysis.frames[0].offset, 8);
        assert_eq!(analysis.frames[0].locals, vec![FrameType::Long]);
    }

    #[test]
    fn handler_entries_get_frames() {
        // aconst_null; athrow; handler: astore_0; return
        let code = [ACONST_NULL, ATHROW, ASTORE_0, RETURN];
        let cp = ConstantPoolBuilder::new();
        let handlers = [HandlerInfo {
            start: 0,
            end: 2,
            handler: 2,
            catch_type: None,
        }];
        let hierarchy = ClassHierarchy::new();
        let analysis =
            compute_frames(&code, cp.pool(), &method("()V"), &handlers, &hierarchy).unwrap();
        assert_eq!(
            analysis.frames,
            vec![ExpandedFrame {
                offset: 2,
                locals: vec![],
                stack: vec![FrameType::Object(THROWABLE.to_string())],
            }]
        );
    }

    #[test]
    fn dead_code_is_replaced_and_framed() {
        let mut code = vec![RETURN, ICONST_1, POP, RETURN];
        let cp = ConstantPoolBuilder::new();
        let analysis =
            compute_frames(&code, cp.pool(), &method("()V"), &[], &ClassHierarchy::new()).unwrap();
        assert_eq!(analysis.dead_blocks, vec![1..4]);
        remove_dead_code(&mut code, &analysis.dead_blocks);
        assert_eq!(code, vec![RETURN, NOP, NOP, ATHROW]);
        assert_eq!(analysis.frames[0].offset, 1);
    }

    #[test]
    fn handlers_are_split_around_dead_code() {
        let handlers = [HandlerInfo {
            start: 0,
            end: 10,
            handler: 10,
            catch_type: None,
        }];
        let trimmed = trim_handlers(&handlers, &[4..6]);
        assert_eq!(trimmed.len(), 2);
        assert_eq!((trimmed[0].start, trimmed[0].end), (0, 4));
        assert_eq!((trimmed[1].start, trimmed[1].end), (6, 10));
    }

    #[test]
    fn constructor_initializes_this() {
        let mut cp = ConstantPoolBuilder::new();
        let init = cp.method_ref("java/lang/Object", "<init>", "()V", false);
        let [hi, lo] = init.to_be_bytes();
        // aload_0; invokespecial Object.<init>; aload_0; ifnonnull L; L: return
        let code = [ALOAD_0, INVOKESPECIAL, hi, lo, ALOAD_0, IFNONNULL, 0, 3, RETURN];
        let ctx = MethodContext {
            owner: "demo/Sample",
            access: 0,
            name: "<init>",
            descriptor: "()V",
        };
        let analysis = compute_frames(&code, cp.pool(), &ctx, &[], &ClassHierarchy::new()).unwrap();
        assert_eq!(analysis.frames[0].locals, vec![FrameType::Object("demo/Sample".to_string())]);
    }

    #[test]
    fn jsr_is_rejected_only_when_computing_frames() {
        // jsr L; return; L: astore_0; ret 0
        let code = [JSR, 0, 4, RETURN, ASTORE_0, RET, 0];
        let cp = ConstantPoolBuilder::new();
        let maxs = compute_maxs(&code, cp.pool(), &method("()V"), &[]).unwrap();
        assert_eq!(maxs, Maxs { max_stack: 1, max_locals: 1 });
        let hierarchy = ClassHierarchy::new();
        assert!(compute_frames(&code, cp.pool(), &method("()V"), &[], &hierarchy).is_err());
    }

    #[test]
    fn object_merges_use_the_resolver() {
        let mut cp = ConstantPoolBuilder::new();
        let a = cp.class("demo/A").to_be_bytes();
        let b = cp.class("demo/B").to_be_bytes();
        // iload_0; ifeq L1; aconst_null; checkcast A; goto L2;
        // L1: aconst_null; checkcast B; L2: areturn
        let code = [
            ILOAD_0, IFEQ, 0, 10, ACONST_NULL, CHECKCAST, a[0], a[1], GOTO, 0, 7, ACONST_NULL,
            CHECKCAST, b[0], b[1], ARETURN,
        ];
        let ctx = method("(I)Ljava/lang/Object;");

        let err = compute_frames(&code, cp.pool(), &ctx, &[], &ClassHierarchy::new()).unwrap_err();
        assert!(matches!(err, crate::error::Error::HierarchyResolution { .. }));

        let mut hierarchy = ClassHierarchy::new();
        hierarchy
            .insert("demo/A", "demo/Base")
            .insert("demo/B", "demo/Base")
            .insert("demo/Base", OBJECT);
        let analysis = compute_frames(&code, cp.pool(), &ctx, &[], &hierarchy).unwrap();
        assert_eq!(analysis.frames[1].offset, 15);
        assert_eq!(analysis.frames[1].stack, vec![FrameType::Object("demo/Base".to_string())]);
    }

    #[test]
    fn allocation_sites_merge_to_top() {
        let mut cp = ConstantPoolBuilder::new();
        let a = cp.class("demo/A").to_be_bytes();
        // iload_0; ifeq L1; new A; goto L2; L1: new A; L2: areturn
        let code = [ILOAD_0, IFEQ, 0, 9, NEW, a[0], a[1], GOTO, 0, 6, NEW, a[0], a[1], ARETURN];
        let ctx = method("(I)Ljava/lang/Object;");
        let analysis = compute_frames(&code, cp.pool(), &ctx, &[], &ClassHierarchy::new()).unwrap();
        assert_eq!(analysis.frames[1].stack, vec![FrameType::Top]);
    }
}
