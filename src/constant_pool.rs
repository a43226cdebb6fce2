use std::collections::HashMap;

use crate::bytes::{write_u1, write_u2, write_u4, write_u8, ByteReader};
use crate::error::{ClassReadError, ClassWriteError};

pub const CONSTANT_UTF8: u8 = 1;
pub const CONSTANT_INTEGER: u8 = 3;
pub const CONSTANT_FLOAT: u8 = 4;
pub const CONSTANT_LONG: u8 = 5;
pub const CONSTANT_DOUBLE: u8 = 6;
pub const CONSTANT_CLASS: u8 = 7;
pub const CONSTANT_STRING: u8 = 8;
pub const CONSTANT_FIELDREF: u8 = 9;
pub const CONSTANT_METHODREF: u8 = 10;
pub const CONSTANT_INTERFACE_METHODREF: u8 = 11;
pub const CONSTANT_NAME_AND_TYPE: u8 = 12;
pub const CONSTANT_METHOD_HANDLE: u8 = 15;
pub const CONSTANT_METHOD_TYPE: u8 = 16;
pub const CONSTANT_DYNAMIC: u8 = 17;
pub const CONSTANT_INVOKE_DYNAMIC: u8 = 18;
pub const CONSTANT_MODULE: u8 = 19;
pub const CONSTANT_PACKAGE: u8 = 20;

#[derive(Debug, Clone, PartialEq)]
pub enum CpInfo {
    Unusable,
    Utf8(String),
    Integer(i32),
    Float(f32),
    Long(i64),
    Double(f64),
    Class {
        name_index: u16,
    },
    String {
        string_index: u16,
    },
    Fieldref {
        class_index: u16,
        name_and_type_index: u16,
    },
    Methodref {
        class_index: u16,
        name_and_type_index: u16,
    },
    InterfaceMethodref {
        class_index: u16,
        name_and_type_index: u16,
    },
    NameAndType {
        name_index: u16,
        descriptor_index: u16,
    },
    MethodHandle {
        reference_kind: u8,
        reference_index: u16,
    },
    MethodType {
        descriptor_index: u16,
    },
    Dynamic {
        bootstrap_method_attr_index: u16,
        name_and_type_index: u16,
    },
    InvokeDynamic {
        bootstrap_method_attr_index: u16,
        name_and_type_index: u16,
    },
    Module {
        name_index: u16,
    },
    Package {
        name_index: u16,
    },
}

impl CpInfo {
    pub fn tag(&self) -> u8 {
        match self {
            CpInfo::Unusable => 0,
            CpInfo::Utf8(_) => CONSTANT_UTF8,
            CpInfo::Integer(_) => CONSTANT_INTEGER,
            CpInfo::Float(_) => CONSTANT_FLOAT,
            CpInfo::Long(_) => CONSTANT_LONG,
            CpInfo::Double(_) => CONSTANT_DOUBLE,
            CpInfo::Class { .. } => CONSTANT_CLASS,
            CpInfo::String { .. } => CONSTANT_STRING,
            CpInfo::Fieldref { .. } => CONSTANT_FIELDREF,
            CpInfo::Methodref { .. } => CONSTANT_METHODREF,
            CpInfo::InterfaceMethodref { .. } => CONSTANT_INTERFACE_METHODREF,
            CpInfo::NameAndType { .. } => CONSTANT_NAME_AND_TYPE,
            CpInfo::MethodHandle { .. } => CONSTANT_METHOD_HANDLE,
            CpInfo::MethodType { .. } => CONSTANT_METHOD_TYPE,
            CpInfo::Dynamic { .. } => CONSTANT_DYNAMIC,
            CpInfo::InvokeDynamic { .. } => CONSTANT_INVOKE_DYNAMIC,
            CpInfo::Module { .. } => CONSTANT_MODULE,
            CpInfo::Package { .. } => CONSTANT_PACKAGE,
        }
    }

    /// Long and double entries occupy two pool slots.
    pub fn is_wide(&self) -> bool {
        matches!(self, CpInfo::Long(_) | CpInfo::Double(_))
    }

    fn write(&self, out: &mut Vec<u8>) {
        if matches!(self, CpInfo::Unusable) {
            return;
        }
        write_u1(out, self.tag());
        match self {
            CpInfo::Unusable => {}
            CpInfo::Utf8(value) => {
                let bytes = encode_modified_utf8(value);
                write_u2(out, bytes.len() as u16);
                out.extend_from_slice(&bytes);
            }
            CpInfo::Integer(value) => write_u4(out, *value as u32),
            CpInfo::Float(value) => write_u4(out, value.to_bits()),
            CpInfo::Long(value) => write_u8(out, *value as u64),
            CpInfo::Double(value) => write_u8(out, value.to_bits()),
            CpInfo::Class { name_index }
            | CpInfo::Module { name_index }
            | CpInfo::Package { name_index } => write_u2(out, *name_index),
            CpInfo::String { string_index } => write_u2(out, *string_index),
            CpInfo::MethodType { descriptor_index } => write_u2(out, *descriptor_index),
            CpInfo::Fieldref {
                class_index,
                name_and_type_index,
            }
            | CpInfo::Methodref {
                class_index,
                name_and_type_index,
            }
            | CpInfo::InterfaceMethodref {
                class_index,
                name_and_type_index,
            } => {
                write_u2(out, *class_index);
                write_u2(out, *name_and_type_index);
            }
            CpInfo::NameAndType {
                name_index,
                descriptor_index,
            } => {
                write_u2(out, *name_index);
                write_u2(out, *descriptor_index);
            }
            CpInfo::MethodHandle {
                reference_kind,
                reference_index,
            } => {
                write_u1(out, *reference_kind);
                write_u2(out, *reference_index);
            }
            CpInfo::Dynamic {
                bootstrap_method_attr_index,
                name_and_type_index,
            }
            | CpInfo::InvokeDynamic {
                bootstrap_method_attr_index,
                name_and_type_index,
            } => {
                write_u2(out, *bootstrap_method_attr_index);
                write_u2(out, *name_and_type_index);
            }
        }
    }
}

/// One entry of the `BootstrapMethods` attribute.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BootstrapMethod {
    pub bootstrap_method_ref: u16,
    pub bootstrap_arguments: Vec<u16>,
}

/// A parsed constant pool with typed lookups.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConstantPool {
    entries: Vec<CpInfo>,
}

impl ConstantPool {
    pub fn from_entries(entries: Vec<CpInfo>) -> Self {
        Self { entries }
    }

    pub(crate) fn read(reader: &mut ByteReader<'_>) -> Result<Self, ClassReadError> {
        let count = reader.read_u2()? as usize;
        let mut entries = Vec::with_capacity(count);
        entries.push(CpInfo::Unusable);

        while entries.len() < count {
            let tag = reader.read_u1()?;
            let entry = match tag {
                CONSTANT_UTF8 => {
                    let len = reader.read_u2()? as usize;
                    CpInfo::Utf8(decode_modified_utf8(reader.read_bytes(len)?)?)
                }
                CONSTANT_INTEGER => CpInfo::Integer(reader.read_i4()?),
                CONSTANT_FLOAT => CpInfo::Float(f32::from_bits(reader.read_u4()?)),
                CONSTANT_LONG => CpInfo::Long(reader.read_u8()? as i64),
                CONSTANT_DOUBLE => CpInfo::Double(f64::from_bits(reader.read_u8()?)),
                CONSTANT_CLASS => CpInfo::Class {
                    name_index: reader.read_u2()?,
                },
                CONSTANT_STRING => CpInfo::String {
                    string_index: reader.read_u2()?,
                },
                CONSTANT_FIELDREF => CpInfo::Fieldref {
                    class_index: reader.read_u2()?,
                    name_and_type_index: reader.read_u2()?,
                },
                CONSTANT_METHODREF => CpInfo::Methodref {
                    class_index: reader.read_u2()?,
                    name_and_type_index: reader.read_u2()?,
                },
                CONSTANT_INTERFACE_METHODREF => CpInfo::InterfaceMethodref {
                    class_index: reader.read_u2()?,
                    name_and_type_index: reader.read_u2()?,
                },
                CONSTANT_NAME_AND_TYPE => CpInfo::NameAndType {
                    name_index: reader.read_u2()?,
                    descriptor_index: reader.read_u2()?,
                },
                CONSTANT_METHOD_HANDLE => CpInfo::MethodHandle {
                    reference_kind: reader.read_u1()?,
                    reference_index: reader.read_u2()?,
                },
                CONSTANT_METHOD_TYPE => CpInfo::MethodType {
                    descriptor_index: reader.read_u2()?,
                },
                CONSTANT_DYNAMIC => CpInfo::Dynamic {
                    bootstrap_method_attr_index: reader.read_u2()?,
                    name_and_type_index: reader.read_u2()?,
                },
                CONSTANT_INVOKE_DYNAMIC => CpInfo::InvokeDynamic {
                    bootstrap_method_attr_index: reader.read_u2()?,
                    name_and_type_index: reader.read_u2()?,
                },
                CONSTANT_MODULE => CpInfo::Module {
                    name_index: reader.read_u2()?,
                },
                CONSTANT_PACKAGE => CpInfo::Package {
                    name_index: reader.read_u2()?,
                },
                _ => return Err(ClassReadError::InvalidConstantPoolTag(tag)),
            };
            let wide = entry.is_wide();
            entries.push(entry);
            if wide {
                entries.push(CpInfo::Unusable);
            }
        }

        Ok(Self { entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.len() <= 1
    }

    pub fn entries(&self) -> &[CpInfo] {
        &self.entries
    }

    pub fn get(&self, index: u16) -> Result<&CpInfo, ClassReadError> {
        match self.entries.get(index as usize) {
            Some(CpInfo::Unusable) | None => Err(ClassReadError::InvalidIndex(index)),
            Some(entry) => Ok(entry),
        }
    }

    pub fn utf8(&self, index: u16) -> Result<&str, ClassReadError> {
        match self.get(index)? {
            CpInfo::Utf8(value) => Ok(value.as_str()),
            _ => Err(ClassReadError::InvalidIndex(index)),
        }
    }

    /// Like [`ConstantPool::utf8`] but maps index 0 to `None`.
    pub fn optional_utf8(&self, index: u16) -> Result<Option<&str>, ClassReadError> {
        if index == 0 {
            return Ok(None);
        }
        self.utf8(index).map(Some)
    }

    pub fn class_name(&self, index: u16) -> Result<&str, ClassReadError> {
        match self.get(index)? {
            CpInfo::Class { name_index } => self.utf8(*name_index),
            _ => Err(ClassReadError::InvalidIndex(index)),
        }
    }

    pub fn optional_class_name(&self, index: u16) -> Result<Option<&str>, ClassReadError> {
        if index == 0 {
            return Ok(None);
        }
        self.class_name(index).map(Some)
    }

    pub fn module_name(&self, index: u16) -> Result<&str, ClassReadError> {
        match self.get(index)? {
            CpInfo::Module { name_index } => self.utf8(*name_index),
            _ => Err(ClassReadError::InvalidIndex(index)),
        }
    }

    pub fn package_name(&self, index: u16) -> Result<&str, ClassReadError> {
        match self.get(index)? {
            CpInfo::Package { name_index } => self.utf8(*name_index),
            _ => Err(ClassReadError::InvalidIndex(index)),
        }
    }

    pub fn name_and_type(&self, index: u16) -> Result<(&str, &str), ClassReadError> {
        match self.get(index)? {
            CpInfo::NameAndType {
                name_index,
                descriptor_index,
            } => Ok((self.utf8(*name_index)?, self.utf8(*descriptor_index)?)),
            _ => Err(ClassReadError::InvalidIndex(index)),
        }
    }

    /// Resolves a field, method or interface method reference to
    /// `(owner, name, descriptor, is_interface)`.
    pub fn member_ref(&self, index: u16) -> Result<MemberRef<'_>, ClassReadError> {
        let (class_index, name_and_type_index, is_interface) = match self.get(index)? {
            CpInfo::Fieldref {
                class_index,
                name_and_type_index,
            }
            | CpInfo::Methodref {
                class_index,
                name_and_type_index,
            } => (*class_index, *name_and_type_index, false),
            CpInfo::InterfaceMethodref {
                class_index,
                name_and_type_index,
            } => (*class_index, *name_and_type_index, true),
            _ => return Err(ClassReadError::InvalidIndex(index)),
        };
        let owner = self.class_name(class_index)?;
        let (name, descriptor) = self.name_and_type(name_and_type_index)?;
        Ok(MemberRef {
            owner,
            name,
            descriptor,
            is_interface,
        })
    }

    /// Resolves a `CONSTANT_Dynamic` or `CONSTANT_InvokeDynamic` entry to
    /// `(bootstrap index, name, descriptor)`.
    pub fn dynamic(&self, index: u16) -> Result<(u16, &str, &str), ClassReadError> {
        match self.get(index)? {
            CpInfo::Dynamic {
                bootstrap_method_attr_index,
                name_and_type_index,
            }
            | CpInfo::InvokeDynamic {
                bootstrap_method_attr_index,
                name_and_type_index,
            } => {
                let (name, descriptor) = self.name_and_type(*name_and_type_index)?;
                Ok((*bootstrap_method_attr_index, name, descriptor))
            }
            _ => Err(ClassReadError::InvalidIndex(index)),
        }
    }
}

/// A resolved member reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemberRef<'a> {
    pub owner: &'a str,
    pub name: &'a str,
    pub descriptor: &'a str,
    pub is_interface: bool,
}

/// The constant pool and bootstrap method table of a parsed class, kept so a
/// later write can reuse the original indices.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConstantPoolSnapshot {
    pub pool: ConstantPool,
    pub bootstrap_methods: Vec<BootstrapMethod>,
}

/// A builder for the constant pool of a class.
///
/// Entries are deduplicated on their binary encoding, so structurally equal
/// constants share one index.
#[derive(Debug)]
pub struct ConstantPoolBuilder {
    pool: ConstantPool,
    lookup: HashMap<Vec<u8>, u16>,
    bootstrap_methods: Vec<BootstrapMethod>,
    bootstrap_lookup: HashMap<BootstrapMethod, u16>,
}

impl Default for ConstantPoolBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ConstantPoolBuilder {
    /// Creates a new, empty `ConstantPoolBuilder`.
    ///
    /// The constant pool starts with a dummy entry at index 0.
    pub fn new() -> Self {
        Self {
            pool: ConstantPool::from_entries(vec![CpInfo::Unusable]),
            lookup: HashMap::new(),
            bootstrap_methods: Vec::new(),
            bootstrap_lookup: HashMap::new(),
        }
    }

    /// Seeds the builder with an existing pool so that every entry keeps
    /// its original index.
    pub fn from_snapshot(snapshot: &ConstantPoolSnapshot) -> Self {
        let mut builder = Self {
            pool: snapshot.pool.clone(),
            lookup: HashMap::new(),
            bootstrap_methods: snapshot.bootstrap_methods.clone(),
            bootstrap_lookup: HashMap::new(),
        };
        for (index, entry) in snapshot.pool.entries().iter().enumerate() {
            if matches!(entry, CpInfo::Unusable) {
                continue;
            }
            let mut key = Vec::new();
            entry.write(&mut key);
            builder.lookup.entry(key).or_insert(index as u16);
        }
        for (index, method) in snapshot.bootstrap_methods.iter().enumerate() {
            builder
                .bootstrap_lookup
                .entry(method.clone())
                .or_insert(index as u16);
        }
        builder
    }

    /// Read access to the entries added so far.
    pub fn pool(&self) -> &ConstantPool {
        &self.pool
    }

    pub fn bootstrap_methods(&self) -> &[BootstrapMethod] {
        &self.bootstrap_methods
    }

    pub fn utf8(&mut self, value: &str) -> u16 {
        self.push(CpInfo::Utf8(value.to_string()))
    }

    pub fn integer(&mut self, value: i32) -> u16 {
        self.push(CpInfo::Integer(value))
    }

    pub fn float(&mut self, value: f32) -> u16 {
        self.push(CpInfo::Float(value))
    }

    pub fn long(&mut self, value: i64) -> u16 {
        self.push(CpInfo::Long(value))
    }

    pub fn double(&mut self, value: f64) -> u16 {
        self.push(CpInfo::Double(value))
    }

    /// Adds a Class constant for an internal name or array descriptor.
    pub fn class(&mut self, name: &str) -> u16 {
        let name_index = self.utf8(name);
        self.push(CpInfo::Class { name_index })
    }

    /// Adds a String constant (a string literal, as loaded by `ldc`).
    pub fn string(&mut self, value: &str) -> u16 {
        let string_index = self.utf8(value);
        self.push(CpInfo::String { string_index })
    }

    pub fn name_and_type(&mut self, name: &str, descriptor: &str) -> u16 {
        let name_index = self.utf8(name);
        let descriptor_index = self.utf8(descriptor);
        self.push(CpInfo::NameAndType {
            name_index,
            descriptor_index,
        })
    }

    pub fn field_ref(&mut self, owner: &str, name: &str, descriptor: &str) -> u16 {
        let class_index = self.class(owner);
        let name_and_type_index = self.name_and_type(name, descriptor);
        self.push(CpInfo::Fieldref {
            class_index,
            name_and_type_index,
        })
    }

    pub fn method_ref(
        &mut self,
        owner: &str,
        name: &str,
        descriptor: &str,
        is_interface: bool,
    ) -> u16 {
        let class_index = self.class(owner);
        let name_and_type_index = self.name_and_type(name, descriptor);
        if is_interface {
            self.push(CpInfo::InterfaceMethodref {
                class_index,
                name_and_type_index,
            })
        } else {
            self.push(CpInfo::Methodref {
                class_index,
                name_and_type_index,
            })
        }
    }

    pub fn method_type(&mut self, descriptor: &str) -> u16 {
        let descriptor_index = self.utf8(descriptor);
        self.push(CpInfo::MethodType { descriptor_index })
    }

    /// Adds a MethodHandle constant. Reference kinds 1 to 4 point at a
    /// field reference, the others at a method reference.
    pub fn method_handle(
        &mut self,
        reference_kind: u8,
        owner: &str,
        name: &str,
        descriptor: &str,
        is_interface: bool,
    ) -> u16 {
        let reference_index = if reference_kind <= 4 {
            self.field_ref(owner, name, descriptor)
        } else {
            self.method_ref(owner, name, descriptor, is_interface)
        };
        self.push(CpInfo::MethodHandle {
            reference_kind,
            reference_index,
        })
    }

    pub fn dynamic(&mut self, bootstrap_index: u16, name: &str, descriptor: &str) -> u16 {
        let name_and_type_index = self.name_and_type(name, descriptor);
        self.push(CpInfo::Dynamic {
            bootstrap_method_attr_index: bootstrap_index,
            name_and_type_index,
        })
    }

    pub fn invoke_dynamic(&mut self, bootstrap_index: u16, name: &str, descriptor: &str) -> u16 {
        let name_and_type_index = self.name_and_type(name, descriptor);
        self.push(CpInfo::InvokeDynamic {
            bootstrap_method_attr_index: bootstrap_index,
            name_and_type_index,
        })
    }

    pub fn module(&mut self, name: &str) -> u16 {
        let name_index = self.utf8(name);
        self.push(CpInfo::Module { name_index })
    }

    pub fn package(&mut self, name: &str) -> u16 {
        let name_index = self.utf8(name);
        self.push(CpInfo::Package { name_index })
    }

    /// Adds an entry to the bootstrap method table and returns its index.
    pub fn bootstrap_method(&mut self, handle_index: u16, arguments: Vec<u16>) -> u16 {
        let method = BootstrapMethod {
            bootstrap_method_ref: handle_index,
            bootstrap_arguments: arguments,
        };
        if let Some(index) = self.bootstrap_lookup.get(&method) {
            return *index;
        }
        let index = self.bootstrap_methods.len() as u16;
        self.bootstrap_methods.push(method.clone());
        self.bootstrap_lookup.insert(method, index);
        index
    }

    fn push(&mut self, entry: CpInfo) -> u16 {
        let mut key = Vec::new();
        entry.write(&mut key);
        if let Some(index) = self.lookup.get(&key) {
            return *index;
        }
        let index = self.pool.entries.len() as u16;
        let wide = entry.is_wide();
        self.pool.entries.push(entry);
        if wide {
            self.pool.entries.push(CpInfo::Unusable);
        }
        self.lookup.insert(key, index);
        index
    }

    /// Writes `constant_pool_count` followed by the entries.
    pub(crate) fn write(&self, out: &mut Vec<u8>) -> Result<(), ClassWriteError> {
        let count = self.pool.entries.len();
        if count > u16::MAX as usize {
            return Err(ClassWriteError::ConstantPoolOverflow(count));
        }
        write_u2(out, count as u16);
        for entry in &self.pool.entries {
            entry.write(out);
        }
        Ok(())
    }

    /// Encodes the `BootstrapMethods` attribute body, if any entry exists.
    pub(crate) fn bootstrap_methods_body(&self) -> Option<Vec<u8>> {
        if self.bootstrap_methods.is_empty() {
            return None;
        }
        let mut out = Vec::new();
        write_u2(&mut out, self.bootstrap_methods.len() as u16);
        for method in &self.bootstrap_methods {
            write_u2(&mut out, method.bootstrap_method_ref);
            write_u2(&mut out, method.bootstrap_arguments.len() as u16);
            for argument in &method.bootstrap_arguments {
                write_u2(&mut out, *argument);
            }
        }
        Some(out)
    }
}

pub fn decode_modified_utf8(bytes: &[u8]) -> Result<String, ClassReadError> {
    let mut code_units = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let byte = bytes[i];
        if byte & 0x80 == 0 {
            code_units.push(byte as u16);
            i += 1;
        } else if byte & 0xE0 == 0xC0 {
            if i + 1 >= bytes.len() {
                return Err(ClassReadError::Utf8Error("truncated 2-byte".to_string()));
            }
            let byte2 = bytes[i + 1];
            if byte2 & 0xC0 != 0x80 {
                return Err(ClassReadError::Utf8Error("invalid 2-byte".to_string()));
            }
            code_units.push((((byte & 0x1F) as u16) << 6) | ((byte2 & 0x3F) as u16));
            i += 2;
        } else if byte & 0xF0 == 0xE0 {
            if i + 2 >= bytes.len() {
                return Err(ClassReadError::Utf8Error("truncated 3-byte".to_string()));
            }
            let byte2 = bytes[i + 1];
            let byte3 = bytes[i + 2];
            if byte2 & 0xC0 != 0x80 || byte3 & 0xC0 != 0x80 {
                return Err(ClassReadError::Utf8Error("invalid 3-byte".to_string()));
            }
            code_units.push(
                (((byte & 0x0F) as u16) << 12)
                    | (((byte2 & 0x3F) as u16) << 6)
                    | ((byte3 & 0x3F) as u16),
            );
            i += 3;
        } else {
            return Err(ClassReadError::Utf8Error("invalid leading byte".to_string()));
        }
    }

    String::from_utf16(&code_units)
        .map_err(|_| ClassReadError::Utf8Error("invalid utf16".to_string()))
}

/// Encodes a string the way the class file format stores `CONSTANT_Utf8`:
/// NUL as two bytes and supplementary characters as surrogate pairs.
pub fn encode_modified_utf8(value: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(value.len());
    for unit in value.encode_utf16() {
        match unit {
            0x0001..=0x007F => out.push(unit as u8),
            0x0000 | 0x0080..=0x07FF => {
                out.push(0xC0 | ((unit >> 6) & 0x1F) as u8);
                out.push(0x80 | (unit & 0x3F) as u8);
            }
            _ => {
                out.push(0xE0 | ((unit >> 12) & 0x0F) as u8);
                out.push(0x80 | ((unit >> 6) & 0x3F) as u8);
                out.push(0x80 | (unit & 0x3F) as u8);
            }
        }
    }
    out
}
