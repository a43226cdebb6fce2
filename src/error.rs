/// Result alias used by every translation session.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("malformed class file: {0}")]
    MalformedInput(#[from] ClassReadError),
    #[error("class write error: {0}")]
    ClassWrite(#[from] ClassWriteError),
    #[error("unsupported constant: {0}")]
    UnsupportedConstant(String),
    #[error("unsupported class major version {major} (ceiling {ceiling})")]
    UnsupportedVersion {
        /// The major version declared by the class.
        major: u16,
        /// The highest major version any available backend accepts.
        ceiling: u16,
    },
    #[error("cannot determine common super class of {left} and {right}")]
    HierarchyResolution { left: String, right: String },
    #[error("visitor protocol violation: {0}")]
    ProtocolViolation(String),
}

impl Error {
    pub(crate) fn protocol(message: impl Into<String>) -> Self {
        Error::ProtocolViolation(message.into())
    }

    pub(crate) fn unsupported_constant(message: impl Into<String>) -> Self {
        Error::UnsupportedConstant(message.into())
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ClassReadError {
    #[error("unexpected end of input")]
    UnexpectedEof,
    #[error("invalid magic 0x{0:08x}")]
    InvalidMagic(u32),
    #[error("invalid constant pool tag {0}")]
    InvalidConstantPoolTag(u8),
    #[error("invalid constant pool index {0}")]
    InvalidIndex(u16),
    #[error("invalid attribute {0}")]
    InvalidAttribute(String),
    #[error("invalid opcode 0x{opcode:02x} at {offset}")]
    InvalidOpcode {
        /// The opcode that caused the error.
        opcode: u8,
        /// Offset into the byte sequence where the error occurred.
        offset: usize,
    },
    #[error("invalid stack map frame type {0}")]
    InvalidStackMapFrameType(u8),
    #[error("invalid verification type tag {0}")]
    InvalidVerificationType(u8),
    #[error("invalid annotation element tag '{0}'")]
    InvalidElementTag(char),
    #[error("invalid type annotation target 0x{0:02x}")]
    InvalidTargetType(u8),
    #[error("invalid code offset {0}")]
    InvalidOffset(u32),
    #[error("modified utf8 error: {0}")]
    Utf8Error(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ClassWriteError {
    #[error("label {0} is referenced but never bound")]
    UnboundLabel(String),
    #[error("code of method {method} is too large ({size} bytes)")]
    MethodTooLarge { method: String, size: usize },
    #[error("constant pool overflow ({0} entries)")]
    ConstantPoolOverflow(usize),
    #[error("branch offset {offset} out of range for opcode 0x{opcode:02X}")]
    BranchOutOfRange { opcode: u8, offset: i32 },
    #[error("frame computation error: {0}")]
    FrameComputation(String),
}
