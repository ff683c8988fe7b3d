//! The diagnostic taxonomy shared by every stage of the pipeline.
//!
//! Lexing, parsing, validation and encoding all report through this one
//! `Error` type so the [`crate::logging::Logger`] can apply a single
//! severity/formatting policy regardless of which stage raised it.

use thiserror::Error;

/// Severity of a single diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    /// Informational; never fails the run.
    Notice,
    /// Suspect but legal; promoted to Error under `-erroronwarning`.
    Warning,
    /// This statement could not be processed; the run still completes.
    Error,
    /// The run cannot continue at all.
    Fatal,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Severity::Notice => "notice",
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::Fatal => "fatal error",
        };
        write!(f, "{s}")
    }
}

/// A source location a diagnostic or command can be attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FileLine {
    pub file_num: u32,
    pub line: u32,
}

impl FileLine {
    pub fn new(file_num: u32, line: u32) -> Self {
        FileLine { file_num, line }
    }
}

/// Every error condition the assembler can report.
///
/// Variants carry enough context to be formatted as
/// `<file>(<line>) <kind>: <message>` without re-deriving state.
#[derive(Debug, Error)]
pub enum Error {
    #[error("unterminated block comment")]
    UnterminatedBlockComment,
    #[error("unterminated string literal")]
    UnterminatedString,
    #[error("invalid token: {text}")]
    InvalidToken { text: String },

    #[error("unexpected token: {text}")]
    UnexpectedToken { text: String },
    #[error("expected {expected}, found {found}")]
    ExpectedFound { expected: String, found: String },
    #[error("unknown directive \"{name}\"")]
    UnknownDirective { name: String },
    #[error("unknown instruction \"{name}\"")]
    UnknownInstruction { name: String },
    #[error("no architecture selected before this instruction")]
    NoArchitectureSelected,
    #[error("invalid argument \"{argument}\"")]
    InvalidArgument { argument: String },
    #[error("invalid number of arguments: found {found}, expected {expected:?}")]
    InvalidArgumentCount { found: usize, expected: Vec<usize> },
    #[error("value {value:#x} does not fit in {bits} bits")]
    ValueOutOfRange { value: i64, bits: u32 },
    #[error("branch target out of range")]
    BranchOutOfRange,
    #[error("invalid shifted immediate")]
    InvalidShiftedImmediate,
    #[error("unable to find literal pool entry")]
    MissingPoolEntry,
    #[error("{0}")]
    UserError(String),
    #[error("include depth exceeds the maximum of {max}")]
    IncludeTooDeep { max: usize },
    #[error("failed to read file \"{path}\": {reason}")]
    ReadError { path: String, reason: String },
    #[error("failed to write file \"{path}\": {reason}")]
    WriteError { path: String, reason: String },
    #[error("in file included here: {0}")]
    IncludeError(Box<Error>),
    #[error("equation \"{name}\" is defined in terms of itself")]
    SelfReferentialEquation { name: String },
    #[error("label \"{name}\" is already defined")]
    DuplicateLabel { name: String },
    #[error("symbol \"{name}\" is undefined")]
    UndefinedSymbol { name: String },
    #[error("invalid symbol name \"{name}\"")]
    InvalidSymbolName { name: String },
    #[error("macro \"{name}\" is already defined")]
    DuplicateMacro { name: String },
    #[error("macros may not be nested")]
    NestedMacroDefinition,
    #[error("unknown macro or instruction \"{name}\"")]
    UnknownMacroOrInstruction { name: String },
    #[error("`.align` value {0} is not a power of two")]
    AlignNotPowerOfTwo { value: i64 },
    #[error("`.area` overflowed: used {used} bytes of {declared}")]
    AreaOverflow { used: i64, declared: i64 },
    #[error("no output file is open")]
    NoActiveFile,
    #[error("stuck in infinite validation loop")]
    ValidationDidNotConverge,
    #[error("invalid ELF file: {0}")]
    InvalidElf(String),
    #[error("duplicate external symbol \"{name}\"")]
    DuplicateExternalSymbol { name: String },
    #[error("undefined external symbol \"{name}\"")]
    UndefinedExternal { name: String },
    #[error("invalid PSX object file: {0}")]
    InvalidPsxObject(String),
    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
