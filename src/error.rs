//! Error types and the process-wide diagnostic channel.
//!
//! Structural errors (parse, type, not-supported) are returned synchronously
//! and leave the interpreter environment untouched. Evaluation errors abort
//! the in-progress evaluation. Bounds-checked accessors additionally report
//! into the [`collector`] channel and return a neutral value; the channel is
//! a diagnostic hook, not control flow.

use std::fmt;
use std::panic::Location;

use once_cell::sync::Lazy;
use parking_lot::Mutex;

use crate::types::DataType;

/// Errors produced by the engine
#[derive(Debug, Clone, PartialEq)]
pub enum EngineError {
    /// An index outside a column or bitmap
    OutOfRange { index: usize, len: usize },
    /// Elementwise op between columns of different element types, or a
    /// wrong-type handle access
    TypeMismatch { expected: DataType, found: DataType },
    /// A type-inference rule violation (e.g. bitwise on float)
    TypeError(String),
    /// Lex or parse failure
    ParseError { message: String, position: usize },
    /// Integer `/` or `%` with a zero divisor at evaluation time
    DivisionByZero,
    /// The region allocator could not satisfy a request
    AllocationFailure { requested: usize },
    /// JIT code generation or code-buffer allocation failed
    CodegenError(String),
    /// An operator/type combination no tier handles
    NotSupported(String),
    /// A broken internal invariant (indicates a bug)
    Internal(String),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::OutOfRange { index, len } => {
                write!(f, "index {} out of range for length {}", index, len)
            }
            EngineError::TypeMismatch { expected, found } => {
                write!(f, "type mismatch: expected {}, found {}", expected, found)
            }
            EngineError::TypeError(msg) => write!(f, "type error: {}", msg),
            EngineError::ParseError { message, position } => {
                write!(f, "parse error at position {}: {}", position, message)
            }
            EngineError::DivisionByZero => write!(f, "integer division by zero"),
            EngineError::AllocationFailure { requested } => {
                write!(f, "region allocator could not satisfy {} bytes", requested)
            }
            EngineError::CodegenError(msg) => write!(f, "code generation failed: {}", msg),
            EngineError::NotSupported(msg) => write!(f, "not supported: {}", msg),
            EngineError::Internal(msg) => write!(f, "internal error: {}", msg),
        }
    }
}

impl std::error::Error for EngineError {}

pub type Result<T> = std::result::Result<T, EngineError>;

/// Coarse code carried by channel records
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    OutOfRange,
    TypeMismatch,
    InvalidArgument,
    InvalidOperation,
    AllocationFailure,
}

/// One structured record in the diagnostic channel
#[derive(Debug, Clone)]
pub struct ErrorRecord {
    pub code: ErrorCode,
    /// Component that reported, e.g. "presence_bitmap"
    pub component: &'static str,
    /// Operation within the component, e.g. "test"
    pub operation: &'static str,
    pub message: &'static str,
    /// Source location of the report site
    pub location: &'static Location<'static>,
    /// Context-specific data, e.g. the offending index and the length
    context: [u64; 4],
    context_len: u8,
}

impl ErrorRecord {
    #[track_caller]
    pub fn new(
        code: ErrorCode,
        component: &'static str,
        operation: &'static str,
        message: &'static str,
    ) -> Self {
        ErrorRecord {
            code,
            component,
            operation,
            message,
            location: Location::caller(),
            context: [0; 4],
            context_len: 0,
        }
    }

    /// Attach a context word; at most four are kept
    pub fn with_context(mut self, value: u64) -> Self {
        if (self.context_len as usize) < self.context.len() {
            self.context[self.context_len as usize] = value;
            self.context_len += 1;
        }
        self
    }

    pub fn context(&self) -> &[u64] {
        &self.context[..self.context_len as usize]
    }
}

/// Process-wide collector of [`ErrorRecord`]s.
///
/// Push is locked; readers take snapshots. Collection can be disabled for
/// hot paths that expect and tolerate reported violations.
pub struct ErrorCollector {
    records: Mutex<Vec<ErrorRecord>>,
    enabled: Mutex<bool>,
}

impl ErrorCollector {
    fn new() -> Self {
        ErrorCollector {
            records: Mutex::new(Vec::new()),
            enabled: Mutex::new(true),
        }
    }

    pub fn report(&self, record: ErrorRecord) {
        if !*self.enabled.lock() {
            return;
        }
        self.records.lock().push(record);
    }

    pub fn has_errors(&self) -> bool {
        !self.records.lock().is_empty()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    pub fn last(&self) -> Option<ErrorRecord> {
        self.records.lock().last().cloned()
    }

    /// Drain every record collected so far
    pub fn take_all(&self) -> Vec<ErrorRecord> {
        std::mem::take(&mut *self.records.lock())
    }

    /// Copy of every record collected so far
    pub fn snapshot(&self) -> Vec<ErrorRecord> {
        self.records.lock().clone()
    }

    pub fn clear(&self) {
        self.records.lock().clear();
    }

    pub fn set_enabled(&self, enabled: bool) {
        *self.enabled.lock() = enabled;
    }
}

static COLLECTOR: Lazy<ErrorCollector> = Lazy::new(ErrorCollector::new);

/// The process-wide diagnostic channel
pub fn collector() -> &'static ErrorCollector {
    &COLLECTOR
}

/// Report a record into the process-wide channel
pub fn report(record: ErrorRecord) {
    collector().report(record);
}
