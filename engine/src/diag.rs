// diag.rs — Unified diagnostics model
//
// Provides the shared diagnostic types used across all compiler passes.
// Every pass reports through `Diagnostic`; compile errors are simply
// error-level diagnostics carrying a stable code.
//
// Preconditions: none (types only).
// Postconditions: none (types only).
// Failure modes: none.
// Side effects: none.

use std::fmt;

use serde::Serialize;

// ── Location ─────────────────────────────────────────────────────────────

/// Where in the authored patch a diagnostic points.
///
/// Patches have no source text, so locations are stable block ids plus an
/// optional port name instead of spans.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize)]
pub struct Location {
    pub block: Option<String>,
    pub port: Option<String>,
}

impl Location {
    /// Location of the whole patch.
    pub fn patch() -> Self {
        Self::default()
    }

    pub fn block(id: impl Into<String>) -> Self {
        Self {
            block: Some(id.into()),
            port: None,
        }
    }

    pub fn port(id: impl Into<String>, port: impl Into<String>) -> Self {
        Self {
            block: Some(id.into()),
            port: Some(port.into()),
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.block, &self.port) {
            (Some(b), Some(p)) => write!(f, "{b}.{p}"),
            (Some(b), None) => write!(f, "{b}"),
            _ => write!(f, "<patch>"),
        }
    }
}

// ── Diagnostic code ──────────────────────────────────────────────────────

/// A stable diagnostic code (e.g., `E0001`, `W0300`).
///
/// Codes are `&'static str` constants defined in the `codes` module.
/// Once assigned, a code must never be reassigned to a different semantic
/// meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct DiagCode(pub &'static str);

impl fmt::Display for DiagCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub mod codes {
    use super::DiagCode;

    // structure (normalize)
    pub const E0001: DiagCode = DiagCode("E0001");
    pub const E0002: DiagCode = DiagCode("E0002");
    pub const E0003: DiagCode = DiagCode("E0003");
    pub const E0004: DiagCode = DiagCode("E0004");
    pub const E0005: DiagCode = DiagCode("E0005");
    pub const E0006: DiagCode = DiagCode("E0006");
    pub const E0007: DiagCode = DiagCode("E0007");
    pub const E0008: DiagCode = DiagCode("E0008");

    // types (type_infer, axis)
    pub const E0100: DiagCode = DiagCode("E0100");
    pub const E0101: DiagCode = DiagCode("E0101");
    pub const E0102: DiagCode = DiagCode("E0102");
    pub const E0200: DiagCode = DiagCode("E0200");
    pub const E0201: DiagCode = DiagCode("E0201");

    // cycles
    pub const E0300: DiagCode = DiagCode("E0300");

    // lowering
    pub const E0400: DiagCode = DiagCode("E0400");

    // internal verification (compiler defects)
    pub const E0600: DiagCode = DiagCode("E0600");
    pub const E0601: DiagCode = DiagCode("E0601");
    pub const E0602: DiagCode = DiagCode("E0602");

    // warnings
    pub const W0100: DiagCode = DiagCode("W0100");
    pub const W0300: DiagCode = DiagCode("W0300");

    // runtime warnings
    pub const W0500: DiagCode = DiagCode("W0500");
    pub const W0501: DiagCode = DiagCode("W0501");
}

// ── Error categories ─────────────────────────────────────────────────────

/// Categorical compile error kinds. Each maps to exactly one code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorKind {
    MissingTimeRoot,
    DuplicateSingleton,
    UnknownBlockType,
    UnknownPort,
    DuplicateBlockId,
    MultipleWriters,
    MissingRequiredInput,
    CompositeDepthExceeded,
    TypeMismatch,
    UnitMismatch,
    CardinalityMismatch,
    AxisViolation,
    UnresolvedTypeVariable,
    CycleWithoutStateBoundary,
    LoweringFailed,
    InternalVerification,
}

impl ErrorKind {
    pub fn code(self) -> DiagCode {
        match self {
            ErrorKind::MissingTimeRoot => codes::E0001,
            ErrorKind::DuplicateSingleton => codes::E0002,
            ErrorKind::UnknownBlockType => codes::E0003,
            ErrorKind::UnknownPort => codes::E0004,
            ErrorKind::DuplicateBlockId => codes::E0005,
            ErrorKind::MultipleWriters => codes::E0006,
            ErrorKind::MissingRequiredInput => codes::E0007,
            ErrorKind::CompositeDepthExceeded => codes::E0008,
            ErrorKind::TypeMismatch => codes::E0100,
            ErrorKind::UnitMismatch => codes::E0101,
            ErrorKind::CardinalityMismatch => codes::E0102,
            ErrorKind::AxisViolation => codes::E0200,
            ErrorKind::UnresolvedTypeVariable => codes::E0201,
            ErrorKind::CycleWithoutStateBoundary => codes::E0300,
            ErrorKind::LoweringFailed => codes::E0400,
            ErrorKind::InternalVerification => codes::E0600,
        }
    }

    fn from_code(code: DiagCode) -> Option<Self> {
        const ALL: [ErrorKind; 16] = [
            ErrorKind::MissingTimeRoot,
            ErrorKind::DuplicateSingleton,
            ErrorKind::UnknownBlockType,
            ErrorKind::UnknownPort,
            ErrorKind::DuplicateBlockId,
            ErrorKind::MultipleWriters,
            ErrorKind::MissingRequiredInput,
            ErrorKind::CompositeDepthExceeded,
            ErrorKind::TypeMismatch,
            ErrorKind::UnitMismatch,
            ErrorKind::CardinalityMismatch,
            ErrorKind::AxisViolation,
            ErrorKind::UnresolvedTypeVariable,
            ErrorKind::CycleWithoutStateBoundary,
            ErrorKind::LoweringFailed,
            ErrorKind::InternalVerification,
        ];
        if code.0.starts_with("E06") {
            return Some(ErrorKind::InternalVerification);
        }
        ALL.into_iter().find(|k| k.code() == code)
    }
}

// ── Severity level ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DiagLevel {
    Error,
    Warning,
}

// ── Related location ─────────────────────────────────────────────────────

/// A secondary location providing context for a diagnostic.
#[derive(Debug, Clone, Serialize)]
pub struct RelatedLocation {
    pub location: Location,
    pub label: String,
}

// ── Cause record ─────────────────────────────────────────────────────────

/// One link in a cause chain explaining a propagated constraint failure.
#[derive(Debug, Clone, Serialize)]
pub struct CauseRecord {
    pub message: String,
    pub location: Option<Location>,
}

// ── Diagnostic ───────────────────────────────────────────────────────────

/// A compiler diagnostic emitted by any pass.
#[derive(Debug, Clone, Serialize)]
pub struct Diagnostic {
    pub code: Option<DiagCode>,
    pub level: DiagLevel,
    pub location: Location,
    pub message: String,
    pub hint: Option<String>,
    pub related: Vec<RelatedLocation>,
    pub cause_chain: Vec<CauseRecord>,
}

/// Compile errors are error-level diagnostics.
pub type CompileError = Diagnostic;

impl Diagnostic {
    /// Create a new diagnostic with no code, hint, related locations, or causes.
    pub fn new(level: DiagLevel, location: Location, message: impl Into<String>) -> Self {
        Self {
            code: None,
            level,
            location,
            message: message.into(),
            hint: None,
            related: Vec::new(),
            cause_chain: Vec::new(),
        }
    }

    /// Error-level diagnostic tagged with the code of `kind`.
    pub fn error(kind: ErrorKind, location: Location, message: impl Into<String>) -> Self {
        Self::new(DiagLevel::Error, location, message).with_code(kind.code())
    }

    /// Attach a stable diagnostic code.
    pub fn with_code(mut self, code: DiagCode) -> Self {
        self.code = Some(code);
        self
    }

    /// Attach a remediation hint.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    /// Attach a related location.
    pub fn with_related(mut self, location: Location, label: impl Into<String>) -> Self {
        self.related.push(RelatedLocation {
            location,
            label: label.into(),
        });
        self
    }

    /// Attach a cause record to the chain.
    pub fn with_cause(mut self, message: impl Into<String>, location: Option<Location>) -> Self {
        self.cause_chain.push(CauseRecord {
            message: message.into(),
            location,
        });
        self
    }

    /// Categorical kind, if this diagnostic carries an error code.
    pub fn kind(&self) -> Option<ErrorKind> {
        self.code.and_then(ErrorKind::from_code)
    }

    pub fn is_error(&self) -> bool {
        self.level == DiagLevel::Error
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.level {
            DiagLevel::Error => "error",
            DiagLevel::Warning => "warning",
        };
        if let Some(code) = &self.code {
            write!(f, "{}[{}]: {}: {}", level, code, self.location, self.message)?;
        } else {
            write!(f, "{}: {}: {}", level, self.location, self.message)?;
        }
        for cause in &self.cause_chain {
            write!(f, "\n  because: {}", cause.message)?;
        }
        if let Some(hint) = &self.hint {
            write!(f, "\n  hint: {}", hint)?;
        }
        Ok(())
    }
}

pub fn has_errors(diags: &[Diagnostic]) -> bool {
    diags.iter().any(Diagnostic::is_error)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_without_code() {
        let d = Diagnostic::new(DiagLevel::Error, Location::patch(), "something failed");
        assert_eq!(format!("{d}"), "error: <patch>: something failed");
    }

    #[test]
    fn display_with_code_and_port() {
        let d = Diagnostic::new(
            DiagLevel::Warning,
            Location::port("osc", "phase"),
            "unused output",
        )
        .with_code(DiagCode("W0100"));
        assert_eq!(format!("{d}"), "warning[W0100]: osc.phase: unused output");
    }

    #[test]
    fn builder_chain() {
        let d = Diagnostic::error(ErrorKind::TypeMismatch, Location::block("add"), "mismatch")
            .with_hint("insert an adapter block")
            .with_related(Location::block("src"), "source block here")
            .with_cause("inferred vec2 from upstream", None);

        assert_eq!(d.code, Some(codes::E0100));
        assert_eq!(d.hint.as_deref(), Some("insert an adapter block"));
        assert_eq!(d.related.len(), 1);
        assert_eq!(d.cause_chain.len(), 1);
    }

    #[test]
    fn kind_round_trips_through_code() {
        let d = Diagnostic::error(
            ErrorKind::CycleWithoutStateBoundary,
            Location::patch(),
            "cycle",
        );
        assert_eq!(d.kind(), Some(ErrorKind::CycleWithoutStateBoundary));
        let internal = Diagnostic::new(DiagLevel::Error, Location::patch(), "x")
            .with_code(codes::E0602);
        assert_eq!(internal.kind(), Some(ErrorKind::InternalVerification));
    }
}
