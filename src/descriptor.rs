//! Function and type descriptors supplied by the host
//!
//! A `TypeDescriptor` names a type and its indirection level: 1 is a value
//! type, anything above 1 is a pointer to that type.

use crate::errors::{FfiError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Named type at a given indirection level
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TypeDescriptor {
    pub name: String,
    pub indirection: u32,
}

impl TypeDescriptor {
    pub fn new(name: impl Into<String>, indirection: u32) -> Self {
        Self {
            name: name.into(),
            indirection,
        }
    }

    /// Value type (indirection 1)
    pub fn value(name: impl Into<String>) -> Self {
        Self::new(name, 1)
    }

    /// Parse an ffi-style spelling: each trailing `*` adds one level
    ///
    /// `"int"` is `int/1`, `"char*"` is `char/2`, `"void**"` is `void/3`.
    pub fn parse(text: &str) -> Result<Self> {
        let trimmed = text.trim();
        let name = trimmed.trim_end_matches(|c: char| c == '*' || c.is_whitespace());
        let stars = trimmed[name.len()..].chars().filter(|&c| c == '*').count();

        if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(FfiError::InvalidTypeDescriptor(text.to_string()));
        }

        Ok(Self::new(name, 1 + stars as u32))
    }

    #[inline]
    pub fn is_pointer(&self) -> bool {
        self.indirection > 1
    }

    #[inline]
    pub fn is_void(&self) -> bool {
        self.indirection == 1 && self.name == "void"
    }
}

impl fmt::Display for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        for _ in 1..self.indirection {
            write!(f, "*")?;
        }
        Ok(())
    }
}

impl FromStr for TypeDescriptor {
    type Err = FfiError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// How a function is executed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallMode {
    /// Blocking, on the calling thread, under the library lock
    #[default]
    Sync,
    /// Deferred to the library's background loop
    Async,
}

impl CallMode {
    /// Map the host's raw mode flag (1 = sync, 2 = async)
    pub fn from_raw(raw: u32) -> Result<Self> {
        match raw {
            1 => Ok(Self::Sync),
            2 => Ok(Self::Async),
            other => Err(FfiError::UnsupportedCallMode(other)),
        }
    }

    pub const fn as_raw(self) -> u32 {
        match self {
            Self::Sync => 1,
            Self::Async => 2,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sync => "sync",
            Self::Async => "async",
        }
    }
}

impl FromStr for CallMode {
    type Err = FfiError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "sync" => Ok(Self::Sync),
            "async" => Ok(Self::Async),
            other => Err(FfiError::Config(format!("unknown call mode '{}'", other))),
        }
    }
}

/// Everything needed to build a call plan for one native function
#[derive(Debug, Clone)]
pub struct FunctionDescriptor {
    pub name: String,
    pub args: Vec<TypeDescriptor>,
    pub result: TypeDescriptor,
    pub mode: CallMode,
    /// Resolved native entry point
    pub entry: usize,
}

impl FunctionDescriptor {
    pub fn new(
        name: impl Into<String>,
        entry: usize,
        result: TypeDescriptor,
        args: Vec<TypeDescriptor>,
        mode: CallMode,
    ) -> Self {
        Self {
            name: name.into(),
            args,
            result,
            mode,
            entry,
        }
    }

    /// Build from ffi-style type strings, e.g. `("int", &["int", "int"])`
    pub fn parse(
        name: impl Into<String>,
        entry: usize,
        result: &str,
        args: &[&str],
        mode: CallMode,
    ) -> Result<Self> {
        let args = args
            .iter()
            .map(|a| TypeDescriptor::parse(a))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::new(name, entry, TypeDescriptor::parse(result)?, args, mode))
    }

    /// Same function, other mode
    pub fn with_mode(&self, mode: CallMode) -> Self {
        Self {
            mode,
            ..self.clone()
        }
    }
}

/// Pointee-type lookup service
///
/// Given a pointer type, returns the type one indirection level shallower.
/// Consulted once per pointer-typed result when a plan is built.
pub trait PointeeLookup: Send + Sync {
    fn deref_type(&self, ty: &TypeDescriptor) -> Result<TypeDescriptor>;
}

/// Default lookup: same name, one level shallower
#[derive(Debug, Default, Clone, Copy)]
pub struct IndirectionLookup;

impl PointeeLookup for IndirectionLookup {
    fn deref_type(&self, ty: &TypeDescriptor) -> Result<TypeDescriptor> {
        if ty.indirection < 2 {
            return Err(FfiError::PointeeLookup {
                name: ty.to_string(),
                reason: "not a pointer type".into(),
            });
        }
        Ok(TypeDescriptor::new(ty.name.clone(), ty.indirection - 1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_spellings() {
        assert_eq!(TypeDescriptor::parse("int").unwrap(), TypeDescriptor::new("int", 1));
        assert_eq!(TypeDescriptor::parse("char*").unwrap(), TypeDescriptor::new("char", 2));
        assert_eq!(TypeDescriptor::parse("void **").unwrap(), TypeDescriptor::new("void", 3));
        assert_eq!(TypeDescriptor::parse(" size_t ").unwrap(), TypeDescriptor::value("size_t"));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(TypeDescriptor::parse("").is_err());
        assert!(TypeDescriptor::parse("*").is_err());
        assert!(TypeDescriptor::parse("in*t").is_err());
    }

    #[test]
    fn test_display_round_trip() {
        let ty = TypeDescriptor::new("double", 3);
        assert_eq!(ty.to_string(), "double**");
        assert_eq!(ty.to_string().parse::<TypeDescriptor>().unwrap(), ty);
    }

    #[test]
    fn test_call_mode_raw() {
        assert_eq!(CallMode::from_raw(1).unwrap(), CallMode::Sync);
        assert_eq!(CallMode::from_raw(2).unwrap(), CallMode::Async);
        assert!(matches!(CallMode::from_raw(3), Err(FfiError::UnsupportedCallMode(3))));
        assert_eq!(CallMode::Async.as_raw(), 2);
        assert_eq!("ASYNC".parse::<CallMode>().unwrap(), CallMode::Async);
    }

    #[test]
    fn test_indirection_lookup() {
        let lookup = IndirectionLookup;
        let pointee = lookup.deref_type(&TypeDescriptor::new("int", 3)).unwrap();
        assert_eq!(pointee, TypeDescriptor::new("int", 2));
        assert!(lookup.deref_type(&TypeDescriptor::value("int")).is_err());
    }

    #[test]
    fn test_function_descriptor_parse() {
        let desc =
            FunctionDescriptor::parse("mul", 0x1000, "int", &["int", "int*"], CallMode::Sync).unwrap();
        assert_eq!(desc.args.len(), 2);
        assert!(desc.args[1].is_pointer());
        assert_eq!(desc.with_mode(CallMode::Async).mode, CallMode::Async);
    }
}
