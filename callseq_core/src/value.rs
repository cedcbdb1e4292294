use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies a slot in a run's [`FixtureSet`](crate::fixture::FixtureSet).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HandleId(pub usize);

/// A value flowing between steps: literal arguments, return values and
/// out-parameters of library calls all share this representation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Value {
    Unit,
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    /// A library status code (zlib numbering, see [`crate::libs::zlib::ZStatus`]).
    Code(i64),
    Text(String),
    Bytes(Vec<u8>),
    Json(serde_json::Value),
    Handle(HandleId),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Whether the value reports success under the conventions of the wrapped
    /// libraries: non-negative codes and counts, `true`, any non-null pointer.
    pub fn is_ok(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Code(c) | Value::Int(c) => *c >= 0,
            _ => true,
        }
    }

    /// Byte view used by length and byte-equality predicates.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b.as_slice()),
            Value::Text(s) => Some(s.as_bytes()),
            _ => None,
        }
    }

    pub fn as_handle(&self) -> Option<HandleId> {
        match self {
            Value::Handle(id) => Some(*id),
            _ => None,
        }
    }

    /// Replaces handles with `Null`. Handles minted in a child process have no
    /// meaning in the parent's fixture arena.
    pub fn without_handles(self) -> Self {
        match self {
            Value::Handle(_) => Value::Null,
            other => other,
        }
    }
}

const BYTES_PREVIEW: usize = 16;

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Unit => write!(f, "()"),
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Code(c) => write!(f, "code({c})"),
            Value::Text(s) => write!(f, "{s:?}"),
            Value::Bytes(b) => {
                write!(f, "bytes[{}]", b.len())?;
                if !b.is_empty() {
                    write!(f, " ")?;
                    for byte in b.iter().take(BYTES_PREVIEW) {
                        write!(f, "{byte:02x}")?;
                    }
                    if b.len() > BYTES_PREVIEW {
                        write!(f, "..")?;
                    }
                }
                Ok(())
            }
            Value::Json(v) => write!(f, "json({v})"),
            Value::Handle(id) => write!(f, "handle#{}", id.0),
        }
    }
}

/// Everything a single library call produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reply {
    pub ret: Value,
    #[serde(default)]
    pub out: Vec<Value>,
}

impl Reply {
    pub fn ret(ret: Value) -> Self {
        Self {
            ret,
            out: Vec::new(),
        }
    }

    pub fn with_out(ret: Value, out: Vec<Value>) -> Self {
        Self { ret, out }
    }

    pub fn unit() -> Self {
        Self::ret(Value::Unit)
    }

    pub fn without_handles(self) -> Self {
        Self {
            ret: self.ret.without_handles(),
            out: self.out.into_iter().map(Value::without_handles).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ok_follows_library_conventions() {
        assert!(Value::Code(0).is_ok(), "Z_OK is success");
        assert!(Value::Code(1).is_ok(), "Z_STREAM_END is success");
        assert!(!Value::Code(-5).is_ok(), "Z_BUF_ERROR is failure");
        assert!(!Value::Int(-1).is_ok(), "-1 counts signal errors");
        assert!(Value::Int(0).is_ok(), "a zero count is not an error");
        assert!(!Value::Null.is_ok(), "null pointers are failures");
        assert!(Value::Handle(HandleId(3)).is_ok());
        assert!(!Value::Bool(false).is_ok());
    }

    #[test]
    fn display_truncates_long_byte_buffers() {
        let shown = Value::Bytes(vec![0xAB; 40]).to_string();
        assert!(shown.starts_with("bytes[40] abab"), "got {shown}");
        assert!(shown.ends_with(".."), "long buffers are elided: {shown}");
        assert_eq!(Value::Bytes(Vec::new()).to_string(), "bytes[0]");
    }

    #[test]
    fn child_replies_drop_handles() {
        let reply = Reply::with_out(Value::Handle(HandleId(1)), vec![Value::Int(4)]);
        let detached = reply.without_handles();
        assert_eq!(detached.ret, Value::Null);
        assert_eq!(detached.out, vec![Value::Int(4)]);
    }
}
