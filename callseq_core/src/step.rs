use crate::inject::EdgeCase;
use crate::value::Value;
use rand_chacha::ChaCha8Rng;
use rand_core::{RngCore, SeedableRng};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which wrapped library an operation belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Library {
    Zlib,
    Json,
    File,
    Util,
}

/// Kind of a positional parameter. Drives argument coercion in the library
/// adapters and decides which edge cases may be injected at that position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    /// A fixture handle (may be null).
    Handle,
    /// A JSON node: a handle to a document or a json snapshot value.
    Node,
    /// Input bytes; text and buffer fixtures coerce.
    Bytes,
    /// A capacity or length.
    Size,
    /// An enum/flag constant (levels, flush modes, whence).
    Flag,
    Int,
    Float,
    Text,
    /// A filesystem path or a temp-file fixture handle.
    Path,
}

use ParamKind::*;

/// A library entry point a step may call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Operation {
    DeflateInit,
    Deflate,
    DeflateEnd,
    InflateInit,
    Inflate,
    InflateEnd,
    Compress,
    Uncompress,
    CompressBound,
    Crc32,
    Adler32,
    GzOpen,
    GzWrite,
    GzRead,
    GzSeek,
    GzTell,
    GzClose,
    JsonCreateObject,
    JsonCreateArray,
    JsonCreateString,
    JsonCreateNumber,
    JsonAddToObject,
    JsonAddToArray,
    JsonGetItem,
    JsonGetArrayItem,
    JsonArraySize,
    JsonDeleteItem,
    JsonDetachItem,
    JsonReplaceItem,
    JsonReplaceArrayItem,
    JsonPrint,
    JsonParse,
    JsonDuplicate,
    JsonCompare,
    JsonDelete,
    FileWrite,
    FileRead,
    FileSize,
    Memcmp,
    ProcessAbort,
}

impl Operation {
    fn signature(self) -> (&'static str, Library, &'static [ParamKind]) {
        match self {
            Operation::DeflateInit => ("deflate-init", Library::Zlib, &[Flag]),
            Operation::Deflate => ("deflate", Library::Zlib, &[Handle, Bytes, Size, Flag]),
            Operation::DeflateEnd => ("deflate-end", Library::Zlib, &[Handle]),
            Operation::InflateInit => ("inflate-init", Library::Zlib, &[]),
            Operation::Inflate => ("inflate", Library::Zlib, &[Handle, Bytes, Size, Flag]),
            Operation::InflateEnd => ("inflate-end", Library::Zlib, &[Handle]),
            Operation::Compress => ("compress", Library::Zlib, &[Bytes, Size, Flag]),
            Operation::Uncompress => ("uncompress", Library::Zlib, &[Bytes, Size]),
            Operation::CompressBound => ("compress-bound", Library::Zlib, &[Size]),
            Operation::Crc32 => ("crc32", Library::Zlib, &[Int, Bytes]),
            Operation::Adler32 => ("adler32", Library::Zlib, &[Int, Bytes]),
            Operation::GzOpen => ("gz-open", Library::Zlib, &[Path, Text]),
            Operation::GzWrite => ("gz-write", Library::Zlib, &[Handle, Bytes]),
            Operation::GzRead => ("gz-read", Library::Zlib, &[Handle, Size]),
            Operation::GzSeek => ("gz-seek", Library::Zlib, &[Handle, Int, Flag]),
            Operation::GzTell => ("gz-tell", Library::Zlib, &[Handle]),
            Operation::GzClose => ("gz-close", Library::Zlib, &[Handle]),
            Operation::JsonCreateObject => ("json-create-object", Library::Json, &[]),
            Operation::JsonCreateArray => ("json-create-array", Library::Json, &[]),
            Operation::JsonCreateString => ("json-create-string", Library::Json, &[Text]),
            Operation::JsonCreateNumber => ("json-create-number", Library::Json, &[Float]),
            Operation::JsonAddToObject => {
                ("json-add-to-object", Library::Json, &[Handle, Text, Handle])
            }
            Operation::JsonAddToArray => ("json-add-to-array", Library::Json, &[Handle, Handle]),
            Operation::JsonGetItem => ("json-get-item", Library::Json, &[Node, Text]),
            Operation::JsonGetArrayItem => ("json-get-array-item", Library::Json, &[Node, Int]),
            Operation::JsonArraySize => ("json-array-size", Library::Json, &[Node]),
            Operation::JsonDeleteItem => ("json-delete-item", Library::Json, &[Handle, Text]),
            Operation::JsonDetachItem => ("json-detach-item", Library::Json, &[Handle, Text]),
            Operation::JsonReplaceItem => {
                ("json-replace-item", Library::Json, &[Handle, Text, Handle])
            }
            Operation::JsonReplaceArrayItem => {
                ("json-replace-array-item", Library::Json, &[Handle, Int, Handle])
            }
            Operation::JsonPrint => ("json-print", Library::Json, &[Node, Flag]),
            Operation::JsonParse => ("json-parse", Library::Json, &[Text]),
            Operation::JsonDuplicate => ("json-duplicate", Library::Json, &[Node, Flag]),
            Operation::JsonCompare => ("json-compare", Library::Json, &[Node, Node]),
            Operation::JsonDelete => ("json-delete", Library::Json, &[Handle]),
            Operation::FileWrite => ("file-write", Library::File, &[Handle, Bytes]),
            Operation::FileRead => ("file-read", Library::File, &[Handle, Size]),
            Operation::FileSize => ("file-size", Library::File, &[Handle]),
            Operation::Memcmp => ("memcmp", Library::Util, &[Bytes, Bytes]),
            Operation::ProcessAbort => ("process-abort", Library::Util, &[]),
        }
    }

    pub fn name(self) -> &'static str {
        self.signature().0
    }

    pub fn library(self) -> Library {
        self.signature().1
    }

    pub fn params(self) -> &'static [ParamKind] {
        self.signature().2
    }

    /// Operations whose effects live in files shared with a forked child
    /// (descriptor offsets, file contents), and so may not run isolated.
    pub fn touches_files(self) -> bool {
        self.library() == Library::File
            || matches!(
                self,
                Operation::GzOpen
                    | Operation::GzWrite
                    | Operation::GzRead
                    | Operation::GzSeek
                    | Operation::GzTell
                    | Operation::GzClose
            )
    }

    /// Operations that end the calling process and so may only run isolated.
    pub fn terminates_process(self) -> bool {
        matches!(self, Operation::ProcessAbort)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Deterministic literal data, usable both as step arguments and as
/// temp-file contents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Payload {
    Text(String),
    Bytes(Vec<u8>),
    /// `len` copies of `byte`.
    Fill { byte: u8, len: usize },
    /// `len` pseudo-random bytes from a ChaCha8 stream seeded with `seed`.
    Seeded { seed: u64, len: usize },
}

impl Payload {
    pub fn materialize(&self) -> Vec<u8> {
        match self {
            Payload::Text(s) => s.as_bytes().to_vec(),
            Payload::Bytes(b) => b.clone(),
            Payload::Fill { byte, len } => vec![*byte; *len],
            Payload::Seeded { seed, len } => {
                let mut rng = ChaCha8Rng::seed_from_u64(*seed);
                let mut data = vec![0u8; *len];
                rng.fill_bytes(&mut data);
                data
            }
        }
    }
}

/// How a step argument is bound.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Arg {
    Null,
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    Fill { byte: u8, len: usize },
    Seeded { seed: u64, len: usize },
    /// Return value of an earlier step.
    Ref(usize),
    /// Out-parameter `k` of earlier step `n`.
    Out(usize, usize),
    /// A fixture declared by the case.
    Fixture(String),
}

impl Arg {
    /// The literal value of this argument, if it does not depend on run state.
    pub fn literal(&self) -> Option<Value> {
        match self {
            Arg::Null => Some(Value::Null),
            Arg::Int(i) => Some(Value::Int(*i)),
            Arg::Float(x) => Some(Value::Float(*x)),
            Arg::Text(s) => Some(Value::Text(s.clone())),
            Arg::Bytes(b) => Some(Value::Bytes(b.clone())),
            Arg::Fill { byte, len } => Some(Value::Bytes(
                Payload::Fill {
                    byte: *byte,
                    len: *len,
                }
                .materialize(),
            )),
            Arg::Seeded { seed, len } => Some(Value::Bytes(
                Payload::Seeded {
                    seed: *seed,
                    len: *len,
                }
                .materialize(),
            )),
            Arg::Ref(_) | Arg::Out(_, _) | Arg::Fixture(_) => None,
        }
    }

    /// Index of the step this argument reads from, if any.
    pub fn referenced_step(&self) -> Option<usize> {
        match self {
            Arg::Ref(n) | Arg::Out(n, _) => Some(*n),
            _ => None,
        }
    }
}

/// Post-condition predicate of a step.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Expect {
    /// No check; the call is made for coverage only.
    #[default]
    Any,
    Ok,
    Failed,
    Value(Value),
    NonNull,
    Null,
    ByteEquals(Vec<u8>),
    Len(usize),
    /// The isolated call must terminate its process.
    Crashed,
}

impl fmt::Display for Expect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expect::Any => write!(f, "anything"),
            Expect::Ok => write!(f, "success"),
            Expect::Failed => write!(f, "failure"),
            Expect::Value(v) => write!(f, "value {v}"),
            Expect::NonNull => write!(f, "non-null"),
            Expect::Null => write!(f, "null"),
            Expect::ByteEquals(b) => write!(f, "bytes equal to {}", Value::Bytes(b.clone())),
            Expect::Len(n) => write!(f, "length {n}"),
            Expect::Crashed => write!(f, "process termination"),
        }
    }
}

/// Overrides one argument of a step with a catalog edge value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct Injection {
    pub edge: EdgeCase,
    pub arg: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct Step {
    pub op: Operation,
    #[serde(default)]
    pub args: Vec<Arg>,
    #[serde(default)]
    pub expect: Expect,
    /// Evaluate `expect` on out-parameter `on` instead of the return value.
    #[serde(default)]
    pub on: Option<usize>,
    #[serde(default)]
    pub inject: Option<Injection>,
    /// Run the call in a child process.
    #[serde(default)]
    pub isolate: bool,
    #[serde(default)]
    pub label: Option<String>,
}

impl Step {
    pub fn new(op: Operation) -> Self {
        Self {
            op,
            args: Vec::new(),
            expect: Expect::Any,
            on: None,
            inject: None,
            isolate: false,
            label: None,
        }
    }

    pub fn arg(mut self, arg: Arg) -> Self {
        self.args.push(arg);
        self
    }

    pub fn args(mut self, args: impl IntoIterator<Item = Arg>) -> Self {
        self.args.extend(args);
        self
    }

    pub fn expect(mut self, expect: Expect) -> Self {
        self.expect = expect;
        self
    }

    pub fn on(mut self, out_index: usize) -> Self {
        self.on = Some(out_index);
        self
    }

    pub fn inject(mut self, edge: EdgeCase, arg: usize) -> Self {
        self.inject = Some(Injection { edge, arg });
        self
    }

    pub fn isolated(mut self) -> Self {
        self.isolate = true;
        self
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Label if set, otherwise the operation name.
    pub fn display_name(&self) -> &str {
        self.label.as_deref().unwrap_or(self.op.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operation_names_match_serde_names() {
        let ops = [
            Operation::DeflateInit,
            Operation::Crc32,
            Operation::GzOpen,
            Operation::JsonReplaceArrayItem,
            Operation::CompressBound,
            Operation::ProcessAbort,
        ];
        for op in ops {
            let serialized = serde_json::to_string(&op).unwrap();
            assert_eq!(
                serialized,
                format!("\"{}\"", op.name()),
                "serde name and display name of {op:?} must agree"
            );
        }
    }

    #[test]
    fn seeded_payloads_are_deterministic() {
        let a = Payload::Seeded { seed: 7, len: 64 }.materialize();
        let b = Payload::Seeded { seed: 7, len: 64 }.materialize();
        let c = Payload::Seeded { seed: 8, len: 64 }.materialize();
        assert_eq!(a.len(), 64);
        assert_eq!(a, b, "same seed must yield the same bytes");
        assert_ne!(a, c, "different seeds should yield different bytes");
    }

    #[test]
    fn fill_args_materialize_to_bytes() {
        let arg = Arg::Fill { byte: b'A', len: 4 };
        assert_eq!(arg.literal(), Some(Value::Bytes(b"AAAA".to_vec())));
        assert_eq!(Arg::Ref(2).literal(), None);
        assert_eq!(Arg::Out(3, 0).referenced_step(), Some(3));
    }

    #[test]
    fn builder_sets_every_field() {
        let step = Step::new(Operation::FileRead)
            .arg(Arg::Fixture("f".into()))
            .arg(Arg::Int(16))
            .expect(Expect::Value(Value::Int(0)))
            .inject(EdgeCase::ZeroLength, 1)
            .label("zero read");
        assert_eq!(step.args.len(), 2);
        assert_eq!(step.display_name(), "zero read");
        assert_eq!(
            step.inject,
            Some(Injection {
                edge: EdgeCase::ZeroLength,
                arg: 1
            })
        );
        assert!(!step.isolate);
        assert_eq!(Step::new(Operation::Memcmp).display_name(), "memcmp");
    }
}
