//! Built-in harness cases. Each one is a self-contained scenario in the style
//! of a hand-written library harness: set up state, call a fixed sequence of
//! entry points, check what came back.

use crate::case::{CaseError, FatalPolicy, HarnessCase, ValidatorMode, Verdict};
use crate::fixture::FixtureKind;
use crate::inject::EdgeCase;
use crate::step::{Arg, Expect, Operation, Payload, Step};
use crate::value::Value;
use serde_json::json;

fn call(op: Operation, args: impl IntoIterator<Item = Arg>) -> Step {
    Step::new(op).args(args)
}

fn fixture(name: &str) -> Arg {
    Arg::Fixture(name.to_string())
}

fn text(s: &str) -> Arg {
    Arg::Text(s.to_string())
}

fn int(v: i64) -> Expect {
    Expect::Value(Value::Int(v))
}

fn code(c: i64) -> Expect {
    Expect::Value(Value::Code(c))
}

fn boolean(b: bool) -> Expect {
    Expect::Value(Value::Bool(b))
}

fn deflate_inflate_roundtrip() -> Result<HarnessCase, CaseError> {
    HarnessCase::builder("deflate-inflate-roundtrip")
        .fixture("z", FixtureKind::Deflate { level: 6 })
        .fixture("inf", FixtureKind::Inflate)
        .step(
            call(
                Operation::Deflate,
                [fixture("z"), Arg::Fill { byte: b'A', len: 128 }, Arg::Int(256), Arg::Int(4)],
            )
            .expect(code(1)),
        )
        .step(
            call(
                Operation::Inflate,
                [fixture("inf"), Arg::Out(0, 0), Arg::Int(256), Arg::Int(4)],
            )
            .expect(code(1)),
        )
        .step(
            call(Operation::Memcmp, [Arg::Out(1, 0), Arg::Fill { byte: b'A', len: 128 }])
                .expect(int(0)),
        )
        .step(call(Operation::DeflateEnd, [fixture("z")]).expect(code(0)))
        .step(call(Operation::InflateEnd, [fixture("inf")]).expect(code(0)))
        .build()
}

fn streaming_in_chunks() -> Result<HarnessCase, CaseError> {
    let first = Arg::Fill { byte: b'A', len: 1024 };
    let second = Arg::Fill { byte: b'B', len: 512 };
    HarnessCase::builder("deflate-streaming-chunks")
        .fixture("z", FixtureKind::Deflate { level: 1 })
        .fixture("inf", FixtureKind::Inflate)
        .step(
            call(Operation::Deflate, [fixture("z"), first.clone(), Arg::Int(4096), Arg::Int(2)])
                .expect(code(0))
                .label("sync flush"),
        )
        .step(call(Operation::Deflate, [fixture("z"), second.clone(), Arg::Int(4096), Arg::Int(4)]).expect(code(1)))
        .step(call(Operation::Inflate, [fixture("inf"), Arg::Out(0, 0), Arg::Int(4096), Arg::Int(2)]).expect(code(0)))
        .step(call(Operation::Inflate, [fixture("inf"), Arg::Out(1, 0), Arg::Int(4096), Arg::Int(0)]).expect(code(1)))
        .step(call(Operation::Memcmp, [Arg::Out(2, 0), first]).expect(int(0)))
        .step(call(Operation::Memcmp, [Arg::Out(3, 0), second]).expect(int(0)))
        .validation(ValidatorMode::NonTerminating)
        .build()
}

fn compress_uncompress() -> Result<HarnessCase, CaseError> {
    let payload = Arg::Seeded { seed: 7, len: 4096 };
    HarnessCase::builder("compress-uncompress-seeded")
        .step(call(Operation::CompressBound, [Arg::Int(4096)]).expect(int(4096 + 1 + 13)))
        .step(call(Operation::Compress, [payload.clone(), Arg::Int(8192), Arg::Int(9)]).expect(code(0)))
        .step(call(Operation::Uncompress, [Arg::Out(1, 0), Arg::Int(8192)]).expect(code(0)))
        .step(call(Operation::Memcmp, [Arg::Out(2, 0), payload]).expect(int(0)))
        .step(
            call(Operation::Uncompress, [Arg::Out(1, 0), Arg::Int(4096)])
                .inject(EdgeCase::MinimumCapacity, 1)
                .expect(code(-5))
                .label("uncompress into one byte"),
        )
        .step(
            call(Operation::Uncompress, [Arg::Seeded { seed: 8, len: 64 }, Arg::Int(4096)])
                .expect(code(-3))
                .label("uncompress garbage"),
        )
        .validation(ValidatorMode::NonTerminating)
        .build()
}

fn deflate_edges() -> Result<HarnessCase, CaseError> {
    HarnessCase::builder("deflate-edge-cases")
        .validation(ValidatorMode::NonTerminating)
        .fixture("z", FixtureKind::Deflate { level: -1 })
        .step(
            call(Operation::Deflate, [fixture("z"), text("data"), Arg::Int(64), Arg::Int(4)])
                .inject(EdgeCase::ZeroLength, 2)
                .expect(code(-5)),
        )
        .step(
            call(Operation::Deflate, [fixture("z"), text("data"), Arg::Int(64), Arg::Int(4)])
                .inject(EdgeCase::OutOfRangeFlag, 3)
                .expect(code(-2)),
        )
        .step(
            call(Operation::Deflate, [fixture("z"), text("data"), Arg::Int(64), Arg::Int(4)])
                .inject(EdgeCase::NullPointer, 0)
                .expect(code(-2)),
        )
        .step(
            call(Operation::DeflateInit, [Arg::Int(6)])
                .inject(EdgeCase::OutOfRangeFlag, 0)
                .expect(code(-2)),
        )
        .step(
            call(Operation::Deflate, [fixture("z"), text("data"), Arg::Int(64), Arg::Int(4)])
                .inject(EdgeCase::NullPointer, 1)
                .expect(Expect::Ok)
                .label("null input with finish"),
        )
        .build()
}

fn mismatched_end() -> Result<HarnessCase, CaseError> {
    HarnessCase::builder("mismatched-stream-end")
        .fixture("z", FixtureKind::Deflate { level: 6 })
        .fixture("inf", FixtureKind::Inflate)
        .step(
            call(Operation::DeflateEnd, [fixture("z")])
                .inject(EdgeCase::MismatchedHandle("inf".into()), 0)
                .expect(code(-2)),
        )
        .step(call(Operation::InflateEnd, [fixture("inf")]).expect(code(0)))
        .step(call(Operation::InflateEnd, [fixture("inf")]).expect(code(-2)).label("end twice"))
        .step(call(Operation::DeflateEnd, [fixture("z")]).expect(code(0)))
        .build()
}

fn gz_roundtrip() -> Result<HarnessCase, CaseError> {
    HarnessCase::builder("gz-file-roundtrip")
        .fixture("gz", FixtureKind::TempFile { contents: None })
        .capture("gz")
        .step(call(Operation::GzOpen, [fixture("gz"), text("wb9")]).expect(Expect::NonNull))
        .step(call(Operation::GzWrite, [Arg::Ref(0), text("hello, gzip world")]).expect(int(17)))
        .step(call(Operation::GzTell, [Arg::Ref(0)]).expect(int(17)))
        .step(call(Operation::GzClose, [Arg::Ref(0)]).expect(code(0)))
        .step(call(Operation::GzOpen, [fixture("gz"), text("rb")]).expect(Expect::NonNull))
        .step(call(Operation::GzSeek, [Arg::Ref(4), Arg::Int(7), Arg::Int(0)]).expect(int(7)))
        .step(
            call(Operation::GzRead, [Arg::Ref(4), Arg::Int(64)])
                .expect(Expect::ByteEquals(b"gzip world".to_vec()))
                .on(0),
        )
        .step(call(Operation::GzTell, [Arg::Ref(4)]).expect(int(17)))
        .step(call(Operation::GzSeek, [Arg::Ref(4), Arg::Int(-17), Arg::Int(1)]).expect(int(0)))
        .step(call(Operation::GzRead, [Arg::Ref(4), Arg::Int(5)]).expect(Expect::Len(5)).on(0))
        .step(call(Operation::GzClose, [Arg::Ref(4)]).expect(code(0)))
        .build()
}

fn gz_edges() -> Result<HarnessCase, CaseError> {
    HarnessCase::builder("gz-edge-cases")
        .validation(ValidatorMode::NonTerminating)
        .fixture("plain", FixtureKind::TempFile { contents: None })
        .step(call(Operation::GzOpen, [fixture("plain"), text("rb")]).expect(Expect::NonNull))
        .step(
            call(Operation::GzRead, [Arg::Ref(0), Arg::Int(32)])
                .inject(EdgeCase::ZeroLength, 1)
                .expect(int(0)),
        )
        .step(call(Operation::GzWrite, [Arg::Ref(0), text("x")]).expect(int(0)).label("write to read handle"))
        .step(
            call(Operation::GzSeek, [Arg::Ref(0), Arg::Int(0), Arg::Int(0)])
                .inject(EdgeCase::OutOfRangeFlag, 2)
                .expect(int(-1)),
        )
        .step(
            call(Operation::GzOpen, [fixture("plain"), text("rb")])
                .inject(EdgeCase::NullPointer, 0)
                .expect(Expect::Null),
        )
        .step(
            call(Operation::GzOpen, [fixture("plain"), text("rb")])
                .inject(EdgeCase::ZeroLength, 1)
                .expect(Expect::Null)
                .label("empty mode"),
        )
        .step(call(Operation::GzClose, [Arg::Ref(0)]).expect(code(0)))
        .step(call(Operation::GzClose, [Arg::Ref(0)]).expect(code(-2)).label("close twice"))
        .build()
}

fn json_roundtrip() -> Result<HarnessCase, CaseError> {
    HarnessCase::builder("json-build-print-parse")
        .step(Step::new(Operation::JsonCreateObject).expect(Expect::NonNull))
        .step(call(Operation::JsonCreateString, [text("callseq")]).expect(Expect::NonNull))
        .step(call(Operation::JsonAddToObject, [Arg::Ref(0), text("name"), Arg::Ref(1)]).expect(boolean(true)))
        .step(call(Operation::JsonCreateNumber, [Arg::Float(42.0)]).expect(Expect::NonNull))
        .step(call(Operation::JsonAddToObject, [Arg::Ref(0), text("answer"), Arg::Ref(3)]).expect(boolean(true)))
        .step(
            call(Operation::JsonPrint, [Arg::Ref(0), Arg::Int(0)])
                .expect(Expect::Value(Value::Text(r#"{"name":"callseq","answer":42}"#.into()))),
        )
        .step(call(Operation::JsonParse, [Arg::Ref(5)]).expect(Expect::NonNull))
        .step(call(Operation::JsonCompare, [Arg::Ref(0), Arg::Ref(6)]).expect(boolean(true)))
        .step(call(Operation::JsonArraySize, [Arg::Ref(6)]).expect(int(2)))
        .step(
            call(Operation::JsonGetItem, [Arg::Ref(6), text("answer")])
                .expect(Expect::Value(Value::Json(json!(42)))),
        )
        .step(call(Operation::JsonDelete, [Arg::Ref(6)]).expect(boolean(true)))
        .step(call(Operation::JsonDelete, [Arg::Ref(0)]).expect(boolean(true)))
        .build()
}

fn json_replace_negative_index() -> Result<HarnessCase, CaseError> {
    HarnessCase::builder("json-replace-array-item-negative-index")
        .validation(ValidatorMode::NonTerminating)
        .fixture("doc", FixtureKind::JsonDoc { text: "[1,2,3]".into() })
        .step(call(Operation::JsonCreateNumber, [Arg::Float(9.0)]).expect(Expect::NonNull))
        .step(
            call(Operation::JsonReplaceArrayItem, [fixture("doc"), Arg::Int(-1), Arg::Ref(0)])
                .expect(boolean(false)),
        )
        .step(call(Operation::JsonArraySize, [fixture("doc")]).expect(int(3)))
        .step(
            call(Operation::JsonGetArrayItem, [fixture("doc"), Arg::Int(0)])
                .expect(Expect::Value(Value::Json(json!(1)))),
        )
        .step(
            call(Operation::JsonReplaceArrayItem, [fixture("doc"), Arg::Int(0), Arg::Ref(0)])
                .expect(boolean(true)),
        )
        .step(
            call(Operation::JsonPrint, [fixture("doc"), Arg::Int(0)])
                .expect(Expect::Value(Value::Text("[9,2,3]".into()))),
        )
        .build()
}

fn json_detach_duplicate() -> Result<HarnessCase, CaseError> {
    HarnessCase::builder("json-detach-duplicate")
        .fixture("doc", FixtureKind::JsonDoc { text: r#"{"a":{"b":1},"c":[1,2]}"#.into() })
        .step(call(Operation::JsonDetachItem, [fixture("doc"), text("a")]).expect(Expect::NonNull))
        .step(
            call(Operation::JsonPrint, [Arg::Ref(0), Arg::Int(0)])
                .expect(Expect::Value(Value::Text(r#"{"b":1}"#.into()))),
        )
        .step(call(Operation::JsonDuplicate, [fixture("doc"), Arg::Int(0)]).expect(Expect::NonNull))
        .step(call(Operation::JsonArraySize, [Arg::Ref(2)]).expect(int(0)).label("shallow copy is empty"))
        .step(call(Operation::JsonDuplicate, [fixture("doc"), Arg::Int(1)]).expect(Expect::NonNull))
        .step(call(Operation::JsonCompare, [fixture("doc"), Arg::Ref(4)]).expect(boolean(true)))
        .step(call(Operation::JsonDeleteItem, [fixture("doc"), text("c")]).expect(boolean(true)))
        .step(call(Operation::JsonArraySize, [fixture("doc")]).expect(int(0)))
        .step(call(Operation::JsonGetItem, [fixture("doc"), text("c")]).expect(Expect::Null))
        .build()
}

fn empty_file_read() -> Result<HarnessCase, CaseError> {
    HarnessCase::builder("empty-file-zero-length-read")
        .fixture("f", FixtureKind::TempFile { contents: None })
        .step(
            call(Operation::FileRead, [fixture("f"), Arg::Int(16)])
                .inject(EdgeCase::ZeroLength, 1)
                .expect(int(0)),
        )
        .step(call(Operation::FileSize, [fixture("f")]).expect(int(0)))
        .build()
}

fn file_seeded_contents() -> Result<HarnessCase, CaseError> {
    HarnessCase::builder("file-seeded-contents")
        .fixture(
            "f",
            FixtureKind::TempFile {
                contents: Some(Payload::Fill { byte: 0x5a, len: 100 }),
            },
        )
        .capture("f")
        .step(call(Operation::FileRead, [fixture("f"), Arg::Int(60)]).expect(int(60)))
        .step(call(Operation::FileRead, [fixture("f"), Arg::Int(60)]).expect(int(40)))
        .step(call(Operation::FileWrite, [fixture("f"), text("tail")]).expect(int(4)))
        .step(call(Operation::FileSize, [fixture("f")]).expect(int(104)))
        .step(call(Operation::Crc32, [Arg::Int(0), Arg::Out(0, 0)]).expect(Expect::Ok))
        .build()
}

fn known_checksums() -> Result<HarnessCase, CaseError> {
    HarnessCase::builder("known-checksums")
        .validation(ValidatorMode::NonTerminating)
        .step(call(Operation::Crc32, [Arg::Int(0), text("123456789")]).expect(int(0xCBF4_3926)))
        .step(call(Operation::Adler32, [Arg::Int(1), text("Wikipedia")]).expect(int(0x11E6_0398)))
        .step(
            call(Operation::Crc32, [Arg::Int(0x55), text("x")])
                .inject(EdgeCase::NullPointer, 1)
                .expect(int(0)),
        )
        .step(
            call(Operation::Adler32, [Arg::Int(0x55), text("x")])
                .inject(EdgeCase::NullPointer, 1)
                .expect(int(1)),
        )
        .step(
            call(Operation::Crc32, [Arg::Int(0x55), text("x")])
                .inject(EdgeCase::ZeroLength, 1)
                .expect(int(0x55))
                .label("empty buffer keeps the running crc"),
        )
        .build()
}

fn checksum_mismatch() -> Result<HarnessCase, CaseError> {
    HarnessCase::builder("checksum-mismatch-detected")
        .validation(ValidatorMode::NonTerminating)
        .expect_verdict(Verdict::Failed)
        .step(call(Operation::Crc32, [Arg::Int(0), text("123456789")]).expect(int(0xDEAD_BEEF)))
        .step(call(Operation::Adler32, [Arg::Int(1), text("Wikipedia")]).expect(int(0x11E6_0398)))
        .step(call(Operation::Memcmp, [text("abc"), text("abc")]).expect(int(0)))
        .build()
}

#[cfg(unix)]
fn isolated_abort() -> Result<HarnessCase, CaseError> {
    HarnessCase::builder("isolated-process-abort")
        .step(Step::new(Operation::ProcessAbort).isolated().expect(Expect::Crashed))
        .step(
            call(Operation::Crc32, [Arg::Int(0), text("123456789")])
                .isolated()
                .expect(int(0xCBF4_3926))
                .label("isolated call returns its value"),
        )
        .step(call(Operation::CompressBound, [Arg::Int(0)]).expect(int(13)))
        .build()
}

/// Seed style: every call is made, nothing but fatal errors stops the run.
fn seeded_sequence() -> Result<HarnessCase, CaseError> {
    HarnessCase::builder("seeded-call-sequence")
        .on_fatal(FatalPolicy::Continue)
        .fixture("inf", FixtureKind::Inflate)
        .fixture("buf", FixtureKind::Buffer { len: 32 })
        .step(call(Operation::Inflate, [fixture("inf"), Arg::Seeded { seed: 1, len: 256 }, Arg::Int(512), Arg::Int(0)]))
        .step(call(Operation::Uncompress, [Arg::Seeded { seed: 2, len: 256 }, Arg::Int(512)]))
        .step(call(Operation::JsonParse, [Arg::Seeded { seed: 3, len: 64 }]))
        .step(call(Operation::JsonPrint, [Arg::Ref(2), Arg::Int(1)]))
        .step(call(Operation::Crc32, [Arg::Int(0), fixture("buf")]))
        .step(call(Operation::Adler32, [Arg::Ref(4), Arg::Seeded { seed: 4, len: 1024 }]))
        .step(call(Operation::Compress, [fixture("buf"), Arg::Int(64), Arg::Int(0)]))
        .step(call(Operation::InflateEnd, [fixture("inf")]))
        .build()
}

/// Every built-in case, in a fixed order.
pub fn builtin_cases() -> Result<Vec<HarnessCase>, CaseError> {
    let mut cases = vec![
        deflate_inflate_roundtrip()?,
        streaming_in_chunks()?,
        compress_uncompress()?,
        deflate_edges()?,
        mismatched_end()?,
        gz_roundtrip()?,
        gz_edges()?,
        json_roundtrip()?,
        json_replace_negative_index()?,
        json_detach_duplicate()?,
        empty_file_read()?,
        file_seeded_contents()?,
        known_checksums()?,
        checksum_mismatch()?,
    ];
    #[cfg(unix)]
    cases.push(isolated_abort()?);
    cases.push(seeded_sequence()?);
    Ok(cases)
}
