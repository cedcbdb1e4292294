use super::{buffer, bytes, handle, int, size, text};
use crate::fixture::{Fixture, FixtureSet};
use crate::step::Operation;
use crate::value::{Reply, Value};
use flate2::read::GzDecoder;
use flate2::write::{GzEncoder, ZlibEncoder};
use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress, Status};
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Component, PathBuf};

/// Return codes, numbered as zlib numbers them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZStatus {
    Ok = 0,
    StreamEnd = 1,
    NeedDict = 2,
    Errno = -1,
    StreamError = -2,
    DataError = -3,
    MemError = -4,
    BufError = -5,
}

impl ZStatus {
    pub fn code(self) -> i64 {
        self as i64
    }

    pub fn value(self) -> Value {
        Value::Code(self.code())
    }

    /// Codes after which a strict harness should stop: the library could not
    /// allocate and later calls are meaningless.
    pub fn is_fatal_code(code: i64) -> bool {
        code == ZStatus::MemError.code()
    }
}

/// A gz file opened for writing.
pub struct GzWriter {
    encoder: GzEncoder<File>,
    pos: u64,
}

impl GzWriter {
    /// Writes the gzip trailer and closes the file.
    pub fn finish(self) -> io::Result<()> {
        self.encoder.finish().map(|_| ())
    }
}

/// A gz file opened for reading. Keeps its path so a backwards seek can
/// restart decompression from the beginning.
pub struct GzReader {
    decoder: GzDecoder<File>,
    path: PathBuf,
    pos: u64,
}

impl GzReader {
    fn open(path: PathBuf) -> io::Result<Self> {
        let file = File::open(&path)?;
        Ok(Self {
            decoder: GzDecoder::new(file),
            path,
            pos: 0,
        })
    }

    fn rewind(&mut self) -> io::Result<()> {
        self.decoder = GzDecoder::new(File::open(&self.path)?);
        self.pos = 0;
        Ok(())
    }
}

/// Maps a zlib level (-1 for the default, 0..=9) to a compression setting.
pub fn compression_level(level: i64) -> Option<Compression> {
    match level {
        -1 => Some(Compression::default()),
        0..=9 => Some(Compression::new(level as u32)),
        _ => None,
    }
}

pub fn deflate_stream(level: i64) -> Option<Compress> {
    compression_level(level).map(|c| Compress::new(c, true))
}

pub fn inflate_stream() -> Decompress {
    Decompress::new(true)
}

fn compress_flush(flag: i64) -> Option<FlushCompress> {
    match flag {
        0 => Some(FlushCompress::None),
        1 => Some(FlushCompress::Partial),
        2 => Some(FlushCompress::Sync),
        3 => Some(FlushCompress::Full),
        4 => Some(FlushCompress::Finish),
        _ => None,
    }
}

fn decompress_flush(flag: i64) -> Option<FlushDecompress> {
    match flag {
        0 | 1 | 3 | 5 => Some(FlushDecompress::None),
        2 => Some(FlushDecompress::Sync),
        4 => Some(FlushDecompress::Finish),
        _ => None,
    }
}

/// Reply shape of `deflate`/`inflate`: code plus produced bytes and consumed count.
fn stream_reply(status: ZStatus, produced: Vec<u8>, consumed: u64) -> Reply {
    Reply::with_out(
        status.value(),
        vec![Value::Bytes(produced), Value::Int(consumed as i64)],
    )
}

fn stream_failure(status: ZStatus) -> Reply {
    stream_reply(status, Vec::new(), 0)
}

fn code_with_bytes(status: ZStatus, data: Vec<u8>) -> Reply {
    Reply::with_out(status.value(), vec![Value::Bytes(data)])
}

fn gz_open(path: PathBuf, mode: &str) -> Option<Fixture> {
    let level = mode
        .chars()
        .find_map(|c| c.to_digit(10))
        .map(Compression::new)
        .unwrap_or_default();

    if mode.contains('r') {
        GzReader::open(path).ok().map(Fixture::GzReader)
    } else if mode.contains('w') {
        let file = File::create(path).ok()?;
        Some(Fixture::GzWriter(GzWriter {
            encoder: GzEncoder::new(file, level),
            pos: 0,
        }))
    } else if mode.contains('a') {
        let file = OpenOptions::new()
            .append(true)
            .create(true)
            .open(path)
            .ok()?;
        Some(Fixture::GzWriter(GzWriter {
            encoder: GzEncoder::new(file, level),
            pos: 0,
        }))
    } else {
        None
    }
}

/// Text paths name files of the current run: relative paths resolve inside the
/// run's temporary directory and may not climb out of it. Absolute paths are
/// taken as given and stay the caller's to clean up.
fn run_path(fixtures: &FixtureSet, path: &str) -> Option<PathBuf> {
    let path = PathBuf::from(path);
    if path.is_absolute() {
        return Some(path);
    }
    if path.components().any(|c| matches!(c, Component::ParentDir)) {
        return None;
    }
    fixtures.temp_dir().map(|dir| dir.join(path))
}

fn end_stream(fixtures: &mut FixtureSet, args: &[Value], inflate: bool) -> Reply {
    let Some(id) = handle(args, 0) else {
        return Reply::ret(ZStatus::StreamError.value());
    };
    let matches_kind = match fixtures.get(id) {
        Some(Fixture::Deflate(_)) => !inflate,
        Some(Fixture::Inflate(_)) => inflate,
        _ => false,
    };
    // A mismatched end call leaves the stream untouched for teardown.
    if !matches_kind {
        return Reply::ret(ZStatus::StreamError.value());
    }
    match fixtures.release(id) {
        Ok(_) => Reply::ret(ZStatus::Ok.value()),
        Err(_) => Reply::ret(ZStatus::Errno.value()),
    }
}

pub fn invoke(op: Operation, args: &[Value], fixtures: &mut FixtureSet) -> Reply {
    match op {
        Operation::DeflateInit => match deflate_stream(int(args, 0)) {
            Some(stream) => Reply::ret(Value::Handle(
                fixtures.acquire_anonymous(op.name(), Fixture::Deflate(stream)),
            )),
            None => Reply::ret(ZStatus::StreamError.value()),
        },
        Operation::InflateInit => Reply::ret(Value::Handle(
            fixtures.acquire_anonymous(op.name(), Fixture::Inflate(inflate_stream())),
        )),
        Operation::Deflate => {
            let input = bytes(args, 1, fixtures);
            let capacity = size(args, 2);
            let Some(flush) = compress_flush(int(args, 3)) else {
                return stream_failure(ZStatus::StreamError);
            };
            let Some(Fixture::Deflate(stream)) = handle(args, 0).and_then(|id| fixtures.get_mut(id))
            else {
                return stream_failure(ZStatus::StreamError);
            };
            if capacity == 0 {
                return stream_failure(ZStatus::BufError);
            }

            let Some(mut output) = buffer(capacity) else {
                return stream_failure(ZStatus::MemError);
            };
            let before_in = stream.total_in();
            let status = match stream.compress_vec(&input, &mut output, flush) {
                Ok(Status::Ok) => ZStatus::Ok,
                Ok(Status::StreamEnd) => ZStatus::StreamEnd,
                Ok(Status::BufError) => ZStatus::BufError,
                Err(_) => ZStatus::StreamError,
            };
            stream_reply(status, output, stream.total_in() - before_in)
        }
        Operation::Inflate => {
            let input = bytes(args, 1, fixtures);
            let capacity = size(args, 2);
            let Some(flush) = decompress_flush(int(args, 3)) else {
                return stream_failure(ZStatus::StreamError);
            };
            let Some(Fixture::Inflate(stream)) = handle(args, 0).and_then(|id| fixtures.get_mut(id))
            else {
                return stream_failure(ZStatus::StreamError);
            };
            if capacity == 0 {
                return stream_failure(ZStatus::BufError);
            }

            let Some(mut output) = buffer(capacity) else {
                return stream_failure(ZStatus::MemError);
            };
            let before_in = stream.total_in();
            let status = match stream.decompress_vec(&input, &mut output, flush) {
                Ok(Status::Ok) => ZStatus::Ok,
                Ok(Status::StreamEnd) => ZStatus::StreamEnd,
                Ok(Status::BufError) => ZStatus::BufError,
                Err(e) if e.needs_dictionary().is_some() => ZStatus::NeedDict,
                Err(_) => ZStatus::DataError,
            };
            stream_reply(status, output, stream.total_in() - before_in)
        }
        Operation::DeflateEnd => end_stream(fixtures, args, false),
        Operation::InflateEnd => end_stream(fixtures, args, true),
        Operation::Compress => {
            let input = bytes(args, 0, fixtures);
            let capacity = size(args, 1);
            let Some(level) = compression_level(int(args, 2)) else {
                return code_with_bytes(ZStatus::StreamError, Vec::new());
            };
            let Some(destination) = buffer(capacity) else {
                return code_with_bytes(ZStatus::MemError, Vec::new());
            };
            let mut encoder = ZlibEncoder::new(destination, level);
            match encoder.write_all(&input).and_then(|_| encoder.finish()) {
                Ok(compressed) if compressed.len() > capacity => {
                    code_with_bytes(ZStatus::BufError, Vec::new())
                }
                Ok(compressed) => code_with_bytes(ZStatus::Ok, compressed),
                Err(_) => code_with_bytes(ZStatus::Errno, Vec::new()),
            }
        }
        Operation::Uncompress => {
            let input = bytes(args, 0, fixtures);
            let capacity = size(args, 1);
            let mut stream = inflate_stream();
            let Some(mut output) = buffer(capacity) else {
                return code_with_bytes(ZStatus::MemError, Vec::new());
            };
            match stream.decompress_vec(&input, &mut output, FlushDecompress::Finish) {
                Ok(Status::StreamEnd) => code_with_bytes(ZStatus::Ok, output),
                // Output is full but the stream has not ended: destination too small.
                Ok(_) if output.len() == capacity => code_with_bytes(ZStatus::BufError, Vec::new()),
                Ok(_) | Err(_) => code_with_bytes(ZStatus::DataError, Vec::new()),
            }
        }
        Operation::CompressBound => {
            let n = size(args, 0) as i64;
            // -1 when the bound does not fit the return type.
            let bound = [n >> 12, n >> 14, n >> 25, 13]
                .into_iter()
                .try_fold(n, i64::checked_add)
                .unwrap_or(-1);
            Reply::ret(Value::Int(bound))
        }
        Operation::Crc32 => {
            if super::arg(args, 1).is_null() {
                return Reply::ret(Value::Int(0));
            }
            let mut hasher = crc32fast::Hasher::new_with_initial(int(args, 0) as u32);
            hasher.update(&bytes(args, 1, fixtures));
            Reply::ret(Value::Int(i64::from(hasher.finalize())))
        }
        Operation::Adler32 => {
            if super::arg(args, 1).is_null() {
                return Reply::ret(Value::Int(1));
            }
            let mut adler = adler2::Adler32::from_checksum(int(args, 0) as u32);
            adler.write_slice(&bytes(args, 1, fixtures));
            Reply::ret(Value::Int(i64::from(adler.checksum())))
        }
        Operation::GzOpen => {
            let path = match super::arg(args, 0) {
                Value::Handle(id) => fixtures.file_path(*id),
                Value::Text(p) => run_path(fixtures, p),
                _ => None,
            };
            let opened = path
                .zip(text(args, 1))
                .and_then(|(path, mode)| gz_open(path, &mode));
            match opened {
                Some(fixture) => Reply::ret(Value::Handle(fixtures.acquire_anonymous(op.name(), fixture))),
                None => Reply::ret(Value::Null),
            }
        }
        Operation::GzWrite => {
            let data = bytes(args, 1, fixtures);
            let Some(Fixture::GzWriter(writer)) = handle(args, 0).and_then(|id| fixtures.get_mut(id))
            else {
                return Reply::ret(Value::Int(0));
            };
            if data.is_empty() {
                return Reply::ret(Value::Int(0));
            }
            match writer.encoder.write_all(&data) {
                Ok(()) => {
                    writer.pos += data.len() as u64;
                    Reply::ret(Value::Int(data.len() as i64))
                }
                Err(_) => Reply::ret(Value::Int(0)),
            }
        }
        Operation::GzRead => {
            let capacity = size(args, 1);
            let Some(Fixture::GzReader(reader)) = handle(args, 0).and_then(|id| fixtures.get_mut(id))
            else {
                return Reply::with_out(Value::Int(-1), vec![Value::Bytes(Vec::new())]);
            };
            if capacity == 0 {
                return Reply::with_out(Value::Int(0), vec![Value::Bytes(Vec::new())]);
            }
            let Some(mut data) = buffer(capacity) else {
                return Reply::with_out(Value::Int(-1), vec![Value::Bytes(Vec::new())]);
            };
            match Read::by_ref(&mut reader.decoder)
                .take(capacity as u64)
                .read_to_end(&mut data)
            {
                Ok(n) => {
                    reader.pos += n as u64;
                    Reply::with_out(Value::Int(n as i64), vec![Value::Bytes(data)])
                }
                Err(_) => Reply::with_out(Value::Int(-1), vec![Value::Bytes(Vec::new())]),
            }
        }
        Operation::GzSeek => {
            let offset = int(args, 1);
            let whence = int(args, 2);
            let Some(fixture) = handle(args, 0).and_then(|id| fixtures.get_mut(id)) else {
                return Reply::ret(Value::Int(-1));
            };
            let pos = match fixture {
                Fixture::GzReader(r) => r.pos,
                Fixture::GzWriter(w) => w.pos,
                _ => return Reply::ret(Value::Int(-1)),
            };
            let target = match whence {
                0 => Some(offset),
                1 => i64::try_from(pos).ok().and_then(|pos| pos.checked_add(offset)),
                _ => None,
            };
            let Some(target) = target.and_then(|t| u64::try_from(t).ok()) else {
                return Reply::ret(Value::Int(-1));
            };
            let moved = match fixture {
                Fixture::GzReader(reader) => seek_reader(reader, target),
                Fixture::GzWriter(writer) => seek_writer(writer, target),
                _ => Err(io::ErrorKind::Unsupported.into()),
            };
            match moved {
                Ok(()) => Reply::ret(Value::Int(target as i64)),
                Err(_) => Reply::ret(Value::Int(-1)),
            }
        }
        Operation::GzTell => match handle(args, 0).and_then(|id| fixtures.get(id)) {
            Some(Fixture::GzReader(r)) => Reply::ret(Value::Int(r.pos as i64)),
            Some(Fixture::GzWriter(w)) => Reply::ret(Value::Int(w.pos as i64)),
            _ => Reply::ret(Value::Int(-1)),
        },
        Operation::GzClose => {
            let Some(id) = handle(args, 0) else {
                return Reply::ret(ZStatus::StreamError.value());
            };
            if !matches!(
                fixtures.get(id),
                Some(Fixture::GzReader(_)) | Some(Fixture::GzWriter(_))
            ) {
                return Reply::ret(ZStatus::StreamError.value());
            }
            match fixtures.release(id) {
                Ok(_) => Reply::ret(ZStatus::Ok.value()),
                Err(_) => Reply::ret(ZStatus::Errno.value()),
            }
        }
        _ => Reply::ret(Value::Null),
    }
}

/// Read-mode seeks decompress and discard; seeking backwards starts over.
/// Seeking past the end is accepted and later reads return nothing.
fn seek_reader(reader: &mut GzReader, target: u64) -> io::Result<()> {
    if target < reader.pos {
        reader.rewind()?;
    }
    let skip = target - reader.pos;
    io::copy(&mut Read::by_ref(&mut reader.decoder).take(skip), &mut io::sink())?;
    reader.pos = target;
    Ok(())
}

/// Write-mode seeks only move forward, filling the gap with zeros.
fn seek_writer(writer: &mut GzWriter, target: u64) -> io::Result<()> {
    if target < writer.pos {
        return Err(io::ErrorKind::InvalidInput.into());
    }
    let gap = target - writer.pos;
    io::copy(&mut io::repeat(0).take(gap), &mut writer.encoder)?;
    writer.pos = target;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::{FixtureKind, FixtureSpec};

    fn set() -> FixtureSet {
        FixtureSet::new("zlib", None).unwrap()
    }

    fn call(set: &mut FixtureSet, op: Operation, args: Vec<Value>) -> Reply {
        invoke(op, &args, set)
    }

    #[test]
    fn stream_round_trip_recovers_input() {
        let mut set = set();
        let input = vec![b'A'; 128];

        let init = call(&mut set, Operation::DeflateInit, vec![Value::Int(6)]);
        let z = init.ret.clone();
        assert!(matches!(z, Value::Handle(_)), "got {z}");

        let deflated = call(
            &mut set,
            Operation::Deflate,
            vec![z.clone(), Value::Bytes(input.clone()), Value::Int(256), Value::Int(4)],
        );
        assert_eq!(deflated.ret, ZStatus::StreamEnd.value());
        assert_eq!(deflated.out[1], Value::Int(128), "all input consumed");
        assert_eq!(call(&mut set, Operation::DeflateEnd, vec![z]).ret, ZStatus::Ok.value());

        let inf = call(&mut set, Operation::InflateInit, vec![]).ret;
        let inflated = call(
            &mut set,
            Operation::Inflate,
            vec![inf.clone(), deflated.out[0].clone(), Value::Int(256), Value::Int(4)],
        );
        assert_eq!(inflated.ret, ZStatus::StreamEnd.value());
        assert_eq!(inflated.out[0], Value::Bytes(input));
        assert_eq!(call(&mut set, Operation::InflateEnd, vec![inf]).ret, ZStatus::Ok.value());
        assert!(set.live_names().is_empty(), "both streams ended");
        set.teardown();
    }

    #[test]
    fn zero_capacity_and_bad_flush_are_defined_errors() {
        let mut set = set();
        let z = call(&mut set, Operation::DeflateInit, vec![Value::Int(-1)]).ret;
        let zero = call(
            &mut set,
            Operation::Deflate,
            vec![z.clone(), Value::Bytes(b"x".to_vec()), Value::Int(0), Value::Int(4)],
        );
        assert_eq!(zero.ret, ZStatus::BufError.value());
        assert_eq!(zero.out[0], Value::Bytes(Vec::new()));

        let bad_flush = call(
            &mut set,
            Operation::Deflate,
            vec![z, Value::Bytes(b"x".to_vec()), Value::Int(16), Value::Int(0x7fff)],
        );
        assert_eq!(bad_flush.ret, ZStatus::StreamError.value());

        let null_stream = call(
            &mut set,
            Operation::Inflate,
            vec![Value::Null, Value::Null, Value::Int(16), Value::Int(0)],
        );
        assert_eq!(null_stream.ret, ZStatus::StreamError.value());
        set.teardown();
    }

    #[test]
    fn invalid_level_is_a_stream_error() {
        let mut set = set();
        let reply = call(&mut set, Operation::DeflateInit, vec![Value::Int(42)]);
        assert_eq!(reply.ret, ZStatus::StreamError.value());
        assert!(set.live_names().is_empty());
        set.teardown();
    }

    #[test]
    fn mismatched_end_leaves_stream_live() {
        let mut set = set();
        let inf = call(&mut set, Operation::InflateInit, vec![]).ret;
        let wrong = call(&mut set, Operation::DeflateEnd, vec![inf.clone()]);
        assert_eq!(wrong.ret, ZStatus::StreamError.value());
        assert_eq!(set.live_names().len(), 1, "stream untouched by mismatched end");

        assert_eq!(
            call(&mut set, Operation::InflateEnd, vec![inf.clone()]).ret,
            ZStatus::Ok.value()
        );
        assert_eq!(
            call(&mut set, Operation::InflateEnd, vec![inf]).ret,
            ZStatus::StreamError.value(),
            "ending twice must not release twice"
        );
        set.teardown();
    }

    #[test]
    fn one_shot_round_trip_and_error_codes() {
        let mut set = set();
        let input = crate::step::Payload::Seeded { seed: 3, len: 300 }.materialize();

        let packed = call(
            &mut set,
            Operation::Compress,
            vec![Value::Bytes(input.clone()), Value::Int(1024), Value::Int(9)],
        );
        assert_eq!(packed.ret, ZStatus::Ok.value());

        let unpacked = call(
            &mut set,
            Operation::Uncompress,
            vec![packed.out[0].clone(), Value::Int(1024)],
        );
        assert_eq!(unpacked.ret, ZStatus::Ok.value());
        assert_eq!(unpacked.out[0], Value::Bytes(input));

        let small = call(
            &mut set,
            Operation::Uncompress,
            vec![packed.out[0].clone(), Value::Int(10)],
        );
        assert_eq!(small.ret, ZStatus::BufError.value());

        let corrupt = call(
            &mut set,
            Operation::Uncompress,
            vec![Value::Bytes(b"definitely not zlib".to_vec()), Value::Int(64)],
        );
        assert_eq!(corrupt.ret, ZStatus::DataError.value());

        let tiny_dest = call(
            &mut set,
            Operation::Compress,
            vec![Value::Bytes(vec![1; 64]), Value::Int(1), Value::Int(6)],
        );
        assert_eq!(tiny_dest.ret, ZStatus::BufError.value());

        let bad_level = call(
            &mut set,
            Operation::Compress,
            vec![Value::Bytes(vec![1; 64]), Value::Int(128), Value::Int(0x7fff)],
        );
        assert_eq!(bad_level.ret, ZStatus::StreamError.value());
        set.teardown();
    }

    #[test]
    fn compress_bound_matches_library_formula() {
        let mut set = set();
        assert_eq!(
            call(&mut set, Operation::CompressBound, vec![Value::Int(0)]).ret,
            Value::Int(13)
        );
        assert_eq!(
            call(&mut set, Operation::CompressBound, vec![Value::Int(8192)]).ret,
            Value::Int(8192 + 2 + 13)
        );
        set.teardown();
    }

    #[test]
    fn checksums_match_reference_values() {
        let mut set = set();
        let crc = call(
            &mut set,
            Operation::Crc32,
            vec![Value::Int(0), Value::Text("123456789".into())],
        );
        assert_eq!(crc.ret, Value::Int(0xCBF4_3926));
        let adler = call(
            &mut set,
            Operation::Adler32,
            vec![Value::Int(1), Value::Text("Wikipedia".into())],
        );
        assert_eq!(adler.ret, Value::Int(0x11E6_0398));

        assert_eq!(
            call(&mut set, Operation::Crc32, vec![Value::Int(99), Value::Null]).ret,
            Value::Int(0),
            "crc32 of a null buffer is 0"
        );
        assert_eq!(
            call(&mut set, Operation::Adler32, vec![Value::Int(99), Value::Null]).ret,
            Value::Int(1),
            "adler32 of a null buffer is 1"
        );
        set.teardown();
    }

    #[test]
    fn gz_file_write_read_seek_close() {
        let mut set = set();
        set.build_all(&[FixtureSpec::new("gzfile", FixtureKind::TempFile { contents: None })])
            .unwrap();
        let file = Value::Handle(set.lookup("gzfile").unwrap());

        let w = call(&mut set, Operation::GzOpen, vec![file.clone(), Value::Text("wb6".into())]).ret;
        assert!(matches!(w, Value::Handle(_)));
        assert_eq!(
            call(&mut set, Operation::GzWrite, vec![w.clone(), Value::Text("hello gz".into())]).ret,
            Value::Int(8)
        );
        assert_eq!(
            call(&mut set, Operation::GzWrite, vec![w.clone(), Value::Bytes(Vec::new())]).ret,
            Value::Int(0),
            "zero-length write writes nothing"
        );
        assert_eq!(
            call(&mut set, Operation::GzRead, vec![w.clone(), Value::Int(4)]).ret,
            Value::Int(-1),
            "reading a write handle fails"
        );
        assert_eq!(call(&mut set, Operation::GzTell, vec![w.clone()]).ret, Value::Int(8));
        assert_eq!(call(&mut set, Operation::GzClose, vec![w.clone()]).ret, ZStatus::Ok.value());
        assert_eq!(
            call(&mut set, Operation::GzClose, vec![w]).ret,
            ZStatus::StreamError.value(),
            "closing twice is rejected"
        );

        let r = call(&mut set, Operation::GzOpen, vec![file, Value::Text("rb".into())]).ret;
        let zero = call(&mut set, Operation::GzRead, vec![r.clone(), Value::Int(0)]);
        assert_eq!(zero.ret, Value::Int(0));

        assert_eq!(
            call(&mut set, Operation::GzSeek, vec![r.clone(), Value::Int(6), Value::Int(0)]).ret,
            Value::Int(6)
        );
        let tail = call(&mut set, Operation::GzRead, vec![r.clone(), Value::Int(64)]);
        assert_eq!(tail.ret, Value::Int(2));
        assert_eq!(tail.out[0], Value::Bytes(b"gz".to_vec()));

        assert_eq!(
            call(&mut set, Operation::GzSeek, vec![r.clone(), Value::Int(0), Value::Int(0)]).ret,
            Value::Int(0),
            "backwards seek restarts the stream"
        );
        let all = call(&mut set, Operation::GzRead, vec![r.clone(), Value::Int(64)]);
        assert_eq!(all.out[0], Value::Bytes(b"hello gz".to_vec()));
        assert_eq!(
            call(&mut set, Operation::GzSeek, vec![r.clone(), Value::Int(0), Value::Int(2)]).ret,
            Value::Int(-1),
            "SEEK_END is unsupported"
        );
        assert_eq!(
            call(&mut set, Operation::GzWrite, vec![r.clone(), Value::Text("x".into())]).ret,
            Value::Int(0),
            "writing a read handle fails"
        );
        assert_eq!(call(&mut set, Operation::GzClose, vec![r]).ret, ZStatus::Ok.value());
        set.teardown();
    }

    #[test]
    fn gz_open_rejects_missing_files_and_null_arguments() {
        let mut set = set();
        let missing = call(
            &mut set,
            Operation::GzOpen,
            vec![
                Value::Text("/definitely/not/here.gz".into()),
                Value::Text("rb".into()),
            ],
        );
        assert_eq!(missing.ret, Value::Null);
        let null_mode = call(
            &mut set,
            Operation::GzOpen,
            vec![Value::Text("x.gz".into()), Value::Null],
        );
        assert_eq!(null_mode.ret, Value::Null);
        assert_eq!(
            call(&mut set, Operation::GzTell, vec![Value::Null]).ret,
            Value::Int(-1)
        );
        set.teardown();
    }

    /// Far more than any allocator can hand out, but still a valid `isize`.
    const HUGE: i64 = i64::MAX / 2;

    #[test]
    fn unallocatable_capacities_are_mem_errors() {
        let mut set = set();
        let z = call(&mut set, Operation::DeflateInit, vec![Value::Int(6)]).ret;
        let deflated = call(
            &mut set,
            Operation::Deflate,
            vec![z, Value::Text("data".into()), Value::Int(HUGE), Value::Int(4)],
        );
        assert_eq!(deflated.ret, ZStatus::MemError.value());
        assert_eq!(deflated.out[1], Value::Int(0), "no input consumed");

        let inf = call(&mut set, Operation::InflateInit, vec![]).ret;
        assert_eq!(
            call(
                &mut set,
                Operation::Inflate,
                vec![inf, Value::Bytes(vec![0x78, 0x9c]), Value::Int(HUGE), Value::Int(0)],
            )
            .ret,
            ZStatus::MemError.value()
        );
        assert_eq!(
            call(
                &mut set,
                Operation::Compress,
                vec![Value::Text("data".into()), Value::Int(HUGE), Value::Int(6)],
            )
            .ret,
            ZStatus::MemError.value()
        );
        assert_eq!(
            call(
                &mut set,
                Operation::Uncompress,
                vec![Value::Bytes(vec![0x78, 0x9c]), Value::Int(HUGE)],
            )
            .ret,
            ZStatus::MemError.value()
        );
        set.teardown();
    }

    #[test]
    fn gz_read_of_unallocatable_capacity_fails() {
        let mut set = set();
        set.build_all(&[FixtureSpec::new("gzfile", FixtureKind::TempFile { contents: None })])
            .unwrap();
        let file = Value::Handle(set.lookup("gzfile").unwrap());
        let r = call(&mut set, Operation::GzOpen, vec![file, Value::Text("rb".into())]).ret;
        let reply = call(&mut set, Operation::GzRead, vec![r.clone(), Value::Int(HUGE)]);
        assert_eq!(reply.ret, Value::Int(-1));
        assert_eq!(
            call(&mut set, Operation::GzTell, vec![r]).ret,
            Value::Int(0),
            "failed read does not move the position"
        );
        set.teardown();
    }

    #[test]
    fn extreme_sizes_and_offsets_do_not_overflow() {
        let mut set = set();
        assert_eq!(
            call(&mut set, Operation::CompressBound, vec![Value::Int(i64::MAX)]).ret,
            Value::Int(-1)
        );

        set.build_all(&[FixtureSpec::new("gzfile", FixtureKind::TempFile { contents: None })])
            .unwrap();
        let file = Value::Handle(set.lookup("gzfile").unwrap());
        let w = call(&mut set, Operation::GzOpen, vec![file, Value::Text("wb".into())]).ret;
        call(&mut set, Operation::GzWrite, vec![w.clone(), Value::Text("abc".into())]);
        assert_eq!(
            call(&mut set, Operation::GzSeek, vec![w.clone(), Value::Int(i64::MAX), Value::Int(1)]).ret,
            Value::Int(-1),
            "current position plus i64::MAX does not fit"
        );
        assert_eq!(
            call(&mut set, Operation::GzSeek, vec![w.clone(), Value::Int(-4), Value::Int(1)]).ret,
            Value::Int(-1),
            "seeking before the start fails"
        );
        assert_eq!(call(&mut set, Operation::GzTell, vec![w]).ret, Value::Int(3));
        set.teardown();
    }

    #[test]
    fn relative_text_paths_resolve_inside_the_run_directory() {
        let mut set = set();
        let dir = set.temp_dir().expect("run directory").to_path_buf();

        let w = call(
            &mut set,
            Operation::GzOpen,
            vec![Value::Text("stray.gz".into()), Value::Text("wb".into())],
        )
        .ret;
        assert!(matches!(w, Value::Handle(_)), "got {w}");
        assert!(dir.join("stray.gz").exists(), "file created in the run directory");
        assert!(
            !std::path::Path::new("stray.gz").exists(),
            "nothing lands in the working directory"
        );
        assert_eq!(call(&mut set, Operation::GzClose, vec![w]).ret, ZStatus::Ok.value());

        let climbing = call(
            &mut set,
            Operation::GzOpen,
            vec![Value::Text("../escape.gz".into()), Value::Text("wb".into())],
        );
        assert_eq!(climbing.ret, Value::Null);
        assert!(!dir.parent().unwrap().join("escape.gz").exists());

        set.teardown();
        assert!(!dir.exists(), "teardown removes the file with the run directory");
    }
}
