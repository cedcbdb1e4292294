//! Adapters over the wrapped libraries. Each adapter turns resolved argument
//! values into calls on the library's public API and reports the outcome as a
//! [`Reply`]. Library failures are values (codes, null, -1), never Rust errors.

pub mod file;
pub mod json;
pub mod zlib;

use crate::fixture::{Fixture, FixtureSet};
use crate::step::{Library, Operation};
use crate::value::{HandleId, Reply, Value};

/// Calls `op` with already resolved (and possibly injected) arguments.
pub fn invoke(op: Operation, args: &[Value], fixtures: &mut FixtureSet) -> Reply {
    match op.library() {
        Library::Zlib => zlib::invoke(op, args, fixtures),
        Library::Json => json::invoke(op, args, fixtures),
        Library::File => file::invoke(op, args, fixtures),
        Library::Util => util(op, args, fixtures),
    }
}

fn util(op: Operation, args: &[Value], fixtures: &FixtureSet) -> Reply {
    match op {
        Operation::Memcmp => {
            let a = bytes(args, 0, fixtures);
            let b = bytes(args, 1, fixtures);
            let ordering = match a.cmp(&b) {
                std::cmp::Ordering::Less => -1,
                std::cmp::Ordering::Equal => 0,
                std::cmp::Ordering::Greater => 1,
            };
            Reply::ret(Value::Int(ordering))
        }
        Operation::ProcessAbort => std::process::abort(),
        _ => Reply::ret(Value::Null),
    }
}

pub(crate) fn arg(args: &[Value], index: usize) -> &Value {
    args.get(index).unwrap_or(&Value::Null)
}

pub(crate) fn handle(args: &[Value], index: usize) -> Option<HandleId> {
    arg(args, index).as_handle()
}

/// Integer argument; null reads as zero.
/// An empty buffer able to hold `capacity` bytes, or `None` when that much
/// memory cannot be had. Capacities come straight from case files.
pub(crate) fn buffer(capacity: usize) -> Option<Vec<u8>> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(capacity).ok()?;
    Some(buf)
}

pub(crate) fn int(args: &[Value], index: usize) -> i64 {
    match arg(args, index) {
        Value::Int(i) | Value::Code(i) => *i,
        Value::Bool(b) => i64::from(*b),
        Value::Float(x) => *x as i64,
        _ => 0,
    }
}

/// Size argument; negative sizes clamp to zero.
pub(crate) fn size(args: &[Value], index: usize) -> usize {
    usize::try_from(int(args, index)).unwrap_or(0)
}

pub(crate) fn float(args: &[Value], index: usize) -> f64 {
    match arg(args, index) {
        Value::Float(x) => *x,
        Value::Int(i) | Value::Code(i) => *i as f64,
        _ => 0.0,
    }
}

pub(crate) fn text(args: &[Value], index: usize) -> Option<String> {
    match arg(args, index) {
        Value::Text(s) => Some(s.clone()),
        Value::Bytes(b) => Some(String::from_utf8_lossy(b).into_owned()),
        _ => None,
    }
}

/// Input bytes; null is a zero-length buffer. Buffer and temp-file fixtures
/// read as their contents.
pub(crate) fn bytes(args: &[Value], index: usize, fixtures: &FixtureSet) -> Vec<u8> {
    match arg(args, index) {
        Value::Bytes(b) => b.clone(),
        Value::Text(s) => s.as_bytes().to_vec(),
        Value::Json(v) => v.to_string().into_bytes(),
        Value::Handle(id) => match fixtures.get(*id) {
            Some(Fixture::Buffer(b)) => b.clone(),
            Some(Fixture::TempFile(temp)) => std::fs::read(temp.file.path()).unwrap_or_default(),
            _ => Vec::new(),
        },
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memcmp_orders_like_the_c_function() {
        let mut set = FixtureSet::new("memcmp", None).unwrap();
        let eq = invoke(
            Operation::Memcmp,
            &[Value::Text("abc".into()), Value::Bytes(b"abc".to_vec())],
            &mut set,
        );
        assert_eq!(eq.ret, Value::Int(0));
        let lt = invoke(
            Operation::Memcmp,
            &[Value::Bytes(b"abb".to_vec()), Value::Bytes(b"abc".to_vec())],
            &mut set,
        );
        assert_eq!(lt.ret, Value::Int(-1));
        let null_vs_empty = invoke(
            Operation::Memcmp,
            &[Value::Null, Value::Bytes(Vec::new())],
            &mut set,
        );
        assert_eq!(null_vs_empty.ret, Value::Int(0), "null reads as zero length");
        set.teardown();
    }

    #[test]
    fn coercions_are_total() {
        let args = [Value::Int(-4), Value::Null, Value::Float(2.5)];
        assert_eq!(size(&args, 0), 0, "negative sizes clamp");
        assert_eq!(int(&args, 1), 0);
        assert_eq!(int(&args, 9), 0, "missing arguments read as null");
        assert_eq!(float(&args, 2), 2.5);
        assert_eq!(text(&args, 1), None);
    }

    #[test]
    fn buffer_fixtures_coerce_to_bytes() {
        let mut set = FixtureSet::new("coerce", None).unwrap();
        let id = set.acquire("buf", Fixture::Buffer(vec![0, 0, 0]));
        assert_eq!(bytes(&[Value::Handle(id)], 0, &set), vec![0, 0, 0]);
        set.teardown();
    }
}
