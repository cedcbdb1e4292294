use super::{buffer, bytes, handle, size};
use crate::fixture::{Fixture, FixtureSet};
use crate::step::Operation;
use crate::value::{Reply, Value};
use std::io::{Read, Seek, SeekFrom, Write};

fn failed() -> Reply {
    Reply::with_out(Value::Int(-1), vec![Value::Bytes(Vec::new())])
}

pub fn invoke(op: Operation, args: &[Value], fixtures: &mut FixtureSet) -> Reply {
    match op {
        Operation::FileWrite => {
            let data = bytes(args, 1, fixtures);
            let Some(Fixture::TempFile(temp)) = handle(args, 0).and_then(|id| fixtures.get_mut(id))
            else {
                return Reply::ret(Value::Int(-1));
            };
            let appended = temp
                .file
                .seek(SeekFrom::End(0))
                .and_then(|_| temp.file.write_all(&data))
                .and_then(|_| temp.file.flush());
            match appended {
                Ok(()) => Reply::ret(Value::Int(data.len() as i64)),
                Err(_) => Reply::ret(Value::Int(-1)),
            }
        }
        Operation::FileRead => {
            let capacity = size(args, 1);
            let Some(Fixture::TempFile(temp)) = handle(args, 0).and_then(|id| fixtures.get_mut(id))
            else {
                return failed();
            };
            let Some(mut data) = buffer(capacity) else {
                return failed();
            };
            let cursor = temp.cursor;
            let read = temp
                .file
                .seek(SeekFrom::Start(cursor))
                .and_then(|_| Read::by_ref(&mut temp.file).take(capacity as u64).read_to_end(&mut data));
            match read {
                Ok(n) => {
                    temp.cursor += n as u64;
                    Reply::with_out(Value::Int(n as i64), vec![Value::Bytes(data)])
                }
                Err(_) => failed(),
            }
        }
        Operation::FileSize => match handle(args, 0).and_then(|id| fixtures.get(id)) {
            Some(Fixture::TempFile(temp)) => match temp.file.as_file().metadata() {
                Ok(meta) => Reply::ret(Value::Int(meta.len() as i64)),
                Err(_) => Reply::ret(Value::Int(-1)),
            },
            _ => Reply::ret(Value::Int(-1)),
        },
        _ => Reply::ret(Value::Null),
    }
}
