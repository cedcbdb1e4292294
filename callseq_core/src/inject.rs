use crate::fixture::FixtureSet;
use crate::step::ParamKind;
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Constant substituted by [`EdgeCase::OutOfRangeFlag`]. Outside every level,
/// flush, whence and format range the adapters accept.
pub const OUT_OF_RANGE_FLAG: i64 = 0x7fff;

/// The fixed catalog of boundary values a step argument can be replaced with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EdgeCase {
    /// Empty buffer or text, or a size of zero.
    ZeroLength,
    /// A null pointer; buffers read as zero length.
    NullPointer,
    /// A destination capacity of one byte.
    MinimumCapacity,
    /// A flag or enum constant outside its valid range.
    OutOfRangeFlag,
    /// Another declared fixture in place of the nominal handle, e.g. ending an
    /// inflate stream with `deflate-end`.
    MismatchedHandle(String),
}

impl EdgeCase {
    /// Whether this edge case has a meaning for a parameter of `kind`.
    pub fn applies_to(&self, kind: ParamKind) -> bool {
        match self {
            EdgeCase::ZeroLength => {
                matches!(kind, ParamKind::Bytes | ParamKind::Size | ParamKind::Text)
            }
            EdgeCase::NullPointer => matches!(
                kind,
                ParamKind::Handle
                    | ParamKind::Node
                    | ParamKind::Bytes
                    | ParamKind::Text
                    | ParamKind::Path
            ),
            EdgeCase::MinimumCapacity => kind == ParamKind::Size,
            EdgeCase::OutOfRangeFlag => kind == ParamKind::Flag,
            EdgeCase::MismatchedHandle(_) => {
                matches!(kind, ParamKind::Handle | ParamKind::Node)
            }
        }
    }

    /// The value substituted for a parameter of `kind`. Callers validate with
    /// [`EdgeCase::applies_to`] first; an inapplicable combination yields `Null`.
    pub fn value_for(&self, kind: ParamKind, fixtures: &FixtureSet) -> Value {
        match (self, kind) {
            (EdgeCase::ZeroLength, ParamKind::Bytes) => Value::Bytes(Vec::new()),
            (EdgeCase::ZeroLength, ParamKind::Text) => Value::Text(String::new()),
            (EdgeCase::ZeroLength, ParamKind::Size) => Value::Int(0),
            (EdgeCase::MinimumCapacity, ParamKind::Size) => Value::Int(1),
            (EdgeCase::OutOfRangeFlag, ParamKind::Flag) => Value::Int(OUT_OF_RANGE_FLAG),
            (EdgeCase::MismatchedHandle(name), _) => fixtures
                .lookup(name)
                .map(Value::Handle)
                .unwrap_or(Value::Null),
            _ => Value::Null,
        }
    }
}

impl fmt::Display for EdgeCase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EdgeCase::ZeroLength => write!(f, "zero-length"),
            EdgeCase::NullPointer => write!(f, "null-pointer"),
            EdgeCase::MinimumCapacity => write!(f, "minimum-capacity"),
            EdgeCase::OutOfRangeFlag => write!(f, "out-of-range-flag"),
            EdgeCase::MismatchedHandle(name) => write!(f, "mismatched-handle({name})"),
        }
    }
}

/// Overrides `args[index]` in place. Other arguments are left untouched.
pub fn apply(
    edge: &EdgeCase,
    index: usize,
    params: &[ParamKind],
    args: &mut [Value],
    fixtures: &FixtureSet,
) {
    if let (Some(kind), Some(slot)) = (params.get(index), args.get_mut(index)) {
        *slot = edge.value_for(*kind, fixtures);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::{FixtureKind, FixtureSpec};
    use crate::step::Operation;

    fn empty_set() -> FixtureSet {
        FixtureSet::new("inject-test", None).expect("temp dir")
    }

    #[test]
    fn catalog_values_are_fixed() {
        let set = empty_set();
        assert_eq!(
            EdgeCase::ZeroLength.value_for(ParamKind::Bytes, &set),
            Value::Bytes(Vec::new())
        );
        assert_eq!(
            EdgeCase::ZeroLength.value_for(ParamKind::Size, &set),
            Value::Int(0)
        );
        assert_eq!(
            EdgeCase::MinimumCapacity.value_for(ParamKind::Size, &set),
            Value::Int(1)
        );
        assert_eq!(
            EdgeCase::OutOfRangeFlag.value_for(ParamKind::Flag, &set),
            Value::Int(OUT_OF_RANGE_FLAG)
        );
        assert_eq!(
            EdgeCase::NullPointer.value_for(ParamKind::Handle, &set),
            Value::Null
        );
    }

    #[test]
    fn applicability_rejects_nonsense_combinations() {
        assert!(!EdgeCase::MinimumCapacity.applies_to(ParamKind::Bytes));
        assert!(!EdgeCase::OutOfRangeFlag.applies_to(ParamKind::Size));
        assert!(!EdgeCase::ZeroLength.applies_to(ParamKind::Handle));
        assert!(EdgeCase::NullPointer.applies_to(ParamKind::Path));
        assert!(EdgeCase::MismatchedHandle("x".into()).applies_to(ParamKind::Handle));
    }

    #[test]
    fn apply_touches_only_the_designated_argument() {
        let set = empty_set();
        let params = Operation::Deflate.params();
        let mut args = vec![
            Value::Null,
            Value::Bytes(b"data".to_vec()),
            Value::Int(64),
            Value::Int(4),
        ];
        apply(&EdgeCase::ZeroLength, 2, params, &mut args, &set);
        assert_eq!(args[2], Value::Int(0), "capacity is zeroed");
        assert_eq!(args[1], Value::Bytes(b"data".to_vec()), "input untouched");
        assert_eq!(args[3], Value::Int(4), "flush untouched");
    }

    #[test]
    fn mismatched_handle_resolves_the_named_fixture() {
        let mut set = empty_set();
        set.build_all(&[FixtureSpec {
            name: "inf".into(),
            kind: FixtureKind::Inflate,
        }])
        .expect("inflate fixture builds");
        let id = set.lookup("inf").expect("declared fixture is registered");
        let edge = EdgeCase::MismatchedHandle("inf".into());
        assert_eq!(edge.value_for(ParamKind::Handle, &set), Value::Handle(id));
        let missing = EdgeCase::MismatchedHandle("nope".into());
        assert_eq!(missing.value_for(ParamKind::Handle, &set), Value::Null);
        set.teardown();
    }
}
