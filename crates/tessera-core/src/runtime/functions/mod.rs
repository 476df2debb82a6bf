//! Builtin scalar functions
//!
//! Builtins are plain native functions over [`Value`]s. The generator does
//! not special-case them: a call expression resolves the name to a
//! [`BuiltinFunction`], registers its native implementation with the
//! function registry and emits an ordinary native call.

pub mod date;
pub mod numeric;
pub mod string;

use crate::error::{Error, Result};
use crate::proxy::{FunctionId, FunctionRegistry, TypeRegistry};
use crate::types::{TypeId, Value};
use serde::{Deserialize, Serialize};

/// Typed null when any argument is null
pub(crate) fn null_if_any(args: &[&Value], result: TypeId) -> Option<Value> {
    args.iter().any(|v| v.is_null()).then(|| Value::null(result))
}

/// Text of an argument, casting non-text values
pub(crate) fn text_of(v: &Value) -> Result<String> {
    match v.as_str() {
        Some(text) => Ok(text.to_string()),
        None => {
            let cast = v.cast_as(TypeId::Varchar)?;
            cast.as_str()
                .map(str::to_string)
                .ok_or_else(|| Error::invalid_input("argument is not valid UTF-8 text"))
        }
    }
}

/// Builtin function known to the expression compiler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BuiltinFunction {
    /// `abs(x)`
    Abs,
    /// `ceil(x)`
    Ceil,
    /// `floor(x)`
    Floor,
    /// `round(x)`
    Round,
    /// `sqrt(x)`
    Sqrt,
    /// `ascii(s)`
    Ascii,
    /// `chr(n)`
    Chr,
    /// `char_length(s)`
    CharLength,
    /// `octet_length(s)`
    OctetLength,
    /// `length(s)`, in characters
    Length,
    /// `concat(a, b)`
    Concat,
    /// `substr(s, from [, len])`
    Substr,
    /// `repeat(s, n)`
    Repeat,
    /// `replace(s, from, to)`
    Replace,
    /// `ltrim(s [, chars])`
    LTrim,
    /// `rtrim(s [, chars])`
    RTrim,
    /// `btrim(s [, chars])`
    BTrim,
    /// `trim(s)`
    Trim,
    /// `upper(s)`
    Upper,
    /// `lower(s)`
    Lower,
    /// `like(s, pattern)`
    Like,
    /// `date_part(part, ts)` / `EXTRACT`
    DatePart,
}

impl BuiltinFunction {
    /// Resolve a function name (case-insensitive)
    pub fn lookup(name: &str) -> Option<Self> {
        let f = match name.to_ascii_lowercase().as_str() {
            "abs" => Self::Abs,
            "ceil" | "ceiling" => Self::Ceil,
            "floor" => Self::Floor,
            "round" => Self::Round,
            "sqrt" => Self::Sqrt,
            "ascii" => Self::Ascii,
            "chr" => Self::Chr,
            "char_length" | "character_length" => Self::CharLength,
            "octet_length" => Self::OctetLength,
            "length" => Self::Length,
            "concat" => Self::Concat,
            "substr" | "substring" => Self::Substr,
            "repeat" => Self::Repeat,
            "replace" => Self::Replace,
            "ltrim" => Self::LTrim,
            "rtrim" => Self::RTrim,
            "btrim" => Self::BTrim,
            "trim" => Self::Trim,
            "upper" => Self::Upper,
            "lower" => Self::Lower,
            "like" => Self::Like,
            "date_part" | "extract" => Self::DatePart,
            _ => return None,
        };
        Some(f)
    }

    /// Symbol the native implementation is registered under
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Abs => "builtin::abs",
            Self::Ceil => "builtin::ceil",
            Self::Floor => "builtin::floor",
            Self::Round => "builtin::round",
            Self::Sqrt => "builtin::sqrt",
            Self::Ascii => "builtin::ascii",
            Self::Chr => "builtin::chr",
            Self::CharLength => "builtin::char_length",
            Self::OctetLength => "builtin::octet_length",
            Self::Length => "builtin::length",
            Self::Concat => "builtin::concat",
            Self::Substr => "builtin::substr",
            Self::Repeat => "builtin::repeat",
            Self::Replace => "builtin::replace",
            Self::LTrim => "builtin::ltrim",
            Self::RTrim => "builtin::rtrim",
            Self::BTrim => "builtin::btrim",
            Self::Trim => "builtin::trim",
            Self::Upper => "builtin::upper",
            Self::Lower => "builtin::lower",
            Self::Like => "builtin::like",
            Self::DatePart => "builtin::date_part",
        }
    }

    /// Fewest and most arguments accepted
    pub fn arity(self) -> (usize, usize) {
        match self {
            Self::Substr => (2, 3),
            Self::LTrim | Self::RTrim | Self::BTrim => (1, 2),
            Self::Concat | Self::Repeat | Self::Like | Self::DatePart => (2, 2),
            Self::Replace => (3, 3),
            _ => (1, 1),
        }
    }

    /// Value supplied for a trailing argument the caller left out
    pub fn default_arg(self, index: usize) -> Option<Value> {
        match (self, index) {
            (Self::Substr, 2) => Some(Value::null(TypeId::Integer)),
            (Self::LTrim | Self::RTrim | Self::BTrim, 1) => Some(Value::varchar(" ")),
            _ => None,
        }
    }

    /// Result type for the given argument types
    pub fn return_type(self, args: &[TypeId]) -> TypeId {
        match self {
            Self::Abs => args
                .first()
                .copied()
                .filter(|t| t.is_numeric())
                .unwrap_or(TypeId::Decimal),
            Self::Ceil | Self::Floor | Self::Round | Self::Sqrt | Self::DatePart => TypeId::Decimal,
            Self::Ascii | Self::CharLength | Self::OctetLength | Self::Length => TypeId::Integer,
            Self::Like => TypeId::Boolean,
            _ => TypeId::Varchar,
        }
    }

    /// Register the native implementation; returns its function id
    pub fn register(self, functions: &mut FunctionRegistry, types: &mut TypeRegistry) -> FunctionId {
        let symbol = self.symbol();
        match self {
            Self::Abs => functions.register(types, symbol, numeric::abs),
            Self::Ceil => functions.register(types, symbol, numeric::ceil),
            Self::Floor => functions.register(types, symbol, numeric::floor),
            Self::Round => functions.register(types, symbol, numeric::round),
            Self::Sqrt => functions.register(types, symbol, numeric::sqrt),
            Self::Ascii => functions.register(types, symbol, string::ascii),
            Self::Chr => functions.register(types, symbol, string::chr),
            Self::CharLength | Self::Length => functions.register(types, symbol, string::char_length),
            Self::OctetLength => functions.register(types, symbol, string::octet_length),
            Self::Concat => functions.register(types, symbol, string::concat),
            Self::Substr => functions.register(types, symbol, string::substr),
            Self::Repeat => functions.register(types, symbol, string::repeat),
            Self::Replace => functions.register(types, symbol, string::replace),
            Self::LTrim => functions.register(types, symbol, string::ltrim),
            Self::RTrim => functions.register(types, symbol, string::rtrim),
            Self::BTrim => functions.register(types, symbol, string::btrim),
            Self::Trim => functions.register(types, symbol, string::trim),
            Self::Upper => functions.register(types, symbol, string::upper),
            Self::Lower => functions.register(types, symbol, string::lower),
            Self::Like => functions.register(types, symbol, string::like),
            Self::DatePart => functions.register(types, symbol, date::date_part),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::NativeType;

    #[test]
    fn test_lookup_and_arity() {
        assert_eq!(BuiltinFunction::lookup("UPPER"), Some(BuiltinFunction::Upper));
        assert_eq!(BuiltinFunction::lookup("extract"), Some(BuiltinFunction::DatePart));
        assert_eq!(BuiltinFunction::lookup("nope"), None);
        assert_eq!(BuiltinFunction::Substr.arity(), (2, 3));
        assert!(BuiltinFunction::Substr.default_arg(2).unwrap().is_null());
        assert_eq!(
            BuiltinFunction::Abs.return_type(&[TypeId::SmallInt]),
            TypeId::SmallInt
        );
    }

    #[test]
    fn test_register_once_with_value_signature() {
        let mut functions = FunctionRegistry::new();
        let mut types = TypeRegistry::new();
        let first = BuiltinFunction::Replace.register(&mut functions, &mut types);
        let again = BuiltinFunction::Replace.register(&mut functions, &mut types);
        assert_eq!(first, again);
        let signature = functions.get(first).unwrap().signature();
        assert_eq!(signature.params, vec![NativeType::SqlValue; 3]);
        assert_eq!(signature.ret, NativeType::SqlValue);
    }
}
