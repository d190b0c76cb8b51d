//! Type conversion registry
//!
//! Every native type that crosses the stack implements [`LuaPush`] (native
//! to runtime) and/or [`LuaGet`] (runtime to native). Dispatch is resolved
//! at compile time through these traits.
//!
//! Type tests come in two strengths: `strict_check_type` requires the exact
//! type tag, `check_type` also accepts values the runtime would convert
//! (numeric strings for numbers, numbers for strings, nil for references).

use crate::error::{LuaError, Result};
use crate::lua::{LuaState, ValueType};

/// Push a native value onto the stack
pub trait LuaPush {
    /// Push `self` and return how many stack slots were pushed
    fn push(&self, state: &LuaState) -> Result<usize>;
}

/// Read a native value from a stack slot
pub trait LuaGet: Sized {
    /// Exact type tag match
    fn strict_check_type(state: &LuaState, index: i32) -> bool;

    /// Tag match or a value the runtime converts
    fn check_type(state: &LuaState, index: i32) -> bool;

    /// Convert the value at `index`
    fn get(state: &LuaState, index: i32) -> Result<Self>;
}

/// Argument lists for calls
pub trait LuaArgs {
    /// Push every argument, returning how many slots were used
    fn push_args(&self, state: &LuaState) -> Result<usize>;
}

pub(crate) fn mismatch(state: &LuaState, index: i32, expected: &str) -> LuaError {
    LuaError::type_mismatch(format!("{} expected, got {}", expected, state.type_name_at(index)))
}

/// Push exactly one value: pad with nil or drop extras
pub(crate) fn push_single<T: LuaPush + ?Sized>(value: &T, state: &LuaState) -> Result<()> {
    match value.push(state)? {
        0 => state.push_nil(),
        1 => Ok(()),
        n => state.pop(n - 1),
    }
}

impl<T: LuaPush + ?Sized> LuaPush for &T {
    fn push(&self, state: &LuaState) -> Result<usize> {
        (**self).push(state)
    }
}

impl LuaPush for () {
    fn push(&self, _state: &LuaState) -> Result<usize> {
        Ok(0)
    }
}

impl LuaGet for () {
    fn strict_check_type(_state: &LuaState, _index: i32) -> bool {
        true
    }

    fn check_type(_state: &LuaState, _index: i32) -> bool {
        true
    }

    fn get(_state: &LuaState, _index: i32) -> Result<Self> {
        Ok(())
    }
}

impl LuaPush for bool {
    fn push(&self, state: &LuaState) -> Result<usize> {
        state.push_boolean(*self)?;
        Ok(1)
    }
}

impl LuaGet for bool {
    fn strict_check_type(state: &LuaState, index: i32) -> bool {
        state.type_at(index) == ValueType::Boolean
    }

    // Every value has a truth value
    fn check_type(state: &LuaState, index: i32) -> bool {
        state.type_at(index) != ValueType::None
    }

    fn get(state: &LuaState, index: i32) -> Result<Self> {
        Ok(state.to_boolean(index))
    }
}

macro_rules! impl_float {
    ($($t:ty),*) => {
        $(
            impl LuaPush for $t {
                fn push(&self, state: &LuaState) -> Result<usize> {
                    state.push_number(*self as f64)?;
                    Ok(1)
                }
            }

            impl LuaGet for $t {
                fn strict_check_type(state: &LuaState, index: i32) -> bool {
                    state.type_at(index) == ValueType::Number
                }

                fn check_type(state: &LuaState, index: i32) -> bool {
                    state.is_number(index)
                }

                fn get(state: &LuaState, index: i32) -> Result<Self> {
                    state
                        .to_number(index)
                        .map(|n| n as $t)
                        .ok_or_else(|| mismatch(state, index, "number"))
                }
            }
        )*
    };
}

impl_float!(f32, f64);

/// Integral number in the range of `$t`
macro_rules! impl_integer {
    ($($t:ty),*) => {
        $(
            impl LuaPush for $t {
                fn push(&self, state: &LuaState) -> Result<usize> {
                    state.push_number(*self as f64)?;
                    Ok(1)
                }
            }

            impl LuaGet for $t {
                fn strict_check_type(state: &LuaState, index: i32) -> bool {
                    state.type_at(index) == ValueType::Number
                        && state.to_number(index).map_or(false, |n| integer_in_range(n, <$t>::MIN as f64, <$t>::MAX as f64))
                }

                fn check_type(state: &LuaState, index: i32) -> bool {
                    state.is_number(index)
                }

                fn get(state: &LuaState, index: i32) -> Result<Self> {
                    let n = state
                        .to_number(index)
                        .ok_or_else(|| mismatch(state, index, "number"))?
                        .trunc();
                    if n < <$t>::MIN as f64 || n > <$t>::MAX as f64 {
                        return Err(LuaError::type_mismatch(format!(
                            "number {} out of range for {}",
                            n,
                            stringify!($t)
                        )));
                    }
                    Ok(n as $t)
                }
            }
        )*
    };
}

fn integer_in_range(n: f64, min: f64, max: f64) -> bool {
    n.fract() == 0.0 && n >= min && n <= max
}

impl_integer!(i8, i16, i32, i64, isize, u8, u16, u32, u64, usize);

impl LuaPush for str {
    fn push(&self, state: &LuaState) -> Result<usize> {
        state.push_string(self)?;
        Ok(1)
    }
}

impl LuaPush for String {
    fn push(&self, state: &LuaState) -> Result<usize> {
        self.as_str().push(state)
    }
}

impl LuaGet for String {
    fn strict_check_type(state: &LuaState, index: i32) -> bool {
        state.type_at(index) == ValueType::String
    }

    fn check_type(state: &LuaState, index: i32) -> bool {
        state.is_string(index)
    }

    fn get(state: &LuaState, index: i32) -> Result<Self> {
        state.to_str(index).ok_or_else(|| mismatch(state, index, "string"))
    }
}

/// `None` is nil
impl<T: LuaPush> LuaPush for Option<T> {
    fn push(&self, state: &LuaState) -> Result<usize> {
        match self {
            Some(value) => value.push(state),
            None => {
                state.push_nil()?;
                Ok(1)
            }
        }
    }
}

impl<T: LuaGet> LuaGet for Option<T> {
    fn strict_check_type(state: &LuaState, index: i32) -> bool {
        state.type_at(index).is_none_or_nil() || T::strict_check_type(state, index)
    }

    fn check_type(state: &LuaState, index: i32) -> bool {
        state.type_at(index).is_none_or_nil() || T::check_type(state, index)
    }

    fn get(state: &LuaState, index: i32) -> Result<Self> {
        if state.type_at(index).is_none_or_nil() {
            Ok(None)
        } else {
            T::get(state, index).map(Some)
        }
    }
}

impl LuaArgs for () {
    fn push_args(&self, _state: &LuaState) -> Result<usize> {
        Ok(0)
    }
}

macro_rules! impl_args_tuple {
    ($($name:ident),+) => {
        impl<$($name: LuaPush),+> LuaArgs for ($($name,)+) {
            #[allow(non_snake_case)]
            fn push_args(&self, state: &LuaState) -> Result<usize> {
                let ($($name,)+) = self;
                let mut count = 0;
                $(
                    push_single($name, state)?;
                    count += 1;
                )+
                Ok(count)
            }
        }
    };
}

impl_args_tuple!(A);
impl_args_tuple!(A, B);
impl_args_tuple!(A, B, C);
impl_args_tuple!(A, B, C, D);
impl_args_tuple!(A, B, C, D, E);
impl_args_tuple!(A, B, C, D, E, F);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BindConfig;

    fn state() -> LuaState {
        LuaState::with_config(BindConfig::default())
    }

    #[test]
    fn test_integer_checks() {
        let l = state();
        l.push_number(3.0).unwrap();
        l.push_number(3.5).unwrap();
        l.push_number(-1.0).unwrap();
        l.push_string("12").unwrap();

        assert!(i32::strict_check_type(&l, 1));
        assert!(!i32::strict_check_type(&l, 2));
        assert!(i32::check_type(&l, 2));
        assert!(!u32::strict_check_type(&l, 3));
        assert!(!i32::strict_check_type(&l, 4));
        assert!(i32::check_type(&l, 4));

        assert_eq!(i32::get(&l, 2).unwrap(), 3);
        assert_eq!(i64::get(&l, 4).unwrap(), 12);
        assert!(u8::get(&l, 3).unwrap_err().is_type_mismatch());
    }

    #[test]
    fn test_string_checks() {
        let l = state();
        l.push_number(7.0).unwrap();
        l.push_boolean(true).unwrap();
        assert!(!String::strict_check_type(&l, 1));
        assert!(String::check_type(&l, 1));
        assert_eq!(String::get(&l, 1).unwrap(), "7");
        assert!(String::get(&l, 2).unwrap_err().is_type_mismatch());
    }

    #[test]
    fn test_option_nil() {
        let l = state();
        assert_eq!(None::<i32>.push(&l).unwrap(), 1);
        assert_eq!(Option::<i32>::get(&l, -1).unwrap(), None);
        assert!(Option::<i32>::strict_check_type(&l, -1));
        Some(4i32).push(&l).unwrap();
        assert_eq!(Option::<i32>::get(&l, -1).unwrap(), Some(4));
        // Above the top counts as nil
        assert_eq!(Option::<String>::get(&l, 10).unwrap(), None);
    }

    #[test]
    fn test_bool_truthiness() {
        let l = state();
        l.push_number(0.0).unwrap();
        assert!(!bool::strict_check_type(&l, 1));
        assert!(bool::check_type(&l, 1));
        assert!(bool::get(&l, 1).unwrap());
    }

    #[test]
    fn test_args_tuple() {
        let l = state();
        let n = (1, "two", 3.5, Some(true)).push_args(&l).unwrap();
        assert_eq!(n, 4);
        assert_eq!(l.get_top(), 4);
        assert_eq!(l.type_at(2), ValueType::String);
        assert_eq!(().push_args(&l).unwrap(), 0);
    }
}
