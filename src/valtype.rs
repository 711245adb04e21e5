//! Value types as a bitmask of four orthogonal flags.
//!
//! A scalar entity carries exactly one of `BOOLEAN` or `INTEGER`, optionally
//! combined with `ARRAY`. A callable additionally carries `CALLABLE`; its
//! remaining bits describe what it returns, so a bare `CALLABLE` is a procedure.

use std::fmt;
use std::ops::BitOr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ValType(u8);

impl ValType {
  pub const NONE: ValType = ValType(0);
  pub const ARRAY: ValType = ValType(1);
  pub const BOOLEAN: ValType = ValType(2);
  pub const INTEGER: ValType = ValType(4);
  pub const CALLABLE: ValType = ValType(8);

  const SCALARS: u8 = Self::BOOLEAN.0 | Self::INTEGER.0;

  pub fn bits(self) -> u8 {
    self.0
  }

  pub fn is_none(self) -> bool {
    self.0 == 0
  }

  /// An array-valued variable or parameter, never a callable returning one.
  pub fn is_array(self) -> bool {
    self.is_array_type() && !self.is_callable()
  }

  pub fn is_array_type(self) -> bool {
    self.0 & Self::ARRAY.0 != 0
  }

  pub fn is_boolean_type(self) -> bool {
    self.0 & Self::BOOLEAN.0 != 0
  }

  pub fn is_integer_type(self) -> bool {
    self.0 & Self::INTEGER.0 != 0
  }

  pub fn is_callable(self) -> bool {
    self.0 & Self::CALLABLE.0 != 0
  }

  pub fn is_procedure(self) -> bool {
    self.is_callable() && self.0 & Self::SCALARS == 0
  }

  pub fn is_function(self) -> bool {
    self.is_callable() && !self.is_procedure()
  }

  /// Variables and parameters: the entities that occupy a frame slot.
  pub fn is_variable(self) -> bool {
    !self.is_callable() && self.0 & Self::SCALARS != 0
  }

  pub fn is_scalar(self) -> bool {
    self.is_variable() && !self.is_array_type()
  }

  pub fn as_array(self) -> Self {
    Self(self.0 | Self::ARRAY.0)
  }

  pub fn as_callable(self) -> Self {
    Self(self.0 | Self::CALLABLE.0)
  }

  /// Element type of an array type.
  pub fn base_type(self) -> Self {
    Self(self.0 & !Self::ARRAY.0)
  }

  /// What a callable returns; `NONE` for a procedure.
  pub fn return_type(self) -> Self {
    Self(self.0 & !Self::CALLABLE.0)
  }
}

impl BitOr for ValType {
  type Output = ValType;

  fn bitor(self, rhs: ValType) -> ValType {
    ValType(self.0 | rhs.0)
  }
}

impl fmt::Display for ValType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if self.is_procedure() {
      return f.write_str("procedure");
    }

    let base = if self.is_boolean_type() {
      "boolean"
    } else if self.is_integer_type() {
      "integer"
    } else {
      return f.write_str("none");
    };
    f.write_str(base)?;
    if self.is_array_type() {
      f.write_str(" array")?;
    }
    if self.is_callable() {
      f.write_str(" function")?;
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn callables_split_into_functions_and_procedures() {
    let procedure = ValType::NONE.as_callable();
    let function = ValType::INTEGER.as_callable();

    assert!(procedure.is_procedure());
    assert!(!procedure.is_function());
    assert!(function.is_function());
    assert!(!function.is_variable());
    assert_eq!(function.return_type(), ValType::INTEGER);
    assert_eq!(procedure.return_type(), ValType::NONE);
  }

  #[test]
  fn arrays_keep_their_element_type() {
    let ty = ValType::BOOLEAN.as_array();
    assert!(ty.is_array());
    assert!(ty.is_variable());
    assert!(!ty.is_scalar());
    assert_eq!(ty.base_type(), ValType::BOOLEAN);

    let returns_array = ty.as_callable();
    assert!(!returns_array.is_array());
    assert!(returns_array.is_array_type());
  }

  #[test]
  fn display_names() {
    assert_eq!(ValType::INTEGER.to_string(), "integer");
    assert_eq!(ValType::BOOLEAN.as_array().to_string(), "boolean array");
    assert_eq!(ValType::CALLABLE.to_string(), "procedure");
    assert_eq!((ValType::INTEGER | ValType::CALLABLE).to_string(), "integer function");
    assert_eq!(ValType::NONE.to_string(), "none");
  }
}
