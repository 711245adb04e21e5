//! Two-level symbol table: the global scope plus at most one subroutine scope.
//!
//! While a subroutine body is compiled its local scope is active and the
//! global scope is parked in `saved`. Lookups fall back to the parked scope
//! only for callables, so a subroutine sees the subroutines declared before
//! it but none of main's variables.

use crate::hashtable::{HashTable, ShiftHash, TableError};
use crate::valtype::ValType;

/// Load factor at which a scope's table grows.
pub const MAX_LOAD_FACTOR: f32 = 0.75;

/// Slot 0 of main's frame holds the JVM argument array.
const GLOBAL_FIRST_OFFSET: usize = 1;
const LOCAL_FIRST_OFFSET: usize = 0;

/// Everything the compiler records about a declared name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdProps {
  pub ty: ValType,
  /// Frame slot, meaningful only for variables and parameters.
  pub offset: usize,
  /// Parameter types in declaration order, meaningful only for callables.
  pub params: Vec<ValType>,
}

impl IdProps {
  pub fn variable(ty: ValType) -> Self {
    Self {
      ty,
      offset: 0,
      params: Vec::new(),
    }
  }

  /// A subroutine returning `return_type`; `ValType::NONE` makes it a procedure.
  pub fn callable(return_type: ValType, params: Vec<ValType>) -> Self {
    Self {
      ty: return_type.as_callable(),
      offset: 0,
      params,
    }
  }

  pub fn nparams(&self) -> usize {
    self.params.len()
  }
}

#[derive(Debug)]
struct Scope {
  names: HashTable<String, IdProps>,
  next_offset: usize,
}

impl Scope {
  fn new(first_offset: usize) -> Result<Self, TableError> {
    Ok(Self {
      names: HashTable::new(MAX_LOAD_FACTOR, ShiftHash)?,
      next_offset: first_offset,
    })
  }

  fn release(self) {
    self.names.free(drop, drop);
  }
}

#[derive(Debug)]
pub struct SymbolTable {
  active: Scope,
  saved: Option<Scope>,
}

impl SymbolTable {
  pub fn new() -> Result<Self, TableError> {
    Ok(Self {
      active: Scope::new(GLOBAL_FIRST_OFFSET)?,
      saved: None,
    })
  }

  pub fn in_subroutine(&self) -> bool {
    self.saved.is_some()
  }

  /// Declare `name` in the active scope, then make a fresh local scope active.
  pub fn open_subroutine(&mut self, name: &str, props: IdProps) -> Result<(), TableError> {
    debug_assert!(self.saved.is_none(), "subroutines do not nest");
    self.declare(name, props)?;
    let local = Scope::new(LOCAL_FIRST_OFFSET)?;
    self.saved = Some(std::mem::replace(&mut self.active, local));
    Ok(())
  }

  /// Drop the local scope and reactivate the global one. Does nothing outside a subroutine.
  pub fn close_subroutine(&mut self) {
    if let Some(outer) = self.saved.take() {
      std::mem::replace(&mut self.active, outer).release();
    }
  }

  /// Declare `name` in the active scope and return the frame offset it was given.
  /// Only a name already in the active scope counts as a duplicate.
  pub fn declare(&mut self, name: &str, mut props: IdProps) -> Result<usize, TableError> {
    let offset = self.active.next_offset;
    let occupies_slot = props.ty.is_variable();
    props.offset = offset;
    self.active.names.insert(name.to_string(), props)?;
    if occupies_slot {
      self.active.next_offset += 1;
    }
    Ok(offset)
  }

  pub fn resolve(&self, name: &str) -> Option<&IdProps> {
    self.active.names.search(name).or_else(|| {
      self
        .saved
        .as_ref()
        .and_then(|outer| outer.names.search(name))
        .filter(|props| props.ty.is_callable())
    })
  }

  /// Number of frame slots used so far by the active scope.
  pub fn frame_width(&self) -> usize {
    self.active.next_offset
  }

  /// Release every remaining scope.
  pub fn teardown(self) {
    self.active.release();
    if let Some(outer) = self.saved {
      outer.release();
    }
  }

  /// Bucket-by-bucket listing of the active scope.
  pub fn dump(&self) -> String {
    self.active.names.dump(|name, props| {
      if props.ty.is_callable() {
        format!("{name}@_[{}]", props.ty)
      } else {
        format!("{name}@{}[{}]", props.offset, props.ty)
      }
    })
  }
}
