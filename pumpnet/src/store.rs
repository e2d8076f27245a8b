//! Storage for socket state.
//!
//! This module provides [`SlotStore`], a bounded arena that owns the state of
//! every open socket. Sockets and the native stack refer to entries through a
//! [`Token`] instead of a pointer, so an event that arrives for a socket that
//! has already been released is detected and dropped.
//!
//! # Design
//!
//! Each token is composed of:
//! - **Slot**: The location in the underlying Vec (low 32 bits)
//! - **Generation**: A counter to detect stale references (high 32 bits)
//!
//! When a slot is freed and reused, its generation is incremented. Old tokens
//! referring to the same slot are then rejected (ABA protection).

use std::{collections::VecDeque, fmt};

/// Opaque identifier handed to the native stack in place of a pointer.
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct Token(u64);

impl Token {
  /// Packs generation and slot into a single token.
  fn new(slot: u32, generation: u32) -> Self {
    Token(((generation as u64) << 32) | (slot as u64))
  }

  fn slot(self) -> u32 {
    (self.0 & 0xFFFF_FFFF) as u32
  }

  fn generation(self) -> u32 {
    (self.0 >> 32) as u32
  }
}

impl fmt::Debug for Token {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "Token({}v{})", self.slot(), self.generation())
  }
}

struct Slot<T> {
  /// Incremented each time the slot is released.
  generation: u32,
  entry: Option<T>,
}

/// Generational arena with a fixed capacity.
pub struct SlotStore<T> {
  slots: Vec<Slot<T>>,
  free_list: VecDeque<u32>,
  capacity: u32,
  len: usize,
}

impl<T> SlotStore<T> {
  /// Creates a store holding at most `cap` entries.
  pub fn with_capacity(cap: usize) -> Self {
    let capacity = cap.min(u32::MAX as usize) as u32;
    Self {
      slots: Vec::with_capacity(capacity as usize),
      free_list: VecDeque::with_capacity(cap),
      capacity,
      len: 0,
    }
  }

  pub fn capacity(&self) -> usize {
    self.capacity as usize
  }

  pub fn len(&self) -> usize {
    self.len
  }

  pub fn is_empty(&self) -> bool {
    self.len == 0
  }

  /// Inserts `value`, returning its token, or `None` when the store is full.
  pub fn try_insert(&mut self, value: T) -> Option<Token> {
    let slot_idx = match self.free_list.pop_front() {
      Some(idx) => idx,
      None if (self.slots.len() as u32) < self.capacity => {
        self.slots.push(Slot { generation: 0, entry: None });
        self.slots.len() as u32 - 1
      }
      None => return None,
    };

    let slot = &mut self.slots[slot_idx as usize];
    debug_assert!(
      slot.entry.is_none(),
      "SlotStore: slot {} should be empty",
      slot_idx
    );
    slot.entry = Some(value);
    self.len += 1;

    Some(Token::new(slot_idx, slot.generation))
  }

  /// Removes and returns the entry, or `None` for an unknown or stale token.
  pub fn remove(&mut self, token: Token) -> Option<T> {
    let slot = self.slots.get_mut(token.slot() as usize)?;

    if slot.generation != token.generation() {
      return None;
    }

    let value = slot.entry.take()?;
    slot.generation = slot.generation.wrapping_add(1);
    self.free_list.push_back(token.slot());
    self.len -= 1;
    Some(value)
  }

  pub fn get(&self, token: Token) -> Option<&T> {
    let slot = self.slots.get(token.slot() as usize)?;
    if slot.generation == token.generation() { slot.entry.as_ref() } else { None }
  }

  pub fn get_mut(&mut self, token: Token) -> Option<&mut T> {
    let slot = self.slots.get_mut(token.slot() as usize)?;
    if slot.generation == token.generation() { slot.entry.as_mut() } else { None }
  }

  pub fn contains(&self, token: Token) -> bool {
    self.get(token).is_some()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::collections::HashSet;

  #[test]
  fn test_basic_insert_and_remove() {
    let mut store = SlotStore::with_capacity(8);
    let token = store.try_insert(7u8).unwrap();

    assert_eq!(store.remove(token), Some(7));
    assert_eq!(store.remove(token), None); // Second remove should fail
    assert!(store.is_empty());
  }

  #[test]
  fn test_tokens_are_unique() {
    let mut store = SlotStore::with_capacity(1000);
    let mut tokens = HashSet::new();

    for i in 0..1000 {
      let token = store.try_insert(i).unwrap();
      assert!(tokens.insert(token), "Generated duplicate token: {:?}", token);
    }
    assert_eq!(store.len(), 1000);
  }

  #[test]
  fn test_slot_reuse_increments_generation() {
    let mut store = SlotStore::with_capacity(8);

    let t1 = store.try_insert(()).unwrap();
    assert_eq!(t1.generation(), 0);
    assert_eq!(t1.slot(), 0);

    store.remove(t1);

    let t2 = store.try_insert(()).unwrap();
    assert_eq!(t2.slot(), 0, "Slot should be reused");
    assert_eq!(t2.generation(), 1, "Generation should increment");
  }

  #[test]
  fn test_stale_token_rejected() {
    let mut store = SlotStore::with_capacity(8);

    let t1 = store.try_insert("old").unwrap();
    store.remove(t1);
    let t2 = store.try_insert("new").unwrap();

    assert!(store.get(t1).is_none(), "Stale token should return None");
    assert!(store.get_mut(t1).is_none());
    assert!(store.remove(t1).is_none());
    assert_eq!(store.get(t2), Some(&"new"));
  }

  #[test]
  fn test_capacity_limit() {
    let mut store = SlotStore::with_capacity(4);

    let tokens: Vec<_> =
      (0..4).map(|i| store.try_insert(i).unwrap()).collect();
    assert!(store.try_insert(4).is_none(), "Should refuse when full");

    store.remove(tokens[0]);
    assert!(store.try_insert(5).is_some());
  }
}
