//! Generic hash table with chained buckets and stepwise growth.
//!
//! Entries live in one flat vector and each bucket holds the index of the
//! first entry in its chain; chains are threaded through the entries' `next`
//! indices. Rehashing therefore only rewrites indices and never moves a key or
//! value. Bucket counts follow a fixed sequence of "power of two minus a small
//! delta" sizes, one step at a time.

use snafu::Snafu;
use std::borrow::Borrow;

/// Differences between each power of two and the largest prime below it.
const DELTA: [usize; 32] = [
  0, 0, 1, 1, 3, 1, 3, 1, 5, 3, 3, 9, 3, 1, 3, 19, 15, 1, 5, 1, 3, 9, 3, 15, 3, 39, 5, 39, 57, 3,
  35, 1,
];

/// Growth step every new table starts at.
pub const INITIAL_STEP: usize = 4;

/// Last step of the growth sequence; past this the load factor is allowed to climb.
pub const MAX_STEP: usize = DELTA.len() - 1;

/// Bucket count for a given step of the growth sequence.
pub fn growth_size(step: usize) -> usize {
  (1usize << step) - DELTA[step]
}

#[derive(Debug, Snafu, Clone, Copy, PartialEq, Eq)]
pub enum TableError {
  #[snafu(display("key is already present in the table"))]
  DuplicateKey,
  #[snafu(display("could not allocate {what}"))]
  AllocationFailure { what: &'static str },
}

/// Maps a key onto one of `size` buckets.
pub trait KeyHasher<K: ?Sized> {
  fn bucket(&self, key: &K, size: usize) -> usize;
}

/// Rotate-and-add string hash: the accumulator is rotated left by five bits
/// before each byte is added.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShiftHash;

impl KeyHasher<str> for ShiftHash {
  fn bucket(&self, key: &str, size: usize) -> usize {
    let hash = key
      .bytes()
      .fold(0u32, |hash, byte| hash.rotate_left(5).wrapping_add(u32::from(byte)));
    hash as usize % size
  }
}

impl KeyHasher<String> for ShiftHash {
  fn bucket(&self, key: &String, size: usize) -> usize {
    <Self as KeyHasher<str>>::bucket(self, key.as_str(), size)
  }
}

#[derive(Debug)]
struct Entry<K, V> {
  key: K,
  value: V,
  next: Option<usize>,
}

#[derive(Debug)]
pub struct HashTable<K, V, H = ShiftHash> {
  buckets: Vec<Option<usize>>,
  entries: Vec<Entry<K, V>>,
  max_load_factor: f32,
  step: usize,
  /// Growths skipped because the larger bucket array could not be allocated.
  stalled_growths: usize,
  hasher: H,
}

impl<K, V, H> HashTable<K, V, H> {
  /// Allocate an empty table sized to the first step of the growth sequence.
  pub fn new(max_load_factor: f32, hasher: H) -> Result<Self, TableError> {
    let buckets = bucket_array(growth_size(INITIAL_STEP))?;
    Ok(Self {
      buckets,
      entries: Vec::new(),
      max_load_factor,
      step: INITIAL_STEP,
      stalled_growths: 0,
      hasher,
    })
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  pub fn bucket_count(&self) -> usize {
    self.buckets.len()
  }

  pub fn growth_step(&self) -> usize {
    self.step
  }

  pub fn stalled_growths(&self) -> usize {
    self.stalled_growths
  }

  pub fn max_load_factor(&self) -> f32 {
    self.max_load_factor
  }

  pub fn load_factor(&self) -> f32 {
    self.entries.len() as f32 / self.buckets.len() as f32
  }

  /// Visit every live entry, bucket by bucket, following each chain.
  pub fn for_each(&self, mut visit: impl FnMut(&K, &V)) {
    for head in &self.buckets {
      let mut cursor = *head;
      while let Some(index) = cursor {
        let entry = &self.entries[index];
        visit(&entry.key, &entry.value);
        cursor = entry.next;
      }
    }
  }

  /// Render the bucket layout, one line per bucket, using `describe` for each entry.
  pub fn dump(&self, describe: impl Fn(&K, &V) -> String) -> String {
    let mut out = String::new();
    for (bucket, head) in self.buckets.iter().enumerate() {
      out.push_str(&format!("bucket[{bucket:2}]"));
      let mut cursor = *head;
      while let Some(index) = cursor {
        let entry = &self.entries[index];
        out.push_str(&format!(" --> {}", describe(&entry.key, &entry.value)));
        cursor = entry.next;
      }
      out.push_str(" --> NULL\n");
    }
    out
  }

  /// Tear the table down, handing every key and value to its destructor
  /// exactly once. Bucket and entry storage is released afterwards.
  pub fn free(self, mut free_key: impl FnMut(K), mut free_value: impl FnMut(V)) {
    let mut slots: Vec<Option<Entry<K, V>>> = self.entries.into_iter().map(Some).collect();
    for head in &self.buckets {
      let mut cursor = *head;
      while let Some(index) = cursor {
        let Some(entry) = slots[index].take() else {
          break;
        };
        cursor = entry.next;
        free_key(entry.key);
        free_value(entry.value);
      }
    }
  }
}

impl<K: Eq, V, H: KeyHasher<K>> HashTable<K, V, H> {
  /// Insert a new key. An existing key is left untouched and reported as a duplicate.
  pub fn insert(&mut self, key: K, value: V) -> Result<(), TableError> {
    if self.position(&key).is_some() {
      return Err(TableError::DuplicateKey);
    }

    self
      .entries
      .try_reserve(1)
      .map_err(|_| TableError::AllocationFailure { what: "table entry" })?;

    let projected = (self.entries.len() + 1) as f32 / self.buckets.len() as f32;
    if projected > self.max_load_factor && self.step < MAX_STEP {
      // Growth is best effort: when the larger bucket array cannot be
      // allocated the current chains stay valid and only get longer.
      if let Err(TableError::AllocationFailure { .. }) = self.rehash() {
        self.stalled_growths += 1;
      }
    }

    let bucket = self.hasher.bucket(&key, self.buckets.len());
    let index = self.entries.len();
    self.entries.push(Entry {
      key,
      value,
      next: self.buckets[bucket],
    });
    self.buckets[bucket] = Some(index);
    Ok(())
  }

  /// Move to the next size of the growth sequence and relink every chain.
  fn rehash(&mut self) -> Result<(), TableError> {
    let step = self.step + 1;
    self.relink(step, growth_size(step))
  }

  /// Relink every entry into `size` fresh buckets. Nothing changes unless the
  /// new bucket array could be allocated.
  fn relink(&mut self, step: usize, size: usize) -> Result<(), TableError> {
    let mut buckets = bucket_array(size)?;

    for index in 0..self.entries.len() {
      let bucket = self.hasher.bucket(&self.entries[index].key, size);
      self.entries[index].next = buckets[bucket];
      buckets[bucket] = Some(index);
    }

    self.buckets = buckets;
    self.step = step;
    Ok(())
  }
}

impl<K, V, H> HashTable<K, V, H> {
  /// Look a key up, walking only the chain of its bucket.
  pub fn search<Q>(&self, key: &Q) -> Option<&V>
  where
    K: Borrow<Q>,
    Q: Eq + ?Sized,
    H: KeyHasher<Q>,
  {
    self.position(key).map(|index| &self.entries[index].value)
  }

  pub fn contains<Q>(&self, key: &Q) -> bool
  where
    K: Borrow<Q>,
    Q: Eq + ?Sized,
    H: KeyHasher<Q>,
  {
    self.position(key).is_some()
  }

  fn position<Q>(&self, key: &Q) -> Option<usize>
  where
    K: Borrow<Q>,
    Q: Eq + ?Sized,
    H: KeyHasher<Q>,
  {
    let mut cursor = self.buckets[self.hasher.bucket(key, self.buckets.len())];
    while let Some(index) = cursor {
      let entry = &self.entries[index];
      if entry.key.borrow() == key {
        return Some(index);
      }
      cursor = entry.next;
    }
    None
  }
}

/// Look a key up in a table that may not exist.
pub fn search_in<'t, K, V, H, Q>(
  table: Option<&'t HashTable<K, V, H>>,
  key: Option<&Q>,
) -> Option<&'t V>
where
  K: Borrow<Q>,
  Q: Eq + ?Sized,
  H: KeyHasher<Q>,
{
  table?.search(key?)
}

fn bucket_array(size: usize) -> Result<Vec<Option<usize>>, TableError> {
  let mut buckets = Vec::new();
  buckets
    .try_reserve_exact(size)
    .map_err(|_| TableError::AllocationFailure { what: "bucket array" })?;
  buckets.resize(size, None);
  Ok(buckets)
}
