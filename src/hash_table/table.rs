//! Coalesced hash table implementation

use super::types::{
    bucket_of, EntryIndex, HashKey, HashTableError, HashTableStats, SearchCursor, BUCKET_COUNT,
};

#[derive(Debug, Clone)]
struct HashEntry<T> {
    key: HashKey,
    next: Option<EntryIndex>,
    data: Option<T>,
}

impl<T> HashEntry<T> {
    fn vacant(next: Option<EntryIndex>) -> Self {
        HashEntry {
            key: HashKey::new(0, 0),
            next,
            data: None,
        }
    }
}

/// Fixed-bucket hash table with chains stored in a shared entry array
///
/// `T` is an opaque payload, typically an index into another slab.
/// Duplicate keys are not rejected: the caller is expected to `search`
/// before it `register`s.
#[derive(Debug, Clone)]
pub struct CoalescedHashTable<T: Copy> {
    buckets: [Option<EntryIndex>; BUCKET_COUNT],
    free_head: Option<EntryIndex>,
    entries: Vec<HashEntry<T>>,
    increment: u16,
    max_capacity: u16,
    registered: usize,
    extend_count: usize,
}

impl<T: Copy> CoalescedHashTable<T> {
    /// Create a table with `initial_capacity` slots (slot 0 reserved)
    ///
    /// Slots `1..initial_capacity` form the initial free chain.
    pub fn new(
        initial_capacity: u16,
        increment: u16,
        max_capacity: u16,
    ) -> Result<Self, HashTableError> {
        if initial_capacity < 2 || initial_capacity > max_capacity || increment == 0 {
            return Err(HashTableError::InvalidCapacity {
                initial: initial_capacity,
                max: max_capacity,
            });
        }

        let mut entries = Vec::new();
        entries
            .try_reserve_exact(initial_capacity as usize)
            .map_err(|e| HashTableError::OutOfMemory(e.to_string()))?;

        // Reserved slot
        entries.push(HashEntry::vacant(None));
        Self::push_free_chain(&mut entries, 1, initial_capacity, None);

        tracing::debug!(
            capacity = initial_capacity,
            increment,
            max_capacity,
            "kernel hash table created"
        );

        Ok(CoalescedHashTable {
            buckets: [None; BUCKET_COUNT],
            free_head: Some(1),
            entries,
            increment,
            max_capacity,
            registered: 0,
            extend_count: 0,
        })
    }

    /// Append vacant slots `start..end`, each linked to the next, the last
    /// one linked to `tail`
    fn push_free_chain(
        entries: &mut Vec<HashEntry<T>>,
        start: u16,
        end: u16,
        tail: Option<EntryIndex>,
    ) {
        for index in start..end {
            let next = if index + 1 < end { Some(index + 1) } else { tail };
            entries.push(HashEntry::vacant(next));
        }
    }

    /// Number of entry slots, including slot 0
    pub fn capacity(&self) -> usize {
        self.entries.len()
    }

    /// Number of registered entries
    pub fn len(&self) -> usize {
        self.registered
    }

    pub fn is_empty(&self) -> bool {
        self.registered == 0
    }

    /// How many times the entry array has grown
    pub fn extend_count(&self) -> usize {
        self.extend_count
    }

    /// Length of the free chain
    pub fn free_count(&self) -> usize {
        let mut count = 0;
        let mut cursor = self.free_head;
        while let Some(index) = cursor {
            count += 1;
            cursor = self.entries[index as usize].next;
        }
        count
    }

    /// Grow the entry array by one increment
    ///
    /// New slots are chained together and spliced onto the front of the free
    /// list. Existing entries keep their indices. Fails once the table is at
    /// its maximum capacity.
    pub fn extend(&mut self) -> Result<(), HashTableError> {
        let old_size = self.entries.len() as u16;
        if old_size >= self.max_capacity {
            tracing::warn!(capacity = old_size, "kernel hash table cannot grow further");
            return Err(HashTableError::OutOfSpace {
                capacity: old_size,
            });
        }

        let new_size = old_size.saturating_add(self.increment).min(self.max_capacity);
        self.entries
            .try_reserve_exact((new_size - old_size) as usize)
            .map_err(|e| HashTableError::OutOfMemory(e.to_string()))?;

        Self::push_free_chain(&mut self.entries, old_size, new_size, self.free_head);
        self.free_head = Some(old_size);
        self.extend_count += 1;

        tracing::debug!(old_size, new_size, "kernel hash table extended");
        Ok(())
    }

    /// Insert a key at the head of its bucket chain
    pub fn register(
        &mut self,
        unique_id: i32,
        cache_id: i32,
        data: T,
    ) -> Result<(), HashTableError> {
        if self.free_head.is_none() {
            self.extend()?;
        }
        let index = self.free_head.ok_or(HashTableError::OutOfSpace {
            capacity: self.entries.len() as u16,
        })?;

        let bucket = bucket_of(unique_id);
        let entry = &mut self.entries[index as usize];
        self.free_head = entry.next;
        entry.key = HashKey::new(unique_id, cache_id);
        entry.data = Some(data);
        entry.next = self.buckets[bucket];
        self.buckets[bucket] = Some(index);
        self.registered += 1;

        tracing::trace!(unique_id, cache_id, index, bucket, "hash register");
        Ok(())
    }

    /// Remove the first entry matching the key and return its payload
    ///
    /// A negative `cache_id` removes the first entry with `unique_id`,
    /// whatever its cache id.
    pub fn unregister(&mut self, unique_id: i32, cache_id: i32) -> Option<T> {
        let key = HashKey::new(unique_id, cache_id);
        let bucket = bucket_of(unique_id);

        let mut prev: Option<EntryIndex> = None;
        let mut cursor = self.buckets[bucket];
        while let Some(index) = cursor {
            let next = self.entries[index as usize].next;
            if key.matches(&self.entries[index as usize].key) {
                match prev {
                    Some(p) => self.entries[p as usize].next = next,
                    None => self.buckets[bucket] = next,
                }

                let entry = &mut self.entries[index as usize];
                let data = entry.data.take();
                entry.next = self.free_head;
                self.free_head = Some(index);
                self.registered -= 1;

                tracing::trace!(unique_id, cache_id, index, "hash unregister");
                return data;
            }
            prev = Some(index);
            cursor = next;
        }
        None
    }

    /// Find the next entry matching the key
    ///
    /// Pass `SearchCursor::Start` for a fresh search. On a hit the cursor
    /// is left pointing at the match, so calling again with the same cursor
    /// yields the next match in the chain. Returns `None` (and an exhausted
    /// cursor) once no further entry matches.
    pub fn search(&self, unique_id: i32, cache_id: i32, cursor: &mut SearchCursor) -> Option<T> {
        let key = HashKey::new(unique_id, cache_id);
        let mut walk = match *cursor {
            SearchCursor::Start => self.buckets[bucket_of(unique_id)],
            SearchCursor::After(index) => self
                .entries
                .get(index as usize)
                .and_then(|entry| entry.next),
            SearchCursor::Exhausted => None,
        };

        while let Some(index) = walk {
            let entry = &self.entries[index as usize];
            if key.matches(&entry.key) {
                if let Some(data) = entry.data {
                    *cursor = SearchCursor::After(index);
                    return Some(data);
                }
            }
            walk = entry.next;
        }

        *cursor = SearchCursor::Exhausted;
        None
    }

    /// Fresh single-shot lookup
    pub fn get(&self, unique_id: i32, cache_id: i32) -> Option<T> {
        self.search(unique_id, cache_id, &mut SearchCursor::Start)
    }

    /// Every payload matching the key, in chain order
    pub fn search_all(&self, unique_id: i32, cache_id: i32) -> Vec<T> {
        let mut cursor = SearchCursor::Start;
        std::iter::from_fn(|| self.search(unique_id, cache_id, &mut cursor)).collect()
    }

    /// Drop every entry but keep the current capacity
    pub fn clear(&mut self) {
        let size = self.entries.len() as u16;
        self.entries.clear();
        self.entries.push(HashEntry::vacant(None));
        Self::push_free_chain(&mut self.entries, 1, size, None);
        self.buckets = [None; BUCKET_COUNT];
        self.free_head = if size > 1 { Some(1) } else { None };
        self.registered = 0;
    }

    pub fn stats(&self) -> HashTableStats {
        let mut longest_chain = 0;
        let mut used_buckets = 0;
        for head in self.buckets.iter() {
            let mut length = 0;
            let mut cursor = *head;
            while let Some(index) = cursor {
                length += 1;
                cursor = self.entries[index as usize].next;
            }
            if length > 0 {
                used_buckets += 1;
            }
            longest_chain = longest_chain.max(length);
        }

        HashTableStats {
            capacity: self.capacity(),
            registered: self.registered,
            free: self.free_count(),
            extend_count: self.extend_count,
            longest_chain,
            used_buckets,
        }
    }
}
