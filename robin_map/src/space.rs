//! A single open-addressed probing space and the table primitives that
//! operate on it.
//!
//! A [`Space`] is one power-of-two bucket array together with the metadata
//! needed to probe it: the index mask and shift, the probe ceiling, and the
//! running maximum probe length. The map layered on top holds up to two
//! spaces at a time while a resize migration is in flight.

/// Multiplier for Fibonacci indexing, `floor(2^32 / phi)`.
const FIB32: u32 = 2654435769;

/// Width of a key in bits; index shifts are taken relative to this.
pub(crate) const KEY_BITS: u32 = 32;

/// Maps a key to its home slot in a space with the given shift.
///
/// The XOR fold diffuses the low bits into the high bits before the
/// Fibonacci multiply, and the shift keeps the top `log2_size` bits, so the
/// result is already in range without masking.
#[inline]
pub(crate) fn home_index(key: u32, shift: u32) -> u32 {
    (key ^ (key >> shift)).wrapping_mul(FIB32) >> shift
}

/// A single bucket of a probing space.
///
/// Live entries expose their key, their value and their probe length. The
/// all-zero entry doubles as the empty sentinel.
#[derive(Clone, Copy, Default, PartialEq, Eq, Debug)]
pub struct Entry {
    pub(crate) key: u32,
    pub(crate) value: i32,
    pub(crate) offset: u32,
    pub(crate) inuse: bool,
}

impl Entry {
    /// Returns the entry's key.
    #[inline]
    pub fn key(&self) -> u32 {
        self.key
    }

    /// Returns the entry's value.
    #[inline]
    pub fn value(&self) -> i32 {
        self.value
    }

    /// Returns a mutable reference to the entry's value.
    #[inline]
    pub fn value_mut(&mut self) -> &mut i32 {
        &mut self.value
    }

    /// Returns the entry's probe length: the distance, in slots, from the
    /// slot its key hashes to.
    #[inline]
    pub fn offset(&self) -> u32 {
        self.offset
    }
}

/// One bucket array plus its probing metadata.
///
/// The bucket storage is allocated lazily by the first insertion and dropped
/// when the space is retired, so an idle space costs a few words.
pub(crate) struct Space {
    pub(crate) buckets: Option<Box<[Entry]>>,
    pub(crate) log2_size: u32,
    pub(crate) size: u32,
    pub(crate) mask: u32,
    pub(crate) shift: u32,
    /// Hard probe ceiling; reaching it forces the map to grow.
    pub(crate) offset_limit: u32,
    /// Largest probe length ever placed in this space. Monotone until the
    /// space is retired; bounds every negative lookup.
    pub(crate) max_offset: u32,
}

impl Space {
    pub(crate) fn new(log2_size: u32, offset_mult: u32) -> Self {
        let size = 1u32 << log2_size;
        Space {
            buckets: None,
            log2_size,
            size,
            mask: size - 1,
            shift: KEY_BITS - log2_size,
            offset_limit: offset_mult * log2_size,
            max_offset: 0,
        }
    }

    /// Inserts a key-value pair, returning the slot the key ended up in and
    /// whether it was already present.
    ///
    /// If the key exists its value is left untouched. Otherwise the entry is
    /// placed Robin Hood style: whenever the candidate's running probe
    /// length exceeds that of the resident entry, the two swap and the
    /// displaced resident probes on. The returned slot is where the caller's
    /// key landed, even when later steps of the same insertion kept shifting
    /// other entries further down the chain.
    pub(crate) fn insert(&mut self, key: u32, value: i32) -> (u32, bool) {
        let size = self.size as usize;
        let mask = self.mask as usize;
        let buckets = self
            .buckets
            .get_or_insert_with(|| vec![Entry::default(); size].into_boxed_slice());

        let mut index = home_index(key, self.shift) as usize;
        let mut cand = Entry {
            key,
            value,
            offset: 0,
            inuse: true,
        };
        let mut landed = None;

        // The resize discipline guarantees an empty slot, so the scan
        // terminates.
        while buckets[index].inuse {
            if buckets[index].key == cand.key {
                return (index as u32, true);
            }
            if buckets[index].offset < cand.offset {
                if landed.is_none() {
                    landed = Some(index);
                }
                std::mem::swap(&mut buckets[index], &mut cand);
            }
            index = (index + 1) & mask;
            cand.offset += 1;
        }

        // The entry written last carries the largest probe length seen by
        // this insertion.
        if cand.offset > self.max_offset {
            self.max_offset = cand.offset;
        }

        buckets[index] = cand;
        (landed.unwrap_or(index) as u32, false)
    }

    /// Looks up a key, scanning at most `offset_bound + 1` slots from its
    /// home.
    ///
    /// Empty slots do not terminate the scan: the retiring space of a
    /// migration is cleared lazily and may contain holes mid-chain.
    pub(crate) fn find(&self, key: u32, offset_bound: u32) -> Option<u32> {
        let buckets = self.buckets.as_deref()?;
        let mask = self.mask as usize;
        let mut index = home_index(key, self.shift) as usize;

        for _ in 0..=offset_bound {
            let slot = &buckets[index];
            if slot.inuse && slot.key == key {
                return Some(index as u32);
            }
            index = (index + 1) & mask;
        }
        None
    }

    /// Removes a key with backward shifting, returning whether it was found.
    ///
    /// Only valid on a space without lazy holes: the search stops at the
    /// first empty slot, and the shift would tear chains that fetches in a
    /// retiring space still walk across. The map never calls this on the
    /// retiring space.
    pub(crate) fn remove(&mut self, key: u32) -> bool {
        let mask = self.mask as usize;
        let Some(buckets) = self.buckets.as_deref_mut() else {
            return false;
        };

        let mut index = home_index(key, self.shift) as usize;
        let mut found = None;
        // The ceiling bounds any legal chain, but a single insert can land
        // past it in the window before the forced grow; the running maximum
        // covers every live entry either way.
        for _ in 0..=self.offset_limit.max(self.max_offset) {
            let slot = &buckets[index];
            if !slot.inuse {
                break;
            }
            if slot.key == key {
                found = Some(index);
                break;
            }
            index = (index + 1) & mask;
        }
        let Some(mut hole) = found else {
            return false;
        };
        buckets[hole] = Entry::default();

        // Pull successors with a positive probe length one slot left until a
        // chain boundary: an empty slot or an entry sitting at home.
        let mut next = (hole + 1) & mask;
        while buckets[next].inuse && buckets[next].offset > 0 {
            buckets[hole] = buckets[next];
            buckets[hole].offset -= 1;
            buckets[next] = Entry::default();
            hole = next;
            next = (next + 1) & mask;
        }
        true
    }

    /// Takes the live entry at `slot`, clearing it lazily (no backward
    /// shift). Returns its key and value, or `None` for an empty slot.
    pub(crate) fn take_slot(&mut self, slot: u32) -> Option<(u32, i32)> {
        let entry = &mut self.buckets.as_deref_mut()?[slot as usize];
        if !entry.inuse {
            return None;
        }
        entry.inuse = false;
        Some((entry.key, entry.value))
    }

    #[inline]
    pub(crate) fn entry(&self, slot: u32) -> &Entry {
        &self.buckets.as_deref().unwrap()[slot as usize]
    }

    #[inline]
    pub(crate) fn entry_mut(&mut self, slot: u32) -> &mut Entry {
        &mut self.buckets.as_deref_mut().unwrap()[slot as usize]
    }

    /// Returns the bucket array, or an empty slice when storage has not been
    /// allocated yet.
    pub(crate) fn slots(&self) -> &[Entry] {
        self.buckets.as_deref().unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Collects `count` distinct keys whose home slot is `home` in a space
    /// with the given shift.
    fn colliding_keys(shift: u32, home: u32, count: usize) -> Vec<u32> {
        (0u32..)
            .filter(|&key| home_index(key, shift) == home)
            .take(count)
            .collect()
    }

    #[test]
    fn insert_and_find() {
        let mut space = Space::new(5, 1);
        assert!(space.find(7, space.max_offset).is_none());

        let (slot, exists) = space.insert(7, 70);
        assert!(!exists);
        assert_eq!(space.entry(slot).key(), 7);
        assert_eq!(space.entry(slot).value(), 70);
        assert_eq!(space.find(7, space.max_offset), Some(slot));

        // A second insert of the same key reports it and leaves the value.
        let (slot2, exists) = space.insert(7, 71);
        assert!(exists);
        assert_eq!(slot2, slot);
        assert_eq!(space.entry(slot).value(), 70);
    }

    #[test]
    fn probing_wraps_and_tracks_max_offset() {
        let mut space = Space::new(5, 1);
        let keys = colliding_keys(space.shift, 31, 3);
        for (i, &key) in keys.iter().enumerate() {
            space.insert(key, i as i32);
        }
        // Three entries homed at the last slot occupy it and the first two
        // slots after the wrap.
        assert_eq!(space.max_offset, 2);
        for (i, &key) in keys.iter().enumerate() {
            let slot = space.find(key, space.max_offset).unwrap();
            assert_eq!(space.entry(slot).value(), i as i32);
            assert_eq!(space.entry(slot).offset(), i as u32);
        }
    }

    #[test]
    fn steal_reports_where_the_new_key_landed() {
        let mut space = Space::new(5, 1);
        let home0 = colliding_keys(space.shift, 0, 2);
        let home1 = colliding_keys(space.shift, 1, 1);

        space.insert(home0[0], 0);
        space.insert(home1[0], 1);
        // The second home-0 key reaches slot 1 with probe length 1 and
        // steals it from the resident sitting at home; the resident is
        // pushed to slot 2.
        let (slot, exists) = space.insert(home0[1], 2);
        assert!(!exists);
        assert_eq!(slot, 1);
        assert_eq!(space.entry(slot).key(), home0[1]);

        let displaced = space.find(home1[0], space.max_offset).unwrap();
        assert_eq!(displaced, 2);
        assert_eq!(space.entry(displaced).offset(), 1);
    }

    #[test]
    fn remove_backward_shifts_the_chain() {
        let mut space = Space::new(5, 1);
        let keys = colliding_keys(space.shift, 4, 4);
        for (i, &key) in keys.iter().enumerate() {
            space.insert(key, i as i32);
        }

        assert!(space.remove(keys[0]));
        assert!(!space.remove(keys[0]));

        // The survivors moved one slot towards home and their probe lengths
        // shrank accordingly.
        for (i, &key) in keys.iter().enumerate().skip(1) {
            let slot = space.find(key, space.max_offset).unwrap();
            assert_eq!(space.entry(slot).offset(), i as u32 - 1);
            assert_eq!(space.entry(slot).value(), i as i32);
        }
    }

    #[test]
    fn remove_stops_at_an_empty_slot() {
        let mut space = Space::new(5, 1);
        let keys = colliding_keys(space.shift, 9, 2);
        space.insert(keys[0], 0);
        // A key homed two slots later is out of reach of the chain that an
        // absent-key scan walks.
        let far = colliding_keys(space.shift, 11, 1);
        space.insert(far[0], 1);

        assert!(!space.remove(keys[1]));
        assert!(space.remove(keys[0]));
        assert!(space.remove(far[0]));
        assert!(space.slots().iter().all(|entry| !entry.inuse));
    }

    #[test]
    fn find_scans_across_lazy_holes() {
        let mut space = Space::new(5, 1);
        let keys = colliding_keys(space.shift, 20, 3);
        for (i, &key) in keys.iter().enumerate() {
            space.insert(key, i as i32);
        }

        // Lazily clearing the middle of the chain must not hide the tail.
        let middle = space.find(keys[1], space.max_offset).unwrap();
        assert_eq!(space.take_slot(middle), Some((keys[1], 1)));
        assert_eq!(space.take_slot(middle), None);

        assert!(space.find(keys[1], space.max_offset).is_none());
        let tail = space.find(keys[2], space.max_offset).unwrap();
        assert_eq!(space.entry(tail).value(), 2);
    }

    #[test]
    fn unallocated_space_reports_nothing() {
        let mut space = Space::new(5, 1);
        assert!(space.buckets.is_none());
        assert!(space.find(1, space.max_offset).is_none());
        assert!(!space.remove(1));
        assert!(space.take_slot(0).is_none());
        assert!(space.slots().is_empty());
    }
}
