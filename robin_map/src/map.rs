//! The two-space map and its incremental migration engine.

use std::fmt;
use std::io::{self, Write};

use crate::config::{Config, MAX_LOG2_SIZE, MIGRATE_ALL};
use crate::space::{Entry, Space};

const GROW: i32 = 1;
const SHRINK: i32 = -1;

/// An open-addressed hash map from `u32` keys to `i32` values with Robin
/// Hood probing and incremental two-space resizing.
///
/// Growth and shrink do not rehash in one go: the old space is retired and
/// drained in small batches charged to subsequent mutating operations, while
/// lookups keep consulting both spaces. This keeps the latency of individual
/// operations bounded even across resizes.
///
/// # Examples
///
/// ```
/// use robin_map::RobinMap;
///
/// let mut map = RobinMap::new();
/// let put = map.put(17, -3);
/// assert!(!put.exists);
/// assert_eq!(map.get(17).map(|entry| entry.value()), Some(-3));
/// assert!(map.remove(17));
/// assert!(map.get(17).is_none());
/// ```
pub struct RobinMap {
    current: Space,
    migration: Option<Migration>,
    count: u32,
    /// Entry count at which the next grow triggers; kept below the current
    /// space's mask so the table can never fill up completely.
    grow_count: u32,
    /// Entry count at or below which a shrink triggers.
    shrink_count: u32,
    config: Config,
}

/// Cursor over the retiring space of an in-flight resize.
struct Migration {
    space: Space,
    pos: u32,
    remaining: u32,
}

/// Outcome of a [`put`](RobinMap::put).
///
/// The borrow is tied to the map, so any subsequent mutating call naturally
/// invalidates it.
pub struct PutResult<'a> {
    /// The entry the key landed in, or the already-present entry.
    pub entry: &'a mut Entry,
    /// Whether the key was already present. If so, the stored value was left
    /// unmodified and the map's length did not change.
    pub exists: bool,
}

impl Default for RobinMap {
    fn default() -> Self {
        Self::with_config(Config::default())
    }
}

impl RobinMap {
    /// Returns an empty map with the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns an empty map with a custom minimum size of `2^log2_size`
    /// slots and defaults otherwise.
    pub fn with_log2_size(log2_size: u32) -> Self {
        Self::with_config(Config {
            min_log2_size: log2_size,
            ..Config::default()
        })
    }

    /// Returns an empty map sized so that `min_items` entries fit without
    /// triggering a resize during population.
    ///
    /// When `min_items` sits exactly on the computed grow watermark the last
    /// insertion can still start a grow; the watermark comparison truncates
    /// towards zero.
    pub fn with_min_items(min_items: u32) -> Self {
        let config = Config::default();
        Self::with_config(Config {
            min_log2_size: config.log2_for_items(min_items),
            ..config
        })
    }

    /// Returns an empty map with the given configuration, clamped per the
    /// [`Config`] field documentation.
    pub fn with_config(config: Config) -> Self {
        let config = config.sanitized();
        let mut map = RobinMap {
            current: Space::new(config.min_log2_size, config.offset_mult),
            migration: None,
            count: 0,
            grow_count: 0,
            shrink_count: 0,
            config,
        };
        map.set_watermarks();
        map
    }

    /// Returns the number of live entries.
    pub fn len(&self) -> usize {
        self.count as usize
    }

    /// Returns `true` if the map holds no entries.
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Returns the current space's size as a power-of-two exponent.
    pub fn log2_size(&self) -> u32 {
        self.current.log2_size
    }

    /// Returns the slot count of the current space. Storage for the slots
    /// is only allocated once the first entry is inserted.
    pub fn capacity(&self) -> usize {
        self.current.size as usize
    }

    /// Returns the largest probe length the current space has seen. Negative
    /// lookups scan at most this many slots past the home slot.
    pub fn max_probe_len(&self) -> u32 {
        self.current.max_offset
    }

    /// Returns `true` while a resize migration is in flight.
    pub fn is_migrating(&self) -> bool {
        self.migration.is_some()
    }

    /// Inserts a key-value pair.
    ///
    /// If the key is already present (in either space, while a migration is
    /// in flight) the stored value is *not* replaced; the existing entry is
    /// returned with [`exists`](PutResult::exists) set, and its value can be
    /// updated through [`value_mut`](Entry::value_mut) if desired.
    ///
    /// ```
    /// use robin_map::RobinMap;
    ///
    /// let mut map = RobinMap::new();
    /// map.put(1, 10);
    /// let put = map.put(1, 99);
    /// assert!(put.exists);
    /// assert_eq!(put.entry.value(), 10);
    /// *put.entry.value_mut() = 11;
    /// assert_eq!(map.get(1).unwrap().value(), 11);
    /// ```
    pub fn put(&mut self, key: u32, value: i32) -> PutResult<'_> {
        if self.migration.is_some() {
            // A key still resident in the retiring space must not be
            // inserted a second time. Finding it there is an existence
            // check only and does not advance the migration.
            let resident = self
                .migration
                .as_ref()
                .and_then(|mig| mig.space.find(key, mig.space.max_offset));
            match resident {
                Some(slot) => {
                    let mig = self.migration.as_mut().unwrap();
                    return PutResult {
                        entry: mig.space.entry_mut(slot),
                        exists: true,
                    };
                }
                None => self.migrate(self.config.batch_size),
            }
        }

        let (slot, exists) = self.current.insert(key, value);
        if exists {
            return PutResult {
                entry: self.current.entry_mut(slot),
                exists: true,
            };
        }
        self.count += 1;

        if self.migration.is_none()
            && (self.current.max_offset >= self.current.offset_limit
                || self.count >= self.grow_count)
        {
            self.trigger_resize(GROW);
            // The insert slot is stale after the flip; re-resolve the key
            // through both spaces.
            let entry = self.get_mut(key).unwrap();
            return PutResult {
                entry,
                exists: false,
            };
        }

        PutResult {
            entry: self.current.entry_mut(slot),
            exists: false,
        }
    }

    /// Looks up a key. Does not advance an in-flight migration.
    pub fn get(&self, key: u32) -> Option<&Entry> {
        if let Some(slot) = self.current.find(key, self.current.max_offset) {
            return Some(self.current.entry(slot));
        }
        let mig = self.migration.as_ref()?;
        let slot = mig.space.find(key, mig.space.max_offset)?;
        Some(mig.space.entry(slot))
    }

    /// Looks up a key, allowing the value to be updated in place.
    pub fn get_mut(&mut self, key: u32) -> Option<&mut Entry> {
        if let Some(slot) = self.current.find(key, self.current.max_offset) {
            return Some(self.current.entry_mut(slot));
        }
        let mig = self.migration.as_mut()?;
        let slot = mig.space.find(key, mig.space.max_offset)?;
        Some(mig.space.entry_mut(slot))
    }

    /// Removes a key, returning whether it was present.
    pub fn remove(&mut self, key: u32) -> bool {
        if self.migration.is_some() {
            // Entries in the retiring space are only ever cleared lazily;
            // backward shifting there would tear chains that fetches still
            // walk across.
            let resident = self
                .migration
                .as_ref()
                .and_then(|mig| mig.space.find(key, mig.space.max_offset));
            if let Some(slot) = resident {
                self.migration.as_mut().unwrap().space.take_slot(slot);
                self.count -= 1;
                self.migrate(self.config.batch_size);
                return true;
            }
            self.migrate(self.config.batch_size);
        }

        if !self.current.remove(key) {
            return false;
        }
        self.count -= 1;

        if self.migration.is_none()
            && (self.count == 0
                || (self.count <= self.shrink_count
                    && self.current.log2_size > self.config.min_log2_size))
        {
            self.trigger_resize(SHRINK);
        }
        true
    }

    /// Removes all entries, releasing the storage of both spaces. The
    /// configuration is retained.
    pub fn clear(&mut self) {
        self.migration = None;
        self.current = Space::new(self.config.min_log2_size, self.config.offset_mult);
        self.count = 0;
        self.set_watermarks();
    }

    /// Recomputes the resize watermarks for the current space's size.
    fn set_watermarks(&mut self) {
        let size = self.current.size as f64;
        self.shrink_count = (size * self.config.shrink_load) as u32;
        self.grow_count = (size * self.config.grow_load) as u32;
        // Grow at the latest when a single empty slot is left.
        if self.grow_count > self.current.mask {
            self.grow_count = self.current.mask;
        }
    }

    /// Retires the current space and installs a fresh one a factor of two
    /// larger (`dir = 1`) or smaller (`dir = -1`).
    ///
    /// An empty map skips the migration machinery entirely: all storage is
    /// released and the map restarts at its minimum size.
    fn trigger_resize(&mut self, dir: i32) {
        if self.count == 0 {
            self.migration = None;
            self.current = Space::new(self.config.min_log2_size, self.config.offset_mult);
            self.set_watermarks();
            return;
        }

        let new_log2 = self
            .current
            .log2_size
            .saturating_add_signed(dir)
            .clamp(self.config.min_log2_size, MAX_LOG2_SIZE);
        let retiring = std::mem::replace(
            &mut self.current,
            Space::new(new_log2, self.config.offset_mult),
        );
        let remaining = retiring.size;
        self.migration = Some(Migration {
            space: retiring,
            pos: 0,
            remaining,
        });
        self.set_watermarks();

        if self.config.batch_size == MIGRATE_ALL {
            self.migrate(remaining);
        }
    }

    /// Walks up to `batch` slots of the retiring space, reinserting live
    /// entries into the current space and clearing them lazily. Empty slots
    /// count against the batch too; the cursor crosses the retiring array
    /// exactly once.
    fn migrate(&mut self, batch: u32) {
        let Some(mig) = self.migration.as_mut() else {
            return;
        };
        let mut stepped = 0;
        while mig.remaining > 0 && stepped < batch {
            if let Some((key, value)) = mig.space.take_slot(mig.pos) {
                self.current.insert(key, value);
            }
            mig.pos += 1;
            mig.remaining -= 1;
            stepped += 1;
        }
        // Fully drained: the retiring space and its storage go away.
        if mig.remaining == 0 {
            self.migration = None;
        }
    }

    /// Writes the slot-level state of both spaces to `writer`.
    ///
    /// Diagnostic output; the format is advisory, not a stable interface.
    pub fn dump_to<W: Write>(&self, writer: &mut W, include_empty: bool) -> io::Result<()> {
        writeln!(
            writer,
            "# {} keys, primary space size {}, bits {}, max probe length {}",
            self.count, self.current.size, self.current.log2_size, self.current.max_offset
        )?;
        dump_space(writer, "pri", &self.current, include_empty)?;

        if let Some(mig) = &self.migration {
            writeln!(
                writer,
                "# still migrating, left {}, old size {} bits {} max probe length {}",
                mig.remaining, mig.space.size, mig.space.log2_size, mig.space.max_offset
            )?;
            dump_space(writer, "sec", &mig.space, include_empty)?;
        }
        Ok(())
    }

    /// Dumps the slot-level state of both spaces to standard output.
    pub fn dump(&self, include_empty: bool) {
        let stdout = io::stdout();
        let _ = self.dump_to(&mut stdout.lock(), include_empty);
    }
}

fn dump_space<W: Write>(
    writer: &mut W,
    tag: &str,
    space: &Space,
    include_empty: bool,
) -> io::Result<()> {
    writeln!(writer, "# space, slot, state, key, value, offset")?;
    for (slot, entry) in space.slots().iter().enumerate() {
        if entry.inuse || include_empty {
            writeln!(
                writer,
                "{tag}, #{slot:06}, {}, 0x{:08x} ({:010}), {:06}, {:06}",
                if entry.inuse { "full " } else { "empty" },
                entry.key,
                entry.key,
                entry.value,
                entry.offset
            )?;
        }
    }
    Ok(())
}

impl fmt::Debug for RobinMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let live = self
            .current
            .slots()
            .iter()
            .chain(
                self.migration
                    .iter()
                    .flat_map(|mig| mig.space.slots().iter()),
            )
            .filter(|entry| entry.inuse)
            .map(|entry| (entry.key, entry.value));
        f.debug_map().entries(live).finish()
    }
}

#[cfg(test)]
impl RobinMap {
    /// Asserts every structural invariant of both spaces.
    pub(crate) fn check(&self) {
        use std::collections::HashSet;

        let mut keys = HashSet::new();
        let mut live = 0u32;

        let spaces = std::iter::once((&self.current, false))
            .chain(self.migration.iter().map(|mig| (&mig.space, true)));
        for (space, lazy_holes) in spaces {
            assert_eq!(space.size, 1 << space.log2_size);
            let slots = space.slots();
            if slots.is_empty() {
                continue;
            }
            assert_eq!(slots.len(), space.size as usize);

            let mask = space.mask as usize;
            for (index, entry) in slots.iter().enumerate() {
                if !entry.inuse {
                    continue;
                }
                live += 1;
                assert!(
                    keys.insert(entry.key),
                    "key {:#x} present in both spaces",
                    entry.key
                );
                assert!(entry.offset <= space.max_offset);
                let home = crate::space::home_index(entry.key, space.shift) as usize;
                assert_eq!((home + entry.offset as usize) & mask, index);

                if !lazy_holes {
                    // Robin Hood ordering: the probe length may grow by at
                    // most one per slot and restarts after an empty slot.
                    let prev = &slots[index.wrapping_sub(1) & mask];
                    if prev.inuse {
                        assert!(entry.offset <= prev.offset + 1);
                    } else {
                        assert_eq!(entry.offset, 0);
                    }
                }
            }
        }

        assert_eq!(live, self.count, "live entries out of sync with count");
        assert!(self.grow_count <= self.current.mask);
        if let Some(mig) = &self.migration {
            assert!(mig.remaining > 0);
            assert_eq!(mig.pos + mig.remaining, mig.space.size);
        }
    }

    pub(crate) fn current_space(&self) -> &Space {
        &self.current
    }

    pub(crate) fn retiring_space(&self) -> Option<&Space> {
        self.migration.as_ref().map(|mig| &mig.space)
    }
}
