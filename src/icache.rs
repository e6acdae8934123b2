/*
 * Copyright 2024 Luc Lenôtre
 *
 * This file is part of Maestro.
 *
 * Maestro is free software: you can redistribute it and/or modify it under the
 * terms of the GNU General Public License as published by the Free Software
 * Foundation, either version 3 of the License, or (at your option) any later
 * version.
 *
 * Maestro is distributed in the hope that it will be useful, but WITHOUT ANY
 * WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS FOR
 * A PARTICULAR PURPOSE. See the GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License along with
 * Maestro. If not, see <https://www.gnu.org/licenses/>.
 */

//! The inode cache stores the inodes currently in use in memory to avoid
//! accessing the disk each time.
//!
//! The cache hands out [`Arc`] handles: the strong count is the entry's
//! reference count, so dropping a handle releases the entry. Dirty entries
//! are written back when evicted and on [`InodeCache::flush_all`].
//!
//! Two lookups for the same inode number return the same entry, not a copy.
//! An entry whose only remaining handle is the cache's own is eligible for
//! reclaim; reclaim picks the least recently used one.

use crate::bgd::BlockGroupDescriptor;
use crate::device;
use crate::device::BlockDev;
use crate::errno;
use crate::errno::EResult;
use crate::inode::inode_disk_offset;
use crate::inode::Ext2INode;
use crate::superblock::Superblock;
use alloc::sync::Arc;
use alloc::vec::Vec;
use bytemuck::Zeroable;
use core::sync::atomic::AtomicBool;
use core::sync::atomic::Ordering::Acquire;
use core::sync::atomic::Ordering::Release;
use spin::Mutex;
use spin::MutexGuard;

/// The number of slots in the inode cache.
const SLOT_COUNT: usize = 32;

/// An inode body held in the cache.
///
/// The body is behind its own mutex so a handle can mutate it without
/// borrowing the cache. The driver's global lock serializes accesses, so the
/// mutex is never contended.
pub struct CachedInode {
	/// The inode number.
	ino: u32,
	/// The in-memory copy of the on-disk inode.
	body: Mutex<Ext2INode>,
	/// Tells whether the body diverges from the on-disk inode.
	dirty: AtomicBool,
}

impl CachedInode {
	/// Returns the inode number.
	pub fn ino(&self) -> u32 {
		self.ino
	}

	/// Locks and returns the inode's body.
	pub fn lock(&self) -> MutexGuard<'_, Ext2INode> {
		self.body.lock()
	}

	/// Marks the body as diverging from the on-disk inode, scheduling a
	/// write-back.
	pub fn mark_dirty(&self) {
		self.dirty.store(true, Release);
	}

	/// Tells whether the entry awaits a write-back.
	pub fn is_dirty(&self) -> bool {
		self.dirty.load(Acquire)
	}
}

struct Slot {
	ent: Arc<CachedInode>,
	/// Counter value at the last lookup, for LRU eviction.
	stamp: u64,
}

/// Write-back cache of inodes, keyed by inode number.
pub struct InodeCache {
	slots: Vec<Slot>,
	/// Monotonic lookup counter.
	tick: u64,
}

impl InodeCache {
	/// Creates an empty cache.
	pub fn new() -> Self {
		Self {
			slots: Vec::with_capacity(SLOT_COUNT),
			tick: 0,
		}
	}

	/// Writes the entry back to its slot in the inode table and clears its
	/// dirty flag.
	///
	/// If the entry is not dirty, the function does nothing.
	pub fn flush_entry(
		ent: &CachedInode,
		sp: &Superblock,
		bgdt: &[BlockGroupDescriptor],
		dev: &mut dyn BlockDev,
	) -> EResult<()> {
		if !ent.is_dirty() {
			return Ok(());
		}
		let off = inode_disk_offset(ent.ino, sp, bgdt)?;
		let body = *ent.lock();
		device::write_bytes(dev, off, bytemuck::bytes_of(&body))?;
		ent.dirty.store(false, Release);
		Ok(())
	}

	/// Returns the entry for the inode `ino`, reading it from the device on a
	/// miss.
	///
	/// On a miss with a full cache, the least recently used unreferenced
	/// entry is flushed and evicted; if every entry is still referenced, the
	/// function returns [`errno::EBUSY`].
	pub fn get(
		&mut self,
		ino: u32,
		sp: &Superblock,
		bgdt: &[BlockGroupDescriptor],
		dev: &mut dyn BlockDev,
	) -> EResult<Arc<CachedInode>> {
		self.tick += 1;
		// Lookup
		if let Some(slot) = self.slots.iter_mut().find(|s| s.ent.ino == ino) {
			slot.stamp = self.tick;
			return Ok(slot.ent.clone());
		}
		// Miss: read the inode from the device
		let off = inode_disk_offset(ino, sp, bgdt)?;
		let mut body = Ext2INode::zeroed();
		device::read_bytes(dev, off, bytemuck::bytes_of_mut(&mut body))?;
		let ent = Arc::new(CachedInode {
			ino,
			body: Mutex::new(body),
			dirty: AtomicBool::new(false),
		});
		let slot = Slot {
			ent: ent.clone(),
			stamp: self.tick,
		};
		if self.slots.len() < SLOT_COUNT {
			self.slots.push(slot);
		} else {
			// Evict the least recently used unreferenced entry
			let victim = self
				.slots
				.iter()
				.enumerate()
				.filter(|(_, s)| Arc::strong_count(&s.ent) == 1)
				.min_by_key(|(_, s)| s.stamp)
				.map(|(i, _)| i)
				.ok_or(errno::EBUSY)?;
			Self::flush_entry(&self.slots[victim].ent, sp, bgdt, dev)?;
			self.slots[victim] = slot;
		}
		Ok(ent)
	}

	/// Writes every dirty entry back to the device.
	pub fn flush_all(
		&mut self,
		sp: &Superblock,
		bgdt: &[BlockGroupDescriptor],
		dev: &mut dyn BlockDev,
	) -> EResult<()> {
		for slot in &self.slots {
			Self::flush_entry(&slot.ent, sp, bgdt, dev)?;
		}
		Ok(())
	}
}

impl Default for InodeCache {
	fn default() -> Self {
		Self::new()
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::device::RamDisk;
	use bytemuck::Zeroable;

	fn setup() -> (Superblock, Vec<BlockGroupDescriptor>, RamDisk) {
		// A single group whose inode table starts at block 4
		let mut sp = Superblock::zeroed();
		sp.s_log_block_size = 0;
		sp.s_inodes_per_group = 64;
		sp.s_inodes_count = 64;
		sp.s_blocks_count = 64;
		sp.s_first_data_block = 1;
		sp.s_blocks_per_group = 63;
		let mut bgd = BlockGroupDescriptor::zeroed();
		bgd.bg_inode_table = 4;
		(sp, alloc::vec![bgd], RamDisk::new(1024, 64))
	}

	#[test]
	fn identity() {
		let (sp, bgdt, mut dev) = setup();
		let mut cache = InodeCache::new();
		let a = cache.get(2, &sp, &bgdt, &mut dev).unwrap();
		let b = cache.get(2, &sp, &bgdt, &mut dev).unwrap();
		assert!(Arc::ptr_eq(&a, &b));
		assert_eq!(Arc::strong_count(&a), 3);
		drop(b);
		assert_eq!(Arc::strong_count(&a), 2);
	}

	#[test]
	fn write_back() {
		let (sp, bgdt, mut dev) = setup();
		let mut cache = InodeCache::new();
		let a = cache.get(3, &sp, &bgdt, &mut dev).unwrap();
		{
			let mut body = a.lock();
			body.i_links_count = 7;
		}
		a.mark_dirty();
		cache.flush_all(&sp, &bgdt, &mut dev).unwrap();
		assert!(!a.is_dirty());
		// A fresh cache re-reads the flushed body
		let mut cache2 = InodeCache::new();
		let b = cache2.get(3, &sp, &bgdt, &mut dev).unwrap();
		assert_eq!(b.lock().i_links_count, 7);
	}

	#[test]
	fn eviction_busy() {
		let (sp, bgdt, mut dev) = setup();
		let mut cache = InodeCache::new();
		// Pin more entries than the cache has slots
		let pinned: Vec<_> = (1..=SLOT_COUNT as u32)
			.map(|i| cache.get(i, &sp, &bgdt, &mut dev).unwrap())
			.collect();
		assert_eq!(
			cache
				.get(SLOT_COUNT as u32 + 1, &sp, &bgdt, &mut dev)
				.map(|_| ()),
			Err(errno::EBUSY)
		);
		drop(pinned);
		// With the handles released, eviction works again
		cache.get(SLOT_COUNT as u32 + 1, &sp, &bgdt, &mut dev).unwrap();
	}
}
