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

//! The volume engine: an instance of the ext2 filesystem on a block device.
//!
//! The engine owns the in-memory superblock, the Block Group Descriptor
//! Table and the inode cache. Allocations of blocks and inodes go through the
//! group bitmaps; bits are packed little-endian within bytes (bit 0 is the
//! lowest-numbered item). The superblock and the BGDT each carry a single
//! in-memory dirty bit: they are written back on [`Ext2Fs::sync`] and on
//! shutdown only.

use crate::bgd::BlockGroupDescriptor;
use crate::device;
use crate::device::BlockDev;
use crate::errno;
use crate::errno::EResult;
use crate::icache::CachedInode;
use crate::icache::InodeCache;
use crate::inode::Ext2INode;
use crate::superblock::Superblock;
use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;
use bytemuck::Zeroable;

/// Statistics about a mounted volume.
#[derive(Clone, Copy, Debug)]
pub struct Statfs {
	/// The size of a block in bytes.
	pub f_bsize: u32,
	/// The total number of blocks.
	pub f_blocks: u64,
	/// The number of free blocks.
	pub f_bfree: u64,
	/// The total number of inodes.
	pub f_files: u64,
	/// The number of free inodes.
	pub f_ffree: u64,
	/// The maximum length of a file name.
	pub f_namelen: u32,
}

/// An instance of the ext2 filesystem.
pub struct Ext2Fs {
	/// The device on which the filesystem is located.
	dev: Box<dyn BlockDev>,
	/// The filesystem's superblock.
	pub sp: Superblock,
	/// Tells whether the in-memory superblock diverges from the disk.
	sp_dirty: bool,
	/// The Block Group Descriptor Table.
	pub bgdt: Vec<BlockGroupDescriptor>,
	/// Tells whether the in-memory BGDT diverges from the disk.
	bgdt_dirty: bool,
	/// The inode cache.
	pub icache: InodeCache,
	/// Tells whether the filesystem is mounted read-only.
	readonly: bool,
}

impl Ext2Fs {
	/// Loads the filesystem from the given device.
	///
	/// `readonly` tells whether the filesystem is mounted read-only.
	///
	/// The function reads and verifies the superblock, then loads the whole
	/// Block Group Descriptor Table in memory. It performs no write to the
	/// device.
	pub fn open(mut dev: Box<dyn BlockDev>, readonly: bool) -> EResult<Self> {
		if !readonly && !dev.writable() {
			return Err(errno::EROFS);
		}
		let sp = Superblock::read(&mut *dev)?;
		sp.check(readonly)?;
		// Check the device is large enough for the filesystem
		let fs_len = sp.s_blocks_count as u64 * sp.get_block_size() as u64;
		let dev_len = dev.block_count() * dev.block_size() as u64;
		if fs_len > dev_len {
			log::error!("ext2: filesystem larger than its device");
			return Err(errno::EINVAL);
		}
		// Load the BGDT
		let groups_count = sp.get_block_groups_count() as usize;
		let mut bgdt = vec![BlockGroupDescriptor::zeroed(); groups_count];
		let bgdt_off = sp.get_bgdt_block() as u64 * sp.get_block_size() as u64;
		device::read_bytes(&mut *dev, bgdt_off, bytemuck::cast_slice_mut(bgdt.as_mut_slice()))?;
		Ok(Self {
			dev,
			sp,
			sp_dirty: false,
			bgdt,
			bgdt_dirty: false,
			icache: InodeCache::new(),
			readonly,
		})
	}

	/// Tells whether the filesystem is mounted read-only.
	pub fn is_readonly(&self) -> bool {
		self.readonly
	}

	/// Returns [`errno::EROFS`] if the filesystem is mounted read-only.
	pub fn require_writable(&self) -> EResult<()> {
		if self.readonly {
			Err(errno::EROFS)
		} else {
			Ok(())
		}
	}

	/// Returns the size of a block in bytes.
	pub fn blk_size(&self) -> u32 {
		self.sp.get_block_size()
	}

	/// Reads the block `blk` into a new buffer.
	pub fn read_blk(&mut self, blk: u32) -> EResult<Vec<u8>> {
		let blk_size = self.blk_size() as usize;
		let mut buf = vec![0u8; blk_size];
		self.read_blk_into(blk, &mut buf)?;
		Ok(buf)
	}

	/// Reads the block `blk` into `buf`.
	pub fn read_blk_into(&mut self, blk: u32, buf: &mut [u8]) -> EResult<()> {
		let off = blk as u64 * self.blk_size() as u64;
		device::read_bytes(&mut *self.dev, off, buf)
	}

	/// Writes `buf` to the block `blk`.
	pub fn write_blk(&mut self, blk: u32, buf: &[u8]) -> EResult<()> {
		let off = blk as u64 * self.blk_size() as u64;
		device::write_bytes(&mut *self.dev, off, buf)
	}

	/// Zeros the block `blk`.
	pub fn zero_blk(&mut self, blk: u32) -> EResult<()> {
		let buf = vec![0u8; self.blk_size() as usize];
		self.write_blk(blk, &buf)
	}

	/// Reads the 32-bit entry at index `idx` in the block `blk`.
	pub(crate) fn read_blk_u32(&mut self, blk: u32, idx: u32) -> EResult<u32> {
		let off = blk as u64 * self.blk_size() as u64 + idx as u64 * 4;
		let mut buf = [0u8; 4];
		device::read_bytes(&mut *self.dev, off, &mut buf)?;
		Ok(u32::from_le_bytes(buf))
	}

	/// Writes the 32-bit entry at index `idx` in the block `blk`.
	pub(crate) fn write_blk_u32(&mut self, blk: u32, idx: u32, val: u32) -> EResult<()> {
		let off = blk as u64 * self.blk_size() as u64 + idx as u64 * 4;
		device::write_bytes(&mut *self.dev, off, &val.to_le_bytes())
	}

	/// Finds a clear bit in the bitmap starting at the block `start_blk`,
	/// sets it and returns its index.
	///
	/// `count` is the number of bits in the bitmap. If every bit is set, the
	/// function returns `None`.
	fn bitmap_alloc(&mut self, start_blk: u32, count: u32) -> EResult<Option<u32>> {
		let bits_per_blk = self.blk_size() * 8;
		let blocks = count.div_ceil(bits_per_blk);
		for i in 0..blocks {
			let mut buf = self.read_blk(start_blk + i)?;
			let found = buf.iter().position(|b| *b != 0xff);
			let Some(byte_idx) = found else {
				continue;
			};
			let bit = (!buf[byte_idx]).trailing_zeros();
			let idx = i * bits_per_blk + byte_idx as u32 * 8 + bit;
			if idx >= count {
				continue;
			}
			buf[byte_idx] |= 1 << bit;
			self.write_blk(start_blk + i, &buf)?;
			return Ok(Some(idx));
		}
		Ok(None)
	}

	/// Clears the bit `idx` in the bitmap starting at the block `start_blk`.
	///
	/// The function returns the previous value of the bit.
	fn bitmap_free(&mut self, start_blk: u32, idx: u32) -> EResult<bool> {
		let bits_per_blk = self.blk_size() * 8;
		let blk = start_blk + idx / bits_per_blk;
		let inner = idx % bits_per_blk;
		let mut buf = self.read_blk(blk)?;
		let byte = &mut buf[(inner / 8) as usize];
		let prev = *byte & (1 << (inner % 8)) != 0;
		*byte &= !(1 << (inner % 8));
		self.write_blk(blk, &buf)?;
		Ok(prev)
	}

	/// Allocates a block and returns its number.
	///
	/// The search starts at the group `hint_group` and wraps around. If no
	/// group has a free block, the function returns [`errno::ENOSPC`].
	pub fn alloc_block(&mut self, hint_group: u32) -> EResult<u32> {
		if self.sp.s_free_blocks_count == 0 {
			return Err(errno::ENOSPC);
		}
		let groups_count = self.sp.get_block_groups_count();
		for i in 0..groups_count {
			let group = (hint_group + i) % groups_count;
			if self.bgdt[group as usize].bg_free_blocks_count == 0 {
				continue;
			}
			let bitmap = self.bgdt[group as usize].bg_block_bitmap;
			let count = self.sp.get_group_blocks_count(group);
			let Some(j) = self.bitmap_alloc(bitmap, count)? else {
				continue;
			};
			let blk = self.sp.s_first_data_block + group * self.sp.s_blocks_per_group + j;
			if blk >= self.sp.s_blocks_count {
				return Err(errno::EUCLEAN);
			}
			self.sp.s_free_blocks_count -= 1;
			self.bgdt[group as usize].bg_free_blocks_count -= 1;
			self.sp_dirty = true;
			self.bgdt_dirty = true;
			return Ok(blk);
		}
		Err(errno::ENOSPC)
	}

	/// Marks the block `blk` available on the filesystem.
	///
	/// Freeing a block that is already free is an invariant violation: it is
	/// logged and the counters are left untouched.
	pub fn free_block(&mut self, blk: u32) -> EResult<()> {
		if blk <= self.sp.s_first_data_block || blk >= self.sp.s_blocks_count {
			return Err(errno::EUCLEAN);
		}
		let group = (blk - self.sp.s_first_data_block) / self.sp.s_blocks_per_group;
		let idx = (blk - self.sp.s_first_data_block) % self.sp.s_blocks_per_group;
		let bitmap = self.bgdt[group as usize].bg_block_bitmap;
		let prev = self.bitmap_free(bitmap, idx)?;
		if !prev {
			log::warn!("ext2: freeing unallocated block {blk}");
			return Ok(());
		}
		self.sp.s_free_blocks_count += 1;
		self.bgdt[group as usize].bg_free_blocks_count += 1;
		self.sp_dirty = true;
		self.bgdt_dirty = true;
		Ok(())
	}

	/// Returns the group of the inode `ino`.
	pub fn group_of_inode(&self, ino: u32) -> u32 {
		ino.saturating_sub(1) / self.sp.s_inodes_per_group
	}

	/// Allocates an inode, zeroes it and returns its number along with its
	/// cache entry.
	///
	/// Arguments:
	/// - `parent_group` is the group of the parent directory.
	/// - `directory` tells whether the inode is allocated for a directory.
	///
	/// An ordinary file lands in its parent's group when possible. A
	/// directory lands in the group with the most free inodes, spreading
	/// directories across the volume.
	pub fn alloc_inode(
		&mut self,
		parent_group: u32,
		directory: bool,
	) -> EResult<(u32, Arc<CachedInode>)> {
		self.require_writable()?;
		if self.sp.s_free_inodes_count == 0 {
			return Err(errno::ENOSPC);
		}
		let groups_count = self.sp.get_block_groups_count();
		let start = if directory {
			// Pick the least used group
			(0..groups_count)
				.max_by_key(|g| self.bgdt[*g as usize].bg_free_inodes_count)
				.unwrap_or(0)
		} else {
			parent_group
		};
		for i in 0..groups_count {
			let group = (start + i) % groups_count;
			if self.bgdt[group as usize].bg_free_inodes_count == 0 {
				continue;
			}
			let bitmap = self.bgdt[group as usize].bg_inode_bitmap;
			let Some(j) = self.bitmap_alloc(bitmap, self.sp.s_inodes_per_group)? else {
				continue;
			};
			let ino = group * self.sp.s_inodes_per_group + j + 1;
			self.sp.s_free_inodes_count -= 1;
			self.bgdt[group as usize].bg_free_inodes_count -= 1;
			if directory {
				self.bgdt[group as usize].bg_used_dirs_count += 1;
			}
			self.sp_dirty = true;
			self.bgdt_dirty = true;
			// Zero the on-disk inode
			let ent = self.get_inode(ino)?;
			*ent.lock() = Ext2INode::zeroed();
			ent.mark_dirty();
			return Ok((ino, ent));
		}
		Err(errno::ENOSPC)
	}

	/// Marks the inode `ino` available on the filesystem.
	///
	/// `directory` tells whether the inode was used for a directory.
	///
	/// Freeing an inode that is already free is an invariant violation: it
	/// is logged and the counters are left untouched.
	pub fn free_inode(&mut self, ino: u32, directory: bool) -> EResult<()> {
		if ino == 0 || ino > self.sp.s_inodes_count {
			return Err(errno::EUCLEAN);
		}
		let group = (ino - 1) / self.sp.s_inodes_per_group;
		let idx = (ino - 1) % self.sp.s_inodes_per_group;
		let bitmap = self.bgdt[group as usize].bg_inode_bitmap;
		let prev = self.bitmap_free(bitmap, idx)?;
		if !prev {
			log::warn!("ext2: freeing unallocated inode {ino}");
			return Ok(());
		}
		self.sp.s_free_inodes_count += 1;
		self.bgdt[group as usize].bg_free_inodes_count += 1;
		if directory {
			self.bgdt[group as usize].bg_used_dirs_count -= 1;
		}
		self.sp_dirty = true;
		self.bgdt_dirty = true;
		Ok(())
	}

	/// Returns the cache entry for the inode `ino`.
	pub fn get_inode(&mut self, ino: u32) -> EResult<Arc<CachedInode>> {
		self.icache.get(ino, &self.sp, &self.bgdt, &mut *self.dev)
	}

	/// Returns statistics about the volume.
	pub fn statfs(&self) -> Statfs {
		Statfs {
			f_bsize: self.sp.get_block_size(),
			f_blocks: self.sp.s_blocks_count as _,
			f_bfree: self.sp.s_free_blocks_count as _,
			f_files: self.sp.s_inodes_count as _,
			f_ffree: self.sp.s_free_inodes_count as _,
			f_namelen: crate::limits::NAME_MAX as _,
		}
	}

	/// Writes every dirty structure back to the device: cached inodes first,
	/// then the BGDT, then the superblock.
	pub fn sync(&mut self) -> EResult<()> {
		self.icache.flush_all(&self.sp, &self.bgdt, &mut *self.dev)?;
		if self.bgdt_dirty {
			let off = self.sp.get_bgdt_block() as u64 * self.blk_size() as u64;
			device::write_bytes(&mut *self.dev, off, bytemuck::cast_slice(self.bgdt.as_slice()))?;
			self.bgdt_dirty = false;
		}
		if self.sp_dirty {
			self.sp.write(&mut *self.dev)?;
			self.sp_dirty = false;
		}
		Ok(())
	}

	/// Flushes every dirty structure and releases the filesystem, returning
	/// its device.
	pub fn shutdown(mut self) -> EResult<Box<dyn BlockDev>> {
		self.sync()?;
		Ok(self.dev)
	}
}

#[cfg(test)]
pub(crate) mod test {
	use super::*;
	use crate::device::RamDisk;
	use crate::mkfs;

	pub(crate) fn new_fs() -> Ext2Fs {
		let mut disk = RamDisk::new(512, 4096);
		mkfs::mkfs(&mut disk, 1024, 1).unwrap();
		Ext2Fs::open(Box::new(disk), false).unwrap()
	}

	/// Checks that per-group free counts sum up to the superblock's.
	pub(crate) fn check_free_counts(fs: &Ext2Fs) {
		let blocks: u32 = fs
			.bgdt
			.iter()
			.map(|b| b.bg_free_blocks_count as u32)
			.sum();
		let inodes: u32 = fs
			.bgdt
			.iter()
			.map(|b| b.bg_free_inodes_count as u32)
			.sum();
		assert_eq!(blocks, fs.sp.s_free_blocks_count);
		assert_eq!(inodes, fs.sp.s_free_inodes_count);
	}

	#[test]
	fn alloc_free_block() {
		let mut fs = new_fs();
		let free = fs.sp.s_free_blocks_count;
		let a = fs.alloc_block(0).unwrap();
		let b = fs.alloc_block(0).unwrap();
		assert_ne!(a, b);
		assert_eq!(fs.sp.s_free_blocks_count, free - 2);
		check_free_counts(&fs);
		fs.free_block(a).unwrap();
		fs.free_block(b).unwrap();
		assert_eq!(fs.sp.s_free_blocks_count, free);
		check_free_counts(&fs);
	}

	#[test]
	fn double_free_block_is_logged_not_counted() {
		let mut fs = new_fs();
		let a = fs.alloc_block(0).unwrap();
		fs.free_block(a).unwrap();
		let free = fs.sp.s_free_blocks_count;
		fs.free_block(a).unwrap();
		assert_eq!(fs.sp.s_free_blocks_count, free);
	}

	#[test]
	fn alloc_free_inode() {
		let mut fs = new_fs();
		let free = fs.sp.s_free_inodes_count;
		let (ino, ent) = fs.alloc_inode(0, false).unwrap();
		assert!(ino >= fs.sp.get_first_available_inode());
		assert_eq!(ent.lock().i_links_count, 0);
		assert_eq!(fs.sp.s_free_inodes_count, free - 1);
		drop(ent);
		fs.free_inode(ino, false).unwrap();
		assert_eq!(fs.sp.s_free_inodes_count, free);
		check_free_counts(&fs);
	}

	#[test]
	fn exhaust_blocks() {
		let mut fs = new_fs();
		let mut allocated = alloc::vec::Vec::new();
		loop {
			match fs.alloc_block(0) {
				Ok(b) => allocated.push(b),
				Err(e) => {
					assert_eq!(e, errno::ENOSPC);
					break;
				}
			}
		}
		assert_eq!(fs.sp.s_free_blocks_count, 0);
		check_free_counts(&fs);
		for b in allocated {
			fs.free_block(b).unwrap();
		}
		check_free_counts(&fs);
	}

	#[test]
	fn readonly_refuses_alloc() {
		let mut disk = RamDisk::new(512, 4096);
		mkfs::mkfs(&mut disk, 1024, 1).unwrap();
		let mut fs = Ext2Fs::open(Box::new(disk), true).unwrap();
		assert_eq!(fs.alloc_inode(0, false).map(|_| ()), Err(errno::EROFS));
	}
}
