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

//! The ext2 superblock is the first structure of the filesystem, storing its
//! global geometry and state.
//!
//! It is located at the byte offset `1024` regardless of the block size and
//! spans `1024` bytes.

use crate::device;
use crate::device::BlockDev;
use crate::errno;
use crate::errno::EResult;
use crate::inode::ROOT_DIRECTORY_INODE;
use bytemuck::Pod;
use bytemuck::Zeroable;
use core::cmp::max;

/// The offset of the superblock from the beginning of the device.
pub const SUPERBLOCK_OFFSET: u64 = 1024;
/// The filesystem's magic number.
pub const EXT2_MAGIC: u16 = 0xef53;

/// State telling that the filesystem is clean.
pub const FS_STATE_CLEAN: u16 = 1;
/// State telling that the filesystem has errors.
pub const FS_STATE_ERROR: u16 = 2;

/// Error handle action telling to ignore it.
pub const ERR_ACTION_IGNORE: u16 = 1;
/// Error handle action telling to mount as read-only.
pub const ERR_ACTION_READ_ONLY: u16 = 2;

/// `s_feature_incompat`: Compression
pub const REQUIRED_FEATURE_COMPRESSION: u32 = 0x1;
/// `s_feature_incompat`: Directory entries have a type field
pub const REQUIRED_FEATURE_DIRECTORY_TYPE: u32 = 0x2;
/// `s_feature_incompat`: Filesystem needs to replay its journal
pub const REQUIRED_FEATURE_JOURNAL_REPLAY: u32 = 0x4;
/// `s_feature_incompat`: Filesystem uses a journal device
pub const REQUIRED_FEATURE_JOURNAL_DEVICE: u32 = 0x8;

/// `s_feature_ro_compat`: Sparse superblocks and group descriptor tables
pub const WRITE_REQUIRED_SPARSE_SUPERBLOCKS: u32 = 0x1;
/// `s_feature_ro_compat`: Filesystem uses a 64-bit file size
pub const WRITE_REQUIRED_64_BITS: u32 = 0x2;
/// `s_feature_ro_compat`: Directory contents are stored in the form of a
/// Binary Tree.
pub const WRITE_REQUIRED_DIRECTORY_BINARY_TREE: u32 = 0x4;

/// The ext2 superblock structure.
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
pub struct Superblock {
	/// Total number of inodes in the filesystem.
	pub s_inodes_count: u32,
	/// Total number of blocks in the filesystem.
	pub s_blocks_count: u32,
	/// Number of blocks reserved for the superuser.
	pub s_r_blocks_count: u32,
	/// Total number of unallocated blocks.
	pub s_free_blocks_count: u32,
	/// Total number of unallocated inodes.
	pub s_free_inodes_count: u32,
	/// Block number of the block containing the superblock.
	pub s_first_data_block: u32,
	/// `log2(block_size) - 10`
	pub s_log_block_size: u32,
	/// `log2(fragment_size) - 10`
	pub s_log_frag_size: u32,
	/// The number of blocks per block group.
	pub s_blocks_per_group: u32,
	/// The number of fragments per block group.
	pub s_frags_per_group: u32,
	/// The number of inodes per block group.
	pub s_inodes_per_group: u32,
	/// The timestamp of the last mount operation.
	pub s_mtime: u32,
	/// The timestamp of the last write operation.
	pub s_wtime: u32,
	/// The number of mounts since the last consistency check.
	pub s_mnt_count: u16,
	/// The number of mounts allowed before a consistency check must be done.
	pub s_max_mnt_count: u16,
	/// The ext2 signature.
	pub s_magic: u16,
	/// The filesystem's state.
	pub s_state: u16,
	/// The action to perform when an error is detected.
	pub s_errors: u16,
	/// The minor version.
	pub s_minor_rev_level: u16,
	/// The timestamp of the last consistency check.
	pub s_lastcheck: u32,
	/// The interval between mandatory consistency checks.
	pub s_checkinterval: u32,
	/// The id of the operating system from which the filesystem was created.
	pub s_creator_os: u32,
	/// The major version.
	pub s_rev_level: u32,
	/// The UID of the user that can use reserved blocks.
	pub s_def_resuid: u16,
	/// The GID of the group that can use reserved blocks.
	pub s_def_resgid: u16,

	// Extended superblock fields
	/// The first non reserved inode
	pub s_first_ino: u32,
	/// The size of the inode structure in bytes.
	pub s_inode_size: u16,
	/// The block group containing the superblock.
	pub s_block_group_nr: u16,
	/// Optional features for the implementation to support.
	pub s_feature_compat: u32,
	/// Required features for the implementation to support.
	pub s_feature_incompat: u32,
	/// Required features for the implementation to support for writing.
	pub s_feature_ro_compat: u32,
	/// The filesystem id.
	pub s_uuid: [u8; 16],
	/// The volume name.
	pub s_volume_name: [u8; 16],
	/// The path the volume was last mounted to.
	pub s_last_mounted: [u8; 64],
	/// Used compression algorithms.
	pub s_algo_bitmap: u32,
	/// The number of blocks to preallocate for files.
	pub s_prealloc_blocks: u8,
	/// The number of blocks to preallocate for directories.
	pub s_prealloc_dir_blocks: u8,
	/// Unused.
	pub _pad: u16,
	/// The journal ID.
	pub s_journal_uuid: [u8; 16],
	/// The journal inode.
	pub s_journal_inum: u32,
	/// The journal device.
	pub s_journal_dev: u32,
	/// The head of orphan inodes list.
	pub s_last_orphan: u32,

	pub _padding: [u8; 788],
}

const _: () = assert!(core::mem::size_of::<Superblock>() == 1024);

impl Superblock {
	/// Creates a new instance by reading from the given device.
	pub fn read(dev: &mut dyn BlockDev) -> EResult<Self> {
		let mut sp = Self::zeroed();
		device::read_bytes(dev, SUPERBLOCK_OFFSET, bytemuck::bytes_of_mut(&mut sp))?;
		Ok(sp)
	}

	/// Writes the superblock back to the given device.
	pub fn write(&self, dev: &mut dyn BlockDev) -> EResult<()> {
		device::write_bytes(dev, SUPERBLOCK_OFFSET, bytemuck::bytes_of(self))
	}

	/// Tells whether the superblock is valid.
	pub fn is_valid(&self) -> bool {
		self.s_magic == EXT2_MAGIC
	}

	/// Returns the size of a block.
	pub fn get_block_size(&self) -> u32 {
		1024 << self.s_log_block_size
	}

	/// Returns the log2 of the number of block entries in each block.
	pub fn get_entries_per_block_log(&self) -> u32 {
		// An entry is 4 bytes long (`log2(4) = 2`)
		self.s_log_block_size + 10 - 2
	}

	/// Returns the block containing the beginning of the Block Group
	/// Descriptor Table.
	///
	/// This is the block following the superblock: block `2` with `1024` byte
	/// blocks, block `1` otherwise.
	pub fn get_bgdt_block(&self) -> u32 {
		self.s_first_data_block + 1
	}

	/// Returns the number of block groups.
	pub fn get_block_groups_count(&self) -> u32 {
		let data_blocks = self.s_blocks_count - self.s_first_data_block;
		data_blocks.div_ceil(self.s_blocks_per_group)
	}

	/// Returns the number of blocks in the group `group`.
	///
	/// Only the last group may span fewer blocks than
	/// [`Self::s_blocks_per_group`].
	pub fn get_group_blocks_count(&self, group: u32) -> u32 {
		let begin = self.s_first_data_block + group * self.s_blocks_per_group;
		core::cmp::min(self.s_blocks_count - begin, self.s_blocks_per_group)
	}

	/// Returns the size of an inode.
	pub fn get_inode_size(&self) -> usize {
		if self.s_rev_level >= 1 {
			self.s_inode_size as _
		} else {
			128
		}
	}

	/// Returns the first inode that isn't reserved.
	pub fn get_first_available_inode(&self) -> u32 {
		if self.s_rev_level >= 1 {
			max(self.s_first_ino, ROOT_DIRECTORY_INODE + 1)
		} else {
			11
		}
	}

	/// Checks the filesystem can be handled by the driver.
	///
	/// `readonly` tells whether the filesystem is to be mounted read-only.
	pub fn check(&self, readonly: bool) -> EResult<()> {
		if !self.is_valid() {
			log::error!("ext2: invalid superblock magic");
			return Err(errno::EINVAL);
		}
		if self.s_log_block_size > 2 {
			return Err(errno::EINVAL);
		}
		if self.s_blocks_per_group == 0
			|| self.s_inodes_per_group == 0
			|| self.s_blocks_count <= self.s_first_data_block
		{
			return Err(errno::EUCLEAN);
		}
		if self.s_rev_level >= 1 {
			let inode_size = self.s_inode_size as u32;
			if !inode_size.is_power_of_two()
				|| inode_size < 128
				|| inode_size > self.get_block_size()
			{
				return Err(errno::EINVAL);
			}
			let unsupported_required_features = REQUIRED_FEATURE_COMPRESSION
				| REQUIRED_FEATURE_JOURNAL_REPLAY
				| REQUIRED_FEATURE_JOURNAL_DEVICE;
			if self.s_feature_incompat & unsupported_required_features != 0 {
				log::error!(
					"ext2: unsupported incompatible features: {:#x}",
					self.s_feature_incompat
				);
				return Err(errno::EINVAL);
			}
			let unsupported_write_features = WRITE_REQUIRED_DIRECTORY_BINARY_TREE;
			if !readonly && self.s_feature_ro_compat & unsupported_write_features != 0 {
				return Err(errno::EROFS);
			}
		}
		Ok(())
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use core::mem::offset_of;

	#[test]
	fn layout() {
		// Offsets given by the on-disk format
		assert_eq!(offset_of!(Superblock, s_magic), 56);
		assert_eq!(offset_of!(Superblock, s_rev_level), 76);
		assert_eq!(offset_of!(Superblock, s_first_ino), 84);
		assert_eq!(offset_of!(Superblock, s_inode_size), 88);
		assert_eq!(offset_of!(Superblock, s_feature_incompat), 96);
	}

	#[test]
	fn check_magic() {
		let mut sp = Superblock::zeroed();
		sp.s_magic = EXT2_MAGIC;
		sp.s_blocks_per_group = 8192;
		sp.s_inodes_per_group = 1024;
		sp.s_blocks_count = 1024;
		sp.s_first_data_block = 1;
		assert_eq!(sp.check(true), Ok(()));
		sp.s_magic = 0x1234;
		assert_eq!(sp.check(true), Err(errno::EINVAL));
	}

	#[test]
	fn check_features() {
		let mut sp = Superblock::zeroed();
		sp.s_magic = EXT2_MAGIC;
		sp.s_blocks_per_group = 8192;
		sp.s_inodes_per_group = 1024;
		sp.s_blocks_count = 1024;
		sp.s_first_data_block = 1;
		sp.s_rev_level = 1;
		sp.s_inode_size = 128;
		sp.s_feature_ro_compat = WRITE_REQUIRED_DIRECTORY_BINARY_TREE;
		// Read-only is fine, read-write is not
		assert_eq!(sp.check(true), Ok(()));
		assert_eq!(sp.check(false), Err(errno::EROFS));
	}
}
