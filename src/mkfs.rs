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

//! Creation of a fresh ext2 filesystem on a block device.
//!
//! The formatter writes a revision 1 layout: every block group holds a block
//! reserved for the superblock (or its backup), the descriptor table, one
//! block bitmap block, one inode bitmap block, the group's slice of the inode
//! table, then data blocks. The root directory is built through the regular
//! directory record writer.

use crate::bgd::BlockGroupDescriptor;
use crate::device;
use crate::device::BlockDev;
use crate::dirent;
use crate::dirent::Dirent;
use crate::errno;
use crate::errno::EResult;
use crate::inode;
use crate::inode::Ext2INode;
use crate::superblock::Superblock;
use crate::superblock::EXT2_MAGIC;
use crate::superblock::FS_STATE_CLEAN;
use crate::superblock::ERR_ACTION_READ_ONLY;
use crate::superblock::REQUIRED_FEATURE_DIRECTORY_TYPE;
use crate::superblock::SUPERBLOCK_OFFSET;
use crate::superblock::WRITE_REQUIRED_64_BITS;
use crate::FileType;
use alloc::vec;
use alloc::vec::Vec;
use bytemuck::Zeroable;

/// Default number of mounts in between each fsck.
const DEFAULT_MOUNT_COUNT_BEFORE_FSCK: u16 = 1000;
/// Default elapsed time in between each fsck in seconds.
const DEFAULT_FSCK_INTERVAL: u32 = 16070400;

/// The size of an inode written by the formatter.
const INODE_SIZE: u32 = 128;

/// Sets the bits `range` in the bitmap `buf`.
fn bitmap_set_range(buf: &mut [u8], range: core::ops::Range<u32>) {
	for i in range {
		buf[(i / 8) as usize] |= 1 << (i % 8);
	}
}

/// Formats the device with an empty ext2 filesystem.
///
/// Arguments:
/// - `blk_size` is the filesystem's block size. It must be `1024`, `2048` or
///   `4096`.
/// - `timestamp` is the creation timestamp.
pub fn mkfs(dev: &mut dyn BlockDev, blk_size: u32, timestamp: u32) -> EResult<()> {
	if !matches!(blk_size, 1024 | 2048 | 4096) {
		return Err(errno::EINVAL);
	}
	if !dev.writable() {
		return Err(errno::EROFS);
	}
	let dev_len = dev.block_count() * dev.block_size() as u64;
	let total_blocks = u32::try_from(dev_len / blk_size as u64).unwrap_or(u32::MAX);
	let first_data_block = (blk_size == 1024) as u32;
	let blocks_per_group = 8 * blk_size;
	let groups_count = (total_blocks - first_data_block).div_ceil(blocks_per_group);
	let bgdt_blocks = (groups_count * 32).div_ceil(blk_size);
	// One inode for 4 data blocks, rounded to fill the inode table's blocks
	let inodes_per_blk = blk_size / INODE_SIZE;
	let inodes_per_group = (blocks_per_group / 4).next_multiple_of(inodes_per_blk);
	let itable_blocks = (inodes_per_group * INODE_SIZE).div_ceil(blk_size);
	// sb/backup + bgdt + block bitmap + inode bitmap + inode table
	let meta_blocks = 1 + bgdt_blocks + 1 + 1 + itable_blocks;
	// The smallest acceptable volume is one group holding its metadata, the
	// root directory and some data
	if total_blocks < first_data_block + meta_blocks + 8 {
		return Err(errno::EINVAL);
	}
	let reserved_inodes = 10;

	let mut bgdt: Vec<BlockGroupDescriptor> = Vec::with_capacity(groups_count as usize);
	let mut free_blocks_total = 0u32;
	let mut free_inodes_total = 0u32;
	let mut root_blk = 0u32;
	let zero_blk = vec![0u8; blk_size as usize];
	for group in 0..groups_count {
		let group_start = first_data_block + group * blocks_per_group;
		let blocks_in_group = (total_blocks - group_start).min(blocks_per_group);
		if blocks_in_group <= meta_blocks + 1 {
			return Err(errno::EINVAL);
		}
		let block_bitmap = group_start + 1 + bgdt_blocks;
		let inode_bitmap = block_bitmap + 1;
		let inode_table = inode_bitmap + 1;
		// Compose the block bitmap
		let mut bitmap = vec![0u8; blk_size as usize];
		let mut used = meta_blocks;
		if group == 0 {
			// The first data block goes to the root directory
			root_blk = group_start + meta_blocks;
			used += 1;
		}
		bitmap_set_range(&mut bitmap, 0..used);
		// Mark the bits past the end of the volume
		bitmap_set_range(&mut bitmap, blocks_in_group..blocks_per_group);
		device::write_bytes(dev, block_bitmap as u64 * blk_size as u64, &bitmap)?;
		// Compose the inode bitmap
		let mut bitmap = vec![0u8; blk_size as usize];
		let used_inodes = if group == 0 { reserved_inodes } else { 0 };
		bitmap_set_range(&mut bitmap, 0..used_inodes);
		bitmap_set_range(&mut bitmap, inodes_per_group..8 * blk_size);
		device::write_bytes(dev, inode_bitmap as u64 * blk_size as u64, &bitmap)?;
		// Zero the inode table
		for i in 0..itable_blocks {
			device::write_bytes(
				dev,
				(inode_table + i) as u64 * blk_size as u64,
				&zero_blk,
			)?;
		}
		let free_blocks = blocks_in_group - used;
		let free_inodes = inodes_per_group - used_inodes;
		free_blocks_total += free_blocks;
		free_inodes_total += free_inodes;
		bgdt.push(BlockGroupDescriptor {
			bg_block_bitmap: block_bitmap,
			bg_inode_bitmap: inode_bitmap,
			bg_inode_table: inode_table,
			bg_free_blocks_count: free_blocks as u16,
			bg_free_inodes_count: free_inodes as u16,
			bg_used_dirs_count: (group == 0) as u16,
			bg_pad: 0,
			bg_reserved: [0; 12],
		});
	}

	let sp = Superblock {
		s_inodes_count: groups_count * inodes_per_group,
		s_blocks_count: total_blocks,
		s_r_blocks_count: 0,
		s_free_blocks_count: free_blocks_total,
		s_free_inodes_count: free_inodes_total,
		s_first_data_block: first_data_block,
		s_log_block_size: blk_size.trailing_zeros() - 10,
		s_log_frag_size: blk_size.trailing_zeros() - 10,
		s_blocks_per_group: blocks_per_group,
		s_frags_per_group: blocks_per_group,
		s_inodes_per_group: inodes_per_group,
		s_mtime: 0,
		s_wtime: timestamp,
		s_mnt_count: 0,
		s_max_mnt_count: DEFAULT_MOUNT_COUNT_BEFORE_FSCK,
		s_magic: EXT2_MAGIC,
		s_state: FS_STATE_CLEAN,
		s_errors: ERR_ACTION_READ_ONLY,
		s_minor_rev_level: 0,
		s_lastcheck: timestamp,
		s_checkinterval: DEFAULT_FSCK_INTERVAL,
		s_creator_os: 0,
		s_rev_level: 1,
		s_def_resuid: 0,
		s_def_resgid: 0,
		s_first_ino: reserved_inodes + 1,
		s_inode_size: INODE_SIZE as u16,
		s_block_group_nr: 0,
		s_feature_compat: 0,
		s_feature_incompat: REQUIRED_FEATURE_DIRECTORY_TYPE,
		s_feature_ro_compat: WRITE_REQUIRED_64_BITS,
		s_uuid: [0; 16],
		s_volume_name: [0; 16],
		s_last_mounted: [0; 64],
		s_algo_bitmap: 0,
		s_prealloc_blocks: 0,
		s_prealloc_dir_blocks: 0,
		_pad: 0,
		s_journal_uuid: [0; 16],
		s_journal_inum: 0,
		s_journal_dev: 0,
		s_last_orphan: 0,
		_padding: [0; 788],
	};

	// The root directory's block
	let mut buf = vec![0u8; blk_size as usize];
	let dot_len = dirent::record_len(1);
	Dirent::write(
		&mut buf,
		&sp,
		inode::ROOT_DIRECTORY_INODE,
		dot_len as u16,
		Some(FileType::Directory),
		b".",
	)?;
	Dirent::write(
		&mut buf[dot_len..],
		&sp,
		inode::ROOT_DIRECTORY_INODE,
		(blk_size as usize - dot_len) as u16,
		Some(FileType::Directory),
		b"..",
	)?;
	device::write_bytes(dev, root_blk as u64 * blk_size as u64, &buf)?;

	// The root directory's inode
	let mut root = Ext2INode::zeroed();
	root.i_mode = inode::INODE_TYPE_DIRECTORY | 0o755;
	root.i_links_count = 2;
	root.i_atime = timestamp;
	root.i_ctime = timestamp;
	root.i_mtime = timestamp;
	root.i_block[0] = root_blk;
	root.set_size(&sp, blk_size as u64, false);
	let root_off = bgdt[0].bg_inode_table as u64 * blk_size as u64
		+ (inode::ROOT_DIRECTORY_INODE - 1) as u64 * INODE_SIZE as u64;
	device::write_bytes(dev, root_off, bytemuck::bytes_of(&root))?;

	// The descriptor table, then the superblock
	let bgdt_off = (first_data_block + 1) as u64 * blk_size as u64;
	device::write_bytes(dev, bgdt_off, bytemuck::cast_slice(bgdt.as_slice()))?;
	device::write_bytes(dev, SUPERBLOCK_OFFSET, bytemuck::bytes_of(&sp))?;
	log::info!(
		"ext2: formatted {total_blocks} blocks of {blk_size} bytes in {groups_count} group(s)"
	);
	Ok(())
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::device::RamDisk;
	use crate::fs::Ext2Fs;
	use alloc::boxed::Box;

	#[test]
	fn fresh_fs_is_consistent() {
		let mut disk = RamDisk::new(512, 4096);
		mkfs(&mut disk, 1024, 42).unwrap();
		let mut fs = Ext2Fs::open(Box::new(disk), false).unwrap();
		crate::fs::test::check_free_counts(&fs);
		assert_eq!(fs.sp.get_block_size(), 1024);
		assert_eq!(fs.sp.get_first_available_inode(), 11);
		// The root directory exists, is a directory and is empty
		let root = fs.get_inode(inode::ROOT_DIRECTORY_INODE).unwrap();
		let body = *root.lock();
		assert_eq!(body.get_type(), crate::FileType::Directory);
		assert_eq!(body.i_links_count, 2);
		assert_eq!(body.get_size(&fs.sp), 1024);
		assert!(fs.dir_is_empty(&body).unwrap());
		let (dot, _) = fs.dir_lookup(&body, b".").unwrap().unwrap();
		let (dotdot, _) = fs.dir_lookup(&body, b"..").unwrap().unwrap();
		assert_eq!(dot, inode::ROOT_DIRECTORY_INODE);
		assert_eq!(dotdot, inode::ROOT_DIRECTORY_INODE);
	}

	#[test]
	fn bigger_block_sizes() {
		for blk_size in [2048u32, 4096] {
			let mut disk = RamDisk::new(512, 65536);
			mkfs(&mut disk, blk_size, 1).unwrap();
			let mut fs = Ext2Fs::open(Box::new(disk), false).unwrap();
			assert_eq!(fs.sp.get_block_size(), blk_size);
			assert_eq!(fs.sp.s_first_data_block, 0);
			crate::fs::test::check_free_counts(&fs);
			let root = fs.get_inode(inode::ROOT_DIRECTORY_INODE).unwrap();
			let body = *root.lock();
			assert!(fs.dir_is_empty(&body).unwrap());
		}
	}

	#[test]
	fn device_too_small() {
		let mut disk = RamDisk::new(512, 16);
		assert_eq!(mkfs(&mut disk, 1024, 1), Err(errno::EINVAL));
	}
}
