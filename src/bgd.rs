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

//! A Block Group Descriptor is a structure stored in the Block Group
//! Descriptor Table which represents a block group, which is a subdivision of
//! the filesystem.
//!
//! The table is contiguous and starts in the block following the superblock.
//! The driver keeps the whole table in memory for the lifetime of a mount and
//! writes it back on sync.

use bytemuck::Pod;
use bytemuck::Zeroable;

/// A block group descriptor.
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
pub struct BlockGroupDescriptor {
	/// The block address of the block usage bitmap.
	pub bg_block_bitmap: u32,
	/// The block address of the inode usage bitmap.
	pub bg_inode_bitmap: u32,
	/// Starting block address of inode table.
	pub bg_inode_table: u32,
	/// Number of unallocated blocks in group.
	pub bg_free_blocks_count: u16,
	/// Number of unallocated inodes in group.
	pub bg_free_inodes_count: u16,
	/// Number of directories in group.
	pub bg_used_dirs_count: u16,

	pub bg_pad: u16,
	pub bg_reserved: [u8; 12],
}

const _: () = assert!(core::mem::size_of::<BlockGroupDescriptor>() == 32);
