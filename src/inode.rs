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

//! An inode represents a file in the filesystem.
//!
//! The access to an inode's data is divided into several parts, each
//! overflowing on the next when full:
//! - Direct Block Pointers: each inode has 12 of them
//! - Singly Indirect Block Pointer: a pointer to a block dedicated to storing
//!   a list of more blocks to store the inode's data. The number of blocks it
//!   can store depends on the size of a block.
//! - Doubly Indirect Block Pointer: a pointer to a block storing pointers to
//!   Singly Indirect Block Pointers, each storing pointers to more blocks.
//! - Triply Indirect Block Pointer: a pointer to a block storing pointers to
//!   Doubly Indirect Block Pointers, each storing pointers to Singly Indirect
//!   Block Pointers, each storing pointers to more blocks.

use crate::bgd::BlockGroupDescriptor;
use crate::errno;
use crate::errno::EResult;
use crate::fs::Ext2Fs;
use crate::superblock::Superblock;
use crate::superblock::WRITE_REQUIRED_64_BITS;
use crate::FileType;
use crate::Mode;
use crate::Stat;
use bytemuck::Pod;
use bytemuck::Zeroable;
use core::cmp::max;
use core::cmp::min;

/// The maximum number of direct blocks for each inodes.
pub const DIRECT_BLOCKS_COUNT: usize = 12;

/// INode type: FIFO
pub const INODE_TYPE_FIFO: u16 = 0x1000;
/// INode type: Char device
pub const INODE_TYPE_CHAR_DEVICE: u16 = 0x2000;
/// INode type: Directory
pub const INODE_TYPE_DIRECTORY: u16 = 0x4000;
/// INode type: Block device
pub const INODE_TYPE_BLOCK_DEVICE: u16 = 0x6000;
/// INode type: Regular file
pub const INODE_TYPE_REGULAR: u16 = 0x8000;
/// INode type: Symbolic link
pub const INODE_TYPE_SYMLINK: u16 = 0xa000;
/// INode type: Socket
pub const INODE_TYPE_SOCKET: u16 = 0xc000;

/// The size of a sector in bytes, as counted by `i_blocks`.
const SECTOR_SIZE: u32 = 512;

/// The maximum length for a symlink target to be stored in the inode itself
/// instead of a separate block.
pub const SYMLINK_INLINE_LIMIT: u64 = 60;

/// The inode of the root directory.
pub const ROOT_DIRECTORY_INODE: u32 = 2;

impl FileType {
	/// Returns the type stored in the given inode mode.
	pub fn from_inode_mode(mode: u16) -> Self {
		match mode & 0xf000 {
			INODE_TYPE_FIFO => Self::Fifo,
			INODE_TYPE_CHAR_DEVICE => Self::CharDevice,
			INODE_TYPE_DIRECTORY => Self::Directory,
			INODE_TYPE_BLOCK_DEVICE => Self::BlockDevice,
			INODE_TYPE_SYMLINK => Self::Link,
			INODE_TYPE_SOCKET => Self::Socket,
			_ => Self::Regular,
		}
	}

	/// Returns the inode mode bits for the type.
	pub fn to_inode_mode(self) -> u16 {
		match self {
			Self::Fifo => INODE_TYPE_FIFO,
			Self::CharDevice => INODE_TYPE_CHAR_DEVICE,
			Self::Directory => INODE_TYPE_DIRECTORY,
			Self::BlockDevice => INODE_TYPE_BLOCK_DEVICE,
			Self::Regular => INODE_TYPE_REGULAR,
			Self::Link => INODE_TYPE_SYMLINK,
			Self::Socket => INODE_TYPE_SOCKET,
		}
	}
}

/// Returns the offset of the inode `ino` on the disk in bytes.
///
/// `ino` is the inode's number, starting at `1`.
pub fn inode_disk_offset(
	ino: u32,
	sp: &Superblock,
	bgdt: &[BlockGroupDescriptor],
) -> EResult<u64> {
	// Check the inode number is correct
	let Some(i) = ino.checked_sub(1) else {
		return Err(errno::EINVAL);
	};
	let blk_size = sp.get_block_size() as u64;
	let inode_size = sp.get_inode_size() as u64;
	let group = i / sp.s_inodes_per_group;
	let bgd = bgdt.get(group as usize).ok_or(errno::EUCLEAN)?;
	// The offset of the inode in the group's inode table
	let table_off = (i % sp.s_inodes_per_group) as u64 * inode_size;
	Ok(bgd.bg_inode_table as u64 * blk_size + table_off)
}

/// Computes the indirection offsets to reach the block at the linear offset
/// `off`.
///
/// Arguments:
/// - `ent_per_blk_log` is the log2 of the number of block entries in a block.
/// - `offsets` is the array to which the offsets are written.
///
/// On success, the function returns the number of offsets. The first is an
/// index in `i_block`, the next ones are entry indexes in successive
/// indirect blocks.
///
/// If the offset is out of bounds, the function returns
/// [`errno::EOVERFLOW`].
fn indirections_offsets(
	off: u32,
	ent_per_blk_log: u32,
	offsets: &mut [usize; 4],
) -> EResult<usize> {
	offsets.fill(0);
	let mut off = off as u64;
	if off < DIRECT_BLOCKS_COUNT as u64 {
		offsets[0] = off as _;
		return Ok(1);
	}
	off -= DIRECT_BLOCKS_COUNT as u64;
	let ent_per_blk = 1u64 << ent_per_blk_log;
	if off < ent_per_blk {
		offsets[0] = DIRECT_BLOCKS_COUNT;
		offsets[1] = off as _;
		return Ok(2);
	}
	off -= ent_per_blk;
	if off < ent_per_blk * ent_per_blk {
		offsets[0] = DIRECT_BLOCKS_COUNT + 1;
		offsets[1] = (off >> ent_per_blk_log) as _;
		offsets[2] = (off & (ent_per_blk - 1)) as _;
		return Ok(3);
	}
	off -= ent_per_blk * ent_per_blk;
	if off < ent_per_blk * ent_per_blk * ent_per_blk {
		offsets[0] = DIRECT_BLOCKS_COUNT + 2;
		offsets[1] = (off >> (ent_per_blk_log * 2)) as _;
		offsets[2] = ((off >> ent_per_blk_log) & (ent_per_blk - 1)) as _;
		offsets[3] = (off & (ent_per_blk - 1)) as _;
		return Ok(4);
	}
	Err(errno::EOVERFLOW)
}

/// Checks for an invalid block number.
///
/// If the block number is zero, the function returns `None`.
pub fn check_blk_off(blk: u32, sp: &Superblock) -> EResult<Option<u32>> {
	if blk >= sp.s_blocks_count {
		return Err(errno::EUCLEAN);
	}
	Ok((blk != 0).then_some(blk))
}

/// An inode represents a file in the filesystem.
///
/// The name of the file is not included in the inode but in the directory
/// entry associated with it since several entries can refer to the same inode
/// (hard links).
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
pub struct Ext2INode {
	/// Type and permissions.
	pub i_mode: u16,
	/// User ID.
	pub i_uid: u16,
	/// Lower 32 bits of size in bytes.
	pub i_size: u32,
	/// Timestamp of the last access.
	pub i_atime: u32,
	/// Timestamp of the last modification of the metadata.
	pub i_ctime: u32,
	/// Timestamp of the last modification of the content.
	pub i_mtime: u32,
	/// Timestamp of the deletion.
	pub i_dtime: u32,
	/// Group ID.
	pub i_gid: u16,
	/// The number of hard links to this inode.
	pub i_links_count: u16,
	/// The number of sectors used by this inode.
	pub i_blocks: u32,
	/// INode flags.
	pub i_flags: u32,
	/// OS-specific value.
	pub i_osd1: u32,
	/// Direct block pointers, then the singly, doubly and triply indirect
	/// block pointers.
	pub i_block: [u32; DIRECT_BLOCKS_COUNT + 3],
	/// Generation number.
	pub i_generation: u32,
	/// The file's ACL.
	pub i_file_acl: u32,
	/// Higher 32 bits of size in bytes.
	pub i_dir_acl: u32,
	/// Block address of fragment.
	pub i_faddr: u32,
	/// OS-specific value.
	pub i_osd2: [u8; 12],
}

const _: () = assert!(core::mem::size_of::<Ext2INode>() == 128);

impl Ext2INode {
	/// Returns the type of the file.
	pub fn get_type(&self) -> FileType {
		FileType::from_inode_mode(self.i_mode)
	}

	/// Returns the permissions of the file.
	pub fn get_permissions(&self) -> Mode {
		self.i_mode & 0o7777
	}

	/// Sets the permissions of the file, leaving the type bits untouched.
	pub fn set_permissions(&mut self, perm: Mode) {
		self.i_mode = (self.i_mode & !0o7777) | (perm & 0o7777);
	}

	/// Returns the size of the file.
	///
	/// `sp` is the filesystem's superblock.
	pub fn get_size(&self, sp: &Superblock) -> u64 {
		let has_version = sp.s_rev_level >= 1;
		let has_feature = sp.s_feature_ro_compat & WRITE_REQUIRED_64_BITS != 0;
		if has_version && has_feature && self.get_type() == FileType::Regular {
			((self.i_dir_acl as u64) << 32) | (self.i_size as u64)
		} else {
			self.i_size as u64
		}
	}

	/// Sets the file's size.
	///
	/// Arguments:
	/// - `sp` is the filesystem's superblock
	/// - `size` is the file's size
	/// - `inline` is `true` if the inode is a symlink storing its target
	///   inline
	pub fn set_size(&mut self, sp: &Superblock, size: u64, inline: bool) {
		let has_version = sp.s_rev_level >= 1;
		let has_feature = sp.s_feature_ro_compat & WRITE_REQUIRED_64_BITS != 0;
		if has_version && has_feature && self.get_type() == FileType::Regular {
			self.i_dir_acl = (size >> 32) as u32;
		}
		self.i_size = size as u32;
		if !inline {
			let blk_size = sp.get_block_size();
			let sector_per_blk = blk_size / SECTOR_SIZE;
			self.i_blocks = size.div_ceil(blk_size as _) as u32 * sector_per_blk;
		} else {
			self.i_blocks = 0;
		}
	}

	/// Returns the number of content blocks.
	pub fn get_blocks(&self, sp: &Superblock) -> u32 {
		let sector_per_blk = sp.get_block_size() / SECTOR_SIZE;
		self.i_blocks.div_ceil(sector_per_blk)
	}

	/// Returns the file's status.
	pub fn stat(&self, ino: u32, sp: &Superblock) -> Stat {
		Stat {
			inode: ino,
			kind: self.get_type(),
			mode: self.get_permissions(),
			nlink: self.i_links_count,
			uid: self.i_uid,
			gid: self.i_gid,
			size: self.get_size(sp),
			blocks: self.i_blocks,
			atime: self.i_atime,
			ctime: self.i_ctime,
			mtime: self.i_mtime,
		}
	}

	/// Translates the given file block offset `off` to a disk block offset.
	///
	/// If the block is a hole, the function returns `None`.
	pub fn translate_blk_off(&self, off: u32, fs: &mut Ext2Fs) -> EResult<Option<u32>> {
		let mut offsets: [usize; 4] = [0; 4];
		let depth = indirections_offsets(off, fs.sp.get_entries_per_block_log(), &mut offsets)?;
		let Some(mut blk_off) = check_blk_off(self.i_block[offsets[0]], &fs.sp)? else {
			return Ok(None);
		};
		// Perform indirections
		for off in &offsets[1..depth] {
			let ent = fs.read_blk_u32(blk_off, *off as u32)?;
			let Some(b) = check_blk_off(ent, &fs.sp)? else {
				return Ok(None);
			};
			blk_off = b;
		}
		Ok(Some(blk_off))
	}

	/// Allocates a block for the node's content block at the given file block
	/// offset `off`.
	///
	/// If a block is already allocated, the function returns it.
	///
	/// `hint_group` is the block group to which allocations should stick when
	/// possible.
	///
	/// Newly allocated blocks, intermediate included, are zeroed. On success,
	/// the function returns the allocated disk block offset.
	pub fn alloc_content_blk(
		&mut self,
		off: u32,
		hint_group: u32,
		fs: &mut Ext2Fs,
	) -> EResult<u32> {
		let mut offsets: [usize; 4] = [0; 4];
		let depth = indirections_offsets(off, fs.sp.get_entries_per_block_log(), &mut offsets)?;
		// Allocate the first level if needed
		let mut blk_off = match check_blk_off(self.i_block[offsets[0]], &fs.sp)? {
			Some(b) => b,
			None => {
				let new = fs.alloc_block(hint_group)?;
				fs.zero_blk(new)?;
				self.i_block[offsets[0]] = new;
				new
			}
		};
		// Perform indirections
		for off in &offsets[1..depth] {
			let ent = fs.read_blk_u32(blk_off, *off as u32)?;
			let b = match check_blk_off(ent, &fs.sp)? {
				Some(b) => b,
				None => {
					let new = fs.alloc_block(hint_group)?;
					fs.zero_blk(new)?;
					fs.write_blk_u32(blk_off, *off as u32, new)?;
					new
				}
			};
			blk_off = b;
		}
		Ok(blk_off)
	}

	/// Frees the chain of indirect blocks leading to the content block
	/// selected by `offsets`, starting at the indirect block `blk`.
	///
	/// Returns `true` when `blk` ended up with no used entry, telling the
	/// caller its own pointer to `blk` can be freed.
	fn free_content_blk_impl(blk: u32, offsets: &[usize], fs: &mut Ext2Fs) -> EResult<bool> {
		let Some(off) = offsets.first() else {
			return Ok(true);
		};
		let buf = fs.read_blk(blk)?;
		let read_ent = |i: usize| {
			let b = &buf[(i * 4)..(i * 4 + 4)];
			u32::from_le_bytes([b[0], b[1], b[2], b[3]])
		};
		let Some(ent) = check_blk_off(read_ent(*off), &fs.sp)? else {
			return Ok(false);
		};
		let ent_count = buf.len() / 4;
		let empty = (0..ent_count).all(|i| i == *off || read_ent(i) == 0);
		drop(buf);
		// Handle the child block and determine whether the entry in the current
		// block should be freed
		if !Self::free_content_blk_impl(ent, &offsets[1..], fs)? {
			return Ok(false);
		}
		fs.write_blk_u32(blk, *off as u32, 0)?;
		fs.free_block(ent)?;
		Ok(empty)
	}

	/// Frees the content block at the given file block offset `off`.
	///
	/// If the block is not allocated, the function does nothing.
	///
	/// Indirect blocks whose subtree becomes empty are freed as well.
	pub fn free_content_blk(&mut self, off: u32, fs: &mut Ext2Fs) -> EResult<()> {
		let mut offsets: [usize; 4] = [0; 4];
		let depth = indirections_offsets(off, fs.sp.get_entries_per_block_log(), &mut offsets)?;
		let Some(first) = check_blk_off(self.i_block[offsets[0]], &fs.sp)? else {
			return Ok(());
		};
		if Self::free_content_blk_impl(first, &offsets[1..depth], fs)? {
			self.i_block[offsets[0]] = 0;
			fs.free_block(first)?;
		}
		Ok(())
	}

	/// Truncates the file to the size `new_size`.
	///
	/// Every content block past the new end is freed, along with the indirect
	/// blocks whose subtree became empty. Growing the file only updates the
	/// size: the new range reads as a hole.
	pub fn truncate(&mut self, new_size: u64, fs: &mut Ext2Fs) -> EResult<()> {
		let blk_size = fs.sp.get_block_size() as u64;
		let old_size = self.get_size(&fs.sp);
		if new_size < old_size {
			let start = new_size.div_ceil(blk_size) as u32;
			let end = old_size.div_ceil(blk_size) as u32;
			for off in start..end {
				self.free_content_blk(off, fs)?;
			}
		}
		self.set_size(&fs.sp, new_size, false);
		Ok(())
	}

	/// Frees all the content blocks of the inode.
	pub fn free_content(&mut self, fs: &mut Ext2Fs) -> EResult<()> {
		// If the file is a symlink storing its target inline, there is nothing
		// to free
		if self.get_type() == FileType::Link && self.get_size(&fs.sp) <= SYMLINK_INLINE_LIMIT {
			self.set_size(&fs.sp, 0, true);
			self.i_block.fill(0);
			return Ok(());
		}
		self.truncate(0, fs)
	}

	/// Reads the content of the inode at the byte offset `off` into `buf`.
	///
	/// Holes read as zeros. The function returns the number of bytes read,
	/// clamped to the size of the file.
	pub fn read_content(&self, off: u64, buf: &mut [u8], fs: &mut Ext2Fs) -> EResult<usize> {
		let size = self.get_size(&fs.sp);
		if off >= size {
			return Ok(0);
		}
		let blk_size = fs.sp.get_block_size() as u64;
		let max = min(buf.len(), (size - off) as usize);
		let mut i = 0;
		while i < max {
			let cur = off + i as u64;
			let blk_off = (cur / blk_size) as u32;
			let inner_off = (cur % blk_size) as usize;
			let len = min(max - i, blk_size as usize - inner_off);
			match self.translate_blk_off(blk_off, fs)? {
				Some(blk) => {
					let blk = fs.read_blk(blk)?;
					buf[i..(i + len)].copy_from_slice(&blk[inner_off..(inner_off + len)]);
				}
				// Hole
				None => buf[i..(i + len)].fill(0),
			}
			i += len;
		}
		Ok(max)
	}

	/// Writes the content of the inode at the byte offset `off` from `buf`,
	/// allocating blocks as necessary.
	///
	/// `hint_group` is the preferred block group for allocations.
	///
	/// The file is grown if the write reaches past its current end.
	pub fn write_content(
		&mut self,
		off: u64,
		buf: &[u8],
		hint_group: u32,
		fs: &mut Ext2Fs,
	) -> EResult<()> {
		fs.require_writable()?;
		let curr_size = self.get_size(&fs.sp);
		let blk_size = fs.sp.get_block_size() as u64;
		let mut i = 0;
		while i < buf.len() {
			let cur = off + i as u64;
			let file_blk_off = (cur / blk_size) as u32;
			let inner_off = (cur % blk_size) as usize;
			let len = min(buf.len() - i, blk_size as usize - inner_off);
			let blk_off = self.alloc_content_blk(file_blk_off, hint_group, fs)?;
			if inner_off == 0 && len == blk_size as usize {
				fs.write_blk(blk_off, &buf[i..(i + len)])?;
			} else {
				let mut blk = fs.read_blk(blk_off)?;
				blk[inner_off..(inner_off + len)].copy_from_slice(&buf[i..(i + len)]);
				fs.write_blk(blk_off, &blk)?;
			}
			i += len;
		}
		let new_size = max(off + buf.len() as u64, curr_size);
		self.set_size(&fs.sp, new_size, false);
		Ok(())
	}

	/// Returns the target of the symbolic link.
	///
	/// If the file is not a symbolic link, the function returns
	/// [`errno::EINVAL`].
	pub fn read_link(&self, fs: &mut Ext2Fs) -> EResult<alloc::vec::Vec<u8>> {
		if self.get_type() != FileType::Link {
			return Err(errno::EINVAL);
		}
		let size = self.get_size(&fs.sp);
		if size > crate::limits::PATH_MAX as u64 {
			return Err(errno::EUCLEAN);
		}
		if size <= SYMLINK_INLINE_LIMIT {
			// The target is stored inline in the inode
			let src = bytemuck::cast_slice::<u32, u8>(&self.i_block);
			Ok(src[..size as usize].to_vec())
		} else {
			let blk = check_blk_off(self.i_block[0], &fs.sp)?.ok_or(errno::EUCLEAN)?;
			let blk = fs.read_blk(blk)?;
			if size as usize > blk.len() {
				return Err(errno::EUCLEAN);
			}
			Ok(blk[..size as usize].to_vec())
		}
	}
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn indirections() {
		// 1024 bytes blocks: 256 entries per block
		let log = 8;
		let mut offsets = [0usize; 4];

		let depth = indirections_offsets(0, log, &mut offsets).unwrap();
		assert_eq!((depth, offsets[0]), (1, 0));

		let depth = indirections_offsets(11, log, &mut offsets).unwrap();
		assert_eq!((depth, offsets[0]), (1, 11));

		let depth = indirections_offsets(12, log, &mut offsets).unwrap();
		assert_eq!((depth, &offsets[..2]), (2, [12, 0].as_slice()));

		let depth = indirections_offsets(12 + 255, log, &mut offsets).unwrap();
		assert_eq!((depth, &offsets[..2]), (2, [12, 255].as_slice()));

		let depth = indirections_offsets(12 + 256, log, &mut offsets).unwrap();
		assert_eq!((depth, &offsets[..3]), (3, [13, 0, 0].as_slice()));

		let depth = indirections_offsets(12 + 256 + 256 * 256, log, &mut offsets).unwrap();
		assert_eq!((depth, &offsets[..4]), (4, [14, 0, 0, 0].as_slice()));

		let last = 12 + 256 + 256 * 256 + 256 * 256 * 256 - 1;
		let depth = indirections_offsets(last as u32, log, &mut offsets).unwrap();
		assert_eq!((depth, &offsets[..4]), (4, [14, 255, 255, 255].as_slice()));

		let res = indirections_offsets(last as u32 + 1, log, &mut offsets);
		assert_eq!(res, Err(errno::EOVERFLOW));
	}

	#[test]
	fn mode_type() {
		assert_eq!(FileType::from_inode_mode(INODE_TYPE_DIRECTORY | 0o755), FileType::Directory);
		assert_eq!(FileType::from_inode_mode(INODE_TYPE_REGULAR | 0o644), FileType::Regular);
		assert_eq!(FileType::from_inode_mode(INODE_TYPE_SYMLINK | 0o777), FileType::Link);
	}

	use crate::fs::test::new_fs;
	use crate::fs::Ext2Fs;
	use alloc::vec;
	use alloc::vec::Vec;

	fn new_file(fs: &mut Ext2Fs) -> Ext2INode {
		let (_, ent) = fs.alloc_inode(0, false).unwrap();
		let mut body = *ent.lock();
		body.i_mode = INODE_TYPE_REGULAR | 0o644;
		body.i_links_count = 1;
		body
	}

	#[test]
	fn content_roundtrip_singly_indirect() {
		let mut fs = new_fs();
		let mut body = new_file(&mut fs);
		// 64 KiB spans the direct blocks and part of the singly indirect
		// block
		let data: Vec<u8> = (0..65536u32).map(|i| (i % 251) as u8).collect();
		body.write_content(0, &data, 0, &mut fs).unwrap();
		assert_eq!(body.get_size(&fs.sp), 65536);
		let mut out = vec![0u8; 65536];
		assert_eq!(body.read_content(0, &mut out, &mut fs).unwrap(), 65536);
		assert_eq!(out, data);
		// Unaligned read in the middle
		let mut out = vec![0u8; 1000];
		assert_eq!(body.read_content(1500, &mut out, &mut fs).unwrap(), 1000);
		assert_eq!(out[..], data[1500..2500]);
		// Reads are clamped to the file's size
		let mut out = vec![0u8; 64];
		assert_eq!(body.read_content(65530, &mut out, &mut fs).unwrap(), 6);
	}

	#[test]
	fn doubly_indirect_block() {
		let mut fs = new_fs();
		let mut body = new_file(&mut fs);
		// Block offset landing in the doubly indirect area (> 12 + 256)
		let blk_off = 12 + 256 + 5;
		let byte_off = blk_off as u64 * 1024;
		body.write_content(byte_off, b"deep", 0, &mut fs).unwrap();
		assert!(body.translate_blk_off(blk_off, &mut fs).unwrap().is_some());
		// Everything before is a hole
		assert_eq!(body.translate_blk_off(0, &mut fs).unwrap(), None);
		let mut out = [0u8; 4];
		body.read_content(byte_off, &mut out, &mut fs).unwrap();
		assert_eq!(&out, b"deep");
	}

	#[test]
	fn holes_read_zero() {
		let mut fs = new_fs();
		let mut body = new_file(&mut fs);
		// A leading hole: block 0 is never allocated
		body.write_content(4096, &[0xaau8; 4096], 0, &mut fs).unwrap();
		assert_eq!(body.translate_blk_off(0, &mut fs).unwrap(), None);
		let mut out = vec![0xffu8; 4096];
		assert_eq!(body.read_content(0, &mut out, &mut fs).unwrap(), 4096);
		assert!(out.iter().all(|b| *b == 0));
		let mut out = vec![0u8; 4096];
		assert_eq!(body.read_content(4096, &mut out, &mut fs).unwrap(), 4096);
		assert!(out.iter().all(|b| *b == 0xaa));
	}

	#[test]
	fn truncate_frees_blocks() {
		let mut fs = new_fs();
		let mut body = new_file(&mut fs);
		let free = fs.sp.s_free_blocks_count;
		let data = vec![7u8; 65536];
		body.write_content(0, &data, 0, &mut fs).unwrap();
		assert!(fs.sp.s_free_blocks_count < free);
		// Shrink halfway, then to zero
		body.truncate(4096, &mut fs).unwrap();
		assert_eq!(body.get_size(&fs.sp), 4096);
		body.truncate(0, &mut fs).unwrap();
		assert_eq!(body.get_size(&fs.sp), 0);
		// Data and indirect blocks are all back
		assert_eq!(fs.sp.s_free_blocks_count, free);
		crate::fs::test::check_free_counts(&fs);
		assert!(body.i_block.iter().all(|b| *b == 0));
	}

	#[test]
	fn symlink_inline_target() {
		let mut fs = new_fs();
		let (_, ent) = fs.alloc_inode(0, false).unwrap();
		let mut body = *ent.lock();
		body.i_mode = INODE_TYPE_SYMLINK | 0o777;
		let target = b"some/where";
		let dst = bytemuck::cast_slice_mut::<u32, u8>(&mut body.i_block);
		dst[..target.len()].copy_from_slice(target);
		body.set_size(&fs.sp, target.len() as u64, true);
		assert_eq!(body.read_link(&mut fs).unwrap(), target);
		assert_eq!(body.i_blocks, 0);
	}
}
