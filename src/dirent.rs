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

//! A directory entry is an entry stored into an inode's content which
//! represents a subfile in a directory.
//!
//! Each block of a directory is an independent sequence of variable-length
//! records which partition the block exactly: the last record of a block
//! always reaches the block's end, and no record crosses a block boundary.
//! A record whose inode number is zero is free space.

use crate::errno;
use crate::errno::EResult;
use crate::fs::Ext2Fs;
use crate::inode::Ext2INode;
use crate::limits::NAME_MAX;
use crate::superblock::Superblock;
use crate::superblock::REQUIRED_FEATURE_DIRECTORY_TYPE;
use crate::FileType;
use alloc::vec;
use alloc::vec::Vec;

/// Directory entry type indicator: Unknown
const TYPE_INDICATOR_UNKNOWN: u8 = 0;
/// Directory entry type indicator: Regular file
const TYPE_INDICATOR_REGULAR: u8 = 1;
/// Directory entry type indicator: Directory
const TYPE_INDICATOR_DIRECTORY: u8 = 2;
/// Directory entry type indicator: Char device
const TYPE_INDICATOR_CHAR_DEVICE: u8 = 3;
/// Directory entry type indicator: Block device
const TYPE_INDICATOR_BLOCK_DEVICE: u8 = 4;
/// Directory entry type indicator: FIFO
const TYPE_INDICATOR_FIFO: u8 = 5;
/// Directory entry type indicator: Socket
const TYPE_INDICATOR_SOCKET: u8 = 6;
/// Directory entry type indicator: Symbolic link
const TYPE_INDICATOR_SYMLINK: u8 = 7;

/// The offset of the `name` field in a record.
pub const NAME_OFF: usize = 8;
/// The alignment of directory records.
pub const ALIGN: usize = 4;

/// Returns the length of the record required to store a name of `name_len`
/// bytes.
pub const fn record_len(name_len: usize) -> usize {
	(NAME_OFF + name_len).next_multiple_of(ALIGN)
}

/// A directory record, borrowed from a block buffer.
#[derive(Clone, Copy)]
pub struct Dirent<'b> {
	/// The inode associated with the entry. Zero means the record is free.
	pub inode: u32,
	/// The total size of the record.
	pub rec_len: u16,
	/// Name length least-significant bits.
	name_len: u8,
	/// Name length most-significant bits or type indicator (if enabled).
	file_type: u8,
	/// The record's name.
	name: &'b [u8],
}

impl<'b> Dirent<'b> {
	/// Reads the record at the beginning of `slice`.
	///
	/// `slice` must reach the end of the record's block so the bounds can be
	/// checked. If the record is invalid, the function returns
	/// [`errno::EUCLEAN`].
	pub fn parse(slice: &'b [u8], sp: &Superblock) -> EResult<Self> {
		if slice.len() < NAME_OFF {
			return Err(errno::EUCLEAN);
		}
		let inode = u32::from_le_bytes([slice[0], slice[1], slice[2], slice[3]]);
		let rec_len = u16::from_le_bytes([slice[4], slice[5]]);
		let name_len = slice[6];
		let file_type = slice[7];
		if (rec_len as usize) > slice.len()
			|| (rec_len as usize) < NAME_OFF
			|| (rec_len as usize) % ALIGN != 0
		{
			return Err(errno::EUCLEAN);
		}
		let mut ent = Self {
			inode,
			rec_len,
			name_len,
			file_type,
			name: b"",
		};
		let name_len = ent.name_len(sp);
		if !ent.is_free() {
			if NAME_OFF + name_len > rec_len as usize {
				return Err(errno::EUCLEAN);
			}
			ent.name = &slice[NAME_OFF..(NAME_OFF + name_len)];
		}
		Ok(ent)
	}

	/// Writes a new record at the beginning of `slice`.
	///
	/// Arguments:
	/// - `sp` is the filesystem's superblock
	/// - `entry_inode` is the target inode (zero for a free record)
	/// - `rec_len` is the total length of the record
	/// - `file_type` is the file type hint of the entry
	/// - `name` is the name of the entry
	pub fn write(
		slice: &mut [u8],
		sp: &Superblock,
		entry_inode: u32,
		rec_len: u16,
		file_type: Option<FileType>,
		name: &[u8],
	) -> EResult<()> {
		if (rec_len as usize) > slice.len()
			|| (rec_len as usize) < NAME_OFF + name.len()
			|| (rec_len as usize) % ALIGN != 0
		{
			return Err(errno::EINVAL);
		}
		if name.len() > NAME_MAX {
			return Err(errno::ENAMETOOLONG);
		}
		slice[0..4].copy_from_slice(&entry_inode.to_le_bytes());
		slice[4..6].copy_from_slice(&rec_len.to_le_bytes());
		slice[6] = name.len() as u8;
		slice[7] = if sp.s_feature_incompat & REQUIRED_FEATURE_DIRECTORY_TYPE != 0 {
			type_indicator(file_type)
		} else {
			(name.len() >> 8) as u8
		};
		slice[NAME_OFF..(NAME_OFF + name.len())].copy_from_slice(name);
		Ok(())
	}

	/// Returns the length of the record's name.
	pub fn name_len(&self, sp: &Superblock) -> usize {
		if sp.s_feature_incompat & REQUIRED_FEATURE_DIRECTORY_TYPE == 0 {
			((self.file_type as usize) << 8) | (self.name_len as usize)
		} else {
			self.name_len as usize
		}
	}

	/// Returns the record's name.
	pub fn name(&self) -> &'b [u8] {
		self.name
	}

	/// Returns the file type hint of the record.
	///
	/// If the record does not carry one, the function returns `None`.
	pub fn file_type(&self, sp: &Superblock) -> Option<FileType> {
		if sp.s_feature_incompat & REQUIRED_FEATURE_DIRECTORY_TYPE == 0 {
			return None;
		}
		match self.file_type {
			TYPE_INDICATOR_REGULAR => Some(FileType::Regular),
			TYPE_INDICATOR_DIRECTORY => Some(FileType::Directory),
			TYPE_INDICATOR_CHAR_DEVICE => Some(FileType::CharDevice),
			TYPE_INDICATOR_BLOCK_DEVICE => Some(FileType::BlockDevice),
			TYPE_INDICATOR_FIFO => Some(FileType::Fifo),
			TYPE_INDICATOR_SOCKET => Some(FileType::Socket),
			TYPE_INDICATOR_SYMLINK => Some(FileType::Link),
			_ => None,
		}
	}

	/// Tells whether the record is free.
	pub fn is_free(&self) -> bool {
		self.inode == 0
	}
}

/// Returns the type indicator byte for the given file type.
fn type_indicator(file_type: Option<FileType>) -> u8 {
	match file_type {
		None => TYPE_INDICATOR_UNKNOWN,
		Some(FileType::Regular) => TYPE_INDICATOR_REGULAR,
		Some(FileType::Directory) => TYPE_INDICATOR_DIRECTORY,
		Some(FileType::CharDevice) => TYPE_INDICATOR_CHAR_DEVICE,
		Some(FileType::BlockDevice) => TYPE_INDICATOR_BLOCK_DEVICE,
		Some(FileType::Fifo) => TYPE_INDICATOR_FIFO,
		Some(FileType::Socket) => TYPE_INDICATOR_SOCKET,
		Some(FileType::Link) => TYPE_INDICATOR_SYMLINK,
	}
}

/// An owned copy of a directory record, as returned to `readdir`.
pub struct DirentInfo {
	/// The target inode.
	pub inode: u32,
	/// The entry's name.
	pub name: Vec<u8>,
	/// The file type hint, if the filesystem stores one.
	pub file_type: Option<FileType>,
}

/// Tells whether the block contains only free records.
fn block_all_free(buf: &[u8], sp: &Superblock) -> EResult<bool> {
	let mut off = 0;
	while off < buf.len() {
		let ent = Dirent::parse(&buf[off..], sp)?;
		if !ent.is_free() {
			return Ok(false);
		}
		off += ent.rec_len as usize;
	}
	Ok(true)
}

impl Ext2Fs {
	/// Calls `f` for each record of the directory `dir`, free records
	/// included, with the byte offset of the record and the record itself.
	///
	/// `f` returns whether the iteration should continue.
	pub fn for_each_dirent<F>(&mut self, dir: &Ext2INode, mut f: F) -> EResult<()>
	where
		F: FnMut(u64, &Dirent) -> EResult<bool>,
	{
		let blk_size = self.blk_size() as u64;
		let size = dir.get_size(&self.sp);
		let mut base = 0;
		while base < size {
			let file_blk = (base / blk_size) as u32;
			// A directory has no holes
			let blk = dir
				.translate_blk_off(file_blk, self)?
				.ok_or(errno::EUCLEAN)?;
			let buf = self.read_blk(blk)?;
			let mut off = 0;
			while off < buf.len() {
				let ent = Dirent::parse(&buf[off..], &self.sp)?;
				if !f(base + off as u64, &ent)? {
					return Ok(());
				}
				off += ent.rec_len as usize;
			}
			base += blk_size;
		}
		Ok(())
	}

	/// Returns the inode number and byte offset of the entry with the given
	/// name in the directory `dir`.
	///
	/// Names are compared by length first, then bytes.
	///
	/// If the entry does not exist, the function returns `None`.
	pub fn dir_lookup(&mut self, dir: &Ext2INode, name: &[u8]) -> EResult<Option<(u32, u64)>> {
		if dir.get_type() != FileType::Directory {
			return Err(errno::ENOTDIR);
		}
		let mut res = None;
		self.for_each_dirent(dir, |off, ent| {
			if !ent.is_free() && ent.name() == name {
				res = Some((ent.inode, off));
				Ok(false)
			} else {
				Ok(true)
			}
		})?;
		Ok(res)
	}

	/// Tells whether the directory `dir` contains entries other than `.` and
	/// `..`.
	pub fn dir_is_empty(&mut self, dir: &Ext2INode) -> EResult<bool> {
		let mut empty = true;
		self.for_each_dirent(dir, |_, ent| {
			if !ent.is_free() && ent.name() != b"." && ent.name() != b".." {
				empty = false;
				Ok(false)
			} else {
				Ok(true)
			}
		})?;
		Ok(empty)
	}

	/// Reads the record at the byte offset `off` of the directory `dir`.
	///
	/// On success, the function returns the offset of the next record along
	/// with an owned copy of the record. Past the end of the directory, it
	/// returns `None`.
	pub fn read_dirent_at(
		&mut self,
		dir: &Ext2INode,
		off: u64,
	) -> EResult<Option<(u64, DirentInfo)>> {
		let blk_size = self.blk_size() as u64;
		if off >= dir.get_size(&self.sp) {
			return Ok(None);
		}
		let file_blk = (off / blk_size) as u32;
		let inner = (off % blk_size) as usize;
		let blk = dir
			.translate_blk_off(file_blk, self)?
			.ok_or(errno::EUCLEAN)?;
		let buf = self.read_blk(blk)?;
		let ent = Dirent::parse(&buf[inner..], &self.sp)?;
		let info = DirentInfo {
			inode: ent.inode,
			name: ent.name().to_vec(),
			file_type: ent.file_type(&self.sp),
		};
		Ok(Some((off + ent.rec_len as u64, info)))
	}

	/// Adds a new entry to the directory `dir`.
	///
	/// Arguments:
	/// - `dir_ino` is the inode number of the directory
	/// - `dir` is the directory's inode
	/// - `name` is the name of the entry
	/// - `entry_inode` is the inode the entry points to
	/// - `file_type` is the file type hint of the entry
	///
	/// The function scans for a record with enough trailing slack, splits it
	/// when found, and otherwise appends a new block to the directory.
	pub fn dir_add_entry(
		&mut self,
		dir_ino: u32,
		dir: &mut Ext2INode,
		name: &[u8],
		entry_inode: u32,
		file_type: Option<FileType>,
	) -> EResult<()> {
		self.require_writable()?;
		if name.len() > NAME_MAX {
			return Err(errno::ENAMETOOLONG);
		}
		let blk_size = self.blk_size();
		let needed = record_len(name.len());
		if needed as u32 > blk_size {
			return Err(errno::ENAMETOOLONG);
		}
		if self.dir_lookup(dir, name)?.is_some() {
			return Err(errno::EEXIST);
		}
		let size = dir.get_size(&self.sp);
		let mut base = 0;
		while base < size {
			let file_blk = (base / blk_size as u64) as u32;
			let blk = dir
				.translate_blk_off(file_blk, self)?
				.ok_or(errno::EUCLEAN)?;
			let mut buf = self.read_blk(blk)?;
			let mut off = 0;
			while off < buf.len() {
				let ent = Dirent::parse(&buf[off..], &self.sp)?;
				let rec_len = ent.rec_len as usize;
				// The length the record actually needs for itself
				let used_len = if ent.is_free() {
					0
				} else {
					record_len(ent.name_len(&self.sp))
				};
				if rec_len - used_len >= needed {
					let new_off = off + used_len;
					let new_len = (rec_len - used_len) as u16;
					if used_len > 0 {
						// Shorten the existing record
						buf[(off + 4)..(off + 6)]
							.copy_from_slice(&(used_len as u16).to_le_bytes());
					}
					Dirent::write(
						&mut buf[new_off..(off + rec_len)],
						&self.sp,
						entry_inode,
						new_len,
						file_type,
						name,
					)?;
					return self.write_blk(blk, &buf);
				}
				off += rec_len;
			}
			base += blk_size as u64;
		}
		// No suitable slack anywhere: append a new block
		let blocks = (size / blk_size as u64) as u32;
		let blk = dir.alloc_content_blk(blocks, self.group_of_inode(dir_ino), self)?;
		let mut buf = vec![0u8; blk_size as usize];
		Dirent::write(
			&mut buf,
			&self.sp,
			entry_inode,
			blk_size as u16,
			file_type,
			name,
		)?;
		self.write_blk(blk, &buf)?;
		dir.set_size(&self.sp, size + blk_size as u64, false);
		Ok(())
	}

	/// Removes the entry with the given name from the directory `dir` and
	/// returns the inode number it pointed to.
	///
	/// The record is swallowed by the previous record of its block, or, when
	/// it is the first of its block, marked free. The target inode itself is
	/// left untouched: dropping its link is the caller's responsibility.
	pub fn dir_remove_entry(&mut self, dir: &mut Ext2INode, name: &[u8]) -> EResult<u32> {
		self.require_writable()?;
		let blk_size = self.blk_size() as u64;
		let size = dir.get_size(&self.sp);
		let mut base = 0;
		while base < size {
			let file_blk = (base / blk_size) as u32;
			let blk = dir
				.translate_blk_off(file_blk, self)?
				.ok_or(errno::EUCLEAN)?;
			let mut buf = self.read_blk(blk)?;
			let mut prev: Option<usize> = None;
			let mut off = 0;
			while off < buf.len() {
				let ent = Dirent::parse(&buf[off..], &self.sp)?;
				let rec_len = ent.rec_len as usize;
				if !ent.is_free() && ent.name() == name {
					let ino = ent.inode;
					match prev {
						// Extend the previous record over this one
						Some(p) => {
							let prev_ent = Dirent::parse(&buf[p..], &self.sp)?;
							let merged = prev_ent.rec_len + rec_len as u16;
							buf[(p + 4)..(p + 6)].copy_from_slice(&merged.to_le_bytes());
						}
						// First record of the block: mark free
						None => buf[off..(off + 4)].fill(0),
					}
					self.write_blk(blk, &buf)?;
					// If the tail block contains no more entries, shrink the
					// directory
					let last_blk = size / blk_size - 1;
					if file_blk as u64 == last_blk && last_blk > 0 {
						let buf = self.read_blk(blk)?;
						if block_all_free(&buf, &self.sp)? {
							dir.free_content_blk(file_blk, self)?;
							dir.set_size(&self.sp, size - blk_size, false);
						}
					}
					return Ok(ino);
				}
				prev = Some(off);
				off += rec_len;
			}
			base += blk_size;
		}
		Err(errno::ENOENT)
	}

	/// Redirects the entry with the given name of the directory `dir` to the
	/// inode `new_inode`, in place.
	pub fn dir_redirect_entry(
		&mut self,
		dir: &Ext2INode,
		name: &[u8],
		new_inode: u32,
	) -> EResult<()> {
		self.require_writable()?;
		let (_, off) = self.dir_lookup(dir, name)?.ok_or(errno::ENOENT)?;
		let blk_size = self.blk_size() as u64;
		let file_blk = (off / blk_size) as u32;
		let inner = (off % blk_size) as usize;
		let blk = dir
			.translate_blk_off(file_blk, self)?
			.ok_or(errno::EUCLEAN)?;
		let mut buf = self.read_blk(blk)?;
		buf[inner..(inner + 4)].copy_from_slice(&new_inode.to_le_bytes());
		self.write_blk(blk, &buf)
	}

	/// Initializes the new directory `dir` with its `.` and `..` entries, in
	/// a single fresh block.
	///
	/// Arguments:
	/// - `dir_ino` is the inode number of the directory
	/// - `dir` is the directory's inode
	/// - `parent_ino` is the inode number of the parent directory
	///
	/// On success, the directory spans one block and has a links count of 2
	/// (its own entry in the parent plus its `.` entry).
	pub fn dir_init_empty(
		&mut self,
		dir_ino: u32,
		dir: &mut Ext2INode,
		parent_ino: u32,
	) -> EResult<()> {
		self.require_writable()?;
		let blk_size = self.blk_size();
		let blk = dir.alloc_content_blk(0, self.group_of_inode(dir_ino), self)?;
		let mut buf = vec![0u8; blk_size as usize];
		let dot_len = record_len(1);
		Dirent::write(
			&mut buf,
			&self.sp,
			dir_ino,
			dot_len as u16,
			Some(FileType::Directory),
			b".",
		)?;
		Dirent::write(
			&mut buf[dot_len..],
			&self.sp,
			parent_ino,
			(blk_size as usize - dot_len) as u16,
			Some(FileType::Directory),
			b"..",
		)?;
		self.write_blk(blk, &buf)?;
		dir.set_size(&self.sp, blk_size as u64, false);
		dir.i_links_count = 2;
		Ok(())
	}
}
