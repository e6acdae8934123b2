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

//! The ext2 filesystem is a classical filesystem used in Unix systems.
//! It is nowadays obsolete and has been replaced by ext3 and ext4.
//!
//! This crate implements a read/write ext2 driver on top of an abstract
//! block device, exposing a POSIX-shaped file and directory interface to a
//! host virtual filesystem layer.
//!
//! The filesystem divides the storage device into several substructures:
//! - Block Group: stored in the Block Group Descriptor Table (BGDT)
//! - Block: stored inside of block groups
//! - INode: represents a file in the filesystem
//! - Directory entry: an entry stored into the inode's content
//!
//! The driver stacks the following layers, bottom to top:
//! - [`device`]: the block device abstraction
//! - [`fs`]: the volume engine (superblock, descriptors, bitmaps)
//! - [`icache`]: the reference-counted write-back inode cache
//! - [`inode`]: the block map walker over direct and indirect pointers
//! - [`dirent`]: the directory record machinery
//! - [`vfs`]: the path resolver, open file table and public operations
//!
//! For more information, see the
//! [specifications](https://www.nongnu.org/ext2-doc/ext2.html).

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod bgd;
pub mod device;
pub mod dirent;
pub mod errno;
pub mod fs;
pub mod icache;
pub mod inode;
pub mod limits;
pub mod mkfs;
pub mod mountpoint;
pub mod path;
pub mod superblock;
pub mod vfs;

pub use device::BlockDev;
pub use device::RamDisk;
pub use errno::EResult;
pub use errno::Errno;
pub use mountpoint::MountFlags;
pub use vfs::Ext2Driver;

/// File permissions, as stored in an inode's mode field.
pub type Mode = u16;

/// The kind of a filesystem object.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FileType {
	/// A regular file storing data.
	Regular,
	/// A directory, mapping names to inodes.
	Directory,
	/// A symbolic link.
	Link,
	/// A named pipe.
	Fifo,
	/// A Unix socket.
	Socket,
	/// A block device file.
	BlockDevice,
	/// A character device file.
	CharDevice,
}

/// The status of a filesystem object, as returned by `stat`.
#[derive(Clone, Copy, Debug)]
pub struct Stat {
	/// The inode number.
	pub inode: u32,
	/// The kind of the object.
	pub kind: FileType,
	/// The permission bits.
	pub mode: Mode,
	/// The number of hard links.
	pub nlink: u16,
	/// The owning user ID.
	pub uid: u16,
	/// The owning group ID.
	pub gid: u16,
	/// The size in bytes.
	pub size: u64,
	/// The number of 512-byte sectors used.
	pub blocks: u32,
	/// The timestamp of the last access.
	pub atime: u32,
	/// The timestamp of the last metadata modification.
	pub ctime: u32,
	/// The timestamp of the last content modification.
	pub mtime: u32,
}
