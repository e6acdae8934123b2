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

//! The driver context: the mount registry, the open file table, the path
//! resolver and the POSIX-shaped operations exposed to the host VFS.
//!
//! The whole driver state sits behind a single mutex which is held for the
//! entire duration of every public operation, device I/O included. Two
//! concurrent operations serialize in the order they take the lock; there are
//! no sub-locks, so every observable interleaving is a full-operation
//! interleaving.

use crate::device::BlockDev;
use crate::errno;
use crate::errno::EResult;
use crate::fs::Ext2Fs;
use crate::fs::Statfs;
use crate::icache::CachedInode;
use crate::inode::Ext2INode;
use crate::inode::ROOT_DIRECTORY_INODE;
use crate::limits::OPEN_FILES_MAX;
use crate::limits::SYMLOOP_MAX;
use crate::mountpoint::find_mount;
use crate::mountpoint::Mount;
use crate::mountpoint::MountFlags;
use crate::mountpoint::MountRegistry;
use crate::path::Component;
use crate::path::Path;
use crate::path::PathBuf;
use crate::FileType;
use crate::Stat;
use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::AtomicU32;
use core::sync::atomic::Ordering::Relaxed;
use spin::Mutex;

/// Open for reading only.
pub const O_RDONLY: u32 = 0o0;
/// Open for writing only.
pub const O_WRONLY: u32 = 0o1;
/// Open for reading and writing.
pub const O_RDWR: u32 = 0o2;
/// Mask for the access mode.
pub const O_ACCMODE: u32 = 0o3;
/// If the file doesn't exist, create it.
pub const O_CREAT: u32 = 0o100;
/// Ensure the file is created (when used with `O_CREAT`). If not, the call
/// fails.
pub const O_EXCL: u32 = 0o200;
/// If the file already exists, truncate it to length zero.
pub const O_TRUNC: u32 = 0o1000;
/// The cursor is placed at the end of the file before each write.
pub const O_APPEND: u32 = 0o2000;
/// If the pathname is not a directory, cause the open to fail.
pub const O_DIRECTORY: u32 = 0o200000;

/// `fcntl` command: get the file descriptor's flags.
pub const F_GETFD: i32 = 1;
/// `fcntl` command: set the file descriptor's flags.
pub const F_SETFD: i32 = 2;
/// `fcntl` command: get the file status flags.
pub const F_GETFL: i32 = 3;
/// `fcntl` command: set the file status flags.
pub const F_SETFL: i32 = 4;

/// `seek` whence: from the beginning of the file.
pub const SEEK_SET: i32 = 0;
/// `seek` whence: from the current position.
pub const SEEK_CUR: i32 = 1;
/// `seek` whence: from the end of the file.
pub const SEEK_END: i32 = 2;

/// A source of timestamps for the driver.
pub trait TimeSource: Send {
	/// Returns the current Unix timestamp, in seconds.
	fn now(&self) -> u32;
}

/// The default time source: a monotonic counter, so that fresh timestamps are
/// nonzero and ordered even without a host clock.
pub struct TickClock(AtomicU32);

impl TickClock {
	pub const fn new() -> Self {
		Self(AtomicU32::new(0))
	}
}

impl TimeSource for TickClock {
	fn now(&self) -> u32 {
		self.0.fetch_add(1, Relaxed) + 1
	}
}

/// A directory entry as returned by `readdir`.
pub struct DirEntry {
	/// The entry's name.
	pub name: Vec<u8>,
	/// The entry's inode number.
	pub inode: u32,
	/// The kind of the target.
	pub kind: FileType,
	/// The size of the target in bytes.
	pub size: u64,
	/// The last content modification timestamp of the target.
	pub mtime: u32,
}

/// An entry of the open file table.
struct OpenFile {
	/// The mount point path of the file's volume.
	mount: PathBuf,
	/// The file's inode number.
	ino: u32,
	/// The file's cache entry.
	ent: Arc<CachedInode>,
	/// The open flags.
	flags: u32,
	/// The current byte position.
	///
	/// For a directory, this is a byte offset into the directory's records.
	off: u64,
}

/// The driver's internal state, protected by the driver mutex.
struct DriverInner {
	/// The mounted volumes.
	mounts: MountRegistry,
	/// The open file table. Handles given out are 1-based indexes into it.
	files: [Option<OpenFile>; OPEN_FILES_MAX],
	/// The timestamp source.
	clock: Box<dyn TimeSource>,
}

/// The ext2 driver context.
///
/// At most one instance is meant to exist per process; the host creates it at
/// startup and registers its operations with the VFS layer.
pub struct Ext2Driver {
	inner: Mutex<DriverInner>,
}

/// Returns the open file for the handle `fd`.
fn slot(files: &mut [Option<OpenFile>; OPEN_FILES_MAX], fd: i32) -> EResult<&mut OpenFile> {
	usize::try_from(fd - 1)
		.ok()
		.and_then(|i| files.get_mut(i))
		.and_then(Option::as_mut)
		.ok_or(errno::EBADF)
}

/// Tells whether an open handle references the inode `ino` of the volume
/// mounted at `mount`.
fn is_busy(files: &[Option<OpenFile>; OPEN_FILES_MAX], mount: &Path, ino: u32) -> bool {
	files
		.iter()
		.flatten()
		.any(|f| f.ino == ino && f.mount.as_ref() == mount)
}

/// Resolves `path` to an inode number, starting at the inode `start`.
///
/// Arguments:
/// - `depth` is the number of symbolic links that may still be followed.
/// - `follow_final` tells whether a symbolic link in final position is
///   followed too.
///
/// Empty components are skipped. An empty path resolves to `start`.
fn resolve_at(
	fs: &mut Ext2Fs,
	start: u32,
	path: &Path,
	depth: &mut usize,
	follow_final: bool,
) -> EResult<u32> {
	let mut cur = start;
	let mut comps = path.components().peekable();
	while let Some(comp) = comps.next() {
		let name: &[u8] = match comp {
			Component::RootDir => {
				cur = ROOT_DIRECTORY_INODE;
				continue;
			}
			Component::CurDir => continue,
			Component::ParentDir => b"..",
			Component::Normal(name) => name,
		};
		let ent = fs.get_inode(cur)?;
		let body = *ent.lock();
		if body.get_type() != FileType::Directory {
			return Err(errno::ENOTDIR);
		}
		let (child, _) = fs.dir_lookup(&body, name)?.ok_or(errno::ENOENT)?;
		let child_ent = fs.get_inode(child)?;
		let child_body = *child_ent.lock();
		let last = comps.peek().is_none();
		if child_body.get_type() == FileType::Link && (!last || follow_final) {
			if *depth == 0 {
				return Err(errno::ELOOP);
			}
			*depth -= 1;
			let target = child_body.read_link(fs)?;
			let target = Path::new(&target)?;
			// A relative target resolves from the link's directory
			cur = resolve_at(fs, cur, target, depth, true)?;
		} else {
			cur = child;
		}
	}
	Ok(cur)
}

/// Resolves `rel` (a path relative to the volume root) to an inode number.
fn resolve(fs: &mut Ext2Fs, rel: &Path, follow_final: bool) -> EResult<u32> {
	let mut depth = SYMLOOP_MAX;
	resolve_at(fs, ROOT_DIRECTORY_INODE, rel, &mut depth, follow_final)
}

/// Splits `rel` into its parent directory and leaf name, resolving the
/// parent.
///
/// The function returns the parent's inode number along with the leaf name.
///
/// Fails with [`errno::EINVAL`] when `rel` designates the volume root or its
/// leaf is `.` or `..`.
fn resolve_parent<'p>(fs: &mut Ext2Fs, rel: &'p Path) -> EResult<(u32, &'p [u8])> {
	let leaf = rel.file_name().ok_or(errno::EINVAL)?;
	if rel.is_empty() || leaf == b"." || leaf == b".." {
		return Err(errno::EINVAL);
	}
	let parent = rel.parent().unwrap_or(Path::root());
	let parent_ino = resolve(fs, parent, true)?;
	let ent = fs.get_inode(parent_ino)?;
	if ent.lock().get_type() != FileType::Directory {
		return Err(errno::ENOTDIR);
	}
	Ok((parent_ino, leaf))
}

/// Stores `body` into `ent` and marks it dirty.
fn store(ent: &CachedInode, body: Ext2INode) {
	*ent.lock() = body;
	ent.mark_dirty();
}

/// Creates an empty regular file, returning its inode number.
///
/// The new inode lands in its parent's group, owned by the parent's
/// uid/gid.
fn create_file(fs: &mut Ext2Fs, rel: &Path, mode: u16, now: u32) -> EResult<u32> {
	let (parent_ino, leaf) = resolve_parent(fs, rel)?;
	let parent_ent = fs.get_inode(parent_ino)?;
	let mut parent = *parent_ent.lock();
	if fs.dir_lookup(&parent, leaf)?.is_some() {
		return Err(errno::EEXIST);
	}
	let (ino, ent) = fs.alloc_inode(fs.group_of_inode(parent_ino), false)?;
	let mut body = *ent.lock();
	body.i_mode = FileType::Regular.to_inode_mode() | (mode & 0o7777);
	body.i_uid = parent.i_uid;
	body.i_gid = parent.i_gid;
	body.i_links_count = 1;
	body.i_atime = now;
	body.i_ctime = now;
	body.i_mtime = now;
	store(&ent, body);
	fs.dir_add_entry(parent_ino, &mut parent, leaf, ino, Some(FileType::Regular))?;
	parent.i_ctime = now;
	parent.i_mtime = now;
	store(&parent_ent, parent);
	Ok(ino)
}

impl Ext2Driver {
	/// Initializes a driver context with the default time source.
	pub fn new() -> Self {
		Self::with_clock(Box::new(TickClock::new()))
	}

	/// Initializes a driver context using the given time source for inode
	/// timestamps.
	pub fn with_clock(clock: Box<dyn TimeSource>) -> Self {
		Self {
			inner: Mutex::new(DriverInner {
				mounts: MountRegistry::new(),
				files: core::array::from_fn(|_| None),
				clock,
			}),
		}
	}

	/// Mounts the volume on `dev` at `mountpoint`.
	///
	/// Mounting performs no write to the device: a mount followed by an
	/// unmount with no operation in between leaves the device untouched.
	pub fn mount(
		&self,
		mountpoint: &[u8],
		dev: Box<dyn BlockDev>,
		flags: MountFlags,
	) -> EResult<()> {
		let path = Path::new(mountpoint)?;
		if !path.is_absolute() {
			return Err(errno::EINVAL);
		}
		let mut inner = self.inner.lock();
		let key = PathBuf::from(path);
		if inner.mounts.contains_key(&key) {
			return Err(errno::EBUSY);
		}
		let readonly = !flags.contains(MountFlags::READ_WRITE);
		let fs = Ext2Fs::open(dev, readonly)?;
		log::info!(
			"ext2: mounted {path} ({})",
			if readonly { "read-only" } else { "read-write" }
		);
		inner.mounts.insert(
			key.clone(),
			Mount {
				path: key,
				fs,
				flags,
			},
		);
		Ok(())
	}

	/// Unmounts the volume at `mountpoint`, flushing every dirty structure.
	///
	/// If any open handle still references the volume, the function refuses
	/// with [`errno::EBUSY`].
	pub fn unmount(&self, mountpoint: &[u8]) -> EResult<()> {
		let path = Path::new(mountpoint)?;
		let mut inner = self.inner.lock();
		let inner = &mut *inner;
		if !inner.mounts.contains_key(path) {
			return Err(errno::ENOENT);
		}
		let busy = inner
			.files
			.iter()
			.flatten()
			.any(|f| f.mount.as_ref() == path);
		if busy {
			log::warn!("ext2: unmounting {path} with open handles");
			return Err(errno::EBUSY);
		}
		let mount = inner.mounts.remove(path).unwrap();
		mount.fs.shutdown()?;
		log::info!("ext2: unmounted {path}");
		Ok(())
	}

	/// Flushes every dirty structure of every mounted volume.
	pub fn sync(&self) -> EResult<()> {
		let mut inner = self.inner.lock();
		for mount in inner.mounts.values_mut() {
			mount.fs.sync()?;
		}
		Ok(())
	}

	/// Tears the driver down: drops every open handle, then unmounts every
	/// volume.
	pub fn shutdown(self) -> EResult<()> {
		let mut inner = self.inner.into_inner();
		for f in &mut inner.files {
			*f = None;
		}
		for (_, mount) in inner.mounts.drain() {
			mount.fs.shutdown()?;
		}
		Ok(())
	}

	/// Opens the file at `path` and returns a handle (a 1-based index into
	/// the open file table).
	///
	/// `mode` gives the permissions of the file in case it is created.
	pub fn open(&self, path: &[u8], flags: u32, mode: u16) -> EResult<i32> {
		let path = Path::new(path)?;
		let mut inner = self.inner.lock();
		let inner = &mut *inner;
		let now = inner.clock.now();
		let (key, rel) = find_mount(&inner.mounts, path)?;
		let fs = &mut inner.mounts.get_mut(&key).unwrap().fs;
		if fs.is_readonly() && flags & (O_WRONLY | O_RDWR | O_CREAT | O_TRUNC | O_APPEND) != 0 {
			return Err(errno::EROFS);
		}
		let ino = match resolve(fs, &rel, true) {
			Ok(ino) => {
				if flags & (O_CREAT | O_EXCL) == O_CREAT | O_EXCL {
					return Err(errno::EEXIST);
				}
				ino
			}
			Err(e) if e == errno::ENOENT && flags & O_CREAT != 0 => {
				create_file(fs, &rel, mode, now)?
			}
			Err(e) => return Err(e),
		};
		let ent = fs.get_inode(ino)?;
		let kind = ent.lock().get_type();
		if kind == FileType::Directory && flags & O_DIRECTORY == 0 {
			return Err(errno::EISDIR);
		}
		if kind != FileType::Directory && flags & O_DIRECTORY != 0 {
			return Err(errno::ENOTDIR);
		}
		if flags & O_TRUNC != 0 && kind == FileType::Regular {
			let mut body = *ent.lock();
			body.truncate(0, fs)?;
			body.i_ctime = now;
			body.i_mtime = now;
			store(&ent, body);
		}
		let idx = inner
			.files
			.iter()
			.position(Option::is_none)
			.ok_or(errno::EMFILE)?;
		inner.files[idx] = Some(OpenFile {
			mount: key,
			ino,
			ent,
			flags,
			off: 0,
		});
		Ok((idx + 1) as i32)
	}

	/// Closes the handle `fd`.
	///
	/// The cached inode reference is released; write-back happens on `sync`
	/// or unmount.
	pub fn close(&self, fd: i32) -> EResult<()> {
		let mut inner = self.inner.lock();
		slot(&mut inner.files, fd)?;
		inner.files[(fd - 1) as usize] = None;
		Ok(())
	}

	/// Reads from the handle `fd` at its current position into `buf`,
	/// advancing the position.
	///
	/// Holes read as zeros. The function returns the number of bytes read,
	/// which is zero at end of file.
	pub fn read(&self, fd: i32, buf: &mut [u8]) -> EResult<usize> {
		let mut inner = self.inner.lock();
		let DriverInner {
			mounts, files, ..
		} = &mut *inner;
		let file = slot(files, fd)?;
		if file.flags & O_ACCMODE == O_WRONLY {
			return Err(errno::EINVAL);
		}
		let fs = &mut mounts.get_mut(&file.mount).ok_or(errno::EIO)?.fs;
		let body = *file.ent.lock();
		match body.get_type() {
			FileType::Regular => {}
			FileType::Directory => return Err(errno::EISDIR),
			_ => return Err(errno::EINVAL),
		}
		let len = body.read_content(file.off, buf, fs)?;
		file.off += len as u64;
		Ok(len)
	}

	/// Moves the position of the handle `fd`.
	///
	/// The resulting position is clamped to `[0, size]`; a negative position
	/// is refused with [`errno::EINVAL`]. On success, the function returns
	/// the new position.
	pub fn seek(&self, fd: i32, off: i64, whence: i32) -> EResult<u64> {
		let mut inner = self.inner.lock();
		let DriverInner {
			mounts, files, ..
		} = &mut *inner;
		let file = slot(files, fd)?;
		let fs = &mut mounts.get_mut(&file.mount).ok_or(errno::EIO)?.fs;
		let size = file.ent.lock().get_size(&fs.sp);
		let base = match whence {
			SEEK_SET => 0,
			SEEK_CUR => file.off,
			SEEK_END => size,
			_ => return Err(errno::EINVAL),
		};
		let pos = base
			.checked_add_signed(off)
			.ok_or(errno::EINVAL)?;
		file.off = core::cmp::min(pos, size);
		Ok(file.off)
	}

	/// Returns the current position of the handle `fd`.
	pub fn tell(&self, fd: i32) -> EResult<u64> {
		let mut inner = self.inner.lock();
		Ok(slot(&mut inner.files, fd)?.off)
	}

	/// Returns the total size of the file behind the handle `fd`.
	pub fn total(&self, fd: i32) -> EResult<u64> {
		let mut inner = self.inner.lock();
		let DriverInner {
			mounts, files, ..
		} = &mut *inner;
		let file = slot(files, fd)?;
		let fs = &mounts.get(&file.mount).ok_or(errno::EIO)?.fs;
		let size = file.ent.lock().get_size(&fs.sp);
		Ok(size)
	}

	/// Reads the next entry of the directory behind the handle `fd`.
	///
	/// The handle's position is a byte offset into the directory's records;
	/// free records are skipped. At the end of the directory, the function
	/// returns `None`.
	pub fn readdir(&self, fd: i32) -> EResult<Option<DirEntry>> {
		let mut inner = self.inner.lock();
		let DriverInner {
			mounts, files, ..
		} = &mut *inner;
		let file = slot(files, fd)?;
		if file.flags & O_DIRECTORY == 0 {
			return Err(errno::ENOTDIR);
		}
		let fs = &mut mounts.get_mut(&file.mount).ok_or(errno::EIO)?.fs;
		let body = *file.ent.lock();
		if body.get_type() != FileType::Directory {
			return Err(errno::ENOTDIR);
		}
		while let Some((next, info)) = fs.read_dirent_at(&body, file.off)? {
			file.off = next;
			if info.inode == 0 {
				continue;
			}
			let child = fs.get_inode(info.inode)?;
			let child_body = *child.lock();
			return Ok(Some(DirEntry {
				name: info.name,
				inode: info.inode,
				kind: child_body.get_type(),
				size: child_body.get_size(&fs.sp),
				mtime: child_body.i_mtime,
			}));
		}
		Ok(None)
	}

	/// Returns the status of the file at `path`.
	pub fn stat(&self, path: &[u8]) -> EResult<Stat> {
		let path = Path::new(path)?;
		let mut inner = self.inner.lock();
		let inner = &mut *inner;
		let (key, rel) = find_mount(&inner.mounts, path)?;
		let fs = &mut inner.mounts.get_mut(&key).unwrap().fs;
		let ino = resolve(fs, &rel, true)?;
		let ent = fs.get_inode(ino)?;
		let body = *ent.lock();
		Ok(body.stat(ino, &fs.sp))
	}

	/// Returns statistics about the volume mounted at `mountpoint`.
	pub fn statfs(&self, mountpoint: &[u8]) -> EResult<Statfs> {
		let path = Path::new(mountpoint)?;
		let inner = self.inner.lock();
		let mount = inner.mounts.get(path).ok_or(errno::ENOENT)?;
		Ok(mount.fs.statfs())
	}

	/// Returns the target of the symbolic link at `path`.
	pub fn readlink(&self, path: &[u8]) -> EResult<Vec<u8>> {
		let path = Path::new(path)?;
		let mut inner = self.inner.lock();
		let inner = &mut *inner;
		let (key, rel) = find_mount(&inner.mounts, path)?;
		let fs = &mut inner.mounts.get_mut(&key).unwrap().fs;
		let ino = resolve(fs, &rel, false)?;
		let ent = fs.get_inode(ino)?;
		let body = *ent.lock();
		body.read_link(fs)
	}

	/// Creates a directory at `path` with the permissions `mode`.
	///
	/// The new directory inherits its uid/gid from its parent.
	pub fn mkdir(&self, path: &[u8], mode: u16) -> EResult<()> {
		let path = Path::new(path)?;
		let mut inner = self.inner.lock();
		let inner = &mut *inner;
		let now = inner.clock.now();
		let (key, rel) = find_mount(&inner.mounts, path)?;
		let fs = &mut inner.mounts.get_mut(&key).unwrap().fs;
		fs.require_writable()?;
		let (parent_ino, leaf) = resolve_parent(fs, &rel)?;
		let parent_ent = fs.get_inode(parent_ino)?;
		let mut parent = *parent_ent.lock();
		if fs.dir_lookup(&parent, leaf)?.is_some() {
			return Err(errno::EEXIST);
		}
		if parent.i_links_count == u16::MAX {
			return Err(errno::EMLINK);
		}
		let (ino, ent) = fs.alloc_inode(fs.group_of_inode(parent_ino), true)?;
		let mut body = *ent.lock();
		body.i_mode = FileType::Directory.to_inode_mode() | (mode & 0o7777);
		body.i_uid = parent.i_uid;
		body.i_gid = parent.i_gid;
		body.i_atime = now;
		body.i_ctime = now;
		body.i_mtime = now;
		fs.dir_init_empty(ino, &mut body, parent_ino)?;
		store(&ent, body);
		fs.dir_add_entry(parent_ino, &mut parent, leaf, ino, Some(FileType::Directory))?;
		parent.i_links_count += 1;
		parent.i_ctime = now;
		parent.i_mtime = now;
		store(&parent_ent, parent);
		Ok(())
	}

	/// Removes the regular file (or symlink, FIFO, socket) at `path`.
	///
	/// Directories are refused with [`errno::EPERM`]; an inode referenced by
	/// an open handle is refused with [`errno::EBUSY`]. When the last link
	/// drops, the inode's content and the inode itself are freed.
	pub fn unlink(&self, path: &[u8]) -> EResult<()> {
		let path = Path::new(path)?;
		let mut inner = self.inner.lock();
		let inner = &mut *inner;
		let now = inner.clock.now();
		let (key, rel) = find_mount(&inner.mounts, path)?;
		let fs = &mut inner.mounts.get_mut(&key).unwrap().fs;
		fs.require_writable()?;
		let (parent_ino, leaf) = resolve_parent(fs, &rel)?;
		let parent_ent = fs.get_inode(parent_ino)?;
		let mut parent = *parent_ent.lock();
		let (child_ino, _) = fs.dir_lookup(&parent, leaf)?.ok_or(errno::ENOENT)?;
		let child_ent = fs.get_inode(child_ino)?;
		let mut child = *child_ent.lock();
		if child.get_type() == FileType::Directory {
			return Err(errno::EPERM);
		}
		if is_busy(&inner.files, key.as_ref(), child_ino) {
			return Err(errno::EBUSY);
		}
		fs.dir_remove_entry(&mut parent, leaf)?;
		parent.i_ctime = now;
		parent.i_mtime = now;
		store(&parent_ent, parent);
		child.i_links_count -= 1;
		child.i_ctime = now;
		if child.i_links_count == 0 {
			child.free_content(fs)?;
			child.i_dtime = now;
			store(&child_ent, child);
			fs.free_inode(child_ino, false)?;
		} else {
			store(&child_ent, child);
		}
		Ok(())
	}

	/// Removes the empty directory at `path`.
	pub fn rmdir(&self, path: &[u8]) -> EResult<()> {
		let path = Path::new(path)?;
		let mut inner = self.inner.lock();
		let inner = &mut *inner;
		let now = inner.clock.now();
		let (key, rel) = find_mount(&inner.mounts, path)?;
		let fs = &mut inner.mounts.get_mut(&key).unwrap().fs;
		fs.require_writable()?;
		let (parent_ino, leaf) = resolve_parent(fs, &rel)?;
		let parent_ent = fs.get_inode(parent_ino)?;
		let mut parent = *parent_ent.lock();
		let (child_ino, _) = fs.dir_lookup(&parent, leaf)?.ok_or(errno::ENOENT)?;
		let child_ent = fs.get_inode(child_ino)?;
		let mut child = *child_ent.lock();
		if child.get_type() != FileType::Directory {
			return Err(errno::ENOTDIR);
		}
		if !fs.dir_is_empty(&child)? {
			return Err(errno::ENOTEMPTY);
		}
		if is_busy(&inner.files, key.as_ref(), child_ino) {
			return Err(errno::EBUSY);
		}
		fs.dir_remove_entry(&mut parent, leaf)?;
		// The removed entry and the child's `.` entry
		parent.i_links_count -= 1;
		parent.i_ctime = now;
		parent.i_mtime = now;
		store(&parent_ent, parent);
		child.i_links_count = 0;
		child.free_content(fs)?;
		child.i_dtime = now;
		store(&child_ent, child);
		fs.free_inode(child_ino, true)?;
		Ok(())
	}

	/// Creates a hard link at `new` pointing to the file at `old`.
	///
	/// Directories cannot be linked.
	pub fn link(&self, old: &[u8], new: &[u8]) -> EResult<()> {
		let old = Path::new(old)?;
		let new = Path::new(new)?;
		let mut inner = self.inner.lock();
		let inner = &mut *inner;
		let now = inner.clock.now();
		let (old_key, old_rel) = find_mount(&inner.mounts, old)?;
		let (new_key, new_rel) = find_mount(&inner.mounts, new)?;
		if old_key != new_key {
			return Err(errno::EXDEV);
		}
		let fs = &mut inner.mounts.get_mut(&old_key).unwrap().fs;
		fs.require_writable()?;
		let src_ino = resolve(fs, &old_rel, false)?;
		let src_ent = fs.get_inode(src_ino)?;
		let mut src = *src_ent.lock();
		if src.get_type() == FileType::Directory {
			return Err(errno::EPERM);
		}
		if src.i_links_count == u16::MAX {
			return Err(errno::EMLINK);
		}
		let (parent_ino, leaf) = resolve_parent(fs, &new_rel)?;
		let parent_ent = fs.get_inode(parent_ino)?;
		let mut parent = *parent_ent.lock();
		fs.dir_add_entry(parent_ino, &mut parent, leaf, src_ino, Some(src.get_type()))?;
		parent.i_ctime = now;
		parent.i_mtime = now;
		store(&parent_ent, parent);
		src.i_links_count += 1;
		src.i_ctime = now;
		store(&src_ent, src);
		Ok(())
	}

	/// Moves the file at `old` to `new`.
	///
	/// An existing destination is replaced if it is of the same kind (and
	/// empty, for a directory). The operation is atomic with respect to
	/// concurrent driver calls, but not across a crash: a mid-sequence I/O
	/// failure leaves the steps already performed in place.
	pub fn rename(&self, old: &[u8], new: &[u8]) -> EResult<()> {
		let old = Path::new(old)?;
		let new = Path::new(new)?;
		let mut inner = self.inner.lock();
		let inner = &mut *inner;
		let now = inner.clock.now();
		let (old_key, old_rel) = find_mount(&inner.mounts, old)?;
		let (new_key, new_rel) = find_mount(&inner.mounts, new)?;
		if old_key != new_key {
			return Err(errno::EXDEV);
		}
		let fs = &mut inner.mounts.get_mut(&old_key).unwrap().fs;
		fs.require_writable()?;
		// Refuse renaming the volume root
		if old_rel.is_empty() || new_rel.is_empty() {
			return Err(errno::EINVAL);
		}
		let (old_parent_ino, old_leaf) = resolve_parent(fs, &old_rel)?;
		let (new_parent_ino, new_leaf) = resolve_parent(fs, &new_rel)?;
		let old_parent_ent = fs.get_inode(old_parent_ino)?;
		let mut old_parent = *old_parent_ent.lock();
		let (src_ino, _) = fs.dir_lookup(&old_parent, old_leaf)?.ok_or(errno::ENOENT)?;
		let src_ent = fs.get_inode(src_ino)?;
		let mut src = *src_ent.lock();
		let src_is_dir = src.get_type() == FileType::Directory;
		if old_parent_ino == new_parent_ino {
			if old_leaf == new_leaf {
				return Ok(());
			}
			// Same directory: replace or create the new entry, drop the old one
			if let Some((dst_ino, _)) = fs.dir_lookup(&old_parent, new_leaf)? {
				if dst_ino == src_ino {
					return Ok(());
				}
				Self::unlink_replaced(
					fs,
					&inner.files,
					old_key.as_ref(),
					&mut old_parent,
					new_leaf,
					dst_ino,
					src_is_dir,
					now,
				)?;
				if src_is_dir {
					// A subdirectory was replaced by another: one `..`
					// reference to the parent is gone
					old_parent.i_links_count -= 1;
				}
			}
			fs.dir_add_entry(
				old_parent_ino,
				&mut old_parent,
				new_leaf,
				src_ino,
				Some(src.get_type()),
			)?;
			fs.dir_remove_entry(&mut old_parent, old_leaf)?;
			old_parent.i_ctime = now;
			old_parent.i_mtime = now;
			store(&old_parent_ent, old_parent);
			src.i_ctime = now;
			store(&src_ent, src);
			return Ok(());
		}
		// Moving a directory must not create a cycle
		if src_is_dir {
			let mut cur = new_parent_ino;
			let mut steps = fs.sp.s_inodes_count;
			while cur != ROOT_DIRECTORY_INODE {
				if cur == src_ino {
					return Err(errno::EINVAL);
				}
				let ent = fs.get_inode(cur)?;
				let body = *ent.lock();
				let (up, _) = fs.dir_lookup(&body, b"..")?.ok_or(errno::EUCLEAN)?;
				cur = up;
				steps = steps.checked_sub(1).ok_or(errno::EUCLEAN)?;
			}
		}
		let new_parent_ent = fs.get_inode(new_parent_ino)?;
		let mut new_parent = *new_parent_ent.lock();
		if let Some((dst_ino, _)) = fs.dir_lookup(&new_parent, new_leaf)? {
			Self::unlink_replaced(
				fs,
				&inner.files,
				old_key.as_ref(),
				&mut new_parent,
				new_leaf,
				dst_ino,
				src_is_dir,
				now,
			)?;
			if src_is_dir {
				// The replaced directory's `..` no longer references the
				// parent; the moved directory's will, below
				new_parent.i_links_count -= 1;
			}
		}
		if src_is_dir && new_parent.i_links_count == u16::MAX {
			return Err(errno::EMLINK);
		}
		fs.dir_add_entry(
			new_parent_ino,
			&mut new_parent,
			new_leaf,
			src_ino,
			Some(src.get_type()),
		)?;
		fs.dir_remove_entry(&mut old_parent, old_leaf)?;
		if src_is_dir {
			fs.dir_redirect_entry(&src, b"..", new_parent_ino)?;
			old_parent.i_links_count -= 1;
			new_parent.i_links_count += 1;
		}
		old_parent.i_ctime = now;
		old_parent.i_mtime = now;
		new_parent.i_ctime = now;
		new_parent.i_mtime = now;
		store(&old_parent_ent, old_parent);
		store(&new_parent_ent, new_parent);
		src.i_ctime = now;
		store(&src_ent, src);
		Ok(())
	}

	/// Removes the destination entry replaced by a `rename` and drops the
	/// replaced inode's link.
	///
	/// `parent` is the body of the destination's parent directory; the
	/// parent's own link count is not touched here.
	#[allow(clippy::too_many_arguments)]
	fn unlink_replaced(
		fs: &mut Ext2Fs,
		files: &[Option<OpenFile>; OPEN_FILES_MAX],
		key: &Path,
		parent: &mut Ext2INode,
		leaf: &[u8],
		dst_ino: u32,
		src_is_dir: bool,
		now: u32,
	) -> EResult<()> {
		let dst_ent = fs.get_inode(dst_ino)?;
		let mut dst = *dst_ent.lock();
		let dst_is_dir = dst.get_type() == FileType::Directory;
		// The destination must be of the same kind as the source
		if src_is_dir && !dst_is_dir {
			return Err(errno::ENOTDIR);
		}
		if !src_is_dir && dst_is_dir {
			return Err(errno::EISDIR);
		}
		if dst_is_dir && !fs.dir_is_empty(&dst)? {
			return Err(errno::ENOTEMPTY);
		}
		if is_busy(files, key, dst_ino) {
			return Err(errno::EBUSY);
		}
		fs.dir_remove_entry(parent, leaf)?;
		if dst_is_dir {
			dst.i_links_count = 0;
			dst.free_content(fs)?;
			dst.i_dtime = now;
			store(&dst_ent, dst);
			fs.free_inode(dst_ino, true)?;
		} else {
			dst.i_links_count -= 1;
			dst.i_ctime = now;
			if dst.i_links_count == 0 {
				dst.free_content(fs)?;
				dst.i_dtime = now;
				store(&dst_ent, dst);
				fs.free_inode(dst_ino, false)?;
			} else {
				store(&dst_ent, dst);
			}
		}
		Ok(())
	}

	/// Manipulates the handle `fd`.
	///
	/// Only `F_GETFL` is meaningful: it returns the stored open flags.
	/// `F_SETFL`, `F_GETFD` and `F_SETFD` are accepted as no-ops; any other
	/// command fails with [`errno::EINVAL`].
	pub fn fcntl(&self, fd: i32, cmd: i32, _arg: i32) -> EResult<i32> {
		let mut inner = self.inner.lock();
		let file = slot(&mut inner.files, fd)?;
		match cmd {
			F_GETFL => Ok(file.flags as i32),
			F_SETFL | F_GETFD | F_SETFD => Ok(0),
			_ => Err(errno::EINVAL),
		}
	}
}

impl Default for Ext2Driver {
	fn default() -> Self {
		Self::new()
	}
}
