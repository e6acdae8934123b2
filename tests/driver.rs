//! End-to-end scenarios against the driver's public surface.
//!
//! Each test formats a RAM-backed device, mounts it and drives the POSIX
//! operations the way a host VFS would.

use ext2fs::device::{BlockDev, RamDisk};
use ext2fs::dirent;
use ext2fs::errno;
use ext2fs::fs::Ext2Fs;
use ext2fs::inode::{INODE_TYPE_REGULAR, INODE_TYPE_SYMLINK, ROOT_DIRECTORY_INODE};
use ext2fs::mkfs::mkfs;
use ext2fs::vfs::{
	Ext2Driver, F_GETFL, O_CREAT, O_DIRECTORY, O_EXCL, O_RDONLY, SEEK_CUR, SEEK_END, SEEK_SET,
};
use ext2fs::{EResult, FileType, MountFlags};
use std::sync::{Arc, Mutex};

/// A formatted 2 MiB RAM disk with 512-byte device blocks and 1024-byte
/// filesystem blocks.
fn fresh_disk() -> RamDisk {
	let mut disk = RamDisk::new(512, 4096);
	mkfs(&mut disk, 1024, 1).unwrap();
	disk
}

/// Creates a file under the volume root, bypassing the driver surface (which
/// exposes no data write).
fn seed_root_file(fs: &mut Ext2Fs, name: &[u8], content: &[u8]) -> u32 {
	let root_ent = fs.get_inode(ROOT_DIRECTORY_INODE).unwrap();
	let mut root = *root_ent.lock();
	let (ino, ent) = fs.alloc_inode(0, false).unwrap();
	let mut body = *ent.lock();
	body.i_mode = INODE_TYPE_REGULAR | 0o644;
	body.i_links_count = 1;
	body.i_mtime = 1;
	if !content.is_empty() {
		body.write_content(0, content, 0, fs).unwrap();
	}
	*ent.lock() = body;
	ent.mark_dirty();
	fs.dir_add_entry(ROOT_DIRECTORY_INODE, &mut root, name, ino, Some(FileType::Regular))
		.unwrap();
	*root_ent.lock() = root;
	root_ent.mark_dirty();
	ino
}

/// Creates a symlink with an inline target under the volume root.
fn seed_root_symlink(fs: &mut Ext2Fs, name: &[u8], target: &[u8]) {
	assert!(target.len() <= 60);
	let root_ent = fs.get_inode(ROOT_DIRECTORY_INODE).unwrap();
	let mut root = *root_ent.lock();
	let (ino, ent) = fs.alloc_inode(0, false).unwrap();
	let mut body = *ent.lock();
	body.i_mode = INODE_TYPE_SYMLINK | 0o777;
	body.i_links_count = 1;
	let dst = bytemuck::cast_slice_mut::<u32, u8>(&mut body.i_block);
	dst[..target.len()].copy_from_slice(target);
	body.i_size = target.len() as u32;
	*ent.lock() = body;
	ent.mark_dirty();
	fs.dir_add_entry(ROOT_DIRECTORY_INODE, &mut root, name, ino, Some(FileType::Link))
		.unwrap();
	*root_ent.lock() = root;
	root_ent.mark_dirty();
}

/// Seeds a disk through the volume engine and returns the device ready to
/// mount.
fn seeded_disk(seed: impl FnOnce(&mut Ext2Fs)) -> Box<dyn BlockDev> {
	let disk = fresh_disk();
	let mut fs = Ext2Fs::open(Box::new(disk), false).unwrap();
	seed(&mut fs);
	fs.shutdown().unwrap()
}

/// A device handle that can be observed from outside the driver.
#[derive(Clone)]
struct SharedDisk(Arc<Mutex<RamDisk>>);

impl SharedDisk {
	fn new(disk: RamDisk) -> Self {
		Self(Arc::new(Mutex::new(disk)))
	}

	fn write_count(&self) -> u64 {
		self.0.lock().unwrap().write_count()
	}
}

impl BlockDev for SharedDisk {
	fn block_size(&self) -> u32 {
		self.0.lock().unwrap().block_size()
	}

	fn block_count(&self) -> u64 {
		self.0.lock().unwrap().block_count()
	}

	fn read_blocks(&mut self, lba: u64, buf: &mut [u8]) -> EResult<()> {
		self.0.lock().unwrap().read_blocks(lba, buf)
	}

	fn write_blocks(&mut self, lba: u64, buf: &[u8]) -> EResult<()> {
		self.0.lock().unwrap().write_blocks(lba, buf)
	}

	fn writable(&self) -> bool {
		true
	}
}

/// Collects every entry name of the directory handle.
fn list_dir(drv: &Ext2Driver, fd: i32) -> Vec<Vec<u8>> {
	let mut names = Vec::new();
	while let Some(ent) = drv.readdir(fd).unwrap() {
		names.push(ent.name);
	}
	names
}

#[test]
fn mount_then_list_root() {
	let drv = Ext2Driver::new();
	drv.mount(b"/ext", Box::new(fresh_disk()), MountFlags::empty())
		.unwrap();
	let fd = drv.open(b"/ext", O_RDONLY | O_DIRECTORY, 0).unwrap();
	assert_eq!(list_dir(&drv, fd), [b".".to_vec(), b"..".to_vec()]);
	// End of stream is sticky
	assert!(drv.readdir(fd).unwrap().is_none());
	drv.close(fd).unwrap();
	drv.unmount(b"/ext").unwrap();
}

#[test]
fn read_small_file() {
	let dev = seeded_disk(|fs| {
		seed_root_file(fs, b"hello", b"Hello, world!");
	});
	let drv = Ext2Driver::new();
	drv.mount(b"/ext", dev, MountFlags::empty()).unwrap();
	let fd = drv.open(b"/ext/hello", O_RDONLY, 0).unwrap();
	let mut buf = [0u8; 32];
	assert_eq!(drv.read(fd, &mut buf).unwrap(), 13);
	assert_eq!(&buf[..13], b"Hello, world!");
	// The position advanced to the end
	assert_eq!(drv.tell(fd).unwrap(), 13);
	assert_eq!(drv.read(fd, &mut buf).unwrap(), 0);
	assert_eq!(drv.total(fd).unwrap(), 13);
	drv.close(fd).unwrap();
	drv.unmount(b"/ext").unwrap();
}

#[test]
fn sparse_read() {
	let dev = seeded_disk(|fs| {
		let root_ent = fs.get_inode(ROOT_DIRECTORY_INODE).unwrap();
		let mut root = *root_ent.lock();
		let (ino, ent) = fs.alloc_inode(0, false).unwrap();
		let mut body = *ent.lock();
		body.i_mode = INODE_TYPE_REGULAR | 0o644;
		body.i_links_count = 1;
		// Logical block 0 stays a hole
		body.write_content(4096, &[0x55u8; 4096], 0, fs).unwrap();
		*ent.lock() = body;
		ent.mark_dirty();
		fs.dir_add_entry(ROOT_DIRECTORY_INODE, &mut root, b"sparse", ino, None)
			.unwrap();
		*root_ent.lock() = root;
		root_ent.mark_dirty();
	});
	let drv = Ext2Driver::new();
	drv.mount(b"/ext", dev, MountFlags::empty()).unwrap();
	let fd = drv.open(b"/ext/sparse", O_RDONLY, 0).unwrap();
	assert_eq!(drv.total(fd).unwrap(), 8192);
	let mut buf = vec![0xffu8; 4096];
	assert_eq!(drv.read(fd, &mut buf).unwrap(), 4096);
	assert!(buf.iter().all(|b| *b == 0));
	assert_eq!(drv.read(fd, &mut buf).unwrap(), 4096);
	assert!(buf.iter().all(|b| *b == 0x55));
	drv.close(fd).unwrap();
}

#[test]
fn mkdir_then_stat() {
	let drv = Ext2Driver::new();
	drv.mount(b"/ext", Box::new(fresh_disk()), MountFlags::READ_WRITE)
		.unwrap();
	let before = drv.stat(b"/ext").unwrap();
	drv.mkdir(b"/ext/sub", 0o755).unwrap();
	let stat = drv.stat(b"/ext/sub").unwrap();
	assert_eq!(stat.kind, FileType::Directory);
	assert_eq!(stat.size, 1024);
	assert_eq!(stat.mode, 0o755);
	assert_eq!(stat.nlink, 2);
	assert_ne!(stat.mtime, 0);
	// The parent gained a link from the child's `..`
	let after = drv.stat(b"/ext").unwrap();
	assert_eq!(after.nlink, before.nlink + 1);
	drv.unmount(b"/ext").unwrap();
}

#[test]
fn links_count_tracks_subdirectories() {
	let drv = Ext2Driver::new();
	drv.mount(b"/ext", Box::new(fresh_disk()), MountFlags::READ_WRITE)
		.unwrap();
	drv.mkdir(b"/ext/d", 0o755).unwrap();
	drv.mkdir(b"/ext/d/e", 0o755).unwrap();
	drv.mkdir(b"/ext/d/f", 0o755).unwrap();
	assert_eq!(drv.stat(b"/ext/d").unwrap().nlink, 4);
	drv.rmdir(b"/ext/d/e").unwrap();
	assert_eq!(drv.stat(b"/ext/d").unwrap().nlink, 3);
	drv.unmount(b"/ext").unwrap();
}

#[test]
fn mkdir_rmdir_restores_counts() {
	let drv = Ext2Driver::new();
	drv.mount(b"/ext", Box::new(fresh_disk()), MountFlags::READ_WRITE)
		.unwrap();
	let before = drv.statfs(b"/ext").unwrap();
	let root_nlink = drv.stat(b"/ext").unwrap().nlink;
	drv.mkdir(b"/ext/tmp", 0o755).unwrap();
	let during = drv.statfs(b"/ext").unwrap();
	assert_eq!(during.f_ffree, before.f_ffree - 1);
	assert_eq!(during.f_bfree, before.f_bfree - 1);
	drv.rmdir(b"/ext/tmp").unwrap();
	let after = drv.statfs(b"/ext").unwrap();
	assert_eq!(after.f_ffree, before.f_ffree);
	assert_eq!(after.f_bfree, before.f_bfree);
	assert_eq!(drv.stat(b"/ext").unwrap().nlink, root_nlink);
	assert_eq!(drv.stat(b"/ext/tmp").map(|_| ()), Err(errno::ENOENT));
	drv.unmount(b"/ext").unwrap();
}

#[test]
fn rename_across_directories() {
	let drv = Ext2Driver::new();
	drv.mount(b"/ext", Box::new(fresh_disk()), MountFlags::READ_WRITE)
		.unwrap();
	drv.mkdir(b"/ext/a", 0o755).unwrap();
	drv.mkdir(b"/ext/b", 0o755).unwrap();
	let fd = drv.open(b"/ext/a/f", O_CREAT, 0o644).unwrap();
	drv.close(fd).unwrap();
	let ino = drv.stat(b"/ext/a/f").unwrap().inode;
	drv.rename(b"/ext/a/f", b"/ext/b/g").unwrap();
	assert_eq!(drv.stat(b"/ext/a/f").map(|_| ()), Err(errno::ENOENT));
	let stat = drv.stat(b"/ext/b/g").unwrap();
	assert_eq!(stat.inode, ino);
	assert_eq!(stat.nlink, 1);
	drv.unmount(b"/ext").unwrap();
}

#[test]
fn rename_directory_updates_dotdot_and_links() {
	let drv = Ext2Driver::new();
	drv.mount(b"/ext", Box::new(fresh_disk()), MountFlags::READ_WRITE)
		.unwrap();
	drv.mkdir(b"/ext/a", 0o755).unwrap();
	drv.mkdir(b"/ext/b", 0o755).unwrap();
	drv.mkdir(b"/ext/a/sub", 0o755).unwrap();
	assert_eq!(drv.stat(b"/ext/a").unwrap().nlink, 3);
	drv.rename(b"/ext/a/sub", b"/ext/b/moved").unwrap();
	assert_eq!(drv.stat(b"/ext/a").unwrap().nlink, 2);
	assert_eq!(drv.stat(b"/ext/b").unwrap().nlink, 3);
	// `..` now points at the new parent
	let b = drv.stat(b"/ext/b").unwrap();
	let up = drv.stat(b"/ext/b/moved/..").unwrap();
	assert_eq!(up.inode, b.inode);
	// Moving a directory under itself is refused
	drv.mkdir(b"/ext/b/moved/deep", 0o755).unwrap();
	assert_eq!(
		drv.rename(b"/ext/b/moved", b"/ext/b/moved/deep/x"),
		Err(errno::EINVAL)
	);
	drv.unmount(b"/ext").unwrap();
}

#[test]
fn rename_back_and_forth_is_noop() {
	let drv = Ext2Driver::new();
	drv.mount(b"/ext", Box::new(fresh_disk()), MountFlags::READ_WRITE)
		.unwrap();
	let fd = drv.open(b"/ext/f", O_CREAT, 0o644).unwrap();
	drv.close(fd).unwrap();
	let before = drv.stat(b"/ext/f").unwrap();
	drv.rename(b"/ext/f", b"/ext/g").unwrap();
	drv.rename(b"/ext/g", b"/ext/f").unwrap();
	let after = drv.stat(b"/ext/f").unwrap();
	assert_eq!(after.inode, before.inode);
	assert_eq!(after.nlink, before.nlink);
	assert_eq!(after.size, before.size);
	drv.unmount(b"/ext").unwrap();
}

#[test]
fn rename_replaces_destination() {
	let dev = seeded_disk(|fs| {
		seed_root_file(fs, b"src", b"source");
		seed_root_file(fs, b"dst", b"destination");
	});
	let drv = Ext2Driver::new();
	drv.mount(b"/ext", dev, MountFlags::READ_WRITE).unwrap();
	let before = drv.statfs(b"/ext").unwrap();
	let src_ino = drv.stat(b"/ext/src").unwrap().inode;
	drv.rename(b"/ext/src", b"/ext/dst").unwrap();
	assert_eq!(drv.stat(b"/ext/src").map(|_| ()), Err(errno::ENOENT));
	assert_eq!(drv.stat(b"/ext/dst").unwrap().inode, src_ino);
	// The replaced file's inode and block were released
	let after = drv.statfs(b"/ext").unwrap();
	assert_eq!(after.f_ffree, before.f_ffree + 1);
	assert_eq!(after.f_bfree, before.f_bfree + 1);
	drv.unmount(b"/ext").unwrap();
}

#[test]
fn rename_of_root_is_refused() {
	let drv = Ext2Driver::new();
	drv.mount(b"/ext", Box::new(fresh_disk()), MountFlags::READ_WRITE)
		.unwrap();
	assert_eq!(drv.rename(b"/ext", b"/ext/moved"), Err(errno::EINVAL));
	drv.unmount(b"/ext").unwrap();
}

#[test]
fn rename_dir_over_file_is_refused() {
	let dev = seeded_disk(|fs| {
		seed_root_file(fs, b"plain", b"x");
	});
	let drv = Ext2Driver::new();
	drv.mount(b"/ext", dev, MountFlags::READ_WRITE).unwrap();
	drv.mkdir(b"/ext/d", 0o755).unwrap();
	assert_eq!(drv.rename(b"/ext/d", b"/ext/plain"), Err(errno::ENOTDIR));
	assert_eq!(drv.rename(b"/ext/plain", b"/ext/d"), Err(errno::EISDIR));
	drv.unmount(b"/ext").unwrap();
}

#[test]
fn unlink_of_open_file_is_busy() {
	let drv = Ext2Driver::new();
	drv.mount(b"/ext", Box::new(fresh_disk()), MountFlags::READ_WRITE)
		.unwrap();
	let fd = drv.open(b"/ext/x", O_CREAT, 0o644).unwrap();
	assert_eq!(drv.unlink(b"/ext/x"), Err(errno::EBUSY));
	drv.close(fd).unwrap();
	drv.unlink(b"/ext/x").unwrap();
	assert_eq!(drv.stat(b"/ext/x").map(|_| ()), Err(errno::ENOENT));
	drv.unmount(b"/ext").unwrap();
}

#[test]
fn unlink_refuses_directories() {
	let drv = Ext2Driver::new();
	drv.mount(b"/ext", Box::new(fresh_disk()), MountFlags::READ_WRITE)
		.unwrap();
	drv.mkdir(b"/ext/d", 0o755).unwrap();
	assert_eq!(drv.unlink(b"/ext/d"), Err(errno::EPERM));
	assert_eq!(drv.rmdir(b"/ext/d"), Ok(()));
	drv.unmount(b"/ext").unwrap();
}

#[test]
fn rmdir_refuses_non_empty() {
	let drv = Ext2Driver::new();
	drv.mount(b"/ext", Box::new(fresh_disk()), MountFlags::READ_WRITE)
		.unwrap();
	drv.mkdir(b"/ext/d", 0o755).unwrap();
	drv.mkdir(b"/ext/d/e", 0o755).unwrap();
	assert_eq!(drv.rmdir(b"/ext/d"), Err(errno::ENOTEMPTY));
	drv.rmdir(b"/ext/d/e").unwrap();
	drv.rmdir(b"/ext/d").unwrap();
	drv.unmount(b"/ext").unwrap();
}

#[test]
fn unmount_with_open_handle_is_busy() {
	let drv = Ext2Driver::new();
	drv.mount(b"/ext", Box::new(fresh_disk()), MountFlags::empty())
		.unwrap();
	let fd = drv.open(b"/ext", O_RDONLY | O_DIRECTORY, 0).unwrap();
	assert_eq!(drv.unmount(b"/ext"), Err(errno::EBUSY));
	drv.close(fd).unwrap();
	drv.unmount(b"/ext").unwrap();
}

#[test]
fn mount_unmount_writes_nothing() {
	let mut disk = RamDisk::new(512, 4096);
	mkfs(&mut disk, 1024, 1).unwrap();
	let shared = SharedDisk::new(disk);
	let baseline = shared.write_count();
	let drv = Ext2Driver::new();
	// Even a read-write mount must not touch the device by itself
	drv.mount(b"/ext", Box::new(shared.clone()), MountFlags::READ_WRITE)
		.unwrap();
	let fd = drv.open(b"/ext", O_RDONLY | O_DIRECTORY, 0).unwrap();
	list_dir(&drv, fd);
	drv.close(fd).unwrap();
	drv.unmount(b"/ext").unwrap();
	assert_eq!(shared.write_count(), baseline);
}

#[test]
fn readdir_sees_every_entry_once() {
	let drv = Ext2Driver::new();
	drv.mount(b"/ext", Box::new(fresh_disk()), MountFlags::READ_WRITE)
		.unwrap();
	let count = 40;
	for i in 0..count {
		drv.mkdir(format!("/ext/dir{i:02}").as_bytes(), 0o755).unwrap();
	}
	let fd = drv.open(b"/ext", O_RDONLY | O_DIRECTORY, 0).unwrap();
	let mut names = list_dir(&drv, fd);
	drv.close(fd).unwrap();
	names.sort();
	let mut expected: Vec<Vec<u8>> = vec![b".".to_vec(), b"..".to_vec()];
	expected.extend((0..count).map(|i| format!("dir{i:02}").into_bytes()));
	expected.sort();
	assert_eq!(names, expected);
	drv.unmount(b"/ext").unwrap();
}

#[test]
fn readdir_skips_removed_entries() {
	let drv = Ext2Driver::new();
	drv.mount(b"/ext", Box::new(fresh_disk()), MountFlags::READ_WRITE)
		.unwrap();
	for name in [&b"one"[..], b"two", b"three"] {
		let fd = drv
			.open(format!("/ext/{}", String::from_utf8_lossy(name)).as_bytes(), O_CREAT, 0o644)
			.unwrap();
		drv.close(fd).unwrap();
	}
	drv.unlink(b"/ext/two").unwrap();
	let fd = drv.open(b"/ext", O_RDONLY | O_DIRECTORY, 0).unwrap();
	let names = list_dir(&drv, fd);
	drv.close(fd).unwrap();
	assert!(names.contains(&b"one".to_vec()));
	assert!(names.contains(&b"three".to_vec()));
	assert!(!names.contains(&b"two".to_vec()));
	drv.unmount(b"/ext").unwrap();
}

#[test]
fn seek_clamps_to_size() {
	let dev = seeded_disk(|fs| {
		seed_root_file(fs, b"hello", b"Hello, world!");
	});
	let drv = Ext2Driver::new();
	drv.mount(b"/ext", dev, MountFlags::empty()).unwrap();
	let fd = drv.open(b"/ext/hello", O_RDONLY, 0).unwrap();
	// Past-end seeks clamp to the size
	assert_eq!(drv.seek(fd, 100, SEEK_SET).unwrap(), 13);
	assert_eq!(drv.seek(fd, -5, SEEK_CUR).unwrap(), 8);
	let mut buf = [0u8; 16];
	assert_eq!(drv.read(fd, &mut buf).unwrap(), 5);
	assert_eq!(&buf[..5], b"orld!");
	assert_eq!(drv.seek(fd, 0, SEEK_END).unwrap(), 13);
	assert_eq!(drv.seek(fd, -50, SEEK_SET), Err(errno::EINVAL));
	assert_eq!(drv.seek(fd, 0, 7), Err(errno::EINVAL));
	drv.close(fd).unwrap();
}

#[test]
fn open_kind_checks() {
	let dev = seeded_disk(|fs| {
		seed_root_file(fs, b"plain", b"x");
	});
	let drv = Ext2Driver::new();
	drv.mount(b"/ext", dev, MountFlags::empty()).unwrap();
	// A directory without O_DIRECTORY
	assert_eq!(drv.open(b"/ext", O_RDONLY, 0), Err(errno::EISDIR));
	// O_DIRECTORY on a regular file
	assert_eq!(
		drv.open(b"/ext/plain", O_RDONLY | O_DIRECTORY, 0),
		Err(errno::ENOTDIR)
	);
	drv.unmount(b"/ext").unwrap();
}

#[test]
fn open_create_semantics() {
	let drv = Ext2Driver::new();
	drv.mount(b"/ext", Box::new(fresh_disk()), MountFlags::READ_WRITE)
		.unwrap();
	let fd = drv.open(b"/ext/new", O_CREAT | O_EXCL, 0o600).unwrap();
	drv.close(fd).unwrap();
	let stat = drv.stat(b"/ext/new").unwrap();
	assert_eq!(stat.kind, FileType::Regular);
	assert_eq!(stat.mode, 0o600);
	assert_eq!(stat.size, 0);
	// O_EXCL refuses an existing file
	assert_eq!(
		drv.open(b"/ext/new", O_CREAT | O_EXCL, 0o600),
		Err(errno::EEXIST)
	);
	// Plain O_CREAT opens it
	let fd = drv.open(b"/ext/new", O_CREAT, 0o600).unwrap();
	drv.close(fd).unwrap();
	drv.unmount(b"/ext").unwrap();
}

#[test]
fn readonly_mount_refuses_mutation() {
	let drv = Ext2Driver::new();
	drv.mount(b"/ext", Box::new(fresh_disk()), MountFlags::empty())
		.unwrap();
	assert_eq!(drv.mkdir(b"/ext/d", 0o755), Err(errno::EROFS));
	assert_eq!(drv.unlink(b"/ext/x"), Err(errno::EROFS));
	assert_eq!(drv.open(b"/ext/y", O_CREAT, 0o644), Err(errno::EROFS));
	drv.unmount(b"/ext").unwrap();
}

#[test]
fn open_table_exhaustion() {
	let drv = Ext2Driver::new();
	drv.mount(b"/ext", Box::new(fresh_disk()), MountFlags::empty())
		.unwrap();
	let fds: Vec<i32> = (0..16)
		.map(|_| drv.open(b"/ext", O_RDONLY | O_DIRECTORY, 0).unwrap())
		.collect();
	assert_eq!(
		drv.open(b"/ext", O_RDONLY | O_DIRECTORY, 0),
		Err(errno::EMFILE)
	);
	for fd in fds {
		drv.close(fd).unwrap();
	}
	drv.unmount(b"/ext").unwrap();
}

#[test]
fn fcntl_commands() {
	let drv = Ext2Driver::new();
	drv.mount(b"/ext", Box::new(fresh_disk()), MountFlags::empty())
		.unwrap();
	let fd = drv.open(b"/ext", O_RDONLY | O_DIRECTORY, 0).unwrap();
	assert_eq!(drv.fcntl(fd, F_GETFL, 0).unwrap() as u32, O_RDONLY | O_DIRECTORY);
	assert_eq!(drv.fcntl(fd, 99, 0), Err(errno::EINVAL));
	assert_eq!(drv.fcntl(999, F_GETFL, 0), Err(errno::EBADF));
	drv.close(fd).unwrap();
	drv.unmount(b"/ext").unwrap();
}

#[test]
fn hard_links() {
	let dev = seeded_disk(|fs| {
		seed_root_file(fs, b"orig", b"shared content");
	});
	let drv = Ext2Driver::new();
	drv.mount(b"/ext", dev, MountFlags::READ_WRITE).unwrap();
	drv.link(b"/ext/orig", b"/ext/alias").unwrap();
	let a = drv.stat(b"/ext/orig").unwrap();
	let b = drv.stat(b"/ext/alias").unwrap();
	assert_eq!(a.inode, b.inode);
	assert_eq!(a.nlink, 2);
	drv.unlink(b"/ext/orig").unwrap();
	// The content survives through the second link
	let fd = drv.open(b"/ext/alias", O_RDONLY, 0).unwrap();
	let mut buf = [0u8; 32];
	assert_eq!(drv.read(fd, &mut buf).unwrap(), 14);
	assert_eq!(&buf[..14], b"shared content");
	drv.close(fd).unwrap();
	assert_eq!(drv.stat(b"/ext/alias").unwrap().nlink, 1);
	drv.unmount(b"/ext").unwrap();
}

#[test]
fn symlink_resolution() {
	let dev = seeded_disk(|fs| {
		seed_root_file(fs, b"hello", b"Hello, world!");
		seed_root_symlink(fs, b"link", b"hello");
		seed_root_symlink(fs, b"loop", b"loop");
		seed_root_symlink(fs, b"abs", b"/link");
	});
	let drv = Ext2Driver::new();
	drv.mount(b"/ext", dev, MountFlags::empty()).unwrap();
	assert_eq!(drv.readlink(b"/ext/link").unwrap(), b"hello");
	// stat follows the link
	let stat = drv.stat(b"/ext/link").unwrap();
	assert_eq!(stat.kind, FileType::Regular);
	assert_eq!(stat.size, 13);
	// A chain through an absolute target stays on the volume
	assert_eq!(drv.stat(b"/ext/abs").unwrap().inode, stat.inode);
	// A self-referencing link overflows the traversal depth
	assert_eq!(drv.stat(b"/ext/loop").map(|_| ()), Err(errno::ELOOP));
	// readlink does not follow its final component
	assert_eq!(drv.readlink(b"/ext/hello"), Err(errno::EINVAL));
	drv.unmount(b"/ext").unwrap();
}

#[test]
fn paths_with_redundant_separators() {
	let dev = seeded_disk(|fs| {
		seed_root_file(fs, b"hello", b"Hello, world!");
	});
	let drv = Ext2Driver::new();
	drv.mount(b"/ext", dev, MountFlags::empty()).unwrap();
	assert!(drv.stat(b"/ext//hello").is_ok());
	assert!(drv.stat(b"/ext/./hello").is_ok());
	assert!(drv.stat(b"/ext/hello/").is_ok());
	assert_eq!(drv.stat(b"/other/hello").map(|_| ()), Err(errno::ENOENT));
	drv.unmount(b"/ext").unwrap();
}

#[test]
fn data_survives_remount() {
	let drv = Ext2Driver::new();
	let mut disk = RamDisk::new(512, 4096);
	mkfs(&mut disk, 1024, 1).unwrap();
	let shared = SharedDisk::new(disk);
	drv.mount(b"/ext", Box::new(shared.clone()), MountFlags::READ_WRITE)
		.unwrap();
	drv.mkdir(b"/ext/persisted", 0o700).unwrap();
	drv.unmount(b"/ext").unwrap();
	// Remount and observe the directory again
	drv.mount(b"/ext", Box::new(shared), MountFlags::empty())
		.unwrap();
	let stat = drv.stat(b"/ext/persisted").unwrap();
	assert_eq!(stat.kind, FileType::Directory);
	assert_eq!(stat.mode, 0o700);
	drv.unmount(b"/ext").unwrap();
}

#[test]
fn directory_entry_allocation_across_blocks() {
	let drv = Ext2Driver::new();
	drv.mount(b"/ext", Box::new(fresh_disk()), MountFlags::READ_WRITE)
		.unwrap();
	// Push the root directory past one block
	let count = 60;
	for i in 0..count {
		let path = format!("/ext/a-rather-long-directory-name-{i:03}");
		drv.mkdir(path.as_bytes(), 0o755).unwrap();
	}
	let root = drv.stat(b"/ext").unwrap();
	assert!(root.size > 1024);
	assert_eq!(root.size % 1024, 0);
	assert_eq!(root.nlink as usize, 2 + count);
	// Every entry resolves
	for i in 0..count {
		let path = format!("/ext/a-rather-long-directory-name-{i:03}");
		assert_eq!(drv.stat(path.as_bytes()).unwrap().kind, FileType::Directory);
	}
	drv.unmount(b"/ext").unwrap();
}

#[test]
fn second_mount_on_same_path_is_refused() {
	let drv = Ext2Driver::new();
	drv.mount(b"/ext", Box::new(fresh_disk()), MountFlags::empty())
		.unwrap();
	assert_eq!(
		drv.mount(b"/ext", Box::new(fresh_disk()), MountFlags::empty()),
		Err(errno::EBUSY)
	);
	assert_eq!(drv.unmount(b"/nope"), Err(errno::ENOENT));
	drv.unmount(b"/ext").unwrap();
}

#[test]
fn not_an_ext2_volume() {
	let drv = Ext2Driver::new();
	let disk = RamDisk::new(512, 4096);
	assert_eq!(
		drv.mount(b"/ext", Box::new(disk), MountFlags::empty()),
		Err(errno::EINVAL)
	);
}

#[test]
fn directory_record_alignment_on_disk() {
	// Check the raw record chain of a directory block against the format's
	// alignment rules
	let dev = seeded_disk(|fs| {
		seed_root_file(fs, b"a", b"1");
		seed_root_file(fs, b"bb", b"22");
		seed_root_file(fs, b"ccc", b"333");
	});
	let mut fs = Ext2Fs::open(dev, true).unwrap();
	let root_ent = fs.get_inode(ROOT_DIRECTORY_INODE).unwrap();
	let root = *root_ent.lock();
	let mut total = 0u64;
	fs.for_each_dirent(&root, |off, ent| {
		assert_eq!(off % dirent::ALIGN as u64, 0);
		assert!(ent.rec_len as usize >= dirent::NAME_OFF);
		total = off + ent.rec_len as u64;
		Ok(true)
	})
	.unwrap();
	assert_eq!(total, root.get_size(&fs.sp));
}
