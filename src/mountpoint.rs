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

//! A mount point is a path in the host VFS namespace under which a volume is
//! mounted.
//!
//! The registry maps mount point paths to their volume. An incoming path is
//! routed to the mount whose path is its longest prefix on a component
//! boundary.

use crate::errno;
use crate::errno::EResult;
use crate::fs::Ext2Fs;
use crate::path::Component;
use crate::path::Path;
use crate::path::PathBuf;
use bitflags::bitflags;
use hashbrown::HashMap;

bitflags! {
	/// Flags of a mount.
	pub struct MountFlags: u32 {
		/// Mounts the volume read-write.
		const READ_WRITE = 0b1;
	}
}

/// An active association between a block device and a path in the host VFS
/// namespace.
pub struct Mount {
	/// The path at which the volume is mounted.
	pub(crate) path: PathBuf,
	/// The volume engine instance.
	pub(crate) fs: Ext2Fs,
	/// The mount's flags.
	pub(crate) flags: MountFlags,
}

impl Mount {
	/// Returns the path at which the volume is mounted.
	pub fn path(&self) -> &Path {
		self.path.as_ref()
	}

	/// Returns the mount's flags.
	pub fn flags(&self) -> MountFlags {
		self.flags
	}
}

/// The set of mounted volumes, keyed by mount point path.
pub(crate) type MountRegistry = HashMap<PathBuf, Mount>;

/// Returns the number of leading components of `path` matched by `mount`,
/// or `None` if `mount` is not a prefix of `path` on a component boundary.
fn match_len(mount: &Path, path: &Path) -> Option<usize> {
	let mut path_comps = path.components();
	let mut n = 0;
	for mc in mount.components() {
		if path_comps.next()? != mc {
			return None;
		}
		n += 1;
	}
	Some(n)
}

/// Finds the mount covering `path` in the registry.
///
/// The function returns the mount point path along with the remainder of
/// `path` relative to it.
///
/// `path` must be absolute. If no mount covers it, the function returns
/// [`errno::ENOENT`].
pub(crate) fn find_mount(
	mounts: &MountRegistry,
	path: &Path,
) -> EResult<(PathBuf, PathBuf)> {
	if !path.is_absolute() {
		return Err(errno::EINVAL);
	}
	let best = mounts
		.keys()
		.filter_map(|mp| Some((match_len(mp, path)?, mp)))
		.max_by_key(|(n, _)| *n);
	let Some((n, mp)) = best else {
		return Err(errno::ENOENT);
	};
	let rel: PathBuf = path
		.components()
		.skip(n)
		.filter(|c| !matches!(c, Component::RootDir | Component::CurDir))
		.collect();
	Ok((mp.clone(), rel))
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn longest_prefix() {
		assert_eq!(match_len(Path::new_unchecked(b"/"), Path::new_unchecked(b"/a/b")), Some(1));
		assert_eq!(
			match_len(Path::new_unchecked(b"/a"), Path::new_unchecked(b"/a/b")),
			Some(2)
		);
		assert_eq!(match_len(Path::new_unchecked(b"/c"), Path::new_unchecked(b"/a/b")), None);
		// Component boundary: `/ab` does not cover `/a`
		assert_eq!(match_len(Path::new_unchecked(b"/ab"), Path::new_unchecked(b"/a/b")), None);
	}
}
