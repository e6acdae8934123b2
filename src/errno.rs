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

//! This module stores the errno utilities.
//!
//! Every fallible operation of the driver returns an [`EResult`]. The error
//! values follow the usual Unix numbering so the host VFS can hand them back
//! to userspace untouched.

/// Type representing an Unix errno.
pub type Errno = i32;

/// Result of a fallible driver operation.
pub type EResult<T> = core::result::Result<T, Errno>;

/// Operation not permitted.
pub const EPERM: Errno = 1;
/// No such file or directory.
pub const ENOENT: Errno = 2;
/// I/O error.
pub const EIO: Errno = 5;
/// Bad file descriptor.
pub const EBADF: Errno = 9;
/// Device or resource busy.
pub const EBUSY: Errno = 16;
/// File exists.
pub const EEXIST: Errno = 17;
/// Cross-device link.
pub const EXDEV: Errno = 18;
/// No such device.
pub const ENODEV: Errno = 19;
/// Not a directory or a symbolic link to a directory.
pub const ENOTDIR: Errno = 20;
/// Is a directory.
pub const EISDIR: Errno = 21;
/// Invalid argument.
pub const EINVAL: Errno = 22;
/// File descriptor value too large.
pub const EMFILE: Errno = 24;
/// No space left on device.
pub const ENOSPC: Errno = 28;
/// Read-only file system.
pub const EROFS: Errno = 30;
/// Too many links.
pub const EMLINK: Errno = 31;
/// Filename too long.
pub const ENAMETOOLONG: Errno = 36;
/// Directory not empty.
pub const ENOTEMPTY: Errno = 39;
/// Too many levels of symbolic links.
pub const ELOOP: Errno = 40;
/// Value too large to be stored in data type.
pub const EOVERFLOW: Errno = 75;
/// Structure needs cleaning.
///
/// Returned when an on-disk structure fails validation, meaning the
/// filesystem is corrupted.
pub const EUCLEAN: Errno = 117;
