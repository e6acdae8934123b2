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

//! Driver-wide limits.

/// Maximum length of a directory entry name, in bytes.
pub const NAME_MAX: usize = 255;
/// Maximum length of a path, in bytes.
pub const PATH_MAX: usize = 4096;
/// The size of the open file table.
pub const OPEN_FILES_MAX: usize = 16;
/// Maximum number of symbolic links followed during path resolution.
pub const SYMLOOP_MAX: usize = 8;
