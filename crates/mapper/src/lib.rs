//! # Mapper — uniform file abstraction
//!
//! A single file exposed two ways: a sized, memory-mapped span for random
//! access, and an unbounded anonymous "vmap" staging buffer for sequential
//! writers (block builders, compactors) that don't want to size their output
//! file up front.
//!
//! Every operation here is best-effort and idempotent: calling `unmap` twice,
//! or `flush` with nothing mapped, is a harmless no-op rather than an error.
//! Failures are surfaced through [`Mapper::is_open`]/[`Mapper::is_mapped`]
//! plus the `io::Result` of the call that failed — there is no separate
//! "poisoned" state to reason about.

use memmap2::{Mmap, MmapMut, MmapOptions};
use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::fs::FileExt;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::ptr::NonNull;

/// Access mode requested by [`Mapper::open`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenFlags(u8);

impl OpenFlags {
    pub const READ: OpenFlags = OpenFlags(0b001);
    pub const WRITE: OpenFlags = OpenFlags(0b010);
    pub const EXECUTE: OpenFlags = OpenFlags(0b100);

    pub fn contains(self, other: OpenFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for OpenFlags {
    type Output = OpenFlags;
    fn bitor(self, rhs: OpenFlags) -> OpenFlags {
        OpenFlags(self.0 | rhs.0)
    }
}

/// Access-pattern hint forwarded to `madvise` (via `memmap2::Advice`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessHint {
    Default,
    Sequential,
    Random,
    /// `MADV_WILLNEED`
    Hot,
    /// `MADV_DONTNEED`
    Cold,
}

/// Positional write payload: a single span, or a list written back-to-back
/// starting at the given offset (a scatter/gather write).
pub enum WriteData<'a> {
    Single(&'a [u8]),
    Gather(&'a [&'a [u8]]),
}

/// An anonymous, lazily committed staging region for sequential writers.
///
/// Backed by a raw `mmap(MAP_PRIVATE | MAP_ANON | MAP_NORESERVE)` call
/// rather than `memmap2`, since `memmap2::map_anon` does not expose
/// `MAP_NORESERVE` and the whole point of vmap is to reserve address space
/// far larger than physical memory without committing it up front.
struct VMap {
    ptr: NonNull<u8>,
    capacity: usize,
    cursor: usize,
}

// SAFETY: the mapping is exclusively owned by the Mapper that holds this
// VMap; no other thread gets a pointer into it.
unsafe impl Send for VMap {}

impl VMap {
    fn new(capacity: usize) -> io::Result<Self> {
        // SAFETY: a fixed-size anonymous mapping; no file descriptor involved.
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                capacity,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANON | libc::MAP_NORESERVE,
                -1,
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }
        Ok(Self {
            // SAFETY: mmap succeeded, so ptr is non-null.
            ptr: unsafe { NonNull::new_unchecked(ptr as *mut u8) },
            capacity,
            cursor: 0,
        })
    }

    fn as_slice(&self) -> &[u8] {
        // SAFETY: `ptr` is valid for `capacity` bytes for the VMap's lifetime.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.cursor) }
    }

    fn slice_mut(&mut self, start: usize, len: usize) -> io::Result<&mut [u8]> {
        if start + len > self.capacity {
            return Err(io::Error::new(
                io::ErrorKind::OutOfMemory,
                "vmap staging region exhausted",
            ));
        }
        // SAFETY: bounds checked above against `capacity`.
        Ok(unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr().add(start), len) })
    }
}

impl Drop for VMap {
    fn drop(&mut self) {
        // SAFETY: `ptr`/`capacity` are exactly the values returned by mmap.
        unsafe {
            libc::munmap(self.ptr.as_ptr() as *mut libc::c_void, self.capacity);
        }
    }
}

/// Default vmap staging region: 16 GiB of reserved, uncommitted address space.
const DEFAULT_VMAP_CAPACITY: usize = 16 << 30;

/// A single file, optionally memory-mapped and/or backed by a vmap staging
/// region.
pub struct Mapper {
    path: PathBuf,
    file: Option<File>,
    flags: OpenFlags,
    len: u64,
    mapping: Option<MmapMut>,
    vmap: Option<VMap>,
    /// File offset the next `vmap_flush` should append at.
    vmap_file_pos: u64,
    last_hint: AccessHint,
}

impl Mapper {
    /// Opens (or creates) `path`. If `reserve` is `Some(n)` and `n > 0`, the
    /// file is truncated to exactly `n` bytes.
    pub fn open(path: impl AsRef<Path>, reserve: Option<u64>, flags: OpenFlags) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(flags.contains(OpenFlags::WRITE))
            .open(&path)?;

        if let Some(n) = reserve {
            if n > 0 {
                file.set_len(n)?;
            }
        }
        let len = file.metadata()?.len();

        Ok(Self {
            path,
            file: Some(file),
            flags,
            len,
            mapping: None,
            vmap: None,
            vmap_file_pos: len,
            last_hint: AccessHint::Default,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_open(&self) -> bool {
        self.file.is_some()
    }

    pub fn is_mapped(&self) -> bool {
        self.mapping.is_some()
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    /// Maps the file. `length` defaults to the current file length. Any
    /// existing mapping is soft-closed first.
    pub fn map(&mut self, length: Option<u64>) -> io::Result<()> {
        let file = self.file.as_ref().ok_or_else(not_open)?;
        let length = length.unwrap_or(self.len).max(1);

        if self.mapping.is_some() {
            self.unmap(false)?;
        }

        // SAFETY: the caller guarantees exclusive ownership of the file
        // region via Mapper's own aliasing discipline (one Mapper per file).
        let mmap = unsafe { MmapOptions::new().len(length as usize).map_mut(file)? };
        self.mapping = Some(mmap);
        self.len = length;
        let hint = self.last_hint;
        self.hint(hint)?;
        Ok(())
    }

    /// Unmaps the file. If `full`, also closes the underlying descriptor.
    /// Safe to call when already unmapped/closed.
    pub fn unmap(&mut self, full: bool) -> io::Result<()> {
        if let Some(mapping) = self.mapping.take() {
            let _ = mapping.flush();
        }
        if full {
            self.file = None;
        }
        Ok(())
    }

    /// Truncates the file to `size`. If currently mapped, unmaps and remaps
    /// preserving the last-applied hint.
    pub fn reserve(&mut self, size: u64) -> io::Result<()> {
        let file = self.file.as_ref().ok_or_else(not_open)?;
        file.set_len(size)?;
        self.len = size;
        if self.mapping.is_some() {
            self.map(Some(size))?;
        }
        Ok(())
    }

    /// Rounds `required` up to `lcm(page_size, filesystem_block_size)` and
    /// reserves that much space, returning the rounded size.
    pub fn reserve_aligned(&mut self, required: u64) -> io::Result<u64> {
        let align = alignment_for(&self.path)?;
        let rounded = round_up(required.max(1), align);
        self.reserve(rounded)?;
        Ok(rounded)
    }

    /// Reserves a large, lazily committed anonymous staging region.
    pub fn vmap(&mut self) -> io::Result<()> {
        self.vmap_with_capacity(DEFAULT_VMAP_CAPACITY)
    }

    /// As [`Mapper::vmap`], with an explicit capacity (for tests that don't
    /// want to reserve 16 GiB of address space).
    pub fn vmap_with_capacity(&mut self, capacity: usize) -> io::Result<()> {
        self.vmap = Some(VMap::new(capacity)?);
        self.vmap_file_pos = self.len;
        Ok(())
    }

    /// Returns a mutable view of `len` unwritten bytes at the current vmap
    /// cursor, without advancing it. The caller fills the span and then
    /// calls [`Mapper::vmap_increment`].
    pub fn vmap_slice_mut(&mut self, len: usize) -> io::Result<&mut [u8]> {
        let vmap = self.vmap.as_mut().ok_or_else(not_vmapped)?;
        let cursor = vmap.cursor;
        vmap.slice_mut(cursor, len)
    }

    /// Advances the vmap logical cursor by `n` bytes (the caller has already
    /// written them via [`Mapper::vmap_slice_mut`]).
    pub fn vmap_increment(&mut self, n: usize) -> io::Result<()> {
        let vmap = self.vmap.as_mut().ok_or_else(not_vmapped)?;
        if vmap.cursor + n > vmap.capacity {
            return Err(io::Error::new(io::ErrorKind::OutOfMemory, "vmap cursor overflow"));
        }
        vmap.cursor += n;
        Ok(())
    }

    /// Sequentially writes the staged vmap bytes to the file and resets the
    /// cursor. This is a plain `write`, not a mapped write — vmap is a
    /// staging buffer, not a view onto the file.
    pub fn vmap_flush(&mut self) -> io::Result<()> {
        let file = self.file.as_ref().ok_or_else(not_open)?;
        let staged = match &self.vmap {
            Some(v) => v.as_slice(),
            None => return Ok(()),
        };
        if staged.is_empty() {
            return Ok(());
        }
        file.write_at(staged, self.vmap_file_pos)?;
        self.vmap_file_pos += staged.len() as u64;
        self.len = self.len.max(self.vmap_file_pos);
        if let Some(v) = self.vmap.as_mut() {
            v.cursor = 0;
        }
        file.sync_all()?;
        Ok(())
    }

    /// msyncs the mapped region (optionally a sub-range), or fsyncs the file
    /// when operating purely through vmap.
    pub fn flush(&self, range: Option<(usize, usize)>) -> io::Result<()> {
        if let Some(mapping) = &self.mapping {
            return match range {
                Some((off, len)) => mapping.flush_range(off, len),
                None => mapping.flush(),
            };
        }
        if let Some(file) = &self.file {
            file.sync_all()?;
        }
        Ok(())
    }

    /// Positional write, bypassing the mapping.
    pub fn write(&self, offset: u64, data: WriteData<'_>) -> io::Result<()> {
        let file = self.file.as_ref().ok_or_else(not_open)?;
        match data {
            WriteData::Single(bytes) => {
                file.write_at(bytes, offset)?;
            }
            WriteData::Gather(parts) => {
                let mut pos = offset;
                for part in parts {
                    file.write_at(part, pos)?;
                    pos += part.len() as u64;
                }
            }
        }
        Ok(())
    }

    /// Reads `count` bytes starting at `offset`, via the mapping if active,
    /// otherwise via a positional read.
    pub fn read(&self, offset: u64, count: usize) -> io::Result<Vec<u8>> {
        if let Some(mapping) = &self.mapping {
            let off = offset as usize;
            if off + count > mapping.len() {
                return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "read past mapped region"));
            }
            return Ok(mapping[off..off + count].to_vec());
        }
        let file = self.file.as_ref().ok_or_else(not_open)?;
        let mut buf = vec![0u8; count];
        file.read_exact_at(&mut buf, offset)?;
        Ok(buf)
    }

    pub fn read_byte(&self, offset: u64) -> io::Result<u8> {
        Ok(self.read(offset, 1)?[0])
    }

    /// Applies an access-pattern hint to the active mapping. Remembered so
    /// it can be reapplied across `reserve`-triggered remaps. A no-op (but
    /// `Ok`) when nothing is mapped.
    pub fn hint(&mut self, access: AccessHint) -> io::Result<()> {
        self.last_hint = access;
        let Some(mapping) = &self.mapping else {
            return Ok(());
        };
        let advice = match access {
            AccessHint::Default => memmap2::Advice::Normal,
            AccessHint::Sequential => memmap2::Advice::Sequential,
            AccessHint::Random => memmap2::Advice::Random,
            AccessHint::Hot => memmap2::Advice::WillNeed,
            AccessHint::Cold => memmap2::Advice::DontNeed,
        };
        mapping.advise(advice)
    }

    /// A read-only view of the mapping, for callers that want zero-copy
    /// slices rather than owned reads (e.g. the segment reader).
    pub fn as_slice(&self) -> Option<&[u8]> {
        self.mapping.as_deref()
    }

    pub fn raw_fd(&self) -> Option<i32> {
        self.file.as_ref().map(|f| f.as_raw_fd())
    }
}

fn not_open() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "mapper is not open")
}

fn not_vmapped() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "mapper has no active vmap")
}

fn gcd(a: u64, b: u64) -> u64 {
    if b == 0 {
        a
    } else {
        gcd(b, a % b)
    }
}

fn lcm(a: u64, b: u64) -> u64 {
    a / gcd(a, b) * b
}

fn round_up(n: u64, align: u64) -> u64 {
    ((n + align - 1) / align) * align
}

/// `lcm(page_size, filesystem_block_size)` for the filesystem backing `path`.
fn alignment_for(path: &Path) -> io::Result<u64> {
    let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    let page_size = if page_size > 0 { page_size as u64 } else { 4096 };

    let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
    let c_path = std::ffi::CString::new(dir.to_string_lossy().as_bytes())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "path contains NUL byte"))?;
    let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
    let block_size = unsafe {
        if libc::statvfs(c_path.as_ptr(), &mut stat) == 0 {
            stat.f_bsize as u64
        } else {
            page_size
        }
    };

    Ok(lcm(page_size, block_size.max(1)))
}

/// Reopens an existing, already-sized file purely for read access (used by
/// segment readers that never write to the file again).
pub fn open_readonly(path: impl AsRef<Path>) -> io::Result<Mmap> {
    let file = File::open(path)?;
    // SAFETY: the file is not concurrently truncated by this process; other
    // writers (the flush pipeline) only ever write a brand-new segment
    // directory before publishing it.
    unsafe { MmapOptions::new().map(&file) }
}

#[cfg(test)]
mod tests;
