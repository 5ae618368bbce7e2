use super::*;
use tempfile::tempdir;

#[test]
fn open_creates_and_reserves() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("data.bin");
    let m = Mapper::open(&path, Some(128), OpenFlags::READ | OpenFlags::WRITE).unwrap();
    assert!(m.is_open());
    assert!(!m.is_mapped());
    assert_eq!(m.len(), 128);
}

#[test]
fn map_write_read_roundtrip() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("data.bin");
    let mut m = Mapper::open(&path, Some(64), OpenFlags::READ | OpenFlags::WRITE).unwrap();
    m.write(0, WriteData::Single(b"hello world")).unwrap();
    m.map(None).unwrap();
    assert!(m.is_mapped());
    let got = m.read(0, 11).unwrap();
    assert_eq!(&got, b"hello world");
}

#[test]
fn gather_write_is_positional() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("data.bin");
    let m = Mapper::open(&path, Some(32), OpenFlags::READ | OpenFlags::WRITE).unwrap();
    m.write(0, WriteData::Gather(&[b"ab", b"cd", b"ef"])).unwrap();
    assert_eq!(m.read(0, 6).unwrap(), b"abcdef");
}

#[test]
fn unmap_then_unmap_again_is_a_noop() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("data.bin");
    let mut m = Mapper::open(&path, Some(16), OpenFlags::READ | OpenFlags::WRITE).unwrap();
    m.map(None).unwrap();
    m.unmap(true).unwrap();
    assert!(!m.is_mapped());
    assert!(!m.is_open());
    // Idempotent: no double-free, no error.
    m.unmap(true).unwrap();
}

#[test]
fn reserve_grows_file_and_remaps() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("data.bin");
    let mut m = Mapper::open(&path, Some(16), OpenFlags::READ | OpenFlags::WRITE).unwrap();
    m.map(None).unwrap();
    m.reserve(64).unwrap();
    assert_eq!(m.len(), 64);
    assert!(m.is_mapped());
}

#[test]
fn reserve_aligned_rounds_up() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("data.bin");
    let mut m = Mapper::open(&path, Some(1), OpenFlags::READ | OpenFlags::WRITE).unwrap();
    let rounded = m.reserve_aligned(1).unwrap();
    assert!(rounded >= 1);
    assert_eq!(m.len(), rounded);
}

#[test]
fn vmap_stages_then_flushes_sequentially() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("data.bin");
    let mut m = Mapper::open(&path, None, OpenFlags::READ | OpenFlags::WRITE).unwrap();
    m.vmap_with_capacity(4096).unwrap();

    {
        let span = m.vmap_slice_mut(5).unwrap();
        span.copy_from_slice(b"hello");
    }
    m.vmap_increment(5).unwrap();
    m.vmap_flush().unwrap();

    assert_eq!(m.read(0, 5).unwrap(), b"hello");
}

#[test]
fn hint_on_unmapped_mapper_is_a_harmless_noop() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("data.bin");
    let mut m = Mapper::open(&path, Some(16), OpenFlags::READ | OpenFlags::WRITE).unwrap();
    m.hint(AccessHint::Sequential).unwrap();
}
