use crate::kmersearch::errors::{EngineError, Result};
use fxhash::FxHashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

pub const FHT_MAGIC: [u8; 4] = *b"KFHT";
pub const FHT_VERSION: u16 = 1;

/// magic + version + key width + entry count + next-append offset + bucket count
const HEADER_SIZE: u64 = 4 + 2 + 2 + 8 + 8 + 8;

/// 2^16 direct slots for the 16-bit variant.
const DIRECT_SLOTS: u64 = 1 << 16;

/// Rough in-memory bytes per entry of a merge hash, used when deciding
/// whether a merge fits the maintenance memory budget.
pub const MERGE_ENTRY_OVERHEAD: u64 = 48;

/// Storage layout variants, keyed by the k range in use.
///
/// * `Direct16` – a flat array of 2^16 counters, no hashing at all.
/// * `Chain32` / `Chain64` – bucket directory plus appended entry chains.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FhtKind {
    Direct16,
    Chain32,
    Chain64,
}

impl FhtKind {
    /// The narrowest variant whose key width covers 2k bits.
    pub fn for_k(k: u8) -> FhtKind {
        if k <= 8 {
            FhtKind::Direct16
        } else if k <= 16 {
            FhtKind::Chain32
        } else {
            FhtKind::Chain64
        }
    }

    pub fn key_width(self) -> u16 {
        match self {
            FhtKind::Direct16 => 16,
            FhtKind::Chain32 => 32,
            FhtKind::Chain64 => 64,
        }
    }

    fn from_key_width(width: u16) -> Option<FhtKind> {
        match width {
            16 => Some(FhtKind::Direct16),
            32 => Some(FhtKind::Chain32),
            64 => Some(FhtKind::Chain64),
            _ => None,
        }
    }

    /// On-disk bytes of one chain entry: key + value + next offset.
    fn entry_size(self) -> u64 {
        match self {
            FhtKind::Direct16 => 8,
            FhtKind::Chain32 => 4 + 8 + 8,
            FhtKind::Chain64 => 8 + 8 + 8,
        }
    }
}

/// Smallest power of two holding `expected / 4` buckets, clamped to
/// [4096, 16777216].
pub fn bucket_count_for(expected_entries: u64) -> u64 {
    (expected_entries / 4)
        .next_power_of_two()
        .clamp(4096, 16_777_216)
}

// MurmurHash3 finalization mixes.

#[inline]
fn fmix32(mut h: u32) -> u32 {
    h ^= h >> 16;
    h = h.wrapping_mul(0x85eb_ca6b);
    h ^= h >> 13;
    h = h.wrapping_mul(0xc2b2_ae35);
    h ^= h >> 16;
    h
}

#[inline]
fn fmix64(mut h: u64) -> u64 {
    h ^= h >> 33;
    h = h.wrapping_mul(0xff51_afd7_ed55_8ccd);
    h ^= h >> 33;
    h = h.wrapping_mul(0xc4ce_b9fe_1a85_ec53);
    h ^= h >> 33;
    h
}

/// A counter table persisted to a single file, used by the frequency
/// analyzer for aggregation that may not fit in memory.
///
/// The layout is native-endian on purpose: these files are worker-private
/// temporaries and never travel between architectures.
pub struct FileHashTable {
    file: File,
    path: PathBuf,
    kind: FhtKind,
    bucket_count: u64,
    entry_count: u64,
    next_append: u64,
}

impl FileHashTable {
    /// Create a fresh table at `path`, sized for `expected_entries`.
    pub fn create(path: &Path, kind: FhtKind, expected_entries: u64) -> Result<FileHashTable> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .map_err(|e| EngineError::io("create", path, e))?;

        let bucket_count = match kind {
            FhtKind::Direct16 => DIRECT_SLOTS,
            _ => bucket_count_for(expected_entries),
        };
        let mut table = FileHashTable {
            file,
            path: path.to_path_buf(),
            kind,
            bucket_count,
            entry_count: 0,
            next_append: HEADER_SIZE + bucket_count * 8,
        };
        // Directory (or the direct counter array) starts zeroed.
        table
            .file
            .set_len(table.next_append)
            .map_err(|e| EngineError::io("resize", &table.path, e))?;
        table.write_header()?;
        Ok(table)
    }

    /// Open an existing table, verifying magic and version.
    pub fn open(path: &Path) -> Result<FileHashTable> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| EngineError::io("open", path, e))?;

        let mut header = [0u8; HEADER_SIZE as usize];
        file.seek(SeekFrom::Start(0))
            .and_then(|_| file.read_exact(&mut header))
            .map_err(|e| EngineError::io("read header", path, e))?;

        if header[0..4] != FHT_MAGIC {
            return Err(EngineError::Corruption {
                path: path.to_path_buf(),
                detail: format!("bad magic {:02x?}", &header[0..4]),
            });
        }
        let version = u16::from_ne_bytes([header[4], header[5]]);
        if version != FHT_VERSION {
            return Err(EngineError::Corruption {
                path: path.to_path_buf(),
                detail: format!("unsupported version {}", version),
            });
        }
        let key_width = u16::from_ne_bytes([header[6], header[7]]);
        let kind = FhtKind::from_key_width(key_width).ok_or_else(|| EngineError::Corruption {
            path: path.to_path_buf(),
            detail: format!("unsupported key width {}", key_width),
        })?;
        let entry_count = u64::from_ne_bytes(header[8..16].try_into().unwrap());
        let next_append = u64::from_ne_bytes(header[16..24].try_into().unwrap());
        let bucket_count = u64::from_ne_bytes(header[24..32].try_into().unwrap());

        Ok(FileHashTable {
            file,
            path: path.to_path_buf(),
            kind,
            bucket_count,
            entry_count,
            next_append,
        })
    }

    /// Flush the header and sync the file.
    pub fn close(mut self) -> Result<()> {
        self.write_header()?;
        self.file
            .sync_all()
            .map_err(|e| EngineError::io("sync", &self.path, e))
    }

    /// Flush the header and remove the file.
    pub fn delete(self) -> Result<()> {
        let path = self.path.clone();
        drop(self.file);
        std::fs::remove_file(&path).map_err(|e| EngineError::io("remove", &path, e))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn kind(&self) -> FhtKind {
        self.kind
    }

    pub fn entry_count(&self) -> u64 {
        self.entry_count
    }

    pub fn bucket_count(&self) -> u64 {
        self.bucket_count
    }

    fn write_header(&mut self) -> Result<()> {
        let mut header = [0u8; HEADER_SIZE as usize];
        header[0..4].copy_from_slice(&FHT_MAGIC);
        header[4..6].copy_from_slice(&FHT_VERSION.to_ne_bytes());
        header[6..8].copy_from_slice(&self.kind.key_width().to_ne_bytes());
        header[8..16].copy_from_slice(&self.entry_count.to_ne_bytes());
        header[16..24].copy_from_slice(&self.next_append.to_ne_bytes());
        header[24..32].copy_from_slice(&self.bucket_count.to_ne_bytes());
        self.file
            .seek(SeekFrom::Start(0))
            .and_then(|_| self.file.write_all(&header))
            .map_err(|e| EngineError::io("write header", &self.path, e))
    }

    fn read_u64_at(&mut self, offset: u64) -> Result<u64> {
        let mut buf = [0u8; 8];
        self.file
            .seek(SeekFrom::Start(offset))
            .and_then(|_| self.file.read_exact(&mut buf))
            .map_err(|e| EngineError::io("read", &self.path, e))?;
        Ok(u64::from_ne_bytes(buf))
    }

    fn write_u64_at(&mut self, offset: u64, value: u64) -> Result<()> {
        self.file
            .seek(SeekFrom::Start(offset))
            .and_then(|_| self.file.write_all(&value.to_ne_bytes()))
            .map_err(|e| EngineError::io("write", &self.path, e))
    }

    fn data_start(&self) -> u64 {
        HEADER_SIZE + self.bucket_count * 8
    }

    fn bucket_of(&self, key: u64) -> u64 {
        let hash = match self.kind {
            FhtKind::Direct16 => unreachable!("direct tables are not hashed"),
            FhtKind::Chain32 => fmix32(key as u32) as u64,
            FhtKind::Chain64 => fmix64(key),
        };
        hash & (self.bucket_count - 1)
    }

    fn read_entry(&mut self, offset: u64) -> Result<(u64, u64, u64)> {
        let mut buf = [0u8; 24];
        let size = self.kind.entry_size() as usize;
        self.file
            .seek(SeekFrom::Start(offset))
            .and_then(|_| self.file.read_exact(&mut buf[..size]))
            .map_err(|e| EngineError::io("read entry", &self.path, e))?;
        match self.kind {
            FhtKind::Chain32 => Ok((
                u32::from_ne_bytes(buf[0..4].try_into().unwrap()) as u64,
                u64::from_ne_bytes(buf[4..12].try_into().unwrap()),
                u64::from_ne_bytes(buf[12..20].try_into().unwrap()),
            )),
            FhtKind::Chain64 => Ok((
                u64::from_ne_bytes(buf[0..8].try_into().unwrap()),
                u64::from_ne_bytes(buf[8..16].try_into().unwrap()),
                u64::from_ne_bytes(buf[16..24].try_into().unwrap()),
            )),
            FhtKind::Direct16 => unreachable!("direct tables have no chain entries"),
        }
    }

    fn append_entry(&mut self, key: u64, value: u64, next: u64) -> Result<u64> {
        let offset = self.next_append;
        let mut buf = [0u8; 24];
        let size = self.kind.entry_size() as usize;
        match self.kind {
            FhtKind::Chain32 => {
                buf[0..4].copy_from_slice(&(key as u32).to_ne_bytes());
                buf[4..12].copy_from_slice(&value.to_ne_bytes());
                buf[12..20].copy_from_slice(&next.to_ne_bytes());
            }
            FhtKind::Chain64 => {
                buf[0..8].copy_from_slice(&key.to_ne_bytes());
                buf[8..16].copy_from_slice(&value.to_ne_bytes());
                buf[16..24].copy_from_slice(&next.to_ne_bytes());
            }
            FhtKind::Direct16 => unreachable!("direct tables have no chain entries"),
        }
        self.file
            .seek(SeekFrom::Start(offset))
            .and_then(|_| self.file.write_all(&buf[..size]))
            .map_err(|e| EngineError::io("append entry", &self.path, e))?;
        self.next_append = offset + size as u64;
        self.entry_count += 1;
        Ok(offset)
    }

    /// Value offset within a chain entry (the key precedes it).
    fn value_offset(&self) -> u64 {
        match self.kind {
            FhtKind::Chain32 => 4,
            FhtKind::Chain64 => 8,
            FhtKind::Direct16 => 0,
        }
    }

    /// Add `delta` to the counter of `key`, creating the entry if absent.
    pub fn add(&mut self, key: u64, delta: u64) -> Result<()> {
        if delta == 0 {
            return Ok(());
        }
        match self.kind {
            FhtKind::Direct16 => {
                debug_assert!(key < DIRECT_SLOTS);
                let offset = HEADER_SIZE + key * 8;
                let old = self.read_u64_at(offset)?;
                if old == 0 {
                    self.entry_count += 1;
                }
                self.write_u64_at(offset, old + delta)
            }
            FhtKind::Chain32 | FhtKind::Chain64 => {
                let bucket_off = HEADER_SIZE + self.bucket_of(key) * 8;
                let head = self.read_u64_at(bucket_off)?;
                let mut cursor = head;
                while cursor != 0 {
                    let (entry_key, value, next) = self.read_entry(cursor)?;
                    if entry_key == key {
                        return self.write_u64_at(cursor + self.value_offset(), value + delta);
                    }
                    cursor = next;
                }
                let offset = self.append_entry(key, delta, head)?;
                self.write_u64_at(bucket_off, offset)
            }
        }
    }

    /// Counter of `key`, zero when absent.
    pub fn get(&mut self, key: u64) -> Result<u64> {
        match self.kind {
            FhtKind::Direct16 => {
                debug_assert!(key < DIRECT_SLOTS);
                self.read_u64_at(HEADER_SIZE + key * 8)
            }
            FhtKind::Chain32 | FhtKind::Chain64 => {
                let mut cursor = self.read_u64_at(HEADER_SIZE + self.bucket_of(key) * 8)?;
                while cursor != 0 {
                    let (entry_key, value, next) = self.read_entry(cursor)?;
                    if entry_key == key {
                        return Ok(value);
                    }
                    cursor = next;
                }
                Ok(0)
            }
        }
    }

    /// Visit every `(key, counter)` pair, stopping at the first error.
    ///
    /// Chain entries are append-only, so a sequential walk of the entry
    /// region visits exactly the entries reachable from the bucket chains.
    pub fn for_each(&mut self, mut f: impl FnMut(u64, u64) -> Result<()>) -> Result<()> {
        match self.kind {
            FhtKind::Direct16 => {
                self.file
                    .seek(SeekFrom::Start(HEADER_SIZE))
                    .map_err(|e| EngineError::io("seek", &self.path, e))?;
                let mut buf = vec![0u8; 8192];
                let mut slot: u64 = 0;
                while slot < DIRECT_SLOTS {
                    let chunk_slots = ((DIRECT_SLOTS - slot) as usize).min(buf.len() / 8);
                    let chunk = &mut buf[..chunk_slots * 8];
                    self.file
                        .read_exact(chunk)
                        .map_err(|e| EngineError::io("read", &self.path, e))?;
                    for i in 0..chunk_slots {
                        let value = u64::from_ne_bytes(chunk[i * 8..i * 8 + 8].try_into().unwrap());
                        if value != 0 {
                            f(slot + i as u64, value)?;
                        }
                    }
                    slot += chunk_slots as u64;
                }
                Ok(())
            }
            FhtKind::Chain32 | FhtKind::Chain64 => {
                let size = self.kind.entry_size();
                let mut cursor = self.data_start();
                while cursor < self.next_append {
                    let (key, value, _next) = self.read_entry(cursor)?;
                    f(key, value)?;
                    cursor += size;
                }
                Ok(())
            }
        }
    }

    /// Merge an in-memory batch into the file.
    ///
    /// The whole file is folded into a merge hash sized for both sides,
    /// the batch is added on top, and the file is rebuilt in one pass with
    /// the same bucket count.
    pub fn bulk_add(&mut self, batch: &FxHashMap<u64, u64>) -> Result<()> {
        let mut merged: FxHashMap<u64, u64> = FxHashMap::default();
        merged.reserve(self.entry_count as usize + batch.len());
        self.for_each(|key, value| {
            merged.insert(key, value);
            Ok(())
        })?;
        for (&key, &delta) in batch {
            *merged.entry(key).or_insert(0) += delta;
        }
        self.rewrite(&merged)
    }

    /// Fold `src` into `self`, then delete `src`'s file.
    ///
    /// When both tables fit the maintenance memory budget the merge runs
    /// through one in-memory hash; otherwise `src` is streamed and `self`
    /// probed entry by entry.
    pub fn merge_from(&mut self, mut src: FileHashTable, mem_budget_bytes: u64) -> Result<()> {
        let combined = self.entry_count + src.entry_count;
        if combined * MERGE_ENTRY_OVERHEAD * 2 <= mem_budget_bytes {
            let mut merged: FxHashMap<u64, u64> = FxHashMap::default();
            merged.reserve(combined as usize);
            self.for_each(|key, value| {
                merged.insert(key, value);
                Ok(())
            })?;
            src.for_each(|key, value| {
                *merged.entry(key).or_insert(0) += value;
                Ok(())
            })?;
            self.rewrite(&merged)?;
        } else {
            src.for_each(|key, value| self.add(key, value))?;
        }
        src.delete()
    }

    /// Rewrite the whole file from `entries`, keeping the bucket count.
    fn rewrite(&mut self, entries: &FxHashMap<u64, u64>) -> Result<()> {
        match self.kind {
            FhtKind::Direct16 => {
                let mut array = vec![0u8; (DIRECT_SLOTS * 8) as usize];
                let mut count = 0u64;
                for (&key, &value) in entries {
                    debug_assert!(key < DIRECT_SLOTS);
                    if value != 0 {
                        count += 1;
                        array[(key * 8) as usize..(key * 8 + 8) as usize]
                            .copy_from_slice(&value.to_ne_bytes());
                    }
                }
                self.file
                    .seek(SeekFrom::Start(HEADER_SIZE))
                    .and_then(|_| self.file.write_all(&array))
                    .map_err(|e| EngineError::io("rewrite", &self.path, e))?;
                self.entry_count = count;
                self.next_append = HEADER_SIZE + DIRECT_SLOTS * 8;
                self.write_header()
            }
            FhtKind::Chain32 | FhtKind::Chain64 => {
                let size = self.kind.entry_size();
                let mut directory = vec![0u64; self.bucket_count as usize];
                let mut body: Vec<u8> = Vec::with_capacity(entries.len() * size as usize);
                let mut offset = self.data_start();
                for (&key, &value) in entries {
                    let bucket = self.bucket_of(key) as usize;
                    let next = directory[bucket];
                    directory[bucket] = offset;
                    match self.kind {
                        FhtKind::Chain32 => {
                            body.extend_from_slice(&(key as u32).to_ne_bytes());
                        }
                        FhtKind::Chain64 => {
                            body.extend_from_slice(&key.to_ne_bytes());
                        }
                        FhtKind::Direct16 => unreachable!(),
                    }
                    body.extend_from_slice(&value.to_ne_bytes());
                    body.extend_from_slice(&next.to_ne_bytes());
                    offset += size;
                }

                let mut dir_bytes: Vec<u8> = Vec::with_capacity(directory.len() * 8);
                for slot in &directory {
                    dir_bytes.extend_from_slice(&slot.to_ne_bytes());
                }

                self.file
                    .set_len(HEADER_SIZE)
                    .and_then(|_| self.file.seek(SeekFrom::Start(HEADER_SIZE)))
                    .and_then(|_| self.file.write_all(&dir_bytes))
                    .and_then(|_| self.file.write_all(&body))
                    .map_err(|e| EngineError::io("rewrite", &self.path, e))?;
                self.entry_count = entries.len() as u64;
                self.next_append = offset;
                self.write_header()
            }
        }
    }
}
