/// Wear-levelled registry journal on raw NOR flash.
///
/// Saves are appended as records to a ring of erase sectors instead of
/// rewriting one sector in place. A sector is erased only when the write
/// position moves onto it, so the sectors wear evenly and slowly, and the
/// sector being erased never holds the newest record.
///
/// Record layout (integers little-endian, records never span sectors):
///
/// ```text
/// [ 'K' 'J' ] [ len u16 ] [ seq u32 ] [ blob, padded ] [ sum u32 ] [ !sum u32 ]
/// ```
///
/// The check pair is written last. A record cut short by power loss never
/// validates, so the previous record stays the newest one.
use embedded_storage::nor_flash::{NorFlash, NorFlashError, NorFlashErrorKind, ReadNorFlash};
use thiserror::Error;

use crate::storage::KeyStore;

pub const RECORD_MAGIC: [u8; 2] = *b"KJ";

const HEADER_LEN: u32 = 8;
const TRAILER_LEN: u32 = 8;

/// Bytes a record adds around its blob, before padding.
pub const RECORD_OVERHEAD: usize = (HEADER_LEN + TRAILER_LEN) as usize;

/// Largest flash read/write granularity supported.
pub const MAX_ALIGN: usize = 8;

const CHUNK_LEN: usize = 64;

const FNV_OFFSET: u32 = 0x811C_9DC5;
const FNV_PRIME: u32 = 0x0100_0193;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum JournalError {
    #[error("flash access failed: {0:?}")]
    Flash(NorFlashErrorKind),
    #[error("a {0}-byte blob does not fit one flash sector")]
    TooLarge(usize),
    #[error("journal region does not match the flash geometry")]
    Geometry,
}

fn flash_err<E: NorFlashError>(e: E) -> JournalError {
    JournalError::Flash(e.kind())
}

fn fnv1a(mut hash: u32, bytes: &[u8]) -> u32 {
    for &b in bytes {
        hash ^= u32::from(b);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// `a` was written after `b`, allowing for sequence wrap-around.
fn seq_after(a: u32, b: u32) -> bool {
    (a.wrapping_sub(b) as i32) > 0
}

/// Location of one intact record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Record {
    sector: u32,
    offset: u32,
    len: u16,
    seq: u32,
}

/// Where the next record goes. An offset at the sector end means the sector
/// takes no more records and the next save moves on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Head {
    sector: u32,
    offset: u32,
}

pub struct FlashJournal<F> {
    flash: F,
    base: u32,
    sectors: u32,
    mounted: bool,
    head: Head,
    newest: Option<Record>,
}

impl<F: NorFlash> FlashJournal<F> {
    /// Journal over `sectors` erase sectors starting at `base`.
    pub fn new(flash: F, base: u32, sectors: u32) -> Result<Self, JournalError> {
        let align = Self::align();
        let size = Self::sector_size();
        let end = sectors
            .checked_mul(size)
            .and_then(|len| base.checked_add(len));
        let fits = end.is_some_and(|end| end as usize <= flash.capacity());
        if sectors < 2 || align > MAX_ALIGN || MAX_ALIGN % align != 0 || base % size != 0 || !fits
        {
            return Err(JournalError::Geometry);
        }

        Ok(Self {
            flash,
            base,
            sectors,
            mounted: false,
            head: Head {
                sector: 0,
                offset: 0,
            },
            newest: None,
        })
    }

    fn align() -> usize {
        F::READ_SIZE.max(F::WRITE_SIZE)
    }

    fn sector_size() -> u32 {
        F::ERASE_SIZE as u32
    }

    fn padded(len: usize) -> u32 {
        let align = Self::align();
        (len.div_ceil(align) * align) as u32
    }

    fn record_len(len: usize) -> u32 {
        HEADER_LEN + Self::padded(len) + TRAILER_LEN
    }

    fn addr(&self, sector: u32, offset: u32) -> u32 {
        self.base + sector * Self::sector_size() + offset
    }

    /// Locate the newest record and the append position. Runs on first use.
    fn mount(&mut self) -> Result<(), JournalError> {
        if self.mounted {
            return Ok(());
        }

        let mut newest: Option<Record> = None;
        let mut newest_tail = None;
        for sector in 0..self.sectors {
            let (last, tail) = self.scan_sector(sector)?;
            if let Some(rec) = last {
                if newest.is_none_or(|n| seq_after(rec.seq, n.seq)) {
                    newest = Some(rec);
                    newest_tail = tail;
                }
            }
        }

        self.head = match newest {
            Some(rec) => Head {
                sector: rec.sector,
                offset: newest_tail.unwrap_or(Self::sector_size()),
            },
            // First save erases sector 0
            None => Head {
                sector: self.sectors - 1,
                offset: Self::sector_size(),
            },
        };
        self.newest = newest;
        self.mounted = true;

        match newest {
            Some(rec) => log::debug!(
                "Journal mounted: record {} in sector {} ({} bytes)",
                rec.seq,
                rec.sector,
                rec.len
            ),
            None => log::debug!("Journal mounted: empty"),
        }
        Ok(())
    }

    /// Walk the records of one sector. Returns the last intact record and
    /// the offset of the erased tail, which is `None` when the sector is
    /// full or ends in a damaged record.
    fn scan_sector(&mut self, sector: u32) -> Result<(Option<Record>, Option<u32>), JournalError> {
        let size = Self::sector_size();
        let mut offset = 0;
        let mut last = None;

        while offset + HEADER_LEN + TRAILER_LEN <= size {
            let at = self.addr(sector, offset);
            let mut header = [0u8; HEADER_LEN as usize];
            self.flash.read(at, &mut header).map_err(flash_err)?;
            if header.iter().all(|&b| b == 0xFF) {
                return Ok((last, Some(offset)));
            }

            let Some(rec) = self.check_record(sector, offset, &header)? else {
                log::warn!("Damaged journal record in sector {} at {}", sector, offset);
                return Ok((last, None));
            };
            offset += Self::record_len(usize::from(rec.len));
            last = Some(rec);
        }
        Ok((last, None))
    }

    fn check_record(
        &mut self,
        sector: u32,
        offset: u32,
        header: &[u8; HEADER_LEN as usize],
    ) -> Result<Option<Record>, JournalError> {
        if header[..2] != RECORD_MAGIC {
            return Ok(None);
        }
        let len = u16::from_le_bytes([header[2], header[3]]);
        let seq = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
        if offset + Self::record_len(usize::from(len)) > Self::sector_size() {
            return Ok(None);
        }

        let body = self.addr(sector, offset + HEADER_LEN);
        let padded = Self::padded(usize::from(len));
        let mut sum = fnv1a(FNV_OFFSET, header);
        let mut chunk = [0u8; CHUNK_LEN];
        let mut done = 0;
        while done < padded {
            let n = (padded - done).min(CHUNK_LEN as u32);
            self.flash
                .read(body + done, &mut chunk[..n as usize])
                .map_err(flash_err)?;
            let payload = u32::from(len).saturating_sub(done).min(n);
            sum = fnv1a(sum, &chunk[..payload as usize]);
            done += n;
        }

        let mut trailer = [0u8; TRAILER_LEN as usize];
        self.flash
            .read(body + padded, &mut trailer)
            .map_err(flash_err)?;
        let stored = u32::from_le_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);
        let inverse = u32::from_le_bytes([trailer[4], trailer[5], trailer[6], trailer[7]]);
        if stored != sum || inverse != !sum {
            return Ok(None);
        }

        Ok(Some(Record {
            sector,
            offset,
            len,
            seq,
        }))
    }

    fn append(&mut self, blob: &[u8]) -> Result<(), JournalError> {
        self.mount()?;

        let size = Self::sector_size();
        let record_len = Self::record_len(blob.len());
        let len = u16::try_from(blob.len()).map_err(|_| JournalError::TooLarge(blob.len()))?;
        if record_len > size {
            return Err(JournalError::TooLarge(blob.len()));
        }

        let mut at = self.head;
        if at.offset + record_len > size {
            let mut next = (at.sector + 1) % self.sectors;
            if self.newest.is_some_and(|n| n.sector == next) {
                next = (next + 1) % self.sectors;
            }
            at = Head {
                sector: next,
                offset: 0,
            };
        }

        // The sector takes no further records until this one is complete
        self.head = Head {
            sector: at.sector,
            offset: size,
        };

        if at.offset == 0 {
            let start = self.addr(at.sector, 0);
            self.flash.erase(start, start + size).map_err(flash_err)?;
            log::debug!("Journal sector {} erased", at.sector);
        }

        let seq = self.newest.map_or(1, |n| n.seq.wrapping_add(1));
        let mut header = [0u8; HEADER_LEN as usize];
        header[..2].copy_from_slice(&RECORD_MAGIC);
        header[2..4].copy_from_slice(&len.to_le_bytes());
        header[4..].copy_from_slice(&seq.to_le_bytes());

        let start = self.addr(at.sector, at.offset);
        self.flash.write(start, &header).map_err(flash_err)?;
        self.write_padded(start + HEADER_LEN, blob)?;

        let sum = fnv1a(fnv1a(FNV_OFFSET, &header), blob);
        let mut trailer = [0u8; TRAILER_LEN as usize];
        trailer[..4].copy_from_slice(&sum.to_le_bytes());
        trailer[4..].copy_from_slice(&(!sum).to_le_bytes());
        self.flash
            .write(start + HEADER_LEN + Self::padded(blob.len()), &trailer)
            .map_err(flash_err)?;

        self.newest = Some(Record {
            sector: at.sector,
            offset: at.offset,
            len,
            seq,
        });
        self.head = Head {
            sector: at.sector,
            offset: at.offset + record_len,
        };
        Ok(())
    }

    fn write_padded(&mut self, addr: u32, blob: &[u8]) -> Result<(), JournalError> {
        let align = Self::align();
        let body = blob.len() - blob.len() % align;
        if body > 0 {
            self.flash.write(addr, &blob[..body]).map_err(flash_err)?;
        }
        let tail = &blob[body..];
        if !tail.is_empty() {
            let mut pad = [0xFF; MAX_ALIGN];
            pad[..tail.len()].copy_from_slice(tail);
            self.flash
                .write(addr + body as u32, &pad[..align])
                .map_err(flash_err)?;
        }
        Ok(())
    }

    fn read_newest(&mut self, buf: &mut [u8]) -> Result<Option<usize>, JournalError> {
        self.mount()?;
        let Some(rec) = self.newest else {
            return Ok(None);
        };

        let len = usize::from(rec.len);
        let dst = buf.get_mut(..len).ok_or(JournalError::TooLarge(len))?;
        let addr = self.addr(rec.sector, rec.offset + HEADER_LEN);
        let align = Self::align();
        let body = len - len % align;
        if body > 0 {
            self.flash.read(addr, &mut dst[..body]).map_err(flash_err)?;
        }
        if body < len {
            let mut pad = [0u8; MAX_ALIGN];
            self.flash
                .read(addr + body as u32, &mut pad[..align])
                .map_err(flash_err)?;
            dst[body..].copy_from_slice(&pad[..len - body]);
        }
        Ok(Some(len))
    }
}

impl<F: NorFlash> KeyStore for FlashJournal<F> {
    type Error = JournalError;

    fn load(&mut self, buf: &mut [u8]) -> Result<Option<usize>, JournalError> {
        self.read_newest(buf)
    }

    fn save(&mut self, blob: &[u8]) -> Result<(), JournalError> {
        self.append(blob)
    }
}
