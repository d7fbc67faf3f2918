use crate::crc::crc16;
use crate::media::DiskError;

/*
Notes on the DMK container as seen by the controller:

Disk header (16 bytes):
    0       0xFF if the disk is write protected, 0x00 otherwise
    1       number of tracks
    2-3     track record length, little endian
    4       flags: bit4 single sided, bit6 single density,
            bit7 ignore density (treat as single density)
    5-11    reserved
    12-15   zero for virtual disks

Track record (track length bytes):
    The first 128 bytes are the IDAM pointer table, 64 little endian
    words. Bit 15 flags a double density sector, the low 14 bits are the
    offset of the sector's 0xFE byte counted from the start of the record
    (so they include the table itself). Pointers are ascending, unused
    slots are zero.

    The raw track bytes follow. Double density ID fields are preceded by
    three 0xA1 sync bytes which are part of the CRC. Single density
    fields have no sync bytes. Images without the single density flag
    store single density bytes twice; CRCs are still computed as if each
    byte had been recorded once.
*/

pub const DMK_HEADER_LEN: usize = 16;
pub const IDAM_TABLE_LEN: usize = 128;
pub const MAX_IDAMS: usize = 64;
/// IDAM pointers carry a 14 bit offset, so no usable track can be longer
pub const MAX_TRACK_LEN: usize = 0x4000;

pub const IDAM_OFFSET_MASK: u16 = 0x3FFF;
pub const IDAM_DOUBLE_DENSITY: u16 = 0x8000;

const FLAG_SINGLE_SIDED: u8 = 0x10;
const FLAG_SINGLE_DENSITY: u8 = 0x40;
const FLAG_IGNORE_DENSITY: u8 = 0x80;

pub const MARK_IDAM: u8 = 0xFE;
pub const MARK_DATA: u8 = 0xFB;
pub const MARK_USER_FA: u8 = 0xFA;
pub const MARK_USER_F9: u8 = 0xF9;
pub const MARK_DELETED: u8 = 0xF8;
pub const SYNC_A1: u8 = 0xA1;
pub const SYNC_C2: u8 = 0xC2;

// Pseudo bytes of a Write Track stream
pub const WRITE_SYNC: u8 = 0xF5;
pub const WRITE_INDEX_SYNC: u8 = 0xF6;
pub const WRITE_CRC: u8 = 0xF7;

// How far past an ID field the table builder looks for its data mark
const DAM_SEARCH_WINDOW: usize = 64;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Density {
    Single,
    Double,
}

pub fn is_data_mark(byte: u8) -> bool {
    matches!(byte, MARK_DATA | MARK_USER_FA | MARK_USER_F9 | MARK_DELETED)
}

fn is_address_mark(byte: u8) -> bool {
    byte == MARK_IDAM || is_data_mark(byte)
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct DmkHeader {
    pub write_protected: bool,
    pub tracks: u8,
    pub track_len: u16,
    pub sides: u8,
    pub density: Density,
    flags: u8,
    reserved: [u8; 11],
}

impl DmkHeader {
    pub fn new(tracks: u8, sides: u8, density: Density, track_len: u16) -> DmkHeader {
        let mut flags = 0;
        if sides < 2 {
            flags |= FLAG_SINGLE_SIDED;
        }
        if density == Density::Single {
            flags |= FLAG_SINGLE_DENSITY;
        }
        DmkHeader {
            write_protected: false,
            tracks,
            track_len,
            sides: sides.clamp(1, 2),
            density,
            flags,
            reserved: [0; 11],
        }
    }

    pub fn parse(bytes: &[u8]) -> Result<DmkHeader, DiskError> {
        if bytes.len() < DMK_HEADER_LEN {
            return Err(DiskError::ShortHeader(bytes.len()));
        }
        let track_len = u16::from_le_bytes([bytes[2], bytes[3]]);
        if track_len as usize <= IDAM_TABLE_LEN {
            return Err(DiskError::BadTrackLength(track_len));
        }
        let flags = bytes[4];
        let sides = if flags & FLAG_SINGLE_SIDED != 0 { 1 } else { 2 };
        let density = if flags & (FLAG_SINGLE_DENSITY | FLAG_IGNORE_DENSITY) != 0 {
            Density::Single
        } else {
            Density::Double
        };
        let mut reserved = [0u8; 11];
        reserved.copy_from_slice(&bytes[5..DMK_HEADER_LEN]);
        Ok(DmkHeader {
            write_protected: bytes[0] == 0xFF,
            tracks: bytes[1],
            track_len,
            sides,
            density,
            flags,
            reserved,
        })
    }

    pub fn to_bytes(&self) -> [u8; DMK_HEADER_LEN] {
        let mut bytes = [0u8; DMK_HEADER_LEN];
        bytes[0] = if self.write_protected { 0xFF } else { 0x00 };
        bytes[1] = self.tracks;
        bytes[2..4].copy_from_slice(&self.track_len.to_le_bytes());
        let mut flags = self.flags & !FLAG_SINGLE_SIDED;
        if self.sides < 2 {
            flags |= FLAG_SINGLE_SIDED;
        }
        bytes[4] = flags;
        bytes[5..].copy_from_slice(&self.reserved);
        bytes
    }

    /// Byte offset of a track record in the image file.
    pub fn track_offset(&self, side: u8, track: u8) -> u64 {
        let index = track as u64 * self.sides as u64 + side as u64;
        DMK_HEADER_LEN as u64 + index * self.track_len as u64
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct IdField {
    pub track: u8,
    pub side: u8,
    pub sector: u8,
    pub length_code: u8,
    pub crc: u16,
}

/// Where a sector's pieces live inside the track buffer, plus the outcome of
/// both CRC checks.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct SectorLayout {
    pub idam: usize,
    pub dam: usize,
    pub stride: usize,
    pub mfm: bool,
    pub size: usize,
    pub data: usize,
    pub mark: u8,
    pub id_crc_ok: bool,
    pub data_crc_ok: bool,
}

impl SectorLayout {
    /// Bytes covered by the data field CRC, counted once per recorded byte.
    fn crc_span(&self) -> usize {
        if self.mfm {
            4 + self.size
        } else {
            1 + self.size
        }
    }

    /// Range of track bytes from the data mark through the data CRC.
    pub fn field_range(&self) -> (usize, usize) {
        (self.dam, self.dam + (self.crc_span() + 2) * self.stride)
    }
}

/// The single resident track of the controller.
pub struct TrackBuffer {
    data: Vec<u8>,
    pub drive: Option<usize>,
    pub side: u8,
    pub track: u8,
    pub density: Density,
    pub dirty: bool,
    dams: Vec<(usize, Option<usize>)>,
}

impl TrackBuffer {
    pub fn new() -> TrackBuffer {
        TrackBuffer {
            data: Vec::new(),
            drive: None,
            side: 0,
            track: 0,
            density: Density::Double,
            dirty: false,
            dams: Vec::new(),
        }
    }

    pub fn matches(&self, drive: usize, side: u8, track: u8) -> bool {
        self.drive == Some(drive) && self.side == side && self.track == track
    }

    pub fn load(&mut self, drive: usize, side: u8, track: u8, density: Density, data: Vec<u8>) {
        self.data = data;
        self.drive = Some(drive);
        self.side = side;
        self.track = track;
        self.density = density;
        self.dirty = false;
        self.build_dam_table();
    }

    pub fn invalidate(&mut self) {
        self.drive = None;
        self.dirty = false;
        self.dams.clear();
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn byte(&self, offset: usize) -> u8 {
        self.data.get(offset).copied().unwrap_or(0)
    }

    /// Store a host byte, twice when the sector uses the doubled encoding.
    pub fn store(&mut self, offset: usize, stride: usize, value: u8) {
        for i in 0..stride.max(1) {
            if let Some(b) = self.data.get_mut(offset + i) {
                *b = value;
            }
        }
        self.dirty = true;
    }

    pub fn idam_entry(&self, slot: usize) -> u16 {
        if slot >= MAX_IDAMS || self.data.len() < IDAM_TABLE_LEN {
            return 0;
        }
        u16::from_le_bytes([self.data[slot * 2], self.data[slot * 2 + 1]])
    }

    /// Offset of the 0xFE byte for a table slot, if the slot is in use.
    pub fn idam_offset(&self, slot: usize) -> Option<usize> {
        let offset = (self.idam_entry(slot) & IDAM_OFFSET_MASK) as usize;
        if offset < IDAM_TABLE_LEN || offset >= self.data.len() {
            None
        } else {
            Some(offset)
        }
    }

    pub fn idam_offsets(&self) -> Vec<usize> {
        (0..MAX_IDAMS).filter_map(|slot| self.idam_offset(slot)).collect()
    }

    /// 2 when the ID field is stored with every byte doubled.
    pub fn stride_at(&self, idam: usize) -> usize {
        if self.byte(idam) == MARK_IDAM && self.byte(idam + 1) == MARK_IDAM {
            2
        } else {
            1
        }
    }

    fn preceded_by_sync(&self, offset: usize) -> bool {
        offset >= 3 && self.data[offset - 3..offset].iter().all(|&b| b == SYNC_A1)
    }

    /// Double density field: single byte encoding on an MFM disk with the
    /// A1 sync run in front of the ID mark.
    fn is_mfm(&self, idam: usize, stride: usize) -> bool {
        stride == 1 && self.density == Density::Double && self.preceded_by_sync(idam)
    }

    pub fn id_field(&self, idam: usize) -> Option<IdField> {
        let stride = self.stride_at(idam);
        if idam + 6 * stride >= self.data.len() || self.data[idam] != MARK_IDAM {
            return None;
        }
        let at = |n: usize| self.data[idam + n * stride];
        Some(IdField {
            track: at(1),
            side: at(2),
            sector: at(3),
            length_code: at(4),
            crc: ((at(5) as u16) << 8) | at(6) as u16,
        })
    }

    pub fn id_crc_ok(&self, idam: usize) -> bool {
        let Some(id) = self.id_field(idam) else {
            return false;
        };
        let stride = self.stride_at(idam);
        let crc = if self.is_mfm(idam, stride) {
            crc16(&self.data[idam - 3..], 8, 1)
        } else {
            crc16(&self.data[idam..], 5, stride)
        };
        crc == id.crc
    }

    pub fn locate_idam(&self, side: u8, track: u8, sector: u8) -> Option<usize> {
        (0..MAX_IDAMS)
            .filter_map(|slot| self.idam_offset(slot))
            .find(|&idam| match self.id_field(idam) {
                Some(id) => id.track == track && id.side == side && id.sector == sector,
                None => false,
            })
    }

    pub fn locate_dam(&self, idam: usize, stride: usize) -> Option<usize> {
        self.search_dam(idam, stride, self.data.len())
    }

    fn search_dam(&self, idam: usize, stride: usize, limit: usize) -> Option<usize> {
        let stride = stride.max(1);
        let end = limit.min(self.data.len());
        let mut pos = idam + 7 * stride;
        if self.is_mfm(idam, stride) {
            while pos + 3 < end {
                if self.data[pos..pos + 3].iter().all(|&b| b == SYNC_A1) && is_data_mark(self.data[pos + 3]) {
                    return Some(pos);
                }
                pos += 1;
            }
        } else {
            while pos < end {
                if is_data_mark(self.data[pos]) {
                    return Some(pos);
                }
                pos += stride;
            }
        }
        None
    }

    /// DAM offset for an IDAM, taken from the table built at load time.
    pub fn dam_for(&self, idam: usize) -> Option<usize> {
        match self.dams.iter().find(|(i, _)| *i == idam) {
            Some((_, dam)) => *dam,
            None => self.locate_dam(idam, self.stride_at(idam)),
        }
    }

    fn build_dam_table(&mut self) {
        self.dams = self
            .idam_offsets()
            .into_iter()
            .map(|idam| (idam, self.locate_dam(idam, self.stride_at(idam))))
            .collect();
    }

    pub fn sector_layout(&self, idam: usize, ibm: bool) -> Option<SectorLayout> {
        let id = self.id_field(idam)?;
        let stride = self.stride_at(idam);
        let mfm = self.is_mfm(idam, stride);
        let dam = self.dam_for(idam)?;
        let (mark_pos, data) = if mfm { (dam + 3, dam + 4) } else { (dam, dam + stride) };
        let size = if ibm { 128usize << (id.length_code & 0x03) } else { 16 };
        if data + size * stride > self.data.len() {
            return None;
        }
        let mut layout = SectorLayout {
            idam,
            dam,
            stride,
            mfm,
            size,
            data,
            mark: self.data[mark_pos],
            id_crc_ok: self.id_crc_ok(idam),
            data_crc_ok: false,
        };
        let span = layout.crc_span();
        let crc_pos = dam + span * stride;
        if crc_pos + stride < self.data.len() {
            let stored = ((self.data[crc_pos] as u16) << 8) | self.data[crc_pos + stride] as u16;
            layout.data_crc_ok = crc16(&self.data[dam..], span, stride) == stored;
        }
        Some(layout)
    }

    /// Patch the data mark of a freshly written sector and regenerate its
    /// data CRC. Returns the byte range that has to be persisted.
    pub fn commit_sector(&mut self, layout: &SectorLayout, mark: u8) -> (usize, usize) {
        let stride = layout.stride;
        if layout.mfm {
            // first non sync byte of the A1 A1 A1 xx sequence
            if let Some(pos) = (layout.dam..layout.dam + 4).find(|&p| self.data[p] != SYNC_A1) {
                self.data[pos] = mark;
            }
        } else {
            self.store(layout.dam, stride, mark);
        }
        let span = layout.crc_span();
        let crc = crc16(&self.data[layout.dam..], span, stride);
        let crc_pos = layout.dam + span * stride;
        self.store(crc_pos, stride, (crc >> 8) as u8);
        self.store(crc_pos + stride, stride, crc as u8);
        self.dirty = true;
        let (start, end) = layout.field_range();
        (start, end.min(self.data.len()))
    }

    /// Zero the track payload ahead of a Write Track stream.
    pub fn begin_raw_write(&mut self) {
        if self.data.len() > IDAM_TABLE_LEN {
            self.data[IDAM_TABLE_LEN..].fill(0);
        }
        self.dirty = true;
    }

    /// Turn a raw Write Track stream into recorded track bytes: expand the
    /// F5/F6/F7 pseudo bytes, then rebuild the IDAM and DAM tables.
    pub fn finalize_written_track(&mut self) {
        self.expand_write_sentinels();
        self.build_idam_table();
        self.build_dam_table();
        self.dirty = true;
    }

    fn expand_write_sentinels(&mut self) {
        if self.data.len() <= IDAM_TABLE_LEN {
            return;
        }
        let source = self.data[IDAM_TABLE_LEN..].to_vec();
        let end = self.data.len();
        let mut dst = IDAM_TABLE_LEN;
        let mut crc_start = IDAM_TABLE_LEN;
        let mut field_open = false;
        let mut previous = 0u8;

        for &byte in &source {
            if dst >= end {
                break;
            }
            match byte {
                WRITE_SYNC => {
                    if previous != WRITE_SYNC {
                        crc_start = dst;
                    }
                    field_open = true;
                    self.data[dst] = SYNC_A1;
                    dst += 1;
                }
                WRITE_INDEX_SYNC => {
                    self.data[dst] = SYNC_C2;
                    dst += 1;
                }
                WRITE_CRC => {
                    let crc = crc16(&self.data[crc_start..dst], dst - crc_start, 1);
                    self.data[dst] = (crc >> 8) as u8;
                    if dst + 1 < end {
                        self.data[dst + 1] = crc as u8;
                    }
                    dst += 2;
                    field_open = false;
                }
                _ => {
                    // single density: the mark itself opens the CRC window
                    if !field_open && is_address_mark(byte) {
                        crc_start = dst;
                        field_open = true;
                    }
                    self.data[dst] = byte;
                    dst += 1;
                }
            }
            previous = byte;
        }
    }

    fn build_idam_table(&mut self) {
        self.data[..IDAM_TABLE_LEN].fill(0);
        let end = self.data.len();
        let mut pos = IDAM_TABLE_LEN;
        let mut slot = 0;

        while pos < end && slot < MAX_IDAMS {
            let mfm_idam = pos + 3 < end
                && self.data[pos..pos + 3].iter().all(|&b| b == SYNC_A1)
                && self.data[pos + 3] == MARK_IDAM;
            let idam = if mfm_idam {
                pos + 3
            } else if self.data[pos] == MARK_IDAM {
                pos
            } else {
                pos += 1;
                continue;
            };

            let mut entry = idam as u16 & IDAM_OFFSET_MASK;
            if mfm_idam {
                entry |= IDAM_DOUBLE_DENSITY;
            }
            self.data[slot * 2..slot * 2 + 2].copy_from_slice(&entry.to_le_bytes());
            slot += 1;
            pos = self.skip_sector(idam);
        }
    }

    /// First offset past a sector's ID field and, when present, its data field.
    fn skip_sector(&self, idam: usize) -> usize {
        let stride = self.stride_at(idam);
        let after_id = idam + 7 * stride;
        let Some(id) = self.id_field(idam) else {
            return after_id;
        };
        let limit = after_id + DAM_SEARCH_WINDOW * stride;
        let Some(dam) = self.search_dam(idam, stride, limit) else {
            return after_id;
        };
        let size = 128usize << (id.length_code & 0x03);
        let span = if self.is_mfm(idam, stride) { 4 + size } else { 1 + size };
        let end = (dam + (span + 2) * stride).min(self.data.len());
        // a length code larger than the recorded data must not hide the next ID
        (after_id..end).find(|&pos| self.starts_id_field(pos)).unwrap_or(end)
    }

    /// A sync run with an ID mark, or a bare ID mark whose CRC holds.
    fn starts_id_field(&self, pos: usize) -> bool {
        if pos + 3 < self.data.len()
            && self.data[pos..pos + 3].iter().all(|&b| b == SYNC_A1)
            && self.data[pos + 3] == MARK_IDAM
        {
            return true;
        }
        self.data[pos] == MARK_IDAM && self.id_crc_ok(pos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::TrackLayout;

    fn formatted(layout: &TrackLayout, track_len: usize) -> TrackBuffer {
        let mut buffer = TrackBuffer::new();
        let mut data = vec![0u8; track_len];
        let stream = layout.build(track_len - IDAM_TABLE_LEN);
        data[IDAM_TABLE_LEN..].copy_from_slice(&stream);
        buffer.load(0, layout.side, layout.track, layout.density, data);
        buffer.finalize_written_track();
        buffer
    }

    #[test]
    fn header_round_trip() {
        let raw = [0x00, 35, 0xC0, 0x0C, 0x50, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0];
        let header = DmkHeader::parse(&raw).unwrap();
        assert!(!header.write_protected);
        assert_eq!(header.tracks, 35);
        assert_eq!(header.track_len, 0x0CC0);
        assert_eq!(header.sides, 1);
        assert_eq!(header.density, Density::Single);
        assert_eq!(header.to_bytes(), raw);
        assert_eq!(header.track_offset(0, 2), 16 + 2 * 0x0CC0);
    }

    #[test]
    fn header_ignore_density_flag() {
        let raw = [0xFF, 40, 0x00, 0x19, 0x80, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0];
        let header = DmkHeader::parse(&raw).unwrap();
        assert!(header.write_protected);
        assert_eq!(header.sides, 2);
        assert_eq!(header.density, Density::Single);
    }

    #[test]
    fn header_rejects_short_input() {
        assert!(matches!(DmkHeader::parse(&[0u8; 8]), Err(DiskError::ShortHeader(8))));
        let raw = [0x00, 35, 0x40, 0x00, 0x00, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0];
        assert!(matches!(DmkHeader::parse(&raw), Err(DiskError::BadTrackLength(0x40))));
    }

    #[test]
    fn double_density_track_is_indexed() {
        let layout = TrackLayout::standard(Density::Double, 5, 0, 10, 1, 1);
        let buffer = formatted(&layout, 0x1900);
        let offsets = buffer.idam_offsets();
        assert_eq!(offsets.len(), 10);
        assert!(offsets.windows(2).all(|w| w[0] < w[1]));
        for slot in 0..10 {
            let entry = buffer.idam_entry(slot);
            assert_ne!(entry & IDAM_DOUBLE_DENSITY, 0);
            let idam = (entry & IDAM_OFFSET_MASK) as usize;
            assert_eq!(&buffer.bytes()[idam - 3..=idam], &[0xA1, 0xA1, 0xA1, 0xFE]);
            assert!(buffer.id_crc_ok(idam));
        }
        assert_eq!(buffer.idam_entry(10), 0);
    }

    #[test]
    fn overstated_length_code_keeps_the_next_id() {
        let layout = TrackLayout::standard(Density::Double, 0, 0, 3, 1, 1);
        let mut stream = layout.build(0x1900 - IDAM_TABLE_LEN);
        // first ID claims 1024 byte sectors, only 256 are recorded
        assert_eq!(&stream[92..96], &[WRITE_SYNC, WRITE_SYNC, WRITE_SYNC, MARK_IDAM]);
        stream[99] = 3;

        let mut data = vec![0u8; 0x1900];
        data[IDAM_TABLE_LEN..].copy_from_slice(&stream);
        let mut buffer = TrackBuffer::new();
        buffer.load(0, 0, 0, Density::Double, data);
        buffer.finalize_written_track();

        let offsets = buffer.idam_offsets();
        let sectors: Vec<u8> = offsets
            .iter()
            .filter_map(|&idam| buffer.id_field(idam))
            .map(|id| id.sector)
            .collect();
        assert_eq!(sectors, vec![1, 2, 3]);
        assert!(offsets.iter().all(|&idam| buffer.id_crc_ok(idam)));
    }

    #[test]
    fn double_density_sector_layout() {
        let mut layout = TrackLayout::standard(Density::Double, 2, 0, 10, 1, 1);
        layout.fill = 0x5A;
        let buffer = formatted(&layout, 0x1900);
        let idam = buffer.locate_idam(0, 2, 7).unwrap();
        let sector = buffer.sector_layout(idam, true).unwrap();
        assert!(sector.mfm);
        assert_eq!(sector.size, 256);
        assert_eq!(sector.mark, MARK_DATA);
        assert!(sector.id_crc_ok);
        assert!(sector.data_crc_ok);
        assert_eq!(sector.data, sector.dam + 4);
        assert!(buffer.bytes()[sector.data..sector.data + 256].iter().all(|&b| b == 0x5A));
    }

    #[test]
    fn single_density_track_is_indexed() {
        let layout = TrackLayout::standard(Density::Single, 0, 0, 10, 0, 1);
        let buffer = formatted(&layout, 0x0CC0);
        assert_eq!(buffer.idam_offsets().len(), 10);
        for sector in 0..10 {
            let idam = buffer.locate_idam(0, 0, sector).unwrap();
            assert_eq!(buffer.idam_entry(0) & IDAM_DOUBLE_DENSITY, 0);
            let layout = buffer.sector_layout(idam, true).unwrap();
            assert!(!layout.mfm);
            assert_eq!(layout.data, layout.dam + 1);
            assert!(layout.id_crc_ok && layout.data_crc_ok);
        }
    }

    #[test]
    fn single_density_payload_marks_do_not_create_idams() {
        let mut layout = TrackLayout::standard(Density::Single, 0, 0, 4, 0, 0);
        layout.fill = MARK_IDAM;
        let buffer = formatted(&layout, 0x0CC0);
        assert_eq!(buffer.idam_offsets().len(), 4);
    }

    #[test]
    fn missing_sector_and_wrong_track_are_not_found() {
        let layout = TrackLayout::standard(Density::Double, 3, 0, 10, 1, 1);
        let buffer = formatted(&layout, 0x1900);
        assert!(buffer.locate_idam(0, 3, 11).is_none());
        assert!(buffer.locate_idam(0, 4, 1).is_none());
        assert!(buffer.locate_idam(1, 3, 1).is_none());
    }

    #[test]
    fn doubled_single_density_sector() {
        // Hand build a doubled SD sector: FE 00 00 01 00 crc | FB data crc
        let mut data = vec![0u8; 1024];
        let mut field = vec![0xFE, 0x00, 0x00, 0x01, 0x00];
        let crc = crc16(&field, 5, 1);
        field.extend([(crc >> 8) as u8, crc as u8]);
        let mut pos = 0x100;
        for &b in &field {
            data[pos] = b;
            data[pos + 1] = b;
            pos += 2;
        }
        pos += 12;
        let dam = pos;
        let mut sector = vec![0xFB];
        sector.extend((0..128).map(|i| i as u8));
        let crc = crc16(&sector, sector.len(), 1);
        sector.extend([(crc >> 8) as u8, crc as u8]);
        for &b in &sector {
            data[pos] = b;
            data[pos + 1] = b;
            pos += 2;
        }
        data[0..2].copy_from_slice(&0x0100u16.to_le_bytes());

        let mut buffer = TrackBuffer::new();
        buffer.load(1, 0, 0, Density::Double, data);
        let idam = buffer.locate_idam(0, 0, 1).unwrap();
        assert_eq!(idam, 0x100);
        assert_eq!(buffer.stride_at(idam), 2);
        assert_eq!(buffer.locate_dam(idam, 2), Some(dam));
        let layout = buffer.sector_layout(idam, true).unwrap();
        assert_eq!(layout.stride, 2);
        assert_eq!(layout.size, 128);
        assert_eq!(layout.data, dam + 2);
        assert!(layout.id_crc_ok && layout.data_crc_ok);
        assert_eq!(buffer.byte(layout.data + 2 * 5), 5);
    }

    #[test]
    fn commit_sector_regenerates_crc_and_mark() {
        let layout = TrackLayout::standard(Density::Double, 1, 0, 8, 1, 1);
        let mut buffer = formatted(&layout, 0x1900);
        let idam = buffer.locate_idam(0, 1, 4).unwrap();
        let sector = buffer.sector_layout(idam, true).unwrap();
        for i in 0..sector.size {
            buffer.store(sector.data + i, 1, i as u8);
        }
        assert!(!buffer.sector_layout(idam, true).unwrap().data_crc_ok);

        let (start, end) = buffer.commit_sector(&sector, MARK_DELETED);
        assert_eq!(start, sector.dam);
        assert_eq!(end, sector.dam + 4 + 256 + 2);
        let after = buffer.sector_layout(idam, true).unwrap();
        assert_eq!(after.mark, MARK_DELETED);
        assert!(after.data_crc_ok);
    }

    #[test]
    fn crc_sentinel_shifts_following_bytes() {
        let mut data = vec![0u8; 256];
        let stream = [0x4E, 0xF5, 0xF5, 0xF5, 0xFE, 0x07, 0x00, 0x03, 0x01, 0xF7, 0x4E, 0x4E];
        data[IDAM_TABLE_LEN..IDAM_TABLE_LEN + stream.len()].copy_from_slice(&stream);
        let mut buffer = TrackBuffer::new();
        buffer.load(0, 0, 7, Density::Double, data);
        buffer.finalize_written_track();
        let bytes = buffer.bytes();
        let crc = crc16(&[0xA1, 0xA1, 0xA1, 0xFE, 0x07, 0x00, 0x03, 0x01], 8, 1);
        assert_eq!(&bytes[129..137], &[0xA1, 0xA1, 0xA1, 0xFE, 0x07, 0x00, 0x03, 0x01]);
        assert_eq!(bytes[137], (crc >> 8) as u8);
        assert_eq!(bytes[138], crc as u8);
        assert_eq!(&bytes[139..141], &[0x4E, 0x4E]);
        assert_eq!(buffer.idam_entry(0), 132 | IDAM_DOUBLE_DENSITY);
        assert!(buffer.id_crc_ok(132));
    }
}
