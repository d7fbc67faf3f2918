use crate::dmk::{Density, IDAM_TABLE_LEN, MARK_DATA, MARK_IDAM, WRITE_CRC, WRITE_SYNC};

/// Track record lengths used by common DMK tools for 5.25" media.
pub fn default_track_len(density: Density) -> u16 {
    match density {
        Density::Single => 0x0CC0,
        Density::Double => 0x1900,
    }
}

/// Physical order of sector ids around the track for a given skew.
pub fn sector_order(count: u8, first: u8, skew: u8) -> Vec<u8> {
    if skew == 0 || count == 0 {
        return (0..count).map(|i| first.wrapping_add(i)).collect();
    }
    let count_usize = count as usize;
    let mut order = vec![None; count_usize];
    let mut pos = 0usize;
    for i in 0..count {
        while order[pos].is_some() {
            pos = (pos + 1) % count_usize;
        }
        order[pos] = Some(first.wrapping_add(i));
        pos = (pos + skew as usize) % count_usize;
    }
    order.into_iter().flatten().collect()
}

/// A soft sectored track as a formatter would lay it down.
#[derive(Clone, Debug)]
pub struct TrackLayout {
    pub density: Density,
    pub track: u8,
    pub side: u8,
    pub size_code: u8,
    pub sectors: Vec<u8>,
    pub fill: u8,
}

impl TrackLayout {
    pub fn standard(density: Density, track: u8, side: u8, count: u8, first: u8, size_code: u8) -> TrackLayout {
        TrackLayout {
            density,
            track,
            side,
            size_code: size_code & 0x03,
            sectors: sector_order(count, first, 0),
            fill: 0xE5,
        }
    }

    pub fn with_skew(mut self, skew: u8) -> TrackLayout {
        let first = self.sectors.iter().copied().min().unwrap_or(0);
        self.sectors = sector_order(self.sectors.len() as u8, first, skew);
        self
    }

    pub fn sector_size(&self) -> usize {
        128usize << self.size_code
    }

    fn gap_byte(&self) -> u8 {
        match self.density {
            Density::Single => 0xFF,
            Density::Double => 0x4E,
        }
    }

    /// Write Track stream without the trailing gap.
    fn stream(&self) -> Vec<u8> {
        let mut stream = Vec::new();
        let mut push = |byte: u8, count: usize| stream.extend(std::iter::repeat(byte).take(count));

        match self.density {
            Density::Single => {
                push(0xFF, 16);
                for &id in &self.sectors {
                    push(0x00, 3);
                    push(MARK_IDAM, 1);
                    push(self.track, 1);
                    push(self.side, 1);
                    push(id, 1);
                    push(self.size_code, 1);
                    push(WRITE_CRC, 1);
                    push(0xFF, 11);
                    push(0x00, 6);
                    push(MARK_DATA, 1);
                    push(self.fill, self.sector_size());
                    push(WRITE_CRC, 1);
                    push(0xFF, 10);
                }
            }
            Density::Double => {
                push(0x4E, 80);
                for &id in &self.sectors {
                    push(0x00, 12);
                    push(WRITE_SYNC, 3);
                    push(MARK_IDAM, 1);
                    push(self.track, 1);
                    push(self.side, 1);
                    push(id, 1);
                    push(self.size_code, 1);
                    push(WRITE_CRC, 1);
                    push(0x4E, 22);
                    push(0x00, 12);
                    push(WRITE_SYNC, 3);
                    push(MARK_DATA, 1);
                    push(self.fill, self.sector_size());
                    push(WRITE_CRC, 1);
                    push(0x4E, 24);
                }
            }
        }
        stream
    }

    /// Whether the recorded layout (CRC pseudo bytes expanded) fits a track
    /// record of `track_len` bytes.
    pub fn fits(&self, track_len: usize) -> bool {
        let recorded = self.stream().len() + 2 * self.sectors.len();
        recorded <= track_len.saturating_sub(IDAM_TABLE_LEN)
    }

    /// Stream of exactly `len` bytes, padded with gap bytes.
    pub fn build(&self, len: usize) -> Vec<u8> {
        let mut stream = self.stream();
        stream.resize(len, self.gap_byte());
        stream
    }
}
