use std::fs::{File, OpenOptions};
use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use log::{info, warn};
use thiserror::Error;

use crate::dmk::{Density, DmkHeader, DMK_HEADER_LEN, IDAM_TABLE_LEN, MAX_TRACK_LEN};

#[derive(Debug, Error)]
pub enum DiskError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    #[error("disk header is {0} bytes long, expected 16")]
    ShortHeader(usize),
    #[error("track length {0:#06x} leaves no room for track data")]
    BadTrackLength(u16),
    #[error("there is no drive {0}")]
    BadDrive(usize),
    #[error("disk is write protected")]
    WriteProtected,
}

/// Storage behind a mounted image.
pub trait BlockFile: Read + Write + Seek + Send {
    fn set_len(&mut self, len: u64) -> io::Result<()>;
}

impl BlockFile for File {
    fn set_len(&mut self, len: u64) -> io::Result<()> {
        File::set_len(self, len)
    }
}

impl BlockFile for Cursor<Vec<u8>> {
    fn set_len(&mut self, len: u64) -> io::Result<()> {
        self.get_mut().resize(len as usize, 0);
        Ok(())
    }
}

pub struct DiskImage {
    file: Box<dyn BlockFile>,
    pub name: String,
    pub path: Option<PathBuf>,
    pub header: DmkHeader,
    read_only: bool,
    record_len: u64,
    pub faulted: bool,
}

impl DiskImage {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<DiskImage, DiskError> {
        let path = path.as_ref();

        // Try opening writable, then read only
        let (file, read_only) = match OpenOptions::new().read(true).write(true).open(path) {
            Ok(file) => (file, false),
            Err(_) => (OpenOptions::new().read(true).open(path)?, true),
        };

        let mut image = DiskImage::from_file(Box::new(file), &path.display().to_string(), read_only)?;
        image.path = Some(path.to_path_buf());
        Ok(image)
    }

    pub fn from_file(mut file: Box<dyn BlockFile>, name: &str, read_only: bool) -> Result<DiskImage, DiskError> {
        let mut raw = Vec::with_capacity(DMK_HEADER_LEN);
        file.seek(SeekFrom::Start(0))?;
        (&mut *file).take(DMK_HEADER_LEN as u64).read_to_end(&mut raw)?;
        let header = DmkHeader::parse(&raw)?;

        if header.track_len as usize > MAX_TRACK_LEN {
            warn!(
                "{}: track length {:#06x} is beyond the IDAM offset range, using {:#06x}",
                name, header.track_len, MAX_TRACK_LEN
            );
        }

        Ok(DiskImage {
            file,
            name: name.to_owned(),
            path: None,
            record_len: header.track_len as u64,
            header,
            read_only,
            faulted: false,
        })
    }

    pub fn tracks(&self) -> u8 {
        self.header.tracks
    }

    pub fn sides(&self) -> u8 {
        self.header.sides
    }

    pub fn density(&self) -> Density {
        self.header.density
    }

    /// Usable bytes per track record, IDAM table included.
    pub fn track_len(&self) -> usize {
        (self.record_len as usize).min(MAX_TRACK_LEN)
    }

    pub fn is_write_protected(&self) -> bool {
        self.read_only || self.header.write_protected
    }

    fn record_offset(&self, side: u8, track: u8) -> u64 {
        let index = track as u64 * self.header.sides as u64 + side as u64;
        DMK_HEADER_LEN as u64 + index * self.record_len
    }

    fn contains(&self, side: u8, track: u8) -> bool {
        track < self.header.tracks && side < self.header.sides
    }

    /// Record a storage failure; the drive reads as not ready afterwards.
    fn check<T>(&mut self, result: Result<T, DiskError>) -> Result<T, DiskError> {
        if result.is_err() {
            self.faulted = true;
        }
        result
    }

    /// Raw track record. Tracks outside the recorded geometry, and the part
    /// of a record past the end of a short file, read as zeros.
    pub fn read_track(&mut self, side: u8, track: u8) -> Result<Vec<u8>, DiskError> {
        let len = self.track_len();
        if !self.contains(side, track) {
            return Ok(vec![0; len]);
        }
        let offset = self.record_offset(side, track);
        let result = self.read_at(offset, len);
        self.check(result)
    }

    pub fn write_track(&mut self, side: u8, track: u8, data: &[u8]) -> Result<(), DiskError> {
        self.write_range(side, track, 0, data)
    }

    /// Persist `data` at `start` inside a track record, growing the image
    /// geometry first when the record lies beyond it.
    pub fn write_range(&mut self, side: u8, track: u8, start: usize, data: &[u8]) -> Result<(), DiskError> {
        if self.is_write_protected() {
            return Err(DiskError::WriteProtected);
        }
        let end = (start + data.len()).min(self.track_len());
        if start >= end {
            return Ok(());
        }
        let result = self
            .grow_to(side, track)
            .and_then(|_| self.write_at(self.record_offset(side, track) + start as u64, &data[..end - start]));
        self.check(result)
    }

    fn read_at(&mut self, offset: u64, len: usize) -> Result<Vec<u8>, DiskError> {
        let mut data = Vec::with_capacity(len);
        self.file.seek(SeekFrom::Start(offset))?;
        (&mut *self.file).take(len as u64).read_to_end(&mut data)?;
        data.resize(len, 0);
        Ok(data)
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<(), DiskError> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(data)?;
        self.file.flush()?;
        Ok(())
    }

    fn grow_to(&mut self, side: u8, track: u8) -> Result<(), DiskError> {
        if self.contains(side, track) {
            return Ok(());
        }
        let tracks = self.header.tracks.max(track.saturating_add(1));
        let sides = self.header.sides.max(side + 1).min(2);
        info!(
            "{}: geometry grows from {} tracks/{} sides to {} tracks/{} sides",
            self.name, self.header.tracks, self.header.sides, tracks, sides
        );

        if sides != self.header.sides {
            // Records are interleaved by side, so existing tracks move
            let mut records = Vec::with_capacity(self.header.tracks as usize);
            for t in 0..self.header.tracks {
                records.push(self.read_at(self.record_offset(0, t), self.record_len as usize)?);
            }
            self.header.sides = sides;
            let blank = vec![0u8; self.record_len as usize];
            for (t, record) in records.iter().enumerate() {
                self.file.seek(SeekFrom::Start(self.record_offset(0, t as u8)))?;
                self.file.write_all(record)?;
                self.file.write_all(&blank)?;
            }
        }

        self.header.tracks = tracks;
        self.header.sides = sides;
        let end = self.record_offset(0, tracks);
        self.file.set_len(end)?;
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(&self.header.to_bytes())?;
        self.file.flush()?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), DiskError> {
        let result = self.file.flush().map_err(DiskError::from);
        self.check(result)
    }

    pub fn info(&self) -> String {
        format!(
            "{} ({} tracks, {} {}, {} density, track length {:#06x}{})",
            self.name,
            self.header.tracks,
            self.header.sides,
            if self.header.sides == 1 { "side" } else { "sides" },
            match self.header.density {
                Density::Single => "single",
                Density::Double => "double",
            },
            self.header.track_len,
            if self.is_write_protected() { ", write protected" } else { "" }
        )
    }
}

/// Write a blank image: header plus zeroed track records.
pub fn create_blank<P: AsRef<Path>>(
    path: P,
    tracks: u8,
    sides: u8,
    density: Density,
    track_len: u16,
) -> Result<(), DiskError> {
    if track_len as usize <= IDAM_TABLE_LEN {
        return Err(DiskError::BadTrackLength(track_len));
    }
    let header = DmkHeader::new(tracks, sides, density, track_len);
    let mut file = OpenOptions::new()
        .create(true)
        .truncate(true)
        .read(true)
        .write(true)
        .open(path)?;
    file.write_all(&header.to_bytes())?;
    file.set_len(header.track_offset(0, tracks))?;
    file.flush()?;
    Ok(())
}
