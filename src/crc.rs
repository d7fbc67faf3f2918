/// CRC-16/CCITT as used by the WD179x for ID and data fields:
/// polynomial 0x1021, preset 0xFFFF, MSB first, no final xor.
const CRC_POLY: u16 = 0x1021;
const CRC_PRESET: u16 = 0xFFFF;

/// Checksum `count` bytes of `data`, taking one byte every `stride` positions.
/// A stride of 2 reads the doubled single-density encoding of DMK images.
/// Bytes past the end of `data` are not included.
pub fn crc16(data: &[u8], count: usize, stride: usize) -> u16 {
    let stride = stride.max(1);
    data.iter()
        .step_by(stride)
        .take(count)
        .fold(CRC_PRESET, |crc, &byte| crc16_update(crc, byte))
}

pub fn crc16_update(crc: u16, byte: u8) -> u16 {
    let mut crc = crc ^ ((byte as u16) << 8);
    for _ in 0..8 {
        crc = if crc & 0x8000 != 0 {
            (crc << 1) ^ CRC_POLY
        } else {
            crc << 1
        };
    }
    crc
}
