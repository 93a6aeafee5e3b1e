/// Number of 10-bit channels in one sensor frame.
pub const SENSOR_CHANNELS: usize = 8;

/// Payload bytes of one frame: two groups of four low bytes, each followed
/// by a byte holding the groups' high bits.
pub const SENSOR_FRAME_BYTES: usize = 10;

/// Decode a hex-encoded sensor frame into eight 10-bit readings.
///
/// Layout per group `g` of four channels: bytes `5g..5g+4` carry the low 8
/// bits, byte `5g+4` packs the high 2 bits, first channel in the top pair.
/// Malformed or short input yields an empty vector.
pub fn decode_sensor_frame(payload: &str) -> Vec<u16> {
    let bytes = match hex::decode(payload) {
        Ok(bytes) => bytes,
        Err(e) => {
            log::debug!("Malformed sensor payload {:?}: {}", payload, e);
            return Vec::new();
        }
    };
    if bytes.len() < SENSOR_FRAME_BYTES {
        return Vec::new();
    }

    (0..SENSOR_CHANNELS)
        .map(|i| {
            let group = i / 4;
            let low = bytes[i + group] as u16;
            let packed = bytes[(group + 1) * 4 + group];
            let shift = (3 - i as i32).rem_euclid(4) * 2;
            let high = ((packed >> shift) & 0x3) as u16;
            low | (high << 8)
        })
        .collect()
}
