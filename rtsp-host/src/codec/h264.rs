//! H.264 annex-B helpers

pub const NAL_IDR_SLICE: u8 = 5;
pub const NAL_SPS: u8 = 7;
pub const NAL_PPS: u8 = 8;

pub const START_CODE: &[u8] = &[0, 0, 0, 1];
const SHORT_START_CODE: &[u8] = &[0, 0, 1];

/// NAL unit type of the first unit in `data`, which must begin with a
/// 3- or 4-byte start code
pub fn nal_unit_type(data: &[u8]) -> Option<u8> {
    if data.len() <= START_CODE.len() {
        return None;
    }
    let header = if data.starts_with(SHORT_START_CODE) {
        data[SHORT_START_CODE.len()]
    } else if data.starts_with(START_CODE) {
        data[START_CODE.len()]
    } else {
        return None;
    };
    Some(header & 0x1F)
}

/// Check if the unit can start decoding (IDR, SPS or PPS)
pub fn is_keyframe(data: &[u8]) -> bool {
    matches!(
        nal_unit_type(data),
        Some(NAL_IDR_SLICE) | Some(NAL_SPS) | Some(NAL_PPS)
    )
}

pub fn has_start_code(data: &[u8]) -> bool {
    data.starts_with(START_CODE) || data.starts_with(SHORT_START_CODE)
}
