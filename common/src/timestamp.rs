/// Template supplying the defaults for unspecified timestamp positions:
/// month and day default to `01`, the time-of-day fields to `00`.
const PAD_TEMPLATE: &[u8; 14] = b"00000101000000";

/// Pad a partial timestamp (`2020`, `202006`, ...) to the canonical 14-digit
/// `YYYYMMDDhhmmss` form. Non-digit bytes are dropped before padding; longer
/// inputs are truncated to 14 digits.
pub fn pad_timestamp(input: &str) -> String {
    let mut out = *PAD_TEMPLATE;
    let mut filled = 0;

    for c in input.chars().filter(|c| c.is_ascii_digit()) {
        if filled == out.len() {
            break;
        }
        out[filled] = c as u8;
        filled += 1;
    }

    // template is ASCII, digits overlay it byte by byte
    String::from_utf8(out.to_vec()).unwrap()
}
