//! Small formatting helpers used by the driver's diagnostic output. Grounded in
//! the source's `to_hex_dump`/`to_readable_size` free functions.

use std::fmt::Write as _;

/// Renders `data` as a classic hex dump: an 8-digit offset, space-separated hex
/// bytes padded to `max_width` columns, then the printable-ASCII rendering.
pub fn to_hex_dump(data: &[u8], max_width: usize) -> String {
    let mut out = String::new();

    for (line_index, chunk) in data.chunks(max_width).enumerate() {
        let offset = line_index * max_width;

        let mut hex_bytes = String::new();
        for byte in chunk {
            let _ = write!(hex_bytes, "{byte:02x} ");
        }

        let ascii_bytes: String = chunk
            .iter()
            .map(|&b| if (32..127).contains(&b) { b as char } else { '.' })
            .collect();

        let _ = writeln!(
            out,
            "{offset:08x}  {hex_bytes:<width$}  {ascii_bytes}",
            width = max_width * 3
        );
    }

    if out.ends_with('\n') {
        out.pop();
    }
    out
}

/// Renders a byte count with a binary (1024-based) unit suffix, e.g. `126.0 KB`.
pub fn to_readable_size(size: u64) -> String {
    let mut size = size as f64;
    for unit in ["", "K", "M", "G", "T"] {
        if size.abs() < 1024.0 {
            return format!("{size:.1} {unit}B");
        }
        size /= 1024.0;
    }
    format!("{size:.1} PB")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_dump_renders_offset_hex_and_ascii() {
        let dump = to_hex_dump(b"Hi!\x00", 16);
        assert!(dump.starts_with("00000000  "));
        assert!(dump.contains("48 69 21 00"));
        assert!(dump.ends_with("Hi!."));
    }

    #[test]
    fn readable_size_picks_the_right_unit() {
        assert_eq!(to_readable_size(512), "512.0 B");
        assert_eq!(to_readable_size(128 * 1024), "128.0 KB");
        assert_eq!(to_readable_size(3 * 1024 * 1024), "3.0 MB");
    }
}
