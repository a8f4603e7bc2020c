//! text2pcap-compatible output.

use std::io::{self, Write};
use std::time::Duration;

const BYTES_PER_LINE: usize = 16;

/// Write `delta` as `MM:SS.UUUUUU`. Minutes are not wrapped at 60.
pub fn write_timestamp<W: Write + ?Sized>(out: &mut W, delta: Duration) -> io::Result<()> {
    let secs = delta.as_secs();
    writeln!(
        out,
        "{:02}:{:02}.{:06}",
        secs / 60,
        secs % 60,
        delta.subsec_micros()
    )
}

/// Write `data` as lines of `OOOO XX XX ... ` with up to 16 bytes each.
pub fn write_hexdump<W: Write + ?Sized>(out: &mut W, data: &[u8]) -> io::Result<()> {
    for (line, chunk) in data.chunks(BYTES_PER_LINE).enumerate() {
        write!(out, "{:04x} ", line * BYTES_PER_LINE)?;
        for byte in chunk {
            write!(out, "{:02x} ", byte)?;
        }
        writeln!(out)?;
    }
    Ok(())
}
