//! ASCII stamp file format (spec §6): one bidirectional stamp per line,
//! bracketed by `%BEGIN_HEADER` / `%END_HEADER`, used both to log stamps as
//! they're processed and to replay them back through the estimator.

use std::io::{BufRead, Write};

use crate::error::{ClockError, Result};
use crate::stamp::{Stamp, StampMeta};
use crate::time::Secs;

const BEGIN_HEADER: &str = "%BEGIN_HEADER";
const END_HEADER: &str = "%END_HEADER";
const HEADER_FIELDS: &str = "Ta Tb Te Tf server stratum leap refid ttl nonce";

/// Write the header, then one line per stamp as it's appended.
pub struct AsciiWriter<W: Write> {
    out: W,
    header_written: bool,
}

impl<W: Write> AsciiWriter<W> {
    pub fn new(out: W) -> AsciiWriter<W> {
        AsciiWriter { out, header_written: false }
    }

    pub fn write_stamp(&mut self, stamp: &Stamp) -> Result<()> {
        if !self.header_written {
            writeln!(self.out, "{BEGIN_HEADER}")?;
            writeln!(self.out, "{HEADER_FIELDS}")?;
            writeln!(self.out, "{END_HEADER}")?;
            self.header_written = true;
        }
        writeln!(
            self.out,
            "{} {:.9} {:.9} {} {} {} {} {} {} {}",
            stamp.ta,
            stamp.tb.as_f64(),
            stamp.te.as_f64(),
            stamp.tf,
            stamp.meta.server,
            stamp.meta.stratum,
            stamp.meta.leap_indicator,
            stamp.meta.refid,
            stamp.meta.ttl,
            stamp.meta.nonce,
        )?;
        Ok(())
    }
}

/// Read stamps back out of an ASCII stamp file, skipping the header block.
pub struct AsciiReader<R: BufRead> {
    lines: std::io::Lines<R>,
    pending: Option<String>,
}

impl<R: BufRead> AsciiReader<R> {
    pub fn new(input: R) -> Result<AsciiReader<R>> {
        let mut lines = input.lines();
        let mut pending: Option<String> = None;
        if let Some(first) = lines.next() {
            let first = first?;
            if first.trim() == BEGIN_HEADER {
                for line in lines.by_ref() {
                    if line?.trim() == END_HEADER {
                        break;
                    }
                }
            } else {
                pending = Some(first);
            }
        }
        Ok(AsciiReader { lines, pending })
    }

    pub fn next_stamp(&mut self) -> Result<Option<Stamp>> {
        loop {
            let line = match self.pending.take() {
                Some(line) => line,
                None => match self.lines.next() {
                    Some(line) => line?,
                    None => return Ok(None),
                },
            };
            let line = line.trim();
            if line.is_empty() || line.starts_with('%') {
                continue;
            }
            return parse_stamp_line(line).map(Some);
        }
    }
}

fn parse_stamp_line(line: &str) -> Result<Stamp> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() != 10 {
        return Err(ClockError::Config(format!("malformed ascii stamp line: '{line}'")));
    }
    let bad = |field: &str| ClockError::Config(format!("malformed field '{field}' in line '{line}'"));

    let ta: u64 = fields[0].parse().map_err(|_| bad(fields[0]))?;
    let tb: f64 = fields[1].parse().map_err(|_| bad(fields[1]))?;
    let te: f64 = fields[2].parse().map_err(|_| bad(fields[2]))?;
    let tf: u64 = fields[3].parse().map_err(|_| bad(fields[3]))?;
    let server: usize = fields[4].parse().map_err(|_| bad(fields[4]))?;
    let stratum: u8 = fields[5].parse().map_err(|_| bad(fields[5]))?;
    let leap_indicator: u8 = fields[6].parse().map_err(|_| bad(fields[6]))?;
    let refid: u32 = fields[7].parse().map_err(|_| bad(fields[7]))?;
    let ttl: u8 = fields[8].parse().map_err(|_| bad(fields[8]))?;
    let nonce: u64 = fields[9].parse().map_err(|_| bad(fields[9]))?;

    Ok(Stamp {
        ta,
        tb: Secs::from_f64_secs(tb),
        te: Secs::from_f64_secs(te),
        tf,
        meta: StampMeta { server, stratum, leap_indicator, refid, ttl, nonce },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn sample() -> Stamp {
        Stamp {
            ta: 100,
            tb: Secs::from_f64_secs(10.5),
            te: Secs::from_f64_secs(10.500001),
            tf: 300,
            meta: StampMeta { server: 0, stratum: 2, leap_indicator: 0, refid: 0x7f000001, ttl: 64, nonce: 42 },
        }
    }

    #[test]
    fn roundtrips_through_ascii() {
        let mut buf = Vec::new();
        {
            let mut w = AsciiWriter::new(&mut buf);
            w.write_stamp(&sample()).unwrap();
            w.write_stamp(&sample()).unwrap();
        }
        let cursor = Cursor::new(buf);
        let mut r = AsciiReader::new(cursor).unwrap();
        let first = r.next_stamp().unwrap().expect("stamp 1");
        let second = r.next_stamp().unwrap().expect("stamp 2");
        assert_eq!(first.ta, 100);
        assert_eq!(second.tf, 300);
        assert!(r.next_stamp().unwrap().is_none());
    }

    #[test]
    fn rejects_malformed_line() {
        let cursor = Cursor::new(b"not enough fields\n".to_vec());
        let mut r = AsciiReader::new(cursor).unwrap();
        assert!(r.next_stamp().is_err());
    }
}
