use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use crate::core::{Sensor, TimeUnits};
use crate::error::{DvsError, DvsResult};
use crate::event::{Event, Polarity};

const TIMESTAMP_NAMES: &[&str] = &["timeStamp", "timestamp", "t"];
const X_NAMES: &[&str] = &["xAddr", "x"];
const Y_NAMES: &[&str] = &["yAddr", "y"];
const POLARITY_NAMES: &[&str] = &["polarity(0=OFF 1=ON)", "polarity", "p"];

/// How raw log coordinates map onto the sensor grid.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DecodeOptions {
    pub sensor: Sensor,
    /// Mirror both axes (`x' = w-1-x`, `y' = h-1-y`), as the DAVIS346 is mounted.
    pub flip: bool,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self {
            sensor: Sensor::DAVIS346,
            flip: true,
        }
    }
}

#[derive(Clone, Copy, Debug)]
struct Columns {
    t: usize,
    x: usize,
    y: usize,
    p: usize,
}

impl Columns {
    fn from_headers(headers: &csv::StringRecord) -> DvsResult<Self> {
        let find = |names: &[&str]| headers.iter().position(|h| names.contains(&h.trim()));
        let missing = |what: &str| {
            DvsError::decode(format!(
                "csv header has no {what} column (have: {})",
                headers.iter().collect::<Vec<_>>().join(", ")
            ))
        };
        let cols = Self {
            t: find(TIMESTAMP_NAMES).ok_or_else(|| missing("timestamp"))?,
            x: find(X_NAMES).ok_or_else(|| missing("x"))?,
            y: find(Y_NAMES).ok_or_else(|| missing("y"))?,
            p: find(POLARITY_NAMES).ok_or_else(|| missing("polarity"))?,
        };
        for (i, h) in headers.iter().enumerate() {
            if ![cols.t, cols.x, cols.y, cols.p].contains(&i) {
                tracing::warn!(column = h, "ignoring unknown csv column");
            }
        }
        Ok(cols)
    }
}

/// Streaming reader for DAVIS-style CSV event logs.
///
/// Yields one [`DvsResult<Event>`] per record; a malformed record is reported with its line
/// number and does not stop iteration by itself.
pub struct CsvEventReader<R> {
    records: csv::StringRecordsIntoIter<R>,
    columns: Columns,
    opts: DecodeOptions,
    read: u64,
}

impl<R> std::fmt::Debug for CsvEventReader<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CsvEventReader")
            .field("columns", &self.columns)
            .field("opts", &self.opts)
            .field("read", &self.read)
            .finish_non_exhaustive()
    }
}

impl CsvEventReader<BufReader<File>> {
    /// Open a CSV event log on disk and read its header.
    #[tracing::instrument(skip_all, fields(path = %path.display()))]
    pub fn open(path: &Path, opts: DecodeOptions) -> DvsResult<Self> {
        use anyhow::Context as _;
        let file = File::open(path)
            .with_context(|| format!("open event log '{}'", path.display()))?;
        Self::new(BufReader::new(file), opts)
    }
}

impl<R: Read> CsvEventReader<R> {
    pub fn new(reader: R, opts: DecodeOptions) -> DvsResult<Self> {
        let mut rdr = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(reader);
        let headers = rdr
            .headers()
            .map_err(|e| DvsError::decode(format!("failed to read csv header: {e}")))?
            .clone();
        let columns = Columns::from_headers(&headers)?;
        Ok(Self {
            records: rdr.into_records(),
            columns,
            opts,
            read: 0,
        })
    }

    /// Records consumed so far, good or bad.
    pub fn records_read(&self) -> u64 {
        self.read
    }

    fn parse(&self, rec: &csv::StringRecord) -> DvsResult<Event> {
        let line = rec.position().map_or(0, |p| p.line());
        let field = |i: usize, name: &str| {
            rec.get(i)
                .ok_or_else(|| DvsError::decode(format!("line {line}: missing {name} field")))
        };
        let bad = |name: &str, raw: &str| {
            DvsError::decode(format!("line {line}: malformed {name} '{raw}'"))
        };

        let raw = field(self.columns.t, "timestamp")?;
        let timestamp: TimeUnits = raw.parse().map_err(|_| bad("timestamp", raw))?;
        let raw = field(self.columns.x, "x")?;
        let x: u32 = raw.parse().map_err(|_| bad("x", raw))?;
        let raw = field(self.columns.y, "y")?;
        let y: u32 = raw.parse().map_err(|_| bad("y", raw))?;
        let raw = field(self.columns.p, "polarity")?;
        let polarity = parse_polarity(raw).ok_or_else(|| bad("polarity", raw))?;

        let sensor = self.opts.sensor;
        if !sensor.contains(x, y) {
            return Err(DvsError::decode(format!(
                "line {line}: event at ({x}, {y}) is outside the {}x{} sensor",
                sensor.width, sensor.height
            )));
        }
        let (x, y) = if self.opts.flip {
            (sensor.width - 1 - x, sensor.height - 1 - y)
        } else {
            (x, y)
        };
        Ok(Event::new(timestamp, x, y, polarity))
    }
}

impl<R: Read> Iterator for CsvEventReader<R> {
    type Item = DvsResult<Event>;

    fn next(&mut self) -> Option<Self::Item> {
        let rec = self.records.next()?;
        self.read += 1;
        Some(match rec {
            Ok(rec) => self.parse(&rec),
            Err(e) => Err(DvsError::decode(format!("csv read failed: {e}"))),
        })
    }
}

/// DAVIS logs write `0` for OFF and `1` for ON; signed `-1`/`+1` is accepted as well.
fn parse_polarity(raw: &str) -> Option<Polarity> {
    match raw {
        "1" | "+1" => Some(Polarity::On),
        "0" | "-1" => Some(Polarity::Off),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts(flip: bool) -> DecodeOptions {
        DecodeOptions {
            sensor: Sensor::new(10, 5).unwrap(),
            flip,
        }
    }

    fn read_all(csv: &str, flip: bool) -> Vec<DvsResult<Event>> {
        CsvEventReader::new(csv.as_bytes(), opts(flip)).unwrap().collect()
    }

    #[test]
    fn davis_headers_decode_and_flip() {
        let csv = "timeStamp,xAddr,yAddr,polarity(0=OFF 1=ON)\n100,0,0,1\n200,9,4,0\n";
        let events: Vec<_> = read_all(csv, true).into_iter().map(Result::unwrap).collect();
        assert_eq!(
            events,
            vec![
                Event::new(100, 9, 4, Polarity::On),
                Event::new(200, 0, 0, Polarity::Off),
            ]
        );
    }

    #[test]
    fn short_headers_and_extra_columns() {
        let csv = "t, x, y, p, extra\n5, 3, 2, -1, foo\n6, 3, 2, +1, bar\n";
        let events: Vec<_> = read_all(csv, false).into_iter().map(Result::unwrap).collect();
        assert_eq!(events[0], Event::new(5, 3, 2, Polarity::Off));
        assert_eq!(events[1], Event::new(6, 3, 2, Polarity::On));
    }

    #[test]
    fn columns_may_be_reordered() {
        let csv = "polarity,y,x,timestamp\n1,4,7,42\n";
        let events = read_all(csv, false);
        assert_eq!(*events[0].as_ref().unwrap(), Event::new(42, 7, 4, Polarity::On));
    }

    #[test]
    fn missing_column_is_a_decode_error() {
        let err = CsvEventReader::new("t,x,y\n1,2,3\n".as_bytes(), opts(false))
            .err()
            .unwrap();
        assert!(err.to_string().contains("polarity"));
    }

    #[test]
    fn malformed_records_carry_line_numbers() {
        let csv = "t,x,y,p\n1,2,3,1\n2,two,3,1\n3,2,3,7\n4,10,0,1\n";
        let results = read_all(csv, false);
        assert!(results[0].is_ok());
        let msgs: Vec<_> = results[1..]
            .iter()
            .map(|r| r.as_ref().unwrap_err().to_string())
            .collect();
        assert!(msgs[0].contains("line 3") && msgs[0].contains("malformed x"));
        assert!(msgs[1].contains("line 4") && msgs[1].contains("polarity"));
        assert!(msgs[2].contains("line 5") && msgs[2].contains("outside"));
    }

    #[test]
    fn counts_records() {
        let mut r = CsvEventReader::new("t,x,y,p\n1,0,0,1\n2,0,0,0\n".as_bytes(), opts(false))
            .unwrap();
        assert_eq!(r.by_ref().count(), 2);
        assert_eq!(r.records_read(), 2);
    }

    #[test]
    fn open_reads_from_disk_and_names_missing_files() {
        let dir = std::env::temp_dir().join(format!("dvs-decay-open-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("events.csv");
        std::fs::write(&path, "t,x,y,p\n5,1,2,1\n").unwrap();

        let got: Vec<_> = CsvEventReader::open(&path, opts(false))
            .unwrap()
            .collect::<DvsResult<_>>()
            .unwrap();
        assert_eq!(got, vec![Event::new(5, 1, 2, Polarity::On)]);

        let missing = dir.join("nope.csv");
        let err = CsvEventReader::open(&missing, opts(false)).unwrap_err();
        assert!(err.to_string().contains("nope.csv"), "{err}");
        let _ = std::fs::remove_dir_all(&dir);
    }
}
