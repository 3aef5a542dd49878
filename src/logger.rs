//! The per-job debug sink.
//!
//! Each line carries a `YYYY/MM/DD HH:MM:SS.mmm ` prefix and is flushed
//! immediately so output survives a crash. Lines end with CRLF on stdout
//! (host-terminal compatibility) and LF on files. A mutex serializes
//! writers so interleaved worker output stays readable.

use std::fs::File;
use std::io::{self, Write};
use std::sync::Mutex;

use chrono::Local;

enum Sink {
    Stdout,
    File(File),
}

pub struct DebugLog {
    sink: Mutex<Sink>,
    level: i32,
}

impl DebugLog {
    /// Open the sink. An empty path routes to stdout.
    pub fn open(path: &str, level: i32) -> io::Result<Self> {
        let sink = if path.is_empty() { Sink::Stdout } else { Sink::File(File::create(path)?) };
        Ok(DebugLog { sink: Mutex::new(sink), level })
    }

    pub fn level(&self) -> i32 {
        self.level
    }

    /// Write one line unconditionally (errors and warnings).
    pub fn msg(&self, text: &str) {
        let stamp = Local::now().format("%Y/%m/%d %H:%M:%S%.3f");
        let mut sink = self.sink.lock().unwrap();
        let result = match &mut *sink {
            Sink::Stdout => {
                let out = io::stdout();
                let mut out = out.lock();
                out.write_all(format!("{stamp} {text}\r\n").as_bytes()).and_then(|_| out.flush())
            }
            Sink::File(f) => {
                f.write_all(format!("{stamp} {text}\n").as_bytes()).and_then(|_| f.flush())
            }
        };
        // A failing sink must never take the scheduler down with it.
        drop(result);
    }

    /// Write one line if the configured debug level reaches `level`.
    pub fn debug(&self, level: i32, text: &str) {
        if self.level >= level {
            self.msg(text);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn open_temp(level: i32) -> (DebugLog, std::path::PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("debug.out");
        let log = DebugLog::open(path.to_str().unwrap(), level).unwrap();
        // Keep the directory alive for the duration of the test
        std::mem::forget(dir);
        (log, path)
    }

    #[test]
    fn file_lines_have_timestamp_prefix_and_bare_lf() {
        let (log, path) = open_temp(0);
        log.msg("hello");
        let contents = fs::read_to_string(&path).unwrap();
        assert!(contents.ends_with("hello\n"));
        assert!(!contents.contains('\r'));

        // Prefix shape: YYYY/MM/DD HH:MM:SS.mmm
        let prefix = &contents[..24];
        let bytes = prefix.as_bytes();
        assert_eq!(bytes[4], b'/');
        assert_eq!(bytes[7], b'/');
        assert_eq!(bytes[10], b' ');
        assert_eq!(bytes[13], b':');
        assert_eq!(bytes[16], b':');
        assert_eq!(bytes[19], b'.');
        assert_eq!(bytes[23], b' ');
        assert!(prefix[20..23].chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn debug_lines_respect_the_level() {
        let (log, path) = open_temp(1);
        log.debug(1, "shown");
        log.debug(2, "hidden");
        let contents = fs::read_to_string(&path).unwrap();
        assert!(contents.contains("shown"));
        assert!(!contents.contains("hidden"));
    }
}
