//! A small [`log::Log`] implementation matching the source tool's line format:
//! a timestamp, a level icon (`[ii]`/`[i]`/`[+]`/`[-]`/`[!]`), and the message.
//!
//! `--verbose` routes info-and-above to stdout; without it, only errors go to
//! stderr. This mirrors the source's two `logger.add(...)` calls rather than
//! pulling in a general-purpose logging backend this project has no other use
//! for.

use log::{Level, LevelFilter, Log, Metadata, Record};

struct LineLogger {
    verbose: bool,
}

fn level_icon(level: Level) -> &'static str {
    match level {
        Level::Trace | Level::Debug => "[ii]",
        Level::Info => "[i]",
        Level::Warn => "[-]",
        Level::Error => "[!]",
    }
}

impl Log for LineLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        if self.verbose {
            metadata.level() <= Level::Debug
        } else {
            metadata.level() <= Level::Error
        }
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let line = format!("{} {}", level_icon(record.level()), record.args());
        if record.level() == Level::Error {
            eprintln!("{line}");
        } else {
            println!("{line}");
        }
    }

    fn flush(&self) {}
}

/// Installs the process-wide logger. Call once, from `main`.
pub fn init(verbose: bool) {
    let logger = Box::new(LineLogger { verbose });
    let level = if verbose { LevelFilter::Debug } else { LevelFilter::Error };
    log::set_boxed_logger(logger)
        .map(|()| log::set_max_level(level))
        .expect("logger already initialized");
}
