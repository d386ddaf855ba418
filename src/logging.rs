//! Logging (ambient component A2).
//!
//! The run-level log goes through `tracing`/`tracing-subscriber`, the way
//! every other ambient concern in this crate borrows a widely-used crate
//! rather than hand-rolling one; `EASYBUILD_LOGLEVEL` mirrors the
//! `RUST_LOG`-style env-filter the subscriber already understands. On top
//! of that, §6 "Filesystem layout" requires a *per-unit* log file that
//! outlives the tracing subscriber's own lifetime (it gets copied into the
//! install tree and tailed on failure, §7) — [`UnitLog`] is a plain
//! file-backed writer for that, independent of the global subscriber.

use std::fs::{self, File};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing_subscriber::EnvFilter;

use crate::config::ZipLogsFormat;

/// Install the global `tracing` subscriber. Call once, near process start.
/// `trace` corresponds to `--trace` (§4.6): it additionally prints one line
/// per entered pipeline step at `info` level instead of `debug`.
pub fn init_logging(trace: bool) {
    let default_level = if trace { "easybuild=info" } else { "easybuild=warn" };
    let filter = EnvFilter::try_from_env("EASYBUILD_LOGLEVEL").unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).with_target(false).try_init();
}

/// A single Build Unit's dedicated log file (§6, §7): every line the
/// pipeline emits for that unit is appended here as well as going through
/// `tracing`, so a failure can be reported by tailing this file without
/// replaying the whole run's interleaved output.
pub struct UnitLog {
    path: PathBuf,
    file: File,
}

impl UnitLog {
    pub fn create(logdir: &Path, module_id_sanitized: &str) -> io::Result<UnitLog> {
        fs::create_dir_all(logdir)?;
        let path = logdir.join(format!("easybuild-{module_id_sanitized}.log"));
        let file = File::create(&path)?;
        Ok(UnitLog { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn line(&mut self, text: &str) {
        let _ = writeln!(self.file, "{text}");
    }

    /// The last `n` bytes of the log, for the on-failure report (§7 "prints
    /// the last N bytes of the unit log", default N=300).
    pub fn tail(&self, n: u64) -> io::Result<String> {
        let mut file = File::open(&self.path)?;
        let len = file.metadata()?.len();
        let start = len.saturating_sub(n);
        file.seek(SeekFrom::Start(start))?;
        let mut buf = String::new();
        file.read_to_string(&mut buf)?;
        Ok(buf)
    }
}

/// Compress a finished unit log per `--zip-logs[={gzip,bzip2}]` (§6, §8 S1),
/// removing the plain-text original and returning the compressed path.
pub fn compress_log(path: &Path, format: ZipLogsFormat) -> io::Result<PathBuf> {
    let data = fs::read(path)?;
    let mut os = path.as_os_str().to_owned();
    os.push(match format {
        ZipLogsFormat::Gzip => ".gz",
        ZipLogsFormat::Bzip2 => ".bz2",
    });
    let dest = PathBuf::from(os);

    let file = File::create(&dest)?;
    match format {
        ZipLogsFormat::Gzip => {
            let mut encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
            encoder.write_all(&data)?;
            encoder.finish()?;
        }
        ZipLogsFormat::Bzip2 => {
            let mut encoder = bzip2::write::BzEncoder::new(file, bzip2::Compression::default());
            encoder.write_all(&data)?;
            encoder.finish()?;
        }
    }
    fs::remove_file(path)?;
    Ok(dest)
}
