//! Sequential tile downloads.
//!
//! Files are streamed into `<name>.part` and renamed once complete, so a
//! file under its final name is always a finished download.

use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::blocking::Client;

use crate::cancel::CancelToken;
use crate::error::{Error, Result};
use crate::progress::Reporter;
use crate::tile_index::TileRecord;

/// Connection timeout, separate from the total request timeout.
const CONNECT_TIMEOUT_SECS: u64 = 10;

/// Buffer size for streaming downloads to disk (64KB).
const BUFFER_SIZE: usize = 64 * 1024;

/// A response body being streamed.
pub struct Body {
    /// Announced length, if any.
    pub len: Option<u64>,
    pub reader: Box<dyn Read + Send>,
}

/// Source of tile bytes. Implemented over HTTP for real runs and faked in
/// tests.
pub trait Fetch {
    fn get(&self, url: &str) -> Result<Body>;
}

/// Blocking HTTP client with explicit timeouts.
#[derive(Debug, Clone)]
pub struct HttpFetch {
    client: Client,
}

impl HttpFetch {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self { client })
    }
}

impl Fetch for HttpFetch {
    fn get(&self, url: &str) -> Result<Body> {
        let response = self.client.get(url).send()?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        Ok(Body {
            len: response.content_length(),
            reader: Box::new(response),
        })
    }
}

#[derive(Debug)]
pub enum TileOutcome {
    Downloaded { path: PathBuf, bytes: u64 },
    /// Already on disk from an earlier run; no request made.
    Present { path: PathBuf },
    Failed { filename: String, error: Error },
}

#[derive(Debug, Default)]
pub struct DownloadReport {
    pub outcomes: Vec<TileOutcome>,
    pub cancelled: bool,
}

impl DownloadReport {
    /// Files on disk after the stage, in tile order.
    pub fn available(&self) -> Vec<&Path> {
        self.outcomes
            .iter()
            .filter_map(|outcome| match outcome {
                TileOutcome::Downloaded { path, .. } | TileOutcome::Present { path } => {
                    Some(path.as_path())
                }
                TileOutcome::Failed { .. } => None,
            })
            .collect()
    }

    pub fn downloaded(&self) -> usize {
        self.count(|o| matches!(o, TileOutcome::Downloaded { .. }))
    }

    pub fn present(&self) -> usize {
        self.count(|o| matches!(o, TileOutcome::Present { .. }))
    }

    pub fn failed(&self) -> usize {
        self.failures().count()
    }

    /// Tiles that could not be downloaded, with the reason.
    pub fn failures(&self) -> impl Iterator<Item = (&str, &Error)> {
        self.outcomes.iter().filter_map(|outcome| match outcome {
            TileOutcome::Failed { filename, error } => Some((filename.as_str(), error)),
            _ => None,
        })
    }

    pub fn bytes(&self) -> u64 {
        self.outcomes
            .iter()
            .map(|o| match o {
                TileOutcome::Downloaded { bytes, .. } => *bytes,
                _ => 0,
            })
            .sum()
    }

    fn count(&self, pred: impl Fn(&TileOutcome) -> bool) -> usize {
        self.outcomes.iter().filter(|o| pred(o)).count()
    }
}

pub struct Downloader<'a, F: Fetch> {
    fetch: &'a F,
    reporter: Reporter,
}

impl<'a, F: Fetch> Downloader<'a, F> {
    pub fn new(fetch: &'a F, reporter: Reporter) -> Self {
        Self { fetch, reporter }
    }

    /// Downloads every tile not yet present in `output_dir`. A failed tile
    /// is recorded, not logged, and the next one is attempted.
    pub fn download_all(
        &self,
        tiles: &[TileRecord],
        output_dir: &Path,
        cancel: &CancelToken,
    ) -> DownloadReport {
        let mut report = DownloadReport::default();
        let pb = self.reporter.items_bar(tiles.len(), "Downloading tiles");

        for tile in tiles {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }

            match self.download_one(tile, output_dir, cancel) {
                Ok(outcome) => report.outcomes.push(outcome),
                Err(Error::Cancelled) => {
                    report.cancelled = true;
                    break;
                }
                Err(err) => {
                    let error = match err {
                        err @ Error::Network { .. } => err,
                        err => Error::network(&tile.filename, err),
                    };
                    report.outcomes.push(TileOutcome::Failed {
                        filename: tile.filename.clone(),
                        error,
                    });
                }
            }
            pb.inc(1);
        }

        pb.finish_and_clear();
        report
    }

    fn download_one(
        &self,
        tile: &TileRecord,
        output_dir: &Path,
        cancel: &CancelToken,
    ) -> Result<TileOutcome> {
        let path = output_dir.join(&tile.filename);
        if is_present(&path) {
            self.reporter
                .detail(&format!("{} already downloaded, skipping", tile.filename));
            return Ok(TileOutcome::Present { path });
        }

        self.reporter
            .detail(&format!("Downloading {} from {}", tile.filename, tile.url));

        let part = part_path(&path);
        let bytes = match self.stream_to(tile, &part, cancel) {
            Ok(bytes) => bytes,
            Err(err) => {
                // Leftover may not exist if the request itself failed.
                let _ = fs::remove_file(&part);
                return Err(err);
            }
        };
        if let Err(err) = fs::rename(&part, &path) {
            let _ = fs::remove_file(&part);
            return Err(err.into());
        }

        self.reporter
            .detail(&format!("Download done for {} ({bytes} bytes)", tile.filename));
        Ok(TileOutcome::Downloaded { path, bytes })
    }

    fn stream_to(&self, tile: &TileRecord, part: &Path, cancel: &CancelToken) -> Result<u64> {
        let Body { len, mut reader } = self.fetch.get(&tile.url)?;

        let pb = self.reporter.bytes_bar(len, &tile.filename);
        let mut writer = BufWriter::new(File::create(part)?);
        let mut buffer = vec![0u8; BUFFER_SIZE];
        let mut written = 0u64;

        loop {
            if cancel.is_cancelled() {
                pb.abandon();
                return Err(Error::Cancelled);
            }

            let n = match reader.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };

            writer.write_all(&buffer[..n])?;
            written += n as u64;
            pb.inc(n as u64);
        }

        writer.flush()?;
        pb.finish_and_clear();

        if written == 0 {
            return Err(Error::network(&tile.filename, "server sent an empty body"));
        }
        if let Some(len) = len {
            if written != len {
                return Err(Error::network(
                    &tile.filename,
                    format!("truncated body: got {written} of {len} bytes"),
                ));
            }
        }

        Ok(written)
    }
}

/// A tile counts as downloaded when its file exists and is non-empty.
pub fn is_present(path: &Path) -> bool {
    fs::metadata(path)
        .map(|m| m.is_file() && m.len() > 0)
        .unwrap_or(false)
}

fn part_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::FakeFetch;
    use gdal::vector::Geometry;

    fn tile(name: &str) -> TileRecord {
        TileRecord {
            filename: name.to_string(),
            url: format!("https://data.test/{name}"),
            footprint: Geometry::from_wkt("POLYGON ((0 0,1 0,1 1,0 1,0 0))").unwrap(),
        }
    }

    #[test]
    fn downloads_every_missing_tile() {
        let dir = tempfile::tempdir().unwrap();
        let fetch = FakeFetch::new()
            .serve("https://data.test/a.laz", vec![1; 100_000])
            .serve("https://data.test/b.laz", vec![2; 10]);

        let report = Downloader::new(&fetch, Reporter::silent()).download_all(
            &[tile("a.laz"), tile("b.laz")],
            dir.path(),
            &CancelToken::new(),
        );

        assert_eq!(report.downloaded(), 2);
        assert_eq!(report.bytes(), 100_010);
        assert_eq!(fetch.requests(), 2);
        assert_eq!(fs::read(dir.path().join("b.laz")).unwrap(), vec![2; 10]);
        assert!(!dir.path().join("a.laz.part").exists());
    }

    #[test]
    fn rerun_with_all_files_present_makes_no_request() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.laz"), b"las").unwrap();
        fs::write(dir.path().join("b.laz"), b"las").unwrap();
        let fetch = FakeFetch::new();

        let report = Downloader::new(&fetch, Reporter::silent()).download_all(
            &[tile("a.laz"), tile("b.laz")],
            dir.path(),
            &CancelToken::new(),
        );

        assert_eq!(fetch.requests(), 0);
        assert_eq!(report.present(), 2);
        assert_eq!(report.available().len(), 2);
    }

    #[test]
    fn empty_file_is_downloaded_again() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.laz"), b"").unwrap();
        let fetch = FakeFetch::new().serve("https://data.test/a.laz", vec![7; 5]);

        let report = Downloader::new(&fetch, Reporter::silent()).download_all(
            &[tile("a.laz")],
            dir.path(),
            &CancelToken::new(),
        );

        assert_eq!(fetch.requests(), 1);
        assert_eq!(report.downloaded(), 1);
    }

    #[test]
    fn no_tiles_means_no_request() {
        let dir = tempfile::tempdir().unwrap();
        let fetch = FakeFetch::new();

        let report =
            Downloader::new(&fetch, Reporter::silent()).download_all(&[], dir.path(), &CancelToken::new());

        assert_eq!(fetch.requests(), 0);
        assert!(report.outcomes.is_empty());
    }

    #[test]
    fn failed_tile_does_not_stop_the_next_one() {
        let dir = tempfile::tempdir().unwrap();
        let fetch = FakeFetch::new().serve("https://data.test/b.laz", vec![2; 10]);

        let report = Downloader::new(&fetch, Reporter::silent()).download_all(
            &[tile("a.laz"), tile("b.laz")],
            dir.path(),
            &CancelToken::new(),
        );

        assert_eq!(report.failed(), 1);
        assert_eq!(report.downloaded(), 1);
        assert_eq!(fetch.requested(), vec!["https://data.test/a.laz", "https://data.test/b.laz"]);
        assert!(!dir.path().join("a.laz").exists());
        assert!(!dir.path().join("a.laz.part").exists());

        match &report.outcomes[0] {
            TileOutcome::Failed { filename, error } => {
                assert_eq!(filename, "a.laz");
                assert!(matches!(error, Error::Network { .. }));
                assert!(error.to_string().contains("a.laz"));
                assert!(error.to_string().contains("404"));
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn cancelled_run_stops_before_the_next_tile() {
        let dir = tempfile::tempdir().unwrap();
        let fetch = FakeFetch::new().serve("https://data.test/a.laz", vec![1; 10]);
        let cancel = CancelToken::new();
        cancel.cancel();

        let report = Downloader::new(&fetch, Reporter::silent()).download_all(
            &[tile("a.laz")],
            dir.path(),
            &cancel,
        );

        assert!(report.cancelled);
        assert_eq!(fetch.requests(), 0);
        assert!(report.outcomes.is_empty());
    }

    #[test]
    fn truncated_body_leaves_no_file_behind() {
        let dir = tempfile::tempdir().unwrap();
        let fetch = FakeFetch::new()
            .serve_truncated("https://data.test/a.laz", vec![1; 100], 1000)
            .serve("https://data.test/b.laz", vec![2; 10]);

        let report = Downloader::new(&fetch, Reporter::silent()).download_all(
            &[tile("a.laz"), tile("b.laz")],
            dir.path(),
            &CancelToken::new(),
        );

        assert_eq!(report.failed(), 1);
        assert_eq!(report.downloaded(), 1);
        assert!(!dir.path().join("a.laz").exists());
        assert!(!dir.path().join("a.laz.part").exists());
        assert!(dir.path().join("b.laz").exists());

        let (filename, error) = report.failures().next().unwrap();
        assert_eq!(filename, "a.laz");
        assert_eq!(
            error.to_string(),
            "Download of a.laz failed: truncated body: got 100 of 1000 bytes"
        );
    }

    #[test]
    fn read_error_mid_stream_leaves_no_file_behind() {
        let dir = tempfile::tempdir().unwrap();
        let fetch = FakeFetch::new()
            .serve_broken("https://data.test/a.laz", vec![1; 100])
            .serve("https://data.test/b.laz", vec![2; 10]);

        let report = Downloader::new(&fetch, Reporter::silent()).download_all(
            &[tile("a.laz"), tile("b.laz")],
            dir.path(),
            &CancelToken::new(),
        );

        assert_eq!(report.failed(), 1);
        assert_eq!(report.downloaded(), 1);
        assert!(!dir.path().join("a.laz").exists());
        assert!(!dir.path().join("a.laz.part").exists());
        assert_eq!(fs::read(dir.path().join("b.laz")).unwrap(), vec![2; 10]);
    }

    #[test]
    fn cancel_between_chunks_removes_the_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let cancel = CancelToken::new();
        let fetch = FakeFetch::new()
            .serve_then_cancel("https://data.test/a.laz", vec![1; 100], cancel.clone())
            .serve("https://data.test/b.laz", vec![2; 10]);

        let report = Downloader::new(&fetch, Reporter::silent()).download_all(
            &[tile("a.laz"), tile("b.laz")],
            dir.path(),
            &cancel,
        );

        assert!(report.cancelled);
        assert!(report.outcomes.is_empty());
        assert_eq!(fetch.requests(), 1);
        assert!(!dir.path().join("a.laz").exists());
        assert!(!dir.path().join("a.laz.part").exists());
    }

    #[test]
    fn failed_rename_removes_the_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        // A directory in the way of the final name.
        fs::create_dir(dir.path().join("a.laz")).unwrap();
        fs::write(dir.path().join("a.laz").join("keep"), b"x").unwrap();
        let fetch = FakeFetch::new().serve("https://data.test/a.laz", vec![1; 10]);

        let report = Downloader::new(&fetch, Reporter::silent()).download_all(
            &[tile("a.laz")],
            dir.path(),
            &CancelToken::new(),
        );

        assert_eq!(report.failed(), 1);
        assert!(!dir.path().join("a.laz.part").exists());
    }

    #[test]
    fn part_file_sits_next_to_the_target() {
        assert_eq!(
            part_path(Path::new("/out/tile.copc.laz")),
            PathBuf::from("/out/tile.copc.laz.part")
        );
    }
}
