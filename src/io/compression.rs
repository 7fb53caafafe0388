use std::io::{self, prelude::*, SeekFrom};
use std::path;

use flate2::bufread::MultiGzDecoder;

pub fn is_gzipped(header: &[u8]) -> bool {
    header.starts_with(b"\x1f\x8b")
}

pub fn is_gzipped_extension(path: path::PathBuf) -> (bool, path::PathBuf) {
    if let Some(ext) = path.extension() {
        if ext.to_ascii_lowercase() == "gz" {
            (true, path.with_extension(""))
        } else {
            (false, path)
        }
    } else {
        (false, path)
    }
}

/// A gzip decoder over a seekable stream that implements [`io::Seek`] for
/// `SeekFrom::Start(0)` only, by rewinding the inner stream and recreating
/// the decoder.
///
/// This is just enough `Seek` for gzipped CDTA files to participate in the
/// merge's rewind protocol; any other seek target returns an error.
pub struct RestartableGzDecoder<R: BufRead + Seek> {
    handle: Option<MultiGzDecoder<R>>,
    offset: u64,
}

impl<R: BufRead + Seek> RestartableGzDecoder<R> {
    pub fn new(handle: R) -> Self {
        Self {
            handle: Some(MultiGzDecoder::new(handle)),
            offset: 0,
        }
    }

    fn reset(&mut self) -> io::Result<u64> {
        let handle = self.handle.take().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "Failed to reclaim gzip stream",
            )
        })?;
        let mut inner = handle.into_inner();
        let res = inner.seek(SeekFrom::Start(0));
        self.handle = Some(MultiGzDecoder::new(inner));
        self.offset = 0;
        res
    }
}

impl<R: BufRead + Seek> Read for RestartableGzDecoder<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.handle.as_mut() {
            Some(handle) => {
                let b = handle.read(buf)?;
                self.offset += b as u64;
                Ok(b)
            }
            None => Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "Failed to reclaim gzip stream",
            )),
        }
    }
}

impl<R: BufRead + Seek> Seek for RestartableGzDecoder<R> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        match pos {
            SeekFrom::Start(0) => self.reset(),
            SeekFrom::Current(0) => Ok(self.offset),
            _ => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "RestartableGzDecoder cannot seek to arbitrary positions",
            )),
        }
    }
}
