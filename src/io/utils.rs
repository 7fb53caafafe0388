use std::fs;
use std::io::{self, prelude::*};
use std::path::{Path, PathBuf};

use log::debug;

use crate::io::cdta::format_title;
use crate::spectrum::ScanRange;

/// Concatenate files byte-for-byte into `output`, returning the total number
/// of bytes written.
pub fn concatenate_files<P: AsRef<Path>>(inputs: &[P], output: &Path) -> io::Result<u64> {
    let mut writer = io::BufWriter::new(fs::File::create(output)?);
    let mut total = 0u64;
    for input in inputs {
        let mut reader = io::BufReader::new(fs::File::open(input)?);
        total += io::copy(&mut reader, &mut writer)?;
    }
    writer.flush()?;
    Ok(total)
}

/// Fold the individual `Dataset.Start.End.Charge.dta` files in a directory
/// into one CDTA file, emitting a title separator line ahead of each one.
///
/// Files are taken in (start, end, charge) order so the output follows scan
/// order regardless of directory enumeration order. Returns the number of
/// spectra written.
pub fn concatenate_dta_files(directory: &Path, dataset: &str, output: &Path) -> io::Result<u64> {
    let mut entries: Vec<(ScanRange, i32, PathBuf)> = Vec::new();
    for entry in fs::read_dir(directory)? {
        let path = entry?.path();
        if path.extension().map(|e| e != "dta").unwrap_or(true) {
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if !name.starts_with(dataset) {
            continue;
        }
        let mut fields = name.trim_end_matches(".dta").rsplitn(4, '.');
        let charge: Option<i32> = fields.next().and_then(|f| f.parse().ok());
        let end: Option<u32> = fields.next().and_then(|f| f.parse().ok());
        let start: Option<u32> = fields.next().and_then(|f| f.parse().ok());
        if let (Some(start), Some(end), Some(charge)) = (start, end, charge) {
            entries.push((ScanRange::new(start, end), charge, path));
        } else {
            debug!("Ignoring {name}: not a Dataset.Start.End.Charge.dta name");
        }
    }
    entries.sort_by_key(|(scans, charge, _)| (scans.start, scans.end, *charge));

    let mut writer = io::BufWriter::new(fs::File::create(output)?);
    for (scans, charge, path) in &entries {
        let body = fs::read_to_string(path)?;
        writer.write_all(b"\n")?;
        writer.write_all(format_title(dataset, *scans, *charge).as_bytes())?;
        writer.write_all(b"\n")?;
        writer.write_all(body.trim_end_matches('\n').as_bytes())?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;
    Ok(entries.len() as u64)
}

/// Package files into a deflate-compressed zip archive, storing each under
/// its bare file name.
pub fn zip_package<P: AsRef<Path>>(files: &[P], archive: &Path) -> io::Result<()> {
    let sink = fs::File::create(archive)?;
    let mut writer = zip::ZipWriter::new(sink);
    let options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated);
    for file in files {
        let file = file.as_ref();
        let name = file.file_name().and_then(|n| n.to_str()).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} has no usable file name", file.display()),
            )
        })?;
        writer
            .start_file(name, options)
            .map_err(io::Error::other)?;
        let mut reader = io::BufReader::new(fs::File::open(file)?);
        io::copy(&mut reader, &mut writer)?;
    }
    writer.finish().map_err(io::Error::other)?;
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::io::cdta::CDTAReader;

    #[test]
    fn test_concatenate_files() -> io::Result<()> {
        let dir = tempfile::tempdir()?;
        let a = dir.path().join("a.txt");
        let b = dir.path().join("b.txt");
        fs::write(&a, "alpha\n")?;
        fs::write(&b, "beta\n")?;
        let out = dir.path().join("out.txt");
        let n = concatenate_files(&[&a, &b], &out)?;
        assert_eq!(n, 11);
        assert_eq!(fs::read_to_string(&out)?, "alpha\nbeta\n");
        Ok(())
    }

    #[test]
    fn test_concatenate_dta_files() -> io::Result<()> {
        let dir = tempfile::tempdir()?;
        fs::write(dir.path().join("TestDS.200.200.3.dta"), "944.9 3\n101.0 17\n")?;
        fs::write(dir.path().join("TestDS.100.100.2.dta"), "1482.5 2\n121.3 500\n")?;
        fs::write(dir.path().join("OtherDS.5.5.1.dta"), "10.0 1\n")?;
        fs::write(dir.path().join("TestDS.notes.txt"), "ignored")?;

        let out = dir.path().join("TestDS_dta.txt");
        let n = concatenate_dta_files(dir.path(), "TestDS", &out)?;
        assert_eq!(n, 2);

        let mut reader = CDTAReader::new(fs::File::open(&out)?);
        let first = reader.parse_next().unwrap().unwrap();
        assert_eq!(first.scans.start, 100);
        assert_eq!(first.parent_ion_line, "1482.5 2");
        let second = reader.parse_next().unwrap().unwrap();
        assert_eq!(second.scans.start, 200);
        assert!(reader.parse_next().unwrap().is_none());
        Ok(())
    }

    #[test]
    fn test_zip_package() -> io::Result<()> {
        let dir = tempfile::tempdir()?;
        let cdta = dir.path().join("TestDS_dta.txt");
        fs::write(&cdta, "=== \"TestDS.1.1.1.dta\" ===\n100.0 1\n50.0 2\n")?;
        let archive = dir.path().join("TestDS_dta.zip");
        zip_package(&[&cdta], &archive)?;

        let mut zip = zip::ZipArchive::new(fs::File::open(&archive)?).map_err(io::Error::other)?;
        let mut entry = zip.by_name("TestDS_dta.txt").map_err(io::Error::other)?;
        let mut text = String::new();
        entry.read_to_string(&mut text)?;
        assert!(text.contains("TestDS.1.1.1.dta"));
        Ok(())
    }
}
