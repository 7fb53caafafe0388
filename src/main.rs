use std::env;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use dtatools::io::{concatenate_files, convert_mgf_path, zip_package};
use dtatools::merge::merge_cdta_files;

const USAGE: &str = "\
Usage:
  dtatools merge <parent_dta.txt> <fragment_dta.txt> <output_dta.txt>
  dtatools mgf2dta <input.mgf> <output_dta.txt> <dataset>
  dtatools concat <output> <input>...
  dtatools zip <archive.zip> <file>...
";

fn main() -> ExitCode {
    env_logger::init();
    let args: Vec<String> = env::args().collect();
    let Some(command) = args.get(1) else {
        eprint!("{USAGE}");
        return ExitCode::FAILURE;
    };

    let result = match (command.as_str(), &args[2..]) {
        ("merge", [parent, fragment, output]) => {
            match merge_cdta_files(Path::new(parent), Path::new(fragment), Path::new(output)) {
                Ok(report) => {
                    println!(
                        "Wrote {} spectra to {} ({} skipped, {} rewinds)",
                        report.spectra_written, output, report.spectra_skipped, report.rewinds
                    );
                    Ok(())
                }
                Err(err) => Err(err.to_string()),
            }
        }
        ("mgf2dta", [input, output, dataset]) => {
            match convert_mgf_path(input, output, dataset) {
                Ok(count) => {
                    println!("Converted {count} spectra to {output}");
                    Ok(())
                }
                Err(err) => Err(err.to_string()),
            }
        }
        ("concat", [output, inputs @ ..]) if !inputs.is_empty() => {
            let inputs: Vec<PathBuf> = inputs.iter().map(PathBuf::from).collect();
            match concatenate_files(&inputs, Path::new(output)) {
                Ok(bytes) => {
                    println!("Wrote {bytes} bytes to {output}");
                    Ok(())
                }
                Err(err) => Err(err.to_string()),
            }
        }
        ("zip", [archive, files @ ..]) if !files.is_empty() => {
            let files: Vec<PathBuf> = files.iter().map(PathBuf::from).collect();
            match zip_package(&files, Path::new(archive)) {
                Ok(()) => {
                    println!("Packaged {} files into {archive}", files.len());
                    Ok(())
                }
                Err(err) => Err(err.to_string()),
            }
        }
        _ => {
            eprint!("{USAGE}");
            return ExitCode::FAILURE;
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("{message}");
            ExitCode::FAILURE
        }
    }
}
