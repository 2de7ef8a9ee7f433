use super::support::{content, media_library, write};
use clap::Parser;
use mediadupe::cli::Cli;
use mediadupe::error::ExitCode;
use mediadupe::pipeline::{LOCK_FILE_NAME, REPORT_FILE_NAME};
use mediadupe::report::ReportDocument;
use mediadupe::run_app;
use std::fs;
use std::path::Path;
use tempfile::tempdir;

fn cli(args: &[&str]) -> Cli {
    let mut argv = vec!["mediadupe", "-q"];
    argv.extend_from_slice(args);
    Cli::try_parse_from(argv).unwrap()
}

fn s(path: &Path) -> &str {
    path.to_str().unwrap()
}

#[test]
fn test_scan_exit_codes() {
    let dir = tempdir().unwrap();
    let (library, archive) = media_library(dir.path());
    let out = dir.path().join("out");

    let code = run_app(cli(&[
        "scan",
        s(&library),
        s(&archive),
        "-p",
        "mp4",
        "-o",
        s(&out),
        "--no-cache",
    ]))
    .unwrap();
    assert_eq!(code, ExitCode::Success);
    let report = ReportDocument::load(&out.join(REPORT_FILE_NAME)).unwrap();
    assert_eq!(report.summary.groups, 2);

    let unique = dir.path().join("unique");
    write(&unique.join("a.mp4"), &content(1, 32));
    write(&unique.join("b.mp4"), &content(2, 32));
    let code = run_app(cli(&[
        "scan",
        s(&unique),
        "-o",
        s(&dir.path().join("out-unique")),
        "--no-cache",
        "--probe",
        "none",
    ]))
    .unwrap();
    assert_eq!(code, ExitCode::NoDuplicates);
}

#[test]
fn test_scan_refuses_locked_output_root() {
    let dir = tempdir().unwrap();
    let (library, _) = media_library(dir.path());
    let out = dir.path().join("out");
    fs::create_dir_all(&out).unwrap();
    fs::write(out.join(LOCK_FILE_NAME), b"{}").unwrap();

    let err = run_app(cli(&["scan", s(&library), "-o", s(&out), "--no-cache"])).unwrap_err();
    assert_eq!(ExitCode::for_error(&err), ExitCode::AlreadyRunning);
    assert!(format!("{err:#}").contains("already in progress"));

    let code = run_app(cli(&[
        "scan",
        s(&library),
        "-o",
        s(&out),
        "--no-cache",
        "--resume",
    ]))
    .unwrap();
    // library alone holds no duplicates
    assert_eq!(code, ExitCode::NoDuplicates);
    assert!(!out.join(LOCK_FILE_NAME).exists());
}

#[test]
fn test_scan_rejects_bad_criteria() {
    let dir = tempdir().unwrap();
    let err = run_app(cli(&[
        "scan",
        s(dir.path()),
        "-o",
        s(&dir.path().join("out")),
        "--no-cache",
        "--criteria",
        "longest",
    ]))
    .unwrap_err();
    assert!(format!("{err:#}").contains("did you mean 'longer'"));
    assert_eq!(ExitCode::for_error(&err), ExitCode::GeneralError);
}

#[test]
fn test_apply_and_merge_commands() {
    let dir = tempdir().unwrap();
    let (library, archive) = media_library(dir.path());
    let out = dir.path().join("out");
    run_app(cli(&[
        "scan",
        s(&library),
        s(&archive),
        "-p",
        "mp4",
        "-o",
        s(&out),
        "--no-cache",
    ]))
    .unwrap();
    let report = out.join(REPORT_FILE_NAME);

    // Merge writes a combined report and an exclusion list
    let merged = dir.path().join("merged.json");
    let skip = dir.path().join("skip.txt");
    let code = run_app(cli(&[
        "merge",
        s(&report),
        s(&report),
        "-o",
        s(&merged),
        "--exclusions",
        s(&skip),
    ]))
    .unwrap();
    assert_eq!(code, ExitCode::Success);
    assert_eq!(ReportDocument::load(&merged).unwrap().summary.groups, 2);
    assert_eq!(fs::read_to_string(&skip).unwrap().lines().count(), 4);

    let code = run_app(cli(&["apply", s(&merged), "--dry-run"])).unwrap();
    assert_eq!(code, ExitCode::Success);
    assert!(archive.join("clip.mp4").exists());

    let code = run_app(cli(&["apply", s(&merged)])).unwrap();
    assert_eq!(code, ExitCode::Success);
    assert!(!archive.join("clip.mp4").exists());
    assert!(library.join("movie.mp4").exists());
}

#[test]
fn test_apply_reports_partial_success() {
    let dir = tempdir().unwrap();
    let (library, archive) = media_library(dir.path());
    let out = dir.path().join("out");
    run_app(cli(&[
        "scan",
        s(&library),
        s(&archive),
        "-p",
        "mp4",
        "-o",
        s(&out),
        "--no-cache",
    ]))
    .unwrap();

    fs::remove_file(library.join("movie.mp4")).unwrap();
    let code = run_app(cli(&["apply", s(&out.join(REPORT_FILE_NAME))])).unwrap();
    assert_eq!(code, ExitCode::PartialSuccess);
}

#[test]
fn test_missing_report_is_an_error() {
    let dir = tempdir().unwrap();
    let err = run_app(cli(&["apply", s(&dir.path().join("nope.json"))])).unwrap_err();
    assert_eq!(ExitCode::for_error(&err), ExitCode::GeneralError);
}
