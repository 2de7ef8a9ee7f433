use super::support::{media_config, media_library};
use mediadupe::duplicates::Method;
use mediadupe::pipeline::Pipeline;
use mediadupe::report::{ReportDocument, ReportError};
use mediadupe::scanner::SidecarProbe;
use std::fs;
use std::sync::Arc;
use tempfile::tempdir;

#[test]
fn test_report_json_layout() {
    let dir = tempdir().unwrap();
    let (library, archive) = media_library(dir.path());

    let outcome = Pipeline::new(media_config(&dir.path().join("out")))
        .with_probe(Arc::new(SidecarProbe))
        .run(&[library, archive])
        .unwrap();
    let path = outcome.report_path.unwrap();
    let json: serde_json::Value = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();

    assert_eq!(json["summary"]["groups"], 2);
    assert_eq!(json["summary"]["losers"], 2);
    assert_eq!(json["summary"]["by_method"]["hash"], 1);
    assert_eq!(json["summary"]["by_method"]["audio_subset"], 1);

    let groups = json["groups"].as_object().unwrap();
    assert_eq!(groups.len(), 2);
    for (id, group) in groups {
        assert_eq!(id.len(), 16);
        assert!(group["keep"].is_string());
        assert_eq!(group["losers"].as_array().unwrap().len(), 1);
    }
    let clip = groups
        .values()
        .find(|g| g["method"] == "audio_subset")
        .unwrap();
    let edge = &clip["evidence"]["edges"][0];
    assert_eq!(edge["score"]["detector"], "audio_subset");
    assert!(edge["score"]["final"].as_f64().unwrap() >= 0.75);
    assert!(edge["alignment"].is_object());
}

#[test]
fn test_group_ids_stable_across_runs() {
    let dir = tempdir().unwrap();
    let (library, archive) = media_library(dir.path());
    let roots = vec![library, archive];

    let first = Pipeline::new(media_config(&dir.path().join("a")))
        .with_probe(Arc::new(SidecarProbe))
        .run(&roots)
        .unwrap()
        .report
        .unwrap();
    let second = Pipeline::new(media_config(&dir.path().join("b")))
        .with_probe(Arc::new(SidecarProbe))
        .run(&roots)
        .unwrap()
        .report
        .unwrap();

    let first_ids: Vec<_> = first.groups.keys().collect();
    let second_ids: Vec<_> = second.groups.keys().collect();
    assert_eq!(first_ids, second_ids);

    let merged = ReportDocument::merge([first, second]);
    assert_eq!(merged.summary.groups, 2);
    assert_eq!(merged.summary.by_method.get(&Method::AudioSubset), Some(&1));
}

#[test]
fn test_load_rejects_malformed_report() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("report.json");
    fs::write(&path, "{\"summary\": ").unwrap();

    let err = ReportDocument::load(&path).unwrap_err();
    assert!(matches!(err, ReportError::Parse { .. }));
}
