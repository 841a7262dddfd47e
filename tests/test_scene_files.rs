use std::collections::BTreeMap;
use std::path::PathBuf;

use adtoon::config::{ImageSettings, setup_logging};
use adtoon::error::AdtoonError;
use adtoon::report::{DetailStatus, GenerationReport};
use adtoon::scenes::{Scene, SceneIndex, SceneSet, SceneSetError};
use adtoon::sheets::{col_num_to_letter, letter_to_col_num};
use chrono::Local;

fn scene_map(count: usize) -> BTreeMap<String, Scene> {
    (1..=count)
        .map(|n| {
            (
                format!("scene_{n}"),
                Scene {
                    script: format!("대사 {n}"),
                    main_keyword: format!("키워드{n}"),
                },
            )
        })
        .collect()
}

#[tokio::test]
async fn scene_file_round_trips_through_disk() {
    let _ = setup_logging(true);
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("nested").join("scenes_20250101_000000.json");

    let scenes = SceneSet::validate(scene_map(18)).expect("valid");
    scenes.save(&path).await.expect("save");

    let raw: serde_json::Value =
        serde_json::from_slice(&std::fs::read(&path).expect("read")).expect("json");
    assert_eq!(raw["scenes"]["scene_18"]["main_keyword"], "키워드18");
    // non-ASCII is written as-is
    assert!(std::fs::read_to_string(&path).expect("read").contains("대사 1"));

    let loaded = SceneSet::load(&path).await.expect("load");
    assert_eq!(loaded, scenes);
    let first = SceneIndex::new(1).expect("index");
    assert_eq!(loaded.get(first).script, "대사 1");
}

#[tokio::test]
async fn hand_edited_scene_file_with_a_gap_is_rejected() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("broken.json");

    let mut map = scene_map(18);
    let seven = map.remove("scene_7").expect("scene 7");
    map.insert("scene_19".to_string(), seven);
    let document = serde_json::json!({ "scenes": map });
    std::fs::write(&path, serde_json::to_vec(&document).expect("encode")).expect("write");

    match SceneSet::load(&path).await {
        Err(AdtoonError::Validation(SceneSetError::MissingScene(key))) => {
            assert_eq!(key, "scene_7");
        }
        other => panic!("expected a missing scene, got {other:?}"),
    }
}

#[tokio::test]
async fn report_lands_next_to_images() {
    let dir = tempfile::tempdir().expect("tempdir");
    let entries = (1..=18).map(|index| {
        let result = (index != 4).then(|| PathBuf::from(format!("out/scene_{index}.png")));
        (index, format!("prompt {index}"), result)
    });
    let report = GenerationReport::new(&ImageSettings::default(), Local::now(), entries);
    let path = report.save(dir.path()).await.expect("save");

    assert_eq!(path, dir.path().join("generation_report.json"));
    let loaded: GenerationReport =
        serde_json::from_slice(&std::fs::read(&path).expect("read")).expect("parse");
    assert_eq!(loaded.summary.total, 18);
    assert_eq!(loaded.summary.failed, 1);
    assert_eq!(loaded.details[3].status, DetailStatus::Failed);
    assert_eq!(loaded.generated_files().len(), 17);
}

#[test]
fn column_letters_round_trip() {
    assert_eq!(col_num_to_letter(1), "A");
    assert_eq!(col_num_to_letter(26), "Z");
    assert_eq!(col_num_to_letter(27), "AA");
    assert_eq!(col_num_to_letter(52), "AZ");
    assert_eq!(col_num_to_letter(53), "BA");
    for n in [1, 25, 26, 27, 700, 16_384] {
        assert_eq!(letter_to_col_num(&col_num_to_letter(n)), Some(n));
    }
}
