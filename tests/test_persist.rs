//! Integration tests for artifact saving.

mod common;

use dddetail::persist::next_filename;
use dddetail::{ArtifactSink, DirectorySink, SaveOptions};

use common::*;

fn options_in(dir: &std::path::Path) -> SaveOptions {
    SaveOptions {
        save_previews: true,
        previews_dir: dir.join("previews"),
        save_masks: true,
        masks_dir: dir.join("masks"),
        save_samples: true,
        samples_dir: dir.join("samples"),
        samples_format: "png".to_string(),
        params_path: Some(dir.join("params.txt")),
    }
}

fn files_in(dir: &std::path::Path) -> anyhow::Result<Vec<String>> {
    let mut names = std::fs::read_dir(dir)?
        .map(|e| Ok(e?.file_name().to_string_lossy().into_owned()))
        .collect::<anyhow::Result<Vec<_>>>()?;
    names.sort();
    Ok(names)
}

#[test]
fn test_directory_sink_writes_numbered_files() -> anyhow::Result<()> {
    let dir = tempfile::TempDir::new()?;
    let mut sink = DirectorySink::new(options_in(dir.path()));

    sink.save_preview(&tagged_image(0), 42, "a portrait, detailed")?;
    sink.save_mask(&rect_mask(0, 0, 3, 3), 42, "a portrait, detailed")?;
    sink.save_mask(&rect_mask(5, 5, 8, 8), 42, "a portrait, detailed")?;
    sink.save_sample(&tagged_image(1), 42, "", "Steps: 20, Seed: 42")?;
    sink.write_params("Steps: 20, Seed: 42")?;

    assert_eq!(files_in(&dir.path().join("previews"))?, vec!["00000-42-a_portrait_detailed.png"]);
    assert_eq!(
        files_in(&dir.path().join("masks"))?,
        vec!["00000-42-a_portrait_detailed.png", "00001-42-a_portrait_detailed.png"]
    );
    assert_eq!(files_in(&dir.path().join("samples"))?, vec!["00000-42.png", "00000-42.txt"]);
    assert_eq!(
        std::fs::read_to_string(dir.path().join("samples/00000-42.txt"))?,
        "Steps: 20, Seed: 42"
    );
    assert_eq!(std::fs::read_to_string(dir.path().join("params.txt"))?, "Steps: 20, Seed: 42");

    let mask = image::open(dir.path().join("masks/00000-42-a_portrait_detailed.png"))?.to_luma8();
    assert_eq!(mask, rect_mask(0, 0, 3, 3));
    Ok(())
}

#[test]
fn test_directory_sink_honours_switches() -> anyhow::Result<()> {
    let dir = tempfile::TempDir::new()?;
    let options = SaveOptions {
        save_previews: false,
        save_masks: false,
        save_samples: false,
        params_path: None,
        ..options_in(dir.path())
    };
    let mut sink = DirectorySink::new(options);

    sink.save_preview(&tagged_image(0), 1, "x")?;
    sink.save_mask(&rect_mask(0, 0, 3, 3), 1, "x")?;
    sink.save_sample(&tagged_image(0), 1, "x", "info")?;
    sink.write_params("info")?;

    assert!(files_in(dir.path())?.is_empty());
    Ok(())
}

#[test]
fn test_next_filename_truncates_long_prompts() -> anyhow::Result<()> {
    let dir = tempfile::TempDir::new()?;
    let prompt = "word ".repeat(30);
    let name = next_filename(dir.path(), 7, &prompt, "png")?;
    let slug = name.trim_start_matches("00000-7-").trim_end_matches(".png");
    assert_eq!(slug.len(), 48);
    assert!(slug.starts_with("word_word"));
    Ok(())
}
