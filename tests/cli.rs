mod common;

use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::Result;
use assert_cmd::prelude::*;
use assert_fs::TempDir;
use common::synthetic_image;
use predicates::prelude::*;
use rstest::*;

macro_rules! cargo_run {
    ($cmd:expr, $($args:expr),*) => {
        {
            let mut cmd = Command::cargo_bin($cmd)?;
            $(cmd.arg($args);)*
            cmd.assert()
        }
    };
}

/// 生成测试图库，返回图片的绝对路径
fn dataset(dir: &Path) -> Result<Vec<PathBuf>> {
    let sub = dir.join("nested");
    std::fs::create_dir_all(&sub)?;
    let paths = [dir.join("a.png"), dir.join("b.PNG"), sub.join("c.png")];
    for (seed, path) in paths.iter().enumerate() {
        synthetic_image(seed as u32 + 1).save_with_format(path, image::ImageFormat::Png)?;
    }
    std::fs::write(dir.join("notes.txt"), "not an image")?;
    std::fs::write(dir.join("broken.png"), "not a png either")?;
    let paths = paths.iter().map(|p| p.canonicalize()).collect::<Result<Vec<_>, _>>()?;
    Ok(paths)
}

#[rstest]
#[case::single_worker("-j1")]
#[case::multi_worker("-j4")]
fn scan_then_similar(#[case] workers: &str) -> Result<()> {
    let conf_dir = TempDir::new()?;
    let data_dir = TempDir::new()?;
    let paths = dataset(data_dir.path())?;

    cargo_run!("imsimilar", "-c", conf_dir.path(), "scan", data_dir.path(), workers).success();

    cargo_run!("imsimilar", "-c", conf_dir.path(), "similar", &paths[0])
        .success()
        .stdout(predicate::str::contains(paths[1].to_str().unwrap()))
        .stdout(predicate::str::contains(paths[2].to_str().unwrap()))
        .stdout(predicate::str::contains(paths[0].to_str().unwrap()).not());

    Ok(())
}

#[test]
fn similar_json_output() -> Result<()> {
    let conf_dir = TempDir::new()?;
    let data_dir = TempDir::new()?;
    let paths = dataset(data_dir.path())?;

    cargo_run!("imsimilar", "-c", conf_dir.path(), "scan", data_dir.path(), "--warm-thumbnails")
        .success();

    let output = Command::cargo_bin("imsimilar")?
        .arg("-c")
        .arg(conf_dir.path())
        .arg("similar")
        .arg(&paths[2])
        .args(["--output-format", "json"])
        .output()?;
    assert!(output.status.success());
    let result: Vec<(f64, String)> = serde_json::from_slice(&output.stdout)?;
    // broken.png 解码失败，不会出现在结果中
    assert_eq!(result.len(), 2);
    assert!(result.windows(2).all(|w| w[0].0 <= w[1].0));
    assert!(result.iter().any(|(_, p)| p == paths[0].to_str().unwrap()));
    assert!(result.iter().any(|(_, p)| p == paths[1].to_str().unwrap()));

    Ok(())
}

#[test]
fn rescan_keeps_ids() -> Result<()> {
    let conf_dir = TempDir::new()?;
    let data_dir = TempDir::new()?;
    let paths = dataset(data_dir.path())?;

    cargo_run!("imsimilar", "-c", conf_dir.path(), "scan", data_dir.path()).success();
    cargo_run!("imsimilar", "-c", conf_dir.path(), "scan", data_dir.path()).success();

    let catalog = imsimilar::Catalog::open(conf_dir.path().join("catalog"))?;
    assert_eq!(catalog.len()?, 4);
    for path in &paths {
        assert!(catalog.find(path)?.is_some());
    }
    Ok(())
}

#[test]
fn similar_unknown_image() -> Result<()> {
    let conf_dir = TempDir::new()?;
    let data_dir = TempDir::new()?;
    let paths = dataset(data_dir.path())?;

    cargo_run!("imsimilar", "-c", conf_dir.path(), "similar", &paths[0])
        .failure()
        .stderr(predicate::str::contains("图片尚未扫描"));
    Ok(())
}
