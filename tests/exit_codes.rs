use std::process::Command;

fn dex2class() -> String {
    std::env::var("CARGO_BIN_EXE_dex2class").unwrap_or_else(|_| {
        let mut path = std::path::PathBuf::from(env!("CARGO_MANIFEST_DIR"));
        path.push("target");
        path.push("debug");
        path.push("dex2class");
        if cfg!(windows) {
            path.set_extension("exe");
        }
        path.to_string_lossy().to_string()
    })
}

#[test]
fn dex2class_exits_non_zero_on_missing_input() {
    let temp = tempfile::tempdir().expect("temp dir");
    let output = Command::new(dex2class())
        .arg("--input")
        .arg("missing.json")
        .arg("--output")
        .arg(temp.path())
        .output()
        .expect("run dex2class");

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("input not found"), "{stderr}");
}

#[test]
fn dex2class_exits_zero_when_an_input_is_malformed() {
    let temp = tempfile::tempdir().expect("temp dir");
    let input = temp.path().join("bad.json");
    std::fs::write(&input, "{\"classes\": 3}").expect("write input");
    let output = Command::new(dex2class())
        .arg("--input")
        .arg(&input)
        .arg("--output")
        .arg(temp.path().join("out"))
        .output()
        .expect("run dex2class");

    assert!(output.status.success());
}
