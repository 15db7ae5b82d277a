use std::fs;
use std::path::Path;
use std::process::{Command, Output};

use tempfile::TempDir;

const VERTEX: &str = r"#version 450
layout(location = 0) in vec3 position;
layout(location = 0) out vec2 v_uv;
void main() {
    v_uv = position.xy * 0.5 + 0.5;
    gl_Position = vec4(position, 1.0);
}
";

const FRAGMENT: &str = r#"#version 450
#include "palette.glsl"
layout(location = 0) in vec2 v_uv;
layout(location = 0) out vec4 frag_color;
layout(set = 0, binding = 0) uniform Frame {
    float Time;
};
void main() {
    frag_color = vec4(palette(v_uv.x + Time), 1.0);
}
"#;

const PALETTE: &str = r"vec3 palette(float t) {
    return 0.5 + 0.5 * cos(6.28318 * (t + vec3(0.0, 0.33, 0.67)));
}
";

const SESSION: &str = r#"version = 1
poll_interval = "100ms"
include_dirs = ["include"]

[[files]]
path = "shaders/scene.vert"
tag = "scene"

[[files]]
path = "shaders/scene.frag"
tag = "scene"

[[files]]
path = "include/palette.glsl"
tag = "scene"
"#;

fn write(root: &Path, relative: &str, contents: &str) {
    let path = root.join(relative);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, contents).unwrap();
}

fn session(root: &Path) {
    write(root, "shadebox.toml", SESSION);
    write(root, "shaders/scene.vert", VERTEX);
    write(root, "shaders/scene.frag", FRAGMENT);
    write(root, "include/palette.glsl", PALETTE);
}

fn check(root: &Path) -> Output {
    Command::new(env!("CARGO_BIN_EXE_shadebox"))
        .arg(root.join("shadebox.toml"))
        .arg("--check")
        .env("RUST_LOG", "warn")
        .output()
        .expect("failed to run shadebox --check")
}

#[test]
fn check_accepts_a_valid_session() {
    let root = TempDir::new().unwrap();
    session(root.path());

    let output = check(root.path());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(output.status.success(), "{stdout}");
    assert!(stdout.contains("all shaders ok"), "{stdout}");
    assert!(stdout.contains("scene.frag"), "{stdout}");
}

#[test]
fn check_reports_compile_errors() {
    let root = TempDir::new().unwrap();
    session(root.path());
    write(
        root.path(),
        "shaders/scene.frag",
        "#version 450\nlayout(location = 0) out vec4 c;\nvoid main() { c = undefined_thing; }\n",
    );

    let output = check(root.path());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(!output.status.success());
    assert!(stdout.contains("FAIL"), "{stdout}");
}

#[test]
fn check_reports_missing_includes() {
    let root = TempDir::new().unwrap();
    session(root.path());
    fs::remove_file(root.path().join("include/palette.glsl")).unwrap();

    let output = check(root.path());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(!output.status.success());
    assert!(stdout.contains("palette.glsl"), "{stdout}");
}

#[test]
fn check_reports_stage_interface_mismatch() {
    let root = TempDir::new().unwrap();
    session(root.path());
    write(
        root.path(),
        "shaders/scene.frag",
        "#version 450\nlayout(location = 0) in vec3 v_uv;\nlayout(location = 0) out vec4 c;\nvoid main() { c = vec4(v_uv, 1.0); }\n",
    );

    let output = check(root.path());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(!output.status.success());
    assert!(stdout.contains("FAIL link [scene]"), "{stdout}");
}

#[test]
fn invalid_config_is_an_error() {
    let root = TempDir::new().unwrap();
    write(root.path(), "shadebox.toml", "version = 7\n");

    let output = check(root.path());
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("unsupported config version"), "{stderr}");
}
