use std::collections::BTreeMap;
use std::path::Path;
use std::process::ExitCode;

use anyhow::{Context, Result};
use boxconfig::SandboxConfig;
use filewatch::FileKind;
use renderer::{check_interface, check_shader, ProgramLayout};
use shadersrc::{ShaderStage, SourceLoader};

use crate::run::{file_kind, shader_stage};

/// Loads, parses and reflects every shader the session lists, then links the
/// stages of each tag. Nothing touches a GPU.
pub fn run_check(config_path: &Path) -> Result<ExitCode> {
    let config = SandboxConfig::load(config_path)
        .with_context(|| format!("failed to load {}", config_path.display()))?;
    let loader = SourceLoader::new(config.include_dirs.clone());

    let mut failures = 0usize;
    let mut per_tag: BTreeMap<&str, BTreeMap<ShaderStage, ProgramLayout>> = BTreeMap::new();
    for entry in &config.files {
        let kind = entry
            .kind
            .map(file_kind)
            .or_else(|| FileKind::infer(&entry.path));
        if kind != Some(FileKind::Shader) {
            continue;
        }
        let loaded = match loader.load(&entry.path, entry.stage.map(shader_stage)) {
            Ok(loaded) => loaded,
            Err(err) => {
                failures += 1;
                println!("FAIL {} [{}]: {err}", entry.path.display(), entry.tag);
                continue;
            }
        };
        let Some(stage) = loaded.stage else {
            failures += 1;
            println!(
                "FAIL {} [{}]: cannot tell the shader stage; set `stage` in the config",
                entry.path.display(),
                entry.tag
            );
            continue;
        };
        match check_shader(stage, &loaded.text) {
            Ok(layout) => {
                println!(
                    "ok   {} [{}] {stage}: {} uniforms, {} blocks, {} inputs, {} outputs",
                    entry.path.display(),
                    entry.tag,
                    layout.uniforms.len(),
                    layout.blocks.len(),
                    layout.inputs.len(),
                    layout.outputs.len()
                );
                per_tag.entry(&entry.tag).or_default().insert(stage, layout);
            }
            Err(log) => {
                failures += 1;
                println!("FAIL {} [{}] {stage}:", entry.path.display(), entry.tag);
                for line in log.lines() {
                    println!("     {line}");
                }
            }
        }
    }

    for (tag, stages) in &per_tag {
        if let Err(err) = link_tag(stages) {
            failures += 1;
            println!("FAIL link [{tag}]: {err}");
        }
    }

    if failures > 0 {
        println!("{failures} problem(s) found");
        Ok(ExitCode::FAILURE)
    } else {
        println!("all shaders ok");
        Ok(ExitCode::SUCCESS)
    }
}

fn link_tag(stages: &BTreeMap<ShaderStage, ProgramLayout>) -> Result<(), String> {
    let ordered: Vec<(ShaderStage, &ProgramLayout)> =
        stages.iter().map(|(stage, layout)| (*stage, layout)).collect();
    for pair in ordered.windows(2) {
        check_interface(pair[0].1, pair[1].1)?;
    }
    ProgramLayout::link(&ordered).map(|_| ())
}
