use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use boxconfig::{FileKindSetting, SandboxConfig, StageSetting};
use crossbeam_channel::Receiver;
use filewatch::{FileKind, FileWatcher};
use glam::Vec3;
use renderer::{
    Camera, Light, Material, Sandbox, SandboxOptions, SceneSettings, ShaderCompiler, WgpuApi,
};
use shadersrc::{PathResolver, ShaderStage};
use tracing_subscriber::EnvFilter;

use crate::cli::RunArgs;
use crate::console::{self, ConsoleCommand, HELP};

const DEFAULT_FPS: f32 = 60.0;

pub fn run(config_path: &Path, args: RunArgs) -> Result<()> {
    let mut config = SandboxConfig::load(config_path)
        .with_context(|| format!("failed to load {}", config_path.display()))?;
    apply_overrides(&mut config, &args);
    tracing::info!(
        config = %config_path.display(),
        files = config.files.len(),
        width = config.surface.size[0],
        height = config.surface.size[1],
        poll_interval = %humantime::format_duration(config.poll_interval),
        "starting shadebox session"
    );

    let api = WgpuApi::headless(config.surface.size, args.adapter)
        .context("failed to initialise the GPU")?;
    let watcher = FileWatcher::with_interval(config.poll_interval)
        .context("failed to start the file watcher")?;
    let options = SandboxOptions {
        include_dirs: config.include_dirs.clone(),
        scene: scene_settings(&config),
        clear_color: config.surface.clear_color,
        ..SandboxOptions::default()
    };
    let mut sandbox = Sandbox::new(api, watcher, ShaderCompiler::new(), options);

    for entry in &config.files {
        if let Err(err) = sandbox.watch_file(
            &entry.path,
            entry.kind.map(file_kind),
            &entry.tag,
            entry.stage.map(shader_stage),
        ) {
            tracing::error!(path = %entry.path.display(), tag = %entry.tag, "{err}");
        }
    }

    let commands = if args.no_console {
        None
    } else {
        Some(console::spawn().context("failed to start the console thread")?)
    };

    let resolver = PathResolver::new()?;
    let fps = config.surface.fps.unwrap_or(DEFAULT_FPS);
    let frame_budget = (fps > 0.0).then(|| Duration::from_secs_f32(1.0 / fps));
    loop {
        let started = Instant::now();
        let stats = sandbox.frame();
        tracing::trace!(?stats, "frame");

        if args.frames.is_some_and(|limit| sandbox.frame_index() >= limit) {
            break;
        }
        if let Some(rx) = &commands {
            if drain_commands(&mut sandbox, &resolver, rx) == Flow::Quit {
                break;
            }
        }
        if let Some(budget) = frame_budget {
            if let Some(remaining) = budget.checked_sub(started.elapsed()) {
                thread::sleep(remaining);
            }
        }
    }

    let stats = sandbox.compiler().stats();
    tracing::info!(
        frames = sandbox.frame_index(),
        cache_hits = stats.hits,
        cache_misses = stats.misses,
        compile_failures = stats.failures,
        "session finished"
    );
    if let Some(path) = &args.snapshot {
        sandbox
            .api()
            .save_snapshot(path)
            .with_context(|| format!("failed to write snapshot {}", path.display()))?;
    }
    Ok(())
}

#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Quit,
}

fn drain_commands(
    sandbox: &mut Sandbox<WgpuApi>,
    resolver: &PathResolver,
    rx: &Receiver<ConsoleCommand>,
) -> Flow {
    while let Ok(command) = rx.try_recv() {
        if let Err(err) = handle_command(sandbox, resolver, command.clone()) {
            println!("{err:#}");
        }
        if command == ConsoleCommand::Quit {
            return Flow::Quit;
        }
    }
    Flow::Continue
}

fn handle_command(
    sandbox: &mut Sandbox<WgpuApi>,
    resolver: &PathResolver,
    command: ConsoleCommand,
) -> Result<()> {
    match command {
        ConsoleCommand::List => {
            println!("{}", serde_json::to_string_pretty(&sandbox.slot_states())?);
        }
        ConsoleCommand::Reload => {
            let failed = sandbox.reload_all();
            println!("reload finished with {failed} failure(s)");
        }
        ConsoleCommand::Rescan => {
            sandbox.watcher().poll_now();
            println!("rescanned {} watched file(s)", sandbox.watcher().len());
        }
        ConsoleCommand::Watch { path, tag, stage } => {
            let path = resolver.resolve(&path)?;
            sandbox
                .watch_file(&path, None, &tag, stage)
                .context("watch failed")?;
            println!("watching {} [{tag}]", path.display());
        }
        ConsoleCommand::Unwatch { path, tag } => {
            let path = resolver.resolve(&path)?;
            if sandbox.unwatch_file(&path, &tag) {
                println!("stopped watching {} [{tag}]", path.display());
            } else {
                println!("{} [{tag}] was not watched", path.display());
            }
        }
        ConsoleCommand::Dump { tag, stage } => match sandbox.introspection_report(&tag, stage) {
            Some(report) => println!("{}", serde_json::to_string_pretty(&report)?),
            None => println!("no linked {stage} program under tag '{tag}'"),
        },
        ConsoleCommand::Stats => {
            let stats = sandbox.compiler().stats();
            println!(
                "frame {} | cache entries {} hits {} misses {} failures {} | meshes {} | watched {}",
                sandbox.frame_index(),
                stats.entries,
                stats.hits,
                stats.misses,
                stats.failures,
                sandbox.mesh_count(),
                sandbox.watcher().len()
            );
        }
        ConsoleCommand::Snapshot(path) => {
            let path = resolver.resolve(&path)?;
            sandbox
                .api()
                .save_snapshot(&path)
                .context("snapshot failed")?;
        }
        ConsoleCommand::Help => println!("{HELP}"),
        ConsoleCommand::Quit => {}
    }
    Ok(())
}

fn apply_overrides(config: &mut SandboxConfig, args: &RunArgs) {
    if let Some(size) = args.size {
        config.surface.size = size;
    }
    if let Some(fps) = args.fps {
        config.surface.fps = Some(fps.max(0.0));
    }
    if let Some(interval) = args.poll_interval {
        config.poll_interval = interval;
    }
}

fn scene_settings(config: &SandboxConfig) -> SceneSettings {
    SceneSettings {
        camera: Camera {
            eye: Vec3::from(config.camera.eye),
            target: Vec3::from(config.camera.target),
            up: Vec3::Y,
            fov_y_degrees: config.camera.fov_degrees,
            near: config.camera.near,
            far: config.camera.far,
            orbit_speed: config.camera.orbit_speed,
        },
        light: Light {
            position: Vec3::from(config.light.position),
            color: Vec3::from(config.light.color),
        },
        material: Material {
            ambient: Vec3::from(config.material.ambient),
            diffuse: Vec3::from(config.material.diffuse),
            specular: Vec3::from(config.material.specular),
            shininess: config.material.shininess,
        },
    }
}

pub fn file_kind(setting: FileKindSetting) -> FileKind {
    match setting {
        FileKindSetting::Shader => FileKind::Shader,
        FileKindSetting::Image => FileKind::Image,
        FileKindSetting::Geometry => FileKind::Geometry,
        FileKindSetting::Dependency => FileKind::Dependency,
    }
}

pub fn shader_stage(setting: StageSetting) -> ShaderStage {
    match setting {
        StageSetting::Vertex => ShaderStage::Vertex,
        StageSetting::TessControl => ShaderStage::TessControl,
        StageSetting::TessEvaluation => ShaderStage::TessEvaluation,
        StageSetting::Geometry => ShaderStage::Geometry,
        StageSetting::Fragment => ShaderStage::Fragment,
        StageSetting::Compute => ShaderStage::Compute,
    }
}

pub fn initialise_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}
