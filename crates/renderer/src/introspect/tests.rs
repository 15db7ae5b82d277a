use shadersrc::ShaderStage;

use super::*;
use crate::compiler::{ShaderCompiler, ShaderSource};
use crate::fake::{with_captured_warnings, FakeApi};
use crate::layout::{ProgramLayout, SubroutineUniformLayout, UniformLayout, VariableLayout};
use crate::program::Program;
use crate::uniforms::{Shape, UniformData};

fn transformations() -> ProgramLayout {
    let mut layout = ProgramLayout::default();
    layout.push_block(
        "Transformations",
        0,
        0,
        128,
        vec![
            UniformLayout::in_block("View_Model", GlslType::Mat4, 0, 0),
            UniformLayout::in_block("Projection", GlslType::Mat4, 0, 64),
        ],
    );
    layout
        .inputs
        .push(VariableLayout::new("v_normal", GlslType::Vec3, 0));
    layout
        .outputs
        .push(VariableLayout::new("frag_color", GlslType::Vec4, 0));
    layout
}

fn frame_block() -> ProgramLayout {
    let mut layout = ProgramLayout::default();
    layout.push_block(
        "Frame",
        0,
        1,
        16,
        vec![
            UniformLayout::in_block("Time", GlslType::Float, 0, 0),
            UniformLayout::in_block("Resolution", GlslType::Vec2, 0, 8),
        ],
    );
    layout
}

fn link_fragment(api: &mut FakeApi, compiler: &mut ShaderCompiler, text: &str) -> Program {
    let shader = compiler
        .compile(api, &ShaderSource::new(Some(ShaderStage::Fragment), text), false)
        .unwrap();
    Program::link(api, compiler.graveyard(), &[shader], true).unwrap()
}

#[test]
fn block_member_offsets_are_reflected() {
    let mut api = FakeApi::default();
    api.declare("transforms", transformations());
    let mut compiler = ShaderCompiler::new();
    let mut program = link_fragment(&mut api, &mut compiler, "// layout: transforms\nvoid main(){}");

    let block = program
        .introspector()
        .uniform_block(&api, "Transformations")
        .unwrap();
    assert_eq!(block.data_size(), 128);
    assert_eq!(block.members().len(), 2);

    let view_model = block.find("View_Model").unwrap();
    assert_eq!(view_model.offset, 0);
    assert_eq!(view_model.ty, GlslType::Mat4);
    assert_eq!(view_model.block_index, 0);
    assert_eq!(block.find("Projection").unwrap().offset, 64);
}

#[test]
fn missing_resource_logs_one_warning() {
    let mut api = FakeApi::default();
    api.declare("transforms", transformations());
    let mut compiler = ShaderCompiler::new();
    let mut program = link_fragment(&mut api, &mut compiler, "// layout: transforms\nvoid main(){}");

    let (found, logs) = with_captured_warnings(|| {
        program
            .introspector()
            .find(&api, Interface::Uniform, "NonExistent")
            .cloned()
    });
    assert!(found.is_none());
    assert_eq!(logs.matches("resource not found").count(), 1);
    assert!(logs.contains("NonExistent"));

    // The program stays usable afterwards.
    assert!(program
        .introspector()
        .get(&api, Interface::Uniform, "View_Model")
        .is_some());
}

#[test]
fn quiet_lookup_and_assign_do_not_warn() {
    let mut api = FakeApi::default();
    api.declare("frame", frame_block());
    let mut compiler = ShaderCompiler::new();
    let mut program = link_fragment(&mut api, &mut compiler, "// layout: frame\nvoid main(){}");

    let (assigned, logs) = with_captured_warnings(|| {
        let introspector = program.introspector();
        assert!(introspector.get(&api, Interface::Uniform, "Light").is_none());
        introspector.assign(&mut api, "LightPosition", [1.0f32, 2.0, 3.0])
    });
    assert!(!assigned);
    assert!(logs.is_empty(), "unexpected output: {logs}");
    assert!(api.uniform_writes().is_empty());
}

#[test]
fn interfaces_are_loaded_on_first_use() {
    let mut api = FakeApi::default();
    api.declare("transforms", transformations());
    let mut compiler = ShaderCompiler::new();
    let mut program = link_fragment(&mut api, &mut compiler, "// layout: transforms\nvoid main(){}");

    let introspector = program.introspector();
    assert!(!introspector.is_loaded(Interface::Uniform));
    introspector.get(&api, Interface::Uniform, "View_Model");
    assert!(introspector.is_loaded(Interface::Uniform));
    assert!(!introspector.is_loaded(Interface::UniformBlock));
    assert!(!introspector.is_loaded(Interface::SubroutineUniform(ShaderStage::Fragment)));

    introspector.subroutine_uniforms(&api, ShaderStage::Fragment);
    assert!(introspector.is_loaded(Interface::SubroutineUniform(ShaderStage::Fragment)));
    assert!(!introspector.is_loaded(Interface::SubroutineUniform(ShaderStage::Vertex)));
}

#[test]
fn names_are_unique_within_an_interface() {
    let mut api = FakeApi::default();
    api.declare("frame", frame_block());
    let mut compiler = ShaderCompiler::new();
    // Both layout lines pull in the same block; the link merges it by name.
    let mut program = link_fragment(
        &mut api,
        &mut compiler,
        "// layout: frame\n// layout: frame\nvoid main(){}",
    );
    let introspector = program.introspector();
    let uniforms = introspector.resources(&api, Interface::Uniform);
    let mut names: Vec<&str> = uniforms.iter().map(|r| r.name.as_str()).collect();
    names.sort_unstable();
    names.dedup();
    assert_eq!(names.len(), uniforms.len());
}

#[test]
fn duplicate_reports_keep_the_first_entry() {
    let mut first = Resource::new(0, "Time");
    first.location = 4;
    let mut second = Resource::new(1, "Time");
    second.location = 9;
    let (resources, logs) = with_captured_warnings(|| {
        InterfaceResources::from_resources(Interface::Uniform, vec![first, second])
    });
    assert_eq!(resources.get("Time").map(|r| r.location), Some(4));
    assert!(logs.contains("duplicate resource name"));
}

#[test]
fn assign_forwards_to_reflected_location() {
    let mut api = FakeApi::default();
    api.declare("frame", frame_block());
    let mut compiler = ShaderCompiler::new();
    let mut program = link_fragment(&mut api, &mut compiler, "// layout: frame\nvoid main(){}");
    let id = program.id();

    let introspector = program.introspector();
    assert!(introspector.assign(&mut api, "Time", 1.5f32));
    assert!(introspector.assign(&mut api, "Resolution", [640.0f32, 480.0]));

    let writes = api.uniform_writes();
    assert_eq!(writes.len(), 2);
    assert_eq!(writes[0].0, id);
    assert_eq!(writes[0].1, 0);
    assert_eq!(writes[0].2.data, UniformData::Float(vec![1.5]));
    assert_eq!(writes[1].1, 1);
    assert_eq!(writes[1].2.shape, Shape::Vector(2));
}

#[test]
fn subroutine_uniforms_list_compatible_functions() {
    let mut layout = ProgramLayout::default();
    let fragment = ShaderStage::Fragment.index();
    layout.subroutines[fragment] = vec!["lambert".into(), "phong".into(), "toon".into()];
    layout.subroutine_uniforms[fragment].push(SubroutineUniformLayout {
        name: "shade".into(),
        location: 0,
        array_size: 1,
        compatible: vec![0, 2],
    });
    let mut api = FakeApi::default();
    api.declare("shading", layout);
    let mut compiler = ShaderCompiler::new();
    let mut program = link_fragment(&mut api, &mut compiler, "// layout: shading\nvoid main(){}");

    let introspector = program.introspector();
    let uniforms = introspector.subroutine_uniforms(&api, ShaderStage::Fragment);
    assert_eq!(uniforms.len(), 1);
    assert_eq!(uniforms[0].name, "shade");
    assert_eq!(uniforms[0].compatible_subroutines, vec!["lambert", "toon"]);
    assert!(uniforms[0].is_referenced_by(ShaderStage::Fragment));
    assert!(introspector
        .subroutine_uniforms(&api, ShaderStage::Vertex)
        .is_empty());
}

#[test]
fn summary_serialises_every_interface() {
    let mut api = FakeApi::default();
    api.declare("transforms", transformations());
    let mut compiler = ShaderCompiler::new();
    let mut program = link_fragment(&mut api, &mut compiler, "// layout: transforms\nvoid main(){}");

    let report = program.introspector().summary(&api);
    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["uniform_blocks"][0]["name"], "Transformations");
    assert_eq!(json["uniform_blocks"][0]["data_size"], 128);
    assert_eq!(
        json["uniform_blocks"][0]["members"][0]["name"],
        "View_Model"
    );
    assert_eq!(json["uniform_blocks"][0]["members"][0]["offset"], 0);
    assert_eq!(json["inputs"][0]["type"], "vec3");
    assert_eq!(json["outputs"][0]["location"], 0);
    assert_eq!(json["uniforms"][1]["referenced_by"], serde_json::json!(["fragment"]));
    assert!(json.get("subroutine_uniforms").is_none());
}
