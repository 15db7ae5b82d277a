//! Shader stages the sandbox supplies itself.
use shadersrc::ShaderStage;

use crate::compiler::ShaderSource;

/// Pipeline tag whose fragment shader is drawn over a full-screen triangle
/// before any scene geometry.
pub const BACKGROUND_TAG: &str = "background";

/// Full-screen triangle vertex stage used by background pipelines. Writes
/// `v_uv` (0..1, origin bottom-left) at location 0 and needs no vertex buffers.
pub const FULLSCREEN_VERTEX_GLSL: &str = r"#version 450
layout(location = 0) out vec2 v_uv;

const vec2 positions[3] = vec2[3](
    vec2(-1.0, -3.0),
    vec2(3.0, 1.0),
    vec2(-1.0, 1.0)
);

void main() {
    vec2 pos = positions[gl_VertexIndex];
    v_uv = pos * 0.5 + vec2(0.5, 0.5);
    gl_Position = vec4(pos, 0.0, 1.0);
}
";

pub fn fullscreen_vertex() -> ShaderSource {
    ShaderSource::new(Some(ShaderStage::Vertex), FULLSCREEN_VERTEX_GLSL)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fullscreen_vertex_is_a_vertex_source() {
        let source = fullscreen_vertex();
        assert_eq!(source.stage(), Some(ShaderStage::Vertex));
        assert!(source.text().contains("gl_VertexIndex"));
        assert_eq!(source, fullscreen_vertex());
    }
}
