//! Per-frame values handed to user shaders by uniform name.
//!
//! Nothing here knows which names a program declares. [`FrameUniforms::apply`]
//! offers every value to the program's introspector and only the names the
//! program actually has are written.
use std::time::Instant;

use glam::{Mat3, Mat4, Vec2, Vec3};

use crate::api::GraphicsApi;
use crate::introspect::ProgramIntrospector;

/// Snapshot of the time state supplied to the shader uniforms.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeSample {
    /// Elapsed wall-clock or simulated time in seconds.
    pub seconds: f32,
    /// Seconds since the previous sample.
    pub delta: f32,
    pub frame_index: u64,
}

/// Where frame times come from.
pub trait TimeSource {
    fn reset(&mut self);
    fn sample(&mut self) -> TimeSample;
}

/// Time source backed by the system monotonic clock.
#[derive(Debug, Clone, Copy)]
pub struct SystemTimeSource {
    origin: Instant,
    last: f32,
    frame: u64,
}

impl SystemTimeSource {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Default for SystemTimeSource {
    fn default() -> Self {
        Self {
            origin: Instant::now(),
            last: 0.0,
            frame: 0,
        }
    }
}

impl TimeSource for SystemTimeSource {
    fn reset(&mut self) {
        *self = Self::default();
    }

    fn sample(&mut self) -> TimeSample {
        let seconds = self.origin.elapsed().as_secs_f32();
        let sample = TimeSample {
            seconds,
            delta: (seconds - self.last).max(0.0),
            frame_index: self.frame,
        };
        self.last = seconds;
        self.frame = self.frame.saturating_add(1);
        sample
    }
}

/// Advances by a fixed step per frame so renders are reproducible.
#[derive(Debug, Clone, Copy)]
pub struct SteppedTimeSource {
    start: f32,
    step: f32,
    frame: u64,
}

impl SteppedTimeSource {
    pub fn new(start: f32, step: f32) -> Self {
        Self {
            start,
            step,
            frame: 0,
        }
    }
}

impl TimeSource for SteppedTimeSource {
    fn reset(&mut self) {
        self.frame = 0;
    }

    fn sample(&mut self) -> TimeSample {
        let sample = TimeSample {
            seconds: self.start + self.step * self.frame as f32,
            delta: if self.frame == 0 { 0.0 } else { self.step },
            frame_index: self.frame,
        };
        self.frame = self.frame.saturating_add(1);
        sample
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Camera {
    pub eye: Vec3,
    pub target: Vec3,
    pub up: Vec3,
    pub fov_y_degrees: f32,
    pub near: f32,
    pub far: f32,
    /// Degrees per second the eye circles the target around `up`.
    pub orbit_speed: f32,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            eye: Vec3::new(0.0, 1.0, 3.0),
            target: Vec3::ZERO,
            up: Vec3::Y,
            fov_y_degrees: 60.0,
            near: 0.1,
            far: 100.0,
            orbit_speed: 0.0,
        }
    }
}

impl Camera {
    /// Eye position after orbiting for `seconds`.
    pub fn eye_at(&self, seconds: f32) -> Vec3 {
        if self.orbit_speed == 0.0 {
            return self.eye;
        }
        let rotation = Mat3::from_axis_angle(
            self.up.try_normalize().unwrap_or(Vec3::Y),
            (self.orbit_speed * seconds).to_radians(),
        );
        self.target + rotation * (self.eye - self.target)
    }

    pub fn view(&self, seconds: f32) -> Mat4 {
        Mat4::look_at_rh(self.eye_at(seconds), self.target, self.up)
    }

    pub fn projection(&self, aspect: f32) -> Mat4 {
        Mat4::perspective_rh(
            self.fov_y_degrees.to_radians(),
            aspect.max(f32::EPSILON),
            self.near,
            self.far,
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Light {
    pub position: Vec3,
    pub color: Vec3,
}

impl Default for Light {
    fn default() -> Self {
        Self {
            position: Vec3::splat(4.0),
            color: Vec3::ONE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Material {
    pub ambient: Vec3,
    pub diffuse: Vec3,
    pub specular: Vec3,
    pub shininess: f32,
}

impl Default for Material {
    fn default() -> Self {
        Self {
            ambient: Vec3::splat(0.1),
            diffuse: Vec3::splat(0.8),
            specular: Vec3::ONE,
            shininess: 32.0,
        }
    }
}

/// Scene description the frame uniforms are derived from.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SceneSettings {
    pub camera: Camera,
    pub light: Light,
    pub material: Material,
}

/// Everything one frame offers to shaders.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameUniforms {
    pub projection: Mat4,
    pub view: Mat4,
    pub model: Mat4,
    pub camera_position: Vec3,
    pub light: Light,
    pub material: Material,
    pub time: TimeSample,
    pub resolution: Vec2,
}

impl FrameUniforms {
    pub fn new(scene: &SceneSettings, time: TimeSample, size: [u32; 2]) -> Self {
        let resolution = Vec2::new(size[0].max(1) as f32, size[1].max(1) as f32);
        let camera = &scene.camera;
        Self {
            projection: camera.projection(resolution.x / resolution.y),
            view: camera.view(time.seconds),
            model: Mat4::IDENTITY,
            camera_position: camera.eye_at(time.seconds),
            light: scene.light,
            material: scene.material,
            time,
            resolution,
        }
    }

    pub fn model_view(&self) -> Mat4 {
        self.view * self.model
    }

    pub fn normal_matrix(&self) -> Mat3 {
        Mat3::from_mat4(self.model_view()).inverse().transpose()
    }

    /// Assigns every value whose name the program declares. Returns how many
    /// were written.
    pub fn apply<A: GraphicsApi + ?Sized>(
        &self,
        introspector: &mut ProgramIntrospector,
        api: &mut A,
    ) -> usize {
        let model_view = self.model_view();
        let frame = self.time.frame_index.min(i32::MAX as u64) as i32;
        [
            introspector.assign(api, "Projection", self.projection),
            introspector.assign(api, "View", self.view),
            introspector.assign(api, "Model", self.model),
            introspector.assign(api, "ModelView", model_view),
            introspector.assign(api, "ModelViewProjection", self.projection * model_view),
            introspector.assign(api, "NormalMatrix", self.normal_matrix()),
            introspector.assign(api, "CameraPosition", self.camera_position),
            introspector.assign(api, "LightPosition", self.light.position),
            introspector.assign(api, "LightColor", self.light.color),
            introspector.assign(api, "MaterialAmbient", self.material.ambient),
            introspector.assign(api, "MaterialDiffuse", self.material.diffuse),
            introspector.assign(api, "MaterialSpecular", self.material.specular),
            introspector.assign(api, "MaterialShininess", self.material.shininess),
            introspector.assign(api, "Time", self.time.seconds),
            introspector.assign(api, "TimeDelta", self.time.delta),
            introspector.assign(api, "Resolution", self.resolution),
            introspector.assign(api, "Frame", frame),
        ]
        .into_iter()
        .filter(|written| *written)
        .count()
    }
}
