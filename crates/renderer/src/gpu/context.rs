use anyhow::{Context as AnyhowContext, Result};

/// Device and queue for off-screen rendering. No surface is created; frames
/// land in a [`RenderTarget`](super::target::RenderTarget) and can be read back.
pub(crate) struct GpuContext {
    pub _instance: wgpu::Instance,
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    pub adapter_name: String,
}

/// Adapter selection knobs exposed on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AdapterPreference {
    #[default]
    LowPower,
    HighPerformance,
    /// Force the software fallback adapter, e.g. on CI machines.
    Fallback,
}

impl GpuContext {
    pub(crate) fn headless(size: [u32; 2], preference: AdapterPreference) -> Result<Self> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            flags: wgpu::InstanceFlags::default(),
            memory_budget_thresholds: wgpu::MemoryBudgetThresholds::default(),
            backend_options: wgpu::BackendOptions::default(),
        });

        let power_preference = match preference {
            AdapterPreference::HighPerformance => wgpu::PowerPreference::HighPerformance,
            AdapterPreference::LowPower | AdapterPreference::Fallback => {
                wgpu::PowerPreference::LowPower
            }
        };
        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference,
            compatible_surface: None,
            force_fallback_adapter: preference == AdapterPreference::Fallback,
        }))
        .context("failed to find a suitable GPU adapter")?;

        let info = adapter.get_info();
        let limits = adapter.limits();
        tracing::debug!(
            name = %info.name,
            backend = ?info.backend,
            device_type = ?info.device_type,
            "selected GPU adapter"
        );

        let max_dimension = limits.max_texture_dimension_2d;
        let [width, height] = size;
        if width.max(1) > max_dimension || height.max(1) > max_dimension {
            anyhow::bail!(
                "GPU max texture dimension is {max_dimension}, requested target is {width}x{height}"
            );
        }

        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("shadebox device"),
            required_features: wgpu::Features::empty(),
            required_limits: limits,
            memory_hints: wgpu::MemoryHints::MemoryUsage,
            trace: wgpu::Trace::default(),
        }))
        .context("failed to create GPU device")?;

        // Pipelines are validated inside error scopes; anything that escapes
        // one is logged instead of aborting the process.
        device.on_uncaptured_error(Box::new(|error| {
            tracing::error!(%error, "uncaptured GPU error");
        }));

        Ok(Self {
            _instance: instance,
            device,
            queue,
            adapter_name: info.name,
        })
    }

    /// Runs `build` inside a validation error scope and reports the first
    /// validation error it raised.
    pub(crate) fn validated<T>(&self, build: impl FnOnce(&wgpu::Device) -> T) -> Result<T, String> {
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let value = build(&self.device);
        match pollster::block_on(self.device.pop_error_scope()) {
            Some(error) => Err(error.to_string()),
            None => Ok(value),
        }
    }
}
