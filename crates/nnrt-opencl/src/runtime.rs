//! The OpenCL compute runtime: device selection, capability queries and
//! the cached kernel build protocol.
//!
//! One runtime is built per session from a [`RuntimeConfig`] and shared
//! by `Arc`. Building it enumerates platforms, selects a GPU, creates the
//! context and command queue, and probes device capabilities. After that
//! every capability query is a plain field read.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use nnrt_core::{CallStats, FileStorage, KvStorage, MemoryStorage};
use parking_lot::Mutex;

use crate::api::{
    ComputeApi, DeviceId, DeviceInfo, KernelWorkGroupParam, PlatformId, PlatformInfo, QueueProperties,
    RawContext, RawQueue,
};
use crate::binaries::ProgramBundle;
use crate::build_key::BuildKey;
use crate::config::RuntimeConfig;
use crate::device_info::{self, GpuType};
use crate::ffi::OpenClLibrary;
use crate::program::{BuildOrigin, Event, Kernel, Program};
use crate::sources::{KernelSource, SourceDir, SourceMap};
use crate::ClError;

/// Flags appended to every program build.
pub const DEFAULT_BUILD_FLAGS: &str = "-Werror -cl-mad-enable -cl-fast-relaxed-math";

/// Define added to the build options when bounds checking is enabled.
pub const OUT_OF_RANGE_CHECK_DEFINE: &str = "-DOUT_OF_RANGE_CHECK";

/// Counters for each tier of the build protocol.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BuildStats {
    pub memory_hits: usize,
    pub persisted_hits: usize,
    pub precompiled_hits: usize,
    pub source_builds: usize,
}

/// Context, queue and device of the runtime.
///
/// Teardown order lives here: the queue is drained and released before
/// the context, and both before the driver library the `api` keeps alive.
struct DeviceResources {
    api: Arc<dyn ComputeApi>,
    device: DeviceId,
    context: RawContext,
    queue: RawQueue,
}

impl Drop for DeviceResources {
    fn drop(&mut self) {
        if let Err(err) = self.api.finish(self.queue) {
            tracing::warn!("clFinish during teardown failed: {}", err);
        }
        self.api.release_queue(self.queue);
        self.api.release_context(self.context);
    }
}

/// Mutable build state. One lock guards all of it so that a key is
/// compiled at most once even under concurrent requests.
struct BuildState {
    programs: HashMap<String, Arc<Program>>,
    storage: Box<dyn KvStorage>,
    bundle: Option<ProgramBundle>,
    stats: BuildStats,
}

/// The selected GPU device.
#[derive(Debug, Clone)]
pub struct SelectedDevice {
    pub platform: PlatformId,
    pub platform_info: PlatformInfo,
    pub device: DeviceId,
    pub info: DeviceInfo,
}

/// Pick the GPU with the most compute units across all platforms.
///
/// Ties go to the device enumerated first (platform order, then device
/// order within the platform).
pub fn select_device(api: &dyn ComputeApi) -> Result<SelectedDevice, ClError> {
    let platforms = api.platform_ids()?;
    if platforms.is_empty() {
        tracing::error!("no OpenCL platform found");
        return Err(ClError::NoPlatform);
    }

    let mut best: Option<SelectedDevice> = None;
    for platform in platforms {
        let platform_info = api.platform_info(platform)?;
        for device in api.gpu_device_ids(platform)? {
            let info = api.device_info(device)?;
            tracing::debug!(
                "found GPU '{}' ({} compute units) on '{}'",
                info.name,
                info.compute_units,
                platform_info.name
            );
            let better = best
                .as_ref()
                .map_or(true, |b| info.compute_units > b.info.compute_units);
            if better {
                best = Some(SelectedDevice {
                    platform,
                    platform_info: platform_info.clone(),
                    device,
                    info,
                });
            }
        }
    }
    best.ok_or_else(|| {
        tracing::error!("no GPU device found on any OpenCL platform");
        ClError::NoGpuDevice
    })
}

/// Builder for [`OpenClRuntime`]. Every collaborator defaults from the
/// config when not supplied.
pub struct OpenClRuntimeBuilder {
    config: RuntimeConfig,
    api: Option<Arc<dyn ComputeApi>>,
    storage: Option<Box<dyn KvStorage>>,
    sources: Option<Box<dyn KernelSource>>,
}

impl OpenClRuntimeBuilder {
    /// Use this driver instead of loading the OpenCL library.
    pub fn api(mut self, api: Arc<dyn ComputeApi>) -> Self {
        self.api = Some(api);
        self
    }

    /// Persisted kernel cache. Defaults to a [`FileStorage`] at
    /// `kernel_cache_path`, or an in-memory store.
    pub fn storage(mut self, storage: Box<dyn KvStorage>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Kernel sources. Defaults to a [`SourceDir`] at `kernel_dir`.
    pub fn sources(mut self, sources: Box<dyn KernelSource>) -> Self {
        self.sources = Some(sources);
        self
    }

    pub fn build(self) -> Result<OpenClRuntime, ClError> {
        let config = self.config;
        let api: Arc<dyn ComputeApi> = match self.api {
            Some(api) => api,
            None => Arc::new(OpenClLibrary::load(config.library_path.as_deref())?),
        };

        let mut storage: Box<dyn KvStorage> = match (self.storage, &config.kernel_cache_path) {
            (Some(storage), _) => storage,
            (None, Some(path)) => Box::new(FileStorage::new(path)),
            (None, None) => Box::new(MemoryStorage::new()),
        };
        if let Err(err) = storage.load() {
            tracing::warn!("kernel cache unavailable, starting empty: {}", err);
        }

        let sources: Box<dyn KernelSource> = match (self.sources, &config.kernel_dir) {
            (Some(sources), _) => sources,
            (None, Some(dir)) => Box::new(SourceDir::new(dir)),
            (None, None) => Box::new(SourceMap::new()),
        };

        let selected = select_device(api.as_ref())?;
        let gpu_type = device_info::classify_gpu(&selected.info.name, &selected.info.vendor);
        let opencl_version = device_info::parse_device_version(&selected.info.version);

        let context_properties =
            device_info::context_properties(gpu_type, config.perf_hint, config.priority_hint);
        let context = api.create_context(selected.device, &context_properties)?;
        let queue_properties = QueueProperties { profiling: config.profiling };
        let queue = match api.create_command_queue(context, selected.device, &queue_properties) {
            Ok(queue) => queue,
            Err(err) => {
                api.release_context(context);
                return Err(err);
            }
        };
        let resources = DeviceResources {
            api: Arc::clone(&api),
            device: selected.device,
            context,
            queue,
        };

        let bundle = config
            .precompiled_path
            .as_deref()
            .and_then(|path| ProgramBundle::load_for(path, &selected.platform_info));

        tracing::info!(
            "OpenCL runtime ready: {} ({}, OpenCL {}, {} compute units) on {}",
            selected.info.name,
            gpu_type,
            opencl_version,
            selected.info.compute_units,
            selected.platform_info.name
        );

        Ok(OpenClRuntime {
            build: Mutex::new(BuildState {
                programs: HashMap::new(),
                storage,
                bundle,
                stats: BuildStats::default(),
            }),
            sources,
            platform_info: selected.platform_info,
            device_info: selected.info,
            gpu_type,
            opencl_version,
            profiling: config.profiling,
            out_of_range_check: config.out_of_range_check,
            resources,
        })
    }
}

/// OpenCL device, context, queue and program cache of one session.
pub struct OpenClRuntime {
    build: Mutex<BuildState>,
    sources: Box<dyn KernelSource>,
    platform_info: PlatformInfo,
    device_info: DeviceInfo,
    gpu_type: GpuType,
    opencl_version: String,
    profiling: bool,
    out_of_range_check: bool,
    resources: DeviceResources,
}

impl OpenClRuntime {
    pub fn builder(config: RuntimeConfig) -> OpenClRuntimeBuilder {
        OpenClRuntimeBuilder { config, api: None, storage: None, sources: None }
    }

    /// Build with every collaborator derived from `config`.
    pub fn new(config: RuntimeConfig) -> Result<Self, ClError> {
        Self::builder(config).build()
    }

    pub fn api(&self) -> &Arc<dyn ComputeApi> {
        &self.resources.api
    }

    pub fn device(&self) -> DeviceId {
        self.resources.device
    }

    pub fn context(&self) -> RawContext {
        self.resources.context
    }

    pub fn queue(&self) -> RawQueue {
        self.resources.queue
    }

    pub fn platform_info(&self) -> &PlatformInfo {
        &self.platform_info
    }

    pub fn device_info(&self) -> &DeviceInfo {
        &self.device_info
    }

    pub fn device_global_mem_cache_size(&self) -> u64 {
        self.device_info.global_mem_cache_size
    }

    pub fn device_compute_units(&self) -> u32 {
        self.device_info.compute_units
    }

    pub fn device_max_work_group_size(&self) -> u64 {
        self.device_info.max_work_group_size
    }

    pub fn gpu_type(&self) -> GpuType {
        self.gpu_type
    }

    /// `"<major>.<minor>"` or `"unknown"`.
    pub fn opencl_version(&self) -> &str {
        &self.opencl_version
    }

    /// Adreno GPUs on OpenCL 2.0 accept global sizes that are not a
    /// multiple of the local size.
    pub fn is_non_uniform_workgroups_supported(&self) -> bool {
        self.gpu_type == GpuType::Adreno && self.opencl_version == "2.0"
    }

    pub fn is_out_of_range_check_enabled(&self) -> bool {
        self.out_of_range_check
    }

    pub fn is_profiling_enabled(&self) -> bool {
        self.profiling
    }

    pub fn kernel_max_work_group_size(&self, kernel: &Kernel) -> Result<u64, ClError> {
        self.api()
            .kernel_work_group_info(kernel.raw(), self.device(), KernelWorkGroupParam::MaxSize)
    }

    /// Hardware wave size on Adreno, the preferred work-group size
    /// multiple elsewhere.
    pub fn kernel_wave_size(&self, kernel: &Kernel) -> Result<u64, ClError> {
        let param = if self.gpu_type == GpuType::Adreno {
            KernelWorkGroupParam::WaveSizeQcom
        } else {
            KernelWorkGroupParam::PreferredMultiple
        };
        self.api().kernel_work_group_info(kernel.raw(), self.device(), param)
    }

    pub fn build_stats(&self) -> BuildStats {
        self.build.lock().stats
    }

    /// `(cache key, origin)` of every program built this session.
    pub fn built_programs(&self) -> Vec<(String, BuildOrigin)> {
        let state = self.build.lock();
        let mut programs: Vec<_> = state
            .programs
            .iter()
            .map(|(key, program)| (key.clone(), program.origin()))
            .collect();
        programs.sort_by(|a, b| a.0.cmp(&b.0));
        programs
    }

    /// Build (or fetch) `program_name` with `options` and return its
    /// `kernel_name` entry point.
    ///
    /// Tiers, in order: in-memory programs, the persisted cache, the
    /// precompiled bundle, then source. Unusable cached binaries fall
    /// through to the next tier; a source build failure is returned.
    pub fn build_kernel<S: AsRef<str>>(
        &self,
        program_name: &str,
        kernel_name: &str,
        options: &[S],
    ) -> Result<Kernel, ClError> {
        let mut all_options: Vec<&str> = options.iter().map(|o| o.as_ref()).collect();
        if self.out_of_range_check {
            all_options.push(OUT_OF_RANGE_CHECK_DEFINE);
        }
        let key = BuildKey::new(program_name, &all_options)?;
        let program = self.build_program(&key)?;

        let raw = self.api().create_kernel(program.raw(), kernel_name).map_err(|err| {
            tracing::error!("create kernel {} from {}: {}", kernel_name, key, err);
            ClError::KernelNotFound {
                program: program_name.to_string(),
                kernel: kernel_name.to_string(),
            }
        })?;
        Ok(Kernel::new(Arc::clone(self.api()), raw, kernel_name, program))
    }

    fn build_program(&self, key: &BuildKey) -> Result<Arc<Program>, ClError> {
        let cache_key = key.cache_key();
        let mut state = self.build.lock();

        if let Some(program) = state.programs.get(&cache_key) {
            let program = Arc::clone(program);
            state.stats.memory_hits += 1;
            return Ok(program);
        }

        if let Some(binary) = state.storage.get(&cache_key) {
            match self.program_from_binary(key, &binary, BuildOrigin::PersistedCache) {
                Ok(program) => {
                    tracing::debug!("program {} loaded from kernel cache", cache_key);
                    state.stats.persisted_hits += 1;
                    return Ok(Self::insert(&mut state, cache_key, program));
                }
                Err(err) => {
                    tracing::debug!("cached binary for {} unusable, falling back: {}", cache_key, err);
                }
            }
        }

        let precompiled = state
            .bundle
            .as_ref()
            .and_then(|bundle| bundle.get(&cache_key))
            .map(<[u8]>::to_vec);
        if let Some(binary) = precompiled {
            match self.program_from_binary(key, &binary, BuildOrigin::Precompiled) {
                Ok(program) => {
                    tracing::debug!("program {} loaded from precompiled bundle", cache_key);
                    state.stats.precompiled_hits += 1;
                    return Ok(Self::insert(&mut state, cache_key, program));
                }
                Err(err) => {
                    tracing::debug!("precompiled binary for {} unusable, falling back: {}", cache_key, err);
                }
            }
        }

        let program = self.program_from_source(key)?;
        match program.binary() {
            Ok(binary) => state.storage.put(&cache_key, binary),
            Err(err) => tracing::warn!("could not read back binary of {}: {}", cache_key, err),
        }
        state.stats.source_builds += 1;
        tracing::debug!("program {} compiled from source", cache_key);
        Ok(Self::insert(&mut state, cache_key, program))
    }

    fn insert(state: &mut BuildState, cache_key: String, program: Program) -> Arc<Program> {
        let program = Arc::new(program);
        state.programs.insert(cache_key, Arc::clone(&program));
        program
    }

    fn build_options(key: &BuildKey) -> String {
        let options = key.options_string();
        if options.is_empty() {
            DEFAULT_BUILD_FLAGS.to_string()
        } else {
            format!("{options} {DEFAULT_BUILD_FLAGS}")
        }
    }

    fn program_from_binary(&self, key: &BuildKey, binary: &[u8], origin: BuildOrigin) -> Result<Program, ClError> {
        let raw = self.api().create_program_with_binary(self.context(), self.device(), binary)?;
        let program = Program::new(Arc::clone(self.api()), raw, key.clone(), origin);
        self.api().build_program(raw, self.device(), &Self::build_options(key))?;
        Ok(program)
    }

    fn program_from_source(&self, key: &BuildKey) -> Result<Program, ClError> {
        let source = self.sources.source(key.program())?;
        let raw = self.api().create_program_with_source(self.context(), &source)?;
        let program = Program::new(Arc::clone(self.api()), raw, key.clone(), BuildOrigin::Source);
        match self.api().build_program(raw, self.device(), &Self::build_options(key)) {
            Ok(()) => Ok(program),
            Err(ClError::BuildFailed { log, .. }) => {
                tracing::error!("program {} failed to build: {}", key, log);
                Err(ClError::BuildFailed { program: key.program().to_string(), log })
            }
            Err(err) => Err(err),
        }
    }

    /// Write binaries of programs loaded from the precompiled bundle into
    /// the persisted cache, then flush it.
    pub fn save_built_programs(&self) -> Result<(), ClError> {
        let mut state = self.build.lock();
        let pending: Vec<(String, Arc<Program>)> = state
            .programs
            .iter()
            .filter(|(_, program)| program.origin() == BuildOrigin::Precompiled)
            .map(|(key, program)| (key.clone(), Arc::clone(program)))
            .collect();
        for (key, program) in pending {
            match program.binary() {
                Ok(binary) => state.storage.put(&key, binary),
                Err(err) => tracing::warn!("could not read back binary of {}: {}", key, err),
            }
        }
        state.storage.flush()?;
        tracing::debug!("saved {} built programs", state.programs.len());
        Ok(())
    }

    /// Enqueue `kernel` over `global` work items.
    pub fn enqueue_kernel(
        &self,
        kernel: &Kernel,
        global: &[usize],
        local: Option<&[usize]>,
    ) -> Result<Event, ClError> {
        let raw = self.api().enqueue_nd_range(self.queue(), kernel.raw(), global, local)?;
        Ok(Event::new(Arc::clone(self.api()), raw))
    }

    /// Block until every enqueued command has completed.
    pub fn finish(&self) -> Result<(), ClError> {
        self.api().finish(self.queue())
    }

    /// Timing of a completed event, in microseconds. Does not wait.
    pub fn call_stats(&self, event: &Event) -> Result<CallStats, ClError> {
        let ts = event.timestamps()?;
        Ok(CallStats {
            queued_micros: ts.queued_ns / 1000,
            submit_micros: ts.submit_ns / 1000,
            start_micros: ts.start_ns / 1000,
            end_micros: ts.end_ns / 1000,
        })
    }
}

impl fmt::Debug for OpenClRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenClRuntime")
            .field("device", &self.device_info.name)
            .field("gpu_type", &self.gpu_type)
            .field("opencl_version", &self.opencl_version)
            .field("profiling", &self.profiling)
            .finish()
    }
}

impl Drop for OpenClRuntime {
    fn drop(&mut self) {
        // Programs go before the queue and context they were built in.
        self.build.get_mut().programs.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_options() {
        let key = BuildKey::new("relu", &["-DB", "-DA"]).unwrap();
        assert_eq!(
            OpenClRuntime::build_options(&key),
            "-DA -DB -Werror -cl-mad-enable -cl-fast-relaxed-math"
        );
        let bare = BuildKey::new("relu", &[] as &[&str]).unwrap();
        assert_eq!(OpenClRuntime::build_options(&bare), DEFAULT_BUILD_FLAGS);
    }

    #[test]
    fn test_build_stats_default() {
        let stats = BuildStats::default();
        assert_eq!(stats.memory_hits + stats.persisted_hits + stats.precompiled_hits + stats.source_builds, 0);
    }
}
