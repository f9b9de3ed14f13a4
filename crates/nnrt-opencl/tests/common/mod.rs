//! Recording `ComputeApi` and counting `KvStorage` shared by the
//! integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::ffi::c_void;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use nnrt_core::{CoreError, KvStorage};
use nnrt_opencl::api::{
    ContextProperties, DeviceId, ImageChannelType, KernelWorkGroupParam, MappedImage, PlatformId, QueueProperties,
    RawContext, RawEvent, RawKernel, RawMem, RawProgram, RawQueue,
};
use nnrt_opencl::device_info::{CL_CONTEXT_PERF_HINT_QCOM, CL_CONTEXT_PRIORITY_HINT_QCOM};
use nnrt_opencl::{
    ClError, ComputeApi, DeviceInfo, EventTimestamps, KernelArg, OpenClRuntime, PlatformInfo,
    RuntimeConfig, SourceMap,
};

pub const BINARY_MAGIC: &[u8] = b"BIN:";

pub const ACTIVATION_SRC: &str =
    "__kernel void relu(__global float* x) {}\n__kernel void sigmoid(__global float* x) {}\n";

pub fn sources() -> SourceMap {
    SourceMap::new()
        .with_program("activation", ACTIVATION_SRC)
        .with_program("pooling", "__kernel void max_pool(__global float* x) {}\n")
        .with_program("broken", "#error forced failure\n__kernel void nope() {}\n")
}

pub fn binary_of(source: &str) -> Vec<u8> {
    let mut binary = BINARY_MAGIC.to_vec();
    binary.extend_from_slice(source.as_bytes());
    binary
}

#[derive(Debug, Clone)]
pub struct MockDevice {
    pub name: &'static str,
    pub vendor: &'static str,
    pub version: &'static str,
    pub compute_units: u32,
}

impl MockDevice {
    pub fn adreno(compute_units: u32) -> Self {
        Self {
            name: "QUALCOMM Adreno(TM)",
            vendor: "QUALCOMM",
            version: "OpenCL 2.0 Adreno(TM) 640",
            compute_units,
        }
    }

    pub fn mali(compute_units: u32) -> Self {
        Self {
            name: "Mali-G78",
            vendor: "ARM",
            version: "OpenCL 2.1 v1.r32p1",
            compute_units,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MockPlatform {
    pub name: &'static str,
    pub devices: Vec<MockDevice>,
}

struct MockProgram {
    source: String,
    from_binary: bool,
}

struct MockMem {
    data: Box<[u8]>,
    row_pitch: usize,
}

/// Call counts observed by the mock.
#[derive(Default)]
pub struct Counters {
    pub source_compiles: AtomicUsize,
    pub binary_builds: AtomicUsize,
    pub kernels_created: AtomicUsize,
    pub enqueues: AtomicUsize,
    pub finishes: AtomicUsize,
    pub unmaps: AtomicUsize,
}

impl Counters {
    pub fn get(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

/// In-process stand-in for an OpenCL driver.
///
/// Program binaries are `BIN:` followed by the program source; anything
/// else is rejected as `CL_INVALID_BINARY`. Sources containing `#error`
/// fail to build.
pub struct MockApi {
    platforms: Vec<MockPlatform>,
    pub counters: Counters,
    next_handle: AtomicUsize,
    programs: Mutex<HashMap<usize, MockProgram>>,
    mems: Mutex<HashMap<usize, MockMem>>,
    live: Mutex<HashMap<usize, &'static str>>,
    pub releases: Mutex<Vec<&'static str>>,
    pub context_properties: Mutex<Vec<ContextProperties>>,
    pub queue_properties: Mutex<Vec<QueueProperties>>,
    pub build_options: Mutex<Vec<String>>,
    pub timestamps: Mutex<EventTimestamps>,
}

impl MockApi {
    pub fn new(platforms: Vec<MockPlatform>) -> Self {
        Self {
            platforms,
            counters: Counters::default(),
            next_handle: AtomicUsize::new(0x10_000),
            programs: Mutex::new(HashMap::new()),
            mems: Mutex::new(HashMap::new()),
            live: Mutex::new(HashMap::new()),
            releases: Mutex::new(Vec::new()),
            context_properties: Mutex::new(Vec::new()),
            queue_properties: Mutex::new(Vec::new()),
            build_options: Mutex::new(Vec::new()),
            timestamps: Mutex::new(EventTimestamps::default()),
        }
    }

    pub fn single(device: MockDevice) -> Self {
        Self::new(vec![MockPlatform { name: "Mock Platform", devices: vec![device] }])
    }

    pub fn adreno() -> Arc<Self> {
        Arc::new(Self::single(MockDevice::adreno(2)))
    }

    pub fn source_compiles(&self) -> usize {
        Counters::get(&self.counters.source_compiles)
    }

    pub fn binary_builds(&self) -> usize {
        Counters::get(&self.counters.binary_builds)
    }

    /// Native objects created and not yet released.
    pub fn live_objects(&self) -> usize {
        self.live.lock().len()
    }

    fn handle(&self, kind: &'static str) -> usize {
        let handle = self.next_handle.fetch_add(16, Ordering::SeqCst);
        self.live.lock().insert(handle, kind);
        handle
    }

    fn release(&self, handle: usize) {
        if let Some(kind) = self.live.lock().remove(&handle) {
            self.releases.lock().push(kind);
        }
    }

    fn locate(&self, device: DeviceId) -> Result<&MockDevice, ClError> {
        let p = device.0 / 1000;
        let d = device.0 % 1000;
        self.platforms
            .get(p.wrapping_sub(1))
            .and_then(|platform| platform.devices.get(d))
            .ok_or(ClError::Api { op: "clGetDeviceInfo", code: -33 })
    }

    fn alloc_mem(&self, bytes: usize, row_pitch: usize) -> RawMem {
        let handle = self.handle("mem");
        self.mems.lock().insert(handle, MockMem { data: vec![0u8; bytes].into_boxed_slice(), row_pitch });
        RawMem(handle)
    }
}

impl ComputeApi for MockApi {
    fn platform_ids(&self) -> Result<Vec<PlatformId>, ClError> {
        Ok((1..=self.platforms.len()).map(PlatformId).collect())
    }

    fn platform_info(&self, platform: PlatformId) -> Result<PlatformInfo, ClError> {
        let p = &self.platforms[platform.0 - 1];
        Ok(PlatformInfo {
            name: p.name.to_string(),
            vendor: "Mock Vendor".to_string(),
            profile: "FULL_PROFILE".to_string(),
            version: "OpenCL 2.0 mock".to_string(),
        })
    }

    fn gpu_device_ids(&self, platform: PlatformId) -> Result<Vec<DeviceId>, ClError> {
        let p = &self.platforms[platform.0 - 1];
        Ok((0..p.devices.len()).map(|d| DeviceId(platform.0 * 1000 + d)).collect())
    }

    fn device_info(&self, device: DeviceId) -> Result<DeviceInfo, ClError> {
        let d = self.locate(device)?;
        Ok(DeviceInfo {
            name: d.name.to_string(),
            vendor: d.vendor.to_string(),
            version: d.version.to_string(),
            global_mem_cache_size: 128 * 1024,
            compute_units: d.compute_units,
            max_work_group_size: 1024,
        })
    }

    fn create_context(&self, device: DeviceId, properties: &ContextProperties) -> Result<RawContext, ClError> {
        self.locate(device)?;
        // Drivers reject keys and values outside the extensions they expose.
        for &(key, value) in &properties.hints {
            let known = match key {
                CL_CONTEXT_PERF_HINT_QCOM => (0x40C3..=0x40C5).contains(&value),
                CL_CONTEXT_PRIORITY_HINT_QCOM => (0x40CA..=0x40CC).contains(&value),
                _ => false,
            };
            if !known {
                return Err(ClError::Api { op: "clCreateContext", code: -30 });
            }
        }
        self.context_properties.lock().push(properties.clone());
        Ok(RawContext(self.handle("context")))
    }

    fn create_command_queue(
        &self,
        _context: RawContext,
        _device: DeviceId,
        properties: &QueueProperties,
    ) -> Result<RawQueue, ClError> {
        self.queue_properties.lock().push(*properties);
        Ok(RawQueue(self.handle("queue")))
    }

    fn finish(&self, _queue: RawQueue) -> Result<(), ClError> {
        self.counters.finishes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn create_program_with_source(&self, _context: RawContext, source: &str) -> Result<RawProgram, ClError> {
        let handle = self.handle("program");
        self.programs
            .lock()
            .insert(handle, MockProgram { source: source.to_string(), from_binary: false });
        Ok(RawProgram(handle))
    }

    fn create_program_with_binary(
        &self,
        _context: RawContext,
        _device: DeviceId,
        binary: &[u8],
    ) -> Result<RawProgram, ClError> {
        let source = binary
            .strip_prefix(BINARY_MAGIC)
            .and_then(|rest| std::str::from_utf8(rest).ok())
            .ok_or(ClError::Api { op: "clCreateProgramWithBinary", code: -42 })?;
        let handle = self.handle("program");
        self.programs
            .lock()
            .insert(handle, MockProgram { source: source.to_string(), from_binary: true });
        Ok(RawProgram(handle))
    }

    fn build_program(&self, program: RawProgram, _device: DeviceId, options: &str) -> Result<(), ClError> {
        self.build_options.lock().push(options.to_string());
        let programs = self.programs.lock();
        let p = programs
            .get(&program.0)
            .ok_or(ClError::Api { op: "clBuildProgram", code: -44 })?;
        if p.from_binary {
            self.counters.binary_builds.fetch_add(1, Ordering::SeqCst);
        } else {
            self.counters.source_compiles.fetch_add(1, Ordering::SeqCst);
        }
        if p.source.contains("#error") {
            return Err(ClError::BuildFailed { program: String::new(), log: "error: forced failure".into() });
        }
        Ok(())
    }

    fn program_binary(&self, program: RawProgram) -> Result<Vec<u8>, ClError> {
        let programs = self.programs.lock();
        let p = programs
            .get(&program.0)
            .ok_or(ClError::Api { op: "clGetProgramInfo", code: -44 })?;
        Ok(binary_of(&p.source))
    }

    fn create_kernel(&self, program: RawProgram, name: &str) -> Result<RawKernel, ClError> {
        let found = self
            .programs
            .lock()
            .get(&program.0)
            .is_some_and(|p| p.source.contains(&format!("void {name}(")));
        if !found {
            return Err(ClError::Api { op: "clCreateKernel", code: -46 });
        }
        self.counters.kernels_created.fetch_add(1, Ordering::SeqCst);
        Ok(RawKernel(self.handle("kernel")))
    }

    fn kernel_work_group_info(
        &self,
        _kernel: RawKernel,
        _device: DeviceId,
        param: KernelWorkGroupParam,
    ) -> Result<u64, ClError> {
        Ok(match param {
            KernelWorkGroupParam::MaxSize => 256,
            KernelWorkGroupParam::PreferredMultiple => 32,
            KernelWorkGroupParam::WaveSizeQcom => 64,
        })
    }

    fn set_kernel_arg(&self, _kernel: RawKernel, _index: u32, _arg: KernelArg<'_>) -> Result<(), ClError> {
        Ok(())
    }

    fn enqueue_nd_range(
        &self,
        _queue: RawQueue,
        _kernel: RawKernel,
        _global: &[usize],
        _local: Option<&[usize]>,
    ) -> Result<RawEvent, ClError> {
        self.counters.enqueues.fetch_add(1, Ordering::SeqCst);
        Ok(RawEvent(self.handle("event")))
    }

    fn wait_for_event(&self, _event: RawEvent) -> Result<(), ClError> {
        Ok(())
    }

    fn event_timestamps(&self, _event: RawEvent) -> Result<EventTimestamps, ClError> {
        Ok(*self.timestamps.lock())
    }

    fn create_buffer(&self, _context: RawContext, nbytes: usize) -> Result<RawMem, ClError> {
        Ok(self.alloc_mem(nbytes, 0))
    }

    fn create_image_2d(
        &self,
        _context: RawContext,
        channel_type: ImageChannelType,
        width: usize,
        height: usize,
    ) -> Result<RawMem, ClError> {
        let pixel = match channel_type {
            ImageChannelType::Float => 16,
            ImageChannelType::HalfFloat => 8,
        };
        Ok(self.alloc_mem(width * height * pixel, width * pixel))
    }

    fn map_buffer(
        &self,
        _queue: RawQueue,
        mem: RawMem,
        offset: usize,
        _nbytes: usize,
    ) -> Result<NonNull<c_void>, ClError> {
        let mut mems = self.mems.lock();
        let m = mems.get_mut(&mem.0).ok_or(ClError::Api { op: "clEnqueueMapBuffer", code: -38 })?;
        let ptr = unsafe { m.data.as_mut_ptr().add(offset) } as *mut c_void;
        NonNull::new(ptr).ok_or(ClError::Api { op: "clEnqueueMapBuffer", code: -12 })
    }

    fn map_image(&self, _queue: RawQueue, mem: RawMem, _width: usize, height: usize) -> Result<MappedImage, ClError> {
        let mut mems = self.mems.lock();
        let m = mems.get_mut(&mem.0).ok_or(ClError::Api { op: "clEnqueueMapImage", code: -38 })?;
        let ptr = NonNull::new(m.data.as_mut_ptr() as *mut c_void)
            .ok_or(ClError::Api { op: "clEnqueueMapImage", code: -12 })?;
        Ok(MappedImage { ptr, row_pitch: m.row_pitch, slice_pitch: m.row_pitch * height })
    }

    fn unmap(&self, _queue: RawQueue, _mem: RawMem, _mapped: NonNull<c_void>) -> Result<(), ClError> {
        self.counters.unmaps.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn release_mem(&self, mem: RawMem) {
        self.mems.lock().remove(&mem.0);
        self.release(mem.0);
    }

    fn release_event(&self, event: RawEvent) {
        self.release(event.0);
    }

    fn release_kernel(&self, kernel: RawKernel) {
        self.release(kernel.0);
    }

    fn release_program(&self, program: RawProgram) {
        self.programs.lock().remove(&program.0);
        self.release(program.0);
    }

    fn release_queue(&self, queue: RawQueue) {
        self.release(queue.0);
    }

    fn release_context(&self, context: RawContext) {
        self.release(context.0);
    }
}

/// `KvStorage` whose contents and traffic stay observable after it has
/// been moved into a runtime.
#[derive(Clone, Default)]
pub struct SharedStorage {
    pub entries: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    pub puts: Arc<AtomicUsize>,
    pub flushes: Arc<AtomicUsize>,
    pub fail_flush: bool,
}

impl SharedStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entry(self, key: &str, value: Vec<u8>) -> Self {
        self.entries.lock().insert(key.to_string(), value);
        self
    }

    pub fn puts(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    pub fn flushes(&self) -> usize {
        self.flushes.load(Ordering::SeqCst)
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<_> = self.entries.lock().keys().cloned().collect();
        keys.sort();
        keys
    }
}

impl KvStorage for SharedStorage {
    fn load(&mut self) -> nnrt_core::Result<()> {
        Ok(())
    }

    fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.entries.lock().get(key).cloned()
    }

    fn put(&mut self, key: &str, value: Vec<u8>) {
        self.puts.fetch_add(1, Ordering::SeqCst);
        self.entries.lock().insert(key.to_string(), value);
    }

    fn flush(&mut self) -> nnrt_core::Result<()> {
        self.flushes.fetch_add(1, Ordering::SeqCst);
        if self.fail_flush {
            return Err(CoreError::Storage("disk full".into()));
        }
        Ok(())
    }
}

pub fn runtime(api: Arc<MockApi>, storage: SharedStorage) -> OpenClRuntime {
    runtime_with_config(api, storage, RuntimeConfig::default())
}

pub fn runtime_with_config(api: Arc<MockApi>, storage: SharedStorage, config: RuntimeConfig) -> OpenClRuntime {
    OpenClRuntime::builder(config)
        .api(api)
        .storage(Box::new(storage))
        .sources(Box::new(sources()))
        .build()
        .expect("mock runtime builds")
}
