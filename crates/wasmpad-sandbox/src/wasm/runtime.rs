//! WASM execution host using wasmtime.
//!
//! A run goes through five steps, each with its own failure:
//!
//! ```text
//! bytes ─parse─▶ Module ─link─▶ Instance ─bind slot─▶ _start ─call─▶ RunReport
//!        InvalidModule  InstantiationError   MissingEntrypoint  TrapError
//! ```

use super::config::WasmConfig;
use super::host_functions::{GuestExit, InstanceSlot, WasiHostFunctions};
use super::syscalls::SyscallTable;
use crate::error::{Result, SandboxError};
use crate::input::InputSource;
use crate::output::OutputSink;

use serde::Serialize;
use std::time::Instant;

use wasmtime::*;

/// Host state for the WASM store: the syscall table plus the slot that ties
/// it back to the instance.
pub struct WasmHostState {
    pub(crate) syscalls: SyscallTable,
    pub(crate) instance: InstanceSlot,
    limits: StoreLimits,
}

/// The WebAssembly execution host.
pub struct WasmSandbox {
    engine: Engine,
    config: WasmConfig,
}

/// A compiled WebAssembly module.
pub struct WasmModule {
    module: Module,
}

/// Outcome of a run that did not fail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunReport {
    /// Exit code passed to `proc_exit`, or 0 when the entrypoint returned
    pub exit_code: i32,
    /// Whether the guest ended through `proc_exit`
    pub exited: bool,
    /// Execution time of the entrypoint in microseconds
    pub execution_time_us: u64,
    /// Fuel consumed (if fuel metering enabled)
    pub fuel_consumed: Option<u64>,
}

impl RunReport {
    /// Whether the guest finished with exit code 0.
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

impl WasmSandbox {
    /// Create a new execution host with the given configuration.
    pub fn new(config: WasmConfig) -> Result<Self> {
        let mut engine_config = Config::new();

        engine_config.cranelift_opt_level(match config.optimization_level {
            0 => OptLevel::None,
            1 | 2 => OptLevel::Speed,
            _ => OptLevel::SpeedAndSize,
        });
        engine_config.wasm_simd(config.enable_simd);

        if config.fuel_limit.is_some() {
            engine_config.consume_fuel(true);
        }

        let engine = Engine::new(&engine_config)
            .map_err(|e| SandboxError::WasmError(format!("engine creation failed: {}", e)))?;

        Ok(Self { engine, config })
    }

    /// Parse and validate a module. Text-format modules are accepted too.
    pub fn load_module_bytes(&self, bytes: &[u8]) -> Result<WasmModule> {
        let module = Module::new(&self.engine, bytes)
            .map_err(|e| SandboxError::InvalidModule(format!("{:#}", e)))?;
        Ok(WasmModule { module })
    }

    /// Run a guest binary to completion.
    ///
    /// `sink` is reset, then receives guest output as it is written; keep a
    /// clone of it to watch the run. `input` feeds `fd_read` on descriptor 0.
    pub fn run(
        &self,
        binary: &[u8],
        sink: &OutputSink,
        input: impl InputSource + 'static,
    ) -> Result<RunReport> {
        sink.reset();
        let module = self.load_module_bytes(binary)?;
        self.execute(&module, sink, Box::new(input))
    }

    /// Run an already compiled module. `sink` is reset first, as in [`run`](Self::run).
    pub fn run_module(
        &self,
        module: &WasmModule,
        sink: &OutputSink,
        input: impl InputSource + 'static,
    ) -> Result<RunReport> {
        sink.reset();
        self.execute(module, sink, Box::new(input))
    }

    fn execute(
        &self,
        module: &WasmModule,
        sink: &OutputSink,
        input: Box<dyn InputSource>,
    ) -> Result<RunReport> {
        let mut store = self.build_store(sink, input)?;

        let mut linker: Linker<WasmHostState> = Linker::new(&self.engine);
        WasiHostFunctions::register(&mut linker)?;

        let instance = match linker.instantiate(&mut store, &module.module) {
            Ok(instance) => instance,
            Err(e) => {
                store.data_mut().syscalls.flush();
                return Err(SandboxError::InstantiationError(format!("{:#}", e)));
            }
        };

        store.data().instance.bind(instance);

        let entry = self.entrypoint(&mut store, &instance)?;

        let start = Instant::now();
        let fuel_before = store.get_fuel().ok();
        let outcome = entry.call(&mut store, ());
        let execution_time_us = start.elapsed().as_micros() as u64;
        store.data_mut().syscalls.flush();
        let fuel_after = store.get_fuel().ok();
        let fuel_consumed = fuel_before.zip(fuel_after).map(|(b, a)| b - a);

        let exit = match outcome {
            Ok(()) => None,
            Err(e) => match e.downcast_ref::<GuestExit>() {
                Some(GuestExit(code)) => Some(*code),
                None => {
                    tracing::debug!("guest trapped: {:#}", e);
                    return Err(SandboxError::TrapError(format!("{:#}", e)));
                }
            },
        };

        let report = RunReport {
            exit_code: exit.unwrap_or(0),
            exited: exit.is_some(),
            execution_time_us,
            fuel_consumed,
        };
        tracing::info!(
            exit_code = report.exit_code,
            us = report.execution_time_us,
            "guest finished"
        );
        Ok(report)
    }

    /// Resolve the zero-argument entrypoint.
    fn entrypoint(
        &self,
        store: &mut Store<WasmHostState>,
        instance: &Instance,
    ) -> Result<TypedFunc<(), ()>> {
        let name = self.config.entrypoint.as_str();
        let func = instance.get_func(&mut *store, name).ok_or_else(|| {
            SandboxError::MissingEntrypoint(format!("module has no `{}` export", name))
        })?;
        func.typed::<(), ()>(&*store).map_err(|e| {
            SandboxError::MissingEntrypoint(format!("`{}` has the wrong signature: {}", name, e))
        })
    }

    fn build_store(
        &self,
        sink: &OutputSink,
        input: Box<dyn InputSource>,
    ) -> Result<Store<WasmHostState>> {
        let limits = StoreLimitsBuilder::new()
            .memory_size(self.config.max_memory)
            .build();

        let state = WasmHostState {
            syscalls: SyscallTable::new(sink.clone(), input),
            instance: InstanceSlot::new(),
            limits,
        };

        let mut store = Store::new(&self.engine, state);
        store.limiter(|state| &mut state.limits);

        if let Some(fuel) = self.config.fuel_limit {
            store
                .set_fuel(fuel)
                .map_err(|e| SandboxError::WasmError(format!("fuel setup failed: {}", e)))?;
        }

        Ok(store)
    }

    /// Get the configuration.
    pub fn config(&self) -> &WasmConfig {
        &self.config
    }
}

impl WasmModule {
    /// Get exported function names.
    pub fn exports(&self) -> impl Iterator<Item = &str> {
        self.module.exports().filter_map(|e| {
            if matches!(e.ty(), ExternType::Func(_)) {
                Some(e.name())
            } else {
                None
            }
        })
    }

    /// `(module, name)` pairs the module imports.
    pub fn imports(&self) -> impl Iterator<Item = (&str, &str)> {
        self.module.imports().map(|i| (i.module(), i.name()))
    }
}
