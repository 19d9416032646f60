//! Run command - execute a compiled unit.

use anyhow::{Context, Result};
use clap::Args;
use marten_vm_core::{Completion, Interpreter, Value, Vm, Watchdog};
use marten_vm_jit::{JitBackend, JitConfig};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use crate::config::Config;

/// Exit code for an uncaught exception
const EXIT_UNCAUGHT: u8 = 1;
/// Exit code for a watchdog or stack interrupt
const EXIT_INTERRUPTED: u8 = 2;

#[derive(Args)]
pub struct RunCommand {
    /// Compiled unit (JSON)
    pub entry: PathBuf,

    /// Run on the compiling backend
    #[arg(long)]
    pub jit: bool,

    /// Timeout in milliseconds (0 = no timeout); overrides [watchdog]
    #[arg(long, value_name = "N")]
    pub timeout_ms: Option<u64>,

    /// Print the disassembly, with inline cache state, after running
    #[arg(long)]
    pub dump: bool,
}

impl RunCommand {
    pub fn run(&self, config: &Config) -> Result<ExitCode> {
        let unit = super::load_unit(&self.entry)?;
        let mut vm = Vm::new(config.vm_config());
        install_globals(&vm);
        let code_block = vm
            .link(unit)
            .with_context(|| format!("Failed to link {}", self.entry.display()))?;

        let timeout_ms = self.timeout_ms.unwrap_or(config.watchdog.timeout_ms);
        let watchdog =
            (timeout_ms > 0).then(|| Watchdog::arm(vm.interrupt_handle(), Duration::from_millis(timeout_ms)));

        let completion = if self.jit || config.jit.enabled == Some(true) {
            let mut backend = JitBackend::new(config.jit_config(JitConfig::from_env()));
            let completion = vm.execute(&mut backend, &code_block);
            tracing::debug!(stats = ?backend.stats(), "jit statistics");
            completion
        } else {
            vm.execute(&mut Interpreter::new(), &code_block)
        };
        if let Some(watchdog) = watchdog {
            watchdog.disarm();
        }

        let exit = report(&completion);
        if self.dump {
            print!("{}", code_block.dump(&vm.opcodes()));
        }
        Ok(exit)
    }
}

/// Host functions available to every script
fn install_globals(vm: &Vm) {
    vm.define_host_function("print", 1, |_ctx, _callee, _this, args| {
        let parts: Vec<_> = args.iter().map(Value::to_js_string).collect();
        println!("{}", parts.join(" "));
        Ok(Value::Undefined)
    });
}

fn report(completion: &Completion) -> ExitCode {
    match completion {
        Completion::Normal(value) => {
            if !value.is_undefined() {
                println!("{}", value.to_js_string());
            }
            ExitCode::SUCCESS
        }
        Completion::Throw(exception) => {
            eprintln!("{exception}");
            if let Some(at) = &exception.attribution {
                eprintln!(
                    "    at {}:{} (divot {}, -{}..+{})",
                    at.url, at.line, at.divot, at.start_offset, at.end_offset
                );
            }
            ExitCode::from(EXIT_UNCAUGHT)
        }
        Completion::Interrupted(reason) => {
            eprintln!("{reason}");
            ExitCode::from(EXIT_INTERRUPTED)
        }
    }
}
