use tracing::{debug, info, warn};

use crate::runtime::builtins::Registry;
use crate::runtime::runtime_error::RuntimeError;
use crate::runtime::vm::{ExecStatus, Vm};

/// How a program left a simulation tick.
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// Finished a pass through a `tick` body.
    Yielded,
    /// Ran out of instruction budget mid-way.
    Suspended,
    Completed,
    Faulted(RuntimeError),
}

impl TickOutcome {
    /// Whether the program should be run again next tick.
    pub fn is_running(&self) -> bool {
        matches!(self, TickOutcome::Yielded | TickOutcome::Suspended)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TickReport {
    pub outcome: TickOutcome,
    /// Lines printed by the program this tick, followed by the fault
    /// report if it faulted.
    pub log_lines: Vec<String>,
}

/// Runs `vm` for one simulation tick, serving builtin calls from
/// `registry` with `ctx` as the host context.
///
/// The fault report is logged only on the tick that faulted; later ticks of
/// a faulted program report the same outcome with no new lines.
pub fn run_tick<C>(vm: &mut Vm, registry: &Registry<C>, ctx: &mut C) -> TickReport {
    let already_faulted = vm.fault().is_some();
    vm.start_tick();
    let outcome = loop {
        match vm.step_batch() {
            ExecStatus::Continue => continue,
            ExecStatus::ExecBuiltin { id, args } => {
                let result = registry
                    .dispatch(id, vm, args, ctx)
                    .and_then(|value| vm.push_result(value));
                if let Err(err) = result {
                    // a failed push_result has already faulted the vm
                    if vm.fault().is_none() {
                        vm.fail(err.clone());
                    }
                    break TickOutcome::Faulted(err);
                }
            }
            ExecStatus::AwaitNextTick => break TickOutcome::Yielded,
            ExecStatus::ExceededInstrLimit => break TickOutcome::Suspended,
            ExecStatus::Complete => break TickOutcome::Completed,
            ExecStatus::Error(err) => break TickOutcome::Faulted(err),
        }
    };

    let mut log_lines = vm.drain_log_lines();
    match &outcome {
        TickOutcome::Faulted(_) if already_faulted => {}
        TickOutcome::Faulted(err) => {
            warn!(
                code = err.code.id(),
                line = err.location.line,
                file = %err.location.file,
                depth = err.backtrace.len(),
                "program faulted"
            );
            log_lines.extend(err.report());
        }
        TickOutcome::Completed => info!(
            instructions = vm.used_instructions(),
            "program completed"
        ),
        _ => debug!(
            ?outcome,
            instructions = vm.used_instructions(),
            memory = vm.used_memory(),
            "tick finished"
        ),
    }
    TickReport { outcome, log_lines }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::{SourceFile, compile};
    use crate::error::ErrorCode;
    use crate::lang::feature::FeatureSet;
    use crate::lang::value::Value;
    use crate::runtime::builtins::Module;
    use crate::runtime::stdlib;
    use crate::runtime::vm::VmConfig;

    /// Host context of a pretend robot.
    #[derive(Default)]
    struct Robot {
        x: i64,
    }

    fn registry() -> Registry<Robot> {
        Registry::new()
            .with_module(stdlib::standard())
            .with_module(
                Module::new("robot")
                    .with_function("move", 1, 20, |vm, args, robot: &mut Robot| {
                        match args.first() {
                            Some(Value::Int(dx)) => {
                                robot.x += dx;
                                Ok(Value::Null)
                            }
                            _ => Err(vm.error(ErrorCode::OperandNotInteger)),
                        }
                    })
                    .with_function("position", 0, 1, |_, _, robot: &mut Robot| {
                        Ok(Value::Int(robot.x))
                    }),
            )
    }

    fn load(source: &str, registry: &Registry<Robot>) -> Vm {
        let binary = compile(
            &[SourceFile::new("robot.bt", source)],
            FeatureSet::all(),
            &registry.signatures(),
        )
        .expect("compile");
        Vm::new(&binary, VmConfig::default()).expect("load")
    }

    #[test]
    fn test_tick_loop() {
        let registry = registry();
        let mut vm = load("tick {\n    move(2)\n    print(position())\n}", &registry);
        let mut robot = Robot::default();
        for expected in ["2", "4", "6"] {
            let report = run_tick(&mut vm, &registry, &mut robot);
            assert_eq!(report.outcome, TickOutcome::Yielded);
            assert_eq!(report.log_lines, vec![expected]);
        }
        assert_eq!(robot.x, 6);
    }

    #[test]
    fn test_suspend_and_complete() {
        let registry = registry();
        let mut vm = load("var i = 0\nwhile i < 300 {\n    i = i + 1\n}\nprint(\"done\")", &registry);
        let mut robot = Robot::default();
        let mut suspended = 0;
        let report = loop {
            let report = run_tick(&mut vm, &registry, &mut robot);
            if report.outcome != TickOutcome::Suspended {
                break report;
            }
            suspended += 1;
        };
        assert!(suspended >= 1);
        assert_eq!(report.outcome, TickOutcome::Completed);
        assert_eq!(report.log_lines, vec!["done"]);
        assert!(!report.outcome.is_running());
    }

    #[test]
    fn test_fault_report() {
        let registry = registry();
        let source = "\
fun go(n) {
    move(n)
}
print(\"start\")
go(\"far\")";
        let mut vm = load(source, &registry);
        let report = run_tick(&mut vm, &registry, &mut Robot::default());
        match &report.outcome {
            TickOutcome::Faulted(err) => assert_eq!(err.code, ErrorCode::OperandNotInteger),
            other => panic!("{other:?}"),
        }
        assert_eq!(
            report.log_lines,
            vec![
                "start",
                "ERROR: Operand must be an integer [RT008]",
                "  at line 2, file 'robot.bt'",
                "Backtrace (latest call first):",
                "  at 'go' (line 5, file 'robot.bt')",
            ]
        );
        let again = run_tick(&mut vm, &registry, &mut Robot::default());
        assert!(matches!(again.outcome, TickOutcome::Faulted(_)));
        assert!(again.log_lines.is_empty());
    }

    #[test]
    fn test_program_error() {
        let registry = registry();
        let mut vm = load("error(\"out of fuel\")", &registry);
        let report = run_tick(&mut vm, &registry, &mut Robot::default());
        match report.outcome {
            TickOutcome::Faulted(err) => {
                assert_eq!(err.code, ErrorCode::ByProgram);
                assert_eq!(err.detail.as_deref(), Some("out of fuel"));
            }
            other => panic!("{other:?}"),
        }
    }
}
