//! Role-agnostic polling loop: trigger → process each item → idle/sleep.
//!
//! One failing item, or a failing trigger, never stops the loop; the error is
//! logged and the loop moves on. An interrupt is noticed between cycles and
//! during the sleep, never in the middle of processing an item.

use std::time::Duration;

use anyhow::Result;
use tracing::{debug, error, info, warn};

use crate::io::clock::Clock;
use crate::shutdown::ShutdownFlag;

/// Granularity at which sleeps check for an interrupt.
const SLEEP_SLICE: Duration = Duration::from_millis(100);

/// Hooks that give a loop its behavior.
pub trait LoopHandler {
    type Item;

    /// Items pending right now. An empty list is normal.
    fn trigger(&mut self) -> Result<Vec<Self::Item>>;

    fn process(&mut self, item: &Self::Item) -> Result<()>;

    /// Called after a cycle found nothing to do.
    fn on_idle(&mut self) {}

    /// Called once when the loop stops.
    fn on_exit(&mut self) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopMode {
    Continuous,
    /// Run exactly one cycle, then stop without sleeping.
    SingleCycle,
}

#[derive(Debug, Clone)]
pub struct LoopConfig {
    /// Name used in log lines.
    pub label: String,
    pub interval: Duration,
    pub mode: LoopMode,
}

/// Reason why `run_loop` stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopStop {
    SingleCycle,
    Interrupted,
}

/// Summary of a loop invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopOutcome {
    pub cycles: u64,
    pub items_processed: u64,
    pub item_failures: u64,
    pub trigger_failures: u64,
    pub stop: LoopStop,
}

/// Drive `handler` until single-cycle mode completes or `shutdown` is requested.
pub fn run_loop<H: LoopHandler>(
    handler: &mut H,
    config: &LoopConfig,
    clock: &dyn Clock,
    shutdown: &ShutdownFlag,
) -> LoopOutcome {
    let mut outcome = LoopOutcome {
        cycles: 0,
        items_processed: 0,
        item_failures: 0,
        trigger_failures: 0,
        stop: LoopStop::Interrupted,
    };
    info!(label = %config.label, interval_secs = config.interval.as_secs(), "loop started");

    while !shutdown.is_requested() {
        outcome.cycles += 1;
        run_cycle(handler, config, &mut outcome);

        if config.mode == LoopMode::SingleCycle {
            outcome.stop = LoopStop::SingleCycle;
            break;
        }
        sleep_unless_interrupted(clock, config.interval, shutdown);
    }

    if outcome.stop == LoopStop::Interrupted {
        info!(label = %config.label, "interrupt received, stopping loop");
    }
    handler.on_exit();
    info!(
        label = %config.label,
        cycles = outcome.cycles,
        processed = outcome.items_processed,
        failures = outcome.item_failures + outcome.trigger_failures,
        "loop stopped"
    );
    outcome
}

fn run_cycle<H: LoopHandler>(handler: &mut H, config: &LoopConfig, outcome: &mut LoopOutcome) {
    let items = match handler.trigger() {
        Ok(items) => items,
        Err(err) => {
            outcome.trigger_failures += 1;
            error!(label = %config.label, "trigger failed: {err:#}");
            return;
        }
    };
    if items.is_empty() {
        debug!(label = %config.label, "nothing pending");
        handler.on_idle();
        return;
    }
    debug!(label = %config.label, count = items.len(), "processing items");
    for item in &items {
        match handler.process(item) {
            Ok(()) => outcome.items_processed += 1,
            Err(err) => {
                outcome.item_failures += 1;
                warn!(label = %config.label, "item failed: {err:#}");
            }
        }
    }
}

/// Sleep for `total`, waking early once `shutdown` is requested.
pub fn sleep_unless_interrupted(clock: &dyn Clock, total: Duration, shutdown: &ShutdownFlag) {
    let mut remaining = total;
    while !remaining.is_zero() && !shutdown.is_requested() {
        let slice = remaining.min(SLEEP_SLICE);
        clock.sleep(slice);
        remaining -= slice;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ManualClock;
    use anyhow::anyhow;

    /// Scripted handler: each trigger call pops the next cycle's result.
    struct Scripted {
        cycles: Vec<Result<Vec<u32>>>,
        processed: Vec<u32>,
        idle_calls: u32,
        exit_calls: u32,
        stop_after: Option<(usize, ShutdownFlag)>,
        triggers: usize,
    }

    impl Scripted {
        fn new(cycles: Vec<Result<Vec<u32>>>) -> Self {
            Self {
                cycles,
                processed: Vec::new(),
                idle_calls: 0,
                exit_calls: 0,
                stop_after: None,
                triggers: 0,
            }
        }
    }

    impl LoopHandler for Scripted {
        type Item = u32;

        fn trigger(&mut self) -> Result<Vec<u32>> {
            self.triggers += 1;
            if let Some((after, flag)) = &self.stop_after
                && self.triggers >= *after
            {
                flag.request();
            }
            if self.cycles.is_empty() {
                return Ok(Vec::new());
            }
            self.cycles.remove(0)
        }

        fn process(&mut self, item: &u32) -> Result<()> {
            if *item == 13 {
                return Err(anyhow!("unlucky item"));
            }
            self.processed.push(*item);
            Ok(())
        }

        fn on_idle(&mut self) {
            self.idle_calls += 1;
        }

        fn on_exit(&mut self) {
            self.exit_calls += 1;
        }
    }

    fn config(mode: LoopMode) -> LoopConfig {
        LoopConfig {
            label: "test".to_string(),
            interval: Duration::from_secs(5),
            mode,
        }
    }

    /// A failing trigger is logged and the next cycle still runs.
    #[test]
    fn trigger_error_does_not_stop_loop() {
        let clock = ManualClock::default();
        let shutdown = ShutdownFlag::new();
        let mut handler = Scripted::new(vec![Err(anyhow!("disk on fire")), Ok(vec![1, 2])]);
        handler.stop_after = Some((2, shutdown.clone()));

        let outcome = run_loop(&mut handler, &config(LoopMode::Continuous), &clock, &shutdown);

        assert_eq!(outcome.trigger_failures, 1);
        assert_eq!(outcome.cycles, 2);
        assert_eq!(handler.processed, vec![1, 2]);
        assert_eq!(outcome.stop, LoopStop::Interrupted);
        assert_eq!(handler.exit_calls, 1);
    }

    #[test]
    fn item_error_does_not_skip_remaining_items() {
        let clock = ManualClock::default();
        let shutdown = ShutdownFlag::new();
        let mut handler = Scripted::new(vec![Ok(vec![1, 13, 3])]);

        let outcome = run_loop(&mut handler, &config(LoopMode::SingleCycle), &clock, &shutdown);

        assert_eq!(handler.processed, vec![1, 3]);
        assert_eq!(outcome.items_processed, 2);
        assert_eq!(outcome.item_failures, 1);
        assert_eq!(outcome.stop, LoopStop::SingleCycle);
    }

    /// An empty cycle only calls the idle hook.
    #[test]
    fn idle_cycle_is_a_no_op() {
        let clock = ManualClock::default();
        let start = clock.now();
        let shutdown = ShutdownFlag::new();
        let mut handler = Scripted::new(Vec::new());

        let outcome = run_loop(&mut handler, &config(LoopMode::SingleCycle), &clock, &shutdown);

        assert_eq!(handler.idle_calls, 1);
        assert!(handler.processed.is_empty());
        assert_eq!(outcome.items_processed, 0);
        assert_eq!(clock.now(), start, "single-cycle mode never sleeps");
    }

    #[test]
    fn continuous_mode_sleeps_interval_between_cycles() {
        let clock = ManualClock::default();
        let start = clock.now();
        let shutdown = ShutdownFlag::new();
        let mut handler = Scripted::new(Vec::new());
        handler.stop_after = Some((3, shutdown.clone()));

        let outcome = run_loop(&mut handler, &config(LoopMode::Continuous), &clock, &shutdown);

        assert_eq!(outcome.cycles, 3);
        // Two full intervals, then the third cycle sees the interrupt before sleeping.
        assert_eq!(clock.elapsed_since(start), Duration::from_secs(10));
    }

    #[test]
    fn interrupt_before_start_runs_no_cycle() {
        let clock = ManualClock::default();
        let shutdown = ShutdownFlag::new();
        shutdown.request();
        let mut handler = Scripted::new(vec![Ok(vec![1])]);

        let outcome = run_loop(&mut handler, &config(LoopMode::Continuous), &clock, &shutdown);

        assert_eq!(outcome.cycles, 0);
        assert_eq!(handler.exit_calls, 1);
        assert!(handler.processed.is_empty());
    }
}
