use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone)]
pub struct RunTrace {
    pub run_id: String,
    pub plan_fingerprint: String,
    pub events: Vec<TraceEvent>,
    run_started_ms: u128,
    step_started_ms: HashMap<usize, u128>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceEvent {
    StepStarted {
        ts_ms: u128,
        index: usize,
        op: String,
    },
    StepFinished {
        ts_ms: u128,
        index: usize,
        success: bool,
        elapsed_ms: u128,
    },
    RunFailed {
        ts_ms: u128,
        message: String,
    },
    RunFinished {
        ts_ms: u128,
        success: bool,
        elapsed_ms: u128,
    },
}

impl TraceEvent {
    pub fn summarize(&self, verbose: bool) -> String {
        match self {
            TraceEvent::StepStarted { ts_ms, index, op } => {
                if verbose {
                    let ts = format_ts_ms(*ts_ms);
                    format!("{ts_ms} StepStarted ts={ts} step={index} op={op}")
                } else {
                    format!("{ts_ms} StepStarted step={index} op={op}")
                }
            }
            TraceEvent::StepFinished {
                ts_ms,
                index,
                success,
                elapsed_ms,
            } => {
                if verbose {
                    let ts = format_ts_ms(*ts_ms);
                    let elapsed = format_elapsed_ms(*elapsed_ms);
                    format!(
                        "{ts_ms} StepFinished ts={ts} step={index} success={success} elapsed_ms={elapsed_ms} elapsed={elapsed}"
                    )
                } else {
                    format!("{ts_ms} StepFinished step={index} success={success}")
                }
            }
            TraceEvent::RunFailed { ts_ms, message } => {
                if verbose {
                    let ts = format_ts_ms(*ts_ms);
                    format!("{ts_ms} RunFailed ts={ts} message={message}")
                } else {
                    format!("{ts_ms} RunFailed message={message}")
                }
            }
            TraceEvent::RunFinished {
                ts_ms,
                success,
                elapsed_ms,
            } => {
                if verbose {
                    let ts = format_ts_ms(*ts_ms);
                    let elapsed = format_elapsed_ms(*elapsed_ms);
                    format!(
                        "{ts_ms} RunFinished ts={ts} success={success} elapsed_ms={elapsed_ms} elapsed={elapsed}"
                    )
                } else {
                    format!("{ts_ms} RunFinished success={success}")
                }
            }
        }
    }
}

impl RunTrace {
    pub fn new(run_id: impl Into<String>, plan_fingerprint: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            plan_fingerprint: plan_fingerprint.into(),
            events: Vec::new(),
            run_started_ms: Self::now_ms(),
            step_started_ms: HashMap::new(),
        }
    }

    fn now_ms() -> u128 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or(0)
    }

    pub fn step_started(&mut self, index: usize, op: &str) {
        let ts_ms = Self::now_ms();
        self.events.push(TraceEvent::StepStarted {
            ts_ms,
            index,
            op: op.to_string(),
        });
        self.step_started_ms.insert(index, ts_ms);
    }

    pub fn step_finished(&mut self, index: usize, success: bool) {
        let ts_ms = Self::now_ms();
        let elapsed_ms = self
            .step_started_ms
            .remove(&index)
            .map(|started| ts_ms.saturating_sub(started))
            .unwrap_or(0);
        self.events.push(TraceEvent::StepFinished {
            ts_ms,
            index,
            success,
            elapsed_ms,
        });
    }

    pub fn run_failed(&mut self, message: &str) {
        self.events.push(TraceEvent::RunFailed {
            ts_ms: Self::now_ms(),
            message: message.to_string(),
        });
    }

    pub fn run_finished(&mut self, success: bool) {
        let ts_ms = Self::now_ms();
        let elapsed_ms = ts_ms.saturating_sub(self.run_started_ms);
        self.events.push(TraceEvent::RunFinished {
            ts_ms,
            success,
            elapsed_ms,
        });
    }

    /// Indices of steps that were started, in order.
    pub fn started_steps(&self) -> Vec<usize> {
        self.events
            .iter()
            .filter_map(|ev| match ev {
                TraceEvent::StepStarted { index, .. } => Some(*index),
                _ => None,
            })
            .collect()
    }

    /// Render the trace as stable, diff-friendly lines.
    pub fn render(&self, verbose: bool) -> String {
        let mut out = format!(
            "TRACE run_id={} plan={}\n",
            self.run_id, self.plan_fingerprint
        );
        for ev in &self.events {
            out.push_str(&ev.summarize(verbose));
            out.push('\n');
        }
        out
    }
}

pub fn print_trace(tr: &RunTrace, verbose: bool) {
    print!("{}", tr.render(verbose));
}

fn format_ts_ms(ts_ms: u128) -> String {
    let secs = ts_ms / 1000;
    let millis = ts_ms % 1000;
    format!("{secs}.{millis:03}Z")
}

fn format_elapsed_ms(elapsed_ms: u128) -> String {
    let secs = elapsed_ms as f64 / 1000.0;
    format!("{secs:.2}s")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trace_records_step_lifecycle_events_in_order() {
        let mut tr = RunTrace::new("run-1", "abc");

        tr.step_started(0, "createVolume");
        tr.step_finished(0, true);
        tr.step_started(1, "deleteVolume");
        tr.step_finished(1, false);
        tr.run_failed("step 1 (deleteVolume) failed");
        tr.run_finished(false);

        assert_eq!(tr.events.len(), 6);
        assert_eq!(tr.started_steps(), vec![0, 1]);

        match &tr.events[3] {
            TraceEvent::StepFinished {
                index,
                success,
                elapsed_ms,
                ..
            } => {
                assert_eq!(*index, 1);
                assert!(!*success);
                assert!(*elapsed_ms <= 1_000);
            }
            other => panic!("expected StepFinished event, got {other:?}"),
        }
    }

    #[test]
    fn render_starts_with_header() {
        let mut tr = RunTrace::new("plan-3", "deadbeef");
        tr.step_started(0, "createVolume");
        let text = tr.render(false);
        assert!(text.starts_with("TRACE run_id=plan-3 plan=deadbeef\n"), "{text}");
        assert!(text.contains("StepStarted step=0 op=createVolume"), "{text}");
    }

    #[test]
    fn verbose_summary_includes_elapsed() {
        let ev = TraceEvent::RunFinished {
            ts_ms: 1_500,
            success: true,
            elapsed_ms: 2_250,
        };
        assert_eq!(
            ev.summarize(true),
            "1500 RunFinished ts=1.500Z success=true elapsed_ms=2250 elapsed=2.25s"
        );
    }
}
