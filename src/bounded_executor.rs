use std::collections::VecDeque;
use std::sync::{mpsc, Mutex};
use std::thread;

use tracing::{info, warn};

use crate::error::{BatchError, RunError};
use crate::operation::Plan;
use crate::runner::{Backend, PlanRunner, RunSummary};
use crate::trace::RunTrace;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchOptions {
    /// Upper bound on plans running at once. With more than one worker every
    /// plan's resource names are prefixed with `p<index>-`.
    pub max_parallel: usize,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self { max_parallel: 1 }
    }
}

/// Result of one catalog entry.
#[derive(Debug)]
pub struct PlanOutcome {
    pub index: usize,
    /// The plan as it was executed (namespaced when run in parallel).
    pub plan: Plan,
    pub result: Result<RunSummary, RunError>,
    pub trace: RunTrace,
}

impl PlanOutcome {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

pub fn run_id(index: usize) -> String {
    format!("p{index}")
}

/// Run every plan with a fresh runner and a backend built by `make_backend`.
///
/// Outcomes are returned in catalog order. A failing plan does not stop the
/// batch.
pub fn run_catalog<B, F>(
    plans: &[Plan],
    opts: &BatchOptions,
    make_backend: F,
) -> Result<Vec<PlanOutcome>, BatchError>
where
    B: Backend,
    F: Fn(usize) -> B + Sync,
{
    if opts.max_parallel == 0 {
        return Err(BatchError::ZeroParallelism);
    }
    if plans.is_empty() {
        return Ok(Vec::new());
    }

    let expected_count = plans.len();
    info!(
        plans = expected_count,
        max_parallel = opts.max_parallel,
        "running catalog"
    );

    if opts.max_parallel == 1 {
        return Ok(plans
            .iter()
            .enumerate()
            .map(|(index, plan)| run_one(index, plan.clone(), &make_backend(index)))
            .collect());
    }

    let worker_count = opts.max_parallel.min(expected_count);
    let queue: Mutex<VecDeque<(usize, &Plan)>> =
        Mutex::new(plans.iter().enumerate().collect());
    let (tx, rx) = mpsc::channel::<PlanOutcome>();

    let (mut out, panicked) = thread::scope(|s| {
        let mut handles = Vec::with_capacity(worker_count);
        for _ in 0..worker_count {
            let queue = &queue;
            let make_backend = &make_backend;
            let tx = tx.clone();
            handles.push(s.spawn(move || loop {
                let job = match queue.lock() {
                    Ok(mut q) => q.pop_front(),
                    Err(_) => break,
                };
                let Some((index, plan)) = job else {
                    break;
                };
                let backend = make_backend(index);
                let outcome = run_one(index, plan.namespaced(&run_id(index)), &backend);
                if tx.send(outcome).is_err() {
                    break;
                }
            }));
        }
        drop(tx);

        let out: Vec<PlanOutcome> = rx.iter().collect();
        let panicked = handles
            .into_iter()
            .map(|h| h.join())
            .filter(Result::is_err)
            .count();
        (out, panicked)
    });

    if panicked > 0 {
        return Err(BatchError::WorkerPanicked(panicked));
    }
    if out.len() != expected_count {
        return Err(BatchError::OutcomeMismatch {
            expected: expected_count,
            got: out.len(),
        });
    }

    out.sort_by_key(|o| o.index);
    Ok(out)
}

fn run_one<B: Backend>(index: usize, plan: Plan, backend: &B) -> PlanOutcome {
    let mut runner = PlanRunner::new(backend, run_id(index));
    let result = runner.run(&plan);
    match &result {
        Ok(summary) => info!(plan = index, steps = summary.steps, "plan passed"),
        Err(err) => warn!(plan = index, "plan failed: {}", err.chain()),
    }
    PlanOutcome {
        index,
        plan,
        result,
        trace: runner.into_trace(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::DryRunBackend;
    use crate::generator::generate_plans;
    use std::collections::BTreeSet;

    #[test]
    fn run_catalog_rejects_zero_parallelism() {
        let err = run_catalog(&[], &BatchOptions { max_parallel: 0 }, |_| {
            DryRunBackend::new()
        })
        .unwrap_err();
        assert_eq!(err, BatchError::ZeroParallelism);
    }

    #[test]
    fn sequential_catalog_keeps_plan_names() {
        let plans = generate_plans(2).unwrap();
        let out = run_catalog(&plans, &BatchOptions::default(), |_| DryRunBackend::new()).unwrap();
        assert_eq!(out.len(), plans.len());
        for (o, p) in out.iter().zip(&plans) {
            assert!(o.is_success());
            assert_eq!(&o.plan, p);
        }
    }

    #[test]
    fn parallel_catalog_preserves_order_and_namespaces() {
        let plans = generate_plans(3).unwrap();
        let out = run_catalog(&plans, &BatchOptions { max_parallel: 4 }, |_| {
            DryRunBackend::new()
        })
        .unwrap();

        assert_eq!(out.len(), plans.len());
        let mut seen: BTreeSet<String> = BTreeSet::new();
        for (i, o) in out.iter().enumerate() {
            assert_eq!(o.index, i);
            assert!(o.is_success());
            assert_eq!(o.trace.run_id, format!("p{i}"));
            let names: BTreeSet<String> = o
                .plan
                .iter()
                .flat_map(|op| op.params.iter())
                .filter(|p| !p.ends_with("Gi"))
                .cloned()
                .collect();
            assert!(names.iter().all(|n| n.starts_with(&format!("p{i}-"))));
            assert!(seen.is_disjoint(&names));
            seen.extend(names);
        }
    }

    #[test]
    fn failing_plan_does_not_stop_the_batch() {
        let plans = generate_plans(2).unwrap();
        let out = run_catalog(&plans, &BatchOptions { max_parallel: 2 }, |i| {
            if i == 0 {
                DryRunBackend::new().failing_at(1)
            } else {
                DryRunBackend::new()
            }
        })
        .unwrap();
        assert!(!out[0].is_success());
        assert!(out[1..].iter().all(PlanOutcome::is_success));
    }
}
