use std::{
    num::NonZeroUsize,
    sync::{mpsc, OnceLock},
};

use log::{debug, error};

use crate::{
    task::{TaskError, TaskOutcome},
    unit::{RenamingRecord, ServiceUnit},
};

pub const DEFAULT_MAX_CONCURRENCY: NonZeroUsize = match NonZeroUsize::new(5) {
    Some(n) => n,
    None => unreachable!(),
};

/// Runs one task per unit on a dedicated pool of `max_concurrency` threads.
///
/// Units are submitted in declaration order and start as threads free up. A failing task does
/// not stop its siblings: every task runs to completion and the first failure to complete is
/// reported once all of them are done.
pub struct Scheduler {
    pool: rayon::ThreadPool,
}

impl Scheduler {
    pub fn new(max_concurrency: NonZeroUsize) -> Result<Self, rayon::ThreadPoolBuildError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(max_concurrency.get())
            .thread_name(|index| format!("shipit-task-{index}"))
            .build()?;
        Ok(Self { pool })
    }

    pub fn max_concurrency(&self) -> usize {
        self.pool.current_num_threads()
    }

    pub fn run<F>(&self, units: &[ServiceUnit], task: F) -> Result<Vec<RenamingRecord>, TaskError>
    where
        F: Fn(&ServiceUnit) -> TaskOutcome + Sync,
    {
        debug!(
            "running {} tasks, at most {} at a time",
            units.len(),
            self.max_concurrency()
        );

        // Room for every record, so a finishing task never waits on the queue.
        let (sender, receiver) = mpsc::sync_channel(units.len());
        let first_error = OnceLock::new();

        self.pool.scope_fifo(|scope| {
            for unit in units {
                let sender = sender.clone();
                let task = &task;
                let first_error = &first_error;
                scope.spawn_fifo(move |_| match task(unit) {
                    Ok(record) => {
                        // The receiver outlives the scope.
                        let _ = sender.send(record);
                    }
                    Err(task_error) => {
                        error!("{task_error}");
                        let _ = first_error.set(task_error);
                    }
                });
            }
        });
        drop(sender);

        if let Some(task_error) = first_error.into_inner() {
            return Err(task_error);
        }
        Ok(receiver.try_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            atomic::{AtomicUsize, Ordering},
            Mutex,
        },
        thread,
        time::Duration,
    };

    use super::*;
    use crate::{
        builder::fake::FakeBuilder,
        registry::fake::FakeRegistry,
        task::{self, Phase, TaskContext},
        unit::BuildVariant,
    };

    fn units(names: &[&str]) -> Vec<ServiceUnit> {
        names
            .iter()
            .map(|name| ServiceUnit {
                name: name.to_string(),
                tags: vec!["latest".to_owned()],
                namespace: None,
                variant: BuildVariant::Native {
                    source: format!("./cmd/{name}"),
                    base_image: "busybox".to_owned(),
                },
            })
            .collect()
    }

    fn scheduler(max_concurrency: usize) -> Scheduler {
        Scheduler::new(NonZeroUsize::new(max_concurrency).unwrap()).unwrap()
    }

    fn record(unit: &ServiceUnit) -> RenamingRecord {
        RenamingRecord {
            old_reference: format!("svc/{}", unit.name),
            new_reference: format!("repo/{}@sha256:1", unit.name),
        }
    }

    fn failure(unit: &ServiceUnit) -> TaskError {
        TaskError {
            unit: unit.name.clone(),
            phase: Phase::Build,
            source: "boom".into(),
        }
    }

    #[test]
    fn never_exceeds_max_concurrency() {
        let active = AtomicUsize::new(0);
        let max_active = AtomicUsize::new(0);
        let units = units(&["a", "b", "c", "d", "e", "f", "g", "h"]);

        let records = scheduler(3)
            .run(&units, |unit| {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                max_active.fetch_max(now, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(20));
                active.fetch_sub(1, Ordering::SeqCst);
                Ok(record(unit))
            })
            .unwrap();

        assert_eq!(records.len(), units.len());
        assert!(max_active.load(Ordering::SeqCst) <= 3);
    }

    #[test]
    fn three_units_two_slots() {
        let registry = FakeRegistry::default();
        let builder = FakeBuilder {
            delay: Duration::from_millis(50),
            ..Default::default()
        };
        let context = TaskContext {
            registry: &registry,
            native: &builder,
            publisher: &builder,
            external: &builder,
            namespace: None,
            logical_domain: "registry.local",
        };

        let mut records = scheduler(2)
            .run(&units(&["a", "b", "c"]), |unit| task::run(&context, unit))
            .unwrap();

        assert_eq!(builder.max_active.load(Ordering::SeqCst), 2);
        records.sort_by(|x, y| x.old_reference.cmp(&y.old_reference));
        let old: Vec<_> = records.iter().map(|r| r.old_reference.as_str()).collect();
        assert_eq!(
            old,
            ["registry.local/a", "registry.local/b", "registry.local/c"]
        );
    }

    #[test]
    fn failure_does_not_cancel_siblings() {
        let finished = Mutex::new(Vec::new());
        let units = units(&["a", "b", "c", "d"]);

        let error = scheduler(2)
            .run(&units, |unit| {
                if unit.name == "a" {
                    return Err(failure(unit));
                }
                thread::sleep(Duration::from_millis(10));
                finished.lock().unwrap().push(unit.name.clone());
                Ok(record(unit))
            })
            .unwrap_err();

        assert_eq!(error.unit, "a");
        let mut finished = finished.into_inner().unwrap();
        finished.sort();
        assert_eq!(finished, ["b", "c", "d"]);
    }

    #[test]
    fn first_failure_to_complete_is_reported() {
        let units = units(&["slow", "fast"]);
        let error = scheduler(2)
            .run(&units, |unit| {
                if unit.name == "slow" {
                    thread::sleep(Duration::from_millis(100));
                }
                Err(failure(unit))
            })
            .unwrap_err();
        assert_eq!(error.unit, "fast");
    }

    #[test]
    fn digest_failure_leaves_siblings_published() {
        let registry = FakeRegistry::default();
        let builder = FakeBuilder {
            fail_digest: vec!["b".to_owned()],
            ..Default::default()
        };
        let context = TaskContext {
            registry: &registry,
            native: &builder,
            publisher: &builder,
            external: &builder,
            namespace: None,
            logical_domain: "registry.local",
        };

        let error = scheduler(2)
            .run(&units(&["a", "b", "c"]), |unit| task::run(&context, unit))
            .unwrap_err();

        assert_eq!(error.unit, "b");
        assert_eq!(error.phase, Phase::Digest);
        assert!(error.to_string().contains("no descriptors"));
        let mut published: Vec<_> = builder
            .published
            .lock()
            .unwrap()
            .iter()
            .map(|(repository, _)| repository.clone())
            .collect();
        published.sort();
        assert_eq!(
            published,
            ["registry.example.com/a", "registry.example.com/c"]
        );
    }

    #[test]
    fn units_start_in_declaration_order() {
        let started = Mutex::new(Vec::new());
        let units = units(&["a", "b", "c", "d", "e"]);

        scheduler(1)
            .run(&units, |unit| {
                started.lock().unwrap().push(unit.name.clone());
                Ok(record(unit))
            })
            .unwrap();

        assert_eq!(started.into_inner().unwrap(), ["a", "b", "c", "d", "e"]);
    }

    #[test]
    fn no_units_no_records() {
        let records = scheduler(1)
            .run(&[], |unit| Ok(record(unit)))
            .unwrap();
        assert!(records.is_empty());
    }
}
