//! Bounded worker pool over reusable resource replicas.
//!
//! Re-expression of the goroutine fan-out: a fixed set of resources
//! (evaluator replicas, key generators), a shared task queue, and a
//! completion barrier. The first task error is captured; tasks scheduled
//! after an error short-circuit cooperatively.

use std::sync::Mutex;

use crate::error::Result;

pub struct ResourceManager<T> {
    resources: Vec<T>,
}

impl<T: Send> ResourceManager<T> {
    pub fn new(resources: Vec<T>) -> Self {
        assert!(!resources.is_empty(), "at least one resource required");
        ResourceManager { resources }
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Direct access to a replica, for the occasional serial call between
    /// parallel stages.
    pub fn get_mut(&mut self, i: usize) -> &mut T {
        &mut self.resources[i]
    }

    pub fn resources(&self) -> &[T] {
        &self.resources
    }

    /// Applies `f` to every replica (serial; used to install shared state
    /// such as a new key set).
    pub fn for_each(&mut self, mut f: impl FnMut(&mut T)) {
        for r in self.resources.iter_mut() {
            f(r);
        }
    }

    /// Runs every task on some replica; a stage barrier. Returns the first
    /// error observed; remaining queued tasks are skipped once an error is
    /// pending.
    pub fn execute<F>(&mut self, tasks: Vec<F>) -> Result<()>
    where
        F: FnOnce(&mut T) -> Result<()> + Send,
    {
        if tasks.len() == 1 || self.resources.len() == 1 {
            // serial fast path, same short-circuit semantics
            let res = &mut self.resources[0];
            for task in tasks {
                task(res)?;
            }
            return Ok(());
        }

        let queue = Mutex::new(tasks.into_iter());
        let first_err: Mutex<Option<crate::error::Error>> = Mutex::new(None);

        std::thread::scope(|scope| {
            for res in self.resources.iter_mut() {
                let queue = &queue;
                let first_err = &first_err;
                scope.spawn(move || loop {
                    if first_err.lock().unwrap().is_some() {
                        return;
                    }
                    let task = match queue.lock().unwrap().next() {
                        Some(t) => t,
                        None => return,
                    };
                    if let Err(e) = task(res) {
                        first_err.lock().unwrap().get_or_insert(e);
                    }
                });
            }
        });

        match first_err.into_inner().unwrap() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn all_tasks_run_once() {
        let counter = AtomicUsize::new(0);
        let mut pool = ResourceManager::new(vec![0usize; 4]);
        let tasks: Vec<_> = (0..100)
            .map(|_| {
                |_r: &mut usize| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })
            .collect();
        pool.execute(tasks).unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 100);
    }

    #[test]
    fn first_error_surfaces_and_short_circuits() {
        let ran = AtomicUsize::new(0);
        let mut pool = ResourceManager::new(vec![(); 2]);
        let tasks: Vec<Box<dyn FnOnce(&mut ()) -> crate::error::Result<()> + Send>> = (0..50)
            .map(|i| {
                let ran = &ran;
                Box::new(move |_r: &mut ()| {
                    ran.fetch_add(1, Ordering::SeqCst);
                    if i == 3 {
                        Err(Error::shape("boom"))
                    } else {
                        std::thread::sleep(std::time::Duration::from_millis(1));
                        Ok(())
                    }
                }) as _
            })
            .collect();
        let err = pool.execute(tasks).unwrap_err();
        assert!(matches!(err, Error::Shape(_)));
        // later tasks were skipped
        assert!(ran.load(Ordering::SeqCst) < 50);
    }

    #[test]
    fn resources_are_exclusive_per_task() {
        // each resource is a counter; totals must add up with no loss
        let mut pool = ResourceManager::new(vec![0u64; 3]);
        let tasks: Vec<_> = (0..300)
            .map(|_| {
                |r: &mut u64| {
                    *r += 1;
                    Ok(())
                }
            })
            .collect();
        pool.execute(tasks).unwrap();
        let total: u64 = pool.resources().iter().sum();
        assert_eq!(total, 300);
    }
}
