//! Coalesced delivery of incremental changes.
//!
//! The update manager differentiates each observed relation once, then
//! watches the relation's variables. Observed changes are shipped to a
//! worker thread, netted per variable, and turned into row deltas by
//! evaluating the derivative expressions. Observers get one
//! will-change/did-change batch per burst of mutations rather than one
//! per mutation.

use crate::observer::AsyncObserver;
use hashbrown::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use tabula_core::Error;
use tabula_incremental::Derivative;
use tabula_query::change::RowChange;
use tabula_query::observe::{ChangeCallback, ObservationKind, ObserverRemoval};
use tabula_query::relation::{RelationId, RelationRef};

type ObservationId = u64;

enum Message {
    Register {
        id: ObservationId,
        derivative: Derivative,
        observer: Arc<dyn AsyncObserver>,
    },
    VariableChanged {
        id: ObservationId,
        variable: RelationId,
        change: RowChange,
    },
    Unregister {
        id: ObservationId,
    },
    Flush {
        done: mpsc::Sender<()>,
    },
    Shutdown,
}

/// Undoes an [`observe`](UpdateManager::observe) registration.
///
/// Dropping the token without calling [`remove`](Self::remove) leaves
/// the observation active for the manager's lifetime.
pub struct ObservationToken {
    id: ObservationId,
    sender: mpsc::Sender<Message>,
    removals: Vec<ObserverRemoval>,
}

impl ObservationToken {
    /// Detaches from the observed variables and drops the observation.
    pub fn remove(self) {
        for removal in self.removals {
            removal();
        }
        let _ = self.sender.send(Message::Unregister { id: self.id });
    }
}

/// Dispatches incremental changes to asynchronous observers.
///
/// One worker thread serves all observations registered with the same
/// manager, so deliveries for different relations never race each other.
pub struct UpdateManager {
    sender: mpsc::Sender<Message>,
    worker: Option<thread::JoinHandle<()>>,
    next_id: AtomicU64,
}

impl Default for UpdateManager {
    fn default() -> Self {
        Self::new()
    }
}

impl UpdateManager {
    pub fn new() -> UpdateManager {
        let (sender, receiver) = mpsc::channel();
        let worker = thread::Builder::new()
            .name("tabula-update-manager".into())
            .spawn(move || worker_loop(receiver))
            .ok();
        UpdateManager {
            sender,
            worker,
            next_id: AtomicU64::new(1),
        }
    }

    /// Observes `relation`, delivering its incremental changes to
    /// `observer` until the returned token is removed.
    ///
    /// The relation is differentiated once up front; only its variables
    /// are watched afterwards. Deltas describe changes from the point of
    /// registration on, they do not replay the current contents.
    pub fn observe(
        &self,
        relation: &RelationRef,
        observer: Arc<dyn AsyncObserver>,
    ) -> ObservationToken {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let derivative = Derivative::of(relation);

        // Register with the worker before hooking the variables so a
        // change arriving mid-setup finds the observation in place.
        let variables: Vec<(RelationId, RelationRef)> = derivative
            .variables()
            .map(|(variable_id, variable)| (variable_id, variable.clone()))
            .collect();
        let _ = self.sender.send(Message::Register {
            id,
            derivative,
            observer,
        });

        let mut removals = Vec::with_capacity(variables.len());
        for (variable_id, variable) in variables {
            let sender = self.sender.clone();
            let callback: ChangeCallback = Arc::new(move |change: &RowChange| {
                let _ = sender.send(Message::VariableChanged {
                    id,
                    variable: variable_id,
                    change: change.clone(),
                });
            });
            removals.push(variable.add_change_observer(callback, ObservationKind::Dependent));
        }
        tracing::debug!(observation = id, variables = removals.len(), "observing relation");

        ObservationToken {
            id,
            sender: self.sender.clone(),
            removals,
        }
    }

    /// Blocks until every change sent before this call has been
    /// delivered.
    pub fn flush(&self) {
        let (done, wait) = mpsc::channel();
        if self.sender.send(Message::Flush { done }).is_ok() {
            let _ = wait.recv();
        }
    }
}

impl Drop for UpdateManager {
    fn drop(&mut self) {
        let _ = self.sender.send(Message::Shutdown);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

struct Observation {
    derivative: Derivative,
    observer: Arc<dyn AsyncObserver>,
    dirty: bool,
}

fn worker_loop(receiver: mpsc::Receiver<Message>) {
    let mut observations: HashMap<ObservationId, Observation> = HashMap::new();
    let mut acks: Vec<mpsc::Sender<()>> = Vec::new();
    loop {
        let Ok(first) = receiver.recv() else { break };
        let mut shutdown = handle(first, &mut observations, &mut acks);
        // Drain the burst before delivering so rapid mutations coalesce
        // into one batch.
        while !shutdown {
            match receiver.try_recv() {
                Ok(message) => shutdown = handle(message, &mut observations, &mut acks),
                Err(_) => break,
            }
        }
        deliver_pending(&mut observations);
        for ack in acks.drain(..) {
            let _ = ack.send(());
        }
        if shutdown {
            break;
        }
    }
}

fn handle(
    message: Message,
    observations: &mut HashMap<ObservationId, Observation>,
    acks: &mut Vec<mpsc::Sender<()>>,
) -> bool {
    match message {
        Message::Register {
            id,
            derivative,
            observer,
        } => {
            observations.insert(
                id,
                Observation {
                    derivative,
                    observer,
                    dirty: false,
                },
            );
        }
        Message::VariableChanged {
            id,
            variable,
            change,
        } => {
            if let Some(observation) = observations.get_mut(&id) {
                if !observation.dirty {
                    observation.dirty = true;
                    observation.observer.relation_will_change();
                }
                observation.derivative.add_change(variable, &change);
            }
        }
        Message::Unregister { id } => {
            observations.remove(&id);
        }
        Message::Flush { done } => acks.push(done),
        Message::Shutdown => return true,
    }
    false
}

fn deliver_pending(observations: &mut HashMap<ObservationId, Observation>) {
    for observation in observations.values_mut().filter(|o| o.dirty) {
        observation.derivative.install_placeholders();
        // A commit racing the evaluation aborts the pull; the accumulated
        // changes are still intact, so the evaluation can be repeated.
        let mut attempts = 0;
        let outcome = loop {
            match observation.derivative.change().row_change() {
                Err(Error::MutatedDuringEnumeration) if attempts < 3 => attempts += 1,
                outcome => break outcome,
            }
        };
        match outcome {
            Ok(change) => {
                if !change.added.is_empty() {
                    observation.observer.relation_added_rows(&change.added);
                }
                if !change.removed.is_empty() {
                    observation.observer.relation_removed_rows(&change.removed);
                }
            }
            Err(error) => {
                tracing::warn!(?error, "incremental delta evaluation failed");
                observation.observer.relation_change_failed(&error);
            }
        }
        observation.derivative.clear();
        observation.dirty = false;
        observation.observer.relation_did_change();
    }
}
