use std::cell::RefCell;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;

use crate::engine;
use crate::link::{ErrorFn, Link, Outcome};
use crate::network::Network;
use crate::reactive::SharedReactive;
use crate::value::{now_millis, Occurrence, Timestamp, Value};

/// A unit of work for the network worker.
///
/// Carries any of: values to deliver, link outcomes to fold in (graph edits,
/// async results), and an operation to run atomically against the network.
pub struct Stimulus {
    pub deliveries: Vec<(SharedReactive, Occurrence)>,
    pub outcomes: Vec<Outcome>,
    pub exec: Option<Box<dyn FnOnce(&mut Network) + Send>>,
}

impl Stimulus {
    pub fn empty() -> Self {
        Self {
            deliveries: Vec::new(),
            outcomes: Vec::new(),
            exec: None,
        }
    }

    pub fn delivery(target: SharedReactive, occurrence: Occurrence) -> Self {
        Self::empty().with_delivery(target, occurrence)
    }

    pub fn outcome(outcome: Outcome) -> Self {
        let mut stimulus = Self::empty();
        stimulus.outcomes.push(outcome);
        stimulus
    }

    pub fn exec(f: impl FnOnce(&mut Network) + Send + 'static) -> Self {
        let mut stimulus = Self::empty();
        stimulus.exec = Some(Box::new(f));
        stimulus
    }

    pub fn with_delivery(mut self, target: SharedReactive, occurrence: Occurrence) -> Self {
        self.deliveries.push((target, occurrence));
        self
    }
}

enum WorkerMsg {
    Stimulus(Stimulus),
    Shutdown,
}

struct WorkerShared {
    handle: Mutex<Option<JoinHandle<()>>>,
}

/// Cloneable handle to a running propagation network.
///
/// The network is a single-writer state machine: all mutation happens on one
/// dedicated worker thread that owns the [`Network`] and drains stimuli one
/// at a time, running each to quiescence before the next. Submissions from
/// any thread enqueue onto the worker's mailbox; the channel is unbounded so
/// the worker can re-enqueue follow-up stimuli without blocking itself.
///
/// The worker runs until [`NetworkRef::shutdown`] is called.
#[derive(Clone)]
pub struct NetworkRef {
    tx: mpsc::Sender<WorkerMsg>,
    shared: Arc<WorkerShared>,
}

impl NetworkRef {
    /// Spawn the worker thread, transferring ownership of the network.
    pub fn spawn(network: Network) -> Self {
        let (tx, rx) = mpsc::channel();
        let shared = Arc::new(WorkerShared {
            handle: Mutex::new(None),
        });
        let netref = Self { tx, shared };

        let worker_ref = netref.clone();
        let name = format!("rill-net-{}", network.id);
        let handle = thread::Builder::new()
            .name(name)
            .spawn(move || worker_loop(network, rx, worker_ref))
            .expect("failed to spawn network worker");
        *netref.shared.handle.lock() = Some(handle);
        netref
    }

    /// Enqueue a stimulus. Dropped (with a log) if the worker has exited.
    pub fn enqueue(&self, stimulus: Stimulus) {
        if self.tx.send(WorkerMsg::Stimulus(stimulus)).is_err() {
            tracing::warn!("network worker is gone; stimulus dropped");
        }
    }

    /// Enqueue a value for the given reactive, stamped now. Returns the value.
    pub fn push(&self, reactive: &SharedReactive, value: Value) -> Value {
        self.push_at(reactive, value, now_millis())
    }

    pub fn push_at(&self, reactive: &SharedReactive, value: Value, at: Timestamp) -> Value {
        self.enqueue(Stimulus::delivery(
            reactive.clone(),
            Occurrence::new(value.clone(), at),
        ));
        value
    }

    /// Enqueue a completion delivery for the given reactive.
    pub fn complete(&self, reactive: &SharedReactive) {
        self.enqueue(Stimulus::delivery(reactive.clone(), Occurrence::completed()));
    }

    /// Splice links into the network as a stimulus.
    pub fn add_links(&self, links: Vec<Link>) {
        self.enqueue(Stimulus::outcome(Outcome::add_links(links)));
    }

    /// Remove links matching the predicate as a stimulus.
    pub fn remove_links(&self, predicate: impl Fn(&Link) -> bool + Send + Sync + 'static) {
        self.enqueue(Stimulus::outcome(Outcome::remove_links(predicate)));
    }

    /// Attach an error handler to the link whose sole output is `reactive`.
    pub fn on_error(&self, reactive: &SharedReactive, error_fn: ErrorFn) {
        let target = reactive.clone();
        self.enqueue(Stimulus::exec(move |network| {
            network.attach_error_fn(&target, error_fn);
        }));
    }

    /// Replace the network with an empty one (same id).
    pub fn reset(&self) {
        self.enqueue(Stimulus::exec(|network| {
            let id = network.id.clone();
            *network = Network::new(id);
        }));
    }

    /// Barrier: block until every previously enqueued stimulus has been
    /// processed. Must not be called from a link function (it would wait on
    /// the worker it runs on).
    pub fn sync(&self) {
        let (tx, rx) = mpsc::channel();
        self.enqueue(Stimulus::exec(move |_network| {
            let _ = tx.send(());
        }));
        let _ = rx.recv();
    }

    /// Stop the worker after it drains the stimuli enqueued so far, and join
    /// it (unless called from the worker itself).
    pub fn shutdown(&self) {
        let _ = self.tx.send(WorkerMsg::Shutdown);
        let handle = self.shared.handle.lock().take();
        if let Some(handle) = handle {
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

fn worker_loop(mut network: Network, rx: mpsc::Receiver<WorkerMsg>, netref: NetworkRef) {
    tracing::debug!(network = %network.id, "network worker started");
    with_netref(&netref, || {
        while let Ok(msg) = rx.recv() {
            match msg {
                WorkerMsg::Stimulus(stimulus) => {
                    engine::run_stimulus(&mut network, stimulus, &netref);
                }
                WorkerMsg::Shutdown => break,
            }
        }
    });
    tracing::debug!(network = %network.id, "network worker stopped");
}

thread_local! {
    static CURRENT_NETREF: RefCell<Option<NetworkRef>> = const { RefCell::new(None) };
}

/// Bind the implicit netref for the duration of `f`.
///
/// Link functions run with the owning network's ref bound, on the worker and
/// on executor threads alike, so they can enqueue follow-ups without the ref
/// being threaded through every signature.
pub fn with_netref<R>(netref: &NetworkRef, f: impl FnOnce() -> R) -> R {
    let previous = CURRENT_NETREF.with(|slot| slot.borrow_mut().replace(netref.clone()));
    let result = f();
    CURRENT_NETREF.with(|slot| *slot.borrow_mut() = previous);
    result
}

/// The netref bound on this thread, if any.
pub fn current_netref() -> Option<NetworkRef> {
    CURRENT_NETREF.with(|slot| slot.borrow().clone())
}
