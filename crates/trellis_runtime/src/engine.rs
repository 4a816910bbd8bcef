//! The query engine: one base index, one network, many matchers.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::{Rc, Weak};

use tracing::{debug, error, info, warn};
use trellis_base::{BaseIndex, BaseIndexChangeListener};
use trellis_foundation::{Error, ErrorKind, Result, Tuple};
use trellis_matchers::{GreedyPlanner, PQuery};
use trellis_model::{ModelHandle, ResourceId};
use trellis_rete::{NodeId, ReteBuilder, ReteContainer};

use crate::context::ModelRuntimeContext;
use crate::matcher::{ListenerId, MatchUpdateListener, PatternMatcher};
use crate::options::EngineOptions;
use crate::pattern_match::Match;

struct Registration {
    id: ListenerId,
    production: NodeId,
    query: Rc<PQuery>,
    listener: Rc<dyn MatchUpdateListener>,
}

/// Delivers match changes once the base index finishes a batch.
struct EngineChangeListener {
    engine: Weak<QueryEngine>,
}

impl BaseIndexChangeListener for EngineChangeListener {
    fn notify_changed(&self, _index_changed: bool) {
        if let Some(engine) = self.engine.upgrade() {
            engine.dispatch_pending();
        }
    }
}

// =============================================================================
// QueryEngine
// =============================================================================

/// Evaluates queries incrementally over a model.
///
/// The engine owns a [`BaseIndex`] over every resource of the model, the
/// network all matchers share, and the match listeners. Listeners are called
/// after each model notification (or coalesced batch), never while the
/// network is being updated, so they may query the engine.
pub struct QueryEngine {
    options: EngineOptions,
    index: Rc<BaseIndex>,
    context: ModelRuntimeContext,
    container: Rc<RefCell<ReteContainer>>,
    builder: RefCell<ReteBuilder>,
    registrations: RefCell<Vec<Registration>>,
    next_listener: Cell<u64>,
    change_listener: RefCell<Option<Rc<dyn BaseIndexChangeListener>>>,
    disposed: Cell<bool>,
}

impl QueryEngine {
    /// Creates an engine over `model` and indexes its resources.
    ///
    /// Resources excluded by the base options are skipped.
    ///
    /// # Errors
    ///
    /// Returns the error of the initial traversal.
    pub fn on(model: &ModelHandle, options: EngineOptions) -> Result<Rc<Self>> {
        let index = BaseIndex::new(model, options.base.clone());
        let context = ModelRuntimeContext::new(Rc::clone(&index));
        let mut container = ReteContainer::new(options.logic);
        container.set_delay_updates(options.delay_updates)?;

        let engine = Rc::new(Self {
            index: Rc::clone(&index),
            context,
            container: Rc::new(RefCell::new(container)),
            builder: RefCell::new(ReteBuilder::new(Box::new(GreedyPlanner))),
            registrations: RefCell::new(Vec::new()),
            next_listener: Cell::new(0),
            change_listener: RefCell::new(None),
            disposed: Cell::new(false),
            options,
        });
        let listener: Rc<dyn BaseIndexChangeListener> = Rc::new(EngineChangeListener {
            engine: Rc::downgrade(&engine),
        });
        index.add_base_index_change_listener(Rc::clone(&listener));
        *engine.change_listener.borrow_mut() = Some(listener);

        let resources: Vec<ResourceId> = model
            .read()
            .resources()
            .map(|r| r.id)
            .filter(|r| !engine.options.base.excluded_resources.contains(r))
            .collect();
        index.coalesce_traversals(|| {
            for resource in &resources {
                index.add_root(*resource)?;
            }
            Ok(())
        })?;
        info!(roots = resources.len(), "query engine started");
        Ok(engine)
    }

    /// Configuration the engine was created with.
    #[must_use]
    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// The base index.
    #[must_use]
    pub fn index(&self) -> &Rc<BaseIndex> {
        &self.index
    }

    /// The runtime context feeding the network.
    #[must_use]
    pub fn context(&self) -> &ModelRuntimeContext {
        &self.context
    }

    /// Number of nodes in the shared network.
    #[must_use]
    pub fn network_size(&self) -> usize {
        self.container.borrow().len()
    }

    /// Returns true after [`QueryEngine::dispose`].
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.disposed.get()
    }

    fn check_live(&self) -> Result<()> {
        if self.disposed.get() {
            return Err(Error::new(ErrorKind::Disposed));
        }
        Ok(())
    }

    /// Returns the matcher of `query`, building its network (and those of
    /// the queries it calls) on first use.
    ///
    /// # Errors
    ///
    /// Returns `Disposed`, indexing errors, and planner errors carrying the
    /// offending pattern in their context.
    pub fn matcher(self: &Rc<Self>, query: &Rc<PQuery>) -> Result<PatternMatcher> {
        self.check_live()?;
        self.dispatch_pending();
        let production = self
            .builder
            .try_borrow_mut()
            .map_err(|_| Error::internal("network is being built"))?
            .build(&self.container, &self.context, query)?;
        // Priming a new production logs its initial content; those are not
        // changes anybody listened to.
        self.container
            .try_borrow_mut()
            .map_err(|_| Error::internal("network is busy"))?
            .take_production_deltas();
        Ok(PatternMatcher::new(Rc::clone(self), Rc::clone(query), production))
    }

    /// Runs `f` with network updates delayed and base index traversals
    /// coalesced, then propagates and notifies listeners once.
    ///
    /// # Errors
    ///
    /// Returns the error of `f`, of the traversal, or of the propagation.
    pub fn coalesce<R>(&self, f: impl FnOnce() -> Result<R>) -> Result<R> {
        self.check_live()?;
        let was_delayed = self.set_delay(true)?;
        let result = self.index.coalesce_traversals(f);
        let restored = self.set_delay(was_delayed);
        self.dispatch_pending();
        let value = result?;
        restored?;
        Ok(value)
    }

    fn set_delay(&self, delay: bool) -> Result<bool> {
        let mut net = self
            .container
            .try_borrow_mut()
            .map_err(|_| Error::internal("network is busy"))?;
        let was = net.delay_updates();
        net.set_delay_updates(delay)?;
        Ok(was)
    }

    /// Propagates queued updates and notifies listeners.
    ///
    /// # Errors
    ///
    /// Returns the error of the propagation.
    pub fn flush(&self) -> Result<()> {
        self.check_live()?;
        self.container
            .try_borrow_mut()
            .map_err(|_| Error::internal("network is busy"))?
            .flush_updates()?;
        self.dispatch_pending();
        Ok(())
    }

    /// Unsubscribes from the model and drops every listener. Further calls
    /// fail with `Disposed`; disposing twice is a no-op.
    ///
    /// # Errors
    ///
    /// Returns the first unsubscription failure.
    pub fn dispose(&self) -> Result<()> {
        if self.disposed.replace(true) {
            return Ok(());
        }
        self.builder.borrow_mut().detach(&self.context)?;
        if let Some(listener) = self.change_listener.borrow_mut().take() {
            self.index.remove_base_index_change_listener(&listener);
        }
        self.registrations.borrow_mut().clear();
        self.index.dispose()?;
        info!("query engine disposed");
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Matcher support
    // -------------------------------------------------------------------------

    pub(crate) fn pull(&self, production: NodeId) -> Result<Vec<Tuple>> {
        self.check_live()?;
        let tuples = self
            .container
            .try_borrow_mut()
            .map_err(|_| Error::internal("network is busy"))?
            .pull_into(production, true)?;
        self.dispatch_pending();
        Ok(tuples)
    }

    pub(crate) fn register(
        &self,
        production: NodeId,
        query: &Rc<PQuery>,
        listener: Rc<dyn MatchUpdateListener>,
    ) -> Result<ListenerId> {
        self.check_live()?;
        let id = ListenerId(self.next_listener.get());
        self.next_listener.set(id.0 + 1);
        self.registrations.borrow_mut().push(Registration {
            id,
            production,
            query: Rc::clone(query),
            listener,
        });
        debug!(pattern = query.fqn(), listener = id.0, "match listener added");
        Ok(id)
    }

    pub(crate) fn unregister(&self, id: ListenerId) -> bool {
        let mut registrations = self.registrations.borrow_mut();
        let before = registrations.len();
        registrations.retain(|r| r.id != id);
        registrations.len() != before
    }

    /// Flushes delayed updates only when no batch is open, takes the net
    /// production changes, and calls listeners with every borrow released.
    pub(crate) fn dispatch_pending(&self) {
        if self.disposed.get() {
            return;
        }
        let changes = {
            let Ok(mut net) = self.container.try_borrow_mut() else {
                warn!("match dispatch skipped while the network is busy");
                return;
            };
            if net.delay_updates() && !self.index.is_coalescing() {
                if let Err(e) = net.flush_updates() {
                    error!(error = %e, "failed to propagate delayed updates");
                }
            }
            net.take_production_deltas()
        };
        if changes.is_empty() {
            return;
        }

        let registrations: Vec<(NodeId, Rc<PQuery>, Rc<dyn MatchUpdateListener>)> = self
            .registrations
            .borrow()
            .iter()
            .map(|r| (r.production, Rc::clone(&r.query), Rc::clone(&r.listener)))
            .collect();
        let mut queries: HashMap<NodeId, Rc<PQuery>> = HashMap::new();
        for (production, query, _) in &registrations {
            queries.entry(*production).or_insert_with(|| Rc::clone(query));
        }
        for (node, delta) in changes {
            let Some(query) = queries.get(&node) else {
                continue;
            };
            let m = Match::new(Rc::clone(query), delta.tuple);
            for (production, _, listener) in &registrations {
                if *production != node {
                    continue;
                }
                if delta.direction.is_insert() {
                    listener.appeared(&m);
                } else {
                    listener.disappeared(&m);
                }
            }
        }
    }
}

impl std::fmt::Debug for QueryEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryEngine")
            .field("index", &self.index)
            .field("listeners", &self.registrations.borrow().len())
            .field("disposed", &self.disposed.get())
            .finish_non_exhaustive()
    }
}
