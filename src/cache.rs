//! The cache façade: writes, reads, transactions, and subscriptions.
//!
//! [`Cache`] wires the engines together. A `write` opens a transaction
//! (monotonic id, optimism flag, empty notification set), runs the write
//! engine against the resolved root, compares root references to decide
//! whether anything changed, re-points the root index, and only then
//! flushes subscriber notifications. A `read` resolves the root by
//! visibility and hands back a lazy view.
//!
//! # Deferred delivery
//! Subscriber notifications never run inside the write traversal. They
//! enqueue during commit on an explicit queue owned by the façade and
//! drain only after the mutating borrow has fully ended, so a subscriber
//! always re-reads a post-commit store and writers never block on
//! subscriber work. Ordering follows the queue: notifications for
//! transactions T₁ < T₂ drain in that order, and a subscriber
//! unsubscribed between enqueue and drain is skipped.

use crate::ast::Document;
use crate::error::CacheError;
use crate::identity::{StoreKey, Variables};
use crate::node::{SubscriberId, TxId};
use crate::read::ObjectView;
use crate::store::{NodeStore, Transaction, Visibility};
use crate::write::Writer;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::rc::Rc;
use tracing::{debug, warn};

/// Root id used when a context supplies none.
pub const DEFAULT_ROOT: &str = "QUERY";

/// Read/write context: variable bindings, root id, and visibility.
///
/// Any string is a legal root id, enabling independent sub-roots
/// (`"Stack:5"`, `"QUERY/allStacks"`, …) that share the graph but are
/// written and read independently.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Context {
    /// Bindings for `$variable` argument references.
    pub variables: Variables,
    /// Root id; `None` means [`DEFAULT_ROOT`].
    pub root_id: Option<String>,
    /// Routes writes to the optimistic overlay and lets reads see it.
    pub optimistic: bool,
}

impl Context {
    /// The effective root id.
    pub fn root_id(&self) -> &str {
        self.root_id.as_deref().unwrap_or(DEFAULT_ROOT)
    }

    /// Sets a variable binding.
    pub fn variable(mut self, name: impl Into<String>, value: Value) -> Self {
        self.variables.insert(name.into(), value);
        self
    }

    /// Sets the root id.
    pub fn root(mut self, id: impl Into<String>) -> Self {
        self.root_id = Some(id.into());
        self
    }

    /// Sets the optimistic flag.
    pub fn optimistic(mut self, optimistic: bool) -> Self {
        self.optimistic = optimistic;
        self
    }

    fn visibility(&self) -> Visibility {
        Visibility::from_optimistic(self.optimistic)
    }
}

/// Callbacks registered by [`Observable::subscribe`].
pub struct Subscriber {
    next: Box<dyn for<'a> FnMut(ObjectView<'a>)>,
    error: Option<Box<dyn FnMut(CacheError)>>,
}

impl Subscriber {
    /// Builds a subscriber delivering views to `next`.
    pub fn new(next: impl for<'a> FnMut(ObjectView<'a>) + 'static) -> Self {
        Self {
            next: Box::new(next),
            error: None,
        }
    }

    /// Attaches an error channel. Without one, delivery errors are
    /// silently dropped.
    pub fn on_error(mut self, error: impl FnMut(CacheError) + 'static) -> Self {
        self.error = Some(Box::new(error));
        self
    }
}

impl fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscriber")
            .field("has_error_channel", &self.error.is_some())
            .finish()
    }
}

/// A query pinned to its root node, awaiting changes.
#[derive(Debug)]
struct ActiveSubscriber {
    query: Rc<Document>,
    context: Context,
    /// Root node at registration time; version chains grow forward from it.
    pinned: crate::arena::NodeId,
    subscriber: Subscriber,
}

/// One queued re-read-and-deliver task.
#[derive(Debug, Clone, Copy)]
struct Delivery {
    subscriber: SubscriberId,
    /// Transaction that triggered it; `None` for the first read after
    /// subscribing.
    tx: Option<TxId>,
}

/// A registered query, ready to accept a subscriber.
///
/// Returned by [`Cache::observe`]; call [`Observable::subscribe`] to start
/// deliveries. Subscribing resolves the root eagerly and fails when it
/// does not exist, intentionally stricter than `read`.
#[derive(Debug)]
pub struct Observable<'c> {
    cache: &'c mut Cache,
    query: Rc<Document>,
    context: Context,
}

impl Observable<'_> {
    /// Registers `subscriber` and schedules its first delivery.
    ///
    /// Returns the id to pass to [`Cache::unsubscribe`].
    pub fn subscribe(self, subscriber: Subscriber) -> Result<SubscriberId, CacheError> {
        let root_key = StoreKey::from(self.context.root_id());
        let root = self
            .cache
            .store
            .lookup(&root_key, self.context.visibility())
            .ok_or_else(|| CacheError::SubscribeMissingRoot {
                root_id: self.context.root_id().to_string(),
            })?;

        let id = self.cache.alloc_subscriber_id();
        self.cache
            .store
            .add_subscriber(root, id, self.context.optimistic);
        self.cache.active.insert(
            id,
            ActiveSubscriber {
                query: self.query,
                context: self.context,
                pinned: root,
                subscriber,
            },
        );
        self.cache.pending.push_back(Delivery {
            subscriber: id,
            tx: None,
        });
        self.cache.flush_pending();
        Ok(id)
    }
}

/// The normalized, query-shaped object cache.
#[derive(Debug, Default)]
pub struct Cache {
    store: NodeStore,
    tx_counter: u64,
    subscriber_counter: u64,
    active: BTreeMap<SubscriberId, ActiveSubscriber>,
    pending: VecDeque<Delivery>,
}

impl Cache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of graph node versions ever allocated.
    pub fn node_count(&self) -> usize {
        self.store.node_count()
    }

    /// Normalizes `data` into the graph along `query`'s selections.
    ///
    /// Returns `true` iff anything in the store actually changed, i.e. the
    /// root reference differs from the prior one. A `true` result has
    /// already flushed subscriber notifications by the time it returns.
    pub fn write(
        &mut self,
        query: &Document,
        data: &Value,
        context: &Context,
    ) -> Result<bool, CacheError> {
        let operation = query.operation()?;
        let data = data.as_object().ok_or(CacheError::NonObjectData)?;

        self.tx_counter += 1;
        let mut tx = Transaction::new(TxId::new(self.tx_counter), context.optimistic);
        let root_key = StoreKey::from(context.root_id());
        let prior = self.store.lookup(&root_key, context.visibility());

        let new_root = {
            let mut writer = Writer::new(
                &mut self.store,
                query.fragment_map(),
                &context.variables,
                &mut tx,
            );
            writer.write_selection_set(prior, &operation.selection_set, data)?
        };

        let changed = prior != Some(new_root);
        if changed {
            self.store
                .register_root(root_key, new_root, context.optimistic);
        }
        debug!(
            tx = tx.id.as_u64(),
            optimistic = tx.is_optimistic,
            changed,
            to_notify = tx.to_notify.len(),
            "write committed"
        );
        if changed {
            for subscriber in tx.to_notify {
                self.pending.push_back(Delivery {
                    subscriber,
                    tx: Some(tx.id),
                });
            }
            self.flush_pending();
        }
        Ok(changed)
    }

    /// Convenience wrapper: a write against the default root.
    pub fn write_query(
        &mut self,
        query: &Document,
        data: &Value,
        variables: Variables,
    ) -> Result<bool, CacheError> {
        let context = Context {
            variables,
            ..Context::default()
        };
        self.write(query, data, &context)
    }

    /// Projects `query` over the current graph.
    ///
    /// Returns `None` when no root is registered for the context's root id
    /// under its visibility (or when the document has no operation, which
    /// is reported as a diagnostic rather than an error at read time).
    pub fn read<'a>(&'a self, query: &'a Document, context: &'a Context) -> Option<ObjectView<'a>> {
        if query.operation().is_err() {
            warn!("read against a document with no operation definition");
            return None;
        }
        read_view(&self.store, query, context)
    }

    /// Convenience wrapper: an eager read against the default root.
    ///
    /// Materializes the projection so no borrow of the context outlives
    /// the call; `read` is the lazy path.
    pub fn read_query(&self, query: &Document, variables: Variables) -> Option<Value> {
        let context = Context {
            variables,
            ..Context::default()
        };
        self.read(query, &context).map(|view| view.to_json())
    }

    /// Registers interest in `query`: the returned [`Observable`] accepts
    /// one subscriber, which is re-notified after every transaction that
    /// copy-on-writes a path through the pinned root.
    pub fn observe(&mut self, query: Document, context: Context) -> Observable<'_> {
        Observable {
            cache: self,
            query: Rc::new(query),
            context,
        }
    }

    /// Drops a subscriber. Returns whether it was still registered.
    ///
    /// Takes effect synchronously; a delivery already queued before the
    /// unsubscribe is skipped when it drains.
    pub fn unsubscribe(&mut self, id: SubscriberId) -> bool {
        match self.active.remove(&id) {
            Some(active) => {
                self.store.remove_subscriber(active.pinned, id);
                true
            }
            None => false,
        }
    }

    /// Runs `updates` synchronously against this cache.
    ///
    /// Each write inside remains individually atomic and flushes its own
    /// notifications; there is no cross-write rollback. A write-ahead log
    /// with targeted rollback could be layered here later without
    /// changing the write path.
    pub fn tx<R>(&mut self, updates: impl FnOnce(&mut Cache) -> R) -> R {
        updates(self)
    }

    fn alloc_subscriber_id(&mut self) -> SubscriberId {
        self.subscriber_counter += 1;
        SubscriberId::new(self.subscriber_counter)
    }

    fn flush_pending(&mut self) {
        while let Some(delivery) = self.pending.pop_front() {
            self.deliver(delivery);
        }
    }

    fn deliver(&mut self, delivery: Delivery) {
        let id = delivery.subscriber;
        let Some(mut active) = self.active.remove(&id) else {
            warn!(
                subscriber = id.as_u64(),
                "skipping delivery to unsubscribed subscriber"
            );
            return;
        };
        debug!(
            subscriber = id.as_u64(),
            tx = delivery.tx.map(|t| t.as_u64()),
            "delivering subscription update"
        );
        {
            let query = Rc::clone(&active.query);
            match read_view(&self.store, &query, &active.context) {
                Some(view) => (active.subscriber.next)(view),
                None => match active.subscriber.error.as_mut() {
                    Some(error) => error(CacheError::NodeRemoved),
                    None => warn!(
                        subscriber = id.as_u64(),
                        "re-read found no root and subscriber has no error channel"
                    ),
                },
            }
        }
        self.active.insert(id, active);
    }
}

/// Resolves the root for `context` and builds the root view.
fn read_view<'a>(
    store: &'a NodeStore,
    query: &'a Document,
    context: &'a Context,
) -> Option<ObjectView<'a>> {
    let operation = query.operation().ok()?;
    let root_key = StoreKey::from(context.root_id());
    let root = store.lookup(&root_key, context.visibility())?;
    Some(ObjectView::new(
        store,
        root,
        &operation.selection_set,
        query.fragment_map(),
        &context.variables,
    ))
}
