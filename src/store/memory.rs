//! Journal-backed in-memory store. Every provider's book sits behind its own
//! `RwLock`; a mutation appends to the journal, applies in memory, and
//! notifies subscribers while still holding the write guard. That guard is
//! what makes `insert_if_no_conflict` an atomic fetch-check-insert.

use std::io;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use ulid::Ulid;

use crate::journal::{journal_writer_loop, Journal, JournalCommand};
use crate::limits::*;
use crate::model::*;
use crate::notify::EventHub;

use super::{AvailabilityStore, ReservationStore, ServiceCatalog, StoreError};

pub type SharedProviderBook = Arc<RwLock<ProviderBook>>;

pub struct MemoryStore {
    providers: DashMap<Ulid, SharedProviderBook>,
    journal_tx: mpsc::Sender<JournalCommand>,
    pub hub: Arc<EventHub>,
    /// Reverse lookup: window/service/reservation id → provider id.
    entity_to_provider: DashMap<Ulid, Ulid>,
    /// Client → reservation ids, in booking order.
    client_index: DashMap<Ulid, Vec<Ulid>>,
    /// Serializes provider registration against journal compaction; see
    /// `compact_journal`.
    registry_lock: Mutex<()>,
}

/// Extract the provider id from an event (for non-Register events).
fn event_provider_id(event: &Event) -> Option<Ulid> {
    match event {
        Event::WindowPublished { provider, .. }
        | Event::WindowWithdrawn { provider, .. }
        | Event::ServiceListed { provider, .. }
        | Event::ServiceDelisted { provider, .. }
        | Event::ReservationBooked { provider, .. }
        | Event::ReservationConfirmed { provider, .. }
        | Event::ReservationCancelled { provider, .. } => Some(*provider),
        Event::ProviderRegistered { .. } => None,
    }
}

/// Emit the minimal event sequence that recreates one book.
fn emit_book(book: &ProviderBook, events: &mut Vec<Event>) {
    events.push(Event::ProviderRegistered {
        id: book.id,
        name: book.name.clone(),
    });
    for w in &book.windows {
        events.push(Event::WindowPublished {
            id: w.id,
            provider: book.id,
            date: w.date,
            start_min: w.start_min,
            end_min: w.end_min,
            blocked: w.blocked,
        });
    }
    for s in &book.services {
        events.push(Event::ServiceListed {
            id: s.id,
            provider: book.id,
            name: s.name.clone(),
            duration_min: s.duration_min,
            price_minor: s.price_minor,
        });
        if !s.active {
            events.push(Event::ServiceDelisted { id: s.id, provider: book.id });
        }
    }
    for r in &book.reservations {
        events.push(Event::ReservationBooked {
            id: r.id,
            provider: book.id,
            client: r.client,
            service: r.service,
            start: r.start,
            duration_min: r.duration_min,
            note: r.note.clone(),
        });
        match r.status {
            ReservationStatus::Booked => {}
            ReservationStatus::Confirmed => {
                events.push(Event::ReservationConfirmed { id: r.id, provider: book.id })
            }
            ReservationStatus::Cancelled => {
                events.push(Event::ReservationCancelled { id: r.id, provider: book.id })
            }
        }
    }
}

impl MemoryStore {
    /// Open the journal at `journal_path`, replay it, and spawn the
    /// group-commit writer. Must run inside a tokio runtime.
    pub fn open(journal_path: &Path, hub: Arc<EventHub>) -> io::Result<Self> {
        let events = Journal::replay(journal_path)?;
        let journal = Journal::open(journal_path)?;
        let (journal_tx, journal_rx) = mpsc::channel(4096);
        tokio::spawn(journal_writer_loop(journal, journal_rx));

        let store = Self {
            providers: DashMap::new(),
            journal_tx,
            hub,
            entity_to_provider: DashMap::new(),
            client_index: DashMap::new(),
            registry_lock: Mutex::new(()),
        };

        // Replay — we're the sole owner of these Arcs, so try_write always
        // succeeds instantly (no contention). Never blocking_write here
        // because this may run inside an async context.
        for event in &events {
            match event {
                Event::ProviderRegistered { id, name } => {
                    let book = ProviderBook::new(*id, name.clone());
                    store.providers.insert(*id, Arc::new(RwLock::new(book)));
                }
                other => {
                    if let Some(provider) = event_provider_id(other)
                        && let Some(entry) = store.providers.get(&provider) {
                            let book_arc = entry.clone();
                            let mut guard =
                                book_arc.try_write().expect("replay: uncontended write");
                            store.apply(&mut guard, other);
                        }
                }
            }
        }

        metrics::gauge!(crate::observability::PROVIDERS_ACTIVE)
            .set(store.providers.len() as f64);
        Ok(store)
    }

    /// Apply an event to a book (no locking — caller holds the write lock).
    fn apply(&self, book: &mut ProviderBook, event: &Event) {
        match event {
            Event::WindowPublished { id, provider, date, start_min, end_min, blocked } => {
                book.windows.push(AvailabilityWindow {
                    id: *id,
                    provider: *provider,
                    date: *date,
                    start_min: *start_min,
                    end_min: *end_min,
                    blocked: *blocked,
                });
                self.entity_to_provider.insert(*id, *provider);
            }
            Event::WindowWithdrawn { id, .. } => {
                book.remove_window(*id);
                self.entity_to_provider.remove(id);
            }
            Event::ServiceListed { id, provider, name, duration_min, price_minor } => {
                book.services.push(Service {
                    id: *id,
                    provider: *provider,
                    name: name.clone(),
                    duration_min: *duration_min,
                    price_minor: *price_minor,
                    active: true,
                });
                self.entity_to_provider.insert(*id, *provider);
            }
            Event::ServiceDelisted { id, .. } => {
                if let Some(service) = book.service_mut(*id) {
                    service.active = false;
                }
            }
            Event::ReservationBooked { id, provider, client, service, start, duration_min, note } => {
                book.insert_reservation(Reservation {
                    id: *id,
                    provider: *provider,
                    client: *client,
                    service: *service,
                    start: *start,
                    duration_min: *duration_min,
                    status: ReservationStatus::Booked,
                    note: note.clone(),
                });
                self.entity_to_provider.insert(*id, *provider);
                self.client_index.entry(*client).or_default().push(*id);
            }
            Event::ReservationConfirmed { id, .. } => {
                if let Some(r) = book.reservation_mut(*id) {
                    r.status = ReservationStatus::Confirmed;
                }
            }
            Event::ReservationCancelled { id, .. } => {
                if let Some(r) = book.reservation_mut(*id) {
                    r.status = ReservationStatus::Cancelled;
                }
            }
            // Registration is handled at the DashMap level, not here
            Event::ProviderRegistered { .. } => {}
        }
    }

    /// Write an event via the background group-commit writer.
    async fn journal_append(&self, event: &Event) -> Result<(), StoreError> {
        let (tx, rx) = oneshot::channel();
        self.journal_tx
            .send(JournalCommand::Append { event: event.clone(), response: tx })
            .await
            .map_err(|_| StoreError::Io("journal writer shut down".into()))?;
        rx.await
            .map_err(|_| StoreError::Io("journal writer dropped response".into()))?
            .map_err(|e| StoreError::Io(e.to_string()))
    }

    /// Journal-append + apply + notify in one call. The caller holds the
    /// provider's write lock across all three, so a committed event is
    /// visible in memory before anyone else can observe the book.
    async fn persist_and_apply(
        &self,
        provider: Ulid,
        book: &mut ProviderBook,
        event: &Event,
    ) -> Result<(), StoreError> {
        self.journal_append(event).await?;
        self.apply(book, event);
        self.hub.send(provider, event);
        Ok(())
    }

    fn book_of(&self, provider: &Ulid) -> Option<SharedProviderBook> {
        self.providers.get(provider).map(|e| e.value().clone())
    }

    fn provider_of(&self, entity: &Ulid) -> Option<Ulid> {
        self.entity_to_provider.get(entity).map(|e| *e.value())
    }

    /// Lookup entity → provider, get the book, acquire its write lock.
    async fn resolve_entity_write(
        &self,
        entity: &Ulid,
    ) -> Result<(Ulid, tokio::sync::OwnedRwLockWriteGuard<ProviderBook>), StoreError> {
        let provider = self.provider_of(entity).ok_or(StoreError::NotFound(*entity))?;
        let book = self
            .book_of(&provider)
            .ok_or(StoreError::ProviderNotFound(provider))?;
        let guard = book.write_owned().await;
        Ok((provider, guard))
    }

    // ── Provider administration ──────────────────────────────────

    pub async fn register_provider(&self, name: &str) -> Result<Ulid, StoreError> {
        if name.is_empty() || name.len() > MAX_NAME_LEN {
            return Err(StoreError::Invalid("provider name length"));
        }
        if self.providers.len() >= MAX_PROVIDERS {
            return Err(StoreError::LimitExceeded("too many providers"));
        }
        // Held so a concurrent compaction cannot snapshot between our
        // journal append and the map insert.
        let _reg = self.registry_lock.lock().await;
        let id = Ulid::new();
        let event = Event::ProviderRegistered { id, name: name.to_owned() };
        self.journal_append(&event).await?;
        self.providers
            .insert(id, Arc::new(RwLock::new(ProviderBook::new(id, name.to_owned()))));
        self.hub.send(id, &event);
        metrics::gauge!(crate::observability::PROVIDERS_ACTIVE)
            .set(self.providers.len() as f64);
        Ok(id)
    }

    pub async fn publish_window(
        &self,
        provider: Ulid,
        date: NaiveDate,
        start_min: u32,
        end_min: u32,
        blocked: bool,
    ) -> Result<Ulid, StoreError> {
        if start_min >= end_min || end_min > MINUTES_PER_DAY {
            return Err(StoreError::Invalid("window minutes out of range"));
        }
        let book = self
            .book_of(&provider)
            .ok_or(StoreError::ProviderNotFound(provider))?;
        let mut guard = book.write().await;
        if guard.windows.len() >= MAX_WINDOWS_PER_PROVIDER {
            return Err(StoreError::LimitExceeded("too many windows on provider"));
        }
        let id = Ulid::new();
        let event = Event::WindowPublished { id, provider, date, start_min, end_min, blocked };
        self.persist_and_apply(provider, &mut guard, &event).await?;
        Ok(id)
    }

    pub async fn withdraw_window(&self, id: Ulid) -> Result<Ulid, StoreError> {
        let (provider, mut guard) = self.resolve_entity_write(&id).await?;
        let event = Event::WindowWithdrawn { id, provider };
        self.persist_and_apply(provider, &mut guard, &event).await?;
        Ok(provider)
    }

    pub async fn list_service(
        &self,
        provider: Ulid,
        name: &str,
        duration_min: u32,
        price_minor: i64,
    ) -> Result<Ulid, StoreError> {
        if name.is_empty() || name.len() > MAX_NAME_LEN {
            return Err(StoreError::Invalid("service name length"));
        }
        if duration_min == 0 || duration_min > MAX_RESERVATION_DURATION_MIN {
            return Err(StoreError::Invalid("service duration out of range"));
        }
        if price_minor < 0 {
            return Err(StoreError::Invalid("service price must not be negative"));
        }
        let book = self
            .book_of(&provider)
            .ok_or(StoreError::ProviderNotFound(provider))?;
        let mut guard = book.write().await;
        if guard.services.len() >= MAX_SERVICES_PER_PROVIDER {
            return Err(StoreError::LimitExceeded("too many services on provider"));
        }
        let id = Ulid::new();
        let event = Event::ServiceListed {
            id,
            provider,
            name: name.to_owned(),
            duration_min,
            price_minor,
        };
        self.persist_and_apply(provider, &mut guard, &event).await?;
        Ok(id)
    }

    pub async fn delist_service(&self, id: Ulid) -> Result<Ulid, StoreError> {
        let (provider, mut guard) = self.resolve_entity_write(&id).await?;
        match guard.service(id) {
            None => return Err(StoreError::NotFound(id)),
            Some(s) if !s.active => return Ok(provider), // already delisted
            Some(_) => {}
        }
        let event = Event::ServiceDelisted { id, provider };
        self.persist_and_apply(provider, &mut guard, &event).await?;
        Ok(provider)
    }

    // ── Reservation lifecycle ────────────────────────────────────

    pub async fn confirm_reservation(&self, id: Ulid) -> Result<Reservation, StoreError> {
        let (provider, mut guard) = self.resolve_entity_write(&id).await?;
        let status = guard.reservation(id).ok_or(StoreError::NotFound(id))?.status;
        match status {
            ReservationStatus::Cancelled => {
                return Err(StoreError::Invalid("reservation is cancelled"));
            }
            ReservationStatus::Confirmed => {} // idempotent
            ReservationStatus::Booked => {
                let event = Event::ReservationConfirmed { id, provider };
                self.persist_and_apply(provider, &mut guard, &event).await?;
            }
        }
        guard.reservation(id).cloned().ok_or(StoreError::NotFound(id))
    }

    pub async fn cancel_reservation(&self, id: Ulid) -> Result<Reservation, StoreError> {
        let (provider, mut guard) = self.resolve_entity_write(&id).await?;
        let status = guard.reservation(id).ok_or(StoreError::NotFound(id))?.status;
        if status.is_active() {
            let event = Event::ReservationCancelled { id, provider };
            self.persist_and_apply(provider, &mut guard, &event).await?;
        }
        guard.reservation(id).cloned().ok_or(StoreError::NotFound(id))
    }

    // ── Queries ──────────────────────────────────────────────────

    pub async fn list_providers(&self) -> Vec<ProviderInfo> {
        let books: Vec<SharedProviderBook> =
            self.providers.iter().map(|e| e.value().clone()).collect();
        let mut out = Vec::with_capacity(books.len());
        for book in books {
            let guard = book.read().await;
            out.push(ProviderInfo { id: guard.id, name: guard.name.clone() });
        }
        out.sort_by_key(|p| p.id);
        out
    }

    pub async fn provider_info(&self, id: Ulid) -> Option<ProviderInfo> {
        let book = self.book_of(&id)?;
        let guard = book.read().await;
        Some(ProviderInfo { id: guard.id, name: guard.name.clone() })
    }

    /// Active services of one provider, the bookable catalog view.
    pub async fn list_services(&self, provider: Ulid) -> Result<Vec<Service>, StoreError> {
        let book = self
            .book_of(&provider)
            .ok_or(StoreError::ProviderNotFound(provider))?;
        let guard = book.read().await;
        Ok(guard.services.iter().filter(|s| s.active).cloned().collect())
    }

    /// All of a provider's reservations starting inside `range`, every
    /// status included. This is the provider's own ledger view.
    pub async fn list_reservations(
        &self,
        provider: Ulid,
        range: TimeInterval,
    ) -> Result<Vec<Reservation>, StoreError> {
        if range.start >= range.end {
            return Err(StoreError::Invalid("range start must be before end"));
        }
        if range.duration_ms() > MAX_QUERY_WINDOW_MS {
            return Err(StoreError::LimitExceeded("query window too wide"));
        }
        let book = self
            .book_of(&provider)
            .ok_or(StoreError::ProviderNotFound(provider))?;
        let guard = book.read().await;
        let lo = guard.reservations.partition_point(|r| r.start < range.start);
        let hi = guard.reservations.partition_point(|r| r.start < range.end);
        Ok(guard.reservations[lo..hi].to_vec())
    }

    /// Everything one client booked, across providers, oldest first.
    pub async fn list_for_client(&self, client: Ulid) -> Vec<Reservation> {
        let ids: Vec<Ulid> = self
            .client_index
            .get(&client)
            .map(|v| v.clone())
            .unwrap_or_default();
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(provider) = self.provider_of(&id)
                && let Some(book) = self.book_of(&provider) {
                    let guard = book.read().await;
                    if let Some(r) = guard.reservation(id) {
                        out.push(r.clone());
                    }
                }
        }
        out.sort_by_key(|r| r.start);
        out
    }

    // ── Journal maintenance ──────────────────────────────────────

    /// Rewrite the journal down to the events that recreate current state.
    ///
    /// Takes the registry lock plus every book's write lock in sorted order
    /// (the multi-lock discipline all batch paths use) so nothing can commit
    /// between the snapshot and the file swap. Returns Ok(false) without
    /// compacting when any lock is contended; the sweeper retries next tick.
    pub async fn compact_journal(&self) -> Result<bool, StoreError> {
        let Ok(_reg) = self.registry_lock.try_lock() else {
            return Ok(false);
        };

        let mut provider_ids: Vec<Ulid> = self.providers.iter().map(|e| *e.key()).collect();
        provider_ids.sort();

        let mut guards = Vec::with_capacity(provider_ids.len());
        for pid in &provider_ids {
            let Some(book) = self.book_of(pid) else { continue };
            match book.try_write_owned() {
                Ok(guard) => guards.push(guard),
                Err(_) => return Ok(false), // busy — skip this pass
            }
        }

        let mut events = Vec::new();
        for guard in &guards {
            emit_book(guard, &mut events);
        }

        let (tx, rx) = oneshot::channel();
        self.journal_tx
            .send(JournalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| StoreError::Io("journal writer shut down".into()))?;
        rx.await
            .map_err(|_| StoreError::Io("journal writer dropped response".into()))?
            .map_err(|e| StoreError::Io(e.to_string()))?;
        Ok(true)
    }

    pub async fn journal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .journal_tx
            .send(JournalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

#[async_trait]
impl AvailabilityStore for MemoryStore {
    async fn list_windows(
        &self,
        provider: Ulid,
        date: NaiveDate,
    ) -> Result<Vec<AvailabilityWindow>, StoreError> {
        let book = self
            .book_of(&provider)
            .ok_or(StoreError::ProviderNotFound(provider))?;
        let guard = book.read().await;
        Ok(guard.windows_on(date).cloned().collect())
    }
}

#[async_trait]
impl ReservationStore for MemoryStore {
    async fn list_active(
        &self,
        provider: Ulid,
        range: TimeInterval,
    ) -> Result<Vec<Reservation>, StoreError> {
        let book = self
            .book_of(&provider)
            .ok_or(StoreError::ProviderNotFound(provider))?;
        let guard = book.read().await;
        let lo = guard.reservations.partition_point(|r| r.start < range.start);
        let hi = guard.reservations.partition_point(|r| r.start < range.end);
        Ok(guard.reservations[lo..hi]
            .iter()
            .filter(|r| r.status.is_active())
            .cloned()
            .collect())
    }

    async fn insert_if_no_conflict(
        &self,
        reservation: Reservation,
        conflicts_with: &(dyn for<'a> Fn(&'a Reservation) -> bool + Send + Sync),
    ) -> Result<Reservation, StoreError> {
        let book = self
            .book_of(&reservation.provider)
            .ok_or(StoreError::ProviderNotFound(reservation.provider))?;
        let mut guard = book.write().await;

        // Idempotent replay: same id with identical fields returns the
        // stored reservation; anything else is key reuse.
        if let Some(existing) = guard.reservation(reservation.id) {
            if existing.provider == reservation.provider
                && existing.client == reservation.client
                && existing.service == reservation.service
                && existing.start == reservation.start
                && existing.duration_min == reservation.duration_min
            {
                return Ok(existing.clone());
            }
            return Err(StoreError::KeyReuse(reservation.id));
        }

        if guard.reservations.len() >= MAX_RESERVATIONS_PER_PROVIDER {
            return Err(StoreError::LimitExceeded("too many reservations on provider"));
        }

        // Scan and insert under one write guard: concurrent bookings for
        // this provider serialize here, so at most one of an overlapping
        // set can pass the scan.
        let candidate = reservation.interval();
        for existing in guard.overlapping(&candidate) {
            if conflicts_with(existing) {
                return Err(StoreError::Conflict(existing.id));
            }
        }

        let event = Event::ReservationBooked {
            id: reservation.id,
            provider: reservation.provider,
            client: reservation.client,
            service: reservation.service,
            start: reservation.start,
            duration_min: reservation.duration_min,
            note: reservation.note.clone(),
        };
        self.persist_and_apply(reservation.provider, &mut guard, &event).await?;
        guard
            .reservation(reservation.id)
            .cloned()
            .ok_or(StoreError::NotFound(reservation.id))
    }
}

#[async_trait]
impl ServiceCatalog for MemoryStore {
    async fn get_active_service(&self, id: Ulid) -> Result<Option<Service>, StoreError> {
        let Some(provider) = self.provider_of(&id) else {
            return Ok(None);
        };
        let Some(book) = self.book_of(&provider) else {
            return Ok(None);
        };
        let guard = book.read().await;
        Ok(guard.service(id).filter(|s| s.active).cloned())
    }
}
