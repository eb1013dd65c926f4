use crate::config::HazardConfig;
use crate::error::{HazardError, HazardResult};
use crate::structures::backoff::Backoff;
use std::cell::UnsafeCell;
use std::collections::HashSet;
use std::fmt;
use std::marker::PhantomData;
use std::ptr;
use std::sync::atomic::{self, AtomicPtr, AtomicU8, AtomicUsize, Ordering};
use thread_local::ThreadLocal;
use tracing::{info, trace, warn};

/// Performs the actual free of a pointer once no thread can reach it.
pub type Destructor<T> = unsafe fn(*mut T);

unsafe fn free_boxed<T>(ptr: *mut T) {
    drop(Box::from_raw(ptr));
}

/// Registry of hazard records shared by every thread that touches the
/// structures built on top of it.
///
/// A thread talks to the table through a [`HazardHandle`], which owns one
/// record for as long as it lives. Records are never freed while the table is
/// alive; a dropped handle returns its record to the pool together with any
/// retired pointers it still holds.
///
/// When the table is dropped, the retired pointers of every record are
/// deduplicated and each is passed to the destructor exactly once. Pointers
/// that are still published in a slot but were never retired are not
/// destroyed: a slot only protects a pointer, it does not own it, and the
/// structure the pointer belongs to frees it itself. Such leftovers can only
/// come from a leaked handle and are reported with a warning.
pub struct HazardTable<T> {
    head: AtomicPtr<HazardRecord<T>>,
    size: AtomicUsize,
    // Records currently owned by a live handle
    held: AtomicUsize,
    config: HazardConfig,
    destructor: Destructor<T>,
    affinity: ThreadLocal<AtomicPtr<HazardRecord<T>>>,
    _marker: PhantomData<*mut T>,
}

unsafe impl<T: Send> Send for HazardTable<T> {}
unsafe impl<T: Send> Sync for HazardTable<T> {}

const IDLE: u8 = 0;
const HELD: u8 = 1;
const DRAINING: u8 = 2;

pub(crate) struct HazardRecord<T> {
    pub(crate) id: usize,
    pub(crate) slots: Box<[AtomicPtr<T>]>,
    state: AtomicU8,
    // Only touched by whoever moved `state` away from IDLE.
    pub(crate) retired: UnsafeCell<Vec<*mut T>>,
    next: AtomicPtr<HazardRecord<T>>,
}

impl<T> HazardRecord<T> {
    fn new(id: usize, slots: usize) -> Self {
        HazardRecord {
            id,
            slots: (0..slots).map(|_| AtomicPtr::default()).collect(),
            state: AtomicU8::new(HELD),
            retired: UnsafeCell::new(Vec::new()),
            next: AtomicPtr::default(),
        }
    }

    fn transition(&self, to: u8) -> bool {
        self.state
            .compare_exchange(IDLE, to, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    /// Claims an idle record for a handle.
    fn claim(&self) -> bool {
        self.transition(HELD)
    }

    /// Claims an idle record just long enough to take its retired list.
    pub(crate) fn begin_drain(&self) -> bool {
        self.transition(DRAINING)
    }

    pub(crate) fn end_drain(&self) {
        self.state.store(IDLE, Ordering::Release);
    }

    fn unclaim(&self) {
        self.state.store(IDLE, Ordering::Release);
    }
}

pub(crate) struct Records<'a, T> {
    current: *mut HazardRecord<T>,
    _marker: PhantomData<&'a HazardRecord<T>>,
}

impl<'a, T> Iterator for Records<'a, T> {
    type Item = &'a HazardRecord<T>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.current.is_null() {
            return None;
        }
        let record = unsafe { &*self.current };
        self.current = record.next.load(Ordering::Acquire);
        Some(record)
    }
}

impl<T> HazardTable<T> {
    pub fn new(config: HazardConfig) -> HazardResult<Self> {
        config.validate()?;
        Ok(Self::with_config(config))
    }

    fn with_config(config: HazardConfig) -> Self {
        HazardTable {
            head: AtomicPtr::default(),
            size: AtomicUsize::new(0),
            held: AtomicUsize::new(0),
            config,
            destructor: free_boxed::<T>,
            affinity: ThreadLocal::new(),
            _marker: PhantomData,
        }
    }

    /// Installs the function used to free retired pointers. Must happen
    /// before the table is shared; the default frees through `Box`.
    pub fn register_destructor(&mut self, destructor: Destructor<T>) {
        self.destructor = destructor;
    }

    pub fn config(&self) -> &HazardConfig {
        &self.config
    }

    /// Number of records ever created. Never decreases.
    pub fn record_count(&self) -> usize {
        self.size.load(Ordering::Acquire)
    }

    /// Claims a record for the calling thread.
    ///
    /// The record this thread used last is tried first, then any idle record,
    /// and only then is a new one allocated.
    ///
    /// Fails with `TableFull` only when `max_threads` records exist and every
    /// one of them belongs to a live handle. A record that is merely being
    /// drained by a `help_scan`, or that changes hands while we look, is
    /// waited for instead.
    pub fn enter(&self) -> HazardResult<HazardHandle<'_, T>> {
        let hint = self.affinity.get_or(AtomicPtr::default);
        let preferred = hint.load(Ordering::Relaxed);
        if !preferred.is_null() {
            let record = unsafe { &*preferred };
            if record.claim() {
                return Ok(self.hand_out(record));
            }
        }

        let mut backoff = Backoff::new();
        let record = loop {
            if let Some(record) = self.claim_idle() {
                break record;
            }
            if let Some(record) = self.allocate_record() {
                break record;
            }
            // `held` never overcounts, so reaching the size means all records
            // really were owned by handles at that moment
            let max_threads = self.config.get_max_threads();
            if self.held.load(Ordering::Acquire) >= self.size.load(Ordering::Acquire) {
                warn!(max_threads, "no idle hazard record left to claim");
                return Err(HazardError::TableFull { max_threads });
            }
            backoff.snooze();
        };
        hint.store(record as *const HazardRecord<T> as *mut HazardRecord<T>, Ordering::Relaxed);
        Ok(self.hand_out(record))
    }

    fn hand_out<'a>(&'a self, record: &'a HazardRecord<T>) -> HazardHandle<'a, T> {
        self.held.fetch_add(1, Ordering::AcqRel);
        HazardHandle { table: self, record }
    }

    /// Whether any record currently publishes `ptr`.
    pub fn is_protected(&self, ptr: *mut T) -> bool {
        atomic::fence(Ordering::SeqCst);
        self.records()
            .flat_map(|record| record.slots.iter())
            .any(|slot| ptr::eq(slot.load(Ordering::SeqCst), ptr))
    }

    pub(crate) fn records(&self) -> Records<'_, T> {
        Records {
            current: self.head.load(Ordering::Acquire),
            _marker: PhantomData,
        }
    }

    pub(crate) unsafe fn destroy(&self, ptr: *mut T) {
        (self.destructor)(ptr);
    }

    fn claim_idle(&self) -> Option<&HazardRecord<T>> {
        self.records().find(|record| record.claim())
    }

    /// Reserves an id below `max_threads` and links a new, already held
    /// record. `None` once the table has reached its size.
    fn allocate_record(&self) -> Option<&HazardRecord<T>> {
        let max_threads = self.config.get_max_threads();
        let id = self
            .size
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |size| {
                if size < max_threads {
                    Some(size + 1)
                } else {
                    None
                }
            })
            .ok()?;

        let record = Box::into_raw(Box::new(HazardRecord::new(
            id,
            self.config.get_slots_per_thread(),
        )));

        // CAS push the new record onto the table. Records are never unlinked,
        // so there is no ABA to worry about here.
        loop {
            let head = self.head.load(Ordering::Acquire);
            unsafe {
                (*record).next.store(head, Ordering::Relaxed);
            }
            if self
                .head
                .compare_exchange_weak(head, record, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                break;
            }
        }
        trace!(record = id, "hazard record allocated");

        Some(unsafe { &*record })
    }
}

impl<T> Default for HazardTable<T> {
    fn default() -> Self {
        HazardTable::with_config(HazardConfig::default())
    }
}

impl<T> fmt::Debug for HazardTable<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("HazardTable")
            .field("records", &self.record_count())
            .field("config", &self.config)
            .finish()
    }
}

impl<T> Drop for HazardTable<T> {
    fn drop(&mut self) {
        let mut outstanding: HashSet<*mut T> = HashSet::new();
        let mut published: HashSet<*mut T> = HashSet::new();
        let mut records = 0;

        let mut current = *self.head.get_mut();
        while !current.is_null() {
            let HazardRecord {
                slots,
                retired,
                next,
                ..
            } = *unsafe { Box::from_raw(current) };
            published.extend(
                slots
                    .iter()
                    .map(|slot| slot.load(Ordering::Relaxed))
                    .filter(|ptr| !ptr.is_null()),
            );
            outstanding.extend(retired.into_inner());
            current = next.into_inner();
            records += 1;
        }

        // A published pointer that was never retired belongs to whoever leaked
        // the handle, not to us.
        let stray = published.difference(&outstanding).count();
        if stray > 0 {
            warn!(stray, "hazard pointers still published at teardown");
        }

        let destroyed = outstanding.len();
        for ptr in outstanding {
            unsafe {
                (self.destructor)(ptr);
            }
        }
        info!(records, destroyed, "hazard table torn down");
    }
}

/// A claimed hazard record.
///
/// Publishing a pointer in one of the K slots forbids every thread from
/// freeing it until the slot is cleared. Dropping the handle clears all slots
/// and hands the record back to the table.
pub struct HazardHandle<'a, T> {
    pub(crate) table: &'a HazardTable<T>,
    pub(crate) record: &'a HazardRecord<T>,
}

impl<'a, T> HazardHandle<'a, T> {
    /// Stable identifier of the underlying record.
    pub fn id(&self) -> usize {
        self.record.id
    }

    pub fn slots(&self) -> usize {
        self.record.slots.len()
    }

    /// The pointer currently published at `index`, if any.
    pub fn published(&self, index: usize) -> Option<*mut T> {
        self.record
            .slots
            .get(index)
            .map(|slot| slot.load(Ordering::Relaxed))
            .filter(|ptr| !ptr.is_null())
    }

    /// Number of pointers waiting in this record's retired list.
    pub fn retired_len(&self) -> usize {
        unsafe { (*self.record.retired.get()).len() }
    }

    /// Publishes `ptr` at `index`, replacing whatever the slot held.
    ///
    /// Publishing alone does not make dereferencing safe: the caller must
    /// re-read the shared location afterwards and check it still holds `ptr`.
    pub fn acquire(&mut self, index: usize, ptr: *mut T) -> HazardResult<()> {
        let slots = self.slots();
        if index >= slots {
            warn!(record = self.record.id, index, slots, "hazard slot index out of range");
            return Err(HazardError::SlotOutOfRange { index, slots });
        }
        if ptr.is_null() {
            warn!(record = self.record.id, index, "refusing to publish a null hazard pointer");
            return Err(HazardError::NullPointer);
        }
        self.protect(index, ptr);
        trace!(record = self.record.id, index, ?ptr, "hazard acquired");
        Ok(())
    }

    /// Unchecked publish used by the structures. A null `ptr` clears the slot.
    pub(crate) fn protect(&mut self, index: usize, ptr: *mut T) {
        debug_assert!(index < self.slots());
        self.record.slots[index].store(ptr, Ordering::SeqCst);
    }

    /// Clears every slot holding `ptr`, and retires it when `retire` is set.
    ///
    /// # Safety
    /// With `retire` set, ownership of `ptr` passes to the table: it must be
    /// unreachable from every shared structure, must not be retired twice, and
    /// must be something the registered destructor can free.
    pub unsafe fn release(&mut self, ptr: *mut T, retire: bool) -> HazardResult<()> {
        if ptr.is_null() {
            warn!(record = self.record.id, "refusing to release a null hazard pointer");
            return Err(HazardError::NullPointer);
        }
        for slot in self.record.slots.iter() {
            if ptr::eq(slot.load(Ordering::Relaxed), ptr) {
                slot.store(ptr::null_mut(), Ordering::Release);
            }
        }
        trace!(record = self.record.id, ?ptr, retire, "hazard released");
        if retire {
            self.retire(ptr);
        }
        Ok(())
    }

    /// Clears every slot, retiring each distinct pointer when `retire` is set.
    ///
    /// # Safety
    /// Same contract as [`release`](Self::release) for every published pointer.
    pub unsafe fn release_all(&mut self, retire: bool) {
        let mut owned: Vec<*mut T> = Vec::new();
        for slot in self.record.slots.iter() {
            let ptr = slot.swap(ptr::null_mut(), Ordering::Release);
            if retire && !ptr.is_null() && !owned.contains(&ptr) {
                owned.push(ptr);
            }
        }
        for ptr in owned {
            self.retire(ptr);
        }
    }

    /// Clears every slot without retiring anything.
    pub fn clear(&mut self) {
        for slot in self.record.slots.iter() {
            slot.store(ptr::null_mut(), Ordering::Release);
        }
    }

    pub(crate) unsafe fn retire(&mut self, ptr: *mut T) {
        let pending = {
            let retired = &mut *self.record.retired.get();
            retired.push(ptr);
            retired.len()
        };
        if pending >= self.table.config.get_scan_threshold() {
            self.scan();
            self.help_scan();
        }
    }
}

impl<'a, T> Drop for HazardHandle<'a, T> {
    fn drop(&mut self) {
        self.clear();
        // Drop the count first so `held` can only ever undercount
        self.table.held.fetch_sub(1, Ordering::AcqRel);
        self.record.unclaim();
    }
}

impl<'a, T> fmt::Debug for HazardHandle<'a, T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let published: Vec<*mut T> = self
            .record
            .slots
            .iter()
            .map(|slot| slot.load(Ordering::Relaxed))
            .collect();
        f.debug_struct("HazardHandle")
            .field("record", &self.record.id)
            .field("published", &published)
            .field("retired", &self.retired_len())
            .finish()
    }
}
