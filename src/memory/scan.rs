//! Reclamation of retired pointers.
//!
//! `scan` is the only place a retired pointer is ever handed to the
//! destructor. `help_scan` adopts the retired lists of records that are not
//! currently claimed, so garbage left behind by slow or exited threads is
//! still freed.

use super::hazard_table::{HazardHandle, HazardTable};
use crate::error::HazardResult;
use std::collections::HashSet;
use std::mem;
use std::ptr;
use std::sync::atomic::{self, Ordering};
use tracing::debug;

impl<'a, T> HazardHandle<'a, T> {
    /// Frees every pointer in this record's retired list that no slot in the
    /// table publishes. Returns how many were freed.
    pub fn scan(&mut self) -> usize {
        let table = self.table;

        // Pairs with the SeqCst publish in `protect`: any hazard published
        // before the unlinking CAS is visible below.
        atomic::fence(Ordering::SeqCst);
        let protected: HashSet<*mut T> = table
            .records()
            .flat_map(|record| record.slots.iter())
            .map(|slot| slot.load(Ordering::SeqCst))
            .filter(|ptr| !ptr.is_null())
            .collect();

        let retired = unsafe { &mut *self.record.retired.get() };
        let mut freed = 0;
        retired.retain(|&ptr| {
            if protected.contains(&ptr) {
                return true;
            }
            unsafe {
                table.destroy(ptr);
            }
            freed += 1;
            false
        });

        debug!(record = self.record.id, freed, kept = retired.len(), "scan complete");
        freed
    }

    /// Takes over the retired pointers of every idle record, scanning whenever
    /// this record's own list fills up. Returns how many were freed.
    pub fn help_scan(&mut self) -> usize {
        let table = self.table;
        let threshold = table.config().get_scan_threshold();
        let mut adopted = 0;
        let mut freed = 0;

        for record in table.records() {
            if ptr::eq(record, self.record) || !record.begin_drain() {
                continue;
            }
            let orphans = unsafe { mem::take(&mut *record.retired.get()) };
            record.end_drain();

            for ptr in orphans {
                adopted += 1;
                let pending = unsafe {
                    let retired = &mut *self.record.retired.get();
                    retired.push(ptr);
                    retired.len()
                };
                if pending >= threshold {
                    freed += self.scan();
                }
            }
        }

        if adopted > 0 {
            debug!(record = self.record.id, adopted, freed, "help scan complete");
        }
        freed
    }
}

impl<T> HazardTable<T> {
    /// Forces a reclamation pass from the calling thread: adopts every idle
    /// record's garbage and frees whatever is no longer published.
    pub fn collect(&self) -> HazardResult<usize> {
        let mut handle = self.enter()?;
        let freed = handle.help_scan();
        Ok(freed + handle.scan())
    }
}

#[cfg(test)]
mod tests {
    use crate::config::HazardConfig;
    use crate::memory::HazardTable;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;

    fn boxed(value: u64) -> *mut u64 {
        Box::into_raw(Box::new(value))
    }

    #[test]
    fn test_scan_keeps_protected() {
        static FREED: AtomicUsize = AtomicUsize::new(0);
        unsafe fn counted_free(ptr: *mut u64) {
            FREED.fetch_add(1, Ordering::SeqCst);
            drop(Box::from_raw(ptr));
        }

        let mut table = HazardTable::new(HazardConfig::new(4, 2).scan_threshold(2)).unwrap();
        table.register_destructor(counted_free);

        let kept = boxed(1);
        let mut reader = table.enter().unwrap();
        reader.acquire(0, kept).unwrap();
        {
            let mut writer = table.enter().unwrap();
            unsafe {
                writer.release(kept, true).unwrap();
                writer.release(boxed(2), true).unwrap();
            }
            // Threshold reached: the unprotected pointer went, the other stays
            assert_eq!(FREED.load(Ordering::SeqCst), 1);
            assert_eq!(writer.retired_len(), 1);
            assert_eq!(writer.scan(), 0);
        }

        unsafe { reader.release(kept, false).unwrap() };
        assert_eq!(reader.scan(), 0);
        assert_eq!(reader.help_scan(), 0);
        assert_eq!(reader.retired_len(), 1);
        assert_eq!(reader.scan(), 1);
        assert_eq!(FREED.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_help_scan_drains_idle_records() {
        static FREED: AtomicUsize = AtomicUsize::new(0);
        unsafe fn counted_free(ptr: *mut u64) {
            FREED.fetch_add(1, Ordering::SeqCst);
            drop(Box::from_raw(ptr));
        }

        let mut table = HazardTable::new(HazardConfig::new(8, 2).scan_threshold(4)).unwrap();
        table.register_destructor(counted_free);
        let table = Arc::new(table);

        let mut handle = table.enter().unwrap();

        // Each thread leaves fewer than the threshold behind and exits
        for value in 0..3 {
            let table = table.clone();
            thread::spawn(move || {
                let mut handle = table.enter().unwrap();
                unsafe { handle.release(boxed(value), true).unwrap() };
            })
            .join()
            .unwrap();
        }
        assert_eq!(FREED.load(Ordering::SeqCst), 0);
        assert_eq!(table.record_count(), 2);

        // A claimed record is left alone, whoever holds it
        let busy = table.enter().unwrap();
        assert_eq!(busy.retired_len(), 3);
        assert_eq!(handle.help_scan(), 0);
        assert_eq!(handle.retired_len(), 0);
        drop(busy);

        assert_eq!(handle.help_scan(), 0);
        assert_eq!(handle.retired_len(), 3);
        assert_eq!(handle.scan(), 3);
        assert_eq!(FREED.load(Ordering::SeqCst), 3);
        drop(handle);

        assert_eq!(table.collect().unwrap(), 0);
    }

    #[test]
    fn test_collect_frees_everything_unprotected() {
        static FREED: AtomicUsize = AtomicUsize::new(0);
        unsafe fn counted_free(ptr: *mut u64) {
            FREED.fetch_add(1, Ordering::SeqCst);
            drop(Box::from_raw(ptr));
        }

        let mut table = HazardTable::new(HazardConfig::new(8, 1).scan_threshold(64)).unwrap();
        table.register_destructor(counted_free);
        let table = Arc::new(table);

        let mut waitvec = Vec::new();
        for thread_no in 0..4u64 {
            let table = table.clone();
            waitvec.push(thread::spawn(move || {
                for i in 0..10 {
                    let mut handle = table.enter().unwrap();
                    unsafe { handle.release(boxed(thread_no * 100 + i), true).unwrap() };
                }
            }));
        }
        for handle in waitvec {
            handle.join().unwrap();
        }

        assert_eq!(FREED.load(Ordering::SeqCst), 0);
        assert_eq!(table.collect().unwrap(), 40);
        assert_eq!(FREED.load(Ordering::SeqCst), 40);
    }
}
