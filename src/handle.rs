use crate::control::ControlBlock;
use log::trace;
use std::marker::PhantomData;
use std::ops::Deref;
use std::ptr::{self, NonNull};

/// Thread-safe shared-ownership smart pointer.
/// Every clone of a `SharedHandle` increments the count in its `ControlBlock`;
/// every drop decrements it, and the handle whose decrement reaches zero frees
/// the managed object together with the block. Moving a handle transfers
/// ownership without touching the counter.
///
/// `SharedHandle` only guarantees the lifetime of the pointee; it does not
/// synchronize access to the pointee's own state.
#[derive(Debug)]
pub struct SharedHandle<T> {
    obj: Option<NonNull<T>>,
    ctrl: NonNull<ControlBlock>,
    _marker: PhantomData<T>,
}

unsafe impl<T: Send + Sync> Send for SharedHandle<T> {}
unsafe impl<T: Sync + Send> Sync for SharedHandle<T> {}

fn fresh_block(count: usize) -> NonNull<ControlBlock> {
    let block = Box::new(ControlBlock::new(count));
    unsafe { NonNull::new_unchecked(Box::into_raw(block)) }
}

impl<T> SharedHandle<T> {
    /// Moves `value` to the heap and takes sole ownership of it (count 1).
    pub fn new(value: T) -> SharedHandle<T> {
        let obj = unsafe { NonNull::new_unchecked(Box::into_raw(Box::new(value))) };
        Self {
            obj: Some(obj),
            ctrl: fresh_block(1),
            _marker: PhantomData,
        }
    }

    /// Takes ownership of a caller-supplied heap pointer (count 1).
    ///
    /// # Safety
    /// `ptr` must come from `Box::into_raw` and must not be owned by any
    /// other `SharedHandle` family or freed by any other path. Wrapping the
    /// same pointer twice is a double free.
    pub unsafe fn from_raw(ptr: *mut T) -> SharedHandle<T> {
        debug_assert!(!ptr.is_null());
        Self {
            obj: unsafe { Some(NonNull::new_unchecked(ptr)) },
            ctrl: fresh_block(1),
            _marker: PhantomData,
        }
    }

    /// Reference to the managed object, or `None` for an empty handle.
    pub fn get(&self) -> Option<&T> {
        self.obj.map(|p| unsafe { &*p.as_ptr() })
    }

    /// The managed pointer itself; null for an empty handle. Does not
    /// transfer ownership.
    pub fn as_ptr(&self) -> *const T {
        self.obj.map_or(ptr::null(), |p| p.as_ptr() as *const T)
    }

    /// The control block shared by every handle in this family.
    pub fn control(&self) -> &ControlBlock {
        unsafe { self.ctrl.as_ref() }
    }

    /// Diagnostic snapshot of the shared count. May be stale the moment it
    /// returns; never use it to decide whether the object is still alive.
    pub fn use_count(&self) -> usize {
        self.control().current()
    }

    /// Releases this handle's ownership and returns it to the empty state.
    pub fn reset(&mut self) {
        self.release();
        self.obj = None;
        self.ctrl = fresh_block(0);
    }

    // Gives up ownership of the current object and block. Leaves `self.ctrl`
    // dangling: the caller must reassign both pointers or never touch the
    // handle again (Drop).
    //
    // After a non-final decrement the block must not be touched again: the
    // remaining owners are free to race it to zero and free it before this
    // thread does anything else.
    fn release(&mut self) {
        match self.obj.take() {
            Some(obj) => {
                if self.control().decrement_and_check_zero() {
                    trace!("count reached zero, destroying managed object");
                    unsafe {
                        drop(Box::from_raw(obj.as_ptr()));
                        drop(Box::from_raw(self.ctrl.as_ptr()));
                    }
                } else {
                    trace!("handle released, other owners remain");
                }
            }
            // An empty handle is the sole owner of its count-0 block.
            None => unsafe { drop(Box::from_raw(self.ctrl.as_ptr())) },
        }
    }
}

impl<T> Default for SharedHandle<T> {
    /// Empty handle: no managed object, a private control block at count 0.
    fn default() -> SharedHandle<T> {
        Self {
            obj: None,
            ctrl: fresh_block(0),
            _marker: PhantomData,
        }
    }
}

impl<T> Clone for SharedHandle<T> {
    fn clone(&self) -> Self {
        match self.obj {
            Some(obj) => {
                let handle = Self {
                    obj: Some(obj),
                    ctrl: self.ctrl,
                    _marker: PhantomData,
                };
                let count = handle.control().increment();
                trace!("handle cloned, count = {count}");
                handle
            }
            // Empty handles never share a block, so each copy gets its own.
            None => Self::default(),
        }
    }

    /// Copy assignment: release the old ownership fully, adopt the source's
    /// pointers, then increment. Self-assignment is a no-op. The `source`
    /// borrow keeps its family alive across the release/adopt window.
    fn clone_from(&mut self, source: &Self) {
        if self.ctrl == source.ctrl {
            return;
        }
        self.release();
        self.obj = source.obj;
        match source.obj {
            Some(_) => {
                self.ctrl = source.ctrl;
                let count = self.control().increment();
                trace!("handle assigned, count = {count}");
            }
            None => self.ctrl = fresh_block(0),
        }
    }
}

impl<T> Deref for SharedHandle<T> {
    type Target = T;
    fn deref(&self) -> &Self::Target {
        match self.obj {
            Some(p) => unsafe { p.as_ref() },
            None => panic!("dereferenced an empty SharedHandle"),
        }
    }
}

impl<T> Drop for SharedHandle<T> {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::SharedHandle;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    struct Counter<'a>(&'a AtomicUsize);
    impl<'a> Drop for Counter<'a> {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn drop_once() {
        let d = AtomicUsize::new(0);

        {
            let a = SharedHandle::new(Counter(&d));
            let b = a.clone();
            let c = b.clone();
            drop(a);
            drop(b);
            drop(c);
        }

        assert_eq!(d.load(Ordering::SeqCst), 1, "Drop must happen exactly once");
    }

    #[test]
    fn clone_increments_count() {
        let a = SharedHandle::new(10);
        let b = a.clone();
        let c = b.clone();

        assert_eq!(a.use_count(), 3);
        assert_eq!(*b, 10);
        assert_eq!(*c, 10);
    }

    #[test]
    fn move_does_not_touch_count() {
        let a = SharedHandle::new(7);
        assert_eq!(a.use_count(), 1);
        let b = a;
        assert_eq!(b.use_count(), 1);
    }

    #[test]
    fn self_assignment_is_noop() {
        let mut a = SharedHandle::new(5);
        let b = a.clone();
        a.clone_from(&b);
        assert_eq!(a.use_count(), 2);
        assert_eq!(*a, 5);
    }

    #[test]
    fn assignment_releases_old_ownership() {
        let old_drops = AtomicUsize::new(0);
        let new_drops = AtomicUsize::new(0);

        let mut target = SharedHandle::new(Counter(&old_drops));
        let source = SharedHandle::new(Counter(&new_drops));

        target.clone_from(&source);
        assert_eq!(old_drops.load(Ordering::SeqCst), 1);
        assert_eq!(source.use_count(), 2);

        drop(target);
        drop(source);
        assert_eq!(new_drops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn empty_handle() {
        let a: SharedHandle<String> = SharedHandle::default();
        assert!(a.get().is_none());
        assert!(a.as_ptr().is_null());
        assert_eq!(a.use_count(), 0);

        // copies of an empty handle are independent empties
        let b = a.clone();
        assert_eq!(b.use_count(), 0);
        drop(a);
        assert!(b.get().is_none());
    }

    #[test]
    fn assign_empty_over_owning() {
        let d = AtomicUsize::new(0);
        let mut a = SharedHandle::new(Counter(&d));
        let empty = SharedHandle::default();

        a.clone_from(&empty);
        assert_eq!(d.load(Ordering::SeqCst), 1);
        assert!(a.get().is_none());
    }

    #[test]
    #[should_panic(expected = "empty SharedHandle")]
    fn deref_of_empty_handle_panics() {
        let a: SharedHandle<u32> = SharedHandle::default();
        let _ = *a;
    }

    #[test]
    fn reset_releases_when_last() {
        let d = AtomicUsize::new(0);
        let mut a = SharedHandle::new(Counter(&d));
        let b = a.clone();

        a.reset();
        assert_eq!(d.load(Ordering::SeqCst), 0);
        assert!(a.get().is_none());
        assert_eq!(b.use_count(), 1);

        drop(b);
        assert_eq!(d.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn from_raw_adopts_pointer() {
        let raw = Box::into_raw(Box::new(String::from("adopted")));
        let a = unsafe { SharedHandle::from_raw(raw) };
        assert_eq!(*a, "adopted");
        assert_eq!(a.use_count(), 1);
    }

    #[test]
    fn concurrent_clones_and_drops() {
        let a = SharedHandle::new(123);
        let mut handles = vec![];

        for _ in 0..100 {
            let x = a.clone();
            handles.push(thread::spawn(move || {
                let _y = x.clone();
                let _z = x.clone();
            }));
        }

        for h in handles {
            h.join().unwrap();
        }

        // only the original handle should remain
        assert_eq!(a.use_count(), 1);
    }

    #[test]
    fn racing_final_and_non_final_drops() {
        // Two owners per family, dropped on racing threads: one thread takes
        // the non-final decrement while the other frees the object and the
        // block. The losing thread must not touch the block after its
        // decrement.
        for _ in 0..200 {
            let d: &'static AtomicUsize = Box::leak(Box::new(AtomicUsize::new(0)));
            let a = SharedHandle::new(Counter(d));
            let b = a.clone();

            let t1 = thread::spawn(move || drop(a));
            let t2 = thread::spawn(move || drop(b));
            t1.join().unwrap();
            t2.join().unwrap();

            assert_eq!(d.load(Ordering::SeqCst), 1);
        }
    }

    #[test]
    fn thread_access_after_clones() {
        let a = SharedHandle::new(99);
        let mut handles = vec![];

        for _ in 0..50 {
            let x = a.clone();
            handles.push(thread::spawn(move || {
                assert_eq!(*x, 99);
            }));
        }

        for h in handles {
            h.join().unwrap();
        }
    }
}
