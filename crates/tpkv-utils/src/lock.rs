use parking_lot::Mutex;

#[inline]
pub fn with_mutex<T, R>(lock: &Mutex<T>, f: impl FnOnce(&mut T) -> R) -> R {
    let mut guard = lock.lock();
    f(&mut *guard)
}
