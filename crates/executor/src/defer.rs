/// Runs a closure once when dropped, giving a `defer`-style cleanup guard.
///
/// Used throughout the serial-queue and waiting-task machinery to make sure
/// a "finally" step (notifying a queue, releasing a waiting task) runs
/// whether the guarded code returns normally or unwinds.
pub struct RunOnDrop<F: FnOnce()>(Option<F>);

impl<F: FnOnce()> RunOnDrop<F> {
    pub fn new(f: F) -> Self {
        Self(Some(f))
    }
}

impl<F: FnOnce()> Drop for RunOnDrop<F> {
    fn drop(&mut self) {
        if let Some(f) = self.0.take() {
            f();
        }
    }
}
