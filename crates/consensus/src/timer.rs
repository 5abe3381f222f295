use std::future::Future;
use std::time::Duration;

use n0_future::task::AbortOnDropHandle;

/// One-shot timer, firing by running a future after a delay
///
/// Re-arming or stopping aborts the previous one, so a replaced timer never
/// fires.
#[derive(Default)]
pub struct Timer {
    handle: Option<AbortOnDropHandle<()>>,
}

impl Timer {
    pub fn arm<F>(&mut self, delay: Duration, on_fire: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.handle = Some(AbortOnDropHandle::new(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            on_fire.await;
        })));
    }

    pub fn stop(&mut self) {
        self.handle = None;
    }

    pub fn is_armed(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}
