use crossbeam_channel::{bounded, select, tick, Sender};
use log::{debug, info};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Named thread that calls a closure on a fixed period until stopped or dropped.
pub struct Driver {
    name: String,
    stop_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl Driver {
    pub fn spawn<F>(name: &str, period: Duration, mut on_tick: F) -> std::io::Result<Self>
    where
        F: FnMut() + Send + 'static,
    {
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let ticker = tick(period);
        let handle = thread::Builder::new().name(name.into()).spawn(move || {
            let mut ticks: u64 = 0;
            loop {
                select! {
                    recv(ticker) -> _ => {
                        on_tick();
                        ticks += 1;
                    }
                    recv(stop_rx) -> _ => break,
                }
            }
            debug!("Timer thread exiting after {} ticks", ticks);
        })?;
        info!("Timer {:?} armed every {} ms", name, period.as_millis());
        Ok(Self {
            name: name.to_string(),
            stop_tx: Some(stop_tx),
            handle: Some(handle),
        })
    }

    /// Stop the timer and wait for an in-flight tick to finish.
    pub fn stop(&mut self) {
        // Dropping the sender disconnects the stop channel, which wakes the select.
        self.stop_tx.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
            debug!("Timer {:?} stopped", self.name);
        }
    }
}

impl Drop for Driver {
    fn drop(&mut self) {
        self.stop();
    }
}
