use std::future::Future;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

use crate::dispatch::process::OnDemandDispatcher;

/// Control messages understood by the dispatch loop.
#[derive(Debug)]
pub enum DispatchMessage {
    /// Run a cycle now instead of waiting for the next tick.
    TriggerNow,
    Quit,
}

/// Handle for nudging or stopping the background dispatch loop.
pub struct DispatchService {
    sender: mpsc::UnboundedSender<DispatchMessage>,
}

impl DispatchService {
    pub fn trigger_now(&self) {
        self.send(DispatchMessage::TriggerNow);
    }

    pub fn quit(&self) {
        self.send(DispatchMessage::Quit);
    }

    fn send(&self, message: DispatchMessage) {
        let _ = self.sender.send(message);
    }
}

/// Creates the dispatch service together with its background loop.
///
/// The loop runs one cycle per `interval` tick and awaits each cycle inline,
/// so cycles never overlap and the queue-load snapshot is never updated
/// concurrently. Cycle errors are logged and the loop continues; the next
/// tick is the cycle-level retry.
pub fn create_dispatch_service(
    dispatcher: OnDemandDispatcher,
    interval: Duration,
) -> (DispatchService, impl Future<Output = ()>) {
    let (sender, receiver) = mpsc::unbounded_channel();
    let process = dispatch_process(dispatcher, interval, receiver);
    (DispatchService { sender }, process)
}

async fn dispatch_process(
    dispatcher: OnDemandDispatcher,
    interval: Duration,
    mut receiver: mpsc::UnboundedReceiver<DispatchMessage>,
) {
    let mut tick = tokio::time::interval(interval);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = tick.tick() => {
                run_cycle(&dispatcher).await;
            }
            message = receiver.recv() => {
                match message {
                    Some(DispatchMessage::TriggerNow) => {
                        run_cycle(&dispatcher).await;
                        tick.reset();
                    }
                    Some(DispatchMessage::Quit) | None => break,
                }
            }
        }
    }
    log::debug!("Ending dispatch loop");
}

async fn run_cycle(dispatcher: &OnDemandDispatcher) {
    // The cycle logs its own summary or skip event; only failures are
    // handled here.
    if let Err(error) = dispatcher.dispatch_scan_requests().await {
        log::error!("Dispatch cycle failed: {error:?}");
    }
}
