use crate::SafetyCore;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{error, warn};
use xrc_event_bus::ConsoleEvent;

/// Why the fast-path cut an exposure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbortReason {
    /// One or more required interlocks dropped mid-exposure.
    InterlockLost(Vec<String>),
    /// The AEC reported termination before the engine saw completion.
    AecTerminated,
}

/// Notice handed to the engine after the hardware abort already happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AbortNotice {
    pub reason: AbortReason,
}

/// Armed abort fast-path for the duration of one exposure.
///
/// Dropping the watch without calling [`AbortWatch::disarm`] also stops it;
/// disarm exists so the normal completion path is explicit at the call site.
pub struct AbortWatch {
    disarm_tx: Option<oneshot::Sender<()>>,
    handle: tokio::task::JoinHandle<()>,
}

impl AbortWatch {
    /// Stands the watch down after a normal exposure completion.
    pub fn disarm(mut self) {
        if let Some(tx) = self.disarm_tx.take() {
            let _ = tx.send(());
        }
        self.handle.abort();
    }
}

impl Drop for AbortWatch {
    fn drop(&mut self) {
        if let Some(tx) = self.disarm_tx.take() {
            let _ = tx.send(());
        }
        self.handle.abort();
    }
}

impl SafetyCore {
    /// Arms the exposure abort fast-path.
    ///
    /// The spawned watcher waits on the interlock change stream and on the
    /// AEC termination signal. On either, it calls the generator abort
    /// directly, publishes a safety alert, and only then notifies the
    /// engine through `abort_tx`. The hardware call comes first; nothing on
    /// this path waits for the engine lock.
    pub fn arm_abort_watch(
        self: &Arc<Self>,
        mut aec_terminated: oneshot::Receiver<()>,
        abort_tx: mpsc::UnboundedSender<AbortNotice>,
    ) -> AbortWatch {
        let core = Arc::clone(self);
        let mut interlock_rx = self.subscribe_changes();
        let (disarm_tx, mut disarm_rx) = oneshot::channel();
        let handle = tokio::spawn(async move {
            let mut aec_alive = true;
            loop {
                tokio::select! {
                    _ = &mut disarm_rx => return,
                    res = &mut aec_terminated, if aec_alive => {
                        match res {
                            Ok(()) => {
                                core.fire_abort(AbortReason::AecTerminated, &abort_tx);
                                return;
                            }
                            // Signal source went away without terminating;
                            // keep watching the interlocks.
                            Err(_) => aec_alive = false,
                        }
                    }
                    changed = interlock_rx.changed() => {
                        if changed.is_err() {
                            warn!("Interlock source went away while an exposure was armed");
                            core.fire_abort(
                                AbortReason::InterlockLost(vec!["interlock_source".to_string()]),
                                &abort_tx,
                            );
                            return;
                        }
                        let status = *interlock_rx.borrow_and_update();
                        if !status.all_passed {
                            let failed = status
                                .failed_names()
                                .iter()
                                .map(|s| s.to_string())
                                .collect();
                            core.fire_abort(AbortReason::InterlockLost(failed), &abort_tx);
                            return;
                        }
                    }
                }
            }
        });
        AbortWatch {
            disarm_tx: Some(disarm_tx),
            handle,
        }
    }

    fn fire_abort(&self, reason: AbortReason, abort_tx: &mpsc::UnboundedSender<AbortNotice>) {
        if let Err(e) = self.generator().abort_exposure() {
            error!("Generator abort failed on the fast-path: {}", e);
        }
        let detail = match &reason {
            AbortReason::InterlockLost(failed) => {
                format!("Exposure aborted, interlocks lost: {}", failed.join(", "))
            }
            AbortReason::AecTerminated => "Exposure aborted on AEC termination".to_string(),
        };
        self.bus().publish(ConsoleEvent::SafetyAlert {
            code: "EXPOSURE_ABORT".to_string(),
            detail,
        });
        let _ = abort_tx.send(AbortNotice { reason });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SafetyCore;
    use std::time::{Duration, Instant};
    use xrc_event_bus::EventBus;
    use xrc_hardware::sim::{SimDetector, SimGenerator, SimInterlocks};

    fn armed_core() -> (
        Arc<SafetyCore>,
        Arc<SimInterlocks>,
        Arc<SimGenerator>,
        mpsc::UnboundedReceiver<AbortNotice>,
        AbortWatch,
        oneshot::Sender<()>,
    ) {
        let interlocks = Arc::new(SimInterlocks::new());
        let generator = Arc::new(SimGenerator::new());
        let detector = Arc::new(SimDetector::new());
        let bus = Arc::new(EventBus::new());
        let core = Arc::new(SafetyCore::new(
            interlocks.clone(),
            generator.clone(),
            detector,
            bus,
        ));
        let (aec_tx, aec_rx) = oneshot::channel();
        let (abort_tx, abort_rx) = mpsc::unbounded_channel();
        let watch = core.arm_abort_watch(aec_rx, abort_tx);
        (core, interlocks, generator, abort_rx, watch, aec_tx)
    }

    #[tokio::test]
    async fn interlock_loss_aborts_the_generator_and_notifies() {
        let (_core, interlocks, generator, mut abort_rx, _watch, _aec_tx) = armed_core();
        let start = Instant::now();
        interlocks.set_door_closed(false);
        let notice = tokio::time::timeout(Duration::from_secs(1), abort_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            notice.reason,
            AbortReason::InterlockLost(vec!["door_closed".to_string()])
        );
        assert_eq!(generator.abort_count(), 1);
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[tokio::test]
    async fn aec_termination_aborts() {
        let (_core, _interlocks, generator, mut abort_rx, _watch, aec_tx) = armed_core();
        aec_tx.send(()).unwrap();
        let notice = tokio::time::timeout(Duration::from_secs(1), abort_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(notice.reason, AbortReason::AecTerminated);
        assert_eq!(generator.abort_count(), 1);
    }

    #[tokio::test]
    async fn disarm_suppresses_later_changes() {
        let (_core, interlocks, generator, mut abort_rx, watch, _aec_tx) = armed_core();
        watch.disarm();
        interlocks.set_door_closed(false);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(abort_rx.try_recv().is_err());
        assert_eq!(generator.abort_count(), 0);
    }

    #[tokio::test]
    async fn passing_changes_do_not_abort() {
        let (_core, interlocks, generator, mut abort_rx, _watch, _aec_tx) = armed_core();
        // A change that keeps the conjunction true must not fire.
        interlocks.update(|s| s.door_closed = true);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(abort_rx.try_recv().is_err());
        assert_eq!(generator.abort_count(), 0);
    }
}
