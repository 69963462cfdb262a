//! # Radio Task Dispatcher
//!
//! One dispatcher task per radio unit serialises every OPEN, RX_START,
//! RX_STOP, TX_SEND and CLOSE request against the radio.
//!
//! This module handles:
//! - The bounded task pool and the single-consumer queue
//! - The open/receive/close lifecycle and its collaborators
//! - Pausing reception around transmissions
//! - Returning the task slot before the completion runs
//!
//! # Examples
//!
//! ```no_run
//! use aprs_radio::bus::SimulatedChip;
//! use aprs_radio::config::Config;
//! use aprs_radio::dispatcher::{NoDecoderServices, RadioManager, RadioTask};
//! use aprs_radio::packet::Modulation;
//! use aprs_radio::si446x::{ChipSettings, Si446x};
//! use std::time::Duration;
//!
//! # async fn run() -> aprs_radio::error::Result<()> {
//! let config = Config::default();
//! let chip = Si446x::new(SimulatedChip::new(), ChipSettings::from_config(&config));
//! let (handle, dispatcher) = RadioManager::spawn(chip, Box::new(NoDecoderServices), &config);
//!
//! let outcome = handle
//!     .request(RadioTask::open(Modulation::Afsk), Duration::from_secs(1))
//!     .await?;
//! println!("{:?}", outcome.result());
//!
//! handle.terminate();
//! dispatcher.await.ok();
//! # Ok(())
//! # }
//! ```

pub mod lifecycle;
pub mod services;
pub mod task;

pub use lifecycle::LinkState;
pub use services::{Decoder, DecoderEvent, IdleDecoder, NoDecoderServices, PacketServices};
pub use task::{Completion, RadioTask, TaskCommand, TaskOutcome, TaskResult, TaskSlot};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{mpsc, oneshot, watch, Mutex, OwnedMutexGuard, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::bus::SpiBus;
use crate::config::Config;
use crate::error::{RadioError, Result};
use crate::feeder::{spawn_feeder, FeederSettings, SharedRadio, TransmitJob, TxReport};
use crate::packet::{Frame, Modulation};
use crate::si446x::{ReceiveParams, Si446x};
use task::Submission;

/// Dispatcher sizing and timing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatcherSettings {
    pub unit: u8,
    /// Task slots in the pool (and queue depth)
    pub task_pool_size: usize,
    /// How often an idle dispatcher checks for termination
    pub poll_interval: Duration,
    /// Longest wait to take ownership of the radio
    pub lock_timeout: Duration,
    /// Longest wait for the decoder to acknowledge close and exit
    pub decoder_close_timeout: Duration,
    pub feeder: FeederSettings,
}

impl Default for DispatcherSettings {
    fn default() -> Self {
        Self {
            unit: 0,
            task_pool_size: 10,
            poll_interval: Duration::from_millis(100),
            lock_timeout: Duration::from_secs(15),
            decoder_close_timeout: Duration::from_secs(5),
            feeder: FeederSettings::default(),
        }
    }
}

impl DispatcherSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            unit: config.radio.unit,
            task_pool_size: config.dispatcher.task_pool_size,
            poll_interval: Duration::from_millis(config.dispatcher.poll_interval_ms),
            lock_timeout: Duration::from_millis(config.dispatcher.lock_timeout_ms),
            decoder_close_timeout: Duration::from_millis(config.dispatcher.decoder_close_timeout_ms),
            feeder: FeederSettings::from_config(config),
        }
    }
}

/// Starts dispatchers
pub struct RadioManager;

impl RadioManager {
    /// Spawn the dispatcher for one radio unit using configured settings
    ///
    /// # Returns
    ///
    /// * `(RadioHandle<B>, JoinHandle<()>)` - Producer handle and the dispatcher task
    pub fn spawn<B>(
        chip: Si446x<B>,
        services: Box<dyn PacketServices>,
        config: &Config,
    ) -> (RadioHandle<B>, JoinHandle<()>)
    where
        B: SpiBus + 'static,
    {
        Self::spawn_with_settings(chip, services, DispatcherSettings::from_config(config))
    }

    pub fn spawn_with_settings<B>(
        chip: Si446x<B>,
        services: Box<dyn PacketServices>,
        settings: DispatcherSettings,
    ) -> (RadioHandle<B>, JoinHandle<()>)
    where
        B: SpiBus + 'static,
    {
        let pool_size = settings.task_pool_size.max(1);
        let radio: SharedRadio<B> = Arc::new(Mutex::new(chip));
        let pool = Arc::new(Semaphore::new(pool_size));
        let (queue_tx, queue_rx) = mpsc::channel(pool_size);
        let terminate = Arc::new(AtomicBool::new(false));
        let (closed_tx, closed_rx) = watch::channel(true);

        let dispatcher = Dispatcher {
            radio: radio.clone(),
            services,
            decoder: None,
            link: LinkState::Closed,
            rx_params: None,
            settings,
            pool: pool.clone(),
            queue: queue_rx,
            terminate: terminate.clone(),
            closed: closed_tx,
        };

        let handle = RadioHandle {
            radio,
            pool,
            queue: queue_tx,
            terminate,
            closed: closed_rx,
            pool_size,
            lock_timeout: settings.lock_timeout,
        };

        (handle, tokio::spawn(dispatcher.run()))
    }
}

/// Producer side of a radio dispatcher
pub struct RadioHandle<B: SpiBus> {
    radio: SharedRadio<B>,
    pool: Arc<Semaphore>,
    queue: mpsc::Sender<Submission>,
    terminate: Arc<AtomicBool>,
    closed: watch::Receiver<bool>,
    pool_size: usize,
    lock_timeout: Duration,
}

impl<B: SpiBus> Clone for RadioHandle<B> {
    fn clone(&self) -> Self {
        Self {
            radio: self.radio.clone(),
            pool: self.pool.clone(),
            queue: self.queue.clone(),
            terminate: self.terminate.clone(),
            closed: self.closed.clone(),
            pool_size: self.pool_size,
            lock_timeout: self.lock_timeout,
        }
    }
}

impl<B: SpiBus> RadioHandle<B> {
    /// Reserve a task slot, waiting up to `wait`
    ///
    /// # Errors
    ///
    /// Returns `Timeout` if the pool stays exhausted, `DispatcherClosed`
    /// after termination
    pub async fn acquire_task(&self, wait: Duration) -> Result<TaskSlot> {
        if self.terminate.load(Ordering::Acquire) {
            return Err(RadioError::DispatcherClosed);
        }

        match timeout(wait, self.pool.clone().acquire_owned()).await {
            Ok(Ok(permit)) => Ok(TaskSlot::new(permit)),
            Ok(Err(_)) => Err(RadioError::DispatcherClosed),
            Err(_) => Err(RadioError::Timeout("task slot")),
        }
    }

    /// Queue a populated task
    ///
    /// The slot travels with the task and is returned to the pool before
    /// `completion` runs.
    pub fn submit(&self, slot: TaskSlot, task: RadioTask, completion: Completion) -> Result<()> {
        let submission = Submission {
            slot,
            task,
            completion,
        };

        self.queue.try_send(submission).map_err(|e| match e {
            mpsc::error::TrySendError::Closed(_) => RadioError::DispatcherClosed,
            mpsc::error::TrySendError::Full(_) => RadioError::Timeout("task queue"),
        })
    }

    /// Acquire a slot, submit `task` and wait for its outcome
    pub async fn request(&self, task: RadioTask, wait: Duration) -> Result<TaskOutcome> {
        let slot = self.acquire_task(wait).await?;
        let (tx, rx) = oneshot::channel();
        self.submit(slot, task, Completion::Notify(tx))?;
        rx.await.map_err(|_| RadioError::DispatcherClosed)
    }

    pub fn available_slots(&self) -> usize {
        self.pool.available_permits()
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Ask the dispatcher to stop after the current task
    pub fn terminate(&self) {
        self.terminate.store(true, Ordering::Release);
    }

    /// Whether the link is currently closed
    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Wait until the link reports closed
    pub async fn wait_closed(&self) -> Result<()> {
        let mut closed = self.closed.clone();
        closed
            .wait_for(|closed| *closed)
            .await
            .map(|_| ())
            .map_err(|_| RadioError::DispatcherClosed)
    }

    /// Chip temperature in centidegrees, measured once per power session
    pub async fn temperature(&self) -> Result<Option<i16>> {
        let mut chip = timeout(self.lock_timeout, self.radio.lock())
            .await
            .map_err(|_| RadioError::Timeout("radio lock"))?;
        chip.temperature().await
    }
}

struct Dispatcher<B: SpiBus> {
    radio: SharedRadio<B>,
    services: Box<dyn PacketServices>,
    decoder: Option<Box<dyn Decoder>>,
    link: LinkState,
    rx_params: Option<ReceiveParams>,
    settings: DispatcherSettings,
    pool: Arc<Semaphore>,
    queue: mpsc::Receiver<Submission>,
    terminate: Arc<AtomicBool>,
    closed: watch::Sender<bool>,
}

impl<B: SpiBus + 'static> Dispatcher<B> {
    async fn run(mut self) {
        let unit = self.settings.unit;
        info!("Radio {} dispatcher started", unit);

        loop {
            if self.terminate.load(Ordering::Acquire) {
                break;
            }

            match timeout(self.settings.poll_interval, self.queue.recv()).await {
                Err(_) => continue,
                Ok(None) => {
                    debug!("Radio {} all producers gone", unit);
                    break;
                }
                Ok(Some(submission)) => self.process(submission).await,
            }
        }

        // Queued tasks are dropped; their slots return and requesters see
        // the dispatcher as closed
        self.pool.close();
        self.queue.close();
        let abandoned = std::iter::from_fn(|| self.queue.try_recv().ok()).count();
        if abandoned > 0 {
            warn!("Radio {} dropped {} queued tasks on termination", unit, abandoned);
        }

        self.closed.send_replace(true);
        info!("Radio {} dispatcher terminated", unit);
    }

    async fn process(&mut self, submission: Submission) {
        let Submission {
            slot,
            mut task,
            completion,
        } = submission;

        debug!(
            "Radio {} processing {:?} (seq {})",
            self.settings.unit, task.command, task.sequence
        );

        let (result, tx_report) = self.execute(&task).await;
        task.result = Some(result);

        debug!(
            "Radio {} {:?} finished with {:?}",
            self.settings.unit, task.command, result
        );

        drop(slot);
        completion.complete(TaskOutcome { task, tx_report });
    }

    async fn execute(&mut self, task: &RadioTask) -> (TaskResult, Option<TxReport>) {
        let Some(next) = self.link.transition(task.command) else {
            warn!(
                "Radio {} {:?} not allowed while {:?}",
                self.settings.unit, task.command, self.link
            );
            return (TaskResult::Rejected, None);
        };

        let (result, report) = match task.command {
            TaskCommand::Open => (self.open(task).await, None),
            TaskCommand::RxStart => (self.start_receive(task).await, None),
            TaskCommand::RxStop => (self.stop_receive().await, None),
            TaskCommand::TxSend => self.send(task).await,
            TaskCommand::Close => (self.close().await, None),
        };

        if matches!(result, TaskResult::Ok | TaskResult::NoData) || task.command == TaskCommand::Close {
            if self.link != next {
                info!("Radio {} link {:?} -> {:?}", self.settings.unit, self.link, next);
            }
            self.link = next;
        }

        (result, report)
    }

    fn release_services(&mut self) {
        let unit = self.settings.unit;
        self.services.release_callbacks(unit);
        self.services.release_buffers(unit);
    }

    async fn open(&mut self, task: &RadioTask) -> TaskResult {
        let unit = self.settings.unit;

        if let Err(e) = self.services.create_buffers(unit) {
            error!("Radio {} unable to create packet buffers: {}", unit, e);
            return TaskResult::Failed;
        }

        if let Err(e) = self.services.create_callbacks(unit) {
            error!("Radio {} unable to create callbacks: {}", unit, e);
            self.services.release_buffers(unit);
            return TaskResult::Failed;
        }

        if task.modulation == Modulation::Afsk {
            match self.services.create_decoder(unit) {
                Ok(decoder) => self.decoder = Some(decoder),
                Err(e) => {
                    error!("Radio {} unable to create AFSK decoder: {}", unit, e);
                    self.release_services();
                    return TaskResult::Failed;
                }
            }
        }

        let init = match lock_radio(self.radio.clone(), unit, self.settings.lock_timeout).await {
            Some(mut chip) => chip.initialize_once().await,
            None => Err(RadioError::Timeout("radio lock")),
        };

        if let Err(e) = init {
            error!("Radio {} initialisation failed: {}", unit, e);
            self.decoder = None;
            self.release_services();
            return match e {
                RadioError::Timeout(_) => TaskResult::Timeout,
                _ => TaskResult::Failed,
            };
        }

        self.closed.send_replace(false);
        info!("Radio {} opened ({:?})", unit, task.modulation);
        TaskResult::Ok
    }

    async fn start_receive(&mut self, task: &RadioTask) -> TaskResult {
        let unit = self.settings.unit;
        let params = task.receive_params();

        // The decoder only runs once the radio is ours
        let Some(mut chip) = lock_radio(self.radio.clone(), unit, self.settings.lock_timeout).await else {
            return TaskResult::Timeout;
        };

        if let Some(decoder) = self.decoder.as_mut() {
            if let Err(e) = decoder.start() {
                error!("Radio {} decoder start failed: {}", unit, e);
                return TaskResult::Failed;
            }
        }

        match chip.start_receive(&params).await {
            Ok(()) => {
                self.rx_params = Some(params);
                TaskResult::Ok
            }
            Err(e) => {
                drop(chip);
                error!("Radio {} receive start failed: {}", unit, e);
                if let Some(decoder) = self.decoder.as_mut() {
                    if let Err(e) = decoder.stop() {
                        warn!("Radio {} decoder stop failed: {}", unit, e);
                    }
                }
                match e {
                    RadioError::FrequencyOutOfRange(_) | RadioError::UnsupportedModulation(_) => {
                        TaskResult::Rejected
                    }
                    _ => TaskResult::Failed,
                }
            }
        }
    }

    async fn stop_receive(&mut self) -> TaskResult {
        let unit = self.settings.unit;

        if let Some(decoder) = self.decoder.as_mut() {
            if let Err(e) = decoder.stop() {
                warn!("Radio {} decoder stop failed: {}", unit, e);
            }
        }
        self.rx_params = None;

        let Some(mut chip) = lock_radio(self.radio.clone(), unit, self.settings.lock_timeout).await else {
            return TaskResult::Timeout;
        };

        match chip.pause_receive().await {
            Ok(()) => TaskResult::Ok,
            Err(e) => {
                error!("Radio {} receive stop failed: {}", unit, e);
                TaskResult::Failed
            }
        }
    }

    async fn send(&mut self, task: &RadioTask) -> (TaskResult, Option<TxReport>) {
        let unit = self.settings.unit;
        let receiving = self.link == LinkState::Receiving;

        if receiving {
            if let Some(decoder) = self.decoder.as_mut() {
                decoder.pause();
            }
        }

        let job = TransmitJob {
            sequence: task.sequence,
            modulation: task.modulation,
            base_frequency: task.base_frequency,
            step_hz: task.step_hz,
            channel: task.channel,
            power: task.tx_power,
            squelch: task.squelch,
            bitrate: task.tx_bitrate,
            frame: task.frame.clone().unwrap_or_else(Frame::empty),
        };

        let feeder = spawn_feeder(self.radio.clone(), job, self.settings.feeder);
        let report = match feeder.await {
            Ok(report) => Some(report),
            Err(e) => {
                error!("Radio {} feeder task failed: {}", unit, e);
                None
            }
        };
        let result = report
            .as_ref()
            .map(|report| TaskResult::from(report.outcome))
            .unwrap_or(TaskResult::Failed);

        if receiving {
            self.restore_receive().await;
            if let Some(decoder) = self.decoder.as_mut() {
                decoder.resume();
            }
        }

        (result, report)
    }

    async fn restore_receive(&mut self) {
        let unit = self.settings.unit;
        let Some(params) = self.rx_params else {
            return;
        };
        let Some(mut chip) = lock_radio(self.radio.clone(), unit, self.settings.lock_timeout).await else {
            return;
        };

        if let Err(e) = chip.start_receive(&params).await {
            error!("Radio {} could not resume reception: {}", unit, e);
        }
    }

    async fn close(&mut self) -> TaskResult {
        let unit = self.settings.unit;
        let wait = self.settings.decoder_close_timeout;
        let mut result = TaskResult::Ok;

        if let Some(mut decoder) = self.decoder.take() {
            let mut events = decoder.subscribe();
            decoder.signal_close();

            let acked = timeout(wait, async {
                loop {
                    match events.recv().await {
                        Ok(DecoderEvent::CloseAck) => return true,
                        Ok(_) | Err(RecvError::Lagged(_)) => continue,
                        Err(RecvError::Closed) => return false,
                    }
                }
            })
            .await;

            match acked {
                Ok(true) => debug!("Radio {} decoder acknowledged close", unit),
                Ok(false) => warn!("Radio {} decoder event stream ended without ack", unit),
                Err(_) => {
                    warn!("Radio {} decoder did not acknowledge close within {:?}", unit, wait);
                    result = TaskResult::Timeout;
                }
            }
            drop(events);

            if let Some(mut worker) = decoder.take_worker() {
                if timeout(wait, &mut worker).await.is_err() {
                    warn!("Radio {} decoder worker did not exit, aborting it", unit);
                    worker.abort();
                    result = TaskResult::Timeout;
                }
            }
        }

        self.release_services();
        self.rx_params = None;

        match lock_radio(self.radio.clone(), unit, self.settings.lock_timeout).await {
            Some(mut chip) => chip.shutdown(),
            None => result = TaskResult::Timeout,
        }

        self.closed.send_replace(true);
        info!("Radio {} closed", unit);
        result
    }
}

/// Take ownership of the radio, waiting at most `wait`
async fn lock_radio<B: SpiBus>(
    radio: SharedRadio<B>,
    unit: u8,
    wait: Duration,
) -> Option<OwnedMutexGuard<Si446x<B>>> {
    match timeout(wait, radio.lock_owned()).await {
        Ok(guard) => Some(guard),
        Err(_) => {
            error!("Radio {} could not be acquired within {:?}", unit, wait);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::services::{MockDecoder, MockPacketServices};
    use super::*;
    use crate::bus::sim::Journal;
    use crate::bus::SimulatedChip;
    use crate::si446x::{ChipSettings, ChipState};
    use std::sync::Mutex as StdMutex;
    use tokio::sync::broadcast;
    use tokio::time::Instant;

    const WAIT: Duration = Duration::from_secs(1);

    fn settings(pool: usize) -> DispatcherSettings {
        DispatcherSettings {
            task_pool_size: pool,
            decoder_close_timeout: Duration::from_millis(500),
            ..DispatcherSettings::default()
        }
    }

    fn start(
        chip: &SimulatedChip,
        services: Box<dyn PacketServices>,
        pool: usize,
    ) -> (RadioHandle<SimulatedChip>, JoinHandle<()>) {
        let radio = Si446x::new(chip.clone(), ChipSettings::default());
        RadioManager::spawn_with_settings(radio, services, settings(pool))
    }

    fn push(journal: &Journal, entry: &str) {
        journal.lock().unwrap().push(entry.to_string());
    }

    /// Services whose decoder journals every call and acks close when `ack`
    fn journaled_services(journal: Journal, ack: bool) -> MockPacketServices {
        let mut services = MockPacketServices::new();
        services.expect_create_buffers().returning(|_| Ok(()));
        services.expect_create_callbacks().returning(|_| Ok(()));

        let j = journal.clone();
        services.expect_release_buffers().times(1).returning(move |_| push(&j, "release buffers"));
        let j = journal.clone();
        services
            .expect_release_callbacks()
            .times(1)
            .returning(move |_| push(&j, "release callbacks"));

        services.expect_create_decoder().times(1).returning(move |_| {
            let (events, _) = broadcast::channel(4);
            let mut decoder = MockDecoder::new();

            let j = journal.clone();
            decoder.expect_start().returning(move || {
                push(&j, "decoder start");
                Ok(())
            });
            let j = journal.clone();
            decoder.expect_stop().returning(move || {
                push(&j, "decoder stop");
                Ok(())
            });
            let j = journal.clone();
            decoder.expect_pause().returning(move || push(&j, "decoder pause"));
            let j = journal.clone();
            decoder.expect_resume().returning(move || push(&j, "decoder resume"));

            let tx = events.clone();
            decoder.expect_subscribe().returning(move || tx.subscribe());
            let tx = events.clone();
            decoder.expect_signal_close().returning(move || {
                if ack {
                    let _ = tx.send(DecoderEvent::CloseAck);
                }
            });
            decoder
                .expect_take_worker()
                .returning(|| Some(tokio::spawn(async {})));

            Ok(Box::new(decoder) as Box<dyn Decoder>)
        });

        services
    }

    fn rx_task() -> RadioTask {
        RadioTask::start_receive(ReceiveParams {
            base_frequency: 144_800_000,
            step_hz: 12_500,
            channel: 0,
            squelch: 0x4F,
            modulation: Modulation::Afsk,
        })
    }

    fn tx_task(frame: &'static [u8]) -> RadioTask {
        RadioTask::send(Frame::new(frame).unwrap(), Modulation::Afsk)
            .tuned(144_800_000, 12_500, 0)
            .with_power(0x7F)
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_lifecycle_with_decoder() {
        let journal: Journal = Arc::new(StdMutex::new(Vec::new()));
        let chip = SimulatedChip::new().with_journal(journal.clone());
        let services = journaled_services(journal.clone(), true);
        let (handle, dispatcher) = start(&chip, Box::new(services), 4);

        assert!(handle.is_closed());
        let open = handle.request(RadioTask::open(Modulation::Afsk), WAIT).await.unwrap();
        assert_eq!(open.result(), Some(TaskResult::Ok));
        assert!(!handle.is_closed());

        let rx = handle.request(rx_task(), WAIT).await.unwrap();
        assert_eq!(rx.result(), Some(TaskResult::Ok));
        assert_eq!(chip.state(), ChipState::Rx);

        let tx = handle.request(tx_task(b"status frame"), WAIT).await.unwrap();
        assert_eq!(tx.result(), Some(TaskResult::Ok));
        assert!(tx.tx_report.is_some());
        assert_eq!(chip.state(), ChipState::Rx);

        let stop = handle.request(RadioTask::stop_receive(), WAIT).await.unwrap();
        assert_eq!(stop.result(), Some(TaskResult::Ok));
        assert_eq!(chip.state(), ChipState::Ready);

        let close = handle.request(RadioTask::close(), WAIT).await.unwrap();
        assert_eq!(close.result(), Some(TaskResult::Ok));
        handle.wait_closed().await.unwrap();

        let entries = journal.lock().unwrap().clone();
        assert!(entries.contains(&"release buffers".to_string()));
        assert!(entries.contains(&"release callbacks".to_string()));

        handle.terminate();
        dispatcher.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_receive_start_lock_timeout_leaves_decoder_stopped() {
        let journal: Journal = Arc::new(StdMutex::new(Vec::new()));
        let chip = SimulatedChip::new();
        let services = journaled_services(journal.clone(), true);
        let radio = Si446x::new(chip.clone(), ChipSettings::default());
        let (handle, _dispatcher) = RadioManager::spawn_with_settings(
            radio,
            Box::new(services),
            DispatcherSettings {
                lock_timeout: Duration::from_millis(50),
                ..settings(2)
            },
        );

        handle.request(RadioTask::open(Modulation::Afsk), WAIT).await.unwrap();
        journal.lock().unwrap().clear();

        let held = handle.radio.clone().lock_owned().await;
        let rx = handle.request(rx_task(), WAIT).await.unwrap();
        assert_eq!(rx.result(), Some(TaskResult::Timeout));
        drop(held);

        assert!(
            !journal.lock().unwrap().contains(&"decoder start".to_string()),
            "{:?}",
            journal.lock().unwrap()
        );

        // Link stayed Open, so a transmission does not touch the decoder
        let tx = handle.request(tx_task(b"after timeout"), WAIT).await.unwrap();
        assert_eq!(tx.result(), Some(TaskResult::Ok));
        let entries = journal.lock().unwrap().clone();
        assert!(!entries.contains(&"decoder pause".to_string()), "{:?}", entries);

        handle.request(RadioTask::close(), WAIT).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_transmit_pauses_and_resumes_decoder_in_order() {
        let journal: Journal = Arc::new(StdMutex::new(Vec::new()));
        let chip = SimulatedChip::new().with_journal(journal.clone());
        let services = journaled_services(journal.clone(), true);
        let (handle, _dispatcher) = start(&chip, Box::new(services), 4);

        handle.request(RadioTask::open(Modulation::Afsk), WAIT).await.unwrap();
        handle.request(rx_task(), WAIT).await.unwrap();
        journal.lock().unwrap().clear();

        let tx = handle.request(tx_task(b"while receiving"), WAIT).await.unwrap();
        assert_eq!(tx.result(), Some(TaskResult::Ok));

        let entries = journal.lock().unwrap().clone();
        let position = |entry: &str| entries.iter().position(|e| e == entry).unwrap();
        let pause = position("decoder pause");
        let start_tx = position("cmd 31");
        let resume = position("decoder resume");
        assert!(pause < start_tx, "{:?}", entries);
        assert!(start_tx < resume, "{:?}", entries);

        // Reception was restored before the decoder resumed
        let restart_rx = entries.iter().rposition(|e| e == "cmd 32").unwrap();
        assert!(start_tx < restart_rx && restart_rx < resume, "{:?}", entries);

        handle.request(RadioTask::close(), WAIT).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_producers_processed_in_submission_order() {
        let chip = SimulatedChip::new();
        let (handle, _dispatcher) = start(&chip, Box::new(NoDecoderServices), 3);
        handle.request(RadioTask::open(Modulation::Fsk), WAIT).await.unwrap();

        let submitted = Arc::new(StdMutex::new(Vec::new()));
        let processed = Arc::new(StdMutex::new(Vec::new()));
        let mut producers = Vec::new();

        for producer in 0..6u32 {
            let handle = handle.clone();
            let submitted = submitted.clone();
            let processed = processed.clone();
            producers.push(tokio::spawn(async move {
                for i in 0..5u32 {
                    let sequence = producer * 100 + i;
                    let slot = handle.acquire_task(Duration::from_secs(60)).await.unwrap();
                    let mut task = RadioTask::new(TaskCommand::TxSend).with_sequence(sequence);
                    task.modulation = Modulation::Fsk;

                    let done = processed.clone();
                    let completion = Completion::callback(move |outcome: TaskOutcome| {
                        done.lock().unwrap().push(outcome.task.sequence);
                    });

                    let mut order = submitted.lock().unwrap();
                    handle.submit(slot, task, completion).unwrap();
                    order.push(sequence);
                }
            }));
        }

        for producer in producers {
            producer.await.unwrap();
        }
        let drained = handle.request(RadioTask::stop_receive(), WAIT).await.unwrap();
        assert_eq!(drained.result(), Some(TaskResult::Ok));

        let submitted = submitted.lock().unwrap().clone();
        let processed = processed.lock().unwrap().clone();
        assert_eq!(processed.len(), 30);
        assert_eq!(processed, submitted);

        let mut unique = processed.clone();
        unique.sort_unstable();
        unique.dedup();
        assert_eq!(unique.len(), 30);

        assert_eq!(handle.available_slots(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slot_returned_before_completion() {
        let chip = SimulatedChip::new();
        let (handle, _dispatcher) = start(&chip, Box::new(NoDecoderServices), 2);

        let seen = Arc::new(StdMutex::new(None));
        let (done_tx, done_rx) = oneshot::channel();
        let observer = handle.clone();
        let record = seen.clone();

        let slot = handle.acquire_task(WAIT).await.unwrap();
        assert_eq!(handle.available_slots(), 1);
        handle
            .submit(
                slot,
                RadioTask::open(Modulation::NotSet),
                Completion::callback(move |outcome| {
                    *record.lock().unwrap() = Some(observer.available_slots());
                    let _ = done_tx.send(outcome);
                }),
            )
            .unwrap();

        let outcome = done_rx.await.unwrap();
        assert_eq!(outcome.result(), Some(TaskResult::Ok));
        assert_eq!(*seen.lock().unwrap(), Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_pool_times_out() {
        let chip = SimulatedChip::new();
        let (handle, _dispatcher) = start(&chip, Box::new(NoDecoderServices), 2);

        let _a = handle.acquire_task(WAIT).await.unwrap();
        let _b = handle.acquire_task(WAIT).await.unwrap();
        assert_eq!(handle.available_slots(), 0);

        match handle.acquire_task(Duration::from_millis(100)).await {
            Err(RadioError::Timeout(what)) => assert_eq!(what, "task slot"),
            other => panic!("Expected Timeout, got: {:?}", other),
        }

        drop(_a);
        tokio_test::assert_ok!(handle.acquire_task(Duration::from_millis(100)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_commands_rejected_outside_lifecycle() {
        let chip = SimulatedChip::new();
        let (handle, _dispatcher) = start(&chip, Box::new(NoDecoderServices), 2);

        for task in [rx_task(), RadioTask::close(), tx_task(b"closed")] {
            let outcome = handle.request(task, WAIT).await.unwrap();
            assert_eq!(outcome.result(), Some(TaskResult::Rejected));
        }
        assert!(chip.commands().is_empty());

        handle.request(RadioTask::open(Modulation::NotSet), WAIT).await.unwrap();
        let again = handle.request(RadioTask::open(Modulation::NotSet), WAIT).await.unwrap();
        assert_eq!(again.result(), Some(TaskResult::Rejected));
    }

    #[tokio::test(start_paused = true)]
    async fn test_decoder_creation_failure_releases_services() {
        let mut services = MockPacketServices::new();
        services.expect_create_buffers().times(1).returning(|_| Ok(()));
        services.expect_create_callbacks().times(1).returning(|_| Ok(()));
        services
            .expect_create_decoder()
            .times(1)
            .returning(|_| Err(RadioError::Decoder("no memory".into())));
        services.expect_release_callbacks().times(1).returning(|_| ());
        services.expect_release_buffers().times(1).returning(|_| ());

        let chip = SimulatedChip::new();
        let (handle, _dispatcher) = start(&chip, Box::new(services), 2);

        let open = handle.request(RadioTask::open(Modulation::Afsk), WAIT).await.unwrap();
        assert_eq!(open.result(), Some(TaskResult::Failed));
        assert!(handle.is_closed());

        // Still closed, so RX is not allowed
        let rx = handle.request(rx_task(), WAIT).await.unwrap();
        assert_eq!(rx.result(), Some(TaskResult::Rejected));
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_without_ack_times_out_and_still_closes() {
        let journal: Journal = Arc::new(StdMutex::new(Vec::new()));
        let chip = SimulatedChip::new();
        let services = journaled_services(journal.clone(), false);
        let (handle, _dispatcher) = start(&chip, Box::new(services), 2);

        handle.request(RadioTask::open(Modulation::Afsk), WAIT).await.unwrap();

        let started = Instant::now();
        let close = handle.request(RadioTask::close(), Duration::from_secs(5)).await.unwrap();
        assert_eq!(close.result(), Some(TaskResult::Timeout));
        assert!(started.elapsed() >= Duration::from_millis(500));
        assert!(handle.is_closed());

        let entries = journal.lock().unwrap().clone();
        assert!(entries.contains(&"release buffers".to_string()));

        // Closed is adopted even after a timeout
        let reopen = handle.request(RadioTask::open(Modulation::NotSet), WAIT).await.unwrap();
        assert_eq!(reopen.result(), Some(TaskResult::Ok));
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminate_observed_within_poll_interval() {
        let chip = SimulatedChip::new();
        let (handle, dispatcher) = start(&chip, Box::new(NoDecoderServices), 2);
        tokio::task::yield_now().await;

        let started = Instant::now();
        handle.terminate();
        dispatcher.await.unwrap();
        assert!(started.elapsed() <= Duration::from_millis(100));

        assert!(matches!(
            handle.acquire_task(WAIT).await,
            Err(RadioError::DispatcherClosed)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_queued_requests_fail_after_termination() {
        let chip = SimulatedChip::new();
        let (handle, dispatcher) = start(&chip, Box::new(NoDecoderServices), 2);
        handle.terminate();
        dispatcher.await.unwrap();

        let slot = TaskSlot::new(Arc::new(Semaphore::new(1)).acquire_owned().await.unwrap());
        assert!(matches!(
            handle.submit(slot, RadioTask::close(), Completion::None),
            Err(RadioError::DispatcherClosed)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_temperature_through_handle() {
        let chip = SimulatedChip::new();
        chip.set_temperature_adc(1400);
        let (handle, _dispatcher) = start(&chip, Box::new(NoDecoderServices), 2);

        assert_eq!(handle.temperature().await.unwrap(), None);
        handle.request(RadioTask::open(Modulation::NotSet), WAIT).await.unwrap();
        assert_eq!(handle.temperature().await.unwrap(), Some(1_427));

        handle.request(RadioTask::close(), WAIT).await.unwrap();
        assert_eq!(handle.temperature().await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_transmit_reports_no_data() {
        let chip = SimulatedChip::new();
        let (handle, _dispatcher) = start(&chip, Box::new(NoDecoderServices), 2);
        handle.request(RadioTask::open(Modulation::NotSet), WAIT).await.unwrap();

        let mut task = RadioTask::new(TaskCommand::TxSend).tuned(144_800_000, 12_500, 0);
        task.modulation = Modulation::Afsk;
        let outcome = handle.request(task, WAIT).await.unwrap();

        assert_eq!(outcome.result(), Some(TaskResult::NoData));
        assert_eq!(
            outcome.tx_report.map(|r| r.outcome),
            Some(crate::feeder::TxOutcome::NoData)
        );
        assert!(!chip.opcodes().contains(&0x31));
    }
}
